use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::address::CellAddress;
use super::graph::{DependencyGraph, GraphBuilder};
use crate::error::{CellGraphError, Result};
use crate::parsers::reference::{self, ReferenceToken};
use crate::parsers::workbook::{CalamineReader, Sheet, Workbook, WorkbookReader};

/// Reads a workbook and turns it into a [`DependencyGraph`].
pub struct WorkbookAnalyzer {
    reader: Arc<dyn WorkbookReader>,
}

impl WorkbookAnalyzer {
    pub fn new() -> Self {
        Self::with_reader(Arc::new(CalamineReader::new()))
    }

    pub fn with_reader(reader: Arc<dyn WorkbookReader>) -> Self {
        Self { reader }
    }

    /// Fails as a whole when the workbook cannot be read.
    pub fn analyze(&self, path: &Path) -> Result<DependencyGraph> {
        let started = Instant::now();
        let workbook = self.reader.read(path)?;
        debug!(
            "read {} sheets / {} cells from {} in {:?}",
            workbook.sheets.len(),
            workbook.cell_count(),
            path.display(),
            started.elapsed()
        );
        Ok(build(&workbook))
    }
}

impl Default for WorkbookAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the graph for an in-memory workbook.
///
/// Node pass: every cell of every sheet. Edge pass: every reference of every
/// formula, ranges expanded, unqualified references resolved to the formula's
/// own sheet. References to sheets missing from the workbook are logged and
/// dropped.
pub fn build(workbook: &Workbook) -> DependencyGraph {
    let started = Instant::now();
    let mut builder = GraphBuilder::with_capacity(workbook.cell_count(), workbook.cell_count());

    for sheet in &workbook.sheets {
        for cell in &sheet.cells {
            builder.add_node(CellAddress::at(sheet.name.as_str(), cell.coordinate));
        }
    }

    let sheet_names: HashSet<&str> = workbook.sheets.iter().map(|s| s.name.as_str()).collect();

    let edges: Vec<(CellAddress, CellAddress)> = workbook
        .sheets
        .par_iter()
        .flat_map_iter(|sheet| sheet_edges(sheet, &sheet_names))
        .collect();

    let mut added = 0usize;
    for (precedent, dependent) in edges {
        if builder.add_edge(precedent, dependent).is_some() {
            added += 1;
        }
    }

    let graph = builder.build();
    debug!(
        "built graph with {} nodes and {} edges in {:?}",
        graph.node_count(),
        added,
        started.elapsed()
    );
    graph
}

fn sheet_edges<'a>(
    sheet: &'a Sheet,
    sheet_names: &'a HashSet<&'a str>,
) -> impl Iterator<Item = (CellAddress, CellAddress)> + 'a {
    sheet.formula_cells().flat_map(move |(cell, text)| {
        let dependent = CellAddress::at(sheet.name.as_str(), cell.coordinate);
        reference::extract(text)
            .filter_map(|token| match resolve_sheet(&token, sheet, sheet_names, &dependent) {
                Ok(target_sheet) => Some((target_sheet, token)),
                Err(err) => {
                    warn!("{err}");
                    None
                }
            })
            .flat_map(|(target_sheet, token)| {
                token
                    .cells()
                    .map(move |coordinate| CellAddress::at(target_sheet.as_str(), coordinate))
                    .collect::<Vec<_>>()
            })
            .filter(|precedent| *precedent != dependent)
            .map(|precedent| (precedent, dependent.clone()))
            .collect::<Vec<_>>()
    })
}

fn resolve_sheet(
    token: &ReferenceToken,
    sheet: &Sheet,
    sheet_names: &HashSet<&str>,
    dependent: &CellAddress,
) -> Result<String> {
    match token.sheet.as_deref() {
        None => Ok(sheet.name.clone()),
        Some(name) if sheet_names.contains(name) => Ok(name.to_string()),
        Some(name) => Err(CellGraphError::UnresolvedReference {
            sheet: name.to_string(),
            cell: dependent.clone(),
        }),
    }
}
