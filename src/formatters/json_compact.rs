use petgraph::visit::EdgeRef;
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::core::address::column_to_letters;
use crate::core::{CellAddress, DependencyGraph};
use crate::error::Result;

/// JSON rendering of graphs and impact results with minimal tokens.
pub struct JsonCompactFormatter {
    /// `true`: nodes as `[sheet_id, "A1"]`; `false`: canonical `Sheet!A1` strings.
    minimal: bool,
    pretty: bool,
}

impl JsonCompactFormatter {
    pub fn new() -> Self {
        Self {
            minimal: true,
            pretty: false,
        }
    }

    pub fn full() -> Self {
        Self {
            minimal: false,
            pretty: false,
        }
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn format_to_file(&self, graph: &DependencyGraph, output_path: &Path) -> Result<()> {
        let json_content = self.format_graph(graph)?;
        fs::write(output_path, json_content)?;
        Ok(())
    }

    pub fn format_graph(&self, graph: &DependencyGraph) -> Result<String> {
        let inner = graph.inner();

        // Sheet ids in order of first appearance
        let mut sheet_map: HashMap<&str, u32> = HashMap::new();
        let mut sheets: Vec<&str> = Vec::new();
        for address in graph.nodes() {
            if !sheet_map.contains_key(address.sheet.as_str()) {
                sheet_map.insert(address.sheet.as_str(), sheets.len() as u32);
                sheets.push(address.sheet.as_str());
            }
        }

        let nodes: Vec<serde_json::Value> = graph
            .nodes()
            .map(|address| {
                if self.minimal {
                    json!([
                        sheet_map[address.sheet.as_str()],
                        format!("{}{}", column_to_letters(address.column), address.row)
                    ])
                } else {
                    json!(address.to_string())
                }
            })
            .collect();

        // Node weights are iterated in index order, so indices line up with `nodes`.
        let edges: Vec<[usize; 2]> = inner
            .edge_references()
            .map(|e| [e.source().index(), e.target().index()])
            .collect();

        let output = json!({
            "meta": {
                "nodes": graph.node_count(),
                "edges": graph.edge_count(),
                "format": if self.minimal { "compact" } else { "full" }
            },
            "sheets": sheets,
            "nodes": nodes,
            "edges": edges
        });

        self.render(&output)
    }

    /// `{"source": ..., "dependents": [...]}`, the shape impact answers are served in.
    pub fn format_impact(&self, source: &CellAddress, dependents: &[String]) -> Result<String> {
        let output = json!({
            "source": source.to_string(),
            "dependents": dependents,
        });
        self.render(&output)
    }

    fn render(&self, value: &serde_json::Value) -> Result<String> {
        Ok(if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        })
    }
}

impl Default for JsonCompactFormatter {
    fn default() -> Self {
        Self::new()
    }
}
