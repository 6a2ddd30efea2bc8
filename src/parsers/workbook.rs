use calamine::{open_workbook_auto, Data, Range, Reader};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::core::address::CellCoordinate;
use crate::error::{CellGraphError, Result};

/// One cell as exposed by a workbook reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub coordinate: CellCoordinate,
    /// Formula text including its leading `=`, or the displayed value.
    pub raw_value: String,
    pub is_formula: bool,
}

impl Cell {
    pub fn value(coordinate: CellCoordinate, raw_value: impl Into<String>) -> Self {
        let raw_value = raw_value.into();
        let is_formula = raw_value.starts_with('=');
        Self {
            coordinate,
            raw_value,
            is_formula,
        }
    }

    pub fn formula(coordinate: CellCoordinate, text: &str) -> Self {
        Self {
            coordinate,
            raw_value: normalize_formula(text),
            is_formula: true,
        }
    }

    /// Formula text if this cell holds one.
    pub fn formula_text(&self) -> Option<&str> {
        (self.is_formula || self.raw_value.starts_with('=')).then_some(self.raw_value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub cells: Vec<Cell>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: Vec::new(),
        }
    }

    pub fn with_cell(mut self, cell: Cell) -> Self {
        self.cells.push(cell);
        self
    }

    pub fn formula_cells(&self) -> impl Iterator<Item = (&Cell, &str)> {
        self.cells
            .iter()
            .filter_map(|cell| cell.formula_text().map(|text| (cell, text)))
    }
}

/// A workbook snapshot: sheets in workbook order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, sheet: Sheet) -> Self {
        self.sheets.push(sheet);
        self
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn cell_count(&self) -> usize {
        self.sheets.iter().map(|s| s.cells.len()).sum()
    }
}

/// Source of workbook snapshots.
pub trait WorkbookReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<Workbook>;
}

/// Reads `.xlsx`, `.xlsm`, `.xlsb`, `.xls` and `.ods` files through calamine.
///
/// Every coordinate from `A1` to the bottom-right corner of the sheet's used
/// range is reported, empty or not, so a sheet whose data starts at `C3` still
/// yields cells for `A1..B2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalamineReader;

impl CalamineReader {
    pub fn new() -> Self {
        Self
    }
}

impl WorkbookReader for CalamineReader {
    fn read(&self, path: &Path) -> Result<Workbook> {
        let mut workbook =
            open_workbook_auto(path).map_err(|err| CellGraphError::workbook_read(path, err))?;
        let sheet_names = workbook.sheet_names().to_owned();

        let mut out = Workbook::new();
        for sheet_name in sheet_names {
            let values = workbook.worksheet_range(&sheet_name).map_err(|err| {
                CellGraphError::workbook_read(path, format!("sheet `{sheet_name}`: {err}"))
            })?;
            let formulas = workbook.worksheet_formula(&sheet_name).map_err(|err| {
                CellGraphError::workbook_read(path, format!("formulas of `{sheet_name}`: {err}"))
            })?;

            let sheet = read_sheet(sheet_name, &values, &formulas);
            debug!("read sheet `{}` ({} cells)", sheet.name, sheet.cells.len());
            out.sheets.push(sheet);
        }

        Ok(out)
    }
}

fn read_sheet(name: String, values: &Range<Data>, formulas: &Range<String>) -> Sheet {
    // `end()` is absolute and 0-based.
    let (last_row, last_col) = [values.end(), formulas.end()]
        .into_iter()
        .flatten()
        .fold(None, |acc: Option<(u32, u32)>, (row, col)| match acc {
            Some((r, c)) => Some((r.max(row), c.max(col))),
            None => Some((row, col)),
        })
        .unwrap_or_default();

    if values.is_empty() && formulas.is_empty() {
        return Sheet::new(name);
    }

    let mut sheet = Sheet::new(name);
    sheet
        .cells
        .reserve(((last_row + 1) as usize).saturating_mul((last_col + 1) as usize));

    for row in 0..=last_row {
        for col in 0..=last_col {
            let coordinate = CellCoordinate::new(col + 1, row + 1);
            let formula = formulas
                .get_value((row, col))
                .map(|f| f.trim())
                .filter(|f| !f.is_empty());

            let cell = match formula {
                Some(text) => Cell::formula(coordinate, text),
                None => {
                    let raw = match values.get_value((row, col)) {
                        Some(Data::Empty) | None => String::new(),
                        Some(value) => value.to_string(),
                    };
                    Cell {
                        coordinate,
                        raw_value: raw,
                        is_formula: false,
                    }
                }
            };
            sheet.cells.push(cell);
        }
    }

    sheet
}

fn normalize_formula(formula: &str) -> String {
    let trimmed = formula.trim();
    if trimmed.starts_with('=') {
        trimmed.to_owned()
    } else {
        format!("={trimmed}")
    }
}
