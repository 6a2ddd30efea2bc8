//! Formula reference extraction.
//!
//! The extractor does not parse the formula language. It scans for substrings
//! shaped like
//!
//! ```text
//! [ sheet '!' ] coordinate [ ':' coordinate ]
//! sheet      := '\'' [^']+ '\'' | [A-Za-z0-9_][A-Za-z0-9_ ]*
//! coordinate := '$'? [A-Za-z]+ '$'? [0-9]+
//! ```
//!
//! Known limitations, kept on purpose:
//! - text inside string literals that looks like a coordinate (`="Q1"`) is reported
//! - function names ending in digits (`LOG10(`) are reported as coordinates
//! - quoted sheet names cannot contain `'`; there is no escape syntax
//! - named ranges, structured table references and whole-column/row ranges
//!   (`A:A`, `1:1`) produce no tokens

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::core::address::{CellCoordinate, MAX_COLUMN, MAX_ROW};
use crate::error::{CellGraphError, Result};

static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (?:
            (?:'(?P<quoted>[^']+)'|(?P<unquoted>[A-Za-z0-9_][A-Za-z0-9_\ ]*))
            !
        )?
        (?P<start>\$?[A-Za-z]+\$?[0-9]+)
        (?:\s*:\s*(?P<end>\$?[A-Za-z]+\$?[0-9]+))?
        ",
    )
    .expect("reference pattern is valid")
});

/// One reference found in a formula: a single cell or a rectangle, optionally
/// qualified by a sheet name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceToken {
    /// `None` means the sheet of the formula cell.
    pub sheet: Option<String>,
    pub start: CellCoordinate,
    pub end: Option<CellCoordinate>,
}

impl ReferenceToken {
    pub fn is_range(&self) -> bool {
        self.end.is_some()
    }

    /// Corners as `(top_left, bottom_right)`, whatever order the formula wrote them in.
    pub fn normalized(&self) -> (CellCoordinate, CellCoordinate) {
        let end = self.end.unwrap_or(self.start);
        (
            CellCoordinate::new(self.start.column.min(end.column), self.start.row.min(end.row)),
            CellCoordinate::new(self.start.column.max(end.column), self.start.row.max(end.row)),
        )
    }

    /// Every coordinate covered by the token, column-major.
    pub fn cells(&self) -> impl Iterator<Item = CellCoordinate> {
        let (top_left, bottom_right) = self.normalized();
        (top_left.column..=bottom_right.column).flat_map(move |column| {
            (top_left.row..=bottom_right.row).map(move |row| CellCoordinate::new(column, row))
        })
    }

    /// Number of cells covered.
    pub fn cell_count(&self) -> u64 {
        let (top_left, bottom_right) = self.normalized();
        (bottom_right.column - top_left.column + 1) as u64 * (bottom_right.row - top_left.row + 1) as u64
    }
}

/// Lazily yields the references in `formula`, left to right.
///
/// Tokens that match the pattern but fall outside the sheet grid are skipped.
pub fn extract(formula: &str) -> impl Iterator<Item = ReferenceToken> + '_ {
    REFERENCE_RE
        .captures_iter(formula)
        .filter_map(move |caps| match token_from_captures(&caps) {
            Ok(token) => Some(token),
            Err(err) => {
                trace!("skipping token in `{}`: {}", formula, err);
                None
            }
        })
}

fn token_from_captures(caps: &Captures<'_>) -> Result<ReferenceToken> {
    let sheet = caps
        .name("quoted")
        .or_else(|| caps.name("unquoted"))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());

    let start = parse_grid_coordinate(&caps["start"])?;
    let end = caps
        .name("end")
        .map(|m| parse_grid_coordinate(m.as_str()))
        .transpose()?;

    Ok(ReferenceToken { sheet, start, end })
}

fn parse_grid_coordinate(text: &str) -> Result<CellCoordinate> {
    let coordinate: CellCoordinate = text.parse()?;
    if coordinate.column > MAX_COLUMN || coordinate.row > MAX_ROW {
        return Err(CellGraphError::Parse(text.to_string()));
    }
    Ok(coordinate)
}
