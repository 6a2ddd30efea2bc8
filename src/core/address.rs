use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CellGraphError, Result};

/// Last column on an Excel grid (`XFD`).
pub const MAX_COLUMN: u32 = 16_384;
/// Last row on an Excel grid.
pub const MAX_ROW: u32 = 1_048_576;

/// A 1-based `(column, row)` position within a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoordinate {
    pub column: u32,
    pub row: u32,
}

impl CellCoordinate {
    pub fn new(column: u32, row: u32) -> Self {
        Self { column, row }
    }
}

impl fmt::Display for CellCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_to_letters(self.column), self.row)
    }
}

impl FromStr for CellCoordinate {
    type Err = CellGraphError;

    /// Accepts `A1`, `$A$1`, `aa10`. Markers are dropped; the result is always relative.
    fn from_str(s: &str) -> Result<Self> {
        let cleaned: String = s.trim().chars().filter(|c| *c != '$').collect();
        let split = cleaned
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| CellGraphError::Parse(s.to_string()))?;
        let (letters, digits) = cleaned.split_at(split);

        if letters.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(CellGraphError::Parse(s.to_string()));
        }

        let column = letters_to_column(letters).ok_or_else(|| CellGraphError::Parse(s.to_string()))?;
        let row: u32 = digits
            .parse()
            .map_err(|_| CellGraphError::Parse(s.to_string()))?;
        if row == 0 {
            return Err(CellGraphError::Parse(s.to_string()));
        }

        Ok(Self { column, row })
    }
}

/// Fully resolved identity of a cell: sheet, column and row.
///
/// Ordering is sheet first, then column, then row, which is the order impact
/// results are reported in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddress {
    pub sheet: String,
    pub column: u32,
    pub row: u32,
}

impl CellAddress {
    pub fn new(sheet: impl Into<String>, column: u32, row: u32) -> Self {
        Self {
            sheet: sheet.into(),
            column,
            row,
        }
    }

    pub fn at(sheet: impl Into<String>, coordinate: CellCoordinate) -> Self {
        Self::new(sheet, coordinate.column, coordinate.row)
    }

    pub fn coordinate(&self) -> CellCoordinate {
        CellCoordinate::new(self.column, self.row)
    }
}

/// Whether a sheet name has to be wrapped in single quotes in `Sheet!A1` form.
pub fn sheet_needs_quotes(sheet: &str) -> bool {
    sheet.is_empty() || !sheet.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if sheet_needs_quotes(&self.sheet) {
            write!(f, "'{}'!{}", self.sheet, self.coordinate())
        } else {
            write!(f, "{}!{}", self.sheet, self.coordinate())
        }
    }
}

impl FromStr for CellAddress {
    type Err = CellGraphError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CellGraphError::InvalidAddress(s.to_string());
        let text = s.trim();

        let (sheet, coordinate) = if let Some(quoted) = text.strip_prefix('\'') {
            let end = quoted.rfind("'!").ok_or_else(invalid)?;
            (&quoted[..end], &quoted[end + 2..])
        } else {
            let bang = text.rfind('!').ok_or_else(invalid)?;
            (&text[..bang], &text[bang + 1..])
        };

        if sheet.is_empty() {
            return Err(invalid());
        }
        let coordinate: CellCoordinate = coordinate.parse().map_err(|_| invalid())?;
        Ok(Self::at(sheet, coordinate))
    }
}

/// Bijective base-26: 1 -> `A`, 26 -> `Z`, 27 -> `AA`.
pub fn column_to_letters(mut column: u32) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push(b'A' + rem as u8);
        column = (column - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Inverse of [`column_to_letters`], case-insensitive. `None` on empty input,
/// non-letters or overflow.
pub fn letters_to_column(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A' + 1) as u32;
        acc.checked_mul(26)?.checked_add(digit)
    })
}
