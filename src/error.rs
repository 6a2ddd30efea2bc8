use std::path::PathBuf;
use thiserror::Error;

use crate::core::CellAddress;

pub type Result<T> = std::result::Result<T, CellGraphError>;

#[derive(Debug, Error)]
pub enum CellGraphError {
    /// A coordinate-shaped token that does not denote a cell on the grid.
    #[error("unrecognized cell reference `{0}`")]
    Parse(String),

    #[error("failed to read workbook {}: {message}", path.display())]
    WorkbookRead { path: PathBuf, message: String },

    #[error("reference to unknown sheet `{sheet}` from {cell}")]
    UnresolvedReference { sheet: String, cell: CellAddress },

    #[error("a rebuild is already in progress")]
    RebuildInProgress,

    #[error("no dependency graph available")]
    NoGraph,

    #[error("invalid cell address `{0}`")]
    InvalidAddress(String),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CellGraphError {
    pub fn workbook_read(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::WorkbookRead {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
