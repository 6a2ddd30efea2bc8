//! # CELLGRAPH
//!
//! Cell-level dependency graphs for spreadsheets.
//!
//! CELLGRAPH scans workbook formulas for cell references, builds a directed
//! precedent → dependent graph and answers impact queries: which cells are
//! affected, directly or transitively, when a given cell changes.
//!
//! ## Components
//!
//! - **Reference extraction** ([`parsers::reference`]): formula text to reference tokens
//! - **Graph building** ([`core::analyzer`]): workbook to [`core::DependencyGraph`]
//! - **Impact queries** ([`core::impact`]): transitive dependents of a cell
//! - **Resync** ([`core::resync`]): watch the workbook, rebuild, publish, notify

pub mod config;
pub mod core;
pub mod error;
pub mod formatters;
pub mod parsers;

pub use error::{CellGraphError, Result};
