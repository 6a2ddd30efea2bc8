pub mod reference;
pub mod workbook;

pub use reference::{extract, ReferenceToken};
pub use workbook::{CalamineReader, Cell, Sheet, Workbook, WorkbookReader};
