/// Tabular store implementations for the harvest workspace.
///
/// - **Workbook**: JSON workbook file with sheets of row-major cells
pub mod workbook;

pub use workbook::{JsonWorkbook, WorkbookLayout};
