use cellgraph::core::{impact_of, CellAddress, WorkbookAnalyzer};
use cellgraph::parsers::{CalamineReader, WorkbookReader};
use cellgraph::CellGraphError;
use rust_xlsxwriter::Workbook as XlsxWorkbook;
use std::fs;
use std::path::Path;

fn write_fixture(path: &Path) {
    let mut workbook = XlsxWorkbook::new();

    let inputs = workbook.add_worksheet();
    inputs.set_name("Sheet One").unwrap();
    inputs.write_number(0, 0, 10.0).unwrap();
    inputs.write_number(1, 0, 20.0).unwrap();

    let calc = workbook.add_worksheet();
    calc.set_name("Calc").unwrap();
    calc.write_formula(0, 1, "=SUM('Sheet One'!A1:A2)").unwrap();
    calc.write_formula(1, 1, "=B1*2").unwrap();
    calc.write_formula(2, 27, "=B2+$B$1").unwrap();

    workbook.save(path).unwrap();
}

#[test]
fn calamine_reader_exposes_cells_and_formulas() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("book.xlsx");
    write_fixture(&path);

    let wb = CalamineReader::new().read(&path).unwrap();
    let names: Vec<_> = wb.sheets.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Sheet One", "Calc"]);

    let calc = wb.sheet("Calc").unwrap();
    let formulas: Vec<_> = calc
        .formula_cells()
        .map(|(cell, text)| (cell.coordinate.to_string(), text.to_string()))
        .collect();
    assert!(formulas.contains(&("B1".to_string(), "=SUM('Sheet One'!A1:A2)".to_string())));
    assert!(formulas.contains(&("AB3".to_string(), "=B2+$B$1".to_string())));

    // Used area is A1..AB3 and every coordinate in it is reported.
    assert_eq!(calc.cells.len(), 3 * 28);
}

#[test]
fn analyzer_builds_graph_from_xlsx() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("book.xlsx");
    write_fixture(&path);

    let graph = WorkbookAnalyzer::new().analyze(&path).unwrap();

    let a1 = CellAddress::new("Sheet One", 1, 1);
    assert!(graph.contains(&a1));
    assert_eq!(
        impact_of(&graph, "'Sheet One'!A1").unwrap(),
        vec!["Calc!B1", "Calc!B2", "Calc!AB3"]
    );
    assert_eq!(impact_of(&graph, "Calc!B2").unwrap(), vec!["Calc!AB3"]);
}

#[test]
fn unreadable_workbook_is_a_read_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("broken.xlsx");
    fs::write(&path, b"definitely not a zip archive").unwrap();

    let err = WorkbookAnalyzer::new().analyze(&path).unwrap_err();
    assert!(matches!(err, CellGraphError::WorkbookRead { .. }));

    let missing = dir.path().join("missing.xlsx");
    assert!(CalamineReader::new().read(&missing).is_err());
}
