#![allow(dead_code)]
use umya_spreadsheet::{PatternValues, Spreadsheet, Worksheet};
use workbook_patch_mcp::a1::CellAddress;

/// Fixture cell content.
#[derive(Clone, Debug)]
pub enum CellVal {
    Text(String),
    Num(f64),
    Formula(String),
    Empty,
}

impl From<&str> for CellVal {
    fn from(text: &str) -> Self {
        CellVal::Text(text.to_string())
    }
}

impl From<f64> for CellVal {
    fn from(number: f64) -> Self {
        CellVal::Num(number)
    }
}

impl From<i32> for CellVal {
    fn from(number: i32) -> Self {
        CellVal::Num(f64::from(number))
    }
}

fn address(label: &str) -> CellAddress {
    CellAddress::parse(label).unwrap_or_else(|err| panic!("bad fixture cell {label}: {err}"))
}

fn write(sheet: &mut Worksheet, at: CellAddress, value: &CellVal) {
    let cell = sheet.get_cell_mut((at.col, at.row));
    match value {
        CellVal::Text(text) => {
            cell.set_value_string(text.clone());
        }
        CellVal::Num(number) => {
            cell.set_value_number(*number);
        }
        CellVal::Formula(formula) => {
            cell.set_formula(formula.trim_start_matches('=').to_string());
        }
        CellVal::Empty => {}
    }
}

/// Sheet by name, added to the book when missing.
pub fn sheet_mut<'a>(book: &'a mut Spreadsheet, name: &str) -> &'a mut Worksheet {
    if book.get_sheet_by_name(name).is_none() {
        book.new_sheet(name).expect("new sheet");
    }
    book.get_sheet_by_name_mut(name).expect("sheet exists")
}

/// Bold header row at `origin` with `rows` below it.
pub fn fill_table<H, R, V>(sheet: &mut Worksheet, origin: &str, headers: &[H], rows: &[R])
where
    H: AsRef<str>,
    R: AsRef<[V]>,
    V: Into<CellVal> + Clone,
{
    let origin = address(origin);
    for (offset, header) in (0u32..).zip(headers) {
        let at = CellAddress::new(origin.col + offset, origin.row);
        write(sheet, at, &CellVal::from(header.as_ref()));
        sheet
            .get_style_mut((at.col, at.row))
            .get_font_mut()
            .set_bold(true);
    }
    for (row_offset, row) in (1u32..).zip(rows) {
        for (col_offset, value) in (0u32..).zip(row.as_ref()) {
            let at = CellAddress::new(origin.col + col_offset, origin.row + row_offset);
            write(sheet, at, &value.clone().into());
        }
    }
}

pub fn fill_sparse(sheet: &mut Worksheet, cells: &[(&str, CellVal)]) {
    for (label, value) in cells {
        write(sheet, address(label), value);
    }
}

pub fn set_solid_fill(sheet: &mut Worksheet, cell: &str, argb: &str) {
    sheet
        .get_style_mut(cell)
        .get_fill_mut()
        .get_pattern_fill_mut()
        .set_pattern_type(PatternValues::Solid)
        .get_foreground_color_mut()
        .set_argb(argb);
}
