//! Workbook ingestion (XLSX / XLS) via calamine.

use calamine::{open_workbook_auto_from_rs, Data, DataType, Range, Reader};
use std::io::Cursor;

use crate::error::{FormatError, FormatResult};
use crate::models::{Cell, RawTable, Table};
use crate::parser::RawSheet;

/// Read every worksheet, in workbook order.
///
/// Opening the workbook is a file-level failure; a single unreadable
/// worksheet is not, it comes back as a [`RawSheet`] carrying the error.
pub fn read_workbook(bytes: &[u8]) -> FormatResult<Vec<RawSheet>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let names = workbook.sheet_names();
    if names.is_empty() {
        return Err(FormatError::Empty);
    }

    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let table = workbook
            .worksheet_range(&name)
            .map(|range| range_to_table(&range))
            .map_err(FormatError::from);
        sheets.push(RawSheet { name, table });
    }
    Ok(sheets)
}

fn range_to_table(range: &Range<Data>) -> RawTable {
    let rows = range
        .rows()
        .map(|row| row.iter().map(to_cell).collect())
        .collect();
    Table::from_rows(rows)
}

fn to_cell(data: &Data) -> Cell {
    match data {
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::String(s) => Cell::from_raw(s),
        Data::Bool(b) => Cell::text(b.to_string()),
        Data::DateTime(_) | Data::DateTimeIso(_) => match data.as_date() {
            Some(date) => Cell::Date(date),
            None => Cell::from_raw(&data.to_string()),
        },
        Data::DurationIso(s) => Cell::from_raw(s),
        Data::Error(_) | Data::Empty => Cell::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

    fn two_sheet_workbook() -> Vec<u8> {
        let mut workbook = Workbook::new();

        let first = workbook.add_worksheet();
        first.set_name("Balance").unwrap();
        first.write_string(0, 0, "Item").unwrap();
        first.write_string(0, 1, "2023").unwrap();
        first.write_string(1, 0, "Cash").unwrap();
        first.write_number(1, 1, 1990.5).unwrap();
        first.write_boolean(2, 0, true).unwrap();

        let second = workbook.add_worksheet();
        second.set_name("Dates").unwrap();
        second.write_string(0, 0, "When").unwrap();
        let date = ExcelDateTime::from_ymd(2024, 1, 5).unwrap();
        let format = Format::new().set_num_format("yyyy-mm-dd");
        second.write_datetime_with_format(1, 0, &date, &format).unwrap();

        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_reads_sheets_in_order() {
        let sheets = read_workbook(&two_sheet_workbook()).unwrap();

        let names: Vec<&str> = sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Balance", "Dates"]);
    }

    #[test]
    fn test_cell_mapping() {
        let sheets = read_workbook(&two_sheet_workbook()).unwrap();
        let balance = sheets[0].table.as_ref().unwrap();

        assert_eq!(balance.headers, vec!["Item", "2023"]);
        assert_eq!(balance.rows[0][1], Cell::Number(1990.5));
        assert_eq!(balance.rows[1][0], Cell::text("true"));

        let dates = sheets[1].table.as_ref().unwrap();
        assert_eq!(dates.rows[0][0], Cell::Date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()));
    }

    #[test]
    fn test_garbage_is_format_error() {
        let err = read_workbook(b"definitely not a workbook").unwrap_err();
        assert!(matches!(err, FormatError::Excel(_)));
    }
}
