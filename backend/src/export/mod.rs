//! Cleaned sheets back into one workbook.
//!
//! One worksheet per sheet result, in report order. Sheets without a
//! cleaned table, or whose table does not fit in a worksheet, are skipped
//! and reported; the rest are still written.

use rust_xlsxwriter::{Format, Workbook, Worksheet};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

use crate::error::{ExportError, ExportResult};
use crate::logs::{log_success, log_warning};
use crate::models::{Cell, Table};
use crate::pipeline::SheetResult;

/// Worksheet limits of the xlsx format.
pub const MAX_ROWS: usize = 1_048_576;
pub const MAX_COLUMNS: usize = 16_384;
pub const MAX_SHEET_NAME: usize = 31;

const INVALID_NAME_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrittenSheet {
    /// Name in the report.
    pub source: String,
    /// Name in the workbook, after sanitizing.
    pub name: String,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSheet {
    pub source: String,
    pub reason: String,
}

/// What an export wrote and what it had to leave out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportOutcome {
    pub written: Vec<WrittenSheet>,
    pub skipped: Vec<SkippedSheet>,
}

/// Writes cleaned tables as xlsx.
#[derive(Debug)]
pub struct SheetExporter {
    header_format: Format,
}

impl Default for SheetExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SheetExporter {
    pub fn new() -> Self {
        Self {
            header_format: Format::new().set_bold(),
        }
    }

    pub fn export_to_buffer(&self, sheets: &[SheetResult]) -> ExportResult<(Vec<u8>, ExportOutcome)> {
        let (mut workbook, outcome) = self.build(sheets);
        let bytes = workbook.save_to_buffer()?;
        Ok((bytes, outcome))
    }

    pub fn export_to_path(&self, sheets: &[SheetResult], path: impl AsRef<Path>) -> ExportResult<ExportOutcome> {
        let (bytes, outcome) = self.export_to_buffer(sheets)?;
        std::fs::write(path.as_ref(), bytes)?;
        log_success(format!(
            "Exported {} sheet(s) to {}",
            outcome.written.len(),
            path.as_ref().display()
        ));
        Ok(outcome)
    }

    fn build(&self, sheets: &[SheetResult]) -> (Workbook, ExportOutcome) {
        let mut workbook = Workbook::new();
        let mut outcome = ExportOutcome::default();
        let mut taken = HashSet::new();

        for sheet in sheets {
            let result = sheet
                .table
                .as_ref()
                .ok_or_else(|| ExportError::NoTable(sheet.name.clone()))
                .and_then(|table| {
                    let name = sanitize_sheet_name(&sheet.name, &taken);
                    let worksheet = self.write_sheet(&name, &sheet.name, table)?;
                    Ok((name, worksheet, table.height()))
                });

            match result {
                Ok((name, worksheet, rows)) => {
                    taken.insert(name.to_lowercase());
                    workbook.push_worksheet(worksheet);
                    outcome.written.push(WrittenSheet {
                        source: sheet.name.clone(),
                        name,
                        rows,
                    });
                }
                Err(err) => {
                    log_warning(format!("Skipping sheet '{}': {}", sheet.name, err));
                    outcome.skipped.push(SkippedSheet {
                        source: sheet.name.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        (workbook, outcome)
    }

    fn write_sheet(&self, name: &str, source: &str, table: &Table) -> ExportResult<Worksheet> {
        if table.height() + 1 > MAX_ROWS || table.width() > MAX_COLUMNS {
            return Err(ExportError::TooLarge {
                sheet: source.to_string(),
                rows: table.height(),
                columns: table.width(),
            });
        }

        let mut worksheet = Worksheet::new();
        worksheet.set_name(name)?;

        // Bounds checked above, so the casts cannot truncate
        for (col, header) in table.headers.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, header, &self.header_format)?;
        }
        for (r, row) in table.rows.iter().enumerate() {
            let r = (r + 1) as u32;
            for (col, cell) in row.iter().enumerate() {
                let col = col as u16;
                match cell {
                    Cell::Empty | Cell::Missing => {}
                    Cell::Number(n) if n.is_finite() => {
                        worksheet.write_number(r, col, *n)?;
                    }
                    other => {
                        worksheet.write_string(r, col, other.display())?;
                    }
                }
            }
        }
        Ok(worksheet)
    }
}

/// Make a name acceptable to Excel and unique (case-insensitively) among `taken`.
///
/// `taken` holds lowercased names.
pub fn sanitize_sheet_name(name: &str, taken: &HashSet<String>) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if INVALID_NAME_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'').trim();
    let base = if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("history") {
        "Sheet"
    } else {
        cleaned
    };

    let candidate = truncate(base, MAX_SHEET_NAME);
    if !taken.contains(&candidate.to_lowercase()) {
        return candidate;
    }

    let mut n = 2;
    loop {
        let suffix = format!(" ({})", n);
        let candidate = format!("{}{}", truncate(base, MAX_SHEET_NAME - suffix.len()), suffix);
        if !taken.contains(&candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect::<String>().trim_end().to_string()
}
