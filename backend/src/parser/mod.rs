//! Raw file ingestion with encoding and delimiter auto-detection.
//!
//! Turns input bytes into one [`RawTable`] per sheet. CSV input yields a
//! single sheet; workbooks (see [`excel`]) yield one per worksheet, in
//! workbook order. No type interpretation happens here: every CSV value is
//! kept as text.

pub mod excel;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{FormatError, FormatResult};
use crate::models::{Cell, RawTable, Table};

/// Sheet name used for CSV input when the caller does not supply one.
pub const DEFAULT_CSV_SHEET: &str = "Sheet1";

/// Declared input format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Csv,
    Xlsx,
    Xls,
}

impl InputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Csv => "csv",
            InputFormat::Xlsx => "xlsx",
            InputFormat::Xls => "xls",
        }
    }

    /// Guess the format from a file extension.
    pub fn from_path(path: impl AsRef<Path>) -> FormatResult<Self> {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        ext.parse()
    }
}

impl FromStr for InputFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "csv" | "txt" | "tsv" => Ok(InputFormat::Csv),
            "xlsx" | "xlsm" => Ok(InputFormat::Xlsx),
            "xls" => Ok(InputFormat::Xls),
            other => Err(FormatError::Unsupported(other.to_string())),
        }
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sheet as read from the input.
///
/// A worksheet that cannot be read keeps its name and carries the error, so
/// the orchestrator can still report it.
#[derive(Debug)]
pub struct RawSheet {
    pub name: String,
    pub table: FormatResult<RawTable>,
}

/// Detection results for CSV input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvInfo {
    pub encoding: String,
    pub delimiter: char,
}

/// Reject inputs above the size ceiling.
pub fn check_size(size: usize, limit: usize) -> FormatResult<()> {
    if size > limit {
        return Err(FormatError::TooLarge { size, limit });
    }
    Ok(())
}

/// Read every sheet of an input.
///
/// `csv_sheet_name` names the single sheet of a CSV file.
pub fn read_sheets(
    bytes: &[u8],
    format: InputFormat,
    csv_sheet_name: Option<&str>,
) -> FormatResult<Vec<RawSheet>> {
    if bytes.is_empty() {
        return Err(FormatError::Empty);
    }
    match format {
        InputFormat::Csv => {
            let (table, _) = parse_csv_bytes(bytes)?;
            Ok(vec![RawSheet {
                name: csv_sheet_name.unwrap_or(DEFAULT_CSV_SHEET).to_string(),
                table: Ok(table),
            }])
        }
        InputFormat::Xlsx | InputFormat::Xls => excel::read_workbook(bytes),
    }
}

/// Read a file from disk, guessing the format from its extension.
pub fn read_path(path: impl AsRef<Path>) -> FormatResult<(InputFormat, Vec<RawSheet>)> {
    let path = path.as_ref();
    let format = InputFormat::from_path(path)?;
    let bytes = std::fs::read(path)?;
    let name = path.file_stem().and_then(|s| s.to_str());
    Ok((format, read_sheets(&bytes, format, name)?))
}

// =============================================================================
// CSV
// =============================================================================

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let charset = chardet::detect(bytes).0;

    match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        other => other.to_string(),
    }
}

/// Decode bytes with the given encoding.
///
/// Invalid UTF-8 falls back to Windows-1252, which maps every byte. Content
/// with NUL characters is binary, not text.
pub fn decode_content(bytes: &[u8], encoding: &str) -> FormatResult<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    let decoded = match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        },
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::ISO_8859_15.decode(bytes).0.into_owned(),
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        other => match encoding_rs::Encoding::for_label(other.as_bytes()) {
            Some(enc) => enc.decode(bytes).0.into_owned(),
            None => String::from_utf8_lossy(bytes).into_owned(),
        },
    };

    if decoded.contains('\0') {
        return Err(FormatError::Encoding(format!(
            "content decoded as {} contains binary data",
            encoding
        )));
    }
    Ok(decoded)
}

/// Detect the delimiter by counting occurrences in the first non-empty line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse decoded CSV text with an explicit delimiter.
pub fn parse_csv_str(content: &str, delimiter: char) -> FormatResult<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter as u8)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(Cell::from_raw).collect::<Vec<_>>());
    }

    let table = Table::from_rows(rows);
    if table.width() == 0 {
        return Err(FormatError::Empty);
    }
    Ok(table)
}

/// Parse CSV bytes with auto-detection of encoding and delimiter.
pub fn parse_csv_bytes(bytes: &[u8]) -> FormatResult<(RawTable, CsvInfo)> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding)?;
    let delimiter = detect_delimiter(&content);
    let table = parse_csv_str(&content, delimiter)?;
    Ok((table, CsvInfo { encoding, delimiter }))
}
