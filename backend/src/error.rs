//! Error types for the sheetclean processing pipeline.
//!
//! Errors are layered by how far they are allowed to travel:
//!
//! - [`CellError`] - a single cell could not be cleaned (absorbed, cell marked missing)
//! - [`ProfilingError`] - a statistic could not be computed (absorbed, report flagged)
//! - [`StageError`] - one fallback level failed for a sheet (triggers the next level)
//! - [`SheetFatal`] - every fallback level failed (sheet marked `failed`)
//! - [`FormatError`] - the input file itself is unreadable
//! - [`ConfigError`] - configuration could not be loaded or is inconsistent
//! - [`ExportError`] - a cleaned sheet could not be written
//! - [`PipelineError`] - top-level errors returned to callers
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

use crate::models::SemanticType;

// =============================================================================
// Format Errors
// =============================================================================

/// Errors while reading raw file bytes into tables.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode text content.
    #[error("Failed to decode content: {0}")]
    Encoding(String),

    /// Malformed CSV.
    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    /// Workbook could not be opened or a sheet could not be read.
    #[error("Invalid workbook: {0}")]
    Excel(String),

    /// No rows at all.
    #[error("Input is empty")]
    Empty,

    /// Unknown or unsupported declared format.
    #[error("Unsupported format: {0}")]
    Unsupported(String),

    /// Input exceeds the configured size ceiling.
    #[error("Input is {size} bytes, above the {limit} byte ceiling")]
    TooLarge { size: usize, limit: usize },
}

impl From<calamine::Error> for FormatError {
    fn from(err: calamine::Error) -> Self {
        FormatError::Excel(err.to_string())
    }
}

// =============================================================================
// Cell-level cleaning errors
// =============================================================================

/// A single value that could not be converted to its column's type.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Cannot read '{value}' as {expected}: {reason}")]
pub struct CellError {
    pub value: String,
    pub expected: SemanticType,
    pub reason: String,
}

impl CellError {
    pub fn new(value: impl Into<String>, expected: SemanticType, reason: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expected,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Profiling errors
// =============================================================================

/// Errors while computing statistics. Never propagated past the profiler.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProfilingError {
    /// A statistic overflowed to infinity or NaN.
    #[error("Non-finite statistic in column '{column}'")]
    NonFinite { column: String },

    /// Too few observations for the requested statistic.
    #[error("Not enough data for {what}: need {needed}, have {have}")]
    InsufficientData {
        what: String,
        needed: usize,
        have: usize,
    },
}

// =============================================================================
// Sheet-level errors
// =============================================================================

/// Failure of one fallback level for one sheet.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    /// Table is too large for this level.
    #[error("Table has {cells} cells, above the {limit} cell limit for this level")]
    TooLarge { cells: usize, limit: usize },

    /// A stage hook refused to let the stage run.
    #[error("Stage '{stage}' interrupted: {message}")]
    Interrupted { stage: String, message: String },

    /// A stage panicked; the panic was caught at the sheet boundary.
    #[error("Stage '{stage}' panicked: {message}")]
    Panicked { stage: String, message: String },

    /// Layout normalization could not be applied.
    #[error("Layout error: {0}")]
    Layout(String),

    /// Sheet could not be read from the workbook.
    #[error("Unreadable sheet: {0}")]
    Unreadable(String),
}

/// Every fallback level failed for a sheet.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("All {} fallback levels failed for sheet '{sheet}'", attempts.len())]
pub struct SheetFatal {
    pub sheet: String,
    pub attempts: Vec<String>,
}

// =============================================================================
// Configuration errors
// =============================================================================

/// Errors while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error.
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Config JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config value out of range or inconsistent.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

// =============================================================================
// Export errors
// =============================================================================

/// Errors while writing the output workbook.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Writer error.
    #[error("Workbook write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    /// Sheet has no cleaned table to write.
    #[error("Sheet '{0}' has no cleaned table")]
    NoTable(String),

    /// Table does not fit in a worksheet.
    #[error("Sheet '{sheet}' has {rows} rows x {columns} columns, above worksheet limits")]
    TooLarge {
        sheet: String,
        rows: usize,
        columns: usize,
    },

    /// IO error.
    #[error("Export IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level errors.
///
/// Only file-level problems surface here; anything at sheet level or below is
/// recorded in the report instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input could not be read.
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Export error.
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for ingestion.
pub type FormatResult<T> = Result<T, FormatError>;

/// Result type for a single fallback level.
pub type StageResult<T> = Result<T, StageError>;

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for export.
pub type ExportResult<T> = Result<T, ExportError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let format_err = FormatError::Empty;
        let pipeline_err: PipelineError = format_err.into();
        assert!(pipeline_err.to_string().contains("empty"));

        let config_err = ConfigError::Invalid("chunk_size must be > 0".into());
        let pipeline_err: PipelineError = config_err.into();
        assert!(pipeline_err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_cell_error_format() {
        let err = CellError::new("abc", SemanticType::Currency, "not a number");
        let msg = err.to_string();
        assert!(msg.contains("'abc'"));
        assert!(msg.contains("currency"));
        assert!(msg.contains("not a number"));
    }

    #[test]
    fn test_sheet_fatal_counts_attempts() {
        let err = SheetFatal {
            sheet: "Q1".into(),
            attempts: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(err.to_string(), "All 3 fallback levels failed for sheet 'Q1'");
    }

    #[test]
    fn test_too_large_message() {
        let err = FormatError::TooLarge { size: 10, limit: 5 };
        assert!(err.to_string().contains("10 bytes"));
    }
}
