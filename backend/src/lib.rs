//! # Sheetclean - type-aware cleaning and profiling of messy spreadsheets
//!
//! Sheetclean takes financial and business spreadsheets (CSV, XLSX, XLS) of
//! unknown shape and produces cleaned, typed tables, a quality report per
//! sheet and an audit trail of every change.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐
//! │ CSV / XLSX  │──▶│   Parser   │──▶│  Inference │──▶│   Layout   │──▶│  Cleaning  │
//! │   (bytes)   │   │ (per sheet)│   │  (types)   │   │ (wide→long)│   │  (+audit)  │
//! └─────────────┘   └────────────┘   └────────────┘   └────────────┘   └─────┬──────┘
//!                                                                            ▼
//!                   ┌────────────┐   ┌────────────────┐               ┌────────────┐
//!                   │   Export   │◀──│ProcessingReport│◀──────────────│ Profiling  │
//!                   │   (xlsx)   │   │  (all sheets)  │               │  (score)   │
//!                   └────────────┘   └────────────────┘               └────────────┘
//! ```
//!
//! Each sheet runs through a fallback ladder (full → chunked → per-column →
//! minimal); a sheet that exhausts it is reported as failed without affecting
//! the others.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sheetclean::{InputFormat, Pipeline, PipelineConfig, ProcessOptions};
//!
//! let bytes = std::fs::read("balance.xlsx")?;
//! let pipeline = Pipeline::new(PipelineConfig::default());
//! let report = pipeline.process_bytes(&bytes, &ProcessOptions::new(InputFormat::Xlsx))?;
//! for sheet in &report.sheets {
//!     println!("{}: {:?}", sheet.name, sheet.status);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Layered error types
//! - [`config`] - Pipeline configuration
//! - [`logs`] - Operational log stream
//! - [`models`] - Cells, tables, semantic types, layout decisions
//! - [`parser`] - CSV and workbook ingestion
//! - [`inference`] - Semantic type inference
//! - [`layout`] - Wide/long detection and melting
//! - [`cleaning`] - Type-aware cleaning rules
//! - [`profiling`] - Statistics and quality score
//! - [`audit`] - Per-sheet audit trail
//! - [`pipeline`] - Orchestration and fallback ladder
//! - [`export`] - Cleaned workbook output

// Core modules
pub mod config;
pub mod error;
pub mod logs;
pub mod models;

// Ingestion
pub mod parser;

// Processing stages
pub mod audit;
pub mod cleaning;
pub mod inference;
pub mod layout;
pub mod profiling;

// Orchestration
pub mod pipeline;

// Output
pub mod export;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    CellError, ConfigError, ExportError, FormatError, PipelineError, PipelineResult, ProfilingError,
    SheetFatal, StageError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    Cell, CleanedTable, ColumnTypeInfo, LayoutDecision, NormalizationPlan, Orientation, RawTable,
    SemanticType, Table,
};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{PipelineConfig, QualityWeights};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::{read_path, read_sheets, InputFormat, RawSheet};

// =============================================================================
// Re-exports - Stages
// =============================================================================

pub use audit::{AuditAction, AuditEntry, AuditLog, Stage};
pub use cleaning::{CleaningOutput, CleaningSummary, DataCleaner};
pub use inference::TypeInferencer;
pub use layout::LayoutDetector;
pub use profiling::{DataProfiler, QualityReport};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use pipeline::{
    FallbackLevel, OverallStatus, Pipeline, ProcessOptions, ProcessingReport, SheetResult, SheetState,
    SheetStatus, StageHook,
};

// =============================================================================
// Re-exports - Export
// =============================================================================

pub use export::{ExportOutcome, SheetExporter};
