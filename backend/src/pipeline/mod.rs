//! Multi-sheet orchestration.
//!
//! ```text
//! bytes ──▶ parser ──▶ [sheet] ──▶ ladder level ──▶ profiler ──▶ SheetResult
//!                        │            │ fails                        │
//!                        │            └──▶ next level ... ──▶ failed │
//!                        └──────────────── one per sheet ────────────┴──▶ ProcessingReport
//! ```
//!
//! Every input sheet yields exactly one [`SheetResult`], whatever happens to
//! it. A sheet never sees another sheet's tables or audit log, so sheets can
//! be processed on independent workers ([`Pipeline::process_bytes_parallel`]).

pub mod ladder;
pub mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::audit::{elapsed_ms, AuditAction, AuditEntry, AuditLog, Stage};
use crate::cleaning::CleaningSummary;
use crate::config::PipelineConfig;
use crate::error::{PipelineResult, SheetFatal, StageError};
use crate::logs::{log_info, log_sheet, log_success, log_warning, LogEntry};
use crate::models::{CleanedTable, ColumnTypeInfo, LayoutDecision, RawTable};
use crate::parser::{self, InputFormat, RawSheet};
use crate::profiling::{DataProfiler, QualityReport};

pub use ladder::{FallbackLevel, LadderContext, StageHook};
pub use state::{SheetState, StateTrace};

// =============================================================================
// Options and results
// =============================================================================

/// Per-call options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOptions {
    pub format: InputFormat,
    /// Sheet name for CSV input (default `Sheet1`).
    pub sheet_name: Option<String>,
    /// Start the ladder at the chunked level and accept inputs above the
    /// size ceiling.
    pub chunked: bool,
}

impl ProcessOptions {
    pub fn new(format: InputFormat) -> Self {
        Self {
            format,
            sheet_name: None,
            chunked: false,
        }
    }

    pub fn chunked(mut self, chunked: bool) -> Self {
        self.chunked = chunked;
        self
    }

    pub fn sheet_name(mut self, name: impl Into<String>) -> Self {
        self.sheet_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetStatus {
    /// The first level tried succeeded.
    Success,
    /// A later level succeeded, or profiling could not run.
    Degraded,
    Failed,
}

/// Outcome of one sheet.
#[derive(Debug, Clone, Serialize)]
pub struct SheetResult {
    pub name: String,
    pub status: SheetStatus,
    /// Level that produced the cleaned table.
    pub fallback_level: Option<FallbackLevel>,
    pub states: StateTrace,
    pub table: Option<CleanedTable>,
    pub column_types: Vec<ColumnTypeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutDecision>,
    pub quality: Option<QualityReport>,
    pub cleaning: Option<CleaningSummary>,
    pub audit: AuditLog,
    /// One message per failed attempt.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Wall time from ingest to the final state.
    pub duration_ms: u64,
}

impl SheetResult {
    fn failed(name: &str, audit: AuditLog, states: StateTrace, errors: Vec<String>, started: Instant) -> Self {
        Self {
            name: name.to_string(),
            status: SheetStatus::Failed,
            fallback_level: None,
            states,
            table: None,
            column_types: Vec::new(),
            layout: None,
            quality: None,
            cleaning: None,
            audit,
            errors,
            duration_ms: elapsed_ms(started),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    /// Every sheet succeeded on its first level.
    Success,
    /// At least one sheet degraded or failed, but not all failed.
    Partial,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub sheets: usize,
    pub success: usize,
    pub degraded: usize,
    pub failed: usize,
}

/// File-level report.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingReport {
    pub processing_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub format: InputFormat,
    pub status: OverallStatus,
    pub summary: ReportSummary,
    /// Wall time of the whole run, parsing included.
    pub total_duration_ms: u64,
    pub sheets: Vec<SheetResult>,
}

/// Audit entry tagged with its sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetAuditEntry {
    pub sheet: String,
    #[serde(flatten)]
    pub entry: AuditEntry,
}

impl ProcessingReport {
    fn new(format: InputFormat, sheets: Vec<SheetResult>, started: Instant) -> Self {
        let mut summary = ReportSummary {
            sheets: sheets.len(),
            ..ReportSummary::default()
        };
        for sheet in &sheets {
            match sheet.status {
                SheetStatus::Success => summary.success += 1,
                SheetStatus::Degraded => summary.degraded += 1,
                SheetStatus::Failed => summary.failed += 1,
            }
        }

        let status = if summary.success == summary.sheets {
            OverallStatus::Success
        } else if summary.failed == summary.sheets {
            OverallStatus::Failed
        } else {
            OverallStatus::Partial
        };

        Self {
            processing_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            format,
            status,
            summary,
            total_duration_ms: elapsed_ms(started),
            sheets,
        }
    }

    /// Every sheet's log in one trail: sheet order, then entry order.
    pub fn merged_audit(&self) -> Vec<SheetAuditEntry> {
        self.sheets
            .iter()
            .flat_map(|sheet| {
                sheet.audit.entries().iter().map(move |entry| SheetAuditEntry {
                    sheet: sheet.name.clone(),
                    entry: entry.clone(),
                })
            })
            .collect()
    }

    pub fn sheet(&self, name: &str) -> Option<&SheetResult> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Runs sheets through the fallback ladder.
///
/// Cheap to clone: the configuration and hook are shared read-only.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    hook: Option<Arc<dyn StageHook>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
            hook: None,
        }
    }

    /// Install a hook called before every stage.
    pub fn with_hook(mut self, hook: Arc<dyn StageHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process every sheet of an input, one after another.
    pub fn process_bytes(&self, bytes: &[u8], options: &ProcessOptions) -> PipelineResult<ProcessingReport> {
        let started = Instant::now();
        let start = self.start_level(bytes.len(), options)?;
        let sheets = parser::read_sheets(bytes, options.format, options.sheet_name.as_deref())?;
        log_info(format!("📖 Read {} sheet(s) from {} input", sheets.len(), options.format));

        let results = sheets
            .into_iter()
            .map(|sheet| self.process_sheet(sheet, start))
            .collect();
        Ok(self.finish_report(options.format, results, started))
    }

    /// Process every sheet on its own blocking worker.
    ///
    /// Results keep the input sheet order. A worker that dies still yields a
    /// failed result for its sheet.
    pub async fn process_bytes_parallel(
        &self,
        bytes: &[u8],
        options: &ProcessOptions,
    ) -> PipelineResult<ProcessingReport> {
        let started = Instant::now();
        let start = self.start_level(bytes.len(), options)?;
        let sheets = parser::read_sheets(bytes, options.format, options.sheet_name.as_deref())?;
        log_info(format!(
            "📖 Read {} sheet(s) from {} input, processing in parallel",
            sheets.len(),
            options.format
        ));

        let mut names = Vec::with_capacity(sheets.len());
        let mut tasks = Vec::with_capacity(sheets.len());
        for sheet in sheets {
            names.push(sheet.name.clone());
            let pipeline = self.clone();
            tasks.push(tokio::task::spawn_blocking(move || pipeline.process_sheet(sheet, start)));
        }

        let joined = futures::future::join_all(tasks).await;
        let results = names
            .into_iter()
            .zip(joined)
            .map(|(name, joined)| match joined {
                Ok(result) => result,
                Err(err) => {
                    log_sheet(LogEntry::error(format!("worker failed: {}", err)), &name);
                    let errors = vec![format!("worker failed: {}", err)];
                    self.fail_sheet(&name, AuditLog::new(), StateTrace::new(), errors, started)
                }
            })
            .collect();
        Ok(self.finish_report(options.format, results, started))
    }

    /// Process one sheet as read by the parser.
    pub fn process_sheet(&self, sheet: RawSheet, start: FallbackLevel) -> SheetResult {
        let started = Instant::now();
        match sheet.table {
            Ok(table) => self.process_table(&sheet.name, &table, start),
            Err(err) => {
                let err = StageError::Unreadable(err.to_string());
                log_sheet(LogEntry::error(err.to_string()), &sheet.name);
                self.fail_sheet(&sheet.name, AuditLog::new(), StateTrace::new(), vec![err.to_string()], started)
            }
        }
    }

    /// Run one table through the ladder, starting at `start`, then profile it.
    pub fn process_table(&self, name: &str, raw: &RawTable, start: FallbackLevel) -> SheetResult {
        let started = Instant::now();
        let mut audit = AuditLog::new();
        audit.stage_completed(
            Stage::Ingest,
            format!("{} rows x {} columns", raw.height(), raw.width()),
            started,
        );
        let mut trace = StateTrace::new();
        let mut errors = Vec::new();

        let levels: Vec<FallbackLevel> = self
            .config
            .fallback_ladder
            .iter()
            .copied()
            .filter(|level| *level >= start)
            .collect();
        let ctx = LadderContext {
            config: &self.config,
            hook: self.hook.as_deref(),
            sheet: name,
        };

        for (attempt, level) in levels.iter().copied().enumerate() {
            log_sheet(LogEntry::info(format!("→ {} level", level)).with_indent(1), name);
            let outcome = ladder::guarded(Stage::Fallback, || ladder::run_level(level, &ctx, raw, &mut trace))
                .and_then(|result| result);

            match outcome {
                Ok(output) => {
                    let mut cleaned = output.cleaned;
                    audit.append(std::mem::take(&mut cleaned.audit));
                    if attempt > 0 {
                        audit.record(AuditEntry::new(
                            Stage::Fallback,
                            AuditAction::FallbackSucceeded,
                            format!("recovered at {} level after {} failed attempt(s)", level, attempt),
                        ));
                    }

                    let mut status = if attempt == 0 {
                        SheetStatus::Success
                    } else {
                        SheetStatus::Degraded
                    };

                    let profiling_started = Instant::now();
                    let quality = match self.profile(&ctx, level, &cleaned.table, &cleaned.types) {
                        Ok(quality) => {
                            for flag in &quality.flags {
                                audit.record(
                                    AuditEntry::new(Stage::Profiling, AuditAction::ProfilingPartial, flag.reason.clone())
                                        .column(flag.field.clone()),
                                );
                            }
                            audit.stage_completed(
                                Stage::Profiling,
                                format!("quality score {:.1}", quality.score),
                                profiling_started,
                            );
                            trace.advance(SheetState::Profiled);
                            trace.advance(SheetState::Done);
                            Some(quality)
                        }
                        Err(err) => {
                            log_sheet(LogEntry::warning(format!("profiling failed: {}", err)), name);
                            audit.record(AuditEntry::new(
                                Stage::Profiling,
                                AuditAction::ProfilingPartial,
                                format!("profiling failed: {}", err),
                            ));
                            errors.push(format!("profiling: {}", err));
                            trace.advance(SheetState::Degraded);
                            status = SheetStatus::Degraded;
                            None
                        }
                    };

                    match (&status, &quality) {
                        (SheetStatus::Success, Some(q)) => log_sheet(
                            LogEntry::success(format!("{} rows, quality {:.1}", cleaned.table.height(), q.score)),
                            name,
                        ),
                        _ => log_sheet(LogEntry::warning(format!("degraded, cleaned at {} level", level)), name),
                    }

                    return SheetResult {
                        name: name.to_string(),
                        status,
                        fallback_level: Some(level),
                        states: trace,
                        table: Some(cleaned.table),
                        column_types: cleaned.types,
                        layout: output.layout,
                        quality,
                        cleaning: Some(cleaned.summary),
                        audit,
                        errors,
                        duration_ms: elapsed_ms(started),
                    };
                }
                Err(err) => {
                    log_sheet(LogEntry::warning(format!("{} level failed: {}", level, err)).with_indent(1), name);
                    audit.record(AuditEntry::new(
                        Stage::Fallback,
                        AuditAction::FallbackEscalated,
                        format!("{} level failed: {}", level, err),
                    ));
                    errors.push(format!("{}: {}", level, err));
                    trace.advance(SheetState::Degraded);
                }
            }
        }

        if levels.is_empty() {
            errors.push(format!("no fallback level at or after {} is configured", start));
        }
        self.fail_sheet(name, audit, trace, errors, started)
    }

    fn profile(
        &self,
        ctx: &LadderContext<'_>,
        level: FallbackLevel,
        table: &CleanedTable,
        types: &[ColumnTypeInfo],
    ) -> Result<QualityReport, StageError> {
        ladder::guarded(Stage::Profiling, || -> Result<QualityReport, StageError> {
            ctx.hook
                .map_or(Ok(()), |hook| hook.before_stage(ctx.sheet, level, Stage::Profiling))?;
            Ok(DataProfiler::new(&self.config).profile(table, types))
        })?
    }

    fn fail_sheet(
        &self,
        name: &str,
        mut audit: AuditLog,
        mut trace: StateTrace,
        errors: Vec<String>,
        started: Instant,
    ) -> SheetResult {
        let fatal = SheetFatal {
            sheet: name.to_string(),
            attempts: errors.clone(),
        };
        log_sheet(LogEntry::error(fatal.to_string()), name);
        audit.record(AuditEntry::new(Stage::Fallback, AuditAction::SheetFailed, fatal.to_string()));
        trace.advance(SheetState::Failed);
        SheetResult::failed(name, audit, trace, errors, started)
    }

    /// First ladder level for an input of `size` bytes.
    fn start_level(&self, size: usize, options: &ProcessOptions) -> PipelineResult<FallbackLevel> {
        if options.chunked {
            if size > self.config.max_file_bytes {
                log_warning(format!(
                    "Input is {} bytes, above the {} byte ceiling; processing in chunks",
                    size, self.config.max_file_bytes
                ));
            }
            return Ok(FallbackLevel::Chunked);
        }
        parser::check_size(size, self.config.max_file_bytes)?;
        Ok(FallbackLevel::Full)
    }

    fn finish_report(&self, format: InputFormat, results: Vec<SheetResult>, started: Instant) -> ProcessingReport {
        let report = ProcessingReport::new(format, results, started);
        let s = &report.summary;
        if report.status == OverallStatus::Success {
            log_success(format!("✅ {} sheet(s) processed in {} ms", s.sheets, report.total_duration_ms));
        } else {
            log_warning(format!(
                "{} sheet(s): {} success, {} degraded, {} failed",
                s.sheets, s.success, s.degraded, s.failed
            ));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;
    use crate::logs::LOG_BROADCASTER;
    use crate::models::{Cell, Orientation, Table};
    use rust_xlsxwriter::Workbook;

    /// Fails (or panics at) one stage of one level for one sheet.
    struct Inject {
        sheet: &'static str,
        level: Option<FallbackLevel>,
        stage: Stage,
        panic: bool,
    }

    impl StageHook for Inject {
        fn before_stage(&self, sheet: &str, level: FallbackLevel, stage: Stage) -> Result<(), StageError> {
            let level_matches = self.level.map_or(true, |l| l == level);
            if sheet == self.sheet && level_matches && stage == self.stage {
                if self.panic {
                    panic!("injected panic");
                }
                return Err(StageError::Interrupted {
                    stage: stage.to_string(),
                    message: "injected failure".into(),
                });
            }
            Ok(())
        }
    }

    fn quiet_pipeline() -> Pipeline {
        LOG_BROADCASTER.set_echo(false);
        Pipeline::new(PipelineConfig::default())
    }

    fn workbook() -> Vec<u8> {
        let mut workbook = Workbook::new();
        for (name, base) in [("Q1", 100.0), ("Q2", 200.0)] {
            let sheet = workbook.add_worksheet();
            sheet.set_name(name).unwrap();
            for (col, header) in ["Item", "2022", "2023", "2024"].iter().enumerate() {
                sheet.write_string(0, col as u16, *header).unwrap();
            }
            for (row, item) in ["Cash", "Land", "Debt"].iter().enumerate() {
                let row = row as u32 + 1;
                sheet.write_string(row, 0, *item).unwrap();
                for col in 1..4u16 {
                    sheet.write_number(row, col, base + row as f64 * 10.0 + col as f64).unwrap();
                }
            }
        }
        workbook.save_to_buffer().unwrap()
    }

    fn balance_sheet() -> Table {
        Table::from_rows(
            [
                ["Item", "2022", "2023", "2024"],
                ["Assets", "", "", ""],
                ["Cash", "$1,234.56", "$2,000", "($500)"],
                ["Land", "$300", "$310", "$320"],
                ["", "", "", ""],
                ["Liabilities", "", "", ""],
                ["Debt", "($500)", "($450)", "$0"],
            ]
            .iter()
            .map(|r| r.iter().map(|v| Cell::from_raw(v)).collect())
            .collect(),
        )
    }

    #[test]
    fn test_two_sheets_give_two_results() {
        let report = quiet_pipeline()
            .process_bytes(&workbook(), &ProcessOptions::new(InputFormat::Xlsx))
            .unwrap();

        assert_eq!(report.sheets.len(), 2);
        assert_eq!(report.sheets[0].name, "Q1");
        assert_eq!(report.sheets[1].name, "Q2");
        assert_eq!(report.status, OverallStatus::Success);
        assert_eq!(report.summary.success, 2);
    }

    #[test]
    fn test_injected_cleaning_failure_degrades_one_sheet() {
        let hook = Inject {
            sheet: "Q2",
            level: Some(FallbackLevel::Full),
            stage: Stage::Cleaning,
            panic: false,
        };
        let report = quiet_pipeline()
            .with_hook(Arc::new(hook))
            .process_bytes(&workbook(), &ProcessOptions::new(InputFormat::Xlsx))
            .unwrap();

        let q1 = report.sheet("Q1").unwrap();
        let q2 = report.sheet("Q2").unwrap();
        assert_eq!(q1.status, SheetStatus::Success);
        assert_eq!(q1.fallback_level, Some(FallbackLevel::Full));
        assert_eq!(q2.status, SheetStatus::Degraded);
        assert_eq!(q2.fallback_level, Some(FallbackLevel::Chunked));
        assert_eq!(q2.errors.len(), 1);
        assert_eq!(q2.audit.count(AuditAction::FallbackEscalated), 1);
        assert_eq!(q2.audit.count(AuditAction::FallbackSucceeded), 1);
        assert!(q2.states.states().contains(&SheetState::Degraded));
        assert_eq!(q2.states.current(), SheetState::Done);
        assert_eq!(report.status, OverallStatus::Partial);
    }

    #[test]
    fn test_panicking_stage_is_contained() {
        let hook = Inject {
            sheet: "Q1",
            level: Some(FallbackLevel::Full),
            stage: Stage::TypeInference,
            panic: true,
        };
        let report = quiet_pipeline()
            .with_hook(Arc::new(hook))
            .process_bytes(&workbook(), &ProcessOptions::new(InputFormat::Xlsx))
            .unwrap();

        let q1 = report.sheet("Q1").unwrap();
        assert_eq!(q1.status, SheetStatus::Degraded);
        assert!(q1.errors[0].contains("panicked"));
        assert_eq!(report.sheet("Q2").unwrap().status, SheetStatus::Success);
    }

    #[test]
    fn test_exhausted_ladder_fails_sheet_only() {
        let hook = Inject {
            sheet: "Q1",
            level: None,
            stage: Stage::Cleaning,
            panic: false,
        };
        let report = quiet_pipeline()
            .with_hook(Arc::new(hook))
            .process_bytes(&workbook(), &ProcessOptions::new(InputFormat::Xlsx))
            .unwrap();

        assert_eq!(report.sheets.len(), 2);
        let q1 = report.sheet("Q1").unwrap();
        assert_eq!(q1.status, SheetStatus::Failed);
        assert!(q1.table.is_none());
        assert_eq!(q1.errors.len(), 4);
        assert_eq!(q1.audit.count(AuditAction::SheetFailed), 1);
        assert_eq!(q1.states.current(), SheetState::Failed);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.status, OverallStatus::Partial);
    }

    #[test]
    fn test_profiling_failure_keeps_cleaned_table() {
        let hook = Inject {
            sheet: "Sheet1",
            level: None,
            stage: Stage::Profiling,
            panic: false,
        };
        let pipeline = quiet_pipeline().with_hook(Arc::new(hook));
        let result = pipeline.process_table("Sheet1", &balance_sheet(), FallbackLevel::Full);

        assert_eq!(result.status, SheetStatus::Degraded);
        assert_eq!(result.fallback_level, Some(FallbackLevel::Full));
        assert!(result.table.is_some());
        assert!(result.quality.is_none());
        assert_eq!(result.audit.count(AuditAction::ProfilingPartial), 1);
    }

    #[test]
    fn test_wide_sheet_is_melted_and_scored() {
        let result = quiet_pipeline().process_table("Balance", &balance_sheet(), FallbackLevel::Full);

        assert_eq!(result.status, SheetStatus::Success);
        let table = result.table.as_ref().unwrap();
        assert_eq!(table.headers, vec!["Item", "Period", "Value"]);
        assert_eq!(table.height(), 3 * 3);
        assert_eq!(result.cleaning.as_ref().unwrap().melted_from_rows, Some(3));

        let quality = result.quality.as_ref().unwrap();
        assert!((0.0..=100.0).contains(&quality.score));
        assert!((0.0..=1.0).contains(&quality.completeness));

        for stage in [Stage::Ingest, Stage::TypeInference, Stage::Layout, Stage::Cleaning, Stage::Profiling] {
            assert!(result.audit.completed(stage), "missing marker for {}", stage);
        }
        let removed = result
            .audit
            .entries()
            .iter()
            .find(|e| e.action == AuditAction::SectionHeaderRemoved)
            .unwrap();
        assert_eq!(removed.after.as_deref(), Some("Assets"));
    }

    #[test]
    fn test_melted_sheet_is_not_melted_again() {
        let pipeline = quiet_pipeline();
        let first = pipeline.process_table("Balance", &balance_sheet(), FallbackLevel::Full);
        let melted = first.table.as_ref().unwrap();

        let second = pipeline.process_table("Balance", melted, FallbackLevel::Full);
        assert_eq!(second.status, SheetStatus::Success);
        let layout = second.layout.as_ref().unwrap();
        assert_eq!(layout.orientation, Orientation::Long);
        assert!(layout.plan.is_none());
        assert_eq!(second.table.as_ref(), Some(melted));
        assert_eq!(second.cleaning.as_ref().unwrap().melted_from_rows, None);
        assert_eq!(second.audit.count(AuditAction::LayoutNormalized), 0);
    }

    #[test]
    fn test_size_ceiling() {
        let config = PipelineConfig {
            max_file_bytes: 8,
            ..PipelineConfig::default()
        };
        LOG_BROADCASTER.set_echo(false);
        let pipeline = Pipeline::new(config);
        let csv = b"Name,Units\na,1\nb,2\n";

        let err = pipeline
            .process_bytes(csv, &ProcessOptions::new(InputFormat::Csv))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::PipelineError::Format(FormatError::TooLarge { limit: 8, .. })
        ));

        let report = pipeline
            .process_bytes(csv, &ProcessOptions::new(InputFormat::Csv).chunked(true))
            .unwrap();
        let sheet = &report.sheets[0];
        assert_eq!(sheet.name, "Sheet1");
        assert_eq!(sheet.status, SheetStatus::Success);
        assert_eq!(sheet.fallback_level, Some(FallbackLevel::Chunked));
    }

    #[test]
    fn test_unreadable_sheet_is_reported() {
        let sheet = RawSheet {
            name: "Broken".into(),
            table: Err(FormatError::Excel("corrupt part".into())),
        };
        let result = quiet_pipeline().process_sheet(sheet, FallbackLevel::Full);

        assert_eq!(result.status, SheetStatus::Failed);
        assert!(result.errors[0].contains("corrupt part"));
        assert_eq!(result.states.states(), &[SheetState::Start, SheetState::Failed]);
    }

    #[test]
    fn test_merged_audit_and_json() {
        let report = quiet_pipeline()
            .process_bytes(&workbook(), &ProcessOptions::new(InputFormat::Xlsx))
            .unwrap();

        let merged = report.merged_audit();
        let total: usize = report.sheets.iter().map(|s| s.audit.len()).sum();
        assert_eq!(merged.len(), total);
        assert_eq!(merged[0].sheet, "Q1");
        assert_eq!(merged.last().unwrap().sheet, "Q2");

        let json = report.to_json().unwrap();
        assert!(json.contains("processing_id"));
        assert!(json.contains("\"status\": \"success\""));
    }

    #[test]
    fn test_report_carries_durations() {
        let report = quiet_pipeline()
            .process_bytes(&workbook(), &ProcessOptions::new(InputFormat::Xlsx))
            .unwrap();

        let sheet_total: u64 = report.sheets.iter().map(|s| s.duration_ms).sum();
        assert!(report.total_duration_ms >= sheet_total);
        for sheet in &report.sheets {
            for stage in [Stage::Ingest, Stage::TypeInference, Stage::Layout, Stage::Cleaning, Stage::Profiling] {
                assert!(sheet.audit.stage_duration_ms(stage).is_some(), "{} not timed", stage);
            }
        }

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert!(json["total_duration_ms"].as_u64().is_some());
        assert!(json["sheets"][0]["duration_ms"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let hook = Inject {
            sheet: "Q2",
            level: Some(FallbackLevel::Full),
            stage: Stage::Cleaning,
            panic: false,
        };
        let pipeline = quiet_pipeline().with_hook(Arc::new(hook));
        let options = ProcessOptions::new(InputFormat::Xlsx);

        let parallel = pipeline.process_bytes_parallel(&workbook(), &options).await.unwrap();
        let sequential = pipeline.process_bytes(&workbook(), &options).unwrap();

        let statuses = |r: &ProcessingReport| r.sheets.iter().map(|s| (s.name.clone(), s.status)).collect::<Vec<_>>();
        assert_eq!(statuses(&parallel), statuses(&sequential));
        assert_eq!(parallel.sheets[0].table, sequential.sheets[0].table);
    }
}
