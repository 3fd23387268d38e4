//! Fallback ladder.
//!
//! Each [`FallbackLevel`] is one strategy for turning a raw sheet into a
//! cleaned table. The orchestrator tries them in the configured order and
//! stops at the first that succeeds:
//!
//! 1. **full** - inference, layout normalization and cleaning on the whole table
//! 2. **chunked** - same, but rows are cleaned in bounded batches
//! 3. **per_column** - every column inferred and cleaned on its own; no layout
//!    normalization, no section header removal
//! 4. **minimal** - blank row removal and best-effort numeric coercion only
//!
//! A level runs on its own scratch audit log; the orchestrator keeps it only
//! if the level succeeds. Panics inside a stage are caught and reported as
//! [`StageError::Panicked`].

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use crate::audit::{AuditAction, AuditEntry, AuditLog, Stage};
use crate::cleaning::{rules, CleaningOutput, CleaningSummary, DataCleaner};
use crate::config::PipelineConfig;
use crate::error::{StageError, StageResult};
use crate::inference::TypeInferencer;
use crate::layout::LayoutDetector;
use crate::models::{Cell, ColumnTypeInfo, LayoutDecision, Orientation, RawTable, SemanticType, Table};
use crate::pipeline::state::{SheetState, StateTrace};

/// Share of non-blank values that must parse as numbers for the minimal
/// level to coerce a column.
const MINIMAL_NUMERIC_SHARE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackLevel {
    Full,
    Chunked,
    PerColumn,
    Minimal,
}

impl FallbackLevel {
    pub const ALL: [FallbackLevel; 4] = [
        FallbackLevel::Full,
        FallbackLevel::Chunked,
        FallbackLevel::PerColumn,
        FallbackLevel::Minimal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackLevel::Full => "full",
            FallbackLevel::Chunked => "chunked",
            FallbackLevel::PerColumn => "per_column",
            FallbackLevel::Minimal => "minimal",
        }
    }
}

impl std::fmt::Display for FallbackLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called before every stage of every level.
///
/// Returning an error fails the current level as if the stage had failed.
/// Used for fault injection and for cooperative cancellation.
pub trait StageHook: Send + Sync {
    fn before_stage(&self, sheet: &str, level: FallbackLevel, stage: Stage) -> StageResult<()>;

    /// Called before each column is cleaned at the per-column level. An
    /// error or panic degrades that column only.
    fn before_column(&self, _sheet: &str, _column: &str) -> StageResult<()> {
        Ok(())
    }
}

/// What a successful level produced.
#[derive(Debug, Clone)]
pub struct LevelOutput {
    pub cleaned: CleaningOutput,
    /// `None` when the level skipped layout detection.
    pub layout: Option<LayoutDecision>,
}

/// Everything a level needs besides the table.
pub struct LadderContext<'a> {
    pub config: &'a PipelineConfig,
    pub hook: Option<&'a dyn StageHook>,
    pub sheet: &'a str,
}

impl<'a> LadderContext<'a> {
    fn enter(&self, level: FallbackLevel, stage: Stage) -> StageResult<()> {
        match self.hook {
            Some(hook) => hook.before_stage(self.sheet, level, stage),
            None => Ok(()),
        }
    }

    fn enter_column(&self, column: &str) -> StageResult<()> {
        match self.hook {
            Some(hook) => hook.before_column(self.sheet, column),
            None => Ok(()),
        }
    }
}

/// Run one level on a raw table.
pub fn run_level(
    level: FallbackLevel,
    ctx: &LadderContext<'_>,
    raw: &RawTable,
    trace: &mut StateTrace,
) -> StageResult<LevelOutput> {
    match level {
        FallbackLevel::Full => run_whole_table(level, ctx, raw, trace),
        FallbackLevel::Chunked => run_whole_table(level, ctx, raw, trace),
        FallbackLevel::PerColumn => run_per_column(ctx, raw, trace),
        FallbackLevel::Minimal => run_minimal(ctx, raw, trace),
    }
}

/// Run a stage, turning a panic into a [`StageError`].
pub fn guarded<T>(stage: Stage, f: impl FnOnce() -> T) -> StageResult<T> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| StageError::Panicked {
        stage: stage.to_string(),
        message: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Full and chunked
// =============================================================================

fn run_whole_table(
    level: FallbackLevel,
    ctx: &LadderContext<'_>,
    raw: &RawTable,
    trace: &mut StateTrace,
) -> StageResult<LevelOutput> {
    let config = ctx.config;
    if level == FallbackLevel::Full && raw.cell_count() > config.full_pipeline_max_cells {
        return Err(StageError::TooLarge {
            cells: raw.cell_count(),
            limit: config.full_pipeline_max_cells,
        });
    }

    let mut audit = AuditLog::new();

    ctx.enter(level, Stage::TypeInference)?;
    let started = Instant::now();
    let types = guarded(Stage::TypeInference, || TypeInferencer::new(config).infer(raw))?;
    record_types(&mut audit, &types, started);
    trace.advance(SheetState::TypeInferred);

    ctx.enter(level, Stage::Layout)?;
    let started = Instant::now();
    let layout = guarded(Stage::Layout, || LayoutDetector::new(config).detect(raw, &types))?;
    audit.stage_completed(Stage::Layout, describe_layout(&layout), started);
    trace.advance(SheetState::LayoutResolved);

    ctx.enter(level, Stage::Cleaning)?;
    let started = Instant::now();
    let cleaner = DataCleaner::new(config);
    let plan = layout.plan.as_ref();
    let cleaned = match level {
        FallbackLevel::Chunked => guarded(Stage::Cleaning, || {
            let mut summary = CleaningSummary::default();
            let mut rows = Vec::with_capacity(raw.height());
            let mut start = 0;
            while start < raw.height() {
                let end = (start + config.chunk_size.max(1)).min(raw.height());
                let batch = raw.slice_rows(start, end);
                let cleaned = cleaner.clean_batch(&batch, &types, start, &mut audit, &mut summary);
                rows.extend(cleaned.rows);
                start = end;
            }
            let table = Table::new(raw.headers.clone(), rows);
            cleaner.finish(table, &types, plan, std::mem::take(&mut audit), summary, started)
        })??,
        _ => {
            let mut cleaned = guarded(Stage::Cleaning, || cleaner.clean(raw, &types, plan))??;
            let mut merged = audit;
            merged.append(std::mem::take(&mut cleaned.audit));
            cleaned.audit = merged;
            cleaned
        }
    };
    trace.advance(SheetState::Cleaned);

    Ok(LevelOutput {
        cleaned,
        layout: Some(layout),
    })
}

fn record_types(audit: &mut AuditLog, types: &[ColumnTypeInfo], started: Instant) {
    for info in types {
        let action = if info.ambiguous {
            AuditAction::TypeAmbiguous
        } else {
            AuditAction::TypeAssigned
        };
        audit.record(
            AuditEntry::new(
                Stage::TypeInference,
                action,
                format!(
                    "{} (confidence {:.2}): {}",
                    info.semantic_type, info.confidence, info.reasoning
                ),
            )
            .column(info.name.clone()),
        );
    }
    audit.stage_completed(
        Stage::TypeInference,
        format!("{} columns typed", types.len()),
        started,
    );
}

fn describe_layout(layout: &LayoutDecision) -> String {
    match (layout.orientation, &layout.plan) {
        (Orientation::Wide, Some(plan)) => format!(
            "wide: {} period columns{}",
            plan.value_columns.len(),
            if layout.sequential { " (sequential)" } else { "" }
        ),
        (Orientation::Wide, None) => "wide, no normalization".to_string(),
        (Orientation::Long, _) => "long".to_string(),
    }
}

// =============================================================================
// Per column
// =============================================================================

fn run_per_column(
    ctx: &LadderContext<'_>,
    raw: &RawTable,
    trace: &mut StateTrace,
) -> StageResult<LevelOutput> {
    let level = FallbackLevel::PerColumn;
    let config = ctx.config;
    let mut audit = AuditLog::new();

    ctx.enter(level, Stage::TypeInference)?;
    let started = Instant::now();
    let inferencer = TypeInferencer::new(config);
    let mut types = Vec::with_capacity(raw.width());
    for (index, name) in raw.headers.iter().enumerate() {
        let info = guarded(Stage::TypeInference, || {
            inferencer.infer_column(index, name, raw.column(index))
        })
        .unwrap_or_else(|err| {
            ColumnTypeInfo::fixed(index, name.clone(), SemanticType::Text, format!("inference failed: {}", err))
        });
        types.push(info);
    }
    record_types(&mut audit, &types, started);
    trace.advance(SheetState::TypeInferred);

    ctx.enter(level, Stage::Cleaning)?;
    let started = Instant::now();
    let cleaner = DataCleaner::new(config);
    let mut summary = CleaningSummary {
        rows_in: raw.height(),
        ..CleaningSummary::default()
    };
    let row_ids: Vec<usize> = (0..raw.height()).collect();
    let mut rows = raw.rows.clone();

    for info in types.iter_mut() {
        let mut column_audit = AuditLog::new();
        let mut column_summary = CleaningSummary::default();
        let result = guarded(Stage::Cleaning, || -> StageResult<Vec<Cell>> {
            ctx.enter_column(&info.name)?;
            Ok(cleaner.clean_column(raw, info, &row_ids, &mut column_audit, &mut column_summary))
        })
        .and_then(|column| column);

        let column = match result {
            Ok(column) => {
                audit.append(column_audit);
                merge_counts(&mut summary, column_summary);
                column
            }
            Err(err) => {
                audit.record(
                    AuditEntry::new(
                        Stage::Cleaning,
                        AuditAction::ColumnDegraded,
                        format!("{} cleaning failed ({}), kept as text", info.semantic_type, err),
                    )
                    .column(info.name.clone()),
                );
                summary.degraded_columns.push(info.name.clone());
                *info = ColumnTypeInfo::fixed(info.index, info.name.clone(), SemanticType::Text, "degraded to text");
                raw.column(info.index)
                    .map(|c| match c {
                        Cell::Text(s) => rules::clean_text(s).map_or(Cell::Empty, Cell::Text),
                        other => other.clone(),
                    })
                    .collect()
            }
        };

        for (row, cell) in rows.iter_mut().zip(column) {
            row[info.index] = cell;
        }
    }

    let converted = Table::new(raw.headers.clone(), rows);
    let table = cleaner.remove_rows(&converted, &types, &row_ids, false, &mut audit, &mut summary);
    let cleaned = cleaner.finish(table, &types, None, audit, summary, started)?;
    trace.advance(SheetState::Cleaned);

    Ok(LevelOutput { cleaned, layout: None })
}

fn merge_counts(into: &mut CleaningSummary, from: CleaningSummary) {
    for (column, n) in from.converted {
        *into.converted.entry(column).or_default() += n;
    }
    for (column, n) in from.marked_missing {
        *into.marked_missing.entry(column).or_default() += n;
    }
    for (column, n) in from.stored_percentages {
        *into.stored_percentages.entry(column).or_default() += n;
    }
}

// =============================================================================
// Minimal
// =============================================================================

fn run_minimal(
    ctx: &LadderContext<'_>,
    raw: &RawTable,
    trace: &mut StateTrace,
) -> StageResult<LevelOutput> {
    ctx.enter(FallbackLevel::Minimal, Stage::Cleaning)?;
    let started = Instant::now();
    let cleaner = DataCleaner::new(ctx.config);

    let types: Vec<ColumnTypeInfo> = raw
        .headers
        .iter()
        .enumerate()
        .map(|(index, name)| minimal_type(index, name, raw))
        .collect();

    let mut audit = AuditLog::new();
    let mut summary = CleaningSummary {
        rows_in: raw.height(),
        ..CleaningSummary::default()
    };
    let row_ids: Vec<usize> = (0..raw.height()).collect();
    let mut rows = raw.rows.clone();

    for info in types.iter().filter(|t| t.semantic_type == SemanticType::Numeric) {
        let column = cleaner.clean_column(raw, info, &row_ids, &mut audit, &mut summary);
        for (row, cell) in rows.iter_mut().zip(column) {
            row[info.index] = cell;
        }
    }

    let converted = Table::new(raw.headers.clone(), rows);
    let table = cleaner.remove_rows(&converted, &types, &row_ids, false, &mut audit, &mut summary);
    let cleaned = cleaner.finish(table, &types, None, audit, summary, started)?;
    trace.advance(SheetState::Cleaned);

    Ok(LevelOutput { cleaned, layout: None })
}

/// Numeric when most non-blank values parse as numbers, text otherwise.
fn minimal_type(index: usize, name: &str, raw: &RawTable) -> ColumnTypeInfo {
    let non_blank: Vec<&Cell> = raw.column(index).filter(|c| !c.is_blank()).collect();
    let numeric = non_blank
        .iter()
        .filter(|c| match c {
            Cell::Number(_) => true,
            Cell::Text(s) => rules::parse_currency(s).is_some(),
            _ => false,
        })
        .count();

    let share = if non_blank.is_empty() {
        0.0
    } else {
        numeric as f64 / non_blank.len() as f64
    };

    if share >= MINIMAL_NUMERIC_SHARE {
        let mut info = ColumnTypeInfo::fixed(
            index,
            name,
            SemanticType::Numeric,
            format!("minimal cleaning: {:.0}% numeric", share * 100.0),
        );
        info.confidence = share;
        info
    } else {
        let mut info = ColumnTypeInfo::fixed(index, name, SemanticType::Text, "minimal cleaning: kept as is");
        info.confidence = 0.0;
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[&[&str]]) -> Table {
        Table::from_rows(
            rows.iter()
                .map(|r| r.iter().map(|v| Cell::from_raw(v)).collect())
                .collect(),
        )
    }

    fn wide() -> Table {
        table(&[
            &["Item", "2022", "2023", "2024"],
            &["Assets", "", "", ""],
            &["Cash", "$1,234.56", "$2,000", "($500)"],
            &["", "", "", ""],
            &["Land", "$300", "$310", "$320"],
        ])
    }

    struct FailAt(FallbackLevel, Stage);

    impl StageHook for FailAt {
        fn before_stage(&self, _sheet: &str, level: FallbackLevel, stage: Stage) -> StageResult<()> {
            if level == self.0 && stage == self.1 {
                return Err(StageError::Interrupted {
                    stage: stage.to_string(),
                    message: "injected".into(),
                });
            }
            Ok(())
        }
    }

    /// Panics while one column is cleaned.
    struct PanicOnColumn(&'static str);

    impl StageHook for PanicOnColumn {
        fn before_stage(&self, _sheet: &str, _level: FallbackLevel, _stage: Stage) -> StageResult<()> {
            Ok(())
        }

        fn before_column(&self, _sheet: &str, column: &str) -> StageResult<()> {
            if column == self.0 {
                panic!("column cleaner crashed");
            }
            Ok(())
        }
    }

    fn ctx<'a>(config: &'a PipelineConfig, hook: Option<&'a dyn StageHook>) -> LadderContext<'a> {
        LadderContext { config, hook, sheet: "test" }
    }

    #[test]
    fn test_full_level_melts_wide_table() {
        let config = PipelineConfig::default();
        let mut trace = StateTrace::new();
        let out = run_level(FallbackLevel::Full, &ctx(&config, None), &wide(), &mut trace).unwrap();

        assert_eq!(out.cleaned.table.headers, vec!["Item", "Period", "Value"]);
        assert_eq!(out.cleaned.table.height(), 6);
        assert!(out.cleaned.audit.completed(Stage::TypeInference));
        assert!(out.cleaned.audit.completed(Stage::Layout));
        assert!(out.cleaned.audit.completed(Stage::Cleaning));
        assert_eq!(trace.current(), SheetState::Cleaned);
    }

    #[test]
    fn test_chunked_matches_full() {
        let config = PipelineConfig {
            chunk_size: 1,
            ..PipelineConfig::default()
        };
        let full = run_level(FallbackLevel::Full, &ctx(&config, None), &wide(), &mut StateTrace::new()).unwrap();
        let chunked =
            run_level(FallbackLevel::Chunked, &ctx(&config, None), &wide(), &mut StateTrace::new()).unwrap();

        assert_eq!(chunked.cleaned.table, full.cleaned.table);
        assert_eq!(chunked.cleaned.summary.section_headers_removed, 1);
        assert_eq!(chunked.cleaned.summary.blank_rows_removed, 1);
        let blank = chunked
            .cleaned
            .audit
            .entries()
            .iter()
            .find(|e| e.action == AuditAction::BlankRowRemoved)
            .unwrap();
        assert_eq!(blank.rows, vec![2]);
    }

    #[test]
    fn test_full_level_refuses_large_tables() {
        let config = PipelineConfig {
            full_pipeline_max_cells: 4,
            ..PipelineConfig::default()
        };
        let err = run_level(FallbackLevel::Full, &ctx(&config, None), &wide(), &mut StateTrace::new())
            .unwrap_err();
        assert!(matches!(err, StageError::TooLarge { cells: 16, limit: 4 }));
    }

    #[test]
    fn test_hook_failure_fails_level() {
        let config = PipelineConfig::default();
        let hook = FailAt(FallbackLevel::Full, Stage::Cleaning);
        let mut trace = StateTrace::new();
        let err = run_level(FallbackLevel::Full, &ctx(&config, Some(&hook)), &wide(), &mut trace).unwrap_err();

        assert!(matches!(err, StageError::Interrupted { .. }));
        assert_eq!(trace.current(), SheetState::LayoutResolved);
    }

    #[test]
    fn test_per_column_keeps_wide_shape_and_section_rows() {
        let config = PipelineConfig::default();
        let out = run_level(FallbackLevel::PerColumn, &ctx(&config, None), &wide(), &mut StateTrace::new())
            .unwrap();

        assert_eq!(out.cleaned.table.headers, vec!["Item", "2022", "2023", "2024"]);
        assert_eq!(out.cleaned.table.height(), 3);
        assert_eq!(out.cleaned.table.rows[1][1], Cell::Number(1234.56));
        assert!(out.layout.is_none());
    }

    #[test]
    fn test_per_column_degrades_only_the_failing_column() {
        let config = PipelineConfig::default();
        let hook = PanicOnColumn("2023");
        let out = run_level(FallbackLevel::PerColumn, &ctx(&config, Some(&hook)), &wide(), &mut StateTrace::new())
            .unwrap();
        let cleaned = &out.cleaned;

        assert_eq!(cleaned.summary.degraded_columns, vec!["2023"]);
        assert_eq!(cleaned.audit.count(AuditAction::ColumnDegraded), 1);
        let degraded = cleaned
            .audit
            .entries()
            .iter()
            .find(|e| e.action == AuditAction::ColumnDegraded)
            .unwrap();
        assert_eq!(degraded.columns, vec!["2023"]);
        assert!(degraded.detail.contains("column cleaner crashed"));

        assert_eq!(cleaned.types[2].semantic_type, SemanticType::Text);
        assert_eq!(cleaned.table.rows[1][2], Cell::text("$2,000"));
        assert_eq!(cleaned.table.rows[1][1], Cell::Number(1234.56));
        assert!(cleaned.audit.completed(Stage::Cleaning));
    }

    #[test]
    fn test_stage_markers_are_timed() {
        let config = PipelineConfig::default();
        let out = run_level(FallbackLevel::Full, &ctx(&config, None), &wide(), &mut StateTrace::new()).unwrap();
        for stage in [Stage::TypeInference, Stage::Layout, Stage::Cleaning] {
            assert!(out.cleaned.audit.stage_duration_ms(stage).is_some(), "{} not timed", stage);
        }
    }

    #[test]
    fn test_minimal_coerces_numbers_only() {
        let config = PipelineConfig::default();
        let t = table(&[
            &["Name", "Units", "Mixed"],
            &["a", "1,000", "x"],
            &["", "", ""],
            &["b", "(2)", "3"],
        ]);
        let out = run_level(FallbackLevel::Minimal, &ctx(&config, None), &t, &mut StateTrace::new()).unwrap();

        assert_eq!(out.cleaned.table.height(), 2);
        assert_eq!(out.cleaned.table.rows[0][1], Cell::Number(1000.0));
        assert_eq!(out.cleaned.table.rows[1][1], Cell::Number(-2.0));
        assert_eq!(out.cleaned.table.rows[1][2], Cell::text("3"));
        assert_eq!(out.cleaned.types[2].semantic_type, SemanticType::Text);
    }

    #[test]
    fn test_guarded_catches_panics() {
        let err = guarded(Stage::Profiling, || -> usize { panic!("boom") }).unwrap_err();
        assert_eq!(
            err,
            StageError::Panicked {
                stage: "profiling".into(),
                message: "boom".into()
            }
        );
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(FallbackLevel::Full < FallbackLevel::Chunked);
        assert!(FallbackLevel::PerColumn < FallbackLevel::Minimal);
        assert_eq!(serde_json::to_string(&FallbackLevel::PerColumn).unwrap(), r#""per_column""#);
    }
}
