//! Type-aware cleaning.
//!
//! Cleaning runs in three steps, each logged to the sheet's audit trail:
//!
//! 1. every cell is converted according to its column's semantic type
//!    (see [`rules`]); a value that cannot be converted becomes
//!    [`Cell::Missing`]
//! 2. non-data rows are removed: blank rows, repeated header rows and
//!    section header rows (`Assets`, `Liabilities`, ...). A missing cell
//!    still counts as a value here, so a data row whose amounts were all
//!    unparsable is kept rather than taken for a section header
//! 3. if a normalization plan is given, the wide table is melted
//!
//! Failures are per cell: a bad value never aborts the rest of the table.
//! Cleaning a cleaned table again changes nothing.

pub mod rules;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::audit::{AuditAction, AuditEntry, AuditLog, Stage};
use crate::config::PipelineConfig;
use crate::error::{CellError, StageResult};
use crate::layout;
use crate::models::{
    Cell, CleanedTable, ColumnTypeInfo, NormalizationPlan, RawTable, SemanticType, Table,
};

/// Counts of what cleaning did to one sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningSummary {
    pub rows_in: usize,
    pub rows_out: usize,
    pub blank_rows_removed: usize,
    pub section_headers_removed: usize,
    pub repeated_headers_removed: usize,
    /// Converted cells per column.
    pub converted: BTreeMap<String, usize>,
    /// Cells marked missing per column.
    pub marked_missing: BTreeMap<String, usize>,
    /// Percentage cells that were already numbers (xlsx cells formatted as
    /// `%` hold the fraction), kept unscaled. Text values are scaled instead.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stored_percentages: BTreeMap<String, usize>,
    /// Columns that fell back to plain text cleaning.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_columns: Vec<String>,
    /// Row count before melting, if the table was melted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub melted_from_rows: Option<usize>,
}

impl CleaningSummary {
    pub fn rows_removed(&self) -> usize {
        self.blank_rows_removed + self.section_headers_removed + self.repeated_headers_removed
    }

    pub fn cells_marked_missing(&self) -> usize {
        self.marked_missing.values().sum()
    }

    pub fn cells_converted(&self) -> usize {
        self.converted.values().sum()
    }
}

/// Result of cleaning one table.
#[derive(Debug, Clone)]
pub struct CleaningOutput {
    pub table: CleanedTable,
    /// Column types of `table` (differ from the input types after a melt).
    pub types: Vec<ColumnTypeInfo>,
    pub audit: AuditLog,
    pub summary: CleaningSummary,
}

/// Applies type-specific cleaning rules.
pub struct DataCleaner<'a> {
    config: &'a PipelineConfig,
}

impl<'a> DataCleaner<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Clean a whole table, optionally melting it afterwards.
    pub fn clean(
        &self,
        table: &RawTable,
        types: &[ColumnTypeInfo],
        plan: Option<&NormalizationPlan>,
    ) -> StageResult<CleaningOutput> {
        let started = Instant::now();
        let mut audit = AuditLog::new();
        let mut summary = CleaningSummary::default();
        let cleaned = self.clean_batch(table, types, 0, &mut audit, &mut summary);
        self.finish(cleaned, types, plan, audit, summary, started)
    }

    /// Convert cells and remove non-data rows of one batch of rows.
    ///
    /// `row_offset` is the index of the batch's first row in the sheet, used
    /// for audit entries.
    pub fn clean_batch(
        &self,
        table: &Table,
        types: &[ColumnTypeInfo],
        row_offset: usize,
        audit: &mut AuditLog,
        summary: &mut CleaningSummary,
    ) -> Table {
        summary.rows_in += table.height();
        let row_ids: Vec<usize> = (row_offset..row_offset + table.height()).collect();

        // Header rows are matched on raw text, before conversion blanks them.
        let (table, row_ids) = self.remove_repeated_headers(table, &row_ids, audit, summary);

        let mut rows = table.rows.clone();
        for info in types.iter().filter(|t| t.index < table.width()) {
            let column = self.clean_column(&table, info, &row_ids, audit, summary);
            for (row, cell) in rows.iter_mut().zip(column) {
                row[info.index] = cell;
            }
        }
        let converted = Table::new(table.headers.clone(), rows);
        self.remove_rows(&converted, types, &row_ids, true, audit, summary)
    }

    /// Clean one column in isolation.
    ///
    /// `row_ids` holds the sheet-level index of each row of `table`.
    pub fn clean_column(
        &self,
        table: &Table,
        info: &ColumnTypeInfo,
        row_ids: &[usize],
        audit: &mut AuditLog,
        summary: &mut CleaningSummary,
    ) -> Vec<Cell> {
        let mut changed_rows = Vec::new();
        let mut example: Option<(String, String)> = None;
        let mut out = Vec::with_capacity(table.height());

        for (i, cell) in table.column(info.index).enumerate() {
            let row = row_ids.get(i).copied().unwrap_or(i);
            if info.semantic_type == SemanticType::Percentage && matches!(cell, Cell::Number(_)) {
                *summary.stored_percentages.entry(info.name.clone()).or_default() += 1;
            }
            match self.clean_cell(cell, info) {
                Ok(cleaned) => {
                    if &cleaned != cell {
                        changed_rows.push(row);
                        if example.is_none() {
                            example = Some((cell.display(), cleaned.display()));
                        }
                    }
                    out.push(cleaned);
                }
                Err(err) => {
                    *summary.marked_missing.entry(info.name.clone()).or_default() += 1;
                    audit.record(
                        AuditEntry::new(Stage::Cleaning, AuditAction::ValueMarkedMissing, err.to_string())
                            .column(info.name.clone())
                            .row(row)
                            .change(cell.display(), ""),
                    );
                    out.push(Cell::Missing);
                }
            }
        }

        if !changed_rows.is_empty() {
            *summary.converted.entry(info.name.clone()).or_default() += changed_rows.len();
            let mut entry = AuditEntry::new(
                Stage::Cleaning,
                AuditAction::ValuesConverted,
                format!("converted {} values to {}", changed_rows.len(), info.semantic_type),
            )
            .column(info.name.clone())
            .rows(changed_rows);
            if let Some((before, after)) = example {
                entry = entry.change(before, after);
            }
            audit.record(entry);
        }
        out
    }

    /// Convert one cell to its column's type.
    pub fn clean_cell(&self, cell: &Cell, info: &ColumnTypeInfo) -> Result<Cell, CellError> {
        let expected = info.semantic_type;
        let fail = |value: &str, reason: &str| Err(CellError::new(value, expected, reason));

        match (expected, cell) {
            (_, Cell::Empty) => Ok(Cell::Empty),
            (_, Cell::Missing) => Ok(Cell::Missing),
            (_, Cell::Text(s)) if s.trim().is_empty() => Ok(Cell::Empty),

            (SemanticType::Currency | SemanticType::Numeric, Cell::Number(n)) => {
                if n.is_finite() {
                    Ok(Cell::Number(*n))
                } else {
                    fail(&cell.display(), "not a finite number")
                }
            }
            (SemanticType::Currency | SemanticType::Numeric, Cell::Text(s)) => match rules::parse_currency(s) {
                Some(v) => Ok(Cell::Number(v)),
                None => fail(s, "not a number"),
            },

            (SemanticType::Percentage, Cell::Number(n)) => {
                if n.is_finite() {
                    Ok(Cell::Number(*n))
                } else {
                    fail(&cell.display(), "not a finite number")
                }
            }
            (SemanticType::Percentage, Cell::Text(s)) => {
                match rules::parse_percentage(s, self.config.percent_already_fractional) {
                    Some(v) => Ok(Cell::Number(v)),
                    None => fail(s, "not a percentage"),
                }
            }

            (SemanticType::Date, Cell::Date(d)) => Ok(Cell::Date(*d)),
            (SemanticType::Date, Cell::Number(n)) => {
                match rules::date_from_number(*n, &self.config.date_formats) {
                    Some(d) => Ok(Cell::Date(d)),
                    None => fail(&cell.display(), "number is not a date serial"),
                }
            }
            (SemanticType::Date, Cell::Text(s)) => match rules::parse_date(s, &self.config.date_formats) {
                Some(d) => Ok(Cell::Date(d)),
                None => fail(s, "no accepted date format matches"),
            },

            (SemanticType::Period, Cell::Text(s)) => match rules::parse_period(s) {
                Some(p) => Ok(Cell::Text(p)),
                None => fail(s, "not a year or quarter label"),
            },
            (SemanticType::Period, Cell::Number(n)) => match rules::period_from_number(*n) {
                Some(p) => Ok(Cell::Text(p)),
                None => fail(&cell.display(), "not a year"),
            },

            (SemanticType::Id, Cell::Text(s)) => Ok(Cell::Text(rules::collapse_whitespace(s))),
            (SemanticType::Id, Cell::Date(d)) => Ok(Cell::Text(d.format("%Y-%m-%d").to_string())),
            (SemanticType::Id, Cell::Number(n)) => Ok(Cell::Number(*n)),

            (SemanticType::Text, Cell::Text(s)) => Ok(rules::clean_text(s).map_or(Cell::Empty, Cell::Text)),
            (SemanticType::Text, other) => Ok(other.clone()),

            (_, Cell::Date(_)) => fail(&cell.display(), "unexpected date"),
        }
    }

    /// Remove rows equal to the header row.
    pub fn remove_repeated_headers(
        &self,
        table: &Table,
        row_ids: &[usize],
        audit: &mut AuditLog,
        summary: &mut CleaningSummary,
    ) -> (Table, Vec<usize>) {
        let mut kept = Vec::with_capacity(table.height());
        let mut kept_ids = Vec::with_capacity(table.height());

        for (i, row) in table.rows.iter().enumerate() {
            let index = row_ids.get(i).copied().unwrap_or(i);
            if is_repeated_header(row, &table.headers) {
                summary.repeated_headers_removed += 1;
                audit.record(
                    AuditEntry::new(
                        Stage::Cleaning,
                        AuditAction::RepeatedHeaderRemoved,
                        "removed repeated header row",
                    )
                    .row(index)
                    .change(row_summary(row), ""),
                );
                continue;
            }
            kept.push(row.clone());
            kept_ids.push(index);
        }

        (Table::new(table.headers.clone(), kept), kept_ids)
    }

    /// Remove blank rows and, if asked, section header rows, logging one
    /// entry per removed row.
    ///
    /// A row is blank when every cell is vacant; [`Cell::Missing`] is not.
    pub fn remove_rows(
        &self,
        table: &Table,
        types: &[ColumnTypeInfo],
        row_ids: &[usize],
        section_headers: bool,
        audit: &mut AuditLog,
        summary: &mut CleaningSummary,
    ) -> Table {
        let label_col = label_column(types);
        let mut kept = Vec::with_capacity(table.height());

        for (i, row) in table.rows.iter().enumerate() {
            let index = row_ids.get(i).copied().unwrap_or(i);

            if row.iter().all(Cell::is_vacant) {
                summary.blank_rows_removed += 1;
                audit.record(
                    AuditEntry::new(Stage::Cleaning, AuditAction::BlankRowRemoved, "removed blank row")
                        .row(index),
                );
                continue;
            }

            if section_headers {
                if let Some(label) = self.section_label(row, types, label_col) {
                    summary.section_headers_removed += 1;
                    let header = table.headers.get(label_col).cloned().unwrap_or_default();
                    audit.record(
                        AuditEntry::new(
                            Stage::Cleaning,
                            AuditAction::SectionHeaderRemoved,
                            format!("removed section header row '{}'", label),
                        )
                        .column(header)
                        .row(index)
                        .change(row_summary(row), label),
                    );
                    continue;
                }
            }

            kept.push(row.clone());
        }

        Table::new(table.headers.clone(), kept)
    }

    /// Label of a section header row, if the row is one.
    ///
    /// A row is a section header when its label cell is the only non-blank
    /// cell, or when the label is in the configured vocabulary and every
    /// other non-blank cell sits in a text column.
    fn section_label(&self, row: &[Cell], types: &[ColumnTypeInfo], label_col: usize) -> Option<String> {
        let label = row.get(label_col)?.as_text()?.trim();
        if label.is_empty() {
            return None;
        }
        let vocabulary_match = rules::matches_section_label(label, &self.config.section_labels);

        let others: Vec<(usize, &Cell)> = row
            .iter()
            .enumerate()
            .filter(|(i, c)| *i != label_col && !c.is_vacant())
            .collect();

        if others.is_empty() && row.len() >= 2 {
            return Some(vocabulary_match.unwrap_or(label).to_string());
        }

        let only_text = others.iter().all(|(i, c)| {
            matches!(c, Cell::Text(_))
                && types
                    .iter()
                    .find(|t| t.index == *i)
                    .map_or(true, |t| t.semantic_type == SemanticType::Text)
        });
        vocabulary_match.filter(|_| only_text).map(str::to_string)
    }

    /// Melt if planned, and append the stage marker.
    pub fn finish(
        &self,
        table: Table,
        types: &[ColumnTypeInfo],
        plan: Option<&NormalizationPlan>,
        mut audit: AuditLog,
        mut summary: CleaningSummary,
        started: Instant,
    ) -> StageResult<CleaningOutput> {
        let (table, types) = match plan {
            Some(plan) => {
                let before = table.height();
                let melted = layout::apply_plan(&table, plan)?;
                audit.record(
                    AuditEntry::new(
                        Stage::Layout,
                        AuditAction::LayoutNormalized,
                        format!(
                            "melted {} period columns into '{}' / '{}': {} rows -> {} rows",
                            plan.value_columns.len(),
                            plan.period_header,
                            plan.value_header,
                            before,
                            melted.height()
                        ),
                    )
                    .change(table.headers.join(" | "), melted.headers.join(" | ")),
                );
                summary.melted_from_rows = Some(before);
                let types = layout::melted_types(types, plan);
                (melted, types)
            }
            None => (table, types.to_vec()),
        };

        summary.rows_out = table.height();
        audit.stage_completed(
            Stage::Cleaning,
            format!(
                "{} rows in, {} removed, {} cells converted, {} marked missing",
                summary.rows_in,
                summary.rows_removed(),
                summary.cells_converted(),
                summary.cells_marked_missing()
            ),
            started,
        );

        Ok(CleaningOutput {
            table,
            types,
            audit,
            summary,
        })
    }
}

/// Column holding row labels: the first text or id column.
fn label_column(types: &[ColumnTypeInfo]) -> usize {
    types
        .iter()
        .find(|t| matches!(t.semantic_type, SemanticType::Text | SemanticType::Id))
        .map_or(0, |t| t.index)
}

fn is_repeated_header(row: &[Cell], headers: &[String]) -> bool {
    let mut matches = 0;
    for (cell, header) in row.iter().zip(headers) {
        if cell.is_blank() {
            continue;
        }
        if !cell.display().trim().eq_ignore_ascii_case(header.trim()) {
            return false;
        }
        matches += 1;
    }
    matches >= 2 || (headers.len() == 1 && matches == 1)
}

fn row_summary(row: &[Cell]) -> String {
    row.iter().map(Cell::display).collect::<Vec<_>>().join(" | ")
}
