//! Post-clean profiling and quality scoring.
//!
//! The quality score combines three components, each in `[0, 1]`:
//!
//! - **completeness** - `1 - missing / total` over every cell
//! - **consistency** - share of non-missing cells accepted by their column's type
//! - **uniqueness** - distinct share of id columns (only when the table has any)
//!
//! `score = 100 * weighted mean` with the configured [`QualityWeights`];
//! when there is no id column the uniqueness weight is dropped and the
//! remaining weights renormalized.
//!
//! Numeric statistics and the Pearson correlation matrix only cover
//! currency, percentage and numeric columns. Date columns get their span,
//! text and id columns their value lengths.
//!
//! [`QualityWeights`]: crate::config::QualityWeights

pub mod stats;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::PipelineConfig;
use crate::error::ProfilingError;
use crate::models::{Cell, CleanedTable, ColumnTypeInfo, SemanticType};

pub use stats::{DateStats, NumericStats, OutlierSummary, TextStats};

/// Number of most frequent values kept per column.
const TOP_VALUES: usize = 5;

/// A value and how often it occurs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// Profile of one cleaned column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub semantic_type: SemanticType,
    pub missing: usize,
    /// In `[0, 100]`.
    pub missing_pct: f64,
    pub unique: usize,
    /// Share of non-missing cells consistent with the column type.
    pub consistency: f64,
    pub top_values: Vec<ValueCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dates: Option<DateStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextStats>,
}

/// Pairwise Pearson correlation; `None` where undefined.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        self.data[i][j]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrongCorrelation {
    pub a: String,
    pub b: String,
    pub r: f64,
}

/// A part of the report that could not be computed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileFlag {
    pub field: String,
    pub reason: String,
}

/// Quality report of one cleaned table. Read-only once produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// In `[0, 100]`.
    pub score: f64,
    pub completeness: f64,
    pub consistency: f64,
    /// `None` when the table has no id column.
    pub uniqueness: Option<f64>,
    pub rows: usize,
    pub columns: usize,
    pub column_profiles: Vec<ColumnProfile>,
    pub correlation: Option<CorrelationMatrix>,
    pub strong_correlations: Vec<StrongCorrelation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<ProfileFlag>,
}

impl QualityReport {
    /// Some fields could not be computed.
    pub fn is_partial(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// Computes [`QualityReport`]s.
pub struct DataProfiler<'a> {
    config: &'a PipelineConfig,
}

impl<'a> DataProfiler<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn profile(&self, table: &CleanedTable, types: &[ColumnTypeInfo]) -> QualityReport {
        let mut flags = Vec::new();
        let mut profiles = Vec::with_capacity(table.width());

        let mut missing_total = 0usize;
        let mut present_total = 0usize;
        let mut consistent_total = 0usize;
        let mut id_uniqueness = Vec::new();

        for (index, name) in table.headers.iter().enumerate() {
            let semantic_type = types
                .iter()
                .find(|t| t.index == index)
                .map_or(SemanticType::Text, |t| t.semantic_type);

            let present: Vec<&Cell> = table.column(index).filter(|c| !c.is_blank()).collect();
            let missing = table.height() - present.len();
            let consistent = present.iter().filter(|c| semantic_type.accepts(c)).count();

            let mut counts: HashMap<String, usize> = HashMap::new();
            for cell in &present {
                *counts.entry(cell.display()).or_default() += 1;
            }
            let unique = counts.len();

            if semantic_type == SemanticType::Id && !present.is_empty() {
                id_uniqueness.push(unique as f64 / present.len() as f64);
            }

            let (mut numeric, mut dates, mut text) = (None, None, None);
            match semantic_type {
                t if t.is_numeric_family() => {
                    let values: Vec<f64> = present.iter().filter_map(|c| c.as_number()).collect();
                    numeric = keep(NumericStats::compute(name, &values), name, "numeric", &mut flags);
                }
                // All-missing date and text columns carry no stats and no flag
                SemanticType::Date if !present.is_empty() => {
                    let values: Vec<NaiveDate> = present.iter().filter_map(|c| c.as_date()).collect();
                    dates = keep(DateStats::compute(name, &values), name, "dates", &mut flags);
                }
                SemanticType::Text | SemanticType::Id if !present.is_empty() => {
                    let values: Vec<String> = present.iter().map(|c| c.display()).collect();
                    let lengths = TextStats::compute(name, values.iter().map(String::as_str));
                    text = keep(lengths, name, "text", &mut flags);
                }
                _ => {}
            }

            missing_total += missing;
            present_total += present.len();
            consistent_total += consistent;

            profiles.push(ColumnProfile {
                name: name.clone(),
                semantic_type,
                missing,
                missing_pct: ratio(missing, table.height()).map_or(0.0, |r| r * 100.0),
                unique,
                consistency: ratio(consistent, present.len()).unwrap_or(1.0),
                top_values: top_values(counts),
                numeric,
                dates,
                text,
            });
        }

        let completeness = ratio(present_total, missing_total + present_total).unwrap_or(1.0);
        let consistency = ratio(consistent_total, present_total).unwrap_or(1.0);
        let uniqueness = (!id_uniqueness.is_empty())
            .then(|| id_uniqueness.iter().sum::<f64>() / id_uniqueness.len() as f64);

        let (correlation, strong_correlations) = self.correlations(table, types);

        QualityReport {
            score: self.score(completeness, consistency, uniqueness),
            completeness,
            consistency,
            uniqueness,
            rows: table.height(),
            columns: table.width(),
            column_profiles: profiles,
            correlation,
            strong_correlations,
            flags,
        }
    }

    /// Weighted quality score in `[0, 100]`.
    pub fn score(&self, completeness: f64, consistency: f64, uniqueness: Option<f64>) -> f64 {
        let w = &self.config.quality_weights;
        let mut parts = vec![(completeness, w.completeness), (consistency, w.consistency)];
        if let Some(u) = uniqueness {
            parts.push((u, w.uniqueness));
        }

        let total_weight: f64 = parts.iter().map(|(_, w)| w).sum();
        let combined = if total_weight > 0.0 {
            parts.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight
        } else {
            parts.iter().map(|(v, _)| v).sum::<f64>() / parts.len() as f64
        };

        let score = (combined * 100.0).clamp(0.0, 100.0);
        if score.is_finite() {
            score
        } else {
            0.0
        }
    }

    fn correlations(
        &self,
        table: &CleanedTable,
        types: &[ColumnTypeInfo],
    ) -> (Option<CorrelationMatrix>, Vec<StrongCorrelation>) {
        let numeric: Vec<&ColumnTypeInfo> = types
            .iter()
            .filter(|t| t.semantic_type.is_numeric_family() && t.index < table.width())
            .collect();
        if numeric.len() < 2 {
            return (None, Vec::new());
        }

        let series: Vec<Vec<Option<f64>>> = numeric
            .iter()
            .map(|t| table.column(t.index).map(Cell::as_number).collect())
            .collect();

        let mut data = vec![vec![None; numeric.len()]; numeric.len()];
        let mut strong = Vec::new();
        for i in 0..numeric.len() {
            data[i][i] = Some(1.0);
            for j in (i + 1)..numeric.len() {
                let r = stats::pearson(&series[i], &series[j]);
                data[i][j] = r;
                data[j][i] = r;
                if let Some(r) = r.filter(|r| r.abs() > self.config.strong_correlation) {
                    strong.push(StrongCorrelation {
                        a: numeric[i].name.clone(),
                        b: numeric[j].name.clone(),
                        r,
                    });
                }
            }
        }

        let columns = numeric.iter().map(|t| t.name.clone()).collect();
        (Some(CorrelationMatrix { columns, data }), strong)
    }
}

fn ratio(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64)
}

fn flag(field: String, err: &ProfilingError) -> ProfileFlag {
    ProfileFlag { field, reason: err.to_string() }
}

/// Keep a computed statistic, or flag the column field it was meant for.
fn keep<T>(result: Result<T, ProfilingError>, column: &str, field: &str, flags: &mut Vec<ProfileFlag>) -> Option<T> {
    match result {
        Ok(stats) => Some(stats),
        Err(err) => {
            flags.push(flag(format!("columns.{}.{}", column, field), &err));
            None
        }
    }
}

fn top_values(counts: HashMap<String, usize>) -> Vec<ValueCount> {
    let mut values: Vec<ValueCount> = counts
        .into_iter()
        .map(|(value, count)| ValueCount { value, count })
        .collect();
    values.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    values.truncate(TOP_VALUES);
    values
}
