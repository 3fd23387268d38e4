//! Wide / long layout detection and normalization.
//!
//! A table is wide when several of its headers are period labels
//! (`Item | 2022 | 2023 | 2024`). Its plan melts those columns into one
//! period column and one value column, keeping every other column as an
//! identifier:
//!
//! ```text
//! Item | 2022 | 2023        Item | Period | Value
//! Cash |  10  |  12    ->   Cash | 2022   | 10
//!                           Cash | 2023   | 12
//! ```
//!
//! Date headers (`2024-01-31 | 2024-02-29`) melt into a `date` column instead.

use chrono::NaiveDate;
use std::collections::HashSet;

use crate::cleaning::rules;
use crate::config::PipelineConfig;
use crate::error::{StageError, StageResult};
use crate::models::{
    Cell, ColumnTypeInfo, LayoutDecision, NormalizationPlan, Orientation, RawTable, SemanticType,
    Table,
};

pub const PERIOD_HEADER: &str = "Period";
pub const VALUE_HEADER: &str = "Value";

/// Classifies tables as wide or long.
pub struct LayoutDetector<'a> {
    config: &'a PipelineConfig,
}

impl<'a> LayoutDetector<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, table: &RawTable, types: &[ColumnTypeInfo]) -> LayoutDecision {
        let labelled: Vec<(usize, HeaderLabel)> = table
            .headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| header_label(h, &self.config.date_formats).map(|l| (i, l)))
            .collect();

        if labelled.len() < self.config.min_wide_columns.max(2) || labelled.len() == table.width() {
            return LayoutDecision::long(self.long_id_columns(types));
        }

        let period_type = label_type(labelled.iter().map(|(_, l)| l));
        let period_columns: Vec<usize> = labelled.iter().map(|(i, _)| *i).collect();
        let period_labels: Vec<String> = labelled.iter().map(|(_, l)| l.canonical()).collect();
        let id_columns: Vec<usize> = (0..table.width())
            .filter(|i| !period_columns.contains(i))
            .collect();

        let mut taken: HashSet<String> = id_columns
            .iter()
            .map(|&i| table.headers[i].clone())
            .collect();
        let period_header = free_name(PERIOD_HEADER, &mut taken);
        let value_header = free_name(VALUE_HEADER, &mut taken);

        LayoutDecision {
            orientation: Orientation::Wide,
            id_columns: id_columns.clone(),
            period_columns: period_columns.clone(),
            sequential: is_sequential(&period_labels),
            plan: Some(NormalizationPlan {
                id_columns,
                value_columns: period_columns,
                period_labels,
                period_type,
                period_header,
                value_header,
            }),
        }
    }

    /// Identifier candidates of a long table: id columns, else text columns.
    fn long_id_columns(&self, types: &[ColumnTypeInfo]) -> Vec<usize> {
        let ids: Vec<usize> = types
            .iter()
            .filter(|t| t.semantic_type == SemanticType::Id)
            .map(|t| t.index)
            .collect();
        if !ids.is_empty() {
            return ids;
        }
        types
            .iter()
            .filter(|t| t.semantic_type == SemanticType::Text)
            .map(|t| t.index)
            .collect()
    }
}

/// A header read as a point in time.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderLabel {
    /// Canonical year or quarter label (`2023`, `2023-Q1`).
    Period(String),
    Date(NaiveDate),
}

impl HeaderLabel {
    pub fn canonical(&self) -> String {
        match self {
            HeaderLabel::Period(label) => label.clone(),
            HeaderLabel::Date(date) => date.format(CANONICAL_DATE).to_string(),
        }
    }
}

const CANONICAL_DATE: &str = "%Y-%m-%d";

/// Period or date label of a header.
pub fn header_label(header: &str, date_formats: &[String]) -> Option<HeaderLabel> {
    rules::parse_period(header)
        .map(HeaderLabel::Period)
        .or_else(|| rules::parse_date(header, date_formats).map(HeaderLabel::Date))
}

/// Column type that holds every label without a mismatch.
fn label_type<'l>(labels: impl Iterator<Item = &'l HeaderLabel>) -> SemanticType {
    let (mut periods, mut dates) = (false, false);
    for label in labels {
        match label {
            HeaderLabel::Period(_) => periods = true,
            HeaderLabel::Date(_) => dates = true,
        }
    }
    match (periods, dates) {
        (false, true) => SemanticType::Date,
        (true, true) => SemanticType::Text,
        _ => SemanticType::Period,
    }
}

/// Cell written into the melted period column.
fn label_cell(label: &str, period_type: SemanticType) -> Cell {
    match period_type {
        SemanticType::Date => NaiveDate::parse_from_str(label, CANONICAL_DATE)
            .map(Cell::Date)
            .unwrap_or_else(|_| Cell::text(label)),
        _ => Cell::text(label),
    }
}

fn free_name(base: &str, taken: &mut HashSet<String>) -> String {
    let mut name = base.to_string();
    let mut n = 2;
    while taken.contains(&name) {
        name = format!("{}_{}", base, n);
        n += 1;
    }
    taken.insert(name.clone());
    name
}

/// Consecutive years or quarters, ascending or descending.
fn is_sequential(labels: &[String]) -> bool {
    let ordinals: Option<Vec<i64>> = labels.iter().map(|l| period_ordinal(l)).collect();
    let ordinals = match ordinals {
        Some(o) if o.len() >= 2 => o,
        _ => return false,
    };
    let quarterly = labels[0].contains("-Q");
    if labels.iter().any(|l| l.contains("-Q") != quarterly) {
        return false;
    }
    let step = ordinals[1] - ordinals[0];
    (step == 1 || step == -1) && ordinals.windows(2).all(|w| w[1] - w[0] == step)
}

fn period_ordinal(label: &str) -> Option<i64> {
    match label.split_once("-Q") {
        Some((year, q)) => Some(year.parse::<i64>().ok()? * 4 + q.parse::<i64>().ok()? - 1),
        None if label.len() == 4 => label.parse().ok(),
        None => None,
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Melt a wide table, row-major: each input row yields one output row per
/// value column, in column order. Missing values are kept as missing.
pub fn apply_plan(table: &Table, plan: &NormalizationPlan) -> StageResult<Table> {
    let width = table.width();
    if let Some(bad) = plan
        .id_columns
        .iter()
        .chain(plan.value_columns.iter())
        .find(|&&i| i >= width)
    {
        return Err(StageError::Layout(format!(
            "plan references column {} of a {}-column table",
            bad, width
        )));
    }
    if plan.value_columns.len() != plan.period_labels.len() {
        return Err(StageError::Layout(format!(
            "{} value columns but {} period labels",
            plan.value_columns.len(),
            plan.period_labels.len()
        )));
    }

    let mut headers: Vec<String> = plan
        .id_columns
        .iter()
        .map(|&i| table.headers[i].clone())
        .collect();
    headers.push(plan.period_header.clone());
    headers.push(plan.value_header.clone());

    let labels: Vec<Cell> = plan
        .period_labels
        .iter()
        .map(|l| label_cell(l, plan.period_type))
        .collect();

    let mut rows = Vec::with_capacity(table.height() * plan.value_columns.len());
    for row in &table.rows {
        let ids: Vec<Cell> = plan.id_columns.iter().map(|&i| row[i].clone()).collect();
        for (&col, label) in plan.value_columns.iter().zip(&labels) {
            let mut out = ids.clone();
            out.push(label.clone());
            out.push(row[col].clone());
            rows.push(out);
        }
    }

    Ok(Table::new(headers, rows))
}

/// Column types of the melted table.
///
/// The value column keeps the melted columns' type when they agree, becomes
/// `numeric` when they are all numbers of different kinds, else `text`.
pub fn melted_types(types: &[ColumnTypeInfo], plan: &NormalizationPlan) -> Vec<ColumnTypeInfo> {
    let mut out: Vec<ColumnTypeInfo> = plan
        .id_columns
        .iter()
        .enumerate()
        .filter_map(|(new_index, &old)| {
            types.iter().find(|t| t.index == old).map(|t| {
                let mut t = t.clone();
                t.index = new_index;
                t
            })
        })
        .collect();

    let melted: Vec<&ColumnTypeInfo> = types
        .iter()
        .filter(|t| plan.value_columns.contains(&t.index))
        .collect();
    let value_type = match melted.first() {
        Some(first) if melted.iter().all(|t| t.semantic_type == first.semantic_type) => {
            first.semantic_type
        }
        _ if !melted.is_empty() && melted.iter().all(|t| t.semantic_type.is_numeric_family()) => {
            SemanticType::Numeric
        }
        _ => SemanticType::Text,
    };

    let n = out.len();
    out.push(ColumnTypeInfo::fixed(
        n,
        plan.period_header.clone(),
        plan.period_type,
        format!("{} labels from wide-format headers", plan.period_type),
    ));

    let mut value = ColumnTypeInfo::fixed(
        n + 1,
        plan.value_header.clone(),
        value_type,
        format!("values melted from {} period columns", plan.value_columns.len()),
    );
    value.confidence = melted
        .iter()
        .map(|t| t.confidence)
        .fold(f64::INFINITY, f64::min)
        .min(1.0);
    if !value.confidence.is_finite() {
        value.confidence = 0.0;
    }
    value.currency_symbol = melted.iter().find_map(|t| t.currency_symbol.clone());
    out.push(value);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::TypeInferencer;

    fn table(rows: &[&[&str]]) -> Table {
        Table::from_rows(
            rows.iter()
                .map(|r| r.iter().map(|v| Cell::from_raw(v)).collect())
                .collect(),
        )
    }

    fn detect(t: &Table) -> (LayoutDecision, Vec<ColumnTypeInfo>) {
        let config = PipelineConfig::default();
        let types = TypeInferencer::new(&config).infer(t);
        (LayoutDetector::new(&config).detect(t, &types), types)
    }

    #[test]
    fn test_year_columns_are_wide() {
        let t = table(&[
            &["Item", "2022", "2023", "2024"],
            &["Cash", "$1,990", "$2,100", "$2,300"],
            &["Debt", "($500)", "($450)", "($400)"],
        ]);
        let (decision, _) = detect(&t);

        assert_eq!(decision.orientation, Orientation::Wide);
        assert_eq!(decision.period_columns, vec![1, 2, 3]);
        assert_eq!(decision.id_columns, vec![0]);
        assert!(decision.sequential);
        let plan = decision.plan.unwrap();
        assert_eq!(plan.period_labels, vec!["2022", "2023", "2024"]);
    }

    #[test]
    fn test_melt_triples_rows() {
        let t = table(&[
            &["Item", "2022", "2023", "2024"],
            &["Cash", "10", "11", "12"],
            &["Debt", "5", "", "7"],
        ]);
        let (decision, types) = detect(&t);
        let plan = decision.plan.unwrap();
        let melted = apply_plan(&t, &plan).unwrap();

        assert_eq!(melted.headers, vec!["Item", "Period", "Value"]);
        assert_eq!(melted.height(), 3 * t.height());
        assert_eq!(melted.rows[0], vec![Cell::text("Cash"), Cell::text("2022"), Cell::text("10")]);
        assert_eq!(melted.rows[4], vec![Cell::text("Debt"), Cell::text("2023"), Cell::Empty]);

        let melted_types = melted_types(&types, &plan);
        assert_eq!(melted_types.len(), 3);
        assert_eq!(melted_types[1].semantic_type, SemanticType::Period);
        assert_eq!(melted_types[2].semantic_type, SemanticType::Numeric);
        assert_eq!(melted_types[2].index, 2);
    }

    #[test]
    fn test_single_period_column_stays_long() {
        let t = table(&[&["Item", "2023"], &["Cash", "10"]]);
        let (decision, _) = detect(&t);
        assert_eq!(decision.orientation, Orientation::Long);
        assert!(decision.plan.is_none());
    }

    #[test]
    fn test_long_table_reports_id_candidates() {
        let t = table(&[
            &["Invoice", "Amount"],
            &["INV-1", "$10"],
            &["INV-2", "$20"],
            &["INV-3", "$30"],
        ]);
        let (decision, _) = detect(&t);
        assert_eq!(decision.orientation, Orientation::Long);
        assert_eq!(decision.id_columns, vec![0]);
    }

    #[test]
    fn test_quarters_and_gaps() {
        let labels: Vec<String> = ["2023-Q3", "2023-Q4", "2024-Q1"].iter().map(|s| s.to_string()).collect();
        assert!(is_sequential(&labels));

        let gap: Vec<String> = ["2020", "2022"].iter().map(|s| s.to_string()).collect();
        assert!(!is_sequential(&gap));

        let descending: Vec<String> = ["2024", "2023", "2022"].iter().map(|s| s.to_string()).collect();
        assert!(is_sequential(&descending));
    }

    #[test]
    fn test_period_header_name_collision() {
        let t = table(&[
            &["Period", "FY2022", "FY2023"],
            &["Opening", "1", "2"],
        ]);
        let (decision, _) = detect(&t);
        let plan = decision.plan.unwrap();
        assert_eq!(plan.period_header, "Period_2");
        assert_eq!(plan.period_labels, vec!["2022", "2023"]);
    }

    #[test]
    fn test_date_headers_melt_into_date_column() {
        let t = table(&[
            &["Item", "2024-01-31", "2024-02-29", "2024-03-31"],
            &["Cash", "10", "11", "12"],
            &["Debt", "5", "6", "7"],
        ]);
        let (decision, types) = detect(&t);
        assert_eq!(decision.orientation, Orientation::Wide);
        assert!(!decision.sequential);
        let plan = decision.plan.unwrap();
        assert_eq!(plan.period_type, SemanticType::Date);

        let melted = apply_plan(&t, &plan).unwrap();
        let jan = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(melted.rows[0][1], Cell::Date(jan));

        let melted_types = melted_types(&types, &plan);
        assert_eq!(melted_types[1].semantic_type, SemanticType::Date);
        assert!(melted.column(1).all(|c| melted_types[1].semantic_type.accepts(c)));
    }

    #[test]
    fn test_mixed_year_and_date_headers_melt_into_text() {
        let t = table(&[
            &["Item", "2023", "2024-06-30"],
            &["Cash", "10", "11"],
        ]);
        let (decision, _) = detect(&t);
        let plan = decision.plan.unwrap();
        assert_eq!(plan.period_type, SemanticType::Text);
        assert_eq!(plan.period_labels, vec!["2023", "2024-06-30"]);
    }

    #[test]
    fn test_bad_plan_is_layout_error() {
        let t = table(&[&["a", "b"], &["1", "2"]]);
        let plan = NormalizationPlan {
            id_columns: vec![0],
            value_columns: vec![5],
            period_labels: vec!["2022".into()],
            period_type: SemanticType::Period,
            period_header: "Period".into(),
            value_header: "Value".into(),
        };
        assert!(matches!(apply_plan(&t, &plan), Err(StageError::Layout(_))));
    }
}
