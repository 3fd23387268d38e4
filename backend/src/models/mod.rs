//! Domain models shared by every pipeline stage.
//!
//! - [`Cell`] - a single value: blank, number, text or date
//! - [`Table`] - headers plus rectangular rows of cells ([`RawTable`] / [`CleanedTable`])
//! - [`SemanticType`] - the business meaning of a column (currency, period, ...)
//! - [`ColumnTypeInfo`] - inferred type of one column with confidence and reasoning
//! - [`LayoutDecision`] - wide/long classification and optional melt plan

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// =============================================================================
// Cells
// =============================================================================

/// A single table value.
///
/// Serialized untagged: blank and missing cells become `null`, dates become
/// `YYYY-MM-DD`. `null` deserializes as `Empty`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Cell {
    /// Blank in the input.
    #[default]
    Empty,
    /// A value cleaning could not convert to its column's type. Blank for
    /// statistics, but still occupies its cell: a row holding one is data.
    Missing,
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    /// Build a cell from a raw string, mapping whitespace-only input to `Empty`.
    pub fn from_raw(value: &str) -> Self {
        if value.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value.to_string())
        }
    }

    /// Blank or whitespace-only.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty | Cell::Missing => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) | Cell::Date(_) => false,
        }
    }

    /// Blank in the input, as opposed to marked missing by cleaning.
    pub fn is_vacant(&self) -> bool {
        self.is_blank() && *self != Cell::Missing
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the cell the way it would appear in a spreadsheet.
    pub fn display(&self) -> String {
        match self {
            Cell::Empty | Cell::Missing => String::new(),
            Cell::Number(n) => format_number(*n),
            Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
            Cell::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Format a number without a trailing `.0` when it is integral.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

// =============================================================================
// Tables
// =============================================================================

/// Rectangular table: one header per column, every row exactly `headers.len()` wide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Table as read from the input. Never modified by the pipeline.
pub type RawTable = Table;

/// Table after cleaning. Owned by one sheet's processing scope.
pub type CleanedTable = Table;

impl Table {
    /// Create a table, padding or truncating rows to the header width.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Cell::Empty);
                row
            })
            .collect();
        Self { headers, rows }
    }

    /// Build a table from untyped rows, promoting the first non-blank row to headers.
    ///
    /// Blank headers become `column_N`; duplicates get a `_2`, `_3`, ... suffix.
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        let mut iter = rows.into_iter().skip_while(|row| row.iter().all(Cell::is_blank));

        let header_row = match iter.next() {
            Some(row) => row,
            None => return Self::default(),
        };

        let data: Vec<Vec<Cell>> = iter.collect();
        let width = data
            .iter()
            .map(|row| last_non_blank(row))
            .chain(std::iter::once(last_non_blank(&header_row)))
            .max()
            .unwrap_or(0);

        let mut seen: HashSet<String> = HashSet::new();
        let headers = (0..width)
            .map(|i| {
                let base = header_row
                    .get(i)
                    .map(|c| c.display().trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| format!("column_{}", i + 1));
                unique_name(&base, &mut seen)
            })
            .collect();

        Self::new(headers, data)
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn cell_count(&self) -> usize {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over one column's cells, top to bottom.
    pub fn column(&self, index: usize) -> impl Iterator<Item = &Cell> + '_ {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    /// Copy of the table restricted to a row range (used for chunking).
    pub fn slice_rows(&self, start: usize, end: usize) -> Table {
        let end = end.min(self.rows.len());
        let start = start.min(end);
        Table {
            headers: self.headers.clone(),
            rows: self.rows[start..end].to_vec(),
        }
    }
}

fn last_non_blank(row: &[Cell]) -> usize {
    row.iter().rposition(|c| !c.is_blank()).map_or(0, |i| i + 1)
}

fn unique_name(base: &str, seen: &mut HashSet<String>) -> String {
    let mut name = base.to_string();
    let mut n = 2;
    while !seen.insert(name.clone()) {
        name = format!("{}_{}", base, n);
        n += 1;
    }
    name
}

// =============================================================================
// Semantic Types
// =============================================================================

static CANONICAL_PERIOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}(-Q[1-4])?$").expect("valid period regex"));

/// Business meaning of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Currency,
    Percentage,
    Date,
    Period,
    Id,
    Numeric,
    Text,
}

impl SemanticType {
    /// Default tie-break order, most specific first.
    pub const PRECEDENCE: [SemanticType; 7] = [
        SemanticType::Currency,
        SemanticType::Percentage,
        SemanticType::Date,
        SemanticType::Period,
        SemanticType::Id,
        SemanticType::Numeric,
        SemanticType::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Currency => "currency",
            SemanticType::Percentage => "percentage",
            SemanticType::Date => "date",
            SemanticType::Period => "period",
            SemanticType::Id => "id",
            SemanticType::Numeric => "numeric",
            SemanticType::Text => "text",
        }
    }

    /// Columns that hold plain numbers after cleaning.
    pub fn is_numeric_family(&self) -> bool {
        matches!(
            self,
            SemanticType::Currency | SemanticType::Percentage | SemanticType::Numeric
        )
    }

    /// Whether a non-missing cleaned cell is consistent with this type.
    ///
    /// Blank cells are never "consistent"; callers count them as missing instead.
    pub fn accepts(&self, cell: &Cell) -> bool {
        match (self, cell) {
            (_, Cell::Empty | Cell::Missing) => false,
            (t, Cell::Number(n)) if t.is_numeric_family() => n.is_finite(),
            (SemanticType::Date, Cell::Date(_)) => true,
            (SemanticType::Period, Cell::Text(s)) => CANONICAL_PERIOD.is_match(s),
            (SemanticType::Id, Cell::Text(s)) => !s.trim().is_empty(),
            (SemanticType::Id, Cell::Number(_)) => true,
            (SemanticType::Text, c) => !c.is_blank(),
            _ => false,
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score of one candidate type for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeScore {
    pub semantic_type: SemanticType,
    pub score: f64,
}

/// Inferred type of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTypeInfo {
    pub index: usize,
    pub name: String,
    pub semantic_type: SemanticType,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// Short human-readable explanation of the decision.
    pub reasoning: String,
    /// More than one type cleared the threshold, or none did.
    pub ambiguous: bool,
    pub scores: Vec<TypeScore>,
    pub sample_values: Vec<String>,
    pub non_blank: usize,
    pub unique: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency_symbol: Option<String>,
}

impl ColumnTypeInfo {
    /// Type info for a column whose type is decided without sampling.
    pub fn fixed(index: usize, name: impl Into<String>, semantic_type: SemanticType, reasoning: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            semantic_type,
            confidence: 1.0,
            reasoning: reasoning.into(),
            ambiguous: false,
            scores: Vec::new(),
            sample_values: Vec::new(),
            non_blank: 0,
            unique: 0,
            currency_symbol: None,
        }
    }
}

// =============================================================================
// Layout
// =============================================================================

/// Table orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// One column per period (e.g. `Item | 2022 | 2023`).
    Wide,
    /// One row per observation.
    Long,
}

/// How to melt a wide table into long form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationPlan {
    /// Columns kept as identifiers, in order.
    pub id_columns: Vec<usize>,
    /// Columns melted into `(period, value)` pairs, in order.
    pub value_columns: Vec<usize>,
    /// Canonical period label for each melted column.
    pub period_labels: Vec<String>,
    /// Type of the melted period column: `period` for year / quarter labels,
    /// `date` for date labels, `text` when the headers mix both.
    #[serde(default = "default_period_type")]
    pub period_type: SemanticType,
    pub period_header: String,
    pub value_header: String,
}

fn default_period_type() -> SemanticType {
    SemanticType::Period
}

/// Result of layout detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutDecision {
    pub orientation: Orientation,
    /// Columns that look like identifiers (non-period columns).
    pub id_columns: Vec<usize>,
    /// Columns whose header is a period or date label.
    pub period_columns: Vec<usize>,
    /// Period headers form a consecutive sequence (years or quarters).
    pub sequential: bool,
    /// `None` when normalization would not help.
    pub plan: Option<NormalizationPlan>,
}

impl LayoutDecision {
    pub fn long(id_columns: Vec<usize>) -> Self {
        Self {
            orientation: Orientation::Long,
            id_columns,
            period_columns: Vec::new(),
            sequential: false,
            plan: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Cell {
        Cell::from_raw(s)
    }

    #[test]
    fn test_from_rows_promotes_first_non_blank_row() {
        let table = Table::from_rows(vec![
            vec![t(""), t("")],
            vec![t("Item"), t("2022")],
            vec![t("Cash"), t("$1,990")],
        ]);

        assert_eq!(table.headers, vec!["Item", "2022"]);
        assert_eq!(table.height(), 1);
        assert_eq!(table.rows[0][1], Cell::text("$1,990"));
    }

    #[test]
    fn test_from_rows_fills_and_dedupes_headers() {
        let table = Table::from_rows(vec![
            vec![t("Name"), t(""), t("Name")],
            vec![t("a"), t("b"), t("c")],
        ]);

        assert_eq!(table.headers, vec!["Name", "column_2", "Name_2"]);
    }

    #[test]
    fn test_rows_are_padded_to_header_width() {
        let table = Table::from_rows(vec![
            vec![t("a"), t("b"), t("c")],
            vec![t("1")],
            vec![t("1"), t("2"), t("3"), t("")],
        ]);

        assert!(table.rows.iter().all(|r| r.len() == 3));
        assert_eq!(table.rows[0][2], Cell::Empty);
    }

    #[test]
    fn test_data_wider_than_header_gets_generated_names() {
        let table = Table::from_rows(vec![vec![t("a")], vec![t("1"), t("2")]]);
        assert_eq!(table.headers, vec!["a", "column_2"]);
    }

    #[test]
    fn test_empty_input_gives_empty_table() {
        let table = Table::from_rows(vec![vec![t(" ")]]);
        assert_eq!(table.width(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_cell_display() {
        assert_eq!(Cell::Number(1234.0).display(), "1234");
        assert_eq!(Cell::Number(0.45).display(), "0.45");
        assert_eq!(
            Cell::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()).display(),
            "2024-03-01"
        );
        assert_eq!(Cell::Empty.display(), "");
    }

    #[test]
    fn test_cell_serializes_untagged() {
        let row = vec![Cell::Empty, Cell::Number(1.5), Cell::text("x"), Cell::Missing];
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"[null,1.5,"x",null]"#);
    }

    #[test]
    fn test_missing_is_blank_but_not_vacant() {
        assert!(Cell::Missing.is_blank());
        assert!(!Cell::Missing.is_vacant());
        assert!(Cell::text("  ").is_vacant());
        assert!(!SemanticType::Text.accepts(&Cell::Missing));
        assert_eq!(Cell::Missing.display(), "");
    }

    #[test]
    fn test_type_accepts() {
        assert!(SemanticType::Currency.accepts(&Cell::Number(1.0)));
        assert!(!SemanticType::Currency.accepts(&Cell::text("$1")));
        assert!(SemanticType::Period.accepts(&Cell::text("2023-Q1")));
        assert!(!SemanticType::Period.accepts(&Cell::text("FY23")));
        assert!(SemanticType::Text.accepts(&Cell::Number(3.0)));
        assert!(!SemanticType::Text.accepts(&Cell::Empty));
        assert!(SemanticType::Id.accepts(&Cell::Number(42.0)));
    }

    #[test]
    fn test_slice_rows_clamps() {
        let table = Table::new(vec!["a".into()], vec![vec![t("1")], vec![t("2")]]);
        assert_eq!(table.slice_rows(1, 10).height(), 1);
        assert_eq!(table.slice_rows(5, 10).height(), 0);
    }
}
