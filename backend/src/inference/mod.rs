//! Semantic type inference.
//!
//! Each column is scored against every semantic type from a bounded sample
//! of its non-blank values:
//!
//! - **currency** - values carrying a currency marker that parse as amounts
//! - **percentage** - values with a `%` marker, or plain numbers in range when
//!   the header says "rate", "%", ...
//! - **date** - values parseable with one of the configured formats
//! - **period** - year / quarter labels (`2023`, `FY2023`, `Q1 2023`)
//! - **id** - unique short alphanumeric tokens
//! - **numeric** - plain numbers
//!
//! A header keyword adds `header_boost` to a type that already matched some
//! values. The best score at or above `min_confidence` wins, ties going to
//! the configured precedence order. Inference never fails: a column nothing
//! matches well enough becomes `text` with confidence 0.

use std::collections::HashSet;

use crate::cleaning::rules;
use crate::config::PipelineConfig;
use crate::models::{Cell, ColumnTypeInfo, RawTable, SemanticType, TypeScore};

/// Number of example values kept per column.
const SAMPLE_VALUES: usize = 5;

/// Share of values that must carry a `$` / `%` marker before unmarked
/// numbers in the same column count as currency / percentage.
const MARKER_SHARE: f64 = 0.2;

/// Minimum sample size for id detection.
const MIN_ID_SAMPLE: usize = 3;

/// Minimum distinct share for id detection.
const MIN_ID_UNIQUENESS: f64 = 0.9;

const SCORE_EPSILON: f64 = 1e-9;

/// Types that compete on score; `text` is the fallback.
const SCORED_TYPES: [SemanticType; 6] = [
    SemanticType::Currency,
    SemanticType::Percentage,
    SemanticType::Date,
    SemanticType::Period,
    SemanticType::Id,
    SemanticType::Numeric,
];

/// Assigns a [`SemanticType`] to every column of a table.
pub struct TypeInferencer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> TypeInferencer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// One [`ColumnTypeInfo`] per column, in column order.
    pub fn infer(&self, table: &RawTable) -> Vec<ColumnTypeInfo> {
        table
            .headers
            .iter()
            .enumerate()
            .map(|(index, name)| self.infer_column(index, name, table.column(index)))
            .collect()
    }

    /// Infer the type of a single column from its cells.
    pub fn infer_column<'c>(
        &self,
        index: usize,
        name: &str,
        cells: impl Iterator<Item = &'c Cell>,
    ) -> ColumnTypeInfo {
        let non_blank: Vec<&Cell> = cells.filter(|c| !c.is_blank()).collect();

        let mut info = ColumnTypeInfo::fixed(index, name, SemanticType::Text, "");
        info.non_blank = non_blank.len();
        info.unique = non_blank
            .iter()
            .map(|c| c.display())
            .collect::<HashSet<_>>()
            .len();
        info.sample_values = non_blank
            .iter()
            .take(SAMPLE_VALUES)
            .map(|c| c.display())
            .collect();

        if non_blank.is_empty() {
            info.confidence = 0.0;
            info.reasoning = "no non-blank values".to_string();
            return info;
        }

        let sample: Vec<&Cell> = non_blank
            .iter()
            .take(self.config.sample_size)
            .copied()
            .collect();

        let mut scores: Vec<TypeScore> = Vec::with_capacity(SCORED_TYPES.len());
        let mut boosted: Vec<SemanticType> = Vec::new();
        for semantic_type in SCORED_TYPES {
            let header_hit = self.header_signal(name, semantic_type);
            let mut score = self.match_rate(semantic_type, &sample, header_hit);
            if header_hit && score > 0.0 {
                score = (score + self.config.header_boost).min(1.0);
                boosted.push(semantic_type);
            }
            scores.push(TypeScore { semantic_type, score });
        }
        scores.sort_by_key(|s| self.config.precedence_rank(s.semantic_type));

        let qualifying: Vec<&TypeScore> = scores
            .iter()
            .filter(|s| s.score >= self.config.min_confidence)
            .collect();

        // Sorted by precedence, so the first maximum wins ties.
        let best = scores
            .iter()
            .fold(None::<&TypeScore>, |best, s| match best {
                Some(b) if s.score <= b.score + SCORE_EPSILON => Some(b),
                _ => Some(s),
            });
        let best_score = best.map_or(0.0, |b| b.score);

        match qualifying.iter().find(|s| (s.score - best_score).abs() <= SCORE_EPSILON) {
            Some(winner) => {
                info.semantic_type = winner.semantic_type;
                info.confidence = winner.score;
                let tied: Vec<&str> = qualifying
                    .iter()
                    .filter(|s| {
                        s.semantic_type != winner.semantic_type
                            && (s.score - winner.score).abs() <= SCORE_EPSILON
                    })
                    .map(|s| s.semantic_type.as_str())
                    .collect();
                info.ambiguous = !tied.is_empty();
                info.reasoning = format!(
                    "{:.0}% of {} sampled values match {}",
                    winner.score.min(1.0) * 100.0,
                    sample.len(),
                    winner.semantic_type
                );
                if boosted.contains(&winner.semantic_type) {
                    info.reasoning.push_str(" (header keyword)");
                }
                if !tied.is_empty() {
                    info.reasoning
                        .push_str(&format!("; tied with {} (precedence)", tied.join(", ")));
                }
            }
            None => {
                info.confidence = 0.0;
                info.ambiguous = best_score > 0.0;
                info.reasoning = match best {
                    Some(b) if b.score > 0.0 => format!(
                        "best candidate {} scored {:.2}, below {:.2}",
                        b.semantic_type, b.score, self.config.min_confidence
                    ),
                    _ => "no pattern matched".to_string(),
                };
            }
        }

        if info.semantic_type == SemanticType::Currency {
            info.currency_symbol = sample
                .iter()
                .filter_map(|c| c.as_text())
                .find_map(rules::currency_marker);
        }
        info.scores = scores;
        info
    }

    /// Whether the header contains one of the type's keywords.
    fn header_signal(&self, header: &str, semantic_type: SemanticType) -> bool {
        let lower = header.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        self.config.keywords(semantic_type).iter().any(|keyword| {
            let keyword = keyword.to_lowercase();
            if keyword.chars().all(char::is_alphanumeric) {
                tokens
                    .iter()
                    .any(|t| *t == keyword || t.strip_suffix('s') == Some(keyword.as_str()))
            } else {
                lower.contains(&keyword)
            }
        })
    }

    /// Fraction of sampled values consistent with a type, before header boost.
    fn match_rate(&self, semantic_type: SemanticType, sample: &[&Cell], header_hit: bool) -> f64 {
        let n = sample.len();
        if n == 0 {
            return 0.0;
        }
        let rate = |count: usize| count as f64 / n as f64;

        match semantic_type {
            SemanticType::Currency => {
                let marked = count(sample, |c| c.as_text().is_some_and(rules::is_currency_value));
                if rate(marked) >= MARKER_SHARE {
                    rate(count(sample, |c| match c {
                        Cell::Number(_) => true,
                        Cell::Text(s) => rules::parse_currency(s).is_some(),
                        _ => false,
                    }))
                } else {
                    rate(marked)
                }
            }
            SemanticType::Percentage => {
                let marked = count(sample, |c| c.as_text().is_some_and(rules::is_percentage_value));
                if rate(marked) >= MARKER_SHARE {
                    rate(count(sample, |c| match c {
                        Cell::Number(_) => true,
                        Cell::Text(s) => rules::parse_percentage(s, false).is_some(),
                        _ => false,
                    }))
                } else if header_hit {
                    rate(count(sample, |c| {
                        plain_number(c).is_some_and(|v| (-100.0..=100.0).contains(&v))
                    }))
                } else {
                    rate(marked)
                }
            }
            SemanticType::Date => rate(count(sample, |c| match c {
                Cell::Date(_) => true,
                Cell::Text(s) => rules::parse_date(s, &self.config.date_formats).is_some(),
                Cell::Number(n) => {
                    header_hit && rules::date_from_number(*n, &self.config.date_formats).is_some()
                }
                Cell::Empty | Cell::Missing => false,
            })),
            SemanticType::Period => rate(count(sample, |c| match c {
                Cell::Text(s) => rules::parse_period(s).is_some(),
                Cell::Number(n) => rules::period_from_number(*n).is_some(),
                _ => false,
            })),
            SemanticType::Id => self.id_rate(sample, header_hit),
            SemanticType::Numeric => rate(count(sample, |c| plain_number(c).is_some())),
            SemanticType::Text => 0.0,
        }
    }

    fn id_rate(&self, sample: &[&Cell], header_hit: bool) -> f64 {
        let n = sample.len();
        if n < MIN_ID_SAMPLE {
            return 0.0;
        }
        let distinct = sample.iter().map(|c| c.display()).collect::<HashSet<_>>().len();
        if (distinct as f64 / n as f64) < MIN_ID_UNIQUENESS {
            return 0.0;
        }

        let mixed = count(sample, |c| {
            c.as_text().is_some_and(|s| {
                s.chars().any(|ch| ch.is_ascii_alphabetic()) && s.chars().any(|ch| ch.is_ascii_digit())
            })
        });
        if mixed * 2 < n && !header_hit {
            return 0.0;
        }

        let tokens = count(sample, |c| match c {
            Cell::Text(s) => rules::is_id_token(s),
            Cell::Number(v) => v.fract() == 0.0,
            _ => false,
        });
        tokens as f64 / n as f64
    }
}

fn count(sample: &[&Cell], pred: impl Fn(&Cell) -> bool) -> usize {
    sample.iter().filter(|c| pred(c)).count()
}

fn plain_number(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Number(n) => Some(*n),
        Cell::Text(s) => rules::parse_plain_number(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Table;

    fn column(values: &[&str]) -> Vec<Cell> {
        values.iter().map(|v| Cell::from_raw(v)).collect()
    }

    fn infer(header: &str, values: &[&str]) -> ColumnTypeInfo {
        let config = PipelineConfig::default();
        let cells = column(values);
        TypeInferencer::new(&config).infer_column(0, header, cells.iter())
    }

    #[test]
    fn test_currency_column() {
        let info = infer("2023", &["$1,990", "($500)", "$12.50", "$0"]);
        assert_eq!(info.semantic_type, SemanticType::Currency);
        assert_eq!(info.confidence, 1.0);
        assert_eq!(info.currency_symbol.as_deref(), Some("$"));
    }

    #[test]
    fn test_mixed_marked_and_plain_amounts_are_currency() {
        let info = infer("Q1", &["$1,990", "1,500", "2,000", "$300"]);
        assert_eq!(info.semantic_type, SemanticType::Currency);
    }

    #[test]
    fn test_percentage_column() {
        let info = infer("Share", &["45%", "12.5%", "100%"]);
        assert_eq!(info.semantic_type, SemanticType::Percentage);
    }

    #[test]
    fn test_percentage_from_header_and_range() {
        let info = infer("Growth rate", &["4.5", "12", "-3"]);
        assert_eq!(info.semantic_type, SemanticType::Percentage);
        assert!(info.reasoning.contains("header keyword"));

        let plain = infer("Units", &["4.5", "12", "-3"]);
        assert_eq!(plain.semantic_type, SemanticType::Numeric);
    }

    #[test]
    fn test_date_column() {
        let info = infer("Posted", &["2024-01-05", "2024-02-10", "03/15/2024"]);
        assert_eq!(info.semantic_type, SemanticType::Date);
    }

    #[test]
    fn test_period_beats_numeric_on_tie() {
        let info = infer("Year", &["2021", "2022", "2023"]);
        assert_eq!(info.semantic_type, SemanticType::Period);
        assert!(info.ambiguous);
    }

    #[test]
    fn test_id_column() {
        let info = infer("Invoice", &["INV-001", "INV-002", "INV-003", "INV-004"]);
        assert_eq!(info.semantic_type, SemanticType::Id);
    }

    #[test]
    fn test_labels_are_text_not_id() {
        let info = infer("Item", &["Cash", "Receivables", "Inventory", "Land"]);
        assert_eq!(info.semantic_type, SemanticType::Text);
        assert_eq!(info.confidence, 0.0);
        assert!(!info.ambiguous);
    }

    #[test]
    fn test_numeric_column() {
        let info = infer("Units", &["1,200", "35", "(4)", "7.25"]);
        assert_eq!(info.semantic_type, SemanticType::Numeric);
    }

    #[test]
    fn test_empty_column_defaults_to_text_with_zero_confidence() {
        let info = infer("Notes", &["", "  "]);
        assert_eq!(info.semantic_type, SemanticType::Text);
        assert_eq!(info.confidence, 0.0);
        assert_eq!(info.non_blank, 0);
    }

    #[test]
    fn test_weak_match_is_ambiguous_text() {
        let info = infer("Mixed", &["12", "apple", "pear", "plum", "fig"]);
        assert_eq!(info.semantic_type, SemanticType::Text);
        assert!(info.ambiguous);
        assert_eq!(info.confidence, 0.0);
    }

    #[test]
    fn test_unparsable_amounts_are_text_with_zero_confidence() {
        let info = infer("Amount", &["n/a", "TBD", "pending", "see note"]);
        assert_eq!(info.semantic_type, SemanticType::Text);
        assert_eq!(info.confidence, 0.0);
        assert!(info.reasoning.contains("no pattern matched"));
    }

    #[test]
    fn test_custom_precedence_breaks_ties() {
        let config = PipelineConfig {
            type_precedence: vec![
                SemanticType::Numeric,
                SemanticType::Period,
                SemanticType::Currency,
                SemanticType::Percentage,
                SemanticType::Date,
                SemanticType::Id,
                SemanticType::Text,
            ],
            ..PipelineConfig::default()
        };
        let cells = column(&["2021", "2022", "2023"]);
        let info = TypeInferencer::new(&config).infer_column(0, "Year", cells.iter());

        assert_eq!(info.semantic_type, SemanticType::Numeric);
        assert!(info.ambiguous);
        assert!(info.reasoning.contains("tied with period"));
        assert_eq!(info.scores[0].semantic_type, SemanticType::Numeric);
    }

    #[test]
    fn test_sample_values_and_counts() {
        let info = infer("Code", &["a", "b", "a", "", "c", "d", "e", "f"]);
        assert_eq!(info.non_blank, 7);
        assert_eq!(info.unique, 6);
        assert_eq!(info.sample_values.len(), 5);
    }

    #[test]
    fn test_infer_table_is_deterministic() {
        let table = Table::from_rows(vec![
            column(&["Item", "2022", "Rate"]),
            column(&["Cash", "$10", "5%"]),
            column(&["Land", "$20", "7%"]),
        ]);
        let config = PipelineConfig::default();
        let inferencer = TypeInferencer::new(&config);

        let first = inferencer.infer(&table);
        let second = inferencer.infer(&table);
        assert_eq!(first, second);
        let types: Vec<SemanticType> = first.iter().map(|i| i.semantic_type).collect();
        assert_eq!(
            types,
            vec![SemanticType::Text, SemanticType::Currency, SemanticType::Percentage]
        );
    }

    #[test]
    fn test_excel_numbers_under_date_header() {
        let config = PipelineConfig::default();
        let cells = vec![Cell::Number(45296.0), Cell::Number(45300.0)];
        let info = TypeInferencer::new(&config).infer_column(0, "Invoice date", cells.iter());
        assert_eq!(info.semantic_type, SemanticType::Date);
    }
}
