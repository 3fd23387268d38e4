//! Pipeline configuration.
//!
//! Everything that tunes detection, cleaning and scoring lives in
//! [`PipelineConfig`]. The orchestrator receives it explicitly and shares it
//! read-only between sheet workers; nothing here is global.

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::models::SemanticType;
use crate::pipeline::FallbackLevel;

/// 50 MiB.
pub const DEFAULT_MAX_FILE_BYTES: usize = 50 * 1024 * 1024;

/// Weights of the three quality components. Any positive scale works;
/// they are normalized by their sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub completeness: f64,
    pub consistency: f64,
    pub uniqueness: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: 50.0,
            consistency: 35.0,
            uniqueness: 15.0,
        }
    }
}

impl QualityWeights {
    pub fn total(&self) -> f64 {
        self.completeness + self.consistency + self.uniqueness
    }
}

/// Options for the processing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Inputs above this size are rejected unless chunked mode is requested.
    pub max_file_bytes: usize,

    /// Rows per batch at the chunked fallback level.
    pub chunk_size: usize,

    /// Above this many cells the full pipeline refuses the sheet and the
    /// ladder escalates to chunked processing.
    pub full_pipeline_max_cells: usize,

    /// Non-blank values sampled per column for type inference.
    pub sample_size: usize,

    /// Minimum score a type needs to be selected over `text`.
    pub min_confidence: f64,

    /// Added to a type's score when the header contains one of its keywords.
    pub header_boost: f64,

    /// Tie-break order between equally scored types.
    pub type_precedence: Vec<SemanticType>,

    /// Header keywords per semantic type.
    pub header_keywords: BTreeMap<SemanticType, Vec<String>>,

    /// Labels that mark section header rows (matched case-insensitively).
    pub section_labels: Vec<String>,

    /// Accepted date formats, tried in order.
    pub date_formats: Vec<String>,

    /// Treat bare percentage values in `[-1, 1]` as already fractional.
    pub percent_already_fractional: bool,

    pub quality_weights: QualityWeights,

    /// Minimum number of period-headed columns for a table to count as wide.
    pub min_wide_columns: usize,

    /// Absolute correlation above which a pair is reported as strong.
    pub strong_correlation: f64,

    /// Fallback levels, tried in order.
    pub fallback_ladder: Vec<FallbackLevel>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            chunk_size: 5_000,
            full_pipeline_max_cells: 2_000_000,
            sample_size: 200,
            min_confidence: 0.6,
            header_boost: 0.2,
            type_precedence: SemanticType::PRECEDENCE.to_vec(),
            header_keywords: default_header_keywords(),
            section_labels: to_strings(&[
                "Assets",
                "Liabilities",
                "Equity",
                "Revenue",
                "Expenses",
                "Income",
                "Cash Flow",
                "Operating Activities",
                "Investing Activities",
                "Financing Activities",
            ]),
            date_formats: to_strings(&[
                "%Y-%m-%d",
                "%Y/%m/%d",
                "%m/%d/%Y",
                "%d/%m/%Y",
                "%m-%d-%Y",
                "%d-%m-%Y",
                "%Y.%m.%d",
                "%d.%m.%Y",
                "%d %b %Y",
                "%b %d, %Y",
                "%d %B %Y",
                "%B %d, %Y",
                "%Y%m%d",
            ]),
            percent_already_fractional: false,
            quality_weights: QualityWeights::default(),
            min_wide_columns: 2,
            strong_correlation: 0.7,
            fallback_ladder: FallbackLevel::ALL.to_vec(),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_header_keywords() -> BTreeMap<SemanticType, Vec<String>> {
    let mut keywords = BTreeMap::new();
    keywords.insert(
        SemanticType::Currency,
        to_strings(&[
            "amount", "price", "cost", "revenue", "salary", "budget", "balance", "sales",
            "income", "expense", "expenses", "total", "usd", "eur", "gbp", "$",
        ]),
    );
    keywords.insert(
        SemanticType::Percentage,
        to_strings(&["%", "percent", "percentage", "pct", "rate", "ratio", "margin", "growth", "share"]),
    );
    keywords.insert(
        SemanticType::Date,
        to_strings(&["date", "day", "time", "timestamp", "created", "updated", "dob"]),
    );
    keywords.insert(
        SemanticType::Period,
        to_strings(&["year", "period", "quarter", "fy", "fiscal"]),
    );
    keywords.insert(
        SemanticType::Id,
        to_strings(&["id", "key", "code", "identifier", "uuid", "sku", "ref", "number"]),
    );
    keywords.insert(
        SemanticType::Numeric,
        to_strings(&["count", "qty", "quantity", "units", "number", "score"]),
    );
    keywords
}

impl PipelineConfig {
    /// Parse a config from JSON. Missing fields take their default.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Override selected fields from `SHEETCLEAN_*` environment variables.
    pub fn apply_env(mut self) -> ConfigResult<Self> {
        if let Some(v) = env_var("SHEETCLEAN_MAX_FILE_BYTES") {
            self.max_file_bytes = parse_env("SHEETCLEAN_MAX_FILE_BYTES", &v)?;
        }
        if let Some(v) = env_var("SHEETCLEAN_CHUNK_SIZE") {
            self.chunk_size = parse_env("SHEETCLEAN_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = env_var("SHEETCLEAN_PERCENT_FRACTIONAL") {
            self.percent_already_fractional = parse_env("SHEETCLEAN_PERCENT_FRACTIONAL", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings the pipeline cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be > 0".into()));
        }
        if self.sample_size == 0 {
            return Err(ConfigError::Invalid("sample_size must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::Invalid("min_confidence must be within [0, 1]".into()));
        }
        let w = &self.quality_weights;
        if w.completeness < 0.0 || w.consistency < 0.0 || w.uniqueness < 0.0 {
            return Err(ConfigError::Invalid("quality weights must be non-negative".into()));
        }
        if w.total() <= 0.0 {
            return Err(ConfigError::Invalid("quality weights must not all be zero".into()));
        }
        if self.type_precedence.is_empty() {
            return Err(ConfigError::Invalid("type_precedence must not be empty".into()));
        }
        if self.fallback_ladder.is_empty() {
            return Err(ConfigError::Invalid("fallback_ladder must not be empty".into()));
        }
        if let Some(bad) = self.date_formats.iter().find(|f| !is_valid_date_format(f)) {
            return Err(ConfigError::Invalid(format!("invalid date format '{}'", bad)));
        }
        Ok(())
    }

    /// Keywords for a type, or an empty slice.
    pub fn keywords(&self, semantic_type: SemanticType) -> &[String] {
        self.header_keywords
            .get(&semantic_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Position of a type in the precedence list; unknown types sort last.
    pub fn precedence_rank(&self, semantic_type: SemanticType) -> usize {
        self.type_precedence
            .iter()
            .position(|t| *t == semantic_type)
            .unwrap_or(self.type_precedence.len())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} has invalid value '{}'", name, value)))
}

fn is_valid_date_format(fmt: &str) -> bool {
    !fmt.is_empty() && !StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error))
}
