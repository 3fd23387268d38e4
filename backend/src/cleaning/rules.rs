//! Value-level parsing rules.
//!
//! Pure functions from a raw string (or number) to a typed value. The type
//! inferencer uses them to score columns; the cleaner uses them to convert
//! cells. Keeping both on the same rules means a column is only typed as
//! something the cleaner can actually produce.

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

/// Currency symbols recognised in front of or behind an amount.
pub const CURRENCY_SYMBOLS: [char; 8] = ['$', '€', '£', '¥', '₹', '₽', '₩', '₪'];

static CURRENCY_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(usd|eur|gbp|jpy|cad|aud|chf|inr|cny)\b").expect("valid currency code regex")
});

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid html regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:fy|cy)?\s*'?(\d{4})$").expect("valid year regex"));

static SHORT_FISCAL_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^fy\s*'?(\d{2})$").expect("valid fiscal year regex"));

static QUARTER_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^q([1-4])[\s\-/']*(?:fy)?\s*(\d{4})$").expect("valid quarter regex")
});

static YEAR_FIRST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d{4})[\s\-/]*q([1-4])$").expect("valid quarter regex"));

static NUMBERED_QUARTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^([1-4])q[\s\-/']*(\d{4})$").expect("valid quarter regex"));

static ID_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]{0,31}$").expect("valid id regex"));

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

// =============================================================================
// Numbers
// =============================================================================

/// Parse a plain number: thousands separators and inner whitespace are
/// ignored, `(123)` is negative. Non-finite results are rejected.
pub fn parse_plain_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    let (negative, inner) = match s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        Some(inner) => (true, inner.trim()),
        None => (false, s),
    };

    let cleaned: String = inner
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty()
        || !cleaned
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }

    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value.abs() } else { value })
}

// =============================================================================
// Currency
// =============================================================================

/// First currency symbol or ISO code found in the value.
pub fn currency_marker(raw: &str) -> Option<String> {
    if let Some(c) = raw.chars().find(|c| CURRENCY_SYMBOLS.contains(c)) {
        return Some(c.to_string());
    }
    CURRENCY_CODE
        .find(raw)
        .map(|m| m.as_str().to_uppercase())
}

/// `"$1,234.56"` -> `1234.56`, `"($500)"` -> `-500`, `"EUR 12"` -> `12`.
pub fn parse_currency(raw: &str) -> Option<f64> {
    let without_symbols: String = raw
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c))
        .collect();
    let without_codes = CURRENCY_CODE.replace_all(&without_symbols, "");
    parse_plain_number(&without_codes)
}

/// A value that carries a currency marker and parses as an amount.
pub fn is_currency_value(raw: &str) -> bool {
    currency_marker(raw).is_some() && parse_currency(raw).is_some()
}

// =============================================================================
// Percentages
// =============================================================================

fn strip_percent_suffix(raw: &str) -> (bool, String) {
    let lower = raw.trim().to_lowercase();
    for suffix in ["%", "per cent", "percent"] {
        if let Some(rest) = lower.strip_suffix(suffix) {
            return (true, rest.trim().to_string());
        }
    }
    (false, lower)
}

/// Value written with an explicit percent marker (`45%`, `12.5 percent`).
pub fn is_percentage_value(raw: &str) -> bool {
    let (marked, rest) = strip_percent_suffix(raw);
    marked && parse_plain_number(&rest).is_some()
}

/// `"45%"` -> `0.45`.
///
/// Unmarked values are divided by 100 too, unless `already_fractional` is
/// set and the value already lies in `[-1, 1]`.
pub fn parse_percentage(raw: &str, already_fractional: bool) -> Option<f64> {
    let (marked, rest) = strip_percent_suffix(raw);
    let value = parse_plain_number(&rest)?;
    if !marked && already_fractional && value.abs() <= 1.0 {
        Some(value)
    } else {
        Some(value / 100.0)
    }
}

// =============================================================================
// Dates
// =============================================================================

/// Parse with the first matching format. A trailing time part
/// (`2024-01-05 13:45`, `2024-01-05T13:45:00`) is ignored.
pub fn parse_date(raw: &str, formats: &[String]) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(date) = try_formats(s, formats) {
        return Some(date);
    }

    let date_part = s
        .rsplit_once(' ')
        .filter(|(_, time)| time.contains(':'))
        .map(|(date, _)| date)
        .or_else(|| s.split_once('T').filter(|(_, time)| time.contains(':')).map(|(date, _)| date))?;
    try_formats(date_part.trim(), formats)
}

fn try_formats(s: &str, formats: &[String]) -> Option<NaiveDate> {
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Excel serial day number (1900 date system) to a date.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// Numbers in a date column: `20240105` is read with the configured formats,
/// anything else as an Excel serial.
pub fn date_from_number(n: f64, formats: &[String]) -> Option<NaiveDate> {
    if n.fract() == 0.0 && (10_000_000.0..100_000_000.0).contains(&n) {
        if let Some(date) = try_formats(&format!("{}", n as i64), formats) {
            return Some(date);
        }
    }
    excel_serial_to_date(n)
}

// =============================================================================
// Periods
// =============================================================================

fn year_in_range(year: i32) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&year)
}

/// Canonical period label: `2023`, `FY2023` -> `2023`; `Q1 2023`,
/// `2023-Q1`, `1Q23`-style -> `2023-Q1`.
pub fn parse_period(raw: &str) -> Option<String> {
    let s = raw.trim();

    if let Some(caps) = YEAR.captures(s) {
        let year: i32 = caps[1].parse().ok()?;
        return year_in_range(year).then(|| year.to_string());
    }
    if let Some(caps) = SHORT_FISCAL_YEAR.captures(s) {
        let yy: i32 = caps[1].parse().ok()?;
        return Some((2000 + yy).to_string());
    }

    let (quarter, year) = if let Some(caps) = QUARTER_FIRST.captures(s) {
        (caps[1].to_string(), caps[2].to_string())
    } else if let Some(caps) = YEAR_FIRST.captures(s) {
        (caps[2].to_string(), caps[1].to_string())
    } else if let Some(caps) = NUMBERED_QUARTER.captures(s) {
        (caps[1].to_string(), caps[2].to_string())
    } else {
        return None;
    };

    let year_num: i32 = year.parse().ok()?;
    year_in_range(year_num).then(|| format!("{}-Q{}", year, quarter))
}

/// Integral numbers that look like a year.
pub fn period_from_number(n: f64) -> Option<String> {
    if n.fract() != 0.0 {
        return None;
    }
    let year = n as i32;
    year_in_range(year).then(|| year.to_string())
}

// =============================================================================
// Identifiers and text
// =============================================================================

/// Short alphanumeric token (letters, digits, `_`, `-`).
pub fn is_id_token(raw: &str) -> bool {
    ID_TOKEN.is_match(raw.trim())
}

/// Trim and collapse runs of whitespace.
pub fn collapse_whitespace(raw: &str) -> String {
    WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}

/// Strip HTML tags and collapse whitespace; `None` when nothing is left.
pub fn clean_text(raw: &str) -> Option<String> {
    let without_tags = HTML_TAG.replace_all(raw, " ");
    let collapsed = collapse_whitespace(&without_tags);
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Section label match: case-insensitive, ignoring a trailing colon.
pub fn matches_section_label<'a>(label: &str, vocabulary: &'a [String]) -> Option<&'a str> {
    let normalized = collapse_whitespace(label.trim().trim_end_matches(':'));
    vocabulary
        .iter()
        .find(|v| v.eq_ignore_ascii_case(&normalized))
        .map(String::as_str)
}
