//! Descriptive statistics: numbers, dates and text lengths.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ProfilingError;

/// Values outside `[q1 - 1.5 * iqr, q3 + 1.5 * iqr]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutlierSummary {
    pub count: usize,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Summary statistics of a numeric column (missing values excluded).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    /// Sample standard deviation; `None` below two values.
    pub std_dev: Option<f64>,
    pub variance: Option<f64>,
    /// Adjusted Fisher-Pearson skewness; `None` below three values or
    /// without spread.
    pub skewness: Option<f64>,
    /// Most frequent value, smallest on ties; `None` when all values are distinct.
    pub mode: Option<f64>,
    pub outliers: OutlierSummary,
}

impl NumericStats {
    pub fn compute(column: &str, values: &[f64]) -> Result<Self, ProfilingError> {
        if values.is_empty() {
            return Err(ProfilingError::InsufficientData {
                what: format!("statistics of '{}'", column),
                needed: 1,
                have: 0,
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ProfilingError::NonFinite { column: column.to_string() });
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let mean = mean(values);
        if !mean.is_finite() {
            return Err(ProfilingError::NonFinite { column: column.to_string() });
        }
        let q1 = quantile(&sorted, 0.25);
        let q3 = quantile(&sorted, 0.75);
        let iqr = q3 - q1;
        let variance = variance(values, mean);
        let std_dev = variance.map(f64::sqrt);

        let lower_bound = q1 - 1.5 * iqr;
        let upper_bound = q3 + 1.5 * iqr;
        let outliers = OutlierSummary {
            count: values
                .iter()
                .filter(|v| **v < lower_bound || **v > upper_bound)
                .count(),
            lower_bound,
            upper_bound,
        };

        Ok(Self {
            count: values.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean,
            median: quantile(&sorted, 0.5),
            q1,
            q3,
            iqr,
            std_dev,
            variance,
            skewness: skewness(values, mean, std_dev),
            mode: mode(&sorted),
            outliers,
        })
    }
}

/// Span of a date column (missing values excluded).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DateStats {
    pub count: usize,
    pub min: NaiveDate,
    pub max: NaiveDate,
    /// `max - min` in days.
    pub range_days: i64,
    pub unique: usize,
}

impl DateStats {
    pub fn compute(column: &str, dates: &[NaiveDate]) -> Result<Self, ProfilingError> {
        let (min, max) = match (dates.iter().min(), dates.iter().max()) {
            (Some(min), Some(max)) => (*min, *max),
            _ => {
                return Err(ProfilingError::InsufficientData {
                    what: format!("date range of '{}'", column),
                    needed: 1,
                    have: 0,
                })
            }
        };
        Ok(Self {
            count: dates.len(),
            min,
            max,
            range_days: (max - min).num_days(),
            unique: dates.iter().collect::<HashSet<_>>().len(),
        })
    }
}

/// Length statistics of a text column, in characters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextStats {
    pub count: usize,
    pub min_length: usize,
    pub max_length: usize,
    pub mean_length: f64,
}

impl TextStats {
    pub fn compute<'a>(column: &str, values: impl IntoIterator<Item = &'a str>) -> Result<Self, ProfilingError> {
        let lengths: Vec<usize> = values.into_iter().map(|v| v.chars().count()).collect();
        let (min_length, max_length) = match (lengths.iter().min(), lengths.iter().max()) {
            (Some(min), Some(max)) => (*min, *max),
            _ => {
                return Err(ProfilingError::InsufficientData {
                    what: format!("text lengths of '{}'", column),
                    needed: 1,
                    have: 0,
                })
            }
        };
        Ok(Self {
            count: lengths.len(),
            min_length,
            max_length,
            mean_length: lengths.iter().sum::<usize>() as f64 / lengths.len() as f64,
        })
    }
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Linear interpolation between closest ranks (`sorted` must be ascending).
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Sample variance (n - 1).
pub fn variance(values: &[f64], mean: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some(sum_sq / (values.len() - 1) as f64)
}

fn skewness(values: &[f64], mean: f64, std_dev: Option<f64>) -> Option<f64> {
    let n = values.len() as f64;
    let s = std_dev.filter(|s| *s > 0.0)?;
    if values.len() < 3 {
        return None;
    }
    let sum_cubed: f64 = values.iter().map(|v| ((v - mean) / s).powi(3)).sum();
    Some(n / ((n - 1.0) * (n - 2.0)) * sum_cubed)
}

fn mode(sorted: &[f64]) -> Option<f64> {
    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < sorted.len() {
        let run = sorted[i..].iter().take_while(|v| **v == sorted[i]).count();
        if run > 1 && best.map_or(true, |(_, n)| run > n) {
            best = Some((sorted[i], run));
        }
        i += run;
    }
    best.map(|(v, _)| v)
}

/// Pearson correlation over pairwise-complete observations.
///
/// `None` with fewer than two pairs or when either side has no variance.
pub fn pearson(xs: &[Option<f64>], ys: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    let r = cov / (var_x.sqrt() * var_y.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_basic_stats() {
        let stats = NumericStats::compute("v", &[1.0, 2.0, 3.0, 4.0, 100.0]).unwrap();

        assert_eq!(stats.count, 5);
        assert!(close(stats.mean, 22.0));
        assert!(close(stats.median, 3.0));
        assert!(close(stats.q1, 2.0));
        assert!(close(stats.q3, 4.0));
        assert!(close(stats.iqr, 2.0));
        assert_eq!(stats.outliers.count, 1);
        assert!(close(stats.outliers.upper_bound, 7.0));
        assert!(stats.skewness.unwrap() > 0.0);
        assert_eq!(stats.mode, None);
    }

    #[test]
    fn test_quantile_interpolates() {
        assert!(close(quantile(&[1.0, 2.0, 3.0, 4.0], 0.5), 2.5));
        assert!(close(quantile(&[7.0], 0.25), 7.0));
    }

    #[test]
    fn test_variance_and_mode() {
        let stats = NumericStats::compute("v", &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!(close(stats.variance.unwrap(), 32.0 / 7.0));
        assert_eq!(stats.mode, Some(4.0));
    }

    #[test]
    fn test_single_value() {
        let stats = NumericStats::compute("v", &[3.0]).unwrap();
        assert_eq!(stats.std_dev, None);
        assert_eq!(stats.skewness, None);
        assert!(close(stats.median, 3.0));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            NumericStats::compute("v", &[]),
            Err(ProfilingError::InsufficientData { have: 0, .. })
        ));
        assert!(matches!(
            NumericStats::compute("v", &[f64::MAX, f64::MAX]),
            Err(ProfilingError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_pearson() {
        let x = [Some(1.0), Some(2.0), Some(3.0), None];
        let y = [Some(2.0), Some(4.0), Some(6.0), Some(100.0)];
        assert!(close(pearson(&x, &y).unwrap(), 1.0));

        let inverse = [Some(3.0), Some(2.0), Some(1.0), Some(0.0)];
        assert!(close(pearson(&x, &inverse).unwrap(), -1.0));

        let flat = [Some(5.0), Some(5.0), Some(5.0), Some(5.0)];
        assert_eq!(pearson(&x, &flat), None);
    }

    #[test]
    fn test_date_stats() {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let stats = DateStats::compute("posted", &[d(3, 1), d(1, 1), d(3, 1)]).unwrap();

        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, d(1, 1));
        assert_eq!(stats.max, d(3, 1));
        assert_eq!(stats.range_days, 60);
        assert_eq!(stats.unique, 2);
        assert!(DateStats::compute("posted", &[]).is_err());
    }

    #[test]
    fn test_text_stats() {
        let stats = TextStats::compute("note", ["a", "abcd", "café"]).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min_length, 1);
        assert_eq!(stats.max_length, 4);
        assert!(close(stats.mean_length, 3.0));
        assert!(TextStats::compute("note", Vec::<&str>::new()).is_err());
    }
}
