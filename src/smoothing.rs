//! Numeric primitives shared by the windowed metrics and the forecasts.

use crate::models::AssessmentRecord;

pub const DEFAULT_ALPHA: f64 = 0.35;

/// Ordinary-least-squares slope of `(x, y)` pairs.
///
/// Returns 0.0 with fewer than two points or when every x is the same.
pub fn linear_slope(pairs: &[(f64, f64)]) -> f64 {
    if pairs.len() < 2 {
        return 0.0;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (x, y) in pairs {
        covariance += (x - mean_x) * (y - mean_y);
        variance += (x - mean_x).powi(2);
    }

    if variance.abs() < f64::EPSILON {
        return 0.0;
    }
    covariance / variance
}

/// Exponentially weighted moving average over a chronological series.
pub fn ewma(values: &[f64], alpha: f64) -> Vec<f64> {
    let mut smoothed = Vec::with_capacity(values.len());
    let mut previous: Option<f64> = None;

    for &raw in values {
        let next = match previous {
            None => raw,
            Some(prev) => alpha * raw + (1.0 - alpha) * prev,
        };
        smoothed.push(next);
        previous = Some(next);
    }

    smoothed
}

/// Chronological percentages for one subject, or all subjects when `subject` is `None`.
///
/// `assessments` must already be ordered oldest first.
pub fn percentages(assessments: &[AssessmentRecord], subject: Option<&str>) -> Vec<f64> {
    assessments
        .iter()
        .filter(|record| subject.map_or(true, |s| record.subject == s))
        .map(AssessmentRecord::percentage)
        .collect()
}

/// Slope of percentage against sequential assessment index (1..n).
pub fn score_slope(assessments: &[AssessmentRecord], subject: Option<&str>) -> f64 {
    let pairs: Vec<(f64, f64)> = percentages(assessments, subject)
        .into_iter()
        .enumerate()
        .map(|(idx, pct)| ((idx + 1) as f64, pct))
        .collect();
    linear_slope(&pairs)
}

/// Mean of chronological percentages, weighting the i-th oldest of n by `1 + i/n`.
///
/// Weights climb linearly from 1 toward 2, so the newest score counts nearly double.
pub fn recency_weighted_avg(
    assessments: &[AssessmentRecord],
    subject: Option<&str>,
) -> Option<f64> {
    let values = percentages(assessments, subject);
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for (idx, value) in values.iter().enumerate() {
        let weight = 1.0 + idx as f64 / n;
        weighted += value * weight;
        total_weight += weight;
    }
    Some(weighted / total_weight)
}
