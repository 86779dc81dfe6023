//! Windowed attendance rates and score-trend comparisons.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::models::{clamp_pct, round1, AssessmentRecord, AttendanceRecord, AttendanceStatus};
use crate::smoothing::{ewma, percentages, DEFAULT_ALPHA};

pub const ATTENDANCE_WINDOW_DAYS: i64 = 14;
pub const TREND_BLOCK: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct AttendanceWindow {
    pub recent: Option<f64>,
    pub prior: Option<f64>,
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct ScoreTrend {
    pub recent_avg: Option<f64>,
    pub prior_avg: Option<f64>,
    pub delta: Option<f64>,
}

/// Present/total rate for the two adjacent windows ending `today`.
///
/// Recent covers `(today - days, today]`, prior covers `(today - 2*days, today - days]`.
pub fn attendance_window(
    records: &[AttendanceRecord],
    today: NaiveDate,
    days: i64,
) -> AttendanceWindow {
    let days = days.max(1);
    let recent_start = today - Duration::days(days);
    let prior_start = today - Duration::days(days * 2);

    let mut recent = (0usize, 0usize);
    let mut prior = (0usize, 0usize);

    for record in records {
        let bucket = if record.date > recent_start && record.date <= today {
            &mut recent
        } else if record.date > prior_start && record.date <= recent_start {
            &mut prior
        } else {
            continue;
        };
        bucket.1 += 1;
        if record.status == AttendanceStatus::Present {
            bucket.0 += 1;
        }
    }

    let recent = rate(recent);
    let prior = rate(prior);
    let delta = match (recent, prior) {
        (Some(r), Some(p)) => Some(round1(r - p)),
        _ => None,
    };

    AttendanceWindow { recent, prior, delta }
}

fn rate((present, total): (usize, usize)) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(round1(clamp_pct(present as f64 / total as f64 * 100.0)))
}

/// Compares the smoothed average of the newest `n` scores against the `n` before them.
pub fn score_trend(
    assessments: &[AssessmentRecord],
    subject: Option<&str>,
    n: usize,
) -> ScoreTrend {
    let n = n.max(1);
    let chronological = percentages(assessments, subject);
    let start = chronological.len().saturating_sub(n * 2);
    let window = &chronological[start..];

    if window.len() < 2 {
        return ScoreTrend::default();
    }

    let mut smoothed = ewma(window, DEFAULT_ALPHA);
    smoothed.reverse();

    let (recent, prior) = smoothed.split_at(n.min(smoothed.len()));
    if prior.is_empty() {
        return ScoreTrend::default();
    }

    let recent_avg = round1(mean(recent));
    let prior_avg = round1(mean(prior));
    ScoreTrend {
        recent_avg: Some(recent_avg),
        prior_avg: Some(prior_avg),
        delta: Some(round1(recent_avg - prior_avg)),
    }
}

/// Recent average used by the narrative and prescriptive layers.
///
/// Falls back to the plain mean when there is too little history for a trend.
pub fn recent_subject_average(assessments: &[AssessmentRecord], subject: &str) -> Option<f64> {
    if let Some(avg) = score_trend(assessments, Some(subject), TREND_BLOCK).recent_avg {
        return Some(avg);
    }
    let values = percentages(assessments, Some(subject));
    if values.is_empty() {
        None
    } else {
        Some(round1(mean(&values)))
    }
}

/// Plain mean of every assessment percentage.
pub fn overall_average(assessments: &[AssessmentRecord]) -> Option<f64> {
    let values = percentages(assessments, None);
    if values.is_empty() {
        None
    } else {
        Some(round1(mean(&values)))
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn mark(days_ago: i64, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            date: Utc::now().date_naive() - Duration::days(days_ago),
            status,
        }
    }

    fn run(present: usize, absent: usize, days_ago: i64) -> Vec<AttendanceRecord> {
        let mut records = Vec::new();
        for _ in 0..present {
            records.push(mark(days_ago, AttendanceStatus::Present));
        }
        for _ in 0..absent {
            records.push(mark(days_ago, AttendanceStatus::Absent));
        }
        records
    }

    fn scores(values: &[f64]) -> Vec<AssessmentRecord> {
        let start = Utc::now().date_naive() - Duration::days(60);
        values
            .iter()
            .enumerate()
            .map(|(idx, score)| AssessmentRecord {
                student_id: Uuid::nil(),
                subject: "Maths".to_string(),
                score: *score,
                max_score: 100.0,
                date: start + Duration::days(idx as i64),
            })
            .collect()
    }

    #[test]
    fn windows_compare_recent_against_prior() {
        let today = Utc::now().date_naive();
        let mut records = run(9, 1, 3);
        records.extend(run(6, 4, 20));

        let window = attendance_window(&records, today, ATTENDANCE_WINDOW_DAYS);
        assert_eq!(window.recent, Some(90.0));
        assert_eq!(window.prior, Some(60.0));
        assert_eq!(window.delta, Some(30.0));
    }

    #[test]
    fn empty_window_has_no_delta() {
        let today = Utc::now().date_naive();
        let records = run(3, 1, 2);

        let window = attendance_window(&records, today, ATTENDANCE_WINDOW_DAYS);
        assert_eq!(window.recent, Some(75.0));
        assert_eq!(window.prior, None);
        assert_eq!(window.delta, None);
    }

    #[test]
    fn window_boundaries_do_not_overlap() {
        let today = Utc::now().date_naive();
        let mut records = run(1, 0, 14);
        records.extend(run(0, 1, 28));
        records.extend(run(0, 5, 29));

        let window = attendance_window(&records, today, 14);
        assert_eq!(window.recent, None);
        assert_eq!(window.prior, Some(100.0));
    }

    #[test]
    fn rates_stay_in_range() {
        let today = Utc::now().date_naive();
        for present in 0..5 {
            let records = run(present, 4 - present, 1);
            let rate = attendance_window(&records, today, 14).recent.unwrap();
            assert!((0.0..=100.0).contains(&rate));
        }
    }

    #[test]
    fn trend_needs_prior_block() {
        assert_eq!(score_trend(&scores(&[70.0]), None, 3), ScoreTrend::default());
        assert_eq!(score_trend(&scores(&[70.0, 60.0, 50.0]), None, 3), ScoreTrend::default());
    }

    #[test]
    fn trend_uses_smoothed_blocks() {
        let records = scores(&[50.0, 50.0, 50.0, 80.0, 80.0, 80.0]);
        let trend = score_trend(&records, Some("Maths"), 3);
        let recent = trend.recent_avg.unwrap();
        let prior = trend.prior_avg.unwrap();
        assert_eq!(prior, 50.0);
        assert!(recent > 50.0 && recent < 80.0);
        assert_eq!(trend.delta, Some(round1(recent - prior)));
    }

    #[test]
    fn trend_only_reads_last_two_blocks() {
        let records = scores(&[10.0, 10.0, 60.0, 60.0, 60.0, 60.0, 60.0, 60.0]);
        let trend = score_trend(&records, None, 3);
        assert_eq!(trend.delta, Some(0.0));
    }

    #[test]
    fn recent_average_falls_back_to_plain_mean() {
        let records = scores(&[40.0, 60.0]);
        assert_eq!(recent_subject_average(&records, "Maths"), Some(50.0));
        assert_eq!(recent_subject_average(&records, "Art"), None);
        assert_eq!(overall_average(&records), Some(50.0));
    }
}
