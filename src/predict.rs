//! Pass-probability forecasts per subject and the composite dropout-risk score.

use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::db;
use crate::error::EngineResult;
use crate::models::{
    round1, DropoutRisk, PredictionResult, PredictionStatus, StudentRecords, StudentRiskProfile,
};
use crate::risk::{dropout_level, dropout_score};
use crate::smoothing::{ewma, percentages, recency_weighted_avg, score_slope, DEFAULT_ALPHA};
use crate::windows::{attendance_window, ATTENDANCE_WINDOW_DAYS};

const NEUTRAL_PROBABILITY: f64 = 50.0;
const MIN_PROBABILITY: f64 = 3.0;
const MAX_PROBABILITY: f64 = 97.0;
const SLOPE_WEIGHT: f64 = 3.0;
const MAX_SLOPE_BONUS: f64 = 15.0;
const FULL_CONFIDENCE_ASSESSMENTS: f64 = 4.0;
const EXCELLENT_ATTENDANCE: f64 = 85.0;
const EXCELLENT_ATTENDANCE_BONUS: f64 = 12.0;
/// Sort key for subjects without a forecast, so they rank after every real probability.
const MISSING_PROBABILITY_RANK: f64 = 99.0;

pub fn attendance_bonus(rate: Option<f64>) -> f64 {
    match rate {
        None => 0.0,
        Some(r) if r >= EXCELLENT_ATTENDANCE => EXCELLENT_ATTENDANCE_BONUS,
        Some(r) if r >= 70.0 => 5.0,
        Some(r) if r >= 55.0 => 0.0,
        Some(_) => -8.0,
    }
}

/// Shrinks the raw estimate toward 50 by how much evidence backs it.
fn shrink(base: f64, att_bonus: f64, slope_bonus: f64, confidence: f64) -> f64 {
    let raw = base + att_bonus + slope_bonus;
    let blended = NEUTRAL_PROBABILITY + confidence * (raw - NEUTRAL_PROBABILITY);
    round1(blended.clamp(MIN_PROBABILITY, MAX_PROBABILITY))
}

pub fn pass_probability(
    records: &StudentRecords,
    subject: &str,
    today: NaiveDate,
) -> PredictionResult {
    let attendance_rate =
        attendance_window(&records.attendance, today, ATTENDANCE_WINDOW_DAYS).recent;
    let series = percentages(&records.assessments, Some(subject));
    let n_assessments = series.len();
    let slope = score_slope(&records.assessments, Some(subject));
    let last_assessed = records
        .assessments
        .iter()
        .filter(|a| a.subject == subject)
        .map(|a| a.date)
        .max();

    let Some(base) = recency_weighted_avg(&records.assessments, Some(subject)) else {
        return PredictionResult {
            subject: subject.to_string(),
            current_avg: None,
            probability: None,
            improved_probability: None,
            attendance_rate,
            slope,
            n_assessments,
            last_assessed,
            smoothed_series: Vec::new(),
            status: PredictionStatus::NoData,
        };
    };

    let att_bonus = attendance_bonus(attendance_rate);
    let slope_bonus = (slope * SLOPE_WEIGHT).clamp(-MAX_SLOPE_BONUS, MAX_SLOPE_BONUS);
    let confidence = (n_assessments as f64 / FULL_CONFIDENCE_ASSESSMENTS).min(1.0);

    let probability = shrink(base, att_bonus, slope_bonus, confidence);
    let improved_probability = match attendance_rate {
        Some(rate) if rate < EXCELLENT_ATTENDANCE => {
            Some(shrink(base, EXCELLENT_ATTENDANCE_BONUS, slope_bonus, confidence))
        }
        _ => None,
    };

    let status = if probability >= NEUTRAL_PROBABILITY {
        PredictionStatus::Pass
    } else {
        PredictionStatus::AtRisk
    };

    PredictionResult {
        subject: subject.to_string(),
        current_avg: Some(round1(base)),
        probability: Some(probability),
        improved_probability,
        attendance_rate,
        slope: round1(slope),
        n_assessments,
        last_assessed,
        smoothed_series: ewma(&series, DEFAULT_ALPHA).into_iter().map(round1).collect(),
        status,
    }
}

/// Forecasts for every enrolled subject, weakest first.
pub fn all_subjects(records: &StudentRecords, today: NaiveDate) -> Vec<PredictionResult> {
    let mut results: Vec<PredictionResult> = records
        .profile
        .subjects
        .iter()
        .map(|subject| pass_probability(records, subject, today))
        .collect();

    results.sort_by(|a, b| {
        let a = a.probability.unwrap_or(MISSING_PROBABILITY_RANK);
        let b = b.probability.unwrap_or(MISSING_PROBABILITY_RANK);
        a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}

pub fn dropout_risk(student_id: Uuid, profile: Option<&StudentRiskProfile>) -> DropoutRisk {
    let score = profile.map(dropout_score).unwrap_or(0);
    DropoutRisk {
        student_id,
        score,
        level: dropout_level(score),
    }
}

pub async fn predict_pass_probability(
    pool: &PgPool,
    student_id: Uuid,
    subject: &str,
) -> EngineResult<PredictionResult> {
    let today = Utc::now().date_naive();
    let mut conn = pool.acquire().await?;
    let records = db::load_student(&mut conn, student_id, today).await?;

    Ok(match records {
        Some(records) => pass_probability(&records, subject, today),
        None => {
            debug!(%student_id, "unknown student, returning empty forecast");
            PredictionResult {
                subject: subject.to_string(),
                current_avg: None,
                probability: None,
                improved_probability: None,
                attendance_rate: None,
                slope: 0.0,
                n_assessments: 0,
                last_assessed: None,
                smoothed_series: Vec::new(),
                status: PredictionStatus::NoData,
            }
        }
    })
}

pub async fn predict_all_subjects(
    pool: &PgPool,
    student_id: Uuid,
) -> EngineResult<Vec<PredictionResult>> {
    let today = Utc::now().date_naive();
    let mut conn = pool.acquire().await?;
    let records = db::load_student(&mut conn, student_id, today).await?;

    Ok(records
        .map(|records| all_subjects(&records, today))
        .unwrap_or_default())
}

pub async fn predict_dropout_risk(pool: &PgPool, student_id: Uuid) -> EngineResult<DropoutRisk> {
    let mut conn = pool.acquire().await?;
    let profile = db::fetch_profile(&mut conn, student_id).await?;
    if profile.is_none() {
        debug!(%student_id, "unknown student, dropout risk defaults to zero");
    }
    Ok(dropout_risk(student_id, profile.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AcademicRisk, AssessmentRecord, AttendanceRecord, AttendanceRisk, AttendanceStatus,
        DropoutLevel, PaymentRisk,
    };
    use chrono::Duration;

    fn student(subjects: &[&str]) -> StudentRecords {
        StudentRecords {
            profile: StudentRiskProfile {
                student_id: Uuid::new_v4(),
                name: "Nia Mensah".to_string(),
                subjects: subjects.iter().map(|s| s.to_string()).collect(),
                academic: AcademicRisk::OnTrack,
                attendance: AttendanceRisk::Ok,
                payment: PaymentRisk::Paid,
            },
            attendance: Vec::new(),
            assessments: Vec::new(),
        }
    }

    fn with_scores(mut records: StudentRecords, subject: &str, values: &[f64]) -> StudentRecords {
        let start = Utc::now().date_naive() - Duration::days(40);
        for (idx, score) in values.iter().enumerate() {
            records.assessments.push(AssessmentRecord {
                student_id: records.profile.student_id,
                subject: subject.to_string(),
                score: *score,
                max_score: 100.0,
                date: start + Duration::days(idx as i64 * 7),
            });
        }
        records.assessments.sort_by_key(|a| a.date);
        records
    }

    fn with_attendance(
        mut records: StudentRecords,
        present: usize,
        absent: usize,
    ) -> StudentRecords {
        let date = Utc::now().date_naive() - Duration::days(2);
        for idx in 0..(present + absent) {
            records.attendance.push(AttendanceRecord {
                date,
                status: if idx < present {
                    AttendanceStatus::Present
                } else {
                    AttendanceStatus::Absent
                },
            });
        }
        records
    }

    #[test]
    fn attendance_bonus_tiers() {
        assert_eq!(attendance_bonus(None), 0.0);
        assert_eq!(attendance_bonus(Some(90.0)), 12.0);
        assert_eq!(attendance_bonus(Some(85.0)), 12.0);
        assert_eq!(attendance_bonus(Some(70.0)), 5.0);
        assert_eq!(attendance_bonus(Some(55.0)), 0.0);
        assert_eq!(attendance_bonus(Some(54.9)), -8.0);
    }

    #[test]
    fn low_scores_with_poor_attendance_are_at_risk() {
        let today = Utc::now().date_naive();
        let records = with_scores(student(&["Maths"]), "Maths", &[40.0, 42.0, 45.0]);
        let records = with_attendance(records, 1, 1);

        let result = pass_probability(&records, "Maths", today);
        assert_eq!(result.attendance_rate, Some(50.0));
        assert_eq!(result.n_assessments, 3);
        assert_eq!(result.slope, 2.5);
        assert_eq!(result.current_avg, Some(42.8));
        assert_eq!(result.probability, Some(44.2));
        assert_eq!(result.last_assessed, Some(today - Duration::days(26)));
        assert_eq!(result.status, PredictionStatus::AtRisk);
        assert_eq!(result.smoothed_series.len(), 3);

        let improved = result.improved_probability.unwrap();
        assert!(improved > result.probability.unwrap());
    }

    #[test]
    fn missing_subject_has_no_data() {
        let today = Utc::now().date_naive();
        let records = with_scores(student(&["Maths", "Art"]), "Maths", &[70.0]);

        let result = pass_probability(&records, "Art", today);
        assert_eq!(result.status, PredictionStatus::NoData);
        assert_eq!(result.probability, None);
        assert_eq!(result.n_assessments, 0);
        assert_eq!(result.last_assessed, None);
    }

    #[test]
    fn probability_stays_within_bounds() {
        let today = Utc::now().date_naive();
        let high = with_scores(student(&["Maths"]), "Maths", &[60.0, 80.0, 100.0, 100.0, 100.0]);
        let high = with_attendance(high, 10, 0);
        let low = with_scores(student(&["Maths"]), "Maths", &[40.0, 20.0, 0.0, 0.0, 0.0]);
        let low = with_attendance(low, 0, 10);

        let high = pass_probability(&high, "Maths", today);
        assert_eq!(high.probability, Some(97.0));
        assert_eq!(high.improved_probability, None);
        assert_eq!(pass_probability(&low, "Maths", today).probability, Some(3.0));
    }

    #[test]
    fn unknown_attendance_has_no_counterfactual() {
        let today = Utc::now().date_naive();
        let records = with_scores(student(&["Maths"]), "Maths", &[55.0, 60.0]);

        let result = pass_probability(&records, "Maths", today);
        assert_eq!(result.attendance_rate, None);
        assert_eq!(result.improved_probability, None);
    }

    #[test]
    fn all_subjects_rank_weakest_first() {
        let today = Utc::now().date_naive();
        let records = student(&["Art", "Maths", "English"]);
        let records = with_scores(records, "Maths", &[90.0, 92.0, 95.0, 96.0]);
        let records = with_scores(records, "English", &[35.0, 30.0, 28.0, 25.0]);

        let ranked: Vec<String> = all_subjects(&records, today)
            .into_iter()
            .map(|p| p.subject)
            .collect();
        assert_eq!(ranked, vec!["English", "Maths", "Art"]);
    }

    #[test]
    fn dropout_risk_defaults_for_unknown_student() {
        let risk = dropout_risk(Uuid::new_v4(), None);
        assert_eq!(risk.score, 0);
        assert_eq!(risk.level, DropoutLevel::Low);
    }

    #[test]
    fn dropout_risk_sums_dimensions() {
        let mut records = student(&[]);
        records.profile.academic = AcademicRisk::NeedsSupport;
        records.profile.payment = PaymentRisk::Outstanding;

        let risk = dropout_risk(records.profile.student_id, Some(&records.profile));
        assert_eq!(risk.score, 35);
        assert_eq!(risk.level, DropoutLevel::Medium);
    }
}
