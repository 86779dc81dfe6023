//! Observational layer: narrative insights about what is happening to a student.

use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::db;
use crate::error::EngineResult;
use crate::models::{Insight, InsightLevel, PaymentRisk, StudentRecords};
use crate::windows::{
    attendance_window, recent_subject_average, score_trend, ATTENDANCE_WINDOW_DAYS, TREND_BLOCK,
};

const CRITICAL_ATTENDANCE: f64 = 60.0;
const LOW_ATTENDANCE: f64 = 75.0;
const ATTENDANCE_DROP: f64 = -10.0;
const SCORE_SWING: f64 = 10.0;
const FAILING_AVERAGE: f64 = 50.0;

fn insight(level: InsightLevel, category: &str, message: String, delta: Option<f64>) -> Insight {
    Insight {
        level,
        category: category.to_string(),
        message,
        delta,
    }
}

pub fn student_insights(records: &StudentRecords, today: NaiveDate) -> Vec<Insight> {
    let mut insights = Vec::new();
    let name = &records.profile.name;
    let window = attendance_window(&records.attendance, today, ATTENDANCE_WINDOW_DAYS);

    if let Some(rate) = window.recent {
        if rate < CRITICAL_ATTENDANCE {
            insights.push(insight(
                InsightLevel::Critical,
                "attendance",
                format!(
                    "{name} attended only {rate:.0}% of sessions in the last \
                     {ATTENDANCE_WINDOW_DAYS} days."
                ),
                window.delta,
            ));
        } else if rate < LOW_ATTENDANCE {
            insights.push(insight(
                InsightLevel::Warning,
                "attendance",
                format!(
                    "{name}'s attendance is {rate:.0}% over the last \
                     {ATTENDANCE_WINDOW_DAYS} days, below the 75% target."
                ),
                window.delta,
            ));
        }
    }

    if let Some(delta) = window.delta {
        if delta < ATTENDANCE_DROP {
            insights.push(insight(
                InsightLevel::Warning,
                "attendance",
                format!(
                    "Attendance dropped {:.0} points compared with the previous \
                     {ATTENDANCE_WINDOW_DAYS} days.",
                    delta.abs()
                ),
                Some(delta),
            ));
        }
    }

    for subject in &records.profile.subjects {
        let trend = score_trend(&records.assessments, Some(subject), TREND_BLOCK);
        if let Some(delta) = trend.delta {
            if delta <= -SCORE_SWING {
                insights.push(insight(
                    InsightLevel::Warning,
                    subject,
                    format!(
                        "{subject} scores fell {:.1} points across the last \
                         {TREND_BLOCK} assessments.",
                        delta.abs()
                    ),
                    Some(delta),
                ));
            } else if delta >= SCORE_SWING {
                insights.push(insight(
                    InsightLevel::Info,
                    subject,
                    format!(
                        "{subject} scores improved {delta:.1} points across the last \
                         {TREND_BLOCK} assessments."
                    ),
                    Some(delta),
                ));
            }
        }

        if let Some(avg) = recent_subject_average(&records.assessments, subject) {
            if avg < FAILING_AVERAGE {
                insights.push(insight(
                    InsightLevel::Critical,
                    subject,
                    format!(
                        "{subject} average is {avg:.1}%; intervention required \
                         before the next assessment."
                    ),
                    None,
                ));
            }
        }
    }

    match records.profile.payment {
        PaymentRisk::Restricted => insights.push(insight(
            InsightLevel::Critical,
            "payment",
            "Account is restricted for non-payment; access to classes may be suspended."
                .to_string(),
            None,
        )),
        PaymentRisk::Outstanding => insights.push(insight(
            InsightLevel::Warning,
            "payment",
            "Fees are outstanding for the current billing period.".to_string(),
            None,
        )),
        PaymentRisk::Pending | PaymentRisk::Paid => {}
    }

    insights
}

pub async fn get_student_insights(pool: &PgPool, student_id: Uuid) -> EngineResult<Vec<Insight>> {
    let today = Utc::now().date_naive();
    let mut conn = pool.acquire().await?;
    let Some(records) = db::load_student(&mut conn, student_id, today).await? else {
        debug!(%student_id, "unknown student, no insights");
        return Ok(Vec::new());
    };
    Ok(student_insights(&records, today))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AcademicRisk, AssessmentRecord, AttendanceRecord, AttendanceRisk, AttendanceStatus,
        StudentRiskProfile,
    };
    use chrono::Duration;

    fn student() -> StudentRecords {
        StudentRecords {
            profile: StudentRiskProfile {
                student_id: Uuid::new_v4(),
                name: "Kofi Boateng".to_string(),
                subjects: vec!["Maths".to_string()],
                academic: AcademicRisk::OnTrack,
                attendance: AttendanceRisk::Ok,
                payment: PaymentRisk::Paid,
            },
            attendance: Vec::new(),
            assessments: Vec::new(),
        }
    }

    fn attend(records: &mut StudentRecords, days_ago: i64, present: usize, absent: usize) {
        let date = Utc::now().date_naive() - Duration::days(days_ago);
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
    }

    fn score(records: &mut StudentRecords, values: &[f64]) {
        let start = Utc::now().date_naive() - Duration::days(50);
        for (idx, value) in values.iter().enumerate() {
            records.assessments.push(AssessmentRecord {
                student_id: records.profile.student_id,
                subject: "Maths".to_string(),
                score: *value,
                max_score: 100.0,
                date: start + Duration::days(idx as i64 * 5),
            });
        }
    }

    #[test]
    fn improving_attendance_raises_nothing() {
        let mut records = student();
        attend(&mut records, 2, 9, 1);
        attend(&mut records, 20, 6, 4);

        let insights = student_insights(&records, Utc::now().date_naive());
        assert!(insights.iter().all(|i| i.category != "attendance"));
    }

    #[test]
    fn critical_attendance_and_drop_both_fire() {
        let mut records = student();
        attend(&mut records, 2, 1, 1);
        attend(&mut records, 20, 9, 1);

        let insights = student_insights(&records, Utc::now().date_naive());
        let attendance: Vec<&Insight> = insights
            .iter()
            .filter(|i| i.category == "attendance")
            .collect();
        assert_eq!(attendance.len(), 2);
        assert_eq!(attendance[0].level, InsightLevel::Critical);
        assert_eq!(attendance[1].level, InsightLevel::Warning);
        assert_eq!(attendance[1].delta, Some(-40.0));
    }

    #[test]
    fn low_attendance_is_a_warning() {
        let mut records = student();
        attend(&mut records, 2, 7, 3);

        let insights = student_insights(&records, Utc::now().date_naive());
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].level, InsightLevel::Warning);
    }

    #[test]
    fn failing_subject_is_critical() {
        let mut records = student();
        score(&mut records, &[70.0, 70.0, 70.0, 30.0, 30.0, 30.0]);

        let insights = student_insights(&records, Utc::now().date_naive());
        let maths: Vec<&Insight> = insights.iter().filter(|i| i.category == "Maths").collect();
        assert_eq!(maths.len(), 2);
        assert_eq!(maths[0].level, InsightLevel::Warning);
        assert_eq!(maths[1].level, InsightLevel::Critical);
        assert!(maths[1].message.contains("intervention required"));
    }

    #[test]
    fn rising_scores_are_informational() {
        let mut records = student();
        score(&mut records, &[55.0, 55.0, 55.0, 90.0, 90.0, 90.0]);

        let insights = student_insights(&records, Utc::now().date_naive());
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].level, InsightLevel::Info);
    }

    #[test]
    fn payment_levels_map_to_severity() {
        let mut records = student();
        records.profile.payment = PaymentRisk::Restricted;
        let insights = student_insights(&records, Utc::now().date_naive());
        assert_eq!(insights[0].level, InsightLevel::Critical);

        records.profile.payment = PaymentRisk::Outstanding;
        let insights = student_insights(&records, Utc::now().date_naive());
        assert_eq!(insights[0].level, InsightLevel::Warning);

        records.profile.payment = PaymentRisk::Pending;
        assert!(student_insights(&records, Utc::now().date_naive()).is_empty());
    }
}
