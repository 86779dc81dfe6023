//! Prescriptive layer: what staff should do next for a student.

use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::db;
use crate::error::EngineResult;
use crate::models::{Priority, Recommendation, RecommendationType, StudentRecords};
use crate::risk::payment_at_risk;
use crate::windows::{attendance_window, recent_subject_average, ATTENDANCE_WINDOW_DAYS};

const REMINDER_ATTENDANCE: f64 = 75.0;
const SHARP_ATTENDANCE_DROP: f64 = -15.0;
const FAILING_AVERAGE: f64 = 50.0;
const BORDERLINE_AVERAGE: f64 = 60.0;

fn recommendation(
    priority: Priority,
    rec_type: RecommendationType,
    action: &str,
    message: String,
) -> Recommendation {
    Recommendation {
        priority,
        rec_type,
        action: action.to_string(),
        message,
    }
}

pub fn recommendations(records: &StudentRecords, today: NaiveDate) -> Vec<Recommendation> {
    let mut recs = Vec::new();
    let name = &records.profile.name;
    let window = attendance_window(&records.attendance, today, ATTENDANCE_WINDOW_DAYS);

    if let Some(rate) = window.recent {
        if rate < REMINDER_ATTENDANCE {
            recs.push(recommendation(
                Priority::High,
                RecommendationType::SendReminder,
                "Send attendance reminder",
                format!(
                    "{name} is at {rate:.0}% attendance; contact the family about \
                     missed sessions."
                ),
            ));
        }
    }

    if let Some(delta) = window.delta {
        if delta < SHARP_ATTENDANCE_DROP {
            recs.push(recommendation(
                Priority::High,
                RecommendationType::OneOnOne,
                "Schedule one-on-one check-in",
                format!(
                    "Attendance fell {:.0} points in two weeks; find out what changed.",
                    delta.abs()
                ),
            ));
        }
    }

    for subject in &records.profile.subjects {
        let Some(avg) = recent_subject_average(&records.assessments, subject) else {
            continue;
        };
        if avg < FAILING_AVERAGE {
            recs.push(recommendation(
                Priority::High,
                RecommendationType::ExtraSession,
                "Book extra tutoring session",
                format!("{subject} average is {avg:.1}%; arrange a catch-up session."),
            ));
            recs.push(recommendation(
                Priority::Medium,
                RecommendationType::RecommendVideo,
                "Share revision videos",
                format!("Send {subject} revision material covering recent topics."),
            ));
        } else if avg < BORDERLINE_AVERAGE {
            recs.push(recommendation(
                Priority::Medium,
                RecommendationType::MotivationalNudge,
                "Send encouragement",
                format!(
                    "{subject} average is {avg:.1}%, close to the pass line; a nudge may help."
                ),
            ));
        }
    }

    if payment_at_risk(records.profile.payment) {
        recs.push(recommendation(
            Priority::High,
            RecommendationType::PaymentFollowup,
            "Follow up on fees",
            format!(
                "Payment status is {}; contact the guardian about the balance.",
                records.profile.payment
            ),
        ));
    }

    // sort_by_key is stable, so generation order survives within a tier.
    recs.sort_by_key(|rec| rec.priority);
    recs
}

pub async fn get_recommendations(
    pool: &PgPool,
    student_id: Uuid,
) -> EngineResult<Vec<Recommendation>> {
    let today = Utc::now().date_naive();
    let mut conn = pool.acquire().await?;
    let Some(records) = db::load_student(&mut conn, student_id, today).await? else {
        debug!(%student_id, "unknown student, no recommendations");
        return Ok(Vec::new());
    };
    Ok(recommendations(&records, today))
}
