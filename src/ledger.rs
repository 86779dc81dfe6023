//! Intervention ledger and the delayed feedback loop.
//!
//! Every logged intervention carries a metric snapshot taken when it was
//! logged. Once the maturation window has passed, the sweep compares current
//! metrics against that snapshot and writes a terminal outcome exactly once.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::models::{FeedbackSummary, InterventionLogEntry, MetricSnapshot, Outcome, StudentRecords};
use crate::windows::{attendance_window, overall_average, ATTENDANCE_WINDOW_DAYS};

pub const MATURATION_DAYS: i64 = 14;
const ATTENDANCE_IMPROVED: f64 = 5.0;
const SCORE_IMPROVED: f64 = 3.0;
const ATTENDANCE_DECLINED: f64 = 7.0;
const SCORE_DECLINED: f64 = 5.0;

pub fn snapshot_metrics(records: &StudentRecords, today: NaiveDate) -> MetricSnapshot {
    MetricSnapshot {
        attendance: attendance_window(&records.attendance, today, ATTENDANCE_WINDOW_DAYS).recent,
        avg_score: overall_average(&records.assessments),
    }
}

/// Compares current metrics to the baseline. A metric missing on either side is skipped.
pub fn judge_outcome(baseline: &MetricSnapshot, current: &MetricSnapshot) -> Outcome {
    let mut improvements = 0;
    let mut declines = 0;

    if let (Some(before), Some(now)) = (baseline.attendance, current.attendance) {
        if now >= before + ATTENDANCE_IMPROVED {
            improvements += 1;
        }
        if now <= before - ATTENDANCE_DECLINED {
            declines += 1;
        }
    }

    if let (Some(before), Some(now)) = (baseline.avg_score, current.avg_score) {
        if now >= before + SCORE_IMPROVED {
            improvements += 1;
        }
        if now <= before - SCORE_DECLINED {
            declines += 1;
        }
    }

    if improvements > 0 && improvements >= declines {
        Outcome::Improved
    } else if declines > improvements {
        Outcome::Declined
    } else {
        Outcome::NoChange
    }
}

pub fn maturity_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(MATURATION_DAYS)
}

pub fn is_due(entry: &InterventionLogEntry, now: DateTime<Utc>) -> bool {
    entry.outcome.is_none() && entry.created_at <= maturity_cutoff(now)
}

/// Sets the terminal outcome on a due entry.
///
/// Entries already resolved or still maturing are left alone.
pub fn resolve(
    entry: &mut InterventionLogEntry,
    current: &MetricSnapshot,
    now: DateTime<Utc>,
) -> Option<Outcome> {
    if !is_due(entry, now) {
        return None;
    }
    let outcome = judge_outcome(&entry.metric_snapshot, current);
    entry.outcome = Some(outcome);
    entry.evaluated_at = Some(now);
    Some(outcome)
}

pub fn summarize(outcomes: &[Option<Outcome>]) -> FeedbackSummary {
    let mut summary = FeedbackSummary {
        total: outcomes.len(),
        ..FeedbackSummary::default()
    };
    for outcome in outcomes {
        match outcome {
            Some(Outcome::Improved) => summary.improved += 1,
            Some(Outcome::NoChange) => summary.no_change += 1,
            Some(Outcome::Declined) => summary.declined += 1,
            None => summary.pending += 1,
        }
    }
    summary
}

pub async fn log_intervention(
    pool: &PgPool,
    student_id: Uuid,
    rec_type: &str,
    rec_action: &str,
    note: &str,
    alert_id: Option<Uuid>,
) -> EngineResult<Uuid> {
    let now = Utc::now();
    let mut conn = pool.acquire().await?;
    let records = db::load_student(&mut conn, student_id, now.date_naive())
        .await?
        .ok_or(EngineError::UnknownStudent(student_id))?;

    let entry = InterventionLogEntry {
        id: Uuid::new_v4(),
        student_id,
        alert_id,
        rec_type: rec_type.to_string(),
        rec_action: rec_action.to_string(),
        note: note.to_string(),
        metric_snapshot: snapshot_metrics(&records, now.date_naive()),
        outcome: None,
        created_at: now,
        evaluated_at: None,
    };
    db::insert_intervention(&mut conn, &entry).await?;

    info!(
        intervention_id = %entry.id,
        %student_id,
        rec_type,
        attendance = ?entry.metric_snapshot.attendance,
        avg_score = ?entry.metric_snapshot.avg_score,
        "intervention logged"
    );
    Ok(entry.id)
}

/// Resolves every matured, unresolved intervention. Returns how many were written.
pub async fn evaluate_feedback_loops(pool: &PgPool) -> EngineResult<usize> {
    let now = Utc::now();
    let today = now.date_naive();
    let mut conn = pool.acquire().await?;
    let due = db::fetch_due_interventions(&mut conn, maturity_cutoff(now)).await?;
    info!(candidates = due.len(), "feedback sweep started");

    let mut evaluated = 0usize;
    for mut entry in due {
        let current = db::load_student(&mut conn, entry.student_id, today)
            .await?
            .map(|records| snapshot_metrics(&records, today))
            .unwrap_or_default();

        let Some(outcome) = resolve(&mut entry, &current, now) else {
            continue;
        };
        if db::record_outcome(&mut conn, entry.id, outcome, now).await? {
            evaluated += 1;
            debug!(intervention_id = %entry.id, outcome = %outcome, "intervention evaluated");
        } else {
            debug!(intervention_id = %entry.id, "outcome already written by another run");
        }
    }

    info!(evaluated, "feedback sweep finished");
    Ok(evaluated)
}

pub async fn get_feedback_summary(pool: &PgPool) -> EngineResult<FeedbackSummary> {
    let mut conn = pool.acquire().await?;
    let outcomes = db::fetch_outcomes(&mut conn).await?;
    Ok(summarize(&outcomes))
}

pub async fn intervention_history(
    pool: &PgPool,
    student_id: Uuid,
) -> EngineResult<Vec<InterventionLogEntry>> {
    let mut conn = pool.acquire().await?;
    db::fetch_intervention_history(&mut conn, student_id).await
}
