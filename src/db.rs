use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{
    AlertRecord, AssessmentRecord, AttendanceRecord, InterventionLogEntry, MetricSnapshot,
    Outcome, PaymentRecord, StudentRecords, StudentRiskProfile, WeeklyAverage,
};
use crate::windows::ATTENDANCE_WINDOW_DAYS;

pub async fn init_db(pool: &PgPool) -> EngineResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn profile_from_row(row: &PgRow) -> EngineResult<StudentRiskProfile> {
    let academic: String = row.try_get("academic_risk")?;
    let attendance: String = row.try_get("attendance_risk")?;
    let payment: String = row.try_get("payment_risk")?;

    Ok(StudentRiskProfile {
        student_id: row.try_get("id")?,
        name: row.try_get("full_name")?,
        subjects: row.try_get("subjects")?,
        academic: academic.parse()?,
        attendance: attendance.parse()?,
        payment: payment.parse()?,
    })
}

fn assessment_from_row(row: &PgRow) -> EngineResult<AssessmentRecord> {
    Ok(AssessmentRecord {
        student_id: row.try_get("student_id")?,
        subject: row.try_get("subject")?,
        score: row.try_get("score")?,
        max_score: row.try_get("max_score")?,
        date: row.try_get("date")?,
    })
}

fn intervention_from_row(row: &PgRow) -> EngineResult<InterventionLogEntry> {
    let snapshot: serde_json::Value = row.try_get("metric_snapshot")?;
    let metric_snapshot: MetricSnapshot = serde_json::from_value(snapshot)?;
    let outcome = row
        .try_get::<Option<String>, _>("outcome")?
        .map(|value| value.parse::<Outcome>())
        .transpose()?;

    Ok(InterventionLogEntry {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        alert_id: row.try_get("alert_id")?,
        rec_type: row.try_get("rec_type")?,
        rec_action: row.try_get("rec_action")?,
        note: row.try_get("note")?,
        metric_snapshot,
        outcome,
        created_at: row.try_get("created_at")?,
        evaluated_at: row.try_get("evaluated_at")?,
    })
}

pub async fn fetch_profile(
    conn: &mut PgConnection,
    student_id: Uuid,
) -> EngineResult<Option<StudentRiskProfile>> {
    let row = sqlx::query(
        "SELECT id, full_name, subjects, academic_risk, attendance_risk, payment_risk \
         FROM risk_engine.students WHERE id = $1",
    )
    .bind(student_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(profile_from_row).transpose()
}

pub async fn fetch_profiles(conn: &mut PgConnection) -> EngineResult<Vec<StudentRiskProfile>> {
    let rows = sqlx::query(
        "SELECT id, full_name, subjects, academic_risk, attendance_risk, payment_risk \
         FROM risk_engine.students ORDER BY full_name",
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(profile_from_row).collect()
}

/// Loads the profile plus the attendance and assessment history the analytics need.
///
/// Attendance is bounded to the two comparison windows ending `today`.
pub async fn load_student(
    conn: &mut PgConnection,
    student_id: Uuid,
    today: NaiveDate,
) -> EngineResult<Option<StudentRecords>> {
    let Some(profile) = fetch_profile(conn, student_id).await? else {
        return Ok(None);
    };

    let since = today - Duration::days(ATTENDANCE_WINDOW_DAYS * 2);
    let rows = sqlx::query(
        "SELECT date, status \
         FROM risk_engine.attendance \
         WHERE student_id = $1 AND date > $2 AND date <= $3 \
         ORDER BY date",
    )
    .bind(student_id)
    .bind(since)
    .bind(today)
    .fetch_all(&mut *conn)
    .await?;

    let mut attendance = Vec::with_capacity(rows.len());
    for row in rows {
        let status: String = row.try_get("status")?;
        attendance.push(AttendanceRecord {
            date: row.try_get("date")?,
            status: status.parse()?,
        });
    }

    let rows = sqlx::query(
        "SELECT student_id, subject, score, max_score, date \
         FROM risk_engine.assessments WHERE student_id = $1 \
         ORDER BY date, id",
    )
    .bind(student_id)
    .fetch_all(&mut *conn)
    .await?;

    let assessments = rows
        .iter()
        .map(assessment_from_row)
        .collect::<EngineResult<Vec<_>>>()?;

    Ok(Some(StudentRecords {
        profile,
        attendance,
        assessments,
    }))
}

pub async fn fetch_all_assessments(conn: &mut PgConnection) -> EngineResult<Vec<AssessmentRecord>> {
    let rows = sqlx::query(
        "SELECT student_id, subject, score, max_score, date \
         FROM risk_engine.assessments ORDER BY date, id",
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(assessment_from_row).collect()
}

pub async fn fetch_payments_for_period(
    conn: &mut PgConnection,
    period: &str,
) -> EngineResult<Vec<PaymentRecord>> {
    let rows = sqlx::query(
        "SELECT amount, status, month_for \
         FROM risk_engine.payments WHERE month_for = $1",
    )
    .bind(period)
    .fetch_all(&mut *conn)
    .await?;

    let mut payments = Vec::with_capacity(rows.len());
    for row in rows {
        payments.push(PaymentRecord {
            amount: row.try_get("amount")?,
            status: row.try_get("status")?,
            month_for: row.try_get("month_for")?,
        });
    }
    Ok(payments)
}

pub async fn fetch_weekly_averages(
    conn: &mut PgConnection,
    since_date: NaiveDate,
) -> EngineResult<Vec<WeeklyAverage>> {
    let rows = sqlx::query(
        r#"
        SELECT date_trunc('week', date)::date AS week_start,
               AVG(LEAST(GREATEST(
                   CASE WHEN max_score > 0 THEN score / max_score * 100 ELSE 0 END,
               0), 100))::float8 AS avg_pct,
               COUNT(*) AS assessment_count
        FROM risk_engine.assessments
        WHERE date >= $1
        GROUP BY 1
        ORDER BY 1
        "#,
    )
    .bind(since_date)
    .fetch_all(&mut *conn)
    .await?;

    let mut trends = Vec::with_capacity(rows.len());
    for row in rows {
        trends.push(WeeklyAverage {
            week_start: row.try_get("week_start")?,
            avg_pct: row.try_get("avg_pct")?,
            assessment_count: row.try_get("assessment_count")?,
        });
    }
    Ok(trends)
}

pub async fn fetch_unresolved_alerts(
    conn: &mut PgConnection,
    limit: i64,
) -> EngineResult<Vec<AlertRecord>> {
    let rows = sqlx::query(
        "SELECT a.id, a.student_id, s.full_name, a.alert_type, a.message, a.created_at \
         FROM risk_engine.alerts a \
         JOIN risk_engine.students s ON s.id = a.student_id \
         WHERE a.resolved = FALSE \
         ORDER BY a.created_at DESC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    let mut alerts = Vec::with_capacity(rows.len());
    for row in rows {
        alerts.push(AlertRecord {
            id: row.try_get("id")?,
            student_id: row.try_get("student_id")?,
            student_name: row.try_get("full_name")?,
            alert_type: row.try_get("alert_type")?,
            message: row.try_get("message")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(alerts)
}

pub async fn insert_intervention(
    conn: &mut PgConnection,
    entry: &InterventionLogEntry,
) -> EngineResult<()> {
    let snapshot = serde_json::to_value(entry.metric_snapshot)?;

    sqlx::query(
        r#"
        INSERT INTO risk_engine.intervention_log
        (id, student_id, alert_id, rec_type, rec_action, note,
         metric_snapshot, outcome, created_at, evaluated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8, NULL)
        "#,
    )
    .bind(entry.id)
    .bind(entry.student_id)
    .bind(entry.alert_id)
    .bind(&entry.rec_type)
    .bind(&entry.rec_action)
    .bind(&entry.note)
    .bind(snapshot)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

const INTERVENTION_COLUMNS: &str = "id, student_id, alert_id, rec_type, rec_action, note, \
     metric_snapshot, outcome, created_at, evaluated_at";

pub async fn fetch_due_interventions(
    conn: &mut PgConnection,
    matured_before: DateTime<Utc>,
) -> EngineResult<Vec<InterventionLogEntry>> {
    let query = format!(
        "SELECT {INTERVENTION_COLUMNS} FROM risk_engine.intervention_log \
         WHERE outcome IS NULL AND created_at <= $1 ORDER BY created_at"
    );
    let rows = sqlx::query(&query)
        .bind(matured_before)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(intervention_from_row).collect()
}

pub async fn fetch_intervention_history(
    conn: &mut PgConnection,
    student_id: Uuid,
) -> EngineResult<Vec<InterventionLogEntry>> {
    let query = format!(
        "SELECT {INTERVENTION_COLUMNS} FROM risk_engine.intervention_log \
         WHERE student_id = $1 ORDER BY created_at DESC"
    );
    let rows = sqlx::query(&query)
        .bind(student_id)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(intervention_from_row).collect()
}

/// Writes a terminal outcome. Returns false if another run already set it.
pub async fn record_outcome(
    conn: &mut PgConnection,
    id: Uuid,
    outcome: Outcome,
    evaluated_at: DateTime<Utc>,
) -> EngineResult<bool> {
    let result = sqlx::query(
        "UPDATE risk_engine.intervention_log \
         SET outcome = $1, evaluated_at = $2 \
         WHERE id = $3 AND outcome IS NULL",
    )
    .bind(outcome.as_str())
    .bind(evaluated_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn fetch_outcomes(conn: &mut PgConnection) -> EngineResult<Vec<Option<Outcome>>> {
    let rows = sqlx::query("SELECT outcome FROM risk_engine.intervention_log")
        .fetch_all(&mut *conn)
        .await?;

    let mut outcomes = Vec::with_capacity(rows.len());
    for row in rows {
        let outcome = row
            .try_get::<Option<String>, _>("outcome")?
            .map(|value| value.parse::<Outcome>())
            .transpose()?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

fn seed_id(student: usize, kind: u128, idx: usize) -> Uuid {
    Uuid::from_u128(SEED_ID_PREFIX | ((student as u128) << 64) | (kind << 32) | idx as u128)
}

const SEED_ID_PREFIX: u128 = 0x5eed_0000_0000_0000_0000_0000_0000_0000;

#[derive(Clone, Copy)]
struct SeedStudent {
    name: &'static str,
    subjects: &'static [&'static str],
    academic: &'static str,
    attendance: &'static str,
    payment: &'static str,
    /// Every n-th session is missed.
    absent_every: usize,
    base: f64,
    /// Weekly score drift.
    step: f64,
}

const SEED_STUDENTS: [SeedStudent; 4] = [
    SeedStudent {
        name: "Amara Osei",
        subjects: &["Maths", "English", "Science"],
        academic: "on_track",
        attendance: "ok",
        payment: "paid",
        absent_every: 10,
        base: 78.0,
        step: 1.5,
    },
    SeedStudent {
        name: "Daniel Kim",
        subjects: &["Maths", "Science"],
        academic: "needs_support",
        attendance: "ok",
        payment: "pending",
        absent_every: 4,
        base: 58.0,
        step: -1.0,
    },
    SeedStudent {
        name: "Lena Fischer",
        subjects: &["English", "History"],
        academic: "critical",
        attendance: "at_risk",
        payment: "outstanding",
        absent_every: 2,
        base: 45.0,
        step: -2.5,
    },
    SeedStudent {
        name: "Tomas Ruiz",
        subjects: &["Maths", "History"],
        academic: "on_track",
        attendance: "at_risk",
        payment: "restricted",
        absent_every: 3,
        base: 64.0,
        step: 0.5,
    },
];

pub async fn seed(pool: &PgPool) -> EngineResult<()> {
    let mut conn = pool.acquire().await?;
    let today = Utc::now().date_naive();
    let period = crate::risk::billing_period(today);

    for (s_idx, student) in SEED_STUDENTS.iter().enumerate() {
        let SeedStudent {
            name,
            subjects,
            academic,
            attendance,
            payment,
            absent_every,
            base,
            step,
        } = *student;
        let student_id = seed_id(s_idx, 0, 0);
        let subjects: Vec<String> = subjects.iter().map(|s| s.to_string()).collect();

        sqlx::query(
            r#"
            INSERT INTO risk_engine.students
            (id, full_name, subjects, academic_risk, attendance_risk, payment_risk)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                subjects = EXCLUDED.subjects,
                academic_risk = EXCLUDED.academic_risk,
                attendance_risk = EXCLUDED.attendance_risk,
                payment_risk = EXCLUDED.payment_risk
            "#,
        )
        .bind(student_id)
        .bind(name)
        .bind(&subjects)
        .bind(academic)
        .bind(attendance)
        .bind(payment)
        .execute(&mut *conn)
        .await?;

        let mut slot = 0usize;
        for days_ago in 0..(ATTENDANCE_WINDOW_DAYS * 2) {
            let date = today - Duration::days(days_ago);
            if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                continue;
            }
            for subject in &subjects {
                slot += 1;
                // Slipping students only miss sessions in the recent window.
                let recent = days_ago < ATTENDANCE_WINDOW_DAYS;
                let status = if slot % absent_every == 0 && (recent || absent_every > 3) {
                    "absent"
                } else {
                    "present"
                };
                sqlx::query(
                    r#"
                    INSERT INTO risk_engine.attendance
                    (id, student_id, date, subject, time_slot, status)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(student_id)
                .bind(date)
                .bind(subject)
                .bind("09:00")
                .bind(status)
                .execute(&mut *conn)
                .await?;
            }
        }

        for (sub_idx, subject) in subjects.iter().enumerate() {
            for week in 0..6usize {
                let score = (base + step * week as f64 + (sub_idx as f64) * 2.0).clamp(0.0, 100.0);
                let date = today - Duration::days(((6 - week) * 7) as i64);
                sqlx::query(
                    r#"
                    INSERT INTO risk_engine.assessments
                    (id, student_id, subject, score, max_score, date)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(seed_id(s_idx, 1, sub_idx * 10 + week))
                .bind(student_id)
                .bind(subject)
                .bind(score)
                .bind(100.0_f64)
                .bind(date)
                .execute(&mut *conn)
                .await?;
            }
        }

        let status = if payment == "paid" { "paid" } else { "unpaid" };
        sqlx::query(
            r#"
            INSERT INTO risk_engine.payments (id, student_id, amount, status, month_for)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(seed_id(s_idx, 2, 0))
        .bind(student_id)
        .bind(250.0_f64)
        .bind(status)
        .bind(&period)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO risk_engine.alerts (id, student_id, alert_type, message, resolved)
        VALUES ($1, $2, $3, $4, FALSE)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(seed_id(2, 3, 0))
    .bind(seed_id(2, 0, 0))
    .bind("attendance")
    .bind("Missed four sessions this fortnight")
    .execute(&mut *conn)
    .await?;

    Ok(())
}
