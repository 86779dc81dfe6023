use std::fmt::Write;
use std::path::Path;

use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::dashboard::WorklistEntry;
use crate::db;
use crate::error::EngineResult;
use crate::insights::student_insights;
use crate::ledger::snapshot_metrics;
use crate::models::{
    DropoutRisk, Insight, InterventionLogEntry, MetricSnapshot, PredictionResult, Recommendation,
    StudentRecords,
};
use crate::predict::{all_subjects, dropout_risk};
use crate::recommend::recommendations;

#[derive(Debug, Clone)]
pub struct StudentReport {
    pub name: String,
    pub generated_on: NaiveDate,
    pub current: MetricSnapshot,
    pub dropout: DropoutRisk,
    pub predictions: Vec<PredictionResult>,
    pub insights: Vec<Insight>,
    pub recommendations: Vec<Recommendation>,
    pub history: Vec<InterventionLogEntry>,
}

pub fn assemble(
    records: &StudentRecords,
    history: Vec<InterventionLogEntry>,
    today: NaiveDate,
) -> StudentReport {
    StudentReport {
        name: records.profile.name.clone(),
        generated_on: today,
        current: snapshot_metrics(records, today),
        dropout: dropout_risk(records.profile.student_id, Some(&records.profile)),
        predictions: all_subjects(records, today),
        insights: student_insights(records, today),
        recommendations: recommendations(records, today),
        history,
    }
}

pub async fn load_student_report(
    pool: &PgPool,
    student_id: Uuid,
) -> EngineResult<Option<StudentReport>> {
    let today = Utc::now().date_naive();
    let mut conn = pool.acquire().await?;
    let Some(records) = db::load_student(&mut conn, student_id, today).await? else {
        return Ok(None);
    };
    let history = db::fetch_intervention_history(&mut conn, student_id).await?;
    Ok(Some(assemble(&records, history, today)))
}

fn pct(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}%"))
}

pub fn render_markdown(report: &StudentReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Student Risk Report: {}", report.name);
    let _ = writeln!(output, "Generated on {}", report.generated_on);
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "- Attendance (last 14 days): {}",
        pct(report.current.attendance)
    );
    let _ = writeln!(output, "- Overall average: {}", pct(report.current.avg_score));
    let _ = writeln!(
        output,
        "- Dropout risk: {} ({:?})",
        report.dropout.score, report.dropout.level
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Forecasts");
    if report.predictions.is_empty() {
        let _ = writeln!(output, "No enrolled subjects.");
    } else {
        for prediction in &report.predictions {
            match prediction.probability {
                Some(probability) => {
                    let _ = write!(
                        output,
                        "- {}: {:.1}% pass probability ({:?}, {} assessments, slope {:+.1})",
                        prediction.subject,
                        probability,
                        prediction.status,
                        prediction.n_assessments,
                        prediction.slope
                    );
                    if let Some(improved) = prediction.improved_probability {
                        let _ = write!(output, "; {improved:.1}% with excellent attendance");
                    }
                    let _ = writeln!(output);
                }
                None => {
                    let _ = writeln!(output, "- {}: no assessments yet", prediction.subject);
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Insights");
    if report.insights.is_empty() {
        let _ = writeln!(output, "Nothing notable this period.");
    } else {
        for insight in &report.insights {
            let _ = writeln!(output, "- [{:?}] {}", insight.level, insight.message);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommended Actions");
    if report.recommendations.is_empty() {
        let _ = writeln!(output, "No actions recommended.");
    } else {
        for rec in &report.recommendations {
            let _ = writeln!(
                output,
                "- [{:?}] {} ({}): {}",
                rec.priority, rec.action, rec.rec_type, rec.message
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Intervention History");
    if report.history.is_empty() {
        let _ = writeln!(output, "No interventions logged.");
    } else {
        for entry in report.history.iter().take(10) {
            let outcome = entry
                .outcome
                .map_or("pending", |outcome| outcome.as_str());
            let _ = writeln!(
                output,
                "- {} {} ({}): {}",
                entry.created_at.date_naive(),
                entry.rec_action,
                outcome,
                entry.note
            );
        }
    }

    output
}

pub fn write_worklist_csv(path: &Path, entries: &[WorklistEntry]) -> EngineResult<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    Ok(entries.len())
}
