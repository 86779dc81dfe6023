//! Read-only composition of every analytic layer into one dashboard payload.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::error::EngineResult;
use crate::ledger::summarize;
use crate::models::{
    clamp_pct, round1, AcademicRisk, AlertRecord, AssessmentRecord, AttendanceRisk,
    FeedbackSummary, PaymentRecord, PaymentRisk, StudentRiskProfile, WeeklyAverage,
};
use crate::risk::{current_billing_period, dropout_score, is_flagged, payment_at_risk};
use crate::smoothing::{ewma, linear_slope, score_slope, DEFAULT_ALPHA};
use crate::windows::mean;

const TOP_PERFORMERS: usize = 5;
const MIN_ASSESSMENTS_FOR_RANKING: usize = 2;
const TREND_WEEKS: i64 = 12;
const ALERT_FEED_LIMIT: i64 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct SubjectHeat {
    pub subject: String,
    pub average: f64,
    pub slope: f64,
    pub n_assessments: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelCount {
    pub level: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskCell {
    pub academic: AcademicRisk,
    pub attendance: AttendanceRisk,
    pub payment: PaymentRisk,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskMatrix {
    pub academic: Vec<LevelCount>,
    pub attendance: Vec<LevelCount>,
    pub payment: Vec<LevelCount>,
    pub cells: Vec<RiskCell>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevenueSummary {
    pub period: String,
    pub collected: f64,
    pub expected: f64,
    pub collection_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopPerformer {
    pub student_id: Uuid,
    pub name: String,
    pub average: f64,
    pub n_assessments: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorklistEntry {
    pub student_id: Uuid,
    pub name: String,
    pub academic: AcademicRisk,
    pub attendance: AttendanceRisk,
    pub payment: PaymentRisk,
    pub dropout_score: u32,
    pub insight: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub week_start: NaiveDate,
    pub average: f64,
    pub smoothed: f64,
    pub assessment_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassTrend {
    pub points: Vec<TrendPoint>,
    pub slope: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub generated_at: DateTime<Utc>,
    pub heatmap: Vec<SubjectHeat>,
    pub risk_matrix: RiskMatrix,
    pub revenue: RevenueSummary,
    pub top_performers: Vec<TopPerformer>,
    pub worklist: Vec<WorklistEntry>,
    pub class_trend: ClassTrend,
    pub alerts: Vec<AlertRecord>,
    pub feedback: FeedbackSummary,
}

/// Class-wide average and slope per subject, alphabetical.
pub fn subject_heatmap(assessments: &[AssessmentRecord]) -> Vec<SubjectHeat> {
    let mut by_subject: BTreeMap<&str, Vec<AssessmentRecord>> = BTreeMap::new();
    for record in assessments {
        by_subject.entry(record.subject.as_str()).or_default().push(record.clone());
    }

    by_subject
        .into_iter()
        .map(|(subject, records)| {
            let values: Vec<f64> = records.iter().map(AssessmentRecord::percentage).collect();
            SubjectHeat {
                subject: subject.to_string(),
                average: round1(mean(&values)),
                slope: round1(score_slope(&records, None)),
                n_assessments: records.len(),
            }
        })
        .collect()
}

pub fn risk_matrix(profiles: &[StudentRiskProfile]) -> RiskMatrix {
    let mut cells: BTreeMap<(AcademicRisk, AttendanceRisk, PaymentRisk), usize> = BTreeMap::new();
    for profile in profiles {
        *cells
            .entry((profile.academic, profile.attendance, profile.payment))
            .or_insert(0) += 1;
    }

    RiskMatrix {
        academic: AcademicRisk::ALL
            .iter()
            .map(|level| LevelCount {
                level: level.as_str(),
                count: profiles.iter().filter(|p| p.academic == *level).count(),
            })
            .collect(),
        attendance: AttendanceRisk::ALL
            .iter()
            .map(|level| LevelCount {
                level: level.as_str(),
                count: profiles.iter().filter(|p| p.attendance == *level).count(),
            })
            .collect(),
        payment: PaymentRisk::ALL
            .iter()
            .map(|level| LevelCount {
                level: level.as_str(),
                count: profiles.iter().filter(|p| p.payment == *level).count(),
            })
            .collect(),
        cells: cells
            .into_iter()
            .map(|((academic, attendance, payment), count)| RiskCell {
                academic,
                attendance,
                payment,
                count,
            })
            .collect(),
    }
}

pub fn revenue_summary(payments: &[PaymentRecord], period: &str) -> RevenueSummary {
    let in_period = payments.iter().filter(|p| p.month_for == period);
    let mut collected = 0.0;
    let mut expected = 0.0;
    for payment in in_period {
        expected += payment.amount;
        if payment.status.eq_ignore_ascii_case("paid") {
            collected += payment.amount;
        }
    }

    let collection_rate = if expected > 0.0 {
        round1(clamp_pct(collected / expected * 100.0))
    } else {
        0.0
    };

    RevenueSummary {
        period: period.to_string(),
        collected,
        expected,
        collection_rate,
    }
}

pub fn top_performers(
    profiles: &[StudentRiskProfile],
    assessments: &[AssessmentRecord],
) -> Vec<TopPerformer> {
    let mut by_student: HashMap<Uuid, Vec<f64>> = HashMap::new();
    for record in assessments {
        by_student.entry(record.student_id).or_default().push(record.percentage());
    }

    let mut ranked: Vec<TopPerformer> = profiles
        .iter()
        .filter_map(|profile| {
            let values = by_student.get(&profile.student_id)?;
            if values.len() < MIN_ASSESSMENTS_FOR_RANKING {
                return None;
            }
            Some(TopPerformer {
                student_id: profile.student_id,
                name: profile.name.clone(),
                average: round1(mean(values)),
                n_assessments: values.len(),
            })
        })
        .collect();

    ranked.sort_by(|a, b| b.average.partial_cmp(&a.average).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(TOP_PERFORMERS);
    ranked
}

/// One sentence per flagged student, picked by severity.
pub fn worklist_insight(profile: &StudentRiskProfile) -> String {
    let name = &profile.name;
    if profile.academic == AcademicRisk::Critical {
        format!("{name} is academically critical and needs an intervention this week.")
    } else if profile.attendance == AttendanceRisk::AtRisk {
        format!("{name}'s attendance has slipped into the at-risk band.")
    } else if payment_at_risk(profile.payment) {
        format!("{name} has {} fees that may interrupt enrolment.", profile.payment)
    } else {
        format!("{name} needs additional academic support.")
    }
}

pub fn worklist(profiles: &[StudentRiskProfile]) -> Vec<WorklistEntry> {
    let mut entries: Vec<WorklistEntry> = profiles
        .iter()
        .filter(|profile| is_flagged(profile))
        .map(|profile| WorklistEntry {
            student_id: profile.student_id,
            name: profile.name.clone(),
            academic: profile.academic,
            attendance: profile.attendance,
            payment: profile.payment,
            dropout_score: dropout_score(profile),
            insight: worklist_insight(profile),
        })
        .collect();

    entries.sort_by(|a, b| b.dropout_score.cmp(&a.dropout_score));
    entries
}

pub fn class_trend(weeks: &[WeeklyAverage]) -> ClassTrend {
    let raw: Vec<f64> = weeks.iter().map(|week| clamp_pct(week.avg_pct)).collect();
    let smoothed = ewma(&raw, DEFAULT_ALPHA);
    let pairs: Vec<(f64, f64)> = smoothed
        .iter()
        .enumerate()
        .map(|(idx, value)| ((idx + 1) as f64, *value))
        .collect();

    ClassTrend {
        points: weeks
            .iter()
            .zip(raw.iter().zip(smoothed.iter()))
            .map(|(week, (average, smoothed))| TrendPoint {
                week_start: week.week_start,
                average: round1(*average),
                smoothed: round1(*smoothed),
                assessment_count: week.assessment_count,
            })
            .collect(),
        slope: round1(linear_slope(&pairs)),
    }
}

pub async fn build_dashboard(pool: &PgPool) -> EngineResult<Dashboard> {
    let now = Utc::now();
    let period = current_billing_period();
    let mut conn = pool.acquire().await?;

    let profiles = db::fetch_profiles(&mut conn).await?;
    let assessments = db::fetch_all_assessments(&mut conn).await?;
    let payments = db::fetch_payments_for_period(&mut conn, &period).await?;
    let since = now.date_naive() - Duration::weeks(TREND_WEEKS);
    let weeks = db::fetch_weekly_averages(&mut conn, since).await?;
    let alerts = db::fetch_unresolved_alerts(&mut conn, ALERT_FEED_LIMIT).await?;
    let outcomes = db::fetch_outcomes(&mut conn).await?;
    drop(conn);

    let dashboard = Dashboard {
        generated_at: now,
        heatmap: subject_heatmap(&assessments),
        risk_matrix: risk_matrix(&profiles),
        revenue: revenue_summary(&payments, &period),
        top_performers: top_performers(&profiles, &assessments),
        worklist: worklist(&profiles),
        class_trend: class_trend(&weeks),
        alerts,
        feedback: summarize(&outcomes),
    };

    info!(
        students = profiles.len(),
        assessments = assessments.len(),
        worklist = dashboard.worklist.len(),
        alerts = dashboard.alerts.len(),
        "dashboard assembled"
    );
    Ok(dashboard)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(
        name: &str,
        academic: AcademicRisk,
        attendance: AttendanceRisk,
        payment: PaymentRisk,
    ) -> StudentRiskProfile {
        StudentRiskProfile {
            student_id: Uuid::new_v4(),
            name: name.to_string(),
            subjects: vec!["Maths".to_string()],
            academic,
            attendance,
            payment,
        }
    }

    fn assessment(student_id: Uuid, subject: &str, score: f64, days_ago: i64) -> AssessmentRecord {
        AssessmentRecord {
            student_id,
            subject: subject.to_string(),
            score,
            max_score: 100.0,
            date: Utc::now().date_naive() - Duration::days(days_ago),
        }
    }

    #[test]
    fn heatmap_groups_by_subject() {
        let id = Uuid::new_v4();
        let records = vec![
            assessment(id, "Maths", 50.0, 30),
            assessment(id, "English", 80.0, 25),
            assessment(id, "Maths", 60.0, 20),
            assessment(id, "Maths", 70.0, 10),
        ];

        let heat = subject_heatmap(&records);
        assert_eq!(heat.len(), 2);
        assert_eq!(heat[0].subject, "English");
        assert_eq!(heat[0].slope, 0.0);
        assert_eq!(heat[1].average, 60.0);
        assert_eq!(heat[1].slope, 10.0);
        assert_eq!(heat[1].n_assessments, 3);
    }

    #[test]
    fn matrix_counts_each_dimension() {
        let profiles = vec![
            profile("A", AcademicRisk::Critical, AttendanceRisk::AtRisk, PaymentRisk::Paid),
            profile("B", AcademicRisk::Critical, AttendanceRisk::AtRisk, PaymentRisk::Paid),
            profile("C", AcademicRisk::OnTrack, AttendanceRisk::Ok, PaymentRisk::Pending),
        ];

        let matrix = risk_matrix(&profiles);
        assert_eq!(matrix.cells.len(), 2);
        assert_eq!(matrix.cells.iter().map(|c| c.count).sum::<usize>(), 3);
        let critical = matrix.academic.iter().find(|c| c.level == "critical").unwrap();
        assert_eq!(critical.count, 2);
        assert_eq!(matrix.payment.len(), PaymentRisk::ALL.len());
    }

    #[test]
    fn revenue_only_counts_paid_rows() {
        let payment = |amount: f64, status: &str, month_for: &str| PaymentRecord {
            amount,
            status: status.to_string(),
            month_for: month_for.to_string(),
        };
        let payments = vec![
            payment(300.0, "paid", "2026-10"),
            payment(100.0, "unpaid", "2026-10"),
            payment(900.0, "paid", "2026-09"),
        ];

        let revenue = revenue_summary(&payments, "2026-10");
        assert_eq!(revenue.collected, 300.0);
        assert_eq!(revenue.expected, 400.0);
        assert_eq!(revenue.collection_rate, 75.0);
        assert_eq!(revenue_summary(&[], "2026-10").collection_rate, 0.0);
    }

    #[test]
    fn top_performers_need_two_assessments() {
        let healthy = |name: &str| {
            profile(name, AcademicRisk::OnTrack, AttendanceRisk::Ok, PaymentRisk::Paid)
        };
        let strong = healthy("Strong");
        let single = healthy("Single");
        let steady = healthy("Steady");
        let records = vec![
            assessment(strong.student_id, "Maths", 90.0, 10),
            assessment(strong.student_id, "Maths", 94.0, 5),
            assessment(single.student_id, "Maths", 100.0, 5),
            assessment(steady.student_id, "Maths", 70.0, 10),
            assessment(steady.student_id, "Maths", 72.0, 5),
        ];

        let ranked = top_performers(&[single, steady, strong], &records);
        let names: Vec<&str> = ranked.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Strong", "Steady"]);
        assert_eq!(ranked[0].average, 92.0);
    }

    #[test]
    fn worklist_picks_most_severe_sentence() {
        let profiles = vec![
            profile("Ada", AcademicRisk::Critical, AttendanceRisk::AtRisk, PaymentRisk::Restricted),
            profile("Ben", AcademicRisk::OnTrack, AttendanceRisk::AtRisk, PaymentRisk::Outstanding),
            profile("Cy", AcademicRisk::OnTrack, AttendanceRisk::Ok, PaymentRisk::Outstanding),
            profile("Dee", AcademicRisk::OnTrack, AttendanceRisk::Ok, PaymentRisk::Pending),
            profile("Eli", AcademicRisk::NeedsSupport, AttendanceRisk::Ok, PaymentRisk::Paid),
        ];

        let list = worklist(&profiles);
        let names: Vec<&str> = list.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "Ben", "Eli", "Cy"]);
        assert!(list[0].insight.contains("academically critical"));
        assert!(list[1].insight.contains("attendance"));
        assert!(list[3].insight.contains("outstanding"));
        assert!(list[2].insight.contains("support"));
    }

    #[test]
    fn class_trend_smooths_weekly_averages() {
        let start = NaiveDate::from_ymd_opt(2026, 9, 7).unwrap();
        let weeks: Vec<WeeklyAverage> = [60.0, 70.0, 80.0]
            .iter()
            .enumerate()
            .map(|(idx, avg)| WeeklyAverage {
                week_start: start + Duration::weeks(idx as i64),
                avg_pct: *avg,
                assessment_count: 4,
            })
            .collect();

        let trend = class_trend(&weeks);
        assert_eq!(trend.points.len(), 3);
        assert_eq!(trend.points[0].smoothed, 60.0);
        assert_eq!(trend.points[1].smoothed, 63.5);
        assert!(trend.slope > 0.0);
        assert_eq!(class_trend(&[]).slope, 0.0);
    }
}
