use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Declares a closed, string-backed level enum with its store spelling.
macro_rules! string_level {
    ($name:ident, $dimension:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(EngineError::UnknownLevel {
                        dimension: $dimension,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_level!(AcademicRisk, "academic", {
    OnTrack => "on_track",
    NeedsSupport => "needs_support",
    Critical => "critical",
});

string_level!(AttendanceRisk, "attendance", {
    Ok => "ok",
    AtRisk => "at_risk",
});

string_level!(PaymentRisk, "payment", {
    Pending => "pending",
    Outstanding => "outstanding",
    Restricted => "restricted",
    Paid => "paid",
});

impl AcademicRisk {
    pub const ALL: [AcademicRisk; 3] = [
        AcademicRisk::OnTrack,
        AcademicRisk::NeedsSupport,
        AcademicRisk::Critical,
    ];
}

impl AttendanceRisk {
    pub const ALL: [AttendanceRisk; 2] = [AttendanceRisk::Ok, AttendanceRisk::AtRisk];
}

impl PaymentRisk {
    pub const ALL: [PaymentRisk; 4] = [
        PaymentRisk::Pending,
        PaymentRisk::Outstanding,
        PaymentRisk::Restricted,
        PaymentRisk::Paid,
    ];
}

string_level!(AttendanceStatus, "attendance status", {
    Present => "present",
    Absent => "absent",
});

string_level!(Outcome, "outcome", {
    Improved => "improved",
    NoChange => "no_change",
    Declined => "declined",
});

#[derive(Debug, Clone, Serialize)]
pub struct StudentRiskProfile {
    pub student_id: Uuid,
    pub name: String,
    pub subjects: Vec<String>,
    pub academic: AcademicRisk,
    pub attendance: AttendanceRisk,
    pub payment: PaymentRisk,
}

/// One attendance mark. Subject and time slot stay in the store; the windows only need these.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone)]
pub struct AssessmentRecord {
    pub student_id: Uuid,
    pub subject: String,
    pub score: f64,
    pub max_score: f64,
    pub date: NaiveDate,
}

impl AssessmentRecord {
    pub fn percentage(&self) -> f64 {
        if self.max_score <= 0.0 {
            return 0.0;
        }
        clamp_pct(self.score / self.max_score * 100.0)
    }
}

#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub amount: f64,
    pub status: String,
    pub month_for: String,
}

/// Everything the per-student analytics read, loaded in one store visit.
#[derive(Debug, Clone)]
pub struct StudentRecords {
    pub profile: StudentRiskProfile,
    pub attendance: Vec<AttendanceRecord>,
    /// Chronological (oldest first).
    pub assessments: Vec<AssessmentRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricSnapshot {
    pub attendance: Option<f64>,
    pub avg_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterventionLogEntry {
    pub id: Uuid,
    pub student_id: Uuid,
    pub alert_id: Option<Uuid>,
    pub rec_type: String,
    pub rec_action: String,
    pub note: String,
    pub metric_snapshot: MetricSnapshot,
    pub outcome: Option<Outcome>,
    pub created_at: DateTime<Utc>,
    pub evaluated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Insight {
    pub level: InsightLevel,
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

/// Declaration order is sort order: high sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    SendReminder,
    OneOnOne,
    ExtraSession,
    RecommendVideo,
    MotivationalNudge,
    PaymentFollowup,
}

impl RecommendationType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecommendationType::SendReminder => "send_reminder",
            RecommendationType::OneOnOne => "one_on_one",
            RecommendationType::ExtraSession => "extra_session",
            RecommendationType::RecommendVideo => "recommend_video",
            RecommendationType::MotivationalNudge => "motivational_nudge",
            RecommendationType::PaymentFollowup => "payment_followup",
        }
    }
}

impl fmt::Display for RecommendationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub priority: Priority,
    #[serde(rename = "type")]
    pub rec_type: RecommendationType,
    pub action: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Pass,
    AtRisk,
    NoData,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    pub subject: String,
    pub current_avg: Option<f64>,
    pub probability: Option<f64>,
    pub improved_probability: Option<f64>,
    pub attendance_rate: Option<f64>,
    pub slope: f64,
    pub n_assessments: usize,
    pub last_assessed: Option<NaiveDate>,
    pub smoothed_series: Vec<f64>,
    pub status: PredictionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropoutLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct DropoutRisk {
    pub student_id: Uuid,
    pub score: u32,
    pub level: DropoutLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedbackSummary {
    pub improved: usize,
    pub no_change: usize,
    pub declined: usize,
    pub pending: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub student_name: String,
    pub alert_type: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WeeklyAverage {
    pub week_start: NaiveDate,
    pub avg_pct: f64,
    pub assessment_count: i64,
}

pub fn clamp_pct(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
