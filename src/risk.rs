use chrono::{Datelike, NaiveDate, Utc};

use crate::models::{AcademicRisk, AttendanceRisk, DropoutLevel, PaymentRisk, StudentRiskProfile};

pub const MAX_DROPOUT_SCORE: u32 = 100;

pub fn academic_points(level: AcademicRisk) -> u32 {
    match level {
        AcademicRisk::Critical => 40,
        AcademicRisk::NeedsSupport => 20,
        AcademicRisk::OnTrack => 0,
    }
}

pub fn attendance_points(level: AttendanceRisk) -> u32 {
    match level {
        AttendanceRisk::AtRisk => 30,
        AttendanceRisk::Ok => 0,
    }
}

pub fn payment_points(level: PaymentRisk) -> u32 {
    match level {
        PaymentRisk::Restricted => 30,
        PaymentRisk::Outstanding => 15,
        PaymentRisk::Pending => 5,
        PaymentRisk::Paid => 0,
    }
}

pub fn dropout_score(profile: &StudentRiskProfile) -> u32 {
    let total = academic_points(profile.academic)
        + attendance_points(profile.attendance)
        + payment_points(profile.payment);
    total.min(MAX_DROPOUT_SCORE)
}

pub fn dropout_level(score: u32) -> DropoutLevel {
    if score >= 70 {
        DropoutLevel::Critical
    } else if score >= 40 {
        DropoutLevel::High
    } else if score >= 20 {
        DropoutLevel::Medium
    } else {
        DropoutLevel::Low
    }
}

pub fn payment_at_risk(level: PaymentRisk) -> bool {
    matches!(level, PaymentRisk::Outstanding | PaymentRisk::Restricted)
}

/// Whether any risk dimension puts the student on the intervention worklist.
pub fn is_flagged(profile: &StudentRiskProfile) -> bool {
    profile.academic != AcademicRisk::OnTrack
        || profile.attendance == AttendanceRisk::AtRisk
        || payment_at_risk(profile.payment)
}

/// Billing period key (`YYYY-MM`) that `month_for` is matched against.
pub fn billing_period(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

pub fn current_billing_period() -> String {
    billing_period(Utc::now().date_naive())
}
