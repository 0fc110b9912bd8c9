use chrono::NaiveDate;
use serde::Serialize;

/// Marks at or above this count as a pass in the class report.
pub const PASS_MARK: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeStatus {
    Paid,
    Partial,
    Unpaid,
}

impl FeeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeeStatus::Paid => "paid",
            FeeStatus::Partial => "partial",
            FeeStatus::Unpaid => "unpaid",
        }
    }

    pub fn parse(s: &str) -> Option<FeeStatus> {
        match s {
            "paid" => Some(FeeStatus::Paid),
            "partial" => Some(FeeStatus::Partial),
            "unpaid" => Some(FeeStatus::Unpaid),
            _ => None,
        }
    }
}

/// Ordered rule: the branches must be checked in this sequence. The last
/// branch is unreachable through the ones above it and defaults to unpaid.
pub fn compute_fee_status(amount: f64, amount_paid: f64) -> (f64, FeeStatus) {
    let balance = amount - amount_paid;
    let status = if amount_paid <= 0.0 {
        FeeStatus::Unpaid
    } else if amount_paid > 0.0 && amount_paid < amount {
        FeeStatus::Partial
    } else if balance <= 0.0 {
        FeeStatus::Paid
    } else {
        FeeStatus::Unpaid
    };
    (balance, status)
}

/// Half-up rounding to the nearest integer, matching `Math.round`.
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// `round(100 * n / d)`, 0 when the denominator is 0.
pub fn rate(n: usize, d: usize) -> i64 {
    if d == 0 {
        0
    } else {
        round_half_up(100.0 * n as f64 / d as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub present_days: i64,
    pub absent_days: i64,
    pub percentage: i64,
}

pub fn attendance_summary(present: usize, total: usize) -> AttendanceSummary {
    AttendanceSummary {
        present_days: present as i64,
        absent_days: total.saturating_sub(present) as i64,
        percentage: rate(present, total),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSummary {
    pub average_marks: i64,
    pub highest_marks: f64,
    pub lowest_marks: f64,
    pub pass_rate: i64,
}

pub fn exam_summary(marks: &[f64]) -> ExamSummary {
    if marks.is_empty() {
        return ExamSummary {
            average_marks: 0,
            highest_marks: 0.0,
            lowest_marks: 0.0,
            pass_rate: 0,
        };
    }
    let sum: f64 = marks.iter().sum();
    let mut highest = marks[0];
    let mut lowest = marks[0];
    for &m in &marks[1..] {
        if m > highest {
            highest = m;
        }
        if m < lowest {
            lowest = m;
        }
    }
    let passed = marks.iter().filter(|&&m| m >= PASS_MARK).count();
    ExamSummary {
        average_marks: round_half_up(sum / marks.len() as f64),
        highest_marks: highest,
        lowest_marks: lowest,
        pass_rate: rate(passed, marks.len()),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeeFigures {
    pub amount: f64,
    pub amount_paid: f64,
    pub status: FeeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeTotals {
    pub total_fees: f64,
    pub collected_fees: f64,
    pub pending_fees: f64,
    pub defaulters: i64,
}

pub fn fee_totals(rows: &[FeeFigures]) -> FeeTotals {
    let total: f64 = rows.iter().map(|f| f.amount).sum();
    let collected: f64 = rows.iter().map(|f| f.amount_paid).sum();
    let defaulters = rows
        .iter()
        .filter(|f| f.status == FeeStatus::Unpaid)
        .count() as i64;
    FeeTotals {
        total_fees: total,
        collected_fees: collected,
        pending_fees: total - collected,
        defaulters,
    }
}

/// Entity dates are plain `YYYY-MM-DD` strings.
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}
