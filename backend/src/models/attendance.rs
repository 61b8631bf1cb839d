use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attendance_status", rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    /// Case-insensitive; `"Present"` and `"LATE"` are both accepted.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            _ => None,
        }
    }
}

#[derive(Serialize, Debug, Clone, FromRow)]
pub struct AttendanceRecord {
    pub id: i32,
    pub student_id: i32,
    pub student_name: Option<String>,
    pub subject: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
    pub teacher_id: Option<i32>,
    pub teacher_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Legacy string form of the `(student, subject, date)` identity.
pub fn attendance_key(student_login_id: &str, subject: &str, date: NaiveDate) -> String {
    format!("{}_{}_{}", student_login_id, subject, date.format("%Y-%m-%d"))
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct AttendanceSummary {
    pub present: u32,
    pub absent: u32,
    pub late: u32,
    pub total: u32,
    pub percentage: u32,
    pub present_percentage: u32,
    pub absent_percentage: u32,
    pub late_percentage: u32,
}

fn rounded_share(part: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (part as f64 / total as f64 * 100.0).round() as u32
}

impl AttendanceSummary {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = AttendanceStatus>,
    {
        let mut summary = AttendanceSummary::default();
        for status in statuses {
            match status {
                AttendanceStatus::Present => summary.present += 1,
                AttendanceStatus::Absent => summary.absent += 1,
                AttendanceStatus::Late => summary.late += 1,
            }
        }
        summary.total = summary.present + summary.absent + summary.late;
        summary.percentage = rounded_share(summary.present, summary.total);
        summary.present_percentage = summary.percentage;
        summary.absent_percentage = rounded_share(summary.absent, summary.total);
        summary.late_percentage = rounded_share(summary.late, summary.total);
        summary
    }
}

/// `"all"` or an empty filter selects every subject.
pub fn subject_filter(subject: Option<&str>) -> Option<&str> {
    match subject.map(str::trim) {
        None | Some("") => None,
        Some(s) if s.eq_ignore_ascii_case("all") => None,
        Some(s) => Some(s),
    }
}

pub fn filter_by_subject<'a>(
    records: &'a [AttendanceRecord],
    subject: Option<&str>,
) -> Vec<&'a AttendanceRecord> {
    match subject_filter(subject) {
        None => records.iter().collect(),
        Some(subject) => records.iter().filter(|r| r.subject == subject).collect(),
    }
}

/// First and last day of a `YYYY-MM` month.
pub fn month_bounds(month: &str) -> Option<(NaiveDate, NaiveDate)> {
    let (year, month) = month.trim().split_once('-')?;
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next_first.pred_opt()?))
}

pub fn current_month(today: NaiveDate) -> String {
    format!("{:04}-{:02}", today.year(), today.month())
}
