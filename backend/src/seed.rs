//! Demo accounts and records for local development.
//!
//! Everything is upserted on natural keys so the seeder can be re-run
//! against a populated database.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use log::info;
use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;

use crate::models::attendance::AttendanceStatus;
use crate::models::marks::{grade_for_percentage, ExamType, MarkEntry, MarkSheetKey, SheetEntries};
use crate::models::role::Role;
use crate::password_reset::DEFAULT_PASSWORDS;
use crate::users::hash_password;

pub const DEMO_SUBJECT: &str = "Data Structures";

#[derive(Debug)]
pub enum SeedError {
    DatabaseError(String),
    HashError(String),
}

impl std::fmt::Display for SeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedError::DatabaseError(s) => write!(f, "Database error: {}", s),
            SeedError::HashError(s) => write!(f, "Hashing error: {}", s),
        }
    }
}

impl std::error::Error for SeedError {}

impl From<sqlx::Error> for SeedError {
    fn from(err: sqlx::Error) -> Self {
        SeedError::DatabaseError(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for SeedError {
    fn from(err: argon2::password_hash::Error) -> Self {
        SeedError::HashError(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoAccount {
    pub login_id: String,
    pub email: String,
    pub role: Role,
    pub name: String,
    pub profile_data: JsonValue,
    pub linked_student_id: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
pub struct SeedSummary {
    pub accounts: usize,
    pub attendance_records: usize,
    pub mark_entries: usize,
}

fn account(
    login_id: &str,
    email: String,
    role: Role,
    name: &str,
    profile_data: JsonValue,
    linked_student_id: Option<&str>,
) -> DemoAccount {
    DemoAccount {
        login_id: login_id.to_string(),
        email,
        role,
        name: name.to_string(),
        profile_data,
        linked_student_id: linked_student_id.map(str::to_string),
    }
}

/// Students and parents sign in with their bare id, so their email is
/// derived from it; teachers sign in with a real address.
pub fn demo_accounts(email_domain: &str) -> Vec<DemoAccount> {
    let bare = |login_id: &str| format!("{}@{}", login_id, email_domain).to_lowercase();

    vec![
        account(
            "T-0001",
            format!("john.smith@{}", email_domain),
            Role::Teacher,
            "John Smith",
            json!({
                "subjects": ["Data Structures", "Algorithms"],
                "classes": ["Computer Science"],
                "phone": "555-0101",
                "experience": "12 years"
            }),
            None,
        ),
        account(
            "T-0002",
            format!("sarah.johnson@{}", email_domain),
            Role::Teacher,
            "Sarah Johnson",
            json!({
                "subjects": ["Operating Systems", "Computer Networks"],
                "classes": ["Computer Science"],
                "experience": "7 years"
            }),
            None,
        ),
        account(
            "CS20230001",
            bare("CS20230001"),
            Role::Student,
            "Michael Brown",
            json!({
                "rollNumber": "S001",
                "class": "Computer Science",
                "section": "A",
                "department": "Computer Science"
            }),
            None,
        ),
        account(
            "CS20230002",
            bare("CS20230002"),
            Role::Student,
            "Emma Davis",
            json!({
                "rollNumber": "S002",
                "class": "Computer Science",
                "section": "A",
                "department": "Computer Science"
            }),
            None,
        ),
        account(
            "P-CS20230001",
            bare("P-CS20230001"),
            Role::Parent,
            "Robert Brown",
            json!({"phone": "555-0201"}),
            Some("CS20230001"),
        ),
        account(
            "P-CS20230002",
            bare("P-CS20230002"),
            Role::Parent,
            "Jennifer Davis",
            json!({"phone": "555-0202"}),
            Some("CS20230002"),
        ),
    ]
}

/// Attendance pattern for the demo days, one row per day, one column per student.
pub fn demo_attendance_pattern() -> Vec<[(AttendanceStatus, Option<&'static str>); 2]> {
    vec![
        [(AttendanceStatus::Present, None), (AttendanceStatus::Present, None)],
        [(AttendanceStatus::Present, None), (AttendanceStatus::Absent, Some("Sick leave"))],
        [(AttendanceStatus::Late, Some("Bus delay")), (AttendanceStatus::Present, None)],
    ]
}

pub fn demo_dates(today: NaiveDate, days: usize) -> Vec<NaiveDate> {
    (1..=days as i64).rev().map(|offset| today - Duration::days(offset)).collect()
}

pub async fn seed_demo_data(pool: &PgPool, email_domain: &str) -> Result<SeedSummary, SeedError> {
    let password_hash = hash_password(DEFAULT_PASSWORDS[0])?;
    let mut summary = SeedSummary::default();
    let mut tx = pool.begin().await?;

    for demo in demo_accounts(email_domain) {
        sqlx::query(
            "INSERT INTO users (login_id, email, role, name, profile_data, password_hash, linked_student_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (login_id) DO UPDATE
             SET email = EXCLUDED.email,
                 role = EXCLUDED.role,
                 name = EXCLUDED.name,
                 profile_data = EXCLUDED.profile_data,
                 linked_student_id = EXCLUDED.linked_student_id,
                 updated_at = NOW()"
        )
        .bind(&demo.login_id)
        .bind(&demo.email)
        .bind(demo.role)
        .bind(&demo.name)
        .bind(&demo.profile_data)
        .bind(&password_hash)
        .bind(&demo.linked_student_id)
        .execute(&mut *tx)
        .await?;
        summary.accounts += 1;
    }

    let (teacher_id, teacher_name) = sqlx::query_as::<_, (i32, String)>(
        "SELECT id, name FROM users WHERE login_id = 'T-0001'"
    )
    .fetch_one(&mut *tx)
    .await?;

    let student_ids = sqlx::query_scalar::<_, i32>(
        "SELECT id FROM users WHERE login_id IN ('CS20230001', 'CS20230002') ORDER BY login_id"
    )
    .fetch_all(&mut *tx)
    .await?;

    let today = Utc::now().date_naive();
    let pattern = demo_attendance_pattern();
    for (date, day) in demo_dates(today, pattern.len()).into_iter().zip(pattern) {
        for (student_id, (status, remarks)) in student_ids.iter().zip(day) {
            sqlx::query(
                "INSERT INTO attendance (student_id, subject, date, status, remarks, teacher_id, teacher_name)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (student_id, subject, date) DO UPDATE
                 SET status = EXCLUDED.status,
                     remarks = EXCLUDED.remarks,
                     teacher_id = EXCLUDED.teacher_id,
                     teacher_name = EXCLUDED.teacher_name,
                     updated_at = NOW()"
            )
            .bind(student_id)
            .bind(DEMO_SUBJECT)
            .bind(date)
            .bind(status)
            .bind(remarks)
            .bind(teacher_id)
            .bind(&teacher_name)
            .execute(&mut *tx)
            .await?;
            summary.attendance_records += 1;
        }
    }

    let key = MarkSheetKey {
        subject: DEMO_SUBJECT.to_string(),
        semester: 1,
        exam_type: ExamType::Final,
        year: today.year(),
    };
    let now = Utc::now();
    let entries: SheetEntries = student_ids
        .iter()
        .zip([86.0, 72.5])
        .map(|(student_id, marks)| {
            (
                student_id.to_string(),
                MarkEntry {
                    marks,
                    grade: grade_for_percentage(marks).to_string(),
                    remarks: None,
                    last_updated: now,
                },
            )
        })
        .collect();
    summary.mark_entries = entries.len();

    let entries_value = serde_json::to_value(&entries)
        .map_err(|e| SeedError::DatabaseError(e.to_string()))?;

    sqlx::query(
        "INSERT INTO mark_sheets (sheet_key, subject, semester, exam_type, year, entries)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (sheet_key) DO UPDATE
         SET entries = mark_sheets.entries || EXCLUDED.entries,
             updated_at = NOW()"
    )
    .bind(key.document_id())
    .bind(&key.subject)
    .bind(key.semester)
    .bind(key.exam_type.as_str())
    .bind(key.year)
    .bind(&entries_value)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        "Seeded {} accounts, {} attendance records, {} marks",
        summary.accounts, summary.attendance_records, summary.mark_entries
    );

    Ok(summary)
}
