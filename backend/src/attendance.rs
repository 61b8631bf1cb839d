use actix_web::{get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{NaiveDate, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::models::attendance::{
    attendance_key, current_month, filter_by_subject, month_bounds, subject_filter, AttendanceRecord,
    AttendanceStatus, AttendanceSummary,
};
use crate::models::role::Role;
use crate::roles::{require_input, require_role, verify_can_access_student};
use crate::users::ErrorResponse;
use crate::AppState;

const RECORD_COLUMNS: &str =
    "a.id, a.student_id, u.name AS student_name, a.subject, a.date, a.status, a.remarks,
     a.teacher_id, a.teacher_name, a.updated_at";

#[derive(Deserialize)]
struct AttendanceEntryInput {
    student_id: i32,
    status: String,
    remarks: Option<String>,
}

#[derive(Deserialize)]
struct SaveAttendanceBatchRequest {
    subject: String,
    date: NaiveDate,
    records: Vec<AttendanceEntryInput>,
}

#[derive(Deserialize)]
struct UpdateAttendanceRequest {
    status: String,
    remarks: Option<String>,
}

#[derive(Deserialize)]
struct DayQuery {
    subject: String,
    date: NaiveDate,
}

#[derive(Deserialize)]
pub struct MonthQuery {
    pub month: Option<String>,
    pub subject: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct AttendanceReport {
    pub student_id: i32,
    pub month: String,
    pub subject: Option<String>,
    pub subjects: Vec<String>,
    pub records: Vec<AttendanceRecord>,
    pub summary: AttendanceSummary,
}

/// Catalogue order first, then any extra subjects seen in the records.
pub fn merge_subjects(catalogue: Vec<String>, records: &[AttendanceRecord]) -> Vec<String> {
    let mut subjects = catalogue;
    for record in records {
        if !subjects.iter().any(|s| s == &record.subject) {
            subjects.push(record.subject.clone());
        }
    }
    subjects
}

/// Display name stamped on attendance rows and notes.
pub async fn fetch_teacher_name(db: &PgPool, teacher_id: i32) -> Result<String, sqlx::Error> {
    let name = sqlx::query_scalar::<_, String>("SELECT name FROM users WHERE id = $1")
        .bind(teacher_id)
        .fetch_optional(db)
        .await?;

    Ok(name.unwrap_or_else(|| "Teacher".to_string()))
}

/// Month report for one student; shared by the student, parent and teacher views.
pub async fn load_attendance_report(
    db: &PgPool,
    student_id: i32,
    query: &MonthQuery,
) -> Result<AttendanceReport, HttpResponse> {
    let month = query
        .month
        .clone()
        .unwrap_or_else(|| current_month(Utc::now().date_naive()));

    let (start, end) = match month_bounds(&month) {
        Some(bounds) => bounds,
        None => {
            return Err(HttpResponse::BadRequest().json(ErrorResponse::new(
                "Invalid month. Use YYYY-MM",
            )));
        }
    };

    let records = match sqlx::query_as::<_, AttendanceRecord>(&format!(
        "SELECT {} FROM attendance a
         JOIN users u ON u.id = a.student_id
         WHERE a.student_id = $1 AND a.date BETWEEN $2 AND $3
         ORDER BY a.date, a.subject",
        RECORD_COLUMNS
    ))
    .bind(student_id)
    .bind(start)
    .bind(end)
    .fetch_all(db)
    .await
    {
        Ok(records) => records,
        Err(e) => {
            error!("Failed to fetch attendance for student {}: {}", student_id, e);
            return Err(HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error")));
        }
    };

    let catalogue = match sqlx::query_scalar::<_, String>("SELECT name FROM subjects ORDER BY code")
        .fetch_all(db)
        .await
    {
        Ok(catalogue) => catalogue,
        Err(e) => {
            error!("Failed to load subject catalogue: {}", e);
            return Err(HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error")));
        }
    };

    let subject = subject_filter(query.subject.as_deref()).map(str::to_string);
    let filtered: Vec<AttendanceRecord> = filter_by_subject(&records, subject.as_deref())
        .into_iter()
        .cloned()
        .collect();
    let summary = AttendanceSummary::from_statuses(filtered.iter().map(|r| r.status));

    Ok(AttendanceReport {
        student_id,
        month,
        subject,
        subjects: merge_subjects(catalogue, &records),
        records: filtered,
        summary,
    })
}

#[derive(Debug, Clone)]
pub struct AttendanceWrite {
    pub student_id: i32,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
}

/// Upserts one class session in a single transaction. A row with the same
/// `(student, subject, date)` is replaced.
pub async fn save_attendance_records(
    db: &PgPool,
    subject: &str,
    date: NaiveDate,
    records: &[AttendanceWrite],
    teacher_id: i32,
    teacher_name: &str,
) -> Result<(), sqlx::Error> {
    let mut tx = db.begin().await?;

    for record in records {
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
        .bind(record.student_id)
        .bind(subject)
        .bind(date)
        .bind(record.status)
        .bind(&record.remarks)
        .bind(teacher_id)
        .bind(teacher_name)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

#[post("/api/attendance/batch")]
async fn save_attendance_batch(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    payload: Result<web::Json<SaveAttendanceBatchRequest>, actix_web::Error>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Teacher]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let payload = match require_input(payload) {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let subject = payload.subject.trim();
    if subject.is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::new("Subject is required"));
    }
    if payload.records.is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::new("No attendance records supplied"));
    }

    let mut writes = Vec::with_capacity(payload.records.len());
    for record in &payload.records {
        match AttendanceStatus::parse(&record.status) {
            Some(status) => writes.push(AttendanceWrite {
                student_id: record.student_id,
                status,
                remarks: record.remarks.clone(),
            }),
            None => {
                return HttpResponse::BadRequest().json(ErrorResponse::new(format!(
                    "Invalid attendance status: {}",
                    record.status
                )));
            }
        }
    }

    let student_ids: Vec<i32> = writes.iter().map(|w| w.student_id).collect();
    let known = match sqlx::query_as::<_, (i32, String)>(
        "SELECT id, login_id FROM users WHERE role = 'student' AND id = ANY($1)"
    )
    .bind(&student_ids)
    .fetch_all(&app_state.db)
    .await
    {
        Ok(ids) => ids,
        Err(e) => {
            error!("Failed to verify students: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    };

    let unknown: Vec<String> = student_ids
        .iter()
        .filter(|id| !known.iter().any(|(known_id, _)| known_id == *id))
        .map(|id| id.to_string())
        .collect();
    if !unknown.is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::new(format!(
            "Unknown student ids: {}",
            unknown.join(", ")
        )));
    }

    let teacher_name = match fetch_teacher_name(&app_state.db, claims.uid).await {
        Ok(name) => name,
        Err(e) => {
            error!("Failed to load teacher {}: {}", claims.uid, e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    };

    if let Err(e) = save_attendance_records(
        &app_state.db,
        subject,
        payload.date,
        &writes,
        claims.uid,
        &teacher_name,
    )
    .await
    {
        error!("Failed to save attendance: {}", e);
        return HttpResponse::InternalServerError()
            .json(ErrorResponse::new("Failed to save attendance"));
    }

    info!(
        "{} saved {} attendance records for {} on {}",
        claims.sub,
        writes.len(),
        subject,
        payload.date
    );

    let keys: Vec<String> = known
        .iter()
        .map(|(_, login_id)| attendance_key(login_id, subject, payload.date))
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "saved": writes.len(),
        "keys": keys,
        "subject": subject,
        "date": payload.date,
    }))
}

#[put("/api/attendance/{student_id}/{subject}/{date}")]
async fn update_attendance(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: Result<web::Path<(i32, String, NaiveDate)>, actix_web::Error>,
    payload: Result<web::Json<UpdateAttendanceRequest>, actix_web::Error>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Teacher]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let ((student_id, subject, date), payload) = match (require_input(path), require_input(payload)) {
        (Ok(path), Ok(payload)) => (path.into_inner(), payload),
        (Err(response), _) | (_, Err(response)) => return response,
    };

    let status = match AttendanceStatus::parse(&payload.status) {
        Some(status) => status,
        None => {
            return HttpResponse::BadRequest().json(ErrorResponse::new(format!(
                "Invalid attendance status: {}",
                payload.status
            )));
        }
    };

    let teacher_name = match fetch_teacher_name(&app_state.db, claims.uid).await {
        Ok(name) => name,
        Err(e) => {
            error!("Failed to load teacher {}: {}", claims.uid, e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    };

    let result = sqlx::query(
        "UPDATE attendance
         SET status = $1,
             remarks = COALESCE($2, remarks),
             teacher_id = $3,
             teacher_name = $4,
             updated_at = NOW()
         WHERE student_id = $5 AND subject = $6 AND date = $7"
    )
    .bind(status)
    .bind(&payload.remarks)
    .bind(claims.uid)
    .bind(&teacher_name)
    .bind(student_id)
    .bind(&subject)
    .bind(date)
    .execute(&app_state.db)
    .await;

    match result {
        Ok(done) if done.rows_affected() == 0 => {
            HttpResponse::NotFound().json(ErrorResponse::new("Attendance record not found"))
        }
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "message": "Attendance updated",
            "status": status,
        })),
        Err(e) => {
            error!("Failed to update attendance: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Failed to update attendance"))
        }
    }
}

#[get("/api/attendance")]
async fn list_attendance_for_day(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: Result<web::Query<DayQuery>, actix_web::Error>,
) -> impl Responder {
    if let Err(response) = require_role(&req, &app_state, &[Role::Teacher]) {
        return response;
    }

    let query = match require_input(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    match sqlx::query_as::<_, AttendanceRecord>(&format!(
        "SELECT {} FROM attendance a
         JOIN users u ON u.id = a.student_id
         WHERE a.subject = $1 AND a.date = $2
         ORDER BY u.login_id",
        RECORD_COLUMNS
    ))
    .bind(query.subject.trim())
    .bind(query.date)
    .fetch_all(&app_state.db)
    .await
    {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => {
            error!("Failed to fetch attendance: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Internal server error"))
        }
    }
}

#[get("/api/attendance/me")]
async fn my_attendance(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: Result<web::Query<MonthQuery>, actix_web::Error>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Student]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let query = match require_input(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    match load_attendance_report(&app_state.db, claims.uid, &query).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(response) => response,
    }
}

#[get("/api/attendance/students/{student_id}")]
async fn student_attendance(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: Result<web::Path<i32>, actix_web::Error>,
    query: Result<web::Query<MonthQuery>, actix_web::Error>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Teacher, Role::Student, Role::Parent]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let (student_id, query) = match (require_input(path), require_input(query)) {
        (Ok(path), Ok(query)) => (path.into_inner(), query),
        (Err(response), _) | (_, Err(response)) => return response,
    };

    if let Err(response) = verify_can_access_student(&claims, &app_state.db, student_id).await {
        return response;
    }

    match load_attendance_report(&app_state.db, student_id, &query).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(response) => response,
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .service(save_attendance_batch)
        .service(my_attendance)
        .service(student_attendance)
        .service(update_attendance)
        .service(list_attendance_for_day);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(subject: &str) -> AttendanceRecord {
        AttendanceRecord {
            id: 0,
            student_id: 1,
            student_name: None,
            subject: subject.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            status: AttendanceStatus::Present,
            remarks: None,
            teacher_id: None,
            teacher_name: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn merged_subjects_keep_catalogue_order() {
        let catalogue = vec!["Data Structures".to_string(), "Algorithms".to_string()];
        let records = vec![record("Algorithms"), record("Mathematics"), record("Mathematics")];
        assert_eq!(
            merge_subjects(catalogue, &records),
            vec!["Data Structures", "Algorithms", "Mathematics"]
        );
    }
}
