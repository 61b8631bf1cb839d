use actix_web::{get, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Datelike, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;

use crate::models::marks::{
    build_marks_report, grade_for_percentage, ExamType, MarkEntry, MarkSheetKey, MarksReport,
    SheetEntries, StudentMarks, Subject, MAX_SEMESTER, MIN_SEMESTER,
};
use crate::models::role::Role;
use crate::roles::{require_input, require_role, verify_can_access_student};
use crate::users::ErrorResponse;
use crate::AppState;

#[derive(Deserialize, Debug, Clone)]
pub struct MarkInput {
    pub marks: f64,
    pub grade: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Deserialize)]
struct UpsertMarkSheetRequest {
    subject: String,
    semester: i32,
    exam_type: ExamType,
    year: i32,
    entries: HashMap<i32, MarkInput>,
}

#[derive(Deserialize)]
struct SheetQuery {
    subject: String,
    semester: i32,
    exam_type: String,
    year: i32,
}

#[derive(Deserialize)]
pub struct ReportQuery {
    pub exam_type: Option<String>,
    pub semester: Option<i32>,
    pub year: Option<i32>,
}

#[derive(Serialize, Debug)]
pub struct MarkSheet {
    pub sheet_key: String,
    pub subject: String,
    pub semester: i32,
    pub exam_type: ExamType,
    pub year: i32,
    pub entries: SheetEntries,
}

/// Validates every mark against the subject's scale and fills missing grades.
pub fn prepare_entries(
    inputs: &HashMap<i32, MarkInput>,
    subject: &Subject,
    now: DateTime<Utc>,
) -> Result<SheetEntries, String> {
    let full_marks = subject.full_marks as f64;
    let mut entries = SheetEntries::new();

    for (student_id, input) in inputs {
        if !input.marks.is_finite() || input.marks < 0.0 || input.marks > full_marks {
            return Err(format!(
                "Marks for student {} must be between 0 and {}",
                student_id, subject.full_marks
            ));
        }

        let grade = match input.grade.as_deref().map(str::trim) {
            Some(grade) if !grade.is_empty() => grade.to_string(),
            _ => {
                let percentage = if full_marks > 0.0 {
                    input.marks / full_marks * 100.0
                } else {
                    0.0
                };
                grade_for_percentage(percentage).to_string()
            }
        };

        entries.insert(
            student_id.to_string(),
            MarkEntry {
                marks: input.marks,
                grade,
                remarks: input.remarks.clone().filter(|r| !r.trim().is_empty()),
                last_updated: now,
            },
        );
    }

    Ok(entries)
}

/// Entries that do not deserialize are skipped rather than failing the sheet.
fn parse_entries(value: JsonValue) -> SheetEntries {
    let map = match value {
        JsonValue::Object(map) => map,
        _ => return SheetEntries::new(),
    };

    map.into_iter()
        .filter_map(|(student_id, entry)| match serde_json::from_value::<MarkEntry>(entry) {
            Ok(entry) => Some((student_id, entry)),
            Err(e) => {
                warn!("Skipping malformed mark entry for student {}: {}", student_id, e);
                None
            }
        })
        .collect()
}

async fn fetch_subject(db: &PgPool, name: &str) -> Result<Option<Subject>, sqlx::Error> {
    sqlx::query_as::<_, Subject>(
        "SELECT id, name, code, full_marks, pass_marks FROM subjects WHERE name = $1"
    )
    .bind(name)
    .fetch_optional(db)
    .await
}

/// Creates the sheet or merges `entries` into it; students already on the
/// sheet but absent from `entries` keep their marks.
pub async fn merge_mark_sheet(
    db: &PgPool,
    key: &MarkSheetKey,
    entries: &SheetEntries,
) -> Result<SheetEntries, sqlx::Error> {
    let entries_value =
        serde_json::to_value(entries).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    let merged = sqlx::query_scalar::<_, JsonValue>(
        "INSERT INTO mark_sheets (sheet_key, subject, semester, exam_type, year, entries)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (sheet_key) DO UPDATE
         SET entries = mark_sheets.entries || EXCLUDED.entries,
             updated_at = NOW()
         RETURNING entries"
    )
    .bind(key.document_id())
    .bind(&key.subject)
    .bind(key.semester)
    .bind(key.exam_type.as_str())
    .bind(key.year)
    .bind(&entries_value)
    .fetch_one(db)
    .await?;

    Ok(parse_entries(merged))
}

#[put("/api/marks/sheets")]
async fn upsert_mark_sheet(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    payload: Result<web::Json<UpsertMarkSheetRequest>, actix_web::Error>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Teacher]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let payload = match require_input(payload) {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let key = MarkSheetKey {
        subject: payload.subject.trim().to_string(),
        semester: payload.semester,
        exam_type: payload.exam_type,
        year: payload.year,
    };
    if let Err(message) = key.validate() {
        return HttpResponse::BadRequest().json(ErrorResponse::new(message));
    }
    if payload.entries.is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::new("No marks supplied"));
    }

    let subject = match fetch_subject(&app_state.db, &key.subject).await {
        Ok(Some(subject)) => subject,
        Ok(None) => {
            return HttpResponse::NotFound().json(ErrorResponse::new(format!(
                "Unknown subject: {}",
                key.subject
            )));
        }
        Err(e) => {
            error!("Failed to load subject: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    };

    let entries = match prepare_entries(&payload.entries, &subject, Utc::now()) {
        Ok(entries) => entries,
        Err(message) => return HttpResponse::BadRequest().json(ErrorResponse::new(message)),
    };

    let student_ids: Vec<i32> = payload.entries.keys().copied().collect();
    match sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE role = 'student' AND id = ANY($1)"
    )
    .bind(&student_ids)
    .fetch_one(&app_state.db)
    .await
    {
        Ok(count) if count as usize == student_ids.len() => {}
        Ok(_) => {
            return HttpResponse::BadRequest()
                .json(ErrorResponse::new("Marks reference unknown students"));
        }
        Err(e) => {
            error!("Failed to verify students: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    }

    let sheet_key = key.document_id();
    let merged = merge_mark_sheet(&app_state.db, &key, &entries).await;

    match merged {
        Ok(merged) => {
            info!("{} updated {} marks on {}", claims.sub, entries.len(), sheet_key);
            HttpResponse::Ok().json(MarkSheet {
                sheet_key,
                subject: key.subject,
                semester: key.semester,
                exam_type: key.exam_type,
                year: key.year,
                entries: merged,
            })
        }
        Err(e) => {
            error!("Failed to save mark sheet {}: {}", sheet_key, e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Failed to save marks"))
        }
    }
}

#[get("/api/marks/sheets")]
async fn get_mark_sheet(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: Result<web::Query<SheetQuery>, actix_web::Error>,
) -> impl Responder {
    if let Err(response) = require_role(&req, &app_state, &[Role::Teacher]) {
        return response;
    }

    let query = match require_input(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    let exam_type = match ExamType::parse(&query.exam_type) {
        Some(exam_type) => exam_type,
        None => {
            return HttpResponse::BadRequest().json(ErrorResponse::new(format!(
                "Invalid exam type: {}",
                query.exam_type
            )));
        }
    };

    let key = MarkSheetKey {
        subject: query.subject.trim().to_string(),
        semester: query.semester,
        exam_type,
        year: query.year,
    };
    if let Err(message) = key.validate() {
        return HttpResponse::BadRequest().json(ErrorResponse::new(message));
    }

    let sheet_key = key.document_id();
    let entries = match sqlx::query_scalar::<_, JsonValue>(
        "SELECT entries FROM mark_sheets WHERE sheet_key = $1"
    )
    .bind(&sheet_key)
    .fetch_optional(&app_state.db)
    .await
    {
        Ok(Some(value)) => parse_entries(value),
        Ok(None) => SheetEntries::new(),
        Err(e) => {
            error!("Failed to load mark sheet {}: {}", sheet_key, e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    };

    HttpResponse::Ok().json(MarkSheet {
        sheet_key,
        subject: key.subject,
        semester: key.semester,
        exam_type: key.exam_type,
        year: key.year,
        entries,
    })
}

/// Defaults: Final, semester 1, current year.
pub fn resolve_report_query(
    query: &ReportQuery,
    current_year: i32,
) -> Result<(ExamType, i32, i32), String> {
    let exam_type = match query.exam_type.as_deref() {
        None => ExamType::Final,
        Some(value) => {
            ExamType::parse(value).ok_or_else(|| format!("Invalid exam type: {}", value))?
        }
    };

    let semester = query.semester.unwrap_or(MIN_SEMESTER);
    if !(MIN_SEMESTER..=MAX_SEMESTER).contains(&semester) {
        return Err(format!(
            "Semester must be between {} and {}",
            MIN_SEMESTER, MAX_SEMESTER
        ));
    }

    Ok((exam_type, semester, query.year.unwrap_or(current_year)))
}

#[derive(FromRow)]
struct StudentSheetRow {
    subject: String,
    semester: i32,
    entry: Option<JsonValue>,
}

pub async fn load_marks_report(
    db: &PgPool,
    student_id: i32,
    query: &ReportQuery,
) -> Result<MarksReport, HttpResponse> {
    let (exam_type, semester, year) = match resolve_report_query(query, Utc::now().year()) {
        Ok(resolved) => resolved,
        Err(message) => return Err(HttpResponse::BadRequest().json(ErrorResponse::new(message))),
    };

    let subjects = match sqlx::query_as::<_, Subject>(
        "SELECT id, name, code, full_marks, pass_marks FROM subjects ORDER BY code"
    )
    .fetch_all(db)
    .await
    {
        Ok(subjects) => subjects,
        Err(e) => {
            error!("Failed to load subjects: {}", e);
            return Err(HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error")));
        }
    };

    let rows = match sqlx::query_as::<_, StudentSheetRow>(
        "SELECT subject, semester, entries -> $4::text AS entry
         FROM mark_sheets
         WHERE exam_type = $1 AND year = $2 AND semester IN ($3, $3 - 1)"
    )
    .bind(exam_type.as_str())
    .bind(year)
    .bind(semester)
    .bind(student_id.to_string())
    .fetch_all(db)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!("Failed to load marks for student {}: {}", student_id, e);
            return Err(HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error")));
        }
    };

    let mut current = StudentMarks::new();
    let mut previous = StudentMarks::new();
    for row in rows {
        let Some(value) = row.entry else { continue };
        let entry = match serde_json::from_value::<MarkEntry>(value) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping malformed mark entry in {}: {}", row.subject, e);
                continue;
            }
        };
        if row.semester == semester {
            current.insert(row.subject, entry);
        } else {
            previous.insert(row.subject, entry);
        }
    }

    let previous = if semester > MIN_SEMESTER { Some(&previous) } else { None };

    Ok(build_marks_report(
        exam_type,
        semester,
        year,
        &subjects,
        &current,
        previous,
    ))
}

#[get("/api/marks/me")]
async fn my_marks(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: Result<web::Query<ReportQuery>, actix_web::Error>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Student]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let query = match require_input(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    match load_marks_report(&app_state.db, claims.uid, &query).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(response) => response,
    }
}

#[get("/api/marks/students/{student_id}")]
async fn student_marks(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: Result<web::Path<i32>, actix_web::Error>,
    query: Result<web::Query<ReportQuery>, actix_web::Error>,
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

    match load_marks_report(&app_state.db, student_id, &query).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(response) => response,
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .service(upsert_mark_sheet)
        .service(get_mark_sheet)
        .service(my_marks)
        .service(student_marks);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dbms() -> Subject {
        Subject {
            id: 4,
            name: "DBMS".to_string(),
            code: "CS04".to_string(),
            full_marks: 100,
            pass_marks: 40,
        }
    }

    #[test]
    fn prepare_fills_missing_grades() {
        let mut inputs = HashMap::new();
        inputs.insert(3, MarkInput { marks: 82.0, grade: None, remarks: Some(" ".to_string()) });
        inputs.insert(4, MarkInput { marks: 50.0, grade: Some("B".to_string()), remarks: None });

        let entries = prepare_entries(&inputs, &dbms(), Utc::now()).unwrap();
        assert_eq!(entries["3"].grade, "A");
        assert!(entries["3"].remarks.is_none());
        assert_eq!(entries["4"].grade, "B");
    }

    #[test]
    fn prepare_rejects_out_of_range_marks() {
        let mut inputs = HashMap::new();
        inputs.insert(3, MarkInput { marks: 101.0, grade: None, remarks: None });
        assert!(prepare_entries(&inputs, &dbms(), Utc::now()).is_err());

        let mut inputs = HashMap::new();
        inputs.insert(3, MarkInput { marks: -1.0, grade: None, remarks: None });
        assert!(prepare_entries(&inputs, &dbms(), Utc::now()).is_err());
    }

    #[test]
    fn parse_entries_skips_malformed() {
        let value = json!({
            "3": { "marks": 70.0, "grade": "B+", "last_updated": "2024-05-01T10:00:00Z" },
            "4": { "marks": "seventy" },
        });
        let entries = parse_entries(value);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["3"].marks, 70.0);
    }

    #[test]
    fn report_query_defaults_and_validation() {
        let query = ReportQuery { exam_type: None, semester: None, year: None };
        assert_eq!(
            resolve_report_query(&query, 2025).unwrap(),
            (ExamType::Final, 1, 2025)
        );

        let query = ReportQuery { exam_type: Some("project".to_string()), semester: Some(4), year: Some(2023) };
        assert_eq!(
            resolve_report_query(&query, 2025).unwrap(),
            (ExamType::Project, 4, 2023)
        );

        let query = ReportQuery { exam_type: None, semester: Some(0), year: None };
        assert!(resolve_report_query(&query, 2025).is_err());

        let query = ReportQuery { exam_type: Some("quiz".to_string()), semester: None, year: None };
        assert!(resolve_report_query(&query, 2025).is_err());
    }
}
