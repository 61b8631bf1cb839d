use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use log::{error, info};
use serde::Deserialize;
use sqlx::PgPool;

use crate::attendance::fetch_teacher_name;
use crate::models::note::{is_valid_drive_url, Note, NoteFilter};
use crate::models::role::Role;
use crate::roles::{require_input, require_role};
use crate::users::ErrorResponse;
use crate::AppState;

const NOTE_COLUMNS: &str =
    "id, title, subject, google_drive_url, teacher_id, teacher_name, created_at, updated_at";

#[derive(Deserialize)]
struct NoteRequest {
    title: String,
    subject: String,
    google_drive_url: Option<String>,
}

#[derive(Deserialize)]
struct NoteListQuery {
    subject: Option<String>,
    q: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NoteInput {
    pub title: String,
    pub subject: String,
    pub google_drive_url: Option<String>,
}

fn validate_note(payload: &NoteRequest) -> Result<NoteInput, HttpResponse> {
    let title = payload.title.trim();
    let subject = payload.subject.trim();
    if title.is_empty() || subject.is_empty() {
        return Err(HttpResponse::BadRequest().json(ErrorResponse::new(
            "Title and subject are required",
        )));
    }

    let url = payload
        .google_drive_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty());
    if let Some(url) = url {
        if !is_valid_drive_url(url) {
            return Err(HttpResponse::BadRequest().json(ErrorResponse::new(
                "Drive link must be an http(s) URL",
            )));
        }
    }

    Ok(NoteInput {
        title: title.to_string(),
        subject: subject.to_string(),
        google_drive_url: url.map(str::to_string),
    })
}

pub async fn insert_note(
    db: &PgPool,
    note: &NoteInput,
    teacher_id: i32,
    teacher_name: &str,
) -> Result<Note, sqlx::Error> {
    sqlx::query_as::<_, Note>(&format!(
        "INSERT INTO notes (title, subject, google_drive_url, teacher_id, teacher_name)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {}",
        NOTE_COLUMNS
    ))
    .bind(&note.title)
    .bind(&note.subject)
    .bind(&note.google_drive_url)
    .bind(teacher_id)
    .bind(teacher_name)
    .fetch_one(db)
    .await
}

/// `None` when the note does not exist or belongs to another teacher.
pub async fn update_own_note(
    db: &PgPool,
    note_id: i32,
    teacher_id: i32,
    note: &NoteInput,
) -> Result<Option<Note>, sqlx::Error> {
    sqlx::query_as::<_, Note>(&format!(
        "UPDATE notes
         SET title = $1, subject = $2, google_drive_url = $3, updated_at = NOW()
         WHERE id = $4 AND teacher_id = $5
         RETURNING {}",
        NOTE_COLUMNS
    ))
    .bind(&note.title)
    .bind(&note.subject)
    .bind(&note.google_drive_url)
    .bind(note_id)
    .bind(teacher_id)
    .fetch_optional(db)
    .await
}

pub async fn delete_own_note(db: &PgPool, note_id: i32, teacher_id: i32) -> Result<bool, sqlx::Error> {
    let done = sqlx::query("DELETE FROM notes WHERE id = $1 AND teacher_id = $2")
        .bind(note_id)
        .bind(teacher_id)
        .execute(db)
        .await?;

    Ok(done.rows_affected() > 0)
}

#[post("/api/notes")]
async fn create_note(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    payload: Result<web::Json<NoteRequest>, actix_web::Error>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Teacher]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let note = match require_input(payload).and_then(|payload| validate_note(&payload)) {
        Ok(note) => note,
        Err(response) => return response,
    };

    let teacher_name = match fetch_teacher_name(&app_state.db, claims.uid).await {
        Ok(name) => name,
        Err(e) => {
            error!("Failed to load teacher {}: {}", claims.uid, e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    };

    match insert_note(&app_state.db, &note, claims.uid, &teacher_name).await {
        Ok(note) => {
            info!("{} created note {}", claims.sub, note.id);
            HttpResponse::Created().json(note)
        }
        Err(e) => {
            error!("Failed to create note: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Failed to create note"))
        }
    }
}

#[put("/api/notes/{id}")]
async fn update_note(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: Result<web::Path<i32>, actix_web::Error>,
    payload: Result<web::Json<NoteRequest>, actix_web::Error>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Teacher]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let note_id = match require_input(path) {
        Ok(path) => path.into_inner(),
        Err(response) => return response,
    };

    let note = match require_input(payload).and_then(|payload| validate_note(&payload)) {
        Ok(note) => note,
        Err(response) => return response,
    };

    match update_own_note(&app_state.db, note_id, claims.uid, &note).await {
        Ok(Some(note)) => HttpResponse::Ok().json(note),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse::new("Note not found")),
        Err(e) => {
            error!("Failed to update note: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Failed to update note"))
        }
    }
}

#[delete("/api/notes/{id}")]
async fn delete_note(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: Result<web::Path<i32>, actix_web::Error>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Teacher]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let note_id = match require_input(path) {
        Ok(path) => path.into_inner(),
        Err(response) => return response,
    };

    match delete_own_note(&app_state.db, note_id, claims.uid).await {
        Ok(false) => HttpResponse::NotFound().json(ErrorResponse::new("Note not found")),
        Ok(true) => {
            info!("{} deleted note {}", claims.sub, note_id);
            HttpResponse::NoContent().finish()
        }
        Err(e) => {
            error!("Failed to delete note: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Failed to delete note"))
        }
    }
}

#[get("/api/notes/mine")]
async fn list_my_notes(
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Teacher]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    match sqlx::query_as::<_, Note>(&format!(
        "SELECT {} FROM notes WHERE teacher_id = $1 ORDER BY created_at DESC",
        NOTE_COLUMNS
    ))
    .bind(claims.uid)
    .fetch_all(&app_state.db)
    .await
    {
        Ok(notes) => HttpResponse::Ok().json(notes),
        Err(e) => {
            error!("Failed to list notes: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Internal server error"))
        }
    }
}

#[get("/api/notes")]
async fn list_notes(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: Result<web::Query<NoteListQuery>, actix_web::Error>,
) -> impl Responder {
    if let Err(response) = require_role(&req, &app_state, &[Role::Student]) {
        return response;
    }

    let query = match require_input(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    let notes = match sqlx::query_as::<_, Note>(&format!(
        "SELECT {} FROM notes ORDER BY created_at DESC",
        NOTE_COLUMNS
    ))
    .fetch_all(&app_state.db)
    .await
    {
        Ok(notes) => notes,
        Err(e) => {
            error!("Failed to list notes: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    };

    let filter = NoteFilter {
        subject: query.subject.as_deref(),
        query: query.q.as_deref(),
    };
    let notes: Vec<Note> = notes.into_iter().filter(|note| filter.matches(note)).collect();

    HttpResponse::Ok().json(notes)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .service(create_note)
        .service(list_my_notes)
        .service(list_notes)
        .service(update_note)
        .service(delete_note);
}
