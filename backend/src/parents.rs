use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;

use crate::attendance::{load_attendance_report, MonthQuery};
use crate::marks::{load_marks_report, ReportQuery};
use crate::models::role::Role;
use crate::roles::{require_input, require_role, resolve_linked_student};
use crate::students::profile_str;
use crate::users::ErrorResponse;
use crate::AppState;

#[derive(FromRow)]
struct TeacherRow {
    id: i32,
    login_id: String,
    name: String,
    email: String,
    profile_data: JsonValue,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TeacherContact {
    pub id: i32,
    pub login_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subjects: Vec<String>,
    pub classes: Vec<String>,
    pub experience: Option<String>,
}

fn string_list(profile: &JsonValue, key: &str) -> Vec<String> {
    profile
        .get(key)
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    JsonValue::String(s) => Some(s.clone()),
                    JsonValue::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

impl From<TeacherRow> for TeacherContact {
    fn from(row: TeacherRow) -> Self {
        Self {
            phone: profile_str(&row.profile_data, "phone"),
            subjects: string_list(&row.profile_data, "subjects"),
            classes: string_list(&row.profile_data, "classes"),
            experience: profile_str(&row.profile_data, "experience"),
            id: row.id,
            login_id: row.login_id,
            name: row.name,
            email: row.email,
        }
    }
}

impl TeacherContact {
    pub fn teaches_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c.eq_ignore_ascii_case(class))
    }

    /// Case-insensitive match on the name or any taught subject.
    pub fn matches_search(&self, query: Option<&str>) -> bool {
        let needle = match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => q.to_lowercase(),
            None => return true,
        };

        self.name.to_lowercase().contains(&needle)
            || self
                .subjects
                .iter()
                .any(|subject| subject.to_lowercase().contains(&needle))
    }
}

pub fn teachers_for_class(
    teachers: Vec<TeacherContact>,
    class: &str,
    query: Option<&str>,
) -> Vec<TeacherContact> {
    teachers
        .into_iter()
        .filter(|teacher| teacher.teaches_class(class) && teacher.matches_search(query))
        .collect()
}

#[derive(Deserialize)]
struct TeacherSearchQuery {
    q: Option<String>,
}

#[get("/api/parent/child")]
async fn get_child(req: HttpRequest, app_state: web::Data<AppState>) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Parent]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    match resolve_linked_student(&app_state.db, claims.uid).await {
        Ok(child) => HttpResponse::Ok().json(child),
        Err(response) => response,
    }
}

#[get("/api/parent/attendance")]
async fn get_child_attendance(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: Result<web::Query<MonthQuery>, actix_web::Error>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Parent]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let query = match require_input(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    let child = match resolve_linked_student(&app_state.db, claims.uid).await {
        Ok(child) => child,
        Err(response) => return response,
    };

    match load_attendance_report(&app_state.db, child.id, &query).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(response) => response,
    }
}

#[get("/api/parent/marks")]
async fn get_child_marks(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: Result<web::Query<ReportQuery>, actix_web::Error>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Parent]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let query = match require_input(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    let child = match resolve_linked_student(&app_state.db, claims.uid).await {
        Ok(child) => child,
        Err(response) => return response,
    };

    match load_marks_report(&app_state.db, child.id, &query).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(response) => response,
    }
}

#[get("/api/parent/teachers")]
async fn get_child_teachers(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: Result<web::Query<TeacherSearchQuery>, actix_web::Error>,
) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Parent]) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let query = match require_input(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    let child = match resolve_linked_student(&app_state.db, claims.uid).await {
        Ok(child) => child,
        Err(response) => return response,
    };

    let rows = match sqlx::query_as::<_, TeacherRow>(
        "SELECT id, login_id, name, email, profile_data FROM users
         WHERE role = 'teacher'
         ORDER BY name"
    )
    .fetch_all(&app_state.db)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!("Failed to list teachers: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    };

    let teachers = teachers_for_class(
        rows.into_iter().map(TeacherContact::from).collect(),
        &child.class,
        query.q.as_deref(),
    );

    HttpResponse::Ok().json(teachers)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .service(get_child)
        .service(get_child_attendance)
        .service(get_child_marks)
        .service(get_child_teachers);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn teacher(id: i32, name: &str, profile: JsonValue) -> TeacherContact {
        TeacherContact::from(TeacherRow {
            id,
            login_id: format!("T-{:04}", id),
            name: name.to_string(),
            email: format!("t{}@studenthub.edu", id),
            profile_data: profile,
        })
    }

    #[test]
    fn contact_reads_profile_lists() {
        let contact = teacher(
            1,
            "Jane Smith",
            json!({"subjects": ["Algorithms"], "classes": ["Computer Science", 10], "phone": "555-0101"}),
        );
        assert_eq!(contact.subjects, vec!["Algorithms"]);
        assert_eq!(contact.classes, vec!["Computer Science", "10"]);
        assert_eq!(contact.phone.as_deref(), Some("555-0101"));
        assert!(contact.experience.is_none());
    }

    #[test]
    fn filters_by_class_then_search() {
        let teachers = vec![
            teacher(1, "Jane Smith", json!({"subjects": ["Algorithms"], "classes": ["Computer Science"]})),
            teacher(2, "Robert Lee", json!({"subjects": ["Operating Systems"], "classes": ["computer science"]})),
            teacher(3, "Ann Gray", json!({"subjects": ["Physics"], "classes": ["Physics"]})),
        ];

        let all = teachers_for_class(teachers, "Computer Science", None);
        assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);

        let by_subject = teachers_for_class(all, "Computer Science", Some("operating"));
        assert_eq!(by_subject.len(), 1);
        assert_eq!(by_subject[0].name, "Robert Lee");
    }

    #[test]
    fn blank_search_matches_everyone() {
        let contact = teacher(1, "Jane Smith", json!({}));
        assert!(contact.matches_search(Some("  ")));
        assert!(contact.matches_search(Some("SMITH")));
        assert!(!contact.matches_search(Some("lee")));
        assert!(!contact.teaches_class("Computer Science"));
    }
}
