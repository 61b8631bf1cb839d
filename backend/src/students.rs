use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;

use crate::models::role::Role;
use crate::roles::{require_input, require_role};
use crate::users::ErrorResponse;
use crate::AppState;

pub const DEFAULT_CLASS: &str = "Computer Science";
pub const DEFAULT_SECTION: &str = "1";

#[derive(Debug, FromRow)]
pub struct StudentRow {
    pub id: i32,
    pub login_id: String,
    pub name: String,
    pub profile_data: JsonValue,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StudentSummary {
    pub id: i32,
    pub login_id: String,
    pub name: String,
    pub roll_number: String,
    pub class: String,
    pub section: String,
    pub department: Option<String>,
}

/// Reads a string-ish profile field; numbers are accepted and stringified.
pub fn profile_str(profile: &JsonValue, key: &str) -> Option<String> {
    match profile.get(key)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl From<StudentRow> for StudentSummary {
    fn from(row: StudentRow) -> Self {
        let profile = &row.profile_data;
        Self {
            roll_number: profile_str(profile, "rollNumber")
                .unwrap_or_else(|| row.login_id.clone()),
            class: profile_str(profile, "class").unwrap_or_else(|| DEFAULT_CLASS.to_string()),
            section: profile_str(profile, "section")
                .unwrap_or_else(|| DEFAULT_SECTION.to_string()),
            department: profile_str(profile, "department"),
            id: row.id,
            login_id: row.login_id,
            name: if row.name.trim().is_empty() {
                "Unknown Student".to_string()
            } else {
                row.name
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RosterQuery {
    department: Option<String>,
}

#[get("/api/students")]
async fn list_students(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: Result<web::Query<RosterQuery>, actix_web::Error>,
) -> impl Responder {
    if let Err(response) = require_role(&req, &app_state, &[Role::Teacher]) {
        return response;
    }

    let query = match require_input(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    let rows = match sqlx::query_as::<_, StudentRow>(
        "SELECT id, login_id, name, profile_data FROM users
         WHERE role = 'student'
           AND ($1::text IS NULL OR profile_data->>'department' = $1)
         ORDER BY login_id"
    )
    .bind(query.department.as_deref().filter(|d| !d.trim().is_empty()))
    .fetch_all(&app_state.db)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!("Failed to list students: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    };

    let students: Vec<StudentSummary> = rows.into_iter().map(StudentSummary::from).collect();
    HttpResponse::Ok().json(students)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_students);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_falls_back_to_defaults() {
        let summary = StudentSummary::from(StudentRow {
            id: 3,
            login_id: "CS20230003".to_string(),
            name: "".to_string(),
            profile_data: json!({}),
        });
        assert_eq!(summary.roll_number, "CS20230003");
        assert_eq!(summary.class, DEFAULT_CLASS);
        assert_eq!(summary.section, DEFAULT_SECTION);
        assert_eq!(summary.name, "Unknown Student");
        assert!(summary.department.is_none());
    }

    #[test]
    fn summary_reads_profile_fields() {
        let summary = StudentSummary::from(StudentRow {
            id: 4,
            login_id: "CS20230004".to_string(),
            name: "Michael Brown".to_string(),
            profile_data: json!({
                "rollNumber": "S001",
                "class": 10,
                "section": "A",
                "department": "Computer Science"
            }),
        });
        assert_eq!(summary.roll_number, "S001");
        assert_eq!(summary.class, "10");
        assert_eq!(summary.section, "A");
        assert_eq!(summary.department.as_deref(), Some("Computer Science"));
    }
}
