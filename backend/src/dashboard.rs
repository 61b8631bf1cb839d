use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use log::{error, warn};
use serde::Serialize;

use crate::models::role::Role;
use crate::roles::{require_role, resolve_linked_student};
use crate::users::ErrorResponse;
use crate::AppState;

#[derive(Debug, Serialize, PartialEq)]
pub struct DashboardSection {
    pub title: String,
    pub description: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub role: Role,
    pub name: String,
    pub initial: String,
    pub sections: Vec<DashboardSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_name: Option<String>,
}

fn section(title: &str, description: String, path: &str) -> DashboardSection {
    DashboardSection {
        title: title.to_string(),
        description,
        path: path.to_string(),
    }
}

/// Cards shown on a role's landing page. Parent descriptions name the child.
pub fn sections_for(role: Role, child_name: Option<&str>) -> Vec<DashboardSection> {
    match role {
        Role::Teacher => vec![
            section(
                "Attendance Management",
                "View and update student attendance records".to_string(),
                "/teacher/attendance",
            ),
            section(
                "Notes Management",
                "Upload and manage subject notes for students".to_string(),
                "/teacher/notes",
            ),
            section(
                "Marks Management",
                "Record and update student marks and grades".to_string(),
                "/teacher/marks",
            ),
        ],
        Role::Student => vec![
            section(
                "Attendance",
                "View your attendance records and track your class participation".to_string(),
                "/student/attendance",
            ),
            section(
                "Subject Notes",
                "Access notes and study materials for your subjects".to_string(),
                "/student/notes",
            ),
            section(
                "Marks & Grades",
                "Check your academic performance and grades".to_string(),
                "/student/marks",
            ),
        ],
        Role::Parent => {
            let child = child_name.unwrap_or("your child");
            vec![
                section(
                    "Attendance",
                    format!("View {}'s attendance records and statistics", child),
                    "/parent/attendance",
                ),
                section(
                    "Academic Performance",
                    format!("Check {}'s marks, grades and academic progress", child),
                    "/parent/marks",
                ),
            ]
        }
    }
}

pub fn initial_of(name: &str) -> String {
    name.trim()
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "U".to_string())
}

#[get("/api/dashboard")]
async fn get_dashboard(req: HttpRequest, app_state: web::Data<AppState>) -> impl Responder {
    let claims = match require_role(&req, &app_state, &[Role::Teacher, Role::Student, Role::Parent])
    {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let name = match sqlx::query_scalar::<_, String>("SELECT name FROM users WHERE id = $1")
        .bind(claims.uid)
        .fetch_optional(&app_state.db)
        .await
    {
        Ok(Some(name)) => name,
        Ok(None) => {
            return HttpResponse::Unauthorized().json(ErrorResponse::new("User not found"));
        }
        Err(e) => {
            error!("Failed to load dashboard user: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    };

    let child_name = if claims.role == Role::Parent {
        match resolve_linked_student(&app_state.db, claims.uid).await {
            Ok(child) => Some(child.name),
            Err(_) => {
                warn!("No linked child resolved for parent {}", claims.sub);
                None
            }
        }
    } else {
        None
    };

    HttpResponse::Ok().json(Dashboard {
        role: claims.role,
        initial: initial_of(&name),
        sections: sections_for(claims.role, child_name.as_deref()),
        name,
        child_name,
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(get_dashboard);
}
