use actix_web::{HttpRequest, HttpResponse};
use log::error;
use sqlx::PgPool;

use crate::models::role::Role;
use crate::students::{StudentRow, StudentSummary};
use crate::users::{verify_token, Claims, ErrorResponse};
use crate::AppState;

/// Token check followed by a role check; neither touches the database.
pub fn require_role(
    req: &HttpRequest,
    app_state: &AppState,
    allowed: &[Role],
) -> Result<Claims, HttpResponse> {
    let claims = verify_token(req, app_state)?;

    if !allowed.contains(&claims.role) {
        let expected = allowed
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(" or ");
        return Err(HttpResponse::Forbidden().json(ErrorResponse::new(format!(
            "{} access required",
            capitalize(&expected)
        ))));
    }

    Ok(claims)
}

/// Extractor output for guarded routes. Handlers take `Result<Json<_>, Error>`
/// (or `Query`/`Path`) so a malformed request is only reported after the
/// caller has been authenticated.
pub fn require_input<T>(input: Result<T, actix_web::Error>) -> Result<T, HttpResponse> {
    input.map_err(|e| HttpResponse::BadRequest().json(ErrorResponse::new(e.to_string())))
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The child a parent account is linked to. Student accounts are searched
/// first, then any account carrying the linked id.
pub async fn resolve_linked_student(
    db: &PgPool,
    parent_user_id: i32,
) -> Result<StudentSummary, HttpResponse> {
    let linked_id = match sqlx::query_scalar::<_, Option<String>>(
        "SELECT linked_student_id FROM users WHERE id = $1 AND role = 'parent'"
    )
    .bind(parent_user_id)
    .fetch_optional(db)
    .await
    {
        Ok(Some(Some(id))) if !id.trim().is_empty() => id,
        Ok(_) => {
            return Err(HttpResponse::NotFound().json(ErrorResponse::new(
                "No child associated with this parent account",
            )));
        }
        Err(e) => {
            error!("Failed to load parent link: {}", e);
            return Err(HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error")));
        }
    };

    let lookups = [
        "SELECT id, login_id, name, profile_data FROM users WHERE login_id = $1 AND role = 'student'",
        "SELECT id, login_id, name, profile_data FROM users WHERE login_id = $1",
    ];

    for sql in lookups {
        match sqlx::query_as::<_, StudentRow>(sql)
            .bind(&linked_id)
            .fetch_optional(db)
            .await
        {
            Ok(Some(row)) => return Ok(StudentSummary::from(row)),
            Ok(None) => continue,
            Err(e) => {
                error!("Failed to resolve linked student {}: {}", linked_id, e);
                return Err(HttpResponse::InternalServerError()
                    .json(ErrorResponse::new("Internal server error")));
            }
        }
    }

    Err(HttpResponse::NotFound().json(ErrorResponse::new(format!(
        "Child not found with ID: {}",
        linked_id
    ))))
}

/// Teachers see every student, students see themselves, parents see the
/// child they are linked to.
pub async fn verify_can_access_student(
    claims: &Claims,
    db: &PgPool,
    student_user_id: i32,
) -> Result<(), HttpResponse> {
    match claims.role {
        Role::Teacher => Ok(()),
        Role::Student if claims.uid == student_user_id => Ok(()),
        Role::Student => Err(HttpResponse::Forbidden().json(ErrorResponse::new(
            "Not authorized to access this student",
        ))),
        Role::Parent => {
            let child = resolve_linked_student(db, claims.uid).await?;
            if child.id == student_user_id {
                Ok(())
            } else {
                Err(HttpResponse::Forbidden().json(ErrorResponse::new(
                    "Not authorized to access this student",
                )))
            }
        }
    }
}
