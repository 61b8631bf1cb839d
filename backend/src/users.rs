use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{error, info, warn};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::config::MAX_TOKEN_TTL_HOURS;
use crate::models::role::Role;
use crate::password_reset::{self, ChangeOutcome, PasswordResetError};
use crate::roles::require_input;
use crate::AppState;

pub const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: SessionUser,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,      // login id
    pub uid: i32,
    pub role: Role,
    pub exp: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, FromRow)]
pub struct SessionUser {
    #[sqlx(rename = "id")]
    pub uid: i32,
    pub login_id: String,
    pub role: Role,
    pub name: String,
    pub email: String,
    pub password_changed: bool,
}

pub fn issue_token(
    user: &SessionUser,
    secret: &str,
    ttl_hours: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let ttl_hours = ttl_hours.clamp(1, MAX_TOKEN_TTL_HOURS);
    let expiration = (Utc::now() + Duration::hours(ttl_hours)).timestamp() as usize;

    let claims = Claims {
        sub: user.login_id.clone(),
        uid: user.uid,
        role: user.role,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

/// Extract and validate the bearer token.
/// Returns Claims if valid, or an error HttpResponse
pub fn verify_token(req: &HttpRequest, app_state: &AppState) -> Result<Claims, HttpResponse> {
    let header_str = match req.headers().get("Authorization") {
        Some(header) => header.to_str().unwrap_or(""),
        None => {
            return Err(HttpResponse::Unauthorized().json(ErrorResponse::new(
                "Missing authorization header",
            )));
        }
    };

    let token = match header_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => token.trim(),
        _ => {
            return Err(HttpResponse::Unauthorized().json(ErrorResponse::new(
                "Invalid authorization header",
            )));
        }
    };

    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(app_state.jwt_secret.as_ref()),
        &Validation::default(),
    ) {
        Ok(data) => Ok(data.claims),
        Err(_) => Err(HttpResponse::Unauthorized().json(ErrorResponse::new("Invalid token"))),
    }
}

/// Students and parents may type their bare id; it maps onto the school
/// mail domain. Everything else is used as typed.
pub fn normalize_login_identifier(identifier: &str, role: Role, email_domain: &str) -> String {
    let identifier = identifier.trim();
    if role.accepts_bare_login_id() && !identifier.contains('@') {
        format!("{}@{}", identifier, email_domain).to_lowercase()
    } else {
        identifier.to_lowercase()
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

/// An unparsable stored hash never verifies.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            error!("Failed to parse password hash: {}", e);
            false
        }
    }
}

#[derive(Debug, FromRow)]
struct UserCredentials {
    id: i32,
    login_id: String,
    email: String,
    role: Role,
    name: String,
    password_hash: String,
    password_changed: bool,
    pending_password_hash: Option<String>,
    password_reset_required: bool,
    linked_student_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginRejection {
    InvalidCredentials,
    RoleMismatch(Role),
    ParentNotLinked,
}

impl LoginRejection {
    pub fn into_response(self) -> HttpResponse {
        match self {
            LoginRejection::InvalidCredentials => {
                HttpResponse::Unauthorized().json(ErrorResponse::new("Invalid credentials"))
            }
            LoginRejection::RoleMismatch(requested) => HttpResponse::Forbidden().json(
                ErrorResponse::new(format!("This account doesn't have {} privileges", requested)),
            ),
            LoginRejection::ParentNotLinked => HttpResponse::Forbidden().json(ErrorResponse::new(
                "Parent account not linked to any student",
            )),
        }
    }
}

#[derive(Debug)]
pub enum LoginError {
    Rejected(LoginRejection),
    Database(sqlx::Error),
}

impl std::fmt::Display for LoginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginError::Rejected(rejection) => write!(f, "Login rejected: {:?}", rejection),
            LoginError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for LoginError {}

impl From<sqlx::Error> for LoginError {
    fn from(err: sqlx::Error) -> Self {
        LoginError::Database(err)
    }
}

/// Password, role and parent-link checks for a stored account. On success,
/// tells whether a pending password change is waiting to be promoted.
fn check_login(
    user: &UserCredentials,
    password: &str,
    requested_role: Role,
) -> Result<bool, LoginRejection> {
    if !verify_password(password, &user.password_hash) {
        return Err(LoginRejection::InvalidCredentials);
    }

    if user.role != requested_role {
        return Err(LoginRejection::RoleMismatch(requested_role));
    }

    let linked = user.linked_student_id.as_deref().map(str::trim).unwrap_or("");
    if user.role == Role::Parent && linked.is_empty() {
        return Err(LoginRejection::ParentNotLinked);
    }

    Ok(user.password_reset_required && user.pending_password_hash.is_some())
}

/// Resolves the identifier, checks the account and applies any pending
/// password change. A failed promotion is logged and does not block sign-in.
pub async fn authenticate(
    db: &PgPool,
    credentials: &LoginRequest,
    email_domain: &str,
) -> Result<SessionUser, LoginError> {
    let email = normalize_login_identifier(&credentials.identifier, credentials.role, email_domain);

    let user = sqlx::query_as::<_, UserCredentials>(
        "SELECT id, login_id, email, role, name, password_hash, password_changed,
                pending_password_hash, password_reset_required, linked_student_id
         FROM users WHERE LOWER(email) = $1"
    )
    .bind(&email)
    .fetch_optional(db)
    .await?
    .ok_or(LoginError::Rejected(LoginRejection::InvalidCredentials))?;

    let promote_pending =
        check_login(&user, &credentials.password, credentials.role).map_err(LoginError::Rejected)?;

    let mut password_changed = user.password_changed;
    if promote_pending {
        if let Some(pending_hash) = user.pending_password_hash.as_deref() {
            match password_reset::promote_pending_password(db, user.id, pending_hash).await {
                Ok(()) => {
                    info!("Applied pending password change for {}", user.login_id);
                    password_changed = true;
                }
                Err(e) => warn!("Failed to apply pending password for {}: {}", user.login_id, e),
            }
        }
    }

    Ok(SessionUser {
        uid: user.id,
        login_id: user.login_id,
        role: user.role,
        name: user.name,
        email: user.email,
        password_changed,
    })
}

#[post("/login")]
async fn login(
    app_state: web::Data<AppState>,
    credentials: web::Json<LoginRequest>,
) -> impl Responder {
    if credentials.identifier.trim().is_empty() || credentials.password.is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::new(
            "Identifier and password are required",
        ));
    }

    let session = match authenticate(&app_state.db, &credentials, &app_state.login_email_domain).await {
        Ok(session) => session,
        Err(LoginError::Rejected(rejection)) => return rejection.into_response(),
        Err(LoginError::Database(e)) => {
            error!("Database error: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    };

    let token = match issue_token(&session, &app_state.jwt_secret, app_state.token_ttl_hours) {
        Ok(t) => t,
        Err(e) => {
            error!("JWT encoding error: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Could not generate token"));
        }
    };

    HttpResponse::Ok().json(LoginResponse { token, user: session })
}

#[get("/validate")]
async fn validate_token_endpoint(
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let user_exists = sqlx::query_scalar::<_, i32>(
        "SELECT id FROM users WHERE id = $1 AND role = $2",
    )
    .bind(claims.uid)
    .bind(claims.role)
    .fetch_optional(&app_state.db)
    .await;

    match user_exists {
        Ok(Some(_)) => HttpResponse::Ok().json(serde_json::json!({
            "valid": true,
            "uid": claims.uid,
            "login_id": claims.sub,
            "role": claims.role,
        })),
        Ok(None) => HttpResponse::Unauthorized().json(ErrorResponse::new("User not found")),
        Err(e) => {
            error!("Database error: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Internal server error"))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangePasswordByIdRequest {
    pub login_id: String,
    pub new_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangePasswordByIdResponse {
    pub message: String,
    pub outcome: ChangeOutcome,
}

/// Forgot-password path: no session, the account is addressed by its id.
#[post("/change-password-by-id")]
async fn change_password_by_id(
    app_state: web::Data<AppState>,
    req: web::Json<ChangePasswordByIdRequest>,
) -> impl Responder {
    if let Err(message) = password_reset::validate_request(&req.login_id, &req.new_password) {
        return HttpResponse::BadRequest().json(ErrorResponse::new(message));
    }

    match password_reset::change_password_by_login_id(&app_state.db, &req.login_id, &req.new_password).await {
        Ok(outcome) => {
            let message = match outcome {
                ChangeOutcome::Applied => "Password changed successfully",
                ChangeOutcome::Pending => "Password change recorded; it takes effect at your next sign-in",
            };
            HttpResponse::Ok().json(ChangePasswordByIdResponse {
                message: message.to_string(),
                outcome,
            })
        }
        Err(e @ PasswordResetError::AccountNotFound { .. }) => {
            HttpResponse::NotFound().json(ErrorResponse::new(e.to_string()))
        }
        Err(e) => {
            error!("Password change by id failed: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Password change failed"))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: SessionUser,
    pub profile_data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_student_id: Option<String>,
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    #[sqlx(flatten)]
    user: SessionUser,
    profile_data: serde_json::Value,
    linked_student_id: Option<String>,
}

/// Get current user's profile
#[get("")]
async fn get_profile(
    app_state: web::Data<AppState>,
    req: HttpRequest,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    match sqlx::query_as::<_, ProfileRow>(
        "SELECT id, login_id, role, name, email, password_changed, profile_data, linked_student_id
         FROM users WHERE id = $1"
    )
    .bind(claims.uid)
    .fetch_optional(&app_state.db)
    .await
    {
        Ok(Some(row)) => HttpResponse::Ok().json(UserProfile {
            user: row.user,
            profile_data: row.profile_data,
            linked_student_id: row.linked_student_id,
        }),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse::new("User not found")),
        Err(e) => {
            error!("Database error: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Internal server error"))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Change current user's password
#[post("/change-password")]
async fn change_password(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    change_req: Result<web::Json<ChangePasswordRequest>, actix_web::Error>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let change_req = match require_input(change_req) {
        Ok(change_req) => change_req,
        Err(response) => return response,
    };

    if change_req.new_password.chars().count() < MIN_PASSWORD_LENGTH {
        return HttpResponse::BadRequest().json(ErrorResponse::new(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        )));
    }

    let current_hash = match sqlx::query_scalar::<_, String>(
        "SELECT password_hash FROM users WHERE id = $1"
    )
    .bind(claims.uid)
    .fetch_optional(&app_state.db)
    .await
    {
        Ok(Some(hash)) => hash,
        Ok(None) => {
            return HttpResponse::NotFound().json(ErrorResponse::new("User not found"));
        }
        Err(e) => {
            error!("Database error: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Internal server error"));
        }
    };

    if !verify_password(&change_req.current_password, &current_hash) {
        return HttpResponse::Unauthorized()
            .json(ErrorResponse::new("Current password is incorrect"));
    }

    let new_hash = match hash_password(&change_req.new_password) {
        Ok(hash) => hash,
        Err(e) => {
            error!("Failed to hash password: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Failed to hash password"));
        }
    };

    match password_reset::set_password(&app_state.db, claims.uid, &new_hash).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "message": "Password changed successfully"
        })),
        Err(e) => {
            error!("Database error: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Failed to change password"))
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/auth")
            .service(login)
            .service(validate_token_endpoint)
            .service(change_password_by_id)
    );
    cfg.service(
        web::scope("/api/profile")
            .service(get_profile)
            .service(change_password)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_student_and_parent_ids_map_to_school_domain() {
        assert_eq!(
            normalize_login_identifier("CS20230008", Role::Student, "studenthub.edu"),
            "cs20230008@studenthub.edu"
        );
        assert_eq!(
            normalize_login_identifier(" P-CS20230008 ", Role::Parent, "studenthub.edu"),
            "p-cs20230008@studenthub.edu"
        );
    }

    #[test]
    fn teachers_and_full_emails_are_kept() {
        assert_eq!(
            normalize_login_identifier("John.Smith@school.com", Role::Teacher, "studenthub.edu"),
            "john.smith@school.com"
        );
        assert_eq!(
            normalize_login_identifier("T-0001", Role::Teacher, "studenthub.edu"),
            "t-0001"
        );
        assert_eq!(
            normalize_login_identifier("kid@home.org", Role::Student, "studenthub.edu"),
            "kid@home.org"
        );
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("Password123!").unwrap();
        assert!(verify_password("Password123!", &hash));
        assert!(!verify_password("password123", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn issued_token_decodes_with_same_secret() {
        let user = SessionUser {
            uid: 7,
            login_id: "CS20230007".to_string(),
            role: Role::Student,
            name: "Emma Davis".to_string(),
            email: "cs20230007@studenthub.edu".to_string(),
            password_changed: false,
        };
        let token = issue_token(&user, "secret", 24).unwrap();
        let claims = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap()
        .claims;
        assert_eq!(claims.uid, 7);
        assert_eq!(claims.role, Role::Student);
        assert_eq!(claims.sub, "CS20230007");

        assert!(decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"other"),
            &Validation::default(),
        )
        .is_err());
    }

    #[test]
    fn oversized_ttl_is_clamped_instead_of_overflowing() {
        let user = SessionUser {
            uid: 1,
            login_id: "T-0001".to_string(),
            role: Role::Teacher,
            name: "Jane Smith".to_string(),
            email: "t-0001@studenthub.edu".to_string(),
            password_changed: true,
        };
        let token = issue_token(&user, "secret", i64::MAX).unwrap();
        let claims = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap()
        .claims;
        let max_exp = (Utc::now() + Duration::hours(MAX_TOKEN_TTL_HOURS)).timestamp() as usize;
        assert!(claims.exp <= max_exp);
    }

    fn credentials(role: Role, password: &str, linked: Option<&str>) -> UserCredentials {
        UserCredentials {
            id: 1,
            login_id: "X".to_string(),
            email: "x@studenthub.edu".to_string(),
            role,
            name: "X".to_string(),
            password_hash: hash_password(password).unwrap(),
            password_changed: false,
            pending_password_hash: None,
            password_reset_required: false,
            linked_student_id: linked.map(str::to_string),
        }
    }

    #[test]
    fn wrong_password_is_rejected_before_role() {
        let user = credentials(Role::Student, "Password123!", None);
        assert_eq!(
            check_login(&user, "nope", Role::Teacher),
            Err(LoginRejection::InvalidCredentials)
        );
    }

    #[test]
    fn role_mismatch_is_forbidden() {
        let user = credentials(Role::Student, "Password123!", None);
        let rejection = check_login(&user, "Password123!", Role::Teacher).unwrap_err();
        assert_eq!(rejection, LoginRejection::RoleMismatch(Role::Teacher));
        assert_eq!(rejection.into_response().status(), actix_web::http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn parent_without_linked_student_is_forbidden() {
        for linked in [None, Some(""), Some("  ")] {
            let user = credentials(Role::Parent, "Password123!", linked);
            let rejection = check_login(&user, "Password123!", Role::Parent).unwrap_err();
            assert_eq!(rejection, LoginRejection::ParentNotLinked);
            assert_eq!(rejection.into_response().status(), actix_web::http::StatusCode::FORBIDDEN);
        }

        let user = credentials(Role::Parent, "Password123!", Some("CS20230001"));
        assert_eq!(check_login(&user, "Password123!", Role::Parent), Ok(false));
    }

    #[test]
    fn pending_password_is_promoted_only_when_flagged() {
        let mut user = credentials(Role::Student, "Password123!", None);
        user.pending_password_hash = Some(hash_password("NewSecret1").unwrap());
        assert_eq!(check_login(&user, "Password123!", Role::Student), Ok(false));

        user.password_reset_required = true;
        assert_eq!(check_login(&user, "Password123!", Role::Student), Ok(true));

        user.pending_password_hash = None;
        assert_eq!(check_login(&user, "Password123!", Role::Student), Ok(false));
    }
}
