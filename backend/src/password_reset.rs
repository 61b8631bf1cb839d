use log::{debug, info};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::models::role::Role;
use crate::users::{hash_password, verify_password, MIN_PASSWORD_LENGTH};

/// Passwords accounts are provisioned with. An account that still answers
/// to one of these can have its password replaced without further proof.
pub const DEFAULT_PASSWORDS: [&str; 2] = ["Password123!", "password123"];

#[derive(Debug)]
pub enum PasswordResetError {
    DatabaseError(String),
    AccountNotFound { role: Role, login_id: String },
    HashError(String),
}

impl std::fmt::Display for PasswordResetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordResetError::DatabaseError(s) => write!(f, "Database error: {}", s),
            PasswordResetError::AccountNotFound { role, login_id } => {
                write!(f, "No account found with {} ID: {}", role, login_id)
            }
            PasswordResetError::HashError(s) => write!(f, "Hashing error: {}", s),
        }
    }
}

impl std::error::Error for PasswordResetError {}

impl From<sqlx::Error> for PasswordResetError {
    fn from(err: sqlx::Error) -> Self {
        PasswordResetError::DatabaseError(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for PasswordResetError {
    fn from(err: argon2::password_hash::Error) -> Self {
        PasswordResetError::HashError(err.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOutcome {
    /// The live password was replaced.
    Applied,
    /// Stored for promotion at the next successful sign-in.
    Pending,
}

pub fn validate_request(login_id: &str, new_password: &str) -> Result<(), String> {
    if login_id.trim().is_empty() {
        return Err(format!(
            "Please enter a {} ID",
            Role::from_login_id(login_id.trim())
        ));
    }
    if new_password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

/// Direct replacement is only allowed while the account still carries a
/// provisioning password; otherwise the change waits for the next login.
pub fn plan_change(current_hash: &str) -> ChangeOutcome {
    let still_default = DEFAULT_PASSWORDS
        .iter()
        .any(|candidate| verify_password(candidate, current_hash));

    if still_default {
        ChangeOutcome::Applied
    } else {
        ChangeOutcome::Pending
    }
}

#[derive(FromRow)]
struct AccountQuery {
    id: i32,
    password_hash: String,
}

pub async fn change_password_by_login_id(
    pool: &PgPool,
    login_id: &str,
    new_password: &str,
) -> Result<ChangeOutcome, PasswordResetError> {
    let login_id = login_id.trim();
    let role = Role::from_login_id(login_id);

    let account = sqlx::query_as::<_, AccountQuery>(
        "SELECT id, password_hash FROM users WHERE login_id = $1 AND role = $2"
    )
    .bind(login_id)
    .bind(role)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| PasswordResetError::AccountNotFound {
        role,
        login_id: login_id.to_string(),
    })?;

    let new_hash = hash_password(new_password)?;

    match plan_change(&account.password_hash) {
        ChangeOutcome::Applied => {
            set_password(pool, account.id, &new_hash).await?;
            info!("Password changed for {}", login_id);
            Ok(ChangeOutcome::Applied)
        }
        ChangeOutcome::Pending => {
            sqlx::query(
                "UPDATE users
                 SET pending_password_hash = $1,
                     password_reset_required = TRUE,
                     password_reset_requested_at = NOW(),
                     password_changed = TRUE,
                     updated_at = NOW()
                 WHERE id = $2"
            )
            .bind(&new_hash)
            .bind(account.id)
            .execute(pool)
            .await?;
            debug!("Stored pending password change for {}", login_id);
            Ok(ChangeOutcome::Pending)
        }
    }
}

/// Replace the live hash and clear any pending change.
pub async fn set_password(
    pool: &PgPool,
    user_id: i32,
    password_hash: &str,
) -> Result<(), PasswordResetError> {
    sqlx::query(
        "UPDATE users
         SET password_hash = $1,
             pending_password_hash = NULL,
             password_reset_required = FALSE,
             password_changed = TRUE,
             last_password_change = NOW(),
             updated_at = NOW()
         WHERE id = $2"
    )
    .bind(password_hash)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn promote_pending_password(
    pool: &PgPool,
    user_id: i32,
    pending_hash: &str,
) -> Result<(), PasswordResetError> {
    set_password(pool, user_id, pending_hash).await
}
