use log::{info, warn};
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LOGIN_EMAIL_DOMAIN: &str = "studenthub.edu";
const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;
/// One year.
pub const MAX_TOKEN_TTL_HOURS: i64 = 8760;

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{} environment variable is required", key),
            ConfigError::Invalid(key, value) => write!(f, "Invalid value for {}: {}", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub bind_address: String,
    pub port: u16,
    pub login_email_domain: String,
    pub token_ttl_hours: i64,
}

/// `.env` at the repository root, one level above the backend crate.
pub fn dotenv_path() -> Option<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(|root| root.join(".env"))
}

/// Loads the repository `.env` when there is one; the process environment
/// alone is enough otherwise.
pub fn load_dotenv() {
    match dotenv_path() {
        Some(path) if path.exists() => match dotenv::from_path(&path) {
            Ok(()) => info!("Loaded environment from {:?}", path),
            Err(e) => warn!("Failed to load {:?}: {}", path, e),
        },
        _ => info!("No .env file found, using process environment"),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup so it can be
    /// exercised without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let port = match lookup("PORT") {
            Some(value) => value
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid("PORT", value))?,
            None => DEFAULT_PORT,
        };

        let token_ttl_hours = match lookup("TOKEN_TTL_HOURS") {
            Some(value) => match value.parse::<i64>() {
                Ok(hours) if (1..=MAX_TOKEN_TTL_HOURS).contains(&hours) => hours,
                _ => return Err(ConfigError::Invalid("TOKEN_TTL_HOURS", value)),
            },
            None => DEFAULT_TOKEN_TTL_HOURS,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            bind_address: lookup("BIND_ADDRESS")
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            port,
            login_email_domain: lookup("LOGIN_EMAIL_DOMAIN")
                .unwrap_or_else(|| DEFAULT_LOGIN_EMAIL_DOMAIN.to_string()),
            token_ttl_hours,
        })
    }
}
