use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("EMAIL_PROVIDER=sendgrid but SENDGRID_API_KEY is not set")]
    SendgridKeyMissing,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Knobs of the signup / verify / set-password flow.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub code_ttl_minutes: i64,
    pub resend_cooldown_seconds: i64,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    /// Writes outgoing mail to the log, for local development.
    Log,
    Sendgrid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub provider: EmailProvider,
    pub sendgrid_api_key: Option<String>,
    pub from: String,
    pub app_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt: JwtConfig,
    pub auth: AuthConfig,
    pub mail: MailConfig,
}

pub const DEFAULT_MAIL_FROM: &str = "no-reply@book-tracker.local";
pub const DEFAULT_APP_URL: &str = "http://localhost:3000";

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "booktracker".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "booktracker-users".into()),
            ttl_minutes: parsed_or("JWT_TTL_MINUTES", 60)?,
            refresh_ttl_minutes: parsed_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14)?,
        };
        let auth = AuthConfig {
            code_ttl_minutes: parsed_or("CODE_TTL_MINUTES", 10)?,
            resend_cooldown_seconds: parsed_or("RESEND_COOLDOWN_SECONDS", 60)?,
            argon2_memory_kib: parsed_or("ARGON2_MEMORY_KIB", 64 * 1024)?,
            argon2_iterations: parsed_or("ARGON2_ITERATIONS", 3)?,
            argon2_parallelism: parsed_or("ARGON2_PARALLELISM", 1)?,
        };
        let mail = mail_from_env()?;

        Ok(Self {
            database_url,
            db_max_connections: parsed_or("DB_MAX_CONNECTIONS", 10)?,
            jwt,
            auth,
            mail,
        })
    }
}

fn mail_from_env() -> Result<MailConfig, ConfigError> {
    let provider = match std::env::var("EMAIL_PROVIDER") {
        Err(_) => EmailProvider::Log,
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "" | "log" | "maildev" => EmailProvider::Log,
            "sendgrid" => EmailProvider::Sendgrid,
            _ => {
                return Err(ConfigError::Invalid {
                    key: "EMAIL_PROVIDER",
                    value: v,
                })
            }
        },
    };
    let sendgrid_api_key = std::env::var("SENDGRID_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    if provider == EmailProvider::Sendgrid && sendgrid_api_key.is_none() {
        return Err(ConfigError::SendgridKeyMissing);
    }

    let from = std::env::var("MAIL_FROM")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_MAIL_FROM.into());
    let app_url = std::env::var("APP_URL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_APP_URL.into());

    Ok(MailConfig {
        provider,
        sendgrid_api_key,
        from,
        app_url,
    })
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn parsed_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: v }),
    }
}
