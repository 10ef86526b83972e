use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{
        repo_types::User,
        services::{is_six_digit_code, is_valid_email, normalize_email, normalize_name},
    },
    problem::FieldError,
};

pub const MIN_PASSWORD_LEN: usize = 8;

/// Request body for signup.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

impl SignupRequest {
    /// Returns the normalized `(email, name)` pair.
    pub fn validate(&self) -> Result<(String, String), Vec<FieldError>> {
        let email = normalize_email(&self.email);
        let name = normalize_name(&self.name);
        let mut errors = Vec::new();

        if !is_valid_email(&email) {
            errors.push(FieldError::new("email", "Enter a valid email address"));
        }
        if name.is_empty() {
            errors.push(FieldError::new("name", "Name is required"));
        }
        if errors.is_empty() && email == name.to_lowercase() {
            errors.push(FieldError::new("name", "Email and name cannot be the same"));
        }

        if errors.is_empty() {
            Ok((email, name))
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub ok: bool,
    pub verification_code_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default)]
    pub verification_code_id: String,
    #[serde(default)]
    pub verification_code: String,
}

impl VerifyRequest {
    pub fn validate(&self) -> Result<(Uuid, String), Vec<FieldError>> {
        let mut errors = Vec::new();
        let id = Uuid::parse_str(self.verification_code_id.trim()).ok();
        if id.is_none() {
            errors.push(FieldError::new(
                "verificationCodeId",
                "Invalid verification data",
            ));
        }
        let code = self.verification_code.trim().to_string();
        if !is_six_digit_code(&code) {
            errors.push(FieldError::new(
                "verificationCode",
                "Enter the 6-digit code from your email",
            ));
        }
        match id {
            Some(id) if errors.is_empty() => Ok((id, code)),
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub ok: bool,
    pub set_password_code_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPasswordRequest {
    #[serde(default)]
    pub verification_code_id: String,
    #[serde(default)]
    pub password: String,
}

impl SetPasswordRequest {
    pub fn validate(&self) -> Result<Uuid, Vec<FieldError>> {
        let mut errors = Vec::new();
        let id = Uuid::parse_str(self.verification_code_id.trim()).ok();
        if id.is_none() {
            errors.push(FieldError::new("verificationCodeId", "Invalid data"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.push(FieldError::new(
                "password",
                "Password must be at least 8 characters",
            ));
        }
        match id {
            Some(id) if errors.is_empty() => Ok(id),
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SetPasswordResponse {
    pub ok: bool,
    pub email: String,
}

/// Request body for sign-in.
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// Request body for token refresh.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Response returned after sign-in or refresh.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: PublicUser,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
        }
    }
}
