use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::jwt::JwtKeys,
    problem::{problem, ProblemResponse},
};

/// Extracts and validates the bearer access token, returning the user ID.
pub struct AuthUser(pub Uuid);

/// Like [`AuthUser`], but anonymous callers (or stale tokens) yield `None`.
pub struct MaybeAuthUser(pub Option<Uuid>);

fn bearer_token(parts: &Parts) -> Option<Result<&str, ()>> {
    let header = parts.headers.get(AUTHORIZATION)?;
    let token = header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .ok_or(());
    Some(token)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = match bearer_token(parts) {
            None => {
                return Err(problem(
                    StatusCode::UNAUTHORIZED,
                    "Missing Authorization header",
                ))
            }
            Some(Err(())) => {
                return Err(problem(
                    StatusCode::UNAUTHORIZED,
                    "Invalid Authorization header",
                ))
            }
            Some(Ok(t)) => t,
        };

        let keys = JwtKeys::from_ref(state);
        match keys.verify_access(token) {
            Ok(claims) => Ok(AuthUser(claims.sub)),
            Err(e) => {
                warn!(error = %e, "invalid or expired token");
                Err(problem(
                    StatusCode::UNAUTHORIZED,
                    "Invalid or expired token",
                ))
            }
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(Ok(token)) = bearer_token(parts) else {
            return Ok(MaybeAuthUser(None));
        };
        let keys = JwtKeys::from_ref(state);
        match keys.verify_access(token) {
            Ok(claims) => Ok(MaybeAuthUser(Some(claims.sub))),
            Err(e) => {
                debug!(error = %e, "ignoring unusable token on public route");
                Ok(MaybeAuthUser(None))
            }
        }
    }
}
