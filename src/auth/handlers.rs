use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Router,
};
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, PublicUser, RefreshRequest, SetPasswordRequest, SetPasswordResponse,
            SignInRequest, SignupRequest, SignupResponse, VerifyRequest, VerifyResponse,
        },
        extractors::AuthUser,
        jwt::JwtKeys,
        repo_types::User,
        services::{
            normalize_email, run_signup, set_password_from_code, sign_in, verify_signup_code,
            SetPasswordOutcome, SignInOutcome, SignupOutcome, VerifyOutcome,
        },
    },
    problem::{internal, no_store, problem, validation, ApiJson, Problem, ProblemResponse},
    state::AppState,
};

const INVALID_CODE: &str = "Invalid verification code. Please double check and try again.";
const EXPIRED_CODE: &str = "Verification code has expired. Please request a new one.";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/verify", post(verify))
        .route("/auth/set-password", post(set_password))
        .route("/auth/signin", post(signin))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SignupRequest>,
) -> Result<Response, ProblemResponse> {
    let (email, name) = payload
        .validate()
        .map_err(|errors| validation(StatusCode::UNPROCESSABLE_ENTITY, errors))?;

    let outcome = run_signup(&state, &email, &name)
        .await
        .map_err(|e| internal(e, "Could not sign you up. Please try again."))?;

    match outcome {
        SignupOutcome::CodeSent {
            verification_code_id,
            expires_at,
        } => Ok(no_store(
            StatusCode::CREATED,
            SignupResponse {
                ok: true,
                verification_code_id,
                expires_at,
            },
        )),
        SignupOutcome::Conflict => Err(Problem::new(StatusCode::CONFLICT)
            .with_detail("That email is already registered")
            .with_field("email")
            .into()),
        SignupOutcome::Cooldown => Err(problem(
            StatusCode::TOO_MANY_REQUESTS,
            "Please wait a moment before requesting another code.",
        )),
        SignupOutcome::MailFailed => Err(problem(
            StatusCode::BAD_GATEWAY,
            "We could not send the verification email. Please try again.",
        )),
    }
}

#[instrument(skip(state, payload))]
pub async fn verify(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<VerifyRequest>,
) -> Result<Response, ProblemResponse> {
    let (code_id, code) = payload
        .validate()
        .map_err(|errors| validation(StatusCode::UNPROCESSABLE_ENTITY, errors))?;

    let outcome = verify_signup_code(&state, code_id, &code)
        .await
        .map_err(|e| internal(e, "Could not verify your email. Please try again"))?;

    match outcome {
        VerifyOutcome::Verified {
            set_password_code_id,
        } => Ok(no_store(
            StatusCode::OK,
            VerifyResponse {
                ok: true,
                set_password_code_id,
            },
        )),
        VerifyOutcome::Expired => Err(problem(StatusCode::UNPROCESSABLE_ENTITY, EXPIRED_CODE)),
        VerifyOutcome::NotFound
        | VerifyOutcome::WrongPurpose
        | VerifyOutcome::AlreadyConsumed
        | VerifyOutcome::Invalid => Err(problem(StatusCode::UNPROCESSABLE_ENTITY, INVALID_CODE)),
        VerifyOutcome::AlreadyVerified => Err(problem(
            StatusCode::CONFLICT,
            "This email is already verified.",
        )),
    }
}

#[instrument(skip(state, payload))]
pub async fn set_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SetPasswordRequest>,
) -> Result<Response, ProblemResponse> {
    let code_id = payload
        .validate()
        .map_err(|errors| validation(StatusCode::UNPROCESSABLE_ENTITY, errors))?;

    let outcome = set_password_from_code(&state, code_id, &payload.password)
        .await
        .map_err(|e| internal(e, "Could not set password. Please try again."))?;

    match outcome {
        SetPasswordOutcome::PasswordSet { email } => Ok(no_store(
            StatusCode::OK,
            SetPasswordResponse { ok: true, email },
        )),
        SetPasswordOutcome::NotFound => Err(problem(
            StatusCode::NOT_FOUND,
            "Verification code not found.",
        )),
        SetPasswordOutcome::WrongPurpose => Err(problem(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Invalid verification code purpose.",
        )),
        SetPasswordOutcome::Expired => {
            Err(problem(StatusCode::UNPROCESSABLE_ENTITY, EXPIRED_CODE))
        }
        SetPasswordOutcome::AlreadyConsumed => Err(problem(
            StatusCode::CONFLICT,
            "This verification code has already been used.",
        )),
        SetPasswordOutcome::EmailNotVerified => Err(problem(
            StatusCode::FORBIDDEN,
            "Email not verified. Please verify your email first.",
        )),
        SetPasswordOutcome::PasswordAlreadySet => {
            Err(problem(StatusCode::CONFLICT, "Password is already set."))
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn signin(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SignInRequest>,
) -> Result<Response, ProblemResponse> {
    let email = normalize_email(&payload.email);

    let user = match sign_in(&state, &email, &payload.password)
        .await
        .map_err(|e| internal(e, "Could not sign you in. Please try again."))?
    {
        SignInOutcome::SignedIn(user) => user,
        SignInOutcome::InvalidCredentials => {
            return Err(problem(StatusCode::UNAUTHORIZED, "Invalid credentials"))
        }
    };

    let body = issue_tokens(&JwtKeys::from_ref(&state), user)?;
    Ok(no_store(StatusCode::OK, body))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> Result<Response, ProblemResponse> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&payload.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        problem(StatusCode::UNAUTHORIZED, "Invalid or expired refresh token")
    })?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await
        .map_err(|e| internal(e, "Could not refresh the session."))?
        .ok_or_else(|| problem(StatusCode::UNAUTHORIZED, "User not found"))?;

    let body = issue_tokens(&keys, user)?;
    Ok(no_store(StatusCode::OK, body))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Response, ProblemResponse> {
    let user = User::find_by_id(&state.db, user_id)
        .await
        .map_err(|e| internal(e, "Could not load the current user."))?
        .ok_or_else(|| {
            warn!(%user_id, "token for missing user");
            problem(StatusCode::UNAUTHORIZED, "User not found")
        })?;
    Ok(no_store(StatusCode::OK, PublicUser::from(user)))
}

fn issue_tokens(keys: &JwtKeys, user: User) -> Result<AuthResponse, ProblemResponse> {
    let access_token = keys
        .sign_access(user.id)
        .map_err(|e| internal(e, "Could not issue a session token."))?;
    let refresh_token = keys
        .sign_refresh(user.id)
        .map_err(|e| internal(e, "Could not issue a session token."))?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: user.into(),
    })
}
