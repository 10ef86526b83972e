use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::{
    auth::{
        password::{generate_numeric_code, generate_secret_token},
        repo_types::{CodePurpose, User, VerificationCode},
    },
    mail::SignupEmail,
    state::AppState,
};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref SIX_DIGITS_RE: Regex = Regex::new(r"^[0-9]{6}$").unwrap();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_six_digit_code(code: &str) -> bool {
    SIX_DIGITS_RE.is_match(code)
}

/// NFKC form, lower-cased, with every whitespace character removed.
pub fn normalize_email(raw: &str) -> String {
    let folded: String = raw.nfkc().collect();
    WHITESPACE_RE.replace_all(folded.trim(), "").to_lowercase()
}

/// NFKC form, trimmed, inner runs of whitespace collapsed to one space.
pub fn normalize_name(raw: &str) -> String {
    let folded: String = raw.nfkc().collect();
    WHITESPACE_RE.replace_all(folded.trim(), " ").into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignupOutcome {
    CodeSent {
        verification_code_id: Uuid,
        expires_at: OffsetDateTime,
    },
    /// The email belongs to a verified account; no code was created.
    Conflict,
    Cooldown,
    MailFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified { set_password_code_id: Uuid },
    NotFound,
    WrongPurpose,
    AlreadyConsumed,
    Expired,
    AlreadyVerified,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetPasswordOutcome {
    PasswordSet { email: String },
    NotFound,
    WrongPurpose,
    AlreadyConsumed,
    Expired,
    EmailNotVerified,
    PasswordAlreadySet,
}

#[derive(Debug, Clone)]
pub enum SignInOutcome {
    SignedIn(User),
    InvalidCredentials,
}

/// Whether a fresh code would come too soon after the last one.
pub fn in_cooldown(
    last_created: Option<OffsetDateTime>,
    now: OffsetDateTime,
    cooldown: Duration,
) -> bool {
    if cooldown <= Duration::ZERO {
        return false;
    }
    matches!(last_created, Some(at) if at >= now - cooldown)
}

/// Rejections of a verify-email code, checked before the hash is compared.
pub fn check_verify_email_code(
    code: &VerificationCode,
    owner: &User,
    now: OffsetDateTime,
) -> Option<VerifyOutcome> {
    if code.purpose != CodePurpose::SignupVerifyEmail {
        return Some(VerifyOutcome::WrongPurpose);
    }
    if code.is_consumed() {
        return Some(VerifyOutcome::AlreadyConsumed);
    }
    if code.is_expired(now) {
        return Some(VerifyOutcome::Expired);
    }
    if owner.is_verified() {
        return Some(VerifyOutcome::AlreadyVerified);
    }
    None
}

pub fn check_set_password_code(
    code: &VerificationCode,
    owner: &User,
    now: OffsetDateTime,
) -> Option<SetPasswordOutcome> {
    if code.purpose != CodePurpose::SignupSetPassword {
        return Some(SetPasswordOutcome::WrongPurpose);
    }
    if code.is_consumed() {
        return Some(SetPasswordOutcome::AlreadyConsumed);
    }
    if code.is_expired(now) {
        return Some(SetPasswordOutcome::Expired);
    }
    if !owner.is_verified() {
        return Some(SetPasswordOutcome::EmailNotVerified);
    }
    if owner.has_password() {
        return Some(SetPasswordOutcome::PasswordAlreadySet);
    }
    None
}

/// `email` and `name` are expected normalized and validated.
pub async fn run_signup(
    state: &AppState,
    email: &str,
    name: &str,
) -> anyhow::Result<SignupOutcome> {
    let cfg = &state.config.auth;

    if let Some(existing) = User::find_by_email(&state.db, email).await? {
        if existing.is_verified() {
            warn!(user_id = %existing.id, "signup for verified email");
            return Ok(SignupOutcome::Conflict);
        }
    }
    let user = User::create_or_get(&state.db, email, name).await?;
    let cooldown = Duration::seconds(cfg.resend_cooldown_seconds);

    let last = VerificationCode::latest_created_at(
        &state.db,
        user.id,
        CodePurpose::SignupVerifyEmail,
    )
    .await?;
    if in_cooldown(last, OffsetDateTime::now_utc(), cooldown) {
        warn!(user_id = %user.id, "signup code requested during cooldown");
        return Ok(SignupOutcome::Cooldown);
    }

    let code = generate_numeric_code();
    let code_hash = state.hasher.hash_blocking(code.clone()).await?;
    let now = OffsetDateTime::now_utc();
    let expires_at = now + Duration::minutes(cfg.code_ttl_minutes);

    let mut tx = state.db.begin().await.context("begin signup tx")?;

    let locked = User::lock_by_id_tx(&mut tx, user.id)
        .await?
        .context("user row disappeared during signup")?;
    if locked.is_verified() {
        warn!(user_id = %user.id, "signup raced with verification");
        return Ok(SignupOutcome::Conflict);
    }

    // recheck under the user lock; a concurrent signup may have issued a code meanwhile
    let last =
        VerificationCode::latest_created_at(&mut *tx, user.id, CodePurpose::SignupVerifyEmail)
            .await?;
    if in_cooldown(last, now, cooldown) {
        warn!(user_id = %user.id, "signup code requested during cooldown");
        return Ok(SignupOutcome::Cooldown);
    }

    VerificationCode::delete_for_user_tx(&mut tx, user.id, CodePurpose::SignupVerifyEmail)
        .await?;
    let code_id = VerificationCode::insert_tx(
        &mut tx,
        user.id,
        CodePurpose::SignupVerifyEmail,
        &code_hash,
        now,
        expires_at,
    )
    .await?;
    tx.commit().await.context("commit signup tx")?;

    let mail = SignupEmail {
        to: email.to_string(),
        recipient_name: name.to_string(),
        code,
        ttl_minutes: cfg.code_ttl_minutes,
        verification_code_id: code_id,
    };
    if let Err(e) = state.mailer.send_signup_email(&mail).await {
        warn!(error = ?e, user_id = %user.id, "signup email failed; removing code");
        if let Err(e) = VerificationCode::delete(&state.db, code_id).await {
            error!(error = ?e, %code_id, "compensating delete failed");
        }
        return Ok(SignupOutcome::MailFailed);
    }

    info!(user_id = %user.id, %code_id, "signup code issued");
    Ok(SignupOutcome::CodeSent {
        verification_code_id: code_id,
        expires_at,
    })
}

pub async fn verify_signup_code(
    state: &AppState,
    verification_code_id: Uuid,
    verification_code: &str,
) -> anyhow::Result<VerifyOutcome> {
    let now = OffsetDateTime::now_utc();
    let mut tx = state.db.begin().await.context("begin verify tx")?;

    let Some(peek) = VerificationCode::find_by_id_tx(&mut tx, verification_code_id).await? else {
        return Ok(VerifyOutcome::NotFound);
    };
    let owner = User::lock_by_id_tx(&mut tx, peek.user_id)
        .await?
        .context("verification code without owner")?;
    // a concurrent signup may have replaced the code while we waited on the user lock
    let Some(record) = VerificationCode::lock_by_id_tx(&mut tx, verification_code_id).await? else {
        return Ok(VerifyOutcome::NotFound);
    };

    if let Some(rejected) = check_verify_email_code(&record, &owner, now) {
        warn!(code_id = %record.id, outcome = ?rejected, "verify rejected");
        return Ok(rejected);
    }

    let matches = state
        .hasher
        .verify_blocking(verification_code.to_string(), record.code_hash.clone())
        .await?;
    if !matches {
        warn!(code_id = %record.id, "verify code mismatch");
        return Ok(VerifyOutcome::Invalid);
    }

    let secret_hash = state.hasher.hash_blocking(generate_secret_token()).await?;
    let expires_at = now + Duration::minutes(state.config.auth.code_ttl_minutes);

    User::mark_email_verified_tx(&mut tx, owner.id, now).await?;
    VerificationCode::consume_tx(&mut tx, record.id, now).await?;
    VerificationCode::delete_for_user_tx(&mut tx, owner.id, CodePurpose::SignupSetPassword)
        .await?;
    let set_password_code_id = VerificationCode::insert_tx(
        &mut tx,
        owner.id,
        CodePurpose::SignupSetPassword,
        &secret_hash,
        now,
        expires_at,
    )
    .await?;
    tx.commit().await.context("commit verify tx")?;

    info!(user_id = %owner.id, %set_password_code_id, "email verified");
    Ok(VerifyOutcome::Verified {
        set_password_code_id,
    })
}

pub async fn set_password_from_code(
    state: &AppState,
    verification_code_id: Uuid,
    password: &str,
) -> anyhow::Result<SetPasswordOutcome> {
    let now = OffsetDateTime::now_utc();
    let mut tx = state.db.begin().await.context("begin set-password tx")?;

    let Some(peek) = VerificationCode::find_by_id_tx(&mut tx, verification_code_id).await? else {
        return Ok(SetPasswordOutcome::NotFound);
    };
    let owner = User::lock_by_id_tx(&mut tx, peek.user_id)
        .await?
        .context("verification code without owner")?;
    let Some(record) = VerificationCode::lock_by_id_tx(&mut tx, verification_code_id).await? else {
        return Ok(SetPasswordOutcome::NotFound);
    };

    if let Some(rejected) = check_set_password_code(&record, &owner, now) {
        warn!(code_id = %record.id, outcome = ?rejected, "set-password rejected");
        return Ok(rejected);
    }

    let password_hash = state.hasher.hash_blocking(password.to_string()).await?;
    if !User::set_password_hash_tx(&mut tx, owner.id, &password_hash).await? {
        return Ok(SetPasswordOutcome::PasswordAlreadySet);
    }
    VerificationCode::consume_tx(&mut tx, record.id, now).await?;
    tx.commit().await.context("commit set-password tx")?;

    info!(user_id = %owner.id, "password set");
    Ok(SetPasswordOutcome::PasswordSet { email: owner.email })
}

/// Only verified users with a password can sign in; every other miss looks the same.
pub async fn sign_in(
    state: &AppState,
    email: &str,
    password: &str,
) -> anyhow::Result<SignInOutcome> {
    let Some(user) = User::find_by_email(&state.db, email).await? else {
        state.hasher.verify_dummy_blocking(password.to_string()).await?;
        warn!("sign-in for unknown email");
        return Ok(SignInOutcome::InvalidCredentials);
    };
    let Some(hash) = user.password_hash.clone().filter(|_| user.is_verified()) else {
        state.hasher.verify_dummy_blocking(password.to_string()).await?;
        warn!(user_id = %user.id, "sign-in for account without password");
        return Ok(SignInOutcome::InvalidCredentials);
    };

    if !state
        .hasher
        .verify_blocking(password.to_string(), hash)
        .await?
    {
        warn!(user_id = %user.id, "sign-in invalid password");
        return Ok(SignInOutcome::InvalidCredentials);
    }

    info!(user_id = %user.id, "user signed in");
    Ok(SignInOutcome::SignedIn(user))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sqlx::PgPool;

    use super::*;
    use crate::mail::testing::{FailingMailer, RecordingMailer};
    use crate::state::test_config;

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn user(verified: bool, with_password: bool) -> User {
        User {
            id: Uuid::new_v4(),
            email: "alice@example.com".into(),
            name: "Alice".into(),
            email_verified: verified.then(now),
            password_hash: with_password.then(|| "$argon2id$stub".to_string()),
            created_at: now(),
        }
    }

    fn code(purpose: CodePurpose, consumed: bool, expires_in: Duration) -> VerificationCode {
        let t = now();
        VerificationCode {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            code_hash: "$argon2id$stub".into(),
            purpose,
            expires_at: t + expires_in,
            consumed_at: consumed.then_some(t),
            created_at: t,
        }
    }

    #[test]
    fn email_is_normalized_and_validated() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
        assert_eq!(normalize_email("al ice@exa mple.com"), "alice@example.com");
        assert!(is_valid_email("alice@example.com"));
        assert!(!is_valid_email("alice@example"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn compatibility_forms_fold_to_the_same_email() {
        assert_eq!(normalize_email("ＡＬＩＣＥ@example.com"), "alice@example.com");
        assert_eq!(normalize_email("bob＠ｅｘａｍｐｌｅ.com"), "bob@example.com");
        assert_eq!(
            normalize_email("ＡＬＩＣＥ@example.com"),
            normalize_email("alice@example.com")
        );
    }

    #[test]
    fn name_compatibility_forms_are_folded() {
        assert_eq!(normalize_name("Ａｌｉｃｅ\u{3000}Liddell"), "Alice Liddell");
    }

    #[test]
    fn name_whitespace_is_collapsed() {
        assert_eq!(normalize_name("  Alice \t  Liddell\n"), "Alice Liddell");
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn six_digit_codes_only() {
        assert!(is_six_digit_code("000123"));
        assert!(!is_six_digit_code("12345"));
        assert!(!is_six_digit_code("1234567"));
        assert!(!is_six_digit_code("12a456"));
    }

    #[test]
    fn cooldown_window_is_inclusive_and_can_be_disabled() {
        let t = now();
        let window = Duration::seconds(60);
        assert!(!in_cooldown(None, t, window));
        assert!(in_cooldown(Some(t - Duration::seconds(59)), t, window));
        assert!(in_cooldown(Some(t - window), t, window));
        assert!(!in_cooldown(Some(t - Duration::seconds(61)), t, window));
        assert!(!in_cooldown(Some(t), t, Duration::ZERO));
    }

    #[test]
    fn verify_accepts_fresh_code_for_pending_user() {
        let c = code(CodePurpose::SignupVerifyEmail, false, Duration::minutes(10));
        assert_eq!(check_verify_email_code(&c, &user(false, false), now()), None);
    }

    #[test]
    fn verify_rejects_consumed_and_expired_codes() {
        let pending = user(false, false);
        let consumed = code(CodePurpose::SignupVerifyEmail, true, Duration::minutes(10));
        assert_eq!(
            check_verify_email_code(&consumed, &pending, now()),
            Some(VerifyOutcome::AlreadyConsumed)
        );

        let expired = code(CodePurpose::SignupVerifyEmail, false, Duration::minutes(-1));
        assert_eq!(
            check_verify_email_code(&expired, &pending, now()),
            Some(VerifyOutcome::Expired)
        );
    }

    #[test]
    fn verify_treats_expiry_instant_as_expired() {
        let c = code(CodePurpose::SignupVerifyEmail, false, Duration::minutes(10));
        assert_eq!(
            check_verify_email_code(&c, &user(false, false), c.expires_at),
            Some(VerifyOutcome::Expired)
        );
    }

    #[test]
    fn verify_replay_after_success_is_rejected_as_consumed() {
        // after a successful verify the code is consumed and the user verified
        let c = code(CodePurpose::SignupVerifyEmail, true, Duration::minutes(10));
        assert_eq!(
            check_verify_email_code(&c, &user(true, false), now()),
            Some(VerifyOutcome::AlreadyConsumed)
        );
    }

    #[test]
    fn verify_rejects_set_password_code_and_verified_user() {
        let wrong = code(CodePurpose::SignupSetPassword, false, Duration::minutes(10));
        assert_eq!(
            check_verify_email_code(&wrong, &user(false, false), now()),
            Some(VerifyOutcome::WrongPurpose)
        );

        let fresh = code(CodePurpose::SignupVerifyEmail, false, Duration::minutes(10));
        assert_eq!(
            check_verify_email_code(&fresh, &user(true, false), now()),
            Some(VerifyOutcome::AlreadyVerified)
        );
    }

    #[test]
    fn set_password_allowed_only_when_every_condition_holds() {
        let ok_code = code(CodePurpose::SignupSetPassword, false, Duration::minutes(10));
        assert_eq!(
            check_set_password_code(&ok_code, &user(true, false), now()),
            None
        );
    }

    #[test]
    fn set_password_each_condition_fails_independently() {
        let ready = user(true, false);
        let ttl = Duration::minutes(10);

        let consumed = code(CodePurpose::SignupSetPassword, true, ttl);
        assert_eq!(
            check_set_password_code(&consumed, &ready, now()),
            Some(SetPasswordOutcome::AlreadyConsumed)
        );

        let expired = code(CodePurpose::SignupSetPassword, false, Duration::seconds(-1));
        assert_eq!(
            check_set_password_code(&expired, &ready, now()),
            Some(SetPasswordOutcome::Expired)
        );

        let fresh = code(CodePurpose::SignupSetPassword, false, ttl);
        assert_eq!(
            check_set_password_code(&fresh, &user(false, false), now()),
            Some(SetPasswordOutcome::EmailNotVerified)
        );
        assert_eq!(
            check_set_password_code(&fresh, &user(true, true), now()),
            Some(SetPasswordOutcome::PasswordAlreadySet)
        );

        let verify_code = code(CodePurpose::SignupVerifyEmail, false, ttl);
        assert_eq!(
            check_set_password_code(&verify_code, &ready, now()),
            Some(SetPasswordOutcome::WrongPurpose)
        );
    }

    #[test]
    fn set_password_second_attempt_is_a_conflict() {
        // state after the first successful call: code consumed, password stored
        let used = code(CodePurpose::SignupSetPassword, true, Duration::minutes(10));
        assert_eq!(
            check_set_password_code(&used, &user(true, true), now()),
            Some(SetPasswordOutcome::AlreadyConsumed)
        );
    }

    fn recording_state(pool: PgPool) -> (AppState, Arc<RecordingMailer>) {
        let mailer = Arc::new(RecordingMailer::default());
        (AppState::for_tests(pool, mailer.clone()), mailer)
    }

    async fn code_count(pool: &PgPool, email: &str) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM verification_codes c JOIN users u ON u.id = c.user_id WHERE u.email = $1",
        )
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn stored_user(pool: &PgPool, email: &str) -> User {
        User::find_by_email(pool, email).await.unwrap().unwrap()
    }

    async fn signed_up(state: &AppState, mailer: &RecordingMailer, email: &str) -> (Uuid, String) {
        match run_signup(state, email, "Alice").await.unwrap() {
            SignupOutcome::CodeSent {
                verification_code_id,
                ..
            } => {
                let mail = mailer.last().unwrap();
                assert_eq!(mail.to, email);
                assert_eq!(mail.verification_code_id, verification_code_id);
                (verification_code_id, mail.code)
            }
            other => panic!("unexpected signup outcome: {other:?}"),
        }
    }

    async fn verified(state: &AppState, code_id: Uuid, code: &str) -> Uuid {
        match verify_signup_code(state, code_id, code).await.unwrap() {
            VerifyOutcome::Verified {
                set_password_code_id,
            } => set_password_code_id,
            other => panic!("unexpected verify outcome: {other:?}"),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn signup_verify_set_password_scenario(pool: PgPool) {
        let (state, mailer) = recording_state(pool);
        let (code_id, code) = signed_up(&state, &mailer, "alice@example.com").await;
        assert!(is_six_digit_code(&code));

        let set_id = verified(&state, code_id, &code).await;
        assert_ne!(set_id, code_id);
        assert!(stored_user(&state.db, "alice@example.com").await.is_verified());

        // the verify id cannot be replayed to set a password
        assert_eq!(
            set_password_from_code(&state, code_id, "correct horse").await.unwrap(),
            SetPasswordOutcome::WrongPurpose
        );
        assert_eq!(
            set_password_from_code(&state, set_id, "correct horse").await.unwrap(),
            SetPasswordOutcome::PasswordSet {
                email: "alice@example.com".into()
            }
        );
        assert_eq!(
            set_password_from_code(&state, set_id, "battery staple").await.unwrap(),
            SetPasswordOutcome::AlreadyConsumed
        );

        assert!(matches!(
            sign_in(&state, "alice@example.com", "correct horse").await.unwrap(),
            SignInOutcome::SignedIn(u) if u.email == "alice@example.com"
        ));
        assert!(matches!(
            sign_in(&state, "alice@example.com", "battery staple").await.unwrap(),
            SignInOutcome::InvalidCredentials
        ));
        assert!(matches!(
            sign_in(&state, "nobody@example.com", "correct horse").await.unwrap(),
            SignInOutcome::InvalidCredentials
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn signup_on_verified_email_creates_no_code(pool: PgPool) {
        let (state, mailer) = recording_state(pool);
        let (code_id, code) = signed_up(&state, &mailer, "alice@example.com").await;
        verified(&state, code_id, &code).await;
        let before = code_count(&state.db, "alice@example.com").await;

        assert_eq!(
            run_signup(&state, "alice@example.com", "Alice").await.unwrap(),
            SignupOutcome::Conflict
        );
        assert_eq!(code_count(&state.db, "alice@example.com").await, before);
        assert_eq!(mailer.count(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn replayed_verify_changes_nothing(pool: PgPool) {
        let (state, mailer) = recording_state(pool);
        let (code_id, code) = signed_up(&state, &mailer, "alice@example.com").await;
        let set_id = verified(&state, code_id, &code).await;

        assert_eq!(
            verify_signup_code(&state, code_id, &code).await.unwrap(),
            VerifyOutcome::AlreadyConsumed
        );
        let user = stored_user(&state.db, "alice@example.com").await;
        let set_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM verification_codes WHERE user_id = $1 AND purpose = $2",
        )
        .bind(user.id)
        .bind(CodePurpose::SignupSetPassword)
        .fetch_all(&state.db)
        .await
        .unwrap();
        assert_eq!(set_ids, vec![set_id]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn expired_or_wrong_code_changes_nothing(pool: PgPool) {
        let (state, mailer) = recording_state(pool);

        let (expired_id, code) = signed_up(&state, &mailer, "bob@example.com").await;
        sqlx::query("UPDATE verification_codes SET expires_at = now() - interval '1 minute' WHERE id = $1")
            .bind(expired_id)
            .execute(&state.db)
            .await
            .unwrap();
        assert_eq!(
            verify_signup_code(&state, expired_id, &code).await.unwrap(),
            VerifyOutcome::Expired
        );
        assert!(!stored_user(&state.db, "bob@example.com").await.is_verified());

        let (code_id, code) = signed_up(&state, &mailer, "carol@example.com").await;
        let wrong = if code == "000000" { "000001" } else { "000000" };
        assert_eq!(
            verify_signup_code(&state, code_id, wrong).await.unwrap(),
            VerifyOutcome::Invalid
        );
        assert!(!stored_user(&state.db, "carol@example.com").await.is_verified());

        let open: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM verification_codes WHERE id = ANY($1) AND consumed_at IS NULL",
        )
        .bind(vec![expired_id, code_id])
        .fetch_one(&state.db)
        .await
        .unwrap();
        assert_eq!(open, 2);

        // the right code still works after a miss
        verified(&state, code_id, &code).await;
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn mail_failure_removes_the_code_but_keeps_the_user(pool: PgPool) {
        let failing = AppState::for_tests(pool.clone(), Arc::new(FailingMailer));
        assert_eq!(
            run_signup(&failing, "alice@example.com", "Alice").await.unwrap(),
            SignupOutcome::MailFailed
        );
        assert!(!stored_user(&pool, "alice@example.com").await.is_verified());
        assert_eq!(code_count(&pool, "alice@example.com").await, 0);

        // nothing left to trip the cooldown, so an immediate retry goes through
        let (state, mailer) = recording_state(pool);
        signed_up(&state, &mailer, "alice@example.com").await;
        assert_eq!(code_count(&state.db, "alice@example.com").await, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn resend_within_cooldown_is_rejected(pool: PgPool) {
        let (state, mailer) = recording_state(pool);
        signed_up(&state, &mailer, "alice@example.com").await;

        assert_eq!(
            run_signup(&state, "alice@example.com", "Alice").await.unwrap(),
            SignupOutcome::Cooldown
        );
        assert_eq!(mailer.count(), 1);
        assert_eq!(code_count(&state.db, "alice@example.com").await, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn resend_replaces_the_previous_code(pool: PgPool) {
        let mut config = test_config();
        config.auth.resend_cooldown_seconds = 0;
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::from_parts(pool, Arc::new(config), mailer.clone()).unwrap();

        let (first_id, first_code) = signed_up(&state, &mailer, "alice@example.com").await;
        let (second_id, second_code) = signed_up(&state, &mailer, "alice@example.com").await;
        assert_ne!(first_id, second_id);
        assert_eq!(code_count(&state.db, "alice@example.com").await, 1);

        assert_eq!(
            verify_signup_code(&state, first_id, &first_code).await.unwrap(),
            VerifyOutcome::NotFound
        );
        verified(&state, second_id, &second_code).await;
    }
}
