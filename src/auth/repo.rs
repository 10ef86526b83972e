use anyhow::Context;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{CodePurpose, User, VerificationCode};

const USER_COLUMNS: &str = "id, email, name, email_verified, password_hash, created_at";
const CODE_COLUMNS: &str = "id, user_id, code_hash, purpose, expires_at, consumed_at, created_at";

impl User {
    /// Find a user by normalized email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    /// Insert a pending user, or hand back the existing row for this email untouched.
    pub async fn create_or_get(db: &PgPool, email: &str, name: &str) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, name)
            VALUES ($1, $2)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(name)
        .fetch_one(db)
        .await
        .context("create or get user")?;
        Ok(user)
    }

    pub async fn lock_by_id_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .context("lock user")?;
        Ok(user)
    }

    pub async fn mark_email_verified_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET email_verified = $2 WHERE id = $1 AND email_verified IS NULL")
            .bind(id)
            .bind(at)
            .execute(&mut **tx)
            .await
            .context("mark email verified")?;
        Ok(())
    }

    /// Only ever fills an empty hash on a verified user; returns whether a row changed.
    pub async fn set_password_hash_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        password_hash: &str,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2
             WHERE id = $1
               AND password_hash IS NULL
               AND email_verified IS NOT NULL
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&mut **tx)
        .await
        .context("set password hash")?;
        Ok(res.rows_affected() == 1)
    }
}

impl VerificationCode {
    pub async fn find_by_id_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> anyhow::Result<Option<VerificationCode>> {
        let code = sqlx::query_as::<_, VerificationCode>(&format!(
            "SELECT {CODE_COLUMNS} FROM verification_codes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .context("find verification code")?;
        Ok(code)
    }

    /// Callers lock the owning user first; codes are always locked after their user.
    pub async fn lock_by_id_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> anyhow::Result<Option<VerificationCode>> {
        let code = sqlx::query_as::<_, VerificationCode>(&format!(
            "SELECT {CODE_COLUMNS} FROM verification_codes WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .context("lock verification code")?;
        Ok(code)
    }

    /// Runs on the pool for the early check, or inside the signup transaction.
    pub async fn latest_created_at<'e>(
        exec: impl PgExecutor<'e>,
        user_id: Uuid,
        purpose: CodePurpose,
    ) -> anyhow::Result<Option<OffsetDateTime>> {
        let latest: Option<OffsetDateTime> = sqlx::query_scalar(
            r#"
            SELECT MAX(created_at)
              FROM verification_codes
             WHERE user_id = $1 AND purpose = $2
            "#,
        )
        .bind(user_id)
        .bind(purpose)
        .fetch_one(exec)
        .await
        .context("latest verification code")?;
        Ok(latest)
    }

    pub async fn delete_for_user_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        purpose: CodePurpose,
    ) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM verification_codes WHERE user_id = $1 AND purpose = $2")
            .bind(user_id)
            .bind(purpose)
            .execute(&mut **tx)
            .await
            .context("delete verification codes")?;
        Ok(res.rows_affected())
    }

    pub async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        purpose: CodePurpose,
        code_hash: &str,
        created_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO verification_codes (user_id, code_hash, purpose, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(code_hash)
        .bind(purpose)
        .bind(created_at)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await
        .context("insert verification code")?;
        Ok(id)
    }

    pub async fn consume_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE verification_codes SET consumed_at = $2 WHERE id = $1 AND consumed_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&mut **tx)
        .await
        .context("consume verification code")?;
        Ok(())
    }

    pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM verification_codes WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .context("delete verification code")?;
        Ok(())
    }
}
