use std::sync::Arc;

use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use tracing::error;

use crate::config::AuthConfig;

/// Length of the secret behind a set-password code.
const SECRET_TOKEN_LEN: usize = 32;

/// Argon2id hasher for passwords and verification codes.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
    /// Hash of a throwaway secret under the configured params, verified on sign-in misses.
    dummy_hash: Arc<str>,
}

impl SecretHasher {
    pub fn new(cfg: &AuthConfig) -> anyhow::Result<Self> {
        let params = Params::new(
            cfg.argon2_memory_kib,
            cfg.argon2_iterations,
            cfg.argon2_parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("invalid argon2 params: {e}"))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(generate_secret_token().as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("argon2 dummy hash: {e}"))?
            .to_string();
        Ok(Self {
            argon2,
            dummy_hash: dummy_hash.into(),
        })
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Parameters come from the PHC string, so hashes made under older settings still verify.
    pub fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            anyhow::anyhow!(e.to_string())
        })?;
        Ok(self
            .argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }

    pub async fn hash_blocking(&self, plain: String) -> anyhow::Result<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .context("join argon2 hash task")?
    }

    pub async fn verify_blocking(&self, plain: String, hash: String) -> anyhow::Result<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&plain, &hash))
            .await
            .context("join argon2 verify task")?
    }

    /// Spends the same work as a real verification; always `false`.
    pub async fn verify_dummy_blocking(&self, plain: String) -> anyhow::Result<bool> {
        let dummy = self.dummy_hash.to_string();
        self.verify_blocking(plain, dummy).await.map(|_| false)
    }
}

/// Uniform 6-digit code, zero padded.
pub fn generate_numeric_code() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000u32))
}

pub fn generate_secret_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(SECRET_TOKEN_LEN)
        .map(char::from)
        .collect()
}
