//! Password hashing for secret fields.
//!
//! Secrets are stored as Argon2id PHC strings (`$argon2id$v=19$...`), so the
//! salt and parameters travel with the hash.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Document, EntityDefinition};

#[derive(Error, Debug)]
pub enum HashError {
    #[error("Secret field '{0}' must be a string")]
    NotAString(String),

    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error("Hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<argon2::password_hash::Error> for HashError {
    fn from(e: argon2::password_hash::Error) -> Self {
        HashError::Hash(e.to_string())
    }
}

/// Hashes a plain-text secret into a PHC string.
pub fn hash_secret(plain: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(plain.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Checks a plain-text secret against a stored PHC string.
pub fn verify_secret(plain: &str, phc: &str) -> Result<bool, HashError> {
    let parsed = PasswordHash::new(phc)?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Replaces every secret field present in `doc` with its hash.
///
/// Hashing runs on the blocking pool.
pub async fn hash_secret_fields(
    definition: &EntityDefinition,
    doc: &mut Document,
) -> Result<(), HashError> {
    for field in definition.secret_fields {
        let plain = match doc.get(field) {
            None => continue,
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(HashError::NotAString(field.to_string())),
        };
        let hash = tokio::task::spawn_blocking(move || hash_secret(&plain)).await??;
        doc.insert(*field, hash);
    }
    Ok(())
}
