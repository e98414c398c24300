//! Credential hashing for registered users.
//!
//! Secrets are stored as Argon2id PHC strings with a per-user random salt.
//! Verification goes through the argon2 verifier, which compares digests in
//! constant time.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use tracing::warn;

use relay_core::error::RelayError;

/// Hash a raw secret into a PHC string suitable for storage.
pub fn hash_secret(secret: &str) -> Result<String, RelayError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| RelayError::Storage(format!("Argon2 password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

/// Check a raw secret against a stored PHC string.
///
/// A malformed stored hash is treated as a mismatch.
pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "Stored credential hash could not be parsed");
            return false;
        }
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}
