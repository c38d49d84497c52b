//! Password hashing for the auth core (C5).
//!
//! The donor's `user.rs` carried a full in-memory `UserManager` with RBAC
//! roles/permissions, MFA, and session tracking — none of which spec's
//! auth core names — plus a password hash that was an explicit placeholder
//! (`DefaultHasher` dressed up to look like an Argon2id string). This file
//! keeps only what survives: real password hashing, via the `argon2` crate
//! the donor's own comment said production code should use. The `User`
//! record itself lives in [`crate::store::User`] — there is exactly one
//! user shape in this crate, not one per layer.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::{Error, Result};

/// Hashes a plaintext password into a PHC-formatted Argon2id string
/// suitable for storing in `users.password_hash`.
pub fn hash_password(plaintext: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("password hashing failed: {e}")))
}

/// Verifies a plaintext password against a stored PHC hash. Returns `Ok(false)`
/// on mismatch, `Err` only if the stored hash is itself malformed.
pub fn verify_password(plaintext: &str, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| Error::Internal(format!("stored password hash is malformed: {e}")))?;
    Ok(Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_correct_password() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash).unwrap());
    }

    #[test]
    fn rejects_a_wrong_password() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(!verify_password("wrong password", &hash).unwrap());
    }

    #[test]
    fn distinct_hashes_for_the_same_password() {
        let a = hash_password("same-input").unwrap();
        let b = hash_password("same-input").unwrap();
        assert_ne!(a, b, "salts must differ between calls");
    }
}
