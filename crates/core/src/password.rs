//! Password hashing with Argon2id
//!
//! Stored hashes are PHC strings (`$argon2id$v=19$m=...`). Verification reads
//! the parameters back out of the string, so hashes made with older or cheaper
//! parameters keep verifying after the defaults change.

use crate::error::{CoreError, Result};
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;

/// Salt size in bytes
const SALT_SIZE: usize = 16;

/// Hash a password with the default Argon2id parameters
pub fn hash_password(password: &str) -> Result<String> {
    hash_password_with_params(password, Params::default())
}

/// Hash a password with explicit Argon2id cost parameters
pub fn hash_password_with_params(password: &str, params: Params) -> Result<String> {
    let mut salt_bytes = [0u8; SALT_SIZE];
    OsRng
        .try_fill_bytes(&mut salt_bytes)
        .map_err(|e| CoreError::RandomSource(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| CoreError::PasswordHash(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CoreError::PasswordHash(e.to_string()))?
        .to_string();
    Ok(phc)
}

/// Check a password against a stored PHC hash
///
/// # Errors
/// - `UserPasswordDoesNotMatch` if the password is wrong
/// - `PasswordHash` if the stored hash cannot be parsed or verified at all
pub fn verify_password(password: &str, phc: &str) -> Result<()> {
    let parsed = PasswordHash::new(phc).map_err(|e| CoreError::PasswordHash(e.to_string()))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(()),
        Err(password_hash::Error::Password) => Err(CoreError::UserPasswordDoesNotMatch),
        Err(e) => Err(CoreError::PasswordHash(e.to_string())),
    }
}

/// Whether a stored hash is a parseable PHC string
pub fn is_parseable_hash(phc: &str) -> bool {
    PasswordHash::new(phc).is_ok()
}
