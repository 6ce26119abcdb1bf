//! Access token types for session authentication
//!
//! AccessToken is the 256-bit bearer secret handed to a client once, at login.
//! AccessTokenHash is its SHA-256 digest, the only form that is ever stored,
//! used as a map key, or compared.
//!
//! ## Security Notes
//!
//! - **Random generation**: OS RNG; a failing RNG is an error, never a weak token
//! - **Debug**: AccessToken redacts itself so it cannot leak through logs
//! - **Comparison**: AccessTokenHash equality is constant-time (`subtle`), so a
//!   HashMap lookup's final key match does not short-circuit on the first
//!   differing byte

use crate::error::{CoreError, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Token size in bytes (256-bit)
pub const TOKEN_SIZE: usize = 32;

/// Digest size in bytes (SHA-256)
pub const HASH_SIZE: usize = 32;

/// Bearer credential for an authenticated session
///
/// 256-bit random token. Only held in memory long enough to hand it to the
/// client; the registry keeps [`AccessTokenHash`] instead.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AccessToken([u8; TOKEN_SIZE]);

impl AccessToken {
    /// Generate a new random access token
    ///
    /// # Errors
    /// - `RandomSource` if the OS RNG cannot produce bytes
    ///
    /// # Example
    /// ```
    /// # use nomlog_core::token::AccessToken;
    /// let token = AccessToken::generate().unwrap();
    /// assert_eq!(token.as_bytes().len(), 32);
    /// ```
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; TOKEN_SIZE];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CoreError::RandomSource(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Create token from hexadecimal string
    ///
    /// # Errors
    /// - `InvalidToken` if the string does not decode to exactly 32 bytes
    /// - `InvalidToken` if the string contains non-hex characters
    ///
    /// # Example
    /// ```
    /// # use nomlog_core::token::AccessToken;
    /// let token = AccessToken::generate().unwrap();
    /// let decoded = AccessToken::from_hex(&token.to_hex()).unwrap();
    /// assert_eq!(token, decoded);
    /// ```
    pub fn from_hex(hex: &str) -> Result<Self> {
        let mut bytes = [0u8; TOKEN_SIZE];
        hex::decode_to_slice(hex, &mut bytes).map_err(|_| CoreError::InvalidToken)?;
        Ok(Self(bytes))
    }

    /// Export token as a 64-character lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get raw bytes reference
    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    /// SHA-256 digest of the raw token bytes
    pub fn hash(&self) -> AccessTokenHash {
        let digest = Sha256::digest(self.0);
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(&digest);
        AccessTokenHash(bytes)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for AccessToken {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// One-way digest of an [`AccessToken`]
///
/// Persisted, used as the session key, and compared on every token check.
/// Serializes as lowercase hex.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessTokenHash([u8; HASH_SIZE]);

impl AccessTokenHash {
    /// Decode a hash from its hex form
    ///
    /// Used when a client names one of its own sessions (e.g. "log out this
    /// device"); never a substitute for presenting the token itself.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(hex, &mut bytes).map_err(|_| CoreError::InvalidToken)?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// First 8 hex characters, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl PartialEq for AccessTokenHash {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for AccessTokenHash {}

impl Hash for AccessTokenHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Debug for AccessTokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessTokenHash({})", self.short())
    }
}

impl fmt::Display for AccessTokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for AccessTokenHash {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<AccessTokenHash> for String {
    fn from(hash: AccessTokenHash) -> Self {
        hash.to_hex()
    }
}
