//! Error types for nomlog-core

use crate::store::StoreError;
use thiserror::Error;

/// Core error type
///
/// The authentication kinds exist for audit logs. Callers facing a client
/// should collapse them with [`CoreError::is_auth_failure`] so that a wrong
/// password and an unknown user look identical from outside.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid token format")]
    InvalidToken,

    #[error("User does not exist")]
    UserDoesNotExist,

    #[error("User password does not match")]
    UserPasswordDoesNotMatch,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Password hash error: {0}")]
    PasswordHash(String),

    #[error("Random source failure: {0}")]
    RandomSource(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// True for every kind that means "not authenticated".
    ///
    /// Store failures and corrupt password hashes are not auth failures:
    /// the registry could not decide, which is a different answer.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidToken
                | CoreError::UserDoesNotExist
                | CoreError::UserPasswordDoesNotMatch
                | CoreError::SessionNotFound
                | CoreError::SessionExpired
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<tokio::task::JoinError> for CoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        CoreError::Internal(format!("blocking task failed: {}", err))
    }
}
