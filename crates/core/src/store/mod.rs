//! Persistent store abstraction
//!
//! The registry treats the store as the source of truth for users and
//! sessions and its own maps as a cache. Any backend (SQL, file, remote
//! service) plugs in by implementing [`PersistentStore`].
//!
//! Cancellation: dropping a returned future abandons the call. The registry
//! imposes no timeouts and never retries; both belong to the caller or the
//! adapter.

mod memory;

pub use memory::MemoryStore;

use crate::token::AccessTokenHash;
use crate::types::{StoredSession, User, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Store error
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist
    #[error("record not found")]
    NotFound,

    /// The backend failed (I/O, connection, serialization, ...)
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Wrap a plain message as a backend failure
    pub fn backend(msg: impl std::fmt::Display) -> Self {
        StoreError::Backend(anyhow::anyhow!("{}", msg))
    }
}

/// Store result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable storage for users and sessions
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Load user by unique name
    async fn load_user(&self, name: &str) -> StoreResult<User>;

    /// Load user by numeric id
    async fn load_user_by_id(&self, id: UserId) -> StoreResult<User>;

    /// Load every user (cache warm-up at startup)
    async fn load_users(&self) -> StoreResult<Vec<User>>;

    /// Persist a new session row
    async fn add_user_session(&self, session: &StoredSession) -> StoreResult<()>;

    /// Load session row by token hash
    async fn load_user_session(&self, hash: &AccessTokenHash) -> StoreResult<StoredSession>;

    /// Delete session row by token hash (absent rows are not an error)
    async fn delete_user_session_by_token(&self, hash: &AccessTokenHash) -> StoreResult<()>;

    /// Delete a session row only if it belongs to `user_id`
    ///
    /// Returns whether a row was deleted.
    async fn delete_user_session_by_user_and_token(&self, user_id: UserId, hash: &AccessTokenHash) -> StoreResult<bool>;

    /// Delete every session row of a user, returning the count
    async fn delete_user_sessions_by_user(&self, user_id: UserId) -> StoreResult<u64>;

    /// Delete every session row already expired at `cutoff`, returning the count
    ///
    /// A row expiring exactly at `cutoff` counts as expired, matching
    /// [`Session::is_expired_at`](crate::types::Session::is_expired_at).
    async fn delete_user_sessions_expired_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}
