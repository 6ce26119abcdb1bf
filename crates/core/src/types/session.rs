//! Session records: in-memory and durable forms

use super::user::UserId;
use crate::token::{AccessToken, AccessTokenHash};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// In-memory session, keyed by [`AccessTokenHash`]
///
/// Holds the owning user's id, never the user itself; readers resolve the id
/// against the user cache on every check. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub expires: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: UserId, expires: DateTime<Utc>) -> Self {
        Self { user_id, expires }
    }

    /// Session starting at `now` that lasts `max(floor_secs, requested_secs)`
    pub fn starting_at(user_id: UserId, now: DateTime<Utc>, requested_secs: i64, floor_secs: i64) -> Self {
        let secs = requested_secs.max(floor_secs);
        let expires = Duration::try_seconds(secs)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { user_id, expires }
    }

    /// Expired once `now` reaches the expiry instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

/// Durable session row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub token_hash: AccessTokenHash,
    pub user_id: UserId,
    pub expires: DateTime<Utc>,
    pub created: DateTime<Utc>,
    /// Client metadata, e.g. the login request's User-Agent
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl StoredSession {
    pub fn new(token_hash: AccessTokenHash, session: Session, created: DateTime<Utc>, user_agent: Option<String>) -> Self {
        Self {
            token_hash,
            user_id: session.user_id,
            expires: session.expires,
            created,
            user_agent,
        }
    }

    /// In-memory form of this row
    pub fn session(&self) -> Session {
        Session::new(self.user_id, self.expires)
    }
}

/// A freshly issued bearer token
///
/// The only place a raw [`AccessToken`] leaves the registry. Send
/// `token.to_hex()` to the client once and drop the value.
#[derive(Debug, Clone, Copy)]
pub struct IssuedToken {
    pub token: AccessToken,
    pub expires: DateTime<Utc>,
}
