//! User records as the registry sees them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric user id assigned by the store
pub type UserId = i64;

/// User record
///
/// A copy of the durable row. Only the fields the registry needs are modeled;
/// profile data (goals, units, timezone) lives with the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Store-assigned id
    pub id: UserId,
    /// Unique login name
    pub name: String,
    /// Argon2id PHC string
    pub password_hash: String,
    /// Requested session lifetime; the registry applies a floor
    pub session_lifetime_secs: i64,
    /// Account creation time
    pub created: DateTime<Utc>,
}

impl User {
    /// Create new user record
    pub fn new(id: UserId, name: impl Into<String>, password_hash: impl Into<String>, session_lifetime_secs: i64) -> Self {
        Self {
            id,
            name: name.into(),
            password_hash: password_hash.into(),
            session_lifetime_secs,
            created: Utc::now(),
        }
    }
}
