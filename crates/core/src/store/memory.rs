//! In-memory store for tests and embedding

use super::{PersistentStore, StoreError, StoreResult};
use crate::token::AccessTokenHash;
use crate::types::{StoredSession, User, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// HashMap-backed [`PersistentStore`]
///
/// Clones share state, so a test can keep a handle while the registry owns
/// another. [`MemoryStore::set_unavailable`] makes every call fail with a
/// backend error, which is how store outages are exercised.
#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<RwLock<HashMap<UserId, User>>>,
    sessions: Arc<RwLock<HashMap<AccessTokenHash, StoredSession>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user row
    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }

    /// Remove a user row (sessions are left behind, as with a missing FK)
    pub async fn remove_user(&self, id: UserId) -> Option<User> {
        self.users.write().await.remove(&id)
    }

    /// Whether a session row exists
    pub async fn has_session(&self, hash: &AccessTokenHash) -> bool {
        self.sessions.read().await.contains_key(hash)
    }

    /// Get count of session rows
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Simulate an outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::backend("memory store marked unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load_user(&self, name: &str) -> StoreResult<User> {
        self.check_available()?;
        self.users
            .read()
            .await
            .values()
            .find(|u| u.name == name)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn load_user_by_id(&self, id: UserId) -> StoreResult<User> {
        self.check_available()?;
        self.users.read().await.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn load_users(&self) -> StoreResult<Vec<User>> {
        self.check_available()?;
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn add_user_session(&self, session: &StoredSession) -> StoreResult<()> {
        self.check_available()?;
        self.sessions.write().await.insert(session.token_hash, session.clone());
        Ok(())
    }

    async fn load_user_session(&self, hash: &AccessTokenHash) -> StoreResult<StoredSession> {
        self.check_available()?;
        self.sessions.read().await.get(hash).cloned().ok_or(StoreError::NotFound)
    }

    async fn delete_user_session_by_token(&self, hash: &AccessTokenHash) -> StoreResult<()> {
        self.check_available()?;
        self.sessions.write().await.remove(hash);
        Ok(())
    }

    async fn delete_user_session_by_user_and_token(&self, user_id: UserId, hash: &AccessTokenHash) -> StoreResult<bool> {
        self.check_available()?;
        let mut sessions = self.sessions.write().await;
        match sessions.get(hash) {
            Some(row) if row.user_id == user_id => {
                sessions.remove(hash);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_user_sessions_by_user(&self, user_id: UserId) -> StoreResult<u64> {
        self.check_available()?;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, row| row.user_id != user_id);
        Ok((before - sessions.len()) as u64)
    }

    async fn delete_user_sessions_expired_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.check_available()?;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, row| row.expires > cutoff);
        Ok((before - sessions.len()) as u64)
    }
}
