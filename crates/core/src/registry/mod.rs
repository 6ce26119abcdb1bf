//! Session and credential registry
//!
//! # Registry
//!
//! Issues, validates, and revokes access tokens. Holds two caches in front of
//! a [`PersistentStore`]:
//!
//! - **Session map**: token hash → `{ user_id, expires }`
//! - **User cache**: users indexed by name and by id
//!
//! The store is the source of truth. Every miss reads through to it, so a
//! restarted process (cold caches) still accepts tokens issued before the
//! restart.
//!
//! ## Locking
//!
//! Each cache sits behind its own `RwLock`. When both are needed the order is
//! **users, then sessions**. No lock is held across a store call; store calls
//! are the only suspension points besides password verification, which runs on
//! the blocking pool.
//!
//! ## Expiry
//!
//! Checked on every lookup. [`Registry::clear_expired_sessions`] only bounds
//! memory use; correctness never depends on when it runs. The registry starts
//! no background tasks, so the caller schedules the sweep.

mod config;
mod sessions;
mod user_cache;

pub use config::{RegistryConfig, DEFAULT_MAX_CACHED_USERS, DEFAULT_MIN_SESSION_LIFETIME_SECS};

use crate::error::{CoreError, Result};
use crate::password;
use crate::store::{PersistentStore, StoreError};
use crate::token::{AccessToken, AccessTokenHash};
use crate::types::{IssuedToken, Session, StoredSession, User, UserId};
use chrono::Utc;
use sessions::SessionMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use user_cache::UserCache;

/// Session and credential registry
///
/// Cheap to clone; clones share caches and store.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn PersistentStore>,
    config: RegistryConfig,
    users: Arc<RwLock<UserCache>>,
    sessions: Arc<RwLock<SessionMap>>,
}

impl Registry {
    /// Create registry with default configuration
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self::with_config(store, RegistryConfig::default())
    }

    /// Create registry with explicit configuration
    pub fn with_config(store: Arc<dyn PersistentStore>, config: RegistryConfig) -> Self {
        let config = config.normalized();
        Self {
            store,
            users: Arc::new(RwLock::new(UserCache::new(config.max_cached_users))),
            sessions: Arc::new(RwLock::new(SessionMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ===== User cache =====

    /// Whether a user with this name is cached
    ///
    /// Cache-only. Fine for UI hints, not an authentication check.
    pub async fn has_user(&self, name: &str) -> bool {
        self.users.read().await.contains_name(name)
    }

    /// Insert or replace a cached user
    ///
    /// Sessions refer to users by id, so every session of this user sees the
    /// new record on its next check.
    pub async fn put_user(&self, user: User) {
        let id = user.id;
        if let Some(evicted) = self.users.write().await.put(user) {
            debug!("Evicted cached user {} to make room for {}", evicted, id);
        }
    }

    /// Replace a cached user whose name changed
    ///
    /// The old name stops resolving and the new one starts in the same step;
    /// the id slot stays in place so concurrent checks see either the old or
    /// the new record.
    pub async fn put_user_with_new_name(&self, old_name: &str, user: User) {
        let mut users = self.users.write().await;
        let _sessions = self.sessions.write().await;
        info!("Renaming cached user {} from {:?} to {:?}", user.id, old_name, user.name);
        users.rename(old_name, user);
    }

    /// Fill the user cache from the store
    ///
    /// Users with an empty name or an unparseable password hash are skipped:
    /// they cannot log in until fixed, but they do not stop startup.
    /// Returns the number of users cached.
    pub async fn load_from_database(&self) -> Result<usize> {
        let users = self.store.load_users().await?;
        let total = users.len();

        let mut cache = self.users.write().await;
        let mut loaded = 0;
        for user in users {
            if user.name.is_empty() {
                warn!("Skipping user {}: empty name", user.id);
                continue;
            }
            if !password::is_parseable_hash(&user.password_hash) {
                warn!("Skipping user {} ({}): unparseable password hash", user.id, user.name);
                continue;
            }
            cache.put(user);
            loaded += 1;
        }

        info!("Loaded {} of {} users into cache", loaded, total);
        Ok(loaded)
    }

    /// Look up a user by name, reading through to the store
    pub async fn user_by_name(&self, name: &str) -> Result<User> {
        let (cached, seen_revision) = {
            let users = self.users.read().await;
            (users.get_by_name(name).cloned(), users.revision())
        };
        if let Some(user) = cached {
            return Ok(user);
        }

        let user = match self.store.load_user(name).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(CoreError::UserDoesNotExist),
            Err(e) => return Err(e.into()),
        };
        self.fill_user(&user, seen_revision).await;
        Ok(user)
    }

    /// Look up a user by id, reading through to the store
    pub async fn user_by_id(&self, id: UserId) -> Result<User> {
        let (cached, seen_revision) = {
            let users = self.users.read().await;
            (users.get_by_id(id).cloned(), users.revision())
        };
        if let Some(user) = cached {
            return Ok(user);
        }

        let user = match self.store.load_user_by_id(id).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(CoreError::UserDoesNotExist),
            Err(e) => return Err(e.into()),
        };
        self.fill_user(&user, seen_revision).await;
        Ok(user)
    }

    /// Cache a user read from the store unless the cache moved on meanwhile
    async fn fill_user(&self, user: &User, seen_revision: u64) {
        if self.users.write().await.fill(user.clone(), seen_revision) {
            debug!("Cached user {} ({}) from store", user.id, user.name);
        } else {
            debug!("Not caching stale store record for user {}", user.id);
        }
    }

    // ===== Login and issuance =====

    /// Log in with name and password
    pub async fn login(&self, username: &str, password: &str) -> Result<IssuedToken> {
        self.login_with_user_agent(username, password, None).await
    }

    /// Log in, recording the client's user agent on the durable session
    ///
    /// # Errors
    /// - `UserDoesNotExist` if no such user
    /// - `UserPasswordDoesNotMatch` if the password is wrong
    /// - `PasswordHash` if the stored hash is corrupt
    /// - `StoreUnavailable` if the store could not be read or written
    pub async fn login_with_user_agent(
        &self,
        username: &str,
        password: &str,
        user_agent: Option<&str>,
    ) -> Result<IssuedToken> {
        let user = match self.user_by_name(username).await {
            Ok(user) => user,
            Err(CoreError::UserDoesNotExist) => {
                info!("Login rejected: unknown user {:?}", username);
                return Err(CoreError::UserDoesNotExist);
            }
            Err(e) => return Err(e),
        };

        let phc = user.password_hash.clone();
        let attempt = password.to_owned();
        let verified = tokio::task::spawn_blocking(move || password::verify_password(&attempt, &phc)).await?;
        match verified {
            Ok(()) => {}
            Err(CoreError::UserPasswordDoesNotMatch) => {
                warn!("Login rejected for user {}: wrong password", user.id);
                return Err(CoreError::UserPasswordDoesNotMatch);
            }
            Err(e) => {
                error!("Password hash for user {} is unusable: {}", user.id, e);
                return Err(e);
            }
        }

        self.issue_for(&user, user_agent).await
    }

    /// Issue a token for a known user without checking a password
    ///
    /// For trusted callers only, e.g. right after account creation.
    pub async fn issue_token(&self, user_id: UserId, user_agent: Option<&str>) -> Result<IssuedToken> {
        let user = self.user_by_id(user_id).await?;
        self.issue_for(&user, user_agent).await
    }

    /// The session is durable before the token is returned.
    async fn issue_for(&self, user: &User, user_agent: Option<&str>) -> Result<IssuedToken> {
        let token = AccessToken::generate()?;
        let hash = token.hash();
        let now = Utc::now();
        let session = Session::starting_at(
            user.id,
            now,
            user.session_lifetime_secs,
            self.config.min_session_lifetime_secs,
        );

        let row = StoredSession::new(hash, session, now, user_agent.map(str::to_owned));
        self.store.add_user_session(&row).await?;
        self.sessions.write().await.insert(hash, session);

        info!("Issued session {} for user {} (expires {})", hash.short(), user.id, session.expires);
        Ok(IssuedToken {
            token,
            expires: session.expires,
        })
    }

    // ===== Validation =====

    /// Validate a client token
    ///
    /// `Ok(None)` means "not authenticated" for any reason: malformed, unknown,
    /// expired, or pointing at a deleted user. `Err` means the registry could
    /// not decide (store failure) and must not be reported as a 401.
    pub async fn check_token(&self, token: &str) -> Result<Option<User>> {
        match self.authenticate(token).await {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_auth_failure() => {
                debug!("Token rejected: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Validate a client token, keeping the reason for a rejection
    ///
    /// # Errors
    /// - `InvalidToken` if the string is not a well-formed token
    /// - `SessionNotFound` / `SessionExpired` if there is no live session
    /// - `UserDoesNotExist` if the session's user is gone
    /// - `StoreUnavailable` on store failure
    pub async fn authenticate(&self, token: &str) -> Result<User> {
        let hash = AccessToken::from_hex(token)?.hash();
        let session = self.resolve_session(&hash).await?;
        self.user_by_id(session.user_id).await
    }

    async fn resolve_session(&self, hash: &AccessTokenHash) -> Result<Session> {
        let now = Utc::now();
        let (cached, seen_revision) = {
            let sessions = self.sessions.read().await;
            (sessions.get(hash), sessions.revision())
        };

        match cached {
            Some(session) if !session.is_expired_at(now) => return Ok(session),
            Some(_) => {
                self.drop_expired(hash).await;
                return Err(CoreError::SessionExpired);
            }
            None => {}
        }

        let row = match self.store.load_user_session(hash).await {
            Ok(row) => row,
            Err(StoreError::NotFound) => return Err(CoreError::SessionNotFound),
            Err(e) => return Err(e.into()),
        };
        let session = row.session();
        if session.is_expired_at(now) {
            self.drop_expired(hash).await;
            return Err(CoreError::SessionExpired);
        }

        if self.sessions.write().await.restore(*hash, session, seen_revision) {
            debug!("Restored session {} for user {} from store", hash.short(), session.user_id);
        }
        Ok(session)
    }

    /// Remove an expired session from memory and, best effort, from the store
    async fn drop_expired(&self, hash: &AccessTokenHash) {
        self.sessions.write().await.remove(hash);
        if let Err(e) = self.store.delete_user_session_by_token(hash).await {
            warn!("Failed to delete expired session {} from store: {}", hash.short(), e);
        }
    }

    // ===== Revocation and sweep =====

    /// Log out: revoke the session of a client token
    ///
    /// A malformed token is a no-op, there is nothing to revoke.
    pub async fn expire_token(&self, token: &str) -> Result<()> {
        let hash = match AccessToken::from_hex(token) {
            Ok(token) => token.hash(),
            Err(_) => {
                debug!("Ignoring logout with malformed token");
                return Ok(());
            }
        };

        let stored = self.store.delete_user_session_by_token(&hash).await;
        let removed = self.sessions.write().await.revoke(&hash);
        match stored {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(session) = removed {
            info!("Expired session {} for user {}", hash.short(), session.user_id);
        }
        Ok(())
    }

    /// Revoke one session of a user ("log out this device")
    ///
    /// Only a session owned by `user_id` is touched, in memory and in the
    /// store. Returns whether a session was removed.
    pub async fn expire_session_for_user(&self, user_id: UserId, hash: &AccessTokenHash) -> Result<bool> {
        let stored = self.store.delete_user_session_by_user_and_token(user_id, hash).await;
        let in_memory = self.sessions.write().await.revoke_owned(user_id, hash);
        let in_store = match stored {
            Ok(deleted) => deleted,
            Err(StoreError::NotFound) => false,
            Err(e) => return Err(e.into()),
        };

        let removed = in_memory || in_store;
        if removed {
            info!("User {} expired session {}", user_id, hash.short());
        } else {
            debug!("User {} has no session {}", user_id, hash.short());
        }
        Ok(removed)
    }

    /// Revoke every session of a user, returning the durable count removed
    pub async fn expire_all_sessions_for_user(&self, user_id: UserId) -> Result<u64> {
        let stored = self.store.delete_user_sessions_by_user(user_id).await;
        let in_memory = self.sessions.write().await.revoke_user(user_id);
        let in_store = stored?;

        info!(
            "Expired all sessions for user {} ({} in memory, {} in store)",
            user_id, in_memory, in_store
        );
        Ok(in_store)
    }

    /// Remove expired sessions from memory, returning the count
    ///
    /// Meant for a periodic timer owned by the caller, next to the store's
    /// `delete_user_sessions_expired_before`.
    pub async fn clear_expired_sessions(&self) -> usize {
        let removed = self.sessions.write().await.remove_expired(Utc::now());
        if removed > 0 {
            debug!("Cleared {} expired sessions", removed);
        }
        removed
    }

    /// Get count of in-memory sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Get count of cached users
    pub async fn cached_user_count(&self) -> usize {
        self.users.read().await.len()
    }
}
