//! Registry configuration

/// Shortest session the registry will issue, whatever the user asked for
pub const DEFAULT_MIN_SESSION_LIFETIME_SECS: i64 = 60;

/// Cached users kept before the oldest entries are evicted
pub const DEFAULT_MAX_CACHED_USERS: usize = 10_000;

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Floor applied to every user's requested session lifetime (at least 1)
    pub min_session_lifetime_secs: i64,

    /// Upper bound on cached users (at least 1)
    pub max_cached_users: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            min_session_lifetime_secs: DEFAULT_MIN_SESSION_LIFETIME_SECS,
            max_cached_users: DEFAULT_MAX_CACHED_USERS,
        }
    }
}

impl RegistryConfig {
    /// Set session lifetime floor
    ///
    /// Clamped to one second so no session is issued already expired.
    pub fn with_min_session_lifetime_secs(mut self, secs: i64) -> Self {
        self.min_session_lifetime_secs = secs.max(1);
        self
    }

    /// Set user cache bound
    pub fn with_max_cached_users(mut self, max: usize) -> Self {
        self.max_cached_users = max.max(1);
        self
    }

    /// Apply the builder bounds to a literal-constructed config
    pub(crate) fn normalized(self) -> Self {
        let floor = self.min_session_lifetime_secs;
        let max = self.max_cached_users;
        self.with_min_session_lifetime_secs(floor).with_max_cached_users(max)
    }
}
