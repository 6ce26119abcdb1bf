//! Session map keyed by token hash
//!
//! `revision` counts revocations. A check that misses memory reads the store
//! without holding the lock, so a logout can land in between; the restore
//! only goes through if no revocation happened since the check started.

use crate::token::AccessTokenHash;
use crate::types::{Session, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Default)]
pub(crate) struct SessionMap {
    entries: HashMap<AccessTokenHash, Session>,
    revision: u64,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: &AccessTokenHash) -> Option<Session> {
        self.entries.get(hash).copied()
    }

    pub fn insert(&mut self, hash: AccessTokenHash, session: Session) {
        self.entries.insert(hash, session);
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Insert a session read from the store, unless a revocation happened
    /// after `seen_revision` was taken
    pub fn restore(&mut self, hash: AccessTokenHash, session: Session, seen_revision: u64) -> bool {
        if self.revision != seen_revision {
            return false;
        }
        self.entries.insert(hash, session);
        true
    }

    /// Drop an entry without counting a revocation (expiry)
    pub fn remove(&mut self, hash: &AccessTokenHash) -> Option<Session> {
        self.entries.remove(hash)
    }

    pub fn revoke(&mut self, hash: &AccessTokenHash) -> Option<Session> {
        self.revision += 1;
        self.entries.remove(hash)
    }

    /// Revoke only if `user_id` owns the session
    pub fn revoke_owned(&mut self, user_id: UserId, hash: &AccessTokenHash) -> bool {
        self.revision += 1;
        match self.entries.get(hash) {
            Some(session) if session.user_id == user_id => {
                self.entries.remove(hash);
                true
            }
            _ => false,
        }
    }

    pub fn revoke_user(&mut self, user_id: UserId) -> usize {
        self.revision += 1;
        let before = self.entries.len();
        self.entries.retain(|_, session| session.user_id != user_id);
        before - self.entries.len()
    }

    pub fn remove_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, session| !session.is_expired_at(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::AccessToken;
    use chrono::Duration;

    fn hash() -> AccessTokenHash {
        AccessToken::generate().unwrap().hash()
    }

    #[test]
    fn test_restore_blocked_by_revocation() {
        let mut map = SessionMap::new();
        let h = hash();
        let session = Session::new(1, Utc::now() + Duration::minutes(5));

        let seen = map.revision();
        map.revoke(&h);
        assert!(!map.restore(h, session, seen));
        assert!(map.get(&h).is_none());

        let seen = map.revision();
        assert!(map.restore(h, session, seen));
        assert_eq!(map.get(&h), Some(session));
    }

    #[test]
    fn test_revoke_owned() {
        let mut map = SessionMap::new();
        let h = hash();
        map.insert(h, Session::new(1, Utc::now() + Duration::minutes(5)));

        assert!(!map.revoke_owned(2, &h));
        assert!(map.get(&h).is_some());
        assert!(map.revoke_owned(1, &h));
        assert!(map.get(&h).is_none());
    }

    #[test]
    fn test_revoke_user() {
        let mut map = SessionMap::new();
        let expires = Utc::now() + Duration::minutes(5);
        map.insert(hash(), Session::new(1, expires));
        map.insert(hash(), Session::new(1, expires));
        map.insert(hash(), Session::new(2, expires));

        assert_eq!(map.revoke_user(1), 2);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_remove_expired_keeps_live() {
        let mut map = SessionMap::new();
        let now = Utc::now();
        let (old, live) = (hash(), hash());
        map.insert(old, Session::new(1, now - Duration::seconds(1)));
        map.insert(live, Session::new(1, now + Duration::seconds(60)));

        let revision = map.revision();
        assert_eq!(map.remove_expired(now), 1);
        assert!(map.get(&old).is_none());
        assert!(map.get(&live).is_some());
        assert_eq!(map.revision(), revision);
    }
}
