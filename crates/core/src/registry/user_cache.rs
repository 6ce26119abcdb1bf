//! User cache with by-name and by-id indices
//!
//! `by_id` owns the user records; `by_name` only maps a name to an id. A
//! rename therefore rewrites one name entry and never moves the record, and
//! both indices are always updated under the same `&mut self`.
//!
//! `revision` counts explicit writes. A lookup that misses reads the store
//! without holding the lock, so a put or rename can land in between; the
//! store record is only filled in if nothing was written since the lookup
//! started.
//!
//! The cache is bounded. Inserting a new id into a full cache evicts the
//! oldest inserted entry; evicted users are simply reloaded from the store on
//! their next lookup.

use crate::types::{User, UserId};
use std::collections::{HashMap, VecDeque};

pub(crate) struct UserCache {
    by_id: HashMap<UserId, User>,
    by_name: HashMap<String, UserId>,
    /// Insertion order, oldest first
    order: VecDeque<UserId>,
    capacity: usize,
    revision: u64,
}

impl UserCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            revision: 0,
        }
    }

    pub fn get_by_name(&self, name: &str) -> Option<&User> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    pub fn get_by_id(&self, id: UserId) -> Option<&User> {
        self.by_id.get(&id)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Insert or overwrite a user
    ///
    /// An existing record with the same id is overwritten in place. A
    /// different id holding the same name is dropped, since names are unique.
    /// Returns the id evicted to make room, if any.
    pub fn put(&mut self, user: User) -> Option<UserId> {
        self.revision += 1;
        self.write(user)
    }

    /// Insert a user read from the store
    ///
    /// Skipped if the cache was written after `seen_revision` was taken, or if
    /// the id or the name is already cached; the cached record is newer.
    pub fn fill(&mut self, user: User, seen_revision: u64) -> bool {
        if self.revision != seen_revision
            || self.by_id.contains_key(&user.id)
            || self.by_name.contains_key(&user.name)
        {
            return false;
        }
        self.write(user);
        true
    }

    fn write(&mut self, user: User) -> Option<UserId> {
        if let Some(&holder) = self.by_name.get(&user.name) {
            if holder != user.id {
                self.remove(holder);
            }
        }

        if let Some(slot) = self.by_id.get_mut(&user.id) {
            if slot.name != user.name {
                self.by_name.remove(&slot.name);
            }
            self.by_name.insert(user.name.clone(), user.id);
            *slot = user;
            return None;
        }

        let evicted = if self.by_id.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };
        self.order.push_back(user.id);
        self.by_name.insert(user.name.clone(), user.id);
        self.by_id.insert(user.id, user);
        evicted
    }

    /// Move a user from `old_name` to `user.name`, keeping its id slot
    pub fn rename(&mut self, old_name: &str, user: User) -> Option<UserId> {
        self.revision += 1;
        if self.by_name.get(old_name) == Some(&user.id) {
            self.by_name.remove(old_name);
        }
        self.write(user)
    }

    pub fn remove(&mut self, id: UserId) -> Option<User> {
        let user = self.by_id.remove(&id)?;
        if self.by_name.get(&user.name) == Some(&id) {
            self.by_name.remove(&user.name);
        }
        self.order.retain(|queued| *queued != id);
        Some(user)
    }

    fn evict_oldest(&mut self) -> Option<UserId> {
        while let Some(id) = self.order.pop_front() {
            if let Some(user) = self.by_id.remove(&id) {
                self.by_name.remove(&user.name);
                return Some(id);
            }
        }
        None
    }

    #[cfg(test)]
    fn indices_agree(&self) -> bool {
        self.by_id.len() == self.by_name.len()
            && self
                .by_name
                .iter()
                .all(|(name, id)| self.by_id.get(id).is_some_and(|u| &u.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: UserId, name: &str) -> User {
        User::new(id, name, "hash", 60)
    }

    #[test]
    fn test_put_and_get() {
        let mut cache = UserCache::new(10);
        cache.put(user(1, "alice"));
        assert_eq!(cache.get_by_name("alice").unwrap().id, 1);
        assert_eq!(cache.get_by_id(1).unwrap().name, "alice");
        assert!(cache.contains_name("alice"));
        assert!(!cache.contains_name("bob"));
        assert!(cache.indices_agree());
    }

    #[test]
    fn test_put_overwrites_in_place() {
        let mut cache = UserCache::new(10);
        cache.put(user(1, "alice"));
        let mut updated = user(1, "alice");
        updated.session_lifetime_secs = 900;
        cache.put(updated);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_by_id(1).unwrap().session_lifetime_secs, 900);
        assert!(cache.indices_agree());
    }

    #[test]
    fn test_put_same_id_new_name_drops_old_name() {
        let mut cache = UserCache::new(10);
        cache.put(user(1, "alice"));
        cache.put(user(1, "alicia"));
        assert!(!cache.contains_name("alice"));
        assert_eq!(cache.get_by_name("alicia").unwrap().id, 1);
        assert!(cache.indices_agree());
    }

    #[test]
    fn test_put_name_taken_by_other_id() {
        let mut cache = UserCache::new(10);
        cache.put(user(1, "alice"));
        cache.put(user(2, "alice"));
        assert!(cache.get_by_id(1).is_none());
        assert_eq!(cache.get_by_name("alice").unwrap().id, 2);
        assert!(cache.indices_agree());
    }

    #[test]
    fn test_rename() {
        let mut cache = UserCache::new(10);
        cache.put(user(1, "alice"));
        cache.rename("alice", user(1, "alicia"));

        assert!(!cache.contains_name("alice"));
        assert_eq!(cache.get_by_name("alicia").unwrap().id, 1);
        assert_eq!(cache.get_by_id(1).unwrap().name, "alicia");
        assert!(cache.indices_agree());
    }

    #[test]
    fn test_rename_uncached_user_inserts() {
        let mut cache = UserCache::new(10);
        cache.rename("ghost", user(4, "casper"));
        assert_eq!(cache.get_by_name("casper").unwrap().id, 4);
        assert!(cache.indices_agree());
    }

    #[test]
    fn test_rename_leaves_other_users_name() {
        let mut cache = UserCache::new(10);
        cache.put(user(1, "alice"));
        cache.put(user(2, "bob"));
        // "alice" belongs to id 1, not to the user being renamed
        cache.rename("alice", user(2, "robert"));
        assert_eq!(cache.get_by_name("alice").unwrap().id, 1);
        assert_eq!(cache.get_by_name("robert").unwrap().id, 2);
        assert!(!cache.contains_name("bob"));
        assert!(cache.indices_agree());
    }

    #[test]
    fn test_fill_after_rename_keeps_new_name() {
        let mut cache = UserCache::new(10);
        cache.put(user(1, "alice"));
        cache.remove(1);

        // a lookup misses, then a rename lands before its store read returns
        let seen = cache.revision();
        cache.rename("alice", user(1, "alicia"));
        assert!(!cache.fill(user(1, "alice"), seen));

        assert!(!cache.contains_name("alice"));
        assert_eq!(cache.get_by_id(1).unwrap().name, "alicia");
        assert!(cache.indices_agree());
    }

    #[test]
    fn test_fill_never_overwrites_cached_record() {
        let mut cache = UserCache::new(10);
        let mut newer = user(1, "alice");
        newer.session_lifetime_secs = 900;
        cache.put(newer);

        let seen = cache.revision();
        assert!(!cache.fill(user(1, "alice"), seen));
        assert!(!cache.fill(user(2, "alice"), seen));
        assert_eq!(cache.get_by_id(1).unwrap().session_lifetime_secs, 900);

        assert!(cache.fill(user(3, "carol"), seen));
        assert_eq!(cache.get_by_name("carol").unwrap().id, 3);
        assert!(cache.indices_agree());
    }

    #[test]
    fn test_eviction_is_fifo() {
        let mut cache = UserCache::new(2);
        assert_eq!(cache.put(user(1, "a")), None);
        assert_eq!(cache.put(user(2, "b")), None);
        // re-put does not reorder
        cache.put(user(1, "a"));
        assert_eq!(cache.put(user(3, "c")), Some(1));

        assert_eq!(cache.len(), 2);
        assert!(cache.get_by_id(1).is_none());
        assert!(!cache.contains_name("a"));
        assert!(cache.indices_agree());
    }

    #[test]
    fn test_remove() {
        let mut cache = UserCache::new(2);
        cache.put(user(1, "a"));
        cache.put(user(2, "b"));
        assert_eq!(cache.remove(1).unwrap().name, "a");
        assert!(cache.remove(1).is_none());
        // freed slot, no eviction needed
        assert_eq!(cache.put(user(3, "c")), None);
        assert!(cache.indices_agree());
    }
}
