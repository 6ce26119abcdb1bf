//! JSON file store
//!
//! # JsonFileStore
//!
//! Keeps users and sessions in one JSON document on disk. The file is the
//! only copy: every call re-reads it, so several processes (a long-running
//! `serve` and one-shot operator commands) can share one store.
//!
//! ## Concurrency
//!
//! - Reads hold a shared `flock` on a sibling `.lock` file
//! - Mutations hold an exclusive lock across read, modify and write
//! - Writes go to a temporary file that is renamed over the old one, so a
//!   crash never leaves a half-written store behind
//! - A mutation that changes nothing does not touch the file
//!
//! Meant for single-host deployments and operator tooling; a SQL backend
//! implements the same trait.

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use nomlog_core::store::{PersistentStore, StoreError, StoreResult};
use nomlog_core::{AccessTokenHash, StoredSession, User, UserId};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// On-disk document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    next_user_id: UserId,
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    sessions: Vec<StoredSession>,
}

/// Advisory lock on the store's `.lock` file, released on drop
struct FileLock {
    file: File,
}

impl FileLock {
    async fn shared(path: PathBuf) -> anyhow::Result<Self> {
        Self::acquire(path, false).await
    }

    async fn exclusive(path: PathBuf) -> anyhow::Result<Self> {
        Self::acquire(path, true).await
    }

    async fn acquire(path: PathBuf, exclusive: bool) -> anyhow::Result<Self> {
        tokio::task::spawn_blocking(move || {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .with_context(|| format!("Failed to open lock file {}", path.display()))?;
            let locked = if exclusive {
                FileExt::lock_exclusive(&file)
            } else {
                FileExt::lock_shared(&file)
            };
            locked.with_context(|| format!("Failed to lock {}", path.display()))?;
            Ok(Self { file })
        })
        .await
        .context("Lock task failed")?
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // closing the descriptor releases the lock anyway
        let _ = FileExt::unlock(&self.file);
    }
}

/// File-backed [`PersistentStore`]
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes this process's writers before they queue on the file lock
    writer: Mutex<()>,
}

impl JsonFileStore {
    /// Open store file, starting empty if it does not exist yet
    ///
    /// # Errors
    /// Fails if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let store = Self {
            path: path.into(),
            writer: Mutex::new(()),
        };

        let _lock = FileLock::shared(store.lock_path()).await?;
        if !store.path.exists() {
            tracing::info!("Store file {} not found, starting empty", store.path.display());
        }
        read_document(&store.path).await?;
        Ok(store)
    }

    /// Get store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a user with the next free id
    pub async fn create_user(
        &self,
        name: &str,
        password_hash: String,
        session_lifetime_secs: i64,
    ) -> anyhow::Result<User> {
        if name.is_empty() {
            bail!("User name cannot be empty");
        }

        self.modify(|doc| {
            if doc.users.iter().any(|u| u.name == name) {
                bail!("User {:?} already exists", name);
            }

            let id = doc
                .users
                .iter()
                .map(|u| u.id + 1)
                .max()
                .unwrap_or(1)
                .max(doc.next_user_id)
                .max(1);
            doc.next_user_id = id + 1;

            let user = User::new(id, name, password_hash, session_lifetime_secs);
            doc.users.push(user.clone());
            Ok(user)
        })
        .await?
    }

    fn lock_path(&self) -> PathBuf {
        sibling(&self.path, ".lock")
    }

    /// Read the current document under a shared lock
    async fn snapshot(&self) -> StoreResult<StoreDocument> {
        let _lock = FileLock::shared(self.lock_path()).await?;
        Ok(read_document(&self.path).await?)
    }

    /// Re-read, mutate and write back under the exclusive lock
    async fn modify<T>(&self, mutate: impl FnOnce(&mut StoreDocument) -> T) -> anyhow::Result<T> {
        let _writer = self.writer.lock().await;
        let _lock = FileLock::exclusive(self.lock_path()).await?;

        let current = read_document(&self.path).await?;
        let mut next = current.clone();
        let out = mutate(&mut next);
        if next != current {
            self.persist(&next).await?;
        }
        Ok(out)
    }

    async fn update<T>(&self, mutate: impl FnOnce(&mut StoreDocument) -> T) -> StoreResult<T> {
        self.modify(mutate).await.map_err(StoreError::Backend)
    }

    async fn persist(&self, doc: &StoreDocument) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(doc).context("Failed to serialize store")?;
        let tmp = sibling(&self.path, ".tmp");

        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// `path` with `suffix` appended to its file name
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

async fn read_document(path: &Path) -> anyhow::Result<StoreDocument> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse store file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDocument::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read store file {}", path.display())),
    }
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn load_user(&self, name: &str) -> StoreResult<User> {
        self.snapshot()
            .await?
            .users
            .into_iter()
            .find(|u| u.name == name)
            .ok_or(StoreError::NotFound)
    }

    async fn load_user_by_id(&self, id: UserId) -> StoreResult<User> {
        self.snapshot()
            .await?
            .users
            .into_iter()
            .find(|u| u.id == id)
            .ok_or(StoreError::NotFound)
    }

    async fn load_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.snapshot().await?.users)
    }

    async fn add_user_session(&self, session: &StoredSession) -> StoreResult<()> {
        let session = session.clone();
        self.update(move |doc| {
            doc.sessions.retain(|s| s.token_hash != session.token_hash);
            doc.sessions.push(session);
        })
        .await
    }

    async fn load_user_session(&self, hash: &AccessTokenHash) -> StoreResult<StoredSession> {
        self.snapshot()
            .await?
            .sessions
            .into_iter()
            .find(|s| &s.token_hash == hash)
            .ok_or(StoreError::NotFound)
    }

    async fn delete_user_session_by_token(&self, hash: &AccessTokenHash) -> StoreResult<()> {
        self.update(|doc| doc.sessions.retain(|s| &s.token_hash != hash)).await
    }

    async fn delete_user_session_by_user_and_token(&self, user_id: UserId, hash: &AccessTokenHash) -> StoreResult<bool> {
        self.update(|doc| {
            let before = doc.sessions.len();
            doc.sessions
                .retain(|s| !(s.user_id == user_id && &s.token_hash == hash));
            doc.sessions.len() != before
        })
        .await
    }

    async fn delete_user_sessions_by_user(&self, user_id: UserId) -> StoreResult<u64> {
        self.update(|doc| {
            let before = doc.sessions.len();
            doc.sessions.retain(|s| s.user_id != user_id);
            (before - doc.sessions.len()) as u64
        })
        .await
    }

    async fn delete_user_sessions_expired_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.update(|doc| {
            let before = doc.sessions.len();
            doc.sessions.retain(|s| s.expires > cutoff);
            (before - doc.sessions.len()) as u64
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use nomlog_core::{AccessToken, Session};
    use tempfile::TempDir;

    fn session_row(user_id: UserId, expires: DateTime<Utc>) -> StoredSession {
        let hash = AccessToken::generate().unwrap().hash();
        StoredSession::new(hash, Session::new(user_id, expires), Utc::now(), Some("test".into()))
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("auth.json")).await.unwrap();
        assert!(store.load_users().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_create_user_assigns_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("auth.json")).await.unwrap();

        let alice = store.create_user("alice", "h1".into(), 120).await.unwrap();
        let bob = store.create_user("bob", "h2".into(), 60).await.unwrap();
        assert_eq!(alice.id, 1);
        assert_eq!(bob.id, 2);
        assert_eq!(store.load_user("bob").await.unwrap().id, 2);
        assert_eq!(store.load_user_by_id(1).await.unwrap().name, "alice");
    }

    #[tokio::test]
    async fn test_duplicate_and_empty_names_rejected() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("auth.json")).await.unwrap();
        store.create_user("alice", "h".into(), 60).await.unwrap();

        assert!(store.create_user("alice", "h".into(), 60).await.is_err());
        assert!(store.create_user("", "h".into(), 60).await.is_err());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        let row = session_row(1, Utc::now() + Duration::hours(1));
        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store.create_user("alice", "h".into(), 120).await.unwrap();
            store.add_user_session(&row).await.unwrap();
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.load_user("alice").await.unwrap().session_lifetime_secs, 120);
        assert_eq!(reopened.load_user_session(&row.token_hash).await.unwrap(), row);

        // ids keep counting after reopen
        assert_eq!(reopened.create_user("bob", "h".into(), 60).await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_session_deletes() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("auth.json")).await.unwrap();
        let now = Utc::now();
        let a = session_row(1, now + Duration::hours(1));
        let b = session_row(1, now - Duration::hours(1));
        let c = session_row(2, now + Duration::hours(1));
        for row in [&a, &b, &c] {
            store.add_user_session(row).await.unwrap();
        }

        assert!(!store.delete_user_session_by_user_and_token(2, &a.token_hash).await.unwrap());
        assert_eq!(store.delete_user_sessions_expired_before(now).await.unwrap(), 1);
        assert_eq!(store.delete_user_sessions_by_user(1).await.unwrap(), 1);
        store.delete_user_session_by_token(&c.token_hash).await.unwrap();

        for row in [&a, &b, &c] {
            assert!(matches!(
                store.load_user_session(&row.token_hash).await,
                Err(StoreError::NotFound)
            ));
        }
    }

    #[tokio::test]
    async fn test_sweep_keeps_rows_written_by_another_process() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        let serve = JsonFileStore::open(&path).await.unwrap();
        let cli = JsonFileStore::open(&path).await.unwrap();

        let alice = cli.create_user("alice", "h".into(), 120).await.unwrap();
        let row = session_row(alice.id, Utc::now() + Duration::hours(1));
        cli.add_user_session(&row).await.unwrap();

        // the long-running process sees the new rows and its sweep keeps them
        assert_eq!(serve.load_user("alice").await.unwrap().id, alice.id);
        assert_eq!(serve.delete_user_sessions_expired_before(Utc::now()).await.unwrap(), 0);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.load_users().await.unwrap().len(), 1);
        assert_eq!(reopened.load_user_session(&row.token_hash).await.unwrap(), row);
    }

    #[tokio::test]
    async fn test_interleaved_writers_keep_each_others_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        let a = JsonFileStore::open(&path).await.unwrap();
        let b = JsonFileStore::open(&path).await.unwrap();

        let (alice, bob) = tokio::join!(
            a.create_user("alice", "h".into(), 60),
            b.create_user("bob", "h".into(), 60)
        );
        let (alice, bob) = (alice.unwrap(), bob.unwrap());
        assert_ne!(alice.id, bob.id);

        // a name taken through one handle is taken for the other
        assert!(b.create_user("alice", "h".into(), 60).await.is_err());

        let expired = session_row(alice.id, Utc::now() - Duration::hours(1));
        let live = session_row(bob.id, Utc::now() + Duration::hours(1));
        a.add_user_session(&expired).await.unwrap();
        b.add_user_session(&live).await.unwrap();
        assert_eq!(a.delete_user_sessions_expired_before(Utc::now()).await.unwrap(), 1);
        assert_eq!(b.load_user_session(&live.token_hash).await.unwrap(), live);
        assert_eq!(a.load_users().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_noop_mutation_leaves_file_alone() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("auth.json")).await.unwrap();

        assert_eq!(store.delete_user_sessions_expired_before(Utc::now()).await.unwrap(), 0);
        assert_eq!(store.delete_user_sessions_by_user(7).await.unwrap(), 0);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_expired_sweep_boundary() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("auth.json")).await.unwrap();
        let cutoff = Utc::now();
        let at_cutoff = session_row(1, cutoff);
        let after = session_row(1, cutoff + Duration::milliseconds(1));
        store.add_user_session(&at_cutoff).await.unwrap();
        store.add_user_session(&after).await.unwrap();

        assert_eq!(store.delete_user_sessions_expired_before(cutoff).await.unwrap(), 1);
        assert!(store.load_user_session(&at_cutoff.token_hash).await.is_err());
        assert!(store.load_user_session(&after.token_hash).await.is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_to_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();
        assert!(JsonFileStore::open(&path).await.is_err());
    }
}
