//! Periodic expiry sweep
//!
//! The registry never schedules itself. This task is the external timer: it
//! clears expired sessions from the registry's memory and deletes expired rows
//! from the store on every tick.

use chrono::Utc;
use nomlog_core::{PersistentStore, Registry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Counts from one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions removed from registry memory
    pub memory: usize,
    /// Session rows removed from the store
    pub durable: u64,
}

/// Run one sweep pass
///
/// A store failure is logged and reported as zero rows; the next tick retries.
pub async fn sweep_once(registry: &Registry, store: &dyn PersistentStore) -> SweepReport {
    let memory = registry.clear_expired_sessions().await;
    let durable = match store.delete_user_sessions_expired_before(Utc::now()).await {
        Ok(count) => count,
        Err(e) => {
            warn!("Store session sweep failed: {}", e);
            0
        }
    };

    if memory > 0 || durable > 0 {
        info!("Swept {} expired sessions from memory, {} from store", memory, durable);
    }
    SweepReport { memory, durable }
}

/// Spawn the periodic sweep task
pub fn spawn_sweeper(
    registry: Registry,
    store: Arc<dyn PersistentStore>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            sweep_once(&registry, store.as_ref()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use nomlog_core::{AccessToken, MemoryStore, Session, StoredSession, User};

    async fn setup() -> (Registry, MemoryStore) {
        let store = MemoryStore::new();
        store.insert_user(User::new(1, "alice", "unused", 120)).await;
        let registry = Registry::new(Arc::new(store.clone()));
        (registry, store)
    }

    async fn add_expired_row(store: &MemoryStore) -> StoredSession {
        let hash = AccessToken::generate().unwrap().hash();
        let session = Session::new(1, Utc::now() - ChronoDuration::minutes(1));
        let row = StoredSession::new(hash, session, Utc::now(), None);
        store.add_user_session(&row).await.unwrap();
        row
    }

    #[tokio::test]
    async fn test_sweep_once_removes_only_expired_rows() {
        let (registry, store) = setup().await;
        let live = registry.issue_token(1, None).await.unwrap();
        let expired = add_expired_row(&store).await;

        let report = sweep_once(&registry, &store).await;
        assert_eq!(report, SweepReport { memory: 0, durable: 1 });
        assert!(!store.has_session(&expired.token_hash).await);
        assert!(store.has_session(&live.token.hash()).await);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_survives_store_outage() {
        let (registry, store) = setup().await;
        store.set_unavailable(true);
        assert_eq!(sweep_once(&registry, &store).await, SweepReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweeper_ticks() {
        let (registry, store) = setup().await;
        let first = add_expired_row(&store).await;

        let handle = spawn_sweeper(registry, Arc::new(store.clone()), Duration::from_secs(30));
        // first tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!store.has_session(&first.token_hash).await);

        let second = add_expired_row(&store).await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!store.has_session(&second.token_hash).await);

        handle.abort();
    }
}
