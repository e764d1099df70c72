//! Delayed nickname rechecks
//!
//! Users who join with an innocent name get one more look after a delay, in
//! case they rename themselves. The store keeps at most one pending recheck
//! per `(guild, user)`; registering again aborts the previous timer.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::ENFORCEMENT_TARGET;

/// A scheduled recheck
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecheck {
    pub user_id: u64,
    pub guild_id: u64,
    /// Display name at join time
    pub original_nickname: String,
    pub registered_at: DateTime<Utc>,
}

impl PendingRecheck {
    #[must_use]
    pub fn new(guild_id: u64, user_id: u64, original_nickname: impl Into<String>) -> Self {
        Self {
            user_id,
            guild_id,
            original_nickname: original_nickname.into(),
            registered_at: Utc::now(),
        }
    }

    const fn key(&self) -> (u64, u64) {
        (self.guild_id, self.user_id)
    }
}

struct Entry {
    recheck: PendingRecheck,
    generation: u64,
    handle: JoinHandle<()>,
}

/// Keyed registry of armed recheck timers
#[derive(Clone, Default)]
pub struct PendingRecheckStore {
    entries: Arc<DashMap<(u64, u64), Entry>>,
    generation: Arc<AtomicU64>,
}

impl PendingRecheckStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot timer that runs `job` after `delay`.
    ///
    /// A live entry for the same user in the same guild is aborted and
    /// replaced.
    pub fn register<F, Fut>(&self, recheck: PendingRecheck, delay: Duration, job: F)
    where
        F: FnOnce(PendingRecheck) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = recheck.key();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (armed_tx, armed_rx) = oneshot::channel::<()>();

        let store = self.clone();
        let handle = tokio::spawn(async move {
            // Wait until the entry is in the map so the fire path can find it
            if armed_rx.await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
            if let Some(recheck) = store.take_if_current(key, generation) {
                debug!(
                    target: ENFORCEMENT_TARGET,
                    guild_id = key.0,
                    user_id = key.1,
                    "Recheck timer fired"
                );
                job(recheck).await;
            }
        });

        let previous = self.entries.insert(
            key,
            Entry {
                recheck,
                generation,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
            debug!(
                target: ENFORCEMENT_TARGET,
                guild_id = key.0,
                user_id = key.1,
                "Superseded pending recheck"
            );
        }
        let _ = armed_tx.send(());
    }

    fn take_if_current(&self, key: (u64, u64), generation: u64) -> Option<PendingRecheck> {
        self.entries
            .remove_if(&key, |_, entry| entry.generation == generation)
            .map(|(_, entry)| entry.recheck)
    }

    /// Drop a pending recheck without running it
    pub fn cancel(&self, guild_id: u64, user_id: u64) -> Option<PendingRecheck> {
        self.entries.remove(&(guild_id, user_id)).map(|(_, entry)| {
            entry.handle.abort();
            entry.recheck
        })
    }

    #[must_use]
    pub fn get(&self, guild_id: u64, user_id: u64) -> Option<PendingRecheck> {
        self.entries
            .get(&(guild_id, user_id))
            .map(|entry| entry.recheck.clone())
    }

    #[must_use]
    pub fn is_pending(&self, guild_id: u64, user_id: u64) -> bool {
        self.entries.contains_key(&(guild_id, user_id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Abort every timer and empty the store
    pub fn clear(&self) {
        let keys: Vec<(u64, u64)> = self.entries.iter().map(|entry| *entry.key()).collect();
        let mut cleared = 0usize;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                entry.handle.abort();
                cleared += 1;
            }
        }
        info!(target: ENFORCEMENT_TARGET, cleared, "Pending rechecks cleared");
    }
}
