//! In-process fixed-window store.

use super::{Decision, RateLimitStore, StoreError};
use crate::middleware::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Interval of the background sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    reset_at: Instant,
}

type Entries = RwLock<HashMap<String, Entry>>;

/// Fixed-window counters in a map guarded by a readers-writers lock.
///
/// Every mutation happens under the write lock, so concurrent callers for the
/// same identity observe strictly increasing counts. A background task
/// removes expired entries every [`SWEEP_INTERVAL`] while the store is alive.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<Entries>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store and, inside a tokio runtime, starts its sweeper.
    #[must_use]
    pub fn new() -> Self {
        let store = Self::without_sweeper();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(sweep_loop(Arc::downgrade(&store.entries)));
        }
        store
    }

    /// Creates a store with no background task.
    #[must_use]
    pub fn without_sweeper() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Counts a request for `identity` at `now`.
    pub fn allow_at(&self, identity: &str, limit: u64, window: Duration, now: Instant) -> Decision {
        let mut entries = self.entries.write();
        let entry = entries
            .entry(identity.to_string())
            .and_modify(|e| {
                if now >= e.reset_at {
                    *e = Entry {
                        count: 0,
                        reset_at: now + window,
                    };
                }
            })
            .or_insert(Entry {
                count: 0,
                reset_at: now + window,
            });
        entry.count += 1;
        let Entry { count, reset_at } = *entry;
        drop(entries);

        Decision {
            allowed: count <= limit,
            count,
            limit,
            reset_at: SystemTime::now() + reset_at.saturating_duration_since(now),
        }
    }

    /// Removes entries whose window has ended. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        sweep_entries(&self.entries, Instant::now())
    }

    /// Returns the number of tracked identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if no identity is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn sweep_entries(entries: &Entries, now: Instant) -> usize {
    let mut entries = entries.write();
    let before = entries.len();
    entries.retain(|_, e| e.reset_at > now);
    before - entries.len()
}

async fn sweep_loop(entries: Weak<Entries>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(entries) = entries.upgrade() else {
            break;
        };
        let removed = sweep_entries(&entries, Instant::now());
        if removed > 0 {
            tracing::debug!(removed, "Swept expired rate-limit entries");
        }
    }
}

impl RateLimitStore for MemoryStore {
    fn allow<'a>(
        &'a self,
        identity: &'a str,
        limit: u64,
        window: Duration,
    ) -> BoxFuture<'a, Result<Decision, StoreError>> {
        Box::pin(async move { Ok(self.allow_at(identity, limit, window, Instant::now())) })
    }

    fn reset<'a>(&'a self, identity: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.entries.write().remove(identity);
            Ok(())
        })
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
