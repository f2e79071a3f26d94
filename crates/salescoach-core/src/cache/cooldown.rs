//! Per-(user, task) cooldown guard for expensive LLM requests.
//!
//! Guards against double-submission and rapid re-triggering: a key is
//! rejected while a request for it is in flight, and for a cooldown window
//! after the previous one released. The permit releases on Drop, so every
//! exit path (success, error, panic unwind) clears the in-flight flag.
//!
//! State is process-local. A single coordinator instance owns a user's
//! live session, so no cross-process lock is needed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use salescoach_types::llm::TaskKind;

type Key = (Uuid, TaskKind);

#[derive(Debug, Clone, Copy)]
struct Entry {
    last_release: Option<Instant>,
    in_flight: bool,
    touched: Instant,
}

/// Outcome of trying to acquire the guard for a key.
pub enum AcquireOutcome {
    /// Proceed; drop the permit when the request finishes.
    Acquired(CooldownPermit),
    /// A request is in flight or the cooldown window has not elapsed.
    CoolingDown,
}

/// Concurrent cooldown state shared across handlers.
#[derive(Clone)]
pub struct CooldownGuard {
    entries: Arc<DashMap<Key, Entry>>,
    cooldown: Duration,
    /// Entries untouched this long are purged on the next acquire.
    ttl: Duration,
}

impl CooldownGuard {
    pub fn new(cooldown: Duration, ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            cooldown,
            ttl,
        }
    }

    /// Try to acquire the guard for a (user, task) pair.
    pub fn acquire(&self, user_id: Uuid, task: TaskKind) -> AcquireOutcome {
        self.purge_stale();

        let key = (user_id, task);
        let now = Instant::now();
        let mut entry = self.entries.entry(key).or_insert(Entry {
            last_release: None,
            in_flight: false,
            touched: now,
        });

        if entry.in_flight {
            return AcquireOutcome::CoolingDown;
        }
        if let Some(last) = entry.last_release {
            if now.duration_since(last) < self.cooldown {
                return AcquireOutcome::CoolingDown;
            }
        }

        entry.in_flight = true;
        entry.touched = now;
        drop(entry);

        AcquireOutcome::Acquired(CooldownPermit {
            entries: self.entries.clone(),
            key,
        })
    }

    fn purge_stale(&self) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| entry.in_flight || entry.touched.elapsed() < ttl);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Held while a guarded request is in flight. Releasing stamps the cooldown
/// window start, so the next acquire for the same key waits out the window.
pub struct CooldownPermit {
    entries: Arc<DashMap<Key, Entry>>,
    key: Key,
}

impl Drop for CooldownPermit {
    fn drop(&mut self) {
        if let Some(mut entry) = self.entries.get_mut(&self.key) {
            let now = Instant::now();
            entry.in_flight = false;
            entry.last_release = Some(now);
            entry.touched = now;
        }
    }
}
