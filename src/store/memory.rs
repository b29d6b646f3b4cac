//! In-process bucket store.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::BucketStore;
use crate::error::Result;
use crate::ratelimit::{BucketPolicy, BucketState, Decision};

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: BucketState,
    expires_at: i64,
}

/// Bucket store held in process memory.
///
/// Serves a single process (or tests). Each key's record is updated while
/// holding that key's map entry, so operations on one key are serialised and
/// operations on other keys only share a shard lock briefly. Expiry is
/// evaluated against the timestamp supplied with each call; expired records
/// are dropped by a sweep that runs at most once per TTL.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, Entry>,
    /// Store time of the last sweep
    last_sweep: AtomicI64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the live record for `key` at `now_micros`, if any.
    pub fn snapshot(&self, key: &str, now_micros: i64) -> Option<BucketState> {
        self.records
            .get(key)
            .filter(|entry| entry.expires_at > now_micros)
            .map(|entry| entry.state)
    }

    /// Drop every record expired at `now_micros`, returning how many were removed.
    pub fn purge_expired(&self, now_micros: i64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, entry| entry.expires_at > now_micros);
        before.saturating_sub(self.records.len())
    }

    /// Sweep if a full TTL has passed since the previous sweep.
    ///
    /// Must not be called while holding an entry guard: `retain` locks every shard.
    fn maybe_sweep(&self, now_micros: i64, ttl_micros: i64) {
        let last = self.last_sweep.load(Ordering::Acquire);
        if now_micros.saturating_sub(last) < ttl_micros {
            return;
        }
        // One caller wins the sweep; the rest carry on.
        if self
            .last_sweep
            .compare_exchange(last, now_micros, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let removed = self.purge_expired(now_micros);
        if removed > 0 {
            debug!(removed = removed, remaining = self.records.len(), "Swept expired buckets");
        }
    }

    /// Number of records held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn atomic_apply(
        &self,
        key: &str,
        policy: &BucketPolicy,
        now_micros: i64,
        ttl: Duration,
    ) -> Result<Decision> {
        let ttl_micros = i64::try_from(ttl.as_micros()).unwrap_or(i64::MAX);
        self.maybe_sweep(now_micros, ttl_micros);

        // The entry guard holds the shard lock until the write below completes.
        let mut entry = self.records.entry(key.to_string()).or_insert(Entry {
            state: BucketState {
                tokens: policy.capacity() as f64,
                last_refilled: now_micros,
            },
            expires_at: i64::MIN,
        });

        let current = (entry.expires_at > now_micros).then_some(entry.state);
        if current.is_none() {
            trace!(key = %key, "Bucket record absent or expired");
        }

        let applied = policy.apply(current, now_micros);
        // Expiry counts from the newest timestamp the record has seen.
        let expires_at = applied
            .state
            .last_refilled
            .max(now_micros)
            .saturating_add(ttl_micros);
        *entry = Entry {
            state: applied.state,
            expires_at,
        };

        Ok(applied.decision)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
