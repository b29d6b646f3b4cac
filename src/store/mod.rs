//! Shared bucket state.
//!
//! A [`BucketStore`] owns the authoritative record for every bucket and runs
//! the whole refill-and-debit step as one indivisible operation per key. The
//! limiter keeps no copy of any record between calls.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::ratelimit::{BucketPolicy, Decision};

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Storage backend for bucket records.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Apply `policy` to the record under `key` at `now_micros`, persist the
    /// result and refresh the key's expiry to `ttl`.
    ///
    /// No other call on the same key may observe or produce an intermediate
    /// state. If the store cannot be reached the call fails and nothing is
    /// written.
    async fn atomic_apply(
        &self,
        key: &str,
        policy: &BucketPolicy,
        now_micros: i64,
        ttl: Duration,
    ) -> Result<Decision>;

    /// Liveness check run before serving traffic.
    async fn ping(&self) -> Result<()>;
}
