//! Decision trait consumed by request listeners.

use async_trait::async_trait;

use super::bucket::Decision;
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// This trait lets the HTTP layer work with any limiter regardless of the
/// store behind it, and lets tests substitute their own.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Consume one token for `identity`, reporting whether it was admitted.
    async fn check(&self, identity: &str) -> Result<Decision>;

    /// Maximum burst size, reported to clients.
    fn capacity(&self) -> u64;
}
