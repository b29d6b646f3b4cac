//! Token bucket rate limiter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::bucket::{BucketPolicy, Decision};
use super::clock::{Clock, SystemClock};
use super::key::{BucketKey, DEFAULT_KEY_PREFIX};
use crate::error::Result;
use crate::store::BucketStore;

/// Admits or denies requests per identity against a shared store.
///
/// The limiter holds no bucket state of its own: every call re-reads and
/// re-writes the authoritative record in one store operation, so any number
/// of tasks, processes or hosts may share the same store without locking.
pub struct TokenBucketLimiter<S: BucketStore> {
    /// The store holding bucket records
    store: Arc<S>,
    /// Capacity and refill rate
    policy: BucketPolicy,
    /// Source of `now` for refill math
    clock: Arc<dyn Clock>,
    /// Namespace prepended to identities
    key_prefix: String,
}

impl<S: BucketStore> TokenBucketLimiter<S> {
    /// Create a limiter allowing bursts of `capacity` refilled at `rate` tokens per second.
    ///
    /// Fails with a configuration error if `capacity` is zero or `rate` is not positive.
    pub fn new(store: Arc<S>, capacity: u64, rate: f64) -> Result<Self> {
        Ok(Self::with_policy(store, BucketPolicy::new(capacity, rate)?))
    }

    /// Create a limiter from an already validated policy.
    pub fn with_policy(store: Arc<S>, policy: BucketPolicy) -> Self {
        Self {
            store,
            policy,
            clock: Arc::new(SystemClock),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the namespace prepended to identities.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Consume one token for `identity` if one is available.
    ///
    /// `Ok(false)` is a denial. An `Err` means the store could not decide and
    /// says nothing about whether the request should pass.
    pub async fn allow(&self, identity: &str) -> Result<bool> {
        Ok(self.check(identity).await?.admitted)
    }

    /// Like [`allow`](Self::allow), also reporting the balance left.
    pub async fn check(&self, identity: &str) -> Result<Decision> {
        let key = BucketKey::new(&self.key_prefix, identity);
        let now = self.clock.now_micros();

        trace!(key = %key, now = now, "Checking rate limit");

        let decision = self
            .store
            .atomic_apply(key.as_str(), &self.policy, now, self.policy.ttl())
            .await?;

        if !decision.admitted {
            debug!(
                identity = %identity,
                remaining = decision.remaining,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// The bucket policy in force.
    pub fn policy(&self) -> &BucketPolicy {
        &self.policy
    }

    /// Maximum burst size.
    pub fn capacity(&self) -> u64 {
        self.policy.capacity()
    }

    /// Refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.policy.rate()
    }

    /// The store this limiter writes to.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[async_trait]
impl<S: BucketStore + 'static> RateLimiterBackend for TokenBucketLimiter<S> {
    async fn check(&self, identity: &str) -> Result<Decision> {
        TokenBucketLimiter::check(self, identity).await
    }

    fn capacity(&self) -> u64 {
        self.policy.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TollgateError;
    use crate::ratelimit::ManualClock;
    use crate::store::MemoryStore;
    use futures::future::join_all;
    use std::time::Duration;

    const START: i64 = 1_700_000_000_000_000;

    struct FailingStore;

    #[async_trait]
    impl BucketStore for FailingStore {
        async fn atomic_apply(
            &self,
            _key: &str,
            _policy: &BucketPolicy,
            _now_micros: i64,
            _ttl: Duration,
        ) -> Result<Decision> {
            Err(TollgateError::Timeout(Duration::from_millis(500)))
        }

        async fn ping(&self) -> Result<()> {
            Err(TollgateError::Timeout(Duration::from_millis(500)))
        }
    }

    fn test_limiter(capacity: u64, rate: f64) -> (TokenBucketLimiter<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let limiter = TokenBucketLimiter::new(Arc::new(MemoryStore::new()), capacity, rate)
            .unwrap()
            .with_clock(clock.clone());
        (limiter, clock)
    }

    async fn allow_n(limiter: &TokenBucketLimiter<MemoryStore>, identity: &str, n: usize) -> Vec<bool> {
        let mut results = Vec::with_capacity(n);
        for _ in 0..n {
            results.push(limiter.allow(identity).await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn test_rejects_invalid_configuration() {
        let store = Arc::new(MemoryStore::new());

        assert!(matches!(
            TokenBucketLimiter::new(store.clone(), 0, 1.0),
            Err(TollgateError::Config(_))
        ));
        assert!(matches!(
            TokenBucketLimiter::new(store.clone(), 5, 0.0),
            Err(TollgateError::Config(_))
        ));
        assert!(matches!(
            TokenBucketLimiter::new(store, 5, -2.5),
            Err(TollgateError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_burst_up_to_capacity() {
        let (limiter, _clock) = test_limiter(5, 1.0);

        assert_eq!(allow_n(&limiter, "test_user_123", 5).await, vec![true; 5]);
        assert!(!limiter.allow("test_user_123").await.unwrap());
    }

    #[tokio::test]
    async fn test_refill_after_wait() {
        let (limiter, clock) = test_limiter(5, 1.0);

        assert_eq!(allow_n(&limiter, "user", 5).await, vec![true; 5]);
        assert!(!limiter.allow("user").await.unwrap());

        clock.advance(Duration::from_millis(2100));

        assert_eq!(allow_n(&limiter, "user", 3).await, vec![true, true, false]);
    }

    #[tokio::test]
    async fn test_refill_matches_rate() {
        let (limiter, clock) = test_limiter(10, 4.0);

        assert_eq!(allow_n(&limiter, "user", 10).await, vec![true; 10]);

        // floor(4.0 * 1.5) = 6
        clock.advance(Duration::from_millis(1500));
        let mut expected = vec![true; 6];
        expected.push(false);
        assert_eq!(allow_n(&limiter, "user", 7).await, expected);
    }

    #[tokio::test]
    async fn test_refill_saturates_at_capacity() {
        let (limiter, clock) = test_limiter(3, 1.0);

        limiter.allow("user").await.unwrap();
        clock.advance(Duration::from_secs(3600));

        let decision = limiter.check("user").await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 2.0);

        let state = limiter
            .store()
            .snapshot("rate_limiter:user", clock.now_micros())
            .unwrap();
        assert!(state.tokens <= 3.0);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let (limiter, _clock) = test_limiter(2, 1.0);

        assert_eq!(allow_n(&limiter, "alice", 3).await, vec![true, true, false]);
        assert_eq!(allow_n(&limiter, "bob", 2).await, vec![true, true]);
    }

    #[tokio::test]
    async fn test_denied_probes_do_not_accelerate_refill() {
        let (limiter, clock) = test_limiter(1, 1.0);

        assert!(limiter.allow("user").await.unwrap());

        clock.advance(Duration::from_millis(500));
        assert!(!limiter.allow("user").await.unwrap());
        clock.advance(Duration::from_millis(400));
        assert!(!limiter.allow("user").await.unwrap());

        // A full second after the last debit, exactly one token is back.
        clock.advance(Duration::from_millis(100));
        assert!(limiter.allow("user").await.unwrap());
        assert!(!limiter.allow("user").await.unwrap());
    }

    #[tokio::test]
    async fn test_clock_skew_never_goes_negative() {
        let (limiter, clock) = test_limiter(2, 1.0);

        assert!(limiter.allow("user").await.unwrap());

        clock.set(START - 10_000_000);
        assert!(limiter.allow("user").await.unwrap());
        assert!(!limiter.allow("user").await.unwrap());

        let state = limiter.store().snapshot("rate_limiter:user", START).unwrap();
        assert_eq!(state.tokens, 0.0);
        assert_eq!(state.last_refilled, START);
    }

    #[tokio::test]
    async fn test_custom_key_prefix() {
        let (limiter, clock) = test_limiter(2, 1.0);
        let limiter = limiter.with_key_prefix("api:");

        limiter.allow("user").await.unwrap();

        let now = clock.now_micros();
        assert!(limiter.store().snapshot("api:user", now).is_some());
        assert!(limiter.store().snapshot("rate_limiter:user", now).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_never_overspend() {
        let (limiter, _clock) = test_limiter(10, 1.0);
        let limiter = Arc::new(limiter);

        let tasks = (0..64).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.allow("shared").await.unwrap() })
        });

        let admitted = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|admitted| *admitted)
            .count();

        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let limiter = TokenBucketLimiter::new(Arc::new(FailingStore), 5, 1.0).unwrap();

        let result = limiter.allow("user").await;
        assert!(matches!(result, Err(TollgateError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_backend_trait() {
        let (limiter, _clock) = test_limiter(4, 1.0);
        let backend: Arc<dyn RateLimiterBackend> = Arc::new(limiter);

        assert_eq!(backend.capacity(), 4);
        let decision = RateLimiterBackend::check(backend.as_ref(), "user").await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 3.0);
    }
}
