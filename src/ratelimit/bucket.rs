//! Token bucket policy and refill arithmetic.

use std::time::Duration;

use crate::error::{Result, TollgateError};

/// Tokens debited by every admitted request.
pub const UNIT_COST: f64 = 1.0;

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Upper bound on record expiry: one hundred years.
///
/// Redis stores expiry as an absolute i64 millisecond deadline, so the TTL plus
/// the current time must stay well inside that range.
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3600;

/// Persisted state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Available admission credit, `0 <= tokens <= capacity`.
    pub tokens: f64,
    /// Unix timestamp in microseconds of the last debit.
    pub last_refilled: i64,
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Whether the request was admitted.
    pub admitted: bool,
    /// Balance left after this call.
    pub remaining: f64,
}

/// Result of applying the policy to a bucket: what to write back and what to answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Applied {
    pub state: BucketState,
    pub decision: Decision,
}

/// Capacity and refill rate of a token bucket.
///
/// Constructed only through [`BucketPolicy::new`], so a policy in hand is
/// always valid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketPolicy {
    capacity: u64,
    rate: f64,
}

impl BucketPolicy {
    /// Create a policy holding at most `capacity` tokens and refilling `rate` tokens per second.
    pub fn new(capacity: u64, rate: f64) -> Result<Self> {
        if capacity < 1 {
            return Err(TollgateError::Config(
                "capacity must be at least 1".to_string(),
            ));
        }
        if !rate.is_finite() || rate <= 0.0 {
            return Err(TollgateError::Config(format!(
                "rate must be a positive number of tokens per second, got {}",
                rate
            )));
        }
        Ok(Self { capacity, rate })
    }

    /// Maximum number of tokens the bucket holds.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Idle time after which a record may be reclaimed: twice the time to refill from empty.
    pub fn ttl(&self) -> Duration {
        let secs = (2.0 * self.capacity as f64 / self.rate).ceil();
        // float-to-int casts saturate
        Duration::from_secs((secs as u64).clamp(1, MAX_TTL_SECS))
    }

    /// Balance of `state` at `now_micros`, capped at capacity.
    ///
    /// Elapsed time is clamped at zero so a caller with a lagging clock can
    /// never drain tokens.
    pub fn refilled(&self, state: &BucketState, now_micros: i64) -> f64 {
        let elapsed_micros = now_micros.saturating_sub(state.last_refilled).max(0);
        let elapsed_secs = elapsed_micros as f64 / MICROS_PER_SECOND;
        (state.tokens + elapsed_secs * self.rate).min(self.capacity as f64)
    }

    /// Run one check-and-debit against `current`.
    ///
    /// An absent record is a full bucket last touched at `now_micros`. On a
    /// denial the record is returned as read: the stored pair already encodes
    /// the refilled balance, and writing the refilled amount back under the
    /// old timestamp would credit the same interval twice.
    pub fn apply(&self, current: Option<BucketState>, now_micros: i64) -> Applied {
        let state = current.unwrap_or(BucketState {
            tokens: self.capacity as f64,
            last_refilled: now_micros,
        });

        let available = self.refilled(&state, now_micros);

        if available >= UNIT_COST {
            let remaining = available - UNIT_COST;
            Applied {
                state: BucketState {
                    tokens: remaining,
                    last_refilled: state.last_refilled.max(now_micros),
                },
                decision: Decision {
                    admitted: true,
                    remaining,
                },
            }
        } else {
            Applied {
                state,
                decision: Decision {
                    admitted: false,
                    remaining: available,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: i64 = 1_000_000;

    fn policy(capacity: u64, rate: f64) -> BucketPolicy {
        BucketPolicy::new(capacity, rate).unwrap()
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(matches!(BucketPolicy::new(0, 1.0), Err(TollgateError::Config(_))));
        assert!(matches!(BucketPolicy::new(5, 0.0), Err(TollgateError::Config(_))));
        assert!(matches!(BucketPolicy::new(5, -1.0), Err(TollgateError::Config(_))));
        assert!(matches!(BucketPolicy::new(5, f64::NAN), Err(TollgateError::Config(_))));
        assert!(matches!(
            BucketPolicy::new(5, f64::INFINITY),
            Err(TollgateError::Config(_))
        ));
        assert!(BucketPolicy::new(1, 0.001).is_ok());
    }

    #[test]
    fn test_ttl() {
        assert_eq!(policy(5, 1.0).ttl(), Duration::from_secs(10));
        assert_eq!(policy(5, 3.0).ttl(), Duration::from_secs(4)); // ceil(3.33)
        assert_eq!(policy(1, 1000.0).ttl(), Duration::from_secs(1));
        assert_eq!(policy(1, 1e-300).ttl(), Duration::from_secs(MAX_TTL_SECS));
    }

    #[test]
    fn test_max_ttl_fits_absolute_millisecond_deadline() {
        // 3000-01-01T00:00:00Z in Unix milliseconds
        let far_future_ms: i64 = 32_503_680_000_000;
        let ttl_ms = (policy(1, 1e-300).ttl().as_secs() as i64).checked_mul(1000);

        assert!(ttl_ms.and_then(|ms| ms.checked_add(far_future_ms)).is_some());
    }

    #[test]
    fn test_absent_record_is_full_bucket() {
        let applied = policy(5, 1.0).apply(None, 42);

        assert!(applied.decision.admitted);
        assert_eq!(applied.decision.remaining, 4.0);
        assert_eq!(applied.state, BucketState { tokens: 4.0, last_refilled: 42 });
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let p = policy(5, 1.0);
        let state = BucketState { tokens: 0.0, last_refilled: 0 };

        assert_eq!(p.refilled(&state, 3600 * SECOND), 5.0);
    }

    #[test]
    fn test_partial_refill() {
        let p = policy(5, 2.0);
        let state = BucketState { tokens: 1.0, last_refilled: 0 };

        assert_eq!(p.refilled(&state, SECOND / 2), 2.0);
    }

    #[test]
    fn test_denial_keeps_record() {
        let p = policy(5, 1.0);
        let state = BucketState { tokens: 0.25, last_refilled: 10 * SECOND };

        let applied = p.apply(Some(state), 10 * SECOND + SECOND / 2);

        assert!(!applied.decision.admitted);
        assert_eq!(applied.decision.remaining, 0.75);
        assert_eq!(applied.state, state);
    }

    #[test]
    fn test_backwards_clock_does_not_drain() {
        let p = policy(5, 1.0);
        let state = BucketState { tokens: 2.0, last_refilled: 100 * SECOND };

        assert_eq!(p.refilled(&state, 90 * SECOND), 2.0);

        let applied = p.apply(Some(state), 90 * SECOND);
        assert!(applied.decision.admitted);
        assert_eq!(applied.state.tokens, 1.0);
        assert_eq!(applied.state.last_refilled, 100 * SECOND);
    }

    #[test]
    fn test_exhaust_then_deny() {
        let p = policy(3, 1.0);
        let mut state = None;

        for _ in 0..3 {
            let applied = p.apply(state, 0);
            assert!(applied.decision.admitted);
            state = Some(applied.state);
        }

        let applied = p.apply(state, 0);
        assert!(!applied.decision.admitted);
        assert_eq!(applied.decision.remaining, 0.0);
    }
}
