//! Token bucket rate limiting.

mod backend;
mod bucket;
mod clock;
mod key;
mod limiter;

pub use backend::RateLimiterBackend;
pub use bucket::{Applied, BucketPolicy, BucketState, Decision, UNIT_COST};
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{BucketKey, DEFAULT_KEY_PREFIX};
pub use limiter::TokenBucketLimiter;
