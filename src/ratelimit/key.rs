//! Namespaced store keys for bucket records.

/// Prefix applied to every identity unless configured otherwise.
pub const DEFAULT_KEY_PREFIX: &str = "rate_limiter:";

/// A key that uniquely identifies one bucket record in the store.
///
/// The key is the configured namespace followed by the caller's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey(String);

impl BucketKey {
    /// Create a new bucket key from a namespace prefix and an identity.
    pub fn new(prefix: &str, identity: &str) -> Self {
        let mut key = String::with_capacity(prefix.len() + identity.len());
        key.push_str(prefix);
        key.push_str(identity);
        Self(key)
    }

    /// The full key as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_key_creation() {
        let key = BucketKey::new(DEFAULT_KEY_PREFIX, "test_user_123");
        assert_eq!(key.as_str(), "rate_limiter:test_user_123");
        assert_eq!(key.to_string(), "rate_limiter:test_user_123");
    }

    #[test]
    fn test_bucket_key_equality() {
        let key1 = BucketKey::new("ns:", "alice");
        let key2 = BucketKey::new("ns:", "alice");
        let key3 = BucketKey::new("other:", "alice");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }
}
