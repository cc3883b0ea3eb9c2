//! Shared-state client.
//!
//! The sole point of contact with the external key/value store. Both the
//! rate limiter and the circuit breaker depend on this trait, not on Redis
//! directly, so tests can swap in an in-memory fake.

mod fake;
mod redis_store;

pub use fake::FakeStore;
pub use redis_store::RedisStore;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::GatewayError;

/// Exclusive point of contact with the external key/value store.
///
/// All returned scalars are strings; callers parse them. Every failure
/// surfaces as `GatewayError::StoreUnavailable` — no operation may
/// silently swallow a store error.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read every field of a hash key, or an empty map if the key is absent.
    async fn read_all(&self, key: &str) -> Result<HashMap<String, String>, GatewayError>;

    /// Merge the given fields into the hash at `key`; fields not listed are untouched.
    async fn write_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), GatewayError>;

    /// Refresh (or set) the TTL on `key`, in seconds.
    async fn set_ttl(&self, key: &str, seconds: u64) -> Result<(), GatewayError>;
}
