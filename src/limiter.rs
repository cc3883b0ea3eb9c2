//! Per-client token-bucket rate limiter, backed by the shared state store.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::GatewayError;
use crate::store::StateStore;

const KEY_PREFIX: &str = "rate_limit:";
const BUCKET_TTL_SECONDS: u64 = 3600;

pub struct RateLimiter {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    capacity: f64,
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, capacity: f64, refill_rate: f64) -> Self {
        Self { store, clock, capacity, refill_rate }
    }

    /// Admit or deny one request from `identity`, returning the advisory
    /// `Retry-After` value (in seconds) when denied.
    pub async fn allow(&self, identity: &str) -> Result<(bool, i64), GatewayError> {
        let key = format!("{KEY_PREFIX}{identity}");
        let now = self.clock.now();

        let data = self.store.read_all(&key).await?;
        let (mut tokens, mut last_refill) = if data.is_empty() {
            (self.capacity, now)
        } else {
            let tokens = data
                .get("tokens")
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(self.capacity);
            let last_refill = data
                .get("last_refill_time")
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(now);
            (tokens, last_refill)
        };

        let elapsed = (now - last_refill).max(0);
        if elapsed > 0 {
            tokens = (tokens + elapsed as f64 * self.refill_rate).min(self.capacity);
            last_refill = now;
        }

        let (allowed, retry_after) = if tokens >= 1.0 {
            tokens -= 1.0;
            (true, 0)
        } else {
            let retry_after = if self.refill_rate > 0.0 {
                ((1.0 - tokens) / self.refill_rate).ceil().max(1.0) as i64
            } else {
                1
            };
            (false, retry_after)
        };

        self.store
            .write_fields(
                &key,
                &[("tokens", tokens.to_string()), ("last_refill_time", last_refill.to_string())],
            )
            .await?;
        self.store.set_ttl(&key, BUCKET_TTL_SECONDS).await?;

        Ok((allowed, retry_after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::store::FakeStore;

    fn limiter(capacity: f64, refill_rate: f64, clock: Arc<TestClock>) -> RateLimiter {
        RateLimiter::new(Arc::new(FakeStore::new()), clock, capacity, refill_rate)
    }

    #[tokio::test]
    async fn first_request_from_new_identity_is_admitted() {
        let rl = limiter(1.0, 1.0, Arc::new(TestClock::new(1_000)));
        let (allowed, retry_after) = rl.allow("1.2.3.4").await.unwrap();
        assert!(allowed);
        assert_eq!(retry_after, 0);
    }

    #[tokio::test]
    async fn second_request_in_same_second_is_denied_with_retry_after() {
        let rl = limiter(1.0, 1.0, Arc::new(TestClock::new(1_000)));
        rl.allow("1.2.3.4").await.unwrap();
        let (allowed, retry_after) = rl.allow("1.2.3.4").await.unwrap();
        assert!(!allowed);
        assert!(retry_after >= 1);
    }

    #[tokio::test]
    async fn bucket_refills_after_elapsed_seconds() {
        let clock = Arc::new(TestClock::new(1_000));
        let rl = limiter(1.0, 1.0, clock.clone());
        rl.allow("1.2.3.4").await.unwrap();
        assert!(!rl.allow("1.2.3.4").await.unwrap().0);

        clock.advance(1);
        let (allowed, _) = rl.allow("1.2.3.4").await.unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn tokens_never_exceed_capacity() {
        let clock = Arc::new(TestClock::new(1_000));
        let rl = limiter(5.0, 10.0, clock.clone());
        rl.allow("1.2.3.4").await.unwrap();
        clock.advance(100);
        rl.allow("1.2.3.4").await.unwrap();
        // one more second at the same clock value should still show a full-minus-one bucket
        let data = rl.store.read_all("rate_limit:1.2.3.4").await.unwrap();
        let tokens: f64 = data["tokens"].parse().unwrap();
        assert!(tokens <= 5.0);
    }

    #[tokio::test]
    async fn zero_refill_rate_defaults_retry_after_to_one() {
        let rl = limiter(1.0, 0.0, Arc::new(TestClock::new(1_000)));
        rl.allow("1.2.3.4").await.unwrap();
        let (allowed, retry_after) = rl.allow("1.2.3.4").await.unwrap();
        assert!(!allowed);
        assert_eq!(retry_after, 1);
    }

    #[tokio::test]
    async fn distinct_identities_have_independent_buckets() {
        let rl = limiter(1.0, 1.0, Arc::new(TestClock::new(1_000)));
        assert!(rl.allow("1.1.1.1").await.unwrap().0);
        assert!(rl.allow("2.2.2.2").await.unwrap().0);
    }
}
