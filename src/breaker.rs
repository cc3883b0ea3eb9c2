//! Shared three-state circuit breaker guarding the single upstream.

use std::fmt;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::GatewayError;
use crate::store::StateStore;

const CB_KEY: &str = "circuit_breaker:upstream_service";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl State {
    fn as_str(self) -> &'static str {
        match self {
            State::Closed => "CLOSED",
            State::Open => "OPEN",
            State::HalfOpen => "HALF_OPEN",
        }
    }

    fn parse(value: &str) -> State {
        match value {
            "OPEN" => State::Open,
            "HALF_OPEN" => State::HalfOpen,
            _ => State::Closed,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Snapshot {
    state: State,
    failure_count: u32,
    success_count: u32,
    last_state_change_time: i64,
}

pub struct CircuitBreaker {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    failure_threshold: u32,
    reset_timeout_seconds: i64,
    half_open_success_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        failure_threshold: u32,
        reset_timeout_seconds: i64,
        half_open_success_threshold: u32,
    ) -> Self {
        Self {
            store,
            clock,
            failure_threshold,
            reset_timeout_seconds,
            half_open_success_threshold,
        }
    }

    async fn read(&self) -> Result<Snapshot, GatewayError> {
        let data = self.store.read_all(CB_KEY).await?;
        if data.is_empty() {
            let now = self.clock.now();
            return Ok(Snapshot {
                state: State::Closed,
                failure_count: 0,
                success_count: 0,
                last_state_change_time: now,
            });
        }

        Ok(Snapshot {
            state: data.get("state").map(|s| State::parse(s)).unwrap_or(State::Closed),
            failure_count: data.get("failure_count").and_then(|v| v.parse().ok()).unwrap_or(0),
            success_count: data.get("success_count").and_then(|v| v.parse().ok()).unwrap_or(0),
            last_state_change_time: data
                .get("last_state_change_time")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }

    async fn transition_to(&self, state: State) -> Result<(), GatewayError> {
        let now = self.clock.now();
        tracing::info!(event = "cb_state_change", new_state = %state, timestamp = now);
        self.store
            .write_fields(
                CB_KEY,
                &[
                    ("state", state.as_str().to_string()),
                    ("last_state_change_time", now.to_string()),
                    ("failure_count", "0".to_string()),
                    ("success_count", "0".to_string()),
                ],
            )
            .await
    }

    /// Ask whether a request may proceed; on OPEN→HALF_OPEN this also
    /// performs the transition and admits the probe.
    ///
    /// Store errors fail open: blocking all traffic on store flakiness is
    /// worse than degraded circuit protection, so a read or write failure
    /// here is logged and treated as an admit.
    pub async fn before_request(&self) -> Result<(bool, State), GatewayError> {
        let snapshot = match self.read().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(event = "cb_store_unavailable", phase = "before_request", error = %err);
                return Ok((true, State::Closed));
            }
        };
        let now = self.clock.now();

        match snapshot.state {
            State::Open => {
                if now - snapshot.last_state_change_time >= self.reset_timeout_seconds {
                    if let Err(err) = self.transition_to(State::HalfOpen).await {
                        tracing::warn!(event = "cb_store_unavailable", phase = "before_request", error = %err);
                    }
                    Ok((true, State::HalfOpen))
                } else {
                    Ok((false, State::Open))
                }
            }
            other => Ok((true, other)),
        }
    }

    /// Record a successful upstream call. Store errors are logged and
    /// dropped: accounting is best-effort and must never surface as a
    /// failure of the request that already succeeded.
    pub async fn record_success(&self) -> Result<(), GatewayError> {
        let snapshot = match self.read().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(event = "cb_store_unavailable", phase = "record_success", error = %err);
                return Ok(());
            }
        };

        let result = match snapshot.state {
            State::Closed => {
                self.store
                    .write_fields(CB_KEY, &[("failure_count", "0".to_string())])
                    .await
            }
            State::HalfOpen => {
                let success_count = snapshot.success_count + 1;
                if success_count >= self.half_open_success_threshold {
                    self.transition_to(State::Closed).await
                } else {
                    self.store
                        .write_fields(CB_KEY, &[("success_count", success_count.to_string())])
                        .await
                }
            }
            State::Open => Ok(()),
        };

        if let Err(err) = result {
            tracing::warn!(event = "cb_store_unavailable", phase = "record_success", error = %err);
        }
        Ok(())
    }

    /// Record a failed upstream call. Store errors are logged and dropped,
    /// same rationale as `record_success`.
    pub async fn record_failure(&self) -> Result<(), GatewayError> {
        let snapshot = match self.read().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(event = "cb_store_unavailable", phase = "record_failure", error = %err);
                return Ok(());
            }
        };

        let result = match snapshot.state {
            State::Closed => {
                let failure_count = snapshot.failure_count + 1;
                if failure_count >= self.failure_threshold {
                    self.transition_to(State::Open).await
                } else {
                    self.store
                        .write_fields(CB_KEY, &[("failure_count", failure_count.to_string())])
                        .await
                }
            }
            State::HalfOpen => self.transition_to(State::Open).await,
            State::Open => Ok(()),
        };

        if let Err(err) = result {
            tracing::warn!(event = "cb_store_unavailable", phase = "record_failure", error = %err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::store::FakeStore;

    fn breaker(clock: Arc<TestClock>) -> CircuitBreaker {
        CircuitBreaker::new(Arc::new(FakeStore::new()), clock, 2, 1, 1)
    }

    fn breaker_with_store(clock: Arc<TestClock>) -> (CircuitBreaker, Arc<FakeStore>) {
        let store = Arc::new(FakeStore::new());
        (CircuitBreaker::new(store.clone(), clock, 2, 1, 1), store)
    }

    #[tokio::test]
    async fn starts_closed_and_admits() {
        let cb = breaker(Arc::new(TestClock::new(1_000)));
        let (allowed, state) = cb.before_request().await.unwrap();
        assert!(allowed);
        assert_eq!(state, State::Closed);
    }

    #[tokio::test]
    async fn trips_open_after_threshold_failures() {
        let cb = breaker(Arc::new(TestClock::new(1_000)));
        cb.record_failure().await.unwrap();
        cb.record_failure().await.unwrap();
        let (allowed, state) = cb.before_request().await.unwrap();
        assert!(!allowed);
        assert_eq!(state, State::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_count_in_closed() {
        let cb = breaker(Arc::new(TestClock::new(1_000)));
        cb.record_failure().await.unwrap();
        cb.record_success().await.unwrap();
        cb.record_failure().await.unwrap();
        let (allowed, state) = cb.before_request().await.unwrap();
        assert!(allowed);
        assert_eq!(state, State::Closed);
    }

    #[tokio::test]
    async fn open_transitions_to_half_open_after_reset_timeout() {
        let clock = Arc::new(TestClock::new(1_000));
        let cb = breaker(clock.clone());
        cb.record_failure().await.unwrap();
        cb.record_failure().await.unwrap();

        clock.advance(2);
        let (allowed, state) = cb.before_request().await.unwrap();
        assert!(allowed);
        assert_eq!(state, State::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let clock = Arc::new(TestClock::new(1_000));
        let cb = breaker(clock.clone());
        cb.record_failure().await.unwrap();
        cb.record_failure().await.unwrap();
        clock.advance(2);
        cb.before_request().await.unwrap();

        cb.record_success().await.unwrap();
        let (allowed, state) = cb.before_request().await.unwrap();
        assert!(allowed);
        assert_eq!(state, State::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_with_fresh_timer() {
        let clock = Arc::new(TestClock::new(1_000));
        let cb = breaker(clock.clone());
        cb.record_failure().await.unwrap();
        cb.record_failure().await.unwrap();
        clock.advance(2);
        cb.before_request().await.unwrap();

        cb.record_failure().await.unwrap();
        let (allowed, state) = cb.before_request().await.unwrap();
        assert!(!allowed);
        assert_eq!(state, State::Open);
    }

    #[tokio::test]
    async fn before_request_fails_open_when_store_is_unavailable() {
        let (cb, store) = breaker_with_store(Arc::new(TestClock::new(1_000)));
        store.set_failing(true);

        let (allowed, state) = cb.before_request().await.unwrap();
        assert!(allowed);
        assert_eq!(state, State::Closed);
    }

    #[tokio::test]
    async fn record_failure_is_dropped_when_store_is_unavailable() {
        let (cb, store) = breaker_with_store(Arc::new(TestClock::new(1_000)));
        store.set_failing(true);

        // Would trip the breaker open if it were recorded; instead it must
        // be logged and swallowed, leaving the circuit untouched.
        cb.record_failure().await.unwrap();
        cb.record_failure().await.unwrap();

        store.set_failing(false);
        let (allowed, state) = cb.before_request().await.unwrap();
        assert!(allowed);
        assert_eq!(state, State::Closed);
    }

    #[tokio::test]
    async fn record_success_is_dropped_when_store_is_unavailable() {
        let (cb, store) = breaker_with_store(Arc::new(TestClock::new(1_000)));
        cb.record_failure().await.unwrap();

        store.set_failing(true);
        // Must not return an error even though the write never lands.
        cb.record_success().await.unwrap();
        store.set_failing(false);

        cb.record_failure().await.unwrap();
        let (allowed, state) = cb.before_request().await.unwrap();
        assert!(!allowed);
        assert_eq!(state, State::Open);
    }
}
