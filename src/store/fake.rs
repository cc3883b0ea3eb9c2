use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::GatewayError;

use super::StateStore;

/// In-memory `StateStore` used by tests in place of Redis.
///
/// TTLs are recorded but not enforced by a background sweep — nothing in
/// this codebase depends on keys actually expiring mid-test. Can be put
/// into a failing mode to exercise the store-outage paths in the limiter
/// and breaker.
#[derive(Default)]
pub struct FakeStore {
    data: Mutex<HashMap<String, HashMap<String, String>>>,
    failing: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent call returns `StoreUnavailable` until this is
    /// toggled back off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for FakeStore {
    async fn read_all(&self, key: &str) -> Result<HashMap<String, String>, GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::StoreUnavailable("fake store read failure".to_string()));
        }
        let data = self.data.lock().await;
        Ok(data.get(key).cloned().unwrap_or_default())
    }

    async fn write_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::StoreUnavailable("fake store write failure".to_string()));
        }
        let mut data = self.data.lock().await;
        let entry = data.entry(key.to_string()).or_default();
        for (field, value) in fields {
            entry.insert((*field).to_string(), value.clone());
        }
        Ok(())
    }

    async fn set_ttl(&self, _key: &str, _seconds: u64) -> Result<(), GatewayError> {
        Ok(())
    }
}
