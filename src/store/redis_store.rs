use std::collections::HashMap;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::error::GatewayError;

use super::StateStore;

/// Production `StateStore`, backed by a pooled Redis connection shared
/// across all request handlers.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(host: &str, port: u16) -> Result<Self, GatewayError> {
        let url = format!("redis://{host}:{port}");
        let client = redis::Client::open(url)
            .map_err(|e| GatewayError::StoreUnavailable(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| GatewayError::StoreUnavailable(e.to_string()))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn read_all(&self, key: &str) -> Result<HashMap<String, String>, GatewayError> {
        let mut conn = self.manager.clone();
        conn.hgetall(key)
            .await
            .map_err(|e| GatewayError::StoreUnavailable(e.to_string()))
    }

    async fn write_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), GatewayError> {
        let mut conn = self.manager.clone();
        let owned: Vec<(&str, String)> = fields.to_vec();
        conn.hset_multiple(key, &owned)
            .await
            .map_err(|e| GatewayError::StoreUnavailable(e.to_string()))
    }

    async fn set_ttl(&self, key: &str, seconds: u64) -> Result<(), GatewayError> {
        let mut conn = self.manager.clone();
        conn.expire(key, seconds as i64)
            .await
            .map_err(|e| GatewayError::StoreUnavailable(e.to_string()))
    }
}
