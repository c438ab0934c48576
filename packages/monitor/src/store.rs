//! Alert Stores
//!
//! Durable alert persistence keyed by `(tx_hash, rule)`. Upserting the same
//! key twice leaves exactly one alert holding the latest payload.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;

use crate::alert::Alert;

/// Default Redis hash holding all alerts
pub const DEFAULT_ALERTS_KEY: &str = "compliance:alerts";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Idempotent alert persistence
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Insert or replace the alert under its identity key
    async fn upsert(&self, alert: Alert) -> Result<Alert, StoreError>;
}

/// In-process store, used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    alerts: RwLock<HashMap<String, Alert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alerts.read().map(|alerts| alerts.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, tx_hash: &str, rule: &str) -> Option<Alert> {
        let key = crate::alert::alert_key(tx_hash, rule);
        self.alerts.read().ok()?.get(&key).cloned()
    }

    /// All stored alerts ordered by key
    pub fn all(&self) -> Vec<Alert> {
        let Ok(alerts) = self.alerts.read() else {
            return Vec::new();
        };
        let mut all: Vec<Alert> = alerts.values().cloned().collect();
        all.sort_by_key(Alert::key);
        all
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn upsert(&self, alert: Alert) -> Result<Alert, StoreError> {
        let mut alerts = self.alerts.write().map_err(|_| StoreError::Poisoned)?;
        alerts.insert(alert.key(), alert.clone());
        Ok(alert)
    }
}

/// Redis hash store: `HSET <hash_key> <tx_hash:RULE> <alert json>`
#[derive(Clone)]
pub struct RedisAlertStore {
    connection: MultiplexedConnection,
    hash_key: String,
}

impl RedisAlertStore {
    pub fn new(connection: MultiplexedConnection, hash_key: impl Into<String>) -> Self {
        Self {
            connection,
            hash_key: hash_key.into(),
        }
    }

    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }
}

#[async_trait]
impl AlertStore for RedisAlertStore {
    async fn upsert(&self, alert: Alert) -> Result<Alert, StoreError> {
        let json = alert.to_json()?;
        let mut connection = self.connection.clone();
        let _: i64 = connection.hset(&self.hash_key, alert.key(), json).await?;
        Ok(alert)
    }
}
