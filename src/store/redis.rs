//! A store backend over a remote key-value cache
//!
//! Values are written as JSON [`SecretRecord`]s with a server-side TTL. The
//! server enforces expiry; the recorded expiration is also checked on read so
//! a backend without per-key TTLs degrades safely.

use super::{ExpiringStore, StoreError};
use crate::records::SecretRecord;
use aliri_clock::{Clock, DurationSecs, System};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::fmt;

/// An expiring store backed by a shared redis instance
///
/// The connection is established once and multiplexed across all components;
/// a failure to connect is fatal and must be propagated before the process
/// starts serving traffic.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects to the cache at `addr` (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(addr: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(addr).map_err(|e| StoreError::Unavailable {
            operation: "connect",
            source: Box::new(e),
        })?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable {
                operation: "connect",
                source: Box::new(e),
            })?;
        tracing::info!(addr = %addr, "connected to secret cache");
        Ok(Self { conn })
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RedisStore").finish()
    }
}

#[async_trait]
impl ExpiringStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let raw = conn
            .get::<_, Option<String>>(key)
            .await
            .map_err(|e| StoreError::Unavailable {
                operation: "get",
                source: Box::new(e),
            })?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let record: SecretRecord =
            serde_json::from_str(&raw).map_err(|e| StoreError::MalformedRecord {
                key: key.to_owned(),
                source: e,
            })?;
        if record.is_expired_at(System.now()) {
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: DurationSecs) -> Result<(), StoreError> {
        let record = SecretRecord::new(key, value, System.now(), ttl);
        let json = serde_json::to_string(&record).map_err(|e| StoreError::MalformedRecord {
            key: key.to_owned(),
            source: e,
        })?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, json, ttl.0)
            .await
            .map_err(|e| StoreError::Unavailable {
                operation: "set",
                source: Box::new(e),
            })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| StoreError::Unavailable {
                operation: "delete",
                source: Box::new(e),
            })?;
        Ok(())
    }
}
