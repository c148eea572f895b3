//! The expiring key-value secret store
//!
//! Every credential the process holds lives behind this seam: an opaque
//! string value stored under a name with a time-to-live. Expired and absent
//! entries are indistinguishable to callers, which is what turns expiry into
//! a refresh trigger rather than an error.

use aliri_clock::DurationSecs;
use async_trait::async_trait;
use std::error;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

/// An error raised by a store backend
///
/// A missing key is not an error; reads report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the operation
    ///
    /// Fatal when raised while connecting at startup; at steady state, read
    /// paths treat it like a cache miss.
    #[error("secret store unavailable during {operation}")]
    Unavailable {
        /// The store operation that failed
        operation: &'static str,
        /// The underlying transport error
        #[source]
        source: Box<dyn error::Error + Send + Sync + 'static>,
    },

    /// A stored record could not be encoded or decoded
    #[error("malformed secret record under {key}")]
    MalformedRecord {
        /// The key holding the unreadable record
        key: String,
        /// The serialization failure
        #[source]
        source: serde_json::Error,
    },
}

/// An expiring key-value store for opaque secret values
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    /// Returns the live value stored under `key`
    ///
    /// Expired and absent entries both produce `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally overwrites `key` with a remaining lifetime of exactly
    /// `ttl` from now
    async fn set(&self, key: &str, value: &str, ttl: DurationSecs) -> Result<(), StoreError>;

    /// Removes `key`; idempotent, absent keys are not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
