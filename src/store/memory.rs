//! An in-memory store backend
//!
//! Primarily a test double with an injectable clock, but also usable as a
//! degraded single-process backend when no remote cache is available.

use super::{ExpiringStore, StoreError};
use crate::records::SecretRecord;
use aliri_clock::{Clock, DurationSecs, System};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// An in-memory expiring store
#[derive(Debug, Default)]
pub struct InMemoryStore<C = System> {
    entries: RwLock<HashMap<String, SecretRecord>>,
    clock: C,
}

impl InMemoryStore {
    /// Constructs an empty store driven by the system clock
    pub fn new() -> Self {
        Self::with_clock(System)
    }
}

impl<C: Clock> InMemoryStore<C> {
    /// Constructs an empty store driven by the given clock
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Raw access to the stored record regardless of expiry
    ///
    /// Lets tests assert on the exact expiration written by a caller.
    pub async fn record(&self, key: &str) -> Option<SecretRecord> {
        self.entries.read().await.get(key).cloned()
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> ExpiringStore for InMemoryStore<C> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(record) if !record.is_expired_at(now) => {
                    return Ok(Some(record.value.clone()))
                }
                Some(_) => {}
            }
        }

        // lazily evict, re-checking under the write lock so a value written
        // between the two locks is never erased
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(record) if !record.is_expired_at(now) => Ok(Some(record.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: DurationSecs) -> Result<(), StoreError> {
        let record = SecretRecord::new(key, value, self.clock.now(), ttl);
        self.entries.write().await.insert(key.to_owned(), record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aliri_clock::UnixTime;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Debug, Default)]
    struct SharedClock(Arc<AtomicU64>);

    impl SharedClock {
        fn advance(&self, secs: u64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for SharedClock {
        fn now(&self) -> UnixTime {
            UnixTime(self.0.load(Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn get_after_set_returns_the_value() {
        let store = InMemoryStore::with_clock(SharedClock::default());
        store.set("chat-app-token", "tok", DurationSecs(120)).await.unwrap();
        assert_eq!(store.get("chat-app-token").await.unwrap().as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn entries_vanish_once_the_clock_passes_the_ttl() {
        let clock = SharedClock::default();
        let store = InMemoryStore::with_clock(clock.clone());
        store.set("music-token", "tok", DurationSecs(60)).await.unwrap();

        clock.advance(59);
        assert!(store.get("music-token").await.unwrap().is_some());

        clock.advance(1);
        assert_eq!(store.get("music-token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites_and_restarts_the_lifetime() {
        let clock = SharedClock::default();
        let store = InMemoryStore::with_clock(clock.clone());
        store.set("k", "old", DurationSecs(30)).await.unwrap();

        clock.advance(20);
        store.set("k", "new", DurationSecs(30)).await.unwrap();

        clock.advance(20);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_get_right_after_a_set_sees_the_value_despite_racing_evictions() {
        let clock = SharedClock::default();
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));

        // readers hammering an expired key race its lazy eviction against
        // the writer's overwrite
        let evictor = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for _ in 0..1000 {
                    let _ = store.get("k").await;
                    tokio::task::yield_now().await;
                }
            })
        };

        for i in 0..1000u32 {
            clock.advance(10);
            store.set("k", &i.to_string(), DurationSecs(5)).await.unwrap();
            assert_eq!(
                store.get("k").await.unwrap().as_deref(),
                Some(i.to_string().as_str()),
                "write erased by a concurrent eviction"
            );
        }

        evictor.await.unwrap();
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryStore::new();
        store.set("k", "v", DurationSecs(10)).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
