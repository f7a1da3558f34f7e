//! Idempotency cache: at most one side-effecting execution per client key.
//!
//! [`IdempotencyCache::run`] memoizes the handler's successful result under
//! `{prefix}{key}` for a fixed TTL (24 hours by default). A repeat call with
//! the same key before expiry replays the stored result without invoking
//! the handler. Calls without a key are never memoized.
//!
//! # Concurrency
//!
//! Concurrent first calls for the same unseen key are serialized by a
//! per-key async lock held for the duration of the handler, so within one
//! process the handler runs once and the followers replay its result.
//! Different keys never share a lock. Across processes sharing an external
//! store there is no distributed lock: two instances racing on the same
//! unseen key may both execute and the later write wins.
//!
//! Handler errors propagate to the caller and are not stored, so a failed
//! attempt can be retried under the same key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use claimgate_types::config::IdempotencyConfig;
use claimgate_types::error::Result;

use crate::store::KeyValueStore;

/// Whether a result was freshly computed or replayed from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// No key supplied; handler invoked, nothing stored.
    Bypass,
    /// Key unseen or expired; handler invoked and result stored.
    Miss,
    /// Stored result returned; handler not invoked.
    Hit,
}

/// Key-to-response memoization over a [`KeyValueStore`].
pub struct IdempotencyCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    prefix: String,
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl IdempotencyCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &IdempotencyConfig) -> Self {
        Self {
            store,
            ttl: Duration::from_secs(config.ttl_secs),
            prefix: config.key_prefix.clone(),
            inflight: DashMap::new(),
        }
    }

    /// Configured replay window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Run `handler` at most once per `key` within the TTL.
    pub async fn run<T, F, Fut>(&self, key: Option<&str>, handler: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_status(key, handler)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`run`](Self::run), also reporting whether the result was replayed.
    pub async fn run_with_status<T, F, Fut>(
        &self,
        key: Option<&str>,
        handler: F,
    ) -> Result<(T, CacheStatus)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(key) = key else {
            return Ok((handler().await?, CacheStatus::Bypass));
        };

        let storage_key = format!("{}{key}", self.prefix);
        let lock = self
            .inflight
            .entry(storage_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let outcome = {
            let _guard = lock.lock().await;
            self.lookup_or_execute(&storage_key, handler).await
        };

        drop(lock);
        self.inflight
            .remove_if(&storage_key, |_, m| Arc::strong_count(m) == 1);

        outcome
    }

    async fn lookup_or_execute<T, F, Fut>(
        &self,
        storage_key: &str,
        handler: F,
    ) -> Result<(T, CacheStatus)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(stored) = self.store.get(storage_key).await? {
            match serde_json::from_str::<T>(&stored) {
                Ok(value) => {
                    debug!(key = storage_key, "idempotent replay");
                    return Ok((value, CacheStatus::Hit));
                }
                Err(e) => {
                    // Stored by an incompatible version; treat as absent.
                    warn!(key = storage_key, error = %e, "discarding unreadable idempotent entry");
                }
            }
        }

        let value = handler().await?;
        let encoded = serde_json::to_string(&value)?;
        self.store
            .set(storage_key, encoded, Some(self.ttl))
            .await?;
        Ok((value, CacheStatus::Miss))
    }

    /// Number of keys with an execution in progress.
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use chrono::{TimeZone, Utc};
    use claimgate_types::error::GatewayError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> (IdempotencyCache, Arc<ManualClock>, Arc<InMemoryStore>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        (
            IdempotencyCache::new(store.clone(), &IdempotencyConfig::default()),
            clock,
            store,
        )
    }

    #[tokio::test]
    async fn second_call_replays_without_invoking_handler() {
        let (c, _, _) = cache();
        let first: String = c.run(Some("k1"), || async { Ok("one".to_string()) }).await.unwrap();

        let invoked = AtomicUsize::new(0);
        let second: String = c
            .run(Some("k1"), || async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok("two".to_string())
            })
            .await
            .unwrap();

        assert_eq!(first, "one");
        assert_eq!(second, "one");
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_key_always_invokes() {
        let (c, _, store) = cache();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let (_, status) = c
                .run_with_status(None, || async {
                    Ok::<_, GatewayError>(calls.fetch_add(1, Ordering::SeqCst))
                })
                .await
                .unwrap();
            assert_eq!(status, CacheStatus::Bypass);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn stored_under_prefixed_key() {
        let (c, _, store) = cache();
        c.run(Some("abc"), || async { Ok(7u32) }).await.unwrap();
        assert_eq!(store.get("idempotency:abc").await.unwrap().as_deref(), Some("7"));
        assert_eq!(
            store.ttl("idempotency:abc").await.unwrap(),
            Some(Duration::from_secs(86_400))
        );
    }

    #[tokio::test]
    async fn expired_entry_reexecutes() {
        let (c, clock, _) = cache();
        c.run(Some("k"), || async { Ok(1u32) }).await.unwrap();
        clock.advance(chrono::Duration::hours(24));
        let (v, status) = c.run_with_status(Some("k"), || async { Ok(2u32) }).await.unwrap();
        assert_eq!(v, 2);
        assert_eq!(status, CacheStatus::Miss);
    }

    #[tokio::test]
    async fn errors_are_not_memoized() {
        let (c, _, _) = cache();
        let err = c
            .run::<u32, _, _>(Some("k"), || async {
                Err(GatewayError::Storage("boom".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Storage(_)));
        let (v, status) = c.run_with_status(Some("k"), || async { Ok(5u32) }).await.unwrap();
        assert_eq!((v, status), (5, CacheStatus::Miss));
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let (c, _, _) = cache();
        let a: u32 = c.run(Some("a"), || async { Ok(1) }).await.unwrap();
        let b: u32 = c.run(Some("b"), || async { Ok(2) }).await.unwrap();
        assert_eq!((a, b), (1, 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_execute_once() {
        let (c, _, _) = cache();
        let c = Arc::new(c);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..16u32 {
            let c = Arc::clone(&c);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                c.run(Some("same"), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(i)
                })
                .await
                .unwrap()
            }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(c.inflight(), 0);
    }

    #[tokio::test]
    async fn unreadable_entry_is_treated_as_absent() {
        let (c, _, store) = cache();
        store.set("idempotency:k", "not json".into(), None).await.unwrap();
        let (v, status) = c.run_with_status(Some("k"), || async { Ok(3u32) }).await.unwrap();
        assert_eq!((v, status), (3, CacheStatus::Miss));
    }
}
