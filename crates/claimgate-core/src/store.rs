//! Keyed counter / cache backend.
//!
//! The admission gate and the idempotency cache both need a keyed
//! get / set / incr / expire primitive. [`KeyValueStore`] is that primitive;
//! components receive it at construction and never ask which backend they
//! hold. [`InMemoryStore`] serves single-instance deployments; a shared
//! external store (e.g. Redis) implements the same trait for multi-instance
//! deployments.
//!
//! # Expiry
//!
//! Entries expire passively: an expired entry is treated as absent on the
//! next access and dropped then. Keys that are never read again (one
//! rate-limit key per window, for instance) are removed by a sweep that
//! writes trigger at most once per [`DEFAULT_SWEEP_INTERVAL`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use claimgate_types::error::{GatewayError, Result};

use crate::clock::{self, Clock};

/// Minimum spacing between expiry sweeps of an [`InMemoryStore`].
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

// ── Backend trait ────────────────────────────────────────────────────────

/// Keyed string store with per-key expiry and atomic increment.
///
/// Implementations must make [`incr`](KeyValueStore::incr) atomic per key.
/// Operations on different keys must not serialize behind one another.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value under `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value`, replacing any previous value (last write wins).
    /// `ttl = None` stores without expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Atomically increment the integer under `key` and return the new value.
    /// An absent or expired key counts as `0` before the increment.
    async fn incr(&self, key: &str) -> Result<u64>;

    /// Set the expiry of an existing key. Returns `false` if it is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining time-to-live, or `None` when the key is absent or has no
    /// expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key starting with `prefix`. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;
}

// ── In-memory backend ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn new(value: String) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local [`KeyValueStore`].
///
/// Backed by a sharded `DashMap`: every mutation holds only the shard lock
/// of its key, so increments on one key are serialized while unrelated keys
/// proceed in parallel.
pub struct InMemoryStore {
    entries: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
    sweep_interval: chrono::Duration,
    last_sweep: Mutex<DateTime<Utc>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(clock::system())
    }

    /// Store driven by an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            entries: DashMap::new(),
            clock,
            sweep_interval: chrono::Duration::seconds(DEFAULT_SWEEP_INTERVAL.as_secs() as i64),
            last_sweep: Mutex::new(now),
        }
    }

    /// Builder: sweep expired entries at most once per `interval`.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval =
            chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX);
        self
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Purge expired entries when the sweep interval has elapsed.
    ///
    /// Must not be called while a map guard is held.
    fn sweep_if_due(&self) {
        let now = self.clock.now();
        {
            let mut last = self.last_sweep.lock();
            if now - *last < self.sweep_interval {
                return;
            }
            *last = now;
        }
        let removed = self.purge_expired();
        if removed > 0 {
            trace!(removed, "swept expired entries");
        }
    }

    fn deadline(&self, ttl: Duration) -> Result<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| GatewayError::Storage(format!("ttl out of range: {e}")))?;
        Ok(self.clock.now() + ttl)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        // Drop expired entries on read; remove_if re-checks under the lock.
        if self
            .entries
            .remove_if(key, |_, v| v.is_expired(now))
            .is_some()
        {
            return Ok(None);
        }
        Ok(self.entries.get(key).map(|v| v.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.sweep_if_due();
        let expires_at = ttl.map(|t| self.deadline(t)).transpose()?;
        self.entries.insert(
            key.to_string(),
            StoredValue { value, expires_at },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        self.sweep_if_due();
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::new("0".into()));
        if entry.is_expired(now) {
            *entry = StoredValue::new("0".into());
        }
        let current: u64 = entry.value.parse().map_err(|_| {
            GatewayError::Storage(format!("value at '{key}' is not an integer"))
        })?;
        let next = current + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let deadline = self.deadline(ttl)?;
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(deadline);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = self.clock.now();
        Ok(self.entries.get(key).and_then(|entry| {
            let at = entry.expires_at?;
            (at > now).then(|| (at - now).to_std().unwrap_or_default())
        }))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
