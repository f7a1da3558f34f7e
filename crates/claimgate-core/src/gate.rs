//! Dual-tier admission gate: per-IP burst limit and per-API-key limit.
//!
//! Implements two independent fixed-window counters:
//! 1. **Burst** -- caps requests per client IP per short window
//!    (default 10 per second). Checked for every request.
//! 2. **Key** -- caps requests per API key per long window
//!    (default 100 per minute). Checked only when an upstream
//!    authenticator supplied a key.
//!
//! # Algorithm
//!
//! Each check increments the counter stored under
//! `rl:{scope}:{id}:{bucket}`, where `bucket = unix_seconds / window`. The
//! first increment in a bucket sets the key's expiry to the window length.
//! When the post-increment count exceeds the limit the request is rejected
//! and `retry_after_secs` is the bucket's remaining time-to-live, falling
//! back to the full window when the backend cannot report it.
//!
//! Old bucket keys are never read again; the backend's expiry reclaims
//! them (the in-memory store sweeps them on later writes).
//!
//! Counter storage is a [`KeyValueStore`]; the gate never knows whether it
//! is talking to process memory or a shared external store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use claimgate_types::config::RateLimitConfig;
use claimgate_types::error::{GatewayError, Result};

use crate::clock::{self, Clock};
use crate::store::KeyValueStore;

/// Prefix shared by every rate-limit counter key.
const KEY_PREFIX: &str = "rl:";

// ── Scope ────────────────────────────────────────────────────────────────

/// Which counter tier a check ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitScope {
    Burst,
    Key,
}

impl LimitScope {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitScope::Burst => "burst",
            LimitScope::Key => "key",
        }
    }
}

/// Limit and window for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tier {
    limit: u64,
    window_secs: u64,
}

// ── Decision ─────────────────────────────────────────────────────────────

/// Outcome of a single counter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    /// Set only on rejection; always at least one second.
    pub retry_after_secs: Option<u64>,
    /// Post-increment count in the current bucket.
    pub count: u64,
}

// ── RateLimiter ──────────────────────────────────────────────────────────

/// Fixed-window admission gate keyed by client IP and API key.
///
/// Thread-safe: all state lives in the injected store, whose `incr` is
/// atomic per key. Construct once at process start and share via `Arc`.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    burst: Tier,
    key: Tier,
}

impl RateLimiter {
    /// Create a gate over `store` with the given limits.
    pub fn new(store: Arc<dyn KeyValueStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            clock: clock::system(),
            burst: Tier {
                limit: config.burst_limit,
                window_secs: config.burst_window_secs.max(1),
            },
            key: Tier {
                limit: config.key_limit,
                window_secs: config.key_window_secs.max(1),
            },
        }
    }

    /// Builder: use an injected clock for bucket selection.
    ///
    /// Pass the same clock the store uses so bucket ids and expiry agree.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Count one request from `ip` against the burst tier.
    pub async fn check_burst(&self, ip: &str) -> Result<AdmissionDecision> {
        self.check(LimitScope::Burst, ip).await
    }

    /// Count one request with `api_key` against the key tier.
    pub async fn check_key(&self, api_key: &str) -> Result<AdmissionDecision> {
        self.check(LimitScope::Key, api_key).await
    }

    /// Run the gate in middleware order.
    ///
    /// The burst check runs unconditionally; the key check only runs for an
    /// authenticated caller. A rejected burst check short-circuits so the
    /// key counter is not charged. Rejection surfaces as
    /// [`GatewayError::RateLimited`].
    pub async fn admit(&self, ip: &str, api_key: Option<&str>) -> Result<()> {
        let burst = self.check_burst(ip).await?;
        if !burst.allowed {
            return Err(rejected(LimitScope::Burst, burst));
        }
        if let Some(key) = api_key {
            let decision = self.check_key(key).await?;
            if !decision.allowed {
                return Err(rejected(LimitScope::Key, decision));
            }
        }
        Ok(())
    }

    /// Clear every counter of both tiers.
    ///
    /// Used for testing and operational resets.
    pub async fn reset(&self) -> Result<usize> {
        let removed = self.store.delete_prefix(KEY_PREFIX).await?;
        debug!(removed, "rate limit counters reset");
        Ok(removed)
    }

    /// Configured limit for a tier.
    pub fn limit(&self, scope: LimitScope) -> u64 {
        self.tier(scope).limit
    }

    /// Configured window for a tier.
    pub fn window(&self, scope: LimitScope) -> Duration {
        Duration::from_secs(self.tier(scope).window_secs)
    }

    fn tier(&self, scope: LimitScope) -> Tier {
        match scope {
            LimitScope::Burst => self.burst,
            LimitScope::Key => self.key,
        }
    }

    fn bucket_key(&self, scope: LimitScope, id: &str) -> String {
        let tier = self.tier(scope);
        let now = self.clock.now().timestamp().max(0) as u64;
        let bucket = now / tier.window_secs;
        format!("{KEY_PREFIX}{}:{id}:{bucket}", scope.as_str())
    }

    async fn check(&self, scope: LimitScope, id: &str) -> Result<AdmissionDecision> {
        let tier = self.tier(scope);
        let window = Duration::from_secs(tier.window_secs);
        let key = self.bucket_key(scope, id);

        let count = self.store.incr(&key).await?;
        if count == 1 {
            self.store.expire(&key, window).await?;
        }

        if count <= tier.limit {
            return Ok(AdmissionDecision {
                allowed: true,
                retry_after_secs: None,
                count,
            });
        }

        let retry_after = match self.store.ttl(&key).await {
            Ok(Some(remaining)) => ceil_secs(remaining),
            Ok(None) => tier.window_secs,
            Err(e) => {
                debug!(error = %e, "ttl lookup failed; using full window");
                tier.window_secs
            }
        };

        warn!(
            scope = scope.as_str(),
            count,
            limit = tier.limit,
            retry_after_secs = retry_after,
            "admission rejected"
        );

        Ok(AdmissionDecision {
            allowed: false,
            retry_after_secs: Some(retry_after.max(1)),
            count,
        })
    }
}

fn rejected(scope: LimitScope, decision: AdmissionDecision) -> GatewayError {
    GatewayError::RateLimited {
        scope: scope.as_str().to_string(),
        retry_after_secs: decision.retry_after_secs.unwrap_or(1),
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 { secs + 1 } else { secs }
}

// ── Tests ────────────────────────────────────────────────────────────────
