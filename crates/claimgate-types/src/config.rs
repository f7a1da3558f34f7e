//! Gateway configuration schema.
//!
//! Every field has a default so an empty document is a valid config.
//! Fields accept both `snake_case` and `camelCase` names; unknown fields are
//! silently ignored for forward compatibility.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration for the gateway core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Admission gate counters.
    #[serde(default, alias = "rateLimit")]
    pub rate_limit: RateLimitConfig,

    /// Idempotency cache settings.
    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    /// Service level objectives tracked per request.
    #[serde(default = "default_slos")]
    pub slo: Vec<SloObjectiveConfig>,

    /// Metrics registry settings.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Audit recorder / pack generator settings.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            idempotency: IdempotencyConfig::default(),
            slo: default_slos(),
            metrics: MetricsConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Parse a config document (YAML or JSON).
    pub fn from_yaml_str(src: &str) -> Result<Self> {
        let config: GatewayConfig =
            serde_yaml::from_str(src).map_err(|e| GatewayError::ConfigInvalid {
                reason: format!("malformed config: {e}"),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&src)
    }

    /// Reject values that would make a component meaningless.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limit;
        if rl.burst_window_secs == 0 || rl.key_window_secs == 0 {
            return Err(GatewayError::ConfigInvalid {
                reason: "rate limit windows must be at least one second".into(),
            });
        }
        for slo in &self.slo {
            if !(slo.target > 0.0 && slo.target < 1.0) {
                return Err(GatewayError::ConfigInvalid {
                    reason: format!("slo '{}' target must be in (0, 1)", slo.name),
                });
            }
            if slo.window_secs == 0 {
                return Err(GatewayError::ConfigInvalid {
                    reason: format!("slo '{}' window must be positive", slo.name),
                });
            }
        }
        if self
            .metrics
            .latency_buckets_ms
            .windows(2)
            .any(|w| w[0] >= w[1])
        {
            return Err(GatewayError::ConfigInvalid {
                reason: "latency buckets must be strictly ascending".into(),
            });
        }
        Ok(())
    }
}

// ── Rate limit ───────────────────────────────────────────────────────────

/// Fixed-window admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per IP per burst window.
    #[serde(default = "default_burst_limit", alias = "burstLimit")]
    pub burst_limit: u64,

    /// Burst window length in seconds.
    #[serde(default = "default_burst_window", alias = "burstWindowSecs")]
    pub burst_window_secs: u64,

    /// Requests allowed per API key per key window.
    #[serde(default = "default_key_limit", alias = "keyLimit")]
    pub key_limit: u64,

    /// Key window length in seconds.
    #[serde(default = "default_key_window", alias = "keyWindowSecs")]
    pub key_window_secs: u64,
}

fn default_burst_limit() -> u64 {
    10
}
fn default_burst_window() -> u64 {
    1
}
fn default_key_limit() -> u64 {
    100
}
fn default_key_window() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_limit: default_burst_limit(),
            burst_window_secs: default_burst_window(),
            key_limit: default_key_limit(),
            key_window_secs: default_key_window(),
        }
    }
}

// ── Idempotency ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// How long a stored response is replayed, in seconds.
    #[serde(default = "default_idempotency_ttl", alias = "ttlSecs")]
    pub ttl_secs: u64,

    /// Prefix prepended to client keys in the backing store.
    #[serde(default = "default_idempotency_prefix", alias = "keyPrefix")]
    pub key_prefix: String,
}

fn default_idempotency_ttl() -> u64 {
    24 * 60 * 60
}
fn default_idempotency_prefix() -> String {
    "idempotency:".into()
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_idempotency_ttl(),
            key_prefix: default_idempotency_prefix(),
        }
    }
}

// ── SLO ──────────────────────────────────────────────────────────────────

/// One named objective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SloObjectiveConfig {
    pub name: String,

    /// Required success ratio, e.g. `0.995`.
    pub target: f64,

    /// Trailing window in seconds.
    #[serde(alias = "windowSecs")]
    pub window_secs: u64,
}

/// Name of the objective the gateway reports every request into.
pub const DEFAULT_SLO: &str = "pipeline_availability";

fn default_slos() -> Vec<SloObjectiveConfig> {
    vec![SloObjectiveConfig {
        name: DEFAULT_SLO.into(),
        target: 0.995,
        window_secs: 3600,
    }]
}

// ── Metrics ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Upper bounds of the latency histogram buckets, ascending.
    #[serde(default = "default_latency_buckets", alias = "latencyBucketsMs")]
    pub latency_buckets_ms: Vec<f64>,
}

fn default_latency_buckets() -> Vec<f64> {
    vec![
        5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
    ]
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            latency_buckets_ms: default_latency_buckets(),
        }
    }
}

// ── Audit ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Directory packs are written into.
    #[serde(default = "default_pack_dir", alias = "packDir")]
    pub pack_dir: PathBuf,

    /// Optional append-only JSONL store. In-memory when unset.
    #[serde(default, alias = "storePath")]
    pub store_path: Option<PathBuf>,
}

fn default_pack_dir() -> PathBuf {
    PathBuf::from("audit-packs")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            pack_dir: default_pack_dir(),
            store_path: None,
        }
    }
}
