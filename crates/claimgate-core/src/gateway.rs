//! Request orchestration.
//!
//! [`Gateway::handle`] runs one request through the components in order:
//!
//! 1. burst admission for the client IP (always)
//! 2. per-key admission (only when the caller presented an API key)
//! 3. profile resolution from the request route
//! 4. pipeline execution, memoized by the idempotency key when present
//! 5. request metrics and SLO accounting
//!
//! Failures come back as a [`Rejection`] carrying the caller-facing
//! [`ErrorBody`]. Internal failures are logged in full and returned with a
//! generic message.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use claimgate_types::config::{AuditConfig, DEFAULT_SLO, GatewayConfig};
use claimgate_types::error::{ErrorBody, GatewayError, Result};
use claimgate_types::item::Item;
use claimgate_types::policy::Policy;
use claimgate_types::verdict::{TransformContext, Verdict};

use crate::audit::{AuditRecorder, AuditStore, InMemoryAuditStore, JsonlAuditStore};
use crate::clock::{self, Clock};
use crate::gate::RateLimiter;
use crate::idempotency::{CacheStatus, IdempotencyCache};
use crate::observability::{GatewayMetrics, SloTracker};
use crate::pipeline::{TransformPipeline, TransformRegistry};
use crate::store::{InMemoryStore, KeyValueStore};

// ── Request / response ───────────────────────────────────────────────────

/// One item submitted for evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub client_ip: String,
    /// Set when the caller was authenticated upstream.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub route: String,
    pub tenant: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Generated when absent.
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub item: Item,
}

fn default_locale() -> String {
    "en-US".into()
}

impl GatewayRequest {
    pub fn new(
        client_ip: impl Into<String>,
        route: impl Into<String>,
        tenant: impl Into<String>,
        item: Item,
    ) -> Self {
        Self {
            client_ip: client_ip.into(),
            api_key: None,
            idempotency_key: None,
            route: route.into(),
            tenant: tenant.into(),
            locale: default_locale(),
            correlation_id: None,
            item,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// Successful evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub verdict: Verdict,
    /// The verdict was replayed from the idempotency cache.
    pub replayed: bool,
}

/// A request the gateway refused or failed to evaluate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("request rejected ({status}): {}", .body.error.code)]
pub struct Rejection {
    /// HTTP-equivalent status code.
    pub status: u16,
    pub body: ErrorBody,
    /// `Retry-After` value for admission rejections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl Rejection {
    /// Map a gateway error onto a status code and envelope.
    pub fn from_error(err: &GatewayError, correlation_id: &str) -> Self {
        let (status, retry_after_secs) = match err {
            GatewayError::RateLimited {
                retry_after_secs, ..
            } => (429, Some(*retry_after_secs)),
            GatewayError::UnknownRoute(_) => (404, None),
            GatewayError::EmptyAuditInput => (400, None),
            _ => (500, None),
        };
        Self {
            status,
            body: err.to_body(correlation_id),
            retry_after_secs,
        }
    }
}

// ── Backends ─────────────────────────────────────────────────────────────

/// Storage and time sources a gateway is built over.
#[derive(Clone)]
pub struct Backends {
    /// Rate-limit counters and idempotent responses.
    pub kv: Arc<dyn KeyValueStore>,
    pub audit: Arc<dyn AuditStore>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Everything in process, on the system clock.
    pub fn in_memory() -> Self {
        Self {
            kv: Arc::new(InMemoryStore::new()),
            audit: Arc::new(InMemoryAuditStore::new()),
            clock: clock::system(),
        }
    }

    /// In-process counters, with a JSONL audit trail when configured.
    pub fn from_config(audit: &AuditConfig) -> Self {
        let mut backends = Self::in_memory();
        if let Some(ref path) = audit.store_path {
            backends.audit = Arc::new(JsonlAuditStore::new(path));
        }
        backends
    }

    /// Everything in process, driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            kv: Arc::new(InMemoryStore::with_clock(clock.clone())),
            audit: Arc::new(InMemoryAuditStore::new()),
            clock,
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────

/// The assembled request path.
pub struct Gateway {
    limiter: RateLimiter,
    cache: IdempotencyCache,
    pipeline: TransformPipeline,
    metrics: Arc<GatewayMetrics>,
    slo: Arc<SloTracker>,
    slo_name: String,
}

impl Gateway {
    /// Assemble a gateway over explicit backends.
    ///
    /// Fails when the policy does not resolve against `registry`.
    pub fn new(
        config: &GatewayConfig,
        registry: &TransformRegistry,
        policy: Policy,
        backends: Backends,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(GatewayMetrics::new(&config.metrics.latency_buckets_ms)?);
        let recorder =
            Arc::new(AuditRecorder::new(backends.audit).with_clock(backends.clock.clone()));
        let pipeline =
            TransformPipeline::new(registry, policy, recorder)?.with_metrics(metrics.clone());
        let slo = Arc::new(SloTracker::from_config(&config.slo).with_clock(backends.clock.clone()));
        let slo_name = config
            .slo
            .first()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| DEFAULT_SLO.to_string());

        Ok(Self {
            limiter: RateLimiter::new(backends.kv.clone(), &config.rate_limit)
                .with_clock(backends.clock),
            cache: IdempotencyCache::new(backends.kv, &config.idempotency),
            pipeline,
            metrics,
            slo,
            slo_name,
        })
    }

    /// Assemble a gateway with backends chosen by `config`.
    pub fn from_config(
        config: &GatewayConfig,
        registry: &TransformRegistry,
        policy: Policy,
    ) -> Result<Self> {
        Self::new(config, registry, policy, Backends::from_config(&config.audit))
    }

    /// Evaluate one request.
    pub async fn handle(
        &self,
        request: GatewayRequest,
    ) -> std::result::Result<GatewayResponse, Rejection> {
        let started = Instant::now();
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.metrics.inflight_requests.inc(&[]);
        let outcome = self.process(&request, &correlation_id).await;
        self.metrics.inflight_requests.dec(&[]);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let route = request.route.as_str();
        self.metrics
            .request_duration_ms
            .observe(&[("route", route)], elapsed_ms);

        match outcome {
            Ok((verdict, status)) => {
                let replayed = status == CacheStatus::Hit;
                if replayed {
                    self.metrics.idempotency_replays_total.inc(&[]);
                }
                self.metrics.requests_total.inc(&[
                    ("route", route),
                    ("outcome", verdict.verdict.as_str()),
                ]);
                self.slo.record_request(&self.slo_name, true);
                Ok(GatewayResponse { verdict, replayed })
            }
            Err(err) => Err(self.reject(&err, route, &correlation_id)),
        }
    }

    async fn process(
        &self,
        request: &GatewayRequest,
        correlation_id: &str,
    ) -> Result<(Verdict, CacheStatus)> {
        self.limiter
            .admit(&request.client_ip, request.api_key.as_deref())
            .await?;
        self.pipeline.profile_for_route(&request.route)?;

        let ctx = TransformContext::new(&request.locale, &request.tenant, correlation_id);
        // Client keys are scoped per tenant.
        let key = request
            .idempotency_key
            .as_deref()
            .map(|k| format!("{}:{k}", request.tenant));
        let pipeline = &self.pipeline;
        self.cache
            .run_with_status(key.as_deref(), || {
                pipeline.execute_route(&request.item, &request.route, &ctx)
            })
            .await
    }

    fn reject(&self, err: &GatewayError, route: &str, correlation_id: &str) -> Rejection {
        let outcome = match err {
            GatewayError::RateLimited { scope, .. } => {
                warn!(
                    route = %route,
                    scope = %scope,
                    correlation_id = %correlation_id,
                    "request rejected by admission gate"
                );
                self.metrics
                    .rate_limit_rejections_total
                    .inc(&[("scope", scope.as_str())]);
                "rejected"
            }
            GatewayError::UnknownRoute(_) => {
                info!(route = %route, correlation_id = %correlation_id, "no profile bound to route");
                "not_found"
            }
            _ => {
                error!(
                    route = %route,
                    correlation_id = %correlation_id,
                    error = %err,
                    "request failed"
                );
                self.slo.record_request(&self.slo_name, false);
                "error"
            }
        };
        self.metrics
            .requests_total
            .inc(&[("route", route), ("outcome", outcome)]);
        Rejection::from_error(err, correlation_id)
    }

    /// Clear rate-limit counters, metrics and SLO history.
    pub async fn reset(&self) -> Result<()> {
        self.limiter.reset().await?;
        self.metrics.reset();
        self.slo.reset();
        info!("gateway state reset");
        Ok(())
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn slo(&self) -> &Arc<SloTracker> {
        &self.slo
    }

    /// Name of the objective every request is accounted against.
    pub fn slo_name(&self) -> &str {
        &self.slo_name
    }
}
