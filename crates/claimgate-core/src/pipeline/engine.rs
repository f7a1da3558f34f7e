//! Pipeline execution engine.
//!
//! Every profile's transform chain is resolved against the registry once,
//! at construction; an unregistered identifier fails construction. At
//! execution time each step receives the previous step's output text, and
//! a step that errors or panics is recorded as `decision=error` while the
//! rest of the chain still runs.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use claimgate_types::audit::AuditTrace;
use claimgate_types::error::{GatewayError, Result, TransformError};
use claimgate_types::item::Item;
use claimgate_types::policy::Policy;
use claimgate_types::verdict::{
    Change, Decision, Reason, TransformContext, TransformExecution, TransformResult, Verdict,
};

use super::registry::TransformRegistry;
use super::traits::Transform;
use crate::audit::AuditRecorder;
use crate::observability::GatewayMetrics;

/// Route recorded on traces executed directly by profile name.
pub const NO_ROUTE: &str = "-";

struct Step {
    name: String,
    transform: Arc<dyn Transform>,
}

/// Runs items through policy profiles.
pub struct TransformPipeline {
    policy: Policy,
    chains: HashMap<String, Vec<Step>>,
    recorder: Arc<AuditRecorder>,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl TransformPipeline {
    /// Resolve every profile of `policy` against `registry`.
    ///
    /// Fails with [`GatewayError::UnknownTransform`] for the first
    /// identifier that is not registered, or [`GatewayError::ConfigInvalid`]
    /// when the policy shape itself is invalid.
    pub fn new(
        registry: &TransformRegistry,
        policy: Policy,
        recorder: Arc<AuditRecorder>,
    ) -> Result<Self> {
        policy.validate_shape()?;

        let mut chains = HashMap::with_capacity(policy.profiles.len());
        for profile in &policy.profiles {
            let mut steps = Vec::with_capacity(profile.transforms.len());
            for id in &profile.transforms {
                let transform =
                    registry
                        .get(id)
                        .ok_or_else(|| GatewayError::UnknownTransform {
                            profile: profile.name.clone(),
                            transform: id.clone(),
                        })?;
                steps.push(Step {
                    name: id.clone(),
                    transform,
                });
            }
            chains.insert(profile.name.clone(), steps);
        }

        info!(
            profiles = policy.profiles.len(),
            routes = policy.routes.len(),
            "transform pipeline loaded"
        );

        Ok(Self {
            policy,
            chains,
            recorder,
            metrics: None,
        })
    }

    /// Builder: report step timings, errors and degraded dependencies.
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn recorder(&self) -> &Arc<AuditRecorder> {
        &self.recorder
    }

    /// Profile bound to `route`.
    pub fn profile_for_route(&self, route: &str) -> Result<&str> {
        self.policy
            .profile_for_route(route)
            .ok_or_else(|| GatewayError::UnknownRoute(route.to_string()))
    }

    /// Run `item` through the transforms of `profile`.
    pub async fn execute(
        &self,
        item: &Item,
        profile: &str,
        ctx: &TransformContext,
    ) -> Result<Verdict> {
        self.run(item, profile, NO_ROUTE, ctx).await
    }

    /// Run `item` through the profile bound to `route`.
    pub async fn execute_route(
        &self,
        item: &Item,
        route: &str,
        ctx: &TransformContext,
    ) -> Result<Verdict> {
        let profile = self.profile_for_route(route)?.to_string();
        self.run(item, &profile, route, ctx).await
    }

    async fn run(
        &self,
        item: &Item,
        profile: &str,
        route: &str,
        ctx: &TransformContext,
    ) -> Result<Verdict> {
        let chain = self
            .chains
            .get(profile)
            .ok_or_else(|| GatewayError::UnknownProfile(profile.to_string()))?;

        let normalized = item.normalize();
        let mut text = normalized.text();
        let mut changes = Vec::new();
        let mut reasons = Vec::new();
        let mut executions = Vec::with_capacity(chain.len());
        let mut degraded: Vec<String> = Vec::new();

        for step in chain {
            let started = Instant::now();
            let outcome = apply_isolated(step, &text, ctx).await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            let decision = match outcome {
                Ok(result) => {
                    for service in result.degraded_services {
                        self.note_degraded(&mut degraded, service, &step.name);
                    }
                    reasons.extend(result.flags.into_iter().map(|flag| Reason {
                        transform: step.name.clone(),
                        why: flag.explanation,
                        source: flag.source,
                    }));
                    if result.modified {
                        let before = std::mem::replace(&mut text, result.text);
                        changes.push(Change {
                            field: step.transform.field().to_string(),
                            before,
                            after: text.clone(),
                            transform: step.name.clone(),
                        });
                        Decision::Modify
                    } else {
                        Decision::Pass
                    }
                }
                Err(err) => {
                    warn!(
                        transform = %step.name,
                        item_id = %normalized.id,
                        correlation_id = %ctx.correlation_id,
                        error = %err,
                        "transform failed, continuing chain"
                    );
                    if let Some(ref m) = self.metrics {
                        m.transform_errors_total
                            .inc(&[("transform", step.name.as_str())]);
                    }
                    if let TransformError::DependencyUnavailable { service } = err {
                        self.note_degraded(&mut degraded, service, &step.name);
                    }
                    Decision::Error
                }
            };

            debug!(
                transform = %step.name,
                duration_ms,
                decision = ?decision,
                "transform step complete"
            );
            if let Some(ref m) = self.metrics {
                m.transform_duration_ms
                    .observe(&[("transform", step.name.as_str())], duration_ms);
            }
            executions.push(TransformExecution {
                name: step.name.clone(),
                duration_ms,
                decision,
            });
        }

        let audit_id = Uuid::new_v4().to_string();
        let verdict = Verdict::new(changes, reasons, audit_id, ctx.correlation_id.clone());

        self.recorder
            .record(AuditTrace {
                tenant: ctx.tenant.clone(),
                profile: profile.to_string(),
                route: route.to_string(),
                item_id: normalized.id.clone(),
                transforms: executions,
                verdict: verdict.clone(),
                degraded_services: degraded,
            })
            .await?;

        info!(
            item_id = %normalized.id,
            profile = %profile,
            verdict = ?verdict.verdict,
            changes = verdict.changes.len(),
            reasons = verdict.reasons.len(),
            audit_id = %verdict.audit_id,
            correlation_id = %verdict.correlation_id,
            "item evaluated"
        );
        Ok(verdict)
    }

    fn note_degraded(&self, degraded: &mut Vec<String>, service: String, transform: &str) {
        warn!(transform = %transform, service = %service, "dependency unavailable");
        if let Some(ref m) = self.metrics {
            m.degraded_dependency_total
                .inc(&[("service", service.as_str())]);
        }
        if !degraded.contains(&service) {
            degraded.push(service);
        }
    }
}

/// Invoke one step, converting a panic into [`TransformError::Failed`].
async fn apply_isolated(
    step: &Step,
    text: &str,
    ctx: &TransformContext,
) -> std::result::Result<TransformResult, TransformError> {
    match AssertUnwindSafe(step.transform.apply(text, ctx))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(TransformError::Failed(format!("panicked: {msg}")))
        }
    }
}
