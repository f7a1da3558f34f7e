//! Transforms backed by an external lookup capability (recall databases,
//! OCR, certification registries).
//!
//! The transform never retries. An unreachable or slow service surfaces as
//! [`TransformError::DependencyUnavailable`], which the pipeline records as
//! a degraded dependency; retry and circuit-breaking belong to the service
//! implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use claimgate_types::error::{Result, TransformError};
use claimgate_types::verdict::{Flag, TransformContext, TransformResult};

use super::flagger::{KeywordRule, KeywordSet};
use crate::pipeline::Transform;

/// Why a lookup produced no answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LookupError {
    /// The service could not be reached or timed out.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service answered but refused the query.
    #[error("lookup rejected: {0}")]
    Rejected(String),
}

/// A service's answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupAnswer {
    pub findings: Vec<Flag>,
    /// The service answered from a fallback (stale cache, partial index).
    pub degraded: bool,
}

/// An external capability a transform consults.
#[async_trait]
pub trait LookupService: Send + Sync {
    /// Service name reported in `degraded_services`.
    fn name(&self) -> &str;

    async fn lookup(
        &self,
        text: &str,
        ctx: &TransformContext,
    ) -> std::result::Result<LookupAnswer, LookupError>;
}

/// Turns a [`LookupService`] answer into flags.
pub struct LookupTransform {
    service: Arc<dyn LookupService>,
    timeout: Option<Duration>,
}

impl LookupTransform {
    pub fn new(service: Arc<dyn LookupService>) -> Self {
        Self {
            service,
            timeout: None,
        }
    }

    /// Builder: treat a lookup slower than `timeout` as unavailable.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn unavailable(&self) -> TransformError {
        TransformError::DependencyUnavailable {
            service: self.service.name().to_string(),
        }
    }
}

#[async_trait]
impl Transform for LookupTransform {
    async fn apply(
        &self,
        text: &str,
        ctx: &TransformContext,
    ) -> std::result::Result<TransformResult, TransformError> {
        let answer = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.service.lookup(text, ctx))
                .await
                .map_err(|_| self.unavailable())?,
            None => self.service.lookup(text, ctx).await,
        };

        match answer {
            Ok(answer) => {
                let mut result = TransformResult::unchanged(text);
                result.flags = answer.findings;
                if answer.degraded {
                    result = result.with_degraded(self.service.name());
                }
                Ok(result)
            }
            Err(LookupError::Unavailable(_)) => Err(self.unavailable()),
            Err(e) => Err(TransformError::Failed(e.to_string())),
        }
    }
}

// ── Static service ───────────────────────────────────────────────────────

/// A lookup service answered from an in-process keyword table.
///
/// Useful as an offline stand-in for a remote index; availability can be
/// toggled to exercise degraded mode.
pub struct StaticLookupService {
    name: String,
    entries: KeywordSet,
    available: AtomicBool,
}

impl StaticLookupService {
    pub fn new(name: impl Into<String>, entries: Vec<KeywordRule>) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            entries: KeywordSet::new(entries)?,
            available: AtomicBool::new(true),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl LookupService for StaticLookupService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(
        &self,
        text: &str,
        _ctx: &TransformContext,
    ) -> std::result::Result<LookupAnswer, LookupError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(LookupError::Unavailable(format!("{} is offline", self.name)));
        }
        Ok(LookupAnswer {
            findings: self.entries.matches(text).map(KeywordRule::flag).collect(),
            degraded: false,
        })
    }
}
