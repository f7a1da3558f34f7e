//! Audit recorder: turns a completed execution trace into an immutable
//! [`AuditRecord`] and appends it to the configured [`AuditStore`].
//!
//! Each record is sealed into the store's hash chain (see
//! [`chain`](super::chain)) before it is appended.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use claimgate_types::audit::{AuditQuery, AuditRecord, AuditTrace};
use claimgate_types::error::Result;

use super::chain::{self, GENESIS_HASH};
use super::store::AuditStore;
use crate::clock::{self, Clock};

/// Stamps and persists execution traces.
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    /// Hash of the last appended record. Loaded from the store on first
    /// use; held across the append so chain order equals append order.
    tip: Mutex<Option<String>>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            clock: clock::system(),
            tip: Mutex::new(None),
        }
    }

    /// Builder: stamp records with an injected clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record one execution.
    ///
    /// `latency_ms` is the sum of the transform step durations. The record
    /// is degraded when any step reported an unreachable dependency.
    pub async fn record(&self, trace: AuditTrace) -> Result<AuditRecord> {
        let latency_ms = trace.transforms.iter().map(|t| t.duration_ms).sum();
        let degraded_mode = !trace.degraded_services.is_empty();

        let mut record = AuditRecord {
            audit_id: trace.verdict.audit_id.clone(),
            ts: self.clock.now(),
            tenant: trace.tenant,
            profile: trace.profile,
            route: trace.route,
            item_id: trace.item_id,
            transforms: trace.transforms,
            verdict: trace.verdict,
            latency_ms,
            degraded_mode,
            degraded_services: degraded_mode.then_some(trace.degraded_services),
            prev_hash: String::new(),
            hash: String::new(),
        };

        let mut tip = self.tip.lock().await;
        let prev = match tip.as_ref() {
            Some(hash) => hash.clone(),
            None => self
                .store
                .last()
                .await?
                .map(|r| r.hash)
                .unwrap_or_else(|| GENESIS_HASH.to_string()),
        };
        chain::seal(&mut record, &prev)?;
        self.store.append(&record).await?;
        *tip = Some(record.hash.clone());
        drop(tip);

        if degraded_mode {
            warn!(
                audit_id = %record.audit_id,
                services = ?record.degraded_services,
                "audit record captured in degraded mode"
            );
        } else {
            debug!(audit_id = %record.audit_id, latency_ms, "audit record captured");
        }
        Ok(record)
    }

    /// Records matching `query`.
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        self.store.query(query).await
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::InMemoryAuditStore;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use claimgate_types::verdict::{Decision, TransformExecution, Verdict};

    fn trace(degraded: Vec<String>) -> AuditTrace {
        AuditTrace {
            tenant: "acme".into(),
            profile: "menu".into(),
            route: "/v1/check".into(),
            item_id: "sku-1".into(),
            transforms: vec![
                TransformExecution {
                    name: "allergens".into(),
                    duration_ms: 1.5,
                    decision: Decision::Modify,
                },
                TransformExecution {
                    name: "recall".into(),
                    duration_ms: 2.0,
                    decision: Decision::Error,
                },
            ],
            verdict: Verdict::new(vec![], vec![], "audit-1", "corr-1"),
            degraded_services: degraded,
        }
    }

    #[tokio::test]
    async fn stamps_and_appends() {
        let store = Arc::new(InMemoryAuditStore::new());
        let at = Utc.with_ymd_and_hms(2026, 7, 4, 9, 30, 0).unwrap();
        let recorder = AuditRecorder::new(store.clone()).with_clock(Arc::new(ManualClock::new(at)));

        let record = recorder.record(trace(vec![])).await.unwrap();
        assert_eq!(record.audit_id, "audit-1");
        assert_eq!(record.ts, at);
        assert!((record.latency_ms - 3.5).abs() < 1e-9);
        assert!(!record.degraded_mode);
        assert!(record.degraded_services.is_none());
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn carries_degraded_services() {
        let recorder = AuditRecorder::new(Arc::new(InMemoryAuditStore::new()));
        let record = recorder.record(trace(vec!["recall_lookup".into()])).await.unwrap();
        assert!(record.degraded_mode);
        assert_eq!(record.degraded_services, Some(vec!["recall_lookup".to_string()]));
    }

    #[tokio::test]
    async fn records_form_a_verifiable_chain() {
        let store = Arc::new(InMemoryAuditStore::new());
        let recorder = AuditRecorder::new(store.clone());
        let first = recorder.record(trace(vec![])).await.unwrap();
        let second = recorder.record(trace(vec!["ocr".into()])).await.unwrap();
        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.prev_hash, first.hash);

        let all = store.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(chain::verify(&all).unwrap(), second.hash);
    }

    #[tokio::test]
    async fn new_recorder_continues_existing_chain() {
        let store = Arc::new(InMemoryAuditStore::new());
        let before = AuditRecorder::new(store.clone()).record(trace(vec![])).await.unwrap();
        let after = AuditRecorder::new(store.clone()).record(trace(vec![])).await.unwrap();
        assert_eq!(after.prev_hash, before.hash);
        let all = store.query(&AuditQuery::default()).await.unwrap();
        chain::verify(&all).unwrap();
    }

    #[tokio::test]
    async fn query_delegates_to_store() {
        let recorder = AuditRecorder::new(Arc::new(InMemoryAuditStore::new()));
        recorder.record(trace(vec![])).await.unwrap();
        assert_eq!(recorder.query(&AuditQuery::tenant("acme")).await.unwrap().len(), 1);
        assert!(recorder.query(&AuditQuery::tenant("nobody")).await.unwrap().is_empty());
    }
}
