//! Audit trail types.
//!
//! An [`AuditTrace`] is what the pipeline hands over after executing one
//! item; the recorder stamps it into an immutable [`AuditRecord`]. Records
//! are batched into packs summarised by [`AuditSummary`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::verdict::{TransformExecution, Verdict};

/// Completed execution trace for one item, before recording.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditTrace {
    pub tenant: String,
    pub profile: String,
    pub route: String,
    pub item_id: String,
    pub transforms: Vec<TransformExecution>,
    pub verdict: Verdict,
    /// Services reported unreachable by any transform, de-duplicated in
    /// first-seen order.
    pub degraded_services: Vec<String>,
}

/// Immutable audit entry, one per pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: String,
    pub ts: DateTime<Utc>,
    pub tenant: String,
    pub profile: String,
    pub route: String,
    pub item_id: String,
    pub transforms: Vec<TransformExecution>,
    pub verdict: Verdict,
    pub latency_ms: f64,
    pub degraded_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_services: Option<Vec<String>>,
    /// `hash` of the preceding record, or the genesis hash.
    #[serde(default)]
    pub prev_hash: String,
    /// SHA-256 over the record's canonical JSON with this field blank.
    #[serde(default)]
    pub hash: String,
}

impl AuditRecord {
    /// Whether the item's content was altered.
    pub fn is_modified(&self) -> bool {
        !self.verdict.changes.is_empty()
    }
}

/// Filter for [`AuditRecord`] lookups. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub tenant: Option<String>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
}

impl AuditQuery {
    /// Query every record of one tenant.
    pub fn tenant(tenant: impl Into<String>) -> Self {
        Self {
            tenant: Some(tenant.into()),
            ..Self::default()
        }
    }

    /// Builder: restrict to `[from, to)`.
    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(ref tenant) = self.tenant
            && &record.tenant != tenant
        {
            return false;
        }
        if let Some(from) = self.from
            && record.ts < from
        {
            return false;
        }
        if let Some(to) = self.to
            && record.ts >= to
        {
            return false;
        }
        true
    }
}

/// Aggregate statistics over a batch of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub pack_id: String,
    pub generated_at: DateTime<Utc>,
    pub total_items: usize,
    pub modified_items: usize,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// Reason count grouped by transform name.
    pub flags_by_transform: BTreeMap<String, usize>,
    pub degraded_mode_count: usize,
}

/// Paths and summary of a generated pack.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditPack {
    pub jsonl_path: PathBuf,
    pub md_path: PathBuf,
    pub summary: AuditSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(tenant: &str, ts: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            audit_id: "a".into(),
            ts,
            tenant: tenant.into(),
            profile: "p".into(),
            route: "/r".into(),
            item_id: "i".into(),
            transforms: vec![],
            verdict: Verdict::new(vec![], vec![], "a", "c"),
            latency_ms: 1.0,
            degraded_mode: false,
            degraded_services: None,
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    #[test]
    fn query_filters_tenant_and_range() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap();

        let q = AuditQuery::tenant("acme").between(t0, t2);
        assert!(q.matches(&record("acme", t0)));
        assert!(q.matches(&record("acme", t1)));
        assert!(!q.matches(&record("acme", t2)), "upper bound is exclusive");
        assert!(!q.matches(&record("other", t1)));
        assert!(AuditQuery::default().matches(&record("anyone", t2)));
    }

    #[test]
    fn record_omits_absent_degraded_services() {
        let json = serde_json::to_string(&record("acme", Utc::now())).unwrap();
        assert!(!json.contains("degraded_services"));
        assert!(json.contains("\"degraded_mode\":false"));
    }
}
