//! Rolling-window service level objectives.
//!
//! Each objective keeps per-second `(requests, failures)` buckets. A check
//! sums the buckets inside the trailing window and classifies how much of
//! the error budget has been spent. Buckets older than the window are
//! dropped on the next write to that objective.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use claimgate_types::config::SloObjectiveConfig;

use crate::clock::{self, Clock};

/// Budget-consumption fraction at which an objective turns critical.
pub const CRITICAL_BUDGET_CONSUMED: f64 = 0.8;
/// Budget-consumption fraction at which an objective turns warning.
pub const WARNING_BUDGET_CONSUMED: f64 = 0.5;

/// Health classification of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SloStatus {
    Healthy,
    Warning,
    Critical,
    Violated,
}

/// A named objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloObjective {
    pub name: String,
    /// Required success ratio, e.g. `0.995`.
    pub target: f64,
    /// Trailing window length in seconds.
    pub window_secs: u64,
}

impl From<&SloObjectiveConfig> for SloObjective {
    fn from(cfg: &SloObjectiveConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            target: cfg.target,
            window_secs: cfg.window_secs,
        }
    }
}

/// Point-in-time evaluation of one objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloReport {
    pub name: String,
    pub target: f64,
    pub window_secs: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    /// Unspent share of the allowed failures, in `[0, 1]`.
    pub error_budget_remaining: f64,
    pub status: SloStatus,
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    requests: u64,
    failures: u64,
}

#[derive(Debug)]
struct ObjectiveState {
    objective: SloObjective,
    /// Keyed by unix second.
    buckets: BTreeMap<i64, Bucket>,
}

/// Tracks request outcomes against named objectives.
pub struct SloTracker {
    objectives: DashMap<String, ObjectiveState>,
    clock: Arc<dyn Clock>,
}

impl Default for SloTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SloTracker {
    pub fn new() -> Self {
        Self {
            objectives: DashMap::new(),
            clock: clock::system(),
        }
    }

    /// Build a tracker with the configured objectives defined.
    pub fn from_config(objectives: &[SloObjectiveConfig]) -> Self {
        let tracker = Self::new();
        for cfg in objectives {
            tracker.define(cfg.into());
        }
        tracker
    }

    /// Builder: bucket and evaluate against an injected clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Define (or redefine) an objective. Redefinition discards its history.
    pub fn define(&self, objective: SloObjective) {
        debug!(
            slo = %objective.name,
            target = objective.target,
            window_secs = objective.window_secs,
            "slo objective defined"
        );
        self.objectives.insert(
            objective.name.clone(),
            ObjectiveState {
                objective,
                buckets: BTreeMap::new(),
            },
        );
    }

    /// Defined objective names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objectives.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Record one request outcome now. Returns `false` if `name` is not
    /// defined.
    pub fn record_request(&self, name: &str, success: bool) -> bool {
        self.record_request_at(name, success, self.clock.now())
    }

    /// Record one request outcome at `at`.
    pub fn record_request_at(&self, name: &str, success: bool, at: DateTime<Utc>) -> bool {
        let Some(mut state) = self.objectives.get_mut(name) else {
            debug!(slo = %name, "outcome for undefined slo ignored");
            return false;
        };
        let second = at.timestamp();
        let bucket = state.buckets.entry(second).or_default();
        bucket.requests += 1;
        if !success {
            bucket.failures += 1;
        }
        let horizon = second - state.objective.window_secs as i64;
        state.buckets.retain(|ts, _| *ts > horizon);
        true
    }

    /// Evaluate `name` over the window ending now.
    pub fn check_slo(&self, name: &str) -> Option<SloReport> {
        self.check_slo_at(name, self.clock.now())
    }

    /// Evaluate `name` over the window ending at `now`.
    pub fn check_slo_at(&self, name: &str, now: DateTime<Utc>) -> Option<SloReport> {
        let state = self.objectives.get(name)?;
        let end = now.timestamp();
        let start = end - state.objective.window_secs as i64;
        let (total, failed) = state
            .buckets
            .range(start + 1..=end)
            .fold((0u64, 0u64), |(t, f), (_, b)| (t + b.requests, f + b.failures));

        let report = evaluate(&state.objective, total, failed);
        if report.status == SloStatus::Violated {
            warn!(
                slo = %name,
                success_rate = report.success_rate,
                target = report.target,
                "slo violated"
            );
        }
        Some(report)
    }

    /// Evaluate every objective, sorted by name.
    pub fn report_all(&self) -> Vec<SloReport> {
        let now = self.clock.now();
        self.names()
            .iter()
            .filter_map(|name| self.check_slo_at(name, now))
            .collect()
    }

    /// Drop all recorded outcomes. Objectives stay defined.
    pub fn reset(&self) {
        for mut entry in self.objectives.iter_mut() {
            entry.buckets.clear();
        }
    }
}

/// Classify `failed` out of `total` requests against `objective`.
pub fn evaluate(objective: &SloObjective, total: u64, failed: u64) -> SloReport {
    let (success_rate, budget_remaining) = if total == 0 {
        (1.0, 1.0)
    } else {
        let success_rate = (total - failed.min(total)) as f64 / total as f64;
        let allowed = total as f64 * (1.0 - objective.target);
        let remaining = if allowed > 0.0 {
            1.0 - failed as f64 / allowed
        } else if failed == 0 {
            1.0
        } else {
            0.0
        };
        (success_rate, remaining.clamp(0.0, 1.0))
    };

    let consumed = 1.0 - budget_remaining;
    let status = if success_rate < objective.target {
        SloStatus::Violated
    } else if consumed >= CRITICAL_BUDGET_CONSUMED {
        SloStatus::Critical
    } else if consumed >= WARNING_BUDGET_CONSUMED {
        SloStatus::Warning
    } else {
        SloStatus::Healthy
    };

    SloReport {
        name: objective.name.clone(),
        target: objective.target,
        window_secs: objective.window_secs,
        total_requests: total,
        failed_requests: failed,
        success_rate,
        error_budget_remaining: budget_remaining,
        status,
    }
}
