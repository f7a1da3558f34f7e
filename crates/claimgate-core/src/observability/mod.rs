//! Metrics and service level objectives.

pub mod metrics;
pub mod slo;

pub use metrics::{Counter, Gauge, GatewayMetrics, Histogram, MetricsRegistry};
pub use slo::{SloObjective, SloReport, SloStatus, SloTracker};
