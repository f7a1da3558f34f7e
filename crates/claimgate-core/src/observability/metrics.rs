//! Labelled counters, gauges and histograms on a Prometheus registry.
//!
//! Every metric declares its label keys at construction. When recording,
//! label pairs whose key was not declared are ignored and declared keys
//! that are missing record as the empty string, so a metric's series are
//! always keyed by exactly its declared label set.
//!
//! Storage and the text exposition format come from the `prometheus`
//! crate; reads go through [`Collector::collect`] so looking a series up
//! never creates it.

use std::sync::Arc;

use parking_lot::RwLock;
use prometheus::core::Collector;
use prometheus::proto::{Metric as Series, MetricFamily};
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

use claimgate_types::error::{GatewayError, Result};

/// Label pairs supplied at record time.
pub type Labels<'a> = &'a [(&'a str, &'a str)];

#[derive(Debug, Clone)]
struct LabelSet {
    keys: Vec<String>,
}

impl LabelSet {
    fn new(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn names(&self) -> Vec<&str> {
        self.keys.iter().map(String::as_str).collect()
    }

    /// Values in declared-key order. Later duplicates win.
    fn values(&self, labels: Labels<'_>) -> Vec<String> {
        self.keys
            .iter()
            .map(|k| {
                labels
                    .iter()
                    .rev()
                    .find(|(name, _)| *name == k.as_str())
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_default()
            })
            .collect()
    }

    fn find(&self, families: &[MetricFamily], labels: Labels<'_>) -> Option<Series> {
        let values = self.values(labels);
        families
            .iter()
            .flat_map(|mf| mf.get_metric().iter())
            .find(|series| {
                self.keys.iter().zip(&values).all(|(k, v)| {
                    series
                        .get_label()
                        .iter()
                        .any(|lp| lp.get_name() == k.as_str() && lp.get_value() == v.as_str())
                })
            })
            .cloned()
    }
}

fn as_refs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

// ── Counter ──────────────────────────────────────────────────────────────

/// Monotonic counter.
#[derive(Clone)]
pub struct Counter {
    name: String,
    labels: LabelSet,
    inner: CounterVec,
}

impl Counter {
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        label_keys: &[&str],
    ) -> prometheus::Result<Self> {
        let name = name.into();
        let labels = LabelSet::new(label_keys);
        let inner = CounterVec::new(Opts::new(name.clone(), help), &labels.names())?;
        Ok(Self {
            name,
            labels,
            inner,
        })
    }

    pub fn inc(&self, labels: Labels<'_>) {
        self.inc_by(labels, 1.0);
    }

    /// Add `delta`. Negative or non-finite deltas are ignored.
    pub fn inc_by(&self, labels: Labels<'_>, delta: f64) {
        if !delta.is_finite() || delta < 0.0 {
            return;
        }
        let values = self.labels.values(labels);
        self.inner.with_label_values(&as_refs(&values)).inc_by(delta);
    }

    pub fn get(&self, labels: Labels<'_>) -> f64 {
        self.labels
            .find(&self.inner.collect(), labels)
            .map(|s| s.get_counter().get_value())
            .unwrap_or(0.0)
    }

    /// Sum across every series.
    pub fn total(&self) -> f64 {
        self.inner
            .collect()
            .iter()
            .flat_map(|mf| mf.get_metric().iter())
            .map(|s| s.get_counter().get_value())
            .sum()
    }

    pub fn reset(&self) {
        self.inner.reset();
    }
}

// ── Gauge ────────────────────────────────────────────────────────────────

/// Value that can go up and down.
#[derive(Clone)]
pub struct Gauge {
    name: String,
    labels: LabelSet,
    inner: GaugeVec,
}

impl Gauge {
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        label_keys: &[&str],
    ) -> prometheus::Result<Self> {
        let name = name.into();
        let labels = LabelSet::new(label_keys);
        let inner = GaugeVec::new(Opts::new(name.clone(), help), &labels.names())?;
        Ok(Self {
            name,
            labels,
            inner,
        })
    }

    pub fn set(&self, labels: Labels<'_>, value: f64) {
        let values = self.labels.values(labels);
        self.inner.with_label_values(&as_refs(&values)).set(value);
    }

    pub fn inc(&self, labels: Labels<'_>) {
        self.add(labels, 1.0);
    }

    pub fn dec(&self, labels: Labels<'_>) {
        self.add(labels, -1.0);
    }

    pub fn add(&self, labels: Labels<'_>, delta: f64) {
        let values = self.labels.values(labels);
        self.inner.with_label_values(&as_refs(&values)).add(delta);
    }

    pub fn get(&self, labels: Labels<'_>) -> f64 {
        self.labels
            .find(&self.inner.collect(), labels)
            .map(|s| s.get_gauge().get_value())
            .unwrap_or(0.0)
    }

    pub fn reset(&self) {
        self.inner.reset();
    }
}

// ── Histogram ────────────────────────────────────────────────────────────

/// Bucketed distribution.
#[derive(Clone)]
pub struct Histogram {
    name: String,
    labels: LabelSet,
    bounds: Vec<f64>,
    inner: HistogramVec,
}

impl Histogram {
    /// Bucket bounds are sorted and de-duplicated; non-finite bounds are
    /// dropped since `+Inf` is always implied. No finite bound at all
    /// falls back to the Prometheus default buckets.
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        label_keys: &[&str],
        bounds: &[f64],
    ) -> prometheus::Result<Self> {
        let mut bounds: Vec<f64> = bounds.iter().copied().filter(|b| b.is_finite()).collect();
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        if bounds.is_empty() {
            bounds = prometheus::DEFAULT_BUCKETS.to_vec();
        }

        let name = name.into();
        let labels = LabelSet::new(label_keys);
        let opts = HistogramOpts::new(name.clone(), help).buckets(bounds.clone());
        let inner = HistogramVec::new(opts, &labels.names())?;
        Ok(Self {
            name,
            labels,
            bounds,
            inner,
        })
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    pub fn observe(&self, labels: Labels<'_>, value: f64) {
        if value.is_nan() {
            return;
        }
        let values = self.labels.values(labels);
        self.inner.with_label_values(&as_refs(&values)).observe(value);
    }

    fn series(&self, labels: Labels<'_>) -> Option<Series> {
        self.labels.find(&self.inner.collect(), labels)
    }

    pub fn count(&self, labels: Labels<'_>) -> u64 {
        self.series(labels)
            .map(|s| s.get_histogram().get_sample_count())
            .unwrap_or(0)
    }

    pub fn sum(&self, labels: Labels<'_>) -> f64 {
        self.series(labels)
            .map(|s| s.get_histogram().get_sample_sum())
            .unwrap_or(0.0)
    }

    /// Estimated percentile (`0..=100`) of one series.
    ///
    /// Returns the upper bound of the first bucket whose cumulative count
    /// reaches the target rank. Observations above the largest bound report
    /// that bound. `None` when the series has no observations.
    pub fn percentile(&self, labels: Labels<'_>, percentile: f64) -> Option<f64> {
        let series = self.series(labels)?;
        let h = series.get_histogram();
        let count = h.get_sample_count();
        if count == 0 {
            return None;
        }
        let rank = ((percentile.clamp(0.0, 100.0) / 100.0) * count as f64).ceil() as u64;
        let rank = rank.max(1);
        h.get_bucket()
            .iter()
            .find(|b| b.get_cumulative_count() >= rank)
            .map(|b| b.get_upper_bound())
            .or_else(|| self.bounds.last().copied())
    }

    pub fn reset(&self) {
        self.inner.reset();
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Metric {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Histogram(Arc<Histogram>),
}

impl Metric {
    fn name(&self) -> &str {
        match self {
            Self::Counter(m) => &m.name,
            Self::Gauge(m) => &m.name,
            Self::Histogram(m) => &m.name,
        }
    }

    fn collector(&self) -> Box<dyn Collector> {
        match self {
            Self::Counter(m) => Box::new(m.inner.clone()),
            Self::Gauge(m) => Box::new(m.inner.clone()),
            Self::Histogram(m) => Box::new(m.inner.clone()),
        }
    }

    fn reset(&self) {
        match self {
            Self::Counter(m) => m.reset(),
            Self::Gauge(m) => m.reset(),
            Self::Histogram(m) => m.reset(),
        }
    }
}

/// Owns a set of metrics and renders them together.
///
/// Registering a name twice returns the metric already registered under
/// that name when the kind matches, and replaces it otherwise.
#[derive(Default)]
pub struct MetricsRegistry {
    registry: Registry,
    metrics: RwLock<Vec<Metric>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_counter(
        &self,
        name: &str,
        help: &str,
        label_keys: &[&str],
    ) -> prometheus::Result<Arc<Counter>> {
        let mut metrics = self.metrics.write();
        if let Some(Metric::Counter(existing)) = metrics.iter().find(|m| m.name() == name) {
            return Ok(existing.clone());
        }
        let counter = Arc::new(Counter::new(name, help, label_keys)?);
        self.insert(&mut metrics, Metric::Counter(counter.clone()))?;
        Ok(counter)
    }

    pub fn register_gauge(
        &self,
        name: &str,
        help: &str,
        label_keys: &[&str],
    ) -> prometheus::Result<Arc<Gauge>> {
        let mut metrics = self.metrics.write();
        if let Some(Metric::Gauge(existing)) = metrics.iter().find(|m| m.name() == name) {
            return Ok(existing.clone());
        }
        let gauge = Arc::new(Gauge::new(name, help, label_keys)?);
        self.insert(&mut metrics, Metric::Gauge(gauge.clone()))?;
        Ok(gauge)
    }

    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        label_keys: &[&str],
        bounds: &[f64],
    ) -> prometheus::Result<Arc<Histogram>> {
        let mut metrics = self.metrics.write();
        if let Some(Metric::Histogram(existing)) = metrics.iter().find(|m| m.name() == name) {
            return Ok(existing.clone());
        }
        let histogram = Arc::new(Histogram::new(name, help, label_keys, bounds)?);
        self.insert(&mut metrics, Metric::Histogram(histogram.clone()))?;
        Ok(histogram)
    }

    fn insert(&self, metrics: &mut Vec<Metric>, metric: Metric) -> prometheus::Result<()> {
        if let Some(pos) = metrics.iter().position(|m| m.name() == metric.name()) {
            let old = metrics.remove(pos);
            self.registry.unregister(old.collector())?;
        }
        self.registry.register(metric.collector())?;
        metrics.push(metric);
        Ok(())
    }

    /// Registered metric names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.metrics.read().iter().map(|m| m.name().to_string()).collect()
    }

    /// Clear every series of every metric. Registrations survive.
    pub fn reset(&self) {
        for metric in self.metrics.read().iter() {
            metric.reset();
        }
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn export(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

// ── Gateway metric set ───────────────────────────────────────────────────

/// The metrics the gateway and pipeline report into.
pub struct GatewayMetrics {
    registry: MetricsRegistry,
    /// `route`, `outcome` (`allow`, `modify`, `rejected`, `not_found`, `error`).
    pub requests_total: Arc<Counter>,
    /// `route`.
    pub request_duration_ms: Arc<Histogram>,
    /// `transform`.
    pub transform_duration_ms: Arc<Histogram>,
    /// `transform`.
    pub transform_errors_total: Arc<Counter>,
    /// `scope` (`burst`, `key`).
    pub rate_limit_rejections_total: Arc<Counter>,
    pub idempotency_replays_total: Arc<Counter>,
    /// `service`.
    pub degraded_dependency_total: Arc<Counter>,
    pub inflight_requests: Arc<Gauge>,
}

impl GatewayMetrics {
    /// Register the gateway metric set. Fails only on bucket layouts the
    /// Prometheus registry refuses.
    pub fn new(latency_buckets_ms: &[f64]) -> Result<Self> {
        Self::build(latency_buckets_ms).map_err(|e| GatewayError::ConfigInvalid {
            reason: format!("metrics registry: {e}"),
        })
    }

    fn build(latency_buckets_ms: &[f64]) -> prometheus::Result<Self> {
        let registry = MetricsRegistry::new();
        Ok(Self {
            requests_total: registry.register_counter(
                "claimgate_requests_total",
                "Requests handled by the gateway.",
                &["route", "outcome"],
            )?,
            request_duration_ms: registry.register_histogram(
                "claimgate_request_duration_ms",
                "End-to-end request latency in milliseconds.",
                &["route"],
                latency_buckets_ms,
            )?,
            transform_duration_ms: registry.register_histogram(
                "claimgate_transform_duration_ms",
                "Per-transform execution time in milliseconds.",
                &["transform"],
                latency_buckets_ms,
            )?,
            transform_errors_total: registry.register_counter(
                "claimgate_transform_errors_total",
                "Transform invocations that raised an error.",
                &["transform"],
            )?,
            rate_limit_rejections_total: registry.register_counter(
                "claimgate_rate_limit_rejections_total",
                "Requests rejected by admission control.",
                &["scope"],
            )?,
            idempotency_replays_total: registry.register_counter(
                "claimgate_idempotency_replays_total",
                "Responses served from the idempotency cache.",
                &[],
            )?,
            degraded_dependency_total: registry.register_counter(
                "claimgate_degraded_dependency_total",
                "Transform runs that found an external dependency unavailable.",
                &["service"],
            )?,
            inflight_requests: registry.register_gauge(
                "claimgate_inflight_requests",
                "Requests currently inside the gateway.",
                &[],
            )?,
            registry,
        })
    }

    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    pub fn export(&self) -> prometheus::Result<String> {
        self.registry.export()
    }

    pub fn reset(&self) {
        self.registry.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_ignores_undeclared_labels() {
        let c = Counter::new("hits", "h", &["route"]).unwrap();
        c.inc(&[("route", "/a"), ("user", "alice")]);
        c.inc(&[("route", "/a")]);
        c.inc_by(&[("route", "/b")], 3.0);
        assert_eq!(c.get(&[("route", "/a")]), 2.0);
        assert_eq!(c.get(&[("route", "/a"), ("user", "bob")]), 2.0);
        assert_eq!(c.get(&[("route", "/b")]), 3.0);
        assert_eq!(c.get(&[("route", "/never")]), 0.0);
        assert_eq!(c.total(), 5.0);
    }

    #[test]
    fn counter_is_monotonic() {
        let c = Counter::new("hits", "h", &[]).unwrap();
        c.inc_by(&[], -4.0);
        c.inc_by(&[], f64::NAN);
        assert_eq!(c.get(&[]), 0.0);
    }

    #[test]
    fn gauge_moves_both_ways() {
        let g = Gauge::new("depth", "d", &["queue"]).unwrap();
        g.set(&[("queue", "q")], 5.0);
        g.inc(&[("queue", "q")]);
        g.dec(&[("queue", "q")]);
        g.dec(&[("queue", "q")]);
        assert_eq!(g.get(&[("queue", "q")]), 4.0);
    }

    #[test]
    fn histogram_percentile_uses_bucket_bounds() {
        let h = Histogram::new("lat", "l", &[], &[10.0, 50.0, 100.0]).unwrap();
        for v in [1.0, 2.0, 3.0, 40.0, 45.0, 90.0, 95.0, 99.0, 99.5, 500.0] {
            h.observe(&[], v);
        }
        assert_eq!(h.count(&[]), 10);
        assert_eq!(h.sum(&[]), 974.5);
        assert_eq!(h.percentile(&[], 30.0), Some(10.0));
        assert_eq!(h.percentile(&[], 50.0), Some(50.0));
        assert_eq!(h.percentile(&[], 90.0), Some(100.0));
        // The overflow bucket reports the largest finite bound.
        assert_eq!(h.percentile(&[], 100.0), Some(100.0));
        assert_eq!(h.percentile(&[("x", "y")], 50.0), Some(50.0));

        let empty = Histogram::new("e", "e", &["route"], &[1.0]).unwrap();
        assert_eq!(empty.percentile(&[("route", "/")], 50.0), None);
    }

    #[test]
    fn histogram_bounds_are_normalized() {
        let h = Histogram::new("lat", "l", &[], &[50.0, 10.0, 10.0, f64::INFINITY]).unwrap();
        assert_eq!(h.bounds(), &[10.0, 50.0]);
        let fallback = Histogram::new("lat", "l", &[], &[f64::NAN]).unwrap();
        assert_eq!(fallback.bounds(), prometheus::DEFAULT_BUCKETS);
    }

    #[test]
    fn export_text_format() {
        let registry = MetricsRegistry::new();
        let c = registry.register_counter("req_total", "Requests.", &["route"]).unwrap();
        let h = registry
            .register_histogram("lat_ms", "Latency.", &["route"], &[10.0, 100.0])
            .unwrap();
        c.inc(&[("route", "/v1/\"x\"")]);
        h.observe(&[("route", "/v1")], 5.0);
        h.observe(&[("route", "/v1")], 50.0);
        h.observe(&[("route", "/v1")], 500.0);

        let text = registry.export().unwrap();
        assert!(text.contains("# TYPE req_total counter"));
        assert!(text.contains("req_total{route=\"/v1/\\\"x\\\"\"} 1"));
        assert!(text.contains("# TYPE lat_ms histogram"));
        assert!(text.contains("lat_ms_bucket{route=\"/v1\",le=\"10\"} 1"));
        assert!(text.contains("lat_ms_bucket{route=\"/v1\",le=\"100\"} 2"));
        assert!(text.contains("lat_ms_bucket{route=\"/v1\",le=\"+Inf\"} 3"));
        assert!(text.contains("lat_ms_sum{route=\"/v1\"} 555"));
        assert!(text.contains("lat_ms_count{route=\"/v1\"} 3"));
    }

    #[test]
    fn reads_do_not_create_series() {
        let registry = MetricsRegistry::new();
        let c = registry.register_counter("lookups", "l", &["route"]).unwrap();
        assert_eq!(c.get(&[("route", "/ghost")]), 0.0);
        assert!(!registry.export().unwrap().contains("/ghost"));
    }

    #[test]
    fn registering_twice_shares_the_metric() {
        let registry = MetricsRegistry::new();
        let a = registry.register_counter("n", "n", &[]).unwrap();
        let b = registry.register_counter("n", "n", &[]).unwrap();
        a.inc(&[]);
        assert_eq!(b.get(&[]), 1.0);
        assert_eq!(registry.names(), vec!["n"]);
    }

    #[test]
    fn registering_another_kind_replaces_the_metric() {
        let registry = MetricsRegistry::new();
        registry.register_counter("n", "n", &[]).unwrap();
        let g = registry.register_gauge("n", "n", &[]).unwrap();
        g.set(&[], 7.0);
        assert_eq!(registry.names(), vec!["n"]);
        assert!(registry.export().unwrap().contains("# TYPE n gauge"));
    }

    #[test]
    fn reset_clears_series_but_keeps_registrations() {
        let metrics = GatewayMetrics::new(&[10.0, 100.0]).unwrap();
        metrics
            .requests_total
            .inc(&[("route", "/v1/check"), ("outcome", "allow")]);
        metrics.idempotency_replays_total.inc(&[]);
        metrics.reset();
        assert_eq!(metrics.requests_total.total(), 0.0);
        assert_eq!(metrics.idempotency_replays_total.get(&[]), 0.0);
        assert_eq!(metrics.registry().names().len(), 8);

        metrics
            .requests_total
            .inc(&[("route", "/v1/check"), ("outcome", "modify")]);
        assert_eq!(metrics.requests_total.total(), 1.0);
    }
}
