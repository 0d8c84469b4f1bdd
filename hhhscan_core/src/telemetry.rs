//! Minimal run-time metrics sink.
//!
//! Engines record through the `metrics` facade; this recorder folds every
//! counter and gauge into a process-wide map so the CLI can print a summary
//! at exit. Histograms keep a running count and sum.

use dashmap::DashMap;
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use once_cell::sync::Lazy;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
    Histogram { count: u64, sum: f64 },
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Counter(n) => n as f64,
            MetricValue::Gauge(v) => v,
            MetricValue::Histogram { sum, .. } => sum,
        }
    }
}

static VALUES: Lazy<DashMap<String, MetricValue>> = Lazy::new(DashMap::new);

/// Aggregating recorder.
struct MapRecorder;

#[derive(Clone)]
struct MapCounter {
    name: String,
}
#[derive(Clone)]
struct MapGauge {
    name: String,
}
#[derive(Clone)]
struct MapHistogram {
    name: String,
}

impl Recorder for MapRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let name = key.name().to_string();
        VALUES.entry(name.clone()).or_insert(MetricValue::Counter(0));
        Counter::from_arc(Arc::new(MapCounter { name }))
    }
    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        let name = key.name().to_string();
        VALUES.entry(name.clone()).or_insert(MetricValue::Gauge(0.0));
        Gauge::from_arc(Arc::new(MapGauge { name }))
    }
    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        let name = key.name().to_string();
        VALUES
            .entry(name.clone())
            .or_insert(MetricValue::Histogram { count: 0, sum: 0.0 });
        Histogram::from_arc(Arc::new(MapHistogram { name }))
    }
}

impl metrics::CounterFn for MapCounter {
    fn increment(&self, value: u64) {
        let mut entry = VALUES.entry(self.name.clone()).or_insert(MetricValue::Counter(0));
        if let MetricValue::Counter(n) = entry.value_mut() {
            *n = n.saturating_add(value);
        }
    }
    fn absolute(&self, value: u64) {
        let mut entry = VALUES.entry(self.name.clone()).or_insert(MetricValue::Counter(0));
        if let MetricValue::Counter(n) = entry.value_mut() {
            *n = (*n).max(value);
        }
    }
}

impl MapGauge {
    fn update(&self, f: impl FnOnce(f64) -> f64) {
        let mut entry = VALUES.entry(self.name.clone()).or_insert(MetricValue::Gauge(0.0));
        if let MetricValue::Gauge(v) = entry.value_mut() {
            *v = f(*v);
        }
    }
}

impl metrics::GaugeFn for MapGauge {
    fn set(&self, value: f64) {
        self.update(|_| value)
    }
    fn increment(&self, value: f64) {
        self.update(|v| v + value)
    }
    fn decrement(&self, value: f64) {
        self.update(|v| v - value)
    }
}

impl metrics::HistogramFn for MapHistogram {
    fn record(&self, value: f64) {
        let mut entry = VALUES
            .entry(self.name.clone())
            .or_insert(MetricValue::Histogram { count: 0, sum: 0.0 });
        if let MetricValue::Histogram { count, sum } = entry.value_mut() {
            *count += 1;
            *sum += value;
        }
    }
}

/// Install exactly **once**; later calls are no-ops.
pub fn init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = metrics::set_global_recorder(MapRecorder);
    });
}

/// Current value of one metric.
pub fn value(name: &str) -> Option<MetricValue> {
    VALUES.get(name).map(|v| *v.value())
}

/// All metrics seen so far, sorted by name.
pub fn snapshot() -> Vec<(String, MetricValue)> {
    let mut all: Vec<(String, MetricValue)> = VALUES
        .iter()
        .map(|e| (e.key().clone(), *e.value()))
        .collect();
    all.sort_by(|a, b| a.0.cmp(&b.0));
    all
}
