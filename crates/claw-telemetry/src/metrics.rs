use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// Point-in-time value of one metric series. Histograms report their p50.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    pub metric_type: MetricType,
}

struct Counter(AtomicU64);

impl Counter {
    fn new() -> Self {
        Self(AtomicU64::new(0))
    }
    fn increment(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// f64 stored as bits so it can be updated with CAS.
struct Gauge(AtomicU64);

impl Gauge {
    fn new() -> Self {
        Self(AtomicU64::new(0f64.to_bits()))
    }
    fn set(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
    fn increment(&self, delta: f64) {
        let _ = self.0.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some((f64::from_bits(bits) + delta).to_bits())
        });
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Keeps every observation for exact percentiles. Fine for per-process
/// volumes of tool calls.
struct Histogram(Mutex<Vec<f64>>);

impl Histogram {
    fn new() -> Self {
        Self(Mutex::new(Vec::new()))
    }
    fn observe(&self, value: f64) {
        self.0.lock().push(value);
    }
    fn summary(&self) -> HistogramSummary {
        let mut obs = self.0.lock().clone();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.total_cmp(b));
        let count = obs.len();
        let at = |q: f64| obs[((count as f64 * q) as usize).min(count - 1)];
        HistogramSummary {
            count: count as u64,
            sum: obs.iter().sum(),
            p50: at(0.5),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Metric name plus labels sorted by key, so label order never splits a series.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            name: name.to_string(),
            labels: sorted,
        }
    }

    fn label_map(&self) -> BTreeMap<String, String> {
        self.labels.iter().cloned().collect()
    }
}

fn with_series<T>(
    map: &RwLock<HashMap<MetricKey, T>>,
    key: MetricKey,
    make: fn() -> T,
    apply: impl FnOnce(&T),
) {
    if let Some(existing) = map.read().get(&key) {
        apply(existing);
        return;
    }
    let mut map = map.write();
    apply(map.entry(key).or_insert_with(make));
}

/// Thread-safe in-memory metrics recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, Counter>>,
    gauges: RwLock<HashMap<MetricKey, Gauge>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        with_series(&self.counters, MetricKey::new(name, labels), Counter::new, |c| {
            c.increment(n)
        });
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        with_series(&self.gauges, MetricKey::new(name, labels), Gauge::new, |g| g.set(value));
    }

    pub fn gauge_inc(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        with_series(&self.gauges, MetricKey::new(name, labels), Gauge::new, |g| {
            g.increment(delta)
        });
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        with_series(&self.histograms, MetricKey::new(name, labels), Histogram::new, |h| {
            h.observe(value)
        });
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters.read().get(&key).map_or(0, Counter::get)
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = MetricKey::new(name, labels);
        self.gauges.read().get(&key).map_or(0.0, Gauge::get)
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        self.histograms
            .read()
            .get(&key)
            .map(Histogram::summary)
            .unwrap_or_default()
    }

    /// Current value of every series, sorted by name.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let now = Utc::now();
        let sample = |key: &MetricKey, value: f64, metric_type: MetricType| MetricSample {
            timestamp: now,
            name: key.name.clone(),
            labels: key.label_map(),
            value,
            metric_type,
        };

        let mut samples: Vec<MetricSample> = Vec::new();
        for (key, c) in self.counters.read().iter() {
            samples.push(sample(key, c.get() as f64, MetricType::Counter));
        }
        for (key, g) in self.gauges.read().iter() {
            samples.push(sample(key, g.get(), MetricType::Gauge));
        }
        for (key, h) in self.histograms.read().iter() {
            samples.push(sample(key, h.summary().p50, MetricType::Histogram));
        }
        samples.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        samples
    }
}
