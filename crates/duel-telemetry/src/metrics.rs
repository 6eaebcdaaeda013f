use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Type of metric.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// One metric series in a [`MetricsSnapshot`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<HistogramSummary>,
}

/// Point-in-time view of every series, sorted by name then labels.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub metrics: Vec<MetricSample>,
}

/// In-memory counter. Monotonically increasing.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// In-memory gauge. Can go up or down.
struct Gauge {
    // f64 bits, so the value can be swapped atomically
    value: AtomicI64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }
    fn set(&self, v: f64) {
        self.value.store(v.to_bits() as i64, Ordering::Relaxed);
    }
    fn increment(&self, delta: f64) {
        loop {
            let current = self.value.load(Ordering::Relaxed);
            let new_f = f64::from_bits(current as u64) + delta;
            if self
                .value
                .compare_exchange_weak(
                    current,
                    new_f.to_bits() as i64,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed) as u64)
    }
}

/// Keeps a bounded window of recent observations for percentiles.
struct Histogram {
    observations: Mutex<VecDeque<f64>>,
    count: AtomicU64,
}

const HISTOGRAM_WINDOW: usize = 4096;

impl Histogram {
    fn new() -> Self {
        Self {
            observations: Mutex::new(VecDeque::with_capacity(HISTOGRAM_WINDOW)),
            count: AtomicU64::new(0),
        }
    }
    fn observe(&self, value: f64) {
        let mut obs = self.observations.lock();
        if obs.len() >= HISTOGRAM_WINDOW {
            obs.pop_front();
        }
        obs.push_back(value);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
    fn summary(&self) -> HistogramSummary {
        let mut obs: Vec<f64> = self.observations.lock().iter().copied().collect();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = obs.len();
        HistogramSummary {
            count: self.count.load(Ordering::Relaxed),
            sum: obs.iter().sum(),
            p50: obs[n / 2],
            p95: obs[((n as f64 * 0.95) as usize).min(n - 1)],
            p99: obs[((n as f64 * 0.99) as usize).min(n - 1)],
        }
    }
}

/// Summary statistics from a histogram. `sum` and the percentiles cover the
/// retained window; `count` is lifetime.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Metric key: name + labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: impl Into<String>, labels: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            name: name.into(),
            labels: sorted,
        }
    }

    fn label_map(&self) -> BTreeMap<String, String> {
        self.labels.iter().cloned().collect()
    }
}

/// Thread-safe in-memory metrics recorder.
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, Counter>>,
    gauges: RwLock<HashMap<MetricKey, Gauge>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = MetricKey::new(name, labels);
        let counters = self.counters.read();
        if let Some(c) = counters.get(&key) {
            c.increment(n);
            return;
        }
        drop(counters);
        let mut counters = self.counters.write();
        counters.entry(key).or_insert_with(Counter::new).increment(n);
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(&key) {
            g.set(value);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        gauges.entry(key).or_insert_with(Gauge::new).set(value);
    }

    /// Increment/decrement a gauge by delta.
    pub fn gauge_inc(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        let key = MetricKey::new(name, labels);
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(&key) {
            g.increment(delta);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        gauges.entry(key).or_insert_with(Gauge::new).increment(delta);
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        let histograms = self.histograms.read();
        if let Some(h) = histograms.get(&key) {
            h.observe(value);
            return;
        }
        drop(histograms);
        let mut histograms = self.histograms.write();
        histograms.entry(key).or_insert_with(Histogram::new).observe(value);
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        self.histograms
            .read()
            .get(&key)
            .map(|h| h.summary())
            .unwrap_or_default()
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters.read().get(&key).map_or(0, |c| c.get())
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = MetricKey::new(name, labels);
        self.gauges.read().get(&key).map_or(0.0, |g| g.get())
    }

    /// Current value of every series. Histograms report p50 as the value
    /// and carry the full summary.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut metrics = Vec::new();

        for (key, counter) in self.counters.read().iter() {
            metrics.push((
                key.clone(),
                MetricType::Counter,
                counter.get() as f64,
                None,
            ));
        }
        for (key, gauge) in self.gauges.read().iter() {
            metrics.push((key.clone(), MetricType::Gauge, gauge.get(), None));
        }
        for (key, histogram) in self.histograms.read().iter() {
            let summary = histogram.summary();
            metrics.push((key.clone(), MetricType::Histogram, summary.p50, Some(summary)));
        }

        metrics.sort_by(|a, b| a.0.cmp(&b.0));

        MetricsSnapshot {
            metrics: metrics
                .into_iter()
                .map(|(key, metric_type, value, summary)| MetricSample {
                    labels: key.label_map(),
                    name: key.name,
                    metric_type,
                    value,
                    summary,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_basic() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("sessions_ended", &[("outcome", "draw_timeout")], 1);
        recorder.counter_inc("sessions_ended", &[("outcome", "draw_timeout")], 1);
        recorder.counter_inc("sessions_ended", &[("outcome", "player_a_win")], 1);

        assert_eq!(recorder.counter_get("sessions_ended", &[("outcome", "draw_timeout")]), 2);
        assert_eq!(recorder.counter_get("sessions_ended", &[("outcome", "player_a_win")]), 1);
        assert_eq!(recorder.counter_get("sessions_ended", &[("outcome", "abandoned")]), 0);
    }

    #[test]
    fn gauge_set_and_increment() {
        let recorder = MetricsRecorder::new();
        recorder.gauge_set("connections_active", &[], 10.0);
        assert_eq!(recorder.gauge_get("connections_active", &[]), 10.0);

        recorder.gauge_inc("connections_active", &[], 5.0);
        assert_eq!(recorder.gauge_get("connections_active", &[]), 15.0);

        recorder.gauge_inc("connections_active", &[], -3.0);
        assert_eq!(recorder.gauge_get("connections_active", &[]), 12.0);
    }

    #[test]
    fn histogram_observations() {
        let recorder = MetricsRecorder::new();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0] {
            recorder.histogram_observe("judge_latency_ms", &[], v);
        }

        let summary = recorder.histogram_summary("judge_latency_ms", &[]);
        assert_eq!(summary.count, 10);
        assert_eq!(summary.sum, 550.0);
        assert!(summary.p50 >= 50.0 && summary.p50 <= 60.0);
        assert!(summary.p95 >= 90.0);
    }

    #[test]
    fn histogram_empty() {
        let recorder = MetricsRecorder::new();
        assert_eq!(recorder.histogram_summary("nonexistent", &[]), HistogramSummary::default());
    }

    #[test]
    fn histogram_window_is_bounded() {
        let recorder = MetricsRecorder::new();
        for i in 0..(HISTOGRAM_WINDOW + 10) {
            recorder.histogram_observe("h", &[], i as f64);
        }
        let summary = recorder.histogram_summary("h", &[]);
        assert_eq!(summary.count, (HISTOGRAM_WINDOW + 10) as u64);
        assert!(summary.p50 >= 10.0);
        // The ten oldest observations were evicted.
        let kept: f64 = (10..HISTOGRAM_WINDOW + 10).map(|i| i as f64).sum();
        assert_eq!(summary.sum, kept);
    }

    #[test]
    fn label_ordering_independent() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("test", &[("a", "1"), ("b", "2")], 1);
        recorder.counter_inc("test", &[("b", "2"), ("a", "1")], 1);
        assert_eq!(recorder.counter_get("test", &[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn snapshot_lists_every_series() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("submissions", &[], 42);
        recorder.gauge_set("connections_active", &[], 5.0);
        recorder.histogram_observe("judge_latency_ms", &[], 123.0);

        let snapshot = recorder.snapshot();
        let names: Vec<&str> = snapshot.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["connections_active", "judge_latency_ms", "submissions"]);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["metrics"][2]["value"], 42.0);
        assert_eq!(json["metrics"][2]["metric_type"], "counter");
        assert_eq!(json["metrics"][1]["summary"]["count"], 1);
        assert!(json["metrics"][0].get("labels").is_none());
    }

    #[test]
    fn concurrent_counter_increments() {
        use std::sync::Arc;
        use std::thread;

        let recorder = Arc::new(MetricsRecorder::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let r = recorder.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    r.counter_inc("concurrent.test", &[], 1);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(recorder.counter_get("concurrent.test", &[]), 10_000);
    }
}
