//! # Metrics Sink
//!
//! The observability contract the executor emits into: counters for
//! request totals, histograms for latency, gauges for health scores. The
//! actual backend (Prometheus scrape, push pipeline, ...) lives behind the
//! [`MetricsSink`] trait; [`InMemoryMetrics`] is the default in-process
//! implementation and [`NoopMetrics`] discards everything for tests.
//!
//! Series emitted by the gateway:
//!
//! - `requests_total{provider, model, status}`: counter
//! - `latency_ms{provider, model}`: histogram
//! - `health_score{provider, model}`: gauge, the pair's success rate

use dashmap::DashMap;
use std::sync::Mutex;

/// Bounded sample count kept per histogram series.
const HISTOGRAM_WINDOW: usize = 1_000;

/// Sink for gateway telemetry.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)], value: u64);
    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64);
    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64);

    /// Count one finished request.
    fn record_request(&self, provider: &str, model: &str, status: &str) {
        self.increment_counter(
            "requests_total",
            &[("provider", provider), ("model", model), ("status", status)],
            1,
        );
    }

    /// Observe one request's wall-clock latency.
    fn record_latency(&self, provider: &str, model: &str, latency_ms: u64) {
        self.observe_histogram(
            "latency_ms",
            &[("provider", provider), ("model", model)],
            latency_ms as f64,
        );
    }

    /// Publish the current health score for a pair.
    fn record_health_score(&self, provider: &str, model: &str, score: f64) {
        self.set_gauge(
            "health_score",
            &[("provider", provider), ("model", model)],
            score,
        );
    }
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut labels: Vec<String> = labels.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
    labels.sort();
    format!("{name}{{{}}}", labels.join(","))
}

/// In-process metrics store.
#[derive(Default)]
pub struct InMemoryMetrics {
    counters: DashMap<String, u64>,
    histograms: DashMap<String, Mutex<Vec<f64>>>,
    gauges: DashMap<String, f64>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&series_key(name, labels))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// (sample count, mean) of a histogram series.
    pub fn histogram_stats(&self, name: &str, labels: &[(&str, &str)]) -> Option<(usize, f64)> {
        self.histograms
            .get(&series_key(name, labels))
            .map(|samples| {
                let samples = samples.lock().unwrap();
                let count = samples.len();
                let mean = if count == 0 {
                    0.0
                } else {
                    samples.iter().sum::<f64>() / count as f64
                };
                (count, mean)
            })
    }

    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.gauges.get(&series_key(name, labels)).map(|v| *v)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)], value: u64) {
        *self.counters.entry(series_key(name, labels)).or_insert(0) += value;
    }

    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let entry = self
            .histograms
            .entry(series_key(name, labels))
            .or_insert_with(|| Mutex::new(Vec::new()));
        let mut samples = entry.lock().unwrap();
        if samples.len() >= HISTOGRAM_WINDOW {
            samples.remove(0);
        }
        samples.push(value);
    }

    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.gauges.insert(series_key(name, labels), value);
    }
}

/// Sink that discards everything.
#[derive(Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)], _value: u64) {}
    fn observe_histogram(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
    fn set_gauge(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label_set() {
        let metrics = InMemoryMetrics::new();
        metrics.record_request("fireworks", "llama-3.3-70b", "completed");
        metrics.record_request("fireworks", "llama-3.3-70b", "completed");
        metrics.record_request("openrouter", "llama-3.3-70b", "failed");

        let labels = [
            ("provider", "fireworks"),
            ("model", "llama-3.3-70b"),
            ("status", "completed"),
        ];
        assert_eq!(metrics.counter_value("requests_total", &labels), 2);
        let other = [
            ("provider", "openrouter"),
            ("model", "llama-3.3-70b"),
            ("status", "failed"),
        ];
        assert_eq!(metrics.counter_value("requests_total", &other), 1);
    }

    #[test]
    fn label_order_does_not_split_series() {
        let metrics = InMemoryMetrics::new();
        metrics.increment_counter("c", &[("a", "1"), ("b", "2")], 1);
        metrics.increment_counter("c", &[("b", "2"), ("a", "1")], 1);
        assert_eq!(metrics.counter_value("c", &[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn histograms_track_count_and_mean() {
        let metrics = InMemoryMetrics::new();
        metrics.record_latency("fireworks", "m", 100);
        metrics.record_latency("fireworks", "m", 300);
        let (count, mean) = metrics
            .histogram_stats("latency_ms", &[("provider", "fireworks"), ("model", "m")])
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(mean, 200.0);
    }

    #[test]
    fn gauges_keep_the_latest_value() {
        let metrics = InMemoryMetrics::new();
        metrics.record_health_score("fireworks", "m", 1.0);
        metrics.record_health_score("fireworks", "m", 0.5);
        assert_eq!(
            metrics.gauge_value("health_score", &[("provider", "fireworks"), ("model", "m")]),
            Some(0.5)
        );
    }
}
