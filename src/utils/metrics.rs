use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Process-wide metrics collector.
///
/// Tracks provider usage, per-item outcomes, batch polling and runs per
/// strategy. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Provider calls
    inference_calls_total: AtomicUsize,
    inference_calls_success: AtomicUsize,
    inference_calls_failed: AtomicUsize,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    inference_latency_ms: RwLock<Vec<u64>>,

    // Item outcomes
    items_analyzed: AtomicUsize,
    items_skipped: DashMap<&'static str, AtomicUsize>,
    results_dropped: AtomicUsize,
    posts_dropped: AtomicUsize,

    // Runs
    runs_started: DashMap<&'static str, AtomicUsize>,
    runs_aborted: AtomicUsize,
    batch_polls: AtomicUsize,

    circuit_breaker_trips: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                inference_calls_total: AtomicUsize::new(0),
                inference_calls_success: AtomicUsize::new(0),
                inference_calls_failed: AtomicUsize::new(0),
                prompt_tokens: AtomicU64::new(0),
                completion_tokens: AtomicU64::new(0),
                inference_latency_ms: RwLock::new(Vec::new()),
                items_analyzed: AtomicUsize::new(0),
                items_skipped: DashMap::new(),
                results_dropped: AtomicUsize::new(0),
                posts_dropped: AtomicUsize::new(0),
                runs_started: DashMap::new(),
                runs_aborted: AtomicUsize::new(0),
                batch_polls: AtomicUsize::new(0),
                circuit_breaker_trips: AtomicUsize::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_inference_call(
        &self,
        success: bool,
        duration: Duration,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) {
        self.inner.inference_calls_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.inner.inference_calls_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.inference_calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.inner.completion_tokens.fetch_add(completion_tokens, Ordering::Relaxed);
        self.inner
            .inference_latency_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_item_analyzed(&self) {
        self.inner.items_analyzed.fetch_add(1, Ordering::Relaxed);
    }

    /// `kind` is an [`ItemError::kind`](crate::core::errors::ItemError::kind) label
    pub fn record_item_skipped(&self, kind: &'static str) {
        self.inner
            .items_skipped
            .entry(kind)
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result_dropped(&self) {
        self.inner.results_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_post_dropped(&self) {
        self.inner.posts_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_started(&self, strategy: &'static str) {
        self.inner
            .runs_started
            .entry(strategy)
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_aborted(&self) {
        self.inner.runs_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_poll(&self) {
        self.inner.batch_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_breaker_trip(&self) {
        self.inner.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.inner.inference_latency_ms.read();
        let latency_avg = avg(&latency);
        let latency_p50 = percentile(&latency, 0.5);
        let latency_p95 = percentile(&latency, 0.95);
        drop(latency);

        let items_skipped = counter_map(&self.inner.items_skipped);
        let runs_started = counter_map(&self.inner.runs_started);

        MetricsSnapshot {
            inference_calls_total: self.inner.inference_calls_total.load(Ordering::Relaxed),
            inference_calls_success: self.inner.inference_calls_success.load(Ordering::Relaxed),
            inference_calls_failed: self.inner.inference_calls_failed.load(Ordering::Relaxed),
            prompt_tokens: self.inner.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.inner.completion_tokens.load(Ordering::Relaxed),
            inference_latency_avg_ms: latency_avg,
            inference_latency_p50_ms: latency_p50,
            inference_latency_p95_ms: latency_p95,
            items_analyzed: self.inner.items_analyzed.load(Ordering::Relaxed),
            items_skipped,
            results_dropped: self.inner.results_dropped.load(Ordering::Relaxed),
            posts_dropped: self.inner.posts_dropped.load(Ordering::Relaxed),
            runs_started,
            runs_aborted: self.inner.runs_aborted.load(Ordering::Relaxed),
            batch_polls: self.inner.batch_polls.load(Ordering::Relaxed),
            circuit_breaker_trips: self.inner.circuit_breaker_trips.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Prometheus text exposition
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        let counters: [(&str, &str, u64); 12] = [
            ("inference_calls_total", "Total inference calls made", s.inference_calls_total as u64),
            ("inference_calls_success", "Successful inference calls", s.inference_calls_success as u64),
            ("inference_calls_failed", "Failed inference calls", s.inference_calls_failed as u64),
            ("prompt_tokens_total", "Prompt tokens consumed", s.prompt_tokens),
            ("completion_tokens_total", "Completion tokens generated", s.completion_tokens),
            ("items_analyzed_total", "Items analyzed and aggregated", s.items_analyzed as u64),
            ("results_dropped_total", "Provider results that matched no task", s.results_dropped as u64),
            ("posts_dropped_total", "Posts dropped for incomplete metadata", s.posts_dropped as u64),
            ("runs_aborted_total", "Runs aborted with an error", s.runs_aborted as u64),
            ("batch_polls_total", "Batch job status polls", s.batch_polls as u64),
            ("circuit_breaker_trips_total", "Provider circuit breaker trips", s.circuit_breaker_trips as u64),
            ("uptime_seconds", "Application uptime in seconds", s.uptime_seconds),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}\n", name, value);
        }

        let _ = writeln!(out, "# HELP inference_latency_avg_ms Average inference latency in milliseconds");
        let _ = writeln!(out, "# TYPE inference_latency_avg_ms gauge");
        let _ = writeln!(out, "inference_latency_avg_ms {}\n", s.inference_latency_avg_ms);

        let _ = writeln!(out, "# HELP items_skipped_total Items skipped, by error kind");
        let _ = writeln!(out, "# TYPE items_skipped_total counter");
        for (kind, count) in &s.items_skipped {
            let _ = writeln!(out, "items_skipped_total{{kind=\"{}\"}} {}", kind, count);
        }
        out.push('\n');

        let _ = writeln!(out, "# HELP runs_started_total Runs started, by strategy");
        let _ = writeln!(out, "# TYPE runs_started_total counter");
        for (strategy, count) in &s.runs_started {
            let _ = writeln!(out, "runs_started_total{{strategy=\"{}\"}} {}", strategy, count);
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub inference_calls_total: usize,
    pub inference_calls_success: usize,
    pub inference_calls_failed: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub inference_latency_avg_ms: u64,
    pub inference_latency_p50_ms: u64,
    pub inference_latency_p95_ms: u64,
    pub items_analyzed: usize,
    pub items_skipped: BTreeMap<String, usize>,
    pub results_dropped: usize,
    pub posts_dropped: usize,
    pub runs_started: BTreeMap<String, usize>,
    pub runs_aborted: usize,
    pub batch_polls: usize,
    pub circuit_breaker_trips: usize,
    pub uptime_seconds: u64,
}

fn counter_map(map: &DashMap<&'static str, AtomicUsize>) -> BTreeMap<String, usize> {
    map.iter()
        .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
        .collect()
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
