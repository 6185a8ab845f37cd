use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::telemetry::{MetricSample, MetricsRecorder};
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub operations: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub attempts: u64,
    pub retries: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
    pub route_counts: BTreeMap<String, u64>,
}

/// Process-local recorder that aggregates samples into counters.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    operations: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    latency_samples: AtomicU64,
    latency_total_ms: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
    route_counts: Mutex<BTreeMap<String, u64>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency_samples = self.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        MetricsSnapshot {
            operations: self.operations.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&self.status_counts).clone(),
            error_counts: lock_unpoisoned(&self.error_counts).clone(),
            route_counts: lock_unpoisoned(&self.route_counts).clone(),
        }
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn record(&self, sample: &MetricSample) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        match sample.error_code {
            Some(code) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                *lock_unpoisoned(&self.error_counts)
                    .entry(code.as_str().to_owned())
                    .or_insert(0) += 1;
            }
            None => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
        }
        let attempts = sample.attempts as u64;
        self.attempts.fetch_add(attempts, Ordering::Relaxed);
        self.retries
            .fetch_add(attempts.saturating_sub(1), Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.latency_total_ms.fetch_add(
            sample.elapsed.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
        if let Some(status) = sample.status {
            *lock_unpoisoned(&self.status_counts).entry(status).or_insert(0) += 1;
        }
        let route_key = format!("{} {}", sample.method, sample.route);
        *lock_unpoisoned(&self.route_counts)
            .entry(route_key)
            .or_insert(0) += 1;
    }
}
