//! Latency and throughput tracking shared by the admin health check and the
//! anchor worker's per-iteration timing.
//!
//! Samples are pushed onto an unbounded `flume` channel and folded by a
//! background aggregator task, the same "producers write, one task owns the
//! state" shape used for stats elsewhere in this codebase.

use portable_atomic::AtomicF64;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// A single latency observation in milliseconds, tagged with a label so one
/// aggregator can serve more than one measured operation.
#[derive(Debug, Clone)]
pub struct Sample {
    pub label: &'static str,
    pub millis: f64,
}

/// Rolling view of a single label's recent latencies.
///
/// We keep this intentionally simple (count / sum / min / max via atomics)
/// rather than a full quantile sketch: the admin surface only needs "is this
/// healthy", not a histogram export.
#[derive(Debug, Default)]
struct Rolling {
    count: AtomicU64,
    sum_millis: AtomicF64,
    max_millis: AtomicF64,
}

impl Rolling {
    fn record(&self, millis: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_millis.fetch_add(millis, Ordering::Relaxed);

        // max via CAS loop; contention here is negligible, this crate
        // doesn't see request-rate volume.
        let mut current = self.max_millis.load(Ordering::Relaxed);
        while millis > current {
            match self.max_millis.compare_exchange_weak(
                current,
                millis,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum_millis.load(Ordering::Relaxed);
        LatencySnapshot {
            count,
            mean_millis: if count == 0 { 0.0 } else { sum / count as f64 },
            max_millis: self.max_millis.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct LatencySnapshot {
    pub count: u64,
    pub mean_millis: f64,
    pub max_millis: f64,
}

/// Handle cloned into every place that wants to record a latency.
#[derive(Clone)]
pub struct MetricsRecorder {
    sender: flume::Sender<Sample>,
}

impl MetricsRecorder {
    pub fn record(&self, label: &'static str, elapsed: Duration) {
        let sample = Sample {
            label,
            millis: elapsed.as_secs_f64() * 1000.0,
        };
        // an aggregator that lagged behind would mean we're in far bigger
        // trouble than a dropped latency sample; never block the caller.
        let _ = self.sender.try_send(sample);
    }

    /// Convenience wrapper: time a future and record its latency under `label`.
    pub async fn timed<F, T>(&self, label: &'static str, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let start = tokio::time::Instant::now();
        let out = fut.await;
        self.record(label, start.elapsed());
        out
    }
}

/// Owns the aggregated state; queried by the admin surface.
pub struct MetricsRegistry {
    proxy_request: Arc<Rolling>,
    anchor_iteration: Arc<Rolling>,
    policy_read: Arc<Rolling>,
}

impl MetricsRegistry {
    /// Spawns the aggregator task and returns `(registry, recorder)`.
    ///
    /// The registry is queried (admin health / tests); the recorder is
    /// cloned into every request path that measures latency.
    pub fn spawn() -> (Arc<Self>, MetricsRecorder) {
        let (tx, rx) = flume::unbounded();

        let registry = Arc::new(Self {
            proxy_request: Arc::new(Rolling::default()),
            anchor_iteration: Arc::new(Rolling::default()),
            policy_read: Arc::new(Rolling::default()),
        });

        let registry_clone = registry.clone();
        tokio::spawn(async move {
            while let Ok(sample) = rx.recv_async().await {
                let bucket = match sample.label {
                    "proxy_request" => &registry_clone.proxy_request,
                    "anchor_iteration" => &registry_clone.anchor_iteration,
                    "policy_read" => &registry_clone.policy_read,
                    other => {
                        trace!(label = other, "dropping sample for unknown label");
                        continue;
                    }
                };
                bucket.record(sample.millis);
            }
        });

        (registry, MetricsRecorder { sender: tx })
    }

    pub fn proxy_request(&self) -> LatencySnapshot {
        self.proxy_request.snapshot()
    }

    pub fn anchor_iteration(&self) -> LatencySnapshot {
        self.anchor_iteration.snapshot()
    }

    pub fn policy_read(&self) -> LatencySnapshot {
        self.policy_read.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn records_and_aggregates() {
        let (registry, recorder) = MetricsRegistry::spawn();

        recorder.record("proxy_request", Duration::from_millis(10));
        recorder.record("proxy_request", Duration::from_millis(30));

        // give the aggregator task a turn
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snap = registry.proxy_request();
        assert_eq!(snap.count, 2);
        assert!((snap.mean_millis - 20.0).abs() < 1.0);
        assert!((snap.max_millis - 30.0).abs() < 0.5);
    }

    #[tokio::test]
    async fn unknown_label_is_ignored_not_fatal() {
        let (registry, recorder) = MetricsRegistry::spawn();
        recorder.record("something_else", Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.proxy_request().count, 0);
    }

    #[tokio::test]
    async fn timed_records_and_returns_value() {
        let (registry, recorder) = MetricsRegistry::spawn();

        let out = recorder
            .timed("policy_read", async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                42
            })
            .await;

        assert_eq!(out, 42);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.policy_read().count, 1);
    }
}
