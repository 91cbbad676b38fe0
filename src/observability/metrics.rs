//! Controller metrics — lightweight counters, gauges, and histograms
//!
//! In-process metrics without external dependencies. The reconciler writes;
//! the status API exposes them as JSON snapshots or Prometheus text format
//! under the `zeno_` namespace.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// Fixed-bucket histogram with Prometheus-style cumulative rendering
pub struct Histogram {
    buckets: Vec<f64>,
    inner: RwLock<HistogramData>,
}

#[derive(Default)]
struct HistogramData {
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    /// Create a histogram with the given upper bucket bounds (ascending)
    pub fn new(buckets: &[f64]) -> Self {
        Self {
            buckets: buckets.to_vec(),
            inner: RwLock::new(HistogramData {
                counts: vec![0; buckets.len()],
                sum: 0.0,
                count: 0,
            }),
        }
    }

    /// Record an observation
    pub fn observe(&self, value: f64) {
        let mut data = self.inner.write().unwrap();
        for (i, bound) in self.buckets.iter().enumerate() {
            if value <= *bound {
                data.counts[i] += 1;
            }
        }
        data.sum += value;
        data.count += 1;
    }

    /// Total observation count
    pub fn count(&self) -> u64 {
        self.inner.read().unwrap().count
    }

    /// Sum of all observations
    pub fn sum(&self) -> f64 {
        self.inner.read().unwrap().sum
    }

    fn render(&self, name: &str, help: &str, out: &mut String) {
        let data = self.inner.read().unwrap();
        out.push_str(&format!("# HELP {} {}\n", name, help));
        out.push_str(&format!("# TYPE {} histogram\n", name));
        for (i, bound) in self.buckets.iter().enumerate() {
            out.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                name, bound, data.counts[i]
            ));
        }
        out.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, data.count));
        out.push_str(&format!("{}_sum {}\n", name, data.sum));
        out.push_str(&format!("{}_count {}\n", name, data.count));
    }
}

// ---------------------------------------------------------------------------
// ControllerMetrics
// ---------------------------------------------------------------------------

/// Point-in-time view of the headline metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Completed reconciliation ticks
    pub reconcile_total: u64,
    /// Reconciliation errors by kind
    pub reconcile_errors: HashMap<String, u64>,
    /// Last observed queue depth
    pub queue_depth: u64,
    /// Current runner count
    pub runners_current: u64,
    /// Desired runner count
    pub runners_desired: u64,
    /// Runners by lifecycle status
    pub runners_by_status: HashMap<String, u64>,
    /// 1 while this process holds the lease
    pub leader: i64,
}

/// Controller metrics collector
pub struct ControllerMetrics {
    reconcile_total: AtomicU64,
    reconcile_errors: RwLock<HashMap<String, u64>>,
    scale_up_events: RwLock<HashMap<String, u64>>,
    scale_down_events: RwLock<HashMap<String, u64>>,
    provider_operations: RwLock<HashMap<(String, String, String), u64>>,
    provider_errors: RwLock<HashMap<(String, String, String), u64>>,

    queue_depth: AtomicU64,
    runners_current: AtomicU64,
    runners_desired: AtomicU64,
    runners_by_status: RwLock<HashMap<String, u64>>,
    leader_status: AtomicI64,
    rate_limit_remaining: AtomicI64,
    rate_limit_reset: AtomicI64,
    controller_info: RwLock<Option<(String, String, String)>>,

    reconcile_duration: Histogram,
    scale_duration: Histogram,
    queue_depth_samples: Histogram,
    provider_op_duration: Histogram,
}

impl ControllerMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            reconcile_total: AtomicU64::new(0),
            reconcile_errors: RwLock::new(HashMap::new()),
            scale_up_events: RwLock::new(HashMap::new()),
            scale_down_events: RwLock::new(HashMap::new()),
            provider_operations: RwLock::new(HashMap::new()),
            provider_errors: RwLock::new(HashMap::new()),
            queue_depth: AtomicU64::new(0),
            runners_current: AtomicU64::new(0),
            runners_desired: AtomicU64::new(0),
            runners_by_status: RwLock::new(HashMap::new()),
            leader_status: AtomicI64::new(0),
            rate_limit_remaining: AtomicI64::new(-1),
            rate_limit_reset: AtomicI64::new(0),
            controller_info: RwLock::new(None),
            reconcile_duration: Histogram::new(&[0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]),
            scale_duration: Histogram::new(&[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            queue_depth_samples: Histogram::new(&[
                0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0,
            ]),
            provider_op_duration: Histogram::new(&[0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
        }
    }

    // --- counters ---

    /// Record a completed reconciliation tick
    pub fn inc_reconcile(&self) {
        self.reconcile_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reconciliation error by kind
    pub fn inc_reconcile_error(&self, kind: &str) {
        let mut map = self.reconcile_errors.write().unwrap();
        *map.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Record a scaling event (`action` is `up` or `down`)
    pub fn inc_scale_event(&self, action: &str, reason: &str) {
        let map = if action == "up" {
            &self.scale_up_events
        } else {
            &self.scale_down_events
        };
        let mut map = map.write().unwrap();
        *map.entry(reason.to_string()).or_insert(0) += 1;
    }

    /// Record a provider operation outcome
    pub fn inc_provider_operation(&self, provider: &str, operation: &str, status: &str) {
        let mut map = self.provider_operations.write().unwrap();
        *map.entry((provider.into(), operation.into(), status.into()))
            .or_insert(0) += 1;
    }

    /// Record a provider error by kind
    pub fn inc_provider_error(&self, provider: &str, operation: &str, error_type: &str) {
        let mut map = self.provider_errors.write().unwrap();
        *map.entry((provider.into(), operation.into(), error_type.into()))
            .or_insert(0) += 1;
    }

    // --- gauges ---

    /// Set the last observed queue depth and record it in the samples
    /// histogram
    pub fn observe_queue_depth(&self, depth: u32) {
        self.queue_depth.store(depth as u64, Ordering::Relaxed);
        self.queue_depth_samples.observe(depth as f64);
    }

    /// Set current and desired runner counts
    pub fn set_runner_counts(&self, current: u32, desired: u32) {
        self.runners_current.store(current as u64, Ordering::Relaxed);
        self.runners_desired.store(desired as u64, Ordering::Relaxed);
    }

    /// Replace the runners-by-status breakdown
    pub fn set_runners_by_status(&self, by_status: HashMap<String, u64>) {
        *self.runners_by_status.write().unwrap() = by_status;
    }

    /// Set leadership status (1 leader, 0 follower)
    pub fn set_leader(&self, leader: bool) {
        self.leader_status
            .store(if leader { 1 } else { 0 }, Ordering::Relaxed);
    }

    /// Update the GitHub rate-limit gauges
    pub fn set_rate_limit(&self, remaining: i64, reset_timestamp: Option<i64>) {
        self.rate_limit_remaining.store(remaining, Ordering::Relaxed);
        if let Some(ts) = reset_timestamp {
            self.rate_limit_reset.store(ts, Ordering::Relaxed);
        }
    }

    /// Set the static controller info labels
    pub fn set_controller_info(&self, version: &str, provider: &str, mode: &str) {
        *self.controller_info.write().unwrap() =
            Some((version.into(), provider.into(), mode.into()));
    }

    // --- histograms ---

    /// Record a reconciliation tick duration
    pub fn observe_reconcile_duration(&self, duration: Duration) {
        self.reconcile_duration.observe(duration.as_secs_f64());
    }

    /// Record a scale batch duration
    pub fn observe_scale_duration(&self, duration: Duration) {
        self.scale_duration.observe(duration.as_secs_f64());
    }

    /// Record a provider operation duration
    pub fn observe_provider_duration(&self, duration: Duration) {
        self.provider_op_duration.observe(duration.as_secs_f64());
    }

    // --- reads ---

    /// Completed reconciliation ticks
    pub fn reconcile_total(&self) -> u64 {
        self.reconcile_total.load(Ordering::Relaxed)
    }

    /// Take a snapshot of the headline metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reconcile_total: self.reconcile_total.load(Ordering::Relaxed),
            reconcile_errors: self.reconcile_errors.read().unwrap().clone(),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            runners_current: self.runners_current.load(Ordering::Relaxed),
            runners_desired: self.runners_desired.load(Ordering::Relaxed),
            runners_by_status: self.runners_by_status.read().unwrap().clone(),
            leader: self.leader_status.load(Ordering::Relaxed),
        }
    }

    /// Render all metrics in Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP zeno_reconcile_total Total number of reconciliation loops\n");
        out.push_str("# TYPE zeno_reconcile_total counter\n");
        out.push_str(&format!(
            "zeno_reconcile_total {}\n",
            self.reconcile_total.load(Ordering::Relaxed)
        ));

        {
            let errors = self.reconcile_errors.read().unwrap();
            if !errors.is_empty() {
                out.push_str("# HELP zeno_reconcile_errors_total Reconciliation errors\n");
                out.push_str("# TYPE zeno_reconcile_errors_total counter\n");
                for (kind, count) in errors.iter() {
                    out.push_str(&format!(
                        "zeno_reconcile_errors_total{{error_type=\"{}\"}} {}\n",
                        kind, count
                    ));
                }
            }
        }

        for (name, help, map) in [
            (
                "zeno_scale_up_events_total",
                "Total number of scale up events",
                &self.scale_up_events,
            ),
            (
                "zeno_scale_down_events_total",
                "Total number of scale down events",
                &self.scale_down_events,
            ),
        ] {
            let map = map.read().unwrap();
            if !map.is_empty() {
                out.push_str(&format!("# HELP {} {}\n", name, help));
                out.push_str(&format!("# TYPE {} counter\n", name));
                for (reason, count) in map.iter() {
                    out.push_str(&format!("{}{{reason=\"{}\"}} {}\n", name, reason, count));
                }
            }
        }

        {
            let ops = self.provider_operations.read().unwrap();
            if !ops.is_empty() {
                out.push_str("# HELP zeno_provider_operations_total Provider operations\n");
                out.push_str("# TYPE zeno_provider_operations_total counter\n");
                for ((provider, operation, status), count) in ops.iter() {
                    out.push_str(&format!(
                        "zeno_provider_operations_total{{provider=\"{}\",operation=\"{}\",status=\"{}\"}} {}\n",
                        provider, operation, status, count
                    ));
                }
            }
        }

        {
            let errors = self.provider_errors.read().unwrap();
            if !errors.is_empty() {
                out.push_str("# HELP zeno_provider_errors_total Provider errors\n");
                out.push_str("# TYPE zeno_provider_errors_total counter\n");
                for ((provider, operation, error_type), count) in errors.iter() {
                    out.push_str(&format!(
                        "zeno_provider_errors_total{{provider=\"{}\",operation=\"{}\",error_type=\"{}\"}} {}\n",
                        provider, operation, error_type, count
                    ));
                }
            }
        }

        out.push_str("# HELP zeno_queue_depth Current queue depth (queued workflow jobs)\n");
        out.push_str("# TYPE zeno_queue_depth gauge\n");
        out.push_str(&format!(
            "zeno_queue_depth {}\n",
            self.queue_depth.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP zeno_runners_current Current number of runners\n");
        out.push_str("# TYPE zeno_runners_current gauge\n");
        out.push_str(&format!(
            "zeno_runners_current {}\n",
            self.runners_current.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP zeno_runners_desired Desired number of runners\n");
        out.push_str("# TYPE zeno_runners_desired gauge\n");
        out.push_str(&format!(
            "zeno_runners_desired {}\n",
            self.runners_desired.load(Ordering::Relaxed)
        ));

        {
            let by_status = self.runners_by_status.read().unwrap();
            if !by_status.is_empty() {
                out.push_str("# HELP zeno_runners Runners by lifecycle status\n");
                out.push_str("# TYPE zeno_runners gauge\n");
                for (status, count) in by_status.iter() {
                    out.push_str(&format!(
                        "zeno_runners{{status=\"{}\"}} {}\n",
                        status, count
                    ));
                }
            }
        }

        out.push_str("# HELP zeno_github_rate_limit_remaining Remaining GitHub API rate limit\n");
        out.push_str("# TYPE zeno_github_rate_limit_remaining gauge\n");
        out.push_str(&format!(
            "zeno_github_rate_limit_remaining {}\n",
            self.rate_limit_remaining.load(Ordering::Relaxed)
        ));

        out.push_str(
            "# HELP zeno_github_rate_limit_reset_timestamp GitHub rate limit reset (Unix time)\n",
        );
        out.push_str("# TYPE zeno_github_rate_limit_reset_timestamp gauge\n");
        out.push_str(&format!(
            "zeno_github_rate_limit_reset_timestamp {}\n",
            self.rate_limit_reset.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP zeno_leader_election_status Leader status (1 if leader)\n");
        out.push_str("# TYPE zeno_leader_election_status gauge\n");
        out.push_str(&format!(
            "zeno_leader_election_status {}\n",
            self.leader_status.load(Ordering::Relaxed)
        ));

        if let Some((version, provider, mode)) = self.controller_info.read().unwrap().as_ref() {
            out.push_str("# HELP zeno_controller_info Information about the controller\n");
            out.push_str("# TYPE zeno_controller_info gauge\n");
            out.push_str(&format!(
                "zeno_controller_info{{version=\"{}\",provider=\"{}\",mode=\"{}\"}} 1\n",
                version, provider, mode
            ));
        }

        self.reconcile_duration.render(
            "zeno_reconcile_duration_seconds",
            "Duration of reconciliation loops",
            &mut out,
        );
        self.scale_duration.render(
            "zeno_scale_duration_seconds",
            "Duration of scale batches",
            &mut out,
        );
        self.queue_depth_samples.render(
            "zeno_queue_depth_samples",
            "Distribution of queue depth samples",
            &mut out,
        );
        self.provider_op_duration.render(
            "zeno_provider_operation_duration_seconds",
            "Duration of provider operations",
            &mut out,
        );

        out
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
