//! Prometheus metrics for consolidation dispatch and execution

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Gauge, Histogram,
};

lazy_static! {
    pub static ref METRICS: ConsolidatorMetrics = ConsolidatorMetrics::new();
}

/// Consolidator metrics collection
pub struct ConsolidatorMetrics {
    /// Number of dispatch cycles run
    pub dispatch_cycles: Counter,

    /// Number of month buckets discovered per cycle outcome
    pub buckets_discovered: Counter,

    /// Tasks by dispatch outcome
    pub tasks_dispatched: CounterVec,

    /// Tasks by terminal outcome
    pub tasks_completed: CounterVec,

    /// Number of task retries scheduled
    pub task_retries: Counter,

    /// Plan runner execution duration in seconds
    pub runner_duration: Histogram,

    /// Number of tasks currently being processed
    pub tasks_in_flight: Gauge,
}

impl ConsolidatorMetrics {
    pub fn new() -> Self {
        Self {
            dispatch_cycles: register_counter!(
                "consolidator_dispatch_cycles_total",
                "Total number of dispatch cycles run"
            )
            .unwrap(),

            buckets_discovered: register_counter!(
                "consolidator_buckets_discovered_total",
                "Total number of month buckets discovered"
            )
            .unwrap(),

            tasks_dispatched: register_counter_vec!(
                "consolidator_tasks_dispatched_total",
                "Tasks by dispatch outcome",
                &["outcome"]
            )
            .unwrap(),

            tasks_completed: register_counter_vec!(
                "consolidator_tasks_completed_total",
                "Tasks by terminal outcome",
                &["outcome"]
            )
            .unwrap(),

            task_retries: register_counter!(
                "consolidator_task_retries_total",
                "Total number of task retries scheduled"
            )
            .unwrap(),

            runner_duration: register_histogram!(
                "consolidator_runner_duration_seconds",
                "Plan runner execution duration in seconds",
                vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]
            )
            .unwrap(),

            tasks_in_flight: register_gauge!(
                "consolidator_tasks_in_flight",
                "Number of tasks currently being processed"
            )
            .unwrap(),
        }
    }

    /// Record a completed dispatch cycle
    pub fn record_dispatch_cycle(&self, buckets: usize, enqueued: usize, suppressed: usize) {
        self.dispatch_cycles.inc();
        self.buckets_discovered.inc_by(buckets as f64);
        self.tasks_dispatched
            .with_label_values(&["enqueued"])
            .inc_by(enqueued as f64);
        self.tasks_dispatched
            .with_label_values(&["suppressed"])
            .inc_by(suppressed as f64);
    }

    /// Record a task reaching a terminal state
    pub fn record_task_outcome(&self, outcome: &str) {
        self.tasks_completed.with_label_values(&[outcome]).inc();
    }

    /// Record a plan runner execution
    pub fn record_runner_duration(&self, duration_secs: f64) {
        self.runner_duration.observe(duration_secs);
    }
}
