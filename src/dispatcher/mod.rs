//! Dispatch cycle: discovery, claim, enqueue
//!
//! A dispatch cycle discovers consolidation-eligible month buckets, claims
//! each bucket in the in-flight registry, and enqueues one task per claimed
//! bucket. A bucket that is already claimed or already queued is skipped; it
//! becomes eligible again on a later cycle once the outstanding task settles
//! or its claim expires. Failures on one bucket never abort the rest of the
//! cycle.

use crate::config::Config;
use crate::discovery::DiscoveryService;
use crate::error::Result;
use crate::metrics::METRICS;
use crate::models::ConsolidationTask;
use crate::queue::{InflightRegistry, TaskQueue};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Outcome of a single dispatch cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub buckets_discovered: usize,
    pub tasks_enqueued: usize,
    pub tasks_suppressed: usize,
    pub errors: usize,
}

pub struct Dispatcher {
    discovery: DiscoveryService,
    queue: Arc<dyn TaskQueue>,
    inflight: Arc<dyn InflightRegistry>,
    config: Config,
}

impl Dispatcher {
    pub fn new(
        discovery: DiscoveryService,
        queue: Arc<dyn TaskQueue>,
        inflight: Arc<dyn InflightRegistry>,
        config: Config,
    ) -> Self {
        Self {
            discovery,
            queue,
            inflight,
            config,
        }
    }

    /// Run one dispatch cycle for the given reference date
    pub async fn dispatch_cycle(&self, today: NaiveDate) -> Result<DispatchSummary> {
        let buckets = self.discovery.discover(today).await?;
        let claim_ttl = Duration::from_secs(self.config.queue.inflight_ttl_secs);

        let mut summary = DispatchSummary {
            buckets_discovered: buckets.len(),
            ..Default::default()
        };

        info!(buckets = buckets.len(), "Dispatching consolidation cycle");

        for bucket in buckets {
            match self.inflight.try_claim(&bucket.key, claim_ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(bucket = %bucket.key, "Bucket already in flight, skipping");
                    summary.tasks_suppressed += 1;
                    continue;
                }
                Err(e) => {
                    error!(bucket = %bucket.key, error = %e, "Failed to claim bucket");
                    summary.errors += 1;
                    continue;
                }
            }

            let key = bucket.key.clone();
            let task =
                ConsolidationTask::from_bucket(&bucket, &self.config.plan, &self.config.cluster);

            match self.queue.enqueue(task, Some(&key)).await {
                Ok(Some(task_id)) => {
                    info!(bucket = %key, task_id = %task_id, "Enqueued consolidation task");
                    summary.tasks_enqueued += 1;
                }
                Ok(None) => {
                    // The queue still holds an undelivered task for this
                    // bucket. Release our fresh claim so the worker's own
                    // release is the only one that matters.
                    debug!(bucket = %key, "Task already queued, suppressing duplicate");
                    summary.tasks_suppressed += 1;
                    if let Err(e) = self.inflight.release(&key).await {
                        error!(bucket = %key, error = %e, "Failed to release claim");
                    }
                }
                Err(e) => {
                    error!(bucket = %key, error = %e, "Failed to enqueue task");
                    summary.errors += 1;
                    if let Err(release_err) = self.inflight.release(&key).await {
                        error!(bucket = %key, error = %release_err, "Failed to release claim");
                    }
                }
            }
        }

        METRICS.record_dispatch_cycle(
            summary.buckets_discovered,
            summary.tasks_enqueued,
            summary.tasks_suppressed,
        );

        info!(
            buckets = summary.buckets_discovered,
            enqueued = summary.tasks_enqueued,
            suppressed = summary.tasks_suppressed,
            errors = summary.errors,
            "Dispatch cycle complete"
        );

        Ok(summary)
    }
}
