//! Task worker
//!
//! Workers pull one delivery at a time, build and encode the action plan,
//! and hand it to the plan runner. Retryable failures are redelivered with
//! exponential backoff until the attempt limit; validation failures are
//! terminal on the first attempt. The bucket's in-flight claim and dedup key
//! are released only when the task settles, so at most one task per bucket
//! is ever being worked.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::metrics::METRICS;
use crate::models::MonthBucket;
use crate::planner::{encode_plan, encode_runner_client_config, PlanBuilder, PlanParams};
use crate::queue::{Delivery, InflightRegistry, TaskQueue};
use crate::runner::PlanRunner;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    inflight: Arc<dyn InflightRegistry>,
    runner: Arc<dyn PlanRunner>,
    config: Config,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        inflight: Arc<dyn InflightRegistry>,
        runner: Arc<dyn PlanRunner>,
        config: Config,
    ) -> Self {
        Self {
            queue,
            inflight,
            runner,
            config,
        }
    }

    /// Consume deliveries until shutdown is signalled. A task that has
    /// already started running is finished before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delivery = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.queue.dequeue() => match result {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        error!(error = %e, "Failed to dequeue task");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            if let Err(e) = self.process_delivery(delivery).await {
                error!(error = %e, "Task settlement failed");
            }
        }

        info!("Worker stopped");
    }

    /// Process one delivery through to a settled state: acked, scheduled
    /// for retry, or recorded as failed.
    pub async fn process_delivery(&self, delivery: Delivery) -> Result<()> {
        let task = &delivery.task;
        info!(
            task_id = %task.id,
            bucket = %task.bucket_key,
            attempt = delivery.attempt,
            members = task.member_indexes.len(),
            "Processing consolidation task"
        );

        METRICS.tasks_in_flight.inc();
        let outcome = self.execute(&delivery).await;
        METRICS.tasks_in_flight.dec();

        match outcome {
            Ok(()) => {
                self.queue.ack(&delivery).await?;
                self.inflight.release(&delivery.task.bucket_key).await?;
                METRICS.record_task_outcome("succeeded");
                info!(task_id = %delivery.task.id, bucket = %delivery.task.bucket_key, "Task succeeded");
                Ok(())
            }
            Err(e) if e.is_retryable() && delivery.attempt < self.queue.max_attempts() => {
                let delay = self.backoff(delivery.attempt);
                warn!(
                    task_id = %delivery.task.id,
                    bucket = %delivery.task.bucket_key,
                    attempt = delivery.attempt,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "Task failed, scheduling retry"
                );
                METRICS.task_retries.inc();
                self.queue.retry(delivery, delay).await
            }
            Err(e) => {
                error!(
                    task_id = %delivery.task.id,
                    bucket = %delivery.task.bucket_key,
                    attempt = delivery.attempt,
                    error = %e,
                    "Task failed permanently"
                );
                let bucket_key = delivery.task.bucket_key.clone();
                self.queue.fail(delivery, e.to_string()).await?;
                self.inflight.release(&bucket_key).await?;
                METRICS.record_task_outcome("failed");
                Ok(())
            }
        }
    }

    async fn execute(&self, delivery: &Delivery) -> Result<()> {
        let task = &delivery.task;

        let bucket = MonthBucket {
            key: task.bucket_key.clone(),
            members: task.member_indexes.clone(),
        };
        let params = PlanParams {
            shards: task.shard_count,
            replicas: task.replica_count,
            reindex_slices: task.reindex_slices,
            reindex_batch_size: task.reindex_batch_size,
            retire_mode: task.retire_mode,
        };

        let plan = PlanBuilder::build(&bucket, &params)?;
        let plan_yaml = serde_yaml::to_string(&encode_plan(&plan)?)?;
        let config_yaml = serde_yaml::to_string(&encode_runner_client_config(
            &task.connection,
            &self.config.runner.log_level,
        )?)?;

        let result = self.runner.run(task.id, &plan_yaml, &config_yaml).await?;
        METRICS.record_runner_duration(result.duration.as_secs_f64());

        if result.success() {
            Ok(())
        } else {
            Err(AppError::Runner(format!(
                "Plan runner exited with code {}; last output: {}",
                result.exit_code,
                result.log_tail.join(" | ")
            )))
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.queue.retry_backoff_secs;
        Duration::from_secs(base * 2u64.pow(attempt.saturating_sub(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConsolidationTask, PlanResult};
    use crate::queue::{InMemoryInflightRegistry, InMemoryQueue};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct ScriptedRunner {
        exit_codes: Vec<i32>,
        calls: AtomicU32,
    }

    impl ScriptedRunner {
        fn new(exit_codes: Vec<i32>) -> Arc<Self> {
            Arc::new(Self {
                exit_codes,
                calls: AtomicU32::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PlanRunner for ScriptedRunner {
        async fn run(
            &self,
            _task_id: Uuid,
            _plan_yaml: &str,
            _config_yaml: &str,
        ) -> Result<PlanResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let exit_code = self.exit_codes[call.min(self.exit_codes.len() - 1)];
            Ok(PlanResult {
                exit_code,
                duration: Duration::from_millis(10),
                log_tail: vec![format!("exit {}", exit_code)],
            })
        }
    }

    fn test_task(members: Vec<&str>) -> ConsolidationTask {
        let config = Config::default_for_tests();
        let bucket = MonthBucket {
            key: "logs-2024.01".to_string(),
            members: members.into_iter().map(String::from).collect(),
        };
        ConsolidationTask::from_bucket(&bucket, &config.plan, &config.cluster)
    }

    async fn settle(
        runner: Arc<ScriptedRunner>,
        task: ConsolidationTask,
    ) -> (Worker, Arc<InMemoryQueue>) {
        let mut config = Config::default_for_tests();
        config.queue.retry_backoff_secs = 0;

        let queue = InMemoryQueue::new(config.queue.max_attempts);
        let inflight = InMemoryInflightRegistry::new();

        inflight
            .try_claim(&task.bucket_key, Duration::from_secs(60))
            .await
            .unwrap();
        queue
            .enqueue(task.clone(), Some(&task.bucket_key))
            .await
            .unwrap();

        let worker = Worker::new(queue.clone(), inflight, runner, config);

        // Drive deliveries until the task settles: the failed record appears,
        // or the dedup key clears (success) so a duplicate enqueue succeeds.
        loop {
            let delivery = queue.dequeue().await.unwrap();
            worker.process_delivery(delivery).await.unwrap();

            if !queue.failed_tasks().await.unwrap().is_empty() {
                break;
            }
            if queue
                .enqueue(task.clone(), Some(&task.bucket_key))
                .await
                .unwrap()
                .is_some()
            {
                let duplicate = queue.dequeue().await.unwrap();
                queue.ack(&duplicate).await.unwrap();
                break;
            }
            // Otherwise a retry redelivery is pending; loop to consume it.
        }

        (worker, queue)
    }

    #[tokio::test]
    async fn test_successful_task_is_acked() {
        let runner = ScriptedRunner::new(vec![0]);
        let (worker, _queue) = settle(runner.clone(), test_task(vec!["logs-2024.01.01"])).await;

        assert_eq!(runner.call_count(), 1);
        assert!(worker.queue.failed_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_retries_until_attempt_limit() {
        let runner = ScriptedRunner::new(vec![1]);
        let (worker, _queue) = settle(runner.clone(), test_task(vec!["logs-2024.01.01"])).await;

        assert_eq!(runner.call_count(), worker.queue.max_attempts());

        let failed = worker.queue.failed_tasks().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, worker.queue.max_attempts());
        assert!(failed[0].error.contains("exited with code 1"));
    }

    #[tokio::test]
    async fn test_failure_then_success_recovers() {
        let runner = ScriptedRunner::new(vec![1, 0]);
        let (worker, _queue) = settle(runner.clone(), test_task(vec!["logs-2024.01.01"])).await;

        assert_eq!(runner.call_count(), 2);
        assert!(worker.queue.failed_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_is_terminal_on_first_attempt() {
        let runner = ScriptedRunner::new(vec![0]);
        let task = test_task(vec![]);

        let mut config = Config::default_for_tests();
        config.queue.retry_backoff_secs = 0;
        let queue = InMemoryQueue::new(config.queue.max_attempts);
        let inflight = InMemoryInflightRegistry::new();
        queue
            .enqueue(task.clone(), Some(&task.bucket_key))
            .await
            .unwrap();

        let worker = Worker::new(queue.clone(), inflight.clone(), runner.clone(), config);
        let delivery = queue.dequeue().await.unwrap();
        worker.process_delivery(delivery).await.unwrap();

        assert_eq!(runner.call_count(), 0);

        let failed = queue.failed_tasks().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 1);

        // Claim must be free again for a corrected follow-up dispatch
        assert!(inflight
            .try_claim(&task.bucket_key, Duration::from_secs(60))
            .await
            .unwrap());
    }

    struct TimeoutRunner {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PlanRunner for TimeoutRunner {
        async fn run(
            &self,
            _task_id: Uuid,
            _plan_yaml: &str,
            _config_yaml: &str,
        ) -> Result<PlanResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Timeout("plan runner exceeded 1s".to_string()))
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_exactly_one_attempt() {
        let runner = Arc::new(TimeoutRunner {
            calls: AtomicU32::new(0),
        });
        let task = test_task(vec!["logs-2024.01.01"]);

        let mut config = Config::default_for_tests();
        config.queue.retry_backoff_secs = 0;
        let queue = InMemoryQueue::new(config.queue.max_attempts);
        let inflight = InMemoryInflightRegistry::new();
        queue
            .enqueue(task.clone(), Some(&task.bucket_key))
            .await
            .unwrap();

        let worker = Worker::new(queue.clone(), inflight, runner.clone(), config);
        let delivery = queue.dequeue().await.unwrap();
        assert_eq!(delivery.attempt, 1);
        worker.process_delivery(delivery).await.unwrap();

        let redelivery = queue.dequeue().await.unwrap();
        assert_eq!(redelivery.attempt, 2);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_releases_nothing_until_settled() {
        let runner = ScriptedRunner::new(vec![1, 0]);
        let task = test_task(vec!["logs-2024.01.01"]);

        let mut config = Config::default_for_tests();
        config.queue.retry_backoff_secs = 0;
        let queue = InMemoryQueue::new(config.queue.max_attempts);
        let inflight = InMemoryInflightRegistry::new();

        inflight
            .try_claim(&task.bucket_key, Duration::from_secs(60))
            .await
            .unwrap();
        queue
            .enqueue(task.clone(), Some(&task.bucket_key))
            .await
            .unwrap();

        let worker = Worker::new(queue.clone(), inflight.clone(), runner, config);
        let delivery = queue.dequeue().await.unwrap();
        worker.process_delivery(delivery).await.unwrap();

        // First attempt failed and is awaiting redelivery; the bucket must
        // still be claimed and the dedup key must still suppress duplicates.
        assert!(!inflight
            .try_claim(&task.bucket_key, Duration::from_secs(60))
            .await
            .unwrap());
        assert!(queue
            .enqueue(task.clone(), Some(&task.bucket_key))
            .await
            .unwrap()
            .is_none());

        let redelivery = queue.dequeue().await.unwrap();
        assert_eq!(redelivery.attempt, 2);
        worker.process_delivery(redelivery).await.unwrap();

        assert!(inflight
            .try_claim(&task.bucket_key, Duration::from_secs(60))
            .await
            .unwrap());
    }
}
