//! In-memory queue backend for standalone mode and tests

use crate::error::{AppError, Result};
use crate::models::{ConsolidationTask, FailedTask};
use crate::queue::{Delivery, InflightRegistry, TaskQueue};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Channel-backed task queue shared by in-process workers
pub struct InMemoryQueue {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    outstanding: DashSet<String>,
    failed: DashMap<String, FailedTask>,
    max_attempts: u32,
}

impl InMemoryQueue {
    pub fn new(max_attempts: u32) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
            outstanding: DashSet::new(),
            failed: DashMap::new(),
            max_attempts,
        })
    }

    fn send(&self, delivery: Delivery) -> Result<()> {
        self.tx
            .send(delivery)
            .map_err(|e| AppError::Queue(format!("queue closed: {}", e)))
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(
        &self,
        task: ConsolidationTask,
        dedup_key: Option<&str>,
    ) -> Result<Option<Uuid>> {
        if let Some(key) = dedup_key {
            if !self.outstanding.insert(key.to_string()) {
                debug!(dedup_key = key, "Task suppressed by outstanding delivery");
                return Ok(None);
            }
        }

        let id = task.id;
        self.send(Delivery { task, attempt: 1 })?;
        Ok(Some(id))
    }

    async fn dequeue(&self) -> Result<Delivery> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| AppError::Queue("queue closed".to_string()))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.outstanding.remove(&delivery.task.bucket_key);
        Ok(())
    }

    async fn retry(&self, delivery: Delivery, delay: Duration) -> Result<()> {
        let tx = self.tx.clone();
        let redelivery = Delivery {
            task: delivery.task,
            attempt: delivery.attempt + 1,
        };

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Dropped silently only if the queue itself is gone
            let _ = tx.send(redelivery);
        });

        Ok(())
    }

    async fn fail(&self, delivery: Delivery, error: String) -> Result<()> {
        self.outstanding.remove(&delivery.task.bucket_key);
        let record = FailedTask {
            attempts: delivery.attempt,
            error,
            failed_at: Utc::now(),
            task: delivery.task,
        };
        self.failed.insert(record.task.bucket_key.clone(), record);
        Ok(())
    }

    async fn failed_tasks(&self) -> Result<Vec<FailedTask>> {
        Ok(self
            .failed
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Process-local claim registry with expiring entries
#[derive(Default)]
pub struct InMemoryInflightRegistry {
    claims: DashMap<String, Instant>,
}

impl InMemoryInflightRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl InflightRegistry for InMemoryInflightRegistry {
    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        // The dashmap entry lock makes check-and-set atomic per key
        match self.claims.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if *entry.get() <= now {
                    entry.insert(now + ttl);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.claims.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, PlanConfig};
    use crate::models::{MonthBucket, RetireMode};

    fn task(bucket_key: &str) -> ConsolidationTask {
        let bucket = MonthBucket {
            key: bucket_key.to_string(),
            members: vec![format!("{}.01", bucket_key)],
        };
        let plan = PlanConfig {
            shards: 1,
            replicas: 0,
            reindex_slices: 1,
            reindex_batch_size: 100,
            retire_mode: RetireMode::Close,
        };
        let cluster = ClusterConfig {
            host: "localhost".to_string(),
            port: 9200,
            username: None,
            password: None,
            use_ssl: false,
            timeout_secs: 30,
        };
        ConsolidationTask::from_bucket(&bucket, &plan, &cluster)
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_round_trip() {
        let queue = InMemoryQueue::new(3);
        let id = queue
            .enqueue(task("logs-2024.01"), Some("logs-2024.01"))
            .await
            .unwrap();
        assert!(id.is_some());

        let delivery = queue.dequeue().await.unwrap();
        assert_eq!(delivery.task.bucket_key, "logs-2024.01");
        assert_eq!(delivery.attempt, 1);
    }

    #[tokio::test]
    async fn test_dedup_key_suppresses_second_enqueue() {
        let queue = InMemoryQueue::new(3);
        let first = queue
            .enqueue(task("logs-2024.01"), Some("logs-2024.01"))
            .await
            .unwrap();
        let second = queue
            .enqueue(task("logs-2024.01"), Some("logs-2024.01"))
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_ack_clears_dedup_key() {
        let queue = InMemoryQueue::new(3);
        queue
            .enqueue(task("logs-2024.01"), Some("logs-2024.01"))
            .await
            .unwrap();
        let delivery = queue.dequeue().await.unwrap();
        queue.ack(&delivery).await.unwrap();

        let again = queue
            .enqueue(task("logs-2024.01"), Some("logs-2024.01"))
            .await
            .unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_retry_increments_attempt() {
        let queue = InMemoryQueue::new(3);
        queue.enqueue(task("logs-2024.01"), None).await.unwrap();
        let delivery = queue.dequeue().await.unwrap();

        queue
            .retry(delivery, Duration::from_millis(10))
            .await
            .unwrap();

        let redelivery = queue.dequeue().await.unwrap();
        assert_eq!(redelivery.attempt, 2);
    }

    #[tokio::test]
    async fn test_failed_tasks_stay_visible() {
        let queue = InMemoryQueue::new(3);
        queue.enqueue(task("logs-2024.01"), None).await.unwrap();
        let delivery = queue.dequeue().await.unwrap();

        queue
            .fail(delivery, "runner exited with 2".to_string())
            .await
            .unwrap();

        let failed = queue.failed_tasks().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task.bucket_key, "logs-2024.01");
        assert_eq!(failed[0].error, "runner exited with 2");
    }

    #[tokio::test]
    async fn test_inflight_claim_is_exclusive() {
        let registry = InMemoryInflightRegistry::new();
        let ttl = Duration::from_secs(60);

        assert!(registry.try_claim("logs-2024.01", ttl).await.unwrap());
        assert!(!registry.try_claim("logs-2024.01", ttl).await.unwrap());
        assert!(registry.try_claim("logs-2024.02", ttl).await.unwrap());

        registry.release("logs-2024.01").await.unwrap();
        assert!(registry.try_claim("logs-2024.01", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_inflight_claim_expires() {
        let registry = InMemoryInflightRegistry::new();

        assert!(registry
            .try_claim("logs-2024.01", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(registry
            .try_claim("logs-2024.01", Duration::from_secs(60))
            .await
            .unwrap());
    }
}
