//! Redis-backed queue and in-flight registry for broker-backed deployments

use crate::config::QueueConfig;
use crate::error::{AppError, Result};
use crate::models::{ConsolidationTask, FailedTask};
use crate::queue::{Delivery, InflightRegistry, TaskQueue};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Redis list queue with a failure hash kept on a result TTL
#[derive(Clone)]
pub struct RedisQueue {
    connection: ConnectionManager,
    key_prefix: String,
    max_attempts: u32,
    task_ttl_secs: u64,
    result_ttl_secs: u64,
}

impl RedisQueue {
    pub async fn new(redis_url: &str, config: &QueueConfig) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| AppError::Queue(format!("Failed to create redis client: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Queue(format!("Failed to connect to redis: {}", e)))?;

        // Test connection
        let mut test_conn = connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut test_conn)
            .await
            .map_err(|e| AppError::Queue(format!("Redis connection test failed: {}", e)))?;

        info!(queue = %config.queue_name, "Initialized redis task queue");

        Ok(Self {
            connection,
            key_prefix: config.queue_name.clone(),
            max_attempts: config.max_attempts,
            task_ttl_secs: config.task_ttl_secs,
            result_ttl_secs: config.result_ttl_secs,
        })
    }

    fn queue_key(&self) -> String {
        format!("{}:queue", self.key_prefix)
    }

    fn failed_key(&self) -> String {
        format!("{}:failed", self.key_prefix)
    }

    fn dedup_key(&self, key: &str) -> String {
        format!("{}:outstanding:{}", self.key_prefix, key)
    }

    async fn push(&self, delivery: &Delivery) -> Result<()> {
        let payload = serde_json::to_string(delivery)?;
        let mut conn = self.connection.clone();
        let () = conn.lpush(self.queue_key(), payload).await?;
        // Refresh the queue TTL so an abandoned queue eventually drains
        let () = redis::cmd("EXPIRE")
            .arg(self.queue_key())
            .arg(self.task_ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn enqueue(
        &self,
        task: ConsolidationTask,
        dedup_key: Option<&str>,
    ) -> Result<Option<Uuid>> {
        if let Some(key) = dedup_key {
            let mut conn = self.connection.clone();
            let claimed: Option<String> = redis::cmd("SET")
                .arg(self.dedup_key(key))
                .arg(task.id.to_string())
                .arg("NX")
                .arg("EX")
                .arg(self.task_ttl_secs)
                .query_async(&mut conn)
                .await?;

            if claimed.is_none() {
                debug!(dedup_key = key, "Task suppressed by outstanding delivery");
                return Ok(None);
            }
        }

        let id = task.id;
        self.push(&Delivery { task, attempt: 1 }).await?;
        Ok(Some(id))
    }

    async fn dequeue(&self) -> Result<Delivery> {
        let mut conn = self.connection.clone();
        loop {
            let popped: Option<(String, String)> = redis::cmd("BRPOP")
                .arg(self.queue_key())
                .arg(5)
                .query_async(&mut conn)
                .await?;
            if let Some((_, payload)) = popped {
                return Ok(serde_json::from_str(&payload)?);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.connection.clone();
        let () = conn.del(self.dedup_key(&delivery.task.bucket_key)).await?;
        Ok(())
    }

    async fn retry(&self, delivery: Delivery, delay: Duration) -> Result<()> {
        let queue = self.clone();
        let redelivery = Delivery {
            task: delivery.task,
            attempt: delivery.attempt + 1,
        };

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.push(&redelivery).await {
                tracing::error!(
                    bucket = %redelivery.task.bucket_key,
                    error = %e,
                    "Failed to requeue task after backoff"
                );
            }
        });

        Ok(())
    }

    async fn fail(&self, delivery: Delivery, error: String) -> Result<()> {
        let record = FailedTask {
            attempts: delivery.attempt,
            error,
            failed_at: Utc::now(),
            task: delivery.task,
        };

        let mut conn = self.connection.clone();
        let payload = serde_json::to_string(&record)?;
        let () = conn
            .hset(self.failed_key(), record.task.bucket_key.clone(), payload)
            .await?;
        let () = redis::cmd("EXPIRE")
            .arg(self.failed_key())
            .arg(self.result_ttl_secs)
            .query_async(&mut conn)
            .await?;
        let () = conn.del(self.dedup_key(&record.task.bucket_key)).await?;
        Ok(())
    }

    async fn failed_tasks(&self) -> Result<Vec<FailedTask>> {
        let mut conn = self.connection.clone();
        let payloads: Vec<String> = conn.hvals(self.failed_key()).await?;

        let mut failed = Vec::with_capacity(payloads.len());
        for payload in payloads {
            failed.push(serde_json::from_str(&payload)?);
        }
        Ok(failed)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Redis claim registry: `SET NX EX` gives atomic check-and-set with expiry
#[derive(Clone)]
pub struct RedisInflightRegistry {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisInflightRegistry {
    pub async fn new(redis_url: &str, key_prefix: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| AppError::Queue(format!("Failed to create redis client: {}", e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Queue(format!("Failed to connect to redis: {}", e)))?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn claim_key(&self, key: &str) -> String {
        format!("{}:inflight:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl InflightRegistry for RedisInflightRegistry {
    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let claimed: Option<String> = redis::cmd("SET")
            .arg(self.claim_key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(claimed.is_some())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let () = conn.del(self.claim_key(key)).await?;
        Ok(())
    }
}
