//! Task queue and in-flight coordination abstractions.
//!
//! The core dispatch/worker logic depends only on these traits; memory and
//! redis backends are interchangeable.

mod memory;
mod redis_backend;

pub use memory::{InMemoryInflightRegistry, InMemoryQueue};
pub use redis_backend::{RedisInflightRegistry, RedisQueue};

use crate::error::Result;
use crate::models::{ConsolidationTask, FailedTask};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// One delivery of a task to a worker, carrying its attempt number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub task: ConsolidationTask,
    pub attempt: u32,
}

/// Queue capability consumed by the dispatcher and workers.
///
/// Delivery is single under normal operation and at-least-once under retry;
/// plans are idempotent so re-delivery is safe.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task. With a dedup key, a task whose key already has an
    /// outstanding delivery is suppressed and `None` is returned.
    async fn enqueue(
        &self,
        task: ConsolidationTask,
        dedup_key: Option<&str>,
    ) -> Result<Option<Uuid>>;

    /// Block until a task is available
    async fn dequeue(&self) -> Result<Delivery>;

    /// Acknowledge successful processing
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Schedule a re-delivery after `delay`, attempt count incremented
    async fn retry(&self, delivery: Delivery, delay: Duration) -> Result<()>;

    /// Record a terminal failure; the task stays queryable for operators
    async fn fail(&self, delivery: Delivery, error: String) -> Result<()>;

    /// Tasks that exhausted their attempts
    async fn failed_tasks(&self) -> Result<Vec<FailedTask>>;

    /// Maximum delivery attempts per task
    fn max_attempts(&self) -> u32;
}

/// Externally coordinated at-most-one-in-flight state, keyed by bucket key.
/// Claims expire after a TTL so a crashed worker cannot wedge a bucket
/// forever; the TTL must exceed the longest expected consolidation.
#[async_trait]
pub trait InflightRegistry: Send + Sync {
    /// Atomically claim a key. Returns false when already claimed.
    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Release a claim after the task reaches a terminal state
    async fn release(&self, key: &str) -> Result<()>;
}
