use crate::config::{ClusterConfig, PlanConfig};
use crate::models::MonthBucket;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// What to do with a daily index after its documents have been reindexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetireMode {
    /// Close the index; reversible, cheaper to recover from
    #[default]
    Close,
    /// Delete the index permanently
    Delete,
}

/// Cluster connection parameters carried inside a task so a worker on
/// another host can reach the same cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConnection {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub use_ssl: bool,
    pub timeout_secs: u64,
}

impl From<&ClusterConfig> for ClusterConnection {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            use_ssl: config.use_ssl,
            timeout_secs: config.timeout_secs,
        }
    }
}

/// A request to consolidate one month bucket, enqueued once per eligible
/// bucket per discovery run and consumed exactly once by a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationTask {
    /// Unique task identifier
    pub id: Uuid,

    /// Destination monthly index name
    pub bucket_key: String,

    /// Daily source indices, ascending by date
    pub member_indexes: Vec<String>,

    /// Shard count for the destination index
    pub shard_count: u32,

    /// Replica count for the destination index
    pub replica_count: u32,

    /// Parallel slices per reindex
    pub reindex_slices: u32,

    /// Documents per reindex scroll batch
    pub reindex_batch_size: u32,

    /// Close vs delete policy for the sources
    pub retire_mode: RetireMode,

    /// Cluster connection parameters
    pub connection: ClusterConnection,

    /// When the dispatcher created this task
    pub created_at: DateTime<Utc>,
}

impl ConsolidationTask {
    /// Build a task for one bucket from immutable configuration
    pub fn from_bucket(
        bucket: &MonthBucket,
        plan: &PlanConfig,
        cluster: &ClusterConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            bucket_key: bucket.key.clone(),
            member_indexes: bucket.members.clone(),
            shard_count: plan.shards,
            replica_count: plan.replicas,
            reindex_slices: plan.reindex_slices,
            reindex_batch_size: plan.reindex_batch_size,
            retire_mode: plan.retire_mode,
            connection: ClusterConnection::from(cluster),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of one plan-runner invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    /// Runner process exit code
    pub exit_code: i32,

    /// Wall-clock duration of the invocation
    pub duration: Duration,

    /// Trailing output lines for operator diagnosis
    pub log_tail: Vec<String>,
}

impl PlanResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A task that exhausted its attempts; kept visible for operator
/// intervention so unconsolidated daily indices cannot silently accumulate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTask {
    pub task: ConsolidationTask,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}
