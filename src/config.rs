use crate::error::{AppError, Result};
use crate::models::RetireMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Search cluster connection
    pub cluster: ClusterConfig,

    /// Index discovery and bucketing
    pub discovery: DiscoveryConfig,

    /// Consolidation plan parameters
    pub plan: PlanConfig,

    /// Task queue configuration
    pub queue: QueueConfig,

    /// Plan runner invocation
    pub runner: RunnerConfig,

    /// Periodic dispatch schedule
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        let config: Config = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: IC_)
            .add_source(
                config::Environment::with_prefix("IC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Pre-flight validation; failures here are fatal and never retried
    pub fn validate(&self) -> Result<()> {
        if self.cluster.host.is_empty() {
            return Err(AppError::Configuration(
                "cluster.host must be set".to_string(),
            ));
        }
        if self.plan.shards == 0 {
            return Err(AppError::Configuration(
                "plan.shards must be positive".to_string(),
            ));
        }
        if self.plan.reindex_slices == 0 {
            return Err(AppError::Configuration(
                "plan.reindex_slices must be positive".to_string(),
            ));
        }
        if self.plan.reindex_batch_size == 0 {
            return Err(AppError::Configuration(
                "plan.reindex_batch_size must be positive".to_string(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(AppError::Configuration(
                "queue.max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Baseline config for unit tests, mirroring config/default.toml
    #[cfg(test)]
    pub fn default_for_tests() -> Self {
        Self {
            cluster: ClusterConfig {
                host: "localhost".to_string(),
                port: 9200,
                username: None,
                password: None,
                use_ssl: false,
                timeout_secs: 300,
            },
            discovery: DiscoveryConfig {
                retention_days: 3,
                max_buckets: -1,
                max_members_per_bucket: -1,
                index_prefix: String::new(),
            },
            plan: PlanConfig {
                shards: 4,
                replicas: 1,
                reindex_slices: 4,
                reindex_batch_size: 4000,
                retire_mode: RetireMode::Close,
            },
            queue: QueueConfig {
                backend: QueueBackend::Memory,
                redis_url: None,
                queue_name: "consolidator".to_string(),
                max_attempts: 3,
                retry_backoff_secs: 5,
                task_ttl_secs: 86400,
                result_ttl_secs: 86400,
                inflight_ttl_secs: 3600,
            },
            runner: RunnerConfig {
                binary: "/usr/local/bin/curator".into(),
                work_dir: "./work".into(),
                timeout_secs: 3600,
                log_tail_lines: 100,
                log_level: "info".to_string(),
            },
            scheduler: SchedulerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster HTTP host
    pub host: String,

    /// Cluster HTTP port
    #[serde(default = "default_cluster_port")]
    pub port: u16,

    /// Basic auth username (empty = anonymous)
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password
    #[serde(default)]
    pub password: Option<String>,

    /// Use HTTPS
    #[serde(default)]
    pub use_ssl: bool,

    /// Request timeout (seconds)
    #[serde(default = "default_cluster_timeout")]
    pub timeout_secs: u64,
}

impl ClusterConfig {
    /// Base URL for cluster requests
    pub fn base_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Only indices strictly older than this many days are eligible
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Maximum buckets admitted per cycle (negative = unbounded)
    #[serde(default = "default_unbounded")]
    pub max_buckets: i64,

    /// Maximum member indices per bucket (negative = unbounded)
    #[serde(default = "default_unbounded")]
    pub max_members_per_bucket: i64,

    /// Only consider indices starting with this prefix (empty = all)
    #[serde(default)]
    pub index_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Shard count for the monthly target index
    #[serde(default = "default_shards")]
    pub shards: u32,

    /// Replica count for the monthly target index
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// Parallel slices per reindex operation
    #[serde(default = "default_reindex_slices")]
    pub reindex_slices: u32,

    /// Documents per reindex scroll batch
    #[serde(default = "default_reindex_batch_size")]
    pub reindex_batch_size: u32,

    /// What to do with a daily index after reindexing
    #[serde(default)]
    pub retire_mode: RetireMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue backend
    #[serde(default)]
    pub backend: QueueBackend,

    /// Redis connection string
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Queue name (key prefix on redis)
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Maximum delivery attempts per task
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base retry backoff (seconds); doubled per attempt
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    /// How long an enqueued task stays valid (seconds)
    #[serde(default = "default_task_ttl")]
    pub task_ttl_secs: u64,

    /// How long failed-task records are kept (seconds)
    #[serde(default = "default_result_ttl")]
    pub result_ttl_secs: u64,

    /// In-flight claim TTL; must exceed the longest expected consolidation
    #[serde(default = "default_inflight_ttl")]
    pub inflight_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Plan runner executable
    #[serde(default = "default_runner_binary")]
    pub binary: PathBuf,

    /// Directory for generated plan and client-config files
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Hard wall-clock timeout for one runner invocation (seconds)
    #[serde(default = "default_runner_timeout")]
    pub timeout_secs: u64,

    /// Number of trailing output lines kept in the task result
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,

    /// Log level passed through to the runner client config
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Enable the periodic dispatch job
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cron expression for dispatch cycles
    #[serde(default = "default_cron")]
    pub cron: String,

    /// Workers spawned in standalone mode
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            cron: default_cron(),
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: default_true(),
        }
    }
}

// Default value functions
fn default_cluster_port() -> u16 {
    9200
}

fn default_cluster_timeout() -> u64 {
    300
}

fn default_retention_days() -> i64 {
    3
}

fn default_unbounded() -> i64 {
    -1
}

fn default_shards() -> u32 {
    4
}

fn default_replicas() -> u32 {
    1
}

fn default_reindex_slices() -> u32 {
    4
}

fn default_reindex_batch_size() -> u32 {
    4000
}

fn default_queue_name() -> String {
    "consolidator".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    5
}

fn default_task_ttl() -> u64 {
    86400
}

fn default_result_ttl() -> u64 {
    86400
}

fn default_inflight_ttl() -> u64 {
    3600
}

fn default_runner_binary() -> PathBuf {
    "/usr/local/bin/curator".into()
}

fn default_work_dir() -> PathBuf {
    "./work".into()
}

fn default_runner_timeout() -> u64 {
    3600
}

fn default_log_tail_lines() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cron() -> String {
    // Once an hour, on the hour
    "0 0 * * * *".to_string()
}

fn default_workers() -> usize {
    2
}
