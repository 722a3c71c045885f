//! Search-cluster capability interface

mod http;

pub use http::HttpClusterClient;

use crate::error::Result;
use async_trait::async_trait;

/// Outcome of an index-creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Benign on re-run; plans are idempotent
    AlreadyExists,
}

/// Outcome of a close or delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireOutcome {
    Done,
    /// Benign on re-run; a prior partial execution already removed it
    NotFound,
}

/// The capability set the consolidator consumes from the search cluster
#[async_trait]
pub trait SearchCluster: Send + Sync {
    /// List index names visible on the cluster, optionally prefix-filtered
    async fn list_indices(&self, prefix: Option<&str>) -> Result<Vec<String>>;

    /// Create an index with the given shard/replica settings
    async fn create_index(&self, name: &str, shards: u32, replicas: u32)
        -> Result<CreateOutcome>;

    /// Copy documents from the source indices into the destination
    async fn reindex(
        &self,
        sources: &[String],
        dest: &str,
        slices: u32,
        batch_size: u32,
        wait_for_completion: bool,
    ) -> Result<()>;

    /// Close an index (reversible)
    async fn close_index(&self, name: &str) -> Result<RetireOutcome>;

    /// Delete an index permanently
    async fn delete_index(&self, name: &str) -> Result<RetireOutcome>;
}
