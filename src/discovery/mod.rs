//! Index discovery and month bucketing

use crate::cluster::SearchCluster;
use crate::config::DiscoveryConfig;
use crate::error::{AppError, Result};
use crate::models::{MonthBucket, ParsedIndex};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Bucketing rules for one discovery pass
#[derive(Debug, Clone)]
pub struct BucketingOptions {
    /// Only indices strictly older than this many days qualify
    pub retention_days: i64,

    /// Stop admitting new buckets past this count (negative = unbounded)
    pub max_buckets: i64,

    /// Drop members beyond this count per bucket (negative = unbounded)
    pub max_members_per_bucket: i64,
}

impl From<&DiscoveryConfig> for BucketingOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            retention_days: config.retention_days,
            max_buckets: config.max_buckets,
            max_members_per_bucket: config.max_members_per_bucket,
        }
    }
}

/// Group daily index names into month buckets.
///
/// Input order does not matter: names are sorted lexicographically, which
/// for the zero-padded date suffix format is also chronological, so each
/// bucket's member list comes out ascending by date. Names that do not
/// parse are skipped. An index qualifies only when its age is strictly
/// greater than the retention threshold.
pub fn bucket_indices(
    names: &[String],
    today: NaiveDate,
    opts: &BucketingOptions,
) -> Vec<MonthBucket> {
    let mut sorted: Vec<&String> = names.iter().collect();
    sorted.sort();

    let mut buckets: Vec<MonthBucket> = Vec::new();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for name in sorted {
        let parsed = match ParsedIndex::parse(name) {
            Some(parsed) => parsed,
            None => {
                debug!(index = %name, "Skipping index without a daily date suffix");
                continue;
            }
        };

        if parsed.age_days(today) <= opts.retention_days {
            continue;
        }

        match index_by_key.get(&parsed.month_key) {
            Some(&slot) => {
                let bucket = &mut buckets[slot];
                if opts.max_members_per_bucket >= 0
                    && bucket.members.len() as i64 >= opts.max_members_per_bucket
                {
                    debug!(
                        index = %parsed.name,
                        bucket = %bucket.key,
                        cap = opts.max_members_per_bucket,
                        "Member cap reached; index deferred to a later run"
                    );
                    continue;
                }
                bucket.members.push(parsed.name);
            }
            None => {
                if opts.max_members_per_bucket == 0 {
                    continue;
                }
                // Existing buckets keep filling even after the bucket cap
                // is reached; only admission of new buckets stops.
                if opts.max_buckets >= 0 && buckets.len() as i64 >= opts.max_buckets {
                    continue;
                }
                let mut bucket = MonthBucket::new(parsed.month_key.clone());
                bucket.members.push(parsed.name);
                index_by_key.insert(parsed.month_key, buckets.len());
                buckets.push(bucket);
            }
        }
    }

    buckets
}

/// Cluster-backed discovery: lists indices and buckets them
pub struct DiscoveryService {
    cluster: Arc<dyn SearchCluster>,
    config: DiscoveryConfig,
}

impl DiscoveryService {
    pub fn new(cluster: Arc<dyn SearchCluster>, config: DiscoveryConfig) -> Self {
        Self { cluster, config }
    }

    /// Run one discovery pass against the cluster
    pub async fn discover(&self, today: NaiveDate) -> Result<Vec<MonthBucket>> {
        let prefix = if self.config.index_prefix.is_empty() {
            None
        } else {
            Some(self.config.index_prefix.as_str())
        };

        let names = self
            .cluster
            .list_indices(prefix)
            .await
            .map_err(|e| AppError::Discovery(e.to_string()))?;

        let buckets = bucket_indices(&names, today, &BucketingOptions::from(&self.config));

        info!(
            indices = names.len(),
            buckets = buckets.len(),
            retention_days = self.config.retention_days,
            "Discovery pass complete"
        );

        Ok(buckets)
    }
}
