//! Consolidation action plan builder

pub mod document;

pub use document::{encode_plan, encode_runner_client_config, PlanDocument};

use crate::error::{AppError, Result};
use crate::models::{MonthBucket, RetireMode};
use serde::{Deserialize, Serialize};

/// Execution parameters for one plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanParams {
    pub shards: u32,
    pub replicas: u32,
    pub reindex_slices: u32,
    pub reindex_batch_size: u32,
    pub retire_mode: RetireMode,
}

/// One step of a consolidation plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Create the monthly destination index. Re-runs tolerate
    /// "already exists" as success.
    CreateIndex {
        name: String,
        shards: u32,
        replicas: u32,
    },

    /// Copy all documents from the daily sources into the destination.
    /// Source order mirrors the bucket's member order.
    Reindex {
        sources: Vec<String>,
        dest: String,
        slices: u32,
        batch_size: u32,
        wait_for_completion: bool,
    },

    /// Retire one daily source after its documents have been copied.
    /// Always matched by exact name, never by prefix.
    Retire { name: String, mode: RetireMode },
}

/// Ordered action sequence for exactly one month bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub bucket_key: String,
    pub actions: Vec<Action>,
}

impl ActionPlan {
    /// The ordered source list of the plan's reindex step
    pub fn reindex_sources(&self) -> Option<&[String]> {
        self.actions.iter().find_map(|action| match action {
            Action::Reindex { sources, .. } => Some(sources.as_slice()),
            _ => None,
        })
    }
}

/// Builds the ordered, idempotent plan for one bucket.
///
/// The emitted order is always: one CreateIndex, one Reindex over every
/// member in bucket order, then one Retire per member in the same order.
pub struct PlanBuilder;

impl PlanBuilder {
    pub fn build(bucket: &MonthBucket, params: &PlanParams) -> Result<ActionPlan> {
        if bucket.members.is_empty() {
            return Err(AppError::PlanValidation(format!(
                "bucket {} has no member indices",
                bucket.key
            )));
        }
        if params.shards == 0 {
            return Err(AppError::Configuration(
                "shard count must be positive".to_string(),
            ));
        }
        if params.reindex_slices == 0 {
            return Err(AppError::Configuration(
                "reindex slice count must be positive".to_string(),
            ));
        }
        if params.reindex_batch_size == 0 {
            return Err(AppError::Configuration(
                "reindex batch size must be positive".to_string(),
            ));
        }

        let mut actions = Vec::with_capacity(bucket.members.len() + 2);

        actions.push(Action::CreateIndex {
            name: bucket.key.clone(),
            shards: params.shards,
            replicas: params.replicas,
        });

        actions.push(Action::Reindex {
            sources: bucket.members.clone(),
            dest: bucket.key.clone(),
            slices: params.reindex_slices,
            batch_size: params.reindex_batch_size,
            wait_for_completion: true,
        });

        for member in &bucket.members {
            actions.push(Action::Retire {
                name: member.clone(),
                mode: params.retire_mode,
            });
        }

        Ok(ActionPlan {
            bucket_key: bucket.key.clone(),
            actions,
        })
    }
}
