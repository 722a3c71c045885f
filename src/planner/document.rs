//! Serialization boundary between the action model and the plan runner.
//!
//! The runner consumes a YAML document of the shape
//! `{actions: {1: {description, action, options, filters}, 2: ...}}` where
//! numeric key order is execution order. `BTreeMap<u32, _>` keeps the keys
//! sorted so the emitted document always matches the built plan.

use crate::error::Result;
use crate::models::{ClusterConnection, RetireMode};
use crate::planner::{Action, ActionPlan};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// The ordered plan document handed to the runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDocument {
    pub actions: BTreeMap<u32, ActionEntry>,
}

/// One runner action entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    pub description: String,
    pub action: String,
    pub options: serde_yaml::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<serde_yaml::Value>>,
}

fn yaml(value: serde_json::Value) -> Result<serde_yaml::Value> {
    Ok(serde_yaml::to_value(value)?)
}

/// Filter matching exactly one index name. Prefix matching is deliberately
/// not offered: a later day's index can share a prefix with an already
/// consolidated one, and retiring it unreindexed would lose data.
fn exact_name_filter(name: &str) -> Result<serde_yaml::Value> {
    yaml(json!({
        "filtertype": "pattern",
        "kind": "regex",
        "value": format!("^{}$", regex::escape(name)),
    }))
}

/// Encode an [`ActionPlan`] into the runner's document format
pub fn encode_plan(plan: &ActionPlan) -> Result<PlanDocument> {
    let mut actions = BTreeMap::new();
    let mut seq: u32 = 1;

    for action in &plan.actions {
        let entry = match action {
            Action::CreateIndex {
                name,
                shards,
                replicas,
            } => ActionEntry {
                description: format!("Create target index {}", name),
                action: "create_index".to_string(),
                options: yaml(json!({
                    "disable_action": false,
                    "name": name,
                    "continue_if_exception": true,
                    "extra_settings": {
                        "settings": {
                            "number_of_shards": shards,
                            "number_of_replicas": replicas,
                        }
                    },
                }))?,
                filters: None,
            },

            Action::Reindex {
                sources,
                dest,
                slices,
                batch_size,
                wait_for_completion,
            } => ActionEntry {
                description: format!("Reindex {:?} to {}", sources, dest),
                action: "reindex".to_string(),
                options: yaml(json!({
                    "disable_action": false,
                    "continue_if_exception": false,
                    "ignore_empty_list": true,
                    "timeout": 300,
                    "wait_interval": 9,
                    "max_wait": -1,
                    "requests_per_second": -1,
                    "slices": slices,
                    "wait_for_completion": wait_for_completion,
                    "request_body": {
                        "source": { "index": sources, "size": batch_size },
                        "dest": { "index": dest },
                    },
                }))?,
                filters: Some(vec![yaml(json!({
                    "filtertype": "closed",
                    "exclude": true,
                }))?]),
            },

            Action::Retire { name, mode } => {
                let (verb, action_name, options) = match mode {
                    RetireMode::Close => (
                        "Close",
                        "close",
                        json!({
                            "disable_action": false,
                            "continue_if_exception": true,
                            "delete_aliases": true,
                            "ignore_empty_list": true,
                            "timeout_override": 300,
                        }),
                    ),
                    RetireMode::Delete => (
                        "Delete",
                        "delete_indices",
                        json!({
                            "disable_action": false,
                            "continue_if_exception": true,
                            "ignore_empty_list": true,
                            "timeout_override": 300,
                        }),
                    ),
                };

                ActionEntry {
                    description: format!("{} index {} moved to {}", verb, name, plan.bucket_key),
                    action: action_name.to_string(),
                    options: yaml(options)?,
                    filters: Some(vec![exact_name_filter(name)?]),
                }
            }
        };

        actions.insert(seq, entry);
        seq += 1;
    }

    Ok(PlanDocument { actions })
}

/// Encode the client configuration document the runner reads alongside the plan
pub fn encode_runner_client_config(
    connection: &ClusterConnection,
    log_level: &str,
) -> Result<serde_yaml::Value> {
    let http_auth = match (&connection.username, &connection.password) {
        (Some(username), Some(password)) => format!("{}:{}", username, password),
        (Some(username), None) => username.clone(),
        _ => String::new(),
    };

    yaml(json!({
        "client": {
            "hosts": [connection.host],
            "port": connection.port,
            "url_prefix": null,
            "use_ssl": connection.use_ssl,
            "certificate": null,
            "client_cert": null,
            "client_key": null,
            "ssl_no_validate": false,
            "http_auth": http_auth,
            "timeout": connection.timeout_secs,
            "master_only": false,
        },
        "logging": {
            "loglevel": log_level.to_uppercase(),
            "logfile": null,
            "logformat": "default",
            "blacklist": ["elasticsearch", "urllib3"],
        },
    }))
}
