//! HTTP implementation of the cluster capability (Elasticsearch-style REST)

use crate::cluster::{CreateOutcome, RetireOutcome, SearchCluster};
use crate::config::ClusterConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Cluster client over the REST API with basic auth and a request timeout
#[derive(Clone)]
pub struct HttpClusterClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpClusterClient {
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// For tests: point the client at an arbitrary base URL
    #[doc(hidden)]
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            username: None,
            password: None,
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_error_body(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        format!("status {}: {}", status, body)
    }
}

#[async_trait]
impl SearchCluster for HttpClusterClient {
    async fn list_indices(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let pattern = match prefix {
            Some(prefix) => format!("{}*", prefix),
            None => "*".to_string(),
        };
        let url = self.url(&format!("/{}/_alias?expand_wildcards=open", pattern));

        let response = self.authed(self.client.get(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(AppError::Cluster(Self::read_error_body(response).await));
        }

        let body: Value = response.json().await?;
        let names = body
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();

        debug!(pattern = %pattern, "Listed cluster indices");
        Ok(names)
    }

    async fn create_index(
        &self,
        name: &str,
        shards: u32,
        replicas: u32,
    ) -> Result<CreateOutcome> {
        let url = self.url(&format!("/{}", name));
        let body = json!({
            "settings": {
                "number_of_shards": shards,
                "number_of_replicas": replicas,
            }
        });

        let response = self.authed(self.client.put(&url)).json(&body).send().await?;

        if response.status().is_success() {
            return Ok(CreateOutcome::Created);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && text.contains("resource_already_exists_exception")
        {
            debug!(index = %name, "Index already exists; treating as success");
            return Ok(CreateOutcome::AlreadyExists);
        }

        Err(AppError::Cluster(format!("status {}: {}", status, text)))
    }

    async fn reindex(
        &self,
        sources: &[String],
        dest: &str,
        slices: u32,
        batch_size: u32,
        wait_for_completion: bool,
    ) -> Result<()> {
        let url = self.url(&format!(
            "/_reindex?slices={}&wait_for_completion={}",
            slices, wait_for_completion
        ));
        let body = json!({
            "source": { "index": sources, "size": batch_size },
            "dest": { "index": dest },
        });

        let response = self.authed(self.client.post(&url)).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Cluster(Self::read_error_body(response).await));
        }
        Ok(())
    }

    async fn close_index(&self, name: &str) -> Result<RetireOutcome> {
        let url = self.url(&format!("/{}/_close", name));
        let response = self.authed(self.client.post(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(RetireOutcome::NotFound);
        }
        if !response.status().is_success() {
            return Err(AppError::Cluster(Self::read_error_body(response).await));
        }
        Ok(RetireOutcome::Done)
    }

    async fn delete_index(&self, name: &str) -> Result<RetireOutcome> {
        let url = self.url(&format!("/{}", name));
        let response = self.authed(self.client.delete(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(RetireOutcome::NotFound);
        }
        if !response.status().is_success() {
            return Err(AppError::Cluster(Self::read_error_body(response).await));
        }
        Ok(RetireOutcome::Done)
    }
}
