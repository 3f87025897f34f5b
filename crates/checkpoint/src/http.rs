//! HTTP checkpoint transport.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::position::{FilePosition, PositionMap};
use crate::store::CheckpointStore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Pushes positions to a checkpoint collector.
///
/// `base_url` is the collector root: positions are POSTed to
/// `{base_url}/checkpoint` and read back from `{base_url}/positions/{pod}`.
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CheckpointStore for HttpStore {
    async fn store_position(&self, position: &FilePosition) -> Result<()> {
        let url = format!("{}/checkpoint", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(position)
            .send()
            .await
            .with_context(|| format!("Failed to POST checkpoint to {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("Checkpoint POST to {} returned {}", url, response.status());
        }
        Ok(())
    }

    async fn read_positions(&self, task_id: &str, pod_num: &str) -> Result<PositionMap> {
        let url = format!("{}/positions/{}", self.base_url, pod_num);
        let response = self
            .client
            .get(&url)
            .query(&[("taskId", task_id)])
            .send()
            .await
            .with_context(|| format!("Failed to GET positions from {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("Position GET from {} returned {}", url, response.status());
        }
        response
            .json::<PositionMap>()
            .await
            .context("Invalid position map from collector")
    }
}
