//! Qdrant collection writes over its REST API.

use std::time::Duration;

use async_trait::async_trait;
use oppsync_core::VectorPoint;
use serde::Serialize;
use tracing::{debug, warn};

use crate::StoreError;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert-or-overwrite keyed by point id.
    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct QdrantStore {
    client: reqwest::Client,
    config: QdrantConfig,
}

#[derive(Serialize)]
struct UpsertBody<'a> {
    points: &'a [VectorPoint],
}

impl QdrantStore {
    pub fn new(config: QdrantConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn points_url(&self) -> String {
        format!(
            "{}/collections/{}/points?wait=true",
            self.config.endpoint.trim_end_matches('/'),
            self.config.collection
        )
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let mut request = self
            .client
            .put(self.points_url())
            .json(&UpsertBody { points });
        if let Some(api_key) = &self.config.api_key {
            request = request.header("api-key", api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %body, "qdrant upsert rejected");
            return Err(StoreError::VectorStatus {
                status: status.as_u16(),
                body,
            });
        }
        debug!(
            collection = %self.config.collection,
            points = points.len(),
            "qdrant upsert"
        );
        Ok(())
    }
}
