//! Qdrant-backed [`VectorStore`] over the REST API.
//!
//! Collections use cosine distance; payloads are stored inline so search
//! hits can be converted to retrieved chunks without a metadata join.
//! Upserts go out in batches of 100 with `wait=true` so a returned `Ok`
//! means the points are durable.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::VectorConfig;
use crate::error::{Error, Result};

use super::{PointPayload, SearchHit, VectorPoint, VectorStore};

const UPSERT_BATCH: usize = 100;

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Provider(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    /// Create the collection if it does not exist yet. Idempotent.
    pub async fn ensure_collection(&self, dims: usize) -> Result<()> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/collections/{}", self.collection),
            )
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        if resp.status().is_success() {
            return Ok(());
        }
        if resp.status().as_u16() != 404 {
            return Err(Error::Provider(format!(
                "qdrant collection check failed: {}",
                resp.status()
            )));
        }

        let body = json!({
            "vectors": { "size": dims, "distance": "Cosine" }
        });
        let resp = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}", self.collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Provider(format!(
                "qdrant collection create failed: {}",
                resp.status()
            )));
        }

        tracing::info!(collection = %self.collection, dims, "created qdrant collection");
        Ok(())
    }

    fn policy_filter(policy_ids: Option<&[String]>) -> Option<serde_json::Value> {
        policy_ids.map(|ids| {
            json!({
                "must": [{ "key": "policy_id", "match": { "any": ids } }]
            })
        })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        let total = points.len();
        for batch in points.chunks(UPSERT_BATCH) {
            let body = json!({
                "points": batch.iter().map(|p| {
                    json!({
                        "id": p.key,
                        "vector": p.vector,
                        "payload": p.payload,
                    })
                }).collect::<Vec<_>>()
            });

            let resp = self
                .request(
                    reqwest::Method::PUT,
                    &format!("/collections/{}/points?wait=true", self.collection),
                )
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::Provider(e.to_string()))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(Error::Provider(format!(
                    "qdrant upsert failed {}: {}",
                    status, text
                )));
            }
        }

        tracing::info!(count = total, collection = %self.collection, "upserted vectors");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        score_threshold: f32,
        policy_ids: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let mut body = json!({
            "vector": query,
            "limit": top_k,
            "score_threshold": score_threshold,
            "with_payload": true,
        });
        if let Some(filter) = Self::policy_filter(policy_ids) {
            body["filter"] = filter;
        }

        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", self.collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "qdrant search failed {}: {}",
                status, text
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;
        let results = json
            .get("result")
            .and_then(|r| r.as_array())
            .ok_or_else(|| Error::Provider("invalid qdrant search response".to_string()))?;

        let mut hits = Vec::with_capacity(results.len());
        for item in results {
            let key = item
                .get("id")
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            let score = item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32;
            let payload: PointPayload = item
                .get("payload")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| Error::Provider(format!("invalid qdrant payload: {}", e)))?
                .ok_or_else(|| Error::Provider("qdrant hit missing payload".to_string()))?;

            hits.push(SearchHit {
                key,
                score,
                payload,
            });
        }

        tracing::debug!(count = hits.len(), threshold = score_threshold, "qdrant search");
        Ok(hits)
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<()> {
        let body = json!({
            "filter": {
                "must": [{ "key": "policy_id", "match": { "value": policy_id } }]
            }
        });

        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/delete?wait=true", self.collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "qdrant delete failed {}: {}",
                status, text
            )));
        }

        tracing::info!(policy_id, "deleted vectors for policy");
        Ok(())
    }
}
