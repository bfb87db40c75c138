use crate::models::{ProfilePayload, VectorHit, VectorRecord};
use crate::traits::{Distance, VectorIndex};
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_INDEX_TIMEOUT: Duration = Duration::from_secs(30);

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::builder().timeout(timeout).build()?,
            vector_size,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn check_dimension(&self, length: usize) -> Result<(), SearchError> {
        if length != self.vector_size {
            return Err(SearchError::Request(format!(
                "vector dimension {} != {}",
                length, self.vector_size
            )));
        }
        Ok(())
    }
}

async fn ensure_success(response: Response) -> Result<Response, SearchError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::BackendResponse {
        backend: "qdrant".to_string(),
        details: format!("{status}: {body}"),
    })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_collection(
        &self,
        dimension: usize,
        distance: Distance,
    ) -> Result<(), SearchError> {
        if self.vector_size != dimension {
            return Err(SearchError::Request(format!(
                "configured vector size {} does not match requested {}",
                self.vector_size, dimension
            )));
        }

        let response = self.client.get(self.collection_url()).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            ensure_success(response).await?;
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": dimension,
                    "distance": distance.as_str(),
                }
            }))
            .send()
            .await?;
        ensure_success(response).await?;

        info!(collection = %self.collection, dimension, "created vector collection");
        Ok(())
    }

    async fn upsert(&self, record: VectorRecord) -> Result<(), SearchError> {
        self.check_dimension(record.vector.len())?;

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({
                "points": [{
                    "id": record.id,
                    "vector": record.vector,
                    "payload": serde_json::to_value(&record.payload)?,
                }]
            }))
            .send()
            .await?;
        ensure_success(response).await?;

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        score_threshold: f64,
        limit: usize,
    ) -> Result<Vec<VectorHit>, SearchError> {
        self.check_dimension(vector.len())?;

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "score_threshold": score_threshold,
                "with_payload": true,
            }))
            .send()
            .await?;

        let parsed: Value = ensure_success(response).await?.json().await?;
        let mut hits = parse_search_hits(&parsed);
        hits.retain(|hit| hit.score >= score_threshold);
        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), SearchError> {
        if ids.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({ "points": ids }))
            .send()
            .await?;
        ensure_success(response).await?;

        Ok(())
    }

    async fn delete_collection(&self) -> Result<(), SearchError> {
        let response = self.client.delete(self.collection_url()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await?;

        Ok(())
    }
}

fn parse_search_hits(parsed: &Value) -> Vec<VectorHit> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.into_iter()
        .filter_map(|hit| {
            let id = match hit.pointer("/id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => return None,
            };
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let payload = hit
                .pointer("/payload")
                .cloned()
                .and_then(|payload| serde_json::from_value::<ProfilePayload>(payload).ok())?;

            Some(VectorHit { id, score, payload })
        })
        .collect()
}
