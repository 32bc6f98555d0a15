use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Map, Value};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

use super::types::{IndexPoint, QueryResponse, ScoredHit, ScrollResponse};
use super::VectorCollection;

const SCROLL_PAGE_SIZE: usize = 512;

pub struct VectorIndexService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl VectorIndexService {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent("paperquery/0.1")
            .build()
            .map_err(AppError::from)?;

        Ok(Self {
            client,
            base_url: config.vector_index_url.trim_end_matches('/').to_string(),
            api_key: config.vector_index_api_key.clone(),
        })
    }

    /// Create both collections if absent and ensure their payload indexes.
    /// Auto-vectorization stays off: vectors are always supplied by the
    /// coordinator so the indexed vector and the relational embedding are
    /// guaranteed identical.
    pub async fn ensure_collections(&self, vector_size: u64) -> AppResult<()> {
        for collection in VectorCollection::ALL {
            if !self.collection_exists(collection).await? {
                tracing::debug!(collection = collection.name(), vector_size, "creating collection");
                self.create_collection(collection, vector_size).await?;
            }
            self.ensure_payload_indexes(collection).await?;
        }
        Ok(())
    }

    pub async fn upsert_points(
        &self,
        collection: VectorCollection,
        points: Vec<IndexPoint>,
    ) -> AppResult<()> {
        if points.is_empty() {
            return Ok(());
        }

        let point_count = points.len();
        let serialized: Vec<Value> = points
            .into_iter()
            .map(|point| {
                json!({
                    "id": point.id,
                    "vector": point.vector,
                    "payload": Value::Object(point.payload),
                })
            })
            .collect();

        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", collection.name()),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, "point upsert failed").await?;
        tracing::debug!(collection = collection.name(), points = point_count, "points indexed");
        Ok(())
    }

    /// Nearest-neighbor query. `max_distance` is the relevance cutoff
    /// (lower distance = more similar); it maps onto the index's cosine
    /// score threshold, and hit scores are reported back as distances.
    pub async fn search_points(
        &self,
        collection: VectorCollection,
        vector: &[f32],
        limit: usize,
        max_distance: f32,
        filter: Option<Value>,
    ) -> AppResult<Vec<ScoredHit>> {
        let mut body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
            "score_threshold": 1.0 - max_distance,
        });

        if let (Some(filter_value), Some(body_map)) = (filter, body.as_object_mut()) {
            body_map.insert("filter".into(), filter_value);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", collection.name()),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(collection = collection.name(), %status, %body, "index search failed");
            return Err(AppError::provider(format!(
                "index search failed with status {status}"
            )));
        }

        let payload: QueryResponse = response
            .json()
            .await
            .map_err(|err| AppError::provider(format!("malformed search response: {err}")))?;

        let hits = payload
            .result
            .points
            .into_iter()
            .map(|point| ScoredHit {
                distance: 1.0 - point.score,
                payload: point.payload.unwrap_or_default(),
            })
            .collect();

        Ok(hits)
    }

    pub async fn delete_by_filter(
        &self,
        collection: VectorCollection,
        filter: Value,
    ) -> AppResult<()> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", collection.name()),
            )
            .query(&[("wait", true)])
            .json(&json!({ "filter": filter }))
            .send()
            .await?;

        self.ensure_success(response, "filtered delete failed").await
    }

    /// Page through payloads matching a filter, up to `max_rows`. Used by
    /// the aggregation engine, which needs rows rather than neighbors.
    pub async fn scroll_payloads(
        &self,
        collection: VectorCollection,
        filter: Option<Value>,
        max_rows: usize,
    ) -> AppResult<Vec<Map<String, Value>>> {
        let mut offset: Option<Value> = None;
        let mut payloads = Vec::new();
        let filter_body = filter.unwrap_or_else(|| json!({ "must": [] }));

        loop {
            let mut body = json!({
                "with_payload": true,
                "with_vector": false,
                "limit": SCROLL_PAGE_SIZE.min(max_rows.saturating_sub(payloads.len()).max(1)),
                "filter": filter_body.clone(),
            });

            if let (Some(cursor), Some(body_map)) = (offset.clone(), body.as_object_mut()) {
                body_map.insert("offset".into(), cursor);
            }

            let response = self
                .request(
                    Method::POST,
                    &format!("collections/{}/points/scroll", collection.name()),
                )
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::error!(collection = collection.name(), %status, %body, "scroll failed");
                return Err(AppError::provider(format!(
                    "index scroll failed with status {status}"
                )));
            }

            let ScrollResponse { result } = response
                .json()
                .await
                .map_err(|err| AppError::provider(format!("malformed scroll response: {err}")))?;

            for point in result.points {
                if let Some(payload) = point.payload {
                    payloads.push(payload);
                }
            }

            if payloads.len() >= max_rows {
                payloads.truncate(max_rows);
                break;
            }

            match result.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(payloads)
    }

    async fn collection_exists(&self, collection: VectorCollection) -> AppResult<bool> {
        let response = self
            .request(Method::GET, &format!("collections/{}", collection.name()))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(collection = collection.name(), %status, %body, "collection check failed");
                Err(AppError::provider(format!(
                    "collection check failed with status {status}"
                )))
            }
        }
    }

    async fn create_collection(
        &self,
        collection: VectorCollection,
        vector_size: u64,
    ) -> AppResult<()> {
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}", collection.name()))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, "collection create failed")
            .await
    }

    async fn ensure_payload_indexes(&self, collection: VectorCollection) -> AppResult<()> {
        for field in collection.indexed_fields() {
            let body = json!({
                "field_name": field,
                "field_schema": "keyword",
            });

            let response = self
                .request(
                    Method::PUT,
                    &format!("collections/{}/index", collection.name()),
                )
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() || response.status() == StatusCode::CONFLICT {
                continue;
            }

            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                collection = collection.name(),
                field,
                %status,
                %body,
                "failed to ensure payload index"
            );
        }

        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self.client.request(method, url);
        if let Some(api_key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.header("api-key", api_key);
        }
        request
    }

    async fn ensure_success(&self, response: reqwest::Response, context: &str) -> AppResult<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, %body, "{context}");
            Err(AppError::provider(format!("{context} with status {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, Method::PUT, MockServer};

    fn service(base_url: String) -> VectorIndexService {
        VectorIndexService {
            client: Client::new(),
            base_url,
            api_key: None,
        }
    }

    #[tokio::test]
    async fn search_converts_scores_to_distances() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/document_chunks/points/query");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [
                            { "score": 0.9, "payload": { "text": "closest" } },
                            { "score": 0.6, "payload": { "text": "farther" } }
                        ]
                    }
                }));
            })
            .await;

        let hits = service(server.base_url())
            .search_points(VectorCollection::Chunks, &[0.1, 0.2], 5, 0.75, None)
            .await
            .expect("search");

        mock.assert();
        assert_eq!(hits.len(), 2);
        assert!((hits[0].distance - 0.1).abs() < 1e-6);
        assert!((hits[1].distance - 0.4).abs() < 1e-6);
    }

    #[tokio::test]
    async fn upsert_waits_for_commit() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/json_fields/points")
                    .query_param("wait", "true");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;

        let point = IndexPoint {
            id: "1f3e9f5a-0000-0000-0000-000000000000".into(),
            vector: vec![0.5, 0.5],
            payload: Map::new(),
        };

        service(server.base_url())
            .upsert_points(VectorCollection::JsonFields, vec![point])
            .await
            .expect("upsert");

        mock.assert();
    }

    #[tokio::test]
    async fn upsert_skips_empty_batches() {
        // No server: an empty batch must not issue a request at all.
        let result = service("http://127.0.0.1:1".into())
            .upsert_points(VectorCollection::Chunks, Vec::new())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn scroll_pages_until_cursor_exhausted() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/json_fields/points/scroll")
                    .matches(|req| {
                        let body = req.body.clone().unwrap_or_default();
                        !String::from_utf8_lossy(&body).contains("offset")
                    });
                then.status(200).json_body(json!({
                    "result": {
                        "points": [{ "payload": { "path": "a" } }],
                        "next_page_offset": "cursor-1"
                    }
                }));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/json_fields/points/scroll")
                    .body_contains("cursor-1");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [{ "payload": { "path": "b" } }],
                        "next_page_offset": null
                    }
                }));
            })
            .await;

        let payloads = service(server.base_url())
            .scroll_payloads(VectorCollection::JsonFields, None, 100)
            .await
            .expect("scroll");

        first.assert();
        second.assert();
        assert_eq!(payloads.len(), 2);
    }

    #[tokio::test]
    async fn search_failure_is_a_provider_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/document_chunks/points/query");
                then.status(500).body("index on fire");
            })
            .await;

        let err = service(server.base_url())
            .search_points(VectorCollection::Chunks, &[0.1], 5, 0.75, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Provider(_)));
    }
}
