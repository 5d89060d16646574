//! Qdrant REST client implementing [`VectorStore`].
//!
//! Endpoints used:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | query | `POST /collections/{c}/points/query` |
//! | upsert | `PUT /collections/{c}/points?wait=true` |
//! | exists | `GET /collections/{c}/exists` |
//! | create | `PUT /collections/{c}` |
//!
//! Text and image points share one collection. Their vectors usually differ
//! in size, so each modality gets its own named vector. The payload field
//! `type` tells them apart in filters.
//!
//! Request bodies are built and responses decoded by free functions so they
//! can be tested without a server.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use mmrag_core::models::Payload;
use mmrag_core::store::{Point, QueryRequest, ScoredPoint, VectorStore};

use crate::config::QdrantConfig;

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantStore {
    /// Build a client. Reads the API key from `api_key_env` when set.
    pub fn new(config: &QdrantConfig) -> Result<Self> {
        let api_key = if config.api_key_env.is_empty() {
            None
        } else {
            let key = std::env::var(&config.api_key_env)
                .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
            Some(key)
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Qdrant {} request failed (is Qdrant running at {}?)", what, self.base_url))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Qdrant {} error {}: {}", what, status, body_text);
        }
        Ok(response.json().await?)
    }

    /// Create `collection` unless it already exists.
    ///
    /// `vectors` lists `(name, dims)` per modality. Either every entry is
    /// named or none is; unnamed entries must agree on size.
    pub async fn ensure_collection(
        &self,
        collection: &str,
        vectors: &[(Option<&str>, usize)],
    ) -> Result<bool> {
        let json = self
            .send(
                self.request(
                    reqwest::Method::GET,
                    &format!("/collections/{}/exists", collection),
                ),
                "exists",
            )
            .await?;
        if parse_exists_response(&json)? {
            tracing::debug!(collection, "collection exists");
            return Ok(false);
        }

        let body = collection_body(vectors)?;
        self.send(
            self.request(reqwest::Method::PUT, &format!("/collections/{}", collection))
                .json(&body),
            "create collection",
        )
        .await?;
        tracing::info!(collection, "created collection");
        Ok(true)
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn query(&self, request: &QueryRequest<'_>) -> Result<Vec<ScoredPoint>> {
        let body = query_body(request);
        let json = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{}/points/query", request.collection),
                )
                .json(&body),
                "query",
            )
            .await?;
        parse_query_response(&json)
    }

    async fn upsert(&self, collection: &str, points: &[Point]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = upsert_body(points)?;
        self.send(
            self.request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", collection),
            )
            .json(&body),
            "upsert",
        )
        .await?;
        Ok(())
    }
}

// ============ Request bodies ============

pub fn query_body(request: &QueryRequest<'_>) -> Value {
    let mut body = json!({
        "query": request.vector,
        "limit": request.limit,
        "with_payload": request.with_payload,
    });
    if let Some(using) = request.using {
        body["using"] = json!(using);
    }
    if let Some(filter) = request.filter {
        body["filter"] = json!({
            "must": [
                { "key": "type", "match": { "value": filter.modality.as_str() } }
            ]
        });
    }
    body
}

pub fn upsert_body(points: &[Point]) -> Result<Value> {
    let mut out = Vec::with_capacity(points.len());
    for p in points {
        let vector = match &p.vector_name {
            Some(name) => {
                let mut named = serde_json::Map::new();
                named.insert(name.clone(), json!(p.vector));
                Value::Object(named)
            }
            None => json!(p.vector),
        };
        out.push(json!({
            "id": p.id,
            "vector": vector,
            "payload": serde_json::to_value(&p.payload)?,
        }));
    }
    Ok(json!({ "points": out }))
}

pub fn collection_body(vectors: &[(Option<&str>, usize)]) -> Result<Value> {
    if vectors.is_empty() {
        bail!("no vector definitions for collection");
    }
    let named = vectors.iter().filter(|(name, _)| name.is_some()).count();

    if named == vectors.len() {
        let mut map = serde_json::Map::new();
        for (name, size) in vectors {
            if let Some(name) = name {
                map.insert(
                    name.to_string(),
                    json!({ "size": size, "distance": "Cosine" }),
                );
            }
        }
        return Ok(json!({ "vectors": map }));
    }

    if named > 0 {
        bail!("text_vector and image_vector must both be named or both be empty");
    }
    let size = vectors[0].1;
    if vectors.iter().any(|(_, s)| *s != size) {
        bail!(
            "unnamed vectors need equal dimensions, got {:?}; configure named vectors",
            vectors.iter().map(|(_, s)| *s).collect::<Vec<_>>()
        );
    }
    Ok(json!({ "vectors": { "size": size, "distance": "Cosine" } }))
}

// ============ Responses ============

pub fn parse_query_response(json: &Value) -> Result<Vec<ScoredPoint>> {
    let points = json
        .get("result")
        .and_then(|r| r.get("points"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result.points"))?;

    let mut out = Vec::with_capacity(points.len());
    for point in points {
        let id = point
            .get("id")
            .and_then(|id| id.as_u64())
            .ok_or_else(|| anyhow!("Invalid Qdrant response: point id is not an integer"))?;
        let score = point
            .get("score")
            .and_then(|s| s.as_f64())
            .ok_or_else(|| anyhow!("Invalid Qdrant response: point {} has no score", id))?
            as f32;
        let payload: Payload = match point.get("payload") {
            Some(p) => serde_json::from_value(p.clone())
                .with_context(|| format!("Invalid payload on point {}", id))?,
            None => bail!("Qdrant point {} returned without payload", id),
        };
        out.push(ScoredPoint { id, score, payload });
    }
    Ok(out)
}

pub fn parse_exists_response(json: &Value) -> Result<bool> {
    json.get("result")
        .and_then(|r| r.get("exists"))
        .and_then(|e| e.as_bool())
        .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result.exists"))
}
