//! In-memory [`VectorStore`] for tests and small offline corpora.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every point in the collection.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;

use super::{Point, QueryRequest, ScoredPoint, VectorStore};

/// In-memory store keyed by collection name.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<Point>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of points stored in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn query(&self, request: &QueryRequest<'_>) -> Result<Vec<ScoredPoint>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        let Some(points) = collections.get(request.collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredPoint> = points
            .iter()
            .filter(|p| p.vector_name.as_deref() == request.using)
            .filter(|p| {
                request
                    .filter
                    .map_or(true, |f| p.payload.kind == f.modality)
            })
            .map(|p| ScoredPoint {
                id: p.id,
                score: cosine_similarity(request.vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(request.limit);
        Ok(scored)
    }

    async fn upsert(&self, collection: &str, points: &[Point]) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        let stored = collections.entry(collection.to_string()).or_default();
        for p in points {
            stored.retain(|existing| existing.id != p.id);
            stored.push(p.clone());
        }
        Ok(())
    }
}
