//! Vector store abstraction and the retrieval planner.
//!
//! The [`VectorStore`] trait mirrors the query contract of an external
//! nearest-neighbour index: one shared collection holding text and image
//! points, discriminated by the payload field `type`. Implementations must
//! return points ordered by descending cosine similarity.
//!
//! [`RetrievalPlanner`] turns a query vector into an ordered candidate list
//! for one modality.

pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Stage};
use crate::models::{Candidate, Modality, Payload};

/// Default number of candidates fetched per modality.
pub const DEFAULT_TOP_K: usize = 10;

/// A point to be written to the index.
#[derive(Debug, Clone, Serialize)]
pub struct Point {
    /// Caller-assigned id.
    pub id: u64,
    /// Named vector slot, or `None` for the collection's unnamed vector.
    pub vector_name: Option<String>,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// A point returned by a query.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoredPoint {
    pub id: u64,
    pub score: f32,
    pub payload: Payload,
}

/// Server-side payload filter. Only the `type` discriminator is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadFilter {
    pub modality: Modality,
}

/// Bundles all inputs of one nearest-neighbour query.
#[derive(Debug, Clone)]
pub struct QueryRequest<'a> {
    pub collection: &'a str,
    pub vector: &'a [f32],
    /// Named vector to search, or `None` for the unnamed vector.
    pub using: Option<&'a str>,
    pub filter: Option<PayloadFilter>,
    pub limit: usize,
    pub with_payload: bool,
}

/// External nearest-neighbour index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return at most `limit` points, best first.
    async fn query(&self, request: &QueryRequest<'_>) -> Result<Vec<ScoredPoint>>;

    /// Insert or replace points by id.
    async fn upsert(&self, collection: &str, points: &[Point]) -> Result<()>;
}

/// Named vector slots per modality. `None` searches the unnamed vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorNames {
    pub text: Option<String>,
    pub image: Option<String>,
}

impl VectorNames {
    pub fn for_modality(&self, modality: Modality) -> Option<&str> {
        match modality {
            Modality::Text => self.text.as_deref(),
            Modality::Image => self.image.as_deref(),
        }
    }
}

/// Issues modality-filtered searches against one collection.
#[derive(Clone)]
pub struct RetrievalPlanner {
    store: Arc<dyn VectorStore>,
    collection: String,
    vector_names: VectorNames,
}

impl RetrievalPlanner {
    pub fn new(
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        vector_names: VectorNames,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            vector_names,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn vector_names(&self) -> &VectorNames {
        &self.vector_names
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Fetch up to `top_k` candidates of one modality, most similar first.
    ///
    /// An empty index is not an error. Points whose payload disagrees with
    /// the requested modality are dropped so that candidate numbering always
    /// refers to a single modality.
    pub async fn search(
        &self,
        vector: &[f32],
        modality: Modality,
        top_k: usize,
    ) -> crate::error::Result<Vec<Candidate>> {
        if top_k == 0 {
            return Err(Error::EvaluationPrecondition(
                "top_k must be > 0".to_string(),
            ));
        }

        let request = QueryRequest {
            collection: &self.collection,
            vector,
            using: self.vector_names.for_modality(modality),
            filter: Some(PayloadFilter { modality }),
            limit: top_k,
            with_payload: true,
        };

        let points = self
            .store
            .query(&request)
            .await
            .map_err(|e| Error::capability(Stage::VectorSearch, e))?;

        let total = points.len();
        let candidates: Vec<Candidate> = points
            .into_iter()
            .filter(|p| p.payload.kind == modality)
            .take(top_k)
            .map(|p| Candidate {
                id: p.id,
                similarity: p.score,
                payload: p.payload,
            })
            .collect();

        if candidates.len() < total.min(top_k) {
            tracing::warn!(
                modality = %modality,
                dropped = total - candidates.len(),
                "index returned points of the wrong modality"
            );
        }
        tracing::debug!(modality = %modality, hits = candidates.len(), "search complete");

        Ok(candidates)
    }
}
