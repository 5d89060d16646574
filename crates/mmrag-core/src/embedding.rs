//! Embedding traits and the query embedding dispatcher.
//!
//! Two vector spaces are in play:
//!
//! - the **text space**, produced by a sentence embedder that expects an
//!   instruction prefix on queries (e.g. `"query: "` for E5 models);
//! - the **cross-modal space**, shared by a CLIP-style text encoder and
//!   image encoder so that text queries can be matched against images.
//!
//! Concrete models live in the application crate. The dispatcher only
//! applies the prefix, L2-normalizes, and tags failures with their stage.
//! It never hands back a zero vector.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;

use crate::error::{Error, Result, Stage};

/// A model producing fixed-length vectors from text.
///
/// Implementations backed by local inference must keep the work off the
/// async executor (e.g. `tokio::task::spawn_blocking`).
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Returns the model identifier (e.g. `"multilingual-e5-base"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_texts(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// A model embedding text and images into one shared space.
#[async_trait]
pub trait CrossModalEmbedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// Encode texts with the model's text tower.
    async fn embed_texts(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
    /// Encode image files with the model's image tower.
    async fn embed_images(&self, paths: &[PathBuf]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Produces normalized query and document vectors for both spaces.
#[derive(Clone)]
pub struct EmbeddingDispatcher {
    text: Arc<dyn TextEmbedder>,
    crossmodal: Arc<dyn CrossModalEmbedder>,
    query_prefix: String,
}

impl EmbeddingDispatcher {
    pub fn new(
        text: Arc<dyn TextEmbedder>,
        crossmodal: Arc<dyn CrossModalEmbedder>,
        query_prefix: impl Into<String>,
    ) -> Self {
        Self {
            text,
            crossmodal,
            query_prefix: query_prefix.into(),
        }
    }

    pub fn text_dims(&self) -> usize {
        self.text.dims()
    }

    pub fn crossmodal_dims(&self) -> usize {
        self.crossmodal.dims()
    }

    /// Embed a query in the text space, with the instruction prefix applied.
    pub async fn embed_query_text(&self, query: &str) -> Result<Vec<f32>> {
        let input = format!("{}{}", self.query_prefix, query);
        single(self.text.embed_texts(&[input]).await)
            .and_then(l2_normalize)
            .map_err(|e| Error::capability(Stage::TextEmbedding, e))
    }

    /// Embed a query with the cross-modal text encoder.
    pub async fn embed_query_crossmodal(&self, query: &str) -> Result<Vec<f32>> {
        single(self.crossmodal.embed_texts(&[query.to_string()]).await)
            .and_then(l2_normalize)
            .map_err(|e| Error::capability(Stage::CrossModalEmbedding, e))
    }

    /// Embed article texts for indexing in the text space.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self
            .text
            .embed_texts(texts)
            .await
            .and_then(|v| expect_len(v, texts.len()))
            .map_err(|e| Error::capability(Stage::TextEmbedding, e))?;
        vectors
            .into_iter()
            .map(|v| l2_normalize(v).map_err(|e| Error::capability(Stage::TextEmbedding, e)))
            .collect()
    }

    /// Embed one image file in the cross-modal space.
    pub async fn embed_image(&self, path: PathBuf) -> Result<Vec<f32>> {
        single(self.crossmodal.embed_images(&[path]).await)
            .and_then(l2_normalize)
            .map_err(|e| Error::capability(Stage::ImageEmbedding, e))
    }
}

fn single(result: anyhow::Result<Vec<Vec<f32>>>) -> anyhow::Result<Vec<f32>> {
    result?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("empty embedding response"))
}

fn expect_len(vectors: Vec<Vec<f32>>, expected: usize) -> anyhow::Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        bail!(
            "embedding count mismatch: sent {}, received {}",
            expected,
            vectors.len()
        );
    }
    Ok(vectors)
}

/// Scale a vector to unit length.
///
/// Fails on empty, zero, or non-finite vectors rather than producing
/// something that silently matches nothing.
pub fn l2_normalize(mut v: Vec<f32>) -> anyhow::Result<Vec<f32>> {
    if v.is_empty() {
        bail!("embedding is empty");
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm < f32::EPSILON {
        bail!("embedding has zero or non-finite norm");
    }
    for x in &mut v {
        *x /= norm;
    }
    Ok(v)
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
