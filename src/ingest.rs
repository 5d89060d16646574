//! `mmrag ingest`: load articles and their media into the vector index.
//!
//! Input is JSON Lines, one article per line:
//!
//! ```json
//! {"url": "https://…", "title": "…", "content": "…", "media_paths": ["media/a.jpg"]}
//! ```
//!
//! Each article yields one text point (text space) and one image point per
//! media file that exists (cross-modal space). Point ids are sequential.
//! Missing or unreadable images are skipped with a warning; text embedding
//! and upsert failures abort the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use mmrag_core::embedding::EmbeddingDispatcher;
use mmrag_core::error::{Error, Stage};
use mmrag_core::models::{Payload, NO_TITLE};
use mmrag_core::store::{Point, VectorNames, VectorStore};

use crate::config::Config;
use crate::qdrant::QdrantStore;
use crate::setup::{build_dispatcher, vector_names};

/// One input line.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ArticleRecord {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub articles: usize,
    pub text_points: usize,
    pub image_points: usize,
    pub skipped_media: usize,
    pub next_id: u64,
}

/// Target index and batching for one ingest run.
pub struct IngestTarget<'a> {
    pub store: &'a dyn VectorStore,
    pub collection: &'a str,
    pub names: &'a VectorNames,
    pub batch_size: usize,
    pub start_id: u64,
    pub document_prefix: &'a str,
}

pub async fn run_ingest(
    cfg: &Config,
    input: &Path,
    batch_size: usize,
    start_id: u64,
) -> Result<()> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read articles file: {}", input.display()))?;
    let articles = parse_articles(&content)?;

    let store = Arc::new(QdrantStore::new(&cfg.qdrant)?);
    let dispatcher = build_dispatcher(cfg)?;
    let names = vector_names(cfg);

    let created = store
        .ensure_collection(
            &cfg.qdrant.collection,
            &[
                (names.text.as_deref(), dispatcher.text_dims()),
                (names.image.as_deref(), dispatcher.crossmodal_dims()),
            ],
        )
        .await?;

    let target = IngestTarget {
        store: store.as_ref(),
        collection: &cfg.qdrant.collection,
        names: &names,
        batch_size: batch_size.max(1),
        start_id,
        document_prefix: &cfg.embedding.document_prefix,
    };
    let summary = ingest_articles(&articles, &dispatcher, &target).await?;

    println!("ingest {}", input.display());
    if created {
        println!("  created collection: {}", cfg.qdrant.collection);
    }
    println!("  articles: {}", summary.articles);
    println!("  text points: {}", summary.text_points);
    println!("  image points: {}", summary.image_points);
    println!("  skipped media: {}", summary.skipped_media);
    println!("  next id: {}", summary.next_id);
    println!("ok");
    Ok(())
}

/// Parse JSON Lines, skipping blank lines.
pub fn parse_articles(content: &str) -> Result<Vec<ArticleRecord>> {
    let mut out = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: ArticleRecord = serde_json::from_str(line)
            .with_context(|| format!("Invalid article on line {}", i + 1))?;
        out.push(record);
    }
    Ok(out)
}

/// Embed and upsert every article and its media.
pub async fn ingest_articles(
    articles: &[ArticleRecord],
    dispatcher: &EmbeddingDispatcher,
    target: &IngestTarget<'_>,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary {
        next_id: target.start_id,
        ..IngestSummary::default()
    };
    let mut buffer: Vec<Point> = Vec::with_capacity(target.batch_size);

    for article in articles {
        let title = article.title.as_deref().unwrap_or(NO_TITLE);
        let content = article.content.as_deref().unwrap_or("");

        let text = format!("{}{} {}", target.document_prefix, title, content);
        let vector = dispatcher
            .embed_documents(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::capability(Stage::TextEmbedding, anyhow::anyhow!("no vector")))?;
        buffer.push(Point {
            id: summary.next_id,
            vector_name: target.names.text.clone(),
            vector,
            payload: Payload::text(title, content, article.url.as_deref()),
        });
        summary.next_id += 1;
        summary.text_points += 1;

        for media in &article.media_paths {
            let path = PathBuf::from(media);
            let is_file = tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !is_file {
                tracing::warn!(path = %media, "media file missing, skipping");
                summary.skipped_media += 1;
                continue;
            }
            let vector = match dispatcher.embed_image(path).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(path = %media, error = %e, "image embedding failed, skipping");
                    summary.skipped_media += 1;
                    continue;
                }
            };
            buffer.push(Point {
                id: summary.next_id,
                vector_name: target.names.image.clone(),
                vector,
                payload: Payload::image(title, media),
            });
            summary.next_id += 1;
            summary.image_points += 1;
        }

        summary.articles += 1;
        if buffer.len() >= target.batch_size {
            flush(target, &mut buffer).await?;
        }
    }

    flush(target, &mut buffer).await?;
    tracing::info!(
        articles = summary.articles,
        text_points = summary.text_points,
        image_points = summary.image_points,
        skipped_media = summary.skipped_media,
        "ingest complete"
    );
    Ok(summary)
}

async fn flush(target: &IngestTarget<'_>, buffer: &mut Vec<Point>) -> Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    target
        .store
        .upsert(target.collection, buffer)
        .await
        .map_err(|e| Error::capability(Stage::Upsert, e))?;
    tracing::debug!(points = buffer.len(), "upserted batch");
    buffer.clear();
    Ok(())
}
