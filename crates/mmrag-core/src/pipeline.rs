//! End-to-end query orchestration and batch evaluation.
//!
//! A [`Pipeline`] owns one handle per external capability, all injected at
//! construction. One query runs embed → search → assemble → generate →
//! parse. The two query embeddings are issued concurrently, and so are the
//! two modality searches; nothing else inside a query overlaps.
//!
//! Batch evaluation runs whole queries with bounded concurrency. Each query
//! produces its own [`QueryMetrics`]; they are merged only after every query
//! has finished.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;

use crate::context::{build_context, MediaLoader};
use crate::embedding::EmbeddingDispatcher;
use crate::error::{Error, Result, Stage};
use crate::generator::Generator;
use crate::metrics::{
    aggregate_queries, evaluate_retrieval_metrics, BatchAggregate, MetricRecord, QueryMetrics,
};
use crate::models::{Candidate, Modality, Mode, QueryResult};
use crate::parse::{parse_response, CandidateCounts, ParseIssue, ParseReport};
use crate::store::{RetrievalPlanner, DEFAULT_TOP_K};

/// Default rank cutoff for metrics. Independent of `top_k`.
pub const DEFAULT_K: usize = 3;

/// Candidates retrieved for one query.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub text_hits: Vec<Candidate>,
    pub image_hits: Vec<Candidate>,
}

/// Everything produced by one query round.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub query: String,
    pub result: QueryResult,
    pub report: ParseReport,
    pub text_hits: Vec<Candidate>,
    pub image_hits: Vec<Candidate>,
    pub raw_response: String,
}

impl QueryOutcome {
    /// Candidate referenced by a ranked item's 1-based index.
    pub fn candidate(&self, modality: Modality, index: usize) -> Option<&Candidate> {
        let hits = match modality {
            Modality::Text => &self.text_hits,
            Modality::Image => &self.image_hits,
        };
        index.checked_sub(1).and_then(|i| hits.get(i))
    }
}

/// Knobs for a batch evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalParams {
    /// Candidates retrieved per modality.
    pub top_k: usize,
    /// Rank cutoff used by the metrics.
    pub k: usize,
    /// Queries in flight at once.
    pub concurrency: usize,
}

impl Default for EvalParams {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            k: DEFAULT_K,
            concurrency: 1,
        }
    }
}

/// Metrics for one evaluated query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEvaluation {
    pub query: String,
    pub text: MetricRecord,
    pub image: MetricRecord,
    pub parse_issues: Vec<ParseIssue>,
}

/// Result of a batch evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub k: usize,
    pub top_k: usize,
    pub per_query: Vec<QueryEvaluation>,
    pub average: BatchAggregate,
}

impl EvaluationReport {
    /// Copy with every metric rounded to four decimals.
    pub fn rounded(&self) -> Self {
        Self {
            k: self.k,
            top_k: self.top_k,
            per_query: self
                .per_query
                .iter()
                .map(|q| QueryEvaluation {
                    query: q.query.clone(),
                    text: q.text.rounded(),
                    image: q.image.rounded(),
                    parse_issues: q.parse_issues.clone(),
                })
                .collect(),
            average: BatchAggregate {
                text: self.average.text.rounded(),
                image: self.average.image.rounded(),
            },
        }
    }
}

pub struct Pipeline {
    embedder: EmbeddingDispatcher,
    planner: RetrievalPlanner,
    generator: Arc<dyn Generator>,
    media: Arc<dyn MediaLoader>,
}

impl Pipeline {
    pub fn new(
        embedder: EmbeddingDispatcher,
        planner: RetrievalPlanner,
        generator: Arc<dyn Generator>,
        media: Arc<dyn MediaLoader>,
    ) -> Self {
        Self {
            embedder,
            planner,
            generator,
            media,
        }
    }

    /// Embed the query in both spaces and search both modalities.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Retrieval> {
        let (text_vector, image_vector) = futures::future::try_join(
            self.embedder.embed_query_text(query),
            self.embedder.embed_query_crossmodal(query),
        )
        .await?;

        let (text_hits, image_hits) = futures::future::try_join(
            self.planner.search(&text_vector, Modality::Text, top_k),
            self.planner.search(&image_vector, Modality::Image, top_k),
        )
        .await?;

        Ok(Retrieval {
            text_hits,
            image_hits,
        })
    }

    /// Run one full query round.
    pub async fn run_query(&self, query: &str, mode: Mode, top_k: usize) -> Result<QueryOutcome> {
        let Retrieval {
            text_hits,
            image_hits,
        } = self.retrieve(query, top_k).await?;

        let blocks =
            build_context(query, &text_hits, &image_hits, mode, self.media.as_ref()).await;
        tracing::debug!(
            query,
            text = text_hits.len(),
            image = image_hits.len(),
            blocks = blocks.len(),
            model = self.generator.model_name(),
            "generating"
        );

        let raw_response = self
            .generator
            .generate(&blocks)
            .await
            .map_err(|e| Error::capability(Stage::Generation, e))?;

        let counts = CandidateCounts {
            text: text_hits.len(),
            image: image_hits.len(),
        };
        let (result, report) = parse_response(&raw_response, mode, counts);

        Ok(QueryOutcome {
            query: query.to_string(),
            result,
            report,
            text_hits,
            image_hits,
            raw_response,
        })
    }

    /// Evaluate a batch of queries and macro-average the metrics.
    ///
    /// Preconditions are checked before any external call. The first
    /// capability failure aborts the whole batch.
    pub async fn evaluate_queries(
        &self,
        queries: &[String],
        params: EvalParams,
    ) -> Result<EvaluationReport> {
        if queries.is_empty() {
            return Err(Error::EvaluationPrecondition(
                "no queries to evaluate".to_string(),
            ));
        }
        if params.k == 0 {
            return Err(Error::EvaluationPrecondition(
                "rank cutoff k must be > 0".to_string(),
            ));
        }
        if params.top_k == 0 {
            return Err(Error::EvaluationPrecondition(
                "top_k must be > 0".to_string(),
            ));
        }
        if params.concurrency == 0 {
            return Err(Error::EvaluationPrecondition(
                "concurrency must be > 0".to_string(),
            ));
        }

        let per_query: Vec<QueryEvaluation> = stream::iter(queries)
            .map(|q| self.evaluate_one(q, params))
            .buffered(params.concurrency)
            .try_collect()
            .await?;

        let metrics: Vec<QueryMetrics> = per_query
            .iter()
            .map(|q| QueryMetrics {
                text: q.text,
                image: q.image,
            })
            .collect();
        let average = aggregate_queries(&metrics)?;

        tracing::info!(
            queries = per_query.len(),
            k = params.k,
            text_precision = average.text.avg_precision_at_k,
            image_precision = average.image.avg_precision_at_k,
            "evaluation complete"
        );

        Ok(EvaluationReport {
            k: params.k,
            top_k: params.top_k,
            per_query,
            average,
        })
    }

    async fn evaluate_one(&self, query: &str, params: EvalParams) -> Result<QueryEvaluation> {
        let outcome = self.run_query(query, Mode::Evaluation, params.top_k).await?;
        let metrics = evaluate_retrieval_metrics(&outcome.result, params.k)?;
        tracing::debug!(
            query,
            text_precision = metrics.text.precision_at_k,
            image_precision = metrics.image.precision_at_k,
            "query evaluated"
        );
        Ok(QueryEvaluation {
            query: outcome.query,
            text: metrics.text,
            image: metrics.image,
            parse_issues: outcome.report.issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextBlock, ImagePayload};
    use crate::embedding::{CrossModalEmbedder, TextEmbedder};
    use crate::metrics::round4;
    use crate::models::Payload;
    use crate::store::memory::InMemoryVectorStore;
    use crate::store::{Point, VectorNames, VectorStore};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Unit;

    #[async_trait]
    impl TextEmbedder for Unit {
        fn model_name(&self) -> &str {
            "unit"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_texts(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[async_trait]
    impl CrossModalEmbedder for Unit {
        fn model_name(&self) -> &str {
            "unit"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_texts(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0, 1.0]).collect())
        }
        async fn embed_images(&self, paths: &[PathBuf]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(paths.iter().map(|_| vec![0.0, 1.0]).collect())
        }
    }

    struct NoMedia;

    #[async_trait]
    impl MediaLoader for NoMedia {
        async fn load(&self, _path: &str) -> anyhow::Result<Option<ImagePayload>> {
            Ok(None)
        }
    }

    /// Answers by looking up the quoted query in the instruction block.
    struct Scripted {
        responses: Vec<(&'static str, &'static str)>,
        calls: AtomicUsize,
        last_blocks: Mutex<usize>,
    }

    impl Scripted {
        fn new(responses: Vec<(&'static str, &'static str)>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
                last_blocks: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn generate(&self, blocks: &[ContextBlock]) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_blocks.lock().unwrap() = blocks.len();
            let ContextBlock::Instruction(text) = &blocks[0] else {
                anyhow::bail!("first block is not an instruction");
            };
            for (query, response) in &self.responses {
                if text.contains(&format!("\"{}\"", query)) {
                    return Ok(response.to_string());
                }
            }
            anyhow::bail!("quota exceeded")
        }
    }

    async fn pipeline(generator: Arc<Scripted>) -> Pipeline {
        let store = Arc::new(InMemoryVectorStore::new());
        let mut points = Vec::new();
        for i in 0..3u64 {
            points.push(Point {
                id: i,
                vector_name: Some("text".into()),
                vector: vec![1.0, 0.1 * i as f32],
                payload: Payload::text(&format!("Article {}", i), "body", None),
            });
        }
        points.push(Point {
            id: 10,
            vector_name: Some("image".into()),
            vector: vec![0.0, 1.0],
            payload: Payload::image("Photo", "missing.jpg"),
        });
        store.upsert("c", &points).await.unwrap();

        let names = VectorNames {
            text: Some("text".into()),
            image: Some("image".into()),
        };
        Pipeline::new(
            EmbeddingDispatcher::new(Arc::new(Unit), Arc::new(Unit), "query: "),
            RetrievalPlanner::new(store, "c", names),
            generator,
            Arc::new(NoMedia),
        )
    }

    const GOOD: &str = "Answer:\nok\n\nRanked Text Results:\n1. [Text #1] — Title: \"A\" — Score: 1\n2. [Text #2] — Title: \"B\" — Score: 0\n3. [Text #3] — Title: \"C\" — Score: 1\n\nRanked Image Results:\n1. [Image #1] — Title: \"Photo\" — Score: 1\n";
    const WEAK: &str = "Answer:\nmeh\n\nRanked Text Results:\n1. [Text #2] — Title: \"B\" — Score: 1\n2. [Text #1] — Title: \"A\" — Score: 0\n3. [Text #3] — Title: \"C\" — Score: 0\n\nRanked Image Results:\n1. [Image #1] — Title: \"Photo\" — Score: 0\n";

    #[tokio::test]
    async fn test_run_query_end_to_end() {
        let generator = Arc::new(Scripted::new(vec![("bikes", GOOD)]));
        let p = pipeline(generator.clone()).await;

        let outcome = p.run_query("bikes", Mode::Evaluation, 10).await.unwrap();
        assert_eq!(outcome.text_hits.len(), 3);
        assert_eq!(outcome.image_hits.len(), 1);
        assert_eq!(*generator.last_blocks.lock().unwrap(), 5);
        assert_eq!(outcome.result.answer, "ok");
        assert_eq!(outcome.result.ranked_text.len(), 3);
        assert!(outcome.report.is_clean());

        let first = &outcome.result.ranked_images[0];
        let hit = outcome.candidate(first.modality, first.index).unwrap();
        assert_eq!(hit.payload.image_path.as_deref(), Some("missing.jpg"));
    }

    #[tokio::test]
    async fn test_evaluate_queries_averages() {
        let generator = Arc::new(Scripted::new(vec![("good", GOOD), ("weak", WEAK)]));
        let p = pipeline(generator).await;

        let queries = vec!["good".to_string(), "weak".to_string()];
        let params = EvalParams {
            concurrency: 2,
            ..EvalParams::default()
        };
        let report = p.evaluate_queries(&queries, params).await.unwrap();

        assert_eq!(report.per_query[0].query, "good");
        assert_eq!(report.per_query[1].query, "weak");
        assert_eq!(round4(report.per_query[0].text.precision_at_k), 0.6667);
        assert_eq!(round4(report.per_query[1].text.precision_at_k), 0.3333);
        assert_eq!(round4(report.average.text.avg_precision_at_k), 0.5);
        assert_eq!(report.average.image.avg_precision_at_k, (1.0 / 3.0) / 2.0);
        assert_eq!(report.rounded().average.text.avg_precision_at_k, 0.5);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let generator = Arc::new(Scripted::new(vec![]));
        let p = pipeline(generator.clone()).await;
        let err = p.evaluate_queries(&[], EvalParams::default()).await.unwrap_err();
        assert!(matches!(err, Error::EvaluationPrecondition(_)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_aborts_batch() {
        let generator = Arc::new(Scripted::new(vec![("good", GOOD)]));
        let p = pipeline(generator).await;
        let queries = vec!["good".to_string(), "unknown".to_string()];
        let err = p
            .evaluate_queries(&queries, EvalParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Generation));
        assert!(err.to_string().contains("quota exceeded"));
    }

    /// Text embedder that sleeps and records how many calls overlap.
    #[derive(Default)]
    struct Sleepy {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TextEmbedder for Sleepy {
        fn model_name(&self) -> &str {
            "sleepy"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_texts(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    async fn embedding_peak(concurrency: usize) -> usize {
        let generator = Arc::new(Scripted::new(vec![
            ("alpha", GOOD),
            ("beta", GOOD),
            ("gamma", GOOD),
            ("delta", GOOD),
        ]));
        let sleepy = Arc::new(Sleepy::default());
        let mut p = pipeline(generator).await;
        p.embedder = EmbeddingDispatcher::new(sleepy.clone(), Arc::new(Unit), "query: ");

        let queries: Vec<String> = ["alpha", "beta", "gamma", "delta"]
            .iter()
            .map(|q| q.to_string())
            .collect();
        let params = EvalParams {
            concurrency,
            ..EvalParams::default()
        };
        let report = p.evaluate_queries(&queries, params).await.unwrap();
        assert_eq!(report.per_query.len(), 4);
        sleepy.peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_concurrency_overlaps_embedding() {
        assert_eq!(embedding_peak(4).await, 4);
        assert_eq!(embedding_peak(1).await, 1);
    }
}
