//! Precision, recall and F1 at a rank cutoff, plus macro-averaging.
//!
//! Relevance comes from the model's per-item judgement carried in
//! [`RankedItem::score`]; nothing here decides relevance on its own.
//!
//! # Definitions
//!
//! | Metric | Formula |
//! |--------|---------|
//! | `total_relevant` | relevant items in the whole parsed list |
//! | `relevant_at_k` | relevant items among the first `k` after a stable sort by score, descending |
//! | Precision@k | `relevant_at_k / k` (always `k`, even for shorter lists) |
//! | Recall@k | `relevant_at_k / total_relevant`, or `0.0` when nothing is relevant |
//! | F1@k | harmonic mean, or `0.0` when precision + recall is zero |
//!
//! Candidates the model left out of its ranking are simply absent: they are
//! not counted as irrelevant and do not contribute to `total_relevant`.
//!
//! Values are kept at full precision; [`round4`] is for display only.

use std::cmp::Ordering;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{Modality, QueryResult, RankedItem};

/// Metrics for one ranked list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricRecord {
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub f1_at_k: f64,
    pub relevant_at_k: usize,
    pub total_relevant: usize,
}

/// Unweighted mean of a batch of [`MetricRecord`]s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateMetrics {
    pub avg_precision_at_k: f64,
    pub avg_recall_at_k: f64,
    pub avg_f1_at_k: f64,
    pub queries: usize,
}

/// Per-modality metrics for one query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueryMetrics {
    pub text: MetricRecord,
    pub image: MetricRecord,
}

/// Per-modality averages for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchAggregate {
    pub text: AggregateMetrics,
    pub image: AggregateMetrics,
}

/// Score one ranked list at cutoff `k`.
pub fn score(items: &[RankedItem], k: usize) -> Result<MetricRecord> {
    if k == 0 {
        return Err(Error::EvaluationPrecondition(
            "rank cutoff k must be > 0".to_string(),
        ));
    }

    let total_relevant = items.iter().filter(|i| i.is_relevant()).count();

    let mut sorted: Vec<&RankedItem> = items.iter().collect();
    // sort_by is stable, so ties keep the model's order.
    sorted.sort_by(|a, b| cmp_score_desc(a.score, b.score));
    let relevant_at_k = sorted.iter().take(k).filter(|i| i.is_relevant()).count();

    let precision = relevant_at_k as f64 / k as f64;
    let recall = if total_relevant > 0 {
        relevant_at_k as f64 / total_relevant as f64
    } else {
        0.0
    };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    Ok(MetricRecord {
        precision_at_k: precision,
        recall_at_k: recall,
        f1_at_k: f1,
        relevant_at_k,
        total_relevant,
    })
}

/// Unscored items sort after every scored one.
fn cmp_score_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Macro-average a batch. An empty batch is a caller error.
pub fn aggregate(records: &[MetricRecord]) -> Result<AggregateMetrics> {
    if records.is_empty() {
        return Err(Error::EvaluationPrecondition(
            "cannot aggregate an empty batch".to_string(),
        ));
    }
    let n = records.len() as f64;
    let mean = |f: fn(&MetricRecord) -> f64| records.iter().map(f).sum::<f64>() / n;

    Ok(AggregateMetrics {
        avg_precision_at_k: mean(|r| r.precision_at_k),
        avg_recall_at_k: mean(|r| r.recall_at_k),
        avg_f1_at_k: mean(|r| r.f1_at_k),
        queries: records.len(),
    })
}

/// Score both ranked lists of one parsed result.
pub fn evaluate_retrieval_metrics(result: &QueryResult, k: usize) -> Result<QueryMetrics> {
    Ok(QueryMetrics {
        text: score(result.ranked(Modality::Text), k)?,
        image: score(result.ranked(Modality::Image), k)?,
    })
}

/// Average per-query metrics independently per modality.
pub fn aggregate_queries(per_query: &[QueryMetrics]) -> Result<BatchAggregate> {
    let text: Vec<MetricRecord> = per_query.iter().map(|q| q.text).collect();
    let image: Vec<MetricRecord> = per_query.iter().map(|q| q.image).collect();
    Ok(BatchAggregate {
        text: aggregate(&text)?,
        image: aggregate(&image)?,
    })
}

/// Round to four decimal places for display.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

impl MetricRecord {
    pub fn rounded(&self) -> Self {
        Self {
            precision_at_k: round4(self.precision_at_k),
            recall_at_k: round4(self.recall_at_k),
            f1_at_k: round4(self.f1_at_k),
            ..*self
        }
    }
}

impl AggregateMetrics {
    pub fn rounded(&self) -> Self {
        Self {
            avg_precision_at_k: round4(self.avg_precision_at_k),
            avg_recall_at_k: round4(self.avg_recall_at_k),
            avg_f1_at_k: round4(self.avg_f1_at_k),
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: usize, score: Option<f64>) -> RankedItem {
        RankedItem {
            modality: Modality::Text,
            index,
            title: format!("t{}", index),
            score,
        }
    }

    fn record(precision: f64) -> MetricRecord {
        MetricRecord {
            precision_at_k: precision,
            recall_at_k: 1.0,
            f1_at_k: 0.0,
            relevant_at_k: 0,
            total_relevant: 0,
        }
    }

    #[test]
    fn test_concrete_scenario() {
        let items = vec![item(1, Some(1.0)), item(2, Some(0.0)), item(3, Some(1.0))];
        let m = score(&items, 3).unwrap();
        assert_eq!(m.total_relevant, 2);
        assert_eq!(m.relevant_at_k, 2);
        assert_eq!(round4(m.precision_at_k), 0.6667);
        assert_eq!(m.recall_at_k, 1.0);
        assert_eq!(round4(m.f1_at_k), 0.8);
    }

    #[test]
    fn test_sort_by_score_before_cutoff() {
        let items = vec![
            item(1, Some(0.0)),
            item(2, Some(0.0)),
            item(3, Some(1.0)),
            item(4, Some(1.0)),
        ];
        let m = score(&items, 2).unwrap();
        assert_eq!(m.relevant_at_k, 2);
        assert_eq!(m.precision_at_k, 1.0);
    }

    #[test]
    fn test_short_list_still_divides_by_k() {
        let m = score(&[item(1, Some(1.0))], 3).unwrap();
        assert_eq!(round4(m.precision_at_k), 0.3333);
        assert_eq!(m.recall_at_k, 1.0);
        assert_eq!(round4(m.f1_at_k), 0.5);
    }

    #[test]
    fn test_nothing_relevant_is_zero_not_nan() {
        let m = score(&[item(1, Some(0.0)), item(2, None)], 3).unwrap();
        assert_eq!(m.total_relevant, 0);
        assert_eq!(m.recall_at_k, 0.0);
        assert_eq!(m.f1_at_k, 0.0);

        let empty = score(&[], 3).unwrap();
        assert_eq!(empty.precision_at_k, 0.0);
        assert_eq!(empty.f1_at_k, 0.0);
    }

    #[test]
    fn test_relevant_beyond_cutoff_counts_toward_recall() {
        let items = vec![
            item(1, Some(1.0)),
            item(2, Some(1.0)),
            item(3, Some(1.0)),
            item(4, Some(1.0)),
        ];
        let m = score(&items, 2).unwrap();
        assert_eq!(m.total_relevant, 4);
        assert_eq!(m.recall_at_k, 0.5);
    }

    #[test]
    fn test_zero_k_is_precondition_error() {
        assert!(matches!(
            score(&[], 0),
            Err(Error::EvaluationPrecondition(_))
        ));
    }

    #[test]
    fn test_aggregate_mean() {
        let agg = aggregate(&[record(2.0 / 3.0), record(1.0 / 3.0)]).unwrap();
        assert_eq!(round4(agg.avg_precision_at_k), 0.5);
        assert_eq!(agg.avg_recall_at_k, 1.0);
        assert_eq!(agg.queries, 2);
    }

    #[test]
    fn test_empty_batch_is_precondition_error() {
        assert!(matches!(
            aggregate(&[]),
            Err(Error::EvaluationPrecondition(_))
        ));
        assert!(aggregate_queries(&[]).is_err());
    }

    #[test]
    fn test_modalities_scored_independently() {
        let result = QueryResult {
            answer: String::new(),
            ranked_text: vec![item(1, Some(1.0))],
            ranked_images: vec![RankedItem {
                modality: Modality::Image,
                ..item(1, Some(0.0))
            }],
        };
        let m = evaluate_retrieval_metrics(&result, 1).unwrap();
        assert_eq!(m.text.precision_at_k, 1.0);
        assert_eq!(m.image.precision_at_k, 0.0);
    }
}
