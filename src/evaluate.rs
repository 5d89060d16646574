//! `mmrag evaluate`: batch retrieval evaluation with model-judged relevance.
//!
//! ```bash
//! mmrag evaluate --queries '["red bicycles", "mountain sunsets"]'
//! mmrag evaluate --queries '["a", "b"]' --k 5 --top-k 20 --concurrency 4 --json
//! ```

use std::fmt::Write as _;

use anyhow::{Context, Result};

use mmrag_core::error::Error;
use mmrag_core::metrics::AggregateMetrics;
use mmrag_core::pipeline::{EvalParams, EvaluationReport};

use crate::config::Config;
use crate::setup::build_pipeline;

/// Command-line overrides for the `[evaluation]` and `[retrieval]` settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluateArgs {
    pub k: Option<usize>,
    pub top_k: Option<usize>,
    pub concurrency: Option<usize>,
    pub json: bool,
}

pub async fn run_evaluate(cfg: &Config, queries_json: &str, args: EvaluateArgs) -> Result<()> {
    // Bad input is reported before any model is loaded.
    let queries = parse_queries(queries_json)?;
    if queries.is_empty() {
        return Err(Error::EvaluationPrecondition("no queries to evaluate".to_string()).into());
    }
    let params = EvalParams {
        top_k: args.top_k.unwrap_or(cfg.retrieval.top_k),
        k: args.k.unwrap_or(cfg.evaluation.k),
        concurrency: args.concurrency.unwrap_or(cfg.evaluation.concurrency),
    };

    let pipeline = build_pipeline(cfg)?;
    let report = pipeline.evaluate_queries(&queries, params).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.rounded())?);
    } else {
        print!("{}", format_report(&report));
    }
    Ok(())
}

/// Decode the `--queries` argument: a JSON list of strings.
pub fn parse_queries(raw: &str) -> Result<Vec<String>> {
    let queries: Vec<String> = serde_json::from_str(raw)
        .with_context(|| "--queries must be a JSON list of strings, e.g. '[\"query one\", \"query two\"]'")?;
    Ok(queries)
}

/// Human-readable averages, rounded to four decimals.
pub fn format_report(report: &EvaluationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Average Metrics across all queries:");
    write_modality(&mut out, "Text", report.k, &report.average.text);
    let _ = writeln!(out);
    write_modality(&mut out, "Image", report.k, &report.average.image);
    out
}

fn write_modality(out: &mut String, label: &str, k: usize, metrics: &AggregateMetrics) {
    let m = metrics.rounded();
    let _ = writeln!(out, "{} - Precision@{}: {}", label, k, m.avg_precision_at_k);
    let _ = writeln!(out, "{} - Recall@{}:    {}", label, k, m.avg_recall_at_k);
    let _ = writeln!(out, "{} - F1@{}:        {}", label, k, m.avg_f1_at_k);
}
