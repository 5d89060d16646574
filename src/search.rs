//! `mmrag search`: one interactive query with the model's answer and ranking.

use std::fmt::Write as _;

use anyhow::Result;

use mmrag_core::models::{Modality, Mode};
use mmrag_core::pipeline::QueryOutcome;

use crate::config::Config;
use crate::media::FsMediaLoader;
use crate::setup::build_pipeline;

/// Characters of article content shown per result.
pub const SNIPPET_CHARS: usize = 100;

pub async fn run_search(cfg: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
    let pipeline = build_pipeline(cfg)?;

    let outcome = pipeline.run_query(query, Mode::Interactive, top_k).await?;
    print!("{}", format_outcome(&outcome, &FsMediaLoader::new()));
    Ok(())
}

/// Render the answer followed by the ranked articles and images.
pub fn format_outcome(outcome: &QueryOutcome, media: &FsMediaLoader) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Answer:\n{}\n", outcome.result.answer);

    let _ = writeln!(out, "Relevant Articles:");
    if outcome.result.ranked_text.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for (rank, item) in outcome.result.ranked_text.iter().enumerate() {
        let Some(hit) = outcome.candidate(Modality::Text, item.index) else {
            continue;
        };
        let _ = writeln!(out, "{}. {}", rank + 1, hit.title());
        let _ = writeln!(out, "   {}", hit.payload.url.as_deref().unwrap_or("#"));
        let _ = writeln!(out, "   {}", snippet(hit.content(), SNIPPET_CHARS));
    }

    let _ = writeln!(out, "\nRelevant Images:");
    if outcome.result.ranked_images.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for (rank, item) in outcome.result.ranked_images.iter().enumerate() {
        let Some(hit) = outcome.candidate(Modality::Image, item.index) else {
            continue;
        };
        let _ = writeln!(out, "{}. {}", rank + 1, hit.title());
        let path = hit.payload.image_path.as_deref().unwrap_or("");
        let found = !path.is_empty() && media.resolve(path).is_file();
        if found {
            let _ = writeln!(out, "   {}", path);
        } else {
            let _ = writeln!(out, "   Image not found: {}", path);
        }
    }

    out
}

/// First `max` characters, with `...` appended when truncated.
pub fn snippet(content: &str, max: usize) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
