//! Wiring concrete collaborators into core types.
//!
//! Capabilities are constructed once per process, in an order that surfaces
//! cheap failures (missing credentials, bad model names) before expensive
//! ones (model downloads).

use std::sync::Arc;

use anyhow::Result;

use mmrag_core::embedding::EmbeddingDispatcher;
use mmrag_core::pipeline::Pipeline;
use mmrag_core::store::{RetrievalPlanner, VectorNames};

use crate::config::{vector_name, Config};
use crate::embedding::create_embedders;
use crate::gemini::GeminiGenerator;
use crate::media::FsMediaLoader;
use crate::qdrant::QdrantStore;

/// Named vectors as configured; empty names select the unnamed vector.
pub fn vector_names(cfg: &Config) -> VectorNames {
    VectorNames {
        text: vector_name(&cfg.qdrant.text_vector),
        image: vector_name(&cfg.qdrant.image_vector),
    }
}

pub fn build_dispatcher(cfg: &Config) -> Result<EmbeddingDispatcher> {
    let (text, crossmodal) = create_embedders(&cfg.embedding)?;
    tracing::debug!(
        text_model = text.model_name(),
        text_dims = text.dims(),
        crossmodal_model = crossmodal.model_name(),
        crossmodal_dims = crossmodal.dims(),
        "embedders ready"
    );
    Ok(EmbeddingDispatcher::new(
        text,
        crossmodal,
        cfg.embedding.query_prefix.clone(),
    ))
}

/// Build the full query pipeline against Qdrant and Gemini.
pub fn build_pipeline(cfg: &Config) -> Result<Pipeline> {
    let generator = Arc::new(GeminiGenerator::new(&cfg.generator)?);
    let store = Arc::new(QdrantStore::new(&cfg.qdrant)?);
    let dispatcher = build_dispatcher(cfg)?;
    let planner = RetrievalPlanner::new(store, cfg.qdrant.collection.clone(), vector_names(cfg));

    Ok(Pipeline::new(
        dispatcher,
        planner,
        generator,
        Arc::new(FsMediaLoader::new()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credential_fails_before_models_load() {
        let mut cfg = Config::minimal();
        cfg.generator.api_key_env = "MMRAG_TEST_UNSET_SETUP_KEY".to_string();
        // "local" would download models; the credential check must come first.
        let err = build_pipeline(&cfg).err().unwrap();
        assert!(err.to_string().contains("MMRAG_TEST_UNSET_SETUP_KEY"));
    }

    #[test]
    fn test_vector_names_from_config() {
        let mut cfg = Config::minimal();
        cfg.qdrant.text_vector = String::new();
        let names = vector_names(&cfg);
        assert_eq!(names.text, None);
        assert_eq!(names.image.as_deref(), Some("image"));
    }
}
