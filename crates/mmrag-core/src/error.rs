//! Error type shared by every pipeline stage.
//!
//! Only conditions the caller must act on are errors. Degraded model output
//! (unparseable lines, invented indices) and missing media are reported as
//! values alongside a usable result; see [`crate::parse::ParseIssue`] and
//! [`crate::context::ContextBlock::MissingImage`].

use std::fmt;

use thiserror::Error;

/// The external capability a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    TextEmbedding,
    CrossModalEmbedding,
    ImageEmbedding,
    VectorSearch,
    Upsert,
    Generation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::TextEmbedding => "text embedding",
            Stage::CrossModalEmbedding => "cross-modal embedding",
            Stage::ImageEmbedding => "image embedding",
            Stage::VectorSearch => "vector search",
            Stage::Upsert => "vector upsert",
            Stage::Generation => "generation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// An embedding model, the vector index, or the generative model failed.
    /// Never retried by the core.
    #[error("{stage} failed: {message}")]
    Capability { stage: Stage, message: String },

    /// The caller asked for something undefined: an empty evaluation batch,
    /// a rank cutoff of zero, or a zero-sized retrieval.
    #[error("evaluation precondition violated: {0}")]
    EvaluationPrecondition(String),
}

impl Error {
    /// Wrap a collaborator failure, keeping the full context chain.
    pub fn capability(stage: Stage, err: anyhow::Error) -> Self {
        Error::Capability {
            stage,
            message: format!("{:#}", err),
        }
    }

    /// The failing stage, if this is a capability failure.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Capability { stage, .. } => Some(*stage),
            Error::EvaluationPrecondition(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
