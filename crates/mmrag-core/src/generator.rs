//! Generative model seam.
//!
//! The model receives the assembled [`ContextBlock`]s and returns free text
//! that is expected, but not guaranteed, to follow the output grammar in the
//! instruction block.

use anyhow::Result;
use async_trait::async_trait;

use crate::context::ContextBlock;

/// A multimodal text generator.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Run one generation over the ordered blocks. Implementations must not
    /// retry on their own.
    async fn generate(&self, blocks: &[ContextBlock]) -> Result<String>;
}
