//! Concrete embedders for the text and cross-modal spaces.
//!
//! | Provider | Text space | Cross-modal space |
//! |----------|-----------|-------------------|
//! | `local` | [`FastembedTextEmbedder`] (E5 / BGE / MiniLM) | [`FastembedClipEmbedder`] (CLIP text + vision towers) |
//! | `fake` | [`FakeEmbedder`] | [`FakeEmbedder`] |
//!
//! Local models are downloaded from Hugging Face on first use and cached.
//! After that no network calls are made.
//!
//! The fake embedder hashes tokens into buckets. It needs no model files and
//! is deterministic, which makes it suitable for tests and dry runs. Image
//! paths are tokenized like text, so `media/red_bike.jpg` lands near the
//! query `"red bike"`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use mmrag_core::embedding::{l2_normalize, CrossModalEmbedder, TextEmbedder};

use crate::config::EmbeddingConfig;

/// Build the `(text, cross-modal)` embedder pair for the configured provider.
pub fn create_embedders(
    config: &EmbeddingConfig,
) -> Result<(Arc<dyn TextEmbedder>, Arc<dyn CrossModalEmbedder>)> {
    match config.provider.as_str() {
        "fake" => {
            let fake = Arc::new(FakeEmbedder::new(config.fake_dims));
            Ok((fake.clone(), fake))
        }
        #[cfg(feature = "local-embeddings")]
        "local" => {
            let text = FastembedTextEmbedder::new(&config.text_model, config.batch_size)?;
            let clip = FastembedClipEmbedder::new(&config.crossmodal_model, config.batch_size)?;
            Ok((Arc::new(text), Arc::new(clip)))
        }
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Fake Embedder ============

/// Deterministic bag-of-tokens embedder.
pub struct FakeEmbedder {
    dims: usize,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        let mut tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            tokens.push(lowered.as_str());
        }

        for token in tokens {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dims;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        // Tokens may cancel out; keep the vector non-zero.
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        l2_normalize(v)
    }
}

#[async_trait]
impl TextEmbedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }
}

#[async_trait]
impl CrossModalEmbedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        TextEmbedder::embed_texts(self, texts).await
    }
    async fn embed_images(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        paths
            .iter()
            .map(|p| {
                if !p.exists() {
                    bail!("image not found: {}", p.display());
                }
                self.embed_one(&p.to_string_lossy())
            })
            .collect()
    }
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings")]
pub use local::{FastembedClipEmbedder, FastembedTextEmbedder};

#[cfg(feature = "local-embeddings")]
mod local {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, bail, Result};
    use async_trait::async_trait;
    use fastembed::{
        EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
        TextEmbedding,
    };

    use mmrag_core::embedding::{CrossModalEmbedder, TextEmbedder};

    fn text_model(name: &str) -> Result<(EmbeddingModel, usize)> {
        match name {
            "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
            "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
            "bge-large-en-v1.5" => Ok((EmbeddingModel::BGELargeENV15, 1024)),
            "multilingual-e5-small" => Ok((EmbeddingModel::MultilingualE5Small, 384)),
            "multilingual-e5-base" => Ok((EmbeddingModel::MultilingualE5Base, 768)),
            "multilingual-e5-large" => Ok((EmbeddingModel::MultilingualE5Large, 1024)),
            other => bail!(
                "Unknown local text model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
                other
            ),
        }
    }

    fn clip_model(name: &str) -> Result<(EmbeddingModel, ImageEmbeddingModel, usize)> {
        match name {
            "clip-vit-b-32" => Ok((
                EmbeddingModel::ClipVitB32,
                ImageEmbeddingModel::ClipVitB32,
                512,
            )),
            other => bail!(
                "Unknown cross-modal model: '{}'. Supported models: clip-vit-b-32",
                other
            ),
        }
    }

    /// Run a batch on the blocking pool so ONNX inference never stalls the
    /// async workers. The lock is taken inside the blocking task.
    async fn run_blocking<M, I, F>(
        model: &Arc<Mutex<M>>,
        inputs: I,
        what: &'static str,
        f: F,
    ) -> Result<Vec<Vec<f32>>>
    where
        M: Send + 'static,
        I: Send + 'static,
        F: FnOnce(&mut M, I) -> Result<Vec<Vec<f32>>> + Send + 'static,
    {
        let model = Arc::clone(model);
        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| anyhow!("{} lock poisoned", what))?;
            f(&mut guard, inputs)
        })
        .await?
    }

    /// Sentence embedder for the text space.
    pub struct FastembedTextEmbedder {
        name: String,
        dims: usize,
        batch_size: usize,
        model: Arc<Mutex<TextEmbedding>>,
    }

    impl FastembedTextEmbedder {
        pub fn new(name: &str, batch_size: usize) -> Result<Self> {
            let (model_id, dims) = text_model(name)?;
            let model = TextEmbedding::try_new(
                InitOptions::new(model_id).with_show_download_progress(false),
            )
            .map_err(|e| anyhow!("Failed to initialize text model {}: {}", name, e))?;
            tracing::debug!(model = name, dims, "text embedder ready");
            Ok(Self {
                name: name.to_string(),
                dims,
                batch_size,
                model: Arc::new(Mutex::new(model)),
            })
        }
    }

    #[async_trait]
    impl TextEmbedder for FastembedTextEmbedder {
        fn model_name(&self) -> &str {
            &self.name
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let batch_size = self.batch_size;
            run_blocking(&self.model, texts.to_vec(), "text model", move |model, texts| {
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow!("Local text embedding failed: {}", e))
            })
            .await
        }
    }

    /// CLIP text and vision towers sharing one embedding space.
    pub struct FastembedClipEmbedder {
        name: String,
        dims: usize,
        batch_size: usize,
        text: Arc<Mutex<TextEmbedding>>,
        vision: Arc<Mutex<ImageEmbedding>>,
    }

    impl FastembedClipEmbedder {
        pub fn new(name: &str, batch_size: usize) -> Result<Self> {
            let (text_id, image_id, dims) = clip_model(name)?;
            let text = TextEmbedding::try_new(
                InitOptions::new(text_id).with_show_download_progress(false),
            )
            .map_err(|e| anyhow!("Failed to initialize {} text tower: {}", name, e))?;
            let vision = ImageEmbedding::try_new(
                ImageInitOptions::new(image_id).with_show_download_progress(false),
            )
            .map_err(|e| anyhow!("Failed to initialize {} vision tower: {}", name, e))?;
            tracing::debug!(model = name, dims, "cross-modal embedder ready");
            Ok(Self {
                name: name.to_string(),
                dims,
                batch_size,
                text: Arc::new(Mutex::new(text)),
                vision: Arc::new(Mutex::new(vision)),
            })
        }
    }

    #[async_trait]
    impl CrossModalEmbedder for FastembedClipEmbedder {
        fn model_name(&self) -> &str {
            &self.name
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let batch_size = self.batch_size;
            run_blocking(&self.text, texts.to_vec(), "CLIP text model", move |model, texts| {
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow!("CLIP text embedding failed: {}", e))
            })
            .await
        }
        async fn embed_images(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
            let batch_size = self.batch_size;
            run_blocking(&self.vision, paths.to_vec(), "CLIP vision model", move |model, paths| {
                model
                    .embed(paths, Some(batch_size))
                    .map_err(|e| anyhow!("CLIP image embedding failed: {}", e))
            })
            .await
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_model_tables() {
            assert_eq!(text_model("multilingual-e5-base").unwrap().1, 768);
            assert!(text_model("gpt-embed").is_err());
            assert_eq!(clip_model("clip-vit-b-32").unwrap().2, 512);
            assert!(clip_model("clip-vit-l-14").is_err());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmrag_core::embedding::cosine_similarity;

    #[tokio::test]
    async fn test_fake_is_deterministic_and_normalized() {
        let e = FakeEmbedder::new(32);
        let a = TextEmbedder::embed_texts(&e, &["red bike".to_string()])
            .await
            .unwrap();
        let b = TextEmbedder::embed_texts(&e, &["Red  bike!".to_string()])
            .await
            .unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_fake_never_returns_zero_vector() {
        let e = FakeEmbedder::new(8);
        let v = TextEmbedder::embed_texts(&e, &[String::new()])
            .await
            .unwrap();
        assert!(v[0].iter().any(|x| *x != 0.0));
    }

    #[tokio::test]
    async fn test_fake_image_shares_token_space() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red_bike.jpg");
        std::fs::write(&path, b"jpg").unwrap();

        let e = FakeEmbedder::new(4096);
        let image = e.embed_images(&[path]).await.unwrap();
        let query = CrossModalEmbedder::embed_texts(&e, &["red bike".to_string()])
            .await
            .unwrap();
        let other = CrossModalEmbedder::embed_texts(&e, &["quantum chromodynamics".to_string()])
            .await
            .unwrap();
        assert!(cosine_similarity(&query[0], &image[0]) > cosine_similarity(&other[0], &image[0]));
    }

    #[tokio::test]
    async fn test_fake_image_missing_file_fails() {
        let e = FakeEmbedder::new(8);
        assert!(e.embed_images(&[PathBuf::from("/nonexistent/a.png")])
            .await
            .is_err());
    }

    #[test]
    fn test_create_fake_pair() {
        let cfg = EmbeddingConfig {
            provider: "fake".to_string(),
            fake_dims: 16,
            ..EmbeddingConfig::default()
        };
        let (text, clip) = create_embedders(&cfg).unwrap();
        assert_eq!(text.dims(), 16);
        assert_eq!(clip.dims(), 16);
    }

    #[test]
    fn test_unknown_provider() {
        let cfg = EmbeddingConfig {
            provider: "nope".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedders(&cfg).is_err());
    }
}
