//! Filesystem [`MediaLoader`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use mmrag_core::context::{ImagePayload, MediaLoader};

/// Loads images from local paths, optionally relative to a root directory.
#[derive(Debug, Clone, Default)]
pub struct FsMediaLoader {
    root: Option<PathBuf>,
}

impl FsMediaLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `root` instead of the working directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        match &self.root {
            Some(root) if p.is_relative() => root.join(p),
            _ => p.to_path_buf(),
        }
    }
}

#[async_trait]
impl MediaLoader for FsMediaLoader {
    async fn load(&self, path: &str) -> Result<Option<ImagePayload>> {
        let full = self.resolve(path);
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Ok(None),
        }
        let data = tokio::fs::read(&full)
            .await
            .with_context(|| format!("Failed to read image: {}", full.display()))?;
        Ok(Some(ImagePayload {
            path: path.to_string(),
            mime_type: mime_type_for(&full).to_string(),
            data,
        }))
    }
}

/// MIME type from the file extension.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}
