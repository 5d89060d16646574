//! Context assembly for the re-ranking model.
//!
//! The context is an ordered list of blocks: one instruction block, then one
//! block per text candidate, then one block per image candidate. Candidates
//! are numbered from 1 in the order the planner returned them and are never
//! reordered here; ranking is left to the model.
//!
//! The instruction text embeds the output grammar that
//! [`crate::parse`] consumes, so the two must change together.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Candidate, Mode};

/// Raw image bytes ready to be attached to a model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub path: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Resolves a candidate's `image_path` to image bytes.
#[async_trait]
pub trait MediaLoader: Send + Sync {
    /// `Ok(None)` when nothing exists at `path`.
    async fn load(&self, path: &str) -> Result<Option<ImagePayload>>;
}

/// One unit of model input.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextBlock {
    Instruction(String),
    Text {
        index: usize,
        title: String,
        content: String,
    },
    Image {
        index: usize,
        title: String,
        image: ImagePayload,
    },
    /// The image could not be loaded; the model still sees its number.
    MissingImage {
        index: usize,
        title: String,
        path: Option<String>,
    },
}

impl ContextBlock {
    /// Textual part of the block. Image bytes are carried separately.
    pub fn render(&self) -> String {
        match self {
            ContextBlock::Instruction(text) => text.clone(),
            ContextBlock::Text {
                index,
                title,
                content,
            } => format!("Text #{}:\nTitle: {}\nContent: {}", index, title, content),
            ContextBlock::Image { index, title, .. } => {
                format!("Image #{}:\nTitle: {}\nImage:", index, title)
            }
            ContextBlock::MissingImage { index, title, path } => format!(
                "Image #{}:\nTitle: {}\n[Missing image at {}]",
                index,
                title,
                path.as_deref().unwrap_or("<no path>")
            ),
        }
    }
}

/// Build the full model input for one query.
pub async fn build_context(
    query: &str,
    text_hits: &[Candidate],
    image_hits: &[Candidate],
    mode: Mode,
    media: &dyn MediaLoader,
) -> Vec<ContextBlock> {
    let mut blocks = Vec::with_capacity(1 + text_hits.len() + image_hits.len());
    blocks.push(ContextBlock::Instruction(instruction(query, mode)));

    for (i, hit) in text_hits.iter().enumerate() {
        blocks.push(ContextBlock::Text {
            index: i + 1,
            title: hit.title().to_string(),
            content: hit.content().to_string(),
        });
    }

    for (i, hit) in image_hits.iter().enumerate() {
        let index = i + 1;
        let title = hit.title().to_string();
        let path = hit.payload.image_path.clone();

        let loaded = match path.as_deref() {
            Some(p) => match media.load(p).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(path = p, error = %e, "failed to load image");
                    None
                }
            },
            None => None,
        };

        match loaded {
            Some(image) => blocks.push(ContextBlock::Image {
                index,
                title,
                image,
            }),
            None => {
                tracing::warn!(index, path = ?path, "image unavailable, using placeholder");
                blocks.push(ContextBlock::MissingImage { index, title, path });
            }
        }
    }

    blocks
}

/// Instruction block text, including the output grammar for `mode`.
pub fn instruction(query: &str, mode: Mode) -> String {
    match mode {
        Mode::Interactive => format!(
            r#"You are a helpful multimodal assistant.

The user is searching for: "{query}"

You are provided with several candidate results retrieved from a database:
- text snippets (articles) with titles
- images with titles.

Your task:

1. Analyze the user's query and answer it **based on the retrieved content** (both texts and images). Do not make assumptions beyond the provided materials.

2. Rank **all the candidate results** (texts and images) **by their relevance to the user's query**.
   **rank all articles and images**
   **do not make duplicate copies**
   For each ranked item, provide:
   - its type (Text/Image)
   - its number (as given)


### Format:

Answer:
<your answer to the user's query>

Ranked Text Results:
1. [Text #N] — Title #N
2. [Text #N] — Title #N
3. ...

Ranked Image Results:
1. [Image #N] — Title #N
2. [Image #N] — Title #N
3. ..."#
        ),
        Mode::Evaluation => format!(
            r#"You are a helpful multimodal assistant.

The user is searching for: "{query}"

You are provided with several candidate results retrieved from a database:
- text snippets (articles) with titles
- images with titles.

Your task:

1. Rank **all the candidate results** (texts and images) **by their relevance to the user's query**.
   **Rank all articles and all images together by relevance, but report them in separate lists**.

2. For each ranked item, assign a **relevance score**  **0 (not relevant)** or **1 (relevant)** based on how well the item matches the query.

3. Do not repeat or duplicate results.

For each ranked item, provide:
- its type (Text/Image)
- its number (as given)
- its title
- its relevance score (0 or 1)

### Format:

Answer:
<your answer to the user's query>

Ranked Text Results:
1. [Text #N] — Title: "<Title>" — Score: <relevance_score>
2. ...

Ranked Image Results:
1. [Image #N] — Title: "<Title>" — Score: <relevance_score>
2. ..."#
        ),
    }
}
