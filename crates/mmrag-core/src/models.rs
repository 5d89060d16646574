//! Core data types that flow through the retrieval pipeline.
//!
//! All types here are plain values: candidates are read-only once retrieved,
//! and a [`QueryResult`] is immutable once parsed. Nothing is persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Title used when a payload carries none.
pub const NO_TITLE: &str = "No title";
/// Content used when a text payload carries none.
pub const NO_CONTENT: &str = "No content";

/// Content modality. Stored in the vector index as the payload field `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    /// Value of the `type` payload field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
        }
    }

    /// Tag used inside the model grammar, e.g. the `Text` in `[Text #3]`.
    pub fn label(&self) -> &'static str {
        match self {
            Modality::Text => "Text",
            Modality::Image => "Image",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the re-ranking model is asked for relevance scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Ranked lists only; scores are not requested.
    Interactive,
    /// Every ranked line must carry a quoted title and a 0/1 score.
    Evaluation,
}

/// Payload stored next to each vector in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub kind: Modality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Payload {
    pub fn text(title: &str, content: &str, url: Option<&str>) -> Self {
        Self {
            kind: Modality::Text,
            title: Some(title.to_string()),
            content: Some(content.to_string()),
            image_path: None,
            url: url.map(str::to_string),
        }
    }

    pub fn image(title: &str, image_path: &str) -> Self {
        Self {
            kind: Modality::Image,
            title: Some(title.to_string()),
            content: None,
            image_path: Some(image_path.to_string()),
            url: None,
        }
    }
}

/// One hit returned by a modality-filtered nearest-neighbour search.
///
/// Its rank is its position in the list the planner returned: 0-based
/// internally, 1-based when shown to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: u64,
    /// Cosine similarity reported by the index.
    pub similarity: f32,
    pub payload: Payload,
}

impl Candidate {
    pub fn modality(&self) -> Modality {
        self.payload.kind
    }

    pub fn title(&self) -> &str {
        self.payload.title.as_deref().unwrap_or(NO_TITLE)
    }

    pub fn content(&self) -> &str {
        self.payload.content.as_deref().unwrap_or(NO_CONTENT)
    }
}

/// One entry of a ranked list parsed from the model's response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedItem {
    pub modality: Modality,
    /// 1-based, always within the bounds of the candidate list it references.
    pub index: usize,
    pub title: String,
    /// Binary relevance judgement (1 relevant, 0 not). Evaluation mode only.
    pub score: Option<f64>,
}

impl RankedItem {
    /// 0-based position into the candidate list.
    pub fn position(&self) -> usize {
        self.index - 1
    }

    pub fn is_relevant(&self) -> bool {
        matches!(self.score, Some(s) if s == 1.0)
    }
}

/// Structured outcome of one retrieval round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub answer: String,
    pub ranked_text: Vec<RankedItem>,
    pub ranked_images: Vec<RankedItem>,
}

impl QueryResult {
    pub fn ranked(&self, modality: Modality) -> &[RankedItem] {
        match modality {
            Modality::Text => &self.ranked_text,
            Modality::Image => &self.ranked_images,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_type_field_roundtrip() {
        let payload = Payload::image("Sunset", "data/media/a.jpg");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "image");
        assert!(json.get("content").is_none());

        let back: Payload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_payload_tolerates_missing_fields() {
        let payload: Payload = serde_json::from_str(r#"{"type": "text"}"#).unwrap();
        let cand = Candidate {
            id: 7,
            similarity: 0.5,
            payload,
        };
        assert_eq!(cand.title(), NO_TITLE);
        assert_eq!(cand.content(), NO_CONTENT);
        assert_eq!(cand.modality(), Modality::Text);
    }

    #[test]
    fn test_ranked_item_position_and_relevance() {
        let item = RankedItem {
            modality: Modality::Image,
            index: 3,
            title: "t".into(),
            score: Some(1.0),
        };
        assert_eq!(item.position(), 2);
        assert!(item.is_relevant());

        let unscored = RankedItem { score: None, ..item.clone() };
        assert!(!unscored.is_relevant());
        let zero = RankedItem { score: Some(0.0), ..item };
        assert!(!zero.is_relevant());
    }
}
