//! # mmrag
//!
//! Multimodal retrieval-augmented search over a shared text + image vector
//! index, with a generative model re-ranking the candidates and judging their
//! relevance for evaluation.
//!
//! The pipeline itself lives in [`mmrag_core`]. This crate supplies the
//! concrete collaborators and the `mmrag` command line.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  fastembed   │──▶│  mmrag-core │◀─▶│    Qdrant    │
//! │  E5 + CLIP   │   │  pipeline   │   │  (REST API)  │
//! └──────────────┘   └──────┬──────┘   └──────────────┘
//!                           │
//!              ┌────────────┼────────────┐
//!              ▼            ▼            ▼
//!        ┌──────────┐ ┌──────────┐ ┌──────────┐
//!        │  Gemini  │ │ local    │ │   CLI    │
//!        │  (REST)  │ │ media fs │ │ (mmrag)  │
//!        └──────────┘ └──────────┘ └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | fastembed and fake embedders |
//! | [`qdrant`] | Qdrant vector store client |
//! | [`gemini`] | Gemini generator client |
//! | [`media`] | Filesystem image loader |
//! | [`setup`] | Capability wiring |
//! | [`search`] | `mmrag search` |
//! | [`evaluate`] | `mmrag evaluate` |
//! | [`ingest`] | `mmrag ingest` |

pub mod config;
pub mod embedding;
pub mod evaluate;
pub mod gemini;
pub mod ingest;
pub mod media;
pub mod qdrant;
pub mod search;
pub mod setup;
