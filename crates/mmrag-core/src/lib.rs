//! # mmrag core
//!
//! Runtime-agnostic logic for multimodal retrieval-augmented search: the
//! data model, query embedding dispatch, modality-filtered retrieval,
//! context assembly for a re-ranking model, tolerant parsing of the model's
//! ranked output, and precision/recall/F1@k evaluation.
//!
//! This crate performs no network or filesystem I/O and spawns no runtime.
//! Every external capability (embedding models, the vector index, the
//! generative model, media storage) is a trait implemented by the
//! application crate and injected at construction time.
//!
//! ```text
//! query ─▶ EmbeddingDispatcher ─▶ RetrievalPlanner ─▶ context::build_context
//!                                                          │
//!                                   Generator (external) ◀─┘
//!                                          │
//!                      parse::parse_response ─▶ metrics::score / aggregate
//! ```

pub mod context;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod store;
