//! Synapse Engine - Semantic Related-Query Graphs
//!
//! Transforms a seed search phrase plus optional provider evidence into:
//! - A ranked related-queries list with per-item score breakdowns
//! - A semantic graph of typed, weighted synapse edges with clusters
//!   laid out on an intent × perspective plane
//!
//! Evidence discipline throughout: every adapter-derived value carries a
//! source tag, and confidence is capped when SERP evidence is missing.

pub mod adapters;
pub mod artifacts;
pub mod candidates;
pub mod cluster;
pub mod community;
pub mod config;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod gate;
pub mod http_keyword; // keyword-metrics HTTP client
pub mod http_llm; // chat-completions HTTP client
pub mod llm;
pub mod prompts;
pub mod scoring;
pub mod selection;
pub mod serp;
pub mod server;
pub mod synapse;
pub mod taxonomy;
pub mod types;

pub use config::EngineConfig;
pub use engine::{CancelToken, RunOutput, RunRequest, SharedSynapseEngine, SynapseEngine};
pub use error::{AdapterError, RunFailure, RunWarning, Stage};
pub use taxonomy::Taxonomy;
pub use types::*;

#[cfg(test)]
mod tests;
