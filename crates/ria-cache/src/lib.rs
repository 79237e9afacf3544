//! RIA Semantic Cache
//!
//! Serves near-duplicate questions about the same dataset without re-running
//! the analysis pipeline.
//!
//! # Overview
//!
//! - **SemanticCache**: cosine-similarity lookup over embedded queries
//! - **DataFingerprint**: partition key; answers never cross datasets
//! - **CacheConfig**: capacity, TTL and similarity bar
//!
//! Entries are evicted least-recently-used once capacity is reached and
//! expire after the configured TTL.

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod similarity;

// Re-exports
pub use cache::{CacheStats, CachedAnswer, SemanticCache};
pub use config::CacheConfig;
pub use error::CacheError;
pub use fingerprint::DataFingerprint;
pub use similarity::{cosine_similarity, normalize_query};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
