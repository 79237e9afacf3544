//! RIA Provider Contracts
//!
//! Narrow interfaces to the language-model backends the pipeline consumes:
//! - **CompletionProvider**: role-tagged text generation
//! - **EmbeddingProvider**: fixed-length vectors for similarity comparison
//!
//! Concrete backends (HTTP clients, prompt transport, token accounting) live
//! outside this workspace. The pipeline treats provider identity as opaque.

#![warn(missing_docs)]

pub mod completion;
pub mod embedding;
pub mod error;

// Re-exports
pub use completion::{CompletionProvider, CompletionRequest, Role};
pub use embedding::{Embedding, EmbeddingProvider};
pub use error::ProviderError;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
