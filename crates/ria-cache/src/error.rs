//! Error types for the semantic cache

use ria_provider::ProviderError;

/// Cache write failures
///
/// Lookups never fail; an unusable lookup is a miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Query could not be embedded
    #[error("embedding failed: {0}")]
    Embedding(#[from] ProviderError),

    /// Provider returned a vector of the wrong length
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Length advertised by the provider
        expected: usize,
        /// Length actually returned
        actual: usize,
    },

    /// Nothing left to embed after normalization
    #[error("query is empty after normalization")]
    EmptyQuery,
}
