//! Embedding provider contract

use crate::error::ProviderError;

/// Fixed-length embedding vector
pub type Embedding = Vec<f32>;

/// Text embedding backend
///
/// Every vector produced by one provider must have the same length.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed text
    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError>;

    /// Vector length produced by this provider
    fn dimensions(&self) -> usize;
}
