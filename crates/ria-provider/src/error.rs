//! Provider error taxonomy

/// Failure of an external completion or embedding call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Backend refused the call due to rate limiting
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    /// Call did not complete in time
    #[error("provider timed out after {elapsed_ms}ms")]
    Timeout {
        /// Time waited before giving up
        elapsed_ms: u64,
    },

    /// Backend answered with something unusable
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// Backend unreachable or misconfigured
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Whether a later call with the same input may succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Timeout { .. })
    }

    /// Short machine-readable category
    #[inline]
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Unavailable(_) => "unavailable",
        }
    }
}
