use std::time::Duration;

/// Failure of a model call. Only the retryable kinds are worth another
/// attempt; everything else goes straight back to the turn loop.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ModelError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("model overloaded")]
    Overloaded,
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::Overloaded
        )
    }

    /// Wait requested by the provider, if any.
    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Overloaded => "overloaded",
        }
    }
}
