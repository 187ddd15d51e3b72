use claw_core::errors::ModelError;

/// Failures of the orchestration spine. Tool and policy failures never show
/// up here; they become failed tool results.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("context compression failed: {0}")]
    Compression(ModelError),

    #[error("Agent is already running")]
    AlreadyRunning,

    #[error("agent aborted")]
    Aborted,

    /// The turn loop panicked.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Model(e) => e.error_kind(),
            Self::Compression(_) => "compression_failed",
            Self::AlreadyRunning => "already_running",
            Self::Aborted => "aborted",
            Self::Internal(_) => "internal",
        }
    }
}
