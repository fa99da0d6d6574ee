use http::StatusCode;
use thiserror::Error;

/// Engine result type; every error becomes a synthesized response at the
/// orchestrator boundary
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Describes things that can go wrong while producing a rewritten response
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The real target could not be determined (e.g. no caller context)
    #[error("Unable to resolve the request target: {0}")]
    Resolution(String),

    /// The cross-origin gate rejected the target
    #[error("Blocked by CORS: {0}")]
    BlockedByPolicy(String),

    /// Outbound network failure, timeout or connection reset
    #[error("Relay request failed: {0}")]
    RelayTransport(String),

    /// The body could not be parsed or rewritten
    #[error("Failed to rewrite response body: {0}")]
    Transform(String),
}

impl EngineError {
    /// Label used for metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::Resolution(_) => "resolution",
            EngineError::BlockedByPolicy(_) => "blocked_by_policy",
            EngineError::RelayTransport(_) => "relay_transport",
            EngineError::Transform(_) => "transform",
        }
    }
}

impl From<&EngineError> for StatusCode {
    fn from(e: &EngineError) -> StatusCode {
        match e {
            EngineError::BlockedByPolicy(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Resolution(_)
            | EngineError::RelayTransport(_)
            | EngineError::Transform(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EngineError> for StatusCode {
    fn from(e: EngineError) -> StatusCode {
        StatusCode::from(&e)
    }
}
