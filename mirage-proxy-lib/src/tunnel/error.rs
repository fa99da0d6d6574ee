use http::StatusCode;
use thiserror::Error;

pub type TunnelResult<T> = std::result::Result<T, TunnelError>;

/// Reasons an upgrade request is refused before the tunnel opens
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TunnelError {
    #[error("Not a WS connection")]
    NotUpgrade,

    #[error("Missing url query parameter")]
    MissingTarget,

    #[error("Invalid WebSocket target: {0}")]
    InvalidTarget(String),

    #[error("Failed to connect to origin: {0}")]
    Connect(String),
}

impl TunnelError {
    pub fn error_type(&self) -> &'static str {
        match self {
            TunnelError::NotUpgrade => "not_upgrade",
            TunnelError::MissingTarget => "missing_target",
            TunnelError::InvalidTarget(_) => "invalid_target",
            TunnelError::Connect(_) => "connect",
        }
    }
}

impl From<&TunnelError> for StatusCode {
    fn from(e: &TunnelError) -> StatusCode {
        match e {
            TunnelError::NotUpgrade | TunnelError::MissingTarget | TunnelError::InvalidTarget(_) => {
                StatusCode::BAD_REQUEST
            }
            TunnelError::Connect(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
