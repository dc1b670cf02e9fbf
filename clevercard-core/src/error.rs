//! Error types for clevercard-core

use thiserror::Error;

use crate::capture::CapturePhase;

/// Main error type for the clevercard-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Bad credentials, expired or revoked session
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Persistence service unreachable or returned a failure status
    #[error("network error: {0}")]
    Network(String),

    /// Camera or microphone access refused
    #[error("{device} permission denied")]
    PermissionDenied { device: String },

    /// Device could not produce a frame or recording
    #[error("capture failed: {0}")]
    CaptureFailure(String),

    /// Recognition or transcription errored or returned nothing
    #[error("processing failed: {0}")]
    ProcessingFailure(String),

    /// Capture run was cancelled by the caller
    #[error("capture cancelled")]
    Cancelled,

    /// Capture state machine rejected a transition
    #[error("invalid capture transition from {from} to {to}")]
    InvalidTransition { from: CapturePhase, to: CapturePhase },

    /// Operation needs a signed-in user
    #[error("User not authenticated")]
    NotAuthenticated,

    /// Input rejected before reaching the service
    #[error("{0}")]
    Validation(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the user has to act (e.g. grant a permission) before a retry can succeed
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, Error::PermissionDenied { .. })
    }

    /// Whether a caller-initiated retry may succeed without any other change
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::CaptureFailure(_) | Error::ProcessingFailure(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

/// Result type alias for clevercard-core
pub type Result<T> = std::result::Result<T, Error>;
