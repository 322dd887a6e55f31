use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchformError {
    /// Model endpoint is rate limiting; retryable
    #[error("Throttled: {0}")]
    Throttled(String),

    /// A remote call failed for this turn (includes exhausted retries)
    #[error("Remote call failed: {0}")]
    RemoteCallFailed(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// The validate guard tripped; the user must generate or update first
    #[error("{0}")]
    LockedOut(String),

    #[error("Storage write failed: {0}")]
    StorageWriteFailed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ArchformError {
    /// Stable machine-readable name used in turn results and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ArchformError::Throttled(_) => "throttled",
            ArchformError::RemoteCallFailed(_) => "remote_call_failed",
            ArchformError::MissingParameter(_) => "missing_parameter",
            ArchformError::LockedOut(_) => "locked_out",
            ArchformError::StorageWriteFailed(_) => "storage_write_failed",
            ArchformError::InvalidState(_) => "invalid_state",
            ArchformError::SessionNotFound(_) => "session_not_found",
            ArchformError::Io(_) => "io",
            ArchformError::Internal(_) => "internal",
        }
    }
}

// Errors travel inside JSON turn results as their display string
impl Serialize for ArchformError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArchformError>;
