use std::time::Duration;

use crate::security::CryptoError;

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Failures talking to a device
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device could not be reached at all
    #[error("device {address} is offline: {reason}")]
    Offline { address: String, reason: String },

    #[error("authentication failed for user {0}")]
    AuthFailure(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed framing or an unexpected reply
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The device answered the command with a trap
    #[error("command rejected by device: {0}")]
    Rejected(String),

    /// Some of the queried sources failed
    #[error("partial result, failed sources: {}", .0.join(", "))]
    PartialResult(Vec<String>),

    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected before any network I/O
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("credential error: {0}")]
    Credential(#[from] CryptoError),
}

impl DeviceError {
    /// Whether retrying the connection step could help.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, DeviceError::Offline { .. } | DeviceError::Timeout(_))
    }
}
