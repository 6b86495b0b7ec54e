//! Error handling for the LAN shuttle protocol.
//!
//! All fallible operations in this crate return [`Result`]. Connection-
//! and file-scoped failures are caught at the worker boundary and turned
//! into a single completion event; they never crash a worker loop.

use thiserror::Error;

/// Result type for shuttle operations
pub type Result<T> = std::result::Result<T, ShuttleError>;

/// Errors that can occur during discovery or transfer operations
#[derive(Error, Debug)]
pub enum ShuttleError {
    /// I/O error (file system, network, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The target peer could not be reached within the connect timeout
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// The receiving side answered with ERROR, or never acknowledged
    #[error("receiver not ready")]
    ReceiverNotReady,

    /// A wire frame could not be parsed
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The peer closed the connection before a full frame arrived
    #[error("connection closed mid-frame")]
    Truncated,

    /// The acknowledgment bytes matched neither READY nor ERROR
    #[error("unexpected acknowledgment")]
    UnexpectedAck,

    /// A resume request asserted an offset the local partial file does not have
    #[error("resume mismatch: peer asserted {expected} bytes, local partial has {found}")]
    ResumeMismatch { expected: u64, found: u64 },

    /// The listen or discovery socket could not be bound
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// A bounded network operation timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// The operation was cancelled by a voluntary stop request
    #[error("aborted by stop request")]
    Aborted,
}

impl ShuttleError {
    /// Refine a generic I/O error into a more specific variant.
    ///
    /// Connect-phase refusals and unreachable-network errors become
    /// [`ShuttleError::PeerUnreachable`]; timeouts become
    /// [`ShuttleError::Timeout`]. Everything else stays `Io`.
    pub fn from_io_error(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::TimedOut => ShuttleError::Timeout(format!("{context}: {error}")),
            ErrorKind::ConnectionRefused
            | ErrorKind::NetworkUnreachable
            | ErrorKind::HostUnreachable => {
                ShuttleError::PeerUnreachable(format!("{context}: {error}"))
            }
            _ => ShuttleError::Io(error),
        }
    }

    /// Whether this error may succeed on a caller-initiated retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ShuttleError::PeerUnreachable(_)
                | ShuttleError::ReceiverNotReady
                | ShuttleError::Timeout(_)
                | ShuttleError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_error_display() {
        let error = ShuttleError::ReceiverNotReady;
        assert_eq!(error.to_string(), "receiver not ready");

        let error = ShuttleError::ResumeMismatch {
            expected: 100,
            found: 50,
        };
        assert!(error.to_string().contains("100"));
        assert!(error.to_string().contains("50"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = Error::new(ErrorKind::NotFound, "file not found");
        let shuttle_error: ShuttleError = io_error.into();
        assert!(matches!(shuttle_error, ShuttleError::Io(_)));
    }

    #[test]
    fn test_from_io_error_refinement() {
        let refused = Error::new(ErrorKind::ConnectionRefused, "refused");
        let error = ShuttleError::from_io_error(refused, "connecting to peer");
        assert!(matches!(error, ShuttleError::PeerUnreachable(_)));

        let timed_out = Error::new(ErrorKind::TimedOut, "slow");
        let error = ShuttleError::from_io_error(timed_out, "reading ack");
        assert!(matches!(error, ShuttleError::Timeout(_)));

        let other = Error::new(ErrorKind::PermissionDenied, "nope");
        let error = ShuttleError::from_io_error(other, "opening file");
        assert!(matches!(error, ShuttleError::Io(_)));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(ShuttleError::ReceiverNotReady.is_recoverable());
        assert!(!ShuttleError::UnexpectedAck.is_recoverable());
        assert!(!ShuttleError::Aborted.is_recoverable());
    }
}
