//! Events emitted by the transfer services
//!
//! The presentation layer consumes these through an unbounded channel;
//! the engine assumes nothing about how (or whether) they are rendered.

/// Events emitted by [`SenderService`] and [`ReceiverService`]
///
/// Every failure path produces exactly one [`Completed`] event per
/// affected file; a server-start failure produces exactly one
/// [`Started`] event with `success: false`. There is no silent stall.
///
/// [`SenderService`]: super::SenderService
/// [`ReceiverService`]: super::ReceiverService
/// [`Completed`]: TransferEvent::Completed
/// [`Started`]: TransferEvent::Started
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// A listen or drain loop started (or failed to)
    Started {
        /// Whether startup succeeded
        success: bool,
        /// Human-readable description, e.g. the bound address
        detail: String,
    },

    /// An inbound connection was accepted
    Connection {
        /// Peer address as text
        peer: String,
    },

    /// One chunk moved; emitted on every chunk of a streaming transfer
    Progress {
        /// File this sample belongs to
        filename: String,
        /// Completion percentage, reaches exactly 100 on success
        percent: u8,
        /// Throughput since this file's transfer began
        bytes_per_second: f64,
    },

    /// Informational status message
    Status {
        /// Human-readable message
        message: String,
    },

    /// Terminal outcome for one file
    Completed {
        /// File this outcome belongs to
        filename: String,
        /// Whether every declared byte was moved
        success: bool,
        /// Human-readable reason or confirmation
        detail: String,
    },

    /// The sender finished draining its queue
    AllFilesSent {
        /// Files completed successfully
        sent: usize,
        /// Files that failed
        failed: usize,
    },

    /// The service stopped on request
    Stopped,
}

impl TransferEvent {
    /// Whether this is a terminal per-file event
    pub fn is_completion(&self) -> bool {
        matches!(self, TransferEvent::Completed { .. })
    }

    /// Completion success flag, if this is a completion event
    pub fn success(&self) -> Option<bool> {
        match self {
            TransferEvent::Completed { success, .. } => Some(*success),
            TransferEvent::Started { success, .. } => Some(*success),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_classification() {
        let done = TransferEvent::Completed {
            filename: "a.txt".to_string(),
            success: true,
            detail: "sent".to_string(),
        };
        assert!(done.is_completion());
        assert_eq!(done.success(), Some(true));

        let progress = TransferEvent::Progress {
            filename: "a.txt".to_string(),
            percent: 40,
            bytes_per_second: 1.0,
        };
        assert!(!progress.is_completion());
        assert_eq!(progress.success(), None);
    }
}
