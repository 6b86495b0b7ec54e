//! File transfer engine
//!
//! One stream connection per file: header, acknowledgment, then raw
//! payload bytes. The sender drains a FIFO queue toward one target;
//! the receiver accepts one connection at a time into a save
//! directory. Both report progress and speed through typed event
//! channels.

pub mod events;
pub mod receiver;
pub mod sender;

pub use events::TransferEvent;
pub use receiver::{ReceiverConfig, ReceiverService};
pub use sender::{SenderConfig, SenderService};

use std::time::Instant;

/// Default payload chunk size in bytes
pub const CHUNK_SIZE: usize = 4096;

/// Default TCP port for file transfers
pub const DEFAULT_TRANSFER_PORT: u16 = 65432;

/// Progress and speed accounting for one file in flight.
///
/// Tracks cumulative payload bytes against the declared size, measured
/// from the moment this file's transfer began. Both directions use the
/// same cadence: one sample per chunk.
#[derive(Debug)]
pub struct ProgressTracker {
    declared_size: u64,
    start_offset: u64,
    bytes_moved: u64,
    started_at: Instant,
}

impl ProgressTracker {
    /// Begin tracking a transfer of `declared_size` total bytes,
    /// `start_offset` of which were already moved by a prior attempt.
    pub fn new(declared_size: u64, start_offset: u64) -> Self {
        Self {
            declared_size,
            start_offset,
            bytes_moved: start_offset,
            started_at: Instant::now(),
        }
    }

    /// Account for one streamed chunk and produce a progress sample.
    pub fn advance(&mut self, chunk_len: u64) -> (u8, f64) {
        self.bytes_moved += chunk_len;
        (self.percent(), self.bytes_per_second())
    }

    /// Cumulative bytes moved, including any resumed prefix
    pub fn bytes_moved(&self) -> u64 {
        self.bytes_moved
    }

    /// Whether every declared byte has been moved
    pub fn is_complete(&self) -> bool {
        self.bytes_moved >= self.declared_size
    }

    /// Current completion percentage, exactly 100 only when done.
    ///
    /// A zero-byte file is complete the moment it starts.
    pub fn percent(&self) -> u8 {
        if self.declared_size == 0 {
            return 100;
        }
        ((self.bytes_moved * 100) / self.declared_size) as u8
    }

    /// Throughput of this session in bytes per second.
    ///
    /// Counts only bytes moved since this file's transfer began, not
    /// any prefix carried over from a resumed attempt.
    pub fn bytes_per_second(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (self.bytes_moved - self.start_offset) as f64 / elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_progression() {
        let mut tracker = ProgressTracker::new(1000, 0);
        assert_eq!(tracker.percent(), 0);

        let (percent, _) = tracker.advance(250);
        assert_eq!(percent, 25);

        let (percent, _) = tracker.advance(250);
        assert_eq!(percent, 50);

        let (percent, _) = tracker.advance(500);
        assert_eq!(percent, 100);
        assert!(tracker.is_complete());
    }

    #[test]
    fn test_percent_monotonic() {
        let mut tracker = ProgressTracker::new(10_000, 0);
        let mut last = 0u8;
        for _ in 0..100 {
            let (percent, _) = tracker.advance(100);
            assert!(percent >= last);
            last = percent;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_zero_byte_file_is_immediately_complete() {
        let tracker = ProgressTracker::new(0, 0);
        assert_eq!(tracker.percent(), 100);
        assert!(tracker.is_complete());
    }

    #[test]
    fn test_resumed_transfer_starts_at_offset() {
        let mut tracker = ProgressTracker::new(1000, 600);
        assert_eq!(tracker.percent(), 60);
        assert!(!tracker.is_complete());

        let (percent, _) = tracker.advance(400);
        assert_eq!(percent, 100);
        assert!(tracker.is_complete());
    }

    #[test]
    fn test_speed_counts_session_bytes_only() {
        let mut tracker = ProgressTracker::new(1000, 500);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let (_, speed) = tracker.advance(100);
        // 100 session bytes over ~20ms: well under the rate a 600-byte
        // cumulative count would imply
        assert!(speed > 0.0);
        assert!(speed <= 100.0 / 0.02 + 1.0);
    }
}
