//! Transfer sender
//!
//! Drains a FIFO queue of local files toward one remote target, one
//! TCP connection per file. Per-file state machine:
//!
//! ```text
//! IDLE -> CONNECTING -> HEADER_SENT -> AWAIT_ACK -> STREAMING -> DONE | FAILED
//! ```
//!
//! A failure on one file produces one failure completion and, by
//! default, does not block subsequent files; `stop_on_failure` gives
//! the caller the stop-at-first-failure policy instead. Nothing is
//! retried automatically: a failed or aborted file keeps its resume
//! marker for a later caller-initiated attempt.

use super::events::TransferEvent;
use super::{ProgressTracker, CHUNK_SIZE};
use crate::{resume, wire, Result, ShuttleError};
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default bound on the connect attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on waiting for the receiver's acknowledgment
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on one chunk write while streaming
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the sender service
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Bound on the connect attempt
    pub connect_timeout: Duration,

    /// Bound on waiting for the acknowledgment after the header
    pub ack_timeout: Duration,

    /// Payload chunk size
    pub chunk_size: usize,

    /// Stop draining the queue at the first per-file failure
    pub stop_on_failure: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            chunk_size: CHUNK_SIZE,
            stop_on_failure: false,
        }
    }
}

/// Queue-draining file sender
///
/// The outer layer appends to the queue and starts the drain toward a
/// target; the drain task pops files in insertion order, one connection
/// per file, and reports progress and outcomes through the event
/// channel.
pub struct SenderService {
    config: SenderConfig,
    queue: Arc<Mutex<VecDeque<PathBuf>>>,
    event_tx: mpsc::UnboundedSender<TransferEvent>,
    event_rx: Arc<RwLock<mpsc::UnboundedReceiver<TransferEvent>>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<TransferEvent>>>>,
    forwarding: Arc<AtomicBool>,
    stop_tx: Option<watch::Sender<bool>>,
    running: Arc<AtomicBool>,
}

impl SenderService {
    /// Create a sender with the given configuration
    pub fn new(config: SenderConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            config,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            event_tx,
            event_rx: Arc::new(RwLock::new(event_rx)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            forwarding: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a sender with default configuration
    pub fn with_defaults() -> Self {
        Self::new(SenderConfig::default())
    }

    /// Append files to the send queue. Insertion order is send order.
    pub async fn queue_files(&self, paths: impl IntoIterator<Item = PathBuf>) {
        let mut queue = self.queue.lock().await;
        queue.extend(paths);
    }

    /// Drop all pending files
    pub async fn clear_queue(&self) {
        self.queue.lock().await.clear();
    }

    /// Number of files still pending
    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Whether the drain task is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Get a receiver for transfer events.
    ///
    /// Every subscriber sees every event from the moment it subscribes;
    /// dropped subscribers are pruned on the next send.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<TransferEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);

        // One forwarding task, started lazily, fans events out to
        // every live subscriber
        if !self.forwarding.swap(true, Ordering::SeqCst) {
            let event_rx = self.event_rx.clone();
            let subscribers = self.subscribers.clone();
            tokio::spawn(async move {
                let mut rx_lock = event_rx.write().await;
                while let Some(event) = rx_lock.recv().await {
                    let mut subs = subscribers.lock().await;
                    subs.retain(|tx| tx.send(event.clone()).is_ok());
                }
            });
        }

        rx
    }

    /// Spawn the drain task toward one target.
    ///
    /// Files are popped in FIFO order until the queue is empty, a stop
    /// is requested, or (with `stop_on_failure`) a file fails.
    pub fn start(&mut self, target_ip: IpAddr, target_port: u16) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("sender already draining");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        self.stop_tx = Some(stop_tx);

        let target = SocketAddr::new(target_ip, target_port);
        info!("starting file transfer toward {target}");
        let _ = self.event_tx.send(TransferEvent::Started {
            success: true,
            detail: format!("sending to {target}"),
        });

        let config = self.config.clone();
        let queue = self.queue.clone();
        let event_tx = self.event_tx.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            Self::drain_queue(target, config, queue, stop_rx, &event_tx).await;
            running.store(false, Ordering::SeqCst);
        });
    }

    /// Request the drain task to stop at the next chunk boundary.
    /// Calling this on a stopped sender is a no-op.
    pub fn stop(&mut self) {
        if !self.running.load(Ordering::SeqCst) {
            self.stop_tx = None;
            return;
        }
        if let Some(stop_tx) = self.stop_tx.take() {
            info!("stopping sender");
            let _ = stop_tx.send(true);
            let _ = self.event_tx.send(TransferEvent::Stopped);
        }
    }

    async fn drain_queue(
        target: SocketAddr,
        config: SenderConfig,
        queue: Arc<Mutex<VecDeque<PathBuf>>>,
        stop_rx: watch::Receiver<bool>,
        event_tx: &mpsc::UnboundedSender<TransferEvent>,
    ) {
        let mut sent = 0usize;
        let mut failed = 0usize;

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let path = match queue.lock().await.pop_front() {
                Some(path) => path,
                None => break,
            };

            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned());

            let _ = event_tx.send(TransferEvent::Status {
                message: format!("sending {filename}"),
            });

            match Self::send_one(target, &path, &filename, &config, &stop_rx, event_tx).await {
                Ok(()) => {
                    sent += 1;
                    info!("sent {filename} to {target}");
                    let _ = event_tx.send(TransferEvent::Completed {
                        filename,
                        success: true,
                        detail: "sent successfully".to_string(),
                    });
                }
                Err(ShuttleError::Aborted) => {
                    let _ = event_tx.send(TransferEvent::Completed {
                        filename,
                        success: false,
                        detail: "aborted".to_string(),
                    });
                    break;
                }
                Err(e) => {
                    failed += 1;
                    warn!("failed to send {filename}: {e}");
                    let _ = event_tx.send(TransferEvent::Completed {
                        filename,
                        success: false,
                        detail: e.to_string(),
                    });
                    if config.stop_on_failure {
                        break;
                    }
                }
            }
        }

        let _ = event_tx.send(TransferEvent::AllFilesSent { sent, failed });
    }

    /// Send one file over one connection.
    ///
    /// On a mid-stream abort or I/O failure, the bytes moved so far are
    /// persisted as the resume offset for the next attempt. A clean
    /// completion discards any marker.
    async fn send_one(
        target: SocketAddr,
        path: &Path,
        filename: &str,
        config: &SenderConfig,
        stop_rx: &watch::Receiver<bool>,
        event_tx: &mpsc::UnboundedSender<TransferEvent>,
    ) -> Result<()> {
        let filesize = tokio::fs::metadata(path)
            .await
            .map_err(|e| ShuttleError::from_io_error(e, "reading source file metadata"))?
            .len();

        // A stale marker at or past the declared size means the file
        // changed since the failed attempt; start over
        let offset = match resume::load_offset(path).await {
            Some(offset) if offset < filesize => offset,
            Some(_) => {
                resume::clear(path).await;
                0
            }
            None => 0,
        };

        // CONNECTING
        let mut stream = timeout(config.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| {
                ShuttleError::PeerUnreachable(format!("connect to {target} timed out"))
            })?
            .map_err(|e| ShuttleError::from_io_error(e, "connecting to receiver"))?;

        // HEADER_SENT
        let header = wire::WireHeader::with_resume(filename, filesize, offset);
        wire::write_header(&mut stream, &header).await?;

        // AWAIT_ACK: a non-READY answer, garbage, or silence all mean
        // the receiver is not ready; keep the resume marker for later
        let ready = timeout(config.ack_timeout, wire::read_ack(&mut stream))
            .await
            .map_err(|_| ShuttleError::ReceiverNotReady)?
            .map_err(|_| ShuttleError::ReceiverNotReady)?;
        if !ready {
            return Err(ShuttleError::ReceiverNotReady);
        }

        if offset > 0 {
            debug!("resuming {filename} from byte {offset}");
        }

        // STREAMING
        let mut file = File::open(path).await?;
        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset)).await?;
        }

        let mut tracker = ProgressTracker::new(filesize, offset);
        let mut buf = vec![0u8; config.chunk_size];

        while !tracker.is_complete() {
            if *stop_rx.borrow() {
                resume::store_offset(path, tracker.bytes_moved()).await;
                return Err(ShuttleError::Aborted);
            }

            let n = file.read(&mut buf).await?;
            if n == 0 {
                // Source shrank underneath us
                resume::store_offset(path, tracker.bytes_moved()).await;
                return Err(ShuttleError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "source file ended before declared size",
                )));
            }

            let write = timeout(STREAM_WRITE_TIMEOUT, stream.write_all(&buf[..n])).await;
            match write {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    resume::store_offset(path, tracker.bytes_moved()).await;
                    return Err(ShuttleError::from_io_error(e, "streaming payload"));
                }
                Err(_) => {
                    resume::store_offset(path, tracker.bytes_moved()).await;
                    return Err(ShuttleError::Timeout("payload write stalled".to_string()));
                }
            }

            let (percent, bytes_per_second) = tracker.advance(n as u64);
            let _ = event_tx.send(TransferEvent::Progress {
                filename: filename.to_string(),
                percent,
                bytes_per_second,
            });
        }

        stream.flush().await?;
        resume::clear(path).await;

        // A zero-byte file never enters the chunk loop; still report
        // the terminal sample so progress reaches 100
        if filesize == 0 {
            let _ = event_tx.send(TransferEvent::Progress {
                filename: filename.to_string(),
                percent: 100,
                bytes_per_second: 0.0,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let sender = SenderService::with_defaults();
        sender
            .queue_files([
                PathBuf::from("/a/first.bin"),
                PathBuf::from("/a/second.bin"),
            ])
            .await;
        sender.queue_files([PathBuf::from("/a/third.bin")]).await;

        assert_eq!(sender.queue_len().await, 3);

        let mut queue = sender.queue.lock().await;
        assert_eq!(queue.pop_front().unwrap(), PathBuf::from("/a/first.bin"));
        assert_eq!(queue.pop_front().unwrap(), PathBuf::from("/a/second.bin"));
        assert_eq!(queue.pop_front().unwrap(), PathBuf::from("/a/third.bin"));
    }

    #[tokio::test]
    async fn test_clear_queue() {
        let sender = SenderService::with_defaults();
        sender.queue_files([PathBuf::from("/a/file.bin")]).await;
        sender.clear_queue().await;
        assert_eq!(sender.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let sender = SenderService::with_defaults();
        let mut first = sender.subscribe().await;
        let mut second = sender.subscribe().await;

        let event = TransferEvent::Status {
            message: "queued".to_string(),
        };
        sender.event_tx.send(event.clone()).unwrap();

        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_noop() {
        let mut sender = SenderService::with_defaults();
        assert!(!sender.is_running());
        sender.stop();
        sender.stop();
        assert!(!sender.is_running());
    }

    #[tokio::test]
    async fn test_missing_file_fails_without_blocking_queue() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Mutex::new(VecDeque::from([PathBuf::from(
            "/definitely/not/here.bin",
        )])));
        let (_stop_tx, stop_rx) = watch::channel(false);

        let target: SocketAddr = "127.0.0.1:1".parse().unwrap();
        SenderService::drain_queue(
            target,
            SenderConfig::default(),
            queue,
            stop_rx,
            &event_tx,
        )
        .await;

        let mut saw_failure = false;
        let mut saw_summary = false;
        while let Ok(event) = event_rx.try_recv() {
            match event {
                TransferEvent::Completed { success, .. } => {
                    assert!(!success);
                    saw_failure = true;
                }
                TransferEvent::AllFilesSent { sent, failed } => {
                    assert_eq!(sent, 0);
                    assert_eq!(failed, 1);
                    saw_summary = true;
                }
                _ => {}
            }
        }
        assert!(saw_failure);
        assert!(saw_summary);
    }

    #[test]
    fn test_config_defaults() {
        let config = SenderConfig::default();
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.ack_timeout, DEFAULT_ACK_TIMEOUT);
        assert_eq!(config.chunk_size, CHUNK_SIZE);
        assert!(!config.stop_on_failure);
    }
}
