//! Transfer receiver
//!
//! Accept loop writing one file per inbound connection into a save
//! directory:
//!
//! ```text
//! STOPPED -> LISTENING -> (ACCEPTING per connection) -> LISTENING ... -> STOPPED
//! ```
//!
//! Connections are handled one at a time; concurrent peers queue in
//! the OS backlog. The accept call is bounded by a short poll timeout
//! purely so a stop request is observed promptly.
//!
//! Receiver policy for incomplete transfers: the partial file is
//! **preserved as resumable** under a `.part` name — its byte length is
//! the offset a future resume header must assert. Partials are never
//! deleted or silently promoted to the final name.

use super::events::TransferEvent;
use super::{ProgressTracker, CHUNK_SIZE};
use crate::{resume, wire, Result, ShuttleError};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default bound on reading the header of an inbound connection
pub const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default accept poll interval; the cooperative-cancellation checkpoint
pub const DEFAULT_ACCEPT_POLL: Duration = Duration::from_secs(1);

/// Bound on one chunk read while streaming
const STREAM_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Listen backlog; concurrent peers queue here while one is handled
const LISTEN_BACKLOG: u32 = 5;

/// Configuration for the receiver service
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Bound on reading the header frame
    pub header_timeout: Duration,

    /// Accept poll interval (stop-request latency bound)
    pub accept_poll: Duration,

    /// Payload chunk size
    pub chunk_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            header_timeout: DEFAULT_HEADER_TIMEOUT,
            accept_poll: DEFAULT_ACCEPT_POLL,
            chunk_size: CHUNK_SIZE,
        }
    }
}

/// Accept-loop file receiver
pub struct ReceiverService {
    config: ReceiverConfig,
    event_tx: mpsc::UnboundedSender<TransferEvent>,
    event_rx: Arc<RwLock<mpsc::UnboundedReceiver<TransferEvent>>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<TransferEvent>>>>,
    forwarding: Arc<AtomicBool>,
    stop_tx: Option<watch::Sender<bool>>,
    accepting: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
}

impl ReceiverService {
    /// Create a receiver with the given configuration
    pub fn new(config: ReceiverConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            config,
            event_tx,
            event_rx: Arc::new(RwLock::new(event_rx)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            forwarding: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            accepting: Arc::new(AtomicBool::new(false)),
            local_addr: None,
        }
    }

    /// Create a receiver with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ReceiverConfig::default())
    }

    /// Share an accepting-state flag with the discovery service, so
    /// announcements report whether this node is willing to receive.
    pub fn with_accepting_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.accepting = flag;
        self
    }

    /// Whether the accept loop is currently listening
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Relaxed)
    }

    /// The address the listener is bound to, once started.
    ///
    /// Useful when binding port 0 to get an OS-assigned port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
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

    /// Bind the listen socket and spawn the accept loop.
    ///
    /// Creates `save_dir` if absent. Binding failure is reported once
    /// through a `Started { success: false }` event and as
    /// [`ShuttleError::BindFailed`]; the loop never starts and is not
    /// retried.
    pub async fn start(
        &mut self,
        listen_ip: IpAddr,
        listen_port: u16,
        save_dir: impl Into<PathBuf>,
    ) -> Result<()> {
        if self.stop_tx.is_some() {
            debug!("receiver already listening");
            return Ok(());
        }

        let save_dir = save_dir.into();
        if let Err(e) = fs::create_dir_all(&save_dir).await {
            let detail = format!("cannot create save directory {save_dir:?}: {e}");
            let _ = self.event_tx.send(TransferEvent::Started {
                success: false,
                detail: detail.clone(),
            });
            return Err(ShuttleError::BindFailed(detail));
        }

        let addr = SocketAddr::new(listen_ip, listen_port);
        let listener = match Self::bind(addr) {
            Ok(listener) => listener,
            Err(e) => {
                let detail = format!("cannot listen on {addr}: {e}");
                let _ = self.event_tx.send(TransferEvent::Started {
                    success: false,
                    detail: detail.clone(),
                });
                return Err(ShuttleError::BindFailed(detail));
            }
        };

        let bound = listener.local_addr()?;
        self.local_addr = Some(bound);

        info!("receiver listening on {bound}");
        self.accepting.store(true, Ordering::Relaxed);
        let _ = self.event_tx.send(TransferEvent::Started {
            success: true,
            detail: format!("listening on {bound}"),
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        self.stop_tx = Some(stop_tx);

        let config = self.config.clone();
        let event_tx = self.event_tx.clone();
        let accepting = self.accepting.clone();

        tokio::spawn(async move {
            Self::accept_loop(listener, save_dir, config, stop_rx, &event_tx).await;
            accepting.store(false, Ordering::Relaxed);
            debug!("accept loop exited");
        });

        Ok(())
    }

    /// Bind with address reuse and a bounded backlog
    fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(LISTEN_BACKLOG)
    }

    /// Request the accept loop to stop within one poll interval.
    /// Calling this on a stopped receiver is a no-op.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            info!("stopping receiver");
            self.accepting.store(false, Ordering::Relaxed);
            let _ = stop_tx.send(true);
            let _ = self.event_tx.send(TransferEvent::Stopped);
        }
    }

    async fn accept_loop(
        listener: TcpListener,
        save_dir: PathBuf,
        config: ReceiverConfig,
        stop_rx: watch::Receiver<bool>,
        event_tx: &mpsc::UnboundedSender<TransferEvent>,
    ) {
        loop {
            if *stop_rx.borrow() {
                break;
            }

            // The timeout is the cancellation checkpoint, not an error
            let accepted = match timeout(config.accept_poll, listener.accept()).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    warn!("error accepting connection: {e}");
                    continue;
                }
                Err(_) => continue,
            };

            let (stream, peer) = accepted;
            debug!("connection from {peer}");
            let _ = event_tx.send(TransferEvent::Connection {
                peer: peer.to_string(),
            });

            // Serial handling: one file in flight at a time. Errors are
            // scoped to this connection; the loop continues regardless.
            if let Err(e) =
                Self::handle_connection(stream, &save_dir, &config, &stop_rx, event_tx).await
            {
                warn!("connection from {peer} failed: {e}");
            }
        }
    }

    /// Negotiate and write one file from one connection.
    ///
    /// Owns the completion event: exactly one `Completed` is emitted in
    /// every path, success or not, including local I/O failures while
    /// opening, acknowledging or renaming.
    async fn handle_connection(
        mut stream: TcpStream,
        save_dir: &Path,
        config: &ReceiverConfig,
        stop_rx: &watch::Receiver<bool>,
        event_tx: &mpsc::UnboundedSender<TransferEvent>,
    ) -> Result<()> {
        let header = match timeout(config.header_timeout, wire::read_header(&mut stream)).await {
            Ok(Ok(header)) => header,
            Ok(Err(e)) => {
                let _ = event_tx.send(TransferEvent::Completed {
                    filename: String::new(),
                    success: false,
                    detail: format!("failed to read header: {e}"),
                });
                return Err(e);
            }
            Err(_) => {
                let e = ShuttleError::Timeout("header never arrived".to_string());
                let _ = event_tx.send(TransferEvent::Completed {
                    filename: String::new(),
                    success: false,
                    detail: e.to_string(),
                });
                return Err(e);
            }
        };

        let filename = header.filename.clone();
        let result =
            Self::receive_one(&mut stream, &header, save_dir, config, stop_rx, event_tx).await;

        match &result {
            Ok(()) => {
                info!("received {}", header.filename);
                let _ = event_tx.send(TransferEvent::Completed {
                    filename,
                    success: true,
                    detail: "received successfully".to_string(),
                });
            }
            Err(e) => {
                // The partial, if any, stays on disk under its .part
                // name; its length is the offset a future resume must
                // assert
                let detail = match e {
                    ShuttleError::Aborted => "aborted".to_string(),
                    ShuttleError::Truncated => format!(
                        "incomplete: connection closed before {} bytes arrived",
                        header.filesize
                    ),
                    other => other.to_string(),
                };
                let _ = event_tx.send(TransferEvent::Completed {
                    filename,
                    success: false,
                    detail,
                });
            }
        }

        result
    }

    /// Resume negotiation, acknowledgment, payload streaming and the
    /// final rename. Every error propagates to the caller, which owns
    /// the completion event.
    async fn receive_one(
        stream: &mut TcpStream,
        header: &wire::WireHeader,
        save_dir: &Path,
        config: &ReceiverConfig,
        stop_rx: &watch::Receiver<bool>,
        event_tx: &mpsc::UnboundedSender<TransferEvent>,
    ) -> Result<()> {
        let final_path = save_dir.join(&header.filename);
        let part_path = resume::partial_path(save_dir, &header.filename);

        // Resume negotiation: the asserted offset must match the
        // preserved partial exactly, or nothing is written at all
        let file = if header.resume_offset > 0 {
            let found = fs::metadata(&part_path).await.map(|m| m.len()).unwrap_or(0);
            if found != header.resume_offset {
                wire::write_ack(stream, false).await?;
                return Err(ShuttleError::ResumeMismatch {
                    expected: header.resume_offset,
                    found,
                });
            }
            debug!("resuming {} at byte {}", header.filename, found);
            OpenOptions::new().append(true).open(&part_path).await?
        } else {
            File::create(&part_path).await?
        };

        wire::write_ack(stream, true).await?;

        let _ = event_tx.send(TransferEvent::Status {
            message: format!("receiving {} ({} bytes)", header.filename, header.filesize),
        });

        Self::stream_payload(stream, file, header, config, stop_rx, event_tx).await?;

        fs::rename(&part_path, &final_path).await?;
        Ok(())
    }

    /// Stream `filesize - resume_offset` payload bytes into the file
    async fn stream_payload(
        stream: &mut TcpStream,
        mut file: File,
        header: &wire::WireHeader,
        config: &ReceiverConfig,
        stop_rx: &watch::Receiver<bool>,
        event_tx: &mpsc::UnboundedSender<TransferEvent>,
    ) -> Result<()> {
        let mut tracker = ProgressTracker::new(header.filesize, header.resume_offset);
        let mut buf = vec![0u8; config.chunk_size];

        while !tracker.is_complete() {
            if *stop_rx.borrow() {
                file.flush().await?;
                return Err(ShuttleError::Aborted);
            }

            let remaining = header.filesize - tracker.bytes_moved();
            let to_read = remaining.min(config.chunk_size as u64) as usize;

            let n = match timeout(STREAM_READ_TIMEOUT, stream.read(&mut buf[..to_read])).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    file.flush().await?;
                    return Err(ShuttleError::from_io_error(e, "reading payload"));
                }
                Err(_) => {
                    file.flush().await?;
                    return Err(ShuttleError::Timeout("payload read stalled".to_string()));
                }
            };

            if n == 0 {
                file.flush().await?;
                return Err(ShuttleError::Truncated);
            }

            file.write_all(&buf[..n]).await?;

            let (percent, bytes_per_second) = tracker.advance(n as u64);
            let _ = event_tx.send(TransferEvent::Progress {
                filename: header.filename.clone(),
                percent,
                bytes_per_second,
            });
        }

        file.flush().await?;

        // Terminal sample for zero-byte files, which skip the loop
        if header.filesize == 0 {
            let _ = event_tx.send(TransferEvent::Progress {
                filename: header.filename.clone(),
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
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_start_creates_save_dir() {
        let temp = TempDir::new().unwrap();
        let save_dir = temp.path().join("incoming/files");

        let mut receiver = ReceiverService::with_defaults();
        receiver
            .start("127.0.0.1".parse().unwrap(), 0, &save_dir)
            .await
            .unwrap();

        assert!(save_dir.is_dir());
        assert!(receiver.is_accepting());
        receiver.stop();
    }

    #[tokio::test]
    async fn test_bind_failure_reported_once() {
        let temp = TempDir::new().unwrap();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        // Occupy a port, then try to bind it again without reuse of an
        // active listener being possible
        let occupied = TcpListener::bind((ip, 0)).await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let mut receiver = ReceiverService::with_defaults();
        let mut events = receiver.subscribe().await;

        let result = receiver.start(ip, port, temp.path()).await;
        assert!(matches!(result, Err(ShuttleError::BindFailed(_))));
        assert!(!receiver.is_accepting());

        let event = events.recv().await.unwrap();
        assert_eq!(event.success(), Some(false));
    }

    #[tokio::test]
    async fn test_local_write_failure_still_reports_completion() {
        let temp = TempDir::new().unwrap();
        // A directory squatting on the partial's name makes the file
        // creation fail after the header is accepted
        tokio::fs::create_dir(temp.path().join("blocked.bin.part"))
            .await
            .unwrap();

        let mut receiver = ReceiverService::with_defaults();
        let mut events = receiver.subscribe().await;
        receiver
            .start("127.0.0.1".parse().unwrap(), 0, temp.path())
            .await
            .unwrap();
        let addr = receiver.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let header = wire::WireHeader::new("blocked.bin", 64);
        wire::write_header(&mut stream, &header).await.unwrap();

        let completion = timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Some(TransferEvent::Completed {
                        filename, success, ..
                    }) => break (filename, success),
                    Some(_) => {}
                    None => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("no completion event for failed local write");

        assert_eq!(completion, ("blocked.bin".to_string(), false));
        receiver.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut receiver = ReceiverService::with_defaults();
        receiver
            .start("127.0.0.1".parse().unwrap(), 0, temp.path())
            .await
            .unwrap();

        receiver.stop();
        receiver.stop();
        assert!(!receiver.is_accepting());
    }

    #[test]
    fn test_config_defaults() {
        let config = ReceiverConfig::default();
        assert_eq!(config.header_timeout, DEFAULT_HEADER_TIMEOUT);
        assert_eq!(config.accept_poll, DEFAULT_ACCEPT_POLL);
        assert_eq!(config.chunk_size, CHUNK_SIZE);
    }
}
