//! Async discovery service
//!
//! Runs two concurrent tasks sharing one broadcast-enabled UDP socket:
//!
//! - **Announcer**: broadcasts a presence request on a fixed period,
//!   then prunes stale entries from the shared device registry.
//! - **Responder**: receives datagrams, answers requests with a unicast
//!   response carrying this node's accepting-state, and records every
//!   foreign request or response as a sighting.
//!
//! Both tasks observe a shared stop signal at every suspension point,
//! so a stop request takes effect within one poll interval.

use super::events::DiscoveryEvent;
use super::DiscoveryMessage;
use crate::registry::{DeviceRegistry, DEVICE_EXPIRY};
use crate::{identity, Result, ShuttleError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Fixed UDP port for discovery datagrams
pub const DISCOVERY_PORT: u16 = 50000;

/// Default period between presence broadcasts
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(3);

/// IPv4 local-segment broadcast address
const BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Largest discovery datagram we will parse
const MAX_DATAGRAM_LEN: usize = 1024;

/// Configuration for the discovery service
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// UDP port to announce on and listen on
    pub port: u16,

    /// How often to broadcast presence
    pub announce_interval: Duration,

    /// How long a peer survives without a fresh sighting
    pub expiry: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DISCOVERY_PORT,
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            expiry: DEVICE_EXPIRY,
        }
    }
}

/// Broadcast announcer + responder pair feeding a [`DeviceRegistry`]
pub struct DiscoveryService {
    config: DiscoveryConfig,
    registry: DeviceRegistry,
    accepting: Arc<AtomicBool>,
    event_tx: mpsc::UnboundedSender<DiscoveryEvent>,
    event_rx: Arc<RwLock<mpsc::UnboundedReceiver<DiscoveryEvent>>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<DiscoveryEvent>>>>,
    forwarding: Arc<AtomicBool>,
    stop_tx: Option<watch::Sender<bool>>,
}

impl DiscoveryService {
    /// Create a service over an existing registry.
    ///
    /// The registry is shared: the outer layer keeps a clone to read
    /// the target picker from, and both discovery tasks feed it.
    pub fn new(registry: DeviceRegistry, config: DiscoveryConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            config,
            registry,
            accepting: Arc::new(AtomicBool::new(false)),
            event_tx,
            event_rx: Arc::new(RwLock::new(event_rx)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            forwarding: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
        }
    }

    /// Create a service with default configuration and a fresh registry
    pub fn with_defaults() -> Self {
        Self::new(DeviceRegistry::with_defaults(), DiscoveryConfig::default())
    }

    /// The shared registry this service feeds
    pub fn registry(&self) -> DeviceRegistry {
        self.registry.clone()
    }

    /// The shared accepting-state flag announced to peers.
    ///
    /// Hand this to the receiver service so discovery reports whether
    /// this node is currently willing to receive files.
    pub fn accepting_flag(&self) -> Arc<AtomicBool> {
        self.accepting.clone()
    }

    /// Set the accepting-state announced to peers
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Relaxed);
    }

    /// Get a receiver for discovery events.
    ///
    /// Every subscriber sees every event from the moment it subscribes;
    /// dropped subscribers are pruned on the next send.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<DiscoveryEvent> {
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

    /// Bind the discovery socket and spawn the announcer and responder.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::BindFailed`] if the discovery port is
    /// already taken. Broadcast send failures after startup are
    /// transient: logged, never fatal to the loops.
    pub async fn start(&mut self) -> Result<()> {
        if self.stop_tx.is_some() {
            debug!("discovery service already running");
            return Ok(());
        }

        let socket = UdpSocket::bind(("0.0.0.0", self.config.port))
            .await
            .map_err(|e| {
                ShuttleError::BindFailed(format!("discovery port {}: {e}", self.config.port))
            })?;
        socket.set_broadcast(true)?;
        let socket = Arc::new(socket);

        info!("discovery service listening on UDP port {}", self.config.port);

        let (stop_tx, stop_rx) = watch::channel(false);
        self.stop_tx = Some(stop_tx);

        let _ = self.event_tx.send(DiscoveryEvent::Started {
            port: self.config.port,
        });

        self.spawn_announcer(socket.clone(), stop_rx.clone());
        self.spawn_responder(socket, stop_rx);

        Ok(())
    }

    /// Stop both tasks. Calling this on a stopped service is a no-op.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            info!("stopping discovery service");
            let _ = stop_tx.send(true);
            let _ = self.event_tx.send(DiscoveryEvent::Stopped);
        }
    }

    fn spawn_announcer(&self, socket: Arc<UdpSocket>, mut stop_rx: watch::Receiver<bool>) {
        let registry = self.registry.clone();
        let event_tx = self.event_tx.clone();
        let announce_interval = self.config.announce_interval;
        let port = self.config.port;

        tokio::spawn(async move {
            let mut ticker = interval(announce_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = Self::announce(&socket, port).await {
                            warn!("presence broadcast failed: {e}");
                        }

                        for record in registry.prune_expired().await {
                            let _ = event_tx.send(DiscoveryEvent::DeviceExpired {
                                ip: record.ip,
                            });
                        }
                    }
                    _ = stop_rx.changed() => {
                        debug!("announcer shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Broadcast one presence request to the local segment
    async fn announce(socket: &UdpSocket, port: u16) -> Result<()> {
        let message = DiscoveryMessage::request(identity::local_ip(), identity::local_hostname());
        let bytes = serde_json::to_vec(&message)?;
        let broadcast = SocketAddr::new(IpAddr::V4(BROADCAST_ADDR), port);

        let sent = socket.send_to(&bytes, broadcast).await?;
        debug!("broadcast presence request ({sent} bytes)");
        Ok(())
    }

    fn spawn_responder(&self, socket: Arc<UdpSocket>, mut stop_rx: watch::Receiver<bool>) {
        let registry = self.registry.clone();
        let accepting = self.accepting.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_LEN];

            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((size, src)) => {
                                let own_ip = identity::local_ip();
                                if let Err(e) = Self::handle_datagram(
                                    &socket,
                                    &buf[..size],
                                    src,
                                    own_ip,
                                    &registry,
                                    &accepting,
                                    &event_tx,
                                )
                                .await
                                {
                                    warn!("error handling datagram from {src}: {e}");
                                }
                            }
                            Err(e) => {
                                warn!("discovery receive error: {e}");
                                tokio::time::sleep(Duration::from_millis(100)).await;
                            }
                        }
                    }
                    _ = stop_rx.changed() => {
                        debug!("responder shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Process one inbound datagram.
    ///
    /// Requests get a unicast response and count as a sighting of the
    /// requester; responses count as a sighting of the replier.
    /// Malformed datagrams and our own broadcasts are dropped silently.
    async fn handle_datagram(
        socket: &UdpSocket,
        data: &[u8],
        src: SocketAddr,
        own_ip: IpAddr,
        registry: &DeviceRegistry,
        accepting: &AtomicBool,
        event_tx: &mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> Result<()> {
        let message: DiscoveryMessage = match serde_json::from_slice(data) {
            Ok(m) => m,
            Err(e) => {
                debug!("ignoring malformed datagram from {src}: {e}");
                return Ok(());
            }
        };

        // Our own broadcasts loop back; skip them
        if src.ip() == own_ip || message.ip() == own_ip {
            return Ok(());
        }

        match message {
            DiscoveryMessage::Request { ref hostname, .. } => {
                let reply = DiscoveryMessage::response(
                    own_ip,
                    identity::local_hostname(),
                    accepting.load(Ordering::Relaxed),
                );
                let bytes = serde_json::to_vec(&reply)?;
                if let Err(e) = socket.send_to(&bytes, src).await {
                    warn!("failed to answer discovery request from {src}: {e}");
                }

                // Symmetric sighting: we learn about who is looking for us
                Self::record(registry, event_tx, src.ip(), hostname, false).await;
            }
            DiscoveryMessage::Response {
                ref hostname,
                accepting,
                ..
            } => {
                Self::record(registry, event_tx, src.ip(), hostname, accepting).await;
            }
        }

        Ok(())
    }

    async fn record(
        registry: &DeviceRegistry,
        event_tx: &mpsc::UnboundedSender<DiscoveryEvent>,
        ip: IpAddr,
        hostname: &str,
        accepting: bool,
    ) {
        registry.record_sighting(ip, hostname, accepting).await;
        let _ = event_tx.send(DiscoveryEvent::DeviceSighted {
            ip,
            hostname: hostname.to_string(),
            accepting,
        });
    }
}
