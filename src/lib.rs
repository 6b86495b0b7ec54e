//! LAN File Shuttle protocol engine
//!
//! Peer-to-peer file exchange for machines on a local network, with no
//! central server: any node can announce itself as a receiver, be
//! discovered by others, and accept inbound byte streams while pushing
//! outbound files to a chosen peer.
//!
//! The crate is the transfer-and-discovery engine only. It exposes
//! typed event channels (progress, status, completion, sightings) and
//! consumes intents from an outer presentation layer it knows nothing
//! about.
//!
//! ## Services
//!
//! - [`SenderService`]: drains a FIFO file queue to one target, one
//!   TCP connection per file, with optional resume.
//! - [`ReceiverService`]: accept loop writing one file per connection
//!   into a save directory, preserving interrupted transfers as
//!   resumable partials.
//! - [`DiscoveryService`]: periodic UDP broadcast announcer plus a
//!   responder, feeding a shared [`DeviceRegistry`] with liveness
//!   expiry.
//!
//! ## Example
//!
//! ```no_run
//! use lan_shuttle_protocol::{ReceiverService, SenderService};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> lan_shuttle_protocol::Result<()> {
//!     let mut receiver = ReceiverService::with_defaults();
//!     let mut events = receiver.subscribe().await;
//!     receiver
//!         .start("0.0.0.0".parse().unwrap(), 65432, "received_files")
//!         .await?;
//!
//!     let mut sender = SenderService::with_defaults();
//!     sender.queue_files([PathBuf::from("notes.txt")]).await;
//!     sender.start("192.168.1.100".parse().unwrap(), 65432);
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod discovery;
pub mod identity;
pub mod registry;
pub mod resume;
pub mod transfer;
pub mod wire;

mod error;

pub use discovery::{
    DiscoveryConfig, DiscoveryEvent, DiscoveryMessage, DiscoveryService, DISCOVERY_PORT,
};
pub use error::{Result, ShuttleError};
pub use registry::{DeviceRecord, DeviceRegistry, DEVICE_EXPIRY};
pub use transfer::{
    ReceiverConfig, ReceiverService, SenderConfig, SenderService, TransferEvent, CHUNK_SIZE,
    DEFAULT_TRANSFER_PORT,
};
pub use wire::{WireHeader, MAX_HEADER_LEN};
