//! Device registry
//!
//! Shared map of discovered peers, keyed by IP address. Both the
//! announcer and responder tasks insert sightings concurrently; the
//! outer layer reads snapshots to populate a target picker. Records
//! not refreshed within the expiry window are evicted on the next
//! prune pass.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Default liveness window before a peer is evicted
pub const DEVICE_EXPIRY: Duration = Duration::from_secs(15);

/// One discovered peer
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Peer address, also the registry key
    pub ip: IpAddr,

    /// Self-reported hostname
    pub hostname: String,

    /// Whether the peer is currently willing to receive files
    pub accepting: bool,

    /// When the last sighting (announcement or reply) arrived
    pub last_seen: Instant,
}

/// Registry of discovered peers with liveness expiry.
///
/// Cheaply cloneable; all clones share the same underlying map.
///
/// # Examples
///
/// ```
/// use lan_shuttle_protocol::DeviceRegistry;
///
/// # tokio_test::block_on(async {
/// let registry = DeviceRegistry::with_defaults();
/// registry
///     .record_sighting("192.168.1.7".parse().unwrap(), "laptop", true)
///     .await;
/// assert_eq!(registry.devices().await.len(), 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<IpAddr, DeviceRecord>>>,
    expiry: Duration,
}

impl DeviceRegistry {
    /// Create a registry with a custom expiry window
    pub fn new(expiry: Duration) -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            expiry,
        }
    }

    /// Create a registry with the default 15 second expiry
    pub fn with_defaults() -> Self {
        Self::new(DEVICE_EXPIRY)
    }

    /// Record one sighting of a peer.
    ///
    /// Inserts a new record or overwrites the existing one for that
    /// address (last writer wins). Returns `true` if the peer was not
    /// previously known.
    pub async fn record_sighting(
        &self,
        ip: IpAddr,
        hostname: impl Into<String>,
        accepting: bool,
    ) -> bool {
        let record = DeviceRecord {
            ip,
            hostname: hostname.into(),
            accepting,
            last_seen: Instant::now(),
        };

        let mut devices = self.devices.write().await;
        let is_new = devices.insert(ip, record).is_none();
        if is_new {
            debug!("new device sighted: {ip}");
        }
        is_new
    }

    /// Evict every record whose last sighting is older than the expiry
    /// window, returning the evicted records.
    pub async fn prune_expired(&self) -> Vec<DeviceRecord> {
        let now = Instant::now();
        let mut devices = self.devices.write().await;

        let expired: Vec<IpAddr> = devices
            .values()
            .filter(|r| now.duration_since(r.last_seen) > self.expiry)
            .map(|r| r.ip)
            .collect();

        expired
            .into_iter()
            .filter_map(|ip| {
                debug!("device expired: {ip}");
                devices.remove(&ip)
            })
            .collect()
    }

    /// Snapshot of all live records
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        self.devices.read().await.values().cloned().collect()
    }

    /// Look up one peer by address
    pub async fn get(&self, ip: IpAddr) -> Option<DeviceRecord> {
        self.devices.read().await.get(&ip).cloned()
    }

    /// Number of live records
    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    /// Whether the registry currently holds no records
    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Drop all records (outer-layer "refresh" action)
    pub async fn clear(&self) {
        self.devices.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::new(192, 168, 1, last))
    }

    #[tokio::test]
    async fn test_sighting_insert_and_overwrite() {
        let registry = DeviceRegistry::with_defaults();

        assert!(registry.record_sighting(ip(10), "alpha", false).await);
        // Same address again: overwrite, not a new peer
        assert!(!registry.record_sighting(ip(10), "alpha-renamed", true).await);

        let record = registry.get(ip(10)).await.unwrap();
        assert_eq!(record.hostname, "alpha-renamed");
        assert!(record.accepting);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_prune_evicts_stale_records() {
        let registry = DeviceRegistry::new(Duration::from_millis(20));

        registry.record_sighting(ip(10), "stale", false).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        registry.record_sighting(ip(11), "fresh", true).await;

        let evicted = registry.prune_expired().await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].ip, ip(10));

        let remaining = registry.devices().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].ip, ip(11));
    }

    #[tokio::test]
    async fn test_refresh_before_expiry_survives() {
        let registry = DeviceRegistry::new(Duration::from_millis(50));

        registry.record_sighting(ip(10), "alpha", false).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Refresh resets the liveness clock
        registry.record_sighting(ip(10), "alpha", false).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let evicted = registry.prune_expired().await;
        assert!(evicted.is_empty());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let registry = DeviceRegistry::with_defaults();
        registry.record_sighting(ip(10), "a", false).await;
        registry.record_sighting(ip(11), "b", true).await;

        registry.clear().await;
        assert!(registry.is_empty().await);
    }
}
