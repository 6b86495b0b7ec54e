//! Events emitted by the discovery service

use std::net::IpAddr;

/// Events emitted by [`DiscoveryService`]
///
/// [`DiscoveryService`]: super::DiscoveryService
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// The announcer and responder tasks are running
    Started {
        /// UDP port the responder listens on
        port: u16,
    },

    /// A peer announced itself or replied to an announcement
    DeviceSighted {
        /// Peer address
        ip: IpAddr,
        /// Peer's self-reported hostname
        hostname: String,
        /// Whether the peer is currently willing to receive files
        accepting: bool,
    },

    /// A peer was evicted after its liveness window elapsed
    DeviceExpired {
        /// Address of the evicted peer
        ip: IpAddr,
    },

    /// The service stopped on request
    Stopped,
}

impl DiscoveryEvent {
    /// Peer address, if this is a device-scoped event
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            DiscoveryEvent::DeviceSighted { ip, .. } => Some(*ip),
            DiscoveryEvent::DeviceExpired { ip } => Some(*ip),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_extraction() {
        let addr: IpAddr = "192.168.1.20".parse().unwrap();

        let sighted = DiscoveryEvent::DeviceSighted {
            ip: addr,
            hostname: "peer".to_string(),
            accepting: true,
        };
        assert_eq!(sighted.ip(), Some(addr));

        let started = DiscoveryEvent::Started { port: 50000 };
        assert_eq!(started.ip(), None);
    }
}
