//! LAN device discovery
//!
//! UDP broadcast discovery on a fixed port. Each node periodically
//! broadcasts a request datagram announcing itself; every node listens
//! on the same port, answers requests with a unicast response carrying
//! its accepting-state, and records each request or response it sees as
//! a sighting in the shared [`DeviceRegistry`].
//!
//! ## Datagram protocol
//!
//! - Request: `{"type": "REQUEST", "ip", "hostname", "timestamp"}`
//! - Response: `{"type": "RESPONSE", "ip", "hostname", "accepting", "timestamp"}`
//!
//! Unrecognized shapes are dropped silently.
//!
//! [`DeviceRegistry`]: crate::DeviceRegistry

pub mod events;
pub mod service;

pub use events::DiscoveryEvent;
pub use service::{DiscoveryConfig, DiscoveryService, DISCOVERY_PORT};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// One discovery datagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DiscoveryMessage {
    /// Broadcast announcement asking receivers to identify themselves
    #[serde(rename = "REQUEST")]
    Request {
        /// Announcer's address
        ip: IpAddr,
        /// Announcer's hostname
        hostname: String,
        /// UNIX milliseconds when the datagram was built
        timestamp: i64,
    },

    /// Unicast reply to a request, carrying the replier's accepting-state
    #[serde(rename = "RESPONSE")]
    Response {
        /// Replier's address
        ip: IpAddr,
        /// Replier's hostname
        hostname: String,
        /// Whether the replier is currently willing to receive files
        accepting: bool,
        /// UNIX milliseconds when the datagram was built
        timestamp: i64,
    },
}

impl DiscoveryMessage {
    /// Build a request announcing the given identity
    pub fn request(ip: IpAddr, hostname: impl Into<String>) -> Self {
        DiscoveryMessage::Request {
            ip,
            hostname: hostname.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Build a response carrying the given identity and accepting-state
    pub fn response(ip: IpAddr, hostname: impl Into<String>, accepting: bool) -> Self {
        DiscoveryMessage::Response {
            ip,
            hostname: hostname.into(),
            accepting,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// The address the message claims to come from
    pub fn ip(&self) -> IpAddr {
        match self {
            DiscoveryMessage::Request { ip, .. } => *ip,
            DiscoveryMessage::Response { ip, .. } => *ip,
        }
    }

    /// The hostname the message claims
    pub fn hostname(&self) -> &str {
        match self {
            DiscoveryMessage::Request { hostname, .. } => hostname,
            DiscoveryMessage::Response { hostname, .. } => hostname,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let msg = DiscoveryMessage::request("192.168.1.5".parse().unwrap(), "alpha");
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"REQUEST\""));
        assert!(json.contains("\"hostname\":\"alpha\""));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_response_wire_shape() {
        let msg = DiscoveryMessage::response("192.168.1.6".parse().unwrap(), "beta", true);
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"RESPONSE\""));
        assert!(json.contains("\"accepting\":true"));
    }

    #[test]
    fn test_round_trip() {
        let msg = DiscoveryMessage::response("10.0.0.9".parse().unwrap(), "gamma", false);
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: DiscoveryMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_unknown_shape_rejected() {
        let result =
            serde_json::from_str::<DiscoveryMessage>(r#"{"type":"PING","ip":"10.0.0.1"}"#);
        assert!(result.is_err());

        let result = serde_json::from_str::<DiscoveryMessage>("garbage");
        assert!(result.is_err());
    }
}
