//! Local identity lookup
//!
//! Small pure functions with no retained state, called fresh wherever
//! the local address or hostname is needed.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Discover the local IP address used for outbound LAN traffic.
///
/// Connects a datagram socket to an unroutable address to let the OS
/// pick the outbound interface; no traffic is actually sent. Falls
/// back to the loopback address when no interface is available.
pub fn local_ip() -> IpAddr {
    fn probe() -> Option<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        // Does not have to be reachable
        socket.connect("10.255.255.255:1").ok()?;
        Some(socket.local_addr().ok()?.ip())
    }

    probe().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// The local machine's hostname, or `"unknown"` if it cannot be read.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
