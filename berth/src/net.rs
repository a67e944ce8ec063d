use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::debug;

/// Overrides bind-address discovery when set.
const HOST_ENV: &str = "BERTH_HOST";

/// Detect the address containers bind and advertise on. Resolution order:
/// explicit `BERTH_HOST`, the interface the OS routes outbound traffic
/// through, loopback as the last resort.
pub(crate) fn detect_bind_address() -> String {
    if let Ok(host) = std::env::var(HOST_ENV)
        && !host.is_empty()
    {
        debug!(host, "using bind address from {HOST_ENV}");
        return host;
    }
    match routed_ipv4() {
        Some(ip) => ip.to_string(),
        None => Ipv4Addr::LOCALHOST.to_string(),
    }
}

/// Local IPv4 address selected by the routing table for outbound traffic.
/// Connecting a UDP socket only fixes the route; no packet is sent.
fn routed_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(("198.51.100.1", 80)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}
