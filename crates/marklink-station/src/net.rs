use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// LAN address of the interface that routes to the internet.
///
/// Connecting a UDP socket sends nothing; it only selects the outbound
/// interface. Falls back to loopback on hosts without a route.
pub fn detect_local_ip() -> IpAddr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect("8.8.8.8:80")?;
            s.local_addr()
        })
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
