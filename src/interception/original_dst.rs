// src/interception/original_dst.rs
//! Original destination recovery for redirected sockets
//!
//! The kernel's NAT/TPROXY redirection records the address the client meant
//! to reach. On Linux it is exposed through `getsockopt(SOL_IP,
//! SO_ORIGINAL_DST)` as a `struct sockaddr_in`:
//!
//! ```text
//! sin_family  host byte order, AF_INET
//! sin_port    network byte order
//! sin_addr    network byte order
//! sin_zero    padding, ignored
//! ```
//!
//! Under TPROXY the accepted socket's local address already is the original
//! destination, so "not redirected" is judged against the listener's own
//! bound address, never the accepted socket's.

use crate::utils::errors::{GatewayError, Result};
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpStream;
use tracing::debug;

#[cfg(target_os = "linux")]
use std::net::{Ipv4Addr, SocketAddrV4};

/// Recovers the pre-redirect destination of an accepted connection
pub trait DestinationResolver: Send + Sync + 'static {
    fn resolve(&self, stream: &TcpStream) -> Result<SocketAddr>;
}

/// Reads `SO_ORIGINAL_DST` from the accepted socket
#[derive(Debug, Clone, Copy)]
pub struct OriginalDstResolver {
    listen_addr: SocketAddr,
}

impl OriginalDstResolver {
    /// `listen_addr` is the listener's bound address (port resolved)
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self { listen_addr }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Reject a recovered destination that points back at this listener
    pub fn check_redirected(&self, original: SocketAddr) -> Result<SocketAddr> {
        if targets_listener(original, self.listen_addr) {
            return Err(GatewayError::Resolution(format!(
                "connection to {} was not redirected",
                original
            )));
        }
        Ok(original)
    }
}

impl DestinationResolver for OriginalDstResolver {
    fn resolve(&self, stream: &TcpStream) -> Result<SocketAddr> {
        let original = SocketAddr::V4(query_original_dst(stream)?);
        self.check_redirected(original)
    }
}

/// Resolves every connection to one fixed destination
#[derive(Debug, Clone, Copy)]
pub struct StaticResolver(pub SocketAddr);

impl DestinationResolver for StaticResolver {
    fn resolve(&self, _stream: &TcpStream) -> Result<SocketAddr> {
        Ok(self.0)
    }
}

/// True when `destination` would land on the listener bound at `listen`.
///
/// A wildcard bind matches any address owned by this host.
pub fn targets_listener(destination: SocketAddr, listen: SocketAddr) -> bool {
    if destination.port() != listen.port() {
        return false;
    }

    let bind_ip = listen.ip();
    if bind_ip.is_unspecified() {
        is_local_ip(destination.ip())
    } else {
        destination.ip() == bind_ip
    }
}

fn is_local_ip(ip: IpAddr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }

    match interface_ips() {
        Ok(ips) => ips.contains(&ip),
        Err(e) => {
            debug!(error = %e, "Interface enumeration failed");
            false
        }
    }
}

/// Addresses assigned to this host's interfaces
#[cfg(target_os = "linux")]
pub fn interface_ips() -> nix::Result<Vec<IpAddr>> {
    use std::net::SocketAddrV6;

    let ips = nix::ifaddrs::getifaddrs()?
        .filter_map(|ifaddr| ifaddr.address)
        .filter_map(|addr| {
            if let Some(v4) = addr.as_sockaddr_in() {
                Some(IpAddr::V4(*SocketAddrV4::from(*v4).ip()))
            } else {
                addr.as_sockaddr_in6()
                    .map(|v6| IpAddr::V6(*SocketAddrV6::from(*v6).ip()))
            }
        })
        .collect();

    Ok(ips)
}

#[cfg(not(target_os = "linux"))]
pub fn interface_ips() -> nix::Result<Vec<IpAddr>> {
    Ok(Vec::new())
}

#[cfg(target_os = "linux")]
fn query_original_dst(stream: &TcpStream) -> Result<SocketAddrV4> {
    use nix::sys::socket::{getsockopt, sockopt::OriginalDst};

    let raw = getsockopt(stream, OriginalDst).map_err(|e| {
        GatewayError::Resolution(format!("SO_ORIGINAL_DST unavailable: {}", e))
    })?;
    decode_sockaddr_in(&raw)
}

#[cfg(not(target_os = "linux"))]
fn query_original_dst(_stream: &TcpStream) -> Result<std::net::SocketAddrV4> {
    Err(GatewayError::Resolution(
        "SO_ORIGINAL_DST is only available on Linux".to_string(),
    ))
}

/// Decode the `sockaddr_in` returned for `SO_ORIGINAL_DST`
#[cfg(target_os = "linux")]
pub fn decode_sockaddr_in(raw: &libc::sockaddr_in) -> Result<SocketAddrV4> {
    if raw.sin_family != libc::AF_INET as libc::sa_family_t {
        return Err(GatewayError::Resolution(format!(
            "unexpected address family {}",
            raw.sin_family
        )));
    }

    let port = u16::from_be(raw.sin_port);
    let ip = Ipv4Addr::from(raw.sin_addr.s_addr.to_ne_bytes());

    if port == 0 || ip.is_unspecified() {
        return Err(GatewayError::Resolution(format!(
            "empty original destination {}:{}",
            ip, port
        )));
    }

    Ok(SocketAddrV4::new(ip, port))
}
