//! Shared data types: endpoints, discovery records, pairing/session bookkeeping.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An IP address family plus address bytes plus port, used for both TCP and
/// UDP targets (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// IPv4 address and port.
    V4(Ipv4Addr, u16),
    /// IPv6 address and port.
    V6(Ipv6Addr, u16),
}

impl Endpoint {
    /// Builds an endpoint from a standard library socket address.
    #[must_use]
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::V4(*v4.ip(), v4.port()),
            SocketAddr::V6(v6) => Self::V6(*v6.ip(), v6.port()),
        }
    }

    /// Converts back to a standard library socket address.
    #[must_use]
    pub fn to_socket_addr(self) -> SocketAddr {
        match self {
            Self::V4(ip, port) => SocketAddr::new(IpAddr::V4(ip), port),
            Self::V6(ip, port) => SocketAddr::new(IpAddr::V6(ip), port),
        }
    }

    /// Port component, regardless of address family.
    #[must_use]
    pub fn port(self) -> u16 {
        match self {
            Self::V4(_, port) | Self::V6(_, port) => port,
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::from_socket_addr(addr)
    }
}

/// A host discovered by the external service browser (§3, §6).
///
/// Consumed immutably by the control client; the core never mutates a
/// `DiscoveredHost` once the browser hands it over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredHost {
    /// Human-readable name advertised by the host.
    pub name: String,
    /// The advertised service (control) endpoint.
    pub service_endpoint: Endpoint,
    /// An optional preferred infrastructure-Wi-Fi endpoint (IPv4), distinct
    /// from the advertised service endpoint, used when peer-to-peer discovery
    /// and infra connectivity resolve to different addresses.
    pub infra_endpoint: Option<Endpoint>,
}

impl DiscoveredHost {
    /// The endpoint the control client should actually dial: the preferred
    /// infra endpoint if present, otherwise the advertised service endpoint.
    #[must_use]
    pub fn connect_endpoint(&self) -> Endpoint {
        self.infra_endpoint.unwrap_or(self.service_endpoint)
    }
}

/// A host-side pairing record: a viewer handshake awaiting operator
/// accept/decline.
///
/// Created when a handshake arrives and auto-accept is off; removed on
/// accept/decline/connection-close/superseded-by-newer-handshake (§3).
#[derive(Debug, Clone)]
pub struct PendingPairing {
    /// Unique id for this pairing attempt.
    pub id: Uuid,
    /// The owning connection's id.
    pub connection_id: u64,
    /// The pairing code the viewer supplied.
    pub code: String,
    /// Textual remote address, for display/logging.
    pub remote: String,
    /// When the handshake request arrived.
    pub requested_at: Instant,
}

/// A host-side accepted session: one per accepted connection (§3).
#[derive(Debug, Clone)]
pub struct Session {
    /// Session id, identical to the `sessionID` sent to the viewer.
    pub id: Uuid,
    /// Textual remote address, for display/logging.
    pub remote: String,
    /// When the session was created (handshake accepted).
    pub started_at: Instant,
}

/// Either a pending pairing or an accepted session for one connection — a
/// connection holds at most one of the two, never both (§3 invariant).
#[derive(Debug, Clone)]
pub enum ConnectionTag {
    /// No handshake has completed yet.
    None,
    /// Awaiting operator accept/decline.
    Pending(PendingPairing),
    /// Handshake accepted; media parameters may follow.
    Session(Session),
}

impl ConnectionTag {
    /// The session, if this connection has been accepted.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Session(s) => Some(s),
            _ => None,
        }
    }

    /// The pending pairing, if this connection is awaiting a decision.
    #[must_use]
    pub fn pending(&self) -> Option<&PendingPairing> {
        match self {
            Self::Pending(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovered_host_prefers_infra_endpoint() {
        let service = Endpoint::V4(Ipv4Addr::new(192, 168, 1, 2), 52345);
        let infra = Endpoint::V4(Ipv4Addr::new(10, 0, 0, 2), 52345);
        let host = DiscoveredHost {
            name: "Study".into(),
            service_endpoint: service,
            infra_endpoint: Some(infra),
        };
        assert_eq!(host.connect_endpoint(), infra);

        let host_no_infra = DiscoveredHost { infra_endpoint: None, ..host };
        assert_eq!(host_no_infra.connect_endpoint(), service);
    }

    #[test]
    fn endpoint_roundtrips_through_socket_addr() {
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let ep = Endpoint::from_socket_addr(addr);
        assert_eq!(ep.to_socket_addr(), addr);
        assert_eq!(ep.port(), 4000);
    }
}
