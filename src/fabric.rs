//! Network fabric policy (§6): both planes are Wi-Fi-only, no cellular.
//!
//! The concrete network-path classification (which interface a socket would
//! bind to) is platform-specific and external to this crate; what the
//! transport core owns is the *policy decision* of which paths are
//! acceptable for which use, so that it is a testable call rather than a
//! comment next to a socket option. [`session_allowed`] gates
//! [`crate::media_plane::host::MediaHost::bind_on_path`]; [`discovery_allowed`]
//! gates whether [`crate::control_plane::host::HostListener`] advertises at
//! all.

use serde::{Deserialize, Serialize};

/// A network path's classification, as reported by the host platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathKind {
    /// Regular infrastructure Wi-Fi.
    InfrastructureWifi,
    /// Direct peer-to-peer Wi-Fi (e.g. Wi-Fi Aware), usable for discovery
    /// only.
    PeerToPeerWifi,
    /// Cellular data, never acceptable for this transport.
    Cellular,
    /// Any other path (wired Ethernet, loopback, …), treated as acceptable
    /// for local-only testing.
    Other,
}

/// Whether discovery is allowed to traverse `path`.
#[must_use]
pub fn discovery_allowed(path: PathKind) -> bool {
    !matches!(path, PathKind::Cellular)
}

/// Whether an established session (the control connection once paired, or
/// the media plane) is allowed to run over `path` (§6: "the established
/// session must run over infrastructure Wi-Fi").
#[must_use]
pub fn session_allowed(path: PathKind) -> bool {
    matches!(path, PathKind::InfrastructureWifi | PathKind::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cellular_is_never_allowed() {
        assert!(!discovery_allowed(PathKind::Cellular));
        assert!(!session_allowed(PathKind::Cellular));
    }

    #[test]
    fn peer_to_peer_is_discovery_only() {
        assert!(discovery_allowed(PathKind::PeerToPeerWifi));
        assert!(!session_allowed(PathKind::PeerToPeerWifi));
    }

    #[test]
    fn infra_wifi_allows_everything() {
        assert!(discovery_allowed(PathKind::InfrastructureWifi));
        assert!(session_allowed(PathKind::InfrastructureWifi));
    }
}
