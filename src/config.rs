//! Enumerated configuration surface (§6).
//!
//! No environment variables or on-disk state are required by the core; a
//! caller (CLI binary, app shell) is free to source these from anywhere.

use serde::{Deserialize, Serialize};

use crate::fabric::PathKind;

/// Default TCP control port.
pub const DEFAULT_CONTROL_PORT: u16 = 52345;
/// Default Bonjour/mDNS-style service type for the control plane.
pub const DEFAULT_CONTROL_SERVICE_TYPE: &str = "_beamctl._tcp";
/// Default service type advertised for the media plane (identifier only,
/// never used to connect — see §6).
pub const DEFAULT_MEDIA_SERVICE_TYPE: &str = "_beamroom._udp";
/// Default fragmentation MTU in bytes (§4.2).
pub const DEFAULT_MTU: u16 = 1200;

/// Tunable configuration for a [`crate::control_plane::host::HostListener`]
/// or [`crate::control_plane::viewer::ViewerClient`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// TCP port the host listener binds.
    pub control_port: u16,
    /// Service type string used for control-plane advertisement.
    pub control_service_type: String,
    /// Service type string used for media-plane advertisement (identifier
    /// only).
    pub media_service_type: String,
    /// Host-side: whether incoming handshakes are accepted automatically
    /// without an operator decision.
    pub auto_accept: bool,
    /// Sender-side fragmentation MTU, in bytes.
    pub mtu: u16,
    /// Network path the control listener's advertisement runs over (§6).
    pub path_kind: PathKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_port: DEFAULT_CONTROL_PORT,
            control_service_type: DEFAULT_CONTROL_SERVICE_TYPE.to_string(),
            media_service_type: DEFAULT_MEDIA_SERVICE_TYPE.to_string(),
            auto_accept: false,
            mtu: DEFAULT_MTU,
            path_kind: PathKind::Other,
        }
    }
}
