//! The control plane (§4.3): a discoverable TCP service carrying pairing,
//! media-parameter, broadcast-state, and heartbeat messages.

pub mod host;
pub mod viewer;

pub use host::HostListener;
pub use viewer::{ViewerClient, ViewerStatus};
