//! A two-party local-network screen-sharing transport: a TCP control plane
//! for pairing, heartbeats, and media-parameter exchange, and a UDP media
//! plane for fragmented H.264 access units.
//!
//! The screen capture, H.264 encode/decode, on-device UI, and Bonjour/mDNS
//! bindings are external collaborators; this crate only implements the
//! transport core (wire codecs, fragmentation/reassembly, control and media
//! plane state machines) plus the abstract interfaces those collaborators
//! plug into.

pub mod advertise;
pub mod cancel;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod fabric;
pub mod media;
pub mod media_plane;
pub mod model;
pub mod observable;
pub mod wire;

pub use config::Config;
pub use error::{Result, TransportError};
