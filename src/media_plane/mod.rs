//! The media plane (§4.4): an ephemeral UDP channel with host-side peer
//! latching and viewer-side keep-alive.

pub mod host;
pub mod viewer;

pub use host::MediaHost;
pub use viewer::MediaViewerClient;
