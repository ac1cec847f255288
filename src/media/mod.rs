//! The media datagram engine (§3, §4.2, C2): fragmentation on the send side,
//! reassembly, pruning, and loss accounting on the receive side.

pub mod fragment;
pub mod reassembly;

pub use fragment::fragment_access_unit;
pub use reassembly::{Assembler, Unit, DEFAULT_MAX_AGE};
