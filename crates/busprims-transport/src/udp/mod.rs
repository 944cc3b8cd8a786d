//! Datagram transport: one frame per UDP datagram.

mod header;
mod transport;

pub use header::{DatagramHeader, HEADER_SIZE};
pub use transport::{UdpConfig, UdpTransport};

/// Default frame payload per datagram; fits typical path MTUs without
/// IP fragmentation.
pub const DEFAULT_MTU: usize = 1200;

/// Largest payload a UDP datagram can carry after our header.
pub const MAX_MTU: usize = 65_507 - HEADER_SIZE;

pub const MAX_NODE_ID: crate::types::NodeId = 4095;
