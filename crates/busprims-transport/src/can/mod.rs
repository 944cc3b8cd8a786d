//! Classic CAN with 29-bit extended identifiers.
//!
//! Addressing lives in the identifier, sequencing in a tail byte appended to
//! every frame. The transport runs over any [`CanMedia`] driver.

pub mod id;
pub mod media;
mod transport;

pub use id::{pseudo_node_id, CanId, TailByte, MAX_NODE_ID};
pub use media::{CanFrame, CanMedia, VirtualCanBus, VirtualCanInterface};
pub use transport::CanTransport;

/// Classic CAN data field size.
pub const FRAME_CAPACITY: usize = 8;

/// The tail byte occupies the last byte of every frame.
pub const TAIL_SIZE: usize = 1;
