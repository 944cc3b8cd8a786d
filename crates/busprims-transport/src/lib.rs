//! Frame model and transport abstraction for the bus.
//!
//! A [`Transport`] moves [`Frame`]s over one physical medium. Three media are
//! provided:
//! - CAN (classic, 29-bit identifiers) over any [`can::CanMedia`] driver, with
//!   an in-memory [`can::VirtualCanBus`] for simulation
//! - Byte-stream serial links (`Read + Write`)
//! - UDP datagrams
//!
//! This is the lowest layer of busprims. Transfer splitting, reassembly and
//! redundancy live in `busprims-frame`.

pub mod can;
pub mod crc;
pub mod error;
pub mod frame;
pub mod serial;
pub mod stats;
pub mod traits;
pub mod types;
pub mod udp;

pub use error::{Result, TransportError};
pub use frame::Frame;
pub use stats::{StatisticsSnapshot, TransportStatistics};
pub use traits::{ProtocolParameters, Transport};
pub use types::{
    DataSpecifier, NodeId, Priority, ServiceRole, TransferIdModulo, SERVICE_ID_MAX,
    SUBJECT_ID_MAX,
};
