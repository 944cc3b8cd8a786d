//! Publish/subscribe and request/response over redundant bus links.
//!
//! busprims moves structured messages between nodes over CAN, byte-stream
//! serial and UDP media. A transfer sent by a node is split into frames,
//! emitted on every attached interface and reassembled and deduplicated on
//! the receiving side.
//!
//! # Crate Structure
//!
//! - [`transport`]: frame model and the CAN, serial and UDP transports
//! - [`frame`]: transfer splitting, reassembly and redundant aggregation
//! - [`schema`]: type descriptors and the bit-packed codec (behind `schema`)
//! - [`session`]: nodes, publishers, subscribers and services (behind `session`)

/// Re-export transport types.
pub mod transport {
    pub use busprims_transport::*;
}

/// Re-export transfer-layer types.
pub mod frame {
    pub use busprims_frame::*;
}

/// Re-export schema types (requires `schema` feature).
#[cfg(feature = "schema")]
pub mod schema {
    pub use busprims_schema::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use busprims_session::*;
}
