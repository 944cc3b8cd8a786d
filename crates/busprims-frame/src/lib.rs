//! Transfer layer of busprims.
//!
//! Turns transfers into frames and back:
//! - [`split_transfer`] cuts a payload into frames sized for one medium,
//!   appending a CRC-16 when more than one frame is needed
//! - [`Reassembler`] rebuilds transfers from frames, enforcing index, toggle
//!   and transfer-ID sequencing with a timeout
//! - [`RedundantTransport`] drives several transports as one link and
//!   suppresses the duplicate copies that arrive over each of them

pub mod config;
mod dedup;
pub mod error;
pub mod reassembler;
pub mod redundant;
pub mod splitter;
pub mod transfer;

pub use config::{ReassemblyConfig, RedundancyConfig};
pub use error::{FrameError, Result};
pub use reassembler::{ReassemblyStatistics, Reassembler};
pub use redundant::{InterfaceStatistics, RedundantTransport};
pub use splitter::{split_transfer, TRANSFER_CRC_SIZE};
pub use transfer::{SessionKey, Transfer};
