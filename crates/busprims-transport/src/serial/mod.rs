//! Byte-stream serial transport.
//!
//! Frames are delimited by [`FRAME_DELIMITER`]; delimiter and escape bytes
//! inside a frame are escaped with [`ESCAPE_PREFIX`] followed by the byte
//! XOR 0xFF. Bytes outside frames are reported as out-of-band data.

#[cfg(feature = "async")]
mod codec;
mod frame;
mod parser;
mod port;
mod transport;

#[cfg(feature = "async")]
pub use codec::SerialCodec;
pub use frame::{encode_frame, parse_unescaped_image, HEADER_SIZE, INDEX_MASK, MAX_NODE_ID, OVERHEAD};
pub use parser::{ParsedItem, StreamParser};
pub use port::SerialPort;
pub use transport::{SerialConfig, SerialTransport};

pub const FRAME_DELIMITER: u8 = 0x9E;
pub const ESCAPE_PREFIX: u8 = 0x8E;

/// Accepted MTU range. The upper bound is also the receive limit.
pub const MTU_RANGE: std::ops::RangeInclusive<usize> = 1024..=1024 * 1024 * 1024;

/// Accepted range for the service transfer multiplier.
pub const SERVICE_TRANSFER_MULTIPLIER_RANGE: std::ops::RangeInclusive<usize> = 1..=5;
