use std::time::Duration;

use busprims_transport::TransportError;

/// Errors raised while turning frames into transfers and back.
///
/// Reassembly errors describe why a frame or a partial transfer was dropped;
/// the receive path logs and counts them instead of propagating them.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Frame index, toggle or transfer-ID broke the expected sequence.
    #[error("sequence violation: {0}")]
    SequenceViolation(&'static str),

    /// A multi-frame transfer failed its CRC check.
    #[error("transfer CRC mismatch")]
    CrcMismatch,

    /// Partial transfer was not completed in time.
    #[error("reassembly timed out after {0:?}")]
    TimedOut(Duration),

    /// Anonymous sources may only emit single-frame transfers.
    #[error("anonymous transfers must fit in a single frame")]
    AnonymousMultiFrame,

    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, FrameError>;
