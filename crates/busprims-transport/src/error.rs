/// Errors that can occur in bus transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The medium is down or could not accept the frame before the deadline.
    #[error("media unavailable: {0}")]
    MediaUnavailable(String),

    /// Frame payload does not fit the medium's frame capacity.
    #[error("frame payload too large: {size} bytes (capacity {max})")]
    CapacityExceeded { size: usize, max: usize },

    /// The frame cannot be represented on this medium.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Transport construction parameters are out of range.
    #[error("invalid transport configuration: {0}")]
    InvalidConfiguration(String),

    /// An I/O error occurred while setting up the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
