use std::time::Duration;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No response arrived before the deadline.
    #[error("request timed out after {0:?}")]
    RequestTimedOut(Duration),

    /// The session or node was closed while the operation was waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// The session has been closed.
    #[error("session closed")]
    Closed,

    /// An earlier call to the same server still waits on this transfer-ID.
    #[error("transfer-ID {transfer_id} to node {server} is still awaiting a response")]
    TransferIdInUse {
        server: busprims_transport::NodeId,
        transfer_id: u64,
    },

    /// Another session of the same kind already holds the port.
    #[error("{0} is already in use")]
    PortInUse(String),

    /// The operation needs a local node-ID.
    #[error("operation requires a local node-ID")]
    AnonymousNode,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] busprims_transport::TransportError),

    /// Transfer-level error.
    #[error("frame error: {0}")]
    Frame(#[from] busprims_frame::FrameError),

    /// Serialization error.
    #[error("schema error: {0}")]
    Schema(#[from] busprims_schema::SchemaError),

    /// Invalid node configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON configuration could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking task could not be joined.
    #[cfg(feature = "async")]
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
