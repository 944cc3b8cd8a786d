/// Errors raised by descriptors, the codec and the registry.
///
/// Codec errors carry the dotted path of the offending field
/// (`"pose.position[2]"`); the root is the empty path.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A value does not fit the declared bit width.
    #[error("value {value} out of range for {bits}-bit field at '{path}'")]
    ValueOutOfRange {
        path: String,
        value: String,
        bits: u32,
    },

    /// An array length or union tag exceeds what the type allows.
    #[error("{length} exceeds capacity {capacity} at '{path}'")]
    CapacityExceeded {
        path: String,
        length: u64,
        capacity: u64,
    },

    /// The value tree does not have the shape the descriptor expects.
    #[error("expected {expected} at '{path}'")]
    TypeMismatch { path: String, expected: String },

    /// The descriptor itself is malformed.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// No descriptor registered for the port.
    #[error("no descriptor registered for {0}")]
    NoDescriptor(String),

    /// A descriptor file could not be loaded.
    #[error("failed to load descriptor: {0}")]
    LoadFailed(String),

    /// Descriptor JSON could not be parsed.
    #[error("descriptor is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
