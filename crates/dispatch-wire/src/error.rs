//! # Codec Errors
//!
//! Failures turning a [`Frame`](crate::Frame) into bytes or back.
//! These never cross the wire; a context that cannot decode a frame logs and drops it.

/// Operational failures within the codec itself.
#[derive(Debug, Clone)]
pub enum Error {
    /// The frame could not be serialized (e.g., a map with non-string keys).
    Encode(String),
    /// The bytes were not a well-formed frame.
    Malformed(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(msg) => write!(f, "Failed to encode frame: {}", msg),
            Self::Malformed(msg) => write!(f, "Malformed frame: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;
