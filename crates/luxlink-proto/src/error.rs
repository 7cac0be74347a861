/// Errors that can occur during message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The serialized payload would exceed the output buffer limit.
    /// No bytes are emitted when this is returned.
    #[error("buffer too small for payload ({size} bytes, max {max})")]
    BufferTooSmall { size: usize, max: usize },

    /// The payload did not parse as a complete document with a valid
    /// magic sentinel.
    #[error("malformed message: {0}")]
    Malformed(&'static str),

    /// An I/O error occurred while reading or writing messages.
    #[error("codec I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete message was received.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, CodecError>;
