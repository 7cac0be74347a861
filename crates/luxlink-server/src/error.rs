use std::time::Duration;

/// Errors that end a session.
///
/// A `Malformed` payload in steady state is handled in place (logged
/// and discarded) and never reaches this type; only faults that force
/// the session into `Closing` do.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Codec-level error on either channel.
    #[error("codec error: {0}")]
    Codec(#[from] luxlink_proto::CodecError),

    /// Socket-level error on either channel, the data-connect accept
    /// included.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded handshake step timed out.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, SessionError>;
