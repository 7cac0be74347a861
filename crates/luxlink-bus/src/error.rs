/// Errors that can occur while bringing the scheduler up.
///
/// Runtime bus faults (short writes, driver I/O errors) are counted as
/// stats and never surfaced as errors; only startup can fail.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The transmit thread could not be spawned.
    #[error("failed to spawn transmit thread: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BusError>;
