//! Hardware-paced fixture-bus frame scheduler.
//!
//! Owns double-buffered channel data and the fixed-cadence transmit
//! loop: an unreliable network producer hands frames in through a
//! bounded single-slot hand-off, and the transmit thread puts the most
//! recent frame on the bus once per DMX512 frame period whether or not
//! new data arrived.

pub mod driver;
pub mod error;
pub mod frame;
pub mod scheduler;
pub mod slot;

pub use driver::{BusDriver, LoopbackDriver, LoopbackHandle};
pub use error::{BusError, Result};
pub use frame::{BusFrame, CHANNELS, FRAME_SIZE, START_CODE};
pub use scheduler::{
    FrameScheduler, SchedulerConfig, SchedulerState, SchedulerStats, SubmitOutcome, BREAK_US,
    FRAME_PERIOD, FRAME_PERIOD_US,
};
pub use slot::PendingSlot;
