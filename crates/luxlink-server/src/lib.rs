//! Session and server layer of the lighting controller.
//!
//! A `Server` accepts at most one live client session. Each `Session`
//! runs the handshake (control socket advertises an ephemeral data
//! port), then two independent read loops over the shared message
//! codec, an idle watchdog, and a periodic stats reporter, and feeds
//! decoded fixture frames into its own hardware-paced `FrameScheduler`.

pub mod error;
pub mod head;
pub mod server;
pub mod session;

pub use error::{Result, SessionError};
pub use head::{HeadUnit, TraceHead};
pub use server::{HeadFactory, SchedulerFactory, Server};
pub use session::{Session, SessionConfig};
