//! Length-prefixed, sentinel-terminated binary message codec.
//!
//! Every message on both luxlink channels is framed with:
//! - A 2-byte big-endian payload length
//! - An ordered binary document (`mt` first, `now_us` at serialize time,
//!   the `ma` magic sentinel last)
//!
//! The sentinel is the only completeness proof the wire format carries:
//! a message counts as decoded only when exactly the declared number of
//! payload bytes parsed cleanly and the trailer matched. No partial
//! message is ever surfaced to callers.

pub mod codec;
pub mod document;
pub mod error;

pub use codec::{
    decode_message, encode, wall_clock_us, MessageDecoder, HEADER_SIZE, MAX_PAYLOAD,
};
pub use document::{Message, Value, KEY_MAGIC, KEY_MSG_TYPE, KEY_TIMESTAMP, MAGIC};
pub use error::{CodecError, Result};

/// Message type: session handshake, advertises the data-channel port.
pub const MSG_HELLO: &str = "hello";
/// Message type: data-channel fixture frame plus head-unit commands.
pub const MSG_FRAME: &str = "frame";
/// Message type: data-channel acknowledgement with round-trip latency.
pub const MSG_ACK: &str = "ack";
/// Message type: control-channel request for a stats snapshot.
pub const MSG_STATS_REQUEST: &str = "stats_req";
/// Message type: control-channel stats snapshot.
pub const MSG_STATS: &str = "stats";
/// Message type: control-channel session shutdown request.
pub const MSG_SHUTDOWN: &str = "shutdown";

/// Document key: fixture frame channel bytes on the data channel.
pub const KEY_DFRAME: &str = "dframe";
/// Document key: data-channel port advertised in the handshake.
pub const KEY_DATA_PORT: &str = "data_port";
/// Document key: round-trip latency carried in data-channel replies.
pub const KEY_RTT_US: &str = "rtt_us";
