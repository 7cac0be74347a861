use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::document::{read_entry, write_entry, Message, Value, KEY_MAGIC, KEY_TIMESTAMP, MAGIC};
use crate::error::{CodecError, Result};

/// Length header: payload length, unsigned 16-bit, big-endian. Excludes
/// the 2 header bytes themselves.
pub const HEADER_SIZE: usize = 2;

/// Maximum payload size expressible by the length header.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Capture-time wall clock in microseconds since the Unix epoch.
pub fn wall_clock_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Serialize `msg` into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────────────────────────────────────┐
/// │ Length       │ Document entries in insertion order,      │
/// │ (2B BE)      │ then `now_us` and the `ma` sentinel       │
/// └──────────────┴───────────────────────────────────────────┘
/// ```
/// The `now_us` timestamp is captured here, at serialize time, and the
/// magic sentinel is always the last entry. If the payload would exceed
/// [`MAX_PAYLOAD`], fails with `BufferTooSmall` and emits no bytes.
pub fn encode(msg: &Message, dst: &mut BytesMut) -> Result<()> {
    let mut body = BytesMut::with_capacity(msg.encoded_len() + 32);
    for (key, value) in msg.entries() {
        write_entry(&mut body, key, value)?;
    }
    write_entry(&mut body, KEY_TIMESTAMP, &Value::Int(wall_clock_us()))?;
    write_entry(&mut body, KEY_MAGIC, &Value::Uint(MAGIC as u64))?;

    if body.len() > MAX_PAYLOAD {
        return Err(CodecError::BufferTooSmall {
            size: body.len(),
            max: MAX_PAYLOAD,
        });
    }

    dst.reserve(HEADER_SIZE + body.len());
    dst.put_u16(body.len() as u16);
    dst.put_slice(&body);
    Ok(())
}

/// Parse exactly one payload into `out`.
///
/// Succeeds only if every byte is consumed by well-formed entries and
/// the trailing entry is the magic sentinel. `out` is cleared first, so
/// a failed parse never leaves stale entries behind.
fn parse_payload(payload: &[u8], out: &mut Message) -> Result<()> {
    out.clear();
    let mut src = Bytes::copy_from_slice(payload);
    while src.has_remaining() {
        match read_entry(&mut src) {
            Ok((key, value)) => out.push_owned(key, value),
            Err(err) => {
                out.clear();
                return Err(err);
            }
        }
    }

    match out.entries().last() {
        Some((key, Value::Uint(v))) if key == KEY_MAGIC && *v == MAGIC as u64 => Ok(()),
        _ => {
            out.clear();
            Err(CodecError::Malformed("bad magic sentinel"))
        }
    }
}

enum Phase {
    AwaitingHeader,
    AwaitingBody { len: usize },
}

/// Two-phase message decoder.
///
/// Phase 1 consumes exactly 2 header bytes; phase 2 consumes exactly the
/// declared payload length. [`MessageDecoder::want`] reports the byte
/// count the current phase requires, so the caller issues reads of
/// exactly that size and never over-reads. The two phases are separate
/// suspension points in the calling read loop.
pub struct MessageDecoder {
    phase: Phase,
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingHeader,
        }
    }

    /// Exact number of bytes the next call to [`advance`] requires.
    ///
    /// [`advance`]: MessageDecoder::advance
    pub fn want(&self) -> usize {
        match self.phase {
            Phase::AwaitingHeader => HEADER_SIZE,
            Phase::AwaitingBody { len } => len,
        }
    }

    /// Feed exactly [`want`](MessageDecoder::want) bytes.
    ///
    /// Returns `Ok(false)` after the header phase (the body is still
    /// pending) and `Ok(true)` once a complete, sentinel-valid message
    /// has been decoded into `out`. A `Malformed` body resets the
    /// decoder to the header phase: framing survives, the caller may
    /// discard the message and keep reading.
    pub fn advance(&mut self, chunk: &[u8], out: &mut Message) -> Result<bool> {
        if chunk.len() != self.want() {
            return Err(CodecError::Malformed("phase byte count mismatch"));
        }
        match self.phase {
            Phase::AwaitingHeader => {
                let len = u16::from_be_bytes([chunk[0], chunk[1]]) as usize;
                if len == 0 {
                    return Err(CodecError::Malformed("empty payload"));
                }
                self.phase = Phase::AwaitingBody { len };
                Ok(false)
            }
            Phase::AwaitingBody { .. } => {
                self.phase = Phase::AwaitingHeader;
                parse_payload(chunk, out)?;
                Ok(true)
            }
        }
    }
}

/// Buffered convenience over the two-phase parser.
///
/// Returns `Ok(None)` while `src` does not yet hold a complete message.
/// On success, consumes the message bytes from `src` and fills `out`.
pub fn decode_message(src: &mut BytesMut, out: &mut Message) -> Result<Option<()>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    let len = u16::from_be_bytes([src[0], src[1]]) as usize;
    if src.len() < HEADER_SIZE + len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(len);
    if len == 0 {
        return Err(CodecError::Malformed("empty payload"));
    }
    parse_payload(&payload, out)?;
    Ok(Some(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::KEY_MSG_TYPE;

    fn sample_message() -> Message {
        let mut msg = Message::new("frame");
        msg.push_bytes("dframe", vec![7u8; 64]);
        msg.push_uint("universe", 1);
        msg
    }

    #[test]
    fn encode_decode_roundtrip() {
        let msg = sample_message();
        let mut wire = BytesMut::new();
        encode(&msg, &mut wire).unwrap();

        let mut decoded = Message::empty();
        decode_message(&mut wire, &mut decoded).unwrap().unwrap();

        assert!(wire.is_empty());
        assert_eq!(decoded.msg_type(), Some("frame"));
        assert_eq!(decoded.get("dframe").unwrap().as_bytes().unwrap().len(), 64);
        assert_eq!(decoded.get("universe").unwrap().as_uint(), Some(1));
        assert!(decoded.now_us().is_some());
        assert_eq!(
            decoded.get(KEY_MAGIC).unwrap().as_uint(),
            Some(MAGIC as u64)
        );
    }

    #[test]
    fn msg_type_first_sentinel_last() {
        let msg = sample_message();
        let mut wire = BytesMut::new();
        encode(&msg, &mut wire).unwrap();

        let mut decoded = Message::empty();
        decode_message(&mut wire, &mut decoded).unwrap().unwrap();

        let entries = decoded.entries();
        assert_eq!(entries.first().unwrap().0, KEY_MSG_TYPE);
        assert_eq!(entries.last().unwrap().0, KEY_MAGIC);
    }

    #[test]
    fn under_read_never_completes() {
        let msg = sample_message();
        let mut full = BytesMut::new();
        encode(&msg, &mut full).unwrap();

        // Every strict prefix must report "not yet", never success.
        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            let mut out = Message::empty();
            assert!(decode_message(&mut partial, &mut out).unwrap().is_none());
        }
    }

    #[test]
    fn bad_sentinel_is_malformed() {
        let msg = sample_message();
        let mut wire = BytesMut::new();
        encode(&msg, &mut wire).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;

        let mut out = Message::empty();
        let err = decode_message(&mut wire, &mut out).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
        assert!(out.entries().is_empty());
    }

    #[test]
    fn oversized_payload_emits_nothing() {
        let mut msg = Message::new("frame");
        msg.push_bytes("a", vec![0u8; 40_000]);
        msg.push_bytes("b", vec![0u8; 40_000]);

        let mut wire = BytesMut::new();
        let err = encode(&msg, &mut wire).unwrap_err();
        assert!(matches!(err, CodecError::BufferTooSmall { .. }));
        assert!(wire.is_empty());
    }

    #[test]
    fn decoder_two_phase_exact_counts() {
        let msg = sample_message();
        let mut wire = BytesMut::new();
        encode(&msg, &mut wire).unwrap();

        let mut decoder = MessageDecoder::new();
        assert_eq!(decoder.want(), HEADER_SIZE);

        let header = wire.split_to(HEADER_SIZE);
        let mut out = Message::empty();
        assert!(!decoder.advance(&header, &mut out).unwrap());

        let body_len = decoder.want();
        assert_eq!(body_len, wire.len());
        assert!(decoder.advance(&wire, &mut out).unwrap());
        assert_eq!(out.msg_type(), Some("frame"));
        assert_eq!(decoder.want(), HEADER_SIZE);
    }

    #[test]
    fn decoder_rejects_wrong_chunk_size() {
        let mut decoder = MessageDecoder::new();
        let mut out = Message::empty();
        let err = decoder.advance(&[0u8; 3], &mut out).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn decoder_recovers_after_malformed_body() {
        let msg = sample_message();
        let mut wire = BytesMut::new();
        encode(&msg, &mut wire).unwrap();

        let mut corrupted = wire.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let mut decoder = MessageDecoder::new();
        let mut out = Message::empty();

        let header = corrupted.split_to(HEADER_SIZE);
        decoder.advance(&header, &mut out).unwrap();
        assert!(decoder.advance(&corrupted, &mut out).is_err());

        // Framing survives: the next well-formed message decodes.
        let header = wire.split_to(HEADER_SIZE);
        decoder.advance(&header, &mut out).unwrap();
        assert!(decoder.advance(&wire, &mut out).unwrap());
        assert_eq!(out.msg_type(), Some("frame"));
    }

    #[test]
    fn zero_length_payload_is_malformed() {
        let mut decoder = MessageDecoder::new();
        let mut out = Message::empty();
        let err = decoder.advance(&[0, 0], &mut out).unwrap_err();
        assert!(matches!(err, CodecError::Malformed("empty payload")));
    }

    #[test]
    fn multiple_messages_in_stream() {
        let mut wire = BytesMut::new();
        encode(&Message::new("hello"), &mut wire).unwrap();
        encode(&Message::new("stats_req"), &mut wire).unwrap();

        let mut out = Message::empty();
        decode_message(&mut wire, &mut out).unwrap().unwrap();
        assert_eq!(out.msg_type(), Some("hello"));

        decode_message(&mut wire, &mut out).unwrap().unwrap();
        assert_eq!(out.msg_type(), Some("stats_req"));
        assert!(wire.is_empty());
    }
}
