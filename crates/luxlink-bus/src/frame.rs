/// DMX512 start code transmitted ahead of the channel bytes.
pub const START_CODE: u8 = 0x00;

/// Channel count of one full universe.
pub const CHANNELS: usize = 512;

/// Wire size of one bus frame: start code + full channel space.
pub const FRAME_SIZE: usize = CHANNELS + 1;

/// One complete fixture-bus frame.
///
/// The bus protocol requires a constant-length universe every cycle, so
/// the buffer is always transmitted in full: head units populate a small
/// number of meaningful channels and the remainder stays zero-filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusFrame {
    bytes: [u8; FRAME_SIZE],
}

impl Default for BusFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl BusFrame {
    /// A zero-filled frame with the start code in place.
    pub fn new() -> Self {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[0] = START_CODE;
        Self { bytes }
    }

    /// Copy channel data into the frame, zero-filling the rest.
    ///
    /// Input beyond [`CHANNELS`] bytes is truncated.
    pub fn load(&mut self, channels: &[u8]) {
        let n = channels.len().min(CHANNELS);
        self.bytes[1..=n].copy_from_slice(&channels[..n]);
        self.bytes[n + 1..].fill(0);
        self.bytes[0] = START_CODE;
    }

    /// The full wire image, start code included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Channel bytes only, start code excluded.
    pub fn channels(&self) -> &[u8] {
        &self.bytes[1..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_frame_is_zeroed_with_start_code() {
        let frame = BusFrame::new();
        assert_eq!(frame.as_bytes().len(), FRAME_SIZE);
        assert_eq!(frame.as_bytes()[0], START_CODE);
        assert!(frame.channels().iter().all(|&b| b == 0));
    }

    #[test]
    fn load_copies_and_zero_fills() {
        let mut frame = BusFrame::new();
        frame.load(&[1, 2, 3]);
        assert_eq!(&frame.channels()[..3], &[1, 2, 3]);
        assert!(frame.channels()[3..].iter().all(|&b| b == 0));

        // Reload with shorter data clears the tail.
        frame.load(&[9]);
        assert_eq!(frame.channels()[0], 9);
        assert!(frame.channels()[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn load_truncates_oversized_input() {
        let mut frame = BusFrame::new();
        frame.load(&[0xAB; CHANNELS + 100]);
        assert!(frame.channels().iter().all(|&b| b == 0xAB));
    }
}
