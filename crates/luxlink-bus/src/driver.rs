use std::io;
use std::sync::{Arc, Mutex, PoisonError};

/// Capability interface over the serial fixture-bus peripheral.
///
/// The bring-up of the real UART/timer peripheral lives outside this
/// crate; the scheduler only needs a break pulse and a bulk write.
/// `write_frame` returns the number of bytes the hardware actually
/// accepted; short writes are counted by the scheduler, never fatal.
pub trait BusDriver: Send {
    /// Issue the physical-layer break pulse preceding a frame.
    fn send_break(&mut self) -> io::Result<()>;

    /// Transmit a full frame image; returns bytes written.
    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<usize>;
}

#[derive(Debug, Default)]
struct LoopbackState {
    breaks: u64,
    frames: u64,
    last_frame: Vec<u8>,
}

/// Shared view into a [`LoopbackDriver`]'s transmit history.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHandle {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackHandle {
    /// Number of frames transmitted so far.
    pub fn frames(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frames
    }

    /// Number of break pulses issued so far.
    pub fn breaks(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .breaks
    }

    /// Copy of the most recently transmitted frame image.
    pub fn last_frame(&self) -> Vec<u8> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_frame
            .clone()
    }
}

/// In-memory bus driver for tests and the demo daemon.
#[derive(Debug, Default)]
pub struct LoopbackDriver {
    handle: LoopbackHandle,
}

impl LoopbackDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observation handle, cloneable across threads.
    pub fn handle(&self) -> LoopbackHandle {
        self.handle.clone()
    }
}

impl BusDriver for LoopbackDriver {
    fn send_break(&mut self) -> io::Result<()> {
        self.handle
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .breaks += 1;
        Ok(())
    }

    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut state = self
            .handle
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.frames += 1;
        state.last_frame.clear();
        state.last_frame.extend_from_slice(bytes);
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BusFrame;

    #[test]
    fn loopback_records_transmissions() {
        let mut driver = LoopbackDriver::new();
        let handle = driver.handle();

        let mut frame = BusFrame::new();
        frame.load(&[10, 20]);

        driver.send_break().unwrap();
        let n = driver.write_frame(frame.as_bytes()).unwrap();

        assert_eq!(n, frame.as_bytes().len());
        assert_eq!(handle.breaks(), 1);
        assert_eq!(handle.frames(), 1);
        assert_eq!(handle.last_frame(), frame.as_bytes());
    }
}
