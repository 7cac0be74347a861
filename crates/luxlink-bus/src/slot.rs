use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::frame::BusFrame;

/// Single-slot hand-off buffer between the network producer and the
/// transmit loop.
///
/// Models the two-bit notification protocol of the original hardware
/// path as a 1-deep SPSC channel: the occupied `Option` is the
/// "data ready" flag, the condvar signals "slot free". First writer
/// wins; a second writer within the same slot-cycle waits out its
/// bounded timeout and is rejected, never merged.
#[derive(Debug, Default)]
pub struct PendingSlot {
    pending: Mutex<Option<BusFrame>>,
    slot_free: Condvar,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer side. Waits up to `timeout` for the slot to free, then
    /// places `frame` and raises data-ready. Returns `false` if the
    /// timeout elapsed with the slot still occupied; never blocks
    /// longer than `timeout`.
    pub fn offer(&self, frame: &BusFrame, timeout: Duration) -> bool {
        let guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut guard, result) = self
            .slot_free
            .wait_timeout_while(guard, timeout, |slot| slot.is_some())
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && guard.is_some() {
            return false;
        }
        *guard = Some(frame.clone());
        true
    }

    /// Consumer side. Empties the slot and raises slot-free. Never
    /// blocks: the transmit loop is paced by its own trigger, not by
    /// data arrival.
    pub fn take(&self) -> Option<BusFrame> {
        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let frame = guard.take();
        if frame.is_some() {
            self.slot_free.notify_one();
        }
        frame
    }

    /// Whether data is currently pending.
    pub fn is_ready(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    const SHORT: Duration = Duration::from_millis(2);

    #[test]
    fn offer_then_take() {
        let slot = PendingSlot::new();
        let mut frame = BusFrame::new();
        frame.load(&[1, 2, 3]);

        assert!(slot.offer(&frame, SHORT));
        assert!(slot.is_ready());
        assert_eq!(slot.take(), Some(frame));
        assert!(slot.take().is_none());
    }

    #[test]
    fn second_offer_within_slot_cycle_rejected() {
        let slot = PendingSlot::new();
        let frame = BusFrame::new();

        assert!(slot.offer(&frame, SHORT));
        assert!(!slot.offer(&frame, SHORT));

        // First writer wins: the original frame is still the one pending.
        assert!(slot.take().is_some());
    }

    #[test]
    fn offer_unblocks_when_consumer_takes() {
        let slot = Arc::new(PendingSlot::new());
        let frame = BusFrame::new();
        assert!(slot.offer(&frame, SHORT));

        let consumer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                slot.take()
            })
        };

        // Generous timeout; the consumer frees the slot mid-wait.
        assert!(slot.offer(&frame, Duration::from_secs(2)));
        assert!(consumer.join().unwrap().is_some());
    }
}
