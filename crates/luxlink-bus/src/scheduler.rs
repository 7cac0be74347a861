use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::driver::BusDriver;
use crate::error::{BusError, Result};
use crate::frame::{BusFrame, CHANNELS};
use crate::slot::PendingSlot;

/// Mark-after-break, per the DMX512 physical layer.
pub const MARK_AFTER_BREAK_US: u64 = 12;

/// Time for one byte (slot) on the bus at 250 kbaud.
pub const SLOT_US: u64 = 44;

/// Minimum mark time between frames.
pub const MIN_INTERFRAME_US: u64 = 44;

/// One frame period: mark-after-break + start code + 512 channel slots
/// + minimum time between frames = 22 628 µs (≈44.2 Hz).
pub const FRAME_PERIOD_US: u64 =
    MARK_AFTER_BREAK_US + SLOT_US + CHANNELS as u64 * SLOT_US + MIN_INTERFRAME_US;

/// Break pulse width issued by the driver ahead of each frame. Excluded
/// from the frame period.
pub const BREAK_US: u64 = 92;

/// One frame period as a [`Duration`].
pub const FRAME_PERIOD: Duration = Duration::from_micros(FRAME_PERIOD_US);

/// Scheduler lifecycle. Transitions never skip `Stopping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Terminated = 3,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SchedulerState::Running,
            2 => SchedulerState::Stopping,
            3 => SchedulerState::Terminated,
            _ => SchedulerState::Idle,
        }
    }
}

/// Outcome of a [`FrameScheduler::submit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The frame was handed to the pending slot.
    Accepted,
    /// The slot stayed occupied for the whole bounded wait; the frame
    /// was dropped and counted. Not an error: the real-time path must
    /// never be penalized by a fast producer.
    Dropped,
}

#[derive(Debug, Default)]
struct Counters {
    qok: AtomicU64,
    qrf: AtomicU64,
    qsf: AtomicU64,
    drops: AtomicU64,
    frames_tx: AtomicU64,
}

/// Snapshot of the scheduler's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Ticks that consumed freshly submitted data.
    pub qok: u64,
    /// Ticks that retransmitted the stale active buffer.
    pub qrf: u64,
    /// Short writes and driver faults.
    pub qsf: u64,
    /// Frames dropped by `submit` backpressure.
    pub drops: u64,
    /// Total bus transmissions.
    pub frames_tx: u64,
    /// Time since the scheduler started.
    pub elapsed: Duration,
}

/// Scheduler construction parameters. Defaults follow the DMX512
/// timing constants; tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Interval between transmit triggers.
    pub frame_period: Duration,
    /// Bound on the producer-side `submit` wait: 10% of one period.
    pub submit_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_period: FRAME_PERIOD,
            submit_timeout: Duration::from_micros(FRAME_PERIOD_US / 10),
        }
    }
}

/// Owns the active transmit buffer. Only the transmit loop touches it;
/// producers reach it solely through the pending-slot swap.
struct Transmitter {
    active: BusFrame,
    slot: Arc<PendingSlot>,
    counters: Arc<Counters>,
    driver: Box<dyn BusDriver>,
}

impl Transmitter {
    /// One trigger: swap in pending data if any, then transmit the
    /// active buffer. Runs to completion without blocking.
    fn tick(&mut self) {
        match self.slot.take() {
            Some(fresh) => {
                self.active = fresh;
                self.counters.qok.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.counters.qrf.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Err(err) = self.driver.send_break() {
            warn!(error = %err, "bus break failed");
            self.counters.qsf.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let wire = self.active.as_bytes();
        match self.driver.write_frame(wire) {
            Ok(n) => {
                self.counters.frames_tx.fetch_add(1, Ordering::Relaxed);
                if n < wire.len() {
                    warn!(wrote = n, expected = wire.len(), "bus short write");
                    self.counters.qsf.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                warn!(error = %err, "bus write failed");
                self.counters.qsf.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Double-buffered frame scheduler.
///
/// Accepts frame data at arbitrary times via [`submit`] and retransmits
/// the most recent frame over the fixture bus once per period,
/// independent of how often new data arrives. The transmit loop runs on
/// its own thread (the host stand-in for the elevated-priority task);
/// the pending slot is the only state both domains touch.
///
/// [`submit`]: FrameScheduler::submit
pub struct FrameScheduler {
    slot: Arc<PendingSlot>,
    counters: Arc<Counters>,
    state: Arc<AtomicU8>,
    shutdown: Sender<()>,
    stopped: AtomicBool,
    worker: Option<JoinHandle<()>>,
    submit_timeout: Duration,
    started: Instant,
}

impl FrameScheduler {
    /// Spawn the transmit loop over `driver`. Startup failure is fatal
    /// to the caller; there is no degraded mode.
    pub fn start(driver: Box<dyn BusDriver>, config: SchedulerConfig) -> Result<Self> {
        let slot = Arc::new(PendingSlot::new());
        let counters = Arc::new(Counters::default());
        let state = Arc::new(AtomicU8::new(SchedulerState::Idle as u8));
        let (shutdown, trigger_rx) = mpsc::channel::<()>();

        let mut transmitter = Transmitter {
            active: BusFrame::new(),
            slot: Arc::clone(&slot),
            counters: Arc::clone(&counters),
            driver,
        };
        let period = config.frame_period;
        let loop_state = Arc::clone(&state);

        let worker = std::thread::Builder::new()
            .name("luxlink-bus".to_string())
            .spawn(move || {
                loop_state.store(SchedulerState::Running as u8, Ordering::SeqCst);
                let mut next = Instant::now() + period;
                loop {
                    let wait = next.saturating_duration_since(Instant::now());
                    match trigger_rx.recv_timeout(wait) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            transmitter.tick();
                            next += period;
                            let now = Instant::now();
                            if next < now {
                                // Fell behind a full period; resync
                                // rather than burst catch-up ticks.
                                next = now + period;
                            }
                        }
                    }
                }
                loop_state.store(SchedulerState::Stopping as u8, Ordering::SeqCst);
                loop_state.store(SchedulerState::Terminated as u8, Ordering::SeqCst);
            })
            .map_err(|source| BusError::Spawn { source })?;

        Ok(Self {
            slot,
            counters,
            state,
            shutdown,
            stopped: AtomicBool::new(false),
            worker: Some(worker),
            submit_timeout: config.submit_timeout,
            started: Instant::now(),
        })
    }

    /// Producer call: hand channel data to the transmit loop.
    ///
    /// Copies `channels` into the pending slot if it frees up within
    /// the bounded timeout; otherwise drops the frame, counts it, and
    /// returns. Never blocks longer than 10% of one frame period.
    pub fn submit(&self, channels: &[u8]) -> SubmitOutcome {
        let mut frame = BusFrame::new();
        frame.load(channels);
        if self.slot.offer(&frame, self.submit_timeout) {
            SubmitOutcome::Accepted
        } else {
            self.counters.drops.fetch_add(1, Ordering::Relaxed);
            SubmitOutcome::Dropped
        }
    }

    /// Raise shutdown exactly once; idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown.send(());
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            qok: self.counters.qok.load(Ordering::Relaxed),
            qrf: self.counters.qrf.load(Ordering::Relaxed),
            qsf: self.counters.qsf.load(Ordering::Relaxed),
            drops: self.counters.drops.load(Ordering::Relaxed),
            frames_tx: self.counters.frames_tx.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::driver::{LoopbackDriver, LoopbackHandle};
    use crate::frame::FRAME_SIZE;

    fn test_transmitter(driver: Box<dyn BusDriver>) -> (Transmitter, Arc<PendingSlot>, Arc<Counters>) {
        let slot = Arc::new(PendingSlot::new());
        let counters = Arc::new(Counters::default());
        let transmitter = Transmitter {
            active: BusFrame::new(),
            slot: Arc::clone(&slot),
            counters: Arc::clone(&counters),
            driver,
        };
        (transmitter, slot, counters)
    }

    fn quick_config() -> SchedulerConfig {
        SchedulerConfig {
            frame_period: Duration::from_millis(5),
            submit_timeout: Duration::from_millis(2),
        }
    }

    #[test]
    fn timing_constants_match_physical_layer() {
        assert_eq!(FRAME_PERIOD_US, 22_628);
    }

    #[test]
    fn n_ticks_produce_n_transmissions() {
        let driver = LoopbackDriver::new();
        let handle = driver.handle();
        let (mut tx, _slot, counters) = test_transmitter(Box::new(driver));

        for _ in 0..5 {
            tx.tick();
        }

        assert_eq!(handle.frames(), 5);
        assert_eq!(handle.breaks(), 5);
        assert_eq!(counters.qrf.load(Ordering::Relaxed), 5);
        assert_eq!(counters.qok.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn tick_consumes_pending_then_retransmits_stale() {
        let driver = LoopbackDriver::new();
        let handle = driver.handle();
        let (mut tx, slot, counters) = test_transmitter(Box::new(driver));

        let mut frame = BusFrame::new();
        frame.load(&[1, 2, 3]);
        assert!(slot.offer(&frame, Duration::from_millis(1)));

        tx.tick();
        assert_eq!(counters.qok.load(Ordering::Relaxed), 1);
        assert_eq!(handle.last_frame(), frame.as_bytes());

        // No new submit: stale buffer goes out again.
        tx.tick();
        assert_eq!(counters.qrf.load(Ordering::Relaxed), 1);
        assert_eq!(handle.last_frame(), frame.as_bytes());
        assert_eq!(handle.frames(), 2);
    }

    #[test]
    fn short_write_is_counted_not_fatal() {
        struct ShortDriver;
        impl BusDriver for ShortDriver {
            fn send_break(&mut self) -> io::Result<()> {
                Ok(())
            }
            fn write_frame(&mut self, bytes: &[u8]) -> io::Result<usize> {
                Ok(bytes.len() - 7)
            }
        }

        let (mut tx, _slot, counters) = test_transmitter(Box::new(ShortDriver));
        tx.tick();
        tx.tick();

        assert_eq!(counters.qsf.load(Ordering::Relaxed), 2);
        assert_eq!(counters.frames_tx.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn backpressure_second_submit_drops() {
        // Period far in the future: no tick intervenes between submits.
        let config = SchedulerConfig {
            frame_period: Duration::from_secs(60),
            submit_timeout: Duration::from_millis(2),
        };
        let scheduler = FrameScheduler::start(Box::new(LoopbackDriver::new()), config).unwrap();

        assert_eq!(scheduler.submit(&[1; 64]), SubmitOutcome::Accepted);
        assert_eq!(scheduler.submit(&[2; 64]), SubmitOutcome::Dropped);

        let stats = scheduler.stats();
        assert_eq!(stats.drops, 1);
        scheduler.stop();
    }

    #[test]
    fn running_scheduler_paces_the_bus() {
        let driver = LoopbackDriver::new();
        let handle = driver.handle();
        let scheduler = FrameScheduler::start(Box::new(driver), quick_config()).unwrap();

        std::thread::sleep(Duration::from_millis(60));
        assert!(handle.frames() >= 4, "frames={}", handle.frames());

        scheduler.stop();
        wait_terminated(&scheduler, &handle);
    }

    #[test]
    fn submitted_frame_transmits_on_next_tick() {
        let driver = LoopbackDriver::new();
        let handle = driver.handle();
        let scheduler = FrameScheduler::start(Box::new(driver), quick_config()).unwrap();

        assert_eq!(scheduler.submit(&[0xCC; 64]), SubmitOutcome::Accepted);

        let deadline = Instant::now() + Duration::from_secs(2);
        while scheduler.stats().qok == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }

        assert_eq!(scheduler.stats().qok, 1);
        assert_eq!(&handle.last_frame()[1..65], &[0xCC; 64]);
        assert_eq!(handle.last_frame().len(), FRAME_SIZE);
        scheduler.stop();
    }

    #[test]
    fn stop_is_idempotent_and_terminates() {
        let driver = LoopbackDriver::new();
        let handle = driver.handle();
        let scheduler = FrameScheduler::start(Box::new(driver), quick_config()).unwrap();

        scheduler.stop();
        scheduler.stop();
        wait_terminated(&scheduler, &handle);

        let settled = handle.frames();
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(handle.frames(), settled, "ticks after shutdown");
    }

    fn wait_terminated(scheduler: &FrameScheduler, _handle: &LoopbackHandle) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while scheduler.state() != SchedulerState::Terminated && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(scheduler.state(), SchedulerState::Terminated);
    }
}
