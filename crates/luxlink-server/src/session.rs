use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use luxlink_bus::{FrameScheduler, SubmitOutcome};
use luxlink_proto::{
    encode, wall_clock_us, CodecError, Message, MessageDecoder, KEY_DATA_PORT, KEY_DFRAME,
    KEY_RTT_US, MSG_ACK, MSG_FRAME, MSG_HELLO, MSG_SHUTDOWN, MSG_STATS, MSG_STATS_REQUEST,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, SessionError};
use crate::head::HeadUnit;

/// Per-session durations. Owned by the daemon's config loader.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Data-channel silence after which the session tears down.
    pub idle_shutdown: Duration,
    /// Interval between proactive stats reports on the control channel.
    pub stats_interval: Duration,
    /// Bound on waiting for the remote to connect the data channel.
    pub handshake_timeout: Duration,
    /// Delay before releasing resources, so in-flight writes flush.
    pub close_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_shutdown: Duration::from_secs(15),
            stats_interval: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(5),
            close_grace: Duration::from_millis(250),
        }
    }
}

/// Why an active session left its steady state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Idle,
    RemoteShutdown,
    ControlClosed,
    DataClosed,
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Idle => "idle watchdog fired",
            CloseReason::RemoteShutdown => "remote shutdown request",
            CloseReason::ControlClosed => "control channel closed",
            CloseReason::DataClosed => "data channel closed",
            CloseReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default, Clone)]
struct SharedCounters {
    frames_seen: Arc<AtomicU64>,
    bytes_in: Arc<AtomicU64>,
    bytes_out: Arc<AtomicU64>,
}

/// One client session: control socket, data socket, idle watchdog,
/// stats timer, and sole ownership of the frame scheduler feeding the
/// bus.
///
/// State machine: `Connected → Handshaking → Active → Closing → Closed`.
/// The session is the only producer calling into the scheduler; the
/// bounded `submit` hand-off is the single blocking call crossing into
/// the real-time domain.
pub struct Session {
    control: TcpStream,
    config: SessionConfig,
    scheduler: FrameScheduler,
    heads: Vec<Box<dyn HeadUnit>>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        control: TcpStream,
        config: SessionConfig,
        scheduler: FrameScheduler,
        heads: Vec<Box<dyn HeadUnit>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            control,
            config,
            scheduler,
            heads,
            cancel,
        }
    }

    /// Drive the session to completion.
    ///
    /// All faults funnel into the same `Closing` path: cancel
    /// outstanding work, stop the scheduler exactly once, hold the
    /// grace delay, release.
    pub async fn run(self) {
        let Session {
            control,
            config,
            scheduler,
            mut heads,
            cancel,
        } = self;
        let peer = control.peer_addr().ok();
        info!(?peer, "session connected");

        match drive(control, &config, &scheduler, &mut heads, &cancel).await {
            Ok(reason) => info!(?peer, %reason, "session closing"),
            Err(err) => warn!(?peer, error = %err, "session closing on error"),
        }

        cancel.cancel();
        scheduler.stop();
        sleep(config.close_grace).await;
        debug!(?peer, "session closed");
    }
}

/// Handshake then steady state. Returns how the steady state ended.
async fn drive(
    control: TcpStream,
    config: &SessionConfig,
    scheduler: &FrameScheduler,
    heads: &mut Vec<Box<dyn HeadUnit>>,
    cancel: &CancellationToken,
) -> Result<CloseReason> {
    let counters = SharedCounters::default();

    // Connected → Handshaking: open a second acceptor for the data
    // channel and advertise its ephemeral port on the control socket.
    let local_ip = control.local_addr()?.ip();
    let data_listener = TcpListener::bind(SocketAddr::new(local_ip, 0)).await?;
    let data_port = data_listener.local_addr()?.port();

    let (ctrl_read, mut ctrl_write) = control.into_split();

    let mut hello = Message::new(MSG_HELLO);
    hello.push_uint(KEY_DATA_PORT, data_port as u64);
    write_message(&mut ctrl_write, &hello, &counters.bytes_out).await?;
    debug!(data_port, "handshake sent, awaiting data connect");

    let (data_sock, data_peer) = timeout(config.handshake_timeout, data_listener.accept())
        .await
        .map_err(|_| SessionError::Timeout(config.handshake_timeout))?
        .map_err(SessionError::Io)?;
    drop(data_listener);

    // Handshaking → Active.
    info!(%data_peer, "data channel connected");
    let (data_read, mut data_write) = data_sock.into_split();

    let mut ctrl_rx = spawn_reader("control", ctrl_read, counters.bytes_in.clone());
    let mut data_rx = spawn_reader("data", data_read, counters.bytes_in.clone());

    let session_start = Instant::now();
    let mut stats = StatsTracker::new(scheduler);
    let mut stats_timer = interval_at(
        Instant::now() + config.stats_interval,
        config.stats_interval,
    );
    stats_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let idle = sleep(config.idle_shutdown);
    tokio::pin!(idle);

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break CloseReason::Cancelled,

            msg = ctrl_rx.recv() => match msg {
                None => break CloseReason::ControlClosed,
                Some(msg) => match msg.msg_type() {
                    Some(MSG_STATS_REQUEST) => {
                        let report = stats.snapshot(scheduler, &counters, session_start);
                        write_message(&mut ctrl_write, &report, &counters.bytes_out).await?;
                    }
                    Some(MSG_SHUTDOWN) => break CloseReason::RemoteShutdown,
                    other => debug!(msg_type = ?other, "ignoring control message"),
                },
            },

            msg = data_rx.recv() => match msg {
                None => break CloseReason::DataClosed,
                Some(msg) => {
                    // Every data-loop iteration re-arms the watchdog.
                    idle.as_mut().reset(Instant::now() + config.idle_shutdown);
                    if msg.msg_type() == Some(MSG_FRAME) {
                        handle_frame(&msg, scheduler, heads, &counters);
                        // Frames without a capture timestamp still get
                        // acked, just with no latency figure.
                        let mut ack = Message::new(MSG_ACK);
                        if let Some(sent_us) = msg.now_us() {
                            let rtt = (wall_clock_us() - sent_us).max(0);
                            ack.push_uint(KEY_RTT_US, rtt as u64);
                        }
                        write_message(&mut data_write, &ack, &counters.bytes_out).await?;
                    } else {
                        debug!(msg_type = ?msg.msg_type(), "unexpected data message type");
                    }
                },
            },

            _ = stats_timer.tick() => {
                let report = stats.snapshot(scheduler, &counters, session_start);
                write_message(&mut ctrl_write, &report, &counters.bytes_out).await?;
            },

            () = &mut idle => break CloseReason::Idle,
        }
    };

    // Active → Closing: FIN both channels so in-flight writes can
    // flush during the grace delay; reader tasks exit on their own.
    let _ = ctrl_write.shutdown().await;
    let _ = data_write.shutdown().await;
    Ok(reason)
}

/// Extract the fixture frame, hand it to the scheduler, and dispatch
/// the command document to every registered head unit.
fn handle_frame(
    msg: &Message,
    scheduler: &FrameScheduler,
    heads: &mut [Box<dyn HeadUnit>],
    counters: &SharedCounters,
) {
    counters.frames_seen.fetch_add(1, Ordering::Relaxed);
    match msg.get(KEY_DFRAME).and_then(|v| v.as_bytes()) {
        Some(channels) => match scheduler.submit(channels) {
            SubmitOutcome::Accepted => trace!(len = channels.len(), "frame submitted"),
            SubmitOutcome::Dropped => debug!("frame dropped, pending slot occupied"),
        },
        None => debug!("data message without dframe"),
    }
    for head in heads.iter_mut() {
        head.handle(msg);
    }
}

/// Read loop for one channel, decoupled from the dispatch loop.
///
/// Malformed payloads in steady state are logged and discarded here;
/// the framing survives because the two-phase decoder already consumed
/// the declared length. Socket errors and EOF end the loop, which the
/// dispatch loop observes as a closed channel.
fn spawn_reader(
    channel: &'static str,
    mut read: OwnedReadHalf,
    bytes_in: Arc<AtomicU64>,
) -> mpsc::Receiver<Message> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut decoder = MessageDecoder::new();
        let mut scratch = Vec::new();
        let mut buf = Message::empty();
        loop {
            match read_message(&mut read, &mut decoder, &mut scratch, &bytes_in, &mut buf).await {
                Ok(()) => {
                    if tx.send(std::mem::take(&mut buf)).await.is_err() {
                        break;
                    }
                }
                Err(CodecError::Malformed(reason)) => {
                    warn!(channel, reason, "discarding malformed message");
                }
                Err(CodecError::ConnectionClosed) => {
                    debug!(channel, "channel closed");
                    break;
                }
                Err(err) => {
                    debug!(channel, error = %err, "channel read failed");
                    break;
                }
            }
        }
    });
    rx
}

/// Two-phase read: exactly 2 header bytes, then exactly the declared
/// payload length. Each phase is its own suspension point; the reader
/// never requests more than the decoder asked for.
async fn read_message(
    read: &mut OwnedReadHalf,
    decoder: &mut MessageDecoder,
    scratch: &mut Vec<u8>,
    bytes_in: &AtomicU64,
    out: &mut Message,
) -> std::result::Result<(), CodecError> {
    loop {
        let want = decoder.want();
        scratch.resize(want, 0);
        if let Err(err) = read.read_exact(&mut scratch[..]).await {
            return Err(if err.kind() == std::io::ErrorKind::UnexpectedEof {
                CodecError::ConnectionClosed
            } else {
                CodecError::Io(err)
            });
        }
        bytes_in.fetch_add(want as u64, Ordering::Relaxed);
        if decoder.advance(&scratch[..], out)? {
            return Ok(());
        }
    }
}

async fn write_message(
    write: &mut OwnedWriteHalf,
    msg: &Message,
    bytes_out: &AtomicU64,
) -> Result<()> {
    let mut wire = BytesMut::new();
    encode(msg, &mut wire)?;
    write.write_all(&wire).await?;
    bytes_out.fetch_add(wire.len() as u64, Ordering::Relaxed);
    Ok(())
}

/// Builds stats snapshots; fps is measured over the window since the
/// previous snapshot.
struct StatsTracker {
    last_frames_tx: u64,
    last_at: Instant,
}

impl StatsTracker {
    fn new(scheduler: &FrameScheduler) -> Self {
        Self {
            last_frames_tx: scheduler.stats().frames_tx,
            last_at: Instant::now(),
        }
    }

    fn snapshot(
        &mut self,
        scheduler: &FrameScheduler,
        counters: &SharedCounters,
        session_start: Instant,
    ) -> Message {
        let bus = scheduler.stats();
        let now = Instant::now();
        let window = now.duration_since(self.last_at).as_secs_f64().max(1e-6);
        let fps = bus.frames_tx.saturating_sub(self.last_frames_tx) as f64 / window;
        self.last_frames_tx = bus.frames_tx;
        self.last_at = now;

        let mut msg = Message::new(MSG_STATS);
        msg.push_float("fps", fps)
            .push_uint("dmx_qok", bus.qok)
            .push_uint("dmx_qrf", bus.qrf)
            .push_uint("dmx_qsf", bus.qsf)
            .push_uint("dmx_drop", bus.drops)
            .push_uint("elapsed_us", session_start.elapsed().as_micros() as u64)
            .push_uint("frames", counters.frames_seen.load(Ordering::Relaxed))
            .push_uint("bytes_in", counters.bytes_in.load(Ordering::Relaxed))
            .push_uint("bytes_out", counters.bytes_out.load(Ordering::Relaxed));
        msg
    }
}
