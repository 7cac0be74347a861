use std::io;
use std::net::SocketAddr;

use luxlink_bus::FrameScheduler;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::head::HeadUnit;
use crate::session::{Session, SessionConfig};

/// Builds the frame scheduler owned by each new session. Ownership runs
/// Server → Session → Scheduler; there are no module-level singletons.
pub type SchedulerFactory = Box<dyn Fn() -> luxlink_bus::Result<FrameScheduler> + Send>;

/// Builds the head-unit set registered on each new session.
pub type HeadFactory = Box<dyn Fn() -> Vec<Box<dyn HeadUnit>> + Send>;

/// Accepts connections and enforces single-active-session.
///
/// The active-session slot is owned by the accept loop alone: while it
/// is populated with a live session, every newly accepted socket is
/// closed immediately and no `Session` is constructed for it.
pub struct Server {
    listener: TcpListener,
    session_config: SessionConfig,
    scheduler_factory: SchedulerFactory,
    head_factory: HeadFactory,
    cancel: CancellationToken,
    active: Option<JoinHandle<()>>,
}

impl Server {
    /// Bind the control acceptor. Binding failure is fatal to the
    /// caller; there is no retry here.
    pub async fn bind(
        addr: SocketAddr,
        session_config: SessionConfig,
        scheduler_factory: SchedulerFactory,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(local = %listener.local_addr()?, "listening");
        Ok(Self {
            listener,
            session_config,
            scheduler_factory,
            head_factory: Box::new(Vec::new),
            cancel: CancellationToken::new(),
            active: None,
        })
    }

    /// Register a head-unit set builder, invoked once per session.
    pub fn with_head_factory(
        mut self,
        factory: impl Fn() -> Vec<Box<dyn HeadUnit>> + Send + 'static,
    ) -> Self {
        self.head_factory = Box::new(factory);
        self
    }

    /// Address the control acceptor is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Token that stops the accept loop and all sessions when
    /// cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept loop. Returns when cancelled, or with the error that
    /// closed the acceptor.
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((socket, addr)) => self.on_accept(socket, addr).await?,
                    Err(err) if is_benign_accept_error(&err) => {
                        debug!(error = %err, "transient accept error");
                    }
                    Err(err) => {
                        error!(error = %err, "accept failed, closing acceptor");
                        return Err(err);
                    }
                },
            }
        }

        if let Some(active) = self.active.take() {
            let _ = active.await;
        }
        Ok(())
    }

    async fn on_accept(&mut self, socket: tokio::net::TcpStream, addr: SocketAddr) -> io::Result<()> {
        let busy = self
            .active
            .as_ref()
            .is_some_and(|session| !session.is_finished());
        if busy {
            info!(%addr, "rejecting connection, session already active");
            let mut socket = socket;
            let _ = socket.shutdown().await;
            return Ok(());
        }

        let scheduler = match (self.scheduler_factory)() {
            Ok(scheduler) => scheduler,
            Err(err) => {
                // Scheduler bring-up failure is a process-level fault.
                error!(error = %err, "scheduler start failed");
                return Err(io::Error::other(err.to_string()));
            }
        };

        info!(%addr, "accepted connection");
        let session = Session::new(
            socket,
            self.session_config,
            scheduler,
            (self.head_factory)(),
            self.cancel.child_token(),
        );
        self.active = Some(tokio::spawn(session.run()));
        Ok(())
    }
}

fn is_benign_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}
