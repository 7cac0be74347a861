mod config;
mod logging;

use std::path::PathBuf;

use clap::Parser;
use luxlink_bus::{FrameScheduler, LoopbackDriver, SchedulerConfig};
use luxlink_server::{HeadUnit, SchedulerFactory, Server, TraceHead};
use tracing::info;

use crate::config::{Config, ConfigError};
use crate::logging::{init_logging, LogFormat, DEFAULT_FILTER};

#[derive(Parser, Debug)]
#[command(name = "luxlinkd", version, about = "luxlink lighting controller daemon")]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Control-channel listen address (overrides config).
    #[arg(long, value_name = "ADDR")]
    listen: Option<std::net::SocketAddr>,

    /// Idle teardown in milliseconds (overrides config).
    #[arg(long, value_name = "MS")]
    idle_shutdown_ms: Option<u64>,

    /// Stats report interval in milliseconds (overrides config).
    #[arg(long, value_name = "MS")]
    stats_interval_ms: Option<u64>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Log filter directive, e.g. "info" or "luxlink_bus=debug,info".
    /// The LUXLINK_LOG environment variable takes precedence.
    #[arg(long, value_name = "FILTER", default_value = DEFAULT_FILTER)]
    log_filter: String,
}

#[derive(Debug, thiserror::Error)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("runtime setup failed: {0}")]
    Runtime(std::io::Error),

    #[error("server failed: {0}")]
    Server(std::io::Error),
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, &cli.log_filter);

    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn effective_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(ms) = cli.idle_shutdown_ms {
        config.idle_shutdown_ms = ms;
    }
    if let Some(ms) = cli.stats_interval_ms {
        config.stats_interval_ms = ms;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), DaemonError> {
    let config = effective_config(&cli)?;

    // Server, sessions, and codec share one cooperative event loop;
    // only the frame scheduler runs preemptive threads.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(DaemonError::Runtime)?;

    runtime.block_on(async move {
        // The real UART driver is wired in by the board bring-up; the
        // loopback driver keeps the daemon runnable on a dev host.
        let scheduler_factory: SchedulerFactory = Box::new(|| {
            FrameScheduler::start(Box::new(LoopbackDriver::new()), SchedulerConfig::default())
        });

        let server = Server::bind(config.listen, config.session_config(), scheduler_factory)
            .await
            .map_err(DaemonError::Server)?
            .with_head_factory(|| vec![Box::new(TraceHead::new("head-0")) as Box<dyn HeadUnit>]);

        let token = server.cancellation_token();
        let mut server_task = tokio::spawn(server.run());

        tokio::select! {
            res = &mut server_task => {
                return join_result(res).map_err(DaemonError::Server);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                token.cancel();
            }
        }

        join_result(server_task.await).map_err(DaemonError::Server)
    })
}

fn join_result(
    res: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> std::io::Result<()> {
    res.map_err(std::io::Error::other)?
}
