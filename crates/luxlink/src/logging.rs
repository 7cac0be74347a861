use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Fallback applied when both the CLI directive and the environment
/// override fail to parse.
pub const DEFAULT_FILTER: &str = "info";

/// Environment variable overriding the CLI log filter when set.
pub const FILTER_ENV: &str = "LUXLINK_LOG";

/// Output format of the daemon's stderr log stream.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Resolve the effective filter: `LUXLINK_LOG` wins over the CLI
/// directive, and an unparseable directive degrades to [`DEFAULT_FILTER`].
fn resolve_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_from_env(FILTER_ENV)
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global stderr subscriber.
///
/// `directive` is a tracing filter expression, so per-crate levels work
/// out of the box (e.g. `luxlink_bus=debug,info` to watch the transmit
/// loop without drowning in session chatter).
pub fn init_logging(format: LogFormat, directive: &str) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(resolve_filter(directive))
        .with_writer(std::io::stderr)
        .with_ansi(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_crate_directives_parse() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
        assert!(EnvFilter::try_new("luxlink_bus=debug,luxlink_server=trace,info").is_ok());
    }

    #[test]
    fn garbage_directive_degrades_to_default() {
        let filter = resolve_filter("luxlink_bus=notalevel");
        assert_eq!(filter.to_string(), DEFAULT_FILTER);
    }
}
