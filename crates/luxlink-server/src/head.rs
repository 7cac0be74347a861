use luxlink_proto::Message;
use tracing::debug;

/// A logical fixture/output consumer of specific frame channels.
///
/// Head units are selected at configuration time and registered on the
/// session; every data-channel command document is dispatched to each
/// of them in registration order. This is a capability interface, not a
/// rendering engine: what a head unit does with its channels is outside
/// this crate.
pub trait HeadUnit: Send {
    /// Stable name for logging and telemetry.
    fn name(&self) -> &str;

    /// Consume one command document.
    fn handle(&mut self, command: &Message);
}

/// Head unit that traces every command it receives. Useful as a
/// placeholder while bringing a controller up without real fixtures.
#[derive(Debug, Clone)]
pub struct TraceHead {
    name: String,
}

impl TraceHead {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl HeadUnit for TraceHead {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, command: &Message) {
        debug!(
            head = %self.name,
            msg_type = command.msg_type().unwrap_or("?"),
            entries = command.entries().len(),
            "head unit command"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_head_reports_name() {
        let head = TraceHead::new("wash-1");
        assert_eq!(head.name(), "wash-1");
    }
}
