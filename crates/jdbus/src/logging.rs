use std::cell::Cell;
use std::fmt::{self, Write as _};
use std::sync::{Arc, OnceLock};

use clap::ValueEnum;
use jdbus_protocol::{ConsolePriority, LogSender};
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Target the bus console re-emits received lines under.
const CONSOLE_TARGET: &str = "jdbus::console";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Targets are printed from debug up, so bus console lines
    /// (`jdbus::console`) can be told apart from protocol chatter.
    fn shows_target(self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Trace)
    }
}

/// Where [`BusLogLayer`] sends its lines. Empty until a command attaches a
/// [`LogSender`]; events before that only go to stderr.
#[derive(Clone, Default)]
pub struct BusLog {
    sender: Arc<OnceLock<LogSender>>,
}

impl BusLog {
    /// Route forwarded events through `sender`. Only the first call wins.
    pub fn attach(&self, sender: LogSender) -> bool {
        self.sender.set(sender).is_ok()
    }
}

thread_local! {
    static FORWARDING: Cell<bool> = const { Cell::new(false) };
}

/// Forwards application events to a bus console.
///
/// Events from the protocol crates and the console's own re-emitted lines are
/// skipped, otherwise every forwarded packet would log about itself.
pub struct BusLogLayer {
    bus: BusLog,
}

impl BusLogLayer {
    pub fn new() -> (Self, BusLog) {
        let bus = BusLog::default();
        (Self { bus: bus.clone() }, bus)
    }
}

fn forwards(target: &str) -> bool {
    target != CONSOLE_TARGET && !target.starts_with("jdbus_")
}

fn priority_for(level: &Level) -> ConsolePriority {
    match *level {
        Level::ERROR => ConsolePriority::Error,
        Level::WARN => ConsolePriority::Warning,
        Level::INFO => ConsolePriority::Log,
        _ => ConsolePriority::Debug,
    }
}

impl<S: Subscriber> Layer<S> for BusLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(sender) = self.bus.sender.get() else {
            return;
        };
        let metadata = event.metadata();
        if !forwards(metadata.target()) {
            return;
        }
        if FORWARDING.with(|busy| busy.replace(true)) {
            return;
        }

        let mut line = LineVisitor::default();
        event.record(&mut line);
        // NotConnected until the console host is discovered.
        let _ = sender.log(priority_for(metadata.level()), &line.finish());

        FORWARDING.with(|busy| busy.set(false));
    }
}

/// Renders an event as `message key=value ...`.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        if self.message.is_empty() {
            return self.fields;
        }
        if self.fields.is_empty() {
            return self.message;
        }
        format!("{} {}", self.message, self.fields)
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={value:?}", field.name());
    }
}

/// Install the stderr subscriber. The returned [`BusLog`] lets a command
/// mirror the same events onto a bus console.
pub fn init_logging(format: LogFormat, level: LogLevel) -> BusLog {
    let (bus_layer, bus) = BusLogLayer::new();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(level.shows_target());
    let registry = tracing_subscriber::registry()
        .with(level.as_filter())
        .with(bus_layer);

    match format {
        LogFormat::Text => {
            let _ = registry.with(fmt_layer).try_init();
        }
        LogFormat::Json => {
            let _ = registry.with(fmt_layer.json()).try_init();
        }
    }
    bus
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jdbus_frame::LOGGER;
    use jdbus_protocol::{BusConfig, BusNode, ConsoleListener, DriverRole, DriverSpec, LogBroadcaster};
    use jdbus_transport::MemoryBus;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn levels_map_to_filters() {
        assert_eq!(LogLevel::Warn.as_filter(), LevelFilter::WARN);
        assert_eq!(LogLevel::Trace.as_filter(), LevelFilter::TRACE);
        assert!(!LogLevel::Info.shows_target());
        assert!(LogLevel::Debug.shows_target());
    }

    #[test]
    fn protocol_and_console_targets_are_not_forwarded() {
        assert!(forwards("jdbus::cmd::simulate"));
        assert!(!forwards(CONSOLE_TARGET));
        assert!(!forwards("jdbus_protocol::logic"));
        assert!(!forwards("jdbus_transport::memory"));
        assert_eq!(priority_for(&Level::WARN), ConsolePriority::Warning);
        assert_eq!(priority_for(&Level::TRACE), ConsolePriority::Debug);
    }

    #[test]
    fn only_the_first_sender_is_attached() {
        let (_layer, bus) = BusLogLayer::new();
        let (_, first) = LogBroadcaster::new();
        let (_, second) = LogBroadcaster::new();
        assert!(bus.attach(first));
        assert!(!bus.attach(second));
    }

    #[tokio::test(start_paused = true)]
    async fn tracing_events_reach_a_bus_console() {
        let bus = MemoryBus::new();

        let mut console_node = BusNode::attach(BusConfig::default().with_serial(1), &bus);
        let (listener, mut lines) = ConsoleListener::new(ConsolePriority::Log);
        console_node
            .register(DriverSpec::new(DriverRole::Host, LOGGER), listener)
            .unwrap();

        let mut app_node = BusNode::attach(BusConfig::default().with_serial(2), &bus);
        let (broadcaster, sender) = LogBroadcaster::new();
        let client = app_node
            .register(DriverSpec::new(DriverRole::Virtual, LOGGER), broadcaster)
            .unwrap();

        let (_console_bus, _) = console_node.spawn();
        let (app_bus, _) = app_node.spawn();
        app_bus.wait_connected(client, WAIT).await.unwrap();

        let (layer, bus_log) = BusLogLayer::new();
        assert!(bus_log.attach(sender));
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));

        tracing::debug!("below the console threshold");
        tracing::info!(target: "jdbus_protocol::logic", "protocol chatter");
        tracing::info!(node = 2, "hello console");

        let line = tokio::time::timeout(WAIT, lines.recv()).await.unwrap().unwrap();
        assert_eq!(line.priority, ConsolePriority::Log);
        assert_eq!(line.text, "hello console node=2");
        assert!(lines.try_recv().is_err());
    }
}
