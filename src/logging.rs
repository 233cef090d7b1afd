use colored::Colorize;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Install the process-wide tracing subscriber.
///
/// Diagnostics go to stderr so the measurement columns on stdout stay
/// machine-readable. The level defaults to `info` and can be overridden
/// through `RUST_LOG`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(LevelTintedFormatter)
        .init();
}

/// Minimal stderr formatter: the message tinted by severity, with an
/// explicit tag on warnings and errors so piped output stays legible.
struct LevelTintedFormatter;

impl<S, N> FormatEvent<S, N> for LevelTintedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut message = String::new();
        ctx.format_fields(Writer::new(&mut message), event)?;

        let line = match *event.metadata().level() {
            Level::ERROR => format!("error: {message}").red(),
            Level::WARN => format!("warning: {message}").yellow(),
            Level::INFO => message.normal(),
            Level::DEBUG => message.blue(),
            Level::TRACE => message.dimmed(),
        };

        writeln!(writer, "{line}")
    }
}
