//! Tracing subscriber setup: console formatter, file layer, and initialisation.
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;

use super::utils::{CLOCK_FORMAT, DATETIME_FORMAT, log_file_path, now, strip_ansi};

/// Target of stage-header events.
pub(super) const STAGE_TARGET: &str = "modkit::stage";
/// Target of dry-run events.
pub(super) const DRY_RUN_TARGET: &str = "modkit::dry_run";

/// Presentation class of one event, shared by the console and the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Stage,
    DryRun,
    Error,
    Warn,
    Info,
    Debug,
}

impl LineKind {
    fn classify(level: Level, target: &str) -> Self {
        match level {
            Level::ERROR => Self::Error,
            Level::WARN => Self::Warn,
            Level::INFO if target == STAGE_TARGET => Self::Stage,
            Level::INFO if target == DRY_RUN_TARGET => Self::DryRun,
            Level::INFO => Self::Info,
            _ => Self::Debug,
        }
    }

    /// Plain-text line for the log file.
    fn file_line(self, clock: &str, msg: &str) -> String {
        match self {
            Self::Stage => format!("[{clock}] ==> {msg}"),
            Self::DryRun => format!("[{clock}]     [dry run] {msg}"),
            Self::Error => format!("[{clock}]     [error] {msg}"),
            Self::Warn => format!("[{clock}]     [warn] {msg}"),
            Self::Info => format!("[{clock}]     {msg}"),
            Self::Debug => format!("[{clock}]     [debug] {msg}"),
        }
    }

    /// Coloured line for the terminal.
    fn console_line(self, msg: &str) -> String {
        match self {
            Self::Stage => format!("\x1b[1;34m==>\x1b[0m \x1b[1m{msg}\x1b[0m"),
            Self::DryRun => format!("  \x1b[33m[DRY RUN]\x1b[0m {msg}"),
            Self::Error => format!("\x1b[31mERROR\x1b[0m {msg}"),
            Self::Warn => format!("\x1b[33mWARN\x1b[0m  {msg}"),
            Self::Info => format!("  {msg}"),
            Self::Debug => format!("  \x1b[2m{msg}\x1b[0m"),
        }
    }
}

/// Pulls the `message` field out of an event.
#[derive(Default)]
struct MessageExtractor {
    message: String,
}

impl tracing::field::Visit for MessageExtractor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

/// Classify `event` and extract its message.
fn decompose(event: &tracing::Event<'_>) -> (LineKind, String) {
    let metadata = event.metadata();
    let mut extractor = MessageExtractor::default();
    event.record(&mut extractor);
    (
        LineKind::classify(*metadata.level(), metadata.target()),
        extractor.message,
    )
}

/// Layer appending every event to the per-command log file, timestamped
/// and without ANSI codes.
#[derive(Debug)]
pub(super) struct FileLayer {
    file: Mutex<fs::File>,
}

impl FileLayer {
    /// Start the log for `command` at its default location.
    ///
    /// Returns `None` if the cache directory or the file is unavailable;
    /// file logging is then silently skipped.
    pub(super) fn new(command: &str) -> Option<Self> {
        Self::create(&log_file_path(command)?, command).ok()
    }

    /// Truncate `path`, write a run header and open it for appending.
    pub(super) fn create(path: &Path, command: &str) -> std::io::Result<Self> {
        let version =
            option_env!("MODKIT_VERSION").unwrap_or(concat!("dev-", env!("CARGO_PKG_VERSION")));
        let rule = "=".repeat(42);
        fs::write(
            path,
            format!(
                "{rule}\nmodkit {version} {command} {}\n{rule}\n",
                now(DATETIME_FORMAT)
            ),
        )?;
        let file = fs::OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FileLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let (kind, msg) = decompose(event);
        let line = kind.file_line(&now(CLOCK_FORMAT), &strip_ansi(&msg));
        if let Ok(mut f) = self.file.lock() {
            writeln!(f, "{line}").ok();
        }
    }
}

/// Console formatter built on [`LineKind::console_line`].
struct ConsoleFormat;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for ConsoleFormat
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let (kind, msg) = decompose(event);
        writeln!(writer, "{}", kind.console_line(&msg))
    }
}

/// Install the global subscriber: coloured console output (warnings and
/// errors on stderr, `RUST_LOG` overriding the level) plus a [`FileLayer`]
/// that records `debug` and above for `command`.
pub fn init_subscriber(verbose: bool, command: &str) {
    use tracing_subscriber::fmt::writer::MakeWriterExt as _;
    use tracing_subscriber::{
        EnvFilter, Layer as _, filter::LevelFilter, fmt, layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    };

    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let console_filter = EnvFilter::builder()
        .with_default_directive(console_level.into())
        .from_env_lossy();

    let make_writer = std::io::stderr
        .with_max_level(Level::WARN)
        .and(std::io::stdout.with_min_level(Level::INFO));

    let console_layer = fmt::layer()
        .event_format(ConsoleFormat)
        .with_writer(make_writer)
        .with_filter(console_filter);

    let file_layer = FileLayer::new(command).map(|l| l.with_filter(LevelFilter::DEBUG));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
}
