//! Logging module: timestamped sinks and the tracing bridge.
//!
//! Components log through `tracing` macros. The binary installs a subscriber
//! whose writer is the diagnostic [`LogSink`], so every event ends up as one
//! timestamped line in the diagnostic log (or on stdout in console mode).
//!
//! ```text
//! tracing::info!(..) → fmt layer → SinkMakeWriter → LogSink::write → file/stdout
//! ```

pub mod sink;

use std::io;
use std::sync::Arc;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::LogError;

pub use sink::{timestamp, LogMode, LogSink, DEFAULT_LOG_FILE, FALLBACK_LOG_FILE};

/// Exit code used when no log file can be opened.
pub const EXIT_FATAL: i32 = 1;

/// Output format of the diagnostic log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Terminate the process because the audit trail cannot be written.
pub fn fatal(err: &LogError) -> ! {
    eprintln!("fatal: {err}");
    std::process::exit(EXIT_FATAL)
}

/// `MakeWriter` that funnels formatted tracing events into a [`LogSink`].
#[derive(Debug, Clone)]
pub struct SinkMakeWriter {
    sink: Arc<LogSink>,
}

impl SinkMakeWriter {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }
}

impl<'a> MakeWriter<'a> for SinkMakeWriter {
    type Writer = EventWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        EventWriter {
            sink: &self.sink,
            buf: Vec::new(),
        }
    }
}

/// Buffers one formatted event and hands it to the sink as a single line
/// when dropped.
pub struct EventWriter<'a> {
    sink: &'a LogSink,
    buf: Vec<u8>,
}

impl io::Write for EventWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EventWriter<'_> {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.buf);
        match self.sink.write(line.trim_end()) {
            Ok(()) => {}
            Err(err @ LogError::Unopenable { .. }) => fatal(&err),
            Err(err) => eprintln!("log write failed: {err}"),
        }
    }
}

/// Install the global tracing subscriber writing into `sink`.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Timestamps are
/// added by the sink, so the fmt layer's own timer is disabled.
pub fn init_tracing(sink: Arc<LogSink>, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = SinkMakeWriter::new(sink);

    let (text, json) = match format {
        LogFormat::Text => (
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .without_time()
                    .with_ansi(false)
                    .with_target(false),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(writer)
                    .without_time(),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_tracing_events_land_in_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diag.log");
        let sink = Arc::new(LogSink::file(&path));

        let subscriber = fmt()
            .with_writer(SinkMakeWriter::new(Arc::clone(&sink)))
            .without_time()
            .with_ansi(false)
            .with_target(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(destination = "mailwizz", "dispatch_sent");
            tracing::warn!("stats_store_missing");
        });
        sink.close();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].contains("dispatch_sent"));
        assert!(lines[0].contains("destination=\"mailwizz\""));
        assert!(lines[1].contains("WARN"));
        assert!(lines[1].contains("stats_store_missing"));
    }

    #[test]
    fn test_empty_event_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diag.log");
        let sink = Arc::new(LogSink::file(&path));
        let maker = SinkMakeWriter::new(sink);

        drop(maker.make_writer());

        assert!(!path.exists());
    }
}
