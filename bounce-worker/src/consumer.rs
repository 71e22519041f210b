//! Event stream consumer.
//!
//! Reads newline-delimited bounce events and hands each one to the router,
//! strictly in order. Stops at end of input or on SIGINT/SIGTERM, letting the
//! event in progress finish first.

use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::signal;
use tracing::{debug, info, warn};

use bouncer::error::LogError;
use bouncer::{BounceEvent, DispatchRouter};

/// Counters for one consumer run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub received: u64,
    pub malformed: u64,
    pub skipped: u64,
    pub dispatched: u64,
}

/// Consume events from `input` until it ends or `shutdown` resolves.
///
/// Malformed lines, including lines that are not valid UTF-8, are logged
/// and skipped. Only a read error on the input itself ends the run early.
/// The only error returned is a stats log that cannot be opened anywhere,
/// which the caller treats as fatal.
pub async fn run<R, S>(input: R, router: &DispatchRouter, shutdown: S) -> Result<RunSummary, LogError>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = input.split(b'\n');
    let mut summary = RunSummary::default();
    tokio::pin!(shutdown);

    info!(destinations = ?router.destinations().collect::<Vec<_>>(), "consumer_ready");

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                info!("consumer_stopping");
                break;
            }
            line = lines.next_segment() => line,
        };

        let raw = match line {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!("input_closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "input_read_failed");
                break;
            }
        };

        let raw = raw.strip_suffix(b"\r").unwrap_or(raw.as_slice());
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        summary.received += 1;

        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                summary.malformed += 1;
                warn!(error = %e, line_length = raw.len(), "event_not_utf8");
                continue;
            }
        };

        let event = match BounceEvent::from_json_line(line) {
            Ok(event) => event,
            Err(e) => {
                summary.malformed += 1;
                warn!(error = %e, line_length = line.len(), "event_malformed");
                continue;
            }
        };

        let report = router.dispatch(&event).await?;
        if report.skipped() {
            summary.skipped += 1;
        } else {
            summary.dispatched += 1;
        }
        debug!(
            recipient = %event.recipient,
            attempted = report.attempted(),
            delivered = report.delivered(),
            "event_done"
        );
    }

    info!(
        received = summary.received,
        malformed = summary.malformed,
        skipped = summary.skipped,
        dispatched = summary.dispatched,
        "consumer_finished"
    );
    Ok(summary)
}

/// Resolves on SIGINT or SIGTERM. A handler that cannot be installed is
/// logged and never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "sigint_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
