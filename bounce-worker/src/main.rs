//! Bounce Worker - reads classified bounce events from stdin and reports each
//! one to the mailing platforms that sent the original message.
//!
//! Exits with status 1 when no log file can be opened.

mod consumer;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{stdin, BufReader};
use tracing::info;

use bouncer::dispatch::Destination;
use bouncer::logging::{fatal, init_tracing};
use bouncer::{Config, DispatchRouter, EndpointProbe, FormDestination, LogMode, LogSink, StatsRecorder, XmlDestination};

#[tokio::main]
async fn main() -> Result<()> {
    // Reported on stderr: the log sink is not set up yet
    let config = Config::from_env().context("Invalid configuration")?;

    let log = Arc::new(LogSink::new());
    log.set_path(&config.log_file);
    if config.log_console {
        log.set_mode(LogMode::Console);
    }
    init_tracing(Arc::clone(&log), config.log_format);

    info!("worker_starting");
    info!(
        log_console = config.log_console,
        rrd_file = ?config.rrd_file,
        handled_categories = config.handled_categories.len(),
        soft_categories = config.soft_categories.len(),
        mailwizz = config.mailwizz.is_some(),
        interspire = config.interspire.is_some(),
        transactional = config.transactional.is_some(),
        timeout_seconds = config.endpoint_timeout.as_secs(),
        "config_loaded"
    );

    let stats = Arc::new(match &config.rrd_file {
        Some(path) => StatsRecorder::open_with(path, &config.stats_layout, chrono::Utc::now().timestamp()),
        None => StatsRecorder::disabled(),
    });

    let stats_log = Arc::new(LogSink::file(&config.stats_log_file));
    let mut router = DispatchRouter::new(
        config.classifier(),
        destinations(&config)?,
        EndpointProbe::new().context("Failed to create probe client")?,
        stats,
    )
    .with_stats_log(Arc::clone(&stats_log));
    if let Some(counter) = config.transactional.clone() {
        router = router.with_counter(counter);
    }

    let result = consumer::run(BufReader::new(stdin()), &router, consumer::shutdown_signal()).await;

    stats_log.close();
    info!("worker_stopped");
    log.close();

    if let Err(err) = result {
        fatal(&err);
    }
    Ok(())
}

fn destinations(config: &Config) -> Result<Vec<Box<dyn Destination>>> {
    let mut destinations: Vec<Box<dyn Destination>> = Vec::new();
    if let Some(mailwizz) = &config.mailwizz {
        destinations.push(Box::new(
            FormDestination::new(mailwizz.clone()).context("Failed to create MailWizz client")?,
        ));
    }
    if let Some(interspire) = &config.interspire {
        destinations.push(Box::new(
            XmlDestination::new(interspire.clone()).context("Failed to create Interspire client")?,
        ));
    }
    Ok(destinations)
}
