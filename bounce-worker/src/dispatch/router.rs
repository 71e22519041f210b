//! Routing of classified bounces to destinations.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::{Destination, SenderCounter};
use crate::classify::{BounceCategory, BounceClassifier, BounceType};
use crate::error::{DispatchError, LogError};
use crate::event::BounceEvent;
use crate::logging::LogSink;
use crate::probe::EndpointProbe;
use crate::stats::{StatsRecorder, FIELD_BOUNCES};

/// Result of one destination attempt.
#[derive(Debug, Clone)]
pub struct DestinationOutcome {
    pub destination: String,
    pub stats_field: String,
    pub result: Result<(), DispatchError>,
}

/// What happened to one event.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub category: BounceCategory,
    /// `None` when the category is not handled and the event was dropped.
    pub bounce_type: Option<BounceType>,
    pub outcomes: Vec<DestinationOutcome>,
    /// Stats-only sender groups the event matched
    pub counted: Vec<String>,
}

impl DispatchReport {
    pub fn skipped(&self) -> bool {
        self.bounce_type.is_none()
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }
}

/// Routes each event to every destination that sent the original message.
///
/// Destinations are tried one after another; a failure on one never stops
/// the others. Stats count attempts, not successes: `bounces` once per
/// handled event plus each attempted destination's counter, each name once,
/// recorded after all attempts are done.
pub struct DispatchRouter {
    classifier: BounceClassifier,
    destinations: Vec<Box<dyn Destination>>,
    counters: Vec<SenderCounter>,
    probe: EndpointProbe,
    stats: Arc<StatsRecorder>,
    stats_log: Option<Arc<LogSink>>,
}

impl DispatchRouter {
    pub fn new(
        classifier: BounceClassifier,
        destinations: Vec<Box<dyn Destination>>,
        probe: EndpointProbe,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            classifier,
            destinations,
            counters: Vec::new(),
            probe,
            stats,
            stats_log: None,
        }
    }

    /// Also append one summary line per handled event to `sink`.
    pub fn with_stats_log(mut self, sink: Arc<LogSink>) -> Self {
        self.stats_log = Some(sink);
        self
    }

    /// Count bounces from `counter`'s senders without notifying anyone.
    pub fn with_counter(mut self, counter: SenderCounter) -> Self {
        self.counters.push(counter);
        self
    }

    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.destinations.iter().map(|d| d.settings().name.as_str())
    }

    /// Classify, dispatch and record one event.
    ///
    /// Only a stats-log sink that cannot be opened anywhere is returned as an
    /// error; every destination failure is logged and reported in the
    /// [`DispatchReport`].
    pub async fn dispatch(&self, event: &BounceEvent) -> Result<DispatchReport, LogError> {
        if !self.classifier.is_handled(event.category) {
            info!(
                category = %event.category,
                sender = %event.sender,
                recipient = %event.recipient,
                "bounce_category_skipped"
            );
            return Ok(DispatchReport {
                category: event.category,
                bounce_type: None,
                outcomes: Vec::new(),
                counted: Vec::new(),
            });
        }

        let bounce_type = self.classifier.bounce_type(event.category);
        info!(
            category = %event.category,
            bounce_type = %bounce_type,
            sender = %event.sender,
            recipient = %event.recipient,
            "bounce_received"
        );

        let mut outcomes = Vec::new();
        for destination in &self.destinations {
            let settings = destination.settings();
            if !settings.accepts(event) {
                continue;
            }

            let result = self.attempt(&**destination, event, bounce_type).await;
            match &result {
                Ok(()) => info!(
                    destination = %settings.name,
                    recipient = %event.recipient,
                    bounce_type = %bounce_type,
                    "dispatch_sent"
                ),
                Err(e) => error!(
                    destination = %settings.name,
                    recipient = %event.recipient,
                    error = %e,
                    "dispatch_failed"
                ),
            }

            outcomes.push(DestinationOutcome {
                destination: settings.name.clone(),
                stats_field: settings.stats_field.clone(),
                result,
            });
        }

        let counted: Vec<String> = self
            .counters
            .iter()
            .filter(|counter| counter.accepts(event))
            .map(|counter| {
                info!(group = %counter.name, recipient = %event.recipient, "bounce_counted");
                counter.name.clone()
            })
            .collect();

        if outcomes.is_empty() && counted.is_empty() {
            warn!(sender = %event.sender, recipient = %event.recipient, "bounce_no_destination");
        }

        let report = DispatchReport {
            category: event.category,
            bounce_type: Some(bounce_type),
            outcomes,
            counted,
        };
        self.record(event, &report)?;
        Ok(report)
    }

    async fn attempt(
        &self,
        destination: &dyn Destination,
        event: &BounceEvent,
        bounce_type: BounceType,
    ) -> Result<(), DispatchError> {
        let settings = destination.settings();
        if settings.probe && !self.probe.is_reachable(settings.endpoint.as_str()).await {
            return Err(DispatchError::Unreachable {
                url: settings.endpoint.to_string(),
            });
        }
        destination.send(event, bounce_type).await
    }

    fn record(&self, event: &BounceEvent, report: &DispatchReport) -> Result<(), LogError> {
        let counter_fields = self
            .counters
            .iter()
            .filter(|counter| report.counted.contains(&counter.name))
            .map(|counter| counter.stats_field.as_str());
        let mut fields = vec![FIELD_BOUNCES];
        for field in report
            .outcomes
            .iter()
            .map(|outcome| outcome.stats_field.as_str())
            .chain(counter_fields)
        {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        self.stats.record(&fields.join(","));

        if let (Some(sink), Some(bounce_type)) = (&self.stats_log, report.bounce_type) {
            sink.write(&format!(
                "category={} type={} sender={} recipient={} attempted={} delivered={}",
                event.category,
                bounce_type,
                event.sender,
                event.recipient,
                report.attempted(),
                report.delivered(),
            ))?;
        }
        Ok(())
    }
}
