//! Bounce notification dispatch.
//!
//! This module routes classified bounces to the mailing platforms that sent
//! the original message.
//!
//! ## Dispatch Flow
//!
//! ```text
//! BounceEvent → DispatchRouter → [probe] → Destination::send() → StatsRecorder
//! ```
//!
//! Each platform protocol is one [`Destination`] implementation; the router
//! only sees the trait.

pub mod form;
pub mod router;
pub mod xml;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::classify::BounceType;
use crate::error::DispatchError;
use crate::event::{normalize_address, BounceEvent};

pub use form::{FormDestination, FormDestinationConfig};
pub use router::{DestinationOutcome, DispatchReport, DispatchRouter};
pub use xml::{XmlDestination, XmlDestinationConfig};

/// Default time allowed for one notification request.
pub const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

/// Status codes accepted from a destination before checking the body.
const SUCCESS_STATUS: [u16; 3] = [200, 301, 302];

/// Settings shared by every destination type.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationSettings {
    /// Name used in logs
    pub name: String,
    /// Endpoint the notification is sent to
    pub endpoint: Url,
    /// Normalized original sender addresses this destination accepts
    pub senders: BTreeSet<String>,
    /// Stats counter incremented for every attempt
    pub stats_field: String,
    /// Probe the endpoint before each send
    pub probe: bool,
    /// Request timeout
    pub timeout: Duration,
}

impl DestinationSettings {
    pub fn new(name: &str, endpoint: Url, stats_field: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint,
            senders: BTreeSet::new(),
            stats_field: stats_field.to_string(),
            probe: false,
            timeout: ENDPOINT_TIMEOUT,
        }
    }

    pub fn with_senders<I, S>(mut self, senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.senders = senders
            .into_iter()
            .map(|s| normalize_address(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn with_probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the event's original sender is one of ours.
    pub fn accepts(&self, event: &BounceEvent) -> bool {
        self.senders.contains(&event.sender_key())
    }
}

/// A sender group whose bounces are only counted, never sent anywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct SenderCounter {
    pub name: String,
    /// Normalized original sender addresses in the group
    pub senders: BTreeSet<String>,
    /// Stats counter incremented for every matching bounce
    pub stats_field: String,
}

impl SenderCounter {
    pub fn new(name: &str, stats_field: &str) -> Self {
        Self {
            name: name.to_string(),
            senders: BTreeSet::new(),
            stats_field: stats_field.to_string(),
        }
    }

    pub fn with_senders<I, S>(mut self, senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.senders = senders
            .into_iter()
            .map(|s| normalize_address(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn accepts(&self, event: &BounceEvent) -> bool {
        self.senders.contains(&event.sender_key())
    }
}

/// A downstream platform that can be told about a bounce.
#[async_trait]
pub trait Destination: Send + Sync {
    fn settings(&self) -> &DestinationSettings;

    /// Deliver one notification. Errors are per-destination and never abort
    /// the event.
    async fn send(&self, event: &BounceEvent, bounce_type: BounceType) -> Result<(), DispatchError>;
}

/// HTTP client used by destinations: bounded by `timeout`, redirects not
/// followed so 301/302 answers are observed directly.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// Read a response and reject unexpected statuses.
pub(crate) async fn read_response(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<String, DispatchError> {
    let status_code = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| DispatchError::from_reqwest(&e, timeout.as_secs()))?;

    if !SUCCESS_STATUS.contains(&status_code) {
        return Err(DispatchError::Status {
            status_code,
            body: preview(&body),
        });
    }
    Ok(body)
}

/// First 200 characters of a response body, for logs and errors.
pub(crate) fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}
