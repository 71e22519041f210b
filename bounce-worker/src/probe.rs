//! Endpoint reachability probe.
//!
//! A best-effort pre-flight GET against a destination URL. A positive result
//! says nothing about whether the following notification will be accepted.

use std::time::Duration;

use reqwest::{redirect, Client};
use tracing::{info, warn};

/// Time allowed for one probe request.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Status codes that count as reachable.
const REACHABLE_STATUS: [u16; 3] = [200, 301, 302];

/// Checks that an endpoint answers with a non-empty body and an acceptable status.
#[derive(Debug, Clone)]
pub struct EndpointProbe {
    client: Client,
    timeout: Duration,
}

impl EndpointProbe {
    /// Build a probe with the default 5 second timeout.
    pub fn new() -> reqwest::Result<Self> {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    /// Build a probe with a custom timeout. Redirects are not followed so that
    /// 301 and 302 answers are seen as such.
    pub fn with_timeout(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Returns true when `url` answers 200, 301 or 302 with a non-empty body.
    pub async fn is_reachable(&self, url: &str) -> bool {
        let response = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let reason = if e.is_timeout() { "timeout" } else { "transport" };
                warn!(
                    url = url,
                    reason = reason,
                    timeout_seconds = self.timeout.as_secs_f64(),
                    error = %e,
                    hint = "check connectivity",
                    "endpoint_probe_failed"
                );
                return false;
            }
        };

        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = url, status_code = status, error = %e, "endpoint_probe_body_failed");
                return false;
            }
        };

        if body.is_empty() {
            warn!(url = url, status_code = status, "endpoint_probe_empty_body");
            return false;
        }

        if !REACHABLE_STATUS.contains(&status) {
            warn!(url = url, status_code = status, "endpoint_probe_bad_status");
            return false;
        }

        info!(url = url, status_code = status, "endpoint_probe_ok");
        true
    }
}
