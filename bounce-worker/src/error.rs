//! Error types for the bounce worker.
//!
//! Only [`LogError::Unopenable`] is treated as fatal by the binary; every
//! other error is reduced to a log entry by the component that hits it.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration rejected at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown bounce category: {0}")]
    UnknownCategory(String),

    #[error("{var} is not a valid URL ({value}): {reason}")]
    InvalidUrl {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var} is not a valid number: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} has unsupported value {value}, expected {expected}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("destination {destination} is missing {missing}")]
    IncompleteDestination {
        destination: &'static str,
        missing: &'static str,
    },

    #[error("destination {destination} has no accepted sender addresses")]
    NoSenders { destination: &'static str },

    #[error("destination {destination} records to unknown stats field {field}")]
    UnknownStatsField {
        destination: &'static str,
        field: String,
    },
}

/// Log sink failures.
#[derive(Debug, Error)]
pub enum LogError {
    /// Neither the configured path nor the fallback could be opened.
    #[error("can't open log file {path} (fallback {fallback} also failed): {source}")]
    Unopenable {
        path: PathBuf,
        fallback: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed writing log line: {0}")]
    Write(#[from] io::Error),
}

/// Round-robin store failures.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("stats store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("stats store is not valid: {0}")]
    Format(#[from] serde_json::Error),

    #[error("invalid store layout: {0}")]
    Layout(String),

    #[error("unknown data source: {0}")]
    UnknownDataSource(String),

    #[error("update time {at} is not after last update {last}")]
    IllegalUpdate { at: i64, last: i64 },
}

/// Failure delivering a notification to one destination.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("endpoint {url} failed the reachability probe")]
    Unreachable { url: String },

    #[error("request timeout after {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    #[error("network connection failed: {message}")]
    Network { message: String },

    #[error("unexpected HTTP status {status_code}")]
    Status { status_code: u16, body: String },

    #[error("endpoint rejected the notification: {detail}")]
    Rejected { detail: String },

    #[error("could not build request: {message}")]
    Request { message: String },
}

impl DispatchError {
    /// Classify a transport error from reqwest.
    pub fn from_reqwest(err: &reqwest::Error, timeout_seconds: u64) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout { timeout_seconds }
        } else if err.is_builder() {
            DispatchError::Request {
                message: err.to_string(),
            }
        } else {
            DispatchError::Network {
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::IncompleteDestination {
            destination: "mailwizz",
            missing: "MAILWIZZ_API_PRIVATE_KEY",
        };
        assert_eq!(
            err.to_string(),
            "destination mailwizz is missing MAILWIZZ_API_PRIVATE_KEY"
        );
    }

    #[test]
    fn test_dispatch_error_messages() {
        let err = DispatchError::Status {
            status_code: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "unexpected HTTP status 500");
        assert_eq!(
            DispatchError::Timeout { timeout_seconds: 30 }.to_string(),
            "request timeout after 30s"
        );
    }
}
