//! Configuration module for environment variable parsing.
//!
//! Everything is read through a lookup function so tests can feed a map
//! instead of touching the process environment. A destination is enabled as
//! soon as one of its credentials or its URL is set, and must then be
//! complete.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::classify::{BounceCategory, BounceClassifier};
use crate::dispatch::{
    DestinationSettings, FormDestinationConfig, SenderCounter, XmlDestinationConfig, ENDPOINT_TIMEOUT,
};
use crate::error::ConfigError;
use crate::logging::{LogFormat, DEFAULT_LOG_FILE};
use crate::stats::{StoreLayout, FIELD_TRANSACTIONAL};

/// Default path of the stats log.
pub const DEFAULT_STATS_LOG_FILE: &str = "/var/log/pmta/pmta-bounce-stats.log";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Write the diagnostic log to stdout instead of a file
    pub log_console: bool,

    /// Diagnostic log path
    pub log_file: PathBuf,

    /// Diagnostic log line format
    pub log_format: LogFormat,

    /// Per-event stats log path
    pub stats_log_file: PathBuf,

    /// Round-robin store path; `None` disables stats
    pub rrd_file: Option<PathBuf>,

    /// Layout used when the store has to be created
    pub stats_layout: StoreLayout,

    /// Categories that are dispatched; empty means all
    pub handled_categories: Vec<BounceCategory>,

    /// Categories reported as soft bounces
    pub soft_categories: Vec<BounceCategory>,

    /// Timeout for notification requests
    pub endpoint_timeout: Duration,

    /// Form (MailWizz) destination, if configured
    pub mailwizz: Option<FormDestinationConfig>,

    /// XML (Interspire) destination, if configured
    pub interspire: Option<XmlDestinationConfig>,

    /// Transactional senders, counted but never notified
    pub transactional: Option<SenderCounter>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any name → value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let endpoint_timeout = match var("ENDPOINT_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidNumber {
                        var: "ENDPOINT_TIMEOUT_SECS",
                        value: raw,
                    })
                }
            },
            None => ENDPOINT_TIMEOUT,
        };

        let log_format = match var("BOUNCE_LOG_FORMAT").map(|v| v.to_ascii_lowercase()) {
            None => LogFormat::Text,
            Some(v) if v == "text" => LogFormat::Text,
            Some(v) if v == "json" => LogFormat::Json,
            Some(v) => {
                return Err(ConfigError::InvalidValue {
                    var: "BOUNCE_LOG_FORMAT",
                    value: v,
                    expected: "text or json",
                })
            }
        };

        let mut stats_layout = StoreLayout::default();
        for name in parse_csv(var("BOUNCE_RRD_EXTRA_COUNTERS")) {
            stats_layout = stats_layout.with_counter(&name);
        }

        let mailwizz = mailwizz(&var, endpoint_timeout, &stats_layout)?;
        let interspire = interspire(&var, endpoint_timeout, &stats_layout)?;
        let transactional = transactional(&var, &stats_layout)?;

        Ok(Config {
            log_console: parse_bool(&var, "BOUNCE_LOG_CONSOLE")?,
            log_file: var("BOUNCE_LOG_FILE")
                .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string())
                .into(),
            log_format,
            stats_log_file: var("BOUNCE_STATS_LOG_FILE")
                .unwrap_or_else(|| DEFAULT_STATS_LOG_FILE.to_string())
                .into(),
            rrd_file: var("BOUNCE_RRD_FILE").map(PathBuf::from),
            stats_layout,
            handled_categories: parse_categories(var("BOUNCE_CATEGORIES"))?,
            soft_categories: parse_categories(var("BOUNCE_SOFT_CATEGORIES"))?,
            endpoint_timeout,
            mailwizz,
            interspire,
            transactional,
        })
    }

    pub fn classifier(&self) -> BounceClassifier {
        BounceClassifier::new(
            self.handled_categories.iter().copied(),
            self.soft_categories.iter().copied(),
        )
    }
}

fn mailwizz<V>(
    var: &V,
    timeout: Duration,
    layout: &StoreLayout,
) -> Result<Option<FormDestinationConfig>, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    const NAME: &str = "mailwizz";
    let public_key = var("MAILWIZZ_API_PUBLIC_KEY");
    let private_key = var("MAILWIZZ_API_PRIVATE_KEY");
    let endpoint = var("MAILWIZZ_ENDPOINT_URL");
    if public_key.is_none() && private_key.is_none() && endpoint.is_none() {
        return Ok(None);
    }

    let public_key = require(NAME, "MAILWIZZ_API_PUBLIC_KEY", public_key)?;
    let private_key = require(NAME, "MAILWIZZ_API_PRIVATE_KEY", private_key)?;
    let endpoint = parse_url("MAILWIZZ_ENDPOINT_URL", &require(NAME, "MAILWIZZ_ENDPOINT_URL", endpoint)?)?;
    let settings = settings(
        var,
        NAME,
        endpoint,
        ("MAILWIZZ_SENDERS", "MAILWIZZ_PROBE", "MAILWIZZ_STATS_FIELD"),
        "bounce_mailwizz",
        timeout,
        layout,
    )?;

    Ok(Some(FormDestinationConfig {
        settings,
        public_key,
        private_key,
    }))
}

fn interspire<V>(
    var: &V,
    timeout: Duration,
    layout: &StoreLayout,
) -> Result<Option<XmlDestinationConfig>, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    const NAME: &str = "interspire";
    let api_key = var("INTERSPIRE_API_KEY");
    let endpoint = var("INTERSPIRE_ENDPOINT_URL");
    if api_key.is_none() && endpoint.is_none() {
        return Ok(None);
    }

    let api_key = require(NAME, "INTERSPIRE_API_KEY", api_key)?;
    let endpoint = parse_url(
        "INTERSPIRE_ENDPOINT_URL",
        &require(NAME, "INTERSPIRE_ENDPOINT_URL", endpoint)?,
    )?;
    let settings = settings(
        var,
        NAME,
        endpoint,
        ("INTERSPIRE_SENDERS", "INTERSPIRE_PROBE", "INTERSPIRE_STATS_FIELD"),
        "bounce_interspire",
        timeout,
        layout,
    )?;

    Ok(Some(XmlDestinationConfig {
        settings,
        api_key,
        user_id: var("INTERSPIRE_USER_ID").unwrap_or_else(|| "admin".to_string()),
    }))
}

fn transactional<V>(var: &V, layout: &StoreLayout) -> Result<Option<SenderCounter>, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    let senders = parse_csv(var("TRANSACTIONAL_SENDERS"));
    if senders.is_empty() {
        return Ok(None);
    }

    let stats_field = var("TRANSACTIONAL_STATS_FIELD").unwrap_or_else(|| FIELD_TRANSACTIONAL.to_string());
    if !layout.has_counter(&stats_field) {
        return Err(ConfigError::UnknownStatsField {
            destination: "transactional",
            field: stats_field,
        });
    }

    Ok(Some(
        SenderCounter::new("transactional", &stats_field).with_senders(senders),
    ))
}

/// Shared settings of one destination; `vars` are the senders, probe and
/// stats field variable names.
fn settings<V>(
    var: &V,
    name: &'static str,
    endpoint: Url,
    vars: (&'static str, &'static str, &'static str),
    default_stats_field: &str,
    timeout: Duration,
    layout: &StoreLayout,
) -> Result<DestinationSettings, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    let (senders_var, probe_var, stats_var) = vars;

    let senders = parse_csv(var(senders_var));
    if senders.is_empty() {
        return Err(ConfigError::NoSenders { destination: name });
    }

    let stats_field = var(stats_var).unwrap_or_else(|| default_stats_field.to_string());
    if !layout.has_counter(&stats_field) {
        return Err(ConfigError::UnknownStatsField {
            destination: name,
            field: stats_field,
        });
    }

    Ok(DestinationSettings::new(name, endpoint, &stats_field)
        .with_senders(senders)
        .with_probe(parse_bool(var, probe_var)?)
        .with_timeout(timeout))
}

fn require(
    destination: &'static str,
    missing: &'static str,
    value: Option<String>,
) -> Result<String, ConfigError> {
    value.ok_or(ConfigError::IncompleteDestination { destination, missing })
}

/// Parse an http(s) URL.
fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::InvalidUrl {
            var,
            value: raw.to_string(),
            reason: format!("unsupported scheme {scheme}"),
        }),
    }
}

fn parse_bool<V>(var: &V, name: &'static str) -> Result<bool, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    match var(name).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("0" | "false" | "no" | "off") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some(other) => Err(ConfigError::InvalidValue {
            var: name,
            value: other.to_string(),
            expected: "a boolean",
        }),
    }
}

fn parse_categories(raw: Option<String>) -> Result<Vec<BounceCategory>, ConfigError> {
    parse_csv(raw).iter().map(|name| name.parse()).collect()
}

/// Parse a comma-separated list of strings.
fn parse_csv(raw: Option<String>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    const MAILWIZZ: [(&str, &str); 4] = [
        ("MAILWIZZ_API_PUBLIC_KEY", "pub"),
        ("MAILWIZZ_API_PRIVATE_KEY", "priv"),
        ("MAILWIZZ_ENDPOINT_URL", "https://mailer.example.com/api"),
        ("MAILWIZZ_SENDERS", "campaign@mailwizz.com, News@MailWizz.com"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert!(!config.log_console);
        assert_eq!(config.log_file, PathBuf::from(DEFAULT_LOG_FILE));
        assert_eq!(config.stats_log_file, PathBuf::from(DEFAULT_STATS_LOG_FILE));
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.rrd_file.is_none());
        assert!(config.handled_categories.is_empty());
        assert!(config.soft_categories.is_empty());
        assert_eq!(config.endpoint_timeout, Duration::from_secs(30));
        assert!(config.mailwizz.is_none());
        assert!(config.interspire.is_none());
        assert!(config.transactional.is_none());
        assert_eq!(config.stats_layout, StoreLayout::default());
    }

    #[test]
    fn test_categories_parsed() {
        let config = load(&[
            ("BOUNCE_CATEGORIES", "bad-mailbox, Bad-Domain,,"),
            ("BOUNCE_SOFT_CATEGORIES", "quota-issues"),
        ])
        .unwrap();

        assert_eq!(
            config.handled_categories,
            vec![BounceCategory::BadMailbox, BounceCategory::BadDomain]
        );
        let classifier = config.classifier();
        assert!(classifier.is_handled(BounceCategory::BadDomain));
        assert!(!classifier.is_handled(BounceCategory::SpamRelated));
        assert!(classifier.is_soft(BounceCategory::QuotaIssues));
    }

    #[test]
    fn test_unknown_category_rejected() {
        let err = load(&[("BOUNCE_SOFT_CATEGORIES", "quota-issues,mailbox-on-fire")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCategory(ref name) if name == "mailbox-on-fire"));
    }

    #[test]
    fn test_mailwizz_destination() {
        let mut vars = MAILWIZZ.to_vec();
        vars.push(("MAILWIZZ_PROBE", "true"));
        vars.push(("ENDPOINT_TIMEOUT_SECS", "10"));
        let config = load(&vars).unwrap();

        let mailwizz = config.mailwizz.unwrap();
        assert_eq!(mailwizz.public_key, "pub");
        assert_eq!(mailwizz.private_key, "priv");
        assert_eq!(mailwizz.settings.name, "mailwizz");
        assert_eq!(mailwizz.settings.stats_field, "bounce_mailwizz");
        assert!(mailwizz.settings.probe);
        assert_eq!(mailwizz.settings.timeout, Duration::from_secs(10));
        assert!(mailwizz.settings.senders.contains("news@mailwizz.com"));
        assert_eq!(mailwizz.settings.senders.len(), 2);
    }

    #[test]
    fn test_interspire_destination() {
        let config = load(&[
            ("INTERSPIRE_API_KEY", "token"),
            ("INTERSPIRE_ENDPOINT_URL", "http://interspire.example.com/xml.php"),
            ("INTERSPIRE_SENDERS", "list@interspire.example.com"),
        ])
        .unwrap();

        let interspire = config.interspire.unwrap();
        assert_eq!(interspire.user_id, "admin");
        assert_eq!(interspire.api_key, "token");
        assert!(!interspire.settings.probe);
        assert_eq!(interspire.settings.stats_field, "bounce_interspire");
    }

    #[test]
    fn test_transactional_senders() {
        let config = load(&[("TRANSACTIONAL_SENDERS", "Orders@Shop.example.com, ,invoices@shop.example.com")]).unwrap();

        let counter = config.transactional.unwrap();
        assert_eq!(counter.stats_field, "bounce_bidorbuy");
        assert_eq!(counter.senders.len(), 2);
        assert!(counter.senders.contains("orders@shop.example.com"));

        let err = load(&[
            ("TRANSACTIONAL_SENDERS", "orders@shop.example.com"),
            ("TRANSACTIONAL_STATS_FIELD", "bounce_orders"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStatsField { destination: "transactional", .. }));
    }

    #[test]
    fn test_incomplete_destination_rejected() {
        let err = load(&[
            ("MAILWIZZ_API_PUBLIC_KEY", "pub"),
            ("MAILWIZZ_ENDPOINT_URL", "https://mailer.example.com/api"),
            ("MAILWIZZ_SENDERS", "campaign@mailwizz.com"),
        ])
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::IncompleteDestination {
                destination: "mailwizz",
                missing: "MAILWIZZ_API_PRIVATE_KEY"
            }
        ));
    }

    #[test]
    fn test_destination_without_senders_rejected() {
        let err = load(&MAILWIZZ[..3]).unwrap_err();
        assert!(matches!(err, ConfigError::NoSenders { destination: "mailwizz" }));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = load(&[
            ("INTERSPIRE_API_KEY", "token"),
            ("INTERSPIRE_ENDPOINT_URL", "ftp://interspire.example.com/xml.php"),
            ("INTERSPIRE_SENDERS", "list@interspire.example.com"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { var: "INTERSPIRE_ENDPOINT_URL", .. }));

        let err = load(&[
            ("INTERSPIRE_API_KEY", "token"),
            ("INTERSPIRE_ENDPOINT_URL", "not a url"),
            ("INTERSPIRE_SENDERS", "list@interspire.example.com"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        for value in ["soon", "0", "-5"] {
            let err = load(&[("ENDPOINT_TIMEOUT_SECS", value)]).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidNumber { var: "ENDPOINT_TIMEOUT_SECS", .. }));
        }
    }

    #[test]
    fn test_stats_field_must_exist_in_layout() {
        let mut vars = MAILWIZZ.to_vec();
        vars.push(("MAILWIZZ_STATS_FIELD", "bounce_acme"));
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStatsField { ref field, .. } if field == "bounce_acme"));

        vars.push(("BOUNCE_RRD_EXTRA_COUNTERS", "bounce_acme"));
        let config = load(&vars).unwrap();
        assert!(config.stats_layout.has_counter("bounce_acme"));
        assert_eq!(config.mailwizz.unwrap().settings.stats_field, "bounce_acme");
    }

    #[test]
    fn test_logging_options() {
        let config = load(&[
            ("BOUNCE_LOG_CONSOLE", "yes"),
            ("BOUNCE_LOG_FORMAT", "JSON"),
            ("BOUNCE_LOG_FILE", "/tmp/handler.log"),
            ("BOUNCE_RRD_FILE", "/var/lib/pmta/pmta.rrd"),
        ])
        .unwrap();

        assert!(config.log_console);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_file, PathBuf::from("/tmp/handler.log"));
        assert_eq!(config.rrd_file, Some(PathBuf::from("/var/lib/pmta/pmta.rrd")));

        let err = load(&[("BOUNCE_LOG_CONSOLE", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "BOUNCE_LOG_CONSOLE", .. }));
    }

    #[test]
    fn test_parse_csv() {
        let result = parse_csv(Some("foo, bar,, baz ".to_string()));
        assert_eq!(result, vec!["foo".to_string(), "bar".to_string(), "baz".to_string()]);
        assert!(parse_csv(None).is_empty());
    }
}
