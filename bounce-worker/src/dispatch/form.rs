//! Form-encoded API destination (MailWizz style).
//!
//! Bounces are posted as `application/x-www-form-urlencoded` fields to
//! `{endpoint}/bounces`. Requests carry the public key and a timestamp in
//! headers, plus an HMAC-SHA256 signature made with the private key over the
//! method, URL and the sorted parameters:
//!
//! ```text
//! X-MW-SIGNATURE = hex(HMAC(private_key, "POST {url}?{sorted params + X-MW-* headers}"))
//! ```
//!
//! The API answers JSON; anything but `"status": "success"` is a rejection.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use tracing::{debug, info};
use url::{form_urlencoded, Url};

use super::{http_client, preview, read_response, Destination, DestinationSettings};
use crate::classify::BounceType;
use crate::error::DispatchError;
use crate::event::BounceEvent;

type HmacSha256 = Hmac<Sha256>;

const HEADER_PUBLIC_KEY: &str = "X-MW-PUBLIC-KEY";
const HEADER_TIMESTAMP: &str = "X-MW-TIMESTAMP";
const HEADER_SIGNATURE: &str = "X-MW-SIGNATURE";

/// Credentials and settings for a form API destination.
#[derive(Debug, Clone, PartialEq)]
pub struct FormDestinationConfig {
    pub settings: DestinationSettings,
    pub public_key: String,
    pub private_key: String,
}

/// Posts signed form fields to a MailWizz-style API.
#[derive(Debug, Clone)]
pub struct FormDestination {
    config: FormDestinationConfig,
    client: Client,
}

impl FormDestination {
    pub fn new(config: FormDestinationConfig) -> reqwest::Result<Self> {
        let client = http_client(config.settings.timeout)?;
        Ok(Self { config, client })
    }

    fn bounce_url(&self) -> Result<Url, DispatchError> {
        let mut url = self.config.settings.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| DispatchError::Request {
                message: format!("endpoint {} cannot take a path", self.config.settings.endpoint),
            })?
            .pop_if_empty()
            .push("bounces");
        Ok(url)
    }

    /// Signature over `POST {url}?{params}` with params sorted by name.
    fn sign(&self, url: &Url, fields: &[(&str, String)], timestamp: i64) -> Result<String, DispatchError> {
        let mut params: BTreeMap<&str, String> =
            fields.iter().map(|(k, v)| (*k, v.clone())).collect();
        params.insert(HEADER_PUBLIC_KEY, self.config.public_key.clone());
        params.insert(HEADER_TIMESTAMP, timestamp.to_string());

        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();
        let separator = if url.query().is_some() { '&' } else { '?' };
        let payload = format!("POST {url}{separator}{query}");

        let mut mac = HmacSha256::new_from_slice(self.config.private_key.as_bytes()).map_err(|_| {
            DispatchError::Request {
                message: "invalid private key".to_string(),
            }
        })?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Form fields describing one bounce.
fn bounce_fields(event: &BounceEvent, bounce_type: BounceType) -> Vec<(&'static str, String)> {
    vec![
        ("email", event.recipient.clone()),
        ("sender", event.sender.clone()),
        ("bounce_type", bounce_type.to_string()),
        ("category", event.category.to_string()),
        ("message", event.diagnostic.clone()),
    ]
}

/// Accept only a JSON body with `"status": "success"`.
fn check_body(body: &str) -> Result<(), DispatchError> {
    let parsed: serde_json::Value =
        serde_json::from_str(body).map_err(|_| DispatchError::Rejected {
            detail: format!("response is not JSON: {}", preview(body)),
        })?;

    match parsed.get("status").and_then(|s| s.as_str()) {
        Some("success") => Ok(()),
        _ => {
            let detail = parsed
                .get("error")
                .map(|e| match e.as_str() {
                    Some(s) => s.to_string(),
                    None => e.to_string(),
                })
                .unwrap_or_else(|| preview(body));
            Err(DispatchError::Rejected { detail })
        }
    }
}

#[async_trait]
impl Destination for FormDestination {
    fn settings(&self) -> &DestinationSettings {
        &self.config.settings
    }

    async fn send(&self, event: &BounceEvent, bounce_type: BounceType) -> Result<(), DispatchError> {
        let url = self.bounce_url()?;
        let fields = bounce_fields(event, bounce_type);
        let timestamp = Utc::now().timestamp();
        let signature = self.sign(&url, &fields, timestamp)?;
        let timeout = self.config.settings.timeout;

        debug!(
            destination = %self.config.settings.name,
            url = %url,
            recipient = %event.recipient,
            "form_request_starting"
        );

        let response = self
            .client
            .post(url.clone())
            .header(HEADER_PUBLIC_KEY, &self.config.public_key)
            .header(HEADER_TIMESTAMP, timestamp.to_string())
            .header(HEADER_SIGNATURE, signature)
            .form(&fields)
            .send()
            .await
            .map_err(|e| DispatchError::from_reqwest(&e, timeout.as_secs()))?;

        let body = read_response(response, timeout).await?;
        check_body(&body)?;

        info!(
            destination = %self.config.settings.name,
            recipient = %event.recipient,
            bounce_type = %bounce_type,
            "form_bounce_accepted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::BounceCategory;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn destination(endpoint: &str) -> FormDestination {
        FormDestination::new(FormDestinationConfig {
            settings: DestinationSettings::new(
                "mailwizz",
                Url::parse(endpoint).unwrap(),
                "bounce_mailwizz",
            )
            .with_senders(["campaign@mailwizz.com"]),
            public_key: "pub-key".to_string(),
            private_key: "priv-key".to_string(),
        })
        .unwrap()
    }

    fn event() -> BounceEvent {
        BounceEvent::new(
            BounceCategory::QuotaIssues,
            "campaign@mailwizz.com",
            "full@example.org",
            "452 4.2.2 mailbox full",
        )
    }

    #[test]
    fn test_bounce_url_appends_segment() {
        let dest = destination("https://mailer.example.com/api");
        assert_eq!(dest.bounce_url().unwrap().as_str(), "https://mailer.example.com/api/bounces");

        let dest = destination("https://mailer.example.com/api/");
        assert_eq!(dest.bounce_url().unwrap().as_str(), "https://mailer.example.com/api/bounces");
    }

    #[test]
    fn test_signature_matches_recomputed_hmac() {
        let dest = destination("https://mailer.example.com/api");
        let url = dest.bounce_url().unwrap();
        let fields = vec![("email", "a@b.c".to_string()), ("bounce_type", "hard".to_string())];

        let signature = dest.sign(&url, &fields, 1_700_000_000).unwrap();

        let expected_payload = "POST https://mailer.example.com/api/bounces?\
            X-MW-PUBLIC-KEY=pub-key&X-MW-TIMESTAMP=1700000000&bounce_type=hard&email=a%40b.c";
        let mut mac = HmacSha256::new_from_slice(b"priv-key").unwrap();
        mac.update(expected_payload.as_bytes());
        assert_eq!(signature, hex::encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn test_check_body() {
        assert!(check_body(r#"{"status":"success","data":{}}"#).is_ok());

        let err = check_body(r#"{"status":"error","error":"Subscriber not found"}"#).unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { ref detail } if detail == "Subscriber not found"));

        assert!(matches!(
            check_body("<html>maintenance</html>"),
            Err(DispatchError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_posts_signed_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/bounces"))
            .and(header("X-MW-PUBLIC-KEY", "pub-key"))
            .and(header_exists("X-MW-SIGNATURE"))
            .and(header_exists("X-MW-TIMESTAMP"))
            .and(body_string_contains("email=full%40example.org"))
            .and(body_string_contains("bounce_type=soft"))
            .and(body_string_contains("category=quota-issues"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"success"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let dest = destination(&format!("{}/api", server.uri()));
        dest.send(&event(), BounceType::Soft).await.unwrap();

        server.verify().await;
    }

    #[tokio::test]
    async fn test_send_signs_with_current_timestamp() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"success"}"#))
            .mount(&server)
            .await;

        let dest = destination(&format!("{}/api", server.uri()));
        let before = Utc::now().timestamp();
        dest.send(&event(), BounceType::Hard).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let header = |name: &str| request.headers.get(name).unwrap().to_str().unwrap().to_string();
        let timestamp: i64 = header(HEADER_TIMESTAMP).parse().unwrap();
        assert!(timestamp >= before && timestamp <= Utc::now().timestamp());

        let url = dest.bounce_url().unwrap();
        let expected = dest
            .sign(&url, &bounce_fields(&event(), BounceType::Hard), timestamp)
            .unwrap();
        assert_eq!(header(HEADER_SIGNATURE), expected);
    }

    #[tokio::test]
    async fn test_send_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"status":"error","error":"Invalid API request signature."}"#),
            )
            .mount(&server)
            .await;

        let dest = destination(&format!("{}/api", server.uri()));
        let err = dest.send(&event(), BounceType::Hard).await.unwrap_err();

        assert!(matches!(err, DispatchError::Rejected { ref detail } if detail.contains("signature")));
    }

    #[tokio::test]
    async fn test_send_reports_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&server)
            .await;

        let dest = destination(&format!("{}/api", server.uri()));
        let err = dest.send(&event(), BounceType::Hard).await.unwrap_err();

        assert!(matches!(err, DispatchError::Status { status_code: 500, .. }));
    }
}
