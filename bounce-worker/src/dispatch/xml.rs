//! XML API destination (Interspire style).
//!
//! One `<xmlrequest>` document per bounce, authenticated by user name and API
//! token inside the body. A response without `<status>SUCCESS</status>` is a
//! rejection; its `<errormessage>` becomes the error detail.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use super::{http_client, preview, read_response, Destination, DestinationSettings};
use crate::classify::BounceType;
use crate::error::DispatchError;
use crate::event::BounceEvent;

/// Credentials and settings for an XML API destination.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDestinationConfig {
    pub settings: DestinationSettings,
    pub api_key: String,
    pub user_id: String,
}

/// Posts an XML request document to an Interspire-style API.
#[derive(Debug, Clone)]
pub struct XmlDestination {
    config: XmlDestinationConfig,
    client: Client,
}

impl XmlDestination {
    pub fn new(config: XmlDestinationConfig) -> reqwest::Result<Self> {
        let client = http_client(config.settings.timeout)?;
        Ok(Self { config, client })
    }

    fn request_body(&self, event: &BounceEvent, bounce_type: BounceType) -> String {
        format!(
            "<xmlrequest>\
             <username>{}</username>\
             <usertoken>{}</usertoken>\
             <requesttype>subscribers</requesttype>\
             <requestmethod>BounceSubscriber</requestmethod>\
             <details>\
             <emailaddress>{}</emailaddress>\
             <bouncetype>{}</bouncetype>\
             <bouncerule>{}</bouncerule>\
             <bouncemessage>{}</bouncemessage>\
             </details>\
             </xmlrequest>",
            escape(&self.config.user_id),
            escape(&self.config.api_key),
            escape(&event.recipient),
            bounce_type,
            event.category,
            escape(&event.diagnostic),
        )
    }
}

/// Escape the five XML special characters.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Text of the first `<tag>…</tag>` element, if any.
fn element<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim())
}

fn check_body(body: &str) -> Result<(), DispatchError> {
    match element(body, "status") {
        Some(status) if status.eq_ignore_ascii_case("SUCCESS") => Ok(()),
        _ => Err(DispatchError::Rejected {
            detail: element(body, "errormessage")
                .map(str::to_string)
                .unwrap_or_else(|| preview(body)),
        }),
    }
}

#[async_trait]
impl Destination for XmlDestination {
    fn settings(&self) -> &DestinationSettings {
        &self.config.settings
    }

    async fn send(&self, event: &BounceEvent, bounce_type: BounceType) -> Result<(), DispatchError> {
        let settings = &self.config.settings;
        let body = self.request_body(event, bounce_type);

        debug!(
            destination = %settings.name,
            url = %settings.endpoint,
            recipient = %event.recipient,
            body_length = body.len(),
            "xml_request_starting"
        );

        let response = self
            .client
            .post(settings.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| DispatchError::from_reqwest(&e, settings.timeout.as_secs()))?;

        let body = read_response(response, settings.timeout).await?;
        check_body(&body)?;

        info!(
            destination = %settings.name,
            recipient = %event.recipient,
            bounce_type = %bounce_type,
            "xml_bounce_accepted"
        );
        Ok(())
    }
}
