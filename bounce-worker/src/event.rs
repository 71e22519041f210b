//! Bounce events as handed over by the MTA accounting pipe.
//!
//! Events arrive as newline-delimited JSON, already reduced to a category
//! and the original sender:
//!
//! ```text
//! {"category":"bad-mailbox","sender":"campaign@mailwizz.com","recipient":"x@example.org","diagnostic":"550 5.1.1 unknown user"}
//! ```

use serde::{Deserialize, Serialize};

use crate::classify::BounceCategory;

/// One classified bounce. Consumed once by the router, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BounceEvent {
    /// Bounce category reported by the MTA
    pub category: BounceCategory,
    /// Envelope sender of the original message
    pub sender: String,
    /// Recipient whose delivery failed
    pub recipient: String,
    /// Raw diagnostic text from the remote server
    #[serde(default, alias = "dsnDiag")]
    pub diagnostic: String,
}

impl BounceEvent {
    pub fn new(
        category: BounceCategory,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            category,
            sender: sender.into(),
            recipient: recipient.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Parse one line of the event stream.
    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }

    /// Sender address normalized for matching against destination sender sets.
    pub fn sender_key(&self) -> String {
        normalize_address(&self.sender)
    }
}

/// Lowercase and strip surrounding whitespace and angle brackets.
pub fn normalize_address(address: &str) -> String {
    address
        .trim()
        .trim_matches(|c| c == '<' || c == '>')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_deserialization() {
        let line = r#"{"category":"quota-issues","sender":"campaign@mailwizz.com","recipient":"full@example.org","diagnostic":"452 4.2.2 mailbox full"}"#;

        let event = BounceEvent::from_json_line(line).unwrap();

        assert_eq!(event.category, BounceCategory::QuotaIssues);
        assert_eq!(event.sender, "campaign@mailwizz.com");
        assert_eq!(event.recipient, "full@example.org");
        assert_eq!(event.diagnostic, "452 4.2.2 mailbox full");
    }

    #[test]
    fn test_event_deserialization_minimal() {
        let line = r#"  {"category":"bad-domain","sender":"a@b.c","recipient":"d@e.f"}  "#;

        let event = BounceEvent::from_json_line(line).unwrap();

        assert_eq!(event.category, BounceCategory::BadDomain);
        assert!(event.diagnostic.is_empty());
    }

    #[test]
    fn test_event_unknown_category_rejected() {
        let line = r#"{"category":"exploded","sender":"a@b.c","recipient":"d@e.f"}"#;
        assert!(BounceEvent::from_json_line(line).is_err());
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address(" <Campaign@MailWizz.com> "), "campaign@mailwizz.com");
        assert_eq!(normalize_address("a@b.c"), "a@b.c");
    }
}
