//! Bounce taxonomy and hard/soft classification policy.
//!
//! Categories follow the PowerMTA bounce-category names. Two independent
//! allow-lists decide whether a category is processed at all and whether it
//! is reported downstream as a soft bounce.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bounce category as reported by the MTA accounting log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BounceCategory {
    BadMailbox,
    BadDomain,
    RoutingErrors,
    InactiveMailbox,
    BadConfiguration,
    BadConnection,
    ContentRelated,
    InvalidSender,
    Other,
    PolicyRelated,
    ProtocolErrors,
    QuotaIssues,
    SpamRelated,
    VirusRelated,
    MessageExpired,
    RelayingIssues,
    NoAnswerFromHost,
}

impl BounceCategory {
    /// Every known category, in declaration order.
    pub const ALL: [BounceCategory; 17] = [
        BounceCategory::BadMailbox,
        BounceCategory::BadDomain,
        BounceCategory::RoutingErrors,
        BounceCategory::InactiveMailbox,
        BounceCategory::BadConfiguration,
        BounceCategory::BadConnection,
        BounceCategory::ContentRelated,
        BounceCategory::InvalidSender,
        BounceCategory::Other,
        BounceCategory::PolicyRelated,
        BounceCategory::ProtocolErrors,
        BounceCategory::QuotaIssues,
        BounceCategory::SpamRelated,
        BounceCategory::VirusRelated,
        BounceCategory::MessageExpired,
        BounceCategory::RelayingIssues,
        BounceCategory::NoAnswerFromHost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BounceCategory::BadMailbox => "bad-mailbox",
            BounceCategory::BadDomain => "bad-domain",
            BounceCategory::RoutingErrors => "routing-errors",
            BounceCategory::InactiveMailbox => "inactive-mailbox",
            BounceCategory::BadConfiguration => "bad-configuration",
            BounceCategory::BadConnection => "bad-connection",
            BounceCategory::ContentRelated => "content-related",
            BounceCategory::InvalidSender => "invalid-sender",
            BounceCategory::Other => "other",
            BounceCategory::PolicyRelated => "policy-related",
            BounceCategory::ProtocolErrors => "protocol-errors",
            BounceCategory::QuotaIssues => "quota-issues",
            BounceCategory::SpamRelated => "spam-related",
            BounceCategory::VirusRelated => "virus-related",
            BounceCategory::MessageExpired => "message-expired",
            BounceCategory::RelayingIssues => "relaying-issues",
            BounceCategory::NoAnswerFromHost => "no-answer-from-host",
        }
    }
}

impl fmt::Display for BounceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BounceCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownCategory(s.trim().to_string()))
    }
}

/// Whether a bounce is reported downstream as permanent or transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BounceType {
    Hard,
    Soft,
}

impl BounceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BounceType::Hard => "hard",
            BounceType::Soft => "soft",
        }
    }
}

impl fmt::Display for BounceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies the handled and soft-bounce allow-lists.
///
/// The two lists are evaluated independently: an empty handled list admits
/// every category, while an empty soft list makes every bounce hard.
#[derive(Debug, Clone, Default)]
pub struct BounceClassifier {
    handled: BTreeSet<BounceCategory>,
    soft: BTreeSet<BounceCategory>,
}

impl BounceClassifier {
    pub fn new(
        handled: impl IntoIterator<Item = BounceCategory>,
        soft: impl IntoIterator<Item = BounceCategory>,
    ) -> Self {
        Self {
            handled: handled.into_iter().collect(),
            soft: soft.into_iter().collect(),
        }
    }

    pub fn is_handled(&self, category: BounceCategory) -> bool {
        self.handled.is_empty() || self.handled.contains(&category)
    }

    pub fn is_soft(&self, category: BounceCategory) -> bool {
        !self.soft.is_empty() && self.soft.contains(&category)
    }

    pub fn bounce_type(&self, category: BounceCategory) -> BounceType {
        if self.is_soft(category) {
            BounceType::Soft
        } else {
            BounceType::Hard
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_handled_list_handles_everything() {
        let classifier = BounceClassifier::default();
        for category in BounceCategory::ALL {
            assert!(classifier.is_handled(category), "{category} should be handled");
        }
    }

    #[test]
    fn test_handled_list_is_exact_membership() {
        let classifier = BounceClassifier::new(
            [BounceCategory::BadMailbox, BounceCategory::QuotaIssues],
            [],
        );
        for category in BounceCategory::ALL {
            let expected = matches!(
                category,
                BounceCategory::BadMailbox | BounceCategory::QuotaIssues
            );
            assert_eq!(classifier.is_handled(category), expected, "{category}");
        }
    }

    #[test]
    fn test_empty_soft_list_is_never_soft() {
        let classifier = BounceClassifier::new([BounceCategory::QuotaIssues], []);
        for category in BounceCategory::ALL {
            assert!(!classifier.is_soft(category));
            assert_eq!(classifier.bounce_type(category), BounceType::Hard);
        }
    }

    #[test]
    fn test_soft_list_independent_of_handled_list() {
        // quota-issues is soft but not handled; the router drops it before
        // the soft label matters
        let classifier = BounceClassifier::new(
            [BounceCategory::BadMailbox],
            [BounceCategory::QuotaIssues],
        );
        assert!(!classifier.is_handled(BounceCategory::QuotaIssues));
        assert!(classifier.is_soft(BounceCategory::QuotaIssues));
        assert_eq!(classifier.bounce_type(BounceCategory::BadMailbox), BounceType::Hard);
    }

    #[test]
    fn test_category_parse_round_trip() {
        for category in BounceCategory::ALL {
            assert_eq!(category.as_str().parse::<BounceCategory>().unwrap(), category);
        }
        assert_eq!(
            " Bad-Mailbox ".parse::<BounceCategory>().unwrap(),
            BounceCategory::BadMailbox
        );
    }

    #[test]
    fn test_unknown_category_rejected() {
        let err = "mailbox-on-fire".parse::<BounceCategory>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCategory(ref c) if c == "mailbox-on-fire"));
    }

    #[test]
    fn test_category_serde_uses_kebab_case() {
        let json = serde_json::to_string(&BounceCategory::NoAnswerFromHost).unwrap();
        assert_eq!(json, "\"no-answer-from-host\"");
    }
}
