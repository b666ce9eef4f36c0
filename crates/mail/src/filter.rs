//! Interest filters over message labels
//!
//! A message matches a rule when it carries *any* of the rule's labels, and
//! matches a [`FilterSet`] when it matches *any* rule. Evaluation is pure and
//! can be shared freely between threads.
//!
//! Rules are usually written as Gmail-style queries:
//! - `is:important`, `is:starred`, `is:unread` - system labels
//! - `category:personal` - inbox category (`CATEGORY_PERSONAL`)
//! - `in:inbox` - folder label
//! - `label:Receipts` - user label, case preserved
//!
//! Several terms in one query (optionally joined by `OR`) form a single
//! rule.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Label IDs Gmail uses for common states
pub mod labels {
    pub const INBOX: &str = "INBOX";
    pub const IMPORTANT: &str = "IMPORTANT";
    pub const STARRED: &str = "STARRED";
    pub const UNREAD: &str = "UNREAD";
    pub const CATEGORY_PERSONAL: &str = "CATEGORY_PERSONAL";
    pub const CATEGORY_UPDATES: &str = "CATEGORY_UPDATES";
}

/// Queries applied when no filters are configured
pub const DEFAULT_FILTER_QUERIES: [&str; 4] = [
    "is:important",
    "is:starred",
    "category:personal",
    "category:updates",
];

/// A named rule: matches when any of `labels` is present
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub name: String,
    pub labels: Vec<String>,
}

impl FilterRule {
    pub fn new(name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }

    /// Build a rule from a Gmail-style query, named after the query
    pub fn from_query(query: &str) -> Result<Self> {
        let mut labels = Vec::new();

        for term in query.split_whitespace() {
            if term.eq_ignore_ascii_case("OR") {
                continue;
            }
            labels.push(term_to_label(term)?);
        }

        if labels.is_empty() {
            bail!("Empty filter query");
        }

        Ok(Self::new(query.trim(), labels))
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.labels.iter().any(|label| message.has_label(label))
    }
}

/// Translate one `operator:value` term into the label it selects
fn term_to_label(term: &str) -> Result<String> {
    let Some((operator, value)) = term.split_once(':') else {
        bail!("Filter term '{}' has no operator", term);
    };

    if value.is_empty() {
        bail!("Filter term '{}' has no value", term);
    }

    let label = match operator.to_ascii_lowercase().as_str() {
        "is" | "in" => value.to_ascii_uppercase(),
        "category" => format!("CATEGORY_{}", value.to_ascii_uppercase()),
        "label" => value.to_string(),
        other => bail!("Unsupported filter operator '{}'", other),
    };

    Ok(label)
}

/// The configured set of interest rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSet {
    rules: Vec<FilterRule>,
}

impl FilterSet {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    /// Parse every query into a rule
    pub fn from_queries<S: AsRef<str>>(queries: &[S]) -> Result<Self> {
        let rules = queries
            .iter()
            .map(|q| FilterRule::from_query(q.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Whether the message carries a label required by any rule
    pub fn matches(&self, message: &Message) -> bool {
        self.rules.iter().any(|rule| rule.matches(message))
    }

    /// Name of the first rule the message satisfies
    pub fn matching_rule(&self, message: &Message) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matches(message))
            .map(|rule| rule.name.as_str())
    }
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::new(vec![
            FilterRule::new("is:important", vec![labels::IMPORTANT.to_string()]),
            FilterRule::new("is:starred", vec![labels::STARRED.to_string()]),
            FilterRule::new(
                "category:personal",
                vec![labels::CATEGORY_PERSONAL.to_string()],
            ),
            FilterRule::new(
                "category:updates",
                vec![labels::CATEGORY_UPDATES.to_string()],
            ),
        ])
    }
}
