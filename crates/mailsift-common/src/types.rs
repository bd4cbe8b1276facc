//! Common types for Mailsift

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Email address split into local part and domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.splitn(2, '@').collect();
        if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            Some(Self::new(parts[0], parts[1]))
        } else {
            None
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Decode("Invalid email address".to_string()))
    }
}

/// A single message header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A message as seen by the filtering phase. Snapshots of this type are
/// what the message cache stores; once cached they are treated as immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// MTA queue id, unique per transaction
    pub queue_id: String,

    /// Envelope sender (MAIL FROM)
    pub from: EmailAddress,

    /// Envelope recipients (RCPT TO), in order
    pub rcpt: Vec<EmailAddress>,

    /// Headers in wire order
    pub headers: Vec<Header>,

    /// Raw message body
    pub body: Vec<u8>,
}

impl Message {
    /// Iterate headers whose key matches `name` case-insensitively
    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Header> {
        self.headers
            .iter()
            .filter(move |h| h.key.eq_ignore_ascii_case(name))
    }
}

/// Action a check module suggests for a message. Aggregation of suggestions
/// into a final decision happens in the filtering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedAction {
    Permit,
    Defer,
    Reject,
    Discard,
}

/// A descriptive value recorded by a check module alongside its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Determinant {
    Text(String),
    Flag(bool),
    Mapping(HashMap<String, String>),
}

/// Result of one check module's evaluation of one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Name of the module that produced this result
    pub module: String,

    /// Suggested action
    pub suggested_action: SuggestedAction,

    /// Score contribution (0.0 = neutral)
    pub score: f64,

    /// Audit trail of what the module saw and did
    pub determinants: HashMap<String, Determinant>,
}
