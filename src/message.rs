use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// One configured mailbox endpoint. Immutable after config load; at most
/// one live connection per account at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAccount {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub secure: bool,
}

/// Canonical message record produced by the normalizer. Only `category`
/// is ever mutated after creation; everything else is written once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    pub account_id: String,
    pub message_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub text_body: String,
    pub date: DateTime<Utc>,
    pub folder: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<EmailCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailCategory {
    Interested,
    MeetingBooked,
    NotInterested,
    Spam,
    OutOfOffice,
    Uncategorized,
}

impl EmailCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailCategory::Interested => "interested",
            EmailCategory::MeetingBooked => "meeting_booked",
            EmailCategory::NotInterested => "not_interested",
            EmailCategory::Spam => "spam",
            EmailCategory::OutOfOffice => "out_of_office",
            EmailCategory::Uncategorized => "uncategorized",
        }
    }

    /// Parse a classifier keyword. Anything outside the fixed vocabulary
    /// is None; callers treat that as `Uncategorized`.
    pub fn from_keyword(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "interested" => Some(EmailCategory::Interested),
            "meeting_booked" => Some(EmailCategory::MeetingBooked),
            "not_interested" => Some(EmailCategory::NotInterested),
            "spam" => Some(EmailCategory::Spam),
            "out_of_office" => Some(EmailCategory::OutOfOffice),
            "uncategorized" => Some(EmailCategory::Uncategorized),
            _ => None,
        }
    }
}

impl fmt::Display for EmailCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter surface the index store must support.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub account_id: Option<String>,
    pub folder: Option<String>,
    pub category: Option<EmailCategory>,
    pub from: Option<usize>,
    pub size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedReply {
    pub reply: String,
    pub confidence: f64,
    pub context: String,
}

/// Deterministic message identity: SHA-256 over `"{account_id}-{uid}"`.
/// The same server message always hashes to the same id, which is what
/// makes index writes idempotent upserts rather than appends.
pub fn message_identity(account_id: &str, uid: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    hasher.update(b"-");
    hasher.update(uid.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
