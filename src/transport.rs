use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::message::EmailAccount;

/// Raw protocol message as fetched from the server, before normalization.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Server-assigned UID within the mailbox.
    pub uid: u32,
    pub flags: Vec<String>,
    pub internal_date: Option<DateTime<Utc>>,
    /// Full RFC 822 source.
    pub source: Vec<u8>,
}

/// Outcome of one wait on the mailbox-changed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The server announced a change to the mailbox.
    NewMail,
    /// The keepalive interval elapsed without a change.
    KeepaliveDue,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("connection closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Factory for authenticated mailbox sessions, one per account.
#[async_trait]
pub trait MailboxTransport: Send + Sync + 'static {
    type Session: MailboxSession + Send + 'static;

    async fn connect(&self, account: &EmailAccount) -> Result<Self::Session, TransportError>;
}

/// An open, authenticated session on the primary inbox.
///
/// `idle_until_change` doubles as the keepalive clock: it resolves with
/// `NewMail` when the server signals a change, or `KeepaliveDue` after the
/// given interval so the caller can send a heartbeat.
#[async_trait]
pub trait MailboxSession: Send {
    /// Every message in the inbox with a timestamp inside the trailing
    /// window. Order follows the server; callers must not assume
    /// chronology. An empty mailbox yields an empty list, not an error.
    async fn list_since(&mut self, since: DateTime<Utc>) -> Result<Vec<RawMessage>, TransportError>;

    /// The next UID the server would assign; the newest existing message
    /// is `uid_next() - 1`.
    async fn uid_next(&mut self) -> Result<u32, TransportError>;

    /// Fetch exactly one message. `None` when the UID no longer exists
    /// (already expunged).
    async fn fetch_one(&mut self, uid: u32) -> Result<Option<RawMessage>, TransportError>;

    async fn idle_until_change(&mut self, keepalive: Duration)
        -> Result<IdleOutcome, TransportError>;

    /// Whether the underlying transport still reports itself usable.
    fn usable(&self) -> bool;

    /// No-op heartbeat. Failures are the caller's to log; they are not
    /// fatal by themselves.
    async fn heartbeat(&mut self) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
