//! Shared fixtures and port mocks for the in-module test suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::classify::{Classifier, ClassifyError};
use crate::index::{IndexError, IndexStore};
use crate::message::{Email, EmailAccount, EmailCategory, SearchQuery};
use crate::notify::{Notifier, NotifyError};
use crate::transport::{
    IdleOutcome, MailboxSession, MailboxTransport, RawMessage, TransportError,
};

pub fn account(id: &str) -> EmailAccount {
    EmailAccount {
        id: id.to_string(),
        host: "imap.example.com".to_string(),
        port: 993,
        user: format!("{id}@example.com"),
        password: "secret".to_string(),
        secure: true,
    }
}

/// RFC 822 fixture with consistent Date header and internal date.
pub fn raw_message(uid: u32, subject: &str, body: &str, date: DateTime<Utc>) -> RawMessage {
    let source = format!(
        "Message-ID: <{uid}@example.com>\r\n\
         From: Sender <sender@example.com>\r\n\
         To: me@example.com\r\n\
         Subject: {subject}\r\n\
         Date: {}\r\n\
         Content-Type: text/plain\r\n\
         \r\n\
         {body}\r\n",
        date.to_rfc2822()
    );
    RawMessage {
        uid,
        flags: Vec::new(),
        internal_date: Some(date),
        source: source.into_bytes(),
    }
}

pub fn email(account_id: &str, uid: u32, subject: &str, body: &str) -> Email {
    crate::normalizer::normalize(
        &account(account_id),
        &raw_message(uid, subject, body, Utc::now()),
    )
    .expect("fixture message must parse")
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Upsert(String),
    BulkUpsert(Vec<String>),
    UpdateCategory(String, EmailCategory),
}

/// In-memory index that records the order of writes, with switchable
/// failure injection per operation.
#[derive(Default)]
pub struct RecordingStore {
    pub ops: Mutex<Vec<StoreOp>>,
    pub records: Mutex<HashMap<String, Email>>,
    pub fail_upsert: AtomicBool,
    pub fail_bulk: AtomicBool,
    pub fail_update: AtomicBool,
}

impl RecordingStore {
    pub fn op_log(&self) -> Vec<StoreOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn record(&self, id: &str) -> Option<Email> {
        self.records.lock().unwrap().get(id).cloned()
    }

    fn matches(email: &Email, query: &SearchQuery) -> bool {
        query
            .account_id
            .as_ref()
            .map_or(true, |a| *a == email.account_id)
            && query.folder.as_ref().map_or(true, |f| *f == email.folder)
            && query
                .category
                .as_ref()
                .map_or(true, |c| Some(*c) == email.category)
    }
}

#[async_trait]
impl IndexStore for RecordingStore {
    async fn ensure_ready(&self) -> Result<(), IndexError> {
        Ok(())
    }

    async fn upsert(&self, email: &Email) -> Result<(), IndexError> {
        self.ops
            .lock()
            .unwrap()
            .push(StoreOp::Upsert(email.id.clone()));
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(IndexError::Status(503));
        }
        self.records
            .lock()
            .unwrap()
            .insert(email.id.clone(), email.clone());
        Ok(())
    }

    async fn bulk_upsert(&self, emails: &[Email]) -> Result<(), IndexError> {
        self.ops.lock().unwrap().push(StoreOp::BulkUpsert(
            emails.iter().map(|e| e.id.clone()).collect(),
        ));
        if self.fail_bulk.load(Ordering::SeqCst) {
            return Err(IndexError::Status(503));
        }
        let mut records = self.records.lock().unwrap();
        for email in emails {
            records.insert(email.id.clone(), email.clone());
        }
        Ok(())
    }

    async fn update_category(&self, id: &str, category: EmailCategory) -> Result<(), IndexError> {
        self.ops
            .lock()
            .unwrap()
            .push(StoreOp::UpdateCategory(id.to_string(), category));
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(IndexError::Status(503));
        }
        let mut records = self.records.lock().unwrap();
        match records.get_mut(id) {
            Some(record) => {
                record.category = Some(category);
                Ok(())
            }
            // update-before-exists is exactly what the pipeline ordering
            // must prevent; surface it as a hard error so tests catch it
            None => Err(IndexError::Status(404)),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Email>, IndexError> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Email>, IndexError> {
        let records = self.records.lock().unwrap();
        let mut found: Vec<Email> = records
            .values()
            .filter(|e| Self::matches(e, query))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(found)
    }

    async fn count(&self, query: &SearchQuery) -> Result<u64, IndexError> {
        let records = self.records.lock().unwrap();
        Ok(records.values().filter(|e| Self::matches(e, query)).count() as u64)
    }
}

/// Classifier that always answers with a fixed category, or always fails
/// when `category` is None.
pub struct StaticClassifier {
    pub category: Option<EmailCategory>,
}

#[async_trait]
impl Classifier for StaticClassifier {
    async fn classify(&self, _email: &Email) -> Result<EmailCategory, ClassifyError> {
        match self.category {
            Some(category) => Ok(category),
            None => Err(ClassifyError::Http("classifier down".to_string())),
        }
    }
}

#[derive(Default)]
pub struct CountingNotifier {
    pub chat_calls: AtomicUsize,
    pub webhook_calls: AtomicUsize,
    pub fail_chat: AtomicBool,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn chat_alert(&self, _email: &Email) -> Result<(), NotifyError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_chat.load(Ordering::SeqCst) {
            return Err(NotifyError::Status(500));
        }
        Ok(())
    }

    async fn webhook_event(&self, _email: &Email) -> Result<(), NotifyError> {
        self.webhook_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Session over a fixed mailbox. Idle outcomes are fed through a channel;
/// when the script runs dry the session idles forever.
pub struct ScriptedSession {
    pub mailbox: Vec<RawMessage>,
    /// When set, reported instead of the mailbox-derived value; lets a
    /// test claim a newer message exists that fetch cannot find.
    pub uid_next_override: Option<u32>,
    pub idle_rx: tokio::sync::mpsc::UnboundedReceiver<Result<IdleOutcome, TransportError>>,
    pub disconnected: Arc<AtomicBool>,
    pub heartbeats: Arc<AtomicUsize>,
    pub fail_heartbeat: Arc<AtomicBool>,
}

impl ScriptedSession {
    pub fn new(mailbox: Vec<RawMessage>) -> (Self, ScriptedHandles) {
        let (idle_tx, idle_rx) = tokio::sync::mpsc::unbounded_channel();
        let disconnected = Arc::new(AtomicBool::new(false));
        let heartbeats = Arc::new(AtomicUsize::new(0));
        let fail_heartbeat = Arc::new(AtomicBool::new(false));
        let session = ScriptedSession {
            mailbox,
            uid_next_override: None,
            idle_rx,
            disconnected: Arc::clone(&disconnected),
            heartbeats: Arc::clone(&heartbeats),
            fail_heartbeat: Arc::clone(&fail_heartbeat),
        };
        let handles = ScriptedHandles {
            idle_tx,
            disconnected,
            heartbeats,
            fail_heartbeat,
        };
        (session, handles)
    }

    pub fn empty() -> Self {
        Self::new(Vec::new()).0
    }
}

/// Test-side controls for a `ScriptedSession` that has been handed to the
/// engine.
pub struct ScriptedHandles {
    pub idle_tx: tokio::sync::mpsc::UnboundedSender<Result<IdleOutcome, TransportError>>,
    pub disconnected: Arc<AtomicBool>,
    pub heartbeats: Arc<AtomicUsize>,
    pub fail_heartbeat: Arc<AtomicBool>,
}

#[async_trait]
impl MailboxSession for ScriptedSession {
    async fn list_since(&mut self, since: DateTime<Utc>) -> Result<Vec<RawMessage>, TransportError> {
        Ok(self
            .mailbox
            .iter()
            .filter(|m| m.internal_date.map(|d| d >= since).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn uid_next(&mut self) -> Result<u32, TransportError> {
        if let Some(next) = self.uid_next_override {
            return Ok(next);
        }
        Ok(self.mailbox.iter().map(|m| m.uid).max().unwrap_or(0) + 1)
    }

    async fn fetch_one(&mut self, uid: u32) -> Result<Option<RawMessage>, TransportError> {
        Ok(self.mailbox.iter().find(|m| m.uid == uid).cloned())
    }

    async fn idle_until_change(
        &mut self,
        _keepalive: Duration,
    ) -> Result<IdleOutcome, TransportError> {
        match self.idle_rx.recv().await {
            Some(outcome) => outcome,
            None => futures::future::pending().await,
        }
    }

    fn usable(&self) -> bool {
        true
    }

    async fn heartbeat(&mut self) -> Result<(), TransportError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.fail_heartbeat.load(Ordering::SeqCst) {
            return Err(TransportError::Protocol("NOOP refused".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport that fails the first `fail_connects` attempts, then hands
/// out pre-scripted sessions (or inert empty ones once those run out).
pub struct ScriptedTransport {
    pub connect_attempts: AtomicUsize,
    pub fail_connects: usize,
    pub sessions: Mutex<VecDeque<ScriptedSession>>,
}

impl ScriptedTransport {
    pub fn new(fail_connects: usize, sessions: Vec<ScriptedSession>) -> Self {
        ScriptedTransport {
            connect_attempts: AtomicUsize::new(0),
            fail_connects,
            sessions: Mutex::new(sessions.into()),
        }
    }

    pub fn attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailboxTransport for ScriptedTransport {
    type Session = ScriptedSession;

    async fn connect(&self, _account: &EmailAccount) -> Result<ScriptedSession, TransportError> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_connects {
            return Err(TransportError::Connect("scripted failure".to_string()));
        }
        let session = self.sessions.lock().unwrap().pop_front();
        Ok(session.unwrap_or_else(ScriptedSession::empty))
    }
}

// Lets a test keep a handle on the transport after the engine takes it.
#[async_trait]
impl MailboxTransport for Arc<ScriptedTransport> {
    type Session = ScriptedSession;

    async fn connect(&self, account: &EmailAccount) -> Result<ScriptedSession, TransportError> {
        self.as_ref().connect(account).await
    }
}
