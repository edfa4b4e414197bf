use async_imap::extensions::idle::IdleResponse;
use async_imap::types::{Fetch, Flag};
use async_native_tls::TlsStream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::message::EmailAccount;
use crate::normalizer::INBOX;
use crate::transport::{
    IdleOutcome, MailboxSession, MailboxTransport, RawMessage, TransportError,
};

// This type alias saves us from writing this monster type everywhere.
// An IMAP session is generic over the stream type; here it is
// TLS-encrypted TCP wrapped in a tokio compat layer.
type TlsSession = async_imap::Session<TlsStream<Compat<TcpStream>>>;

const FETCH_QUERY: &str = "(UID FLAGS INTERNALDATE BODY.PEEK[])";

/// Production transport over async-imap. Connections are always TLS.
pub struct ImapTransport;

#[async_trait]
impl MailboxTransport for ImapTransport {
    type Session = ImapMailbox;

    async fn connect(&self, account: &EmailAccount) -> Result<ImapMailbox, TransportError> {
        if !account.secure {
            log::warn!(
                "Account {} is configured insecure; connecting with TLS regardless",
                account.id
            );
        }
        log::info!("Connecting to {}:{} for {}", account.host, account.port, account.id);

        let tcp = TcpStream::connect((account.host.as_str(), account.port))
            .await
            .map_err(|e| TransportError::Connect(format!("TCP connect failed: {e}")))?;
        let tcp = tcp.compat();
        let tls = async_native_tls::TlsConnector::new();
        let stream = tls
            .connect(&account.host, tcp)
            .await
            .map_err(|e| TransportError::Connect(format!("TLS handshake failed: {e}")))?;

        let client = async_imap::Client::new(stream);
        let mut session = client
            .login(&account.user, &account.password)
            .await
            .map_err(|(e, _)| TransportError::Auth(e.to_string()))?;

        let mailbox = session
            .select(INBOX)
            .await
            .map_err(|e| TransportError::Protocol(format!("SELECT failed: {e}")))?;
        log::info!(
            "Opened INBOX for {}: {} messages exist",
            account.id,
            mailbox.exists
        );

        Ok(ImapMailbox {
            session: Some(session),
            usable: true,
        })
    }
}

/// One selected-INBOX session. IDLE consumes the inner session, so it
/// lives in an Option and is put back when the idle handle is done.
pub struct ImapMailbox {
    session: Option<TlsSession>,
    usable: bool,
}

impl ImapMailbox {
    fn session_mut(&mut self) -> Result<&mut TlsSession, TransportError> {
        self.session.as_mut().ok_or(TransportError::Closed)
    }

    async fn fetch_uid_set(&mut self, uid_set: &str) -> Result<Vec<RawMessage>, TransportError> {
        let session = self.session_mut()?;
        let stream = session
            .uid_fetch(uid_set, FETCH_QUERY)
            .await
            .map_err(|e| TransportError::Protocol(format!("FETCH failed: {e}")))?;
        futures::pin_mut!(stream);

        // collect tolerantly: responses that fail to parse are logged
        // and skipped, the rest of the batch proceeds
        let mut messages = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(fetch) => {
                    if let Some(raw) = raw_from_fetch(&fetch) {
                        messages.push(raw);
                    }
                }
                Err(e) => log::warn!("Skipping unparseable FETCH response: {e}"),
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl MailboxSession for ImapMailbox {
    async fn list_since(&mut self, since: DateTime<Utc>) -> Result<Vec<RawMessage>, TransportError> {
        let query = format!("SINCE {}", since.format("%d-%b-%Y"));
        let uids = self
            .session_mut()?
            .uid_search(&query)
            .await
            .map_err(|e| TransportError::Protocol(format!("SEARCH failed: {e}")))?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        uids.sort_unstable();
        let uid_set = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.fetch_uid_set(&uid_set).await
    }

    async fn uid_next(&mut self) -> Result<u32, TransportError> {
        // re-SELECT refreshes the server's view of UIDNEXT
        let mailbox = self
            .session_mut()?
            .select(INBOX)
            .await
            .map_err(|e| TransportError::Protocol(format!("SELECT failed: {e}")))?;
        mailbox
            .uid_next
            .ok_or_else(|| TransportError::Protocol("server did not report UIDNEXT".to_string()))
    }

    async fn fetch_one(&mut self, uid: u32) -> Result<Option<RawMessage>, TransportError> {
        let mut messages = self.fetch_uid_set(&uid.to_string()).await?;
        if messages.is_empty() {
            Ok(None)
        } else {
            Ok(Some(messages.remove(0)))
        }
    }

    async fn idle_until_change(
        &mut self,
        keepalive: Duration,
    ) -> Result<IdleOutcome, TransportError> {
        let session = self.session.take().ok_or(TransportError::Closed)?;
        let mut idle = session.idle();
        if let Err(e) = idle.init().await {
            self.usable = false;
            return Err(TransportError::Protocol(format!("IDLE failed: {e}")));
        }

        let (idle_wait, _interrupt) = idle.wait_with_timeout(keepalive);
        let response = match idle_wait.await {
            Ok(response) => response,
            Err(e) => {
                self.usable = false;
                return Err(TransportError::Protocol(format!("IDLE wait failed: {e}")));
            }
        };

        match idle.done().await {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                self.usable = false;
                return Err(TransportError::Protocol(format!("IDLE done failed: {e}")));
            }
        }

        match response {
            IdleResponse::NewData(_) => Ok(IdleOutcome::NewMail),
            IdleResponse::Timeout | IdleResponse::ManualInterrupt => Ok(IdleOutcome::KeepaliveDue),
        }
    }

    fn usable(&self) -> bool {
        self.usable && self.session.is_some()
    }

    async fn heartbeat(&mut self) -> Result<(), TransportError> {
        self.session_mut()?
            .noop()
            .await
            .map_err(|e| TransportError::Protocol(format!("NOOP failed: {e}")))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.usable = false;
        let mut session = self.session.take().ok_or(TransportError::Closed)?;
        session
            .logout()
            .await
            .map_err(|e| TransportError::Protocol(format!("LOGOUT failed: {e}")))
    }
}

fn raw_from_fetch(fetch: &Fetch) -> Option<RawMessage> {
    let uid = fetch.uid?;
    let source = fetch.body()?.to_vec();
    let flags = fetch.flags().map(|f| flag_to_string(&f)).collect();
    let internal_date = fetch.internal_date().map(|d| d.with_timezone(&Utc));
    Some(RawMessage {
        uid,
        flags,
        internal_date,
        source,
    })
}

fn flag_to_string(flag: &Flag) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Recent => "\\Recent".to_string(),
        Flag::MayCreate => "\\*".to_string(),
        Flag::Custom(name) => name.to_string(),
    }
}
