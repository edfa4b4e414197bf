use chrono::{Duration, Utc};

use crate::message::EmailAccount;
use crate::normalizer;
use crate::pipeline::Pipeline;
use crate::transport::{MailboxSession, TransportError};

/// Drain the trailing historical window into the pipeline as one batch.
///
/// Per-message parse failures are isolated: the message is skipped with a
/// warning and the rest of the batch proceeds. Transport failures abort
/// the backfill and bubble up to the connection manager. Returns the
/// number of messages handed to the pipeline.
pub async fn run<S: MailboxSession>(
    session: &mut S,
    account: &EmailAccount,
    window_days: i64,
    pipeline: &Pipeline,
) -> Result<usize, TransportError> {
    let since = Utc::now() - Duration::days(window_days);
    let raw_messages = session.list_since(since).await?;

    if raw_messages.is_empty() {
        log::info!("No messages in INBOX for {}", account.id);
        return Ok(0);
    }

    let mut batch = Vec::with_capacity(raw_messages.len());
    for raw in &raw_messages {
        match normalizer::normalize(account, raw) {
            Ok(email) => batch.push(email),
            Err(e) => {
                log::warn!("Skipping unparseable message uid={} in {}: {e}", raw.uid, account.id);
            }
        }
    }

    log::info!("Fetched {} messages from {}", batch.len(), account.id);
    let indexed = batch.len();
    pipeline.process_batch(batch).await;
    Ok(indexed)
}
