use crate::message::{Email, EmailAccount};
use crate::normalizer;
use crate::transport::{MailboxSession, TransportError};

/// Resolve and fetch the single newest message after a mailbox-changed
/// signal. The whole mailbox is never reprocessed: the newest message is
/// `uid_next - 1` by definition.
///
/// `Ok(None)` means the event should be dropped — the message was already
/// expunged or did not survive parsing; both are logged by this function.
/// Transport errors bubble up so the connection manager can decide.
pub async fn fetch_latest<S: MailboxSession>(
    session: &mut S,
    account: &EmailAccount,
) -> Result<Option<Email>, TransportError> {
    let uid_next = session.uid_next().await?;
    if uid_next <= 1 {
        return Ok(None);
    }
    let uid = uid_next - 1;

    match session.fetch_one(uid).await? {
        None => {
            log::error!("New message uid={uid} in {} vanished before fetch", account.id);
            Ok(None)
        }
        Some(raw) => match normalizer::normalize(account, &raw) {
            Ok(email) => Ok(Some(email)),
            Err(e) => {
                log::error!("Error parsing new message uid={uid} in {}: {e}", account.id);
                Ok(None)
            }
        },
    }
}
