use chrono::{DateTime, Utc};
use mailparse::{MailAddr, MailHeaderMap, ParsedMail};

use crate::message::{message_identity, Email, EmailAccount};
use crate::transport::RawMessage;

pub const INBOX: &str = "INBOX";
pub const NO_SUBJECT: &str = "(No Subject)";

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed message: {0}")]
    Parse(String),
}

/// Pure transformation from a raw protocol message to the canonical
/// record. Identity is derived from account id and server UID only, so
/// normalizing the same server message twice yields the same record id.
pub fn normalize(account: &EmailAccount, raw: &RawMessage) -> Result<Email, NormalizeError> {
    let parsed =
        mailparse::parse_mail(&raw.source).map_err(|e| NormalizeError::Parse(e.to_string()))?;

    let message_id = parsed
        .headers
        .get_first_value("Message-ID")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| format!("{}-{}", account.id, raw.uid));

    let subject = parsed
        .headers
        .get_first_value("Subject")
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| NO_SUBJECT.to_string());

    let from = parsed.headers.get_first_value("From").unwrap_or_default();
    let to = recipient_addresses(&parsed);
    let date = message_date(&parsed, raw);

    let html = body_of_subtype(&parsed, "html");
    let text = body_of_subtype(&parsed, "plain");
    let body = match (&html, &text) {
        (Some(html), _) => html.clone(),
        (None, Some(text)) if !text.is_empty() => text_to_html(text),
        _ => String::new(),
    };
    let text_body = text.unwrap_or_default();

    Ok(Email {
        id: message_identity(&account.id, raw.uid),
        account_id: account.id.clone(),
        message_id,
        from,
        to,
        subject,
        body,
        text_body,
        date,
        folder: INBOX.to_string(),
        flags: raw.flags.clone(),
        category: None,
        raw: Some(String::from_utf8_lossy(&raw.source).into_owned()),
    })
}

/// Addresses from the structured To header. Group entries contribute
/// their members; entries with an empty address are skipped.
fn recipient_addresses(parsed: &ParsedMail) -> Vec<String> {
    let header = match parsed.headers.get_first_value("To") {
        Some(value) => value,
        None => return Vec::new(),
    };
    let list = match mailparse::addrparse(&header) {
        Ok(list) => list,
        Err(e) => {
            log::warn!("Unparseable To header '{header}': {e}");
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => {
                if !info.addr.is_empty() {
                    out.push(info.addr.clone());
                }
            }
            MailAddr::Group(group) => {
                for info in &group.addrs {
                    if !info.addr.is_empty() {
                        out.push(info.addr.clone());
                    }
                }
            }
        }
    }
    out
}

fn message_date(parsed: &ParsedMail, raw: &RawMessage) -> DateTime<Utc> {
    if let Some(value) = parsed.headers.get_first_value("Date") {
        if let Ok(ts) = mailparse::dateparse(&value) {
            if let Some(date) = DateTime::from_timestamp(ts, 0) {
                return date;
            }
        }
    }
    raw.internal_date.unwrap_or_else(Utc::now)
}

/// First body part of `text/<subtype>`, depth-first, decoded.
fn body_of_subtype(part: &ParsedMail, subtype: &str) -> Option<String> {
    let mimetype = format!("text/{subtype}");
    if part.subparts.is_empty() {
        if part.ctype.mimetype.eq_ignore_ascii_case(&mimetype) {
            return part.get_body().ok();
        }
        return None;
    }
    for sub in &part.subparts {
        if let Some(body) = body_of_subtype(sub, subtype) {
            return Some(body);
        }
    }
    None
}

/// Minimal text-to-HTML rendering for messages without an HTML part.
fn text_to_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("<br>\n"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}
