//! RFC 6068 `mailto:` parsing for the mail-reply method.

use percent_encoding::percent_decode_str;
use reqwest::Url;

pub const DEFAULT_SUBJECT: &str = "Unsubscribe";
pub const DEFAULT_BODY: &str = "Please unsubscribe me from this mailing list.";

/// Recipient, subject and body of a `mailto:` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailtoTarget {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Read a parsed `mailto:` URL.
///
/// The recipient is the first address of the path, or of a `to` query
/// parameter when the path is empty. `Err` carries the reason the URI
/// cannot be used.
pub fn parse_mailto(url: &Url) -> Result<MailtoTarget, String> {
    let mut subject = None;
    let mut body = None;
    let mut to = None;
    for (key, value) in url.query_pairs() {
        match key.to_ascii_lowercase().as_str() {
            "subject" if subject.is_none() => subject = Some(value.into_owned()),
            "body" if body.is_none() => body = Some(value.into_owned()),
            "to" if to.is_none() => to = Some(value.into_owned()),
            _ => {}
        }
    }

    // Malformed escapes are kept as they are.
    let path = percent_decode_str(url.path()).decode_utf8_lossy();
    let recipient = first_address(&path)
        .or_else(|| to.as_deref().and_then(first_address))
        .ok_or_else(|| "mailto URI has no recipient".to_string())?;

    let Some((local, domain)) = recipient.split_once('@') else {
        return Err(format!("recipient '{recipient}' is not an e-mail address"));
    };
    if local.is_empty() || domain.is_empty() {
        return Err(format!("recipient '{recipient}' is incomplete"));
    }

    Ok(MailtoTarget {
        recipient,
        subject: subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
        body: body
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BODY.to_string()),
    })
}

fn first_address(list: &str) -> Option<String> {
    list.split(',')
        .map(str::trim)
        .find(|a| !a.is_empty())
        .map(str::to_string)
}
