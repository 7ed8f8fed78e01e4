//! The per-message input consumed by the pipeline.

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, PartType};
use uuid::Uuid;

use crate::error::ExtractionError;
use crate::extract::headers::HeaderMap;

/// One message as handed over by the mailbox collaborator.
#[derive(Debug, Clone)]
pub struct InboundEmail {
    pub message_id: String,
    pub account_id: String,
    /// Lower-cased sender address.
    pub sender: String,
    pub sent_at: DateTime<Utc>,
    pub headers: HeaderMap,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
}

impl InboundEmail {
    /// Parse a raw RFC 5322 message.
    ///
    /// A missing `Message-ID` is replaced by a generated one and a missing or
    /// invalid `Date` falls back to now.
    pub fn parse(raw: &[u8], account_id: &str) -> Result<Self, ExtractionError> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or(ExtractionError::UnparseableMessage)?;

        let headers: HeaderMap = parsed
            .headers_raw()
            .map(|(name, value)| {
                let value: String = value.chars().filter(|c| *c != '\r' && *c != '\n').collect();
                (name.to_string(), value.trim().to_string())
            })
            .collect();

        let sender = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();

        let message_id = parsed
            .message_id()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

        let sent_at = parsed
            .date()
            .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
            .unwrap_or_else(Utc::now);

        Ok(Self {
            message_id,
            account_id: account_id.to_string(),
            sender,
            sent_at,
            headers,
            html_body: parsed.html_part(0).and_then(|part| match &part.body {
                PartType::Html(html) => Some(html.to_string()),
                _ => None,
            }),
            text_body: parsed.text_part(0).and_then(|part| match &part.body {
                PartType::Text(text) => Some(text.to_string()),
                _ => None,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const RAW: &str = concat!(
        "From: Weekly Deals <Deals@Shop.Test>\r\n",
        "To: me@home.test\r\n",
        "Subject: This week\r\n",
        "Message-ID: <abc123@shop.test>\r\n",
        "Date: Tue, 05 Mar 2024 10:30:00 +0000\r\n",
        "List-Unsubscribe: <https://shop.test/u?id=1>,\r\n",
        " <mailto:leave@shop.test>\r\n",
        "List-Unsubscribe-Post: List-Unsubscribe=One-Click\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "\r\n",
        "Hello there.\r\n",
    );

    #[test]
    fn parses_headers_sender_and_date() {
        let email = InboundEmail::parse(RAW.as_bytes(), "acct-1").unwrap();
        assert_eq!(email.account_id, "acct-1");
        assert_eq!(email.sender, "deals@shop.test");
        assert_eq!(email.message_id, "abc123@shop.test");
        assert_eq!(
            email.sent_at,
            Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap()
        );
        let list = email.headers.get("list-unsubscribe").unwrap();
        assert!(list.contains("<https://shop.test/u?id=1>"));
        assert!(list.contains("<mailto:leave@shop.test>"));
        assert!(email.headers.contains("List-Unsubscribe-Post"));
        assert!(email.text_body.unwrap().contains("Hello there."));
    }

    #[test]
    fn missing_message_id_is_generated() {
        let raw = "From: a@b.test\r\nSubject: x\r\n\r\nbody\r\n";
        let email = InboundEmail::parse(raw.as_bytes(), "acct").unwrap();
        assert!(email.message_id.starts_with("gen-"));
        assert!(email.html_body.is_none());
    }

    #[test]
    fn text_only_message_has_no_html_body() {
        let email = InboundEmail::parse(RAW.as_bytes(), "acct").unwrap();
        assert!(email.text_body.is_some());
        assert!(email.html_body.is_none());
    }

    #[test]
    fn html_only_message_has_no_text_body() {
        let raw = concat!(
            "From: news@shop.test\r\n",
            "Subject: x\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p><a href=\"https://shop.test/u\">Unsubscribe</a></p>\r\n",
        );
        let email = InboundEmail::parse(raw.as_bytes(), "acct").unwrap();
        assert!(email.html_body.unwrap().contains("https://shop.test/u"));
        assert!(email.text_body.is_none());
    }

    #[test]
    fn alternative_parts_fill_both_bodies() {
        let raw = concat!(
            "From: news@shop.test\r\n",
            "Subject: x\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "Plain version\r\n",
            "--b1\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>Html version</p>\r\n",
            "--b1--\r\n",
        );
        let email = InboundEmail::parse(raw.as_bytes(), "acct").unwrap();
        assert!(email.text_body.unwrap().contains("Plain version"));
        assert!(email.html_body.unwrap().contains("Html version"));
    }
}
