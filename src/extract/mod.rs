//! Unsubscribe candidate discovery.
//!
//! Candidates come from three places, in this order of precedence:
//! `List-Unsubscribe` headers (flagged one-click when `List-Unsubscribe-Post`
//! advertises it), anchors and POST forms in the HTML body, and bare URLs or
//! addresses near an intent keyword in the text body. A malformed entry is
//! logged and dropped; extraction itself never fails.

pub mod headers;
pub mod html;
pub mod message;
pub mod qp;
pub mod text;

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use headers::HeaderMap;
pub use message::InboundEmail;

use headers::{LIST_UNSUBSCRIBE, advertises_one_click, parse_list_unsubscribe};

static INTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)unsubscribe|opt[\s_-]?out|remove[\s_-]?me\b|manage[\s_-]?preferences").unwrap()
});

/// Default number of bytes searched on either side of a body URL.
pub const DEFAULT_INTENT_WINDOW: usize = 100;

/// Whether `text` contains one of the unsubscribe-intent keywords.
pub fn has_unsubscribe_intent(text: &str) -> bool {
    INTENT_RE.is_match(text)
}

/// Where a candidate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    HeaderListUnsubscribe,
    /// A `List-Unsubscribe` URI whose message also advertised RFC 8058 one-click.
    HeaderListUnsubscribePost,
    HtmlBody,
    TextBody,
}

impl CandidateSource {
    pub fn is_header(self) -> bool {
        matches!(
            self,
            Self::HeaderListUnsubscribe | Self::HeaderListUnsubscribePost
        )
    }
}

/// What a POST form carries besides its action URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormContext {
    pub hidden_fields: BTreeMap<String, String>,
    /// Set when the form needs a human choice (checkbox, radio, multi-option select).
    pub selection_required: Option<String>,
}

/// A raw, unclassified unsubscribe directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeCandidate {
    pub source: CandidateSource,
    pub raw_value: String,
    /// Position among all candidates of the same message, starting at 0.
    pub discovery_order: usize,
    pub form: Option<FormContext>,
}

impl UnsubscribeCandidate {
    pub fn is_one_click(&self) -> bool {
        self.source == CandidateSource::HeaderListUnsubscribePost
    }
}

/// Finds unsubscribe candidates in headers and bodies.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    intent_window: usize,
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self {
            intent_window: DEFAULT_INTENT_WINDOW,
        }
    }
}

impl LinkExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distance, in bytes, within which a keyword qualifies a body URL.
    pub fn with_intent_window(mut self, window: usize) -> Self {
        self.intent_window = window;
        self
    }

    /// Candidates for an [`InboundEmail`].
    pub fn extract_email(&self, email: &InboundEmail) -> Vec<UnsubscribeCandidate> {
        self.extract(
            &email.headers,
            email.html_body.as_deref(),
            email.text_body.as_deref(),
        )
    }

    /// Collect candidates in precedence order.
    ///
    /// Every well-formed header URI is kept, in header order. A body
    /// candidate whose raw value was already seen is dropped.
    pub fn extract(
        &self,
        headers: &HeaderMap,
        html: Option<&str>,
        text: Option<&str>,
    ) -> Vec<UnsubscribeCandidate> {
        let one_click = advertises_one_click(headers);
        let mut out: Vec<UnsubscribeCandidate> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for value in headers.get_all(LIST_UNSUBSCRIBE) {
            for entry in parse_list_unsubscribe(value) {
                match entry {
                    Ok(uri) => {
                        let source = if one_click && is_http(&uri) {
                            CandidateSource::HeaderListUnsubscribePost
                        } else {
                            CandidateSource::HeaderListUnsubscribe
                        };
                        seen.insert(uri.clone());
                        push(&mut out, source, uri, None);
                    }
                    Err(e) => debug!(error = %e, "Dropping List-Unsubscribe entry"),
                }
            }
        }

        if let Some(html) = html {
            for link in html::scan_html(html, self.intent_window) {
                if seen.insert(link.value.clone()) {
                    push(&mut out, CandidateSource::HtmlBody, link.value, link.form);
                }
            }
        }

        if let Some(text) = text {
            for url in text::scan_text(text, self.intent_window) {
                if seen.insert(url.clone()) {
                    push(&mut out, CandidateSource::TextBody, url, None);
                }
            }
        }

        debug!(count = out.len(), one_click, "Extracted unsubscribe candidates");
        out
    }
}

fn push(
    out: &mut Vec<UnsubscribeCandidate>,
    source: CandidateSource,
    raw_value: String,
    form: Option<FormContext>,
) {
    let discovery_order = out.len();
    out.push(UnsubscribeCandidate {
        source,
        raw_value,
        discovery_order,
        form,
    });
}

fn is_http(uri: &str) -> bool {
    let lower = uri.get(..8).unwrap_or(uri).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
