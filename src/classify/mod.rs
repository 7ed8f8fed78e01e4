//! Method classification: candidate → method kind + normalized target.

pub mod mailto;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extract::UnsubscribeCandidate;

/// The closed set of unsubscribe mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    OneClick,
    HttpPost,
    HttpGet,
    EmailReply,
    Invalid,
    ManualIntervention,
}

impl MethodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneClick => "one_click",
            Self::HttpPost => "http_post",
            Self::HttpGet => "http_get",
            Self::EmailReply => "email_reply",
            Self::Invalid => "invalid",
            Self::ManualIntervention => "manual_intervention",
        }
    }

    /// Rank used for primary-method selection. `None` means never primary.
    pub fn priority(self) -> Option<u8> {
        match self {
            Self::OneClick => Some(4),
            Self::HttpPost => Some(3),
            Self::HttpGet => Some(2),
            Self::EmailReply => Some(1),
            Self::Invalid | Self::ManualIntervention => None,
        }
    }

    pub fn is_executable(self) -> bool {
        self.priority().is_some()
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one_click" => Ok(Self::OneClick),
            "http_post" => Ok(Self::HttpPost),
            "http_get" => Ok(Self::HttpGet),
            "email_reply" => Ok(Self::EmailReply),
            "invalid" => Ok(Self::Invalid),
            "manual_intervention" => Ok(Self::ManualIntervention),
            other => Err(format!("unknown method kind: {other}")),
        }
    }
}

/// A candidate with its kind and normalized target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifiedMethod {
    /// RFC 8058 one-click POST.
    OneClick { url: String },
    HttpPost {
        url: String,
        form_fields: BTreeMap<String, String>,
    },
    HttpGet { url: String },
    EmailReply {
        /// The original `mailto:` URI.
        target: String,
        recipient: String,
        subject: String,
        body: String,
    },
    Invalid { target: String, reason: String },
    ManualIntervention { target: String, reason: String },
}

impl ClassifiedMethod {
    pub fn kind(&self) -> MethodKind {
        match self {
            Self::OneClick { .. } => MethodKind::OneClick,
            Self::HttpPost { .. } => MethodKind::HttpPost,
            Self::HttpGet { .. } => MethodKind::HttpGet,
            Self::EmailReply { .. } => MethodKind::EmailReply,
            Self::Invalid { .. } => MethodKind::Invalid,
            Self::ManualIntervention { .. } => MethodKind::ManualIntervention,
        }
    }

    /// URL or `mailto:` URI the method acts on.
    pub fn target(&self) -> &str {
        match self {
            Self::OneClick { url } | Self::HttpPost { url, .. } | Self::HttpGet { url } => url,
            Self::EmailReply { target, .. }
            | Self::Invalid { target, .. }
            | Self::ManualIntervention { target, .. } => target,
        }
    }

    pub fn form_fields(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::HttpPost { form_fields, .. } => Some(form_fields),
            _ => None,
        }
    }

    /// Why the method cannot be executed automatically.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Invalid { reason, .. } | Self::ManualIntervention { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Every classified method of one message plus its primary method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeExtraction {
    /// In candidate discovery order, including invalid and manual entries.
    pub methods: Vec<ClassifiedMethod>,
    pub primary_method: Option<ClassifiedMethod>,
    pub total_methods: usize,
}

impl UnsubscribeExtraction {
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Assigns a [`MethodKind`] to candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodClassifier;

impl MethodClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one candidate. Never fails; unusable input becomes `Invalid`.
    pub fn classify(&self, candidate: &UnsubscribeCandidate) -> ClassifiedMethod {
        let raw = candidate.raw_value.trim();
        let invalid = |reason: String| ClassifiedMethod::Invalid {
            target: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return invalid("empty target".into());
        }

        if !has_scheme(raw) {
            return invalid(format!("relative URL '{raw}' cannot be resolved"));
        }
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => return invalid(format!("unparseable URL: {e}")),
        };

        match url.scheme() {
            "mailto" => match mailto::parse_mailto(&url) {
                Ok(m) => ClassifiedMethod::EmailReply {
                    target: raw.to_string(),
                    recipient: m.recipient,
                    subject: m.subject,
                    body: m.body,
                },
                Err(reason) => invalid(reason),
            },
            "http" | "https" => {
                if url.host_str().is_none_or(str::is_empty) {
                    return invalid("URL has an empty host".into());
                }
                let url_str = raw.to_string();
                if let Some(form) = &candidate.form {
                    return match &form.selection_required {
                        Some(reason) => ClassifiedMethod::ManualIntervention {
                            target: url_str,
                            reason: reason.clone(),
                        },
                        None => ClassifiedMethod::HttpPost {
                            url: url_str,
                            form_fields: form.hidden_fields.clone(),
                        },
                    };
                }
                if candidate.is_one_click() {
                    ClassifiedMethod::OneClick { url: url_str }
                } else {
                    ClassifiedMethod::HttpGet { url: url_str }
                }
            }
            other => invalid(format!("unsupported scheme '{other}'")),
        }
    }

    /// Classify every candidate of one message and pick its primary method.
    ///
    /// The primary method is the highest-priority executable method; among
    /// equals the earliest-discovered one wins.
    pub fn classify_all(&self, candidates: &[UnsubscribeCandidate]) -> UnsubscribeExtraction {
        let methods: Vec<ClassifiedMethod> = candidates.iter().map(|c| self.classify(c)).collect();

        let mut primary: Option<(u8, &ClassifiedMethod)> = None;
        for method in &methods {
            let Some(rank) = method.kind().priority() else {
                debug!(
                    kind = %method.kind(),
                    reason = method.reason().unwrap_or(""),
                    "Method not eligible as primary"
                );
                continue;
            };
            if primary.is_none_or(|(best, _)| rank > best) {
                primary = Some((rank, method));
            }
        }

        UnsubscribeExtraction {
            primary_method: primary.map(|(_, m)| m.clone()),
            total_methods: methods.len(),
            methods,
        }
    }
}

/// `scheme ":"` prefix per RFC 3986.
fn has_scheme(raw: &str) -> bool {
    let Some((scheme, _)) = raw.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
