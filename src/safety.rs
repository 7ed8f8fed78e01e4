//! Safety checks run before any network-affecting action.
//!
//! There is no allow-list: every domain is eligible unless a pattern
//! blocks it. Blocking findings turn into a [`SafetyBlocked`] refusal;
//! warnings are logged and reported but never stop execution.

use reqwest::Url;
use serde::Serialize;
use tracing::warn;

use crate::classify::ClassifiedMethod;
use crate::config::SafetyConfig;
use crate::error::SafetyBlocked;

/// What to do when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Warn,
    Block,
}

/// Outcome of assessing one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SafetyAssessment {
    pub blocking_reasons: Vec<String>,
    pub warnings: Vec<String>,
}

impl SafetyAssessment {
    fn record(&mut self, action: PolicyAction, reason: String) {
        match action {
            PolicyAction::Block => self.blocking_reasons.push(reason),
            PolicyAction::Warn => self.warnings.push(reason),
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.blocking_reasons.is_empty()
    }

    /// `Err` with every blocking reason, or `Ok` when nothing blocks.
    pub fn into_refusal(self, target: &str) -> Result<Vec<String>, SafetyBlocked> {
        if self.is_blocked() {
            Err(SafetyBlocked {
                target: target.to_string(),
                reasons: self.blocking_reasons,
            })
        } else {
            Ok(self.warnings)
        }
    }
}

/// Pattern-based target validator.
#[derive(Debug, Clone, Default)]
pub struct SafetyValidator {
    config: SafetyConfig,
}

impl SafetyValidator {
    pub fn new(config: SafetyConfig) -> Self {
        let config = SafetyConfig {
            dangerous_tokens: lowercase(config.dangerous_tokens),
            blocked_extensions: lowercase(config.blocked_extensions),
            shortener_hosts: lowercase(config.shortener_hosts),
        };
        Self { config }
    }

    pub fn assess(&self, method: &ClassifiedMethod) -> SafetyAssessment {
        let mut assessment = self.assess_target(method.target());
        if let ClassifiedMethod::EmailReply { recipient, .. } = method
            && recipient.trim().is_empty()
        {
            assessment.record(PolicyAction::Block, "mail recipient is empty".into());
        }
        for warning in &assessment.warnings {
            warn!(
                target_url = %crate::redact::redact_url(method.target()),
                warning = %warning,
                "Safety warning"
            );
        }
        assessment
    }

    /// Assess a bare URL or `mailto:` URI.
    pub fn assess_target(&self, target: &str) -> SafetyAssessment {
        let mut out = SafetyAssessment::default();
        let trimmed = target.trim();

        if trimmed.is_empty() {
            out.record(PolicyAction::Block, "target is empty".into());
            return out;
        }
        if trimmed
            .get(..11)
            .is_some_and(|p| p.eq_ignore_ascii_case("javascript:"))
        {
            out.record(
                PolicyAction::Block,
                "javascript: URIs execute script and are never followed".into(),
            );
            return out;
        }

        let url = match Url::parse(trimmed) {
            Ok(url) => url,
            Err(e) => {
                out.record(PolicyAction::Block, format!("target is not a valid absolute URL: {e}"));
                return out;
            }
        };

        match url.scheme() {
            "mailto" => {
                let recipient = url.path().split(',').next().unwrap_or("").trim();
                let has_query_recipient = url
                    .query_pairs()
                    .any(|(k, v)| k.eq_ignore_ascii_case("to") && !v.trim().is_empty());
                if recipient.is_empty() && !has_query_recipient {
                    out.record(PolicyAction::Block, "mailto URI has no recipient".into());
                }
            }
            scheme @ ("http" | "https") => {
                let host = url.host_str().unwrap_or("").to_ascii_lowercase();
                if host.is_empty() {
                    out.record(PolicyAction::Block, "URL has no host".into());
                }
                self.check_path_and_query(&url, &mut out);
                if scheme == "http" {
                    out.record(
                        PolicyAction::Warn,
                        "insecure connection: http instead of https".into(),
                    );
                }
                if self.is_shortener(&host) {
                    out.record(
                        PolicyAction::Warn,
                        format!("URL shortener host '{host}' hides the real destination"),
                    );
                }
            }
            other => out.record(
                PolicyAction::Block,
                format!("scheme '{other}' is not one of http, https, mailto"),
            ),
        }

        out
    }

    fn check_path_and_query(&self, url: &Url, out: &mut SafetyAssessment) {
        let path = url.path().to_ascii_lowercase();
        let query = url.query().unwrap_or("").to_ascii_lowercase();

        for token in &self.config.dangerous_tokens {
            if path.contains(token.as_str()) || query.contains(token.as_str()) {
                out.record(
                    PolicyAction::Block,
                    format!("dangerous token '{token}' in path or query"),
                );
            }
        }
        for ext in &self.config.blocked_extensions {
            if path.ends_with(ext.as_str()) {
                out.record(PolicyAction::Block, format!("links to a '{ext}' file"));
            }
        }
    }

    fn is_shortener(&self, host: &str) -> bool {
        self.config.shortener_hosts.iter().any(|s| {
            host == s
                || host
                    .strip_suffix(s.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

fn lowercase(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}
