//! Error types for the unsubscribe pipeline.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::classify::MethodKind;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Refused: {0}")]
    Safety(#[from] SafetyBlocked),

    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionFailed),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Subscriber {id} not found")]
    SubscriberNotFound { id: String },
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence collaborator failures. Always surfaced, never swallowed.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A candidate or message that could not be read.
///
/// Candidate-level variants are logged and the candidate is dropped;
/// extraction as a whole never fails because of one of them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("List-Unsubscribe entry is not enclosed in angle brackets: {0}")]
    UnbracketedEntry(String),

    #[error("Empty List-Unsubscribe entry")]
    EmptyEntry,

    #[error("Form has no action URL")]
    MissingFormAction,

    #[error("Message could not be parsed as RFC 5322")]
    UnparseableMessage,
}

/// A target refused by the safety validator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsafe unsubscribe target {target}: {}", reasons.join("; "))]
pub struct SafetyBlocked {
    pub target: String,
    pub reasons: Vec<String>,
}

/// A check that failed before any network action was attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionFailed {
    #[error("Subscriber is marked keep")]
    MarkedKeep,

    #[error("Already unsubscribed at {at}")]
    AlreadyUnsubscribed { at: DateTime<Utc> },

    #[error("No unsubscribe target available")]
    NoTarget,

    #[error("Method mismatch: {found} (expected {expected})")]
    WrongMethod { expected: String, found: MethodKind },

    #[error("Max attempts ({max}) reached after {attempts} failed attempts")]
    MaxAttemptsReached { attempts: u32, max: u32 },

    #[error("No credentials available for account {account_id}")]
    MissingCredentials { account_id: String },

    #[error("{kind} methods are never executed automatically: {reason}")]
    NotAutoExecutable { kind: MethodKind, reason: String },
}

/// Network, timeout or mail-submission failure during a real execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out after {}s", after.as_secs())]
    Timeout { after: Duration },

    #[error("Connection error: {0}")]
    Connect(String),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("SMTP connection error: {0}")]
    SmtpConnect(String),

    #[error("SMTP authentication error: {0}")]
    SmtpAuth(String),

    #[error("SMTP send error: {0}")]
    SmtpSend(String),
}

impl TransportError {
    /// Response code worth recording on the attempt, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Why a single execution request was turned down before acting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Refusal {
    #[error(transparent)]
    Safety(#[from] SafetyBlocked),

    #[error(transparent)]
    Precondition(#[from] PreconditionFailed),
}

impl From<Refusal> for Error {
    fn from(refusal: Refusal) -> Self {
        match refusal {
            Refusal::Safety(e) => Error::Safety(e),
            Refusal::Precondition(e) => Error::Precondition(e),
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_blocked_lists_every_reason() {
        let err = SafetyBlocked {
            target: "https://x.test/delete".into(),
            reasons: vec!["dangerous token 'delete'".into(), "bad ext".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("dangerous token 'delete'; bad ext"));
    }

    #[test]
    fn refusal_maps_to_distinct_top_level_variants() {
        let err: Error = Refusal::Precondition(PreconditionFailed::MarkedKeep).into();
        assert!(matches!(err, Error::Precondition(PreconditionFailed::MarkedKeep)));

        let err: Error = Refusal::Safety(SafetyBlocked {
            target: "javascript:alert(1)".into(),
            reasons: vec!["javascript scheme".into()],
        })
        .into();
        assert!(matches!(err, Error::Safety(_)));
    }

    #[test]
    fn timeout_message_reports_seconds() {
        let err = TransportError::Timeout {
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Request timed out after 30s");
        assert_eq!(err.status_code(), None);
    }
}
