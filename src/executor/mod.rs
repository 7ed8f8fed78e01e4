//! Executors: perform one unsubscribe action under shared preconditions.
//!
//! Every executor runs the same checks, in the same order, before touching
//! the network (see [`check_preconditions`]). A failed check is a
//! [`Refusal`]; a network failure is an `Ok` outcome with status
//! [`AttemptStatus::Failed`] so the caller can record it.

pub mod dispatcher;
pub mod http_get;
pub mod http_post;
pub mod mail_reply;
pub mod rate_limiter;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::{ClassifiedMethod, MethodKind};
use crate::config::ExecutorConfig;
use crate::error::{PreconditionFailed, Refusal, TransportError};
use crate::safety::SafetyValidator;
use crate::store::Subscriber;

pub use dispatcher::{BatchReport, Dispatcher};
pub use http_get::HttpGetExecutor;
pub use http_post::HttpPostExecutor;
pub use mail_reply::{MailReplyExecutor, MailSubmitter, SmtpSubmitter};
pub use rate_limiter::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
    DryRun,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::DryRun => "dry_run",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "dry_run" => Ok(Self::DryRun),
            other => Err(format!("unknown attempt status: {other}")),
        }
    }
}

/// Audit record of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeAttempt {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub method_used: MethodKind,
    pub target: String,
    pub status: AttemptStatus,
    pub attempted_at: DateTime<Utc>,
    pub response_code: Option<u16>,
    pub error_message: Option<String>,
}

impl UnsubscribeAttempt {
    pub fn new(
        subscriber_id: Uuid,
        method_used: MethodKind,
        target: &str,
        status: AttemptStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscriber_id,
            method_used,
            target: target.to_string(),
            status,
            attempted_at: Utc::now(),
            response_code: None,
            error_message: None,
        }
    }
}

/// What an executor reports back for one request.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub attempt: UnsubscribeAttempt,
    /// Human-readable summary of what was done (or would be done).
    pub description: String,
    pub warnings: Vec<String>,
    pub error: Option<TransportError>,
}

impl ExecutionOutcome {
    pub fn status(&self) -> AttemptStatus {
        self.attempt.status
    }

    pub fn is_success(&self) -> bool {
        self.attempt.status == AttemptStatus::Success
    }

    pub fn is_dry_run(&self) -> bool {
        self.attempt.status == AttemptStatus::DryRun
    }

    pub(crate) fn dry_run(
        subscriber_id: Uuid,
        method: &ClassifiedMethod,
        description: String,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            attempt: UnsubscribeAttempt::new(
                subscriber_id,
                method.kind(),
                method.target(),
                AttemptStatus::DryRun,
            ),
            description,
            warnings,
            error: None,
        }
    }

    pub(crate) fn finished(
        subscriber_id: Uuid,
        method: &ClassifiedMethod,
        result: Result<Option<u16>, TransportError>,
        description: String,
        warnings: Vec<String>,
    ) -> Self {
        let (status, response_code, error) = match result {
            Ok(code) => (AttemptStatus::Success, code, None),
            Err(e) => (AttemptStatus::Failed, e.status_code(), Some(e)),
        };
        let mut attempt =
            UnsubscribeAttempt::new(subscriber_id, method.kind(), method.target(), status);
        attempt.response_code = response_code;
        attempt.error_message = error.as_ref().map(ToString::to_string);
        Self {
            attempt,
            description,
            warnings,
            error,
        }
    }
}

/// One subscriber and the state the preconditions need.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub subscriber: Subscriber,
    /// Failed attempts already recorded for this subscriber.
    pub failed_attempts: u32,
}

impl ExecutionRequest {
    pub fn method(&self) -> Option<&ClassifiedMethod> {
        self.subscriber.active_method.as_ref()
    }
}

/// A protocol-specific executor.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Method kinds this executor performs.
    fn accepts(&self) -> &'static [MethodKind];

    /// Check preconditions, then act (or describe the action in dry-run).
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, Refusal>;
}

/// The checks every executor runs, in order, stopping at the first failure.
///
/// Returns the method to act on and any safety warnings.
pub fn check_preconditions<'r>(
    request: &'r ExecutionRequest,
    accepts: &[MethodKind],
    expected: &str,
    config: &ExecutorConfig,
    safety: &SafetyValidator,
) -> Result<(&'r ClassifiedMethod, Vec<String>), Refusal> {
    let subscriber = &request.subscriber;
    if subscriber.keep {
        return Err(Refusal::Precondition(PreconditionFailed::MarkedKeep));
    }
    if let Some(at) = subscriber.unsubscribed_at {
        return Err(PreconditionFailed::AlreadyUnsubscribed { at }.into());
    }
    let method = request
        .method()
        .filter(|m| !m.target().trim().is_empty())
        .ok_or(PreconditionFailed::NoTarget)?;

    let kind = method.kind();
    if !kind.is_executable() {
        return Err(PreconditionFailed::NotAutoExecutable {
            kind,
            reason: method.reason().unwrap_or("no reason given").to_string(),
        }
        .into());
    }
    if !accepts.contains(&kind) {
        return Err(PreconditionFailed::WrongMethod {
            expected: expected.to_string(),
            found: kind,
        }
        .into());
    }
    if request.failed_attempts >= config.max_attempts {
        return Err(PreconditionFailed::MaxAttemptsReached {
            attempts: request.failed_attempts,
            max: config.max_attempts,
        }
        .into());
    }

    let warnings = safety.assess(method).into_refusal(method.target())?;
    Ok((method, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyConfig;

    fn request(method: Option<ClassifiedMethod>) -> ExecutionRequest {
        let mut subscriber = Subscriber::new("acct", "news@shop.test");
        subscriber.active_method = method;
        ExecutionRequest {
            subscriber,
            failed_attempts: 0,
        }
    }

    fn get(url: &str) -> ClassifiedMethod {
        ClassifiedMethod::HttpGet { url: url.into() }
    }

    fn check(req: &ExecutionRequest) -> Result<MethodKind, Refusal> {
        check_preconditions(
            req,
            &[MethodKind::HttpGet],
            "http_get",
            &ExecutorConfig::default(),
            &SafetyValidator::new(SafetyConfig::default()),
        )
        .map(|(m, _)| m.kind())
    }

    #[test]
    fn keep_wins_over_everything_else() {
        let mut req = request(Some(get("https://shop.test/delete")));
        req.subscriber.keep = true;
        req.subscriber.unsubscribed_at = Some(Utc::now());
        req.failed_attempts = 9;
        assert_eq!(check(&req), Err(Refusal::Precondition(PreconditionFailed::MarkedKeep)));
    }

    #[test]
    fn already_unsubscribed_comes_second() {
        let mut req = request(None);
        req.subscriber.unsubscribed_at = Some(Utc::now());
        assert!(matches!(
            check(&req),
            Err(Refusal::Precondition(PreconditionFailed::AlreadyUnsubscribed { .. }))
        ));
    }

    #[test]
    fn missing_or_blank_target() {
        assert_eq!(
            check(&request(None)),
            Err(Refusal::Precondition(PreconditionFailed::NoTarget))
        );
        assert_eq!(
            check(&request(Some(get("  ")))),
            Err(Refusal::Precondition(PreconditionFailed::NoTarget))
        );
    }

    #[test]
    fn wrong_kind_and_manual_kinds() {
        let reply = ClassifiedMethod::EmailReply {
            target: "mailto:a@b.test".into(),
            recipient: "a@b.test".into(),
            subject: "Unsubscribe".into(),
            body: "x".into(),
        };
        assert!(matches!(
            check(&request(Some(reply))),
            Err(Refusal::Precondition(PreconditionFailed::WrongMethod {
                found: MethodKind::EmailReply,
                ..
            }))
        ));

        let manual = ClassifiedMethod::ManualIntervention {
            target: "https://shop.test/prefs".into(),
            reason: "pick lists".into(),
        };
        assert!(matches!(
            check(&request(Some(manual))),
            Err(Refusal::Precondition(PreconditionFailed::NotAutoExecutable { .. }))
        ));
    }

    #[test]
    fn attempt_limit_is_checked_before_safety() {
        let mut req = request(Some(get("https://shop.test/delete")));
        req.failed_attempts = 3;
        assert_eq!(
            check(&req),
            Err(Refusal::Precondition(PreconditionFailed::MaxAttemptsReached {
                attempts: 3,
                max: 3
            }))
        );
        req.failed_attempts = 2;
        assert!(matches!(check(&req), Err(Refusal::Safety(_))));
    }

    #[test]
    fn clean_request_passes_with_warnings() {
        let req = request(Some(get("http://shop.test/unsubscribe")));
        let (method, warnings) = check_preconditions(
            &req,
            &[MethodKind::HttpGet],
            "http_get",
            &ExecutorConfig::default(),
            &SafetyValidator::default(),
        )
        .unwrap();
        assert_eq!(method.kind(), MethodKind::HttpGet);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn failed_outcome_keeps_status_code_and_message() {
        let method = get("https://shop.test/u");
        let outcome = ExecutionOutcome::finished(
            Uuid::new_v4(),
            &method,
            Err(TransportError::HttpStatus {
                status: 503,
                body: "busy".into(),
            }),
            "GET".into(),
            vec![],
        );
        assert_eq!(outcome.status(), AttemptStatus::Failed);
        assert_eq!(outcome.attempt.response_code, Some(503));
        assert!(outcome.attempt.error_message.unwrap().contains("503"));
    }
}
