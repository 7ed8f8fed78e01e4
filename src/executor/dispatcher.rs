//! Routes a subscriber's active method to the executor for its kind and
//! records the outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::classify::{ClassifiedMethod, MethodKind};
use crate::config::{AppConfig, ExecutorConfig};
use crate::credentials::CredentialResolver;
use crate::error::{Error, PreconditionFailed, Refusal};
use crate::executor::{
    AttemptStatus, ExecutionOutcome, ExecutionRequest, Executor, HttpGetExecutor,
    HttpPostExecutor, MailReplyExecutor, SmtpSubmitter, check_preconditions,
};
use crate::safety::SafetyValidator;
use crate::store::SubscriberStore;

/// Tally of a batch run.
#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub dry_run: usize,
    pub refused: usize,
    /// Subscribers whose run hit a persistence or lookup error.
    pub errors: Vec<(Uuid, String)>,
    /// Set when the cancel flag stopped the batch early.
    pub cancelled: bool,
}

/// One executor per protocol plus the store that receives outcomes.
pub struct Dispatcher {
    store: Arc<dyn SubscriberStore>,
    config: ExecutorConfig,
    safety: Arc<SafetyValidator>,
    http_get: HttpGetExecutor,
    http_post: HttpPostExecutor,
    mail_reply: MailReplyExecutor,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn SubscriberStore>,
        config: ExecutorConfig,
        safety: Arc<SafetyValidator>,
        http_get: HttpGetExecutor,
        http_post: HttpPostExecutor,
        mail_reply: MailReplyExecutor,
    ) -> Self {
        Self {
            store,
            config,
            safety,
            http_get,
            http_post,
            mail_reply,
        }
    }

    /// Wire up every executor from application config.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn SubscriberStore>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Result<Self, Error> {
        let safety = Arc::new(SafetyValidator::new(config.safety.clone()));
        let executor = config.executor.clone();
        let submitter = Arc::new(SmtpSubmitter::new(config.smtp.clone(), executor.timeout));
        Ok(Self::new(
            store,
            executor.clone(),
            safety.clone(),
            HttpGetExecutor::new(executor.clone(), safety.clone())?,
            HttpPostExecutor::new(executor.clone(), safety.clone())?,
            MailReplyExecutor::new(executor, safety, credentials, submitter),
        ))
    }

    /// Run the request through the executor matching its method kind.
    pub async fn dispatch(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, Refusal> {
        let executor: &dyn Executor = match request.method().map(ClassifiedMethod::kind) {
            Some(MethodKind::HttpGet) => &self.http_get,
            Some(MethodKind::HttpPost | MethodKind::OneClick) => &self.http_post,
            Some(MethodKind::EmailReply) => &self.mail_reply,
            Some(MethodKind::Invalid | MethodKind::ManualIntervention) | None => {
                // No executor takes these; the shared checks produce the refusal.
                let checked = check_preconditions(
                    request,
                    &[],
                    "an executable method",
                    &self.config,
                    &self.safety,
                );
                return Err(match checked {
                    Err(refusal) => refusal,
                    Ok(_) => PreconditionFailed::NoTarget.into(),
                });
            }
        };
        executor.execute(request).await
    }

    /// Unsubscribe one stored subscriber and record the attempt.
    ///
    /// Dry runs are reported but never persisted. A successful real run
    /// marks the subscriber unsubscribed.
    pub async fn unsubscribe(&self, subscriber_id: Uuid) -> Result<ExecutionOutcome, Error> {
        let subscriber = self
            .store
            .get_subscriber(subscriber_id)
            .await?
            .ok_or_else(|| Error::SubscriberNotFound {
                id: subscriber_id.to_string(),
            })?;
        let failed_attempts = self.store.count_failed_attempts(subscriber_id).await?;
        let request = ExecutionRequest {
            subscriber,
            failed_attempts,
        };

        let outcome = match self.dispatch(&request).await {
            Ok(outcome) => outcome,
            Err(refusal) => {
                info!(subscriber_id = %subscriber_id, reason = %refusal, "Unsubscribe refused");
                return Err(refusal.into());
            }
        };

        if outcome.is_dry_run() {
            return Ok(outcome);
        }

        self.store.record_attempt(&outcome.attempt).await?;
        if outcome.is_success() {
            self.store
                .mark_unsubscribed(subscriber_id, outcome.attempt.attempted_at)
                .await?;
        }
        Ok(outcome)
    }

    /// Unsubscribe many subscribers in order, `chunk_size` at a time.
    ///
    /// `cancel` is checked between chunks; attempts recorded before it was
    /// set stay recorded.
    pub async fn unsubscribe_batch(
        &self,
        subscriber_ids: &[Uuid],
        chunk_size: usize,
        cancel: &AtomicBool,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for chunk in subscriber_ids.chunks(chunk_size.max(1)) {
            if cancel.load(Ordering::Relaxed) {
                warn!(
                    remaining = subscriber_ids.len() - report.total(),
                    "Unsubscribe batch cancelled"
                );
                report.cancelled = true;
                break;
            }
            for &id in chunk {
                match self.unsubscribe(id).await {
                    Ok(outcome) => match outcome.status() {
                        AttemptStatus::Success => report.succeeded += 1,
                        AttemptStatus::Failed => report.failed += 1,
                        AttemptStatus::DryRun => report.dry_run += 1,
                    },
                    Err(Error::Precondition(_) | Error::Safety(_)) => report.refused += 1,
                    Err(e) => {
                        error!(
                            subscriber_id = %id,
                            error = %e,
                            "Unsubscribe could not be completed"
                        );
                        report.errors.push((id, e.to_string()));
                    }
                }
            }
        }
        report
    }
}

impl BatchReport {
    /// Subscribers processed, whatever the result.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.dry_run + self.refused + self.errors.len()
    }
}
