//! Message ingestion: extract → classify → resolve against history.
//!
//! Each inbound message is handled as one sequence:
//! 1. `LinkExtractor::extract_email()` gathers candidates in discovery order
//! 2. `MethodClassifier::classify_all()` assigns kinds and picks the primary
//! 3. The primary is appended to the sender's method history
//! 4. The subscriber's projection is refreshed from the newest history entry
//!
//! Nothing here contacts a sender; execution lives in `executor`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classify::{ClassifiedMethod, MethodClassifier, UnsubscribeExtraction};
use crate::config::PipelineConfig;
use crate::error::Error;
use crate::extract::{InboundEmail, LinkExtractor};
use crate::store::SubscriberStore;

/// Result of ingesting one message.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub message_id: String,
    pub extraction: UnsubscribeExtraction,
    /// Set when the message carried a primary method.
    pub subscriber_id: Option<Uuid>,
    /// `false` when this message and send time were already in the history.
    pub history_appended: bool,
    /// The subscriber's active method after this message.
    pub active_method: Option<ClassifiedMethod>,
}

/// Tally of a batch ingest.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    pub processed: usize,
    /// Messages that produced a new history entry.
    pub recorded: usize,
    /// Messages without any executable method.
    pub without_method: usize,
    pub failures: Vec<(String, String)>,
    pub cancelled: bool,
}

pub struct Pipeline {
    store: Arc<dyn SubscriberStore>,
    extractor: LinkExtractor,
    classifier: MethodClassifier,
    batch_size: usize,
}

impl Pipeline {
    pub fn new(store: Arc<dyn SubscriberStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            extractor: LinkExtractor::new(),
            classifier: MethodClassifier::new(),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Extract and classify without touching the store.
    pub fn analyze(&self, email: &InboundEmail) -> UnsubscribeExtraction {
        let candidates = self.extractor.extract_email(email);
        self.classifier.classify_all(&candidates)
    }

    /// Ingest one message. Re-ingesting the same message is a no-op for
    /// history and projection.
    pub async fn ingest(&self, email: &InboundEmail) -> Result<IngestOutcome, Error> {
        let extraction = self.analyze(email);
        let mut outcome = IngestOutcome {
            message_id: email.message_id.clone(),
            extraction,
            subscriber_id: None,
            history_appended: false,
            active_method: None,
        };

        let Some(primary) = outcome.extraction.primary_method.clone() else {
            debug!(
                message_id = %email.message_id,
                candidates = outcome.extraction.total_methods,
                "No executable unsubscribe method"
            );
            return Ok(outcome);
        };

        let subscriber = self
            .store
            .find_or_create_subscriber(&email.account_id, &email.sender)
            .await?;
        outcome.subscriber_id = Some(subscriber.id);

        outcome.history_appended = self
            .store
            .append_history(subscriber.id, &primary, &email.message_id, email.sent_at)
            .await?;

        let history = self.store.method_history(subscriber.id).await?;
        let active = history.active().map(|entry| entry.method.clone());
        if active != subscriber.active_method {
            self.store
                .update_projection(subscriber.id, active.as_ref())
                .await?;
        }

        info!(
            subscriber_id = %subscriber.id,
            message_id = %email.message_id,
            primary = %primary.kind(),
            active = ?active.as_ref().map(ClassifiedMethod::kind),
            appended = outcome.history_appended,
            "Message ingested"
        );
        outcome.active_method = active;
        Ok(outcome)
    }

    /// Ingest messages in chunks, checking `cancel` between chunks.
    ///
    /// A failing message is logged and counted; the batch carries on.
    pub async fn ingest_batch(
        &self,
        emails: &[InboundEmail],
        cancel: &AtomicBool,
    ) -> IngestReport {
        let mut report = IngestReport::default();
        for chunk in emails.chunks(self.batch_size) {
            if cancel.load(Ordering::Relaxed) {
                warn!(remaining = emails.len() - report.processed, "Ingest batch cancelled");
                report.cancelled = true;
                break;
            }
            for email in chunk {
                report.processed += 1;
                match self.ingest(email).await {
                    Ok(outcome) if outcome.subscriber_id.is_none() => report.without_method += 1,
                    Ok(outcome) => {
                        if outcome.history_appended {
                            report.recorded += 1;
                        }
                    }
                    Err(e) => {
                        error!(
                            message_id = %email.message_id,
                            error = %e,
                            "Failed to ingest message"
                        );
                        report.failures.push((email.message_id.clone(), e.to_string()));
                    }
                }
            }
        }
        info!(
            processed = report.processed,
            recorded = report.recorded,
            failed = report.failures.len(),
            "Ingest batch finished"
        );
        report
    }
}
