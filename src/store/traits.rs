//! `SubscriberStore` trait and the records it persists.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::{ClassifiedMethod, MethodKind};
use crate::error::DatabaseError;
use crate::executor::UnsubscribeAttempt;
use crate::history::MethodHistory;

/// One sender as seen from one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: Uuid,
    pub account_id: String,
    pub sender: String,
    /// The user asked never to unsubscribe from this sender.
    pub keep: bool,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    /// Projection of the method history: the current active method.
    pub active_method: Option<ClassifiedMethod>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn new(account_id: &str, sender: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            sender: sender.to_ascii_lowercase(),
            keep: false,
            unsubscribed_at: None,
            active_method: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn unsubscribe_method(&self) -> Option<MethodKind> {
        self.active_method.as_ref().map(ClassifiedMethod::kind)
    }

    pub fn unsubscribe_link(&self) -> Option<&str> {
        self.active_method.as_ref().map(ClassifiedMethod::target)
    }

    /// Derived lifecycle state given the failed-attempt count.
    pub fn state(&self, failed_attempts: u32, max_attempts: u32) -> SubscriberState {
        if self.unsubscribed_at.is_some() {
            SubscriberState::Unsubscribed
        } else if self.keep {
            SubscriberState::Kept
        } else if failed_attempts >= max_attempts {
            SubscriberState::MaxAttemptsReached
        } else if failed_attempts > 0 {
            SubscriberState::Failed {
                attempts: failed_attempts,
            }
        } else {
            SubscriberState::NeverAttempted
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubscriberState {
    NeverAttempted,
    Failed { attempts: u32 },
    Unsubscribed,
    MaxAttemptsReached,
    Kept,
}

/// Persistence for subscribers, method history and attempts.
///
/// History and attempts are append-only; nothing here deletes or rewrites
/// them.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn get_subscriber(&self, id: Uuid) -> Result<Option<Subscriber>, DatabaseError>;

    /// Subscriber for `(account_id, sender)`, created on first sight.
    async fn find_or_create_subscriber(
        &self,
        account_id: &str,
        sender: &str,
    ) -> Result<Subscriber, DatabaseError>;

    /// Append a history entry. Returns `false` when the same message and
    /// send time were already recorded.
    async fn append_history(
        &self,
        subscriber_id: Uuid,
        method: &ClassifiedMethod,
        source_message_id: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    async fn method_history(&self, subscriber_id: Uuid) -> Result<MethodHistory, DatabaseError>;

    /// Store the derived active method on the subscriber record.
    async fn update_projection(
        &self,
        subscriber_id: Uuid,
        method: Option<&ClassifiedMethod>,
    ) -> Result<(), DatabaseError>;

    async fn count_failed_attempts(&self, subscriber_id: Uuid) -> Result<u32, DatabaseError>;

    async fn record_attempt(&self, attempt: &UnsubscribeAttempt) -> Result<(), DatabaseError>;

    /// Attempts for a subscriber, oldest first.
    async fn list_attempts(
        &self,
        subscriber_id: Uuid,
    ) -> Result<Vec<UnsubscribeAttempt>, DatabaseError>;

    async fn mark_unsubscribed(
        &self,
        subscriber_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    async fn set_keep(&self, subscriber_id: Uuid, keep: bool) -> Result<(), DatabaseError>;
}
