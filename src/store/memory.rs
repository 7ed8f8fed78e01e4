//! In-process `SubscriberStore` for tests and embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::classify::ClassifiedMethod;
use crate::error::DatabaseError;
use crate::executor::{AttemptStatus, UnsubscribeAttempt};
use crate::history::{MethodHistory, Observation};
use crate::store::traits::{Subscriber, SubscriberStore};

#[derive(Debug, Default)]
struct Inner {
    subscribers: HashMap<Uuid, Subscriber>,
    by_sender: HashMap<(String, String), Uuid>,
    history: HashMap<Uuid, MethodHistory>,
    attempts: Vec<UnsubscribeAttempt>,
}

/// Everything lives in one lock-guarded map set.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "subscriber".into(),
        id: id.to_string(),
    }
}

#[async_trait]
impl SubscriberStore for MemoryStore {
    async fn get_subscriber(&self, id: Uuid) -> Result<Option<Subscriber>, DatabaseError> {
        Ok(self.inner.read().await.subscribers.get(&id).cloned())
    }

    async fn find_or_create_subscriber(
        &self,
        account_id: &str,
        sender: &str,
    ) -> Result<Subscriber, DatabaseError> {
        let key = (account_id.to_string(), sender.to_ascii_lowercase());
        let mut inner = self.inner.write().await;
        if let Some(id) = inner.by_sender.get(&key)
            && let Some(existing) = inner.subscribers.get(id)
        {
            return Ok(existing.clone());
        }
        let subscriber = Subscriber::new(account_id, sender);
        inner.by_sender.insert(key, subscriber.id);
        inner.subscribers.insert(subscriber.id, subscriber.clone());
        Ok(subscriber)
    }

    async fn append_history(
        &self,
        subscriber_id: Uuid,
        method: &ClassifiedMethod,
        source_message_id: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut inner = self.inner.write().await;
        if !inner.subscribers.contains_key(&subscriber_id) {
            return Err(not_found(subscriber_id));
        }
        let history = inner.history.entry(subscriber_id).or_default();
        let outcome = history.observe(method.clone(), source_message_id, observed_at);
        Ok(outcome == Observation::Appended)
    }

    async fn method_history(&self, subscriber_id: Uuid) -> Result<MethodHistory, DatabaseError> {
        Ok(self
            .inner
            .read()
            .await
            .history
            .get(&subscriber_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_projection(
        &self,
        subscriber_id: Uuid,
        method: Option<&ClassifiedMethod>,
    ) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write().await;
        let sub = inner
            .subscribers
            .get_mut(&subscriber_id)
            .ok_or_else(|| not_found(subscriber_id))?;
        sub.active_method = method.cloned();
        sub.updated_at = Utc::now();
        Ok(())
    }

    async fn count_failed_attempts(&self, subscriber_id: Uuid) -> Result<u32, DatabaseError> {
        let inner = self.inner.read().await;
        let count = inner
            .attempts
            .iter()
            .filter(|a| a.subscriber_id == subscriber_id && a.status == AttemptStatus::Failed)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn record_attempt(&self, attempt: &UnsubscribeAttempt) -> Result<(), DatabaseError> {
        self.inner.write().await.attempts.push(attempt.clone());
        Ok(())
    }

    async fn list_attempts(
        &self,
        subscriber_id: Uuid,
    ) -> Result<Vec<UnsubscribeAttempt>, DatabaseError> {
        Ok(self
            .inner
            .read()
            .await
            .attempts
            .iter()
            .filter(|a| a.subscriber_id == subscriber_id)
            .cloned()
            .collect())
    }

    async fn mark_unsubscribed(
        &self,
        subscriber_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write().await;
        let sub = inner
            .subscribers
            .get_mut(&subscriber_id)
            .ok_or_else(|| not_found(subscriber_id))?;
        sub.unsubscribed_at = Some(at);
        sub.updated_at = Utc::now();
        Ok(())
    }

    async fn set_keep(&self, subscriber_id: Uuid, keep: bool) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write().await;
        let sub = inner
            .subscribers
            .get_mut(&subscriber_id)
            .ok_or_else(|| not_found(subscriber_id))?;
        sub.keep = keep;
        sub.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::classify::MethodKind;

    #[tokio::test]
    async fn find_or_create_is_stable_per_account_and_sender() {
        let store = MemoryStore::new();
        let a = store.find_or_create_subscriber("acct", "News@Shop.test").await.unwrap();
        let b = store.find_or_create_subscriber("acct", "news@shop.test").await.unwrap();
        let c = store.find_or_create_subscriber("other", "news@shop.test").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn history_append_is_idempotent() {
        let store = MemoryStore::new();
        let sub = store.find_or_create_subscriber("acct", "a@b.test").await.unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let method = ClassifiedMethod::HttpGet {
            url: "https://b.test/u".into(),
        };
        assert!(store.append_history(sub.id, &method, "m1", at).await.unwrap());
        assert!(!store.append_history(sub.id, &method, "m1", at).await.unwrap());
        assert_eq!(store.method_history(sub.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_subscriber_is_a_not_found_error() {
        let store = MemoryStore::new();
        let err = store.set_keep(Uuid::new_v4(), true).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn only_failed_attempts_are_counted() {
        let store = MemoryStore::new();
        let sub = store.find_or_create_subscriber("acct", "a@b.test").await.unwrap();
        for status in [AttemptStatus::Failed, AttemptStatus::DryRun, AttemptStatus::Failed] {
            let attempt =
                UnsubscribeAttempt::new(sub.id, MethodKind::HttpGet, "https://b.test/u", status);
            store.record_attempt(&attempt).await.unwrap();
        }
        assert_eq!(store.count_failed_attempts(sub.id).await.unwrap(), 2);
        assert_eq!(store.list_attempts(sub.id).await.unwrap().len(), 3);
    }
}
