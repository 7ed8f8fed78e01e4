//! libSQL backend for `SubscriberStore`.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! RFC 3339 text; methods as JSON.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::classify::{ClassifiedMethod, MethodKind};
use crate::error::DatabaseError;
use crate::executor::{AttemptStatus, UnsubscribeAttempt};
use crate::history::{MethodHistory, MethodHistoryEntry};
use crate::store::migrations;
use crate::store::traits::{Subscriber, SubscriberStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run an UPDATE against one subscriber; zero changed rows is `NotFound`.
    async fn touch(
        &self,
        op: &str,
        subscriber_id: Uuid,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "subscriber".into(),
                id: subscriber_id.to_string(),
            });
        }
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp text; equal instants always produce equal strings.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn method_to_json(method: &ClassifiedMethod) -> Result<String, DatabaseError> {
    serde_json::to_string(method).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn method_from_json(s: &str) -> Result<ClassifiedMethod, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(format!("method: {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("uuid {s}: {e}")))
}

const SUBSCRIBER_COLUMNS: &str =
    "id, account_id, sender, keep, unsubscribed_at, active_method, created_at, updated_at";

const ATTEMPT_COLUMNS: &str =
    "id, subscriber_id, method_used, target, status, attempted_at, response_code, error_message";

fn row_to_subscriber(row: &libsql::Row) -> Result<Subscriber, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("subscriber row parse: {e}"));
    let id: String = row.get(0).map_err(get_err)?;
    let keep: i64 = row.get(3).map_err(get_err)?;
    let unsubscribed_at: Option<String> = row.get(4).ok();
    let active_method: Option<String> = row.get(5).ok();
    let created: String = row.get(6).map_err(get_err)?;
    let updated: String = row.get(7).map_err(get_err)?;

    Ok(Subscriber {
        id: parse_uuid(&id)?,
        account_id: row.get(1).map_err(get_err)?,
        sender: row.get(2).map_err(get_err)?,
        keep: keep != 0,
        unsubscribed_at: unsubscribed_at.as_deref().map(parse_datetime),
        active_method: active_method.as_deref().map(method_from_json).transpose()?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_attempt(row: &libsql::Row) -> Result<UnsubscribeAttempt, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("attempt row parse: {e}"));
    let id: String = row.get(0).map_err(get_err)?;
    let subscriber_id: String = row.get(1).map_err(get_err)?;
    let method: String = row.get(2).map_err(get_err)?;
    let status: String = row.get(4).map_err(get_err)?;
    let attempted_at: String = row.get(5).map_err(get_err)?;
    let response_code: Option<i64> = row.get(6).ok();

    Ok(UnsubscribeAttempt {
        id: parse_uuid(&id)?,
        subscriber_id: parse_uuid(&subscriber_id)?,
        method_used: method
            .parse::<MethodKind>()
            .map_err(DatabaseError::Serialization)?,
        target: row.get(3).map_err(get_err)?,
        status: status
            .parse::<AttemptStatus>()
            .map_err(DatabaseError::Serialization)?,
        attempted_at: parse_datetime(&attempted_at),
        response_code: response_code.and_then(|c| u16::try_from(c).ok()),
        error_message: row.get(7).ok(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl SubscriberStore for LibSqlStore {
    async fn get_subscriber(&self, id: Uuid) -> Result<Option<Subscriber>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_subscriber: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_subscriber(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_subscriber: {e}"))),
        }
    }

    async fn find_or_create_subscriber(
        &self,
        account_id: &str,
        sender: &str,
    ) -> Result<Subscriber, DatabaseError> {
        let fresh = Subscriber::new(account_id, sender);
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO subscribers (id, account_id, sender, keep, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                params![
                    fresh.id.to_string(),
                    fresh.account_id.clone(),
                    fresh.sender.clone(),
                    ts(fresh.created_at),
                    ts(fresh.updated_at)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_or_create_subscriber: {e}")))?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE account_id = ?1 AND sender = ?2"
                ),
                params![fresh.account_id.clone(), fresh.sender.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_or_create_subscriber: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_subscriber(&row),
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "subscriber".into(),
                id: format!("{account_id}/{sender}"),
            }),
            Err(e) => Err(DatabaseError::Query(format!("find_or_create_subscriber: {e}"))),
        }
    }

    async fn append_history(
        &self,
        subscriber_id: Uuid,
        method: &ClassifiedMethod,
        source_message_id: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO method_history
                    (subscriber_id, source_message_id, observed_at, sequence, method)
                 VALUES (?1, ?2, ?3,
                    (SELECT COALESCE(MAX(sequence) + 1, 0) FROM method_history WHERE subscriber_id = ?1),
                    ?4)",
                params![
                    subscriber_id.to_string(),
                    source_message_id,
                    ts(observed_at),
                    method_to_json(method)?
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_history: {e}")))?;
        debug!(subscriber_id = %subscriber_id, inserted, "History entry appended");
        Ok(inserted > 0)
    }

    async fn method_history(&self, subscriber_id: Uuid) -> Result<MethodHistory, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT source_message_id, observed_at, sequence, method
                 FROM method_history WHERE subscriber_id = ?1",
                params![subscriber_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("method_history: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("method_history: {e}")))?
        {
            let get_err =
                |e: libsql::Error| DatabaseError::Query(format!("history row parse: {e}"));
            let observed: String = row.get(1).map_err(get_err)?;
            let sequence: i64 = row.get(2).map_err(get_err)?;
            let method: String = row.get(3).map_err(get_err)?;
            entries.push(MethodHistoryEntry {
                method: method_from_json(&method)?,
                source_message_id: row.get(0).map_err(get_err)?,
                observed_at: parse_datetime(&observed),
                sequence: u64::try_from(sequence).unwrap_or(0),
            });
        }
        Ok(MethodHistory::from_entries(entries))
    }

    async fn update_projection(
        &self,
        subscriber_id: Uuid,
        method: Option<&ClassifiedMethod>,
    ) -> Result<(), DatabaseError> {
        let json = method.map(method_to_json).transpose()?;
        self.touch(
            "update_projection",
            subscriber_id,
            "UPDATE subscribers
             SET unsubscribe_method = ?1, unsubscribe_link = ?2, active_method = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                opt_text(method.map(|m| m.kind().as_str())),
                opt_text(method.map(ClassifiedMethod::target)),
                opt_text(json.as_deref()),
                ts(Utc::now()),
                subscriber_id.to_string()
            ],
        )
        .await
    }

    async fn count_failed_attempts(&self, subscriber_id: Uuid) -> Result<u32, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM unsubscribe_attempts WHERE subscriber_id = ?1 AND status = ?2",
                params![subscriber_id.to_string(), AttemptStatus::Failed.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_failed_attempts: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_failed_attempts: {e}")))?;
                Ok(u32::try_from(count).unwrap_or(u32::MAX))
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_failed_attempts: {e}"))),
        }
    }

    async fn record_attempt(&self, attempt: &UnsubscribeAttempt) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO unsubscribe_attempts ({ATTEMPT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    attempt.id.to_string(),
                    attempt.subscriber_id.to_string(),
                    attempt.method_used.as_str(),
                    attempt.target.clone(),
                    attempt.status.as_str(),
                    ts(attempt.attempted_at),
                    match attempt.response_code {
                        Some(code) => libsql::Value::Integer(i64::from(code)),
                        None => libsql::Value::Null,
                    },
                    opt_text(attempt.error_message.as_deref())
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_attempt: {e}")))?;
        Ok(())
    }

    async fn list_attempts(
        &self,
        subscriber_id: Uuid,
    ) -> Result<Vec<UnsubscribeAttempt>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ATTEMPT_COLUMNS} FROM unsubscribe_attempts
                     WHERE subscriber_id = ?1 ORDER BY attempted_at ASC, rowid ASC"
                ),
                params![subscriber_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_attempts: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_attempts: {e}")))?
        {
            out.push(row_to_attempt(&row)?);
        }
        Ok(out)
    }

    async fn mark_unsubscribed(
        &self,
        subscriber_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.touch(
            "mark_unsubscribed",
            subscriber_id,
            "UPDATE subscribers SET unsubscribed_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![ts(at), ts(Utc::now()), subscriber_id.to_string()],
        )
        .await
    }

    async fn set_keep(&self, subscriber_id: Uuid, keep: bool) -> Result<(), DatabaseError> {
        self.touch(
            "set_keep",
            subscriber_id,
            "UPDATE subscribers SET keep = ?1, updated_at = ?2 WHERE id = ?3",
            params![i64::from(keep), ts(Utc::now()), subscriber_id.to_string()],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[tokio::test]
    async fn subscriber_round_trip_and_projection() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let sub = store
            .find_or_create_subscriber("acct", "News@Shop.test")
            .await
            .unwrap();
        let again = store
            .find_or_create_subscriber("acct", "news@shop.test")
            .await
            .unwrap();
        assert_eq!(sub.id, again.id);

        let method = ClassifiedMethod::HttpPost {
            url: "https://shop.test/u".into(),
            form_fields: [("list".to_string(), "9".to_string())].into(),
        };
        store.update_projection(sub.id, Some(&method)).await.unwrap();
        store.set_keep(sub.id, true).await.unwrap();

        let loaded = store.get_subscriber(sub.id).await.unwrap().unwrap();
        assert_eq!(loaded.active_method, Some(method));
        assert_eq!(loaded.unsubscribe_link(), Some("https://shop.test/u"));
        assert!(loaded.keep);
        assert!(loaded.unsubscribed_at.is_none());
    }

    #[tokio::test]
    async fn history_is_idempotent_and_ordered() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let sub = store.find_or_create_subscriber("acct", "a@b.test").await.unwrap();
        let day1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let day5 = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let get = ClassifiedMethod::HttpGet {
            url: "https://b.test/u".into(),
        };
        let reply = ClassifiedMethod::EmailReply {
            target: "mailto:u@b.test".into(),
            recipient: "u@b.test".into(),
            subject: "Unsubscribe".into(),
            body: "bye".into(),
        };

        assert!(store.append_history(sub.id, &reply, "m-b", day5).await.unwrap());
        assert!(store.append_history(sub.id, &get, "m-a", day1).await.unwrap());
        assert!(!store.append_history(sub.id, &get, "m-a", day1).await.unwrap());

        let history = store.method_history(sub.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.active().unwrap().method, reply);
        assert_eq!(history.entries()[1].sequence, 1);
    }

    #[tokio::test]
    async fn attempts_are_appended_and_counted() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let sub = store.find_or_create_subscriber("acct", "a@b.test").await.unwrap();

        let mut failed = UnsubscribeAttempt::new(
            sub.id,
            MethodKind::HttpGet,
            "https://b.test/u",
            AttemptStatus::Failed,
        );
        failed.response_code = Some(500);
        failed.error_message = Some("HTTP 500: oops".into());
        store.record_attempt(&failed).await.unwrap();
        let ok = UnsubscribeAttempt::new(
            sub.id,
            MethodKind::HttpGet,
            "https://b.test/u",
            AttemptStatus::Success,
        );
        store.record_attempt(&ok).await.unwrap();

        assert_eq!(store.count_failed_attempts(sub.id).await.unwrap(), 1);
        let listed = store.list_attempts(sub.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].response_code, Some(500));
        assert_eq!(listed[0].error_message.as_deref(), Some("HTTP 500: oops"));
        assert_eq!(listed[1].status, AttemptStatus::Success);
        assert!(listed[1].response_code.is_none());
    }

    #[tokio::test]
    async fn updates_on_unknown_subscriber_fail() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let err = store.mark_unsubscribed(Uuid::new_v4(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn local_file_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("unsub.db");

        let id = {
            let store = LibSqlStore::new_local(&path).await.unwrap();
            let sub = store.find_or_create_subscriber("acct", "a@b.test").await.unwrap();
            store.mark_unsubscribed(sub.id, Utc::now()).await.unwrap();
            sub.id
        };

        let reopened = LibSqlStore::new_local(&path).await.unwrap();
        let sub = reopened.get_subscriber(id).await.unwrap().unwrap();
        assert!(sub.unsubscribed_at.is_some());
    }
}
