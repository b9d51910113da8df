//! Best-effort audit trail.
//!
//! Records are queued on a channel and written by a background worker, so a
//! mutation never waits on, or fails because of, its audit record. Write
//! failures are logged at warning level and dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::database::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntity {
    Class,
    Enrollment,
}

impl AuditEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntity::Class => "class",
            AuditEntity::Enrollment => "enrollment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Restore,
    Reassign,
    Enroll,
    Unenroll,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Restore => "RESTORE",
            AuditAction::Reassign => "REASSIGN",
            AuditAction::Enroll => "ENROLL",
            AuditAction::Unenroll => "UNENROLL",
        }
    }
}

/// Append-only before/after snapshot of one mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub entity: AuditEntity,
    pub entity_id: String,
    pub action: AuditAction,
    pub changed_fields: Option<Vec<String>>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub performed_by: Uuid,
    pub performed_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        entity: AuditEntity,
        entity_id: impl Into<String>,
        action: AuditAction,
        before: Option<Value>,
        after: Option<Value>,
        performed_by: Uuid,
    ) -> Self {
        let changed_fields = match (&before, &after) {
            (Some(b), Some(a)) => Some(changed_fields(b, a)),
            _ => None,
        };
        Self {
            entity,
            entity_id: entity_id.into(),
            action,
            changed_fields,
            before,
            after,
            performed_by,
            performed_at: Utc::now(),
        }
    }
}

/// Top-level keys whose values differ between two JSON objects, sorted.
/// Bookkeeping timestamps are ignored.
pub fn changed_fields(before: &Value, after: &Value) -> Vec<String> {
    const IGNORED: &[&str] = &["updated_at"];

    let (Value::Object(b), Value::Object(a)) = (before, after) else {
        return vec![];
    };
    let mut fields: Vec<String> = b
        .keys()
        .chain(a.keys())
        .filter(|k| !IGNORED.contains(&k.as_str()))
        .filter(|k| b.get(*k) != a.get(*k))
        .cloned()
        .collect();
    fields.sort();
    fields.dedup();
    fields
}

/// Durable home for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: &AuditRecord) -> Result<(), DatabaseError>;
}

/// Writes audit records to the `audit_logs` table
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO audit_logs
                (entity, entity_id, action, changed_fields, before_state, after_state, performed_by, performed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.entity.as_str())
        .bind(&record.entity_id)
        .bind(record.action.as_str())
        .bind(&record.changed_fields)
        .bind(&record.before)
        .bind(&record.after)
        .bind(record.performed_by)
        .bind(record.performed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Emits audit records as structured log lines
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), DatabaseError> {
        tracing::info!(
            target: "audit",
            entity = record.entity.as_str(),
            entity_id = %record.entity_id,
            action = record.action.as_str(),
            changed_fields = ?record.changed_fields,
            performed_by = %record.performed_by,
            "audit record"
        );
        Ok(())
    }
}

enum AuditMessage {
    Record(AuditRecord),
    Flush(oneshot::Sender<()>),
}

/// Records queued ahead of a slow sink before new ones are dropped
pub const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Fire-and-forget front end for an `AuditSink`
#[derive(Clone)]
pub struct AuditRecorder {
    tx: Option<mpsc::Sender<AuditMessage>>,
}

impl AuditRecorder {
    /// Start the background writer. Must be called inside a tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>) -> Self {
        Self::with_capacity(sink, DEFAULT_AUDIT_QUEUE_CAPACITY)
    }

    /// Background writer with a bounded queue. When the sink falls behind
    /// and the queue is full, new records are logged and dropped.
    pub fn with_capacity(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditMessage>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    AuditMessage::Record(record) => {
                        if let Err(e) = sink.write(&record).await {
                            tracing::warn!(
                                "Failed to write audit record ({} {} {}): {}",
                                record.entity.as_str(),
                                record.action.as_str(),
                                record.entity_id,
                                e
                            );
                        }
                    }
                    AuditMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { tx: Some(tx) }
    }

    /// A recorder that drops every record
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, record: AuditRecord) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(AuditMessage::Record(record)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(AuditMessage::Record(record))) => {
                tracing::warn!(
                    "Audit queue full; dropping audit record ({} {} {})",
                    record.entity.as_str(),
                    record.action.as_str(),
                    record.entity_id
                );
            }
            Err(_) => tracing::warn!("Audit worker stopped; dropping audit record"),
        }
    }

    /// Snapshot `before`/`after` and queue the record. Never fails.
    pub fn record<T: Serialize>(
        &self,
        entity: AuditEntity,
        entity_id: impl Into<String>,
        action: AuditAction,
        before: Option<&T>,
        after: Option<&T>,
        performed_by: Uuid,
    ) {
        if self.tx.is_none() {
            return;
        }
        let snapshot = |value: Option<&T>| {
            value.and_then(|v| match serde_json::to_value(v) {
                Ok(json) => Some(json),
                Err(e) => {
                    tracing::warn!("Failed to serialize audit snapshot: {}", e);
                    None
                }
            })
        };
        self.emit(AuditRecord::new(
            entity,
            entity_id,
            action,
            snapshot(before),
            snapshot(after),
            performed_by,
        ));
    }

    /// Wait until every record queued so far has been handed to the sink
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else { return };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(AuditMessage::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryAuditSink;
    use serde_json::json;

    #[test]
    fn changed_fields_lists_differing_keys() {
        let before = json!({ "name": "7A", "student_capacity": 30, "updated_at": "x", "notes": null });
        let after = json!({ "name": "7B", "student_capacity": 30, "updated_at": "y", "status": "active" });
        assert_eq!(changed_fields(&before, &after), vec!["name", "notes", "status"]);
        assert!(changed_fields(&json!(1), &json!(2)).is_empty());
    }

    #[test]
    fn create_records_have_no_changed_fields() {
        let record = AuditRecord::new(
            AuditEntity::Class,
            "c1",
            AuditAction::Create,
            None,
            Some(json!({ "name": "7A" })),
            Uuid::nil(),
        );
        assert!(record.changed_fields.is_none());
    }

    #[tokio::test]
    async fn recorder_delivers_records_in_order() {
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = AuditRecorder::spawn(sink.clone());
        for i in 0..3 {
            recorder.record(
                AuditEntity::Enrollment,
                format!("e{}", i),
                AuditAction::Enroll,
                None,
                Some(&json!({ "i": i })),
                Uuid::nil(),
            );
        }
        recorder.flush().await;
        let ids: Vec<String> = sink.records().into_iter().map(|r| r.entity_id).collect();
        assert_eq!(ids, vec!["e0", "e1", "e2"]);
    }

    #[tokio::test]
    async fn sink_failures_are_swallowed() {
        let sink = Arc::new(MemoryAuditSink::new());
        sink.set_failing(true);
        let recorder = AuditRecorder::spawn(sink.clone());
        recorder.record::<Value>(AuditEntity::Class, "c1", AuditAction::Delete, None, None, Uuid::nil());
        recorder.flush().await;
        assert!(sink.records().is_empty());

        sink.set_failing(false);
        recorder.record::<Value>(AuditEntity::Class, "c1", AuditAction::Restore, None, None, Uuid::nil());
        recorder.flush().await;
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_new_records() {
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = AuditRecorder::with_capacity(sink.clone(), 2);
        // Nothing yields between these calls on a current-thread runtime
        for i in 0..5 {
            recorder.record::<Value>(AuditEntity::Class, format!("c{}", i), AuditAction::Update, None, None, Uuid::nil());
        }
        recorder.flush().await;
        let ids: Vec<String> = sink.records().into_iter().map(|r| r.entity_id).collect();
        assert_eq!(ids, vec!["c0", "c1"]);

        recorder.record::<Value>(AuditEntity::Class, "c5", AuditAction::Update, None, None, Uuid::nil());
        recorder.flush().await;
        assert_eq!(sink.records().len(), 3);
    }

    #[tokio::test]
    async fn disabled_recorder_is_a_no_op() {
        let recorder = AuditRecorder::disabled();
        recorder.record::<Value>(AuditEntity::Class, "c1", AuditAction::Delete, None, None, Uuid::nil());
        recorder.flush().await;
    }
}
