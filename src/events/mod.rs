use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

/// One mutating decision, as handed to an [`AuditSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(actor_id: Uuid, entity_type: impl Into<String>, entity_id: Uuid, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            entity_type: entity_type.into(),
            entity_id,
            action: action.into(),
            before: None,
            after: None,
            severity: Severity::default(),
            occurred_at: Utc::now(),
        }
    }

    /// Record for a `Loggable` entity with optional before/after snapshots.
    /// The subject is taken from `after` when present, else from `before`.
    pub fn for_entity<T: Loggable>(actor_id: Uuid, action: &str, before: Option<&T>, after: Option<&T>) -> Self {
        let subject = after.or(before);
        let entity_id = subject.map(|e| e.subject_id()).unwrap_or_default();
        let severity = subject.map(|e| e.severity_for_action(action)).unwrap_or_default();

        Self {
            before: before.map(Loggable::audit_state),
            after: after.map(Loggable::audit_state),
            severity,
            ..Self::new(actor_id, T::entity_type(), entity_id, action)
        }
    }

    pub fn with_states(mut self, before: Option<Value>, after: Option<Value>) -> Self {
        self.before = before;
        self.after = after;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Event name such as `task.status_changed`.
    pub fn event_name(&self) -> String {
        format!("{}.{}", self.entity_type, self.action)
    }
}

/// Receiver of audit records.
///
/// Recording is fire-and-forget: implementations swallow their own failures
/// and must never block the mutation that produced the record.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Writes records to the tracing subscriber only.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        tracing::info!(
            event = %record.event_name(),
            actor_id = %record.actor_id,
            entity_id = %record.entity_id,
            severity = record.severity.as_str(),
            "audit"
        );
    }
}

/// Keeps records in memory; used by tests and local tooling.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn actions(&self) -> Vec<String> {
        self.records().iter().map(AuditRecord::event_name).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        match self.records.lock() {
            Ok(mut guard) => guard.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

pub type EventBus = broadcast::Sender<AuditRecord>;

pub fn init_event_bus(capacity: usize) -> (EventBus, broadcast::Receiver<AuditRecord>) {
    broadcast::channel(capacity)
}

/// Publishes records onto the in-process event bus consumed by
/// [`start_audit_listener`].
#[derive(Debug, Clone)]
pub struct EventBusAuditSink {
    bus: EventBus,
}

impl EventBusAuditSink {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl AuditSink for EventBusAuditSink {
    fn record(&self, record: AuditRecord) {
        // without a listener the record is only logged
        if let Err(broadcast::error::SendError(record)) = self.bus.send(record) {
            TracingAuditSink.record(record);
        }
    }
}

/// Persists bus records into `activity_log` and the hash-chained `event_store`.
/// Storage failures are logged and skipped.
pub async fn start_audit_listener(mut rx: broadcast::Receiver<AuditRecord>, pool: SqlitePool) {
    tracing::info!("audit listener started");
    loop {
        let record = match rx.recv().await {
            Ok(record) => record,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "audit listener lagged; records lost");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if let Err(e) = persist_record(&pool, &record).await {
            tracing::error!(event = %record.event_name(), "failed to persist audit record: {}", e);
        }
    }
    tracing::info!("audit listener stopped");
}

pub async fn persist_record(pool: &SqlitePool, record: &AuditRecord) -> Result<(), sqlx::Error> {
    let before = record.before.as_ref().map(Value::to_string);
    let after = record.after.as_ref().map(Value::to_string);

    sqlx::query(
        "INSERT INTO activity_log (id, event_name, actor_id, entity_type, entity_id, action, before_state, after_state, severity, occurred_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.id.to_string())
    .bind(record.event_name())
    .bind(record.actor_id.to_string())
    .bind(&record.entity_type)
    .bind(record.entity_id.to_string())
    .bind(&record.action)
    .bind(&before)
    .bind(&after)
    .bind(record.severity.as_str())
    .bind(record.occurred_at.to_rfc3339())
    .execute(pool)
    .await?;

    let payload = serde_json::to_string(record).unwrap_or_default();
    let prev_hash: Option<String> = sqlx::query_scalar("SELECT hash FROM event_store ORDER BY seq DESC LIMIT 1")
        .fetch_optional(pool)
        .await?;
    let hash = chain_hash(prev_hash.as_deref(), &payload);

    sqlx::query(
        "INSERT INTO event_store (id, event_name, occurred_at, payload, severity, prev_hash, hash) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.id.to_string())
    .bind(record.event_name())
    .bind(record.occurred_at.to_rfc3339())
    .bind(&payload)
    .bind(record.severity.as_str())
    .bind(&prev_hash)
    .bind(&hash)
    .execute(pool)
    .await?;

    Ok(())
}

/// SHA256(prev_hash || payload), hex encoded.
pub fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}
