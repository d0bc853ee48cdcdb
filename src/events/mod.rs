use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: impl Into<String>, actor_id: Option<Uuid>, subject_id: Option<Uuid>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Where an administrative write came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Tenant the actor was acting from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
}

impl AuditContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent, tenant_id: None }
    }

    pub fn with_tenant(mut self, tenant_id: Option<Uuid>) -> Self {
        self.tenant_id = tenant_id;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    #[serde(rename = "new")]
    pub current: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<AuditContext>,
    pub severity: Severity,
}

/// Publishes `<entity>.<action>` for any [`Loggable`]. Publishing never fails
/// the calling operation.
pub fn log_activity_with_context<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    old_entity: Option<&T>,
    context: Option<AuditContext>,
) {
    let event_name = format!("{}.{}", T::entity_type(), action);

    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.map(|e| serde_json::to_value(e).unwrap_or_default()),
        context,
        severity: entity.severity_for_action(action),
    };

    let event = DomainEvent::new(
        event_name,
        actor_id,
        Some(entity.subject_id()),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    if event_bus.send(serde_json::to_value(event).unwrap_or_default()).is_err() {
        tracing::warn!(action, "no activity listener subscribed");
    }
}

fn describe(name: &str) -> &'static str {
    match name {
        "tenant.created" => "Tenant created",
        "tenant.activated" => "Tenant activated",
        "tenant.deactivated" => "Tenant deactivated",
        "membership.assigned" => "Membership assigned",
        "membership.accepted" => "Membership accepted",
        "membership.revoked" => "Membership revoked",
        "role.created" => "Custom role created",
        "role_permission.attached" => "Permission attached to role",
        "role_permission.detached" => "Permission detached from role",
        "permission.created" => "Permission created",
        "permission.deleted" => "Permission deleted",
        "authz.legacy_mode_enabled" => "Legacy authorization mode enabled",
        _ => "System event",
    }
}

pub fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Writes one bus event into the activity projection and the hash-chained
/// event store.
pub async fn persist_event(pool: &SqlitePool, event: &Value) -> Result<(), sqlx::Error> {
    let name = event.get("name").and_then(|v| v.as_str()).unwrap_or("unknown");
    let severity = event
        .get("payload")
        .and_then(|p| p.get("severity"))
        .and_then(|s| s.as_str())
        .unwrap_or("important");
    let actor_id = event
        .get("actor_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(|u| u.to_string());
    let subject_id = event
        .get("subject_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(|u| u.to_string());
    let occurred_at = event
        .get("occurred_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
        .to_rfc3339();
    let payload = serde_json::to_string(event).unwrap_or_default();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO activity_log (id, event_name, description, actor_id, subject_id, occurred_at, properties, severity)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(describe(name))
    .bind(&actor_id)
    .bind(&subject_id)
    .bind(&occurred_at)
    .bind(&payload)
    .bind(severity)
    .execute(&mut *tx)
    .await?;

    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM event_store ORDER BY rowid DESC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;
    let hash = chain_hash(prev_hash.as_deref(), &payload);

    sqlx::query(
        r#"
        INSERT INTO event_store (id, event_name, occurred_at, actor_id, subject_id, payload, severity, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(&occurred_at)
    .bind(&actor_id)
    .bind(&subject_id)
    .bind(&payload)
    .bind(severity)
    .bind(&prev_hash)
    .bind(&hash)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

/// Recomputes the event store chain. Returns the number of verified rows, or
/// the id of the first row whose hash does not match.
pub async fn verify_event_chain(pool: &SqlitePool) -> Result<Result<usize, String>, sqlx::Error> {
    let rows: Vec<(String, String, Option<String>, String)> =
        sqlx::query_as("SELECT id, payload, prev_hash, hash FROM event_store ORDER BY rowid")
            .fetch_all(pool)
            .await?;

    let mut prev: Option<String> = None;
    for (id, payload, prev_hash, hash) in &rows {
        if prev_hash != &prev || chain_hash(prev.as_deref(), payload) != *hash {
            return Ok(Err(id.clone()));
        }
        prev = Some(hash.clone());
    }
    Ok(Ok(rows.len()))
}

pub async fn start_activity_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("activity listener started");
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(e) = persist_event(&pool, &event).await {
                    tracing::error!(error = %e, "failed to persist activity event");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "activity listener lagged; events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
