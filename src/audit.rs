use sqlx::PgPool;
use uuid::Uuid;

/// One append-only audit entry describing an assignment or billing
/// mutation.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub service_type: Option<String>,
    pub lead_id: Option<String>,
    pub partner_id: Option<Uuid>,
    pub status: Option<String>,
    pub message: String,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(actor: &str, action: &str, message: impl Into<String>) -> Self {
        Self {
            actor: actor.to_string(),
            action: action.to_string(),
            service_type: None,
            lead_id: None,
            partner_id: None,
            status: None,
            message: message.into(),
            details: serde_json::json!({}),
        }
    }

    pub fn lead(mut self, lead_id: &str, service_type: &str) -> Self {
        self.lead_id = Some(lead_id.to_string());
        self.service_type = Some(service_type.to_string());
        self
    }

    pub fn partner(mut self, partner_id: Uuid) -> Self {
        self.partner_id = Some(partner_id);
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Appends an audit row. Best-effort: failures are logged and swallowed,
/// the triggering operation has already committed.
pub async fn record(pool: &PgPool, entry: AuditEntry) {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_logs (actor, action, service_type, lead_id, partner_id, status, message, details)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&entry.actor)
    .bind(&entry.action)
    .bind(&entry.service_type)
    .bind(&entry.lead_id)
    .bind(entry.partner_id)
    .bind(&entry.status)
    .bind(&entry.message)
    .bind(&entry.details)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!("Failed to write audit log for {}: {}", entry.action, e);
    }
}
