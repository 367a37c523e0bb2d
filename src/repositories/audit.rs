use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, SqlitePool};

use crate::error::Result;

/// One event to append to the audit trail.
pub struct AuditEntry<'a> {
    /// The acting user, if the event happened inside an authenticated request.
    pub user_id: Option<i64>,
    pub action: &'a str,
    pub affected_table: &'a str,
    pub affected_record_id: Option<i64>,
    /// Row state before the change, for updates and deletes.
    pub old_data: Option<Value>,
    /// Row state after the change, for creates and updates.
    pub new_data: Option<Value>,
    pub ip: Option<String>,
}

/// A stored audit event.
#[derive(FromRow, Clone, Debug, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub action: String,
    pub affected_table: String,
    pub affected_record_id: Option<i64>,
    pub old_data: Option<String>,
    pub new_data: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Appends an event to the audit trail.
///
/// Audit writes never fail the request they describe; an insert error is
/// logged and swallowed.
pub async fn record(pool: &SqlitePool, now: DateTime<Utc>, entry: AuditEntry<'_>) {
    if let Err(err) = insert(pool, now, &entry).await {
        tracing::warn!(
            error = %err,
            action = entry.action,
            table = entry.affected_table,
            "Audit log insert failed"
        );
    }
}

async fn insert(pool: &SqlitePool, now: DateTime<Utc>, entry: &AuditEntry<'_>) -> Result<()> {
    let old_data = entry
        .old_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let new_data = entry
        .new_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO audit_log (user_id, action, affected_table, affected_record_id, old_data, new_data, ip, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.action)
    .bind(entry.affected_table)
    .bind(entry.affected_record_id)
    .bind(old_data)
    .bind(new_data)
    .bind(entry.ip.as_deref())
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// The most recent audit events, newest first.
pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditRecord>> {
    let records = sqlx::query_as::<_, AuditRecord>(
        "SELECT * FROM audit_log ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::state::AppState;

    #[tokio::test]
    async fn recorded_events_come_back_newest_first() {
        let state = AppState::for_tests().await;
        let now = Utc::now();

        record(
            &state.db,
            now,
            AuditEntry {
                user_id: Some(1),
                action: "user_created",
                affected_table: "users",
                affected_record_id: Some(7),
                old_data: None,
                new_data: Some(json!({"email": "ana@u.cl"})),
                ip: Some("10.0.0.1".to_string()),
            },
        )
        .await;
        record(
            &state.db,
            now + chrono::Duration::seconds(1),
            AuditEntry {
                user_id: Some(1),
                action: "user_deleted",
                affected_table: "users",
                affected_record_id: Some(7),
                old_data: Some(json!({"email": "ana@u.cl"})),
                new_data: None,
                ip: None,
            },
        )
        .await;

        let records = recent(&state.db, 10).await.expect("recent");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, "user_deleted");
        assert_eq!(
            records[1].new_data.as_deref(),
            Some(r#"{"email":"ana@u.cl"}"#)
        );
    }
}
