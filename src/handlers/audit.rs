use serde_json::json;

use crate::{
    error::Result,
    repositories::audit as audit_repo,
    router::{Context, Outcome},
};

const DEFAULT_LIMIT: i64 = 50;

/// Lists the most recent audit events, newest first.
pub async fn recent(ctx: Context) -> Result<Outcome> {
    let limit = ctx
        .request
        .query_param("limit")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(DEFAULT_LIMIT);

    let records = audit_repo::recent(&ctx.state.db, limit).await?;

    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "Audit log retrieved",
        "data": { "entries": records },
    })))
}
