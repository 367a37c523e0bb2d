use serde_json::json;

use crate::{
    error::Result,
    router::{Context, Outcome},
};

/// Liveness endpoint with a database round trip.
pub async fn health(ctx: Context) -> Result<Outcome> {
    sqlx::query("SELECT 1").execute(&ctx.state.db).await?;
    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "OK",
        "data": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    })))
}

/// The service root, a plain-text landing for browser traffic.
pub async fn root(ctx: Context) -> Result<Outcome> {
    Ok(Outcome::Text(format!(
        "Clinical placement management service. API lives under {}",
        ctx.state.config.api_prefix
    )))
}
