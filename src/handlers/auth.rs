use chrono::Duration;
use serde_json::json;

use crate::{
    config::Environment,
    crypto::reset::{RESET_TOKEN_TTL_HOURS, generate_reset_token},
    error::{AppError, Result},
    http::request::Request,
    models::user::{PublicUser, User, UserType},
    repositories::{
        audit::{self, AuditEntry},
        career as career_repo, student_profile as profile_repo, user as user_repo,
    },
    router::{Context, Outcome},
    services::auth as auth_service,
    validation::auth::*,
};

/// Pulls a required, non-empty input field across path, body and query.
fn required(request: &Request, field: &str) -> Result<String> {
    request
        .input(field)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{field} is required")))
}

/// Handles user login, issuing a signed bearer token.
pub async fn login(ctx: Context) -> Result<Outcome> {
    let email = required(&ctx.request, "email")?;
    let password = required(&ctx.request, "password")?;
    validate_email(&email)?;

    tracing::info!("📝 Login attempt: {}", email);

    let user = auth_service::authenticate(
        &ctx.state,
        &email,
        &password,
        Some(ctx.request.client_ip()),
    )
    .await?;
    let (token, _) = auth_service::issue_token(&ctx.state, &user)?;
    let public = PublicUser::from(&user);

    {
        let mut session = ctx.session();
        session.regenerate_id();
        session.set_user(serde_json::to_value(&public)?);
    }

    audit::record(
        &ctx.state.db,
        ctx.state.clock.now(),
        AuditEntry {
            user_id: Some(user.id),
            action: "login",
            affected_table: "users",
            affected_record_id: Some(user.id),
            old_data: None,
            new_data: None,
            ip: Some(ctx.request.client_ip()),
        },
    )
    .await;

    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "Login successful",
        "data": {
            "token": token,
            "expires_in": ctx.state.config.token_ttl_secs,
            "user": public,
        },
    })))
}

/// Handles logout.
///
/// The bearer token is discarded client-side and stays verifiable until its
/// expiry; only the session state is dropped server-side.
pub async fn logout(ctx: Context) -> Result<Outcome> {
    // Works with or without a valid token; a broken one just goes unaudited.
    let user = auth_service::current_user(&ctx.state, &ctx.request)
        .await
        .ok()
        .flatten();

    ctx.session().destroy();

    audit::record(
        &ctx.state.db,
        ctx.state.clock.now(),
        AuditEntry {
            user_id: user.as_ref().map(|u| u.id),
            action: "logout",
            affected_table: "users",
            affected_record_id: user.as_ref().map(|u| u.id),
            old_data: None,
            new_data: None,
            ip: Some(ctx.request.client_ip()),
        },
    )
    .await;

    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "Logout successful",
    })))
}

/// Starts a password reset.
///
/// The response is identical whether or not the email exists, so the endpoint
/// cannot be used to enumerate accounts.
pub async fn request_password_reset(ctx: Context) -> Result<Outcome> {
    let email = required(&ctx.request, "email")?;
    validate_email(&email)?;

    let mut dev_token = None;

    if let Some(user) = user_repo::find_by_email(&ctx.state.db, &email).await? {
        if user.active {
            let token = generate_reset_token();
            let expiry = ctx.state.clock.now() + Duration::hours(RESET_TOKEN_TTL_HOURS);
            user_repo::save_reset_token(&ctx.state.db, user.id, &token, expiry).await?;

            audit::record(
                &ctx.state.db,
                ctx.state.clock.now(),
                AuditEntry {
                    user_id: Some(user.id),
                    action: "password_reset_requested",
                    affected_table: "users",
                    affected_record_id: Some(user.id),
                    old_data: None,
                    new_data: None,
                    ip: Some(ctx.request.client_ip()),
                },
            )
            .await;

            // No mailer is wired up yet; development exposes the token so the
            // flow can be exercised end to end.
            if ctx.state.config.environment == Environment::Development {
                dev_token = Some(token);
            }
        }
    }

    let mut body = json!({
        "status": "success",
        "message": "If the email exists, reset instructions have been sent",
    });
    if let Some(token) = dev_token {
        body["data"] = json!({ "reset_token": token });
    }
    Ok(Outcome::Json(body))
}

/// Looks a reset token up and rejects missing or expired ones.
async fn user_for_reset_token(ctx: &Context, token: &str) -> Result<User> {
    let user = user_repo::find_by_reset_token(&ctx.state.db, token)
        .await?
        .ok_or_else(|| AppError::Validation("Invalid or expired reset token".to_string()))?;

    let expiry = user
        .reset_token_expiry
        .ok_or_else(|| AppError::Validation("Invalid or expired reset token".to_string()))?;
    if expiry < ctx.state.clock.now() {
        return Err(AppError::Validation(
            "Invalid or expired reset token".to_string(),
        ));
    }
    Ok(user)
}

/// Checks whether a reset token is still usable, without consuming it.
pub async fn validate_reset_token(ctx: Context) -> Result<Outcome> {
    let token = required(&ctx.request, "token")?;
    user_for_reset_token(&ctx, &token).await?;

    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "Token is valid",
    })))
}

/// Sets a new password from a reset token. Consumes the token.
pub async fn reset_password(ctx: Context) -> Result<Outcome> {
    let token = required(&ctx.request, "token")?;
    let password = required(&ctx.request, "password")?;
    let confirmation = required(&ctx.request, "password_confirmation")?;
    if password != confirmation {
        return Err(AppError::Validation("Passwords do not match".to_string()));
    }
    validate_password(&password)?;

    let user = user_for_reset_token(&ctx, &token).await?;
    let hash = auth_service::hash_password(&password)?;
    user_repo::update_password(&ctx.state.db, user.id, &hash, ctx.state.clock.now()).await?;

    audit::record(
        &ctx.state.db,
        ctx.state.clock.now(),
        AuditEntry {
            user_id: Some(user.id),
            action: "password_reset",
            affected_table: "users",
            affected_record_id: Some(user.id),
            old_data: None,
            new_data: None,
            ip: Some(ctx.request.client_ip()),
        },
    )
    .await;

    tracing::info!("✅ Password reset completed for user: {}", user.id);

    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "Password updated successfully",
    })))
}

/// Changes the authenticated user's password.
pub async fn change_password(ctx: Context) -> Result<Outcome> {
    let user = ctx
        .current_user()
        .ok_or_else(|| AppError::Authentication("Authentication required".to_string()))?;

    let current = required(&ctx.request, "current_password")?;
    let new = required(&ctx.request, "new_password")?;
    let confirmation = required(&ctx.request, "new_password_confirmation")?;
    if new != confirmation {
        return Err(AppError::Validation("Passwords do not match".to_string()));
    }
    validate_password(&new)?;

    auth_service::change_password(&ctx.state, user.id, &current, &new).await?;

    audit::record(
        &ctx.state.db,
        ctx.state.clock.now(),
        AuditEntry {
            user_id: Some(user.id),
            action: "password_changed",
            affected_table: "users",
            affected_record_id: Some(user.id),
            old_data: None,
            new_data: None,
            ip: Some(ctx.request.client_ip()),
        },
    )
    .await;

    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "Password updated successfully",
    })))
}

/// Returns the authenticated user's profile, enriched per role.
pub async fn get_profile(ctx: Context) -> Result<Outcome> {
    let user = ctx
        .current_user()
        .ok_or_else(|| AppError::Authentication("Authentication required".to_string()))?;

    let mut data = json!({ "user": PublicUser::from(&user) });

    match user.user_type {
        UserType::Student => {
            let profile = profile_repo::find_by_user_id(&ctx.state.db, user.id).await?;
            data["student_profile"] = serde_json::to_value(profile)?;
        }
        UserType::Coordinator => {
            let careers = career_repo::careers_for_coordinator(&ctx.state.db, user.id).await?;
            data["careers"] = serde_json::to_value(careers)?;
        }
        UserType::Admin => {}
    }

    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "Profile retrieved",
        "data": data,
    })))
}
