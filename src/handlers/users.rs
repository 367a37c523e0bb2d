use http::StatusCode;
use serde_json::json;

use crate::{
    error::{AppError, Result},
    models::user::{PublicUser, User, UserType},
    repositories::{
        audit::{self, AuditEntry},
        student_profile as profile_repo,
        user::{self as user_repo, NewUser, UserChanges, UserFilter},
    },
    router::{Context, Outcome},
    services::auth as auth_service,
    validation::auth::*,
};

const DEFAULT_PER_PAGE: i64 = 25;

fn user_id_param(ctx: &Context) -> Result<i64> {
    ctx.request
        .param("id")
        .and_then(|value| value.parse::<i64>().ok())
        .ok_or_else(|| AppError::Validation("Invalid user id".to_string()))
}

fn acting_user(ctx: &Context) -> Result<User> {
    ctx.current_user()
        .ok_or_else(|| AppError::Authentication("Authentication required".to_string()))
}

/// Lists users with filtering and pagination.
pub async fn list(ctx: Context) -> Result<Outcome> {
    let page = ctx
        .request
        .query_param("page")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(1);
    let per_page = ctx
        .request
        .query_param("per_page")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(DEFAULT_PER_PAGE);

    let filter = UserFilter {
        user_type: ctx
            .request
            .query_param("type")
            .and_then(UserType::parse),
        active: ctx
            .request
            .query_param("active")
            .and_then(|v| v.parse::<bool>().ok()),
        search: ctx
            .request
            .query_param("search")
            .map(str::to_string)
            .filter(|s| !s.is_empty()),
    };

    let (users, total) = user_repo::list(&ctx.state.db, &filter, page, per_page).await?;
    let users: Vec<PublicUser> = users.iter().map(PublicUser::from).collect();
    let per_page = per_page.clamp(1, 100);

    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "Users retrieved",
        "data": {
            "users": users,
            "pagination": {
                "page": page.max(1),
                "per_page": per_page,
                "total": total,
                "total_pages": (total + per_page - 1) / per_page,
            },
        },
    })))
}

/// Returns one user by id.
pub async fn show(ctx: Context) -> Result<Outcome> {
    let id = user_id_param(&ctx)?;
    let user = user_repo::find_by_id(&ctx.state.db, id)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut data = json!({ "user": PublicUser::from(&user) });
    if user.user_type == UserType::Student {
        let profile = profile_repo::find_by_user_id(&ctx.state.db, user.id).await?;
        data["student_profile"] = serde_json::to_value(profile)?;
    }

    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "User retrieved",
        "data": data,
    })))
}

/// Creates a user account.
pub async fn create(ctx: Context) -> Result<Outcome> {
    let actor = acting_user(&ctx)?;

    let name = ctx
        .request
        .body_str("name")
        .map(str::to_string)
        .unwrap_or_default();
    let national_id = ctx
        .request
        .body_str("national_id")
        .map(str::to_string)
        .unwrap_or_default();
    let email = ctx
        .request
        .body_str("email")
        .map(str::to_string)
        .unwrap_or_default();
    let password = ctx
        .request
        .body_str("password")
        .map(str::to_string)
        .unwrap_or_default();
    let phone = ctx
        .request
        .body_str("phone")
        .map(str::to_string)
        .filter(|p| !p.is_empty());
    let user_type = ctx
        .request
        .body_str("user_type")
        .and_then(UserType::parse)
        .ok_or_else(|| {
            AppError::Validation("user_type must be student, coordinator, or admin".to_string())
        })?;

    validate_name(&name)?;
    validate_national_id(&national_id)?;
    validate_email(&email)?;
    validate_password(&password)?;

    let new = NewUser {
        name,
        national_id,
        email,
        password_hash: auth_service::hash_password(&password)?,
        phone,
        user_type,
    };
    let user = user_repo::create_with_profile(&ctx.state.db, &new, ctx.state.clock.now()).await?;

    let public = PublicUser::from(&user);
    audit::record(
        &ctx.state.db,
        ctx.state.clock.now(),
        AuditEntry {
            user_id: Some(actor.id),
            action: "user_created",
            affected_table: "users",
            affected_record_id: Some(user.id),
            old_data: None,
            new_data: Some(serde_json::to_value(&public)?),
            ip: Some(ctx.request.client_ip()),
        },
    )
    .await;

    tracing::info!("✅ User created with ID: {}", user.id);

    ctx.response().set_status(StatusCode::CREATED);
    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "User created",
        "data": { "user": public },
    })))
}

/// Applies partial changes to a user.
pub async fn update(ctx: Context) -> Result<Outcome> {
    let actor = acting_user(&ctx)?;
    let id = user_id_param(&ctx)?;

    let before = user_repo::find_by_id(&ctx.state.db, id)
        .await?
        .ok_or(AppError::NotFound)?;

    let changes = UserChanges {
        name: ctx.request.body_str("name").map(str::to_string),
        national_id: ctx.request.body_str("national_id").map(str::to_string),
        email: ctx.request.body_str("email").map(str::to_string),
        phone: ctx.request.body_str("phone").map(str::to_string),
        user_type: ctx.request.body_str("user_type").and_then(UserType::parse),
    };

    if let Some(name) = &changes.name {
        validate_name(name)?;
    }
    if let Some(national_id) = &changes.national_id {
        validate_national_id(national_id)?;
    }
    if let Some(email) = &changes.email {
        validate_email(email)?;
    }

    let after = user_repo::update(&ctx.state.db, id, &changes, ctx.state.clock.now()).await?;

    audit::record(
        &ctx.state.db,
        ctx.state.clock.now(),
        AuditEntry {
            user_id: Some(actor.id),
            action: "user_updated",
            affected_table: "users",
            affected_record_id: Some(id),
            old_data: Some(serde_json::to_value(PublicUser::from(&before))?),
            new_data: Some(serde_json::to_value(PublicUser::from(&after))?),
            ip: Some(ctx.request.client_ip()),
        },
    )
    .await;

    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "User updated",
        "data": { "user": PublicUser::from(&after) },
    })))
}

async fn toggle_active(ctx: Context, active: bool) -> Result<Outcome> {
    let actor = acting_user(&ctx)?;
    let id = user_id_param(&ctx)?;

    if !active && actor.id == id {
        return Err(AppError::Validation(
            "You cannot deactivate your own account".to_string(),
        ));
    }

    let user = user_repo::set_active(&ctx.state.db, id, active, ctx.state.clock.now()).await?;

    let action = if active {
        "user_activated"
    } else {
        "user_deactivated"
    };
    audit::record(
        &ctx.state.db,
        ctx.state.clock.now(),
        AuditEntry {
            user_id: Some(actor.id),
            action,
            affected_table: "users",
            affected_record_id: Some(id),
            old_data: None,
            new_data: Some(json!({ "active": active })),
            ip: Some(ctx.request.client_ip()),
        },
    )
    .await;

    let message = if active {
        "User activated"
    } else {
        "User deactivated"
    };
    Ok(Outcome::Json(json!({
        "status": "success",
        "message": message,
        "data": { "user": PublicUser::from(&user) },
    })))
}

/// Re-activates a deactivated account.
pub async fn activate(ctx: Context) -> Result<Outcome> {
    toggle_active(ctx, true).await
}

/// Deactivates an account, revoking its outstanding tokens.
pub async fn deactivate(ctx: Context) -> Result<Outcome> {
    toggle_active(ctx, false).await
}

/// Deletes a user. Profile and assignment rows cascade with the row.
pub async fn delete(ctx: Context) -> Result<Outcome> {
    let actor = acting_user(&ctx)?;
    let id = user_id_param(&ctx)?;

    if actor.id == id {
        return Err(AppError::Validation(
            "You cannot delete your own account".to_string(),
        ));
    }

    let before = user_repo::find_by_id(&ctx.state.db, id)
        .await?
        .ok_or(AppError::NotFound)?;
    user_repo::delete(&ctx.state.db, id).await?;

    audit::record(
        &ctx.state.db,
        ctx.state.clock.now(),
        AuditEntry {
            user_id: Some(actor.id),
            action: "user_deleted",
            affected_table: "users",
            affected_record_id: Some(id),
            old_data: Some(serde_json::to_value(PublicUser::from(&before))?),
            new_data: None,
            ip: Some(ctx.request.client_ip()),
        },
    )
    .await;

    tracing::info!("🗑️ User deleted: {}", id);

    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "User deleted",
    })))
}

/// Account statistics: totals per role and per active flag.
pub async fn stats(ctx: Context) -> Result<Outcome> {
    let by_type = user_repo::count_by_type(&ctx.state.db).await?;
    let active = user_repo::count_active(&ctx.state.db, true).await?;
    let inactive = user_repo::count_active(&ctx.state.db, false).await?;

    let mut per_type = json!({ "student": 0, "coordinator": 0, "admin": 0 });
    for entry in &by_type {
        per_type[entry.user_type.as_str()] = json!(entry.count);
    }

    Ok(Outcome::Json(json!({
        "status": "success",
        "message": "Statistics retrieved",
        "data": {
            "total": active + inactive,
            "active": active,
            "inactive": inactive,
            "by_type": per_type,
        },
    })))
}
