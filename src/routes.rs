use std::sync::Arc;

use crate::{
    config::Config,
    error::Result,
    handlers::{audit, auth, meta, users},
    middleware_layer::auth::{RequireAuth, RequireRole},
    models::user::UserType,
    router::Router,
};

/// Builds the route table.
///
/// Matching is first-match-wins in the order below, so literal paths such as
/// `/users/stats` are registered before their parameterized siblings.
pub fn build_router(config: &Config) -> Result<Router> {
    let mut router = Router::new(&config.api_prefix);

    router.register_middleware("auth", Arc::new(RequireAuth));
    router.register_middleware("admin", Arc::new(RequireRole::new(UserType::Admin)));

    router.get("/", meta::root, &[])?;
    router.get("/health", meta::health, &[])?;

    router.api(|api| {
        api.post("/auth/login", auth::login, &[])?;
        api.post("/auth/logout", auth::logout, &[])?;
        api.get("/auth/profile", auth::get_profile, &["auth"])?;
        api.post("/auth/password/change", auth::change_password, &["auth"])?;
        api.post("/auth/password/forgot", auth::request_password_reset, &[])?;
        api.post("/auth/password/validate", auth::validate_reset_token, &[])?;
        api.post("/auth/password/reset", auth::reset_password, &[])?;

        api.get("/users", users::list, &["auth", "admin"])?;
        api.get("/users/stats", users::stats, &["auth", "admin"])?;
        api.get("/users/{id}", users::show, &["auth", "admin"])?;
        api.post("/users", users::create, &["auth", "admin"])?;
        api.put("/users/{id}", users::update, &["auth", "admin"])?;
        api.patch("/users/{id}/activate", users::activate, &["auth", "admin"])?;
        api.patch("/users/{id}/deactivate", users::deactivate, &["auth", "admin"])?;
        api.delete("/users/{id}", users::delete, &["auth", "admin"])?;

        api.get("/audit", audit::recent, &["auth", "admin"])?;
        Ok(())
    })?;

    Ok(router)
}
