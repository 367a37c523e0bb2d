use futures::future::BoxFuture;

use crate::{
    error::Result,
    models::user::UserType,
    router::{Context, Middleware},
    services::auth,
};

/// A middleware that requires a valid bearer token.
///
/// On success the resolved user is stored on the context for downstream
/// middleware and the handler. On failure it writes the 401 itself and stops
/// the dispatch.
pub struct RequireAuth;

impl Middleware for RequireAuth {
    fn handle<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            tracing::debug!("🔐 Checking authentication...");

            match auth::current_user(&ctx.state, &ctx.request).await? {
                Some(user) => {
                    ctx.set_current_user(user);
                    Ok(true)
                }
                None => {
                    tracing::debug!("❌ No authenticated user for guarded route");
                    ctx.response().unauthorized("Authentication required");
                    ctx.response().send();
                    Ok(false)
                }
            }
        })
    }
}

/// A middleware that requires the authenticated user to hold a given role.
///
/// Must run after `RequireAuth`; without a resolved user it denies with 401.
pub struct RequireRole {
    role: UserType,
}

impl RequireRole {
    pub fn new(role: UserType) -> Self {
        Self { role }
    }
}

impl Middleware for RequireRole {
    fn handle<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let Some(user) = ctx.current_user() else {
                ctx.response().unauthorized("Authentication required");
                ctx.response().send();
                return Ok(false);
            };

            if user.user_type != self.role {
                tracing::debug!(
                    user_id = user.id,
                    required = self.role.as_str(),
                    held = user.user_type.as_str(),
                    "❌ Role check failed"
                );
                ctx.response().forbidden("Access forbidden");
                ctx.response().send();
                return Ok(false);
            }

            Ok(true)
        })
    }
}
