use argon2::{
    Argon2, ParamsBuilder,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::{RngCore, rngs::OsRng};
use zeroize::Zeroize;

use crate::crypto::token::{self, TokenClaims};
use crate::error::{AppError, Result};
use crate::http::request::Request;
use crate::models::user::User;
use crate::repositories::audit::{self, AuditEntry};
use crate::repositories::user as user_repo;
use crate::state::AppState;

/// The memory cost for Argon2 in MB.
const ARGON2_MEMORY_MB: u32 = 19;
/// The number of iterations for Argon2.
const ARGON2_ITERATIONS: u32 = 3;
/// The parallelism factor for Argon2.
const ARGON2_PARALLELISM: u32 = 6;

/// Wording shared by every login failure. Unknown email, wrong password and
/// deactivated account are indistinguishable to the caller.
const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Hashes a password using Argon2id.
///
/// # Arguments
///
/// * `password` - The password to hash.
///
/// # Returns
///
/// A `Result` containing the hashed password.
pub fn hash_password(password: &str) -> Result<String> {
    let mut password_bytes = password.as_bytes().to_vec();

    let mut salt_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut salt_bytes);

    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(format!("Salt encoding error: {}", e)))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        ParamsBuilder::new()
            .m_cost(ARGON2_MEMORY_MB * 1024)
            .t_cost(ARGON2_ITERATIONS)
            .p_cost(ARGON2_PARALLELISM)
            .build()
            .map_err(|e| AppError::Internal(format!("Argon2 params: {}", e)))?,
    );

    let password_hash = argon2
        .hash_password(&password_bytes, &salt)
        .map_err(|e| AppError::Internal(format!("Argon2 hash error: {}", e)))?
        .to_string();

    password_bytes.zeroize();
    Ok(password_hash)
}

/// Verifies a password against a hash.
///
/// # Arguments
///
/// * `password` - The password to verify.
/// * `hash` - The hash to verify against.
///
/// # Returns
///
/// A `Result` containing `true` if the password is valid, `false` otherwise.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let mut password_bytes = password.as_bytes().to_vec();
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Hash parse error: {}", e)))?;
    let result = Argon2::default()
        .verify_password(&password_bytes, &parsed_hash)
        .is_ok();

    password_bytes.zeroize();
    Ok(result)
}

/// Authenticates a user by email and password.
///
/// A wrong password on an existing active account leaves a `login_failed`
/// audit event keyed by that user; unknown emails and deactivated accounts
/// fail with the same wording but are not audited.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `email` - The email address presented.
/// * `password` - The password presented.
/// * `ip` - The caller's address, for the audit trail.
///
/// # Returns
///
/// A `Result` containing the authenticated `User`.
pub async fn authenticate(
    state: &AppState,
    email: &str,
    password: &str,
    ip: Option<String>,
) -> Result<User> {
    tracing::debug!("🔐 Authenticating user: {}", email);

    let user = user_repo::find_by_email(&state.db, email)
        .await?
        .ok_or_else(|| AppError::Authentication(INVALID_CREDENTIALS.to_string()))?;

    if !user.active {
        return Err(AppError::Authentication(INVALID_CREDENTIALS.to_string()));
    }

    if !verify_password(password, &user.password_hash)? {
        audit::record(
            &state.db,
            state.clock.now(),
            AuditEntry {
                user_id: Some(user.id),
                action: "login_failed",
                affected_table: "users",
                affected_record_id: Some(user.id),
                old_data: None,
                new_data: None,
                ip,
            },
        )
        .await;
        return Err(AppError::Authentication(INVALID_CREDENTIALS.to_string()));
    }

    user_repo::update_last_access(&state.db, user.id, state.clock.now()).await?;

    tracing::info!("✅ User authenticated: {}", user.id);
    Ok(user)
}

/// Issues a signed bearer token for the user.
pub fn issue_token(state: &AppState, user: &User) -> Result<(String, TokenClaims)> {
    let now = state.clock.now().timestamp();
    let claims = TokenClaims {
        iat: now,
        exp: now + state.config.token_ttl_secs,
        user_id: user.id,
        user_type: user.user_type.as_str().to_string(),
    };
    let token = token::sign(&state.config.signing_key(), &claims)?;
    Ok((token, claims))
}

/// Resolves the user behind the request's bearer token.
///
/// Every credential failure (missing header, bad signature, expired token,
/// deleted or deactivated account) yields `Ok(None)` rather than an error;
/// only database failures propagate. The account is re-checked against the
/// database on each call, so a token outlives neither its user nor their
/// active flag.
pub async fn current_user(state: &AppState, request: &Request) -> Result<Option<User>> {
    let Some(bearer) = request.bearer_token() else {
        return Ok(None);
    };

    let claims = match token::verify(
        &state.config.signing_key(),
        bearer,
        state.clock.now().timestamp(),
    ) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::debug!(error = %err, "Bearer token rejected");
            return Ok(None);
        }
    };

    let Some(user) = user_repo::find_by_id(&state.db, claims.user_id).await? else {
        return Ok(None);
    };

    if !user.active {
        return Ok(None);
    }

    Ok(Some(user))
}

/// Changes a user's password after checking the current one.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `user_id` - The ID of the user.
/// * `current_password` - The user's current password.
/// * `new_password` - The replacement password.
///
/// # Returns
///
/// A `Result<()>`.
pub async fn change_password(
    state: &AppState,
    user_id: i64,
    current_password: &str,
    new_password: &str,
) -> Result<()> {
    let user = user_repo::find_by_id(&state.db, user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    if !verify_password(current_password, &user.password_hash)? {
        return Err(AppError::Authentication(
            "Current password is incorrect".to_string(),
        ));
    }

    let new_hash = hash_password(new_password)?;
    user_repo::update_password(&state.db, user_id, &new_hash, state.clock.now()).await?;

    tracing::info!("✅ Password changed for user: {}", user_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::UserType;
    use crate::repositories::user::NewUser;

    async fn seed(state: &AppState, email: &str, password: &str) -> User {
        let new = NewUser {
            name: "Ana Rojas".to_string(),
            national_id: "12345678-9".to_string(),
            email: email.to_string(),
            password_hash: hash_password(password).expect("hash"),
            phone: None,
            user_type: UserType::Coordinator,
        };
        user_repo::create(&state.db, &new, state.clock.now())
            .await
            .expect("seed user")
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("correct horse battery").expect("hash");
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse battery", &hash).expect("verify"));
        assert!(!verify_password("wrong", &hash).expect("verify"));
    }

    #[tokio::test]
    async fn login_failures_share_one_wording() {
        let state = AppState::for_tests().await;
        seed(&state, "ana@u.cl", "secret-password").await;

        let unknown = authenticate(&state, "ghost@u.cl", "whatever", None)
            .await
            .expect_err("unknown email");
        let wrong = authenticate(&state, "ana@u.cl", "wrong-password", None)
            .await
            .expect_err("wrong password");

        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn deactivated_account_cannot_log_in() {
        let state = AppState::for_tests().await;
        let user = seed(&state, "ana@u.cl", "secret-password").await;
        user_repo::set_active(&state.db, user.id, false, state.clock.now())
            .await
            .expect("deactivate");

        let err = authenticate(&state, "ana@u.cl", "secret-password", None)
            .await
            .expect_err("inactive");
        assert!(err.to_string().contains(INVALID_CREDENTIALS));
    }

    #[tokio::test]
    async fn only_wrong_passwords_on_real_accounts_are_audited() {
        let state = AppState::for_tests().await;
        let user = seed(&state, "ana@u.cl", "secret-password").await;

        let _ = authenticate(&state, "ana@u.cl", "wrong-password", None).await;
        let _ = authenticate(&state, "ghost@u.cl", "whatever", None).await;

        let records = audit::recent(&state.db, 10).await.expect("recent");
        let failed: Vec<_> = records
            .iter()
            .filter(|r| r.action == "login_failed")
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].user_id, Some(user.id));
    }

    #[tokio::test]
    async fn token_resolves_back_to_its_user() {
        let state = AppState::for_tests().await;
        let user = seed(&state, "ana@u.cl", "secret-password").await;
        let (token, claims) = issue_token(&state, &user).expect("issue");
        assert_eq!(claims.exp - claims.iat, state.config.token_ttl_secs);

        let request = Request::builder(http::Method::GET, "/api/v1/auth/profile")
            .header("authorization", &format!("Bearer {token}"))
            .build();
        let resolved = current_user(&state, &request)
            .await
            .expect("resolve")
            .expect("user present");
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn deactivation_revokes_outstanding_tokens() {
        let state = AppState::for_tests().await;
        let user = seed(&state, "ana@u.cl", "secret-password").await;
        let (token, _) = issue_token(&state, &user).expect("issue");
        user_repo::set_active(&state.db, user.id, false, state.clock.now())
            .await
            .expect("deactivate");

        let request = Request::builder(http::Method::GET, "/api/v1/auth/profile")
            .header("authorization", &format!("Bearer {token}"))
            .build();
        let resolved = current_user(&state, &request).await.expect("resolve");
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn garbage_token_resolves_to_no_user() {
        let state = AppState::for_tests().await;
        let request = Request::builder(http::Method::GET, "/api/v1/auth/profile")
            .header("authorization", "Bearer not.a.token")
            .build();
        let resolved = current_user(&state, &request).await.expect("resolve");
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn change_password_requires_the_current_one() {
        let state = AppState::for_tests().await;
        let user = seed(&state, "ana@u.cl", "old-password-1").await;

        let err = change_password(&state, user.id, "not-the-password", "new-password-1")
            .await
            .expect_err("wrong current");
        assert!(matches!(err, AppError::Authentication(_)));

        change_password(&state, user.id, "old-password-1", "new-password-1")
            .await
            .expect("change");
        assert!(
            authenticate(&state, "ana@u.cl", "new-password-1", None)
                .await
                .is_ok()
        );
    }
}
