use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The role of a user account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Student,
    Coordinator,
    Admin,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Student => "student",
            UserType::Coordinator => "coordinator",
            UserType::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "student" => Some(UserType::Student),
            "coordinator" => Some(UserType::Coordinator),
            "admin" => Some(UserType::Admin),
            _ => None,
        }
    }
}

/// Represents a user in the system.
#[derive(FromRow, Clone, Debug)]
pub struct User {
    /// The unique identifier for the user.
    pub id: i64,
    /// The user's full name.
    pub name: String,
    /// The national identity number. Unique across active and inactive rows.
    pub national_id: String,
    /// The user's email address. Unique across active and inactive rows.
    pub email: String,
    /// The user's hashed password.
    pub password_hash: String,
    /// The user's phone number.
    pub phone: Option<String>,
    /// The user's role.
    pub user_type: UserType,
    /// Whether the account is active.
    pub active: bool,
    /// Pending password-reset token, if any.
    pub reset_token: Option<String>,
    /// Expiry of the pending reset token.
    pub reset_token_expiry: Option<DateTime<Utc>>,
    /// The timestamp when the user was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the user was last updated.
    pub updated_at: Option<DateTime<Utc>>,
    /// The timestamp of the user's last login.
    pub last_access_at: Option<DateTime<Utc>>,
}

/// The user projection exposed in API responses.
///
/// The password hash and reset-token columns never reach this type.
#[derive(Clone, Debug, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
    pub national_id: String,
    pub email: String,
    pub phone: Option<String>,
    pub user_type: UserType,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_access_at: Option<DateTime<Utc>>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            national_id: user.national_id.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            user_type: user.user_type,
            active: user.active,
            created_at: user.created_at,
            last_access_at: user.last_access_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_projection_never_serializes_the_hash() {
        let user = User {
            id: 1,
            name: "Ana".to_string(),
            national_id: "12345678-9".to_string(),
            email: "ana@example.cl".to_string(),
            password_hash: "$argon2id$not-for-clients".to_string(),
            phone: None,
            user_type: UserType::Student,
            active: true,
            reset_token: Some("secret-reset".to_string()),
            reset_token_expiry: None,
            created_at: Utc::now(),
            updated_at: None,
            last_access_at: None,
        };

        let json = serde_json::to_string(&PublicUser::from(&user)).expect("serialize");
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("secret-reset"));
        assert!(json.contains("\"user_type\":\"student\""));
    }
}
