use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Academic profile attached to a student user.
#[derive(FromRow, Clone, Debug, Serialize)]
pub struct StudentProfile {
    pub id: i64,
    pub user_id: i64,
    pub career_id: Option<i64>,
    pub enrollment_number: Option<String>,
    pub admission_year: Option<i64>,
    pub created_at: DateTime<Utc>,
}
