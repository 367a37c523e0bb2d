use sqlx::SqlitePool;

use crate::{error::Result, models::student_profile::StudentProfile};

/// Finds the academic profile attached to a student user.
pub async fn find_by_user_id(pool: &SqlitePool, user_id: i64) -> Result<Option<StudentProfile>> {
    let profile =
        sqlx::query_as::<_, StudentProfile>("SELECT * FROM student_profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(profile)
}
