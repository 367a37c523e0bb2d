use sqlx::SqlitePool;

use crate::{error::Result, models::career::CareerAssignment};

/// The active career assignments of a coordinator, joined with career details.
pub async fn careers_for_coordinator(
    pool: &SqlitePool,
    coordinator_id: i64,
) -> Result<Vec<CareerAssignment>> {
    let assignments = sqlx::query_as::<_, CareerAssignment>(
        r#"
        SELECT cc.id, c.id AS career_id, c.name, c.code, c.color
        FROM coordinator_careers cc
        JOIN careers c ON c.id = cc.career_id
        WHERE cc.coordinator_id = ? AND cc.active = 1 AND c.active = 1
        ORDER BY c.name ASC
        "#,
    )
    .bind(coordinator_id)
    .fetch_all(pool)
    .await?;
    Ok(assignments)
}
