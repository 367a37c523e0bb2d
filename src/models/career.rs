use serde::Serialize;
use sqlx::FromRow;

/// One active career assignment of a coordinator, joined with the career row.
#[derive(FromRow, Clone, Debug, Serialize)]
pub struct CareerAssignment {
    /// The assignment row id.
    pub id: i64,
    pub career_id: i64,
    pub name: String,
    pub code: String,
    pub color: Option<String>,
}
