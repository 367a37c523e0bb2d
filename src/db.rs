use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::Result;

/// Creates the SQLite connection pool.
///
/// The database file and its parent directory are created on first use, and
/// foreign keys are enforced on every connection. An in-memory database is
/// pinned to a single connection so all callers see the same data.
///
/// # Arguments
///
/// * `database_path` - Path to the SQLite file, or `:memory:`.
///
/// # Returns
///
/// A `Result` containing the pool.
pub async fn create_pool(database_path: &str) -> Result<SqlitePool> {
    let in_memory = database_path == ":memory:";

    if !in_memory {
        if let Some(dir) = Path::new(database_path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(database_path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Runs the embedded schema migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
