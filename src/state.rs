use std::sync::Arc;

use sqlx::SqlitePool;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::session::SessionStore;

/// The application's state, explicitly constructed and injected into every
/// dispatch instead of living behind process-wide singletons.
#[derive(Clone)]
pub struct AppState {
    /// The database connection pool.
    pub db: SqlitePool,
    /// The application's configuration.
    pub config: Config,
    /// The server-side session store.
    pub sessions: SessionStore,
    /// The time source used for all expiry decisions.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates the state against the wall clock.
    pub async fn new(config: &Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Creates the state with an injected time source.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    /// * `clock` - The time source for sessions and token expiry.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = db::create_pool(&config.database_path).await?;
        db::run_migrations(&db).await?;
        tracing::info!("✅ SQLite pool initialized ({})", config.database_path);

        let sessions = SessionStore::new(clock.clone(), config.session_lifetime_secs);

        Ok(AppState {
            db,
            config: config.clone(),
            sessions,
            clock,
        })
    }

    /// State backed by an in-memory database, for tests.
    #[cfg(test)]
    pub async fn for_tests() -> Self {
        Self::new(&Config::for_tests())
            .await
            .expect("test state should initialize")
    }
}
