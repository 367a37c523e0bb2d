use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod clock;
mod config;
mod db;
mod error;
mod router;
mod routes;
mod server;
mod session;
mod state;

mod http {
    pub mod request;
    pub mod response;
}

mod crypto {
    pub mod reset;
    pub mod token;
}

mod models {
    pub mod career;
    pub mod student_profile;
    pub mod user;
}

mod repositories {
    pub mod audit;
    pub mod career;
    pub mod student_profile;
    pub mod user;
}

mod services {
    pub mod auth;
}

mod handlers {
    pub mod audit;
    pub mod auth;
    pub mod meta;
    pub mod users;
}

mod middleware_layer {
    pub mod auth;
}

mod validation {
    pub mod auth;
}

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    let router = routes::build_router(&config)?;
    tracing::info!("✅ Route table built");

    server::serve(state, router).await
}
