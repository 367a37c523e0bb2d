use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use zeroize::{Zeroize, Zeroizing};

/// The environment the application runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Testing,
}

impl Environment {
    fn from_str(value: &str) -> Self {
        match value {
            "production" => Environment::Production,
            "testing" => Environment::Testing,
            _ => Environment::Development,
        }
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The environment the application runs in.
    pub environment: Environment,
    /// The address the HTTP server binds to.
    pub listen_addr: SocketAddr,
    /// Path to the SQLite database file.
    pub database_path: String,
    /// The symmetric key used to sign bearer tokens.
    pub token_secret: Zeroizing<Vec<u8>>,
    /// Bearer token time-to-live in seconds.
    pub token_ttl_secs: i64,
    /// Session idle lifetime in seconds.
    pub session_lifetime_secs: i64,
    /// URI prefix identifying API routes.
    pub api_prefix: String,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let mut token_secret_hex = env::var("TOKEN_SECRET")
            .context("TOKEN_SECRET must be set (generate with: openssl rand -hex 32)")?;

        let token_secret_bytes =
            hex::decode(&token_secret_hex).context("TOKEN_SECRET must be valid hexadecimal")?;

        token_secret_hex.zeroize();

        if token_secret_bytes.len() != 32 {
            anyhow::bail!("TOKEN_SECRET must be exactly 32 bytes (64 hex characters)");
        }

        Ok(Self {
            environment: Environment::from_str(
                &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            ),
            listen_addr: env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
                .parse()
                .context("Invalid LISTEN_ADDR")?,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/clinplace.sqlite".to_string()),
            token_secret: Zeroizing::new(token_secret_bytes),
            token_ttl_secs: env::var("TOKEN_TTL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("Invalid TOKEN_TTL_SECS")?,
            session_lifetime_secs: env::var("SESSION_LIFETIME_SECS")
                .unwrap_or_else(|_| "28800".to_string())
                .parse()
                .context("Invalid SESSION_LIFETIME_SECS")?,
            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api/v1".to_string()),
        })
    }

    /// The signing key as a fixed-size array.
    pub fn signing_key(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        key.copy_from_slice(&self.token_secret);
        key
    }

    /// A configuration suitable for tests: in-memory-friendly defaults and a
    /// fixed signing secret.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            environment: Environment::Testing,
            listen_addr: "127.0.0.1:0".parse().expect("valid test addr"),
            database_path: ":memory:".to_string(),
            token_secret: Zeroizing::new(vec![7u8; 32]),
            token_ttl_secs: 86400,
            session_lifetime_secs: 28800,
            api_prefix: "/api/v1".to_string(),
        }
    }
}
