//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use serde::Deserialize;

/// Minimum length of the shared signing secret, in bytes.
const MIN_SECRET_LEN: usize = 16;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (optional): PostgreSQL connection string. Without it the
///   server keeps all state in process memory.
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `SIGNATURE_SECRET` (required): shared secret for request/response signatures
/// - `TIMESTAMP_TOLERANCE_SECS` (optional): accepted clock skew, defaults to 300
/// - `DATABASE_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `BOOTSTRAP_ADMIN_KEY` (optional): create an admin key on an empty store
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,

    #[serde(default = "default_port")]
    pub server_port: u16,

    pub signature_secret: String,

    #[serde(default = "default_tolerance")]
    pub timestamp_tolerance_secs: i64,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default)]
    pub bootstrap_admin_key: bool,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_tolerance() -> i64 {
    300
}

fn default_max_connections() -> u32 {
    5
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `SIGNATURE_SECRET` is missing or shorter than 16 bytes
    /// - `TIMESTAMP_TOLERANCE_SECS` is not positive
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.signature_secret.len() < MIN_SECRET_LEN {
            anyhow::bail!(
                "SIGNATURE_SECRET must be at least {} bytes long",
                MIN_SECRET_LEN
            );
        }
        if self.timestamp_tolerance_secs <= 0 {
            anyhow::bail!("TIMESTAMP_TOLERANCE_SECS must be positive");
        }
        Ok(())
    }
}
