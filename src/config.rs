//! Server configuration, read from environment variables.
//!
//! All settings have defaults suitable for a local single-node deployment;
//! only `TASKPAD_JWT_SECRET` deserves attention in production. When it is
//! unset an ephemeral random secret is generated at startup, which means
//! issued tokens die with the process.

use std::path::PathBuf;

use anyhow::Context;
use rand::RngCore;

/// Auth-related settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret used to sign and verify JWTs.
    pub jwt_secret: String,
    /// Token lifetime in days.
    pub jwt_ttl_days: i64,
}

/// Shared server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address, e.g. `127.0.0.1`.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Directory holding the task database and the account file.
    pub data_dir: PathBuf,
    /// When true, auth checks are bypassed with a fixed dev identity.
    pub dev_mode: bool,
    pub auth: AuthConfig,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let host = env_or("TASKPAD_HOST", "127.0.0.1");
        let port = match std::env::var("TASKPAD_PORT") {
            Ok(v) => v
                .parse::<u16>()
                .with_context(|| format!("invalid TASKPAD_PORT: {}", v))?,
            Err(_) => 8080,
        };
        let data_dir = PathBuf::from(env_or("TASKPAD_DATA_DIR", "./data"));
        let dev_mode = env_flag("TASKPAD_DEV_MODE");

        let jwt_secret = match std::env::var("TASKPAD_JWT_SECRET") {
            Ok(s) if !s.trim().is_empty() => s,
            _ => {
                tracing::warn!(
                    "TASKPAD_JWT_SECRET not set; generated an ephemeral secret \
                     (sessions will not survive a restart)"
                );
                let mut bytes = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                hex::encode(bytes)
            }
        };
        let jwt_ttl_days = match std::env::var("TASKPAD_JWT_TTL_DAYS") {
            Ok(v) => v
                .parse::<i64>()
                .with_context(|| format!("invalid TASKPAD_JWT_TTL_DAYS: {}", v))?,
            Err(_) => 30,
        };

        Ok(Self {
            host,
            port,
            data_dir,
            dev_mode,
            auth: AuthConfig {
                jwt_secret,
                jwt_ttl_days,
            },
        })
    }

    /// Path of the SQLite task database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("tasks.db")
    }

    /// Path of the JSON account file.
    pub fn accounts_path(&self) -> PathBuf {
        self.data_dir.join("accounts.json")
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            v == "1" || v == "true" || v == "yes"
        })
        .unwrap_or(false)
}
