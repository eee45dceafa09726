//! Server configuration.
//!
//! Loaded from environment variables (a `.env` file is honoured by the
//! binary). Token secrets are redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use tandem_gateway::GatewayConfig;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_PATH: &str = "tandem.db";
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,

    /// Signs bearer tokens sent in `auth` frames.
    pub access_token_secret: String,

    /// Signs the `refreshToken` cookie.
    pub refresh_token_secret: String,

    pub call_timeout: Duration,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("access_token_secret", &"[REDACTED]")
            .field("refresh_token_secret", &"[REDACTED]")
            .field("call_timeout", &self.call_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let access_token_secret = required_secret(vars, "ACCESS_TOKEN_SECRET")?;
        let refresh_token_secret = required_secret(vars, "REFRESH_TOKEN_SECRET")?;

        let host = vars
            .get("TANDEM_HOST")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match vars.get("TANDEM_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| ConfigError::InvalidValue(format!("TANDEM_PORT must be a port number: {}", e)))?,
            None => DEFAULT_PORT,
        };

        let db_path = vars
            .get("TANDEM_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        Ok(Self {
            host,
            port,
            db_path,
            access_token_secret,
            refresh_token_secret,
            call_timeout: seconds(vars, "TANDEM_CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS)?,
            handshake_timeout: seconds(vars, "TANDEM_HANDSHAKE_TIMEOUT_SECS", DEFAULT_HANDSHAKE_TIMEOUT_SECS)?,
            heartbeat_interval: seconds(vars, "TANDEM_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS)?,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            call_timeout: self.call_timeout,
            handshake_timeout: self.handshake_timeout,
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}

fn required_secret(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    let value = vars
        .get(key)
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue(format!("{} must not be empty", key)));
    }
    Ok(value.clone())
}

/// A positive whole number of seconds.
fn seconds(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs = match vars.get(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(format!("{} must be a number of seconds: {}", key, e)))?,
        None => default,
    };
    if secs == 0 {
        return Err(ConfigError::InvalidValue(format!("{} must be greater than zero", key)));
    }
    Ok(Duration::from_secs(secs))
}
