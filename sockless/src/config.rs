//! Environment-driven defaults for injected requests.
//!
//! The synthetic request carries a small fixed set of transport stand-ins
//! (user agent, remote address, authority). They can be overridden per
//! injection through [`InjectOptions`](crate::options::InjectOptions) or for
//! a whole test suite through environment variables and `.env` files.

use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

pub const USER_AGENT_VAR: &str = "SOCKLESS_USER_AGENT";
pub const REMOTE_ADDR_VAR: &str = "SOCKLESS_REMOTE_ADDR";
pub const AUTHORITY_VAR: &str = "SOCKLESS_AUTHORITY";

/// Load environment variables from `.env` files if it exists.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

/// Get a required environment variable.
///
/// Returns an error if the variable is not set.
pub fn get_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key.to_string()))
}

/// Get an optional environment with a default value
pub fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get and parse an environment variable.
pub fn get_env_parsed<T: FromStr>(key: &str) -> Result<T, ConfigError> {
    let value = get_env(key)?;
    value.parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value,
    })
}

/// Transport stand-ins applied to every injected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectDefaults {
    /// Sent as `user-agent` unless the request sets one.
    pub user_agent: String,
    /// Reported by [`Request::remote_address`](crate::request::Request::remote_address).
    pub remote_address: IpAddr,
    /// Sent as `host` when the URL has no authority and no header is given.
    pub authority: String,
}

impl Default for InjectDefaults {
    fn default() -> Self {
        Self {
            user_agent: "sockless".to_string(),
            remote_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            authority: "localhost".to_string(),
        }
    }
}

impl InjectDefaults {
    /// Reads `SOCKLESS_USER_AGENT`, `SOCKLESS_REMOTE_ADDR` and
    /// `SOCKLESS_AUTHORITY`, falling back to [`InjectDefaults::default`] for
    /// unset variables. A `.env` file is loaded first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        let fallback = Self::default();

        let remote_address = match env::var(REMOTE_ADDR_VAR) {
            Ok(_) => get_env_parsed(REMOTE_ADDR_VAR)?,
            Err(_) => fallback.remote_address,
        };

        Ok(Self {
            user_agent: get_env_or(USER_AGENT_VAR, &fallback.user_agent),
            remote_address,
            authority: get_env_or(AUTHORITY_VAR, &fallback.authority),
        })
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Environment variable is not set.
    Missing(String),
    /// Environment variable value is invalid.
    Invalid { key: String, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => {
                write!(f, "Missing required environment variable '{}'", key)
            }
            ConfigError::Invalid { key, value } => {
                write!(
                    f,
                    "Invalid value '{}' for environment variable '{}' (failed to parse as expected type)",
                    value, key
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}
