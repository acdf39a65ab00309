//! Signaling hub configuration.
//!
//! Configuration is loaded from environment variables. Every field has a
//! default, so an empty environment yields a working local hub.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Default WebSocket signaling bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health/metrics endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default maximum number of concurrent sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// Default maximum participants in one session.
pub const DEFAULT_MAX_PARTICIPANTS_PER_SESSION: usize = 50;

/// Default maximum session key length in bytes.
pub const DEFAULT_MAX_SESSION_KEY_LENGTH: usize = 512;

/// Default maximum display name length in bytes.
pub const DEFAULT_MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Default maximum chat text length in bytes.
pub const DEFAULT_MAX_CHAT_LENGTH: usize = 4096;

/// Default maximum inbound frame size in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Default hub instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "hub";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Per-session and per-frame limits enforced by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_sessions: usize,
    pub max_participants_per_session: usize,
    pub max_session_key_length: usize,
    pub max_display_name_length: usize,
    pub max_chat_length: usize,
    pub max_frame_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_participants_per_session: DEFAULT_MAX_PARTICIPANTS_PER_SESSION,
            max_session_key_length: DEFAULT_MAX_SESSION_KEY_LENGTH,
            max_display_name_length: DEFAULT_MAX_DISPLAY_NAME_LENGTH,
            max_chat_length: DEFAULT_MAX_CHAT_LENGTH,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Signaling hub configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket signaling bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this hub instance.
    pub instance_id: String,

    /// Log output format (default: text).
    pub log_format: LogFormat,

    /// Capacity and size limits.
    pub limits: Limits,
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
        let bind_address = vars
            .get("HUB_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("HUB_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let log_format = match vars.get("HUB_LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "HUB_LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        let limits = Limits {
            max_sessions: parse_positive(vars, "HUB_MAX_SESSIONS", DEFAULT_MAX_SESSIONS)?,
            max_participants_per_session: parse_positive(
                vars,
                "HUB_MAX_PARTICIPANTS_PER_SESSION",
                DEFAULT_MAX_PARTICIPANTS_PER_SESSION,
            )?,
            max_session_key_length: parse_positive(
                vars,
                "HUB_MAX_SESSION_KEY_LENGTH",
                DEFAULT_MAX_SESSION_KEY_LENGTH,
            )?,
            max_display_name_length: parse_positive(
                vars,
                "HUB_MAX_DISPLAY_NAME_LENGTH",
                DEFAULT_MAX_DISPLAY_NAME_LENGTH,
            )?,
            max_chat_length: parse_positive(vars, "HUB_MAX_CHAT_LENGTH", DEFAULT_MAX_CHAT_LENGTH)?,
            max_frame_bytes: parse_positive(vars, "HUB_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES)?,
        };

        // Generate hub instance ID
        let instance_id = vars.get("HUB_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            instance_id,
            log_format,
            limits,
        })
    }
}

fn parse_positive<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(ConfigError::InvalidValue(format!(
            "{name} must be a positive integer, got '{raw}'"
        ))),
    }
}
