//! Orchestrator configuration.
//!
//! Built in code by the embedding application, or from `PEER_*` variables
//! via [`OrchestratorConfig::from_vars`].

use common::types::SessionKey;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Default hub endpoint.
pub const DEFAULT_HUB_URL: &str = "ws://127.0.0.1:8080/ws";

/// Default STUN server.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Default bound on a stalled negotiation (seconds).
pub const DEFAULT_NEGOTIATION_TIMEOUT_SECONDS: u64 = 30;

/// Default first reconnect delay (milliseconds).
pub const DEFAULT_RECONNECT_INITIAL_MS: u64 = 500;

/// Default reconnect delay ceiling (milliseconds).
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Exponential backoff for hub reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Give up after this many failed attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hub WebSocket URL.
    pub hub_url: String,

    /// Session to join.
    pub session_key: SessionKey,

    /// Label shown to other participants.
    pub display_name: String,

    /// ICE server URLs handed to the media engine.
    pub ice_servers: Vec<String>,

    /// A link still negotiating after this long is closed. Zero disables.
    pub negotiation_timeout: Duration,

    /// Hub reconnection backoff.
    pub reconnect: ReconnectPolicy,

    /// Request camera capture.
    pub want_video: bool,

    /// Request microphone capture.
    pub want_audio: bool,
}

impl OrchestratorConfig {
    /// Configuration with defaults for everything but the session and name.
    #[must_use]
    pub fn new(session_key: impl Into<SessionKey>, display_name: impl Into<String>) -> Self {
        Self {
            hub_url: DEFAULT_HUB_URL.to_string(),
            session_key: session_key.into(),
            display_name: display_name.into(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            negotiation_timeout: Duration::from_secs(DEFAULT_NEGOTIATION_TIMEOUT_SECONDS),
            reconnect: ReconnectPolicy::default(),
            want_video: true,
            want_audio: true,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Load configuration from a map (testable without touching the process env).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let session_key = vars
            .get("PEER_SESSION_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("PEER_SESSION_KEY".to_string()))?;
        if session_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "PEER_SESSION_KEY must not be empty".to_string(),
            ));
        }

        let display_name = vars
            .get("PEER_DISPLAY_NAME")
            .ok_or_else(|| ConfigError::MissingEnvVar("PEER_DISPLAY_NAME".to_string()))?;

        let mut config = Self::new(session_key.as_str(), display_name.as_str());

        if let Some(url) = vars.get("PEER_HUB_URL") {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::InvalidValue(format!(
                    "PEER_HUB_URL must be a ws:// or wss:// URL, got {url}"
                )));
            }
            config.hub_url.clone_from(url);
        }

        if let Some(servers) = vars.get("PEER_ICE_SERVERS") {
            config.ice_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
        }

        if let Some(value) = vars.get("PEER_NEGOTIATION_TIMEOUT_SECONDS") {
            config.negotiation_timeout =
                Duration::from_secs(parse_u64("PEER_NEGOTIATION_TIMEOUT_SECONDS", value)?);
        }

        if let Some(value) = vars.get("PEER_RECONNECT_INITIAL_MS") {
            config.reconnect.initial_delay =
                Duration::from_millis(parse_u64("PEER_RECONNECT_INITIAL_MS", value)?);
        }

        if let Some(value) = vars.get("PEER_RECONNECT_MAX_MS") {
            config.reconnect.max_delay =
                Duration::from_millis(parse_u64("PEER_RECONNECT_MAX_MS", value)?);
        }
        if config.reconnect.max_delay < config.reconnect.initial_delay {
            return Err(ConfigError::InvalidValue(
                "PEER_RECONNECT_MAX_MS must not be below PEER_RECONNECT_INITIAL_MS".to_string(),
            ));
        }

        if let Some(value) = vars.get("PEER_RECONNECT_MAX_ATTEMPTS") {
            let attempts = parse_u64("PEER_RECONNECT_MAX_ATTEMPTS", value)?;
            config.reconnect.max_attempts = if attempts == 0 {
                None
            } else {
                Some(u32::try_from(attempts).map_err(|_| {
                    ConfigError::InvalidValue(format!(
                        "PEER_RECONNECT_MAX_ATTEMPTS out of range: {attempts}"
                    ))
                })?)
            };
        }

        if let Some(value) = vars.get("PEER_WANT_VIDEO") {
            config.want_video = parse_bool("PEER_WANT_VIDEO", value)?;
        }
        if let Some(value) = vars.get("PEER_WANT_AUDIO") {
            config.want_audio = parse_bool("PEER_WANT_AUDIO", value)?;
        }

        Ok(config)
    }

    /// Negotiation timeout, or `None` when disabled.
    #[must_use]
    pub fn negotiation_deadline(&self) -> Option<Duration> {
        (!self.negotiation_timeout.is_zero()).then_some(self.negotiation_timeout)
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|e| {
        ConfigError::InvalidValue(format!("{name} must be a non-negative integer: {e}"))
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue(format!(
            "{name} must be a boolean, got {other}"
        ))),
    }
}
