//! Driver configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via TEGA_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tega_protocol::{Scope, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TEGA_ID, PUBSUB_PATH};

/// Default capacity of the reader → dispatcher frame queue.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 256;

/// Upper bound for the dispatcher queue capacity.
pub const MAX_DISPATCH_CAPACITY: usize = 64 * 1024;

/// Driver configuration for one tega identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Identity the session and CRUD calls act as.
    pub tega_id: String,
    /// Server host name.
    pub host: String,
    /// Server port (REST and WebSocket).
    pub port: u16,
    /// Scope declared in the SESSION handshake.
    pub scope: Scope,
    /// HTTP request timeout in milliseconds. `None` (or zero) keeps the
    /// transport default.
    pub request_timeout_ms: Option<u64>,
    /// Capacity of the queue between the socket reader and the dispatcher.
    pub dispatch_capacity: usize,
    /// Backoff used by an explicit reconnect.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tega_id: DEFAULT_TEGA_ID.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            scope: Scope::Local,
            request_timeout_ms: None,
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(tega_id: impl Into<String>) -> Self {
        Self {
            tega_id: tega_id.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("TEGA_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("TEGA_ID") {
            if !id.is_empty() {
                self.tega_id = id;
            }
        }

        if let Ok(host) = std::env::var("TEGA_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Ok(port) = std::env::var("TEGA_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }

        if let Ok(scope) = std::env::var("TEGA_SCOPE") {
            if let Ok(parsed) = scope.parse() {
                self.scope = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("TEGA_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.request_timeout_ms = Some(secs.saturating_mul(1_000));
            }
        }
    }

    /// Replaces the identity with a random UUID.
    pub fn with_random_tega_id(mut self) -> Self {
        self.tega_id = uuid::Uuid::new_v4().to_string();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_dispatch_capacity(mut self, capacity: usize) -> Self {
        self.dispatch_capacity = capacity.clamp(1, MAX_DISPATCH_CAPACITY);
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Returns the HTTP request timeout, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Returns the WebSocket URL of the pub/sub endpoint.
    pub fn pubsub_url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, PUBSUB_PATH)
    }

    /// Returns the Origin header sent during the WebSocket upgrade.
    pub fn origin(&self) -> String {
        format!("http://{}/", self.host)
    }
}

/// Exponential backoff for explicit reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Maximum dial attempts (0 = unlimited).
    pub max_attempts: usize,
    /// Delay before the second attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Delay cap, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait before attempt number `attempt` (0-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let shift = (attempt - 1).min(16) as u32;
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Returns whether attempt number `attempt` (0-based) is allowed.
    pub fn allows(&self, attempt: usize) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
