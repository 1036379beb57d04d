use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::Result;
use crate::error::Error;
use crate::proxy::ProxyConfig;

pub const DEFAULT_MAX_ATTEMPTS: usize = 16;

/// Base transport settings shared by every call of one executor.
///
/// Loaded once, then only read; per-call values live in [`CallConfig`].
/// JSON durations are whole milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ExecutorConfig {
    #[serde(
        default = "default_request_timeout",
        rename = "request_timeout_ms",
        deserialize_with = "duration_from_millis"
    )]
    pub request_timeout: Duration,
    #[serde(
        default = "default_connect_timeout",
        rename = "connect_timeout_ms",
        deserialize_with = "duration_from_millis"
    )]
    pub connect_timeout: Duration,
    #[serde(
        default = "default_pool_idle_timeout",
        rename = "pool_idle_timeout_ms",
        deserialize_with = "duration_from_millis"
    )]
    pub pool_idle_timeout: Duration,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_pool_max_idle_connections")]
    pub pool_max_idle_connections: usize,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default)]
    pub wire_tracing: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            pool_idle_timeout: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_max_idle_connections: default_pool_max_idle_connections(),
            user_agent: None,
            max_attempts: default_max_attempts(),
            wire_tracing: false,
        }
    }
}

impl ExecutorConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|source| Error::Config { source })?;
        Ok(config.normalized())
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout;
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host;
        self
    }

    pub fn with_pool_max_idle_connections(mut self, pool_max_idle_connections: usize) -> Self {
        self.pool_max_idle_connections = pool_max_idle_connections;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// At least one attempt is always made.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_wire_tracing(mut self, wire_tracing: bool) -> Self {
        self.wire_tracing = wire_tracing;
        self
    }

    pub(crate) fn call_config(&self, proxy: Option<ProxyConfig>) -> CallConfig {
        CallConfig {
            request_timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
            proxy,
        }
    }

    fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self
    }
}

/// Settings for a single send, derived from [`ExecutorConfig`] per attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub proxy: Option<ProxyConfig>,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_pool_idle_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_pool_max_idle_per_host() -> usize {
    8
}

fn default_pool_max_idle_connections() -> usize {
    64
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn duration_from_millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
