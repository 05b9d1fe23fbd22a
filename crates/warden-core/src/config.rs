//! Timeouts for the client and the adapter.
//!
//! Every value has a default and an environment override; per-call
//! [`RunOptions`] take precedence over both.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default wall-clock budget for a single `run`.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default budget for the readiness handshake.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_millis(6000);

/// Default time the engine gets to publish its execute capability.
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_millis(4000);

pub const EXECUTION_TIMEOUT_ENV: &str = "WARDEN_EXECUTION_TIMEOUT_MS";
pub const INIT_TIMEOUT_ENV: &str = "WARDEN_INIT_TIMEOUT_MS";
pub const BOOTSTRAP_TIMEOUT_ENV: &str = "WARDEN_BOOTSTRAP_TIMEOUT_MS";

/// Per-call budgets for [`SandboxClient::run`](crate::SandboxClient::run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Budget for the snippet itself, measured from dispatch.
    pub execution_timeout: Duration,
    /// Budget for the readiness handshake that precedes dispatch.
    pub init_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }
}

impl RunOptions {
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }
}

/// Client-wide settings.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Budgets used when a call passes no [`RunOptions`].
    pub defaults: RunOptions,
}

impl ClientConfig {
    /// Defaults, overridden by `WARDEN_EXECUTION_TIMEOUT_MS` and
    /// `WARDEN_INIT_TIMEOUT_MS` when set.
    pub fn from_env() -> Result<Self> {
        let mut defaults = RunOptions::default();
        if let Some(timeout) = millis_from_env(EXECUTION_TIMEOUT_ENV)? {
            defaults.execution_timeout = timeout;
        }
        if let Some(timeout) = millis_from_env(INIT_TIMEOUT_ENV)? {
            defaults.init_timeout = timeout;
        }
        Ok(Self { defaults })
    }
}

/// Settings for the adapter running inside a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterConfig {
    /// How long the engine may take to publish its execute capability.
    pub bootstrap_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
        }
    }
}

impl AdapterConfig {
    /// Defaults, overridden by `WARDEN_BOOTSTRAP_TIMEOUT_MS` when set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(timeout) = millis_from_env(BOOTSTRAP_TIMEOUT_ENV)? {
            config.bootstrap_timeout = timeout;
        }
        Ok(config)
    }
}

fn millis_from_env(var: &str) -> Result<Option<Duration>> {
    match std::env::var(var) {
        Ok(value) => parse_millis(var, &value).map(Some),
        Err(_) => Ok(None),
    }
}

/// Parse a positive millisecond count.
pub fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    let millis: u64 = value.trim().parse().map_err(|_| {
        Error::Config(format!(
            "{} must be a whole number of milliseconds, got '{}'",
            name, value
        ))
    })?;
    if millis == 0 {
        return Err(Error::Config(format!("{} must be greater than zero", name)));
    }
    Ok(Duration::from_millis(millis))
}
