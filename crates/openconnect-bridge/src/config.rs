use std::env;
use std::str::FromStr;

use thiserror::Error;

use crate::engine::{LoopLimits, Protocol, DEFAULT_RECONNECT_TIMEOUT, RECONNECT_INTERVAL_MIN};
use crate::progress::LogLevel;
use crate::runner::RunnerConfig;
use crate::session::SessionOptions;

pub const DEFAULT_USER_AGENT: &str = concat!("openconnect-bridge/", env!("CARGO_PKG_VERSION"));
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            var,
            reason: reason.to_string(),
        }
    }
}

/// Process-level settings for hosts embedding the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub user_agent: Option<String>,
    pub protocol: Option<Protocol>,
    pub server: Option<String>,
    pub log_level: LogLevel,
    pub limits: LoopLimits,
    pub max_sessions: Option<usize>,
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            protocol: None,
            server: None,
            log_level: LogLevel::default(),
            limits: LoopLimits::default(),
            max_sessions: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads settings through `lookup`; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let protocol = parse_opt::<Protocol>(var("OC_BRIDGE_PROTOCOL"), "OC_BRIDGE_PROTOCOL")?;
        let log_level = parse_opt::<LogLevel>(var("OC_BRIDGE_LOG_LEVEL"), "OC_BRIDGE_LOG_LEVEL")?
            .unwrap_or_default();

        let reconnect_timeout =
            parse_opt::<i32>(var("OC_BRIDGE_RECONNECT_TIMEOUT"), "OC_BRIDGE_RECONNECT_TIMEOUT")?
                .unwrap_or(DEFAULT_RECONNECT_TIMEOUT);
        if reconnect_timeout < 0 {
            return Err(ConfigError::invalid(
                "OC_BRIDGE_RECONNECT_TIMEOUT",
                "must not be negative",
            ));
        }

        let reconnect_interval =
            parse_opt::<i32>(var("OC_BRIDGE_RECONNECT_INTERVAL"), "OC_BRIDGE_RECONNECT_INTERVAL")?
                .unwrap_or(RECONNECT_INTERVAL_MIN);
        if reconnect_interval < RECONNECT_INTERVAL_MIN {
            return Err(ConfigError::invalid(
                "OC_BRIDGE_RECONNECT_INTERVAL",
                format!("must be at least {RECONNECT_INTERVAL_MIN} seconds"),
            ));
        }

        let max_sessions =
            parse_opt::<usize>(var("OC_BRIDGE_MAX_SESSIONS"), "OC_BRIDGE_MAX_SESSIONS")?;
        if max_sessions == Some(0) {
            return Err(ConfigError::invalid("OC_BRIDGE_MAX_SESSIONS", "must be positive"));
        }

        Ok(Self {
            user_agent: var("OC_BRIDGE_USER_AGENT"),
            protocol,
            server: var("OC_BRIDGE_SERVER"),
            log_level,
            limits: LoopLimits {
                reconnect_timeout,
                reconnect_interval,
            },
            max_sessions,
            log_filter: var("OC_BRIDGE_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }

    /// Explicit user agent, else the protocol's customary one, else ours.
    pub fn user_agent(&self) -> &str {
        self.user_agent
            .as_deref()
            .or_else(|| self.protocol.and_then(Protocol::default_user_agent))
            .unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            limits: self.limits,
            max_active: self.max_sessions,
            ..RunnerConfig::default()
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            protocol: self.protocol,
            server: self.server.clone(),
            log_level: self.log_level,
            ..SessionOptions::default()
        }
    }
}

fn parse_opt<T>(raw: Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|raw| raw.parse::<T>().map_err(|err| ConfigError::invalid(var, err)))
        .transpose()
}
