//! Contract of the protocol engine the bridge drives.
//!
//! The engine owns the wire protocol; the bridge only creates it, configures
//! it, runs its blocking main loop, and answers its callbacks through the
//! [`Trampolines`] it was constructed with.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::CommandPipe;
use crate::progress::LogLevel;
use crate::trampoline::Trampolines;

#[cfg(feature = "native")]
pub mod native;
#[cfg(feature = "mock")]
pub mod scripted;

/// Smallest reconnect interval the engine accepts, in seconds.
pub const RECONNECT_INTERVAL_MIN: i32 = 10;
/// How long the engine keeps retrying a dropped tunnel, in seconds.
pub const DEFAULT_RECONNECT_TIMEOUT: i32 = 300;

/// Opaque id correlating a terminal result with the engine that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(u64);

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

impl EngineId {
    /// Allocates a process-unique id for engines without a native address.
    pub fn next() -> Self {
        EngineId(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        EngineId(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine-{:x}", self.0)
    }
}

/// Retry policy passed to the engine's main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopLimits {
    pub reconnect_timeout: i32,
    pub reconnect_interval: i32,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
            reconnect_interval: RECONNECT_INTERVAL_MIN,
        }
    }
}

/// VPN flavours the engine speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    AnyConnect,
    GlobalProtect,
    Pulse,
    NetworkConnect,
    Fortinet,
    F5,
    Array,
}

impl Protocol {
    /// Name the engine uses for this protocol.
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::AnyConnect => "anyconnect",
            Protocol::GlobalProtect => "gp",
            Protocol::Pulse => "pulse",
            Protocol::NetworkConnect => "nc",
            Protocol::Fortinet => "fortinet",
            Protocol::F5 => "f5",
            Protocol::Array => "array",
        }
    }

    /// User agent gateways of this flavour expect from their own clients.
    pub fn default_user_agent(self) -> Option<&'static str> {
        match self {
            Protocol::AnyConnect => Some("AnyConnect Darwin_i386 5.1.8.122"),
            Protocol::GlobalProtect => Some("Global Protect"),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown VPN protocol '{0}'")]
pub struct ParseProtocolError(String);

impl FromStr for Protocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anyconnect" => Ok(Protocol::AnyConnect),
            "gp" | "globalprotect" => Ok(Protocol::GlobalProtect),
            "pulse" => Ok(Protocol::Pulse),
            "nc" => Ok(Protocol::NetworkConnect),
            "fortinet" => Ok(Protocol::Fortinet),
            "f5" => Ok(Protocol::F5),
            "array" => Ok(Protocol::Array),
            other => Err(ParseProtocolError(other.to_string())),
        }
    }
}

/// Cisco Secure Desktop (host scan) trojan handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsdOptions {
    /// User the wrapper script runs as.
    pub uid: u32,
    /// Suppresses the engine's warning before it runs the wrapper.
    #[serde(default = "default_silent")]
    pub silent: bool,
    /// Script executed in place of the trojan the gateway serves.
    pub wrapper: String,
}

fn default_silent() -> bool {
    true
}

/// A failed engine call, carrying the negative errno the engine returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineError {
    context: &'static str,
    code: i32,
}

impl EngineError {
    pub fn new(context: &'static str, code: i32) -> Self {
        Self { context, code }
    }

    /// Maps an engine return code: zero is success.
    pub fn check(context: &'static str, code: i32) -> Result<(), EngineError> {
        if code == 0 {
            Ok(())
        } else {
            Err(Self::new(context, code))
        }
    }

    pub fn context(&self) -> &'static str {
        self.context
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn errno(&self) -> i32 {
        self.code.saturating_abs()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, io::Error::from_raw_os_error(self.errno()))
    }
}

impl std::error::Error for EngineError {}

/// Operations the bridge performs on one engine instance.
///
/// Configuration happens on the caller's thread before the loop starts;
/// once [`Engine::main_loop`] is entered the engine is only touched from the
/// loop thread.
pub trait Engine: Send + 'static {
    fn id(&self) -> EngineId;

    fn set_log_level(&mut self, level: LogLevel);

    fn set_protocol(&mut self, protocol: Protocol) -> Result<(), EngineError>;

    fn parse_url(&mut self, url: &str) -> Result<(), EngineError>;

    fn set_dpd(&mut self, min_seconds: u32);

    fn set_allow_insecure_crypto(&mut self, allowed: bool) -> Result<(), EngineError>;

    fn set_tun_script(&mut self, script: &str) -> Result<(), EngineError>;

    fn setup_csd(&mut self, csd: &CsdOptions) -> Result<(), EngineError>;

    /// Opens the channel the main loop polls for [`crate::EngineCommand`]s.
    /// Repeated calls return handles to the same channel. Sends fail with
    /// [`crate::CommandError::Closed`] once the engine is dropped.
    fn command_pipe(&mut self) -> Result<CommandPipe, EngineError>;

    /// Blocks until the engine gives up, returning its outcome code.
    fn main_loop(&mut self, limits: LoopLimits) -> i32;
}

/// Allocates engines bound to a set of trampolines.
pub trait EngineFactory {
    type Engine: Engine;

    /// Returns `None` when the engine cannot be allocated.
    fn create(&self, user_agent: &str, trampolines: Trampolines) -> Option<Self::Engine>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_renders_errno() {
        let err = EngineError::new("parse URL", -22);
        assert_eq!(err.errno(), 22);
        let expected = format!("parse URL: {}", io::Error::from_raw_os_error(22));
        assert_eq!(err.to_string(), expected);
        assert!(EngineError::check("set protocol", 0).is_ok());
        assert_eq!(EngineError::check("set protocol", -5).unwrap_err().code(), -5);
    }

    #[test]
    fn protocols_parse_and_carry_user_agents() {
        assert_eq!("GP".parse::<Protocol>().unwrap(), Protocol::GlobalProtect);
        assert_eq!("anyconnect".parse::<Protocol>().unwrap(), Protocol::AnyConnect);
        assert!("wireguard".parse::<Protocol>().is_err());
        assert_eq!(
            Protocol::AnyConnect.default_user_agent(),
            Some("AnyConnect Darwin_i386 5.1.8.122")
        );
        assert_eq!(Protocol::Fortinet.default_user_agent(), None);
        assert_eq!(Protocol::NetworkConnect.to_string(), "nc");
    }

    #[test]
    fn csd_wrapper_is_silent_unless_asked() {
        let csd: CsdOptions =
            serde_json::from_str(r#"{"uid":1000,"wrapper":"/usr/libexec/openconnect/csd-post.sh"}"#)
                .unwrap();
        assert!(csd.silent);
        assert_eq!(csd.uid, 1000);
    }

    #[test]
    fn engine_ids_are_unique() {
        let a = EngineId::next();
        let b = EngineId::next();
        assert_ne!(a, b);
        assert_eq!(EngineId::from_raw(255).to_string(), "engine-ff");
    }
}
