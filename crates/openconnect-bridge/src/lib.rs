//! Session control bridge for the OpenConnect VPN engine.
//!
//! A controller creates a [`SessionHandle`] with its callback context and
//! implementations of [`InteractiveCallbacks`] and [`LifecycleEvents`],
//! configures it, and hands it to a [`SessionRunner`]. The engine's blocking
//! protocol loop then runs on a dedicated thread and calls back into the
//! controller until it exits, at which point exactly one [`TerminalResult`]
//! is delivered. A [`CommandPipe`] taken from the handle before it starts
//! cancels, pauses or detaches the running loop.
//!
//! With the default `mock` feature the crate ships a scripted engine
//! ([`engine::scripted`]); the `native` feature links libopenconnect.

pub mod callbacks;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod form;
pub mod ip_info;
pub mod processor;
pub mod progress;
pub mod runner;
pub mod session;
pub mod telemetry;
mod trampoline;

pub use callbacks::{
    lifecycle_channel, BrowserError, CertDecision, ChannelLifecycle, InteractiveCallbacks,
    LifecycleEvent, LifecycleEvents,
};
pub use command::{CommandPipe, CommandSink, EngineCommand};
pub use config::{BridgeConfig, ConfigError};
pub use engine::{CsdOptions, Engine, EngineError, EngineFactory, EngineId, LoopLimits, Protocol};
pub use error::{CommandError, LoopError, RunnerError, SessionError};
pub use form::{AuthForm, FormChoice, FormError, FormOption, FormOptionType, FormResult};
pub use ip_info::IpInfo;
pub use processor::{AggregateProcessor, CredentialsProcessor, FormProcessor, LoggingProcessor};
pub use progress::LogLevel;
pub use runner::{RunnerConfig, SessionRunner, TerminalResult, LOOP_PANICKED};
pub use session::{SessionHandle, SessionOptions};
pub use telemetry::init_tracing;
pub use trampoline::Trampolines;
