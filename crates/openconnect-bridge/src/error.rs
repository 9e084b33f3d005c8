use std::io;
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to create VPN session")]
    Construction,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Synchronous failures of [`crate::SessionRunner::start`]. No lifecycle event
/// follows either of them.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("session capacity exhausted ({limit} loops already running)")]
    CapacityExhausted { limit: usize },
    #[error("invalid loop thread name {name:?}: names cannot contain NUL")]
    ThreadName { name: String },
    #[error("failed to spawn protocol loop thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Failures sending an [`crate::EngineCommand`].
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("engine has already been released")]
    Closed,
    #[error("failed to write engine command: {0}")]
    Io(#[from] io::Error),
}

/// Interpretation of a non-zero terminal outcome.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoopError {
    #[error(transparent)]
    Engine(EngineError),
    #[error("protocol loop panicked")]
    Panicked,
}
