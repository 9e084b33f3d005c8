//! Out-of-band control of a running protocol loop.
//!
//! The engine polls a command channel alongside its sockets. A controller
//! takes a [`CommandPipe`] from the session before handing it to the runner
//! and keeps it for as long as it may want to interrupt the loop.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// Commands the engine's main loop understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineCommand {
    /// Ends the loop and logs out of the gateway.
    Cancel,
    /// Ends the loop with success, keeping the session cookie valid.
    Pause,
    /// Ends the loop without logging out.
    Detach,
    /// Asks the engine to report traffic statistics; the loop keeps running.
    Stats,
}

impl EngineCommand {
    /// Byte written to the engine's command pipe.
    pub fn as_byte(self) -> u8 {
        match self {
            EngineCommand::Cancel => b'x',
            EngineCommand::Pause => b'p',
            EngineCommand::Detach => b'd',
            EngineCommand::Stats => b's',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'x' => Some(EngineCommand::Cancel),
            b'p' => Some(EngineCommand::Pause),
            b'd' => Some(EngineCommand::Detach),
            b's' => Some(EngineCommand::Stats),
            _ => None,
        }
    }
}

/// Delivery side of one engine's command channel.
pub trait CommandSink: Send + Sync {
    /// Fails with [`CommandError::Closed`] once the engine has been freed.
    fn send(&self, command: EngineCommand) -> Result<(), CommandError>;
}

/// Cloneable handle for sending commands to one engine, from any thread.
#[derive(Clone)]
pub struct CommandPipe {
    sink: Arc<dyn CommandSink>,
}

impl CommandPipe {
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self { sink }
    }

    pub fn send(&self, command: EngineCommand) -> Result<(), CommandError> {
        tracing::debug!(?command, "sending engine command");
        self.sink.send(command)
    }

    pub fn cancel(&self) -> Result<(), CommandError> {
        self.send(EngineCommand::Cancel)
    }

    pub fn pause(&self) -> Result<(), CommandError> {
        self.send(EngineCommand::Pause)
    }

    pub fn detach(&self) -> Result<(), CommandError> {
        self.send(EngineCommand::Detach)
    }

    pub fn stats(&self) -> Result<(), CommandError> {
        self.send(EngineCommand::Stats)
    }
}

impl fmt::Debug for CommandPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPipe").finish_non_exhaustive()
    }
}
