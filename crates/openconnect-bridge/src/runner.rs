//! Runs a session's blocking protocol loop on its own thread and reports the
//! outcome exactly once.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, EngineError, EngineId, LoopLimits};
use crate::error::{LoopError, RunnerError};
use crate::session::SessionHandle;

/// Outcome reported when the loop unwinds instead of returning.
pub const LOOP_PANICKED: i32 = i32::MIN;

/// The single outcome delivered when a protocol loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalResult {
    pub engine: EngineId,
    pub code: i32,
}

impl TerminalResult {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn into_result(self) -> Result<(), LoopError> {
        match self.code {
            0 => Ok(()),
            LOOP_PANICKED => Err(LoopError::Panicked),
            code => Err(LoopError::Engine(EngineError::new("main loop", code))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub limits: LoopLimits,
    /// Maximum number of loops running at once; `None` means unbounded.
    pub max_active: Option<usize>,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            limits: LoopLimits::default(),
            max_active: None,
            thread_name_prefix: "oc-session".to_string(),
            stack_size: None,
        }
    }
}

/// Starts protocol loops on detached threads.
///
/// The runner never stops a loop. Controllers interrupt one through the
/// session's [`crate::CommandPipe`], and the engine's answer still arrives as
/// the terminal result.
#[derive(Debug, Clone)]
pub struct SessionRunner {
    config: Arc<RunnerConfig>,
    active: Arc<AtomicUsize>,
}

impl Default for SessionRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

struct ActiveSlot(Arc<AtomicUsize>);

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SessionRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config: Arc::new(config),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Number of loops that have been started and not yet finished.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    fn reserve(&self) -> Result<ActiveSlot, RunnerError> {
        let limit = self.config.max_active;
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |running| match limit {
                Some(limit) if running >= limit => None,
                _ => Some(running + 1),
            })
            .map(|_| ActiveSlot(Arc::clone(&self.active)))
            .map_err(|_| RunnerError::CapacityExhausted {
                limit: limit.unwrap_or(usize::MAX),
            })
    }

    /// Moves `session` onto a new thread and enters the engine's main loop.
    ///
    /// On `Ok` exactly one terminal result will later reach the session's
    /// lifecycle handler. On `Err` none ever will.
    pub fn start<E: Engine>(&self, session: SessionHandle<E>) -> Result<EngineId, RunnerError> {
        let engine_id = session.engine_id();
        let name = format!("{}-{:x}", self.config.thread_name_prefix, engine_id.as_raw());
        if name.contains('\0') {
            return Err(RunnerError::ThreadName { name });
        }
        let slot = self.reserve()?;
        let limits = self.config.limits;
        let span = tracing::info_span!("session_loop", engine = %engine_id);

        let mut builder = thread::Builder::new().name(name);
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        builder
            .spawn(move || {
                let _slot = slot;
                let _entered = span.enter();
                run_loop(session, limits);
            })
            .map_err(|err| {
                tracing::warn!(engine = %engine_id, error = %err, "failed to spawn protocol loop");
                RunnerError::Spawn(err)
            })?;

        tracing::debug!(engine = %engine_id, ?limits, "protocol loop started");
        Ok(engine_id)
    }
}

fn run_loop<E: Engine>(session: SessionHandle<E>, limits: LoopLimits) {
    let (mut engine, trampolines) = session.into_parts();
    let engine_id = engine.id();

    let code = match panic::catch_unwind(AssertUnwindSafe(|| engine.main_loop(limits))) {
        Ok(code) => code,
        Err(_) => {
            tracing::error!("protocol loop panicked");
            LOOP_PANICKED
        }
    };
    tracing::info!(code, "protocol loop exited");

    let result = TerminalResult {
        engine: engine_id,
        code,
    };
    if panic::catch_unwind(AssertUnwindSafe(|| trampolines.terminated(result))).is_err() {
        tracing::error!("terminal result handler panicked");
    }

    // Only now is nothing left that could call back into the engine.
    drop(engine);
}
