//! In-process engine that replays a script of callbacks instead of talking to
//! a gateway. Used by the test suite and by controllers exercising their
//! callback handling without a native library.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use super::{CsdOptions, Engine, EngineError, EngineFactory, EngineId, LoopLimits, Protocol};
use crate::command::{CommandPipe, CommandSink, EngineCommand};
use crate::error::CommandError;
use crate::form::{AuthForm, FormResult};
use crate::ip_info::IpInfo;
use crate::progress::LogLevel;
use crate::trampoline::Trampolines;

/// Outcome when the controller rejects the gateway certificate (`-EINVAL`).
pub const CERT_REJECTED: i32 = -22;
/// Outcome when the controller cancels an authentication form.
pub const FORM_CANCELLED: i32 = 1;
/// Outcome when authentication fails or browser delegation is declined (`-EIO`).
pub const FORM_FAILED: i32 = -5;
/// Outcome of [`EngineCommand::Cancel`] (`-EINTR`).
pub const CANCELLED: i32 = -4;
/// Outcome of [`EngineCommand::Detach`] (`-ECONNABORTED`).
pub const DETACHED: i32 = -103;
/// Outcome of [`EngineCommand::Pause`].
pub const PAUSED: i32 = 0;

type Hook = Arc<dyn Fn(&Trampolines) -> Option<i32> + Send + Sync>;

/// One thing the scripted engine does during its main loop.
#[derive(Clone)]
pub enum Step {
    Progress { level: i32, message: String },
    PeerCert { cert: String },
    AuthForm(AuthForm),
    ExternalBrowser { uri: String },
    Connected(IpInfo),
    Reconnected,
    /// Holds the established tunnel open until a command ends the loop.
    Idle,
    /// Blocks the loop until the gate is opened.
    WaitFor(Gate),
    /// Runs arbitrary code on the loop thread; `Some(code)` ends the loop.
    Invoke(Hook),
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Progress { level, message } => f
                .debug_struct("Progress")
                .field("level", level)
                .field("message", message)
                .finish(),
            Step::PeerCert { cert } => f.debug_struct("PeerCert").field("cert", cert).finish(),
            Step::AuthForm(form) => f.debug_tuple("AuthForm").field(form).finish(),
            Step::ExternalBrowser { uri } => {
                f.debug_struct("ExternalBrowser").field("uri", uri).finish()
            }
            Step::Connected(info) => f.debug_tuple("Connected").field(&info.addr).finish(),
            Step::Reconnected => f.write_str("Reconnected"),
            Step::Idle => f.write_str("Idle"),
            Step::WaitFor(_) => f.write_str("WaitFor"),
            Step::Invoke(_) => f.write_str("Invoke"),
        }
    }
}

/// A latch the test thread opens to let a blocked loop continue.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (open, cvar) = &*self.inner;
        *open.lock() = true;
        cvar.notify_all();
    }

    pub fn wait(&self) {
        let (open, cvar) = &*self.inner;
        let mut guard = open.lock();
        while !*guard {
            cvar.wait(&mut guard);
        }
    }
}

/// Configuration calls recorded in the order the engine received them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigCall {
    LogLevel(LogLevel),
    Protocol(Protocol),
    Url(String),
    Dpd(u32),
    AllowInsecureCrypto(bool),
    TunScript(String),
    Csd { uid: u32, silent: bool, wrapper: String },
}

/// Commands waiting for the loop thread to pick them up.
#[derive(Default)]
struct CommandQueue {
    pending: Mutex<VecDeque<EngineCommand>>,
    arrived: Condvar,
}

impl CommandQueue {
    fn push(&self, command: EngineCommand) {
        self.pending.lock().push_back(command);
        self.arrived.notify_all();
    }

    fn try_pop(&self) -> Option<EngineCommand> {
        self.pending.lock().pop_front()
    }

    fn wait_pop(&self) -> EngineCommand {
        let mut pending = self.pending.lock();
        loop {
            if let Some(command) = pending.pop_front() {
                return command;
            }
            self.arrived.wait(&mut pending);
        }
    }
}

struct QueueSink(Weak<CommandQueue>);

impl CommandSink for QueueSink {
    fn send(&self, command: EngineCommand) -> Result<(), CommandError> {
        let queue = self.0.upgrade().ok_or(CommandError::Closed)?;
        queue.push(command);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct JournalState {
    user_agent: Option<String>,
    config_calls: Vec<ConfigCall>,
    cert_answers: Vec<i32>,
    form_answers: Vec<i32>,
    browser_answers: Vec<i32>,
    submitted: Vec<Vec<(String, String)>>,
    commands: Vec<EngineCommand>,
    limits: Option<LoopLimits>,
    freed: usize,
}

/// Everything engines built from one [`Script`] observed.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    state: Arc<Mutex<JournalState>>,
}

impl Journal {
    pub fn user_agent(&self) -> Option<String> {
        self.state.lock().user_agent.clone()
    }

    pub fn config_calls(&self) -> Vec<ConfigCall> {
        self.state.lock().config_calls.clone()
    }

    /// Raw values returned by the certificate trampoline.
    pub fn cert_answers(&self) -> Vec<i32> {
        self.state.lock().cert_answers.clone()
    }

    /// Raw values returned by the form trampoline.
    pub fn form_answers(&self) -> Vec<i32> {
        self.state.lock().form_answers.clone()
    }

    pub fn browser_answers(&self) -> Vec<i32> {
        self.state.lock().browser_answers.clone()
    }

    /// Responses of every form the controller accepted.
    pub fn submitted_forms(&self) -> Vec<Vec<(String, String)>> {
        self.state.lock().submitted.clone()
    }

    /// Commands the loop acted on, in order.
    pub fn commands(&self) -> Vec<EngineCommand> {
        self.state.lock().commands.clone()
    }

    pub fn limits(&self) -> Option<LoopLimits> {
        self.state.lock().limits
    }

    /// Number of engines from this script that have been dropped.
    pub fn freed(&self) -> usize {
        self.state.lock().freed
    }

    fn record(&self, f: impl FnOnce(&mut JournalState)) {
        f(&mut self.state.lock());
    }
}

/// Builder for scripted engines. Every engine created from the same script
/// replays the same steps and writes to the same [`Journal`].
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
    exit_code: i32,
    fail_construction: bool,
    reject_url: Option<i32>,
    journal: Journal,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(mut self, level: i32, message: impl Into<String>) -> Self {
        self.steps.push(Step::Progress {
            level,
            message: message.into(),
        });
        self
    }

    pub fn peer_cert(mut self, cert: impl Into<String>) -> Self {
        self.steps.push(Step::PeerCert { cert: cert.into() });
        self
    }

    pub fn auth_form(mut self, form: AuthForm) -> Self {
        self.steps.push(Step::AuthForm(form));
        self
    }

    pub fn external_browser(mut self, uri: impl Into<String>) -> Self {
        self.steps.push(Step::ExternalBrowser { uri: uri.into() });
        self
    }

    /// Reports an established tunnel with `info`.
    pub fn connected(mut self, info: IpInfo) -> Self {
        self.steps.push(Step::Connected(info));
        self
    }

    pub fn idle(mut self) -> Self {
        self.steps.push(Step::Idle);
        self
    }

    pub fn reconnect(mut self) -> Self {
        self.steps.push(Step::Reconnected);
        self
    }

    pub fn wait_for(mut self, gate: &Gate) -> Self {
        self.steps.push(Step::WaitFor(gate.clone()));
        self
    }

    pub fn invoke<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Trampolines) -> Option<i32> + Send + Sync + 'static,
    {
        self.steps.push(Step::Invoke(Arc::new(hook)));
        self
    }

    /// Code returned once every step has run.
    pub fn exit(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn fail_construction(mut self) -> Self {
        self.fail_construction = true;
        self
    }

    /// Makes `parse_url` fail with `code`.
    pub fn reject_url(mut self, code: i32) -> Self {
        self.reject_url = Some(code);
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl EngineFactory for Script {
    type Engine = ScriptedEngine;

    fn create(&self, user_agent: &str, trampolines: Trampolines) -> Option<ScriptedEngine> {
        if self.fail_construction {
            tracing::debug!("scripted engine construction refused");
            return None;
        }
        self.journal
            .record(|state| state.user_agent = Some(user_agent.to_string()));

        Some(ScriptedEngine {
            id: EngineId::next(),
            script: self.clone(),
            trampolines,
            commands: Arc::default(),
        })
    }
}

pub struct ScriptedEngine {
    id: EngineId,
    script: Script,
    trampolines: Trampolines,
    commands: Arc<CommandQueue>,
}

impl ScriptedEngine {
    /// `Some(code)` when the command ends the loop.
    fn apply_command(&self, command: EngineCommand) -> Option<i32> {
        self.script.journal.record(|state| state.commands.push(command));
        match command {
            EngineCommand::Cancel => Some(CANCELLED),
            EngineCommand::Detach => Some(DETACHED),
            EngineCommand::Pause => Some(PAUSED),
            EngineCommand::Stats => {
                self.trampolines
                    .progress(LogLevel::Info.as_raw(), format_args!("statistics requested"));
                None
            }
        }
    }

    fn drain_commands(&self) -> Option<i32> {
        while let Some(command) = self.commands.try_pop() {
            if let Some(code) = self.apply_command(command) {
                return Some(code);
            }
        }
        None
    }

    fn run_step(&self, step: &Step) -> Option<i32> {
        let journal = &self.script.journal;
        let tramp = &self.trampolines;

        match step {
            Step::Progress { level, message } => {
                tramp.progress(*level, format_args!("{message}"));
                None
            }
            Step::PeerCert { cert } => {
                let raw = tramp.validate_peer_cert(cert);
                journal.record(|state| state.cert_answers.push(raw));
                (raw != 0).then_some(CERT_REJECTED)
            }
            Step::AuthForm(form) => {
                let mut form = form.clone();
                let raw = tramp.process_auth_form(&mut form);
                journal.record(|state| state.form_answers.push(raw));
                match FormResult::from_raw(raw) {
                    FormResult::Ok => {
                        let responses = form.responses();
                        journal.record(|state| state.submitted.push(responses));
                        None
                    }
                    FormResult::NewGroup => None,
                    FormResult::Cancelled => Some(FORM_CANCELLED),
                    FormResult::Err => Some(FORM_FAILED),
                }
            }
            Step::ExternalBrowser { uri } => {
                let raw = tramp.open_external_browser(uri);
                journal.record(|state| state.browser_answers.push(raw));
                (raw != 0).then_some(FORM_FAILED)
            }
            Step::Connected(info) => {
                tramp.connected(info);
                None
            }
            Step::Reconnected => {
                tramp.reconnected();
                None
            }
            Step::Idle => loop {
                if let Some(code) = self.apply_command(self.commands.wait_pop()) {
                    break Some(code);
                }
            },
            Step::WaitFor(gate) => {
                gate.wait();
                None
            }
            Step::Invoke(hook) => hook(tramp),
        }
    }
}

impl Engine for ScriptedEngine {
    fn id(&self) -> EngineId {
        self.id
    }

    fn set_log_level(&mut self, level: LogLevel) {
        self.script
            .journal
            .record(|state| state.config_calls.push(ConfigCall::LogLevel(level)));
    }

    fn set_protocol(&mut self, protocol: Protocol) -> Result<(), EngineError> {
        self.script
            .journal
            .record(|state| state.config_calls.push(ConfigCall::Protocol(protocol)));
        Ok(())
    }

    fn parse_url(&mut self, url: &str) -> Result<(), EngineError> {
        if let Some(code) = self.script.reject_url {
            return Err(EngineError::new("parse URL", code));
        }
        self.script
            .journal
            .record(|state| state.config_calls.push(ConfigCall::Url(url.to_string())));
        Ok(())
    }

    fn set_dpd(&mut self, min_seconds: u32) {
        self.script
            .journal
            .record(|state| state.config_calls.push(ConfigCall::Dpd(min_seconds)));
    }

    fn set_allow_insecure_crypto(&mut self, allowed: bool) -> Result<(), EngineError> {
        self.script
            .journal
            .record(|state| state.config_calls.push(ConfigCall::AllowInsecureCrypto(allowed)));
        Ok(())
    }

    fn set_tun_script(&mut self, script: &str) -> Result<(), EngineError> {
        self.script
            .journal
            .record(|state| state.config_calls.push(ConfigCall::TunScript(script.to_string())));
        Ok(())
    }

    fn setup_csd(&mut self, csd: &CsdOptions) -> Result<(), EngineError> {
        let call = ConfigCall::Csd {
            uid: csd.uid,
            silent: csd.silent,
            wrapper: csd.wrapper.clone(),
        };
        self.script.journal.record(|state| state.config_calls.push(call));
        Ok(())
    }

    fn command_pipe(&mut self) -> Result<CommandPipe, EngineError> {
        Ok(CommandPipe::new(Arc::new(QueueSink(Arc::downgrade(
            &self.commands,
        )))))
    }

    fn main_loop(&mut self, limits: LoopLimits) -> i32 {
        self.script.journal.record(|state| state.limits = Some(limits));

        for step in &self.script.steps {
            if let Some(code) = self.drain_commands().or_else(|| self.run_step(step)) {
                tracing::debug!(?step, code, "script ended early");
                return code;
            }
        }
        self.drain_commands().unwrap_or(self.script.exit_code)
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.script.journal.record(|state| state.freed += 1);
    }
}

impl fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("id", &self.id)
            .field("steps", &self.script.steps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{CertDecision, InteractiveCallbacks, LifecycleEvents};
    use crate::form::FormOption;
    use crate::runner::TerminalResult;

    struct Accepting;
    impl InteractiveCallbacks<()> for Accepting {
        fn validate_peer_cert(&self, _ctx: &(), _cert: &str) -> CertDecision {
            CertDecision::Accept
        }

        fn process_auth_form(&self, _ctx: &(), form: &mut AuthForm) -> FormResult {
            for opt in form.options.iter_mut() {
                opt.set_value("x").unwrap();
            }
            FormResult::Ok
        }
    }

    struct Ignore;
    impl LifecycleEvents<()> for Ignore {
        fn terminated(&self, _ctx: &(), _result: TerminalResult) {}
    }

    fn trampolines(interactive: Arc<dyn InteractiveCallbacks<()>>) -> Trampolines {
        Trampolines::bind((), interactive, Arc::new(Ignore))
    }

    #[test]
    fn replays_steps_and_records_answers() {
        let script = Script::new()
            .peer_cert("sha256:aa")
            .auth_form(AuthForm::new().with_option(FormOption::text("username", "User:")))
            .exit(3);
        let mut engine = script.create("agent", trampolines(Arc::new(Accepting))).unwrap();

        assert_eq!(engine.main_loop(LoopLimits::default()), 3);

        let journal = script.journal();
        assert_eq!(journal.cert_answers(), vec![0]);
        assert_eq!(journal.form_answers(), vec![0]);
        assert_eq!(
            journal.submitted_forms(),
            vec![vec![("username".to_string(), "x".to_string())]]
        );
        assert_eq!(journal.limits(), Some(LoopLimits::default()));

        drop(engine);
        assert_eq!(journal.freed(), 1);
    }

    #[test]
    fn unbound_controller_stops_at_first_decision() {
        struct Unbound;
        impl InteractiveCallbacks<()> for Unbound {}

        let script = Script::new().peer_cert("sha256:aa").progress(1, "never");
        let mut engine = script.create("agent", trampolines(Arc::new(Unbound))).unwrap();
        assert_eq!(engine.main_loop(LoopLimits::default()), CERT_REJECTED);
        assert_eq!(script.journal().cert_answers(), vec![1]);

        let script = Script::new().auth_form(AuthForm::new());
        let mut engine = script.create("agent", trampolines(Arc::new(Unbound))).unwrap();
        assert_eq!(engine.main_loop(LoopLimits::default()), FORM_FAILED);

        let script = Script::new().external_browser("https://sso.example.com");
        let mut engine = script.create("agent", trampolines(Arc::new(Unbound))).unwrap();
        assert_eq!(engine.main_loop(LoopLimits::default()), FORM_FAILED);
        assert_eq!(script.journal().browser_answers(), vec![1]);
    }

    #[test]
    fn idle_loop_runs_until_a_command_ends_it() {
        let info = IpInfo {
            addr: Some("10.8.0.12".into()),
            mtu: 1399,
            ..IpInfo::default()
        };
        let idling = Gate::new();
        let reached = idling.clone();
        let script = Script::new()
            .connected(info)
            .invoke(move |_| {
                reached.open();
                None
            })
            .idle()
            .progress(1, "never");
        let mut engine = script.create("agent", trampolines(Arc::new(Accepting))).unwrap();
        let pipe = engine.command_pipe().unwrap();
        let looping = std::thread::spawn(move || engine.main_loop(LoopLimits::default()));

        idling.wait();
        pipe.stats().unwrap();
        pipe.detach().unwrap();
        assert_eq!(looping.join().unwrap(), DETACHED);
        assert!(matches!(pipe.stats(), Err(CommandError::Closed)));
        assert_eq!(
            script.journal().commands(),
            vec![EngineCommand::Stats, EngineCommand::Detach]
        );
    }

    #[test]
    fn commands_are_seen_between_steps() {
        let script = Script::new().progress(1, "one").progress(1, "two").exit(7);
        let mut engine = script.create("agent", trampolines(Arc::new(Accepting))).unwrap();
        engine.command_pipe().unwrap().pause().unwrap();
        assert_eq!(engine.main_loop(LoopLimits::default()), PAUSED);

        let mut engine = script.create("agent", trampolines(Arc::new(Accepting))).unwrap();
        assert_eq!(engine.main_loop(LoopLimits::default()), 7);
        engine.command_pipe().unwrap().cancel().unwrap();
        drop(engine);

        assert_eq!(script.journal().commands(), vec![EngineCommand::Pause]);
    }

    #[test]
    fn gate_releases_waiter() {
        let gate = Gate::new();
        let waiter = {
            let gate = gate.clone();
            std::thread::spawn(move || gate.wait())
        };
        gate.open();
        waiter.join().unwrap();
        // Already open: returns immediately.
        gate.wait();
    }
}
