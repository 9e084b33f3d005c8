//! Session handles: one configured connection and the engine that owns it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::callbacks::{InteractiveCallbacks, LifecycleEvents};
use crate::command::CommandPipe;
use crate::engine::{CsdOptions, Engine, EngineFactory, EngineId, Protocol};
use crate::error::SessionError;
use crate::progress::LogLevel;
use crate::trampoline::Trampolines;

/// Settings applied to an engine before its loop starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub protocol: Option<Protocol>,
    pub server: Option<String>,
    pub log_level: LogLevel,
    pub force_dpd: Option<u32>,
    pub allow_insecure_crypto: bool,
    pub tun_script: Option<String>,
    pub csd: Option<CsdOptions>,
}

/// Owning handle for one engine instance.
///
/// The handle is consumed by [`crate::SessionRunner::start`], so it cannot be
/// reconfigured or torn down while a loop is running. Dropping a handle that
/// was never started frees the engine immediately.
pub struct SessionHandle<E: Engine> {
    user_agent: String,
    engine: E,
    trampolines: Trampolines,
}

impl<E: Engine> SessionHandle<E> {
    /// Allocates an engine whose callbacks reach `interactive` and `lifecycle`
    /// with `context`.
    pub fn new<F, C>(
        factory: &F,
        user_agent: impl Into<String>,
        context: C,
        interactive: Arc<dyn InteractiveCallbacks<C>>,
        lifecycle: Arc<dyn LifecycleEvents<C>>,
    ) -> Result<Self, SessionError>
    where
        F: EngineFactory<Engine = E>,
        C: Send + Sync + 'static,
    {
        let user_agent = user_agent.into();
        let trampolines = Trampolines::bind(context, interactive, lifecycle);
        let engine = factory
            .create(&user_agent, trampolines.clone())
            .ok_or(SessionError::Construction)?;

        tracing::debug!(engine = %engine.id(), %user_agent, "session created");

        Ok(Self {
            user_agent,
            engine,
            trampolines,
        })
    }

    pub fn configure(&mut self, options: &SessionOptions) -> Result<(), SessionError> {
        let engine = &mut self.engine;

        engine.set_log_level(options.log_level);

        if let Some(protocol) = options.protocol {
            engine.set_protocol(protocol)?;
        }
        if let Some(server) = options.server.as_deref().filter(|s| !s.is_empty()) {
            engine.parse_url(server)?;
        }
        if let Some(seconds) = options.force_dpd.filter(|s| *s > 0) {
            engine.set_dpd(seconds);
        }
        if options.allow_insecure_crypto {
            engine.set_allow_insecure_crypto(true)?;
        }
        if let Some(script) = options.tun_script.as_deref() {
            engine.set_tun_script(script)?;
        }
        if let Some(csd) = options.csd.as_ref().filter(|csd| !csd.wrapper.is_empty()) {
            engine.setup_csd(csd)?;
        }

        tracing::debug!(engine = %engine.id(), ?options, "session configured");
        Ok(())
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn engine_id(&self) -> EngineId {
        self.engine.id()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Handle for interrupting the loop once the session has been started.
    pub fn command_pipe(&mut self) -> Result<CommandPipe, SessionError> {
        Ok(self.engine.command_pipe()?)
    }

    pub(crate) fn into_parts(self) -> (E, Trampolines) {
        (self.engine, self.trampolines)
    }
}

impl<E: Engine> std::fmt::Debug for SessionHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("user_agent", &self.user_agent)
            .field("engine", &self.engine.id())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::callbacks::lifecycle_channel;
    use crate::engine::scripted::{ConfigCall, Script};
    use crate::engine::EngineError;
    use crate::error::CommandError;

    struct Controller;
    impl InteractiveCallbacks<()> for Controller {}

    fn handle(script: &Script) -> Result<SessionHandle<crate::engine::scripted::ScriptedEngine>, SessionError> {
        let (lifecycle, _events) = lifecycle_channel();
        SessionHandle::new(script, "test-agent/1.0", (), Arc::new(Controller), Arc::new(lifecycle))
    }

    #[test]
    fn construction_failure_produces_no_handle() {
        let script = Script::new().fail_construction();
        assert!(matches!(handle(&script), Err(SessionError::Construction)));
        assert!(script.journal().user_agent().is_none());
    }

    #[test]
    fn configure_applies_every_option() {
        let script = Script::new();
        let mut session = handle(&script).expect("session");
        assert_eq!(session.user_agent(), "test-agent/1.0");

        session
            .configure(&SessionOptions {
                protocol: Some(Protocol::GlobalProtect),
                server: Some("https://vpn.example.com/gateway".into()),
                log_level: LogLevel::Debug,
                force_dpd: Some(30),
                allow_insecure_crypto: true,
                tun_script: Some("\"builtin\"".into()),
                csd: Some(CsdOptions {
                    uid: 1000,
                    silent: true,
                    wrapper: "/usr/libexec/openconnect/csd-post.sh".into(),
                }),
            })
            .expect("configure");

        let journal = script.journal();
        assert_eq!(journal.user_agent().as_deref(), Some("test-agent/1.0"));
        assert_eq!(
            journal.config_calls(),
            vec![
                ConfigCall::LogLevel(LogLevel::Debug),
                ConfigCall::Protocol(Protocol::GlobalProtect),
                ConfigCall::Url("https://vpn.example.com/gateway".into()),
                ConfigCall::Dpd(30),
                ConfigCall::AllowInsecureCrypto(true),
                ConfigCall::TunScript("\"builtin\"".into()),
                ConfigCall::Csd {
                    uid: 1000,
                    silent: true,
                    wrapper: "/usr/libexec/openconnect/csd-post.sh".into(),
                },
            ]
        );
    }

    #[test]
    fn blank_csd_wrapper_is_skipped() {
        let script = Script::new();
        let mut session = handle(&script).expect("session");
        session
            .configure(&SessionOptions {
                csd: Some(CsdOptions {
                    uid: 0,
                    silent: false,
                    wrapper: String::new(),
                }),
                ..SessionOptions::default()
            })
            .expect("configure");
        assert_eq!(
            script.journal().config_calls(),
            vec![ConfigCall::LogLevel(LogLevel::default())]
        );
    }

    #[test]
    fn command_pipe_closes_when_engine_is_freed() {
        let script = Script::new();
        let mut session = handle(&script).expect("session");
        let pipe = session.command_pipe().expect("command pipe");
        pipe.stats().expect("engine still alive");

        drop(session);
        assert_eq!(script.journal().freed(), 1);
        assert!(matches!(pipe.cancel(), Err(CommandError::Closed)));
    }

    #[test]
    fn configure_surfaces_engine_errors() {
        let script = Script::new().reject_url(-22);
        let mut session = handle(&script).expect("session");

        let err = session
            .configure(&SessionOptions {
                server: Some("not a url".into()),
                ..SessionOptions::default()
            })
            .unwrap_err();

        match err {
            SessionError::Engine(inner) => assert_eq!(inner, EngineError::new("parse URL", -22)),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
