//! Contracts the controller implements to answer the engine.
//!
//! Every method is invoked on the session's loop thread while the engine is
//! blocked waiting for the answer, so implementations should return promptly.
//! `C` is the controller's callback context; the bridge hands it back by
//! reference on every call and never looks inside it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::form::{AuthForm, FormResult};
use crate::ip_info::IpInfo;
use crate::progress::LogLevel;
use crate::runner::TerminalResult;

/// Controller's verdict on the gateway certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertDecision {
    Accept,
    Reject,
}

impl CertDecision {
    /// The engine treats zero as "trusted" and anything else as a rejection.
    pub fn as_raw(self) -> i32 {
        match self {
            CertDecision::Accept => 0,
            CertDecision::Reject => 1,
        }
    }
}

impl From<bool> for CertDecision {
    fn from(accept: bool) -> Self {
        if accept {
            CertDecision::Accept
        } else {
            CertDecision::Reject
        }
    }
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("no external browser is available")]
    Unsupported,
    #[error("failed to open {uri}: {reason}")]
    Launch { uri: String, reason: String },
}

/// The four synchronous decision points the engine calls during the loop.
///
/// The defaults mirror an unbound handler: certificates are rejected, forms
/// fail, browser delegation is declined, and progress is logged.
pub trait InteractiveCallbacks<C>: Send + Sync {
    fn validate_peer_cert(&self, _ctx: &C, _cert: &str) -> CertDecision {
        CertDecision::Reject
    }

    fn process_auth_form(&self, _ctx: &C, _form: &mut AuthForm) -> FormResult {
        FormResult::Err
    }

    /// `message` borrows a buffer the bridge frees as soon as this returns.
    fn progress(&self, _ctx: &C, level: LogLevel, message: &str) {
        level.emit(message);
    }

    fn open_external_browser(&self, _ctx: &C, _uri: &str) -> Result<(), BrowserError> {
        Err(BrowserError::Unsupported)
    }
}

/// Session-level notifications.
pub trait LifecycleEvents<C>: Send + Sync {
    /// The tunnel is up with the addressing in `info`.
    fn connected(&self, _ctx: &C, _info: &IpInfo) {}

    /// Advisory; the loop keeps running.
    fn reconnected(&self, _ctx: &C) {}

    /// Called exactly once per started loop, after every other callback.
    fn terminated(&self, ctx: &C, result: TerminalResult);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Connected(IpInfo),
    Reconnected,
    Terminated(TerminalResult),
}

/// Forwards lifecycle events into a single-consumer channel so an async
/// controller can await them on its own runtime.
#[derive(Debug, Clone)]
pub struct ChannelLifecycle {
    sender: mpsc::UnboundedSender<LifecycleEvent>,
}

pub fn lifecycle_channel() -> (ChannelLifecycle, mpsc::UnboundedReceiver<LifecycleEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ChannelLifecycle { sender }, receiver)
}

impl<C> LifecycleEvents<C> for ChannelLifecycle {
    fn connected(&self, _ctx: &C, info: &IpInfo) {
        let _ = self.sender.send(LifecycleEvent::Connected(info.clone()));
    }

    fn reconnected(&self, _ctx: &C) {
        let _ = self.sender.send(LifecycleEvent::Reconnected);
    }

    fn terminated(&self, _ctx: &C, result: TerminalResult) {
        if self.sender.send(LifecycleEvent::Terminated(result)).is_err() {
            tracing::debug!(engine = %result.engine, "lifecycle receiver dropped before termination");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineId;

    struct Unbound;
    impl InteractiveCallbacks<()> for Unbound {}

    #[test]
    fn unbound_handlers_refuse_everything() {
        let mut form = AuthForm::new();
        assert_eq!(Unbound.validate_peer_cert(&(), "sha256:00"), CertDecision::Reject);
        assert_eq!(Unbound.process_auth_form(&(), &mut form), FormResult::Err);
        assert!(matches!(
            Unbound.open_external_browser(&(), "https://sso.example.com"),
            Err(BrowserError::Unsupported)
        ));
    }

    #[test]
    fn cert_decision_raw_values() {
        assert_eq!(CertDecision::from(true).as_raw(), 0);
        assert_eq!(CertDecision::from(false).as_raw(), 1);
    }

    #[test]
    fn channel_lifecycle_forwards_in_order() {
        let (lifecycle, mut events) = lifecycle_channel();
        let result = TerminalResult {
            engine: EngineId::from_raw(7),
            code: 0,
        };

        let info = IpInfo {
            addr: Some("10.8.0.12".into()),
            ..IpInfo::default()
        };

        LifecycleEvents::<()>::connected(&lifecycle, &(), &info);
        LifecycleEvents::<()>::reconnected(&lifecycle, &());
        LifecycleEvents::<()>::terminated(&lifecycle, &(), result);

        assert_eq!(events.try_recv().unwrap(), LifecycleEvent::Connected(info));
        assert_eq!(events.try_recv().unwrap(), LifecycleEvent::Reconnected);
        assert_eq!(events.try_recv().unwrap(), LifecycleEvent::Terminated(result));
        assert!(events.try_recv().is_err());
    }
}
