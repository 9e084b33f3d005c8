//! The engine's only way back into controller code.
//!
//! A [`Trampolines`] value binds one callback context to the controller's
//! callback implementations, erases the context type, and exposes the
//! primitive-valued entry points an engine calls.

use std::fmt;
use std::sync::Arc;

use crate::callbacks::{InteractiveCallbacks, LifecycleEvents};
use crate::form::AuthForm;
use crate::ip_info::IpInfo;
use crate::progress::{self, LogLevel};
use crate::runner::TerminalResult;

trait CallbackSink: Send + Sync {
    fn validate_peer_cert(&self, cert: &str) -> i32;
    fn process_auth_form(&self, form: &mut AuthForm) -> i32;
    fn progress(&self, level: LogLevel, message: &str);
    fn open_external_browser(&self, uri: &str) -> i32;
    fn connected(&self, info: &IpInfo);
    fn reconnected(&self);
    fn terminated(&self, result: TerminalResult);
}

struct Bound<C> {
    context: C,
    interactive: Arc<dyn InteractiveCallbacks<C>>,
    lifecycle: Arc<dyn LifecycleEvents<C>>,
}

impl<C: Send + Sync> CallbackSink for Bound<C> {
    fn validate_peer_cert(&self, cert: &str) -> i32 {
        let decision = self.interactive.validate_peer_cert(&self.context, cert);
        tracing::debug!(?decision, "peer certificate checked");
        decision.as_raw()
    }

    fn process_auth_form(&self, form: &mut AuthForm) -> i32 {
        let result = self.interactive.process_auth_form(&self.context, form);
        tracing::debug!(?result, options = form.options.len(), "auth form processed");
        result.as_raw()
    }

    fn progress(&self, level: LogLevel, message: &str) {
        self.interactive.progress(&self.context, level, message);
    }

    fn open_external_browser(&self, uri: &str) -> i32 {
        match self.interactive.open_external_browser(&self.context, uri) {
            Ok(()) => 0,
            Err(err) => {
                tracing::warn!(%uri, error = %err, "external browser delegation declined");
                1
            }
        }
    }

    fn connected(&self, info: &IpInfo) {
        self.lifecycle.connected(&self.context, info);
    }

    fn reconnected(&self) {
        self.lifecycle.reconnected(&self.context);
    }

    fn terminated(&self, result: TerminalResult) {
        self.lifecycle.terminated(&self.context, result);
    }
}

/// Dispatcher handed to an engine at construction time.
#[derive(Clone)]
pub struct Trampolines {
    sink: Arc<dyn CallbackSink>,
}

impl Trampolines {
    pub(crate) fn bind<C>(
        context: C,
        interactive: Arc<dyn InteractiveCallbacks<C>>,
        lifecycle: Arc<dyn LifecycleEvents<C>>,
    ) -> Self
    where
        C: Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(Bound {
                context,
                interactive,
                lifecycle,
            }),
        }
    }

    /// Returns `0` to trust the certificate, `1` to reject it.
    pub fn validate_peer_cert(&self, cert: &str) -> i32 {
        self.sink.validate_peer_cert(cert)
    }

    /// Returns the raw form result code.
    pub fn process_auth_form(&self, form: &mut AuthForm) -> i32 {
        self.sink.process_auth_form(form)
    }

    /// Formats and delivers one progress line. Lines that fail to format or
    /// cannot be allocated are dropped without reaching the controller.
    pub fn progress(&self, level: i32, args: fmt::Arguments<'_>) {
        match progress::render(args) {
            Some(message) => self.sink.progress(LogLevel::from_raw(level), &message),
            None => tracing::trace!(level, "dropped unformattable progress line"),
        }
    }

    /// Delivers a line the engine already formatted.
    pub fn progress_message(&self, level: i32, message: &str) {
        self.sink.progress(LogLevel::from_raw(level), message);
    }

    /// Returns `0` if the controller took over the URI, `1` otherwise.
    pub fn open_external_browser(&self, uri: &str) -> i32 {
        self.sink.open_external_browser(uri)
    }

    pub fn connected(&self, info: &IpInfo) {
        tracing::info!(addr = ?info.addr, addr6 = ?info.addr6, mtu = info.mtu, "tunnel established");
        self.sink.connected(info);
    }

    pub fn reconnected(&self) {
        tracing::info!("engine reconnected");
        self.sink.reconnected();
    }

    pub(crate) fn terminated(&self, result: TerminalResult) {
        self.sink.terminated(result);
    }
}

impl fmt::Debug for Trampolines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trampolines").finish_non_exhaustive()
    }
}
