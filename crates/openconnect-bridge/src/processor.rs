//! Reusable building blocks for answering [`AuthForm`]s.

use crate::form::{AuthForm, FormOptionType, FormResult};

pub trait FormProcessor: Send + Sync {
    fn process_form(&self, form: &mut AuthForm) -> FormResult;
}

impl<F> FormProcessor for F
where
    F: Fn(&mut AuthForm) -> FormResult + Send + Sync,
{
    fn process_form(&self, form: &mut AuthForm) -> FormResult {
        self(form)
    }
}

/// Fills text options named `user*` and every password option.
#[derive(Clone)]
pub struct CredentialsProcessor {
    pub username: String,
    pub password: String,
}

impl CredentialsProcessor {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for CredentialsProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsProcessor")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl FormProcessor for CredentialsProcessor {
    fn process_form(&self, form: &mut AuthForm) -> FormResult {
        for opt in form.options.iter_mut() {
            let value = match opt.kind {
                FormOptionType::Text if opt.name.to_ascii_lowercase().starts_with("user") => {
                    &self.username
                }
                FormOptionType::Password => &self.password,
                _ => continue,
            };
            if let Err(err) = opt.set_value(value.as_str()) {
                tracing::warn!(error = %err, "credential rejected");
                return FormResult::Err;
            }
        }
        FormResult::Ok
    }
}

/// Logs the form's text and prompts without answering anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProcessor;

impl FormProcessor for LoggingProcessor {
    fn process_form(&self, form: &mut AuthForm) -> FormResult {
        tracing::info!(
            banner = form.banner.as_deref().unwrap_or_default(),
            message = form.message.as_deref().unwrap_or_default(),
            error = form.error.as_deref().unwrap_or_default(),
            "processing auth form"
        );
        for opt in form.auth_group.iter().chain(form.options.iter()) {
            tracing::debug!(name = %opt.name, label = %opt.label, kind = ?opt.kind, "option");
            for choice in &opt.choices {
                tracing::debug!(name = %choice.name, label = %choice.label, "choice");
            }
        }
        FormResult::Ok
    }
}

/// Runs processors in order; the first result other than `Ok` wins.
#[derive(Default)]
pub struct AggregateProcessor {
    processors: Vec<Box<dyn FormProcessor>>,
}

impl AggregateProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, processor: impl FormProcessor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl FormProcessor for AggregateProcessor {
    fn process_form(&self, form: &mut AuthForm) -> FormResult {
        for processor in &self.processors {
            match processor.process_form(form) {
                FormResult::Ok => {}
                other => return other,
            }
        }
        FormResult::Ok
    }
}
