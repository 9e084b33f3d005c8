//! Authentication forms surfaced by the engine while it obtains a session
//! cookie.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of a single form field, matching the engine's `OC_FORM_OPT_*` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormOptionType {
    Text,
    Password,
    Select,
    Hidden,
    Token,
    SsoToken,
    SsoUser,
    Other(i32),
}

impl FormOptionType {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => FormOptionType::Text,
            2 => FormOptionType::Password,
            3 => FormOptionType::Select,
            4 => FormOptionType::Hidden,
            5 => FormOptionType::Token,
            6 => FormOptionType::SsoToken,
            7 => FormOptionType::SsoUser,
            other => FormOptionType::Other(other),
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            FormOptionType::Text => 1,
            FormOptionType::Password => 2,
            FormOptionType::Select => 3,
            FormOptionType::Hidden => 4,
            FormOptionType::Token => 5,
            FormOptionType::SsoToken => 6,
            FormOptionType::SsoUser => 7,
            FormOptionType::Other(raw) => raw,
        }
    }
}

/// Outcome of processing a form, as the engine interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormResult {
    Err,
    Ok,
    Cancelled,
    NewGroup,
}

impl FormResult {
    pub fn as_raw(self) -> i32 {
        match self {
            FormResult::Err => -1,
            FormResult::Ok => 0,
            FormResult::Cancelled => 1,
            FormResult::NewGroup => 2,
        }
    }

    /// Unknown codes are treated as errors.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => FormResult::Ok,
            1 => FormResult::Cancelled,
            2 => FormResult::NewGroup,
            _ => FormResult::Err,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("'{value}' is not a valid choice for option '{option}'")]
    InvalidChoice { option: String, value: String },
    #[error("engine rejected the value for option '{option}'")]
    Rejected { option: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormChoice {
    pub name: String,
    pub label: String,
}

impl FormChoice {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
        }
    }
}

/// One prompt on an [`AuthForm`] plus the controller's answer, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormOption {
    pub name: String,
    pub label: String,
    pub kind: FormOptionType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<FormChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

impl FormOption {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: FormOptionType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            choices: Vec::new(),
            value: None,
        }
    }

    pub fn text(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, label, FormOptionType::Text)
    }

    pub fn password(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, label, FormOptionType::Password)
    }

    pub fn select(
        name: impl Into<String>,
        label: impl Into<String>,
        choices: impl IntoIterator<Item = FormChoice>,
    ) -> Self {
        let mut option = Self::new(name, label, FormOptionType::Select);
        option.choices = choices.into_iter().collect();
        option
    }

    /// Records the controller's answer. Select options only accept the name
    /// of one of their choices.
    pub fn set_value(&mut self, value: impl Into<String>) -> Result<(), FormError> {
        let value = value.into();
        if self.kind == FormOptionType::Select
            && !self.choices.iter().any(|choice| choice.name == value)
        {
            return Err(FormError::InvalidChoice {
                option: self.name.clone(),
                value,
            });
        }
        self.value = Some(value);
        Ok(())
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn clear_value(&mut self) {
        self.value = None;
    }
}

/// A set of credential prompts the engine needs answered before it can
/// proceed. Lent to the controller for the duration of one callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthForm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_group: Option<FormOption>,
    #[serde(default)]
    pub options: Vec<FormOption>,
}

impl AuthForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_auth_group(mut self, group: FormOption) -> Self {
        self.auth_group = Some(group);
        self
    }

    pub fn with_option(mut self, option: FormOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn option(&self, name: &str) -> Option<&FormOption> {
        self.options.iter().find(|opt| opt.name == name)
    }

    pub fn option_mut(&mut self, name: &str) -> Option<&mut FormOption> {
        self.options.iter_mut().find(|opt| opt.name == name)
    }

    /// Name/value pairs for every option the controller answered.
    pub fn responses(&self) -> Vec<(String, String)> {
        self.auth_group
            .iter()
            .chain(self.options.iter())
            .filter_map(|opt| opt.value().map(|v| (opt.name.clone(), v.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_selector() -> FormOption {
        FormOption::select(
            "group_list",
            "GROUP:",
            [FormChoice::new("corp", "Corporate"), FormChoice::new("lab", "Lab")],
        )
    }

    #[test]
    fn select_rejects_unknown_choice() {
        let mut group = group_selector();
        let err = group.set_value("guest").unwrap_err();
        assert_eq!(
            err,
            FormError::InvalidChoice {
                option: "group_list".into(),
                value: "guest".into(),
            }
        );
        assert_eq!(group.value(), None);

        group.set_value("lab").expect("known choice");
        assert_eq!(group.value(), Some("lab"));
    }

    #[test]
    fn responses_include_group_then_answered_options() {
        let mut form = AuthForm::new()
            .with_auth_group(group_selector())
            .with_option(FormOption::text("username", "Username:"))
            .with_option(FormOption::password("password", "Password:"))
            .with_option(FormOption::new("secondary", "Token:", FormOptionType::Token));

        form.auth_group.as_mut().unwrap().set_value("corp").unwrap();
        form.option_mut("username").unwrap().set_value("alice").unwrap();
        form.option_mut("password").unwrap().set_value("hunter2").unwrap();

        assert_eq!(
            form.responses(),
            vec![
                ("group_list".to_string(), "corp".to_string()),
                ("username".to_string(), "alice".to_string()),
                ("password".to_string(), "hunter2".to_string()),
            ]
        );
    }

    #[test]
    fn raw_codes_match_engine_constants() {
        assert_eq!(FormResult::Err.as_raw(), -1);
        assert_eq!(FormResult::Ok.as_raw(), 0);
        assert_eq!(FormResult::Cancelled.as_raw(), 1);
        assert_eq!(FormResult::NewGroup.as_raw(), 2);
        assert_eq!(FormResult::from_raw(255), FormResult::Err);

        assert_eq!(FormOptionType::from_raw(2), FormOptionType::Password);
        assert_eq!(FormOptionType::from_raw(99), FormOptionType::Other(99));
        assert_eq!(FormOptionType::SsoUser.as_raw(), 7);
    }

    #[test]
    fn form_serializes_without_empty_fields() {
        let form = AuthForm::new()
            .with_message("Please enter your credentials")
            .with_option(FormOption::text("username", "Username:"));

        let json = serde_json::to_value(&form).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": "Please enter your credentials",
                "options": [
                    { "name": "username", "label": "Username:", "kind": "text" }
                ]
            })
        );
    }
}
