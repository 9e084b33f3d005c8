//! Progress levels and the measure-then-format renderer used for every
//! progress line the engine emits.

use std::fmt::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Verbosity of a progress line, matching the engine's `PRG_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Err,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Maps a raw engine level, clamping anything out of range.
    pub fn from_raw(level: i32) -> Self {
        match level {
            i32::MIN..=0 => LogLevel::Err,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            LogLevel::Err => 0,
            LogLevel::Info => 1,
            LogLevel::Debug => 2,
            LogLevel::Trace => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Err => "err",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Re-emits an engine line as a `tracing` event at the equivalent level.
    pub fn emit(self, message: &str) {
        let message = message.trim_end();
        match self {
            LogLevel::Err => tracing::error!(target: "openconnect", "{message}"),
            LogLevel::Info => tracing::info!(target: "openconnect", "{message}"),
            LogLevel::Debug => tracing::debug!(target: "openconnect", "{message}"),
            LogLevel::Trace => tracing::trace!(target: "openconnect", "{message}"),
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown log level '{0}' (expected err, info, debug or trace)")]
pub struct ParseLogLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, ParseLogLevelError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "err" | "error" => Ok(LogLevel::Err),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ParseLogLevelError(other.to_string())),
        }
    }
}

/// Counts the bytes a formatting pass would produce without storing them.
#[derive(Default)]
struct Measure {
    len: usize,
}

impl Write for Measure {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.len = self.len.checked_add(s.len()).ok_or(fmt::Error)?;
        Ok(())
    }
}

/// Writes into a pre-sized buffer and refuses to grow it.
struct Bounded<'a> {
    buffer: &'a mut String,
    limit: usize,
}

impl Write for Bounded<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.buffer.len() + s.len() > self.limit {
            return Err(fmt::Error);
        }
        self.buffer.push_str(s);
        Ok(())
    }
}

/// Returns the exact rendered length of `args`, or `None` if formatting fails.
pub fn measure(args: fmt::Arguments<'_>) -> Option<usize> {
    let mut measure = Measure::default();
    measure.write_fmt(args).ok()?;
    Some(measure.len)
}

/// Renders `args` into a buffer of exactly the measured size.
///
/// Returns `None` when either pass fails, when the second pass would exceed
/// the measured size, or when the buffer cannot be allocated.
pub fn render(args: fmt::Arguments<'_>) -> Option<String> {
    let needed = measure(args)?;

    let mut buffer = String::new();
    buffer.try_reserve_exact(needed).ok()?;

    let mut writer = Bounded {
        buffer: &mut buffer,
        limit: needed,
    };
    writer.write_fmt(args).ok()?;

    Some(buffer)
}
