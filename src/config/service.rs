//! Validated service descriptors.
//!
//! A [`ServiceConfig`] is built once by the config parser and shared by
//! reference afterwards; nothing mutates it at runtime.

use super::Rgb;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default stop timeout when the config does not specify one.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Signals a service may be stopped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Int,
    Term,
    Hup,
    Kill,
    Quit,
}

impl StopSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopSignal::Int => "SIGINT",
            StopSignal::Term => "SIGTERM",
            StopSignal::Hup => "SIGHUP",
            StopSignal::Kill => "SIGKILL",
            StopSignal::Quit => "SIGQUIT",
        }
    }

    #[cfg(unix)]
    pub fn to_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            StopSignal::Int => Signal::SIGINT,
            StopSignal::Term => Signal::SIGTERM,
            StopSignal::Hup => Signal::SIGHUP,
            StopSignal::Kill => Signal::SIGKILL,
            StopSignal::Quit => Signal::SIGQUIT,
        }
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a service is asked to stop: either a signal delivered to its whole
/// process tree, or a shell command run in the service's working directory.
#[derive(Debug, Clone)]
pub enum StopSpec {
    Signal(StopSignal),
    Command(String),
}

impl StopSpec {
    /// A recognized signal name (case-insensitive, surrounding whitespace
    /// ignored) is a signal; anything else is treated as a shell command.
    pub fn parse(spec: &str) -> Self {
        match spec.trim().to_uppercase().as_str() {
            "SIGINT" => StopSpec::Signal(StopSignal::Int),
            "SIGTERM" => StopSpec::Signal(StopSignal::Term),
            "SIGHUP" => StopSpec::Signal(StopSignal::Hup),
            "SIGKILL" => StopSpec::Signal(StopSignal::Kill),
            "SIGQUIT" => StopSpec::Signal(StopSignal::Quit),
            _ => StopSpec::Command(spec.to_string()),
        }
    }
}

impl Default for StopSpec {
    fn default() -> Self {
        StopSpec::Signal(StopSignal::Term)
    }
}

/// Everything needed to run and observe one service.
#[derive(Debug)]
pub struct ServiceConfig {
    /// Unique name, also used as the output prefix.
    pub name: String,
    /// Alternative identifiers, unique across all services.
    pub aliases: Vec<String>,
    /// Shell-evaluated start command.
    pub start: String,
    /// Working directory for the start and stop commands.
    pub work_dir: PathBuf,
    /// Optional file redirected into the start command's stdin.
    pub stdin: Option<PathBuf>,
    /// How to stop the service.
    pub stop: StopSpec,
    /// How long to wait for a stop command before force-destroying.
    pub stop_timeout: Duration,
    /// Optional file redirected into the stop command's stdin.
    pub stop_stdin: Option<PathBuf>,
    /// First match in stdout promotes the service to Started.
    pub started_patterns: Vec<Regex>,
    /// First match in stderr demotes the service to Error.
    pub error_patterns: Vec<Regex>,
    /// Display color for the service name.
    pub color: Rgb,
}
