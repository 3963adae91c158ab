//! Service lifecycle statuses and the status event bus.

use chrono::{DateTime, Utc};
use std::fmt;

/// Capacity of each service's status broadcast channel. Sends never block;
/// a receiver that lags past this many events loses the oldest ones.
pub const STATUS_BUS_CAPACITY: usize = 64;

/// Lifecycle status of a service.
///
/// Transitions are strictly ordered
/// `Loaded -> Starting -> (Started|Error)* -> Stopping -> Stopped`,
/// and `Stopped -> Starting` on a re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Configuration loaded, process never started (or start failed).
    Loaded,
    /// Start command is being executed.
    Starting,
    /// The service notified a successful start-up.
    Started,
    /// The service notified that an error occurred.
    Error,
    /// Stop has begun.
    Stopping,
    /// The process is down.
    Stopped,
}

impl Status {
    /// A service can only be (re)started from its initial or final state.
    pub fn can_start(&self) -> bool {
        matches!(self, Status::Loaded | Status::Stopped)
    }

    /// A service counts as running from the moment it starts until it has
    /// fully stopped. Error is not terminal: the process may still be up.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Status::Starting | Status::Started | Status::Error | Status::Stopping
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Loaded => "Loaded",
            Status::Starting => "Starting",
            Status::Started => "Started",
            Status::Error => "Error",
            Status::Stopping => "Stopping",
            Status::Stopped => "Stopped",
        };
        f.write_str(text)
    }
}

/// One transition on a service's status bus.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub service: String,
    pub status: Status,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn now(service: &str, status: Status) -> Self {
        Self {
            service: service.to_string(),
            status,
            at: Utc::now(),
        }
    }
}
