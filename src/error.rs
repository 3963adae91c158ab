use miette::Diagnostic;
use std::io;
use thiserror::Error;

/// Every failure the crate can report. Lifecycle errors are modeled as a
/// closed enumeration; operations return `Result<T>` instead of panicking.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(upstack::config::invalid),
        help("Check the services and groups sections of your config file")
    )]
    ConfigInvalid(String),

    #[error("Service not found: {0}")]
    #[diagnostic(
        code(upstack::service::not_found),
        help("Check the service name against the services array in your config file")
    )]
    ServiceNotFound(String),

    #[error("Group not found: {0}")]
    #[diagnostic(
        code(upstack::group::not_found),
        help("Check the group name against the groups array in your config file")
    )]
    GroupNotFound(String),

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    #[diagnostic(
        code(upstack::group::circular),
        help("Groups cannot depend on each other in a cycle. Review the dependencies fields")
    )]
    CircularDependency(Vec<String>),

    #[error("Group '{group}' has a dependency graph deeper than the limit {max_depth}")]
    #[diagnostic(
        code(upstack::group::max_depth),
        help("Flatten the dependency chain or raise maxDepth in your config file")
    )]
    MaxDepthExceeded { group: String, max_depth: usize },

    #[error("'{0}' has already been loaded")]
    #[diagnostic(code(upstack::registry::already_loaded))]
    AlreadyLoaded(String),

    #[error("Service '{0}' failed to spawn: {1}")]
    #[diagnostic(
        code(upstack::service::spawn_failed),
        help("Check that the command exists and the working directory is correct")
    )]
    SpawnFailed(String, String),

    #[error("I/O error while reading output of service '{0}': {1}")]
    #[diagnostic(code(upstack::service::stream_io))]
    StreamIo(String, String),

    #[error("Timed out waiting for service '{0}' to stop")]
    #[diagnostic(code(upstack::service::stop_timeout))]
    StopTimedOut(String),

    #[error("Service '{0}' reported an error during startup")]
    #[diagnostic(
        code(upstack::service::reported_error),
        help("One of the service's errorPatterns matched its output. Check the service logs")
    )]
    ServiceReportedError(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
