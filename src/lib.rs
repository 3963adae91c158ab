//! # upstack
//!
//! A process supervisor for development workstations. Long-running commands
//! are declared in a JSON or YAML file, collected into groups, and groups
//! are wired into a dependency graph: a group only starts once every group
//! it depends on has reported successful startup. Any shell-executable
//! command qualifies as a service - no container runtime involved.
//!
//! | Area              | Description                                              | Key types                          |
//! |-------------------|----------------------------------------------------------|------------------------------------|
//! | **Configuration** | Parse and validate the declarative config                | [`Parser`], [`Config`]             |
//! | **Validation**    | DAG, depth, and reference checks over the group graph    | [`Graph`]                          |
//! | **Services**      | Process lifecycle driven by output patterns              | [`ServiceRuntime`], [`Status`]     |
//! | **Groups**        | Started barriers and dependency-ordered start/stop       | [`GroupRuntime`]                   |
//! | **Control**       | The operations an outer caller uses                      | [`Orchestrator`]                   |
//! | **Errors**        | One closed enumeration for everything that can go wrong  | [`Error`], [`Result`]              |
//!
//! ```no_run
//! use upstack::{Orchestrator, Parser};
//!
//! # async fn example() -> Result<(), upstack::Error> {
//! let config = Parser::new().load("upstack.yaml")?;
//! let orchestrator = Orchestrator::new(config)?;
//!
//! // blocks until every service of "web" and of its transitive
//! // dependencies has matched one of its started patterns
//! orchestrator.start_group("web").await?;
//!
//! orchestrator.shutdown_all().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dependency;
pub mod error;
pub mod orchestrator;
pub mod pipe;
pub mod registry;
pub mod service;

pub use config::{Config, GroupConfig, Parser, Rgb, ServiceConfig, StopSignal, StopSpec};
pub use dependency::Graph;
pub use error::{Error, Result};
pub use orchestrator::{GroupRuntime, Orchestrator, StatusSnapshot};
pub use pipe::{BufferSink, LineSink, PatternPipe, StdoutSink};
pub use registry::Registry;
pub use service::{ServiceRuntime, Status, StatusEvent};
