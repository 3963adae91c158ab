//! The control surface.
//!
//! An [`Orchestrator`] owns the validated configuration, the dependency
//! graph, and the registry of live runtime entries. Every outer caller - the
//! command loop, tests, an IPC adapter - goes through its operations:
//! start/stop for groups and services, status snapshots, reload, and the
//! final shutdown sweep.

use super::GroupRuntime;
use crate::config::{Config, Parser};
use crate::dependency::Graph;
use crate::error::{Error, Result};
use crate::pipe::{LineSink, StdoutSink};
use crate::registry::Registry;
use crate::service::{process_tree, ServiceRuntime, Status};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Grace given to each group before its service drivers are interrupted
/// during [`Orchestrator::shutdown_all`].
const GROUP_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One row of a status query.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub service: String,
    pub status: Status,
    pub pid: Option<u32>,
}

struct State {
    config: Arc<Config>,
    graph: Arc<Graph>,
}

pub struct Orchestrator {
    state: RwLock<State>,
    registry: Registry,
    sink: Arc<dyn LineSink>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Validate `config` (references, cycles, depth - for every declared
    /// group) and build the control surface around it. Nothing is spawned.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_sink(config, Arc::new(StdoutSink))
    }

    pub fn with_sink(config: Config, sink: Arc<dyn LineSink>) -> Result<Self> {
        let graph = Graph::from_config(&config);
        graph.validate_all(config.max_depth)?;
        Ok(Self {
            state: RwLock::new(State {
                config: Arc::new(config),
                graph: Arc::new(graph),
            }),
            registry: Registry::new(),
            sink,
        })
    }

    /// Parse and load a config file in one step.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(Parser::new().load(path)?)
    }

    pub fn config(&self) -> Arc<Config> {
        self.state.read().config.clone()
    }

    /// Swap in a new configuration. Denied while anything is running; the
    /// new config is fully validated before any state is touched.
    pub fn reload(&self, config: Config) -> Result<()> {
        let graph = Graph::from_config(&config);
        graph.validate_all(config.max_depth)?;
        self.registry.clear()?;
        *self.state.write() = State {
            config: Arc::new(config),
            graph: Arc::new(graph),
        };
        Ok(())
    }

    pub fn is_anything_running(&self) -> bool {
        self.registry.services().iter().any(|s| s.is_running())
    }

    /// Look up a live service runtime by name or alias. Only services that
    /// have been referenced by a start operation exist here.
    pub fn service(&self, name: &str) -> Option<Arc<ServiceRuntime>> {
        self.registry.service(name)
    }

    /// Look up a live group runtime by name or alias.
    pub fn group(&self, name: &str) -> Option<Arc<GroupRuntime>> {
        self.registry.group(name)
    }

    fn snapshot(&self) -> (Arc<Config>, Arc<Graph>) {
        let state = self.state.read();
        (state.config.clone(), state.graph.clone())
    }

    fn ensure_service(&self, config: &Config, name: &str) -> Result<Arc<ServiceRuntime>> {
        let spec = config
            .service(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        if let Some(existing) = self.registry.service(&spec.name) {
            return Ok(existing);
        }
        let runtime = Arc::new(ServiceRuntime::new(spec.clone(), self.sink.clone()));
        self.registry.insert_service(runtime.clone())?;
        Ok(runtime)
    }

    fn ensure_group(&self, config: &Config, name: &str) -> Result<Arc<GroupRuntime>> {
        let spec = config
            .group(name)
            .ok_or_else(|| Error::GroupNotFound(name.to_string()))?;
        if let Some(existing) = self.registry.group(&spec.name) {
            return Ok(existing);
        }
        let services = spec
            .services
            .iter()
            .map(|service_ref| self.ensure_service(config, service_ref))
            .collect::<Result<Vec<_>>>()?;
        let runtime = Arc::new(GroupRuntime::new(spec.clone(), services));
        self.registry.insert_group(runtime.clone())?;
        Ok(runtime)
    }

    /// Start `name` and, first, its transitive dependencies in topological
    /// order. Blocks until every group's started barrier has released.
    pub async fn start_group(&self, name: &str) -> Result<()> {
        let (config, graph) = self.snapshot();
        let root = config
            .group(name)
            .ok_or_else(|| Error::GroupNotFound(name.to_string()))?;
        for group_name in graph.start_order(&root.name) {
            let group = self.ensure_group(&config, &group_name)?;
            group.start(config.ignore_errors).await?;
        }
        Ok(())
    }

    /// Stop every service of a previously started group.
    pub async fn stop_group(&self, name: &str) -> Result<()> {
        let group = self
            .registry
            .group(name)
            .ok_or_else(|| Error::GroupNotFound(name.to_string()))?;
        group.stop().await;
        Ok(())
    }

    /// Start a single service asynchronously; returns once the driver task
    /// is spawned. A service that cannot start now is left alone.
    pub fn start_service(&self, name: &str) -> Result<()> {
        let (config, _) = self.snapshot();
        let service = self.ensure_service(&config, name)?;
        if service.spawn_run() {
            tracing::info!("Starting {} asynchronously", service.name());
        } else {
            tracing::info!(
                "Service {} cannot be started now. Current status: {}",
                service.name(),
                service.status()
            );
        }
        Ok(())
    }

    pub async fn stop_service(&self, name: &str) -> Result<()> {
        let service = self
            .registry
            .service(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        service.stop().await
    }

    /// Snapshot one loaded service, or all of them.
    pub fn status(&self, name: Option<&str>) -> Result<Vec<StatusSnapshot>> {
        let snap = |service: &Arc<ServiceRuntime>| {
            let status = service.status();
            StatusSnapshot {
                service: service.name().to_string(),
                status,
                pid: if status == Status::Started {
                    service.pid()
                } else {
                    None
                },
            }
        };
        match name {
            Some(name) => {
                let service = self
                    .registry
                    .service(name)
                    .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
                Ok(vec![snap(&service)])
            }
            None => Ok(self.registry.services().iter().map(snap).collect()),
        }
    }

    /// Stop everything: groups in reverse level order (dependants first),
    /// each with a shutdown grace, then a sweep over any service still up.
    pub async fn shutdown_all(&self) {
        let (_, graph) = self.snapshot();
        let levels = graph.level_order().unwrap_or_else(|_| {
            vec![self
                .registry
                .groups()
                .iter()
                .map(|g| g.name().to_string())
                .collect()]
        });

        for level in levels.iter().rev() {
            for group_name in level {
                let Some(group) = self.registry.group(group_name) else {
                    continue;
                };
                if tokio::time::timeout(GROUP_SHUTDOWN_GRACE, group.stop())
                    .await
                    .is_err()
                {
                    tracing::warn!("Group {} couldn't be gracefully shut down", group.name());
                }
                group.interrupt_all();
            }
        }

        // services started outside any group, plus stragglers
        for service in self.registry.services() {
            if service.is_running() {
                service.interrupt();
            }
            if let Some(pid) = service.pid() {
                process_tree::destroy_tree(pid).await;
            }
        }
        for service in self.registry.services() {
            if let Some(handle) = service.take_driver() {
                let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
            }
        }
    }
}
