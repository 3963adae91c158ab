//! A group of services started and stopped as a unit.

use super::StartBarrier;
use crate::config::GroupConfig;
use crate::error::Result;
use crate::service::{ServiceRuntime, Status};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct GroupRuntime {
    config: Arc<GroupConfig>,
    services: Vec<Arc<ServiceRuntime>>,
}

impl GroupRuntime {
    pub fn new(config: Arc<GroupConfig>, services: Vec<Arc<ServiceRuntime>>) -> Self {
        Self { config, services }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &Arc<GroupConfig> {
        &self.config
    }

    pub fn services(&self) -> &[Arc<ServiceRuntime>] {
        &self.services
    }

    /// A group is up while every one of its services is running.
    pub fn is_up(&self) -> bool {
        !self.services.is_empty() && self.services.iter().all(|s| s.is_running())
    }

    /// Start every service that is not already running and block until each
    /// of them has fired Started once - or, under `ignore_errors`, Error.
    /// An Error without `ignore_errors` fails the cycle immediately.
    pub async fn start(&self, ignore_errors: bool) -> Result<()> {
        if self.is_up() {
            tracing::debug!("Group {} is already up", self.name());
            return Ok(());
        }

        for service in self.services.iter().filter(|s| s.is_running()) {
            tracing::info!("{} has already started", service.name());
        }

        let pending: Vec<Arc<ServiceRuntime>> = self
            .services
            .iter()
            .filter(|s| !s.is_running())
            .cloned()
            .collect();

        let barrier = Arc::new(StartBarrier::new(pending.len()));
        for service in &pending {
            // subscribe before spawning so no transition is missed
            let mut rx = service.subscribe();
            let barrier = barrier.clone();
            let name = service.name().to_string();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => match event.status {
                            Status::Started => {
                                barrier.count_down(&name);
                                break;
                            }
                            Status::Error => {
                                if ignore_errors {
                                    tracing::error!(
                                        "Error produced inside service {}; execution continues",
                                        name
                                    );
                                    barrier.count_down(&name);
                                } else {
                                    tracing::error!(
                                        "Error produced inside service {}; \
                                         groups depending on it will not be run",
                                        name
                                    );
                                    barrier.fail(&name);
                                }
                                break;
                            }
                            _ => {}
                        },
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            service.spawn_run();
        }

        barrier.wait().await
    }

    /// Stop every running service concurrently, waiting for each to reach
    /// Stopped or exhaust its own stop timeout.
    pub async fn stop(&self) {
        let stops = self
            .services
            .iter()
            .filter(|s| s.is_running())
            .map(|service| async move {
                if let Err(e) = service.stop().await {
                    tracing::warn!("Failed to stop {}: {}", service.name(), e);
                }
                if !service
                    .await_status(Status::Stopped, service.config().stop_timeout)
                    .await
                {
                    tracing::warn!(
                        "{} did not reach Stopped within its stop timeout",
                        service.name()
                    );
                }
            });
        futures::future::join_all(stops).await;
    }

    /// Interrupt every service driver in this group.
    pub fn interrupt_all(&self) {
        for service in &self.services {
            service.interrupt();
        }
    }
}
