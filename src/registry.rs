//! Name and alias lookup for live runtime entries.
//!
//! The registry is an explicit value owned by the orchestrator, not a
//! process-wide static: tests get a fresh one each. Both maps key every
//! entry under its name and under each alias.

use crate::error::{Error, Result};
use crate::orchestrator::GroupRuntime;
use crate::service::ServiceRuntime;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct Registry {
    services: Mutex<HashMap<String, Arc<ServiceRuntime>>>,
    /// Same services without alias duplicates, in insertion order.
    unique_services: Mutex<Vec<Arc<ServiceRuntime>>>,
    groups: Mutex<HashMap<String, Arc<GroupRuntime>>>,
    unique_groups: Mutex<Vec<Arc<GroupRuntime>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(&self, name: &str) -> Option<Arc<ServiceRuntime>> {
        self.services.lock().get(name).cloned()
    }

    pub fn group(&self, name: &str) -> Option<Arc<GroupRuntime>> {
        self.groups.lock().get(name).cloned()
    }

    pub fn services(&self) -> Vec<Arc<ServiceRuntime>> {
        self.unique_services.lock().clone()
    }

    pub fn groups(&self) -> Vec<Arc<GroupRuntime>> {
        self.unique_groups.lock().clone()
    }

    pub fn insert_service(&self, service: Arc<ServiceRuntime>) -> Result<()> {
        let config = service.config().clone();
        let mut map = self.services.lock();
        for id in std::iter::once(&config.name).chain(config.aliases.iter()) {
            if map.contains_key(id) {
                return Err(Error::AlreadyLoaded(id.clone()));
            }
        }
        for id in std::iter::once(&config.name).chain(config.aliases.iter()) {
            map.insert(id.clone(), service.clone());
        }
        self.unique_services.lock().push(service);
        Ok(())
    }

    pub fn insert_group(&self, group: Arc<GroupRuntime>) -> Result<()> {
        let config = group.config().clone();
        let mut map = self.groups.lock();
        for id in std::iter::once(&config.name).chain(config.aliases.iter()) {
            if map.contains_key(id) {
                return Err(Error::AlreadyLoaded(id.clone()));
            }
        }
        for id in std::iter::once(&config.name).chain(config.aliases.iter()) {
            map.insert(id.clone(), group.clone());
        }
        self.unique_groups.lock().push(group);
        Ok(())
    }

    /// Drop every entry. Refused while any service is still running.
    pub fn clear(&self) -> Result<()> {
        let running: Vec<String> = self
            .unique_services
            .lock()
            .iter()
            .filter(|s| s.is_running())
            .map(|s| s.name().to_string())
            .collect();
        if !running.is_empty() {
            return Err(Error::ConfigInvalid(format!(
                "cannot clear runtime state while services are running: {}",
                running.join(", ")
            )));
        }
        self.services.lock().clear();
        self.unique_services.lock().clear();
        self.groups.lock().clear();
        self.unique_groups.lock().clear();
        Ok(())
    }
}
