//! Root configuration model.

use super::{GroupConfig, ServiceConfig};
use std::sync::Arc;

/// Default limit on the depth of the group dependency graph.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// The full, validated configuration: immutable once built, destroyed only
/// by an explicit reload.
#[derive(Debug)]
pub struct Config {
    services: Vec<Arc<ServiceConfig>>,
    groups: Vec<Arc<GroupConfig>>,
    /// Longest allowed root-to-leaf path in the group graph, counted in nodes.
    pub max_depth: usize,
    /// When true, an Error status releases the started barrier like a
    /// successful start would.
    pub ignore_errors: bool,
}

impl Config {
    pub fn new(
        services: Vec<Arc<ServiceConfig>>,
        groups: Vec<Arc<GroupConfig>>,
        max_depth: usize,
        ignore_errors: bool,
    ) -> Self {
        Self {
            services,
            groups,
            max_depth,
            ignore_errors,
        }
    }

    /// Look up a service by name or alias.
    pub fn service(&self, name: &str) -> Option<&Arc<ServiceConfig>> {
        self.services
            .iter()
            .find(|s| s.name == name || s.aliases.iter().any(|a| a == name))
    }

    /// Look up a group by name or alias.
    pub fn group(&self, name: &str) -> Option<&Arc<GroupConfig>> {
        self.groups.iter().find(|g| g.answers_to(name))
    }

    pub fn services(&self) -> &[Arc<ServiceConfig>] {
        &self.services
    }

    pub fn groups(&self) -> &[Arc<GroupConfig>] {
        &self.groups
    }
}
