//! Validated group descriptors.

/// A named set of services plus the groups that must be up before it starts.
#[derive(Debug)]
pub struct GroupConfig {
    /// Unique name.
    pub name: String,
    /// Alternative identifiers, unique across all groups.
    pub aliases: Vec<String>,
    /// Service references (by name or alias), never empty.
    pub services: Vec<String>,
    /// Group references (by name or alias) this group depends on.
    pub dependencies: Vec<String>,
}

impl GroupConfig {
    /// True if `name` is this group's name or one of its aliases.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }
}
