//! Group dependency graph.
//!
//! Built from the validated config, proven acyclic and within the depth
//! bound before any process is launched, and queried for start/shutdown
//! ordering.

use crate::config::Config;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: HashSet<String>,
    /// `edges[A] = [B, C]` means A depends on B and C
    edges: HashMap<String, Vec<String>>,
    /// `reverse[A] = [B, C]` means B and C depend on A
    reverse: HashMap<String, Vec<String>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph over every group in the config, with dependency
    /// references canonicalized to group names.
    pub fn from_config(config: &Config) -> Self {
        let mut graph = Self::new();
        for group in config.groups() {
            graph.add_node(group.name.clone());
            for dep_ref in &group.dependencies {
                // references were resolved during config validation
                if let Some(dep) = config.group(dep_ref) {
                    graph.add_edge(group.name.clone(), dep.name.clone());
                }
            }
        }
        graph
    }

    pub fn add_node(&mut self, name: String) {
        self.nodes.insert(name.clone());
        self.edges.entry(name.clone()).or_default();
        self.reverse.entry(name).or_default();
    }

    /// Add a dependency edge (`from` depends on `to`).
    pub fn add_edge(&mut self, from: String, to: String) {
        self.add_node(from.clone());
        self.add_node(to.clone());
        self.edges.entry(from.clone()).or_default().push(to.clone());
        self.reverse.entry(to).or_default().push(from);
    }

    /// Check that the subgraph rooted at `root` is acyclic, references only
    /// declared groups, and that its longest root-to-leaf path (counted in
    /// nodes) stays within `max_depth`.
    pub fn validate(&self, root: &str, max_depth: usize) -> Result<()> {
        if !self.nodes.contains(root) {
            return Err(Error::GroupNotFound(root.to_string()));
        }
        let mut path = Vec::new();
        let mut heights = HashMap::new();
        let depth = self.dfs_height(root, &mut path, &mut heights)?;
        if depth > max_depth {
            return Err(Error::MaxDepthExceeded {
                group: root.to_string(),
                max_depth,
            });
        }
        Ok(())
    }

    /// Validate every declared group. The first failure aborts.
    pub fn validate_all(&self, max_depth: usize) -> Result<()> {
        for node in &self.nodes {
            self.validate(node, max_depth)?;
        }
        Ok(())
    }

    /// DFS returning the height (longest path to a leaf, in nodes) of the
    /// subgraph under `node`. Nodes on the current path are the gray set: a
    /// gray neighbor means a cycle. Completed nodes are memoized in `heights`.
    fn dfs_height(
        &self,
        node: &str,
        path: &mut Vec<String>,
        heights: &mut HashMap<String, usize>,
    ) -> Result<usize> {
        if let Some(pos) = path.iter().position(|n| n == node) {
            let mut cycle: Vec<String> = path[pos..].to_vec();
            cycle.push(node.to_string());
            return Err(Error::CircularDependency(cycle));
        }
        if let Some(height) = heights.get(node) {
            return Ok(*height);
        }

        path.push(node.to_string());
        let mut tallest_dep = 0;
        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if !self.nodes.contains(dep) {
                    path.pop();
                    return Err(Error::GroupNotFound(format!(
                        "'{}' referenced by '{}'",
                        dep, node
                    )));
                }
                tallest_dep = tallest_dep.max(self.dfs_height(dep, path, heights)?);
            }
        }
        path.pop();

        let height = 1 + tallest_dep;
        heights.insert(node.to_string(), height);
        Ok(height)
    }

    /// Dependencies-first order for starting `root`: every transitive
    /// dependency appears before its dependants, `root` comes last.
    pub fn start_order(&self, root: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        self.collect_postorder(root, &mut visited, &mut order);
        order
    }

    fn collect_postorder(&self, node: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(node.to_string()) {
            return;
        }
        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                self.collect_postorder(dep, visited, order);
            }
        }
        order.push(node.to_string());
    }

    /// Level order over the whole forest: the first level contains groups
    /// with no dependencies, each later level only depends on earlier ones.
    /// Reversing the levels gives the shutdown order.
    pub fn level_order(&self) -> Result<Vec<Vec<String>>> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.edges.get(n).map_or(0, |deps| deps.len())))
            .collect();

        let mut levels = Vec::new();
        let mut processed: HashSet<String> = HashSet::new();

        while processed.len() < self.nodes.len() {
            let mut level: Vec<String> = self
                .nodes
                .iter()
                .filter(|n| {
                    !processed.contains(n.as_str())
                        && in_degree.get(n.as_str()).copied().unwrap_or(0) == 0
                })
                .cloned()
                .collect();
            level.sort();

            if level.is_empty() {
                // stuck: everything left participates in a cycle
                let mut remaining: Vec<String> = self
                    .nodes
                    .iter()
                    .filter(|n| !processed.contains(n.as_str()))
                    .cloned()
                    .collect();
                remaining.sort();
                return Err(Error::CircularDependency(remaining));
            }

            for node in &level {
                processed.insert(node.clone());
                if let Some(dependents) = self.reverse.get(node) {
                    for dependent in dependents {
                        if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                            *degree = degree.saturating_sub(1);
                        }
                    }
                }
            }
            levels.push(level);
        }

        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(names: &[&str]) -> Graph {
        let mut graph = Graph::new();
        for pair in names.windows(2) {
            graph.add_edge(pair[0].to_string(), pair[1].to_string());
        }
        graph
    }

    #[test]
    fn validates_simple_chain() {
        let graph = chain(&["a", "b", "c"]);
        assert!(graph.validate("a", 5).is_ok());
    }

    #[test]
    fn detects_cycle_with_path() {
        let mut graph = chain(&["a", "b"]);
        graph.add_edge("b".to_string(), "a".to_string());
        let err = graph.validate("a", 5).unwrap_err();
        match err {
            Error::CircularDependency(cycle) => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.len() >= 3);
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut graph = Graph::new();
        graph.add_edge("a".to_string(), "a".to_string());
        assert!(matches!(
            graph.validate("a", 5),
            Err(Error::CircularDependency(_))
        ));
    }

    #[test]
    fn depth_counts_nodes_on_longest_path() {
        // g1 -> g2 -> g3 is three nodes deep
        let graph = chain(&["g1", "g2", "g3"]);
        assert!(graph.validate("g1", 3).is_ok());
        assert!(matches!(
            graph.validate("g1", 2),
            Err(Error::MaxDepthExceeded { max_depth: 2, .. })
        ));
    }

    #[test]
    fn depth_uses_longest_branch_of_a_diamond() {
        // root -> a -> b -> leaf, root -> leaf: longest path is 4 nodes
        let mut graph = chain(&["root", "a", "b", "leaf"]);
        graph.add_edge("root".to_string(), "leaf".to_string());
        assert!(graph.validate("root", 4).is_ok());
        assert!(graph.validate("root", 3).is_err());
    }

    #[test]
    fn unknown_root_is_group_not_found() {
        let graph = Graph::new();
        assert!(matches!(
            graph.validate("ghost", 5),
            Err(Error::GroupNotFound(_))
        ));
    }

    #[test]
    fn start_order_puts_dependencies_first() {
        let graph = chain(&["web", "api", "db"]);
        assert_eq!(graph.start_order("web"), vec!["db", "api", "web"]);
    }

    #[test]
    fn start_order_visits_shared_dependency_once() {
        let mut graph = Graph::new();
        graph.add_edge("web".to_string(), "db".to_string());
        graph.add_edge("api".to_string(), "db".to_string());
        graph.add_edge("web".to_string(), "api".to_string());
        let order = graph.start_order("web");
        assert_eq!(order.iter().filter(|n| *n == "db").count(), 1);
        let db = order.iter().position(|n| n == "db").unwrap();
        let api = order.iter().position(|n| n == "api").unwrap();
        let web = order.iter().position(|n| n == "web").unwrap();
        assert!(db < api && api < web);
    }

    #[test]
    fn level_order_groups_independent_nodes() {
        let mut graph = Graph::new();
        graph.add_node("a".to_string());
        graph.add_node("b".to_string());
        graph.add_edge("c".to_string(), "a".to_string());
        graph.add_edge("c".to_string(), "b".to_string());

        let levels = graph.level_order().unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0], vec!["a", "b"]);
        assert_eq!(levels[1], vec!["c"]);
    }

    #[test]
    fn level_order_rejects_cycles() {
        let mut graph = chain(&["a", "b"]);
        graph.add_edge("b".to_string(), "a".to_string());
        assert!(graph.level_order().is_err());
    }
}
