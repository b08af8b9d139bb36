//! Explicit dependency graph for resource construction.
//!
//! Nodes declare their dependencies up front. The build walks a
//! deterministic topological order and a node may only start once every
//! dependency has been marked ready.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use crate::error::GraphError;

#[derive(Debug, Clone)]
pub struct ResourceGraph<K> {
    deps: BTreeMap<K, BTreeSet<K>>,
    ready: BTreeSet<K>,
}

impl<K: Ord + Clone + Display> Default for ResourceGraph<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone + Display> ResourceGraph<K> {
    pub fn new() -> Self {
        Self {
            deps: BTreeMap::new(),
            ready: BTreeSet::new(),
        }
    }

    /// Declare `node` with the nodes it depends on.
    pub fn add_node(&mut self, node: K, depends_on: &[K]) -> Result<(), GraphError> {
        if self.deps.contains_key(&node) {
            return Err(GraphError::DuplicateNode(node.to_string()));
        }
        self.deps.insert(node, depends_on.iter().cloned().collect());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn dependencies(&self, node: &K) -> Option<&BTreeSet<K>> {
        self.deps.get(node)
    }

    /// Kahn's algorithm. Among nodes whose dependencies are satisfied the
    /// smallest key goes first, so the order is stable across runs.
    pub fn topological_order(&self) -> Result<Vec<K>, GraphError> {
        let mut indegree: BTreeMap<&K, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&K, Vec<&K>> = BTreeMap::new();

        for (node, deps) in &self.deps {
            indegree.entry(node).or_insert(0);
            for dep in deps {
                if !self.deps.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        node: node.to_string(),
                        dependency: dep.to_string(),
                    });
                }
                *indegree.entry(node).or_insert(0) += 1;
                dependents.entry(dep).or_default().push(node);
            }
        }

        let mut available: BTreeSet<&K> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut order = Vec::with_capacity(self.deps.len());

        while let Some(node) = available.pop_first() {
            order.push(node.clone());
            for &dependent in dependents.get(node).into_iter().flatten() {
                if let Some(n) = indegree.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        available.insert(dependent);
                    }
                }
            }
        }

        if order.len() != self.deps.len() {
            let stuck = indegree
                .iter()
                .find(|(_, n)| **n > 0)
                .map(|(k, _)| k.to_string())
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Fail unless every dependency of `node` is ready.
    pub fn ensure_dependencies_ready(&self, node: &K) -> Result<(), GraphError> {
        let deps = self
            .deps
            .get(node)
            .ok_or_else(|| GraphError::UnknownNode(node.to_string()))?;
        match deps.iter().find(|d| !self.ready.contains(*d)) {
            Some(dep) => Err(GraphError::DependencyNotReady {
                node: node.to_string(),
                dependency: dep.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn mark_ready(&mut self, node: &K) -> Result<(), GraphError> {
        if !self.deps.contains_key(node) {
            return Err(GraphError::UnknownNode(node.to_string()));
        }
        self.ready.insert(node.clone());
        Ok(())
    }

    pub fn is_ready(&self, node: &K) -> bool {
        self.ready.contains(node)
    }
}
