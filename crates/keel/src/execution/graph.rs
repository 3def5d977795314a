//! Dependency graph for chained requests
//!
//! Built once per batch, before anything runs. A batch with a duplicate id,
//! a dangling dependency or a cycle is rejected as a whole.

use indexmap::{IndexMap, IndexSet};

use super::request::ToolExecutionRequest;
use crate::error_handling::AgentError;

/// Execution id to the ids it waits on, in request order
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependencies: IndexMap<String, IndexSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: impl Into<String>) {
        self.dependencies.entry(id.into()).or_default();
    }

    /// `id` waits on `dependency`
    pub fn add_dependency(&mut self, id: impl Into<String>, dependency: impl Into<String>) {
        let dependency = dependency.into();
        self.dependencies.entry(dependency.clone()).or_default();
        self.dependencies.entry(id.into()).or_default().insert(dependency);
    }

    pub fn dependencies(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(id)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.dependencies.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// First cycle found, as a closed path (`[a, b, a]`)
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = IndexSet::new();
        let mut on_stack = IndexSet::new();
        let mut path = Vec::new();

        for id in self.dependencies.keys() {
            if visited.contains(id.as_str()) {
                continue;
            }
            if let Some(cycle) = self.visit(id, &mut visited, &mut on_stack, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        id: &'a str,
        visited: &mut IndexSet<&'a str>,
        on_stack: &mut IndexSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(id);
        on_stack.insert(id);
        path.push(id);

        for dep in self.dependencies(id) {
            if on_stack.contains(dep) {
                let start = path.iter().position(|p| *p == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path.iter().skip(start).map(|p| p.to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
            if !visited.contains(dep) {
                if let Some(cycle) = self.visit(dep, visited, on_stack, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        on_stack.swap_remove(id);
        None
    }
}

/// Check a batch and build its graph.
///
/// Fails with a configuration error on duplicate execution ids, on
/// dependencies outside the batch, and on cycles.
pub fn validate_requests(requests: &[ToolExecutionRequest]) -> Result<DependencyGraph, AgentError> {
    let mut graph = DependencyGraph::new();
    for request in requests {
        if graph.contains(&request.execution_id) {
            return Err(AgentError::config(format!(
                "duplicate execution id '{}' in batch",
                request.execution_id
            )));
        }
        graph.add_node(request.execution_id.clone());
    }

    for request in requests {
        if let Some(parent) = &request.parent_execution_id {
            if !graph.contains(parent) {
                return Err(AgentError::config(format!(
                    "execution '{}' depends on '{}', which is not in the batch",
                    request.execution_id, parent
                )));
            }
            graph.add_dependency(request.execution_id.clone(), parent.clone());
        }
    }

    if let Some(cycle) = graph.find_cycle() {
        return Err(AgentError::config(format!(
            "circular dependency: {}",
            cycle.join(" -> ")
        )));
    }
    Ok(graph)
}
