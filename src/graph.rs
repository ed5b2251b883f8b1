//! Keyed dependency graph with deterministic topological traversal
//!
//! Nodes keep their insertion (declaration) order. Traversal is a
//! depth-first post-order walk: every node is visited after its
//! dependencies, and ties are broken by declaration order.

use indexmap::{IndexMap, IndexSet};

use crate::error::{CompileError, Result};

#[derive(Debug, Clone)]
struct GraphNode<T> {
    value: T,
    dependencies: IndexSet<String>,
}

/// A DAG of payloads keyed by logical id
#[derive(Debug, Clone)]
pub struct DependencyGraph<T> {
    nodes: IndexMap<String, GraphNode<T>>,
}

impl<T> Default for DependencyGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl<T> DependencyGraph<T> {
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }

    /// Insert a node; logical ids are unique within a graph
    pub fn insert<I, S>(&mut self, id: impl Into<String>, value: T, dependencies: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(CompileError::shape(format!("duplicate logical id '{}'", id)));
        }
        let dependencies = dependencies.into_iter().map(Into::into).collect();
        self.nodes.insert(id, GraphNode { value, dependencies });
        Ok(())
    }

    /// Get the payload for a logical id
    pub fn get(&self, id: &str) -> Result<&T> {
        self.nodes
            .get(id)
            .map(|n| &n.value)
            .ok_or_else(|| CompileError::reference(format!("unknown logical id '{}'", id)))
    }

    /// Check if a logical id exists
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Direct dependencies of a logical id
    pub fn dependencies(&self, id: &str) -> Result<impl Iterator<Item = &str>> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| CompileError::reference(format!("unknown logical id '{}'", id)))?;
        Ok(node.dependencies.iter().map(|s| s.as_str()))
    }

    /// Logical ids in declaration order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Order logical ids so that no id precedes any of its dependencies
    ///
    /// Fails with a cycle error naming every id on the first cycle found,
    /// or a reference error for an edge to an id that is not in the graph.
    pub fn toposort(&self) -> Result<Vec<&str>> {
        let mut marks: IndexMap<&str, Mark> = IndexMap::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        for root in self.nodes.keys() {
            if marks.contains_key(root.as_str()) {
                continue;
            }
            // (node, index of the next dependency to visit)
            let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
            marks.insert(root.as_str(), Mark::InProgress);

            while let Some(&(id, next)) = stack.last() {
                let Some(dep) = self.nodes[id].dependencies.get_index(next) else {
                    stack.pop();
                    marks.insert(id, Mark::Done);
                    order.push(id);
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                let Some((dep, _)) = self.nodes.get_key_value(dep.as_str()) else {
                    return Err(CompileError::reference(format!(
                        "'{}' depends on unknown logical id '{}'",
                        id, dep
                    )));
                };
                match marks.get(dep.as_str()) {
                    Some(Mark::Done) => {}
                    Some(Mark::InProgress) => {
                        let start = stack.iter().position(|(s, _)| *s == dep.as_str()).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|(s, _)| s.to_string()).collect();
                        cycle.push(dep.clone());
                        return Err(CompileError::dependency_cycle(cycle));
                    }
                    None => {
                        marks.insert(dep.as_str(), Mark::InProgress);
                        stack.push((dep.as_str(), 0));
                    }
                }
            }
        }
        Ok(order)
    }

    /// Visit every payload in topological order
    pub fn for_each<E, F>(&self, mut f: F) -> std::result::Result<(), E>
    where
        E: From<CompileError>,
        F: FnMut(&str, &T) -> std::result::Result<(), E>,
    {
        for id in self.toposort()? {
            f(id, &self.nodes[id].value)?;
        }
        Ok(())
    }

    /// Transform every payload, keeping the edges unchanged
    pub fn map<U, F>(&self, mut f: F) -> DependencyGraph<U>
    where
        F: FnMut(&str, &T) -> U,
    {
        let nodes = self
            .nodes
            .iter()
            .map(|(id, node)| {
                (
                    id.clone(),
                    GraphNode {
                        value: f(id, &node.value),
                        dependencies: node.dependencies.clone(),
                    },
                )
            })
            .collect();
        DependencyGraph { nodes }
    }

    /// Fallible [`DependencyGraph::map`], applied in topological order
    pub fn try_map<U, E, F>(&self, mut f: F) -> std::result::Result<DependencyGraph<U>, E>
    where
        E: From<CompileError>,
        F: FnMut(&str, &T) -> std::result::Result<U, E>,
    {
        let mut mapped: IndexMap<String, U> = IndexMap::new();
        for id in self.toposort()? {
            mapped.insert(id.to_string(), f(id, &self.nodes[id].value)?);
        }

        let mut nodes = IndexMap::with_capacity(self.nodes.len());
        for (id, node) in &self.nodes {
            if let Some(value) = mapped.shift_remove(id) {
                nodes.insert(
                    id.clone(),
                    GraphNode {
                        value,
                        dependencies: node.dependencies.clone(),
                    },
                );
            }
        }
        Ok(DependencyGraph { nodes })
    }

    /// Every id reachable from `id` through dependency edges, in discovery order
    pub fn transitive_dependencies(&self, id: &str) -> Result<IndexSet<String>> {
        let mut seen = IndexSet::new();
        let mut pending: Vec<&str> = self.dependencies(id)?.collect();
        while let Some(next) = pending.pop() {
            if seen.insert(next.to_string()) {
                pending.extend(self.dependencies(next)?);
            }
        }
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph<usize> {
        let mut g = DependencyGraph::new();
        for (i, (id, deps)) in edges.iter().enumerate() {
            g.insert(*id, i, deps.iter().copied()).expect("Should insert");
        }
        g
    }

    #[test]
    fn test_toposort_respects_dependencies() {
        let g = graph(&[("A", &["C"]), ("B", &[]), ("C", &["B"])]);
        let order = g.toposort().expect("Should sort");
        assert_eq!(order, vec!["B", "C", "A"]);
    }

    #[test]
    fn test_toposort_ties_follow_declaration_order() {
        let g = graph(&[("Z", &[]), ("Y", &[]), ("X", &[])]);
        assert_eq!(g.toposort().unwrap(), vec!["Z", "Y", "X"]);
    }

    #[test]
    fn test_three_node_cycle_names_every_id() {
        let g = graph(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]);
        let err = g.toposort().unwrap_err();
        match err {
            CompileError::DependencyCycle { cycle } => {
                assert_eq!(cycle, vec!["A", "B", "C", "A"]);
            }
            other => panic!("Expected DependencyCycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_cycle() {
        let g = graph(&[("A", &["A"])]);
        assert!(matches!(
            g.toposort(),
            Err(CompileError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_get_unknown_id() {
        let g = graph(&[("A", &[])]);
        let err = g.get("B").unwrap_err();
        assert!(err.to_string().contains("unknown logical id 'B'"));
    }

    #[test]
    fn test_edge_to_unknown_id() {
        let g = graph(&[("A", &["Ghost"])]);
        assert!(matches!(g.toposort(), Err(CompileError::Reference { .. })));
    }

    #[test]
    fn test_duplicate_insert() {
        let mut g = graph(&[("A", &[])]);
        assert!(g.insert("A", 9, Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_map_preserves_edges() {
        let g = graph(&[("A", &["B"]), ("B", &[])]);
        let mapped = g.map(|id, v| format!("{}{}", id, v));
        assert_eq!(mapped.get("A").unwrap(), "A0");
        assert_eq!(mapped.dependencies("A").unwrap().collect::<Vec<_>>(), vec!["B"]);
        assert_eq!(mapped.toposort().unwrap(), g.toposort().unwrap());
    }

    #[test]
    fn test_try_map_keeps_declaration_order() {
        let g = graph(&[("A", &["B"]), ("B", &[])]);
        let mut visited = Vec::new();
        let mapped = g
            .try_map(|id, v| {
                visited.push(id.to_string());
                Ok::<_, CompileError>(*v * 10)
            })
            .expect("Should map");
        assert_eq!(visited, vec!["B", "A"]);
        assert_eq!(mapped.ids().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(*mapped.get("A").unwrap(), 0);
        assert_eq!(*mapped.get("B").unwrap(), 10);
    }

    #[test]
    fn test_for_each_visits_in_order() {
        let g = graph(&[("A", &["B"]), ("B", &[])]);
        let mut seen = Vec::new();
        g.for_each(|id, _| {
            seen.push(id.to_string());
            Ok::<_, CompileError>(())
        })
        .unwrap();
        assert_eq!(seen, vec!["B", "A"]);
    }

    #[test]
    fn test_deep_chain() {
        let mut g = DependencyGraph::new();
        for i in 0..20_000usize {
            let deps: Vec<String> = if i == 0 { Vec::new() } else { vec![format!("R{}", i - 1)] };
            g.insert(format!("R{}", i), i, deps).expect("Should insert");
        }
        let order = g.toposort().expect("Should sort");
        assert_eq!(order.first(), Some(&"R0"));
        assert_eq!(order.last(), Some(&"R19999"));
    }

    #[test]
    fn test_transitive_dependencies() {
        let g = graph(&[("A", &["B"]), ("B", &["C"]), ("C", &[])]);
        let deps = g.transitive_dependencies("A").unwrap();
        assert!(deps.contains("B") && deps.contains("C"));
        assert_eq!(deps.len(), 2);
    }
}
