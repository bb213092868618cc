//! Dependency graph over resource records.
//!
//! Edges point from a dependency to its dependent. Ordering uses Kahn's
//! algorithm grouped into layers: every resource in a layer depends only on
//! resources in earlier layers, so a layer can run concurrently.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::resource::ResourceData;

#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    graph: DiGraph<Identifier, ()>,
    index_map: HashMap<Identifier, NodeIndex>,
}

impl ResourceGraph {
    /// Build the graph for `resources`.
    ///
    /// A dependency outside `resources` is accepted only when `is_external`
    /// returns true for it (for example, when it is already reconciled); it
    /// then contributes no edge. Otherwise it is a `MissingDependency`.
    pub fn build<'a, I, F>(resources: I, is_external: F) -> Result<Self>
    where
        I: IntoIterator<Item = &'a ResourceData>,
        F: Fn(&Identifier) -> bool,
    {
        let resources: Vec<&ResourceData> = resources.into_iter().collect();
        let mut graph = ResourceGraph::default();

        for data in &resources {
            graph.add_node(&data.identifier);
        }
        for data in &resources {
            let dependent = graph.index_map[&data.identifier];
            for dependency in &data.dependencies {
                match graph.index_map.get(dependency) {
                    Some(&idx) => {
                        graph.graph.update_edge(idx, dependent, ());
                    }
                    None if is_external(dependency) => {}
                    None => {
                        return Err(Error::MissingDependency {
                            resource: data.identifier.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                }
            }
        }
        Ok(graph)
    }

    fn add_node(&mut self, identifier: &Identifier) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(identifier) {
            return idx;
        }
        let idx = self.graph.add_node(identifier.clone());
        self.index_map.insert(identifier.clone(), idx);
        idx
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Resources that directly depend on `identifier`.
    pub fn dependents(&self, identifier: &Identifier) -> Vec<Identifier> {
        let Some(&idx) = self.index_map.get(identifier) else {
            return Vec::new();
        };
        let mut dependents: Vec<Identifier> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// Dependency-first layers. Each layer is sorted by identifier.
    pub fn layers(&self) -> Result<Vec<Vec<Identifier>>> {
        let node_count = self.graph.node_count();
        let mut in_degree = vec![0usize; node_count];
        for edge in self.graph.edge_references() {
            in_degree[edge.target().index()] += 1;
        }

        let mut ready: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();
        let mut layers = Vec::new();
        let mut visited = 0;

        while !ready.is_empty() {
            ready.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

            let mut next = Vec::new();
            for &idx in &ready {
                for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                    let degree = &mut in_degree[dependent.index()];
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        next.push(dependent);
                    }
                }
            }

            visited += ready.len();
            layers.push(ready.iter().map(|idx| self.graph[*idx].clone()).collect());
            ready = next;
        }

        if visited < node_count {
            let mut remaining: Vec<Identifier> = self
                .graph
                .node_indices()
                .filter(|idx| in_degree[idx.index()] > 0)
                .map(|idx| self.graph[idx].clone())
                .collect();
            remaining.sort();
            return Err(Error::CycleDetected { remaining });
        }

        Ok(layers)
    }
}
