//! Circuit Graph View
//!
//! Builds an undirected petgraph over the flat component/connection arena.
//! Node weights are indices into the component slice and edge weights are
//! indices into the connection slice, so the graph borrows nothing and the
//! circuit itself is never touched.

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use super::model::{Component, Connection};

#[derive(Debug, Clone)]
pub struct CircuitGraph {
    graph: UnGraph<usize, usize>,
    /// component id -> node index
    node_indices: HashMap<String, NodeIndex>,
}

impl CircuitGraph {
    /// Build the graph view. Connections whose endpoints are unknown are
    /// skipped; validated circuits never contain any.
    pub fn build(components: &[Component], connections: &[Connection]) -> Self {
        let mut graph = UnGraph::with_capacity(components.len(), connections.len());
        let mut node_indices = HashMap::with_capacity(components.len());

        for (i, component) in components.iter().enumerate() {
            let idx = graph.add_node(i);
            node_indices.insert(component.id.clone(), idx);
        }

        for (i, connection) in connections.iter().enumerate() {
            match (
                node_indices.get(&connection.source),
                node_indices.get(&connection.target),
            ) {
                (Some(&a), Some(&b)) => {
                    graph.add_edge(a, b, i);
                }
                _ => {
                    tracing::debug!(
                        "Skipping connection {} with unknown endpoint ({} -> {})",
                        connection.id,
                        connection.source,
                        connection.target
                    );
                }
            }
        }

        Self {
            graph,
            node_indices,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node index for a component id
    pub fn node(&self, component_id: &str) -> Option<NodeIndex> {
        self.node_indices.get(component_id).copied()
    }

    /// Node of the component at `component` in the slice the graph was
    /// built from. Nodes are added in slice order.
    pub fn node_by_component(&self, component: usize) -> Option<NodeIndex> {
        (component < self.graph.node_count()).then(|| NodeIndex::new(component))
    }

    /// Component slice index behind a node
    pub fn component_index(&self, node: NodeIndex) -> usize {
        self.graph[node]
    }

    /// Incident edges of a node as `(connection index, neighbour node)`,
    /// ordered by connection index.
    pub fn incident(&self, node: NodeIndex) -> Vec<(usize, NodeIndex)> {
        let mut edges: Vec<(usize, NodeIndex)> = self
            .graph
            .edges(node)
            .map(|e| {
                let other = if e.source() == node { e.target() } else { e.source() };
                (*e.weight(), other)
            })
            .collect();
        edges.sort_by_key(|(conn, _)| *conn);
        edges
    }

    /// Endpoints of a connection as node indices
    pub fn endpoints(&self, connection: &Connection) -> Option<(NodeIndex, NodeIndex)> {
        Some((self.node(&connection.source)?, self.node(&connection.target)?))
    }

    /// Multi-source breadth-first search.
    ///
    /// Returns, per component index, the index of the source component
    /// that reaches it first (sources are expanded in slice order), or
    /// `None` when no source reaches it.
    pub fn feeding_sources(&self, is_source: impl Fn(usize) -> bool) -> Vec<Option<usize>> {
        let mut fed_by: Vec<Option<usize>> = vec![None; self.graph.node_count()];
        let mut queue = VecDeque::new();

        for node in self.graph.node_indices() {
            let component = self.graph[node];
            if is_source(component) {
                fed_by[component] = Some(component);
                queue.push_back(node);
            }
        }

        while let Some(node) = queue.pop_front() {
            let feeder = fed_by[self.graph[node]];
            for (_, next) in self.incident(node) {
                let component = self.graph[next];
                if fed_by[component].is_none() {
                    fed_by[component] = feeder;
                    queue.push_back(next);
                }
            }
        }

        fed_by
    }

    pub fn stats(&self, components: &[Component]) -> GraphStats {
        GraphStats {
            component_count: self.graph.node_count(),
            connection_count: self.graph.edge_count(),
            source_count: components.iter().filter(|c| c.is_source()).count(),
            load_count: components.iter().filter(|c| c.is_load()).count(),
            island_count: petgraph::algo::connected_components(&self.graph),
            has_cycles: petgraph::algo::is_cyclic_undirected(&self.graph),
        }
    }
}

/// Shape of a circuit graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub component_count: usize,
    pub connection_count: usize,
    pub source_count: usize,
    pub load_count: usize,
    pub island_count: usize,
    pub has_cycles: bool,
}
