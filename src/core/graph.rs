use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction, Graph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use super::address::CellAddress;

pub type CellGraph = Graph<CellAddress, (), Directed>;

/// Directed reference graph of a workbook. An edge `p -> d` means the formula in
/// `d` reads `p`.
///
/// Built once by [`GraphBuilder`] and never mutated afterwards; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: CellGraph,
    node_map: HashMap<CellAddress, NodeIndex>,
}

/// Serializable form of a [`DependencyGraph`]; edges index into `nodes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<CellAddress>,
    pub edges: Vec<(u32, u32)>,
}

impl DependencyGraph {
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, address: &CellAddress) -> bool {
        self.node_map.contains_key(address)
    }

    pub fn node_index(&self, address: &CellAddress) -> Option<NodeIndex> {
        self.node_map.get(address).copied()
    }

    pub fn address(&self, index: NodeIndex) -> Option<&CellAddress> {
        self.graph.node_weight(index)
    }

    /// Underlying petgraph structure, for traversals and formatters.
    pub fn inner(&self) -> &CellGraph {
        &self.graph
    }

    pub fn nodes(&self) -> impl Iterator<Item = &CellAddress> {
        self.graph.node_weights()
    }

    /// `(precedent, dependent)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (&CellAddress, &CellAddress)> {
        self.graph
            .edge_references()
            .map(|e| (&self.graph[e.source()], &self.graph[e.target()]))
    }

    pub fn node_set(&self) -> BTreeSet<CellAddress> {
        self.nodes().cloned().collect()
    }

    pub fn edge_set(&self) -> BTreeSet<(CellAddress, CellAddress)> {
        self.edges().map(|(p, d)| (p.clone(), d.clone())).collect()
    }

    /// Cells whose formulas read `address` directly.
    pub fn direct_dependents(&self, address: &CellAddress) -> BTreeSet<CellAddress> {
        self.neighbors(address, Direction::Outgoing)
    }

    /// Cells that the formula in `address` reads directly.
    pub fn direct_precedents(&self, address: &CellAddress) -> BTreeSet<CellAddress> {
        self.neighbors(address, Direction::Incoming)
    }

    fn neighbors(&self, address: &CellAddress, direction: Direction) -> BTreeSet<CellAddress> {
        let Some(index) = self.node_index(address) else {
            return BTreeSet::new();
        };
        self.graph
            .neighbors_directed(index, direction)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    pub fn sheets(&self) -> BTreeSet<&str> {
        self.nodes().map(|a| a.sheet.as_str()).collect()
    }

    pub fn to_snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.graph.node_weights().cloned().collect(),
            edges: self
                .graph
                .edge_references()
                .map(|e| (e.source().index() as u32, e.target().index() as u32))
                .collect(),
        }
    }

    /// Rebuilds a graph from a snapshot. Out-of-range edge indices and
    /// self-loops are ignored.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut builder = GraphBuilder::with_capacity(snapshot.nodes.len(), snapshot.edges.len());
        let indices: Vec<NodeIndex> = snapshot
            .nodes
            .into_iter()
            .map(|address| builder.add_node(address))
            .collect();
        for (source, target) in snapshot.edges {
            if let (Some(&s), Some(&t)) = (indices.get(source as usize), indices.get(target as usize)) {
                builder.add_edge_by_index(s, t);
            }
        }
        builder.build()
    }
}

/// Accumulates nodes and edges, keeping the edge set free of duplicates and
/// self-loops.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: CellGraph,
    node_map: HashMap<CellAddress, NodeIndex>,
    edge_set: HashSet<(NodeIndex, NodeIndex)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(nodes: usize, edges: usize) -> Self {
        Self {
            graph: Graph::with_capacity(nodes, edges),
            node_map: HashMap::with_capacity(nodes),
            edge_set: HashSet::with_capacity(edges),
        }
    }

    /// Returns the existing index when the address is already present.
    pub fn add_node(&mut self, address: CellAddress) -> NodeIndex {
        if let Some(&index) = self.node_map.get(&address) {
            return index;
        }
        let index = self.graph.add_node(address.clone());
        self.node_map.insert(address, index);
        index
    }

    /// Adds `precedent -> dependent`, creating either endpoint if needed.
    /// Returns `None` for a self-loop or an edge already present.
    pub fn add_edge(&mut self, precedent: CellAddress, dependent: CellAddress) -> Option<EdgeIndex> {
        if precedent == dependent {
            return None;
        }
        let source = self.add_node(precedent);
        let target = self.add_node(dependent);
        self.add_edge_by_index(source, target)
    }

    fn add_edge_by_index(&mut self, source: NodeIndex, target: NodeIndex) -> Option<EdgeIndex> {
        if source == target || !self.edge_set.insert((source, target)) {
            return None;
        }
        Some(self.graph.add_edge(source, target, ()))
    }

    pub fn get_node_index(&self, address: &CellAddress) -> Option<NodeIndex> {
        self.node_map.get(address).copied()
    }

    pub fn build(self) -> DependencyGraph {
        DependencyGraph {
            graph: self.graph,
            node_map: self.node_map,
        }
    }
}
