use petgraph::graph::NodeIndex;
use petgraph::Direction;
use std::collections::{BTreeSet, VecDeque};

use super::address::CellAddress;
use super::graph::DependencyGraph;
use crate::error::Result;

/// Every cell reachable from `source` through one or more edges.
///
/// `source` is part of the result only when a cycle leads back to it. An
/// unknown source, or one nobody reads, gives an empty set.
pub fn impact(graph: &DependencyGraph, source: &CellAddress) -> BTreeSet<CellAddress> {
    let Some(start) = graph.node_index(source) else {
        return BTreeSet::new();
    };

    reachable_from(graph, start)
        .into_iter()
        .filter_map(|index| graph.address(index).cloned())
        .collect()
}

/// Boundary form of [`impact`]: canonical `Sheet!A1` strings in, sorted strings out.
/// A malformed `source` is an `InvalidAddress` error.
pub fn impact_of(graph: &DependencyGraph, source: &str) -> Result<Vec<String>> {
    let address: CellAddress = source.parse()?;
    Ok(impact(graph, &address)
        .into_iter()
        .map(|a| a.to_string())
        .collect())
}

/// Breadth-first over outgoing edges. The start node is not marked visited up
/// front so that a cycle through it reports it.
fn reachable_from(graph: &DependencyGraph, start: NodeIndex) -> Vec<NodeIndex> {
    let inner = graph.inner();
    let mut visited = vec![false; inner.node_count()];
    let mut queue: VecDeque<NodeIndex> = inner
        .neighbors_directed(start, Direction::Outgoing)
        .collect();
    let mut reached = Vec::new();

    while let Some(index) = queue.pop_front() {
        if std::mem::replace(&mut visited[index.index()], true) {
            continue;
        }
        reached.push(index);
        for next in inner.neighbors_directed(index, Direction::Outgoing) {
            if !visited[next.index()] {
                queue.push_back(next);
            }
        }
    }

    reached
}
