//! Transitive closure over the subsumption graph.
//!
//! Breadth-first search from a single start node, following edges in one
//! direction: `Incoming` walks toward ancestors, `Outgoing` toward
//! descendants.

use std::collections::{BTreeSet, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use crate::id::ExpressionId;

/// Subsumption graph: nodes are ids, edges run parent → child.
pub type SubsumptionGraph = StableDiGraph<ExpressionId, ()>;

/// Every node reachable from `start` in `direction`, excluding `start`.
pub fn reachable(
    graph: &SubsumptionGraph,
    start: NodeIndex,
    direction: Direction,
) -> BTreeSet<ExpressionId> {
    let mut visited: HashSet<NodeIndex> = HashSet::new();
    let mut out = BTreeSet::new();
    let mut queue = VecDeque::new();

    visited.insert(start);
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        for next in graph.neighbors_directed(node, direction) {
            if visited.insert(next) {
                if let Some(id) = graph.node_weight(next) {
                    out.insert(*id);
                }
                queue.push_back(next);
            }
        }
    }

    out
}

/// Immediate neighbours of `node` in `direction`.
pub fn adjacent(
    graph: &SubsumptionGraph,
    node: NodeIndex,
    direction: Direction,
) -> BTreeSet<ExpressionId> {
    graph
        .neighbors_directed(node, direction)
        .filter_map(|n| graph.node_weight(n).copied())
        .collect()
}
