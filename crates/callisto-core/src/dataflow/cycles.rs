//! Incremental cycle detection and tracking.

use rustc_hash::FxHashSet;

use crate::cell::CellId;
use crate::dataflow::topology::{Edge, GraphTopology};

/// Tracks the cycles present in the graph.
///
/// Each cycle is a tuple of directed edges in traversal order. Newly
/// detected closures are stored independently even when they share edges
/// with existing cycles.
#[derive(Debug, Default)]
pub struct CycleTracker {
    cycles: FxHashSet<Vec<Edge>>,
}

impl CycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `edge` closes a cycle: a path from its child back to
    /// its parent. If so, record and return the cycle.
    pub fn detect_cycle_for_edge(
        &mut self,
        edge: Edge,
        topology: &GraphTopology,
    ) -> Option<Vec<Edge>> {
        let (parent, child) = edge;
        let path = topology.get_path(child, parent);
        if path.is_empty() {
            return None;
        }
        let mut cycle = Vec::with_capacity(path.len() + 1);
        cycle.push(edge);
        cycle.extend(path);
        self.cycles.insert(cycle.clone());
        Some(cycle)
    }

    /// Drop every cycle containing `edge`; called when an edge is removed.
    pub fn remove_cycles_with_edge(&mut self, edge: Edge) {
        self.cycles.retain(|cycle| !cycle.contains(&edge));
    }

    pub fn cycles(&self) -> &FxHashSet<Vec<Edge>> {
        &self.cycles
    }

    /// Cycles whose every edge lies within the subgraph induced by
    /// `cell_ids`.
    pub fn get_cycles(
        &self,
        cell_ids: &FxHashSet<CellId>,
        topology: &GraphTopology,
    ) -> Vec<Vec<Edge>> {
        let mut induced_edges: FxHashSet<Edge> = FxHashSet::default();
        for &u in cell_ids {
            for v in topology.children(u) {
                if cell_ids.contains(&v) {
                    induced_edges.insert((u, v));
                }
            }
        }
        self.cycles
            .iter()
            .filter(|cycle| cycle.iter().all(|e| induced_edges.contains(e)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::compile_cell;
    use std::sync::Arc;

    fn topology_with_nodes(n: usize) -> GraphTopology {
        let mut topology = GraphTopology::new();
        for i in 0..n {
            let cell = Arc::new(compile_cell("x = 0", CellId::new(i)).unwrap());
            topology.add_node(CellId::new(i), cell).unwrap();
        }
        topology
    }

    #[test]
    fn test_two_cycle() {
        let mut topology = topology_with_nodes(2);
        let mut tracker = CycleTracker::new();
        let (a, b) = (CellId::new(0), CellId::new(1));

        topology.add_edge(a, b);
        assert!(tracker.detect_cycle_for_edge((a, b), &topology).is_none());

        topology.add_edge(b, a);
        let cycle = tracker.detect_cycle_for_edge((b, a), &topology).unwrap();
        assert_eq!(cycle, vec![(b, a), (a, b)]);
        assert_eq!(tracker.cycles().len(), 1);
    }

    #[test]
    fn test_remove_cycles_with_edge() {
        let mut topology = topology_with_nodes(2);
        let mut tracker = CycleTracker::new();
        let (a, b) = (CellId::new(0), CellId::new(1));
        topology.add_edge(a, b);
        topology.add_edge(b, a);
        tracker.detect_cycle_for_edge((b, a), &topology);

        tracker.remove_cycles_with_edge((a, b));
        assert!(tracker.cycles().is_empty());
    }

    #[test]
    fn test_three_cycle_in_traversal_order() {
        let mut topology = topology_with_nodes(3);
        let mut tracker = CycleTracker::new();
        let (a, b, c) = (CellId::new(0), CellId::new(1), CellId::new(2));
        topology.add_edge(a, b);
        topology.add_edge(b, c);
        topology.add_edge(c, a);
        let cycle = tracker.detect_cycle_for_edge((c, a), &topology).unwrap();
        assert_eq!(cycle, vec![(c, a), (a, b), (b, c)]);
    }

    #[test]
    fn test_induced_subgraph_projection() {
        let mut topology = topology_with_nodes(3);
        let mut tracker = CycleTracker::new();
        let (a, b) = (CellId::new(0), CellId::new(1));
        topology.add_edge(a, b);
        topology.add_edge(b, a);
        tracker.detect_cycle_for_edge((b, a), &topology);

        let all = FxHashSet::from_iter([a, b, CellId::new(2)]);
        assert_eq!(tracker.get_cycles(&all, &topology).len(), 1);

        let only_a = FxHashSet::from_iter([a]);
        assert!(tracker.get_cycles(&only_a, &topology).is_empty());
    }
}
