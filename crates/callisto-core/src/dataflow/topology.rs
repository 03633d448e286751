//! Graph topology: nodes and edges only, no dependency semantics.

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};

use crate::cell::{CellId, CellImpl};
use crate::error::{Error, Result};

/// A directed edge `(parent, child)`: the child reads a name the parent
/// defines.
pub type Edge = (CellId, CellId);

/// Pure graph structure over registered cells.
///
/// Cells are kept in registration order; topological-sort tie-breaking is the
/// only consumer of that order.
#[derive(Debug, Default)]
pub struct GraphTopology {
    /// Edges go from producer to consumer.
    graph: StableDiGraph<CellId, ()>,
    node_indices: FxHashMap<CellId, NodeIndex>,
    cells: IndexMap<CellId, Arc<CellImpl>, FxBuildHasher>,
}

impl GraphTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a cell with empty parent/child sets. The id must be unknown.
    pub fn add_node(&mut self, cell_id: CellId, cell: Arc<CellImpl>) -> Result<()> {
        if self.cells.contains_key(&cell_id) {
            return Err(Error::DuplicateCell(cell_id));
        }
        let index = self.graph.add_node(cell_id);
        self.node_indices.insert(cell_id, index);
        self.cells.insert(cell_id, cell);
        Ok(())
    }

    /// Remove a cell and every edge touching it.
    pub fn remove_node(&mut self, cell_id: CellId) -> Result<Arc<CellImpl>> {
        let cell = self
            .cells
            .shift_remove(&cell_id)
            .ok_or(Error::CellNotFound(cell_id))?;
        if let Some(index) = self.node_indices.remove(&cell_id) {
            self.graph.remove_node(index);
        }
        Ok(cell)
    }

    pub fn add_edge(&mut self, parent: CellId, child: CellId) {
        let (Some(&u), Some(&v)) = (self.node_indices.get(&parent), self.node_indices.get(&child))
        else {
            return;
        };
        if self.graph.find_edge(u, v).is_none() {
            self.graph.add_edge(u, v, ());
        }
    }

    pub fn remove_edge(&mut self, parent: CellId, child: CellId) {
        if let (Some(&u), Some(&v)) =
            (self.node_indices.get(&parent), self.node_indices.get(&child))
            && let Some(edge) = self.graph.find_edge(u, v)
        {
            self.graph.remove_edge(edge);
        }
    }

    pub fn contains(&self, cell_id: CellId) -> bool {
        self.cells.contains_key(&cell_id)
    }

    pub fn cell(&self, cell_id: CellId) -> Option<&Arc<CellImpl>> {
        self.cells.get(&cell_id)
    }

    /// Cells in registration order.
    pub fn cells(&self) -> impl Iterator<Item = (CellId, &Arc<CellImpl>)> {
        self.cells.iter().map(|(id, cell)| (*id, cell))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Position of a cell in registration order.
    pub fn registration_index(&self, cell_id: CellId) -> Option<usize> {
        self.cells.get_index_of(&cell_id)
    }

    pub fn children(&self, cell_id: CellId) -> FxHashSet<CellId> {
        self.neighbors(cell_id, Direction::Outgoing)
    }

    pub fn parents(&self, cell_id: CellId) -> FxHashSet<CellId> {
        self.neighbors(cell_id, Direction::Incoming)
    }

    fn neighbors(&self, cell_id: CellId, direction: Direction) -> FxHashSet<CellId> {
        self.node_indices
            .get(&cell_id)
            .map(|&index| {
                self.graph
                    .neighbors_directed(index, direction)
                    .map(|n| self.graph[n])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// BFS path from `source` to `dst` over child edges; empty when
    /// `source == dst` or no path exists.
    pub fn get_path(&self, source: CellId, dst: CellId) -> Vec<Edge> {
        if source == dst {
            return Vec::new();
        }
        let mut queue: VecDeque<(CellId, Vec<Edge>)> = VecDeque::from([(source, Vec::new())]);
        let mut found: FxHashSet<CellId> = FxHashSet::from_iter([source]);

        while let Some((node, path)) = queue.pop_front() {
            for child in self.children(node) {
                if !found.contains(&child) {
                    let mut next_path = path.clone();
                    next_path.push((node, child));
                    if child == dst {
                        return next_path;
                    }
                    found.insert(child);
                    queue.push_back((child, next_path));
                }
            }
        }
        Vec::new()
    }

    /// Transitive closure over parent edges, excluding the cell itself.
    pub fn ancestors(&self, cell_id: CellId) -> FxHashSet<CellId> {
        self.closure(cell_id, Direction::Incoming)
    }

    /// Transitive closure over child edges, excluding the cell itself.
    pub fn descendants(&self, cell_id: CellId) -> FxHashSet<CellId> {
        self.closure(cell_id, Direction::Outgoing)
    }

    fn closure(&self, cell_id: CellId, direction: Direction) -> FxHashSet<CellId> {
        let mut result = FxHashSet::default();
        let mut queue = VecDeque::from([cell_id]);
        while let Some(cid) = queue.pop_front() {
            for relative in self.neighbors(cid, direction) {
                if relative != cell_id && result.insert(relative) {
                    queue.push_back(relative);
                }
            }
        }
        result
    }
}
