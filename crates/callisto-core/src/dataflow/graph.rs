//! Graph coordinator: thread-safe orchestration of registration, deletion,
//! staleness, and enablement over the topology, registry, and cycle tracker.

use std::sync::{Arc, RwLock, RwLockReadGuard};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analyze::sql::SqlRef;
use crate::cell::{CellId, CellImpl, RuntimeState, code_key};
use crate::dataflow::cycles::CycleTracker;
use crate::dataflow::definitions::DefinitionRegistry;
use crate::dataflow::edges;
use crate::dataflow::topology::{Edge, GraphTopology};
use crate::error::{Error, Result};
use crate::variables::{ImportData, Language, Name, VariableData};

#[derive(Debug, Default)]
struct GraphInner {
    topology: GraphTopology,
    registry: DefinitionRegistry,
    cycles: CycleTracker,
}

/// The dependency graph of a notebook.
///
/// A single lock guards all mutation; it is shared between the runtime
/// thread and the code-completion service and should almost always be
/// uncontended. Readers see a cell either absent or fully registered.
#[derive(Debug, Default)]
pub struct DirectedGraph {
    inner: RwLock<GraphInner>,
}

impl DirectedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphInner> {
        self.inner.read().expect("graph lock poisoned")
    }

    /// Whether a registered cell has the same content hash as `code`; the
    /// scheduler uses this to skip re-registration.
    pub fn is_cell_cached(&self, cell_id: CellId, code: &str) -> bool {
        self.read()
            .topology
            .cell(cell_id)
            .is_some_and(|cell| cell.key == code_key(code))
    }

    /// Add a cell to the graph. Requires that `cell_id` is not already
    /// registered.
    pub fn register_cell(&self, cell_id: CellId, cell: Arc<CellImpl>) -> Result<()> {
        tracing::debug!("acquiring graph lock to register cell {cell_id}");
        {
            let mut inner = self.inner.write().expect("graph lock poisoned");
            tracing::debug!("acquired graph lock");
            let GraphInner {
                topology,
                registry,
                cycles,
            } = &mut *inner;

            topology.add_node(cell_id, cell.clone())?;

            // Definitions must land before edge computation so a cell
            // referencing its own newly-added defs sees them.
            for (name, variable_data) in &cell.variable_data {
                registry.register_definition(cell_id, name, variable_data);
            }

            let (parents, children) =
                edges::compute_edges_for_cell(cell_id, &cell, topology, registry);

            for parent_id in parents {
                topology.add_edge(parent_id, cell_id);
                cycles.detect_cycle_for_edge((parent_id, cell_id), topology);
            }
            for child_id in children {
                topology.add_edge(cell_id, child_id);
                cycles.detect_cycle_for_edge((cell_id, child_id), topology);
            }
        }
        tracing::debug!("registered cell {cell_id} and released graph lock");

        if self.is_any_ancestor_stale(cell_id) {
            self.set_stale(&FxHashSet::from_iter([cell_id]), false);
        }
        if self.is_any_ancestor_disabled(cell_id) {
            cell.set_runtime_state(RuntimeState::DisabledTransitively);
        }
        Ok(())
    }

    /// Remove a cell from the graph; returns the ids of its children so the
    /// scheduler can mark them stale.
    pub fn delete_cell(&self, cell_id: CellId) -> Result<FxHashSet<CellId>> {
        tracing::debug!("acquiring graph lock to delete cell {cell_id}");
        let children = {
            let mut inner = self.inner.write().expect("graph lock poisoned");
            let cell = inner
                .topology
                .cell(cell_id)
                .cloned()
                .ok_or(Error::CellNotFound(cell_id))?;

            let children = inner.topology.children(cell_id);

            inner
                .registry
                .unregister_definitions(cell_id, cell.defs.iter());

            let mut broken_edges: Vec<Edge> = inner
                .topology
                .children(cell_id)
                .into_iter()
                .map(|child| (cell_id, child))
                .collect();
            broken_edges.extend(
                inner
                    .topology
                    .parents(cell_id)
                    .into_iter()
                    .map(|parent| (parent, cell_id)),
            );
            for edge in broken_edges {
                inner.cycles.remove_cycles_with_edge(edge);
            }

            inner.topology.remove_node(cell_id)?;
            children
        };
        tracing::debug!("deleted cell {cell_id} and released graph lock");
        Ok(children)
    }

    // ------------------------------------------------------------------
    // Read accessors

    pub fn contains(&self, cell_id: CellId) -> bool {
        self.read().topology.contains(cell_id)
    }

    pub fn cell(&self, cell_id: CellId) -> Option<Arc<CellImpl>> {
        self.read().topology.cell(cell_id).cloned()
    }

    /// All cells with their ids, in registration order.
    pub fn cells(&self) -> Vec<(CellId, Arc<CellImpl>)> {
        self.read()
            .topology
            .cells()
            .map(|(id, cell)| (id, cell.clone()))
            .collect()
    }

    pub fn cell_ids(&self) -> Vec<CellId> {
        self.read().topology.cells().map(|(id, _)| id).collect()
    }

    pub fn parents(&self, cell_id: CellId) -> FxHashSet<CellId> {
        self.read().topology.parents(cell_id)
    }

    pub fn children(&self, cell_id: CellId) -> FxHashSet<CellId> {
        self.read().topology.children(cell_id)
    }

    pub fn ancestors(&self, cell_id: CellId) -> FxHashSet<CellId> {
        self.read().topology.ancestors(cell_id)
    }

    pub fn descendants(&self, cell_id: CellId) -> FxHashSet<CellId> {
        self.read().topology.descendants(cell_id)
    }

    pub fn get_path(&self, source: CellId, dst: CellId) -> Vec<Edge> {
        self.read().topology.get_path(source, dst)
    }

    pub fn cycles(&self) -> FxHashSet<Vec<Edge>> {
        self.read().cycles.cycles().clone()
    }

    pub fn definitions(&self) -> FxHashMap<Name, FxHashSet<CellId>> {
        self.read().registry.definitions().clone()
    }

    /// All cells that define `name`; a singleton for well-formed graphs.
    pub fn get_defining_cells(&self, name: &str) -> FxHashSet<CellId> {
        self.read().registry.get_defining_cells(name)
    }

    /// All cells that have a ref to `name`, by language rule.
    pub fn get_referring_cells(&self, name: &str, language: Language) -> FxHashSet<CellId> {
        edges::get_referring_cells(name, language, &self.read().topology)
    }

    pub fn find_sql_hierarchical_matches(&self, sql_ref: &SqlRef) -> Vec<(FxHashSet<CellId>, Name)> {
        self.read().registry.find_sql_hierarchical_matches(sql_ref)
    }

    /// Names defined by more than one cell.
    pub fn get_multiply_defined(&self) -> Vec<Name> {
        self.read().registry.get_multiply_defined()
    }

    /// Names that are deleted by some cell but defined elsewhere.
    pub fn get_deleted_nonlocal_ref(&self) -> Vec<Name> {
        let inner = self.read();
        let mut names = Vec::new();
        for (_, cell) in inner.topology.cells() {
            for reference in &cell.deleted_refs {
                if inner.registry.contains(reference) {
                    names.push(reference.clone());
                }
            }
        }
        names
    }

    /// Imports from one cell, or from every cell, keyed by definition.
    pub fn get_imports(&self, cell_id: Option<CellId>) -> FxHashMap<Name, ImportData> {
        let inner = self.read();
        let mut imports = FxHashMap::default();
        let cells: Vec<_> = match cell_id {
            Some(cid) => inner.topology.cell(cid).into_iter().collect(),
            None => inner.topology.cells().map(|(_, cell)| cell).collect(),
        };
        for cell in cells {
            for imported in &cell.imports {
                imports.insert(imported.definition.clone(), imported.clone());
            }
        }
        imports
    }

    // ------------------------------------------------------------------
    // Staleness and enablement

    pub fn is_any_ancestor_stale(&self, cell_id: CellId) -> bool {
        let inner = self.read();
        inner
            .topology
            .ancestors(cell_id)
            .into_iter()
            .any(|cid| inner.topology.cell(cid).is_some_and(|cell| cell.stale()))
    }

    pub fn is_any_ancestor_disabled(&self, cell_id: CellId) -> bool {
        let inner = self.read();
        inner
            .topology
            .ancestors(cell_id)
            .into_iter()
            .any(|cid| {
                inner
                    .topology
                    .cell(cid)
                    .is_some_and(|cell| cell.config.disabled)
            })
    }

    /// Whether a cell is disabled, directly or through some ancestor.
    pub fn is_disabled(&self, cell_id: CellId) -> Result<bool> {
        let inner = self.read();
        let cell = inner
            .topology
            .cell(cell_id)
            .ok_or(Error::CellNotFound(cell_id))?;
        if cell.config.disabled {
            return Ok(true);
        }
        let mut seen: FxHashSet<CellId> = FxHashSet::default();
        let mut queue = vec![cell_id];
        while let Some(cid) = queue.pop() {
            seen.insert(cid);
            for parent_id in inner.topology.parents(cid) {
                if seen.contains(&parent_id) {
                    continue;
                }
                if inner
                    .topology
                    .cell(parent_id)
                    .is_some_and(|cell| cell.config.disabled)
                {
                    return Ok(true);
                }
                queue.push(parent_id);
            }
        }
        Ok(false)
    }

    /// Disable a cell: its descendants become disabled transitively. Cell
    /// statuses mutate; the graph does not.
    pub fn disable_cell(&self, cell_id: CellId) -> Result<()> {
        let inner = self.read();
        if !inner.topology.contains(cell_id) {
            return Err(Error::CellNotFound(cell_id));
        }
        for cid in inner.topology.descendants(cell_id) {
            if let Some(cell) = inner.topology.cell(cid) {
                cell.set_runtime_state(RuntimeState::DisabledTransitively);
            }
        }
        Ok(())
    }

    /// Enable a cell. Returns the cells that were stale and, no longer
    /// transitively disabled, should be re-run.
    pub fn enable_cell(&self, cell_id: CellId) -> Result<FxHashSet<CellId>> {
        if !self.contains(cell_id) {
            return Err(Error::CellNotFound(cell_id));
        }
        let closure = {
            let inner = self.read();
            super::transitive_closure(
                &inner.topology,
                &FxHashSet::from_iter([cell_id]),
                true,
                true,
                None,
                None,
            )
        };
        let mut cells_to_run = FxHashSet::default();
        for cid in closure {
            if !self.is_disabled(cid)? {
                let Some(cell) = self.cell(cid) else { continue };
                if cell.stale() {
                    cells_to_run.insert(cid);
                }
                if cell.disabled_transitively() {
                    cell.set_runtime_state(RuntimeState::Idle);
                }
            }
        }
        Ok(cells_to_run)
    }

    /// Mark the transitive closure of `cell_ids` stale. With
    /// `prune_imports`, already-imported definitions of import blocks do not
    /// propagate staleness.
    pub fn set_stale(&self, cell_ids: &FxHashSet<CellId>, prune_imports: bool) {
        let inner = self.read();
        let relatives: Option<super::RelativesFn<'_>> = if prune_imports {
            Some(&super::import_block_relatives)
        } else {
            None
        };
        for cid in super::transitive_closure(&inner.topology, cell_ids, true, true, relatives, None)
        {
            if let Some(cell) = inner.topology.cell(cid) {
                cell.set_stale(true);
            }
        }
    }

    pub fn get_stale(&self) -> FxHashSet<CellId> {
        self.read()
            .topology
            .cells()
            .filter(|(_, cell)| cell.stale())
            .map(|(cid, _)| cid)
            .collect()
    }

    // ------------------------------------------------------------------
    // Scheduling helpers

    /// Sort `cell_ids` in execution order over a consistent snapshot.
    pub fn topological_sort(&self, cell_ids: &[CellId]) -> Vec<CellId> {
        super::topological_sort(&self.read().topology, cell_ids)
    }

    /// Cycles entirely contained in `cell_ids`.
    pub fn get_cycles(&self, cell_ids: &FxHashSet<CellId>) -> Vec<Vec<Edge>> {
        let inner = self.read();
        inner.cycles.get_cycles(cell_ids, &inner.topology)
    }

    /// Remove cells whose definitions are all provided by `overrides` from
    /// an execution order. Every pruned cell must have all of its defs
    /// covered, otherwise the caller cannot substitute it.
    pub fn prune_cells_for_overrides(
        &self,
        execution_order: &[CellId],
        overrides: &FxHashSet<Name>,
        excluded: Option<CellId>,
    ) -> Result<Vec<CellId>> {
        if overrides.is_empty() {
            return Ok(execution_order.to_vec());
        }
        let inner = self.read();

        let mut cells_to_prune: FxHashSet<CellId> = FxHashSet::default();
        for name in overrides {
            cells_to_prune.extend(inner.registry.get_defining_cells(name));
        }

        let mut missing: FxHashSet<Name> = FxHashSet::default();
        for &cell_id in &cells_to_prune {
            if Some(cell_id) == excluded {
                continue;
            }
            if let Some(cell) = inner.topology.cell(cell_id) {
                missing.extend(cell.defs.difference(overrides).cloned());
            }
        }
        if !missing.is_empty() {
            let mut missing: Vec<Name> = missing.into_iter().collect();
            missing.sort();
            return Err(Error::IncompleteRefs { missing });
        }

        Ok(execution_order
            .iter()
            .copied()
            .filter(|cid| !cells_to_prune.contains(cid))
            .collect())
    }

    /// The passed-in refs plus the names they require transitively at the
    /// block (function / class) level.
    ///
    /// If `inclusive`, the passed-in refs are part of the result. If a
    /// predicate is given, only bindings satisfying it are expanded.
    pub fn get_transitive_references(
        &self,
        refs: &FxHashSet<Name>,
        inclusive: bool,
        predicate: Option<&dyn Fn(&str, &VariableData) -> bool>,
    ) -> FxHashSet<Name> {
        let inner = self.read();
        let mut processed: FxHashSet<Name> = FxHashSet::default();
        let mut queue: FxHashSet<Name> = refs
            .iter()
            .filter(|name| inner.registry.contains(name))
            .cloned()
            .collect();

        while !queue.is_empty() {
            // Ideally one cell per ref, but stay agnostic to cycles.
            let cells: FxHashSet<CellId> = queue
                .iter()
                .flat_map(|name| inner.registry.get_defining_cells(name))
                .collect();

            for cell_id in cells {
                let Some(cell) = inner.topology.cell(cell_id) else {
                    continue;
                };
                let newly_processed: Vec<Name> = cell
                    .variable_data
                    .keys()
                    .filter(|name| queue.contains(*name))
                    .cloned()
                    .collect();
                for name in &newly_processed {
                    processed.insert(name.clone());
                    queue.remove(name);
                }
                for variable in &newly_processed {
                    // Variables can be defined multiple times in one cell.
                    for datum in &cell.variable_data[variable] {
                        let include = match predicate {
                            Some(p) => p(variable, datum),
                            None => true,
                        };
                        if !include {
                            continue;
                        }
                        let to_process_list: Vec<Name> =
                            datum.required_refs.difference(&processed).cloned().collect();
                        for to_process in to_process_list {
                            if inner.registry.contains(&to_process) {
                                queue.insert(to_process.clone());
                            } else if crate::variables::is_local(&to_process) {
                                // Private names referenced by public
                                // bindings are part of the closure.
                                processed.insert(to_process.clone());
                            }
                        }
                    }
                }
            }
        }

        if inclusive {
            processed.union(refs).cloned().collect()
        } else {
            processed.difference(refs).cloned().collect()
        }
    }
}
