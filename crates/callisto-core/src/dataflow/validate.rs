//! Structural validation: user-facing errors derived from the graph.
//!
//! Validation never mutates the graph; errors are values attached to cells.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell::{CellId, SETUP_CELL_NAME};
use crate::dataflow::DirectedGraph;
use crate::variables::Name;

/// An edge annotated with the variable names that realize it.
pub type EdgeWithVars = (CellId, Vec<Name>, CellId);

/// A violation of notebook semantics. A cell may carry several at once.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuralError {
    /// The same name is defined by more than one cell.
    MultipleDefinition { name: Name, cells: Vec<CellId> },
    /// A cell deletes a name that is defined by other cells.
    DeleteNonlocal { name: Name, cells: Vec<CellId> },
    /// The cell participates in a dependency cycle.
    Cycle { edges_with_vars: Vec<EdgeWithVars> },
    /// The setup cell has ancestors; it must be a source of the graph.
    SetupRoot { edges_with_vars: Vec<EdgeWithVars> },
}

fn check_for_multiple_definitions(
    graph: &DirectedGraph,
) -> FxHashMap<CellId, Vec<StructuralError>> {
    let mut errors: FxHashMap<CellId, Vec<StructuralError>> = FxHashMap::default();
    for (name, defining_cells) in graph.definitions() {
        if defining_cells.len() <= 1 {
            continue;
        }
        for &cid in &defining_cells {
            let mut others: Vec<CellId> =
                defining_cells.iter().copied().filter(|&c| c != cid).collect();
            others.sort();
            errors.entry(cid).or_default().push(StructuralError::MultipleDefinition {
                name: name.clone(),
                cells: others,
            });
        }
    }
    errors
}

fn check_for_delete_nonlocal(graph: &DirectedGraph) -> FxHashMap<CellId, Vec<StructuralError>> {
    let mut errors: FxHashMap<CellId, Vec<StructuralError>> = FxHashMap::default();
    let definitions = graph.definitions();
    for (cid, cell) in graph.cells() {
        for name in &cell.deleted_refs {
            if let Some(defining_cells) = definitions.get(name) {
                let mut cells: Vec<CellId> = defining_cells.iter().copied().collect();
                cells.sort();
                errors.entry(cid).or_default().push(StructuralError::DeleteNonlocal {
                    name: name.clone(),
                    cells,
                });
            }
        }
    }
    errors
}

fn check_for_cycles(graph: &DirectedGraph) -> FxHashMap<CellId, Vec<StructuralError>> {
    let mut errors: FxHashMap<CellId, Vec<StructuralError>> = FxHashMap::default();
    for cycle in graph.cycles() {
        let mut nodes_in_cycle: FxHashSet<CellId> = FxHashSet::default();
        for &(u, v) in &cycle {
            nodes_in_cycle.insert(u);
            nodes_in_cycle.insert(v);
        }
        // Annotate each edge with the variables that link its cells before
        // reporting to the user.
        let edges_with_vars: Vec<EdgeWithVars> = cycle
            .iter()
            .map(|&(u, v)| (u, realizing_vars(graph, u, v), v))
            .collect();
        for cid in nodes_in_cycle {
            errors.entry(cid).or_default().push(StructuralError::Cycle {
                edges_with_vars: edges_with_vars.clone(),
            });
        }
    }
    errors
}

fn check_for_invalid_root(graph: &DirectedGraph) -> FxHashMap<CellId, Vec<StructuralError>> {
    let mut errors: FxHashMap<CellId, Vec<StructuralError>> = FxHashMap::default();
    let Some((setup_id, _)) = graph
        .cells()
        .into_iter()
        .find(|(_, cell)| cell.name == SETUP_CELL_NAME)
    else {
        return errors;
    };
    let ancestors = graph.ancestors(setup_id);
    if ancestors.is_empty() {
        return errors;
    }
    let mut edges_with_vars: Vec<EdgeWithVars> = ancestors
        .into_iter()
        .filter_map(|ancestor| {
            let deps = realizing_vars(graph, ancestor, setup_id);
            (!deps.is_empty()).then_some((ancestor, deps, setup_id))
        })
        .collect();
    edges_with_vars.sort();
    errors
        .entry(setup_id)
        .or_default()
        .push(StructuralError::SetupRoot { edges_with_vars });
    errors
}

/// The sorted names `defs(parent) ∩ refs(child)`.
fn realizing_vars(graph: &DirectedGraph, parent: CellId, child: CellId) -> Vec<Name> {
    let (Some(parent_cell), Some(child_cell)) = (graph.cell(parent), graph.cell(child)) else {
        return Vec::new();
    };
    let mut vars: Vec<Name> = parent_cell
        .defs
        .intersection(&child_cell.refs)
        .cloned()
        .collect();
    vars.sort();
    vars
}

/// Check the graph for violations of notebook semantics. Returns an entry
/// for each cell involved in an error.
pub fn check_for_errors(graph: &DirectedGraph) -> FxHashMap<CellId, Vec<StructuralError>> {
    let mut errors = check_for_multiple_definitions(graph);
    for (cid, cell_errors) in check_for_cycles(graph) {
        errors.entry(cid).or_default().extend(cell_errors);
    }
    for (cid, cell_errors) in check_for_delete_nonlocal(graph) {
        errors.entry(cid).or_default().extend(cell_errors);
    }
    for (cid, cell_errors) in check_for_invalid_root(graph) {
        errors.entry(cid).or_default().extend(cell_errors);
    }
    errors
}
