//! The dependency graph: topology, definitions, cycles, edge computation,
//! and the thread-safe coordinator, plus traversal utilities used by the
//! scheduler.

pub mod cycles;
pub mod definitions;
pub mod edges;
pub mod graph;
pub mod topology;
pub mod validate;

use std::collections::{BinaryHeap, VecDeque};
use std::cmp::Reverse;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell::{CellId, CellImpl, RunResultStatus};
use crate::variables::Language;

pub use self::graph::DirectedGraph;
pub use self::topology::{Edge, GraphTopology};

/// Signature of a relatives override for [`transitive_closure`]: given a
/// cell and a direction (`true` for children), produce the cells to walk to.
pub type RelativesFn<'a> = &'a dyn Fn(&GraphTopology, CellId, bool) -> FxHashSet<CellId>;

/// The passed-in cells and their descendants (or ancestors).
///
/// If `children` is true, walks child edges, otherwise parent edges. If
/// `inclusive`, the passed-in cells are part of the result. `relatives`
/// overrides how a cell's neighbors are computed; `predicate` filters which
/// discovered cells enter the result (they are still traversed).
pub fn transitive_closure(
    topology: &GraphTopology,
    cell_ids: &FxHashSet<CellId>,
    children: bool,
    inclusive: bool,
    relatives: Option<RelativesFn<'_>>,
    predicate: Option<&dyn Fn(&CellImpl) -> bool>,
) -> FxHashSet<CellId> {
    let mut result: FxHashSet<CellId> = if inclusive {
        cell_ids.clone()
    } else {
        FxHashSet::default()
    };
    let mut seen: FxHashSet<CellId> = cell_ids.clone();
    let mut queue: VecDeque<CellId> = cell_ids.iter().copied().collect();

    while let Some(cid) = queue.pop_front() {
        let relatives_set = match relatives {
            Some(f) => f(topology, cid, children),
            None if children => topology.children(cid),
            None => topology.parents(cid),
        };
        for relative in relatives_set {
            if seen.insert(relative) {
                let include = match predicate {
                    Some(p) => topology.cell(relative).is_some_and(|cell| p(cell)),
                    None => true,
                };
                if include {
                    result.insert(relative);
                }
                queue.push_back(relative);
            }
        }
    }
    result
}

/// Parents and children of each node in `cell_ids`, restricted to
/// `cell_ids`: the induced subgraph.
pub fn induced_subgraph(
    topology: &GraphTopology,
    cell_ids: &[CellId],
) -> (
    FxHashMap<CellId, FxHashSet<CellId>>,
    FxHashMap<CellId, FxHashSet<CellId>>,
) {
    let id_set: FxHashSet<CellId> = cell_ids.iter().copied().collect();
    let mut parents = FxHashMap::default();
    let mut children = FxHashMap::default();
    for &cid in cell_ids {
        parents.insert(
            cid,
            topology
                .parents(cid)
                .into_iter()
                .filter(|p| id_set.contains(p))
                .collect::<FxHashSet<_>>(),
        );
        children.insert(
            cid,
            topology
                .children(cid)
                .into_iter()
                .filter(|c| id_set.contains(c))
                .collect::<FxHashSet<_>>(),
        );
    }
    (parents, children)
}

/// Sort `cell_ids` topologically by repeatedly removing sources, breaking
/// ties by registration order. Cells on a cycle are left out of the result.
pub fn topological_sort(topology: &GraphTopology, cell_ids: &[CellId]) -> Vec<CellId> {
    let order_key =
        |cid: CellId| topology.registration_index(cid).unwrap_or(usize::MAX);

    let (parents, children) = induced_subgraph(topology, cell_ids);
    let mut in_degree: FxHashMap<CellId, usize> = cell_ids
        .iter()
        .map(|&cid| (cid, parents.get(&cid).map_or(0, FxHashSet::len)))
        .collect();

    let mut heap: BinaryHeap<Reverse<(usize, CellId)>> = cell_ids
        .iter()
        .filter(|cid| in_degree[cid] == 0)
        .map(|&cid| Reverse((order_key(cid), cid)))
        .collect();

    let mut sorted = Vec::with_capacity(cell_ids.len());
    while let Some(Reverse((_, cid))) = heap.pop() {
        sorted.push(cid);
        if let Some(cell_children) = children.get(&cid) {
            for &child in cell_children {
                let degree = in_degree.get_mut(&child).expect("child is in the subgraph");
                *degree -= 1;
                if *degree == 0 {
                    heap.push(Reverse((order_key(child), child)));
                }
            }
        }
    }
    sorted
}

/// Relatives override that prunes already-imported definitions: re-running
/// an import block only invalidates descendants of defs that actually
/// changed. Descendants whose previous run was interrupted remain
/// candidates regardless.
pub fn import_block_relatives(
    topology: &GraphTopology,
    cid: CellId,
    children: bool,
) -> FxHashSet<CellId> {
    if !children {
        return topology.parents(cid);
    }
    let Some(cell) = topology.cell(cid) else {
        return FxHashSet::default();
    };
    if !cell.import_workspace.is_import_block {
        return topology.children(cid);
    }

    let imported_defs = cell.import_workspace.imported_defs();
    let unimported: FxHashSet<_> = cell.defs.difference(&imported_defs).collect();

    let mut children_ids: FxHashSet<CellId> = unimported
        .iter()
        .flat_map(|name| edges::get_referring_cells(name, Language::Python, topology))
        .collect();

    if !imported_defs.is_empty() {
        children_ids.extend(
            imported_defs
                .iter()
                .flat_map(|name| edges::get_referring_cells(name, Language::Python, topology))
                .filter(|child| {
                    topology
                        .cell(*child)
                        .is_some_and(|c| RunResultStatus::is_interrupted(c.run_result_status()))
                }),
        );
    }
    children_ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::compile_cell;
    use std::sync::Arc;

    fn topology_of(codes: &[&str]) -> GraphTopology {
        let mut topology = GraphTopology::new();
        for (i, code) in codes.iter().enumerate() {
            let cell = Arc::new(compile_cell(code, CellId::new(i)).unwrap());
            topology.add_node(CellId::new(i), cell).unwrap();
        }
        topology
    }

    fn with_edges(codes: &[&str], edge_list: &[(usize, usize)]) -> GraphTopology {
        let mut topology = topology_of(codes);
        for &(u, v) in edge_list {
            topology.add_edge(CellId::new(u), CellId::new(v));
        }
        topology
    }

    fn all_ids(n: usize) -> Vec<CellId> {
        (0..n).map(CellId::new).collect()
    }

    #[test]
    fn test_transitive_closure_children() {
        let topology = with_edges(&["a = 0", "b = a", "c = b"], &[(0, 1), (1, 2)]);
        let closure = transitive_closure(
            &topology,
            &FxHashSet::from_iter([CellId::new(0)]),
            true,
            true,
            None,
            None,
        );
        assert_eq!(closure, FxHashSet::from_iter(all_ids(3)));
    }

    #[test]
    fn test_transitive_closure_exclusive_ancestors() {
        let topology = with_edges(&["a = 0", "b = a", "c = b"], &[(0, 1), (1, 2)]);
        let closure = transitive_closure(
            &topology,
            &FxHashSet::from_iter([CellId::new(2)]),
            false,
            false,
            None,
            None,
        );
        assert_eq!(
            closure,
            FxHashSet::from_iter([CellId::new(0), CellId::new(1)])
        );
    }

    #[test]
    fn test_topological_sort_chain() {
        let topology = with_edges(&["a = 0", "b = a", "c = b"], &[(0, 1), (1, 2)]);
        let sorted = topological_sort(&topology, &all_ids(3));
        assert_eq!(sorted, all_ids(3));
    }

    #[test]
    fn test_topological_sort_registration_tie_break() {
        // No dependencies: output must follow registration order.
        let topology = topology_of(&["a = 0", "b = 0", "c = 0"]);
        let ids = vec![CellId::new(2), CellId::new(0), CellId::new(1)];
        let sorted = topological_sort(&topology, &ids);
        assert_eq!(sorted, all_ids(3));
    }

    #[test]
    fn test_topological_sort_skips_cycle_members() {
        let topology = with_edges(&["a = b", "b = a", "c = 0"], &[(0, 1), (1, 0)]);
        let sorted = topological_sort(&topology, &all_ids(3));
        assert_eq!(sorted, vec![CellId::new(2)]);
    }

    #[test]
    fn test_induced_subgraph_excludes_outsiders() {
        let topology = with_edges(&["a = 0", "b = a", "c = b"], &[(0, 1), (1, 2)]);
        let ids = [CellId::new(0), CellId::new(2)];
        let (parents, children) = induced_subgraph(&topology, &ids);
        assert!(parents[&CellId::new(2)].is_empty());
        assert!(children[&CellId::new(0)].is_empty());
    }

    #[test]
    fn test_import_block_relatives_prunes_imported() {
        let mut topology = GraphTopology::new();
        let importer = Arc::new(
            crate::analyze::compile_cell_with(
                "import foo\nimport bar",
                CellId::new(0),
                Default::default(),
            )
            .unwrap(),
        );
        importer
            .import_workspace
            .add_imported_defs(["foo".to_string()]);
        topology.add_node(CellId::new(0), importer).unwrap();

        let uses_foo = Arc::new(compile_cell("foo.x()", CellId::new(1)).unwrap());
        uses_foo.set_run_result_status(RunResultStatus::Success);
        topology.add_node(CellId::new(1), uses_foo).unwrap();

        let uses_bar = Arc::new(compile_cell("bar.x()", CellId::new(2)).unwrap());
        uses_bar.set_run_result_status(RunResultStatus::Success);
        topology.add_node(CellId::new(2), uses_bar).unwrap();

        topology.add_edge(CellId::new(0), CellId::new(1));
        topology.add_edge(CellId::new(0), CellId::new(2));

        // foo was already imported: only bar's user is a relative.
        let relatives = import_block_relatives(&topology, CellId::new(0), true);
        assert_eq!(relatives, FxHashSet::from_iter([CellId::new(2)]));
    }

    #[test]
    fn test_import_block_relatives_keeps_interrupted_children() {
        let mut topology = GraphTopology::new();
        let importer = Arc::new(compile_cell("import foo", CellId::new(0)).unwrap());
        importer
            .import_workspace
            .add_imported_defs(["foo".to_string()]);
        topology.add_node(CellId::new(0), importer).unwrap();

        // Never ran: stays a candidate even though foo is imported.
        let uses_foo = Arc::new(compile_cell("foo.x()", CellId::new(1)).unwrap());
        topology.add_node(CellId::new(1), uses_foo).unwrap();
        topology.add_edge(CellId::new(0), CellId::new(1));

        let relatives = import_block_relatives(&topology, CellId::new(0), true);
        assert_eq!(relatives, FxHashSet::from_iter([CellId::new(1)]));
    }
}
