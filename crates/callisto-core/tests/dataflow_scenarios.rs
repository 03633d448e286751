//! End-to-end dataflow scenarios: registration, edges, cycles, validation,
//! and execution ordering over compiled cells.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use callisto_core::dataflow::validate::{StructuralError, check_for_errors};
use callisto_core::{CellId, DirectedGraph, Error, Language, compile_cell};

// =============================================================================
// Test helpers
// =============================================================================

fn graph_of(codes: &[&str]) -> DirectedGraph {
    let graph = DirectedGraph::new();
    for (i, code) in codes.iter().enumerate() {
        let cell = Arc::new(compile_cell(code, CellId::new(i)).expect("cell compiles"));
        graph.register_cell(CellId::new(i), cell).expect("registers");
    }
    graph
}

fn ids(values: &[usize]) -> FxHashSet<CellId> {
    values.iter().map(|&i| CellId::new(i)).collect()
}

fn all_ids(n: usize) -> Vec<CellId> {
    (0..n).map(CellId::new).collect()
}

/// Edge symmetry must hold after every operation.
fn assert_edge_symmetry(graph: &DirectedGraph) {
    for (cid, _) in graph.cells() {
        for child in graph.children(cid) {
            assert!(
                graph.parents(child).contains(&cid),
                "child edge {cid} -> {child} missing parent back-edge"
            );
        }
        for parent in graph.parents(cid) {
            assert!(
                graph.children(parent).contains(&cid),
                "parent edge {parent} -> {cid} missing child edge"
            );
        }
    }
}

/// Every definition belongs to a registered cell and vice versa.
fn assert_definition_coverage(graph: &DirectedGraph) {
    let definitions = graph.definitions();
    for (name, definers) in &definitions {
        assert!(!definers.is_empty());
        for cid in definers {
            let cell = graph.cell(*cid).expect("definer registered");
            assert!(cell.defs.contains(name), "{name} not in defs of {cid}");
        }
    }
    for (cid, cell) in graph.cells() {
        for name in &cell.defs {
            assert!(
                definitions.contains_key(name),
                "def {name} of {cid} missing from registry"
            );
        }
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_chain() {
    let graph = graph_of(&["x = 0", "y = x", "z = y\nzz = x"]);

    assert!(graph.parents(CellId::new(0)).is_empty());
    assert_eq!(graph.parents(CellId::new(1)), ids(&[0]));
    assert_eq!(graph.parents(CellId::new(2)), ids(&[0, 1]));
    assert_eq!(graph.topological_sort(&all_ids(3)), all_ids(3));
    assert!(check_for_errors(&graph).is_empty());
    assert_edge_symmetry(&graph);
    assert_definition_coverage(&graph);
}

#[test]
fn test_two_cycle() {
    let graph = graph_of(&["x = y", "y = x"]);

    let cycles = graph.cycles();
    assert_eq!(cycles.len(), 1);
    let cycle = cycles.iter().next().unwrap();
    let edges: FxHashSet<_> = cycle.iter().copied().collect();
    assert_eq!(
        edges,
        FxHashSet::from_iter([
            (CellId::new(0), CellId::new(1)),
            (CellId::new(1), CellId::new(0)),
        ])
    );

    let errors = check_for_errors(&graph);
    for cid in [CellId::new(0), CellId::new(1)] {
        assert!(
            errors[&cid]
                .iter()
                .any(|e| matches!(e, StructuralError::Cycle { .. })),
            "{cid} should report a cycle error"
        );
    }
    assert_edge_symmetry(&graph);
}

#[test]
fn test_multiple_definitions() {
    let graph = graph_of(&["x = 0", "x = 1", "x = 2"]);
    let errors = check_for_errors(&graph);
    assert_eq!(errors.len(), 3);
    for i in 0..3usize {
        let expected_others: Vec<CellId> =
            (0..3).filter(|&j| j != i).map(CellId::new).collect();
        assert_eq!(
            errors[&CellId::new(i)],
            vec![StructuralError::MultipleDefinition {
                name: "x".to_string(),
                cells: expected_others,
            }]
        );
    }
}

#[test]
fn test_local_underscore_names_are_isolated() {
    let graph = graph_of(&["_x = 1", "_x = 2"]);
    assert!(check_for_errors(&graph).is_empty());
    assert!(graph.children(CellId::new(0)).is_empty());
    assert!(graph.children(CellId::new(1)).is_empty());
    assert!(!graph.definitions().contains_key("_x"));
}

#[test]
fn test_delete_nonlocal() {
    let graph = graph_of(&["x = 0", "del x"]);
    let errors = check_for_errors(&graph);
    assert_eq!(
        errors[&CellId::new(1)],
        vec![StructuralError::DeleteNonlocal {
            name: "x".to_string(),
            cells: vec![CellId::new(0)],
        }]
    );
    assert!(graph.parents(CellId::new(1)).contains(&CellId::new(0)));
}

#[test]
fn test_mutual_deleters_form_cycle() {
    let graph = graph_of(&["del x", "del x"]);
    assert!(!graph.cycles().is_empty());
    let errors = check_for_errors(&graph);
    assert!(
        errors[&CellId::new(0)]
            .iter()
            .any(|e| matches!(e, StructuralError::Cycle { .. }))
    );
}

#[test]
fn test_sql_hierarchical_resolution() {
    let graph = graph_of(&[
        "mo.sql(\"CREATE TABLE s.t (i INTEGER)\")",
        "mo.sql(\"CREATE SCHEMA s\")",
        "mo.sql(\"FROM s.t SELECT *\")",
    ]);
    assert_eq!(graph.parents(CellId::new(2)), ids(&[0, 1]));
    let reader = graph.cell(CellId::new(2)).unwrap();
    assert!(reader.refs.contains("s.t"));
}

#[test]
fn test_sql_defs_are_opaque_to_python() {
    let graph = graph_of(&[
        "mo.sql(\"CREATE TABLE my_table AS SELECT 1\")",
        "print(my_table)",
    ]);
    assert!(!graph.parents(CellId::new(1)).contains(&CellId::new(0)));
}

#[test]
fn test_python_defs_leak_to_sql() {
    let graph = graph_of(&[
        "df = load_frame()",
        "out = mo.sql(f\"FROM df WHERE x > {threshold}\")",
    ]);
    assert_eq!(graph.parents(CellId::new(1)), ids(&[0]));
    assert_eq!(
        graph.get_referring_cells("df", Language::Python),
        ids(&[1])
    );
}

#[test]
fn test_override_pruning() {
    let graph = graph_of(&[
        "batch_size = 32\nlearning_rate = 0.01",
        "x = batch_size * learning_rate",
    ]);
    let order = graph.topological_sort(&all_ids(2));
    assert_eq!(order, all_ids(2));

    let full: FxHashSet<String> = ["batch_size", "learning_rate"]
        .map(str::to_string)
        .into_iter()
        .collect();
    assert_eq!(
        graph.prune_cells_for_overrides(&order, &full, None).unwrap(),
        vec![CellId::new(1)]
    );

    let partial: FxHashSet<String> = ["batch_size".to_string()].into_iter().collect();
    match graph.prune_cells_for_overrides(&order, &partial, None) {
        Err(Error::IncompleteRefs { missing }) => {
            assert_eq!(missing, vec!["learning_rate".to_string()]);
        }
        other => panic!("expected IncompleteRefs, got {other:?}"),
    }
}

// =============================================================================
// Ordering and lifecycle properties
// =============================================================================

#[test]
fn test_topological_sort_is_complete_and_ordered() {
    let graph = graph_of(&["a = 0", "c = a + b", "b = a", "d = c"]);
    let order = graph.topological_sort(&all_ids(4));
    assert_eq!(order.len(), 4);
    for (cid, _) in graph.cells() {
        for child in graph.children(cid) {
            let pos_parent = order.iter().position(|&c| c == cid).unwrap();
            let pos_child = order.iter().position(|&c| c == child).unwrap();
            assert!(pos_parent < pos_child, "{cid} must precede {child}");
        }
    }
}

#[test]
fn test_registration_order_tie_break() {
    // Independent cells appear in registration order regardless of the
    // order they are passed in.
    let graph = graph_of(&["a = 0", "b = 0", "c = 0"]);
    let order = graph.topological_sort(&[CellId::new(2), CellId::new(0), CellId::new(1)]);
    assert_eq!(order, all_ids(3));
}

#[test]
fn test_insertion_order_does_not_change_topology() {
    let forward = graph_of(&["x = 0", "y = x"]);
    let graph = DirectedGraph::new();
    let consumer = Arc::new(compile_cell("y = x", CellId::new(1)).unwrap());
    graph.register_cell(CellId::new(1), consumer).unwrap();
    let producer = Arc::new(compile_cell("x = 0", CellId::new(0)).unwrap());
    graph.register_cell(CellId::new(0), producer).unwrap();

    assert_eq!(
        forward.parents(CellId::new(1)),
        graph.parents(CellId::new(1))
    );
    assert_eq!(
        forward.children(CellId::new(0)),
        graph.children(CellId::new(0))
    );
}

#[test]
fn test_delete_restores_invariants() {
    let graph = graph_of(&["x = 0", "y = x", "z = y"]);
    let children = graph.delete_cell(CellId::new(1)).unwrap();
    assert_eq!(children, ids(&[2]));
    assert_edge_symmetry(&graph);
    assert_definition_coverage(&graph);
    assert!(!graph.definitions().contains_key("y"));
    // Re-registration with a fresh id reconnects the chain.
    let cell = Arc::new(compile_cell("y = x", CellId::new(3)).unwrap());
    graph.register_cell(CellId::new(3), cell).unwrap();
    assert_eq!(graph.parents(CellId::new(3)), ids(&[0]));
    assert_eq!(graph.children(CellId::new(3)), ids(&[2]));
}

#[test]
fn test_import_idempotence() {
    use callisto_core::analyze::{CompileOptions, compile_cell_with};

    let code = "import foo\nimport bar";
    let first = compile_cell(code, CellId::new(0)).unwrap();
    first
        .import_workspace
        .add_imported_defs(["foo".to_string(), "bar".to_string()]);
    let carried: Vec<_> = first.imports.iter().cloned().collect();

    let second = compile_cell_with(
        code,
        CellId::new(0),
        CompileOptions {
            carried_imports: Some(&carried),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(
        second.import_workspace.imported_defs(),
        first.import_workspace.imported_defs()
    );
}

#[test]
fn test_stale_propagation_with_import_pruning() {
    let graph = graph_of(&["import foo\nimport bar", "a = foo.x", "b = bar.y"]);
    graph
        .cell(CellId::new(0))
        .unwrap()
        .import_workspace
        .add_imported_defs(["foo".to_string()]);
    for cid in all_ids(3) {
        graph
            .cell(cid)
            .unwrap()
            .set_run_result_status(callisto_core::RunResultStatus::Success);
    }

    graph.set_stale(&ids(&[0]), true);
    let stale = graph.get_stale();
    assert!(stale.contains(&CellId::new(0)));
    assert!(stale.contains(&CellId::new(2)), "bar changed, b is stale");
    assert!(
        !stale.contains(&CellId::new(1)),
        "foo already imported, a stays fresh"
    );
}
