//! Edge computation: deriving parent/child relationships for a cell from
//! its bindings, the definition registry, and the current topology.

use rustc_hash::FxHashSet;

use crate::cell::{CellId, CellImpl};
use crate::dataflow::definitions::DefinitionRegistry;
use crate::dataflow::topology::GraphTopology;
use crate::variables::{Language, Name};

/// All cells that have a ref to `name`.
///
/// SQL variables don't leak to Python cells, but Python variables do leak to
/// SQL. This is a local analysis of refs; it does not consider whether the
/// refs are defined by other cells.
pub fn get_referring_cells(
    name: &str,
    language: Language,
    topology: &GraphTopology,
) -> FxHashSet<CellId> {
    match language {
        Language::Sql => {
            let mut cells = FxHashSet::default();
            for (cid, cell) in topology.cells() {
                if cell.language != Language::Sql {
                    continue;
                }
                for reference in &cell.refs {
                    if reference == name {
                        cells.insert(cid);
                        break;
                    }
                    // Hierarchical reference match; the referring cell's own
                    // data supplies the kind when it has one.
                    let kind = cell
                        .variable_data
                        .get(name)
                        .and_then(|data| data.last())
                        .map(|data| data.kind);
                    if let Some(sql_ref) = cell.sql_refs.get(reference)
                        && sql_ref.matches_hierarchical_ref(name, reference, kind)
                    {
                        cells.insert(cid);
                        break;
                    }
                }
            }
            cells
        }
        Language::Python => topology
            .cells()
            .filter(|(_, cell)| cell.refs.contains(name))
            .map(|(cid, _)| cid)
            .collect(),
    }
}

/// For a SQL hierarchical reference, find the definition name that the other
/// cell actually carries (`s.t` resolves to `t` in the table cell and `s` in
/// the schema cell). Regular references resolve to themselves.
fn resolve_variable_name<'a>(
    name: &'a str,
    other_cell: &CellImpl,
    has_sql_ref: bool,
    sql_matches: &'a [(FxHashSet<CellId>, Name)],
) -> &'a str {
    if !has_sql_ref || other_cell.variable_data.contains_key(name) {
        return name;
    }
    for (_, matching_name) in sql_matches {
        if other_cell.variable_data.contains_key(matching_name) {
            return matching_name;
        }
    }
    name
}

/// Compute `(parents, children)` for a cell being registered.
pub fn compute_edges_for_cell(
    cell_id: CellId,
    cell: &CellImpl,
    topology: &GraphTopology,
    definitions: &DefinitionRegistry,
) -> (FxHashSet<CellId>, FxHashSet<CellId>) {
    let mut parents: FxHashSet<CellId> = FxHashSet::default();
    let mut children: FxHashSet<CellId> = FxHashSet::default();

    // Cells referring to a name this cell defines become children. Only the
    // last binding of a name matters.
    for (name, variable_data) in &cell.variable_data {
        let Some(variable) = variable_data.last() else {
            continue;
        };
        let mut referring = get_referring_cells(name, variable.language(), topology);
        referring.remove(&cell_id);
        children.extend(referring);
    }

    // Cells defining a name this cell refers to become parents.
    for name in &cell.refs {
        let mut other_ids_defining_name = definitions.get_defining_cells(name);
        other_ids_defining_name.remove(&cell_id);

        let sql_ref = cell.sql_refs.get(name);
        let sql_matches = match sql_ref {
            Some(sql_ref) => definitions.find_sql_hierarchical_matches(sql_ref),
            None => Vec::new(),
        };
        for (matching_cell_ids, _) in &sql_matches {
            if matching_cell_ids.contains(&cell_id) {
                tracing::debug!("cell {cell_id} is referencing itself");
                continue;
            }
            other_ids_defining_name.extend(matching_cell_ids.iter().copied());
        }

        // If no cell defines the name the user gets a NameError at runtime
        // (unless the symbol is a builtin).
        for other_id in other_ids_defining_name {
            if other_id == cell_id {
                tracing::error!("cell {cell_id} is referencing itself");
                continue;
            }
            let Some(other_cell) = topology.cell(other_id) else {
                tracing::error!("variable {name} is defined in cell {other_id}, but is not in the graph");
                continue;
            };

            let variable_name =
                resolve_variable_name(name, other_cell, sql_ref.is_some(), &sql_matches);
            let Some(other_variable_data) =
                other_cell.variable_data.get(variable_name).and_then(|d| d.last())
            else {
                tracing::error!("variable {variable_name} is not defined in cell {other_id}");
                continue;
            };

            let language = other_variable_data.language();
            if language == Language::Sql && cell.language == Language::Python {
                // SQL table/db def -> Python ref is not an edge.
                continue;
            }
            if language == Language::Sql
                && cell.language == Language::Sql
                && let Some(sql_ref) = sql_ref
            {
                // Edges between SQL cells need to respect the hierarchy.
                let qualified = other_variable_data
                    .qualified_name
                    .as_deref()
                    .unwrap_or(name);
                if !sql_ref.matches_hierarchical_ref(
                    variable_name,
                    qualified,
                    Some(other_variable_data.kind),
                ) {
                    continue;
                }
            }
            parents.insert(other_id);
        }

        // Any cell that deletes a referenced variable becomes a child of
        // this cell; two cells deleting the same variable therefore form a
        // deliberate cycle.
        let deleting: FxHashSet<CellId> = get_referring_cells(name, Language::Python, topology)
            .into_iter()
            .filter(|cid| {
                *cid != cell_id
                    && topology
                        .cell(*cid)
                        .is_some_and(|c| c.deleted_refs.contains(name))
            })
            .collect();
        children.extend(deleting);
    }

    // A cell deleting a variable becomes a child of every cell referring to
    // that variable.
    for name in &cell.deleted_refs {
        let mut referring = get_referring_cells(name, Language::Python, topology);
        referring.remove(&cell_id);
        parents.extend(referring);
    }

    (parents, children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::compile_cell;
    use std::sync::Arc;

    struct Fixture {
        topology: GraphTopology,
        registry: DefinitionRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                topology: GraphTopology::new(),
                registry: DefinitionRegistry::new(),
            }
        }

        /// Register a cell the way the coordinator does, without edges.
        fn add(&mut self, id: usize, code: &str) -> Arc<CellImpl> {
            let cell = Arc::new(compile_cell(code, CellId::new(id)).unwrap());
            self.topology.add_node(CellId::new(id), cell.clone()).unwrap();
            for (name, data) in &cell.variable_data {
                self.registry.register_definition(CellId::new(id), name, data);
            }
            cell
        }

        fn edges(&self, id: usize, cell: &CellImpl) -> (FxHashSet<CellId>, FxHashSet<CellId>) {
            compute_edges_for_cell(CellId::new(id), cell, &self.topology, &self.registry)
        }
    }

    fn ids(values: &[usize]) -> FxHashSet<CellId> {
        values.iter().map(|&i| CellId::new(i)).collect()
    }

    #[test]
    fn test_parent_via_ref() {
        let mut fixture = Fixture::new();
        fixture.add(0, "x = 0");
        let cell = fixture.add(1, "y = x");
        let (parents, children) = fixture.edges(1, &cell);
        assert_eq!(parents, ids(&[0]));
        assert!(children.is_empty());
    }

    #[test]
    fn test_child_via_def() {
        let mut fixture = Fixture::new();
        fixture.add(0, "y = x");
        let cell = fixture.add(1, "x = 0");
        let (parents, children) = fixture.edges(1, &cell);
        assert!(parents.is_empty());
        assert_eq!(children, ids(&[0]));
    }

    #[test]
    fn test_no_self_edges() {
        let mut fixture = Fixture::new();
        let cell = fixture.add(0, "x = 0\ny = x");
        let (parents, children) = fixture.edges(0, &cell);
        assert!(parents.is_empty());
        assert!(children.is_empty());
    }

    #[test]
    fn test_delete_makes_deleter_child_of_referrers() {
        let mut fixture = Fixture::new();
        fixture.add(0, "x = 0");
        fixture.add(1, "y = x");
        let deleter = fixture.add(2, "del x");
        let (parents, _children) = fixture.edges(2, &deleter);
        // Refers to x (parent 0) and is a child of every referrer of x,
        // which makes those referrers parents here.
        assert_eq!(parents, ids(&[0, 1]));
    }

    #[test]
    fn test_sql_def_is_opaque_to_python() {
        let mut fixture = Fixture::new();
        fixture.add(0, "mo.sql(\"CREATE TABLE my_table AS SELECT 1\")");
        let cell = fixture.add(1, "print(my_table)");
        let (parents, _) = fixture.edges(1, &cell);
        assert!(parents.is_empty());
    }

    #[test]
    fn test_python_def_is_visible_to_sql() {
        let mut fixture = Fixture::new();
        fixture.add(0, "df = load()");
        let cell = fixture.add(1, "result = mo.sql(f\"FROM df WHERE name = {name}\")");
        let (parents, _) = fixture.edges(1, &cell);
        assert_eq!(parents, ids(&[0]));
    }

    #[test]
    fn test_sql_hierarchical_parents() {
        let mut fixture = Fixture::new();
        fixture.add(0, "mo.sql(\"CREATE TABLE s.t (i INTEGER)\")");
        fixture.add(1, "mo.sql(\"CREATE SCHEMA s\")");
        let cell = fixture.add(2, "mo.sql(\"FROM s.t SELECT *\")");
        let (parents, _) = fixture.edges(2, &cell);
        assert_eq!(parents, ids(&[0, 1]));
    }

    #[test]
    fn test_sql_qualified_mismatch_is_not_a_parent() {
        let mut fixture = Fixture::new();
        fixture.add(0, "mo.sql(\"CREATE TABLE s2.t (i INTEGER)\")");
        let cell = fixture.add(1, "mo.sql(\"FROM s.t SELECT *\")");
        let (parents, _) = fixture.edges(1, &cell);
        assert!(parents.is_empty());
    }
}
