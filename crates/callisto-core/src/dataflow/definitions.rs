//! Variable definition tracking across cells.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analyze::sql::SqlRef;
use crate::cell::CellId;
use crate::variables::{Language, Name, VariableData, VariableKind};

/// Tracks which cells define which names, with kind-tagged entries so that
/// SQL and Python definitions of the same name stay in separate namespaces.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    /// Name -> cells that define it.
    definitions: FxHashMap<Name, FxHashSet<CellId>>,
    /// (name, kind) -> cells, e.g. `("my_table", Table) -> {c1}`.
    typed_definitions: FxHashMap<(Name, VariableKind), FxHashSet<CellId>>,
    /// All kinds seen for a name.
    definition_types: FxHashMap<Name, FxHashSet<VariableKind>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one name defined by `cell_id`. The last entry of
    /// `variable_data` is canonical. Returns the sibling cells already
    /// defining the name; the validator surfaces those as errors.
    pub fn register_definition(
        &mut self,
        cell_id: CellId,
        name: &str,
        variable_data: &[VariableData],
    ) -> FxHashSet<CellId> {
        let Some(variable) = variable_data.last() else {
            return FxHashSet::default();
        };
        let typed_def = (name.to_string(), variable.kind);

        if self.definitions.contains_key(name) && !self.typed_definitions.contains_key(&typed_def) {
            // A same-named definition of a different kind exists. Only treat
            // it as the same name when the qualified form is no different or
            // this is not a SQL definition.
            let qualified = variable.qualified_name.as_deref();
            if qualified == Some(name) || variable.language() != Language::Sql {
                self.definitions
                    .get_mut(name)
                    .expect("checked above")
                    .insert(cell_id);
            }
        } else {
            self.definitions
                .entry(name.to_string())
                .or_default()
                .insert(cell_id);
        }

        self.typed_definitions
            .entry(typed_def)
            .or_default()
            .insert(cell_id);
        self.definition_types
            .entry(name.to_string())
            .or_default()
            .insert(variable.kind);

        let mut siblings = self.definitions.get(name).cloned().unwrap_or_default();
        siblings.remove(&cell_id);
        siblings
    }

    /// Drop `cell_id` from each of its definitions; when the last definer of
    /// a name goes away, the typed entries go with it.
    pub fn unregister_definitions<'a>(
        &mut self,
        cell_id: CellId,
        defs: impl IntoIterator<Item = &'a Name>,
    ) {
        for name in defs {
            let Some(definers) = self.definitions.get_mut(name) else {
                continue;
            };
            definers.remove(&cell_id);
            if definers.is_empty() {
                self.definitions.remove(name);
                for kind in self.definition_types.remove(name).unwrap_or_default() {
                    self.typed_definitions.remove(&(name.clone(), kind));
                }
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// All cells defining `name`; a singleton for well-formed graphs.
    pub fn get_defining_cells(&self, name: &str) -> FxHashSet<CellId> {
        self.definitions.get(name).cloned().unwrap_or_default()
    }

    pub fn definitions(&self) -> &FxHashMap<Name, FxHashSet<CellId>> {
        &self.definitions
    }

    /// The kind of the definition recorded for `name` in `cell_id`'s cell,
    /// if any kind is known.
    pub fn kinds_of(&self, name: &str) -> FxHashSet<VariableKind> {
        self.definition_types.get(name).cloned().unwrap_or_default()
    }

    /// Cells that define components of a hierarchical SQL reference: a table
    /// of the ref's last component, a schema or catalog containing it.
    /// Returns (defining cells, matched definition name) pairs.
    pub fn find_sql_hierarchical_matches(
        &self,
        sql_ref: &SqlRef,
    ) -> Vec<(FxHashSet<CellId>, Name)> {
        let mut matches = Vec::new();
        for ((def_name, kind), cell_ids) in &self.typed_definitions {
            if sql_ref.contains_hierarchical_ref(def_name, *kind) {
                matches.push((cell_ids.clone(), def_name.clone()));
            }
        }
        matches
    }

    /// Names defined by more than one cell.
    pub fn get_multiply_defined(&self) -> Vec<Name> {
        self.definitions
            .iter()
            .filter(|(_, definers)| definers.len() > 1)
            .map(|(name, _)| name.clone())
            .collect()
    }
}
