//! Per-cell semantic analysis.
//!
//! [`compile_cell`] turns one cell's source into a [`CellImpl`]: parse the
//! body, classify variables with the scope visitor, and fold in embedded-SQL
//! definitions and references.

pub mod scope;
pub mod sql;

use rustpython_ast as ast;
use rustpython_parser::Parse;

use crate::cell::{CellConfig, CellId, CellImpl, ImportWorkspace};
use crate::error::{Error, Result};
use crate::variables::{ImportData, Language, VariableData, is_local};

use self::scope::analyze_scopes;
use self::sql::{SqlRef, analyze_sql_statement, collect_sqls, is_sql_only};

/// Optional inputs to [`compile_cell_with`].
#[derive(Debug, Default)]
pub struct CompileOptions<'a> {
    /// Cell name from the notebook file; defaults to the anonymous name.
    pub name: Option<String>,
    pub config: CellConfig,
    /// Imports satisfied by a previous run of this cell. When the cell is an
    /// import block, matching imports are marked as already imported.
    pub carried_imports: Option<&'a [ImportData]>,
}

/// Analyze a cell body into its graph-ready form.
pub fn compile_cell(code: &str, cell_id: CellId) -> Result<CellImpl> {
    compile_cell_with(code, cell_id, CompileOptions::default())
}

pub fn compile_cell_with(
    code: &str,
    cell_id: CellId,
    options: CompileOptions<'_>,
) -> Result<CellImpl> {
    let body = ast::Suite::parse(code, "<cell>").map_err(|err| Error::Parse {
        line: line_of_offset(code, usize::from(err.offset)),
        message: err.error.to_string(),
    })?;

    let analysis = analyze_scopes(&body);
    let scope::ScopeAnalysis {
        mut defs,
        mut refs,
        deleted_refs,
        mut variable_data,
        imports,
        imported_namespaces,
        is_import_block,
        is_coroutine,
    } = analysis;

    // Fold in embedded SQL statements.
    let sqls = collect_sqls(&body);
    let mut sql_refs = rustc_hash::FxHashMap::default();
    for sql in &sqls {
        let facts = analyze_sql_statement(sql);
        for def in facts.defs {
            if is_local(def.name()) {
                continue;
            }
            let mut data = VariableData::new(def.kind);
            data.qualified_name = Some(def.qualified_name());
            defs.insert(def.name().to_string());
            variable_data
                .entry(def.name().to_string())
                .or_default()
                .push(data);
        }
        for parts in facts.refs {
            let name = parts.join(".");
            if is_local(&name) {
                continue;
            }
            if parts.len() > 1 {
                sql_refs.insert(name.clone(), SqlRef::new(parts));
            }
            refs.insert(name);
        }
    }

    let language = if is_sql_only(&body) {
        Language::Sql
    } else {
        Language::Python
    };

    let import_workspace = ImportWorkspace::new(is_import_block);
    if is_import_block && let Some(carried) = options.carried_imports {
        import_workspace.add_imported_defs(
            imports
                .iter()
                .filter(|import| carried.contains(import))
                .map(|import| import.definition.clone()),
        );
    }

    Ok(CellImpl::new(
        cell_id,
        code.to_string(),
        options.name.unwrap_or_else(|| crate::cell::DEFAULT_CELL_NAME.to_string()),
        options.config,
        language,
        is_coroutine,
        defs,
        refs,
        deleted_refs,
        variable_data,
        imports,
        imported_namespaces,
        sql_refs,
        sqls,
        import_workspace,
    ))
}

/// 1-indexed line number of a byte offset.
pub(crate) fn line_of_offset(source: &str, offset: usize) -> usize {
    let offset = offset.min(source.len());
    source[..offset].bytes().filter(|&b| b == b'\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::VariableKind;

    fn compile(code: &str) -> CellImpl {
        compile_cell(code, CellId::new(0)).expect("test code compiles")
    }

    #[test]
    fn test_simple_cell() {
        let cell = compile("x = 0\nz = y");
        assert_eq!(cell.key, crate::cell::code_key("x = 0\nz = y"));
        assert!(cell.defs.contains("x") && cell.defs.contains("z"));
        assert!(cell.refs.contains("y"));
        assert_eq!(cell.language, Language::Python);
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let err = compile_cell("x = 0\ndef f(:\n    pass", CellId::new(0)).unwrap_err();
        match err {
            Error::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_sql_table_definition() {
        let cell = compile("mo.sql(\"CREATE TABLE t1 (i INTEGER, j INTEGER)\")");
        assert!(cell.defs.contains("t1"));
        assert!(cell.refs.contains("mo"));
        assert_eq!(cell.language, Language::Sql);
        let data = cell.variable_data["t1"].last().unwrap();
        assert_eq!(data.kind, VariableKind::Table);
        assert_eq!(data.qualified_name.as_deref(), Some("t1"));
    }

    #[test]
    fn test_sql_table_reference() {
        let cell = compile("mo.sql(\"SELECT * from t1\")");
        assert!(cell.defs.is_empty());
        assert!(cell.refs.contains("mo") && cell.refs.contains("t1"));
        assert_eq!(cell.language, Language::Sql);
        assert!(cell.sql_refs.is_empty());
    }

    #[test]
    fn test_sql_hierarchical_reference() {
        let cell = compile("mo.sql(\"FROM s.t SELECT *\")");
        assert!(cell.refs.contains("s.t"));
        assert_eq!(cell.sql_refs["s.t"].parts(), ["s", "t"]);
    }

    #[test]
    fn test_sql_dotted_definition() {
        let cell = compile("mo.sql(\"CREATE TABLE s.t (i INTEGER)\")");
        assert!(cell.defs.contains("t"));
        let data = cell.variable_data["t"].last().unwrap();
        assert_eq!(data.qualified_name.as_deref(), Some("s.t"));
    }

    #[test]
    fn test_python_cell_with_sql_call_keeps_python_tag() {
        let cell = compile("mo.sql(\"SELECT 1\")\nprint(1)");
        assert_eq!(cell.language, Language::Python);
        assert_eq!(cell.sqls, vec!["SELECT 1"]);
    }

    #[test]
    fn test_carried_imports() {
        let foo = ImportData {
            definition: "foo".into(),
            imported_symbol: None,
            module: "foo".into(),
            import_level: None,
        };
        let carried = vec![foo];
        let cell = compile_cell_with(
            "import foo; import foo.bar; from foo.bar import baz",
            CellId::new(0),
            CompileOptions {
                carried_imports: Some(&carried),
                ..CompileOptions::default()
            },
        )
        .unwrap();
        assert!(cell.import_workspace.is_import_block);
        assert_eq!(
            cell.import_workspace.imported_defs(),
            std::iter::once("foo".to_string()).collect()
        );
    }

    #[test]
    fn test_carried_import_mismatch() {
        let foo = ImportData {
            definition: "foo".into(),
            imported_symbol: None,
            module: "foo".into(),
            import_level: None,
        };
        let carried = vec![foo];
        // `import foo.bar` also defines "foo" but is a different import.
        let cell = compile_cell_with(
            "import foo.bar",
            CellId::new(0),
            CompileOptions {
                carried_imports: Some(&carried),
                ..CompileOptions::default()
            },
        )
        .unwrap();
        assert!(cell.import_workspace.imported_defs().is_empty());
    }

    #[test]
    fn test_coroutine_flag() {
        assert!(compile("await foo()").is_coroutine);
        assert!(!compile("x = 1").is_coroutine);
    }
}
