//! Shape validation and parsing of persisted notebooks.
//!
//! A notebook is a plain Python file with a fixed top-level skeleton:
//! header comments, `import callisto`, a version assignment, an
//! `app = callisto.App(...)` instantiation, an optional setup block, cell
//! definitions, and a run guard. Statements that do not match the grammar
//! produce violations but parsing continues.

use rustpython_ast::{self as ast, Expr, Ranged, Stmt};
use rustpython_parser::Parse;

use crate::cell::{DEFAULT_CELL_NAME, SETUP_CELL_NAME};
use crate::error::{Error, Result};
use crate::notebook::extract::{Extractor, LineIndex};
use crate::notebook::ir::{
    AppInstantiation, CellDef, CellKind, CellOptions, Header, Literal, NotebookSerialization,
    Violation,
};
use crate::notebook::scan;

/// The package a notebook file imports; the reader requires it to recognize
/// the skeleton.
pub const PACKAGE_NAME: &str = "callisto";

const DECORATOR_KINDS: [&str; 3] = ["cell", "function", "class_definition"];

/// Parse a notebook file. Returns `None` for empty input. Fails with
/// [`Error::NotebookFormat`] only when the skeleton is absent; syntax errors
/// inside cells are recovered as unparsable cells.
pub fn parse_notebook(contents: &str) -> Result<Option<NotebookSerialization>> {
    let source = contents.trim();
    if source.is_empty() {
        return Ok(None);
    }
    match ast::Suite::parse(source, "<notebook>") {
        Ok(stmts) => parse_statements(source, stmts).map(Some),
        Err(err) => scan::parse_with_recovery(source, &err).map(Some),
    }
}

fn parse_statements(source: &str, stmts: Vec<Stmt>) -> Result<NotebookSerialization> {
    let extractor = Extractor::new(source);
    let preamble = parse_preamble(&extractor, &stmts);
    let mut violations = preamble.violations;

    if !preamble.found_import {
        violations.push(Violation::new("Only able to extract header.", 1));
        return Ok(NotebookSerialization {
            header: Some(Header {
                value: source.to_string(),
                lineno: 1,
                end_lineno: extractor.index().line_count(),
            }),
            version: None,
            app: AppInstantiation::default(),
            cells: Vec::new(),
            violations,
            valid: false,
            filename: None,
        });
    }
    let Some(app) = preamble.app else {
        return Err(Error::NotebookFormat(format!(
            "`{PACKAGE_NAME}.App` definition expected."
        )));
    };

    let mut cells: Vec<CellDef> = Vec::new();
    let mut saw_run_guard = false;
    let mut setup_allowed = true;
    for stmt in &stmts[preamble.consumed..] {
        let line = line_of(&extractor, stmt);
        if setup_allowed && is_setup_cell(stmt) {
            let (cell, mut cell_violations) = convert_setup_cell(&extractor, stmt);
            violations.append(&mut cell_violations);
            cells.push(cell);
            setup_allowed = false;
        } else if is_body_cell(stmt) {
            setup_allowed = false;
            match convert_cell(&extractor, stmt) {
                Some((cell, mut cell_violations)) => {
                    violations.append(&mut cell_violations);
                    cells.push(cell);
                }
                None => violations.push(Violation::new("Unsupported cell type.", line)),
            }
        } else if is_run_guard(stmt) {
            saw_run_guard = true;
            break;
        } else if cells.is_empty() {
            violations.push(Violation::new(
                "Unexpected statement, expected cell definitions.",
                line,
            ));
        } else {
            violations.push(Violation::new(
                "Unexpected statement, expected body cell definition.",
                line,
            ));
        }
    }
    if !saw_run_guard {
        violations.push(Violation::new("Expected run guard statement", 0));
    }

    Ok(NotebookSerialization {
        header: preamble.header,
        version: preamble.version,
        app,
        cells,
        violations,
        valid: true,
    filename: None,
    })
}

// ---------------------------------------------------------------------------
// Preamble: header, package import, version, App instantiation

pub(crate) struct PreambleParse {
    pub header: Option<Header>,
    pub version: Option<String>,
    pub app: Option<AppInstantiation>,
    pub violations: Vec<Violation>,
    pub found_import: bool,
    /// Number of leading statements consumed.
    pub consumed: usize,
}

pub(crate) fn parse_preamble(extractor: &Extractor<'_>, stmts: &[Stmt]) -> PreambleParse {
    let mut violations = Vec::new();
    let mut pos = 0;

    // header? = (docstring | comments)*
    while pos < stmts.len() && is_string_stmt(&stmts[pos]) {
        pos += 1;
    }
    let header = match stmts.get(pos) {
        Some(stmt) => {
            let end = usize::from(stmt.range().start());
            let value = extractor.source()[..end].trim_end().to_string();
            let end_lineno = extractor.index().line_of(end).saturating_sub(1).max(1);
            Some(Header {
                value,
                lineno: 1,
                end_lineno,
            })
        }
        None => Some(Header {
            value: extractor.source().to_string(),
            lineno: 1,
            end_lineno: extractor.index().line_count(),
        }),
    };

    // import callisto
    let mut found_import = false;
    while pos < stmts.len() {
        if is_package_import(&stmts[pos]) {
            pos += 1;
            found_import = true;
            break;
        }
        violations.push(Violation::new(
            format!("Unexpected statement (expected {PACKAGE_NAME} import)"),
            line_of(extractor, &stmts[pos]),
        ));
        pos += 1;
    }
    if !found_import {
        return PreambleParse {
            header,
            version: None,
            app: None,
            violations,
            found_import: false,
            consumed: pos,
        };
    }

    // __generated_with = "<version>"; its absence should not break loading.
    let version = stmts.get(pos).and_then(version_of);
    if version.is_some() {
        pos += 1;
    } else {
        let lineno = stmts.get(pos).map_or(0, |stmt| line_of(extractor, stmt));
        violations.push(Violation::new(
            format!("Expected `__generated_with` assignment for {PACKAGE_NAME} version number."),
            lineno,
        ));
    }

    // app = callisto.App(<literal kwargs>)
    let mut app = None;
    while pos < stmts.len() {
        if let Some(keywords) = app_def_keywords(&stmts[pos]) {
            let (options, mut kwarg_violations) = eval_kwargs(keywords, extractor.index());
            violations.append(&mut kwarg_violations);
            app = Some(AppInstantiation { options });
            pos += 1;
            break;
        }
        violations.push(Violation::new(
            "Unexpected statement, expected App initialization.",
            line_of(extractor, &stmts[pos]),
        ));
        pos += 1;
    }

    PreambleParse {
        header,
        version,
        app,
        violations,
        found_import: true,
        consumed: pos,
    }
}

// ---------------------------------------------------------------------------
// Statement predicates

fn line_of(extractor: &Extractor<'_>, stmt: &Stmt) -> usize {
    extractor.index().line_of(usize::from(stmt.range().start()))
}

fn is_string_stmt(stmt: &Stmt) -> bool {
    matches!(
        stmt,
        Stmt::Expr(expr) if matches!(
            expr.value.as_ref(),
            Expr::Constant(constant) if matches!(constant.value, ast::Constant::Str(_))
        )
    )
}

fn is_package_import(stmt: &Stmt) -> bool {
    matches!(
        stmt,
        Stmt::Import(import)
            if import.names.first().is_some_and(|alias| alias.name.as_str() == PACKAGE_NAME)
    )
}

fn version_of(stmt: &Stmt) -> Option<String> {
    let Stmt::Assign(assign) = stmt else {
        return None;
    };
    let [Expr::Name(target)] = assign.targets.as_slice() else {
        return None;
    };
    if target.id.as_str() != "__generated_with" {
        return None;
    }
    match assign.value.as_ref() {
        Expr::Constant(constant) => match &constant.value {
            ast::Constant::Str(value) => Some(value.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Matches `app = callisto.App(...)`, yielding the call's keywords.
fn app_def_keywords(stmt: &Stmt) -> Option<&[ast::Keyword]> {
    let Stmt::Assign(assign) = stmt else {
        return None;
    };
    let [Expr::Name(target)] = assign.targets.as_slice() else {
        return None;
    };
    if target.id.as_str() != "app" {
        return None;
    }
    let Expr::Call(call) = assign.value.as_ref() else {
        return None;
    };
    let Expr::Attribute(attr) = call.func.as_ref() else {
        return None;
    };
    let Expr::Name(base) = attr.value.as_ref() else {
        return None;
    };
    (base.id.as_str() == PACKAGE_NAME && attr.attr.as_str() == "App")
        .then_some(call.keywords.as_slice())
}

/// The `@app.cell` / `@app.function` / `@app.class_definition` decorator of
/// a definition, with its kind attribute.
fn valid_decorator(decorator_list: &[Expr]) -> Option<(&Expr, &str)> {
    for decorator in decorator_list {
        let attr = match decorator {
            Expr::Attribute(attr) => attr,
            Expr::Call(call) => match call.func.as_ref() {
                Expr::Attribute(attr) => attr,
                _ => continue,
            },
            _ => continue,
        };
        let Expr::Name(base) = attr.value.as_ref() else {
            continue;
        };
        if base.id.as_str() == "app" && DECORATOR_KINDS.contains(&attr.attr.as_str()) {
            return Some((decorator, attr.attr.as_str()));
        }
    }
    None
}

fn unparsable_call(stmt: &Stmt) -> Option<&ast::ExprCall> {
    let Stmt::Expr(expr) = stmt else {
        return None;
    };
    let Expr::Call(call) = expr.value.as_ref() else {
        return None;
    };
    let Expr::Attribute(attr) = call.func.as_ref() else {
        return None;
    };
    let Expr::Name(base) = attr.value.as_ref() else {
        return None;
    };
    (base.id.as_str() == "app" && attr.attr.as_str() == "_unparsable_cell" && call.args.len() == 1)
        .then_some(call)
}

fn setup_context_call(expr: &Expr) -> bool {
    match expr {
        Expr::Attribute(attr) => {
            matches!(attr.value.as_ref(), Expr::Name(base) if base.id.as_str() == "app")
                && attr.attr.as_str() == "setup"
        }
        Expr::Call(call) => setup_context_call(&call.func),
        _ => false,
    }
}

pub(crate) fn is_setup_cell(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::With(with_stmt) => {
            with_stmt.items.len() == 1 && setup_context_call(&with_stmt.items[0].context_expr)
        }
        Stmt::AsyncWith(with_stmt) => {
            with_stmt.items.len() == 1 && setup_context_call(&with_stmt.items[0].context_expr)
        }
        _ => false,
    }
}

pub(crate) fn is_body_cell(stmt: &Stmt) -> bool {
    let decorated = match stmt {
        Stmt::FunctionDef(def) => valid_decorator(&def.decorator_list).is_some(),
        Stmt::AsyncFunctionDef(def) => valid_decorator(&def.decorator_list).is_some(),
        Stmt::ClassDef(def) => valid_decorator(&def.decorator_list).is_some(),
        _ => false,
    };
    decorated || unparsable_call(stmt).is_some()
}

pub(crate) fn is_run_guard(stmt: &Stmt) -> bool {
    let Stmt::If(if_stmt) = stmt else {
        return false;
    };
    let Expr::Compare(cmp) = if_stmt.test.as_ref() else {
        return false;
    };
    let test_ok = matches!(cmp.left.as_ref(), Expr::Name(name) if name.id.as_str() == "__name__")
        && matches!(cmp.ops.as_slice(), [ast::CmpOp::Eq])
        && matches!(
            cmp.comparators.as_slice(),
            [Expr::Constant(constant)]
                if matches!(&constant.value, ast::Constant::Str(value) if value == "__main__")
        );
    if !test_ok || !if_stmt.orelse.is_empty() || if_stmt.body.len() != 1 {
        return false;
    }
    let Stmt::Expr(expr) = &if_stmt.body[0] else {
        return false;
    };
    let Expr::Call(call) = expr.value.as_ref() else {
        return false;
    };
    let Expr::Attribute(attr) = call.func.as_ref() else {
        return false;
    };
    matches!(attr.value.as_ref(), Expr::Name(base) if base.id.as_str() == "app")
        && attr.attr.as_str() == "run"
}

// ---------------------------------------------------------------------------
// Conversion to IR cells

fn literal_of(expr: &Expr) -> Option<Literal> {
    let Expr::Constant(constant) = expr else {
        return None;
    };
    match &constant.value {
        ast::Constant::Bool(value) => Some(Literal::Bool(*value)),
        ast::Constant::Int(value) => i64::try_from(value).ok().map(Literal::Int),
        ast::Constant::Float(value) => Some(Literal::Float(*value)),
        ast::Constant::Str(value) => Some(Literal::Str(value.clone())),
        ast::Constant::None => Some(Literal::None),
        _ => None,
    }
}

/// Keyword arguments restricted to literal constants; anything else is a
/// violation and the kwarg is skipped.
fn eval_kwargs(
    keywords: &[ast::Keyword],
    index: &LineIndex,
) -> (Vec<(String, Literal)>, Vec<Violation>) {
    let mut kwargs = Vec::new();
    let mut violations = Vec::new();
    for keyword in keywords {
        match (&keyword.arg, literal_of(&keyword.value)) {
            (Some(arg), Some(literal)) => kwargs.push((arg.as_str().to_string(), literal)),
            _ => violations.push(Violation::new(
                "Unexpected value for keyword argument",
                index.line_of(usize::from(keyword.range().start())),
            )),
        }
    }
    (kwargs, violations)
}

fn decorator_options(
    decorator: &Expr,
    index: &LineIndex,
) -> (CellOptions, Vec<Violation>) {
    match decorator {
        Expr::Call(call) => {
            let (kwargs, violations) = eval_kwargs(&call.keywords, index);
            (CellOptions::from_kwargs(kwargs), violations)
        }
        _ => (CellOptions::default(), Vec::new()),
    }
}

/// Convert a body statement into a cell. Returns `None` for statements that
/// carry a recognized decorator in an unsupported combination (`@app.cell`
/// on a class).
pub(crate) fn convert_cell(
    extractor: &Extractor<'_>,
    stmt: &Stmt,
) -> Option<(CellDef, Vec<Violation>)> {
    if let Some(call) = unparsable_call(stmt) {
        let code = match call.args.first() {
            Some(Expr::Constant(constant)) => match &constant.value {
                ast::Constant::Str(value) => value.clone(),
                _ => return None,
            },
            _ => return None,
        };
        let (kwargs, violations) = eval_kwargs(&call.keywords, extractor.index());
        let mut name = DEFAULT_CELL_NAME.to_string();
        let mut extras = Vec::new();
        for (key, value) in kwargs {
            if key == "name" {
                if let Literal::Str(value) = value {
                    name = value;
                }
            } else {
                extras.push((key, value));
            }
        }
        let start = usize::from(stmt.range().start());
        let end = usize::from(stmt.range().end());
        let cell = CellDef {
            kind: CellKind::Unparsable,
            code,
            name,
            options: CellOptions {
                extras,
                ..CellOptions::default()
            },
            lineno: extractor.index().line_of(start),
            col_offset: extractor.index().col_of(start),
            end_lineno: extractor.index().line_of(end),
            end_col_offset: extractor.index().col_of(end),
        };
        return Some((cell, violations));
    }

    let (name, decorator_list, range, is_class) = match stmt {
        Stmt::FunctionDef(def) => (
            def.name.as_str(),
            def.decorator_list.as_slice(),
            def.range,
            false,
        ),
        Stmt::AsyncFunctionDef(def) => (
            def.name.as_str(),
            def.decorator_list.as_slice(),
            def.range,
            false,
        ),
        Stmt::ClassDef(def) => (
            def.name.as_str(),
            def.decorator_list.as_slice(),
            def.range,
            true,
        ),
        _ => return None,
    };
    let (decorator, attribute) = valid_decorator(decorator_list)?;
    let (options, violations) = decorator_options(decorator, extractor.index());

    let (kind, extracted) = match attribute {
        "cell" => {
            if is_class {
                // @app.cell cannot be used on classes.
                return None;
            }
            let decorator_ranges: Vec<_> = decorator_list.iter().map(|d| d.range()).collect();
            let body = match stmt {
                Stmt::FunctionDef(def) => def.body.as_slice(),
                Stmt::AsyncFunctionDef(def) => def.body.as_slice(),
                _ => unreachable!("checked above"),
            };
            (
                CellKind::Cell,
                extractor.cell_body(&decorator_ranges, range, body),
            )
        }
        "function" => (
            CellKind::Function,
            extractor.code_after_decorator(Some(decorator.range()), range),
        ),
        "class_definition" => (
            CellKind::ClassDefinition,
            extractor.code_after_decorator(Some(decorator.range()), range),
        ),
        _ => return None,
    };

    let cell = CellDef {
        kind,
        code: extracted.code,
        name: name.to_string(),
        options,
        lineno: extracted.lineno,
        col_offset: extracted.col_offset,
        end_lineno: extracted.end_lineno,
        end_col_offset: extracted.end_col_offset,
    };
    Some((cell, violations))
}

pub(crate) fn convert_setup_cell(
    extractor: &Extractor<'_>,
    stmt: &Stmt,
) -> (CellDef, Vec<Violation>) {
    let (items, range, body) = match stmt {
        Stmt::With(with_stmt) => (
            with_stmt.items.as_slice(),
            with_stmt.range,
            with_stmt.body.as_slice(),
        ),
        Stmt::AsyncWith(with_stmt) => (
            with_stmt.items.as_slice(),
            with_stmt.range,
            with_stmt.body.as_slice(),
        ),
        _ => unreachable!("caller checked is_setup_cell"),
    };
    let (options, violations) = match &items[0].context_expr {
        Expr::Call(call) => {
            let (kwargs, violations) = eval_kwargs(&call.keywords, extractor.index());
            (CellOptions::from_kwargs(kwargs), violations)
        }
        _ => (CellOptions::default(), Vec::new()),
    };
    let extracted = extractor.setup_body(range, body);
    let cell = CellDef {
        kind: CellKind::Setup,
        code: extracted.code,
        name: SETUP_CELL_NAME.to_string(),
        options,
        lineno: extracted.lineno,
        col_offset: extracted.col_offset,
        end_lineno: extracted.end_lineno,
        end_col_offset: extracted.end_col_offset,
    };
    (cell, violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"import callisto

__generated_with = "0.1.0"
app = callisto.App()


@app.cell
def _():
    x = 0
    return (x,)


@app.cell
def _(x):
    y = x + 1
    return


if __name__ == "__main__":
    app.run()
"#;

    #[test]
    fn test_parse_simple_notebook() {
        let notebook = parse_notebook(SIMPLE).unwrap().unwrap();
        assert!(notebook.valid);
        assert!(notebook.violations.is_empty());
        assert_eq!(notebook.version.as_deref(), Some("0.1.0"));
        assert_eq!(notebook.cells.len(), 2);
        assert_eq!(notebook.cells[0].code, "x = 0");
        assert_eq!(notebook.cells[1].code, "y = x + 1");
        assert_eq!(notebook.cells[0].kind, CellKind::Cell);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_notebook("").unwrap().is_none());
        assert!(parse_notebook("   \n  ").unwrap().is_none());
    }

    #[test]
    fn test_header_captured() {
        let source = format!("# Hello notebook\n# second line\n{SIMPLE}");
        let notebook = parse_notebook(&source).unwrap().unwrap();
        let header = notebook.header.unwrap();
        assert!(header.value.contains("# Hello notebook"));
        assert!(header.value.contains("# second line"));
    }

    #[test]
    fn test_missing_version_is_violation_but_valid() {
        let source = "import callisto\napp = callisto.App()\n\nif __name__ == \"__main__\":\n    app.run()\n";
        let notebook = parse_notebook(source).unwrap().unwrap();
        assert!(notebook.valid);
        assert!(notebook.version.is_none());
        assert!(
            notebook
                .violations
                .iter()
                .any(|v| v.description.contains("__generated_with"))
        );
    }

    #[test]
    fn test_missing_run_guard_is_violation_but_valid() {
        let source = "import callisto\n__generated_with = \"0.1.0\"\napp = callisto.App()\n\n@app.cell\ndef _():\n    x = 0\n    return\n";
        let notebook = parse_notebook(source).unwrap().unwrap();
        assert!(notebook.valid);
        assert!(
            notebook
                .violations
                .iter()
                .any(|v| v.description.contains("run guard"))
        );
    }

    #[test]
    fn test_no_import_is_invalid() {
        let notebook = parse_notebook("x = 1\nprint(x)\n").unwrap().unwrap();
        assert!(!notebook.valid);
        assert!(notebook.cells.is_empty());
    }

    #[test]
    fn test_missing_app_def_is_an_error() {
        let err = parse_notebook("import callisto\n__generated_with = \"0.1.0\"\n").unwrap_err();
        assert!(matches!(err, Error::NotebookFormat(_)));
    }

    #[test]
    fn test_app_options() {
        let source = "import callisto\n__generated_with = \"0.1.0\"\napp = callisto.App(width=\"full\", layout_file=None)\n\nif __name__ == \"__main__\":\n    app.run()\n";
        let notebook = parse_notebook(source).unwrap().unwrap();
        assert_eq!(
            notebook.app.options,
            vec![
                ("width".to_string(), Literal::Str("full".to_string())),
                ("layout_file".to_string(), Literal::None),
            ]
        );
    }

    #[test]
    fn test_non_literal_kwarg_is_violation_and_skipped() {
        let source = "import callisto\n__generated_with = \"0.1.0\"\napp = callisto.App(width=get_width())\n\nif __name__ == \"__main__\":\n    app.run()\n";
        let notebook = parse_notebook(source).unwrap().unwrap();
        assert!(notebook.app.options.is_empty());
        assert!(
            notebook
                .violations
                .iter()
                .any(|v| v.description.contains("keyword argument"))
        );
    }

    #[test]
    fn test_cell_options_parsed() {
        let source = "import callisto\n__generated_with = \"0.1.0\"\napp = callisto.App()\n\n@app.cell(disabled=True, hide_code=True)\ndef _():\n    x = 0\n    return\n\nif __name__ == \"__main__\":\n    app.run()\n";
        let notebook = parse_notebook(source).unwrap().unwrap();
        assert!(notebook.cells[0].options.disabled);
        assert!(notebook.cells[0].options.hide_code);
    }

    #[test]
    fn test_unknown_cell_option_preserved_silently() {
        let source = "import callisto\n__generated_with = \"0.1.0\"\napp = callisto.App()\n\n@app.cell(future_flag=True)\ndef _():\n    x = 0\n    return\n\nif __name__ == \"__main__\":\n    app.run()\n";
        let notebook = parse_notebook(source).unwrap().unwrap();
        assert!(notebook.violations.is_empty());
        assert_eq!(notebook.cells[0].options.extras.len(), 1);
    }

    #[test]
    fn test_setup_cell() {
        let source = "import callisto\n__generated_with = \"0.1.0\"\napp = callisto.App()\n\nwith app.setup:\n    import os\n\n@app.cell\ndef _():\n    x = os.getcwd()\n    return\n\nif __name__ == \"__main__\":\n    app.run()\n";
        let notebook = parse_notebook(source).unwrap().unwrap();
        assert_eq!(notebook.cells.len(), 2);
        assert_eq!(notebook.cells[0].kind, CellKind::Setup);
        assert_eq!(notebook.cells[0].name, SETUP_CELL_NAME);
        assert_eq!(notebook.cells[0].code, "import os");
    }

    #[test]
    fn test_function_cell_keeps_whole_def() {
        let source = "import callisto\n__generated_with = \"0.1.0\"\napp = callisto.App()\n\n@app.function\ndef double(x):\n    return 2 * x\n\nif __name__ == \"__main__\":\n    app.run()\n";
        let notebook = parse_notebook(source).unwrap().unwrap();
        assert_eq!(notebook.cells[0].kind, CellKind::Function);
        assert_eq!(notebook.cells[0].code, "def double(x):\n    return 2 * x");
        assert_eq!(notebook.cells[0].name, "double");
    }

    #[test]
    fn test_class_definition_cell() {
        let source = "import callisto\n__generated_with = \"0.1.0\"\napp = callisto.App()\n\n@app.class_definition\nclass Config:\n    retries = 3\n\nif __name__ == \"__main__\":\n    app.run()\n";
        let notebook = parse_notebook(source).unwrap().unwrap();
        assert_eq!(notebook.cells[0].kind, CellKind::ClassDefinition);
        assert_eq!(notebook.cells[0].code, "class Config:\n    retries = 3");
        assert_eq!(notebook.cells[0].name, "Config");
    }

    #[test]
    fn test_unparsable_cell_stmt() {
        let source = "import callisto\n__generated_with = \"0.1.0\"\napp = callisto.App()\n\napp._unparsable_cell(\"x ===== 5\", name=\"broken\")\n\nif __name__ == \"__main__\":\n    app.run()\n";
        let notebook = parse_notebook(source).unwrap().unwrap();
        assert_eq!(notebook.cells[0].kind, CellKind::Unparsable);
        assert_eq!(notebook.cells[0].code, "x ===== 5");
        assert_eq!(notebook.cells[0].name, "broken");
    }

    #[test]
    fn test_unexpected_statement_violation() {
        let source = "import callisto\n__generated_with = \"0.1.0\"\napp = callisto.App()\n\nprint(\"not a cell\")\n\nif __name__ == \"__main__\":\n    app.run()\n";
        let notebook = parse_notebook(source).unwrap().unwrap();
        assert!(notebook.valid);
        assert!(
            notebook
                .violations
                .iter()
                .any(|v| v.description.contains("expected cell definitions"))
        );
    }
}
