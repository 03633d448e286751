//! Regeneration of the persisted Python format.
//!
//! Reading a notebook and regenerating it must produce byte-equivalent
//! output modulo the recorded version string and trivial whitespace
//! normalization.

use callisto_core::notebook::{
    AppInstantiation, CellDef, CellKind, CellOptions, Literal, NotebookSerialization, PACKAGE_NAME,
};
use callisto_core::{CellId, compile_cell};

use crate::error::SyncResult;

const INDENT: &str = "    ";

/// Generate the full file contents for a notebook IR.
pub fn generate_notebook(notebook: &NotebookSerialization, version: &str) -> SyncResult<String> {
    let header = notebook
        .header
        .as_ref()
        .map(|header| header.value.as_str())
        .filter(|value| !value.trim().is_empty());
    let cells: Vec<(&CellDef, &str)> = notebook
        .cells
        .iter()
        .map(|cell| (cell, cell.code.as_str()))
        .collect();
    generate(header, &notebook.app, &cells, version)
}

/// Generate file contents from parallel lists of cell codes, names, and
/// configs; every cell is an ordinary `@app.cell`.
pub fn generate_filecontents(
    codes: &[&str],
    names: &[&str],
    configs: &[CellOptions],
    app: &AppInstantiation,
    header: Option<&str>,
    version: &str,
) -> SyncResult<String> {
    let cells: Vec<CellDef> = codes
        .iter()
        .zip(names)
        .zip(configs)
        .map(|((code, name), options)| CellDef {
            kind: CellKind::Cell,
            code: (*code).to_string(),
            name: (*name).to_string(),
            options: options.clone(),
            lineno: 0,
            col_offset: 0,
            end_lineno: 0,
            end_col_offset: 0,
        })
        .collect();
    let cell_refs: Vec<(&CellDef, &str)> = cells
        .iter()
        .map(|cell| (cell, cell.code.as_str()))
        .collect();
    generate(header, app, &cell_refs, version)
}

fn generate(
    header: Option<&str>,
    app: &AppInstantiation,
    cells: &[(&CellDef, &str)],
    version: &str,
) -> SyncResult<String> {
    let mut blocks: Vec<String> = Vec::new();

    let mut prologue = String::new();
    if let Some(header) = header {
        prologue.push_str(header.trim_end());
        prologue.push_str("\n\n");
    }
    prologue.push_str(&format!(
        "import {PACKAGE_NAME}\n\n__generated_with = \"{version}\"\napp = {PACKAGE_NAME}.App({})",
        render_kwargs(&app.options)
    ));
    blocks.push(prologue);

    for (cell, code) in cells {
        blocks.push(generate_cell(cell, code)?);
    }

    blocks.push("if __name__ == \"__main__\":\n    app.run()".to_string());

    Ok(blocks.join("\n\n\n") + "\n")
}

fn generate_cell(cell: &CellDef, code: &str) -> SyncResult<String> {
    match cell.kind {
        CellKind::Setup => Ok(generate_setup_cell(cell, code)),
        CellKind::Function => Ok(generate_decorated(cell, code, "function")),
        CellKind::ClassDefinition => Ok(generate_decorated(cell, code, "class_definition")),
        CellKind::Unparsable => Ok(generate_unparsable_cell(code, &cell.name)),
        CellKind::Cell => generate_app_cell(cell, code),
    }
}

fn generate_app_cell(cell: &CellDef, code: &str) -> SyncResult<String> {
    // The signature carries the cell's refs; the return carries its defs.
    // Re-analyze the body to recover them.
    let Ok(compiled) = compile_cell(code, CellId::new(0)) else {
        // A cell that no longer parses is preserved as an unparsable cell.
        return Ok(generate_unparsable_cell(code, &cell.name));
    };

    let mut refs: Vec<&str> = compiled
        .refs
        .iter()
        .map(String::as_str)
        .filter(|name| is_identifier(name))
        .collect();
    refs.sort_unstable();
    let mut defs: Vec<&str> = compiled
        .defs
        .iter()
        .map(String::as_str)
        .filter(|name| is_identifier(name))
        .collect();
    defs.sort_unstable();

    let mut out = String::new();
    out.push_str("@app.cell");
    let kwargs = cell.options.non_default_kwargs();
    if !kwargs.is_empty() {
        out.push('(');
        out.push_str(&render_kwargs(&kwargs));
        out.push(')');
    }
    out.push('\n');
    if compiled.is_coroutine {
        out.push_str("async ");
    }
    out.push_str(&format!("def {}({}):\n", cell.name, refs.join(", ")));
    for line in code.lines() {
        if line.trim().is_empty() {
            out.push('\n');
        } else {
            out.push_str(INDENT);
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push_str(INDENT);
    match defs.as_slice() {
        [] => out.push_str("return"),
        [single] => out.push_str(&format!("return ({single},)")),
        many => out.push_str(&format!("return ({})", many.join(", "))),
    }
    Ok(out)
}

fn generate_setup_cell(cell: &CellDef, code: &str) -> String {
    let mut out = String::new();
    out.push_str("with app.setup");
    let kwargs = cell.options.non_default_kwargs();
    if !kwargs.is_empty() {
        out.push('(');
        out.push_str(&render_kwargs(&kwargs));
        out.push(')');
    }
    out.push_str(":\n");
    if code.trim().is_empty() {
        out.push_str(INDENT);
        out.push_str("pass");
        return out;
    }
    let mut first = true;
    for line in code.lines() {
        if !first {
            out.push('\n');
        }
        first = false;
        if !line.trim().is_empty() {
            out.push_str(INDENT);
            out.push_str(line);
        }
    }
    out
}

fn generate_decorated(cell: &CellDef, code: &str, attribute: &str) -> String {
    let mut out = String::new();
    out.push_str("@app.");
    out.push_str(attribute);
    let kwargs = cell.options.non_default_kwargs();
    if !kwargs.is_empty() {
        out.push('(');
        out.push_str(&render_kwargs(&kwargs));
        out.push(')');
    }
    out.push('\n');
    out.push_str(code.trim_end());
    out
}

fn generate_unparsable_cell(code: &str, name: &str) -> String {
    let mut out = String::new();
    out.push_str("app._unparsable_cell(\n");
    out.push_str(INDENT);
    out.push_str(&format!("r\"\"\"{code}\"\"\""));
    if name != "_" {
        out.push_str(",\n");
        out.push_str(INDENT);
        out.push_str(&format!("name=\"{name}\"\n"));
    } else {
        out.push('\n');
    }
    out.push(')');
    out
}

fn render_kwargs(kwargs: &[(String, Literal)]) -> String {
    kwargs
        .iter()
        .map(|(key, value)| format!("{key}={}", value.to_python()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}
