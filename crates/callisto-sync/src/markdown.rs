//! Markdown persistence: the same notebook structure as the Python format,
//! with cells carried in fenced code blocks.
//!
//! Code cells become ```` ```python {.callisto ...} ```` fences, SQL cells
//! ```` ```sql {.callisto ...} ```` fences, and prose between fences becomes
//! hidden `mo.md(...)` cells. Conversion is lossless for cell code and
//! options; comment placement is not preserved.

use callisto_core::cell::SETUP_CELL_NAME;
use callisto_core::notebook::{
    AppInstantiation, CellDef, CellKind, CellOptions, Literal, NotebookSerialization,
};

use crate::error::SyncResult;

const FENCE_ATTR: &str = ".callisto";

/// Render a notebook as Markdown.
pub fn to_markdown(notebook: &NotebookSerialization, version: &str) -> SyncResult<String> {
    let mut out = String::new();

    // Frontmatter.
    out.push_str("---\n");
    if let Some(title) = app_title(&notebook.app) {
        out.push_str(&format!("title: {title:?}\n"));
    }
    out.push_str(&format!("callisto-version: {version}\n"));
    if let Some(header) = notebook.header.as_ref().filter(|h| !h.value.trim().is_empty()) {
        out.push_str("header: |\n");
        for line in header.value.lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push_str("---\n");

    for cell in &notebook.cells {
        out.push('\n');
        if let Some(prose) = markdown_prose_of(&cell.code) {
            out.push_str(prose.trim_end());
            out.push('\n');
            continue;
        }
        out.push_str(&render_fence(cell));
    }

    Ok(out)
}

/// Parse a Markdown notebook back into the IR.
pub fn from_markdown(contents: &str) -> SyncResult<NotebookSerialization> {
    let mut lines = contents.lines().peekable();
    let mut app = AppInstantiation::default();
    let mut version: Option<String> = None;
    let mut header: Option<String> = None;

    // Frontmatter.
    if lines.peek() == Some(&"---") {
        lines.next();
        let mut in_header = false;
        let mut header_lines: Vec<String> = Vec::new();
        for line in lines.by_ref() {
            if line == "---" {
                break;
            }
            if in_header {
                if let Some(rest) = line.strip_prefix("  ") {
                    header_lines.push(rest.to_string());
                    continue;
                }
                in_header = false;
            }
            if let Some(value) = line.strip_prefix("title:") {
                let title = value.trim().trim_matches('"').to_string();
                if !title.is_empty() {
                    app.options
                        .push(("app_title".to_string(), Literal::Str(title)));
                }
            } else if let Some(value) = line.strip_prefix("callisto-version:") {
                version = Some(value.trim().to_string());
            } else if line.trim_end() == "header: |" {
                in_header = true;
            }
        }
        if !header_lines.is_empty() {
            header = Some(header_lines.join("\n"));
        }
    }

    let mut cells: Vec<CellDef> = Vec::new();
    let mut prose: Vec<&str> = Vec::new();
    let mut lineno = 1;

    let remaining: Vec<&str> = lines.collect();
    let mut i = 0;
    while i < remaining.len() {
        let line = remaining[i];
        if let Some((language, attrs)) = parse_fence_open(line) {
            flush_prose(&mut cells, &mut prose, lineno);
            let start = i + 1;
            let mut end = start;
            while end < remaining.len() && remaining[end].trim_end() != "```" {
                end += 1;
            }
            let code = remaining[start..end].join("\n");
            cells.push(cell_from_fence(&language, &attrs, code, start));
            i = (end + 1).min(remaining.len());
            lineno = i + 1;
            continue;
        }
        prose.push(line);
        i += 1;
    }
    flush_prose(&mut cells, &mut prose, lineno);

    Ok(NotebookSerialization {
        header: header.map(|value| {
            let end_lineno = value.lines().count().max(1);
            callisto_core::notebook::Header {
                value,
                lineno: 1,
                end_lineno,
            }
        }),
        version,
        app,
        cells,
        violations: Vec::new(),
        valid: true,
        filename: None,
    })
}

fn app_title(app: &AppInstantiation) -> Option<&str> {
    app.options.iter().find_map(|(key, value)| match value {
        Literal::Str(title) if key == "app_title" => Some(title.as_str()),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Rendering

fn render_fence(cell: &CellDef) -> String {
    let mut attrs: Vec<String> = vec![FENCE_ATTR.to_string()];
    if cell.kind == CellKind::Setup {
        attrs.push("setup=\"true\"".to_string());
    }
    if cell.kind == CellKind::Unparsable {
        attrs.push("unparsable=\"true\"".to_string());
    }
    if cell.name != "_" && cell.name != SETUP_CELL_NAME {
        attrs.push(format!("name=\"{}\"", cell.name));
    }
    if cell.options.disabled {
        attrs.push("disabled=\"true\"".to_string());
    }
    if cell.options.hide_code {
        attrs.push("hide_code=\"true\"".to_string());
    }
    if let Some(column) = cell.options.column {
        attrs.push(format!("column=\"{column}\""));
    }

    let mut out = String::new();
    out.push_str(&format!("```python {{{}}}\n", attrs.join(" ")));
    if !cell.code.is_empty() {
        out.push_str(&cell.code);
        out.push('\n');
    }
    out.push_str("```\n");
    out
}

/// Prose round-trip: a hidden `mo.md(r\"\"\"...\"\"\")` cell renders back as
/// plain Markdown text.
fn markdown_prose_of(code: &str) -> Option<&str> {
    let inner = code
        .strip_prefix("mo.md(\n    r\"\"\"\n")?
        .strip_suffix("\n    \"\"\"\n)")?;
    Some(inner)
}

fn prose_cell(text: &str) -> String {
    format!("mo.md(\n    r\"\"\"\n{text}\n    \"\"\"\n)")
}

// ---------------------------------------------------------------------------
// Parsing

fn parse_fence_open(line: &str) -> Option<(String, Vec<(String, String)>)> {
    let rest = line.strip_prefix("```")?;
    let rest = rest.trim();
    let brace = rest.find('{')?;
    let language = rest[..brace].trim().to_string();
    let attr_text = rest[brace + 1..].strip_suffix('}')?.trim();
    if !attr_text.starts_with(FENCE_ATTR) {
        return None;
    }
    let mut attrs = Vec::new();
    for part in attr_text[FENCE_ATTR.len()..].split_whitespace() {
        if let Some((key, value)) = part.split_once('=') {
            attrs.push((key.to_string(), value.trim_matches('"').to_string()));
        }
    }
    Some((language, attrs))
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn cell_from_fence(
    language: &str,
    attrs: &[(String, String)],
    code: String,
    lineno: usize,
) -> CellDef {
    let options = CellOptions {
        disabled: attr(attrs, "disabled") == Some("true"),
        hide_code: attr(attrs, "hide_code") == Some("true"),
        column: attr(attrs, "column").and_then(|v| v.parse().ok()),
        extras: Vec::new(),
    };

    let (kind, name, code) = if attr(attrs, "setup") == Some("true") {
        (CellKind::Setup, SETUP_CELL_NAME.to_string(), code)
    } else if attr(attrs, "unparsable") == Some("true") {
        let name = attr(attrs, "name").unwrap_or("_").to_string();
        (CellKind::Unparsable, name, code)
    } else if language == "sql" {
        // SQL blocks are wrapped back into an embedded-SQL call so the
        // analyzer sees the statement.
        let target = attr(attrs, "query").unwrap_or("_df");
        let mut call = format!("{target} = mo.sql(f\"\"\"{code}\"\"\"");
        if let Some(engine) = attr(attrs, "engine") {
            call.push_str(&format!(", engine={engine}"));
        }
        if attr(attrs, "hide_output") == Some("true") {
            call.push_str(", output=False");
        }
        call.push(')');
        (CellKind::Cell, "_".to_string(), call)
    } else {
        let name = attr(attrs, "name").unwrap_or("_").to_string();
        (CellKind::Cell, name, code)
    };

    let line_count = code.lines().count();
    CellDef {
        kind,
        code,
        name,
        options,
        lineno,
        col_offset: 0,
        end_lineno: lineno + line_count.saturating_sub(1),
        end_col_offset: 0,
    }
}

fn flush_prose(cells: &mut Vec<CellDef>, prose: &mut Vec<&str>, lineno: usize) {
    while prose.first().is_some_and(|line| line.trim().is_empty()) {
        prose.remove(0);
    }
    while prose.last().is_some_and(|line| line.trim().is_empty()) {
        prose.pop();
    }
    if prose.is_empty() {
        return;
    }
    let text = prose.join("\n");
    cells.push(CellDef {
        kind: CellKind::Cell,
        code: prose_cell(&text),
        name: "_".to_string(),
        options: CellOptions {
            hide_code: true,
            ..CellOptions::default()
        },
        lineno,
        col_offset: 0,
        end_lineno: lineno + text.lines().count().saturating_sub(1),
        end_col_offset: 0,
    });
    prose.clear();
}
