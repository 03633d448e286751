//! Lexer-based cell boundary scanner.
//!
//! When whole-file parsing fails, cell boundaries are recovered from the
//! token stream, which correctly ignores `@app.cell` inside strings and
//! comments. Each scanned cell is re-parsed on its own; cells that still
//! fail are preserved as unparsable cells. This recovery is best-effort and
//! exists for editor workflows.

use rustpython_ast::{self as ast};
use rustpython_parser::lexer::lex;
use rustpython_parser::{Mode, Parse, ParseError, Tok};

use crate::cell::DEFAULT_CELL_NAME;
use crate::error::{Error, Result};
use crate::notebook::extract::{Extractor, LineIndex, dedent};
use crate::notebook::ir::{
    AppInstantiation, CellDef, CellKind, CellOptions, Header, NotebookSerialization, Violation,
};
use crate::notebook::parse::{
    PACKAGE_NAME, convert_cell, convert_setup_cell, is_body_cell, is_setup_cell, parse_preamble,
};

/// What kind of boundary a scanned cell starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    Cell,
    Function,
    ClassDefinition,
    Setup,
    Unparsable,
}

impl BoundaryKind {
    fn from_attr(attr: &str) -> Option<Self> {
        match attr {
            "cell" => Some(BoundaryKind::Cell),
            "function" => Some(BoundaryKind::Function),
            "class_definition" => Some(BoundaryKind::ClassDefinition),
            _ => None,
        }
    }

    fn is_decorator(self) -> bool {
        matches!(
            self,
            BoundaryKind::Cell | BoundaryKind::Function | BoundaryKind::ClassDefinition
        )
    }
}

/// One region of source between cell boundaries.
#[derive(Debug)]
pub struct ScannedCell {
    pub kind: BoundaryKind,
    /// Function/class name from the line after the decorator, if found.
    pub name: Option<String>,
    /// Raw source: decorator, signature, and body.
    pub source: String,
    /// 1-indexed.
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug)]
pub struct ScanResult {
    /// Everything before the first boundary.
    pub preamble: String,
    pub cells: Vec<ScannedCell>,
    /// 1-indexed line of the `if __name__` guard.
    pub run_guard_line: Option<usize>,
}

/// Quick check whether source has any cell boundary markers.
pub fn has_cell_boundaries(source: &str) -> bool {
    ["@app.cell", "@app.function", "@app.class_definition", "with app.setup", "app._unparsable_cell"]
        .iter()
        .any(|marker| source.contains(marker))
}

// ---------------------------------------------------------------------------
// Boundary detection over the token stream

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    // @app.cell / @app.function / @app.class_definition
    At,
    AtApp,
    AtAppDot,
    AtAppKind,
    DecoratorArgs,
    // with app.setup(...):
    With,
    WithApp,
    WithAppDot,
    WithSetup,
    // app._unparsable_cell(
    AppDirect,
    AppDirectDot,
    AppDirectUnparsable,
    // if __name__ == "__main__":
    If,
    IfName,
}

struct BoundaryDetector {
    boundaries: Vec<(usize, BoundaryKind)>,
    run_guard_line: Option<usize>,
    state: State,
    start_line: usize,
    kind: BoundaryKind,
    paren_depth: usize,
}

impl BoundaryDetector {
    fn new() -> Self {
        Self {
            boundaries: Vec::new(),
            run_guard_line: None,
            state: State::Idle,
            start_line: 0,
            kind: BoundaryKind::Cell,
            paren_depth: 0,
        }
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.paren_depth = 0;
    }

    fn emit(&mut self) {
        self.boundaries.push((self.start_line, self.kind));
        self.reset();
    }

    fn feed(&mut self, tok: &Tok, row: usize, col: usize) {
        if self.state == State::Idle {
            if col != 0 {
                return;
            }
            match tok {
                Tok::At => {
                    self.state = State::At;
                    self.start_line = row;
                }
                Tok::With => {
                    self.state = State::With;
                    self.start_line = row;
                }
                Tok::Name { name } if name == "app" => {
                    self.state = State::AppDirect;
                    self.start_line = row;
                }
                Tok::If => {
                    self.state = State::If;
                    self.start_line = row;
                }
                _ => {}
            }
            return;
        }

        match self.state {
            State::At => match tok {
                Tok::Name { name } if name == "app" => self.state = State::AtApp,
                _ => self.reset(),
            },
            State::AtApp => match tok {
                Tok::Dot => self.state = State::AtAppDot,
                _ => self.reset(),
            },
            State::AtAppDot => match tok {
                Tok::Name { name } => match BoundaryKind::from_attr(name) {
                    Some(kind) => {
                        self.kind = kind;
                        self.state = State::AtAppKind;
                    }
                    None => self.reset(),
                },
                _ => self.reset(),
            },
            State::AtAppKind => match tok {
                Tok::Lpar => {
                    self.paren_depth = 1;
                    self.state = State::DecoratorArgs;
                }
                Tok::Newline | Tok::NonLogicalNewline | Tok::Comment(_) => self.emit(),
                _ => self.reset(),
            },
            State::DecoratorArgs => match tok {
                Tok::Lpar => self.paren_depth += 1,
                Tok::Rpar => {
                    self.paren_depth = self.paren_depth.saturating_sub(1);
                    if self.paren_depth == 0 {
                        self.emit();
                    }
                }
                _ => {}
            },
            State::With => match tok {
                Tok::Name { name } if name == "app" => self.state = State::WithApp,
                _ => self.reset(),
            },
            State::WithApp => match tok {
                Tok::Dot => self.state = State::WithAppDot,
                _ => self.reset(),
            },
            State::WithAppDot => match tok {
                Tok::Name { name } if name == "setup" => {
                    self.kind = BoundaryKind::Setup;
                    self.state = State::WithSetup;
                }
                _ => self.reset(),
            },
            State::WithSetup => match tok {
                Tok::Colon => self.emit(),
                Tok::Newline | Tok::NonLogicalNewline => self.reset(),
                _ => {}
            },
            State::AppDirect => match tok {
                Tok::Dot => self.state = State::AppDirectDot,
                _ => self.reset(),
            },
            State::AppDirectDot => match tok {
                Tok::Name { name } if name == "_unparsable_cell" => {
                    self.state = State::AppDirectUnparsable;
                }
                _ => self.reset(),
            },
            State::AppDirectUnparsable => match tok {
                Tok::Lpar => {
                    self.kind = BoundaryKind::Unparsable;
                    self.emit();
                }
                _ => self.reset(),
            },
            State::If => match tok {
                Tok::Name { name } if name == "__name__" => self.state = State::IfName,
                _ => self.reset(),
            },
            State::IfName => {
                if matches!(tok, Tok::EqEqual) && self.run_guard_line.is_none() {
                    self.run_guard_line = Some(self.start_line);
                }
                self.reset();
            }
            State::Idle => unreachable!("handled above"),
        }
    }
}

/// Tokenize as far as possible; on a lexical error, also report the
/// 1-indexed line (within `chunk`) where lexing stopped.
fn try_tokenize(chunk: &str) -> (Vec<(Tok, rustpython_parser::text_size::TextRange)>, Option<usize>) {
    let index = LineIndex::new(chunk);
    let mut tokens = Vec::new();
    for result in lex(chunk, Mode::Module) {
        match result {
            Ok(spanned) => tokens.push(spanned),
            Err(err) => {
                let line = index.line_of(usize::from(err.location));
                return (tokens, Some(line));
            }
        }
    }
    (tokens, None)
}

fn detect_in_chunk(chunk: &str) -> (BoundaryDetector, Option<usize>) {
    let (tokens, error_line) = try_tokenize(chunk);
    let index = LineIndex::new(chunk);
    let mut detector = BoundaryDetector::new();
    for (tok, range) in &tokens {
        let start = usize::from(range.start());
        detector.feed(tok, index.line_of(start), index.col_of(start));
    }
    (detector, error_line)
}

fn is_boundary_line(line: &str) -> bool {
    line.starts_with("@app.")
        || line.starts_with("app._unparsable_cell")
        || (line.strip_prefix("with").is_some_and(|rest| {
            rest.starts_with([' ', '\t']) && rest.trim_start().starts_with("app.")
        }))
        || (line.starts_with("if") && line.contains("__name__") && line.contains("=="))
}

/// Scan notebook source for cell boundaries, restarting past lexical errors
/// at the next plausible boundary line.
pub fn scan_notebook(source: &str) -> ScanResult {
    if source.trim().is_empty() {
        return ScanResult {
            preamble: String::new(),
            cells: Vec::new(),
            run_guard_line: None,
        };
    }

    let lines: Vec<&str> = source.lines().collect();
    let total = lines.len();

    let mut all_boundaries: Vec<(usize, BoundaryKind)> = Vec::new();
    let mut run_guard_line: Option<usize> = None;

    let mut offset = 0usize; // 0-based index of the chunk's first line
    loop {
        let chunk = lines[offset..].join("\n");
        let (detector, error_line) = detect_in_chunk(&chunk);
        for (start, kind) in detector.boundaries {
            all_boundaries.push((start + offset, kind));
        }
        if run_guard_line.is_none() {
            run_guard_line = detector.run_guard_line.map(|line| line + offset);
        }

        let Some(error_line) = error_line else { break };
        // Restart at the next boundary-looking line that actually lexes to
        // a boundary.
        let error_abs = offset + error_line.saturating_sub(1);
        let mut restart = None;
        for candidate in error_abs..total {
            if candidate <= offset {
                continue;
            }
            if !is_boundary_line(lines[candidate]) {
                continue;
            }
            let candidate_chunk = lines[candidate..].join("\n");
            let (candidate_detector, _) = detect_in_chunk(&candidate_chunk);
            if !candidate_detector.boundaries.is_empty()
                || candidate_detector.run_guard_line.is_some()
            {
                restart = Some(candidate);
                break;
            }
        }
        match restart {
            Some(candidate) => offset = candidate,
            None => break,
        }
    }

    all_boundaries.sort_by_key(|(start, _)| *start);
    all_boundaries.dedup_by_key(|(start, _)| *start);

    // Decorator boundaries absorb any preceding decorator lines (a wrapper
    // decorator above `@app.cell` belongs to the same cell).
    let adjusted: Vec<(usize, BoundaryKind)> = all_boundaries
        .into_iter()
        .map(|(start_line, kind)| {
            if !kind.is_decorator() {
                return (start_line, kind);
            }
            let mut adjusted_start = start_line;
            let mut line_idx = start_line as isize - 2; // 0-based, one line up
            while line_idx >= 0 {
                let trimmed = lines[line_idx as usize].trim();
                if trimmed.starts_with('@') {
                    adjusted_start = line_idx as usize + 1;
                } else if !trimmed.is_empty() {
                    break;
                }
                line_idx -= 1;
            }
            (adjusted_start, kind)
        })
        .collect();

    let preamble = match adjusted.first() {
        Some(&(first_line, _)) => lines[..first_line.saturating_sub(1)].join("\n"),
        None => source.to_string(),
    };

    let mut cells = Vec::new();
    for (i, &(start_line, kind)) in adjusted.iter().enumerate() {
        let next_start = adjusted
            .get(i + 1)
            .map(|&(start, _)| start)
            .or(run_guard_line.filter(|&guard| guard > start_line))
            .unwrap_or(total + 1);

        let cell_source = lines[start_line - 1..next_start.saturating_sub(1).min(total)]
            .join("\n")
            .trim_end()
            .to_string();

        let mut end_line = next_start.saturating_sub(1).min(total);
        while end_line > start_line && lines[end_line - 1].trim().is_empty() {
            end_line -= 1;
        }

        let name = extract_cell_name(kind, &lines, start_line - 1, next_start.saturating_sub(1));
        cells.push(ScannedCell {
            kind,
            name,
            source: cell_source,
            start_line,
            end_line,
        });
    }

    ScanResult {
        preamble,
        cells,
        run_guard_line,
    }
}

/// The function/class name on the line following a decorator, or the
/// `name="..."` kwarg of an unparsable-cell call.
fn extract_cell_name(
    kind: BoundaryKind,
    lines: &[&str],
    start_0: usize,
    end_0: usize,
) -> Option<String> {
    match kind {
        BoundaryKind::Setup => None,
        BoundaryKind::Unparsable => lines[start_0..end_0.min(lines.len())]
            .iter()
            .find_map(|line| find_name_kwarg(line)),
        _ => {
            for line in lines[(start_0 + 1).min(lines.len())..end_0.min(lines.len())].iter() {
                let trimmed = line.trim_start();
                let trimmed = trimmed.strip_prefix("async ").unwrap_or(trimmed).trim_start();
                let rest = trimmed
                    .strip_prefix("def ")
                    .or_else(|| trimmed.strip_prefix("class "));
                if let Some(rest) = rest {
                    let name: String = rest
                        .trim_start()
                        .chars()
                        .take_while(|c| c.is_alphanumeric() || *c == '_')
                        .collect();
                    if !name.is_empty() {
                        return Some(name);
                    }
                }
            }
            None
        }
    }
}

fn find_name_kwarg(line: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(pos) = line[search_from..].find("name") {
        let after = &line[search_from + pos + 4..];
        let after = after.trim_start();
        if let Some(rest) = after.strip_prefix('=') {
            let rest = rest.trim_start();
            if let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') {
                let value: String = rest[1..].chars().take_while(|c| *c != quote).collect();
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        search_from += pos + 4;
    }
    None
}

// ---------------------------------------------------------------------------
// Body recovery for cells that fail to parse

/// Strip decorator lines, the def/class/with header, and a trailing return
/// from a scanned cell's raw source, yielding the body for an unparsable
/// cell.
fn extract_body_code(cell_source: &str, kind: BoundaryKind) -> String {
    if kind == BoundaryKind::Unparsable {
        // Already an app._unparsable_cell(...) call.
        return cell_source.to_string();
    }

    let lines: Vec<&str> = cell_source.lines().collect();
    let body_start = find_body_start(&lines, kind);
    if body_start >= lines.len() {
        return String::new();
    }
    let mut body_lines: Vec<String> = lines[body_start..].iter().map(|s| s.to_string()).collect();
    strip_trailing_return(&mut body_lines);
    dedent(&body_lines.join("\n")).trim().to_string()
}

/// Line index where the body starts: after decorators and the header line
/// ending in a colon outside brackets, strings, and comments.
fn find_body_start(lines: &[&str], kind: BoundaryKind) -> usize {
    let mut i = 0;
    if kind.is_decorator() {
        while i < lines.len() {
            let trimmed = lines[i].trim();
            if trimmed.starts_with('@') || trimmed.is_empty() {
                i += 1;
            } else {
                break;
            }
        }
    }

    let mut depth: i32 = 0;
    while i < lines.len() {
        let line: Vec<char> = lines[i].chars().collect();
        let mut j = 0;
        while j < line.len() {
            let ch = line[j];
            if ch == '"' || ch == '\'' {
                let quote = ch;
                if line.get(j + 1) == Some(&quote) && line.get(j + 2) == Some(&quote) {
                    // Triple quote: skip to the closing triple on this line,
                    // or give up on the rest of the line.
                    let mut k = j + 3;
                    loop {
                        if k + 2 >= line.len() + 1 {
                            j = line.len();
                            break;
                        }
                        if line.get(k) == Some(&quote)
                            && line.get(k + 1) == Some(&quote)
                            && line.get(k + 2) == Some(&quote)
                        {
                            j = k + 3;
                            break;
                        }
                        k += 1;
                    }
                    continue;
                }
                j += 1;
                while j < line.len() && line[j] != quote {
                    if line[j] == '\\' {
                        j += 1;
                    }
                    j += 1;
                }
                j += 1;
                continue;
            }
            match ch {
                '#' => break,
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                ':' if depth == 0 => return i + 1,
                _ => {}
            }
            j += 1;
        }
        i += 1;
    }
    0
}

/// Remove a trailing return statement at the body's indentation level.
fn strip_trailing_return(body_lines: &mut Vec<String>) {
    let body_indent = body_lines
        .iter()
        .find(|line| !line.trim().is_empty())
        .map(|line| line[..line.len() - line.trim_start().len()].to_string())
        .unwrap_or_default();

    let mut idx = body_lines.len();
    while idx > 0 && body_lines[idx - 1].trim().is_empty() {
        idx -= 1;
    }
    if idx == 0 {
        return;
    }
    let line = &body_lines[idx - 1];
    let line_indent = &line[..line.len() - line.trim_start().len()];
    let stripped = line.trim();
    if line_indent == body_indent
        && (stripped == "return"
            || stripped.starts_with("return ")
            || stripped.starts_with("return\t")
            || stripped.starts_with("return("))
    {
        body_lines.truncate(idx - 1);
    }
}

// ---------------------------------------------------------------------------
// Recovery parse

/// Fallback parse used when the whole file fails to parse: scan for cell
/// boundaries, parse each cell in isolation, and wrap the rest as
/// unparsable cells.
pub(crate) fn parse_with_recovery(
    source: &str,
    err: &ParseError,
) -> Result<NotebookSerialization> {
    let index = LineIndex::new(source);
    let parse_error = Error::Parse {
        line: index.line_of(usize::from(err.offset)),
        message: err.error.to_string(),
    };
    if !has_cell_boundaries(source) {
        // Not a notebook; surface the original error.
        return Err(parse_error);
    }

    let scan = scan_notebook(source);

    // Preamble errors are fatal.
    let preamble_stmts = ast::Suite::parse(&scan.preamble, "<notebook>").map_err(|err| {
        let preamble_index = LineIndex::new(&scan.preamble);
        Error::Parse {
            line: preamble_index.line_of(usize::from(err.offset)),
            message: err.error.to_string(),
        }
    })?;
    let preamble_extractor = Extractor::new(&scan.preamble);
    let preamble = parse_preamble(&preamble_extractor, &preamble_stmts);
    let mut violations = preamble.violations;

    if !preamble.found_import {
        violations.push(Violation::new("Only able to extract header.", 1));
        return Ok(NotebookSerialization {
            header: Some(Header {
                value: source.to_string(),
                lineno: 1,
                end_lineno: index.line_count(),
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
    for scanned in &scan.cells {
        match ast::Suite::parse(&scanned.source, "<cell>") {
            Ok(stmts) if !stmts.is_empty() => {
                let cell_extractor = Extractor::new(&scanned.source);
                let stmt = &stmts[0];
                let converted = if is_setup_cell(stmt) {
                    Some(convert_setup_cell(&cell_extractor, stmt))
                } else if is_body_cell(stmt) {
                    convert_cell(&cell_extractor, stmt)
                } else {
                    None
                };
                match converted {
                    Some((mut cell, mut cell_violations)) => {
                        offset_cell_lines(&mut cell, scanned.start_line);
                        for violation in &mut cell_violations {
                            violation.lineno += scanned.start_line.saturating_sub(1);
                        }
                        violations.append(&mut cell_violations);
                        cells.push(cell);
                    }
                    None => violations.push(Violation::new(
                        "Unexpected statement, expected body cell definition.",
                        scanned.start_line,
                    )),
                }
            }
            Ok(_) => {}
            Err(cell_err) => {
                let code = extract_body_code(&scanned.source, scanned.kind);
                violations.push(Violation::new(
                    format!("Unparsable cell: {}", cell_err.error),
                    scanned.start_line,
                ));
                cells.push(CellDef {
                    kind: CellKind::Unparsable,
                    code,
                    name: scanned
                        .name
                        .clone()
                        .unwrap_or_else(|| DEFAULT_CELL_NAME.to_string()),
                    options: CellOptions::default(),
                    lineno: scanned.start_line,
                    col_offset: 0,
                    end_lineno: scanned.end_line,
                    end_col_offset: 0,
                });
            }
        }
    }

    if scan.run_guard_line.is_none() {
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

fn offset_cell_lines(cell: &mut CellDef, start_line: usize) {
    let delta = start_line.saturating_sub(1);
    cell.lineno += delta;
    cell.end_lineno += delta;
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROKEN: &str = r#"import callisto

__generated_with = "0.1.0"
app = callisto.App()


@app.cell
def _():
    x = 0
    return (x,)


@app.cell
def _(x):
    y = x ===== 1
    return


@app.cell
def _(y):
    z = y * 2
    return


if __name__ == "__main__":
    app.run()
"#;

    #[test]
    fn test_scan_finds_boundaries() {
        let scan = scan_notebook(BROKEN);
        assert_eq!(scan.cells.len(), 3);
        assert!(scan.preamble.contains("app = callisto.App()"));
        assert!(scan.run_guard_line.is_some());
        assert_eq!(scan.cells[0].kind, BoundaryKind::Cell);
    }

    #[test]
    fn test_boundary_inside_string_is_ignored() {
        let source = "import callisto\napp = callisto.App()\n\n@app.cell\ndef _():\n    s = \"\"\"\n@app.cell\n\"\"\"\n    return\n\nif __name__ == \"__main__\":\n    app.run()\n";
        let scan = scan_notebook(source);
        assert_eq!(scan.cells.len(), 1);
    }

    #[test]
    fn test_recovery_wraps_unparsable_cell() {
        let notebook = crate::notebook::parse::parse_notebook(BROKEN)
            .unwrap()
            .unwrap();
        assert!(notebook.valid);
        assert_eq!(notebook.cells.len(), 3);
        assert_eq!(notebook.cells[0].kind, CellKind::Cell);
        assert_eq!(notebook.cells[1].kind, CellKind::Unparsable);
        assert!(notebook.cells[1].code.contains("y = x ===== 1"));
        assert_eq!(notebook.cells[2].kind, CellKind::Cell);
        assert_eq!(notebook.cells[2].code, "z = y * 2");
        assert!(
            notebook
                .violations
                .iter()
                .any(|v| v.description.contains("Unparsable cell"))
        );
    }

    #[test]
    fn test_setup_boundary() {
        let source = "import callisto\napp = callisto.App()\n\nwith app.setup:\n    import os\n\n@app.cell\ndef _():\n    x = os.sep\n    return\n";
        let scan = scan_notebook(source);
        assert_eq!(scan.cells.len(), 2);
        assert_eq!(scan.cells[0].kind, BoundaryKind::Setup);
    }

    #[test]
    fn test_extract_body_code_strips_header_and_return() {
        let source = "@app.cell\ndef _(x):\n    y = x + 1\n    return (y,)";
        assert_eq!(
            extract_body_code(source, BoundaryKind::Cell),
            "y = x + 1"
        );
    }

    #[test]
    fn test_extract_body_code_multiline_signature() {
        let source = "@app.cell\ndef _(\n    x,\n):\n    y = x\n    return";
        assert_eq!(extract_body_code(source, BoundaryKind::Cell), "y = x");
    }

    #[test]
    fn test_find_name_kwarg() {
        assert_eq!(
            find_name_kwarg("app._unparsable_cell(\"x=\", name=\"broken\")"),
            Some("broken".to_string())
        );
        assert_eq!(find_name_kwarg("app._unparsable_cell(\"x=\")"), None);
    }

    #[test]
    fn test_wrapper_decorator_absorbed() {
        let source = "import callisto\napp = callisto.App()\n\n@wrapper\n@app.cell\ndef _():\n    x = 0\n    return\n";
        let scan = scan_notebook(source);
        assert_eq!(scan.cells.len(), 1);
        assert!(scan.cells[0].source.starts_with("@wrapper"));
    }

    #[test]
    fn test_scanned_cell_names() {
        let scan = scan_notebook(
            "@app.function\ndef helper(x):\n    return x\n\n@app.cell\ndef named():\n    x = 0\n    return\n",
        );
        assert_eq!(scan.cells[0].name.as_deref(), Some("helper"));
        assert_eq!(scan.cells[1].name.as_deref(), Some("named"));
    }
}
