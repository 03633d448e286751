//! Positional source extraction: recovering the exact code of a cell from
//! AST byte ranges, with token-stream help for everything the AST alone
//! cannot answer (decorators, signatures, trailing comments).

use rustpython_ast::{Ranged, Stmt};
use rustpython_parser::lexer::lex;
use rustpython_parser::{Mode, Tok};
use rustpython_parser::text_size::TextRange;

/// Byte offsets of line starts, for offset <-> line/col conversion.
/// Lines are 1-indexed, columns are 0-indexed byte offsets within the line.
#[derive(Debug)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    source_len: usize,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            line_starts,
            source_len: source.len(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// 1-indexed line containing `offset`.
    pub fn line_of(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset.min(self.source_len)) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    /// Byte offset of the start of a 1-indexed line; the end of the source
    /// for lines past the last.
    pub fn line_start(&self, line: usize) -> usize {
        self.line_starts
            .get(line.saturating_sub(1))
            .copied()
            .unwrap_or(self.source_len)
    }

    pub fn col_of(&self, offset: usize) -> usize {
        offset - self.line_start(self.line_of(offset))
    }
}

/// Remove the longest common leading whitespace from all non-blank lines.
pub fn dedent(code: &str) -> String {
    let mut prefix: Option<&str> = None;
    for line in code.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = &line[..line.len() - line.trim_start().len()];
        prefix = Some(match prefix {
            None => indent,
            Some(current) => {
                let common = current
                    .bytes()
                    .zip(indent.bytes())
                    .take_while(|(a, b)| a == b)
                    .count();
                &current[..common]
            }
        });
    }
    let prefix = prefix.unwrap_or("");
    code.lines()
        .map(|line| line.strip_prefix(prefix).unwrap_or(line.trim_start_matches(|c| c == ' ' || c == '\t')))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Helper to slice cell code out of notebook source by AST positions.
#[derive(Debug)]
pub struct Extractor<'a> {
    source: &'a str,
    index: LineIndex,
}

/// Code with its position in the original file.
#[derive(Debug)]
pub struct ExtractedCode {
    pub code: String,
    /// 1-indexed.
    pub lineno: usize,
    pub col_offset: usize,
    pub end_lineno: usize,
    pub end_col_offset: usize,
}

impl<'a> Extractor<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            index: LineIndex::new(source),
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn index(&self) -> &LineIndex {
        &self.index
    }

    fn positioned(&self, code: String, start: usize, end: usize) -> ExtractedCode {
        ExtractedCode {
            code,
            lineno: self.index.line_of(start),
            col_offset: self.index.col_of(start),
            end_lineno: self.index.line_of(end.max(start)),
            end_col_offset: self.index.col_of(end.max(start)),
        }
    }

    /// The source of a decorated definition, minus the recognized decorator:
    /// code starts on the line after the decorator ends. Used for
    /// `@app.function` / `@app.class_definition` cells.
    pub fn code_after_decorator(
        &self,
        decorator_range: Option<TextRange>,
        node_range: TextRange,
    ) -> ExtractedCode {
        let node_end = usize::from(node_range.end());
        let start = match decorator_range {
            Some(range) => {
                let decorator_end_line = self.index.line_of(usize::from(range.end()));
                self.index.line_start(decorator_end_line + 1)
            }
            None => {
                let start_line = self.index.line_of(usize::from(node_range.start()));
                self.index.line_start(start_line)
            }
        };
        let start = start.min(node_end);
        let code = dedent(self.source[start..node_end].trim_end());
        self.positioned(code, start, node_end)
    }

    /// The body of an `@app.cell` function, with the signature skipped via
    /// the token stream and a single trailing `return` stripped.
    pub fn cell_body(
        &self,
        decorator_ranges: &[TextRange],
        node_range: TextRange,
        body: &[Stmt],
    ) -> ExtractedCode {
        let fn_start = decorator_ranges
            .iter()
            .map(|range| usize::from(range.start()))
            .chain([usize::from(node_range.start())])
            .min()
            .unwrap_or_default();
        let fn_end = usize::from(node_range.end());
        self.block_body(fn_start, fn_end, body)
    }

    /// The body of a `with app.setup:` block, with a single trailing `pass`
    /// stripped.
    pub fn setup_body(&self, node_range: TextRange, body: &[Stmt]) -> ExtractedCode {
        let start = usize::from(node_range.start());
        let end = usize::from(node_range.end());
        let mut extracted = self.block_body(start, end, body);
        if let Some(stripped) = extracted.code.strip_suffix("\npass") {
            extracted.code = stripped.trim_end().to_string();
        } else if extracted.code == "pass" {
            extracted.code.clear();
        }
        extracted
    }

    fn block_body(&self, block_start: usize, block_end: usize, body: &[Stmt]) -> ExtractedCode {
        let block_source = &self.source[block_start..block_end.max(block_start)];
        let Some(rel_body_start) = body_start_after_signature(block_source) else {
            return self.positioned(String::new(), block_start, block_start);
        };
        let body_start = block_start + rel_body_start;

        // A single trailing `return` is not part of the cell's code.
        let has_return = matches!(body.last(), Some(Stmt::Return(_)));
        let code_end = if has_return {
            let return_start = usize::from(body.last().expect("nonempty").range().start());
            if return_start <= body_start {
                // Same-line or comment-only body.
                return self.positioned(String::new(), body_start, body_start);
            }
            return_start
        } else {
            block_end
        };

        let mut code = self.source[body_start..code_end.max(body_start)]
            .trim_end()
            .to_string();

        // The AST stops at the last statement; trailing comment lines that
        // belong to the block have to be recovered by indentation.
        if !has_return {
            let indent_len = code.len() - code.trim_start_matches([' ', '\t']).len();
            let indent = code[..indent_len].to_string();
            if !indent.is_empty() {
                let mut extra = Vec::new();
                let mut line = self.index.line_of(code_end.max(body_start)) + 1;
                let mut pending: Vec<&str> = Vec::new();
                while line <= self.index.line_count() {
                    let start = self.index.line_start(line);
                    let end = self.index.line_start(line + 1);
                    let text = self.source[start..end].trim_end_matches('\n');
                    if text.trim().is_empty() {
                        pending.push(text);
                    } else if text.starts_with(&indent) {
                        extra.append(&mut pending);
                        extra.push(text);
                    } else {
                        break;
                    }
                    line += 1;
                }
                if !extra.is_empty() {
                    for text in extra {
                        code.push('\n');
                        code.push_str(text);
                    }
                }
            }
        }

        let code = dedent(&code);
        if code.trim().is_empty() {
            return self.positioned(String::new(), body_start, body_start);
        }
        let end = body_start + 1;
        let mut extracted = self.positioned(code, body_start, end);
        extracted.end_lineno = extracted.lineno + extracted.code.lines().count().saturating_sub(1);
        extracted.end_col_offset = extracted.code.lines().last().map_or(0, str::len);
        extracted
    }
}

/// Byte offset (within `block_source`) where the block's body begins: past
/// the `def`/`class`/`with` header's closing colon, at the start of the
/// first body line (keeping leading comments), or at the first token for
/// same-line bodies.
fn body_start_after_signature(block_source: &str) -> Option<usize> {
    let index = LineIndex::new(block_source);
    let mut tokens = Vec::new();
    for result in lex(block_source, Mode::Module) {
        match result {
            Ok(spanned) => tokens.push(spanned),
            Err(_) => break,
        }
    }

    // Seek to the block keyword, skipping decorator lines.
    let mut i = 0;
    while i < tokens.len() {
        if matches!(tokens[i].0, Tok::Def | Tok::Class | Tok::With) {
            break;
        }
        i += 1;
    }
    if i == tokens.len() {
        return None;
    }

    // The signature ends at the first colon outside brackets.
    let mut depth = 0usize;
    let colon = loop {
        i += 1;
        let (tok, _) = tokens.get(i)?;
        match tok {
            Tok::Lpar | Tok::Lsqb | Tok::Lbrace => depth += 1,
            Tok::Rpar | Tok::Rsqb | Tok::Rbrace => depth = depth.saturating_sub(1),
            Tok::Colon if depth == 0 => break i,
            _ => {}
        }
    };

    let mut saw_newline = false;
    for (tok, range) in tokens.iter().skip(colon + 1) {
        match tok {
            Tok::Newline | Tok::NonLogicalNewline => saw_newline = true,
            Tok::Comment(_) if !saw_newline => {}
            Tok::Indent | Tok::Dedent => {}
            _ => {
                let start = usize::from(range.start());
                return Some(if saw_newline {
                    index.line_start(index.line_of(start))
                } else {
                    start
                });
            }
        }
    }
    None
}
