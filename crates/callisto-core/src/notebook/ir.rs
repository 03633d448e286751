//! In-memory form of a persisted notebook.

use crate::cell::CellConfig;

/// A literal constant recognized in decorator and `App(...)` keyword
/// arguments.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    None,
}

impl Literal {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Literal::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Render as Python source.
    pub fn to_python(&self) -> String {
        match self {
            Literal::Bool(true) => "True".to_string(),
            Literal::Bool(false) => "False".to_string(),
            Literal::Int(value) => value.to_string(),
            Literal::Float(value) => value.to_string(),
            Literal::Str(value) => format!("{value:?}"),
            Literal::None => "None".to_string(),
        }
    }
}

/// Recognized cell options plus forward-compatible unknown kwargs, which are
/// preserved but do not infect the typed fields.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CellOptions {
    pub disabled: bool,
    pub hide_code: bool,
    pub column: Option<i64>,
    pub extras: Vec<(String, Literal)>,
}

impl CellOptions {
    /// Fold recognized kwargs into typed fields; everything else lands in
    /// `extras`.
    pub fn from_kwargs(kwargs: Vec<(String, Literal)>) -> Self {
        let mut options = CellOptions::default();
        for (key, value) in kwargs {
            match key.as_str() {
                "disabled" => options.disabled = value.as_bool().unwrap_or(false),
                "hide_code" => options.hide_code = value.as_bool().unwrap_or(false),
                "column" => options.column = value.as_int(),
                _ => options.extras.push((key, value)),
            }
        }
        options
    }

    pub fn config(&self) -> CellConfig {
        CellConfig {
            disabled: self.disabled,
            hide_code: self.hide_code,
            column: self.column,
        }
    }

    /// Options that differ from the defaults, in emission order.
    pub fn non_default_kwargs(&self) -> Vec<(String, Literal)> {
        let mut kwargs = Vec::new();
        if let Some(column) = self.column {
            kwargs.push(("column".to_string(), Literal::Int(column)));
        }
        if self.disabled {
            kwargs.push(("disabled".to_string(), Literal::Bool(true)));
        }
        if self.hide_code {
            kwargs.push(("hide_code".to_string(), Literal::Bool(true)));
        }
        kwargs.extend(self.extras.iter().cloned());
        kwargs
    }
}

/// What shape of notebook statement produced a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    /// `@app.cell`-decorated function; the function body is the code.
    Cell,
    /// `with app.setup:` block run before any other cell.
    Setup,
    /// `@app.function`-decorated top-level function; the whole `def` is the
    /// code.
    Function,
    /// `@app.class_definition`-decorated top-level class.
    ClassDefinition,
    /// `app._unparsable_cell("...")` carrying raw source.
    Unparsable,
}

/// One cell as read from the file, positioned so tracebacks point at the
/// original source.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CellDef {
    pub kind: CellKind,
    pub code: String,
    pub name: String,
    pub options: CellOptions,
    /// 1-indexed first line of the code region.
    pub lineno: usize,
    pub col_offset: usize,
    pub end_lineno: usize,
    pub end_col_offset: usize,
}

/// The notebook's leading comments/docstring, before the package import.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Header {
    pub value: String,
    pub lineno: usize,
    pub end_lineno: usize,
}

/// The `app = callisto.App(...)` statement.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AppInstantiation {
    pub options: Vec<(String, Literal)>,
}

/// A file-level shape mismatch. Non-fatal; the notebook may still be valid.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Violation {
    pub description: String,
    /// 1-indexed.
    pub lineno: usize,
    pub col_offset: usize,
}

impl Violation {
    pub fn new(description: impl Into<String>, lineno: usize) -> Self {
        Self {
            description: description.into(),
            lineno,
            col_offset: 0,
        }
    }
}

/// A parsed notebook file. `valid` means the required skeleton was found,
/// regardless of whether individual cells parse.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NotebookSerialization {
    pub header: Option<Header>,
    pub version: Option<String>,
    pub app: AppInstantiation,
    pub cells: Vec<CellDef>,
    pub violations: Vec<Violation>,
    pub valid: bool,
    pub filename: Option<String>,
}

impl NotebookSerialization {
    /// Cells that failed to parse and were preserved as raw source.
    pub fn unparsable_cells(&self) -> impl Iterator<Item = &CellDef> {
        self.cells
            .iter()
            .filter(|cell| cell.kind == CellKind::Unparsable)
    }
}
