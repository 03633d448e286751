//! Error types for callisto-core.

use thiserror::Error;

use crate::cell::CellId;

/// Result type for callisto-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A syntax error attached to a single unparsable cell.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CellSyntaxError {
    /// Name of the offending cell, if known.
    pub name: Option<String>,
    /// 1-indexed line of the error within the cell source.
    pub line: usize,
    /// 0-indexed column offset of the error.
    pub offset: usize,
    pub message: String,
}

/// Errors that can occur in callisto-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The file is not recognizable as a callisto notebook (no `callisto.App`
    /// assignment found).
    #[error("not a callisto notebook: {0}")]
    NotebookFormat(String),

    /// A Python syntax error that could not be recovered into an unparsable
    /// cell.
    #[error("syntax error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// The notebook contains cells whose source could not be parsed.
    #[error("notebook contains {} unparsable cell(s)", .0.len())]
    Unparsable(Vec<CellSyntaxError>),

    /// Cell not found in the graph.
    #[error("cell {0} not found")]
    CellNotFound(CellId),

    /// A cell id was registered twice.
    #[error("cell {0} already in graph")]
    DuplicateCell(CellId),

    /// Override-driven pruning was given overrides that do not cover all
    /// definitions of a pruned cell.
    #[error("overrides must cover all definitions of pruned cells; missing: {missing:?}")]
    IncompleteRefs { missing: Vec<String> },
}
