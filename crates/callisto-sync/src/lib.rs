//! Persisted-format round-trip for Callisto notebooks.
//!
//! # Architecture
//!
//! ```text
//! notebook.py ──► callisto-core parse ──► NotebookSerialization ──► codegen ──► notebook.py
//!                                                 │
//!                                                 ▼
//!                                            markdown (.md)
//! ```

mod codegen;
mod error;
mod loader;
mod markdown;

pub use codegen::{generate_filecontents, generate_notebook};
pub use error::{SyncError, SyncResult};
pub use loader::{
    LoadResult, NotebookStatus, find_cell, get_notebook_status, notebook_status, require_parsable,
};
pub use markdown::{from_markdown, to_markdown};

use std::path::Path;

use callisto_core::notebook::NotebookSerialization;

/// Read a notebook file (Python or Markdown) into the IR. Returns `None`
/// for empty files.
pub fn read_notebook(path: impl AsRef<Path>) -> SyncResult<Option<NotebookSerialization>> {
    let result = get_notebook_status(path.as_ref())?;
    tracing::debug!(
        path = %path.as_ref().display(),
        status = ?result.status,
        "read notebook"
    );
    Ok(result.notebook)
}

/// Convert a Markdown notebook to the Python format.
pub fn markdown_to_python(contents: &str, version: &str) -> SyncResult<String> {
    let notebook = from_markdown(contents)?;
    generate_notebook(&notebook, version)
}

/// Convert a Python notebook to the Markdown format.
pub fn python_to_markdown(contents: &str, version: &str) -> SyncResult<String> {
    match callisto_core::parse_notebook(contents)? {
        Some(notebook) => to_markdown(&notebook, version),
        None => Ok(String::new()),
    }
}

/// Serialize the notebook IR as JSON, the wire form consumed by frontends.
pub fn notebook_to_json(notebook: &NotebookSerialization) -> SyncResult<String> {
    Ok(serde_json::to_string_pretty(notebook)?)
}
