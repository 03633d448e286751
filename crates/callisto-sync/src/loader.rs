//! Notebook loading status: classify a file before the runtime commits to
//! running it.

use std::path::Path;

use callisto_core::error::CellSyntaxError;
use callisto_core::notebook::{CellDef, NotebookSerialization, parse_notebook};

use crate::error::{SyncError, SyncResult};
use crate::markdown::from_markdown;

/// How a notebook file loaded.
///
/// `HasErrors` notebooks can still be opened; `Invalid` ones cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotebookStatus {
    /// No content, or only comments / a doc string.
    Empty,
    /// Could not be recognized as a callisto notebook.
    Invalid,
    /// Parsed, but with violations.
    HasErrors,
    /// Parsed cleanly.
    Valid,
}

/// Result of attempting to load a notebook.
#[derive(Debug)]
pub struct LoadResult {
    pub status: NotebookStatus,
    pub notebook: Option<NotebookSerialization>,
    pub contents: Option<String>,
}

/// Classify notebook source. `markdown` selects the Markdown reader.
pub fn notebook_status(contents: &str, markdown: bool) -> SyncResult<LoadResult> {
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Ok(LoadResult {
            status: NotebookStatus::Empty,
            notebook: None,
            contents: Some(trimmed.to_string()),
        });
    }

    let notebook = if markdown {
        Some(from_markdown(trimmed)?)
    } else {
        parse_notebook(trimmed)?
    };

    let Some(notebook) = notebook else {
        return Ok(LoadResult {
            status: NotebookStatus::Empty,
            notebook: None,
            contents: Some(trimmed.to_string()),
        });
    };

    let status = if !notebook.valid {
        NotebookStatus::Invalid
    } else if notebook.violations.is_empty() {
        NotebookStatus::Valid
    } else {
        tracing::debug!(
            violations = notebook.violations.len(),
            "notebook has violations"
        );
        NotebookStatus::HasErrors
    };
    Ok(LoadResult {
        status,
        notebook: Some(notebook),
        contents: Some(trimmed.to_string()),
    })
}

/// Read and classify a notebook file (`.py` or `.md`).
pub fn get_notebook_status(path: impl AsRef<Path>) -> SyncResult<LoadResult> {
    let path = path.as_ref();
    let markdown = match path.extension().and_then(|ext| ext.to_str()) {
        Some("md") | Some("qmd") => true,
        Some("py") => false,
        _ => return Err(SyncError::UnsupportedExtension(path.to_path_buf())),
    };
    let contents = std::fs::read_to_string(path).map_err(|e| SyncError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    notebook_status(&contents, markdown)
}

/// The cell whose code region contains the given 1-indexed line, for
/// pointing tracebacks back at the file.
pub fn find_cell(notebook: &NotebookSerialization, lineno: usize) -> Option<&CellDef> {
    let mut previous = None;
    for cell in &notebook.cells {
        if cell.lineno > lineno {
            break;
        }
        previous = Some(cell);
    }
    previous
}

/// Refuse to run a notebook that still contains unparsable cells, reporting
/// each cell's syntax error position.
pub fn require_parsable(notebook: &NotebookSerialization) -> SyncResult<()> {
    let errors: Vec<CellSyntaxError> = notebook
        .unparsable_cells()
        .map(|cell| {
            let (line, offset, message) =
                match callisto_core::compile_cell(&cell.code, callisto_core::CellId::new(0)) {
                    Err(callisto_core::Error::Parse { line, message }) => (line, 0, message),
                    _ => (1, 0, "invalid syntax".to_string()),
                };
            CellSyntaxError {
                name: Some(cell.name.clone()),
                line: cell.lineno + line.saturating_sub(1),
                offset,
                message,
            }
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SyncError::Core(callisto_core::Error::Unparsable(errors)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "import callisto\n__generated_with = \"0.1.0\"\napp = callisto.App()\n\n@app.cell\ndef _():\n    x = 0\n    return\n\nif __name__ == \"__main__\":\n    app.run()\n";

    #[test]
    fn test_empty_status() {
        let result = notebook_status("", false).unwrap();
        assert_eq!(result.status, NotebookStatus::Empty);
        let result = notebook_status("\n\n", false).unwrap();
        assert_eq!(result.status, NotebookStatus::Empty);
    }

    #[test]
    fn test_valid_status() {
        let result = notebook_status(VALID, false).unwrap();
        assert_eq!(result.status, NotebookStatus::Valid);
    }

    #[test]
    fn test_has_errors_status() {
        let source = VALID.replace("__generated_with = \"0.1.0\"\n", "");
        let result = notebook_status(&source, false).unwrap();
        assert_eq!(result.status, NotebookStatus::HasErrors);
    }

    #[test]
    fn test_invalid_status() {
        let result = notebook_status("x = 1\nprint(x)\n", false).unwrap();
        assert_eq!(result.status, NotebookStatus::Invalid);
    }

    #[test]
    fn test_find_cell() {
        let result = notebook_status(VALID, false).unwrap();
        let notebook = result.notebook.unwrap();
        let cell = find_cell(&notebook, notebook.cells[0].lineno).unwrap();
        assert_eq!(cell.code, "x = 0");
        assert!(find_cell(&notebook, 1).is_none());
    }

    #[test]
    fn test_require_parsable() {
        let broken = "import callisto\n__generated_with = \"0.1.0\"\napp = callisto.App()\n\napp._unparsable_cell(\"x ===== 5\", name=\"bad\")\n\nif __name__ == \"__main__\":\n    app.run()\n";
        let notebook = notebook_status(broken, false)
            .unwrap()
            .notebook
            .unwrap();
        let err = require_parsable(&notebook).unwrap_err();
        match err {
            SyncError::Core(callisto_core::Error::Unparsable(errors)) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].name.as_deref(), Some("bad"));
            }
            other => panic!("expected unparsable error, got {other:?}"),
        }

        let notebook = notebook_status(VALID, false).unwrap().notebook.unwrap();
        assert!(require_parsable(&notebook).is_ok());
    }
}
