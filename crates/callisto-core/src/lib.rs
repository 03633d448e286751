//! Static analysis and dataflow core for the Callisto reactive notebook
//! runtime.
//!
//! This crate provides:
//! - Notebook file parsing with error recovery ([`notebook`])
//! - Per-cell semantic analysis: defs, refs, imports, embedded SQL
//!   ([`analyze`])
//! - The dependency graph relating cells through their shared namespace,
//!   with cycle tracking and topological execution order ([`dataflow`])
//!
//! The core never performs I/O, never spawns tasks, and never runs user
//! code; the runtime layers own scheduling and execution.

pub mod analyze;
pub mod cell;
pub mod dataflow;
pub mod error;
pub mod notebook;
pub mod variables;

pub use analyze::{CompileOptions, compile_cell, compile_cell_with};
pub use cell::{CellConfig, CellId, CellImpl, RunResultStatus, RuntimeState, code_key};
pub use dataflow::validate::{StructuralError, check_for_errors};
pub use dataflow::{DirectedGraph, Edge, GraphTopology, topological_sort, transitive_closure};
pub use error::{Error, Result};
pub use notebook::{CellDef, CellKind, NotebookSerialization, parse_notebook};
pub use variables::{ImportData, Language, Name, VariableData, VariableKind};
