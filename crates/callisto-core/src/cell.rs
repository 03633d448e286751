//! The analyzed form of a notebook cell.

use std::hash::{Hash, Hasher};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

use crate::analyze::sql::SqlRef;
use crate::variables::{ImportData, Language, Name, VariableData};

/// Name given to cells that were not named in the notebook file.
pub const DEFAULT_CELL_NAME: &str = "_";

/// Reserved name of the setup cell; it must be a root of the graph.
pub const SETUP_CELL_NAME: &str = "setup";

/// Unique identifier for a cell within a notebook. Assigned at registration
/// time and never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct CellId(pub(crate) usize);

impl CellId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell_{}", self.0)
    }
}

/// Content hash used as cache identity for a cell's code.
pub fn code_key(code: &str) -> u64 {
    let mut hasher = FxHasher::default();
    code.hash(&mut hasher);
    hasher.finish()
}

/// Per-cell configuration recognized from decorator options.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CellConfig {
    pub disabled: bool,
    pub hide_code: bool,
    pub column: Option<i64>,
}

/// Scheduler-visible run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RuntimeState {
    Idle = 0,
    Queued = 1,
    Running = 2,
    DisabledTransitively = 3,
}

impl RuntimeState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RuntimeState::Queued,
            2 => RuntimeState::Running,
            3 => RuntimeState::DisabledTransitively,
            _ => RuntimeState::Idle,
        }
    }
}

/// Outcome of a cell's last run, if it has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunResultStatus {
    Success = 1,
    Exception = 2,
    Interrupted = 3,
    Cancelled = 4,
    InternalError = 5,
}

impl RunResultStatus {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(RunResultStatus::Success),
            2 => Some(RunResultStatus::Exception),
            3 => Some(RunResultStatus::Interrupted),
            4 => Some(RunResultStatus::Cancelled),
            5 => Some(RunResultStatus::InternalError),
            _ => None,
        }
    }

    /// States in which a cell's previous run did not complete; import-block
    /// pruning keeps such cells as re-run candidates.
    pub fn is_interrupted(status: Option<Self>) -> bool {
        matches!(
            status,
            None | Some(RunResultStatus::Interrupted)
                | Some(RunResultStatus::Cancelled)
                | Some(RunResultStatus::InternalError)
        )
    }
}

/// Bookkeeping for cells whose every top-level statement is an import.
#[derive(Debug, Default)]
pub struct ImportWorkspace {
    /// True iff every top-level statement is an import.
    pub is_import_block: bool,
    /// Definitions already satisfied by a previous run; these can skip
    /// re-execution when the import block is re-registered unchanged.
    imported_defs: RwLock<FxHashSet<Name>>,
}

impl ImportWorkspace {
    pub fn new(is_import_block: bool) -> Self {
        Self {
            is_import_block,
            imported_defs: RwLock::default(),
        }
    }

    pub fn imported_defs(&self) -> FxHashSet<Name> {
        self.imported_defs.read().expect("poisoned").clone()
    }

    pub fn add_imported_defs(&self, names: impl IntoIterator<Item = Name>) {
        self.imported_defs.write().expect("poisoned").extend(names);
    }
}

/// The analyzed form of one cell: immutable binding facts plus a few
/// scheduler-owned mutable flags.
#[derive(Debug)]
pub struct CellImpl {
    pub cell_id: CellId,
    pub code: String,
    /// Content hash of `code`.
    pub key: u64,
    pub name: String,
    pub config: CellConfig,
    pub language: Language,
    /// Whether the cell contains top-level `await` (or async iteration).
    pub is_coroutine: bool,

    /// Names this cell binds at top level.
    pub defs: FxHashSet<Name>,
    /// Free names read by this cell.
    pub refs: FxHashSet<Name>,
    /// Names explicitly deleted by this cell.
    pub deleted_refs: FxHashSet<Name>,
    /// Per-binding metadata; the last entry for a name is canonical.
    pub variable_data: FxHashMap<Name, Vec<VariableData>>,
    pub imports: FxHashSet<ImportData>,
    /// Top-level module names imported, including `_`-prefixed ones.
    pub imported_namespaces: FxHashSet<Name>,
    /// Hierarchical SQL references, keyed by their dotted text.
    pub sql_refs: FxHashMap<Name, SqlRef>,
    /// SQL statements found in `.sql(...)`/`.execute(...)` calls, in order.
    pub sqls: Vec<String>,

    pub import_workspace: ImportWorkspace,

    stale: AtomicBool,
    runtime_state: AtomicU8,
    run_result_status: AtomicU8,
}

impl CellImpl {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        cell_id: CellId,
        code: String,
        name: String,
        config: CellConfig,
        language: Language,
        is_coroutine: bool,
        defs: FxHashSet<Name>,
        refs: FxHashSet<Name>,
        deleted_refs: FxHashSet<Name>,
        variable_data: FxHashMap<Name, Vec<VariableData>>,
        imports: FxHashSet<ImportData>,
        imported_namespaces: FxHashSet<Name>,
        sql_refs: FxHashMap<Name, SqlRef>,
        sqls: Vec<String>,
        import_workspace: ImportWorkspace,
    ) -> Self {
        let key = code_key(&code);
        Self {
            cell_id,
            code,
            key,
            name,
            config,
            language,
            is_coroutine,
            defs,
            refs,
            deleted_refs,
            variable_data,
            imports,
            imported_namespaces,
            sql_refs,
            sqls,
            import_workspace,
            stale: AtomicBool::new(false),
            runtime_state: AtomicU8::new(RuntimeState::Idle as u8),
            run_result_status: AtomicU8::new(0),
        }
    }

    pub fn stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    pub fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::Release);
    }

    pub fn runtime_state(&self) -> RuntimeState {
        RuntimeState::from_u8(self.runtime_state.load(Ordering::Acquire))
    }

    pub fn set_runtime_state(&self, state: RuntimeState) {
        self.runtime_state.store(state as u8, Ordering::Release);
    }

    pub fn disabled_transitively(&self) -> bool {
        self.runtime_state() == RuntimeState::DisabledTransitively
    }

    pub fn run_result_status(&self) -> Option<RunResultStatus> {
        RunResultStatus::from_u8(self.run_result_status.load(Ordering::Acquire))
    }

    pub fn set_run_result_status(&self, status: RunResultStatus) {
        self.run_result_status.store(status as u8, Ordering::Release);
    }
}
