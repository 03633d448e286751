//! Name classification and binding metadata.

use std::sync::LazyLock;

use rustc_hash::FxHashSet;

/// A variable name at the notebook's shared namespace level.
pub type Name = String;

/// Python's builtin names plus the module-level dunders a notebook file sees.
/// Builtins never become refs.
pub static BUILTINS: LazyLock<FxHashSet<&'static str>> = LazyLock::new(|| {
    PYTHON_BUILTINS
        .iter()
        .copied()
        .chain(["__builtin__", "__file__", "__builtins__"])
        .collect()
});

/// Whether a name is cell-local: a single-underscore prefix hides a name from
/// the shared namespace. Dunder names (`__name__`) are global.
pub fn is_local(name: &str) -> bool {
    name.starts_with('_') && !is_dunder(name)
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// The dialect that produced a binding or reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Sql,
}

/// What kind of object a name is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Variable,
    Function,
    Class,
    Import,
    Table,
    View,
    Schema,
    Catalog,
}

impl VariableKind {
    /// SQL kinds live in a separate namespace from Python kinds.
    pub fn language(self) -> Language {
        match self {
            VariableKind::Table
            | VariableKind::View
            | VariableKind::Schema
            | VariableKind::Catalog => Language::Sql,
            _ => Language::Python,
        }
    }
}

/// Metadata about one binding of a name. A cell may rebind a name several
/// times; the last binding is canonical.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VariableData {
    pub kind: VariableKind,
    /// Names this binding's body depends on, including names bound elsewhere
    /// in the same cell and cell-local helpers.
    pub required_refs: FxHashSet<Name>,
    /// References that escape to closure scope (deferred evaluation).
    pub unbounded_refs: FxHashSet<Name>,
    /// Names referenced only from type annotations.
    pub annotation_refs: FxHashSet<Name>,
    /// Present when the binding was produced by an import statement.
    pub import_data: Option<ImportData>,
    /// Dotted form for SQL definitions, e.g. `catalog.schema.table`.
    pub qualified_name: Option<String>,
}

impl VariableData {
    pub fn new(kind: VariableKind) -> Self {
        Self {
            kind,
            required_refs: FxHashSet::default(),
            unbounded_refs: FxHashSet::default(),
            annotation_refs: FxHashSet::default(),
            import_data: None,
            qualified_name: None,
        }
    }

    pub fn language(&self) -> Language {
        self.kind.language()
    }
}

/// One import statement's contribution to the namespace.
///
/// Two values are equal iff all four fields are equal; that identity drives
/// the import-block carry-over optimization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ImportData {
    /// The name bound in the namespace (`foo` for `import foo.bar`, the
    /// alias when one is given).
    pub definition: Name,
    /// Fully-qualified symbol for `from` imports (`foo.bar.baz`), `None` for
    /// plain imports.
    pub imported_symbol: Option<String>,
    /// The module path as written (`foo.bar`).
    pub module: String,
    /// Relative-import level for `from` imports; `None` for plain imports.
    pub import_level: Option<u32>,
}

impl ImportData {
    /// The top-level module token (`foo` for `import foo.bar`).
    pub fn namespace(&self) -> &str {
        self.module.split('.').next().unwrap_or(&self.module)
    }
}

#[rustfmt::skip]
const PYTHON_BUILTINS: &[&str] = &[
    "abs", "aiter", "all", "anext", "any", "ascii", "bin", "bool",
    "breakpoint", "bytearray", "bytes", "callable", "chr", "classmethod",
    "compile", "complex", "copyright", "credits", "delattr", "dict", "dir",
    "divmod", "enumerate", "eval", "exec", "exit", "filter", "float",
    "format", "frozenset", "getattr", "globals", "hasattr", "hash", "help",
    "hex", "id", "input", "int", "isinstance", "issubclass", "iter", "len",
    "license", "list", "locals", "map", "max", "memoryview", "min", "next",
    "object", "oct", "open", "ord", "pow", "print", "property", "quit",
    "range", "repr", "reversed", "round", "set", "setattr", "slice",
    "sorted", "staticmethod", "str", "sum", "super", "tuple", "type",
    "vars", "zip",
    "ArithmeticError", "AssertionError", "AttributeError", "BaseException",
    "BaseExceptionGroup", "BlockingIOError", "BrokenPipeError",
    "BufferError", "BytesWarning", "ChildProcessError",
    "ConnectionAbortedError", "ConnectionError", "ConnectionRefusedError",
    "ConnectionResetError", "DeprecationWarning", "EOFError",
    "EncodingWarning", "EnvironmentError", "Exception", "ExceptionGroup",
    "FileExistsError", "FileNotFoundError", "FloatingPointError",
    "FutureWarning", "GeneratorExit", "IOError", "ImportError",
    "ImportWarning", "IndentationError", "IndexError", "InterruptedError",
    "IsADirectoryError", "KeyError", "KeyboardInterrupt", "LookupError",
    "MemoryError", "ModuleNotFoundError", "NameError",
    "NotADirectoryError", "NotImplemented", "NotImplementedError",
    "OSError", "OverflowError", "PendingDeprecationWarning",
    "PermissionError", "ProcessLookupError", "RecursionError",
    "ReferenceError", "ResourceWarning", "RuntimeError", "RuntimeWarning",
    "StopAsyncIteration", "StopIteration", "SyntaxError", "SyntaxWarning",
    "SystemError", "SystemExit", "TabError", "TimeoutError", "TypeError",
    "UnboundLocalError", "UnicodeDecodeError", "UnicodeEncodeError",
    "UnicodeError", "UnicodeTranslateError", "UnicodeWarning",
    "UserWarning", "ValueError", "Warning", "ZeroDivisionError",
    "Ellipsis", "True", "False", "None",
    "__name__", "__doc__", "__package__", "__loader__", "__spec__",
    "__build_class__", "__import__", "__debug__",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_names() {
        assert!(is_local("_x"));
        assert!(is_local("_"));
        assert!(is_local("__"));
        assert!(is_local("__mangled"));
        assert!(!is_local("x"));
        assert!(!is_local("__name__"));
        assert!(!is_local("__file__"));
    }

    #[test]
    fn test_builtins() {
        assert!(BUILTINS.contains("print"));
        assert!(BUILTINS.contains("__file__"));
        assert!(!BUILTINS.contains("numpy"));
    }

    #[test]
    fn test_import_data_namespace() {
        let data = ImportData {
            definition: "foo".into(),
            imported_symbol: None,
            module: "foo.bar".into(),
            import_level: None,
        };
        assert_eq!(data.namespace(), "foo");
    }

    #[test]
    fn test_import_data_identity() {
        let a = ImportData {
            definition: "foo".into(),
            imported_symbol: None,
            module: "foo".into(),
            import_level: None,
        };
        let b = ImportData {
            definition: "foo".into(),
            imported_symbol: None,
            module: "foo.bar".into(),
            import_level: None,
        };
        // Same definition, different module: distinct imports.
        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_language() {
        assert_eq!(VariableKind::Table.language(), Language::Sql);
        assert_eq!(VariableKind::Function.language(), Language::Python);
    }
}
