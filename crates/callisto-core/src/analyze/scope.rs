//! Scope-aware variable classification for a single cell.
//!
//! Walks a cell's AST with a scope stack and records, at the notebook
//! namespace level: names bound (`defs`), free names read (`refs`), names
//! deleted (`deleted_refs`), per-binding metadata, and import facts.

use rustc_hash::{FxHashMap, FxHashSet};
use rustpython_ast::{self as ast, Expr, Stmt};

use crate::variables::{BUILTINS, ImportData, Name, VariableData, VariableKind, is_local};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Module,
    Function,
    Class,
    Comprehension,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    defs: FxHashSet<Name>,
    /// Names declared `global` in this scope.
    globals: FxHashSet<Name>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            defs: FxHashSet::default(),
            globals: FxHashSet::default(),
        }
    }
}

/// Module-level binding facts extracted from one cell body.
#[derive(Debug, Default)]
pub struct ScopeAnalysis {
    pub defs: FxHashSet<Name>,
    pub refs: FxHashSet<Name>,
    pub deleted_refs: FxHashSet<Name>,
    pub variable_data: FxHashMap<Name, Vec<VariableData>>,
    pub imports: FxHashSet<ImportData>,
    pub imported_namespaces: FxHashSet<Name>,
    pub is_import_block: bool,
    pub is_coroutine: bool,
}

/// Analyze the top-level statements of a cell body.
pub fn analyze_scopes(body: &[Stmt]) -> ScopeAnalysis {
    let mut visitor = ScopedVisitor::new();
    for stmt in body {
        visitor.visit_top_level_stmt(stmt);
    }
    visitor.result.is_import_block =
        !body.is_empty() && body.iter().all(|s| matches!(s, Stmt::Import(_) | Stmt::ImportFrom(_)));
    visitor.result
}

struct ScopedVisitor {
    scopes: Vec<Scope>,
    result: ScopeAnalysis,
    /// Nesting depth of deferred-evaluation scopes (functions and lambdas).
    function_depth: usize,
    /// True while walking an annotation expression.
    in_annotation: bool,
    // Per-top-level-statement accumulators.
    stmt_required: FxHashSet<Name>,
    stmt_unbounded: FxHashSet<Name>,
    stmt_annotations: FxHashSet<Name>,
    stmt_bindings: Vec<(Name, VariableKind, Option<ImportData>)>,
}

impl ScopedVisitor {
    fn new() -> Self {
        Self {
            scopes: vec![Scope::new(ScopeKind::Module)],
            result: ScopeAnalysis::default(),
            function_depth: 0,
            in_annotation: false,
            stmt_required: FxHashSet::default(),
            stmt_unbounded: FxHashSet::default(),
            stmt_annotations: FxHashSet::default(),
            stmt_bindings: Vec::new(),
        }
    }

    fn visit_top_level_stmt(&mut self, stmt: &Stmt) {
        self.stmt_required.clear();
        self.stmt_unbounded.clear();
        self.stmt_annotations.clear();
        self.stmt_bindings.clear();

        self.visit_stmt(stmt);

        // Materialize per-binding metadata for everything this statement
        // bound at the namespace level.
        let bindings = std::mem::take(&mut self.stmt_bindings);
        for (name, kind, import_data) in bindings {
            let mut data = VariableData::new(kind);
            data.required_refs = self.stmt_required.clone();
            data.unbounded_refs = self.stmt_unbounded.clone();
            data.annotation_refs = self.stmt_annotations.clone();
            data.import_data = import_data;
            self.result.variable_data.entry(name).or_default().push(data);
        }
    }

    // ------------------------------------------------------------------
    // Name resolution

    /// Resolve a loaded name against the scope stack. Unresolved, non-builtin
    /// names become refs of the cell (unless cell-local).
    fn load_name(&mut self, name: &str) {
        let top = self.scopes.len() - 1;
        let mut forced_global = false;
        for i in (0..self.scopes.len()).rev() {
            let scope = &self.scopes[i];
            // Class scopes are invisible to nested scopes.
            if scope.kind == ScopeKind::Class && i != top {
                continue;
            }
            if scope.globals.contains(name) {
                forced_global = true;
                break;
            }
            if scope.defs.contains(name) {
                if i == 0 {
                    // Bound earlier in this cell: a dependency of the current
                    // statement but not a free ref of the cell.
                    self.record_required(name);
                }
                return;
            }
        }
        if forced_global && self.scopes[0].defs.contains(name) {
            self.record_required(name);
            return;
        }
        if BUILTINS.contains(name) {
            return;
        }
        self.record_required(name);
        if self.function_depth > 0 {
            self.stmt_unbounded.insert(name.to_string());
        }
        if !is_local(name) {
            self.result.refs.insert(name.to_string());
        }
    }

    fn record_required(&mut self, name: &str) {
        self.stmt_required.insert(name.to_string());
        if self.in_annotation {
            self.stmt_annotations.insert(name.to_string());
        }
    }

    fn declared_global(&self, name: &str) -> bool {
        self.scopes[1..].iter().any(|s| s.globals.contains(name))
    }

    /// Bind a name in the current scope (or at module scope if declared
    /// global), recording namespace-level defs.
    fn bind(&mut self, name: &str, kind: VariableKind, import_data: Option<ImportData>) {
        let target = if self.declared_global(name) {
            0
        } else {
            self.scopes.len() - 1
        };
        self.scopes[target].defs.insert(name.to_string());
        if target == 0 && !is_local(name) {
            self.result.defs.insert(name.to_string());
            self.stmt_bindings.push((name.to_string(), kind, import_data));
        }
    }

    fn bind_target(&mut self, target: &Expr, kind: VariableKind) {
        match target {
            Expr::Name(name) => self.bind(name.id.as_str(), kind, None),
            Expr::Tuple(tuple) => {
                for elt in &tuple.elts {
                    self.bind_target(elt, kind);
                }
            }
            Expr::List(list) => {
                for elt in &list.elts {
                    self.bind_target(elt, kind);
                }
            }
            Expr::Starred(starred) => self.bind_target(&starred.value, kind),
            // Attribute/subscript stores mutate an existing object: the base
            // is a read, not a binding.
            other => self.visit_expr(other),
        }
    }

    // ------------------------------------------------------------------
    // Statements

    fn visit_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::FunctionDef(def) => self.visit_function(
                def.name.as_str(),
                &def.args,
                &def.body,
                &def.decorator_list,
                def.returns.as_deref(),
            ),
            Stmt::AsyncFunctionDef(def) => self.visit_function(
                def.name.as_str(),
                &def.args,
                &def.body,
                &def.decorator_list,
                def.returns.as_deref(),
            ),
            Stmt::ClassDef(def) => {
                for decorator in &def.decorator_list {
                    self.visit_expr(decorator);
                }
                for base in &def.bases {
                    self.visit_expr(base);
                }
                for keyword in &def.keywords {
                    self.visit_expr(&keyword.value);
                }
                self.bind(def.name.as_str(), VariableKind::Class, None);
                self.scopes.push(Scope::new(ScopeKind::Class));
                self.visit_stmts(&def.body);
                self.scopes.pop();
            }
            Stmt::Assign(assign) => {
                self.visit_expr(&assign.value);
                for target in &assign.targets {
                    self.bind_target(target, VariableKind::Variable);
                }
            }
            Stmt::AugAssign(aug) => {
                self.visit_expr(&aug.value);
                // An augmented target is read before it is rebound.
                if let Expr::Name(name) = aug.target.as_ref() {
                    self.load_name(name.id.as_str());
                    self.bind(name.id.as_str(), VariableKind::Variable, None);
                } else {
                    self.visit_expr(&aug.target);
                }
            }
            Stmt::AnnAssign(ann) => {
                self.visit_annotation(&ann.annotation);
                if let Some(value) = &ann.value {
                    self.visit_expr(value);
                }
                self.bind_target(&ann.target, VariableKind::Variable);
            }
            Stmt::Return(ret) => {
                if let Some(value) = &ret.value {
                    self.visit_expr(value);
                }
            }
            Stmt::Delete(del) => {
                for target in &del.targets {
                    self.visit_delete_target(target);
                }
            }
            Stmt::For(stmt) => {
                self.visit_expr(&stmt.iter);
                self.bind_target(&stmt.target, VariableKind::Variable);
                self.visit_stmts(&stmt.body);
                self.visit_stmts(&stmt.orelse);
            }
            Stmt::AsyncFor(stmt) => {
                self.note_await();
                self.visit_expr(&stmt.iter);
                self.bind_target(&stmt.target, VariableKind::Variable);
                self.visit_stmts(&stmt.body);
                self.visit_stmts(&stmt.orelse);
            }
            Stmt::While(stmt) => {
                self.visit_expr(&stmt.test);
                self.visit_stmts(&stmt.body);
                self.visit_stmts(&stmt.orelse);
            }
            Stmt::If(stmt) => {
                self.visit_expr(&stmt.test);
                self.visit_stmts(&stmt.body);
                self.visit_stmts(&stmt.orelse);
            }
            Stmt::With(stmt) => {
                for item in &stmt.items {
                    self.visit_expr(&item.context_expr);
                    if let Some(vars) = &item.optional_vars {
                        self.bind_target(vars, VariableKind::Variable);
                    }
                }
                self.visit_stmts(&stmt.body);
            }
            Stmt::AsyncWith(stmt) => {
                self.note_await();
                for item in &stmt.items {
                    self.visit_expr(&item.context_expr);
                    if let Some(vars) = &item.optional_vars {
                        self.bind_target(vars, VariableKind::Variable);
                    }
                }
                self.visit_stmts(&stmt.body);
            }
            Stmt::Raise(stmt) => {
                if let Some(exc) = &stmt.exc {
                    self.visit_expr(exc);
                }
                if let Some(cause) = &stmt.cause {
                    self.visit_expr(cause);
                }
            }
            Stmt::Try(stmt) => {
                self.visit_stmts(&stmt.body);
                for handler in &stmt.handlers {
                    self.visit_except_handler(handler);
                }
                self.visit_stmts(&stmt.orelse);
                self.visit_stmts(&stmt.finalbody);
            }
            Stmt::TryStar(stmt) => {
                self.visit_stmts(&stmt.body);
                for handler in &stmt.handlers {
                    self.visit_except_handler(handler);
                }
                self.visit_stmts(&stmt.orelse);
                self.visit_stmts(&stmt.finalbody);
            }
            Stmt::Assert(stmt) => {
                self.visit_expr(&stmt.test);
                if let Some(msg) = &stmt.msg {
                    self.visit_expr(msg);
                }
            }
            Stmt::Import(import) => {
                for alias in &import.names {
                    self.visit_import_alias(alias);
                }
            }
            Stmt::ImportFrom(import) => {
                let module = import.module.as_ref().map(|m| m.as_str()).unwrap_or("");
                let level = import.level.as_ref().map_or(0, |l| l.to_u32());
                for alias in &import.names {
                    self.visit_import_from_alias(module, level, alias);
                }
            }
            Stmt::Global(stmt) => {
                let scope = self.scopes.last_mut().expect("scope stack is never empty");
                for name in &stmt.names {
                    scope.globals.insert(name.as_str().to_string());
                }
            }
            Stmt::Nonlocal(_) => {}
            Stmt::Expr(stmt) => self.visit_expr(&stmt.value),
            Stmt::Match(stmt) => {
                self.visit_expr(&stmt.subject);
                for case in &stmt.cases {
                    self.visit_pattern(&case.pattern);
                    if let Some(guard) = &case.guard {
                        self.visit_expr(guard);
                    }
                    self.visit_stmts(&case.body);
                }
            }
            // pass, break, continue, and other statements that bind nothing
            _ => {}
        }
    }

    fn visit_delete_target(&mut self, target: &Expr) {
        match target {
            Expr::Name(name) => {
                let name = name.id.as_str();
                let module_scope = self.scopes.len() == 1;
                if module_scope && self.scopes[0].defs.contains(name) {
                    // Deleting a name this cell bound: the binding goes away.
                    self.scopes[0].defs.remove(name);
                    self.result.defs.remove(name);
                    self.result.variable_data.remove(name);
                    self.stmt_bindings.retain(|(n, _, _)| n != name);
                } else if module_scope && !is_local(name) {
                    // Deleting a name bound elsewhere: both a read and a
                    // deletion visible to the graph.
                    self.load_name(name);
                    self.result.deleted_refs.insert(name.to_string());
                } else if !module_scope {
                    self.load_name(name);
                }
            }
            Expr::Tuple(tuple) => {
                for elt in &tuple.elts {
                    self.visit_delete_target(elt);
                }
            }
            other => self.visit_expr(other),
        }
    }

    fn visit_except_handler(&mut self, handler: &ast::ExceptHandler) {
        let ast::ExceptHandler::ExceptHandler(handler) = handler;
        if let Some(type_) = &handler.type_ {
            self.visit_expr(type_);
        }
        if let Some(name) = &handler.name {
            self.bind(name.as_str(), VariableKind::Variable, None);
        }
        self.visit_stmts(&handler.body);
    }

    fn visit_import_alias(&mut self, alias: &ast::Alias) {
        let module = alias.name.as_str();
        let namespace = module.split('.').next().unwrap_or(module);
        self.result.imported_namespaces.insert(namespace.to_string());

        let definition = alias
            .asname
            .as_ref()
            .map(|n| n.as_str())
            .unwrap_or(namespace);
        let import_data = ImportData {
            definition: definition.to_string(),
            imported_symbol: None,
            module: module.to_string(),
            import_level: None,
        };
        if self.scopes.len() == 1 {
            self.result.imports.insert(import_data.clone());
        }
        self.bind(definition, VariableKind::Import, Some(import_data));
    }

    fn visit_import_from_alias(&mut self, module: &str, level: u32, alias: &ast::Alias) {
        let symbol = alias.name.as_str();
        if symbol == "*" {
            return;
        }
        if !module.is_empty() {
            let namespace = module.split('.').next().unwrap_or(module);
            self.result.imported_namespaces.insert(namespace.to_string());
        }
        let definition = alias.asname.as_ref().map(|n| n.as_str()).unwrap_or(symbol);
        let imported_symbol = if module.is_empty() {
            symbol.to_string()
        } else {
            format!("{module}.{symbol}")
        };
        let import_data = ImportData {
            definition: definition.to_string(),
            imported_symbol: Some(imported_symbol),
            module: module.to_string(),
            import_level: Some(level),
        };
        if self.scopes.len() == 1 {
            self.result.imports.insert(import_data.clone());
        }
        self.bind(definition, VariableKind::Import, Some(import_data));
    }

    fn visit_function(
        &mut self,
        name: &str,
        args: &ast::Arguments,
        body: &[Stmt],
        decorator_list: &[Expr],
        returns: Option<&Expr>,
    ) {
        for decorator in decorator_list {
            self.visit_expr(decorator);
        }
        // Defaults are evaluated in the enclosing scope at definition time.
        self.visit_arg_defaults(args);
        self.visit_arg_annotations(args);
        if let Some(returns) = returns {
            self.visit_annotation(returns);
        }

        self.bind(name, VariableKind::Function, None);

        self.scopes.push(Scope::new(ScopeKind::Function));
        self.function_depth += 1;
        self.bind_params(args);
        self.visit_stmts(body);
        self.function_depth -= 1;
        self.scopes.pop();
    }

    fn visit_arg_defaults(&mut self, args: &ast::Arguments) {
        for arg in args.posonlyargs.iter().chain(&args.args).chain(&args.kwonlyargs) {
            if let Some(default) = &arg.default {
                self.visit_expr(default);
            }
        }
    }

    fn visit_arg_annotations(&mut self, args: &ast::Arguments) {
        for arg in args.posonlyargs.iter().chain(&args.args).chain(&args.kwonlyargs) {
            if let Some(annotation) = &arg.def.annotation {
                self.visit_annotation(annotation);
            }
        }
        for arg in args.vararg.iter().chain(args.kwarg.iter()) {
            if let Some(annotation) = &arg.annotation {
                self.visit_annotation(annotation);
            }
        }
    }

    fn bind_params(&mut self, args: &ast::Arguments) {
        for arg in args.posonlyargs.iter().chain(&args.args).chain(&args.kwonlyargs) {
            let scope = self.scopes.last_mut().expect("scope stack is never empty");
            scope.defs.insert(arg.def.arg.as_str().to_string());
        }
        for arg in args.vararg.iter().chain(args.kwarg.iter()) {
            let scope = self.scopes.last_mut().expect("scope stack is never empty");
            scope.defs.insert(arg.arg.as_str().to_string());
        }
    }

    fn visit_annotation(&mut self, annotation: &Expr) {
        let was_in_annotation = self.in_annotation;
        self.in_annotation = true;
        // String-form forward references are parsed back into expressions.
        if let Expr::Constant(constant) = annotation
            && let ast::Constant::Str(value) = &constant.value
        {
            use rustpython_parser::Parse;
            if let Ok(expr) = ast::Expr::parse(value, "<annotation>") {
                self.visit_expr(&expr);
            }
        } else {
            self.visit_expr(annotation);
        }
        self.in_annotation = was_in_annotation;
    }

    fn visit_pattern(&mut self, pattern: &ast::Pattern) {
        match pattern {
            ast::Pattern::MatchValue(p) => self.visit_expr(&p.value),
            ast::Pattern::MatchSingleton(_) => {}
            ast::Pattern::MatchSequence(p) => {
                for pattern in &p.patterns {
                    self.visit_pattern(pattern);
                }
            }
            ast::Pattern::MatchMapping(p) => {
                for key in &p.keys {
                    self.visit_expr(key);
                }
                for pattern in &p.patterns {
                    self.visit_pattern(pattern);
                }
                if let Some(rest) = &p.rest {
                    self.bind(rest.as_str(), VariableKind::Variable, None);
                }
            }
            ast::Pattern::MatchClass(p) => {
                self.visit_expr(&p.cls);
                for pattern in p.patterns.iter().chain(&p.kwd_patterns) {
                    self.visit_pattern(pattern);
                }
            }
            ast::Pattern::MatchStar(p) => {
                if let Some(name) = &p.name {
                    self.bind(name.as_str(), VariableKind::Variable, None);
                }
            }
            ast::Pattern::MatchAs(p) => {
                if let Some(pattern) = &p.pattern {
                    self.visit_pattern(pattern);
                }
                if let Some(name) = &p.name {
                    self.bind(name.as_str(), VariableKind::Variable, None);
                }
            }
            ast::Pattern::MatchOr(p) => {
                for pattern in &p.patterns {
                    self.visit_pattern(pattern);
                }
            }
        }
    }

    fn note_await(&mut self) {
        if self.function_depth == 0 {
            self.result.is_coroutine = true;
        }
    }

    // ------------------------------------------------------------------
    // Expressions

    fn visit_exprs<'a>(&mut self, exprs: impl IntoIterator<Item = &'a Expr>) {
        for expr in exprs {
            self.visit_expr(expr);
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Name(name) => {
                if matches!(name.ctx, ast::ExprContext::Load) {
                    self.load_name(name.id.as_str());
                }
            }
            Expr::Lambda(lambda) => {
                self.visit_arg_defaults(&lambda.args);
                self.scopes.push(Scope::new(ScopeKind::Function));
                self.function_depth += 1;
                self.bind_params(&lambda.args);
                self.visit_expr(&lambda.body);
                self.function_depth -= 1;
                self.scopes.pop();
            }
            Expr::NamedExpr(named) => {
                self.visit_expr(&named.value);
                // A walrus target skips comprehension and class scopes.
                if let Expr::Name(name) = named.target.as_ref() {
                    self.bind_walrus(name.id.as_str());
                }
            }
            Expr::ListComp(comp) => self.visit_comprehension(&comp.generators, &[&comp.elt]),
            Expr::SetComp(comp) => self.visit_comprehension(&comp.generators, &[&comp.elt]),
            Expr::GeneratorExp(comp) => self.visit_comprehension(&comp.generators, &[&comp.elt]),
            Expr::DictComp(comp) => {
                self.visit_comprehension(&comp.generators, &[&comp.key, &comp.value]);
            }
            Expr::Await(await_expr) => {
                self.note_await();
                self.visit_expr(&await_expr.value);
            }
            Expr::Call(call) => {
                self.visit_expr(&call.func);
                self.visit_exprs(&call.args);
                for keyword in &call.keywords {
                    self.visit_expr(&keyword.value);
                }
            }
            Expr::Attribute(attr) => self.visit_expr(&attr.value),
            Expr::Subscript(sub) => {
                self.visit_expr(&sub.value);
                self.visit_expr(&sub.slice);
            }
            Expr::BoolOp(op) => self.visit_exprs(&op.values),
            Expr::BinOp(op) => {
                self.visit_expr(&op.left);
                self.visit_expr(&op.right);
            }
            Expr::UnaryOp(op) => self.visit_expr(&op.operand),
            Expr::IfExp(ifexp) => {
                self.visit_expr(&ifexp.test);
                self.visit_expr(&ifexp.body);
                self.visit_expr(&ifexp.orelse);
            }
            Expr::Dict(dict) => {
                self.visit_exprs(dict.keys.iter().flatten());
                self.visit_exprs(&dict.values);
            }
            Expr::Set(set) => self.visit_exprs(&set.elts),
            Expr::Compare(cmp) => {
                self.visit_expr(&cmp.left);
                self.visit_exprs(&cmp.comparators);
            }
            Expr::Starred(starred) => self.visit_expr(&starred.value),
            Expr::List(list) => self.visit_exprs(&list.elts),
            Expr::Tuple(tuple) => self.visit_exprs(&tuple.elts),
            Expr::Slice(slice) => {
                self.visit_exprs(
                    slice
                        .lower
                        .iter()
                        .chain(&slice.upper)
                        .chain(&slice.step)
                        .map(|e| e.as_ref()),
                );
            }
            Expr::JoinedStr(joined) => self.visit_exprs(&joined.values),
            Expr::FormattedValue(formatted) => {
                self.visit_expr(&formatted.value);
                if let Some(spec) = &formatted.format_spec {
                    self.visit_expr(spec);
                }
            }
            Expr::Yield(yield_expr) => {
                if let Some(value) = &yield_expr.value {
                    self.visit_expr(value);
                }
            }
            Expr::YieldFrom(yield_from) => self.visit_expr(&yield_from.value),
            _ => {}
        }
    }

    fn bind_walrus(&mut self, name: &str) {
        let target = if self.declared_global(name) {
            0
        } else {
            self.scopes
                .iter()
                .rposition(|s| {
                    !matches!(s.kind, ScopeKind::Comprehension | ScopeKind::Class)
                })
                .unwrap_or(0)
        };
        self.scopes[target].defs.insert(name.to_string());
        if target == 0 && !is_local(name) {
            self.result.defs.insert(name.to_string());
            self.stmt_bindings
                .push((name.to_string(), VariableKind::Variable, None));
        }
    }

    fn visit_comprehension(&mut self, generators: &[ast::Comprehension], elts: &[&Expr]) {
        self.scopes.push(Scope::new(ScopeKind::Comprehension));
        for generator in generators {
            self.visit_expr(&generator.iter);
            self.bind_target(&generator.target, VariableKind::Variable);
            self.visit_exprs(&generator.ifs);
            if generator.is_async {
                self.note_await();
            }
        }
        for elt in elts {
            self.visit_expr(elt);
        }
        self.scopes.pop();
    }
}
