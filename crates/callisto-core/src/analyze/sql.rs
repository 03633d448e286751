//! Embedded-SQL analysis: statement harvesting from `.sql(...)`/`.execute(...)`
//! call-sites, definition/reference extraction, and hierarchical reference
//! matching (`catalog.schema.table`).

use rustc_hash::FxHashSet;
use rustpython_ast::{self as ast, Expr, Stmt};
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::variables::VariableKind;

/// A hierarchical name parsed from a SQL string: `a`, `a.b`, or `a.b.c`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SqlRef {
    parts: Vec<String>,
}

impl SqlRef {
    pub fn new(parts: Vec<String>) -> Self {
        debug_assert!(!parts.is_empty() && parts.len() <= 3);
        Self { parts }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// The dotted text of the reference.
    pub fn name(&self) -> String {
        self.parts.join(".")
    }

    /// Ref-path indices at which a definition of `kind` could sit.
    ///
    /// `a` resolves to any kind; `a.b` resolves to a table/view `b` or a
    /// schema/catalog `a`; `a.b.c` resolves to a table/view `c`, a schema
    /// `b`, or a catalog `a`.
    fn positions_for_kind(&self, kind: Option<VariableKind>) -> Vec<usize> {
        let n = self.parts.len();
        if n == 1 {
            return vec![0];
        }
        match kind {
            Some(VariableKind::Table) | Some(VariableKind::View) => vec![n - 1],
            Some(VariableKind::Schema) => vec![n - 2],
            Some(VariableKind::Catalog) => vec![0],
            Some(_) => vec![],
            // Unknown kind: any resolvable position.
            None => (0..n).collect(),
        }
    }

    /// Whether this ref resolves to the given definition, considering the
    /// definition's own qualified form (`FROM s.t` does not match a table
    /// `t` created as `s2.t`).
    pub fn matches_hierarchical_ref(
        &self,
        target_name: &str,
        target_qualified_name: &str,
        kind: Option<VariableKind>,
    ) -> bool {
        let qualified: Vec<&str> = target_qualified_name.split('.').collect();
        for pos in self.positions_for_kind(kind) {
            if self.parts[pos] != target_name {
                continue;
            }
            // The qualified path must agree with the ref path where the two
            // overlap, aligned at the matched component.
            let compatible = qualified.iter().rev().enumerate().all(|(j, q)| {
                match pos.checked_sub(j) {
                    Some(i) => self.parts[i] == *q,
                    None => true,
                }
            });
            if compatible {
                return true;
            }
        }
        false
    }

    /// Whether `name` appears as a path component of this ref at a position
    /// consistent with `kind`. Used by the registry during edge computation.
    pub fn contains_hierarchical_ref(&self, name: &str, kind: VariableKind) -> bool {
        let n = self.parts.len();
        if n == 1 {
            return self.parts[0] == name;
        }
        match kind {
            VariableKind::Table | VariableKind::View => self.parts[n - 1] == name,
            VariableKind::Schema => self.parts[n - 2] == name,
            VariableKind::Catalog => self.parts[0] == name,
            _ => false,
        }
    }
}

/// A (possibly dotted) name introduced by a SQL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlDef {
    pub parts: Vec<String>,
    pub kind: VariableKind,
}

impl SqlDef {
    /// The unqualified definition name (last component).
    pub fn name(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or_default()
    }

    /// The full dotted form.
    pub fn qualified_name(&self) -> String {
        self.parts.join(".")
    }
}

/// Definitions and references extracted from one SQL statement.
#[derive(Debug, Default)]
pub struct SqlFacts {
    pub defs: Vec<SqlDef>,
    pub refs: Vec<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Statement harvesting from the Python AST

/// Collect SQL statement strings from `.sql(...)` / `.execute(...)` calls,
/// in source order. F-strings are rendered with quoted placeholders for
/// interpolations.
pub fn collect_sqls(body: &[Stmt]) -> Vec<String> {
    let mut sqls = Vec::new();
    for stmt in body {
        walk_stmt(stmt, &mut sqls);
    }
    sqls
}

/// Whether an expression is a `.sql(...)`/`.execute(...)` call carrying a
/// string (or f-string) statement.
pub fn sql_statement_of_call(expr: &Expr) -> Option<String> {
    let Expr::Call(call) = expr else {
        return None;
    };
    let Expr::Attribute(attr) = call.func.as_ref() else {
        return None;
    };
    if attr.attr.as_str() != "sql" && attr.attr.as_str() != "execute" {
        return None;
    }
    match call.args.first() {
        Some(Expr::Constant(constant)) => match &constant.value {
            ast::Constant::Str(value) => Some(value.clone()),
            _ => None,
        },
        Some(Expr::JoinedStr(joined)) => Some(normalize_sql_f_string(joined)),
        _ => None,
    }
}

/// Render an f-string to plain SQL, substituting a quoted placeholder for
/// each interpolation so the result stays tokenizable.
fn normalize_sql_f_string(joined: &ast::ExprJoinedStr) -> String {
    fn print_part(part: &Expr) -> String {
        match part {
            Expr::FormattedValue(_) => "'_'".to_string(),
            Expr::JoinedStr(nested) => normalize_sql_f_string(nested),
            Expr::Constant(constant) => match &constant.value {
                ast::Constant::Str(value) => value.clone(),
                _ => "'_'".to_string(),
            },
            _ => "'_'".to_string(),
        }
    }
    let rendered: String = joined.values.iter().map(print_part).collect();
    rendered.replace("''", "'")
}

fn walk_stmt(stmt: &Stmt, sqls: &mut Vec<String>) {
    match stmt {
        Stmt::Expr(s) => walk_expr(&s.value, sqls),
        Stmt::Assign(s) => {
            walk_expr(&s.value, sqls);
            for target in &s.targets {
                walk_expr(target, sqls);
            }
        }
        Stmt::AnnAssign(s) => {
            if let Some(value) = &s.value {
                walk_expr(value, sqls);
            }
        }
        Stmt::AugAssign(s) => walk_expr(&s.value, sqls),
        Stmt::Return(s) => {
            if let Some(value) = &s.value {
                walk_expr(value, sqls);
            }
        }
        Stmt::If(s) => {
            walk_expr(&s.test, sqls);
            walk_stmts(&s.body, sqls);
            walk_stmts(&s.orelse, sqls);
        }
        Stmt::While(s) => {
            walk_expr(&s.test, sqls);
            walk_stmts(&s.body, sqls);
            walk_stmts(&s.orelse, sqls);
        }
        Stmt::For(s) => {
            walk_expr(&s.iter, sqls);
            walk_stmts(&s.body, sqls);
            walk_stmts(&s.orelse, sqls);
        }
        Stmt::AsyncFor(s) => {
            walk_expr(&s.iter, sqls);
            walk_stmts(&s.body, sqls);
            walk_stmts(&s.orelse, sqls);
        }
        Stmt::With(s) => {
            for item in &s.items {
                walk_expr(&item.context_expr, sqls);
            }
            walk_stmts(&s.body, sqls);
        }
        Stmt::AsyncWith(s) => {
            for item in &s.items {
                walk_expr(&item.context_expr, sqls);
            }
            walk_stmts(&s.body, sqls);
        }
        Stmt::FunctionDef(s) => walk_stmts(&s.body, sqls),
        Stmt::AsyncFunctionDef(s) => walk_stmts(&s.body, sqls),
        Stmt::ClassDef(s) => walk_stmts(&s.body, sqls),
        Stmt::Try(s) => {
            walk_stmts(&s.body, sqls);
            for handler in &s.handlers {
                let ast::ExceptHandler::ExceptHandler(handler) = handler;
                walk_stmts(&handler.body, sqls);
            }
            walk_stmts(&s.orelse, sqls);
            walk_stmts(&s.finalbody, sqls);
        }
        _ => {}
    }
}

fn walk_stmts(stmts: &[Stmt], sqls: &mut Vec<String>) {
    for stmt in stmts {
        walk_stmt(stmt, sqls);
    }
}

fn walk_expr(expr: &Expr, sqls: &mut Vec<String>) {
    if let Some(sql) = sql_statement_of_call(expr) {
        sqls.push(sql);
    }
    match expr {
        Expr::Call(call) => {
            walk_expr(&call.func, sqls);
            for arg in &call.args {
                walk_expr(arg, sqls);
            }
            for keyword in &call.keywords {
                walk_expr(&keyword.value, sqls);
            }
        }
        Expr::Attribute(attr) => walk_expr(&attr.value, sqls),
        Expr::BinOp(op) => {
            walk_expr(&op.left, sqls);
            walk_expr(&op.right, sqls);
        }
        Expr::BoolOp(op) => {
            for value in &op.values {
                walk_expr(value, sqls);
            }
        }
        Expr::UnaryOp(op) => walk_expr(&op.operand, sqls),
        Expr::IfExp(ifexp) => {
            walk_expr(&ifexp.test, sqls);
            walk_expr(&ifexp.body, sqls);
            walk_expr(&ifexp.orelse, sqls);
        }
        Expr::Tuple(t) => {
            for elt in &t.elts {
                walk_expr(elt, sqls);
            }
        }
        Expr::List(l) => {
            for elt in &l.elts {
                walk_expr(elt, sqls);
            }
        }
        Expr::Subscript(sub) => {
            walk_expr(&sub.value, sqls);
            walk_expr(&sub.slice, sqls);
        }
        Expr::Await(a) => walk_expr(&a.value, sqls),
        Expr::Starred(s) => walk_expr(&s.value, sqls),
        Expr::NamedExpr(n) => walk_expr(&n.value, sqls),
        _ => {}
    }
}

/// Whether a cell should carry the `sql` language tag: every significant
/// top-level statement is a SQL call (bare or assigned).
pub fn is_sql_only(body: &[Stmt]) -> bool {
    if body.is_empty() {
        return false;
    }
    body.iter().all(|stmt| match stmt {
        Stmt::Expr(s) => sql_statement_of_call(&s.value).is_some(),
        Stmt::Assign(s) => sql_statement_of_call(&s.value).is_some(),
        Stmt::AnnAssign(s) => s
            .value
            .as_ref()
            .is_some_and(|v| sql_statement_of_call(v).is_some()),
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// SQL statement analysis

/// Extract definitions and table references from one SQL statement.
///
/// Works on the token stream rather than a parse tree so that partial
/// statements and engine-specific forms (`FROM t SELECT ...`) still yield
/// useful facts.
pub fn analyze_sql_statement(sql: &str) -> SqlFacts {
    let dialect = GenericDialect {};
    let Ok(tokens) = Tokenizer::new(&dialect, sql).tokenize() else {
        return SqlFacts::default();
    };
    let tokens: Vec<Token> = tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .collect();

    let mut facts = SqlFacts::default();
    let mut cte_names: FxHashSet<String> = FxHashSet::default();
    let mut i = 0;

    while i < tokens.len() {
        match keyword_at(&tokens, i) {
            Some(Keyword::CREATE) => {
                i += 1;
                if keyword_at(&tokens, i) == Some(Keyword::OR)
                    && keyword_at(&tokens, i + 1) == Some(Keyword::REPLACE)
                {
                    i += 2;
                }
                if matches!(
                    keyword_at(&tokens, i),
                    Some(Keyword::TEMP) | Some(Keyword::TEMPORARY)
                ) {
                    i += 1;
                }
                let kind = match keyword_at(&tokens, i) {
                    Some(Keyword::TABLE) => Some(VariableKind::Table),
                    Some(Keyword::VIEW) => Some(VariableKind::View),
                    Some(Keyword::SCHEMA) => Some(VariableKind::Schema),
                    Some(Keyword::DATABASE) => Some(VariableKind::Catalog),
                    _ => None,
                };
                let Some(kind) = kind else {
                    continue;
                };
                i += 1;
                if keyword_at(&tokens, i) == Some(Keyword::IF)
                    && keyword_at(&tokens, i + 1) == Some(Keyword::NOT)
                    && keyword_at(&tokens, i + 2) == Some(Keyword::EXISTS)
                {
                    i += 3;
                }
                if let Some((parts, next)) = qualified_name_at(&tokens, i) {
                    facts.defs.push(SqlDef { parts, kind });
                    i = next;
                }
            }
            Some(Keyword::WITH) => {
                // Record CTE aliases so they are not reported as refs.
                i += 1;
                loop {
                    let Some(name) = word_at(&tokens, i) else {
                        break;
                    };
                    cte_names.insert(name);
                    i += 1;
                    // Optional column list before AS.
                    if matches!(tokens.get(i), Some(Token::LParen)) {
                        i = skip_parenthesized(&tokens, i);
                    }
                    if keyword_at(&tokens, i) != Some(Keyword::AS) {
                        break;
                    }
                    i += 1;
                    if matches!(tokens.get(i), Some(Token::LParen)) {
                        i = skip_parenthesized(&tokens, i);
                    }
                    if matches!(tokens.get(i), Some(Token::Comma)) {
                        i += 1;
                    } else {
                        break;
                    }
                }
            }
            Some(Keyword::FROM) | Some(Keyword::JOIN) | Some(Keyword::INTO)
            | Some(Keyword::UPDATE) => {
                i += 1;
                if let Some((parts, next)) = qualified_name_at(&tokens, i) {
                    // A name followed by `(` is a table function, not a ref.
                    if !matches!(tokens.get(next), Some(Token::LParen)) {
                        facts.refs.push(parts);
                    }
                    i = next;
                }
            }
            _ => i += 1,
        }
    }

    facts
        .refs
        .retain(|parts| !(parts.len() == 1 && cte_names.contains(&parts[0])));
    facts
}

fn keyword_at(tokens: &[Token], i: usize) -> Option<Keyword> {
    match tokens.get(i) {
        Some(Token::Word(word)) if word.keyword != Keyword::NoKeyword => Some(word.keyword),
        _ => None,
    }
}

fn word_at(tokens: &[Token], i: usize) -> Option<String> {
    match tokens.get(i) {
        Some(Token::Word(word)) => Some(word.value.clone()),
        _ => None,
    }
}

/// Read a possibly-dotted, possibly-quoted name starting at `i`. Returns the
/// components and the index just past the name.
fn qualified_name_at(tokens: &[Token], i: usize) -> Option<(Vec<String>, usize)> {
    let mut parts = vec![match tokens.get(i) {
        Some(Token::Word(word)) if word.keyword == Keyword::NoKeyword => word.value.clone(),
        _ => return None,
    }];
    let mut i = i + 1;
    while parts.len() < 3
        && matches!(tokens.get(i), Some(Token::Period))
        && let Some(Token::Word(word)) = tokens.get(i + 1)
    {
        parts.push(word.value.clone());
        i += 2;
    }
    Some((parts, i))
}

fn skip_parenthesized(tokens: &[Token], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i < tokens.len() {
        match tokens[i] {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustpython_parser::Parse;

    fn sqls_of(code: &str) -> Vec<String> {
        let body = ast::Suite::parse(code, "<test>").expect("test code parses");
        collect_sqls(&body)
    }

    #[test]
    fn test_collect_plain_string() {
        let sqls = sqls_of("mo.sql(\"SELECT * FROM t1\")");
        assert_eq!(sqls, vec!["SELECT * FROM t1"]);
    }

    #[test]
    fn test_collect_execute() {
        let sqls = sqls_of("conn.execute(\"CREATE TABLE t (i INTEGER)\")");
        assert_eq!(sqls, vec!["CREATE TABLE t (i INTEGER)"]);
    }

    #[test]
    fn test_collect_f_string_placeholder() {
        let sqls = sqls_of("df = mo.sql(f\"FROM df WHERE name = {name}\")");
        assert_eq!(sqls, vec!["FROM df WHERE name = '_'"]);
    }

    #[test]
    fn test_collect_nested_in_function() {
        let sqls = sqls_of("def q():\n    return db.sql(\"SELECT 1\")");
        assert_eq!(sqls, vec!["SELECT 1"]);
    }

    #[test]
    fn test_non_sql_calls_ignored() {
        assert!(sqls_of("mo.md(\"hello\")").is_empty());
        assert!(sqls_of("mo.sql(query)").is_empty());
    }

    #[test]
    fn test_create_table() {
        let facts = analyze_sql_statement("CREATE TABLE t1 (i INTEGER, j INTEGER)");
        assert_eq!(facts.defs.len(), 1);
        assert_eq!(facts.defs[0].name(), "t1");
        assert_eq!(facts.defs[0].kind, VariableKind::Table);
        assert_eq!(facts.defs[0].qualified_name(), "t1");
    }

    #[test]
    fn test_create_or_replace_temp_table() {
        let facts = analyze_sql_statement("CREATE OR REPLACE TEMP TABLE IF NOT EXISTS x (i INT)");
        assert_eq!(facts.defs[0].name(), "x");
    }

    #[test]
    fn test_create_dotted_table() {
        let facts = analyze_sql_statement("CREATE TABLE s.t (i INTEGER)");
        assert_eq!(facts.defs[0].name(), "t");
        assert_eq!(facts.defs[0].qualified_name(), "s.t");
    }

    #[test]
    fn test_create_quoted_table() {
        let facts = analyze_sql_statement("CREATE TABLE \"my table\" (i INTEGER)");
        assert_eq!(facts.defs[0].name(), "my table");
    }

    #[test]
    fn test_create_view_and_schema() {
        let facts = analyze_sql_statement("CREATE VIEW v AS SELECT * FROM t");
        assert_eq!(facts.defs[0].kind, VariableKind::View);
        assert_eq!(facts.refs, vec![vec!["t".to_string()]]);

        let facts = analyze_sql_statement("CREATE SCHEMA s");
        assert_eq!(facts.defs[0].kind, VariableKind::Schema);
    }

    #[test]
    fn test_from_first_select() {
        let facts = analyze_sql_statement("FROM s.t SELECT *");
        assert_eq!(facts.refs, vec![vec!["s".to_string(), "t".to_string()]]);
    }

    #[test]
    fn test_join_refs() {
        let facts = analyze_sql_statement("SELECT * FROM a JOIN b ON a.id = b.id");
        assert_eq!(
            facts.refs,
            vec![vec!["a".to_string()], vec!["b".to_string()]]
        );
    }

    #[test]
    fn test_cte_not_a_ref() {
        let facts =
            analyze_sql_statement("WITH tmp AS (SELECT * FROM base) SELECT * FROM tmp");
        assert_eq!(facts.refs, vec![vec!["base".to_string()]]);
    }

    #[test]
    fn test_table_function_not_a_ref() {
        let facts = analyze_sql_statement("SELECT * FROM read_csv('data.csv')");
        assert!(facts.refs.is_empty());
    }

    #[test]
    fn test_sql_ref_single_matches_any() {
        let sql_ref = SqlRef::new(vec!["t".into()]);
        assert!(sql_ref.matches_hierarchical_ref("t", "t", None));
        assert!(sql_ref.matches_hierarchical_ref("t", "t", Some(VariableKind::Table)));
        assert!(!sql_ref.matches_hierarchical_ref("u", "u", None));
    }

    #[test]
    fn test_sql_ref_two_part_matching() {
        let sql_ref = SqlRef::new(vec!["s".into(), "t".into()]);
        assert!(sql_ref.matches_hierarchical_ref("t", "s.t", Some(VariableKind::Table)));
        assert!(sql_ref.matches_hierarchical_ref("s", "s", Some(VariableKind::Schema)));
        assert!(sql_ref.matches_hierarchical_ref("s", "s", Some(VariableKind::Catalog)));
        assert!(!sql_ref.matches_hierarchical_ref("t", "s2.t", Some(VariableKind::Table)));
    }

    #[test]
    fn test_sql_ref_three_part_matching() {
        let sql_ref = SqlRef::new(vec!["c".into(), "s".into(), "t".into()]);
        assert!(sql_ref.matches_hierarchical_ref("t", "c.s.t", Some(VariableKind::Table)));
        assert!(sql_ref.matches_hierarchical_ref("s", "s", Some(VariableKind::Schema)));
        assert!(sql_ref.matches_hierarchical_ref("c", "c", Some(VariableKind::Catalog)));
        assert!(!sql_ref.matches_hierarchical_ref("s", "s", Some(VariableKind::Catalog)));
    }

    #[test]
    fn test_contains_hierarchical_ref() {
        let sql_ref = SqlRef::new(vec!["s".into(), "t".into()]);
        assert!(sql_ref.contains_hierarchical_ref("t", VariableKind::Table));
        assert!(sql_ref.contains_hierarchical_ref("s", VariableKind::Schema));
        assert!(!sql_ref.contains_hierarchical_ref("t", VariableKind::Schema));
        assert!(!sql_ref.contains_hierarchical_ref("s", VariableKind::Variable));
    }

    #[test]
    fn test_is_sql_only() {
        let body = ast::Suite::parse("mo.sql(\"SELECT 1\")", "<t>").unwrap();
        assert!(is_sql_only(&body));
        let body = ast::Suite::parse("df = mo.sql(\"SELECT 1\")", "<t>").unwrap();
        assert!(is_sql_only(&body));
        let body = ast::Suite::parse("mo.sql(\"SELECT 1\")\nprint(1)", "<t>").unwrap();
        assert!(!is_sql_only(&body));
    }
}
