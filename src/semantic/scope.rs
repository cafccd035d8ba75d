//! Name-binding analysis: which names are locals, cells and free variables of
//! each function. Class bodies are skipped when resolving free variables of
//! their methods.

use std::collections::{HashMap, HashSet};

use crate::parser::ast::{Arg, Expr, ExprS, NodeId, Param, Stmt, StmtS};

#[derive(Debug, Clone, Default)]
pub struct FunctionScope {
    pub params: Vec<String>,
    /// Non-parameter locals in first-binding order.
    pub locals: Vec<String>,
    pub globals: HashSet<String>,
    pub nonlocals: HashSet<String>,
    /// Locals (or params) captured by a nested function.
    pub cells: HashSet<String>,
    /// Names captured from an enclosing function, in first-use order.
    pub frees: Vec<String>,
    pub parent: Option<NodeId>,
}

impl FunctionScope {
    pub fn is_local(&self, name: &str) -> bool {
        !self.globals.contains(name)
            && !self.nonlocals.contains(name)
            && (self.params.iter().any(|p| p == name) || self.locals.iter().any(|l| l == name))
    }

    pub fn is_captured(&self, name: &str) -> bool {
        self.cells.contains(name)
    }

    pub fn is_free(&self, name: &str) -> bool {
        self.frees.iter().any(|f| f == name)
    }

    fn bind(&mut self, name: &str) {
        if !self.params.iter().any(|p| p == name) && !self.locals.iter().any(|l| l == name) {
            self.locals.push(name.to_string());
        }
    }
}

#[derive(Debug, Default)]
pub struct ScopeTree {
    /// Keyed by the `def` statement or lambda expression id.
    pub functions: HashMap<NodeId, FunctionScope>,
    /// Names bound at module level (including class bodies' enclosing module).
    pub module_names: HashSet<String>,
}

impl ScopeTree {
    pub fn function(&self, id: NodeId) -> Option<&FunctionScope> {
        self.functions.get(&id)
    }
}

pub fn analyze_scopes(program: &[StmtS]) -> ScopeTree {
    let mut tree = ScopeTree::default();
    let mut collector = Collector {
        tree: &mut tree,
        stack: Vec::new(),
        uses: HashMap::new(),
    };
    for stmt in program {
        collector.stmt(stmt);
    }
    let uses = std::mem::take(&mut collector.uses);
    resolve_free_variables(&mut tree, uses);
    tree
}

struct Collector<'a> {
    tree: &'a mut ScopeTree,
    /// Enclosing function ids; empty at module and class level.
    stack: Vec<NodeId>,
    uses: HashMap<NodeId, Vec<String>>,
}

impl Collector<'_> {
    fn current(&mut self) -> Option<&mut FunctionScope> {
        let id = *self.stack.last()?;
        self.tree.functions.get_mut(&id)
    }

    fn bind(&mut self, name: &str) {
        match self.current() {
            Some(scope) => scope.bind(name),
            None => {
                self.tree.module_names.insert(name.to_string());
            }
        }
    }

    fn use_name(&mut self, name: &str) {
        if let Some(&id) = self.stack.last() {
            self.uses.entry(id).or_default().push(name.to_string());
        }
    }

    fn enter_function(&mut self, id: NodeId, params: &[Param]) {
        let scope = FunctionScope {
            params: params.iter().map(|p| p.name.clone()).collect(),
            parent: self.stack.last().copied(),
            ..Default::default()
        };
        self.tree.functions.insert(id, scope);
        self.stack.push(id);
    }

    fn block(&mut self, block: &[StmtS]) {
        for s in block {
            self.stmt(s);
        }
    }

    fn target(&mut self, target: &ExprS) {
        match &target.node {
            Expr::Name(n) => self.bind(n),
            Expr::Tuple(items) | Expr::List(items) => {
                for i in items {
                    self.target(i);
                }
            }
            _ => self.expr(target),
        }
    }

    fn stmt(&mut self, stmt: &StmtS) {
        match &stmt.node {
            Stmt::Expr(e) => self.expr(e),
            Stmt::Assign { targets, value } => {
                self.expr(value);
                for t in targets {
                    self.target(t);
                }
            }
            Stmt::AnnAssign { target, value, .. } => {
                if let Some(v) = value {
                    self.expr(v);
                }
                self.target(target);
            }
            Stmt::AugAssign { target, value, .. } => {
                self.expr(value);
                if let Expr::Name(n) = &target.node {
                    self.use_name(n);
                }
                self.target(target);
            }
            Stmt::Return(e) | Stmt::Raise(e) => {
                if let Some(e) = e {
                    self.expr(e);
                }
            }
            Stmt::Del(targets) => {
                for t in targets {
                    self.target(t);
                }
            }
            Stmt::Assert { test, msg } => {
                self.expr(test);
                if let Some(m) = msg {
                    self.expr(m);
                }
            }
            Stmt::Pass | Stmt::Break | Stmt::Continue => {}
            Stmt::Global(names) => {
                for n in names {
                    self.tree.module_names.insert(n.clone());
                }
                if let Some(scope) = self.current() {
                    scope.globals.extend(names.iter().cloned());
                }
            }
            Stmt::Nonlocal(names) => {
                if let Some(scope) = self.current() {
                    scope.nonlocals.extend(names.iter().cloned());
                }
                for n in names {
                    self.use_name(n);
                }
            }
            Stmt::Import(aliases) => {
                for a in aliases {
                    self.bind(a.bound_name());
                }
            }
            Stmt::ImportFrom { names, .. } => {
                for a in names.iter().filter(|a| a.name != "*") {
                    self.bind(a.bound_name());
                }
            }
            Stmt::If {
                condition,
                then_block,
                elif_blocks,
                else_block,
            } => {
                self.expr(condition);
                self.block(then_block);
                for (c, b) in elif_blocks {
                    self.expr(c);
                    self.block(b);
                }
                if let Some(b) = else_block {
                    self.block(b);
                }
            }
            Stmt::While { condition, body } => {
                self.expr(condition);
                self.block(body);
            }
            Stmt::For {
                target,
                iterable,
                body,
            } => {
                self.expr(iterable);
                self.target(target);
                self.block(body);
            }
            Stmt::Try {
                body,
                handlers,
                finally,
            } => {
                self.block(body);
                for h in handlers {
                    if let Some(t) = &h.exc_type {
                        self.expr(t);
                    }
                    if let Some(n) = &h.name {
                        self.bind(n);
                    }
                    self.block(&h.body);
                }
                if let Some(f) = finally {
                    self.block(f);
                }
            }
            Stmt::Def(def) => {
                for d in &def.decorators {
                    self.expr(d);
                }
                self.param_exprs(&def.params);
                if let Some(r) = &def.returns {
                    self.expr(r);
                }
                self.bind(&def.name);
                self.enter_function(stmt.id, &def.params);
                self.block(&def.body);
                self.stack.pop();
            }
            Stmt::Class(class) => {
                for d in &class.decorators {
                    self.expr(d);
                }
                for b in &class.bases {
                    self.expr(b);
                }
                self.bind(&class.name);
                // class-level names are attributes, not variables of any
                // function scope
                let saved = std::mem::take(&mut self.stack);
                let enclosing = saved.last().copied();
                for s in &class.body {
                    match &s.node {
                        Stmt::Def(_) => {
                            self.stack = enclosing.into_iter().collect();
                            self.stmt_without_binding(s);
                        }
                        _ => {
                            self.stack = Vec::new();
                            self.class_level_stmt(s);
                        }
                    }
                }
                self.stack = saved;
            }
        }
    }

    /// A method definition: registered as a function scope but its name is a
    /// class attribute.
    fn stmt_without_binding(&mut self, stmt: &StmtS) {
        if let Stmt::Def(def) = &stmt.node {
            for d in &def.decorators {
                self.expr(d);
            }
            self.param_exprs(&def.params);
            if let Some(r) = &def.returns {
                self.expr(r);
            }
            self.enter_function(stmt.id, &def.params);
            self.block(&def.body);
            self.stack.pop();
        }
    }

    fn class_level_stmt(&mut self, stmt: &StmtS) {
        match &stmt.node {
            Stmt::Assign { value, .. } => self.expr(value),
            Stmt::AnnAssign { value: Some(v), .. } => self.expr(v),
            Stmt::Expr(e) => self.expr(e),
            Stmt::Class(_) => self.stmt(stmt),
            _ => {}
        }
    }

    fn param_exprs(&mut self, params: &[Param]) {
        for p in params {
            if let Some(d) = &p.default {
                self.expr(d);
            }
        }
    }

    fn expr(&mut self, expr: &ExprS) {
        match &expr.node {
            Expr::Literal(_) => {}
            Expr::Name(n) => self.use_name(n),
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::BoolOp { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::IfExp { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            Expr::Call { func, args } => {
                self.expr(func);
                for a in args {
                    match a {
                        Arg::Positional(e) | Arg::Keyword(_, e) | Arg::Star(e) | Arg::DoubleStar(e) => {
                            self.expr(e)
                        }
                    }
                }
            }
            Expr::Attribute { object, .. } => self.expr(object),
            Expr::Subscript { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Tuple(items) | Expr::List(items) => {
                for i in items {
                    self.expr(i);
                }
            }
            Expr::Dict(pairs) => {
                for (k, v) in pairs {
                    self.expr(k);
                    self.expr(v);
                }
            }
            Expr::Lambda { params, body } => {
                self.param_exprs(params);
                self.enter_function(expr.id, params);
                self.expr(body);
                self.stack.pop();
            }
        }
    }
}

/// Every name used in a function that is neither local nor global there is
/// resolved against the enclosing functions; the binding function marks it as
/// a cell and every function in between carries it as free.
fn resolve_free_variables(tree: &mut ScopeTree, uses: HashMap<NodeId, Vec<String>>) {
    let mut ids: Vec<NodeId> = uses.keys().copied().collect();
    ids.sort();
    for id in ids {
        for name in &uses[&id] {
            let Some(scope) = tree.functions.get(&id) else {
                continue;
            };
            if scope.globals.contains(name) || scope.is_local(name) {
                continue;
            }
            let mut chain = vec![id];
            let mut cur = scope.parent;
            let mut owner = None;
            while let Some(pid) = cur {
                let Some(p) = tree.functions.get(&pid) else {
                    break;
                };
                if p.globals.contains(name) {
                    break;
                }
                if p.is_local(name) {
                    owner = Some(pid);
                    break;
                }
                chain.push(pid);
                cur = p.parent;
            }
            let Some(owner) = owner else {
                continue;
            };
            if let Some(o) = tree.functions.get_mut(&owner) {
                o.cells.insert(name.clone());
            }
            for fid in chain {
                if let Some(f) = tree.functions.get_mut(&fid)
                    && !f.frees.iter().any(|x| x == name)
                {
                    f.frees.push(name.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_source;

    fn def_id(program: &[StmtS], name: &str) -> NodeId {
        fn find(block: &[StmtS], name: &str) -> Option<NodeId> {
            for s in block {
                match &s.node {
                    Stmt::Def(d) if d.name == name => return Some(s.id),
                    Stmt::Def(d) => {
                        if let Some(id) = find(&d.body, name) {
                            return Some(id);
                        }
                    }
                    Stmt::Class(c) => {
                        if let Some(id) = find(&c.body, name) {
                            return Some(id);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        find(program, name).unwrap()
    }

    #[test]
    fn locals_and_params() {
        let program = parse_source("def f(a, b):\n    c = a\n    for i in b:\n        d = i\n    return c\n").unwrap();
        let tree = analyze_scopes(&program);
        let f = tree.function(def_id(&program, "f")).unwrap();
        assert_eq!(f.params, vec!["a", "b"]);
        assert_eq!(f.locals, vec!["c", "i", "d"]);
        assert!(tree.module_names.contains("f"));
    }

    #[test]
    fn captured_variables_become_cells_and_frees() {
        let src = "def outer():\n    x = 1\n    def mid():\n        def inner():\n            return x\n        return inner\n    return mid\n";
        let program = parse_source(src).unwrap();
        let tree = analyze_scopes(&program);
        let outer = tree.function(def_id(&program, "outer")).unwrap();
        let mid = tree.function(def_id(&program, "mid")).unwrap();
        let inner = tree.function(def_id(&program, "inner")).unwrap();
        assert!(outer.is_captured("x"));
        assert!(mid.is_free("x"));
        assert!(inner.is_free("x"));
        assert!(!outer.is_free("x"));
    }

    #[test]
    fn nonlocal_and_global() {
        let src = "def f():\n    n = 0\n    def g():\n        nonlocal n\n        n = n + 1\n    global z\n    z = 1\n    return g\n";
        let program = parse_source(src).unwrap();
        let tree = analyze_scopes(&program);
        let f = tree.function(def_id(&program, "f")).unwrap();
        let g = tree.function(def_id(&program, "g")).unwrap();
        assert!(f.is_captured("n"));
        assert!(g.is_free("n"));
        assert!(!g.is_local("n"));
        assert!(!f.is_local("z"));
        assert!(tree.module_names.contains("z"));
    }

    #[test]
    fn class_body_is_not_an_enclosing_scope() {
        let src = "class C:\n    y = 1\n    def m(self):\n        return y\n";
        let program = parse_source(src).unwrap();
        let tree = analyze_scopes(&program);
        let m = tree.function(def_id(&program, "m")).unwrap();
        assert!(m.frees.is_empty());
        assert!(!tree.module_names.contains("m"));
    }

    #[test]
    fn lambdas_capture() {
        let src = "def f(k):\n    return lambda v: v + k\n";
        let program = parse_source(src).unwrap();
        let tree = analyze_scopes(&program);
        let f = tree.function(def_id(&program, "f")).unwrap();
        assert!(f.is_captured("k"));
        assert_eq!(tree.functions.len(), 2);
    }
}
