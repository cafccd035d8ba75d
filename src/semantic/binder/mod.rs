//! The type binder: a flow-sensitive pass over a declared module that types
//! every expression, enforces assignment/argument/return compatibility and
//! records everything the code generator needs in a [`TypeMap`].
//!
//! Errors abort the whole module.

mod call;
mod expr;
mod stmt;
#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::declare;
use super::lattice::{self, ClassId, Type, builtin, is_assignable};
use super::scope::{FunctionScope, ScopeTree};
use super::symbols::{Symbol, SymbolTable};
use super::type_map::{Coercion, FunctionSig, MODULE_BODY, TypeMap};
use super::{StaticError, StaticResult};
use crate::parser::ast::{Expr, ExprS, FunctionDef, NodeId, ParamKind, Stmt, StmtS};
use crate::types::{Prim, Span};

#[tracing::instrument(level = "debug", skip(symbols, program, scopes))]
pub fn bind_module(
    symbols: &SymbolTable,
    module: &str,
    program: &[StmtS],
    scopes: &ScopeTree,
) -> StaticResult<TypeMap> {
    let mut binder = Binder::new(symbols, module, scopes);
    binder
        .bind_block(program)
        .map_err(|e| e.in_module(module))?;
    binder.map.record_function(
        MODULE_BODY,
        FunctionSig {
            qualname: "<module>".to_string(),
            ..Default::default()
        },
    );
    debug!(module, nodes = binder.map.len(), "bound");
    Ok(binder.map)
}

#[derive(Debug, Clone)]
struct Local {
    ty: Type,
    annotated: bool,
}

/// What is known about names at one program point.
#[derive(Debug, Clone)]
pub(crate) struct FlowState {
    /// Current (possibly narrowed) types; absent names have their declared type.
    types: HashMap<String, Type>,
    /// Locals that may not have been assigned yet.
    unbound: HashSet<String>,
    reachable: bool,
}

impl FlowState {
    fn new() -> Self {
        Self {
            types: HashMap::new(),
            unbound: HashSet::new(),
            reachable: true,
        }
    }

    fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }
}

#[derive(Debug, Default)]
struct LoopFlow {
    breaks: Vec<FlowState>,
    continues: Vec<FlowState>,
}

struct FunctionCtx<'a> {
    qualname: String,
    /// `None` for the module body.
    scope: Option<&'a FunctionScope>,
    declared: HashMap<String, Local>,
    flow: FlowState,
    ret: Type,
    loops: Vec<LoopFlow>,
}

impl<'a> FunctionCtx<'a> {
    fn module() -> Self {
        Self {
            qualname: String::new(),
            scope: None,
            declared: HashMap::new(),
            flow: FlowState::new(),
            ret: Type::Dynamic,
            loops: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameKind {
    Local,
    /// Captured from an enclosing function (or declared `nonlocal`).
    Free,
    /// A module name seen from inside a function.
    Global,
    /// A name read or written by the module body itself.
    Module,
}

/// How a value of one type fits a destination of another.
pub(crate) enum Fit {
    Exact,
    Coerce(Coercion),
    Mismatch,
}

pub(crate) struct Binder<'a> {
    symbols: &'a SymbolTable,
    module: &'a str,
    scopes: &'a ScopeTree,
    map: TypeMap,
    ctx: FunctionCtx<'a>,
    /// Enclosing function contexts, innermost last.
    outer: Vec<FunctionCtx<'a>>,
}

impl<'a> Binder<'a> {
    fn new(symbols: &'a SymbolTable, module: &'a str, scopes: &'a ScopeTree) -> Self {
        Self {
            symbols,
            module,
            scopes,
            map: TypeMap::default(),
            ctx: FunctionCtx::module(),
            outer: Vec::new(),
        }
    }

    fn type_name(&self, ty: &Type) -> String {
        ty.name(self.symbols)
    }

    fn mismatch(&self, from: &Type, to: &Type, span: &Span) -> StaticError {
        StaticError::type_error(
            format!(
                "type mismatch: {} cannot be assigned to {}",
                self.type_name(from),
                self.type_name(to)
            ),
            span.clone(),
        )
    }

    fn at_module_level(&self) -> bool {
        self.ctx.scope.is_none()
    }

    // ---- names ----

    fn name_kind(&self, name: &str) -> NameKind {
        match self.ctx.scope {
            None => NameKind::Module,
            Some(scope) => {
                if scope.globals.contains(name) {
                    NameKind::Global
                } else if scope.nonlocals.contains(name) || scope.is_free(name) {
                    NameKind::Free
                } else if scope.is_local(name) {
                    NameKind::Local
                } else {
                    NameKind::Global
                }
            }
        }
    }

    fn module_symbol(&self, name: &str) -> Option<Symbol> {
        self.symbols.resolve(self.module, name)
    }

    /// Declared type of a module-level name.
    fn module_declared(&self, name: &str) -> Type {
        match self.module_symbol(name) {
            Some(sym) => self.symbols.symbol_type(&sym),
            None => Type::Dynamic,
        }
    }

    fn outer_declared(&self, name: &str) -> Type {
        for ctx in self.outer.iter().rev() {
            let Some(scope) = ctx.scope else {
                break;
            };
            if scope.is_local(name) {
                return ctx
                    .declared
                    .get(name)
                    .map(|l| l.ty.clone())
                    .unwrap_or(Type::Dynamic);
            }
        }
        Type::Dynamic
    }

    /// Declared type of `name` at the current point, if it has one.
    fn declared_type(&self, name: &str) -> Option<Type> {
        match self.name_kind(name) {
            NameKind::Local => self.ctx.declared.get(name).map(|l| l.ty.clone()),
            NameKind::Free => Some(self.outer_declared(name)),
            NameKind::Global | NameKind::Module => Some(self.module_declared(name)),
        }
    }

    fn is_known_global(&self, name: &str) -> bool {
        self.module_symbol(name).is_some()
            || self.scopes.module_names.contains(name)
            || self
                .symbols
                .scope(self.module)
                .is_some_and(|s| s.has_star_import())
    }

    /// Type of a name being read.
    fn read_name(&self, name: &str, span: &Span) -> StaticResult<Type> {
        match self.name_kind(name) {
            NameKind::Local => {
                let local = self.ctx.declared.get(name);
                if self.ctx.flow.unbound.contains(name) {
                    return match local {
                        Some(l) if l.annotated || l.ty.prim().is_some() => Ok(l.ty.clone()),
                        _ if !self.ctx.flow.reachable => Ok(Type::Dynamic),
                        _ => Err(StaticError::type_error(
                            format!("local variable '{}' may be referenced before assignment", name),
                            span.clone(),
                        )),
                    };
                }
                Ok(self
                    .ctx
                    .flow
                    .types
                    .get(name)
                    .cloned()
                    .or_else(|| local.map(|l| l.ty.clone()))
                    .unwrap_or(Type::Dynamic))
            }
            NameKind::Free => Ok(self.outer_declared(name)),
            NameKind::Module => {
                if let Some(t) = self.ctx.flow.types.get(name) {
                    return Ok(t.clone());
                }
                self.read_global(name, span)
            }
            NameKind::Global => self.read_global(name, span),
        }
    }

    fn read_global(&self, name: &str, span: &Span) -> StaticResult<Type> {
        match self.module_symbol(name) {
            Some(sym) => Ok(self.symbols.symbol_type(&sym)),
            None if self.is_known_global(name) => Ok(Type::Dynamic),
            None => Err(StaticError::type_error(
                format!("name '{}' is not defined", name),
                span.clone(),
            )),
        }
    }

    /// The type a name currently holds, without reporting errors.
    fn peek_name(&self, name: &str) -> Type {
        match self.name_kind(name) {
            NameKind::Local | NameKind::Module => self
                .ctx
                .flow
                .types
                .get(name)
                .cloned()
                .or_else(|| self.declared_type(name))
                .unwrap_or(Type::Dynamic),
            _ => self.declared_type(name).unwrap_or(Type::Dynamic),
        }
    }

    /// Rejects primitive storage the runtime cannot hold unboxed.
    fn check_prim_storage(&self, name: &str, prim: Prim, span: &Span) -> StaticResult<()> {
        match self.ctx.scope {
            None => Err(StaticError::type_error(
                format!(
                    "cannot declare {} as primitive type {} at module level",
                    name, prim
                ),
                span.clone(),
            )),
            Some(scope) if scope.is_captured(name) => Err(StaticError::type_error(
                format!(
                    "cannot use primitive type {} for variable {} captured by a closure",
                    prim, name
                ),
                span.clone(),
            )),
            Some(_) => Ok(()),
        }
    }

    /// How a value of type `from` can be stored into a destination of type `to`.
    pub(crate) fn fit(&self, from: &Type, to: &Type) -> Fit {
        if from == to {
            return Fit::Exact;
        }
        match (from, to) {
            (Type::Prim(p), Type::Dynamic) | (Type::Prim(p), Type::Instance(builtin::OBJECT)) => {
                Fit::Coerce(Coercion::Box(*p))
            }
            (Type::Prim(_), _) | (_, Type::Prim(_)) => Fit::Mismatch,
            (Type::Dynamic, to) => {
                let descr = to.to_descr(self.symbols);
                if descr.is_dynamic() {
                    Fit::Exact
                } else {
                    Fit::Coerce(Coercion::Cast(descr))
                }
            }
            (from, to) if is_assignable(self.symbols, from, to) => Fit::Exact,
            _ => Fit::Mismatch,
        }
    }

    /// `fit`, allowing an integer constant to enter any primitive it fits.
    fn fit_value(
        &self,
        from: &Type,
        to: &Type,
        constant: Option<i128>,
        span: &Span,
    ) -> StaticResult<Option<Coercion>> {
        if let (Type::Prim(a), Type::Prim(b), Some(value)) = (from, to, constant)
            && a != b
            && a.is_int()
            && b.is_int()
        {
            lattice::check_constant_range(value, *b)
                .map_err(|m| StaticError::type_error(m, span.clone()))?;
            return Ok(Some(Coercion::Convert { from: *a, to: *b }));
        }
        match self.fit(from, to) {
            Fit::Exact => Ok(None),
            Fit::Coerce(c) => Ok(Some(c)),
            Fit::Mismatch => Err(self.mismatch(from, to, span)),
        }
    }

    /// Records a store of a value of type `value` into `name` and returns the
    /// coercion the store needs.
    fn assign_name(
        &mut self,
        name: &str,
        value: &Type,
        constant: Option<i128>,
        span: &Span,
    ) -> StaticResult<Option<Coercion>> {
        let kind = self.name_kind(name);
        if kind == NameKind::Local && !self.ctx.declared.contains_key(name) {
            let declared = match value {
                Type::Prim(p) => {
                    self.check_prim_storage(name, *p, span)?;
                    value.clone()
                }
                _ => Type::Dynamic,
            };
            self.ctx.declared.insert(
                name.to_string(),
                Local {
                    ty: declared,
                    annotated: false,
                },
            );
        }
        let declared = match kind {
            NameKind::Local => self
                .ctx
                .declared
                .get(name)
                .map(|l| l.ty.clone())
                .unwrap_or(Type::Dynamic),
            NameKind::Free => self.outer_declared(name),
            NameKind::Global | NameKind::Module => self.module_declared(name),
        };
        let coercion = self.fit_value(value, &declared, constant, span)?;
        let flow_ty = match (value, &declared) {
            (Type::Dynamic, d) => d.clone(),
            (Type::Prim(p), d) if d.prim().is_none() => Type::boxed(*p),
            (v, _) => v.clone(),
        };
        if matches!(kind, NameKind::Local | NameKind::Module) {
            self.ctx.flow.types.insert(name.to_string(), flow_ty);
            self.ctx.flow.unbound.remove(name);
        }
        Ok(coercion)
    }

    /// `x: T` for a local or module name.
    fn declare_annotated(&mut self, name: &str, ty: &Type, span: &Span) -> StaticResult<()> {
        if let Type::Prim(p) = ty {
            self.check_prim_storage(name, *p, span)?;
        }
        if self.name_kind(name) != NameKind::Local {
            return Ok(());
        }
        if let Some(existing) = self.ctx.declared.get(name)
            && existing.ty != *ty
            && (existing.annotated || existing.ty.prim().is_some())
        {
            return Err(StaticError::type_error(
                format!("cannot redefine local variable {}", name),
                span.clone(),
            ));
        }
        self.ctx.declared.insert(
            name.to_string(),
            Local {
                ty: ty.clone(),
                annotated: true,
            },
        );
        self.ctx.flow.types.remove(name);
        Ok(())
    }

    // ---- flow ----

    fn declared_or_dynamic(&self, name: &str) -> Type {
        match self.name_kind(name) {
            NameKind::Local => self
                .ctx
                .declared
                .get(name)
                .map(|l| l.ty.clone())
                .unwrap_or(Type::Dynamic),
            _ => self.module_declared(name),
        }
    }

    fn join_flows(&self, states: Vec<FlowState>) -> FlowState {
        let mut live = states.into_iter().filter(|s| s.reachable);
        let Some(mut acc) = live.next() else {
            return FlowState::unreachable();
        };
        for next in live {
            let names: HashSet<String> = acc
                .types
                .keys()
                .chain(next.types.keys())
                .cloned()
                .collect();
            let mut types = HashMap::new();
            for name in names {
                let declared = self.declared_or_dynamic(&name);
                let a = acc.types.get(&name).cloned().unwrap_or_else(|| declared.clone());
                let b = next.types.get(&name).cloned().unwrap_or(declared);
                types.insert(name, lattice::join(self.symbols, &a, &b));
            }
            acc.types = types;
            acc.unbound.extend(next.unbound);
        }
        acc
    }

    /// Forgets narrowing for names that are reassigned inside a loop body.
    fn widen(&self, mut state: FlowState, names: &HashSet<String>) -> FlowState {
        for n in names {
            state.types.remove(n);
        }
        state
    }

    // ---- functions and classes ----

    /// Binds a function body in a fresh context. Defaults and decorators are
    /// bound in the enclosing context first.
    fn bind_function(
        &mut self,
        node: NodeId,
        def: &FunctionDef,
        class: Option<ClassId>,
        span: &Span,
    ) -> StaticResult<()> {
        let (params, ret) = match self.symbols.function_for_node(self.module, node) {
            Some(f) => {
                let info = self.symbols.function(f);
                (info.params.clone(), info.ret.clone())
            }
            None => {
                let (params, ret, _) =
                    declare::declare_signature(self.symbols, self.module, def, class)?;
                (params, ret)
            }
        };
        for d in &def.decorators {
            self.bind_boxed(d)?;
        }
        for (p, info) in def.params.iter().zip(&params) {
            if let Some(default) = &p.default {
                let expected = info.ty.clone();
                let ty = self.bind_expr(default, Some(&expected))?;
                let constant = expr::constant_int(default);
                if let Some(c) = self.fit_value(&ty, &expected, constant, &default.span)? {
                    self.map.record_coercion(default.id, c);
                }
            }
        }

        let qualname = match (class, self.ctx.qualname.as_str()) {
            (Some(c), _) => format!("{}.{}", self.symbols.class(c).name, def.name),
            (None, "") => def.name.clone(),
            (None, outer) => format!("{}.<locals>.{}", outer, def.name),
        };
        let scope = self.scopes.function(node);
        let mut ctx = FunctionCtx {
            qualname: qualname.clone(),
            scope,
            declared: HashMap::new(),
            flow: FlowState::new(),
            ret: ret.clone(),
            loops: Vec::new(),
        };
        let mut checks = Vec::new();
        for (i, (p, info)) in def.params.iter().zip(&params).enumerate() {
            let ty = match p.kind {
                ParamKind::VarArgs => Type::Instance(builtin::TUPLE),
                ParamKind::KwArgs => Type::Instance(builtin::DICT),
                ParamKind::Normal => info.ty.clone(),
            };
            let is_receiver = class.is_some() && i == 0;
            if !is_receiver && p.kind == ParamKind::Normal {
                let descr = ty.to_descr(self.symbols);
                if !descr.is_dynamic() {
                    checks.push((i as u16, descr));
                }
            }
            ctx.declared.insert(
                p.name.clone(),
                Local {
                    ty,
                    annotated: p.annotation.is_some() || is_receiver,
                },
            );
        }
        if let Some(scope) = scope {
            ctx.flow.unbound = scope.locals.iter().cloned().collect();
        }

        let saved = std::mem::replace(&mut self.ctx, ctx);
        self.outer.push(saved);
        let mut result = Ok(());
        for p in &def.params {
            if let Some(Local {
                ty: Type::Prim(prim),
                ..
            }) = self.ctx.declared.get(&p.name)
                && let Err(e) = self.check_prim_storage(&p.name, *prim, &p.span)
            {
                result = Err(e);
                break;
            }
        }
        if result.is_ok() {
            result = self.bind_block(&def.body);
        }
        let finished = match self.outer.pop() {
            Some(outer) => std::mem::replace(&mut self.ctx, outer),
            None => return result,
        };
        result?;

        if let Type::Prim(p) = &ret
            && finished.flow.reachable
        {
            return Err(StaticError::type_error(
                format!("function {} must return a value of type {}", qualname, p),
                span.clone(),
            ));
        }
        let mut prim_locals: Vec<(String, Prim)> = finished
            .declared
            .iter()
            .filter_map(|(n, l)| l.ty.prim().map(|p| (n.clone(), p)))
            .collect();
        prim_locals.sort_by(|a, b| a.0.cmp(&b.0));
        self.map.record_function(
            node,
            FunctionSig {
                qualname,
                checks,
                prim_locals,
                ret: ret.to_descr(self.symbols),
            },
        );
        Ok(())
    }

    /// Runs `f` inside a lambda's context.
    fn with_lambda_ctx<T>(
        &mut self,
        node: NodeId,
        params: &[crate::parser::ast::Param],
        f: impl FnOnce(&mut Self) -> StaticResult<T>,
    ) -> StaticResult<T> {
        let mut ctx = FunctionCtx {
            qualname: "<lambda>".to_string(),
            scope: self.scopes.function(node),
            declared: HashMap::new(),
            flow: FlowState::new(),
            ret: Type::Dynamic,
            loops: Vec::new(),
        };
        for p in params {
            ctx.declared.insert(
                p.name.clone(),
                Local {
                    ty: Type::Dynamic,
                    annotated: false,
                },
            );
        }
        let saved = std::mem::replace(&mut self.ctx, ctx);
        self.outer.push(saved);
        let result = f(self);
        if let Some(outer) = self.outer.pop() {
            self.ctx = outer;
        }
        if result.is_ok() {
            self.map.record_function(
                node,
                FunctionSig {
                    qualname: "<lambda>".to_string(),
                    ..Default::default()
                },
            );
        }
        result
    }
}

/// Names (re)bound by a block, not descending into nested functions.
fn assigned_names(block: &[StmtS]) -> HashSet<String> {
    fn targets(e: &ExprS, out: &mut HashSet<String>) {
        match &e.node {
            Expr::Name(n) => {
                out.insert(n.clone());
            }
            Expr::Tuple(items) | Expr::List(items) => {
                for i in items {
                    targets(i, out);
                }
            }
            _ => {}
        }
    }
    fn walk(block: &[StmtS], out: &mut HashSet<String>) {
        for s in block {
            match &s.node {
                Stmt::Assign { targets: ts, .. } => {
                    for t in ts {
                        targets(t, out);
                    }
                }
                Stmt::AnnAssign { target, .. } | Stmt::AugAssign { target, .. } => {
                    targets(target, out)
                }
                Stmt::Del(ts) => {
                    for t in ts {
                        targets(t, out);
                    }
                }
                Stmt::For { target, body, .. } => {
                    targets(target, out);
                    walk(body, out);
                }
                Stmt::While { body, .. } => walk(body, out),
                Stmt::If {
                    then_block,
                    elif_blocks,
                    else_block,
                    ..
                } => {
                    walk(then_block, out);
                    for (_, b) in elif_blocks {
                        walk(b, out);
                    }
                    if let Some(b) = else_block {
                        walk(b, out);
                    }
                }
                Stmt::Try {
                    body,
                    handlers,
                    finally,
                } => {
                    walk(body, out);
                    for h in handlers {
                        if let Some(n) = &h.name {
                            out.insert(n.clone());
                        }
                        walk(&h.body, out);
                    }
                    if let Some(f) = finally {
                        walk(f, out);
                    }
                }
                Stmt::Def(d) => {
                    out.insert(d.name.clone());
                }
                Stmt::Class(c) => {
                    out.insert(c.name.clone());
                }
                Stmt::Import(aliases) => {
                    for a in aliases {
                        out.insert(a.bound_name().to_string());
                    }
                }
                Stmt::ImportFrom { names, .. } => {
                    for a in names {
                        out.insert(a.bound_name().to_string());
                    }
                }
                _ => {}
            }
        }
    }
    let mut out = HashSet::new();
    walk(block, &mut out);
    out
}
