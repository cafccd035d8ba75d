//! Bytecode generation.
//!
//! One compiler serves both modes. Without a [`TypeMap`] every operation is
//! emitted in its generic form. With one, the binder's side tables select
//! primitive arithmetic, direct slot access and de-virtualized calls, and
//! every function starts with a `CheckArgs` prologue so that dynamic callers
//! cannot violate its declared parameter types.

mod call;
mod expr;
mod stmt;
#[cfg(test)]
mod tests;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::bytecode::{FunctionCode, FunctionFlags, Instruction as I, Module, PrimConst};
use crate::parser::ast::{ExprS, NodeId, Param, ParamKind, StmtS};
use crate::semantic::scope::{FunctionScope, ScopeTree};
use crate::semantic::symbols::ConstValue;
use crate::semantic::type_map::{Coercion, MODULE_BODY, TypeMap};
use crate::semantic::{StaticError, StaticResult};
use crate::types::{Prim, Span};

/// How a name is accessed from the current code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameAccess {
    Local(u16),
    /// A local stored unboxed.
    Typed(u16, Prim),
    /// Index into the frame's cells: own cells first, then free variables.
    Deref(u16),
    Global,
}

/// Enclosing constructs that `break`, `continue` and `return` must leave.
enum Block<'a> {
    Loop {
        start: usize,
        breaks: Vec<usize>,
        /// The iterator sits on the stack while the body runs.
        is_for: bool,
    },
    Except,
    Finally(&'a [StmtS]),
}

/// The body of a function being compiled.
#[derive(Clone, Copy)]
enum Body<'a> {
    Block(&'a [StmtS]),
    Lambda(&'a ExprS),
}

/// Code object under construction.
struct FunctionBuilder<'a> {
    code: FunctionCode,
    /// `None` for the module body.
    scope: Option<&'a FunctionScope>,
    slots: FxHashMap<String, u16>,
    prims: FxHashMap<String, Prim>,
    blocks: Vec<Block<'a>>,
    /// Temporaries holding the exception of each enclosing handler.
    handling: Vec<u16>,
    /// Prefix for qualified names of definitions nested here.
    prefix: Vec<String>,
}

impl<'a> FunctionBuilder<'a> {
    fn new(code: FunctionCode, scope: Option<&'a FunctionScope>, prefix: String) -> Self {
        Self {
            code,
            scope,
            slots: FxHashMap::default(),
            prims: FxHashMap::default(),
            blocks: Vec::new(),
            handling: Vec::new(),
            prefix: vec![prefix],
        }
    }

    fn add_slot(&mut self, name: &str) -> u16 {
        if let Some(&slot) = self.slots.get(name) {
            return slot;
        }
        let slot = self.code.num_locals;
        self.code.num_locals += 1;
        self.code.varnames.push(name.to_string());
        self.slots.insert(name.to_string(), slot);
        slot
    }

    fn access(&self, name: &str) -> NameAccess {
        let Some(scope) = self.scope else {
            return NameAccess::Global;
        };
        if scope.globals.contains(name) {
            return NameAccess::Global;
        }
        if let Some(i) = self.code.cells.iter().position(|c| c == name) {
            return NameAccess::Deref(i as u16);
        }
        if let Some(i) = self.code.freevars.iter().position(|c| c == name) {
            return NameAccess::Deref((self.code.cells.len() + i) as u16);
        }
        match self.slots.get(name) {
            Some(&slot) if scope.is_local(name) => match self.prims.get(name) {
                Some(&p) => NameAccess::Typed(slot, p),
                None => NameAccess::Local(slot),
            },
            _ => NameAccess::Global,
        }
    }
}

pub struct Compiler<'a> {
    module: Module,
    names: FxHashMap<String, u16>,
    scopes: &'a ScopeTree,
    types: Option<&'a TypeMap>,
    /// Code objects being built, innermost last.
    funcs: Vec<FunctionBuilder<'a>>,
    /// Statement being compiled, for operand limit errors.
    span: Span,
    limit_error: Option<StaticError>,
}

impl<'a> Compiler<'a> {
    /// A compiler for dynamic code.
    pub fn new(name: &str, scopes: &'a ScopeTree) -> Self {
        Self {
            module: Module::new(name),
            names: FxHashMap::default(),
            scopes,
            types: None,
            funcs: Vec::new(),
            span: 0..0,
            limit_error: None,
        }
    }

    /// A compiler that specializes according to the binder's type map.
    pub fn with_types(name: &str, scopes: &'a ScopeTree, types: &'a TypeMap) -> Self {
        let mut compiler = Self::new(name, scopes);
        compiler.types = Some(types);
        compiler.module.is_static = true;
        compiler
    }

    #[tracing::instrument(level = "debug", skip_all, fields(module = %self.module.name))]
    pub fn compile(mut self, program: &'a [StmtS]) -> StaticResult<Module> {
        let name_sym = self.sym("<module>");
        let mut body = FunctionCode::new(name_sym, "<module>");
        body.flags = FunctionFlags::MODULE;
        self.module.functions.push(FunctionCode::new(name_sym, "<module>"));
        self.funcs
            .push(FunctionBuilder::new(body, None, String::new()));

        self.compile_block(program)?;
        self.emit(I::None);
        self.emit(I::Return);

        if let Some(e) = self.limit_error.take() {
            return Err(e);
        }
        let main = self.pop_builder()?;
        self.module.functions[MODULE_BODY.0 as usize] = main.code;
        debug!(
            functions = self.module.functions.len(),
            classes = self.module.classes.len(),
            is_static = self.module.is_static,
            "compiled"
        );
        Ok(self.module)
    }

    // ---- builders ----

    fn builder(&self) -> &FunctionBuilder<'a> {
        // the module body builder lives for the whole compilation
        &self.funcs[self.funcs.len() - 1]
    }

    fn builder_mut(&mut self) -> &mut FunctionBuilder<'a> {
        let last = self.funcs.len() - 1;
        &mut self.funcs[last]
    }

    fn pop_builder(&mut self) -> StaticResult<FunctionBuilder<'a>> {
        self.funcs
            .pop()
            .ok_or_else(|| StaticError::declaration("no code object to finish", 0..0))
    }

    /// Compiles a function or lambda body into a new code object and returns
    /// its id and free variables.
    fn compile_code(
        &mut self,
        node: NodeId,
        name: &str,
        params: &'a [Param],
        body: Body<'a>,
        span: &Span,
    ) -> StaticResult<(u16, Vec<String>)> {
        let qualname = format!("{}{}", self.qual_prefix(), name);
        let func_id = self.module.functions.len();
        if func_id > u16::MAX as usize {
            return Err(StaticError::declaration("too many functions", span.clone()));
        }
        let name_sym = self.sym(name);
        self.module
            .functions
            .push(FunctionCode::new(name_sym, qualname.clone()));

        let scope = self.scopes.function(node);
        let sig = self.types.and_then(|t| t.function(node));
        let mut code = FunctionCode::new(name_sym, qualname.clone());
        code.arity = self.narrow(
            params.iter().filter(|p| p.kind == ParamKind::Normal).count(),
            "parameters",
        );
        code.params = params.iter().map(|p| p.name.clone()).collect();
        for p in params {
            match p.kind {
                ParamKind::VarArgs => code.flags |= FunctionFlags::VARARGS,
                ParamKind::KwArgs => code.flags |= FunctionFlags::KWARGS,
                ParamKind::Normal => {}
            }
        }
        if let Some(scope) = scope {
            let mut cells: Vec<String> = scope.cells.iter().cloned().collect();
            cells.sort();
            code.cells = cells;
            code.freevars = scope.frees.clone();
        }

        let mut builder =
            FunctionBuilder::new(code, scope, format!("{}.<locals>.", qualname));
        for p in params {
            builder.add_slot(&p.name);
        }
        if let Some(scope) = scope {
            for local in &scope.locals {
                builder.add_slot(local);
            }
        }
        if let Some(sig) = sig {
            builder.code.flags |= FunctionFlags::STATIC;
            builder.code.ret_type = sig.ret.clone();
            for (n, p) in &sig.prim_locals {
                if builder.slots.contains_key(n) && !builder.code.cells.contains(n) {
                    builder.prims.insert(n.clone(), *p);
                }
            }
        }
        self.funcs.push(builder);

        if let Some(sig) = sig {
            self.emit(I::CheckArgs(sig.checks.clone()));
            let mut zeroed: Vec<(String, Prim)> = self
                .builder()
                .prims
                .iter()
                .filter(|(n, _)| !params.iter().any(|p| &p.name == *n))
                .map(|(n, p)| (n.clone(), *p))
                .collect();
            zeroed.sort_by(|a, b| a.0.cmp(&b.0));
            for (n, p) in zeroed {
                if let NameAccess::Typed(slot, _) = self.builder().access(&n) {
                    self.emit(I::LoadPrimConst(p, zero_const(p)));
                    self.emit(I::StoreLocalTyped(slot, p));
                }
            }
        }

        match body {
            Body::Block(stmts) => {
                self.compile_block(stmts)?;
                self.emit(I::None);
                self.emit(I::Return);
            }
            Body::Lambda(e) => {
                self.compile_expr(e)?;
                self.emit(I::Return);
            }
        }

        let finished = self.pop_builder()?;
        let frees = finished.code.freevars.clone();
        self.module.functions[func_id] = finished.code;
        Ok((func_id as u16, frees))
    }

    /// Emits `MakeFunction` for a def or lambda; leaves the function on the stack.
    fn make_function(
        &mut self,
        node: NodeId,
        name: &str,
        params: &'a [Param],
        body: Body<'a>,
        span: &Span,
    ) -> StaticResult<()> {
        let mut defaults = 0usize;
        for p in params {
            if let Some(d) = &p.default {
                self.compile_expr(d)?;
                defaults += 1;
            }
        }
        let defaults = self.narrow(defaults, "parameter defaults");
        let (func_id, frees) = self.compile_code(node, name, params, body, span)?;
        for free in &frees {
            match self.builder().access(free) {
                NameAccess::Deref(ix) => {
                    self.emit(I::LoadClosure(ix));
                }
                _ => {
                    return Err(StaticError::declaration(
                        format!("no binding for free variable '{}'", free),
                        span.clone(),
                    ));
                }
            }
        }
        let captures = self.narrow(frees.len(), "captured variables");
        self.emit(I::MakeFunction {
            func_id,
            defaults,
            captures,
        });
        Ok(())
    }

    fn qual_prefix(&self) -> String {
        self.builder().prefix.last().cloned().unwrap_or_default()
    }

    // ---- emission ----

    fn emit(&mut self, ins: I) -> usize {
        let code = &mut self.builder_mut().code.code;
        code.push(ins);
        code.len() - 1
    }

    fn here(&self) -> usize {
        self.builder().code.code.len()
    }

    /// Points the jump at `pos` to the next instruction to be emitted.
    fn patch_here(&mut self, pos: usize) {
        let target = self.here();
        self.patch_to(pos, target);
    }

    fn patch_to(&mut self, pos: usize, target: usize) {
        let rel = target as i32 - (pos as i32 + 1);
        patch_rel(&mut self.builder_mut().code.code[pos], rel);
    }

    /// Emits a jump back to `target`.
    fn emit_back(&mut self, make: fn(i32) -> I, target: usize) {
        let rel = target as i32 - (self.here() as i32 + 1);
        self.emit(make(rel));
    }

    fn temp(&mut self) -> u16 {
        let b = self.builder_mut();
        let name = format!(".{}", b.code.num_locals);
        b.add_slot(&name)
    }

    fn sym(&mut self, name: &str) -> u16 {
        if let Some(&id) = self.names.get(name) {
            return id;
        }
        let id = self.narrow(self.module.symbols.len(), "names");
        self.module.symbols.push(name.to_string());
        self.names.insert(name.to_string(), id);
        id
    }

    /// Operand `n` in its instruction field. Overflow is reported once
    /// compilation finishes.
    fn narrow<T: TryFrom<usize> + Default>(&mut self, n: usize, what: &str) -> T {
        T::try_from(n).unwrap_or_else(|_| {
            if self.limit_error.is_none() {
                self.limit_error = Some(StaticError::declaration(
                    format!("too many {} ({}) for one instruction operand", what, n),
                    self.span.clone(),
                ));
            }
            T::default()
        })
    }

    fn string(&mut self, s: &str) -> u32 {
        get_or_add_string(&mut self.module, s)
    }

    fn emit_coercion(&mut self, coercion: &Coercion) {
        match coercion {
            Coercion::Box(p) => self.emit(I::PrimBox(*p)),
            Coercion::Unbox(p) => self.emit(I::PrimUnbox(*p)),
            Coercion::Convert { from, to } => self.emit(I::PrimConvert {
                from: *from,
                to: *to,
            }),
            Coercion::Cast(d) => self.emit(I::Cast(d.clone())),
        };
    }

    /// Pushes a constant, in primitive form when `prim` is given.
    fn emit_const(&mut self, value: &ConstValue, prim: Option<Prim>) {
        let ins = match (value, prim) {
            (ConstValue::Int(i), Some(p)) => I::LoadPrimConst(p, int_const(p, *i as i128)),
            (ConstValue::Float(f), Some(p)) => I::LoadPrimConst(p, float_const(p, *f)),
            (ConstValue::Bool(b), Some(p)) => I::LoadPrimConst(p, PrimConst::Bool(*b)),
            (ConstValue::Int(i), _) => I::ConstI64(*i),
            (ConstValue::Float(f), _) => I::ConstF64(*f),
            (ConstValue::Bool(true), _) => I::True,
            (ConstValue::Bool(false), _) => I::False,
            (ConstValue::Str(s), _) => I::ConstStr(self.string(s)),
            (ConstValue::None, _) => I::None,
        };
        self.emit(ins);
    }

    fn prim_of(&self, node: NodeId) -> Option<Prim> {
        self.types.and_then(|t| t.prim_of(node))
    }
}

/// A primitive constant in storage form.
fn int_const(p: Prim, value: i128) -> PrimConst {
    if p.is_float() {
        float_const(p, value as f64)
    } else if p == Prim::CBool {
        PrimConst::Bool(value != 0)
    } else {
        PrimConst::Int(p.wrap(value))
    }
}

fn float_const(p: Prim, value: f64) -> PrimConst {
    match p {
        Prim::Single => PrimConst::Float(value as f32 as f64),
        Prim::Double => PrimConst::Float(value),
        Prim::CBool => PrimConst::Bool(value != 0.0),
        _ => PrimConst::Int(p.wrap(value as i128)),
    }
}

fn zero_const(p: Prim) -> PrimConst {
    int_const(p, 0)
}

fn patch_rel(ins: &mut I, rel: i32) {
    match ins {
        I::Jump(r)
        | I::JumpIfFalse(r)
        | I::JumpIfTrue(r)
        | I::JumpIfFalseOrPop(r)
        | I::JumpIfTrueOrPop(r)
        | I::ForIter(r)
        | I::SetupExcept(r) => *r = rel,
        _ => debug_assert!(false, "not a jump: {}", ins),
    }
}

fn get_or_add_string(module: &mut Module, s: &str) -> u32 {
    if let Some(idx) = module.string_pool.iter().position(|x| x == s) {
        idx as u32
    } else {
        let id = module.string_pool.len() as u32;
        module.string_pool.push(s.to_string());
        id
    }
}
