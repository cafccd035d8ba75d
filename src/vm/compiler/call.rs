//! Call sites: pseudo-calls from `__static__`, planned calls with static
//! argument binding, and generic calls.

use super::Compiler;
use crate::parser::ast::{Arg, ExprS};
use crate::semantic::type_map::{ArgSource, CallPlan, CallTarget, SpecialCall};
use crate::semantic::{StaticError, StaticResult};
use crate::vm::bytecode::Instruction as I;

impl<'a> Compiler<'a> {
    pub(super) fn compile_call(
        &mut self,
        expr: &'a ExprS,
        func: &'a ExprS,
        args: &'a [Arg],
    ) -> StaticResult<()> {
        let types = self.types;
        if let Some(special) = types.and_then(|t| t.special(expr.id)) {
            return self.compile_special(expr, special, func, args);
        }
        if let Some(plan) = types.and_then(|t| t.call(expr.id)) {
            return self.compile_planned(plan, func, args);
        }
        self.compile_expr(func)?;
        self.compile_dynamic_args(args)
    }

    fn compile_special(
        &mut self,
        expr: &'a ExprS,
        special: &'a SpecialCall,
        func: &'a ExprS,
        args: &'a [Arg],
    ) -> StaticResult<()> {
        let value = |i: usize| {
            args.get(i).map(Arg::value).ok_or_else(|| {
                StaticError::type_error("missing argument", expr.span.clone())
            })
        };
        match special {
            SpecialCall::Cast(descr) => {
                self.compile_expr(value(1)?)?;
                self.emit(I::Cast(descr.clone()));
            }
            SpecialCall::Box(p) => {
                self.compile_expr(value(0)?)?;
                self.emit(I::PrimBox(*p));
            }
            SpecialCall::Unbox(p) => {
                self.compile_expr(value(0)?)?;
                self.emit(I::PrimUnbox(*p));
            }
            SpecialCall::PrimConvert { to, from: Some(from) } => {
                self.compile_expr(value(0)?)?;
                if from != to {
                    self.emit(I::PrimConvert {
                        from: *from,
                        to: *to,
                    });
                }
            }
            SpecialCall::PrimConvert { from: None, .. } => {
                // the type object converts and range-checks at runtime
                self.compile_expr(func)?;
                self.compile_expr(value(0)?)?;
                self.emit(I::Call(1));
            }
            SpecialCall::ArrayNew(p) => {
                self.compile_expr(value(0)?)?;
                self.emit(I::ArrayNew(*p));
            }
        }
        Ok(())
    }

    /// A call whose arguments were matched to parameters at compile time.
    fn compile_planned(
        &mut self,
        plan: &'a CallPlan,
        func: &'a ExprS,
        args: &'a [Arg],
    ) -> StaticResult<()> {
        match &plan.target {
            CallTarget::Function { .. } => self.compile_expr(func)?,
            CallTarget::Method { name, .. } => {
                let crate::parser::ast::Expr::Attribute { object, .. } = &func.node else {
                    return Err(StaticError::declaration(
                        format!("method call to '{}' without a receiver", name),
                        func.span.clone(),
                    ));
                };
                self.compile_expr(object)?;
                if self.types.is_some_and(|t| t.needs_null_check(func.id)) {
                    let sym = self.sym(name);
                    self.emit(I::RaiseIfNone(sym));
                }
            }
        }

        if plan.is_direct() {
            for a in args {
                self.compile_expr(a.value())?;
            }
        } else {
            self.push_arranged(plan, args)?;
        }

        let argc = self.narrow(plan.args.len(), "call arguments");
        let ret = plan.ret_check.clone();
        match &plan.target {
            CallTarget::Function { qualname, .. } => {
                let name = self.sym(qualname);
                self.emit(I::InvokeFunction { name, argc, ret });
            }
            CallTarget::Method { name, slot } => {
                let name = self.sym(name);
                self.emit(I::InvokeMethod {
                    name,
                    slot: *slot as u16,
                    argc,
                    ret,
                });
            }
        }
        Ok(())
    }

    /// Evaluates every argument once, left to right, then pushes the value of
    /// each parameter in declaration order.
    fn push_arranged(&mut self, plan: &'a CallPlan, args: &'a [Arg]) -> StaticResult<()> {
        let mut temps = Vec::with_capacity(args.len());
        for a in args {
            self.compile_expr(a.value())?;
            let t = self.temp();
            self.emit(I::StoreLocal(t));
            temps.push(t);
        }

        if !plan.mapping_names.is_empty() {
            let mapping = plan.args.iter().find_map(|a| match a.source {
                ArgSource::Mapping { arg, .. } => Some(arg),
                _ => None,
            });
            if let Some(arg) = mapping {
                let names = plan
                    .mapping_names
                    .iter()
                    .map(|n| self.sym(n))
                    .collect::<Vec<_>>();
                self.emit(I::LoadLocal(temps[arg]));
                self.emit(I::CheckMapping(names));
                self.emit(I::Pop);
            }
        }

        for planned in &plan.args {
            match &planned.source {
                ArgSource::Positional(i) | ArgSource::Keyword(i) => {
                    self.emit(I::LoadLocal(temps[*i]));
                }
                ArgSource::Default(value) => {
                    self.emit_const(value, planned.ty.prim());
                }
                ArgSource::IterableElem { arg, index, total } => {
                    self.emit(I::LoadLocal(temps[*arg]));
                    self.emit(I::LoadIterableArg {
                        index: *index as u16,
                        total: *total as u16,
                    });
                }
                ArgSource::Mapping { arg, name, default } => {
                    let name = self.sym(name);
                    self.emit(I::LoadLocal(temps[*arg]));
                    self.emit(I::LoadMappingArg {
                        name,
                        skip: default.is_some() as u16,
                    });
                    if let Some(value) = default {
                        self.emit_const(value, planned.ty.prim());
                    }
                }
            }
        }
        Ok(())
    }

    /// Generic call with the callee already on the stack.
    pub(super) fn compile_dynamic_args(&mut self, args: &'a [Arg]) -> StaticResult<()> {
        let simple = args
            .iter()
            .all(|a| matches!(a, Arg::Positional(_) | Arg::Keyword(..)));
        if simple {
            let mut names = Vec::new();
            for a in args {
                self.compile_expr(a.value())?;
                if let Arg::Keyword(name, _) = a {
                    names.push(self.sym(name));
                }
            }
            let argc = self.narrow(args.len(), "call arguments");
            if names.is_empty() {
                self.emit(I::Call(argc));
            } else {
                self.emit(I::CallKw(argc, names));
            }
            return Ok(());
        }

        self.emit(I::BuildList(0));
        for a in args {
            match a {
                Arg::Positional(e) => {
                    self.compile_expr(e)?;
                    self.emit(I::ListAppend);
                }
                Arg::Star(e) => {
                    self.compile_expr(e)?;
                    self.emit(I::ListExtend);
                }
                _ => {}
            }
        }
        self.emit(I::BuildDict(0));
        for a in args {
            match a {
                Arg::Keyword(name, e) => {
                    self.compile_expr(e)?;
                    let name = self.sym(name);
                    self.emit(I::DictInsert(name));
                }
                Arg::DoubleStar(e) => {
                    self.compile_expr(e)?;
                    self.emit(I::DictMerge);
                }
                _ => {}
            }
        }
        self.emit(I::CallEx);
        Ok(())
    }
}
