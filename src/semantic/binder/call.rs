//! Call sites: pseudo-calls from `__static__`, builtins, constructors and
//! statically planned calls to functions and vtable methods.

use super::expr::constant_int;
use super::{Binder, Fit, NameKind};
use crate::parser::ast::{Arg, Expr, ExprS, ParamKind};
use crate::semantic::declare::resolve_annotation;
use crate::semantic::lattice::{ClassId, Type, builtin};
use crate::semantic::symbols::{BuiltinFn, FunctionInfo, ParamInfo, StaticName, Symbol};
use crate::semantic::type_map::{ArgSource, CallPlan, CallTarget, Coercion, PlannedArg, SpecialCall};
use crate::semantic::{StaticError, StaticResult};
use crate::types::Span;

type Arrangement = (Vec<ArgSource>, Vec<String>);

impl<'a> Binder<'a> {
    pub(super) fn bind_call(
        &mut self,
        expr: &ExprS,
        func: &ExprS,
        args: &[Arg],
        expected: Option<&Type>,
    ) -> StaticResult<Type> {
        let symbols = self.symbols;

        if let Expr::Name(name) = &func.node
            && matches!(self.name_kind(name), NameKind::Global | NameKind::Module)
            && let Some(sym) = self.module_symbol(name)
            && self
                .ctx
                .flow
                .types
                .get(name)
                .is_none_or(|t| *t == symbols.symbol_type(&sym))
        {
            let handled = match sym {
                Symbol::Static(s) => Some((self.bind_static_call(expr, s, args, expected)?, Type::Dynamic)),
                Symbol::Builtin(b) => Some((self.bind_builtin_call(b, args)?, Type::Dynamic)),
                Symbol::Class(c) => Some((self.bind_constructor(c, args, &expr.span)?, Type::Class(c))),
                _ => None,
            };
            if let Some((ty, callee)) = handled {
                self.map.record_expr(func.id, callee);
                return Ok(ty);
            }
        }

        if let Expr::Subscript { object, .. } = &func.node
            && let Expr::Name(n) = &object.node
            && matches!(self.name_kind(n), NameKind::Global | NameKind::Module)
            && matches!(self.module_symbol(n), Some(Symbol::Static(StaticName::Array)))
        {
            return self.bind_array_new(expr, func, args);
        }

        if let Expr::Attribute { object, attr } = &func.node {
            let ot = self.bind_expr(object, None)?;
            let (class, optional) = match &ot {
                Type::Instance(c) => (Some(*c), false),
                Type::Optional(inner) => (inner.instance_class(), true),
                _ => (None, false),
            };
            if let Some(c) = class
                && symbols.class(c).is_static()
                && let Some((slot, method)) = symbols.find_method(c, attr)
                && !symbols.function(method.func).dynamic
            {
                if optional {
                    self.map.record_null_check(func.id);
                }
                self.map.record_expr(func.id, Type::Dynamic);
                let info = symbols.function(method.func);
                let target = CallTarget::Method {
                    name: attr.clone(),
                    slot,
                };
                let params = info.params.get(1..).unwrap_or_default();
                return self.bind_planned(expr, target, info, params, args);
            }
            if let Type::Module(m) = &ot
                && let Some(Symbol::Function(f)) = symbols.export(m, attr)
                && !symbols.function(f).dynamic
            {
                self.map.record_expr(func.id, Type::Function(f));
                let info = symbols.function(f);
                let target = CallTarget::Function {
                    func: f,
                    qualname: format!("{}.{}", info.module, info.qualname),
                };
                return self.bind_planned(expr, target, info, &info.params, args);
            }
            let ft = self.member_type(func.id, &ot, attr, &func.span)?;
            self.map.record_expr(func.id, ft);
            self.bind_dynamic_args(args)?;
            return Ok(Type::Dynamic);
        }

        match self.bind_expr(func, None)? {
            Type::Function(f) if !symbols.function(f).dynamic => {
                let info = symbols.function(f);
                let target = CallTarget::Function {
                    func: f,
                    qualname: format!("{}.{}", info.module, info.qualname),
                };
                self.bind_planned(expr, target, info, &info.params, args)
            }
            Type::Prim(p) => Err(StaticError::type_error(
                format!("'{}' object is not callable", p),
                func.span.clone(),
            )),
            _ => {
                self.bind_dynamic_args(args)?;
                Ok(Type::Dynamic)
            }
        }
    }

    fn bind_dynamic_args(&mut self, args: &[Arg]) -> StaticResult<()> {
        for a in args {
            self.bind_boxed(a.value())?;
        }
        Ok(())
    }

    fn bind_planned(
        &mut self,
        expr: &ExprS,
        target: CallTarget,
        info: &FunctionInfo,
        params: &[ParamInfo],
        args: &[Arg],
    ) -> StaticResult<Type> {
        match self.plan_arguments(&info.name, params, args, &expr.span)? {
            Some((planned, mapping_names)) => {
                let descr = info.ret.to_descr(self.symbols);
                self.map.record_call(
                    expr.id,
                    CallPlan {
                        target,
                        args: planned,
                        ret: info.ret.clone(),
                        ret_check: (!descr.is_dynamic()).then_some(descr),
                        mapping_names,
                    },
                );
                Ok(info.ret.clone())
            }
            None => Ok(Type::Dynamic),
        }
    }

    /// Matches the call's arguments to `params` and binds them against the
    /// declared parameter types. `None` means the call cannot be planned; its
    /// arguments are then bound as for a dynamic call.
    fn plan_arguments(
        &mut self,
        callee: &str,
        params: &[ParamInfo],
        args: &[Arg],
        span: &Span,
    ) -> StaticResult<Option<(Vec<PlannedArg>, Vec<String>)>> {
        let mut bound = vec![false; args.len()];
        let arranged = self.arrange(callee, params, args, &mut bound, span)?;
        let Some((sources, mapping_names)) = arranged else {
            for (a, done) in args.iter().zip(&bound) {
                if !done {
                    self.bind_boxed(a.value())?;
                }
            }
            return Ok(None);
        };

        for (i, a) in args.iter().enumerate() {
            if bound[i] {
                continue;
            }
            let (Arg::Positional(e) | Arg::Keyword(_, e)) = a else {
                self.bind_boxed(a.value())?;
                continue;
            };
            let slot = sources.iter().position(|s| {
                matches!(s, ArgSource::Positional(j) | ArgSource::Keyword(j) if *j == i)
            });
            let Some(p) = slot else {
                self.bind_boxed(e)?;
                continue;
            };
            let param = &params[p];
            let ty = self.bind_expr(e, Some(&param.ty))?;
            let kind = if matches!(a, Arg::Positional(_)) {
                "positional"
            } else {
                "keyword"
            };
            if let Some(c) = self.fit_arg(&ty, &param.ty, e, kind, &param.name)? {
                self.map.record_coercion(e.id, c);
            }
        }

        let planned = sources
            .into_iter()
            .zip(params)
            .map(|(source, p)| PlannedArg {
                source,
                ty: p.ty.clone(),
            })
            .collect();
        Ok(Some((planned, mapping_names)))
    }

    fn fit_arg(
        &self,
        ty: &Type,
        expected: &Type,
        arg: &ExprS,
        kind: &str,
        param: &str,
    ) -> StaticResult<Option<Coercion>> {
        let constant = constant_int(arg);
        if constant.is_some() && ty.prim().is_some() && expected.prim().is_some() {
            return self.fit_value(ty, expected, constant, &arg.span);
        }
        match self.fit(ty, expected) {
            Fit::Exact => Ok(None),
            // checked by the callee's prologue, which names the parameter
            Fit::Coerce(Coercion::Cast(_)) => Ok(None),
            Fit::Coerce(c) => Ok(Some(c)),
            Fit::Mismatch => Err(StaticError::type_error(
                format!(
                    "type mismatch: {} received for {} arg '{}', expected {}",
                    self.type_name(ty),
                    kind,
                    param,
                    self.type_name(expected)
                ),
                arg.span.clone(),
            )),
        }
    }

    /// Decides where each parameter's value comes from. Star and double-star
    /// arguments are bound here since their types decide the shape.
    fn arrange(
        &mut self,
        callee: &str,
        params: &[ParamInfo],
        args: &[Arg],
        bound: &mut [bool],
        span: &Span,
    ) -> StaticResult<Option<Arrangement>> {
        if params.iter().any(|p| p.kind != ParamKind::Normal) {
            return Ok(None);
        }
        let mut positional = 0;
        let mut star = None;
        let mut double_star = None;
        let mut keywords = Vec::new();
        for (i, a) in args.iter().enumerate() {
            match a {
                Arg::Positional(_) => {
                    if star.is_some() || double_star.is_some() || !keywords.is_empty() {
                        return Ok(None);
                    }
                    positional += 1;
                }
                Arg::Star(_) => {
                    if star.is_some() || double_star.is_some() || !keywords.is_empty() {
                        return Ok(None);
                    }
                    star = Some(i);
                }
                Arg::Keyword(name, _) => keywords.push((i, name.as_str())),
                Arg::DoubleStar(_) => {
                    if double_star.is_some() || star.is_some() {
                        return Ok(None);
                    }
                    double_star = Some(i);
                }
            }
        }
        if positional > params.len() {
            if star.is_some() {
                return Ok(None);
            }
            return Err(StaticError::type_error(
                format!(
                    "{}() takes {} positional arguments but {} were given",
                    callee,
                    params.len(),
                    positional
                ),
                span.clone(),
            ));
        }

        let mut slots: Vec<Option<ArgSource>> = vec![None; params.len()];
        for (i, slot) in slots.iter_mut().enumerate().take(positional) {
            *slot = Some(ArgSource::Positional(i));
        }
        for (i, name) in keywords {
            let Some(p) = params.iter().position(|p| p.name == name) else {
                return Err(StaticError::type_error(
                    format!("{}() got an unexpected keyword argument '{}'", callee, name),
                    args[i].value().span.clone(),
                ));
            };
            if slots[p].is_some() {
                return Err(StaticError::type_error(
                    format!("{}() got multiple values for argument '{}'", callee, name),
                    args[i].value().span.clone(),
                ));
            }
            slots[p] = Some(ArgSource::Keyword(i));
        }

        if let Some(s) = star {
            let value = args[s].value();
            let st = self.bind_boxed(value)?;
            bound[s] = true;
            let rest = params.len() - positional;
            if rest == 0
                || params[positional..].iter().any(|p| p.ty.prim().is_some())
                || slots[positional..].iter().any(Option::is_some)
            {
                return Ok(None);
            }
            match &st {
                Type::Generic {
                    class: builtin::TUPLE,
                    args: elems,
                } => {
                    // a short tuple still plans; the first missing element
                    // raises IndexError when the call runs
                    if elems.len() > rest {
                        return Ok(None);
                    }
                    for (elem, param) in elems.iter().zip(&params[positional..]) {
                        if matches!(self.fit(elem, &param.ty), Fit::Mismatch) {
                            return Err(StaticError::type_error(
                                format!(
                                    "type mismatch: {} received for positional arg '{}', expected {}",
                                    self.type_name(elem),
                                    param.name,
                                    self.type_name(&param.ty)
                                ),
                                value.span.clone(),
                            ));
                        }
                    }
                }
                Type::Dynamic | Type::Instance(builtin::TUPLE | builtin::LIST) => {}
                _ => return Ok(None),
            }
            for (index, slot) in slots[positional..].iter_mut().enumerate() {
                *slot = Some(ArgSource::IterableElem {
                    arg: s,
                    index,
                    total: rest,
                });
            }
        }

        let mut mapping_names = Vec::new();
        if let Some(d) = double_star {
            let dt = self.bind_boxed(args[d].value())?;
            bound[d] = true;
            let is_mapping = matches!(
                dt,
                Type::Dynamic
                    | Type::Instance(builtin::DICT)
                    | Type::Generic {
                        class: builtin::DICT,
                        ..
                    }
            );
            if !is_mapping {
                return Ok(None);
            }
            for (slot, param) in slots.iter_mut().zip(params) {
                if slot.is_some() {
                    continue;
                }
                if param.ty.prim().is_some() || (param.has_default && param.default.is_none()) {
                    return Ok(None);
                }
                *slot = Some(ArgSource::Mapping {
                    arg: d,
                    name: param.name.clone(),
                    default: param.default.clone(),
                });
                mapping_names.push(param.name.clone());
            }
        }

        for (slot, param) in slots.iter_mut().zip(params) {
            if slot.is_some() {
                continue;
            }
            match &param.default {
                Some(c) => *slot = Some(ArgSource::Default(c.clone())),
                None if param.has_default => return Ok(None),
                None => {
                    return Err(StaticError::type_error(
                        format!("{}() missing required argument '{}'", callee, param.name),
                        span.clone(),
                    ));
                }
            }
        }
        Ok(slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .map(|s| (s, mapping_names)))
    }

    fn only_positional<'e>(&self, name: &str, args: &'e [Arg], span: &Span) -> StaticResult<Vec<&'e ExprS>> {
        args.iter()
            .map(|a| match a {
                Arg::Positional(e) => Ok(e),
                _ => Err(StaticError::type_error(
                    format!("{}() does not accept keyword or unpacked arguments", name),
                    span.clone(),
                )),
            })
            .collect()
    }

    fn bind_static_call(
        &mut self,
        expr: &ExprS,
        name: StaticName,
        args: &[Arg],
        expected: Option<&Type>,
    ) -> StaticResult<Type> {
        let span = &expr.span;
        match name {
            StaticName::Cast => {
                let positional = self.only_positional("cast", args, span)?;
                let [target, value] = positional.as_slice() else {
                    return Err(StaticError::type_error(
                        format!("cast requires exactly two arguments, got {}", args.len()),
                        span.clone(),
                    ));
                };
                let ty = resolve_annotation(self.symbols, self.module, target)?;
                match &ty {
                    Type::Dynamic => {
                        let shown = match &target.node {
                            Expr::Name(n) => format!(" '{}'", n),
                            _ => String::new(),
                        };
                        return Err(StaticError::type_error(
                            format!("cast to unknown type{}", shown),
                            target.span.clone(),
                        ));
                    }
                    Type::Prim(p) => {
                        return Err(StaticError::type_error(
                            format!("cannot cast to primitive type {}", p),
                            target.span.clone(),
                        ));
                    }
                    _ => {}
                }
                self.bind_boxed(value)?;
                self.map
                    .record_special(expr.id, SpecialCall::Cast(ty.to_descr(self.symbols)));
                Ok(ty)
            }
            StaticName::Box => {
                let arg = self.single_arg("box", args, span)?;
                match self.bind_expr(arg, None)? {
                    Type::Prim(p) => {
                        self.map.record_special(expr.id, SpecialCall::Box(p));
                        Ok(Type::boxed(p))
                    }
                    other => Err(StaticError::type_error(
                        format!(
                            "box() requires a primitive argument, got {}",
                            self.type_name(&other)
                        ),
                        arg.span.clone(),
                    )),
                }
            }
            StaticName::Unbox => {
                let arg = self.single_arg("unbox", args, span)?;
                let Some(p) = expected.and_then(Type::prim) else {
                    return Err(StaticError::type_error(
                        "type mismatch: unbox() result must be assigned to a primitive destination",
                        span.clone(),
                    ));
                };
                if let Type::Prim(q) = self.bind_expr(arg, None)? {
                    return Err(StaticError::type_error(
                        format!("unbox() requires a boxed argument, got {}", q),
                        arg.span.clone(),
                    ));
                }
                self.map.record_special(expr.id, SpecialCall::Unbox(p));
                Ok(Type::Prim(p))
            }
            StaticName::Prim(p) => {
                let name = p.to_string();
                let arg = self.single_arg(&name, args, span)?;
                let ty = self.bind_expr(arg, Some(&Type::Prim(p)))?;
                let from = ty.prim();
                let numeric = matches!(
                    ty,
                    Type::Prim(_)
                        | Type::Dynamic
                        | Type::Instance(builtin::INT | builtin::FLOAT | builtin::BOOL | builtin::OBJECT)
                );
                if !numeric {
                    return Err(StaticError::type_error(
                        format!("cannot convert {} to {}", self.type_name(&ty), p),
                        arg.span.clone(),
                    ));
                }
                self.map
                    .record_special(expr.id, SpecialCall::PrimConvert { to: p, from });
                Ok(Type::Prim(p))
            }
            StaticName::Array => Err(StaticError::type_error(
                "Array must be subscripted with a primitive element type",
                span.clone(),
            )),
        }
    }

    fn single_arg<'e>(&self, name: &str, args: &'e [Arg], span: &Span) -> StaticResult<&'e ExprS> {
        let positional = self.only_positional(name, args, span)?;
        match positional.as_slice() {
            [arg] => Ok(*arg),
            _ => Err(StaticError::type_error(
                format!("{}() takes exactly one argument, got {}", name, args.len()),
                span.clone(),
            )),
        }
    }

    fn bind_array_new(&mut self, expr: &ExprS, func: &ExprS, args: &[Arg]) -> StaticResult<Type> {
        let prim = match resolve_annotation(self.symbols, self.module, func)? {
            Type::Array(p) => p,
            other => {
                return Err(StaticError::type_error(
                    format!("{} is not an array type", self.type_name(&other)),
                    func.span.clone(),
                ));
            }
        };
        let len = self.single_arg("Array", args, &expr.span)?;
        self.bind_index(len)?;
        self.map.record_expr(func.id, Type::Dynamic);
        self.map.record_special(expr.id, SpecialCall::ArrayNew(prim));
        Ok(Type::Array(prim))
    }

    fn bind_builtin_call(&mut self, builtin_fn: BuiltinFn, args: &[Arg]) -> StaticResult<Type> {
        let mut first = None;
        for a in args {
            let t = self.bind_boxed(a.value())?;
            first.get_or_insert(t);
        }
        Ok(match builtin_fn {
            BuiltinFn::Isinstance | BuiltinFn::Issubclass => Type::Instance(builtin::BOOL),
            BuiltinFn::Len => Type::Instance(builtin::INT),
            BuiltinFn::Repr => Type::Instance(builtin::STR),
            BuiltinFn::Print => Type::NoneType,
            BuiltinFn::Abs => match first {
                Some(t @ Type::Instance(builtin::INT | builtin::FLOAT)) => t,
                _ => Type::Dynamic,
            },
            BuiltinFn::Range => Type::Dynamic,
        })
    }

    /// `C(args)`. The call itself stays dynamic; arguments are checked
    /// against `__init__` when the class has a static layout.
    fn bind_constructor(&mut self, class: ClassId, args: &[Arg], span: &Span) -> StaticResult<Type> {
        let symbols = self.symbols;
        let info = symbols.class(class);
        if info.builtin {
            self.bind_dynamic_args(args)?;
            return Ok(match class {
                builtin::TYPE => Type::Dynamic,
                c => Type::Instance(c),
            });
        }
        if info.dynamic_base {
            self.bind_dynamic_args(args)?;
            return Ok(Type::Dynamic);
        }
        match symbols.find_method(class, "__init__") {
            Some((_, m)) if !symbols.function(m.func).dynamic => {
                let init = symbols.function(m.func);
                let params = init.params.get(1..).unwrap_or_default();
                self.plan_arguments(&info.name, params, args, span)?;
            }
            _ => self.bind_dynamic_args(args)?,
        }
        Ok(Type::Instance(class))
    }
}
