//! Declaration pass: one walk over a module's top-level statements that
//! records imports, classes (bases, slots, vtables) and function signatures
//! in the symbol table. No expression is typed here.

use tracing::trace;

use super::lattice::{ClassHierarchy, ClassId, FuncId, Type, builtin, is_assignable};
use super::symbols::{
    ClassInfo, ConstValue, Field, FunctionInfo, MethodSlot, ParamInfo, StaticName, Symbol,
    SymbolTable, TypingName,
};
use super::{StaticError, StaticResult};
use crate::parser::ast::{
    ClassDef, Expr, ExprS, FunctionDef, Literal, ParamKind, Stmt, StmtS, UnaryOp,
};
use crate::types::{Prim, Span};

pub const STATIC_MODULE: &str = "__static__";

pub(crate) fn declare_module(
    symbols: &mut SymbolTable,
    module: &str,
    program: &[StmtS],
) -> StaticResult<()> {
    for stmt in program {
        match &stmt.node {
            Stmt::Import(aliases) => {
                for a in aliases {
                    let sym = if a.asname.is_some() {
                        Symbol::Module(a.name.clone())
                    } else {
                        Symbol::Module(a.bound_name().to_string())
                    };
                    symbols.define(module, a.bound_name(), sym);
                }
            }
            Stmt::ImportFrom { module: from, names } => {
                declare_from_import(symbols, module, from, names, &stmt.span)?;
            }
            _ => {}
        }
    }

    // names first, so annotations may refer to classes defined further down
    let mut classes = Vec::new();
    let mut functions = Vec::new();
    for stmt in program {
        match &stmt.node {
            Stmt::Class(class) if class.decorators.is_empty() => {
                let id = symbols.add_class(ClassInfo {
                    name: class.name.clone(),
                    module: module.to_string(),
                    qualname: format!("{}.{}", module, class.name),
                    base: Some(builtin::OBJECT),
                    dynamic_base: false,
                    builtin: false,
                    fields: Vec::new(),
                    vtable: Vec::new(),
                    declared: false,
                    node: Some(stmt.id),
                    span: stmt.span.clone(),
                });
                symbols.define(module, &class.name, Symbol::Class(id));
                classes.push((id, class, stmt));
            }
            Stmt::Def(def) if def.decorators.is_empty() => {
                let id = symbols.add_function(FunctionInfo {
                    name: def.name.clone(),
                    qualname: def.name.clone(),
                    module: module.to_string(),
                    params: Vec::new(),
                    ret: Type::Dynamic,
                    class: None,
                    dynamic: false,
                    node: stmt.id,
                });
                symbols.define(module, &def.name, Symbol::Function(id));
                functions.push((id, def));
            }
            Stmt::Class(class) => {
                symbols.define(module, &class.name, Symbol::Global(Type::Dynamic))
            }
            Stmt::Def(def) => symbols.define(module, &def.name, Symbol::Global(Type::Dynamic)),
            _ => {}
        }
    }

    // value names before classes and signatures, so using one as a base or
    // annotation is rejected; types are refined once classes are declared
    declare_globals(symbols, module, program, true)?;
    for (id, class, stmt) in classes {
        declare_class(symbols, module, id, class, &stmt.span)?;
    }
    for (id, def) in functions {
        let (params, ret, dynamic) = declare_signature(symbols, module, def, None)?;
        let f = symbols.function_mut(id);
        f.params = params;
        f.ret = ret;
        f.dynamic = dynamic;
    }

    declare_globals(symbols, module, program, false)?;
    Ok(())
}

fn declare_from_import(
    symbols: &mut SymbolTable,
    module: &str,
    from: &str,
    names: &[crate::parser::ast::Alias],
    span: &Span,
) -> StaticResult<()> {
    let star = names.iter().any(|a| a.name == "*");
    match from {
        STATIC_MODULE => {
            if star {
                return Err(StaticError::declaration(
                    "cannot import * from __static__",
                    span.clone(),
                ));
            }
            for a in names {
                let name = match a.name.as_str() {
                    "cast" => StaticName::Cast,
                    "box" => StaticName::Box,
                    "unbox" => StaticName::Unbox,
                    "Array" => StaticName::Array,
                    other => match Prim::from_static_name(other) {
                        Some(p) => StaticName::Prim(p),
                        None => {
                            return Err(StaticError::declaration(
                                format!("unsupported static import {}", other),
                                span.clone(),
                            ));
                        }
                    },
                };
                symbols.define(module, a.bound_name(), Symbol::Static(name));
            }
        }
        "typing" if !star => {
            for a in names {
                let sym = match a.name.as_str() {
                    "Optional" => Symbol::Typing(TypingName::Optional),
                    _ => Symbol::Global(Type::Dynamic),
                };
                symbols.define(module, a.bound_name(), sym);
            }
        }
        _ if star => {
            if let Some(scope) = symbols.scope_mut(module) {
                scope.star_imports.push(from.to_string());
            }
        }
        _ => {
            for a in names {
                symbols.define(
                    module,
                    a.bound_name(),
                    Symbol::Imported {
                        module: from.to_string(),
                        name: a.name.clone(),
                    },
                );
            }
        }
    }
    Ok(())
}

/// Module-level assignments: annotated names keep their declared type, all
/// other assigned names are dynamic.
/// With `provisional`, annotation errors are left for the final pass.
fn declare_globals(
    symbols: &mut SymbolTable,
    module: &str,
    program: &[StmtS],
    provisional: bool,
) -> StaticResult<()> {
    for stmt in program {
        match &stmt.node {
            Stmt::AnnAssign {
                target, annotation, ..
            } => {
                if let Expr::Name(name) = &target.node {
                    let ty = match resolve_annotation(symbols, module, annotation) {
                        Ok(ty) => ty,
                        Err(_) if provisional => Type::Dynamic,
                        Err(e) => return Err(e),
                    };
                    // primitives are rejected by the binder with a better message
                    let ty = if ty.prim().is_some() { Type::Dynamic } else { ty };
                    symbols.define(module, name, Symbol::Global(ty));
                }
            }
            Stmt::Assign { targets, .. } => {
                for t in targets {
                    declare_dynamic_targets(symbols, module, t);
                }
            }
            Stmt::For { target, .. } => declare_dynamic_targets(symbols, module, target),
            _ => {}
        }
    }
    Ok(())
}

fn declare_dynamic_targets(symbols: &mut SymbolTable, module: &str, target: &ExprS) {
    match &target.node {
        Expr::Name(name) => {
            let known = symbols
                .scope(module)
                .is_some_and(|s| s.symbols.contains_key(name));
            if !known {
                symbols.define(module, name, Symbol::Global(Type::Dynamic));
            }
        }
        Expr::Tuple(items) | Expr::List(items) => {
            for i in items {
                declare_dynamic_targets(symbols, module, i);
            }
        }
        _ => {}
    }
}

fn declare_class(
    symbols: &mut SymbolTable,
    module: &str,
    id: ClassId,
    class: &ClassDef,
    span: &Span,
) -> StaticResult<()> {
    trace!(class = %class.name, "declaring class");
    if class.bases.len() > 1 {
        return Err(StaticError::declaration(
            format!("class {} cannot derive from more than one base", class.name),
            span.clone(),
        ));
    }
    let mut base = Some(builtin::OBJECT);
    let mut dynamic_base = false;
    if let Some(b) = class.bases.first() {
        match resolve_base(symbols, module, b)? {
            Some(cid) => {
                let info = symbols.class(cid);
                if info.builtin && cid != builtin::OBJECT {
                    return Err(StaticError::declaration(
                        format!(
                            "class {} cannot derive from builtin type {}",
                            class.name, info.name
                        ),
                        b.span.clone(),
                    ));
                }
                if !info.declared {
                    return Err(StaticError::declaration(
                        format!(
                            "class {} derives from {} before it is defined",
                            class.name, info.name
                        ),
                        b.span.clone(),
                    ));
                }
                base = Some(cid);
                dynamic_base = info.dynamic_base;
            }
            None => dynamic_base = true,
        }
    }

    let (mut fields, mut vtable) = match base {
        Some(b) if !dynamic_base => {
            let info = symbols.class(b);
            (info.fields.clone(), info.vtable.clone())
        }
        _ => (Vec::new(), Vec::new()),
    };
    {
        let info = symbols.class_mut(id);
        info.base = base;
        info.dynamic_base = dynamic_base;
    }

    // methods
    for stmt in &class.body {
        let Stmt::Def(def) = &stmt.node else {
            continue;
        };
        if !def.decorators.is_empty() {
            continue;
        }
        let (params, ret, dynamic) = declare_signature(symbols, module, def, Some(id))?;
        let fid = symbols.add_function(FunctionInfo {
            name: def.name.clone(),
            qualname: format!("{}.{}", class.name, def.name),
            module: module.to_string(),
            params,
            ret,
            class: Some(id),
            dynamic,
            node: stmt.id,
        });
        match vtable.iter().position(|m| m.name == def.name) {
            Some(idx) => {
                check_override(symbols, vtable[idx].func, fid, &stmt.span)?;
                vtable[idx] = MethodSlot {
                    name: def.name.clone(),
                    func: fid,
                    defining: id,
                };
            }
            None => vtable.push(MethodSlot {
                name: def.name.clone(),
                func: fid,
                defining: id,
            }),
        }
    }

    // slots
    let own_slots = if dynamic_base {
        Vec::new()
    } else {
        collect_slots(symbols, module, class)?
    };
    for (name, ty, slot_span) in own_slots {
        if class.body.iter().any(|s| matches!(&s.node, Stmt::Def(d) if d.name == name))
            || vtable.iter().any(|m| m.name == name)
        {
            return Err(StaticError::declaration(
                format!("slot {} conflicts with a method of {}", name, class.name),
                slot_span,
            ));
        }
        if let Some(existing) = fields.iter().find(|f| f.name == name) {
            if existing.ty != ty && !ty.is_dynamic() {
                return Err(StaticError::declaration(
                    format!(
                        "cannot change type of inherited attribute {} from {} to {}",
                        name,
                        existing.ty.name(symbols),
                        ty.name(symbols)
                    ),
                    slot_span,
                ));
            }
            continue;
        }
        let offset = fields.len();
        fields.push(Field {
            name,
            ty,
            offset,
            defining: id,
        });
    }

    let info = symbols.class_mut(id);
    info.fields = fields;
    info.vtable = vtable;
    info.declared = true;
    Ok(())
}

/// `None` means the base has no static layout (and makes the class dynamic).
fn resolve_base(
    symbols: &SymbolTable,
    module: &str,
    base: &ExprS,
) -> StaticResult<Option<ClassId>> {
    let sym = match &base.node {
        Expr::Name(n) => symbols.resolve(module, n),
        Expr::Attribute { object, attr } => match &object.node {
            Expr::Name(m) => match symbols.resolve(module, m) {
                Some(Symbol::Module(target)) => symbols.export(&target, attr),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    };
    match sym {
        Some(Symbol::Class(c)) => Ok(Some(c)),
        Some(Symbol::Function(_))
        | Some(Symbol::Builtin(_))
        | Some(Symbol::Static(_))
        | Some(Symbol::Typing(_))
        | Some(Symbol::Module(_)) => Err(not_a_class(base)),
        Some(Symbol::Global(t)) if !t.is_dynamic() => Err(not_a_class(base)),
        _ => Ok(None),
    }
}

fn not_a_class(base: &ExprS) -> StaticError {
    let name = match &base.node {
        Expr::Name(n) => n.clone(),
        Expr::Attribute { attr, .. } => attr.clone(),
        _ => "base".to_string(),
    };
    StaticError::declaration(format!("{} is not a class", name), base.span.clone())
}

/// Typed slots declared by the class: bare class-body annotations and
/// `self.x` assignments anywhere in `__init__`.
fn collect_slots(
    symbols: &SymbolTable,
    module: &str,
    class: &ClassDef,
) -> StaticResult<Vec<(String, Type, Span)>> {
    let mut slots: Vec<(String, Type, Span)> = Vec::new();
    let add = |slots: &mut Vec<(String, Type, Span)>, name: &str, ty: Type, span: Span| {
        match slots.iter_mut().find(|(n, _, _)| n == name) {
            Some((_, existing, _)) if existing.is_dynamic() => {
                *existing = ty;
                Ok(())
            }
            Some((_, existing, _)) if *existing != ty && !ty.is_dynamic() => {
                Err(StaticError::declaration(
                    format!(
                        "conflicting types for attribute {}: {} and {}",
                        name,
                        existing.name(symbols),
                        ty.name(symbols)
                    ),
                    span,
                ))
            }
            Some(_) => Ok(()),
            None => {
                slots.push((name.to_string(), ty, span));
                Ok(())
            }
        }
    };

    for stmt in &class.body {
        match &stmt.node {
            Stmt::AnnAssign {
                target,
                annotation,
                value: None,
            } => {
                if let Expr::Name(n) = &target.node {
                    let ty = resolve_annotation(symbols, module, annotation)?;
                    add(&mut slots, n, ty, stmt.span.clone())?;
                }
            }
            Stmt::Def(def) if def.name == "__init__" && def.decorators.is_empty() => {
                let Some(this) = def.params.first().map(|p| p.name.as_str()) else {
                    continue;
                };
                let mut found = Vec::new();
                self_assignments(&def.body, this, &mut found);
                for (name, annotation, span) in found {
                    let ty = match annotation {
                        Some(a) => resolve_annotation(symbols, module, a)?,
                        None => Type::Dynamic,
                    };
                    add(&mut slots, &name, ty, span)?;
                }
            }
            _ => {}
        }
    }
    Ok(slots)
}

fn self_assignments<'a>(
    body: &'a [StmtS],
    this: &str,
    out: &mut Vec<(String, Option<&'a ExprS>, Span)>,
) {
    let attr_of_self = |e: &ExprS| -> Option<String> {
        match &e.node {
            Expr::Attribute { object, attr } => match &object.node {
                Expr::Name(n) if n == this => Some(attr.clone()),
                _ => None,
            },
            _ => None,
        }
    };
    for stmt in body {
        match &stmt.node {
            Stmt::AnnAssign {
                target, annotation, ..
            } => {
                if let Some(name) = attr_of_self(target) {
                    out.push((name, Some(annotation), stmt.span.clone()));
                }
            }
            Stmt::Assign { targets, .. } => {
                for t in targets {
                    if let Some(name) = attr_of_self(t) {
                        out.push((name, None, stmt.span.clone()));
                    }
                }
            }
            Stmt::If {
                then_block,
                elif_blocks,
                else_block,
                ..
            } => {
                self_assignments(then_block, this, out);
                for (_, b) in elif_blocks {
                    self_assignments(b, this, out);
                }
                if let Some(b) = else_block {
                    self_assignments(b, this, out);
                }
            }
            Stmt::While { body, .. } | Stmt::For { body, .. } => {
                self_assignments(body, this, out)
            }
            Stmt::Try {
                body,
                handlers,
                finally,
            } => {
                self_assignments(body, this, out);
                for h in handlers {
                    self_assignments(&h.body, this, out);
                }
                if let Some(f) = finally {
                    self_assignments(f, this, out);
                }
            }
            _ => {}
        }
    }
}

fn check_override(
    symbols: &SymbolTable,
    base_fn: FuncId,
    override_fn: FuncId,
    span: &Span,
) -> StaticResult<()> {
    let base = symbols.function(base_fn);
    let over = symbols.function(override_fn);
    if base.name.starts_with("__") && base.name.ends_with("__") {
        return Ok(());
    }
    let incompatible = |detail: String| {
        StaticError::type_error(
            format!(
                "{} overrides {} incompatibly: {}",
                over.qualname, base.qualname, detail
            ),
            span.clone(),
        )
    };
    if base.dynamic || over.dynamic {
        return Ok(());
    }
    if base.params.len() != over.params.len() {
        return Err(incompatible(format!(
            "expected {} parameters, got {}",
            base.params.len(),
            over.params.len()
        )));
    }
    for (b, o) in base.params.iter().zip(&over.params).skip(1) {
        if !is_assignable(symbols, &b.ty, &o.ty) {
            return Err(incompatible(format!(
                "parameter {} of type {} does not accept {}",
                o.name,
                o.ty.name(symbols),
                b.ty.name(symbols)
            )));
        }
    }
    if !is_assignable(symbols, &over.ret, &base.ret) {
        return Err(incompatible(format!(
            "return type {} is not compatible with {}",
            over.ret.name(symbols),
            base.ret.name(symbols)
        )));
    }
    Ok(())
}

/// Resolves the parameter and return types of a function. The third value
/// tells whether calls to it must stay dynamic.
pub(crate) fn declare_signature(
    symbols: &SymbolTable,
    module: &str,
    def: &FunctionDef,
    class: Option<ClassId>,
) -> StaticResult<(Vec<ParamInfo>, Type, bool)> {
    let mut dynamic = !def.decorators.is_empty();
    let mut params = Vec::with_capacity(def.params.len());
    for (i, p) in def.params.iter().enumerate() {
        if p.kind != ParamKind::Normal {
            if p.annotation.is_some() {
                return Err(StaticError::type_error(
                    "cannot support generic varargs/kwargs",
                    p.span.clone(),
                ));
            }
            dynamic = true;
        }
        let ty = match (class, i, &p.annotation) {
            (Some(cid), 0, _) => Type::Instance(cid),
            (_, _, Some(a)) => resolve_annotation(symbols, module, a)?,
            (_, _, None) => Type::Dynamic,
        };
        params.push(ParamInfo {
            name: p.name.clone(),
            ty,
            has_default: p.default.is_some(),
            default: p.default.as_ref().and_then(constant_value),
            kind: p.kind,
        });
    }
    let ret = match &def.returns {
        Some(r) => resolve_annotation(symbols, module, r)?,
        None => Type::Dynamic,
    };
    Ok((params, ret, dynamic))
}

pub fn constant_value(expr: &ExprS) -> Option<ConstValue> {
    match &expr.node {
        Expr::Literal(Literal::Int(i)) => Some(ConstValue::Int(*i)),
        Expr::Literal(Literal::Float(f)) => Some(ConstValue::Float(*f)),
        Expr::Literal(Literal::String(s)) => Some(ConstValue::Str(s.clone())),
        Expr::Literal(Literal::Bool(b)) => Some(ConstValue::Bool(*b)),
        Expr::Literal(Literal::None) => Some(ConstValue::None),
        Expr::Unary {
            op: UnaryOp::Negate,
            operand,
        } => match constant_value(operand)? {
            ConstValue::Int(i) => i.checked_neg().map(ConstValue::Int),
            ConstValue::Float(f) => Some(ConstValue::Float(-f)),
            _ => None,
        },
        _ => None,
    }
}

/// Turns an annotation expression into a static type. Names that cannot be
/// resolved degrade to `dynamic`; names that resolve to values are errors.
pub fn resolve_annotation(
    symbols: &SymbolTable,
    module: &str,
    annotation: &ExprS,
) -> StaticResult<Type> {
    match &annotation.node {
        Expr::Literal(Literal::None) => Ok(Type::NoneType),
        Expr::Literal(Literal::String(s)) => {
            // forward reference
            let name = s.trim();
            if name.chars().all(|c| c.is_alphanumeric() || c == '_') && !name.is_empty() {
                let sym = symbols.resolve(module, name);
                symbol_as_type(symbols, sym, name, &annotation.span)
            } else {
                Ok(Type::Dynamic)
            }
        }
        Expr::Name(name) => {
            let sym = symbols.resolve(module, name);
            symbol_as_type(symbols, sym, name, &annotation.span)
        }
        Expr::Attribute { object, attr } => match &object.node {
            Expr::Name(m) => match symbols.resolve(module, m) {
                Some(Symbol::Module(target)) => {
                    let sym = symbols.export(&target, attr);
                    symbol_as_type(symbols, sym, attr, &annotation.span)
                }
                _ => Ok(Type::Dynamic),
            },
            _ => Ok(Type::Dynamic),
        },
        Expr::Subscript { object, index } => {
            let head = match &object.node {
                Expr::Name(n) => symbols.resolve(module, n),
                _ => None,
            };
            match head {
                Some(Symbol::Typing(TypingName::Optional)) => {
                    let inner = resolve_annotation(symbols, module, index)?;
                    Type::optional(inner.clone()).ok_or_else(|| {
                        StaticError::type_error(
                            format!("cannot use primitive type {} in Optional", inner.name(symbols)),
                            annotation.span.clone(),
                        )
                    })
                }
                Some(Symbol::Static(StaticName::Array)) => {
                    match resolve_annotation(symbols, module, index)? {
                        Type::Prim(p) => Ok(Type::Array(p)),
                        other => Err(StaticError::type_error(
                            format!(
                                "Array element type must be a primitive type, got {}",
                                other.name(symbols)
                            ),
                            index.span.clone(),
                        )),
                    }
                }
                Some(Symbol::Class(c))
                    if matches!(c, builtin::LIST | builtin::DICT | builtin::TUPLE | builtin::TYPE) =>
                {
                    let items: Vec<&ExprS> = match &index.node {
                        Expr::Tuple(items) => items.iter().collect(),
                        _ => vec![index.as_ref()],
                    };
                    let mut args = Vec::with_capacity(items.len());
                    for item in items {
                        let t = resolve_annotation(symbols, module, item)?;
                        if let Type::Prim(p) = t {
                            return Err(StaticError::type_error(
                                format!(
                                    "cannot use primitive type {} as a type argument of {}",
                                    p,
                                    symbols.class_name(c)
                                ),
                                item.span.clone(),
                            ));
                        }
                        args.push(t);
                    }
                    if c == builtin::TYPE {
                        return Ok(Type::Instance(builtin::TYPE));
                    }
                    Ok(Type::Generic { class: c, args })
                }
                _ => Ok(Type::Dynamic),
            }
        }
        _ => Ok(Type::Dynamic),
    }
}

fn symbol_as_type(
    symbols: &SymbolTable,
    sym: Option<Symbol>,
    name: &str,
    span: &Span,
) -> StaticResult<Type> {
    let not_a_type = || StaticError::declaration(format!("{} is not a type", name), span.clone());
    match sym {
        None => Ok(Type::Dynamic),
        Some(Symbol::Class(c)) => {
            let info = symbols.class(c);
            if info.dynamic_base {
                Ok(Type::Dynamic)
            } else {
                Ok(Type::Instance(c))
            }
        }
        Some(Symbol::Static(StaticName::Prim(p))) => Ok(Type::Prim(p)),
        Some(Symbol::Typing(_)) => Ok(Type::Dynamic),
        Some(Symbol::Global(t)) if t.is_dynamic() => Ok(Type::Dynamic),
        Some(_) => Err(not_a_type()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_source;
    use crate::semantic::StaticErrorKind;
    use std::rc::Rc;

    fn declare(src: &str) -> Result<SymbolTable, StaticError> {
        let mut table = SymbolTable::new();
        table.add_module("m", "m.py", Rc::new(parse_source(src).unwrap()));
        table.declare_module("m")?;
        Ok(table)
    }

    fn class_id(table: &SymbolTable, name: &str) -> ClassId {
        match table.lookup("m", name) {
            Type::Class(c) => c,
            other => panic!("{} is {:?}", name, other),
        }
    }

    #[test]
    fn static_imports() {
        let table = declare("from __static__ import int8, size_t, cast, Array\n").unwrap();
        assert_eq!(
            table.resolve("m", "size_t"),
            Some(Symbol::Static(StaticName::Prim(Prim::UInt64)))
        );
        assert_eq!(table.resolve("m", "cast"), Some(Symbol::Static(StaticName::Cast)));
        let err = declare("from __static__ import int128\n").unwrap_err();
        assert!(err.message.contains("unsupported static import"));
        assert!(declare("from __static__ import *\n").is_err());
    }

    #[test]
    fn slots_and_offsets() {
        let src = "\
class B:
    a: int
    def __init__(self, a: int) -> None:
        self.a = a
        self.b: str = 'x'

class D(B):
    def __init__(self) -> None:
        self.c = 1
        if True:
            self.d: Optional[B] = None
";
        let table = declare(&format!("from typing import Optional\n{}", src)).unwrap();
        let b = class_id(&table, "B");
        let d = class_id(&table, "D");
        let fields: Vec<(&str, usize)> = table
            .class(d)
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.offset))
            .collect();
        assert_eq!(fields, vec![("a", 0), ("b", 1), ("c", 2), ("d", 3)]);
        assert_eq!(table.find_field(d, "a").unwrap().defining, b);
        assert_eq!(
            table.find_field(d, "d").unwrap().ty,
            Type::Optional(Box::new(Type::Instance(b)))
        );
        assert_eq!(table.find_field(b, "b").unwrap().ty, Type::Instance(builtin::STR));
    }

    #[test]
    fn vtable_keeps_inherited_indices() {
        let src = "\
class B:
    def f(self) -> int:
        return 1
    def g(self) -> int:
        return 2

class D(B):
    def g(self) -> int:
        return 3
    def h(self) -> None:
        pass
";
        let table = declare(src).unwrap();
        let b = class_id(&table, "B");
        let d = class_id(&table, "D");
        let names: Vec<&str> = table.class(d).vtable.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["f", "g", "h"]);
        assert_eq!(table.class(d).vtable[0].defining, b);
        assert_eq!(table.class(d).vtable[1].defining, d);
        let (slot, _) = table.find_method(d, "g").unwrap();
        assert_eq!(slot, 1);
    }

    #[test]
    fn incompatible_override_is_rejected() {
        let src = "\
class B:
    def f(self) -> B:
        return self

class C:
    pass

class D(B):
    def f(self) -> C:
        return C()
";
        let err = declare(src).unwrap_err();
        assert_eq!(err.kind, StaticErrorKind::Type);
        assert!(err.message.contains("D.f overrides B.f"), "{}", err.message);
    }

    #[test]
    fn unannotated_override_is_allowed() {
        let src = "class B:\n    def f(self) -> B:\n        return self\nclass D(B):\n    def f(self):\n        return 42\n";
        assert!(declare(src).is_ok());
    }

    #[test]
    fn base_errors() {
        assert!(declare("x: int = 1\nclass C(x):\n    pass\n").is_err());
        assert!(declare("class A:\n    pass\nclass B:\n    pass\nclass C(A, B):\n    pass\n").is_err());
        assert!(declare("class C(int):\n    pass\n").is_err());
        assert!(declare("class C(D):\n    pass\nclass D:\n    pass\n").is_err());
        let table = declare("class E(Exception):\n    pass\nclass F(Unknown):\n    pass\n").unwrap();
        assert!(table.class(class_id(&table, "E")).dynamic_base);
        assert!(table.class(class_id(&table, "F")).dynamic_base);
    }

    #[test]
    fn module_values_are_not_types() {
        let e = declare("x: int = 1\nclass C(x):\n    pass\n").unwrap_err();
        assert_eq!(e.kind, StaticErrorKind::Declaration);
        assert!(e.message.contains("x is not a class"), "{}", e.message);
        let e = declare("y: int = 1\ndef f(a: y) -> None:\n    pass\n").unwrap_err();
        assert!(e.message.contains("y is not a type"), "{}", e.message);
        let e = declare("class B:\n    z: w\nw: str = 'a'\n").unwrap_err();
        assert!(e.message.contains("w is not a type"), "{}", e.message);
    }

    #[test]
    fn module_values_keep_class_types() {
        let table = declare("class E(Exception):\n    pass\nb: B = B()\ne: E = E()\nclass B:\n    pass\n")
            .unwrap();
        let b = class_id(&table, "B");
        assert_eq!(table.lookup("m", "b"), Type::Instance(b));
        assert_eq!(table.lookup("m", "e"), Type::Dynamic);
    }

    #[test]
    fn slot_conflicts() {
        let src = "class B:\n    x: int\nclass D(B):\n    x: str\n";
        assert!(declare(src).is_err());
        let src = "class B:\n    x: int\n    def x(self):\n        pass\n";
        assert!(declare(src).is_err());
    }

    #[test]
    fn signatures() {
        let src = "\
from __static__ import int8
def f(a: int8, b: str = 'x', c=-3) -> int8:
    return a
def g(*args):
    pass
@decorate
def h(x: int) -> int:
    return x
";
        let table = declare(src).unwrap();
        let Type::Function(f) = table.lookup("m", "f") else {
            panic!("f should be a function");
        };
        let info = table.function(f);
        assert_eq!(info.params[0].ty, Type::Prim(Prim::Int8));
        assert_eq!(info.params[1].default, Some(ConstValue::Str("x".into())));
        assert_eq!(info.params[2].default, Some(ConstValue::Int(-3)));
        assert_eq!(info.ret, Type::Prim(Prim::Int8));
        let Type::Function(g) = table.lookup("m", "g") else {
            panic!("g should be a function");
        };
        assert!(table.function(g).dynamic);
        assert_eq!(table.lookup("m", "h"), Type::Dynamic);
    }

    #[test]
    fn annotation_errors() {
        let err = declare("def f(*args: int):\n    pass\n").unwrap_err();
        assert_eq!(err.message, "cannot support generic varargs/kwargs");
        let err = declare("from typing import Optional\nfrom __static__ import int8\ndef f(x: Optional[int8]):\n    pass\n").unwrap_err();
        assert_eq!(err.kind, StaticErrorKind::Type);
        let err = declare("def g():\n    pass\ndef f(x: g):\n    pass\n").unwrap_err();
        assert!(err.message.contains("g is not a type"));
        let table = declare("def f(x: Missing) -> 'C':\n    pass\nclass C:\n    pass\n").unwrap();
        let Type::Function(f) = table.lookup("m", "f") else {
            panic!("f should be a function");
        };
        assert_eq!(table.function(f).params[0].ty, Type::Dynamic);
        assert_eq!(table.function(f).ret, Type::Instance(class_id(&table, "C")));
    }
}
