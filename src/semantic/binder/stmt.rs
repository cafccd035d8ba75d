use super::expr::constant_int;
use super::{Binder, Fit, FlowState, LoopFlow, NameKind, assigned_names};
use crate::parser::ast::{ClassDef, Expr, ExprS, Literal, NodeId, Stmt, StmtS};
use crate::semantic::declare::resolve_annotation;
use crate::semantic::lattice::{Type, builtin};
use crate::semantic::type_map::ClassLayout;
use crate::semantic::{StaticError, StaticResult};
use crate::types::Span;

impl<'a> Binder<'a> {
    pub(super) fn bind_block(&mut self, block: &[StmtS]) -> StaticResult<()> {
        for stmt in block {
            self.bind_stmt(stmt)?;
        }
        Ok(())
    }

    fn bind_stmt(&mut self, stmt: &StmtS) -> StaticResult<()> {
        let span = &stmt.span;
        match &stmt.node {
            Stmt::Expr(e) => {
                self.bind_expr(e, None)?;
            }
            Stmt::Assign { targets, value } => {
                let expected = targets.iter().rev().find_map(|t| self.target_prim(t));
                let vt = self.bind_expr(value, expected.as_ref())?;
                let constant = constant_int(value);
                for target in targets.iter().rev() {
                    self.assign_target(target, &vt, constant)?;
                }
            }
            Stmt::AnnAssign {
                target,
                annotation,
                value,
            } => self.bind_ann_assign(target, annotation, value.as_ref())?,
            Stmt::AugAssign { target, op, value } => {
                let loaded = self.bind_expr(target, None)?;
                let prim_expected = loaded.prim().map(Type::Prim);
                let vt = self.bind_expr(value, prim_expected.as_ref())?;
                let result = self.arith(stmt.id, *op, (target.id, &loaded), (value.id, &vt), span)?;
                let coercion = match &target.node {
                    Expr::Name(n) => self.assign_name(n, &result, None, span)?,
                    _ => self.fit_value(&result, &loaded, None, span)?,
                };
                if let Some(c) = coercion {
                    self.map.record_target_coercion(target.id, c);
                }
            }
            Stmt::Return(value) => self.bind_return(value.as_ref(), span)?,
            Stmt::Pass | Stmt::Global(_) | Stmt::Nonlocal(_) => {}
            Stmt::Break | Stmt::Continue => {
                let state = std::mem::replace(&mut self.ctx.flow, FlowState::unreachable());
                let is_break = matches!(stmt.node, Stmt::Break);
                let Some(lp) = self.ctx.loops.last_mut() else {
                    let word = if is_break { "break" } else { "continue" };
                    return Err(StaticError::type_error(
                        format!("'{}' outside loop", word),
                        span.clone(),
                    ));
                };
                if is_break {
                    lp.breaks.push(state);
                } else {
                    lp.continues.push(state);
                }
            }
            Stmt::Del(targets) => {
                for t in targets {
                    self.bind_del(t)?;
                }
            }
            Stmt::Raise(e) => {
                if let Some(e) = e {
                    self.bind_boxed(e)?;
                }
                self.ctx.flow = FlowState::unreachable();
            }
            Stmt::Assert { test, msg } => {
                let (yes, no) = self.bind_condition(test)?;
                if let Some(m) = msg {
                    self.ctx.flow = no;
                    self.bind_boxed(m)?;
                }
                self.ctx.flow = yes;
            }
            Stmt::Import(aliases) => {
                if !self.at_module_level() {
                    for a in aliases {
                        self.assign_name(a.bound_name(), &Type::Dynamic, None, span)?;
                    }
                }
            }
            Stmt::ImportFrom { names, .. } => {
                if !self.at_module_level() {
                    for a in names.iter().filter(|a| a.name != "*") {
                        self.assign_name(a.bound_name(), &Type::Dynamic, None, span)?;
                    }
                }
            }
            Stmt::If {
                condition,
                then_block,
                elif_blocks,
                else_block,
            } => {
                let (yes, mut no) = self.bind_condition(condition)?;
                self.ctx.flow = yes;
                self.bind_block(then_block)?;
                let mut exits = vec![self.ctx.flow.clone()];
                for (cond, block) in elif_blocks {
                    self.ctx.flow = no;
                    let (yes, next_no) = self.bind_condition(cond)?;
                    self.ctx.flow = yes;
                    self.bind_block(block)?;
                    exits.push(self.ctx.flow.clone());
                    no = next_no;
                }
                self.ctx.flow = no;
                if let Some(block) = else_block {
                    self.bind_block(block)?;
                }
                exits.push(self.ctx.flow.clone());
                self.ctx.flow = self.join_flows(exits);
            }
            Stmt::While { condition, body } => {
                let assigned = assigned_names(body);
                let entry = self.widen(self.ctx.flow.clone(), &assigned);
                self.ctx.flow = entry;
                let infinite = matches!(condition.node, Expr::Literal(Literal::Bool(true)));
                let (yes, mut no) = self.bind_condition(condition)?;
                self.ctx.flow = yes;
                let lp = self.bind_loop_body(body)?;
                let body_end = std::mem::replace(&mut self.ctx.flow, FlowState::unreachable());
                for back in lp.continues.iter().chain(std::iter::once(&body_end)) {
                    if back.reachable {
                        no.unbound.extend(back.unbound.iter().cloned());
                    }
                }
                let mut exits = lp.breaks;
                if !infinite {
                    exits.push(no);
                }
                self.ctx.flow = self.join_flows(exits);
            }
            Stmt::For {
                target,
                iterable,
                body,
            } => {
                let it = self.bind_expr(iterable, None)?;
                if let Type::Prim(p) = it {
                    return Err(StaticError::type_error(
                        format!("'{}' object is not iterable", p),
                        iterable.span.clone(),
                    ));
                }
                let elem = match &it {
                    Type::Generic { class, args } if *class == builtin::LIST => {
                        args.first().cloned().unwrap_or(Type::Dynamic)
                    }
                    Type::Instance(builtin::STR) => Type::Instance(builtin::STR),
                    _ => Type::Dynamic,
                };
                let mut assigned = assigned_names(body);
                collect_target_names(target, &mut assigned);
                let entry = self.widen(self.ctx.flow.clone(), &assigned);
                self.ctx.flow = entry.clone();
                self.assign_target(target, &elem, None)?;
                let lp = self.bind_loop_body(body)?;
                let body_end = std::mem::replace(&mut self.ctx.flow, FlowState::unreachable());
                let mut exits = vec![entry, body_end];
                exits.extend(lp.continues);
                exits.extend(lp.breaks);
                self.ctx.flow = self.join_flows(exits);
            }
            Stmt::Try {
                body,
                handlers,
                finally,
            } => self.bind_try(body, handlers, finally.as_deref())?,
            Stmt::Def(def) => {
                self.bind_function(stmt.id, def, None, span)?;
                if !self.at_module_level() {
                    self.assign_name(&def.name, &Type::Dynamic, None, span)?;
                }
            }
            Stmt::Class(class) => {
                self.bind_class(stmt.id, class)?;
                if !self.at_module_level() {
                    self.assign_name(&class.name, &Type::Dynamic, None, span)?;
                }
            }
        }
        Ok(())
    }

    fn bind_loop_body(&mut self, body: &[StmtS]) -> StaticResult<LoopFlow> {
        self.ctx.loops.push(LoopFlow::default());
        let result = self.bind_block(body);
        let lp = self.ctx.loops.pop().unwrap_or_default();
        result.map(|_| lp)
    }

    /// Primitive type of an assignment target, used to type the value.
    fn target_prim(&self, target: &ExprS) -> Option<Type> {
        match &target.node {
            Expr::Name(n) => self.declared_type(n).filter(|t| t.prim().is_some()),
            Expr::Attribute { object, attr } => {
                let Expr::Name(obj) = &object.node else {
                    return None;
                };
                let class = self.peek_name(obj).instance_class()?;
                if !self.symbols.class(class).is_static() {
                    return None;
                }
                let field = self.symbols.find_field(class, attr)?;
                field.ty.prim().map(Type::Prim)
            }
            Expr::Subscript { object, .. } => match &object.node {
                Expr::Name(obj) => match self.peek_name(obj) {
                    Type::Array(p) => Some(Type::Prim(p)),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        }
    }

    /// Binds a store of a value of type `value` into `target`.
    fn assign_target(&mut self, target: &ExprS, value: &Type, constant: Option<i128>) -> StaticResult<()> {
        let span = &target.span;
        match &target.node {
            Expr::Name(n) => {
                if let Some(c) = self.assign_name(n, value, constant, span)? {
                    self.map.record_target_coercion(target.id, c);
                }
                let stored = self.peek_name(n);
                self.map.record_expr(target.id, stored);
            }
            Expr::Tuple(items) | Expr::List(items) => {
                if let Type::Prim(p) = value {
                    return Err(StaticError::type_error(
                        format!("cannot unpack non-iterable {} object", p),
                        span.clone(),
                    ));
                }
                let elems: Vec<Type> = match value {
                    Type::Generic { class, args }
                        if *class == builtin::TUPLE && args.len() == items.len() =>
                    {
                        args.clone()
                    }
                    _ => vec![Type::Dynamic; items.len()],
                };
                for (item, elem) in items.iter().zip(&elems) {
                    self.assign_target(item, elem, None)?;
                }
                self.map.record_expr(target.id, value.clone());
            }
            Expr::Attribute { object, attr } => {
                let ot = self.bind_expr(object, None)?;
                let field = self.member_type(target.id, &ot, attr, span)?;
                if let Some(c) = self.fit_value(value, &field, constant, span)? {
                    self.map.record_target_coercion(target.id, c);
                }
                self.map.record_expr(target.id, field);
            }
            Expr::Subscript { object, index } => {
                let ot = self.bind_expr(object, None)?;
                let slot = if let Type::Array(p) = ot {
                    self.bind_index(index)?;
                    self.map.record_array_op(target.id, p);
                    Type::Prim(p)
                } else {
                    self.bind_boxed(index)?;
                    Type::Dynamic
                };
                if let Some(c) = self.fit_value(value, &slot, constant, span)? {
                    self.map.record_target_coercion(target.id, c);
                }
                self.map.record_expr(target.id, slot);
            }
            _ => {
                return Err(StaticError::type_error(
                    "cannot assign to expression",
                    span.clone(),
                ));
            }
        }
        Ok(())
    }

    fn bind_ann_assign(
        &mut self,
        target: &ExprS,
        annotation: &ExprS,
        value: Option<&ExprS>,
    ) -> StaticResult<()> {
        let ty = resolve_annotation(self.symbols, self.module, annotation)?;
        match &target.node {
            Expr::Name(n) => {
                self.declare_annotated(n, &ty, &target.span)?;
                if let Some(v) = value {
                    let vt = self.bind_expr(v, Some(&ty))?;
                    if let Some(c) = self.assign_name(n, &vt, constant_int(v), &v.span)? {
                        self.map.record_target_coercion(target.id, c);
                    }
                }
                self.map.record_expr(target.id, ty);
                Ok(())
            }
            _ => {
                let Some(v) = value else {
                    self.bind_expr(target, None)?;
                    return Ok(());
                };
                let expected = self.target_prim(target);
                let vt = self.bind_expr(v, expected.as_ref())?;
                self.assign_target(target, &vt, constant_int(v))
            }
        }
    }

    fn bind_return(&mut self, value: Option<&ExprS>, span: &Span) -> StaticResult<()> {
        if self.at_module_level() {
            return Err(StaticError::declaration("'return' outside function", span.clone()));
        }
        let ret = self.ctx.ret.clone();
        let (vt, node, constant) = match value {
            Some(v) => (self.bind_expr(v, Some(&ret))?, Some(v.id), constant_int(v)),
            None => (Type::NoneType, None, None),
        };
        let coercion = if constant.is_some() && vt.prim().is_some() && ret.prim().is_some() {
            self.fit_value(&vt, &ret, constant, span)?
        } else {
            match self.fit(&vt, &ret) {
                Fit::Exact => None,
                Fit::Coerce(c) => Some(c),
                Fit::Mismatch => {
                    return Err(StaticError::type_error(
                        format!(
                            "return type mismatch in {}: expected {}, got {}",
                            self.ctx.qualname,
                            self.type_name(&ret),
                            self.type_name(&vt)
                        ),
                        span.clone(),
                    ));
                }
            }
        };
        if let (Some(c), Some(node)) = (coercion, node) {
            self.map.record_coercion(node, c);
        }
        self.ctx.flow = FlowState::unreachable();
        Ok(())
    }

    fn bind_del(&mut self, target: &ExprS) -> StaticResult<()> {
        match &target.node {
            Expr::Name(n) => {
                let kind = self.name_kind(n);
                if let Some(p) = self.declared_type(n).and_then(|t| t.prim()) {
                    return Err(StaticError::type_error(
                        format!("cannot delete primitive local {} of type {}", n, p),
                        target.span.clone(),
                    ));
                }
                if kind == NameKind::Local {
                    self.read_name(n, &target.span)?;
                    self.ctx.flow.unbound.insert(n.clone());
                }
                self.ctx.flow.types.remove(n);
            }
            Expr::Attribute { object, .. } => {
                self.bind_expr(object, None)?;
            }
            Expr::Subscript { object, index } => {
                self.bind_boxed(object)?;
                self.bind_boxed(index)?;
            }
            Expr::Tuple(items) | Expr::List(items) => {
                for i in items {
                    self.bind_del(i)?;
                }
            }
            _ => {
                return Err(StaticError::type_error(
                    "cannot delete expression",
                    target.span.clone(),
                ));
            }
        }
        self.map.record_expr(target.id, Type::Dynamic);
        Ok(())
    }

    fn bind_try(
        &mut self,
        body: &[StmtS],
        handlers: &[crate::parser::ast::ExceptHandler],
        finally: Option<&[StmtS]>,
    ) -> StaticResult<()> {
        let assigned = assigned_names(body);
        let before = self.widen(self.ctx.flow.clone(), &assigned);
        self.bind_block(body)?;
        let after_body = self.ctx.flow.clone();
        let handler_entry = self.join_flows(vec![before, after_body.clone()]);

        let mut exits = vec![after_body];
        for h in handlers {
            self.ctx.flow = handler_entry.clone();
            if let Some(t) = &h.exc_type {
                self.bind_boxed(t)?;
            }
            if let Some(n) = &h.name {
                self.assign_name(n, &Type::Dynamic, None, &h.span)?;
            }
            self.bind_block(&h.body)?;
            exits.push(self.ctx.flow.clone());
        }
        let normal = self.join_flows(exits);

        let Some(finally) = finally else {
            self.ctx.flow = normal;
            return Ok(());
        };
        // the finally block also runs while an exception propagates
        let entry = self.join_flows(vec![normal.clone(), handler_entry]);
        let entry_unbound = entry.unbound.clone();
        self.ctx.flow = entry;
        self.bind_block(finally)?;
        if !normal.reachable {
            self.ctx.flow = FlowState::unreachable();
        } else {
            self.ctx
                .flow
                .unbound
                .retain(|n| normal.unbound.contains(n) || !entry_unbound.contains(n));
        }
        Ok(())
    }

    /// Binds a class statement. Methods of a class with a static layout are
    /// bound against that class; the layout is recorded for code generation.
    fn bind_class(&mut self, node: NodeId, class: &ClassDef) -> StaticResult<()> {
        for d in &class.decorators {
            self.bind_boxed(d)?;
        }
        for b in &class.bases {
            self.bind_boxed(b)?;
        }
        let symbols = self.symbols;
        let cid = symbols
            .class_for_node(self.module, node)
            .filter(|c| symbols.class(*c).is_static());

        for stmt in &class.body {
            match &stmt.node {
                Stmt::Def(def) => self.bind_function(stmt.id, def, cid, &stmt.span)?,
                Stmt::Class(inner) => self.bind_class(stmt.id, inner)?,
                Stmt::Pass => {}
                Stmt::Expr(e) => {
                    self.bind_boxed(e)?;
                }
                Stmt::AnnAssign { target, value, .. } => {
                    if let Some(v) = value {
                        self.bind_boxed(v)?;
                    }
                    self.class_attr_target(target)?;
                }
                Stmt::Assign { targets, value } => {
                    self.bind_boxed(value)?;
                    for t in targets {
                        self.class_attr_target(t)?;
                    }
                }
                _ => {
                    return Err(StaticError::type_error(
                        "unsupported statement in class body",
                        stmt.span.clone(),
                    ));
                }
            }
        }

        if let Some(c) = cid {
            let info = symbols.class(c);
            self.map.record_class(
                node,
                ClassLayout {
                    qualname: info.qualname.clone(),
                    fields: info
                        .fields
                        .iter()
                        .map(|f| (f.name.clone(), f.ty.to_descr(symbols)))
                        .collect(),
                    vtable: info.vtable.iter().map(|m| m.name.clone()).collect(),
                },
            );
        }
        Ok(())
    }

    fn class_attr_target(&mut self, target: &ExprS) -> StaticResult<()> {
        match &target.node {
            Expr::Name(_) => {
                self.map.record_expr(target.id, Type::Dynamic);
                Ok(())
            }
            _ => Err(StaticError::type_error(
                "unsupported assignment target in class body",
                target.span.clone(),
            )),
        }
    }
}

fn collect_target_names(target: &ExprS, out: &mut std::collections::HashSet<String>) {
    match &target.node {
        Expr::Name(n) => {
            out.insert(n.clone());
        }
        Expr::Tuple(items) | Expr::List(items) => {
            for i in items {
                collect_target_names(i, out);
            }
        }
        _ => {}
    }
}
