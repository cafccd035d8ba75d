use super::{Binder, FlowState, NameKind};
use crate::parser::ast::{
    Arg, BinaryOp, BoolOp, CompareOp, Expr, ExprS, Literal, NodeId, UnaryOp,
};
use crate::semantic::lattice::{self, Predicate, Type, builtin};
use crate::semantic::symbols::Symbol;
use crate::semantic::type_map::{Coercion, FieldRef};
use crate::semantic::{StaticError, StaticResult};
use crate::types::{Prim, Span};

/// A literal number, possibly negated: typed by its context.
pub(super) fn is_literal(expr: &ExprS) -> bool {
    match &expr.node {
        Expr::Literal(Literal::Int(_) | Literal::Float(_) | Literal::Bool(_)) => true,
        Expr::Unary {
            op: UnaryOp::Negate,
            operand,
        } => matches!(
            operand.node,
            Expr::Literal(Literal::Int(_) | Literal::Float(_))
        ),
        _ => false,
    }
}

pub(super) fn constant_int(expr: &ExprS) -> Option<i128> {
    match &expr.node {
        Expr::Literal(Literal::Int(i)) => Some(*i as i128),
        Expr::Unary {
            op: UnaryOp::Negate,
            operand,
        } => match operand.node {
            Expr::Literal(Literal::Int(i)) => Some(-(i as i128)),
            _ => None,
        },
        _ => None,
    }
}

fn boxed_type_of(ty: &Type) -> Type {
    match ty {
        Type::Prim(p) => Type::boxed(*p),
        other => other.clone(),
    }
}

impl<'a> Binder<'a> {
    /// Binds an expression and records its type. `expected` is the type of
    /// the destination, used to type numeric literals.
    pub(super) fn bind_expr(&mut self, expr: &ExprS, expected: Option<&Type>) -> StaticResult<Type> {
        let ty = self.expr_type(expr, expected)?;
        self.map.record_expr(expr.id, ty.clone());
        Ok(ty)
    }

    /// Binds an expression whose value flows into dynamic code: primitive
    /// results are boxed.
    pub(super) fn bind_boxed(&mut self, expr: &ExprS) -> StaticResult<Type> {
        let ty = self.bind_expr(expr, None)?;
        Ok(self.box_if_prim(expr.id, &ty))
    }

    pub(super) fn box_if_prim(&mut self, node: NodeId, ty: &Type) -> Type {
        if let Type::Prim(p) = ty {
            self.map.record_coercion(node, Coercion::Box(*p));
        }
        boxed_type_of(ty)
    }

    fn expr_type(&mut self, expr: &ExprS, expected: Option<&Type>) -> StaticResult<Type> {
        match &expr.node {
            Expr::Literal(lit) => self.literal_type(lit, expected, &expr.span),
            Expr::Name(name) => self.read_name(name, &expr.span),
            Expr::Unary { op, operand } => self.unary_type(expr, *op, operand, expected),
            Expr::Binary { op, left, right } => {
                let (lt, rt) = self.bind_operands(left, right, expected)?;
                self.arith(expr.id, *op, (left.id, &lt), (right.id, &rt), &expr.span)
            }
            Expr::Compare { op, left, right } => self.compare_type(expr.id, *op, left, right),
            Expr::BoolOp { left, right, .. } => {
                let lt = self.bind_expr(left, expected)?;
                let rt = self.bind_expr(right, expected)?;
                Ok(self.merge_values(left.id, &lt, right.id, &rt))
            }
            Expr::IfExp { test, body, orelse } => {
                let (t, f) = self.bind_condition(test)?;
                self.ctx.flow = t;
                let bt = self.bind_expr(body, expected)?;
                let after_body = std::mem::replace(&mut self.ctx.flow, f);
                let ot = self.bind_expr(orelse, expected)?;
                let after_else = self.ctx.flow.clone();
                self.ctx.flow = self.join_flows(vec![after_body, after_else]);
                Ok(self.merge_values(body.id, &bt, orelse.id, &ot))
            }
            Expr::Call { func, args } => self.bind_call(expr, func, args, expected),
            Expr::Attribute { object, attr } => {
                let ot = self.bind_expr(object, None)?;
                self.member_type(expr.id, &ot, attr, &expr.span)
            }
            Expr::Subscript { object, index } => {
                let ot = self.bind_expr(object, None)?;
                if let Type::Array(p) = ot {
                    self.bind_index(index)?;
                    self.map.record_array_op(expr.id, p);
                    return Ok(Type::Prim(p));
                }
                if let Type::Prim(p) = ot {
                    return Err(StaticError::type_error(
                        format!("{} is not subscriptable", p),
                        object.span.clone(),
                    ));
                }
                self.bind_boxed(index)?;
                Ok(match &ot {
                    Type::Generic { class, args } if *class == builtin::LIST => {
                        args.first().cloned().unwrap_or(Type::Dynamic)
                    }
                    Type::Generic { class, args } if *class == builtin::DICT => {
                        args.get(1).cloned().unwrap_or(Type::Dynamic)
                    }
                    Type::Instance(builtin::STR) => Type::Instance(builtin::STR),
                    _ => Type::Dynamic,
                })
            }
            Expr::Tuple(items) => {
                let mut args = Vec::with_capacity(items.len());
                for i in items {
                    args.push(self.bind_boxed(i)?);
                }
                Ok(Type::Generic {
                    class: builtin::TUPLE,
                    args,
                })
            }
            Expr::List(items) => {
                for i in items {
                    self.bind_boxed(i)?;
                }
                Ok(Type::Instance(builtin::LIST))
            }
            Expr::Dict(pairs) => {
                for (k, v) in pairs {
                    self.bind_boxed(k)?;
                    self.bind_boxed(v)?;
                }
                Ok(Type::Instance(builtin::DICT))
            }
            Expr::Lambda { params, body } => {
                for p in params {
                    if let Some(d) = &p.default {
                        self.bind_boxed(d)?;
                    }
                }
                self.with_lambda_ctx(expr.id, params, |b| b.bind_boxed(body))?;
                Ok(Type::Dynamic)
            }
        }
    }

    /// Array indices are machine integers either way.
    pub(super) fn bind_index(&mut self, index: &ExprS) -> StaticResult<()> {
        let it = self.bind_expr(index, None)?;
        match it {
            Type::Prim(p) if !p.is_int() => Err(StaticError::type_error(
                format!("array index must be an integer, got {}", p),
                index.span.clone(),
            )),
            _ => Ok(()),
        }
    }

    fn literal_type(
        &mut self,
        lit: &Literal,
        expected: Option<&Type>,
        span: &Span,
    ) -> StaticResult<Type> {
        let expected_prim = expected.and_then(Type::prim);
        Ok(match (lit, expected_prim) {
            (Literal::Int(v), Some(p)) if p.is_int() => {
                lattice::check_constant_range(*v as i128, p)
                    .map_err(|m| StaticError::type_error(m, span.clone()))?;
                Type::Prim(p)
            }
            (Literal::Int(_) | Literal::Float(_), Some(p)) if p.is_float() => Type::Prim(p),
            (Literal::Bool(_), Some(Prim::CBool)) => Type::Prim(Prim::CBool),
            (Literal::Int(_), _) => Type::Instance(builtin::INT),
            (Literal::Float(_), _) => Type::Instance(builtin::FLOAT),
            (Literal::Bool(_), _) => Type::Instance(builtin::BOOL),
            (Literal::String(_), _) => Type::Instance(builtin::STR),
            (Literal::None, _) => Type::NoneType,
        })
    }

    fn unary_type(
        &mut self,
        expr: &ExprS,
        op: UnaryOp,
        operand: &ExprS,
        expected: Option<&Type>,
    ) -> StaticResult<Type> {
        // negative constants are folded so their range check sees the sign
        if op == UnaryOp::Negate
            && is_literal(operand)
            && let Some(p) = expected.and_then(Type::prim)
        {
            if let Some(v) = constant_int(expr) {
                if p.is_int() {
                    lattice::check_constant_range(v, p)
                        .map_err(|m| StaticError::type_error(m, expr.span.clone()))?;
                    return Ok(Type::Prim(p));
                }
                if p.is_float() {
                    return Ok(Type::Prim(p));
                }
            } else if p.is_float() {
                return Ok(Type::Prim(p));
            }
        }
        let prim_expected = expected.filter(|t| t.prim().is_some());
        let ot = self.bind_expr(operand, prim_expected)?;
        match (&ot, op) {
            (Type::Prim(_), UnaryOp::Not) => {
                self.box_if_prim(operand.id, &ot);
                Ok(Type::Instance(builtin::BOOL))
            }
            (Type::Prim(p), UnaryOp::Invert) if !p.is_int() => Err(StaticError::type_error(
                format!("bad operand type for unary ~: {}", p),
                expr.span.clone(),
            )),
            (Type::Prim(p), UnaryOp::Negate) if *p == Prim::CBool => Err(StaticError::type_error(
                "bad operand type for unary -: cbool",
                expr.span.clone(),
            )),
            (Type::Prim(p), _) => {
                self.map.record_prim_op(expr.id, *p);
                Ok(Type::Prim(*p))
            }
            (_, UnaryOp::Not) => Ok(Type::Instance(builtin::BOOL)),
            (Type::Instance(builtin::FLOAT), UnaryOp::Negate | UnaryOp::Pos) => {
                Ok(Type::Instance(builtin::FLOAT))
            }
            (Type::Instance(builtin::INT | builtin::BOOL), _) => Ok(Type::Instance(builtin::INT)),
            _ => Ok(Type::Dynamic),
        }
    }

    /// Binds both operands of a binary operation. A literal operand is bound
    /// after its sibling so that it takes the sibling's primitive type.
    pub(super) fn bind_operands(
        &mut self,
        left: &ExprS,
        right: &ExprS,
        expected: Option<&Type>,
    ) -> StaticResult<(Type, Type)> {
        let prim_expected: Option<Type> = expected.filter(|t| t.prim().is_some()).cloned();
        if is_literal(left) && !is_literal(right) {
            let rt = self.bind_expr(right, prim_expected.as_ref())?;
            let ctx = if rt.prim().is_some() {
                Some(rt.clone())
            } else {
                prim_expected
            };
            let lt = self.bind_expr(left, ctx.as_ref())?;
            Ok((lt, rt))
        } else {
            let lt = self.bind_expr(left, prim_expected.as_ref())?;
            let ctx = if lt.prim().is_some() {
                Some(lt.clone())
            } else {
                prim_expected
            };
            let rt = self.bind_expr(right, ctx.as_ref())?;
            Ok((lt, rt))
        }
    }

    fn operand_error(&self, symbol: &str, lt: &Type, rt: &Type, span: &Span) -> StaticError {
        StaticError::type_error(
            format!(
                "cannot apply '{}' to {} and {}",
                symbol,
                self.type_name(lt),
                self.type_name(rt)
            ),
            span.clone(),
        )
    }

    /// Promotes two primitive operands to their common type, recording the
    /// conversions.
    fn promote(
        &mut self,
        symbol: &str,
        (ln, lt): (NodeId, Prim),
        (rn, rt): (NodeId, Prim),
        span: &Span,
    ) -> StaticResult<Prim> {
        let common = lattice::common_numeric_type(lt, rt).ok_or_else(|| {
            self.operand_error(symbol, &Type::Prim(lt), &Type::Prim(rt), span)
        })?;
        if lt != common {
            self.map
                .record_coercion(ln, Coercion::Convert { from: lt, to: common });
        }
        if rt != common {
            self.map
                .record_coercion(rn, Coercion::Convert { from: rt, to: common });
        }
        Ok(common)
    }

    /// Result type of `left op right`, recording the primitive operation when
    /// both sides are unboxed.
    pub(super) fn arith(
        &mut self,
        node: NodeId,
        op: BinaryOp,
        (ln, lt): (NodeId, &Type),
        (rn, rt): (NodeId, &Type),
        span: &Span,
    ) -> StaticResult<Type> {
        match (lt.prim(), rt.prim()) {
            (Some(a), Some(b)) => {
                let p = self.promote(op.symbol(), (ln, a), (rn, b), span)?;
                let valid = match op {
                    BinaryOp::LShift | BinaryOp::RShift => p.is_int(),
                    BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => !p.is_float(),
                    _ => p != Prim::CBool,
                };
                if !valid {
                    return Err(self.operand_error(op.symbol(), lt, rt, span));
                }
                self.map.record_prim_op(node, p);
                Ok(Type::Prim(p))
            }
            (Some(_), None) | (None, Some(_)) => Err(self.operand_error(op.symbol(), lt, rt, span)),
            (None, None) => Ok(boxed_arith_result(op, lt, rt)),
        }
    }

    fn compare_type(
        &mut self,
        node: NodeId,
        op: CompareOp,
        left: &ExprS,
        right: &ExprS,
    ) -> StaticResult<Type> {
        match op {
            CompareOp::Is | CompareOp::IsNot | CompareOp::In | CompareOp::NotIn => {
                self.bind_boxed(left)?;
                self.bind_boxed(right)?;
                Ok(Type::Instance(builtin::BOOL))
            }
            _ => {
                let (lt, rt) = self.bind_operands(left, right, None)?;
                let span = left.span.start..right.span.end;
                match (lt.prim(), rt.prim()) {
                    (Some(a), Some(b)) => {
                        let p = self.promote(op.symbol(), (left.id, a), (right.id, b), &span)?;
                        self.map.record_prim_op(node, p);
                        Ok(Type::Prim(Prim::CBool))
                    }
                    (Some(_), None) | (None, Some(_)) => {
                        Err(self.operand_error(op.symbol(), &lt, &rt, &span))
                    }
                    (None, None) => {
                        let builtin_operands = [&lt, &rt].iter().all(|t| {
                            matches!(
                                t,
                                Type::Instance(
                                    builtin::INT | builtin::FLOAT | builtin::STR | builtin::BOOL
                                )
                            )
                        });
                        Ok(if builtin_operands {
                            Type::Instance(builtin::BOOL)
                        } else {
                            Type::Dynamic
                        })
                    }
                }
            }
        }
    }

    /// Type of a value that is one of two alternatives (`and`/`or`, `x if c
    /// else y`). Unless both agree, primitives are boxed.
    fn merge_values(&mut self, ln: NodeId, lt: &Type, rn: NodeId, rt: &Type) -> Type {
        if lt == rt {
            return lt.clone();
        }
        let l = self.box_if_prim(ln, lt);
        let r = self.box_if_prim(rn, rt);
        lattice::join(self.symbols, &l, &r)
    }

    /// Attribute access on a value of type `object`. Declared slots of static
    /// classes resolve to fields; everything else is dynamic.
    pub(super) fn member_type(
        &mut self,
        node: NodeId,
        object: &Type,
        attr: &str,
        span: &Span,
    ) -> StaticResult<Type> {
        let (class, optional) = match object {
            Type::Instance(c) => (Some(*c), false),
            Type::Optional(inner) => match **inner {
                Type::Instance(c) => (Some(c), true),
                _ => (None, false),
            },
            _ => (None, false),
        };
        if let Some(c) = class
            && self.symbols.class(c).is_static()
        {
            if let Some(field) = self.symbols.find_field(c, attr) {
                if optional {
                    self.map.record_null_check(node);
                }
                self.map.record_field(
                    node,
                    FieldRef {
                        offset: field.offset,
                        name: field.name.clone(),
                        prim: field.ty.prim(),
                    },
                );
                return Ok(field.ty.clone());
            }
            return Ok(Type::Dynamic);
        }
        match object {
            Type::Module(m) => Ok(self.symbols.lookup(m, attr)),
            Type::Prim(p) => Err(StaticError::type_error(
                format!("{} has no attribute '{}'", p, attr),
                span.clone(),
            )),
            _ => Ok(Type::Dynamic),
        }
    }

    // ---- conditions and narrowing ----

    /// Binds a branch condition and returns the flow states for the branch
    /// where it holds and the branch where it does not.
    pub(super) fn bind_condition(&mut self, expr: &ExprS) -> StaticResult<(FlowState, FlowState)> {
        match &expr.node {
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                let (t, f) = self.bind_condition(operand)?;
                if let Some(Type::Prim(p)) = self.map.expr_type(operand.id).cloned() {
                    self.map.record_coercion(operand.id, Coercion::Box(p));
                }
                self.map.record_expr(expr.id, Type::Instance(builtin::BOOL));
                Ok((f, t))
            }
            Expr::BoolOp { op, left, right } => {
                let (lt, lf) = self.bind_condition(left)?;
                let result = match op {
                    BoolOp::And => {
                        self.ctx.flow = lt;
                        let (rt, rf) = self.bind_condition(right)?;
                        (rt, self.join_flows(vec![lf, rf]))
                    }
                    BoolOp::Or => {
                        self.ctx.flow = lf;
                        let (rt, rf) = self.bind_condition(right)?;
                        (self.join_flows(vec![lt, rt]), rf)
                    }
                };
                let l = self.map.expr_type(left.id).cloned().unwrap_or(Type::Dynamic);
                let r = self.map.expr_type(right.id).cloned().unwrap_or(Type::Dynamic);
                let ty = self.merge_values(left.id, &l, right.id, &r);
                self.map.record_expr(expr.id, ty);
                Ok(result)
            }
            Expr::Compare {
                op: op @ (CompareOp::Is | CompareOp::IsNot),
                left,
                right,
            } => {
                self.bind_expr(expr, None)?;
                match (&left.node, &right.node) {
                    (Expr::Name(n), Expr::Literal(Literal::None))
                    | (Expr::Literal(Literal::None), Expr::Name(n)) => {
                        let pred = if *op == CompareOp::Is {
                            Predicate::IsNone
                        } else {
                            Predicate::IsNotNone
                        };
                        Ok(self.narrow_name(n, &pred))
                    }
                    _ => Ok((self.ctx.flow.clone(), self.ctx.flow.clone())),
                }
            }
            Expr::Call { func, args } if self.is_builtin_call(func, "isinstance") => {
                self.bind_expr(expr, None)?;
                match args.as_slice() {
                    [Arg::Positional(subject), Arg::Positional(class)] => {
                        if let Expr::Name(n) = &subject.node {
                            let target = self.static_class_of(class);
                            Ok(self.narrow_name(n, &Predicate::IsInstance(target)))
                        } else {
                            Ok((self.ctx.flow.clone(), self.ctx.flow.clone()))
                        }
                    }
                    _ => Ok((self.ctx.flow.clone(), self.ctx.flow.clone())),
                }
            }
            Expr::Name(n) => {
                self.bind_expr(expr, None)?;
                Ok(self.narrow_name(n, &Predicate::Truthy))
            }
            _ => {
                self.bind_expr(expr, None)?;
                Ok((self.ctx.flow.clone(), self.ctx.flow.clone()))
            }
        }
    }

    pub(super) fn is_builtin_call(&self, func: &ExprS, name: &str) -> bool {
        match &func.node {
            Expr::Name(n) if n == name => {
                matches!(self.name_kind(n), NameKind::Global | NameKind::Module)
                    && matches!(self.module_symbol(n), Some(Symbol::Builtin(b)) if b.to_string() == name)
            }
            _ => false,
        }
    }

    /// The class named by an `isinstance` target, when statically known.
    fn static_class_of(&self, expr: &ExprS) -> Option<crate::semantic::ClassId> {
        match &expr.node {
            Expr::Name(n) if matches!(self.name_kind(n), NameKind::Global | NameKind::Module) => {
                match self.module_symbol(n) {
                    Some(Symbol::Class(c)) if !self.symbols.class(c).dynamic_base => Some(c),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn narrow_name(&self, name: &str, pred: &Predicate) -> (FlowState, FlowState) {
        let mut yes = self.ctx.flow.clone();
        let mut no = self.ctx.flow.clone();
        if !matches!(self.name_kind(name), NameKind::Local | NameKind::Module) {
            return (yes, no);
        }
        let current = self.peek_name(name);
        if current.prim().is_some() {
            return (yes, no);
        }
        let (t, f) = lattice::narrow(self.symbols, &current, pred);
        yes.types.insert(name.to_string(), t);
        no.types.insert(name.to_string(), f);
        (yes, no)
    }
}

/// Static result type of an operator applied to boxed builtin values.
fn boxed_arith_result(op: BinaryOp, lt: &Type, rt: &Type) -> Type {
    use BinaryOp::*;
    let int = Type::Instance(builtin::INT);
    let float = Type::Instance(builtin::FLOAT);
    let is_int = |t: &Type| matches!(t, Type::Instance(builtin::INT | builtin::BOOL));
    let is_float = |t: &Type| matches!(t, Type::Instance(builtin::FLOAT));
    let is_str = |t: &Type| matches!(t, Type::Instance(builtin::STR));
    match op {
        Add if is_str(lt) && is_str(rt) => Type::Instance(builtin::STR),
        Divide if (is_int(lt) || is_float(lt)) && (is_int(rt) || is_float(rt)) => float,
        _ if is_int(lt) && is_int(rt) => int,
        Add | Subtract | Multiply | FloorDivide | Modulo | Power
            if (is_int(lt) || is_float(lt)) && (is_int(rt) || is_float(rt)) =>
        {
            float
        }
        _ => Type::Dynamic,
    }
}
