use super::{Body, Compiler, NameAccess};
use crate::parser::ast::{BoolOp, Expr, ExprS, Literal, UnaryOp};
use crate::semantic::StaticResult;
use crate::semantic::symbols::ConstValue;
use crate::vm::bytecode::Instruction as I;

fn literal_const(lit: &Literal) -> ConstValue {
    match lit {
        Literal::Bool(b) => ConstValue::Bool(*b),
        Literal::Int(i) => ConstValue::Int(*i),
        Literal::Float(f) => ConstValue::Float(*f),
        Literal::String(s) => ConstValue::Str(s.clone()),
        Literal::None => ConstValue::None,
    }
}

impl<'a> Compiler<'a> {
    /// Compiles an expression and applies the conversion the binder recorded
    /// for its value.
    pub(super) fn compile_expr(&mut self, expr: &'a ExprS) -> StaticResult<()> {
        self.compile_raw(expr)?;
        if let Some(c) = self.types.and_then(|t| t.coercion(expr.id)) {
            self.emit_coercion(c);
        }
        Ok(())
    }

    fn compile_raw(&mut self, expr: &'a ExprS) -> StaticResult<()> {
        match &expr.node {
            Expr::Literal(lit) => {
                let prim = self.prim_of(expr.id);
                self.emit_const(&literal_const(lit), prim);
            }
            Expr::Name(name) => self.load_name(name),
            Expr::Unary { op, operand } => {
                let prim_op = self.types.and_then(|t| t.prim_op(expr.id));
                if prim_op.is_none()
                    && *op == UnaryOp::Negate
                    && let Some(p) = self.prim_of(expr.id)
                    && let Expr::Literal(lit) = &operand.node
                {
                    // folded negative constant
                    let value = match lit {
                        Literal::Int(i) => ConstValue::Int(i.wrapping_neg()),
                        Literal::Float(f) => ConstValue::Float(-f),
                        _ => literal_const(lit),
                    };
                    self.emit_const(&value, Some(p));
                    return Ok(());
                }
                self.compile_expr(operand)?;
                match prim_op {
                    Some(p) => self.emit(I::PrimUnary(*op, p)),
                    None => self.emit(I::Unary(*op)),
                };
            }
            Expr::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                match self.types.and_then(|t| t.prim_op(expr.id)) {
                    Some(p) => self.emit(I::PrimBinary(*op, p)),
                    None => self.emit(I::Binary(*op)),
                };
            }
            Expr::Compare { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                match self.types.and_then(|t| t.prim_op(expr.id)) {
                    Some(p) => self.emit(I::PrimCompare(*op, p)),
                    None => self.emit(I::Compare(*op)),
                };
            }
            Expr::BoolOp { op, left, right } => {
                self.compile_expr(left)?;
                let jump = match op {
                    BoolOp::And => self.emit(I::JumpIfFalseOrPop(0)),
                    BoolOp::Or => self.emit(I::JumpIfTrueOrPop(0)),
                };
                self.compile_expr(right)?;
                self.patch_here(jump);
            }
            Expr::IfExp { test, body, orelse } => {
                self.compile_expr(test)?;
                let to_else = self.emit(I::JumpIfFalse(0));
                self.compile_expr(body)?;
                let to_end = self.emit(I::Jump(0));
                self.patch_here(to_else);
                self.compile_expr(orelse)?;
                self.patch_here(to_end);
            }
            Expr::Call { func, args } => self.compile_call(expr, func, args)?,
            Expr::Attribute { object, attr } => {
                self.compile_expr(object)?;
                self.load_member(expr, attr);
            }
            Expr::Subscript { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                match self.types.and_then(|t| t.array_op(expr.id)) {
                    Some(p) => self.emit(I::ArrayLoad(p)),
                    None => self.emit(I::LoadIndex),
                };
            }
            Expr::Tuple(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                let n = self.narrow(items.len(), "tuple items");
                self.emit(I::BuildTuple(n));
            }
            Expr::List(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                let n = self.narrow(items.len(), "list items");
                self.emit(I::BuildList(n));
            }
            Expr::Dict(pairs) => {
                for (k, v) in pairs {
                    self.compile_expr(k)?;
                    self.compile_expr(v)?;
                }
                let n = self.narrow(pairs.len(), "dict items");
                self.emit(I::BuildDict(n));
            }
            Expr::Lambda { params, body } => {
                self.make_function(expr.id, "<lambda>", params, Body::Lambda(body), &expr.span)?;
            }
        }
        Ok(())
    }

    /// Attribute read with the object on the stack. `access` carries the
    /// field and null-check records.
    pub(super) fn load_member(&mut self, access: &ExprS, attr: &str) {
        let name = self.sym(attr);
        let types = self.types;
        if types.is_some_and(|t| t.needs_null_check(access.id)) {
            self.emit(I::RaiseIfNone(name));
        }
        match types.and_then(|t| t.field(access.id)) {
            Some(field) => self.emit(I::LoadField {
                offset: field.offset as u16,
                name,
            }),
            None => self.emit(I::LoadAttr(name)),
        };
    }

    pub(super) fn load_name(&mut self, name: &str) {
        let ins = match self.builder().access(name) {
            NameAccess::Local(slot) => I::LoadLocal(slot),
            NameAccess::Typed(slot, p) => I::LoadLocalTyped(slot, p),
            NameAccess::Deref(ix) => I::LoadDeref(ix),
            NameAccess::Global => I::LoadGlobal(self.sym(name)),
        };
        self.emit(ins);
    }

    pub(super) fn store_name(&mut self, name: &str) {
        let ins = match self.builder().access(name) {
            NameAccess::Local(slot) => I::StoreLocal(slot),
            NameAccess::Typed(slot, p) => I::StoreLocalTyped(slot, p),
            NameAccess::Deref(ix) => I::StoreDeref(ix),
            NameAccess::Global => I::StoreGlobal(self.sym(name)),
        };
        self.emit(ins);
    }
}
