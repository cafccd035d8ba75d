use super::{Block, Body, Compiler, NameAccess};
use crate::parser::ast::{
    Alias, BinaryOp, ClassDef, ExceptHandler, Expr, ExprS, FunctionDef, NodeId, Stmt, StmtS,
};
use crate::semantic::{StaticError, StaticResult};
use crate::types::Span;
use crate::vm::bytecode::{ClassDef as ClassCode, Instruction as I};

impl<'a> Compiler<'a> {
    pub(super) fn compile_block(&mut self, block: &'a [StmtS]) -> StaticResult<()> {
        for stmt in block {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &'a StmtS) -> StaticResult<()> {
        self.span = stmt.span.clone();
        match &stmt.node {
            Stmt::Expr(e) => {
                self.compile_expr(e)?;
                self.emit(I::Pop);
            }
            Stmt::Assign { targets, value } => {
                self.compile_expr(value)?;
                for (i, target) in targets.iter().enumerate() {
                    if i + 1 < targets.len() {
                        self.emit(I::Dup);
                    }
                    self.store_target(target)?;
                }
            }
            Stmt::AnnAssign { target, value, .. } => {
                if let Some(v) = value {
                    self.compile_expr(v)?;
                    self.store_target(target)?;
                }
            }
            Stmt::AugAssign { target, op, value } => {
                self.compile_aug_assign(stmt.id, target, *op, value)?
            }
            Stmt::Return(value) => {
                match value {
                    Some(v) => self.compile_expr(v)?,
                    None => {
                        self.emit(I::None);
                    }
                }
                self.exit_blocks(0)?;
                self.emit(I::Return);
            }
            Stmt::Pass | Stmt::Global(_) | Stmt::Nonlocal(_) => {}
            Stmt::Break => self.compile_break(&stmt.span)?,
            Stmt::Continue => self.compile_continue(&stmt.span)?,
            Stmt::Del(targets) => {
                for t in targets {
                    self.compile_del(t)?;
                }
            }
            Stmt::Raise(value) => match value {
                Some(v) => {
                    self.compile_expr(v)?;
                    self.emit(I::Raise(1));
                }
                None => match self.builder().handling.last() {
                    Some(&exc) => {
                        self.emit(I::LoadLocal(exc));
                        self.emit(I::Raise(1));
                    }
                    None => {
                        self.emit(I::Raise(0));
                    }
                },
            },
            Stmt::Assert { test, msg } => {
                self.compile_expr(test)?;
                let ok = self.emit(I::JumpIfTrue(0));
                let argc = match msg {
                    Some(m) => {
                        self.compile_expr(m)?;
                        1
                    }
                    None => 0,
                };
                self.emit(I::AssertFail(argc));
                self.patch_here(ok);
            }
            Stmt::Import(aliases) => {
                for alias in aliases {
                    let module = self.sym(&alias.name);
                    self.emit(I::ImportName(module));
                    self.store_name(alias.bound_name());
                }
            }
            Stmt::ImportFrom { module, names } => self.compile_import_from(module, names),
            Stmt::If {
                condition,
                then_block,
                elif_blocks,
                else_block,
            } => {
                let mut ends = Vec::new();
                let branches =
                    std::iter::once((condition, then_block)).chain(elif_blocks.iter().map(|(c, b)| (c, b)));
                for (cond, body) in branches {
                    self.compile_expr(cond)?;
                    let next = self.emit(I::JumpIfFalse(0));
                    self.compile_block(body)?;
                    ends.push(self.emit(I::Jump(0)));
                    self.patch_here(next);
                }
                if let Some(body) = else_block {
                    self.compile_block(body)?;
                }
                for end in ends {
                    self.patch_here(end);
                }
            }
            Stmt::While { condition, body } => {
                let start = self.here();
                self.compile_expr(condition)?;
                let exit = self.emit(I::JumpIfFalse(0));
                self.compile_loop_body(start, false, body)?;
                self.emit_back(I::Jump, start);
                self.patch_here(exit);
                self.finish_loop();
            }
            Stmt::For {
                target,
                iterable,
                body,
            } => {
                self.compile_expr(iterable)?;
                self.emit(I::GetIter);
                let start = self.here();
                let exit = self.emit(I::ForIter(0));
                self.store_target(target)?;
                self.compile_loop_body(start, true, body)?;
                self.emit_back(I::Jump, start);
                self.patch_here(exit);
                self.finish_loop();
            }
            Stmt::Try {
                body,
                handlers,
                finally,
            } => self.compile_try(body, handlers, finally.as_deref())?,
            Stmt::Def(def) => {
                self.compile_def(stmt.id, def, &stmt.span)?;
                self.store_name(&def.name);
            }
            Stmt::Class(class) => {
                self.compile_class(stmt.id, class, &stmt.span)?;
                self.store_name(&class.name);
            }
        }
        Ok(())
    }

    // ---- assignment ----

    /// Stores the value on top of the stack into `target`.
    fn store_target(&mut self, target: &'a ExprS) -> StaticResult<()> {
        let types = self.types;
        if let Some(c) = types.and_then(|t| t.target_coercion(target.id)) {
            self.emit_coercion(c);
        }
        match &target.node {
            Expr::Name(name) => self.store_name(name),
            Expr::Attribute { object, attr } => {
                self.compile_expr(object)?;
                let name = self.sym(attr);
                if types.is_some_and(|t| t.needs_null_check(target.id)) {
                    self.emit(I::RaiseIfNone(name));
                }
                self.emit(I::Swap);
                self.store_member(target.id, name);
            }
            Expr::Subscript { object, index } => {
                let value = self.temp();
                self.emit(I::StoreLocal(value));
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(I::LoadLocal(value));
                self.store_item(target.id);
            }
            Expr::Tuple(items) | Expr::List(items) => {
                let n = self.narrow(items.len(), "unpacked targets");
                self.emit(I::UnpackSequence(n));
                for item in items {
                    self.store_target(item)?;
                }
            }
            _ => {
                return Err(StaticError::type_error(
                    "cannot assign to expression",
                    target.span.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Stack: object, value →
    fn store_member(&mut self, target: NodeId, name: u16) {
        match self.types.and_then(|t| t.field(target)) {
            Some(field) => self.emit(I::StoreField {
                offset: field.offset as u16,
                name,
            }),
            None => self.emit(I::StoreAttr(name)),
        };
    }

    /// Stack: object, index, value →
    fn store_item(&mut self, target: NodeId) {
        match self.types.and_then(|t| t.array_op(target)) {
            Some(p) => self.emit(I::ArrayStore(p)),
            None => self.emit(I::StoreIndex),
        };
    }

    fn compile_aug_assign(
        &mut self,
        node: NodeId,
        target: &'a ExprS,
        op: BinaryOp,
        value: &'a ExprS,
    ) -> StaticResult<()> {
        let types = self.types;
        let operate = |this: &mut Self| -> StaticResult<()> {
            if let Some(c) = types.and_then(|t| t.coercion(target.id)) {
                this.emit_coercion(c);
            }
            this.compile_expr(value)?;
            match types.and_then(|t| t.prim_op(node)) {
                Some(p) => this.emit(I::PrimBinary(op, p)),
                None => this.emit(I::Binary(op)),
            };
            if let Some(c) = types.and_then(|t| t.target_coercion(target.id)) {
                this.emit_coercion(c);
            }
            Ok(())
        };

        match &target.node {
            Expr::Name(name) => {
                self.load_name(name);
                operate(self)?;
                self.store_name(name);
            }
            Expr::Attribute { object, attr } => {
                self.compile_expr(object)?;
                self.emit(I::Dup);
                self.load_member(target, attr);
                operate(self)?;
                let name = self.sym(attr);
                self.store_member(target.id, name);
            }
            Expr::Subscript { object, index } => {
                let (obj, idx) = (self.temp(), self.temp());
                self.compile_expr(object)?;
                self.emit(I::StoreLocal(obj));
                self.compile_expr(index)?;
                self.emit(I::StoreLocal(idx));
                self.emit(I::LoadLocal(obj));
                self.emit(I::LoadLocal(idx));
                match types.and_then(|t| t.array_op(target.id)) {
                    Some(p) => self.emit(I::ArrayLoad(p)),
                    None => self.emit(I::LoadIndex),
                };
                operate(self)?;
                let result = self.temp();
                self.emit(I::StoreLocal(result));
                self.emit(I::LoadLocal(obj));
                self.emit(I::LoadLocal(idx));
                self.emit(I::LoadLocal(result));
                self.store_item(target.id);
            }
            _ => {
                return Err(StaticError::type_error(
                    "illegal expression for augmented assignment",
                    target.span.clone(),
                ));
            }
        }
        Ok(())
    }

    fn compile_del(&mut self, target: &'a ExprS) -> StaticResult<()> {
        match &target.node {
            Expr::Name(name) => {
                let ins = match self.builder().access(name) {
                    NameAccess::Local(slot) | NameAccess::Typed(slot, _) => I::DeleteLocal(slot),
                    NameAccess::Deref(ix) => {
                        self.emit(I::None);
                        I::StoreDeref(ix)
                    }
                    NameAccess::Global => I::DeleteGlobal(self.sym(name)),
                };
                self.emit(ins);
            }
            Expr::Attribute { object, attr } => {
                self.compile_expr(object)?;
                let name = self.sym(attr);
                self.emit(I::DeleteAttr(name));
            }
            Expr::Subscript { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(I::DeleteIndex);
            }
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.compile_del(item)?;
                }
            }
            _ => {
                return Err(StaticError::type_error(
                    "cannot delete expression",
                    target.span.clone(),
                ));
            }
        }
        Ok(())
    }

    fn compile_import_from(&mut self, module: &str, names: &[Alias]) {
        let m = self.sym(module);
        self.emit(I::ImportName(m));
        if names.len() == 1 && names[0].name == "*" {
            self.emit(I::ImportStar);
            return;
        }
        for alias in names {
            let name = self.sym(&alias.name);
            self.emit(I::ImportFrom(name));
            self.store_name(alias.bound_name());
        }
        self.emit(I::Pop);
    }

    // ---- loops and blocks ----

    fn compile_loop_body(&mut self, start: usize, is_for: bool, body: &'a [StmtS]) -> StaticResult<()> {
        self.builder_mut().blocks.push(Block::Loop {
            start,
            breaks: Vec::new(),
            is_for,
        });
        self.compile_block(body)
    }

    /// Pops the innermost loop and points its breaks here.
    fn finish_loop(&mut self) {
        if let Some(Block::Loop { breaks, .. }) = self.builder_mut().blocks.pop() {
            for b in breaks {
                self.patch_here(b);
            }
        }
    }

    fn innermost_loop(&self) -> Option<usize> {
        self.builder()
            .blocks
            .iter()
            .rposition(|b| matches!(b, Block::Loop { .. }))
    }

    fn compile_break(&mut self, span: &Span) -> StaticResult<()> {
        let Some(depth) = self.innermost_loop() else {
            return Err(StaticError::declaration("'break' outside loop", span.clone()));
        };
        self.exit_blocks(depth + 1)?;
        let is_for = matches!(
            self.builder().blocks.get(depth),
            Some(Block::Loop { is_for: true, .. })
        );
        if is_for {
            self.emit(I::Pop);
        }
        let jump = self.emit(I::Jump(0));
        if let Some(Block::Loop { breaks, .. }) = self.builder_mut().blocks.get_mut(depth) {
            breaks.push(jump);
        }
        Ok(())
    }

    fn compile_continue(&mut self, span: &Span) -> StaticResult<()> {
        let Some(depth) = self.innermost_loop() else {
            return Err(StaticError::declaration("'continue' not properly in loop", span.clone()));
        };
        self.exit_blocks(depth + 1)?;
        let start = match self.builder().blocks.get(depth) {
            Some(Block::Loop { start, .. }) => *start,
            _ => return Ok(()),
        };
        self.emit_back(I::Jump, start);
        Ok(())
    }

    /// Leaves every block above `depth`, innermost first: handlers are
    /// uninstalled and finally bodies run inline.
    fn exit_blocks(&mut self, depth: usize) -> StaticResult<()> {
        let mut i = self.builder().blocks.len();
        while i > depth {
            i -= 1;
            let finally = match &self.builder().blocks[i] {
                Block::Loop { .. } => continue,
                Block::Except => None,
                Block::Finally(body) => Some(*body),
            };
            self.emit(I::PopExcept);
            if let Some(body) = finally {
                let inner = self.builder_mut().blocks.split_off(i);
                let result = self.compile_block(body);
                self.builder_mut().blocks.extend(inner);
                result?;
            }
        }
        Ok(())
    }

    // ---- exceptions ----

    fn compile_try(
        &mut self,
        body: &'a [StmtS],
        handlers: &'a [ExceptHandler],
        finally: Option<&'a [StmtS]>,
    ) -> StaticResult<()> {
        let finally_setup = match finally {
            Some(f) => {
                let pos = self.emit(I::SetupExcept(0));
                self.builder_mut().blocks.push(Block::Finally(f));
                Some(pos)
            }
            None => None,
        };

        if handlers.is_empty() {
            self.compile_block(body)?;
        } else {
            let setup = self.emit(I::SetupExcept(0));
            self.builder_mut().blocks.push(Block::Except);
            self.compile_block(body)?;
            self.builder_mut().blocks.pop();
            self.emit(I::PopExcept);
            let mut ends = vec![self.emit(I::Jump(0))];

            self.patch_here(setup);
            let exc = self.temp();
            self.emit(I::StoreLocal(exc));
            for handler in handlers {
                let next = match &handler.exc_type {
                    Some(ty) => {
                        self.emit(I::LoadLocal(exc));
                        self.compile_expr(ty)?;
                        self.emit(I::ExceptionMatches);
                        Some(self.emit(I::JumpIfFalse(0)))
                    }
                    None => None,
                };
                if let Some(name) = &handler.name {
                    self.emit(I::LoadLocal(exc));
                    self.store_name(name);
                }
                self.builder_mut().handling.push(exc);
                let result = self.compile_block(&handler.body);
                self.builder_mut().handling.pop();
                result?;
                ends.push(self.emit(I::Jump(0)));
                if let Some(next) = next {
                    self.patch_here(next);
                }
            }
            self.emit(I::LoadLocal(exc));
            self.emit(I::Raise(1));
            for end in ends {
                self.patch_here(end);
            }
        }

        if let (Some(setup), Some(f)) = (finally_setup, finally) {
            self.builder_mut().blocks.pop();
            self.emit(I::PopExcept);
            self.compile_block(f)?;
            let after = self.emit(I::Jump(0));

            self.patch_here(setup);
            let exc = self.temp();
            self.emit(I::StoreLocal(exc));
            self.compile_block(f)?;
            self.emit(I::LoadLocal(exc));
            self.emit(I::Raise(1));
            self.patch_here(after);
        }
        Ok(())
    }

    // ---- definitions ----

    /// Leaves the (decorated) function on the stack.
    fn compile_def(&mut self, node: NodeId, def: &'a FunctionDef, span: &Span) -> StaticResult<()> {
        for d in &def.decorators {
            self.compile_expr(d)?;
        }
        self.make_function(node, &def.name, &def.params, Body::Block(&def.body), span)?;
        for _ in &def.decorators {
            self.emit(I::Call(1));
        }
        Ok(())
    }

    /// Leaves the (decorated) class on the stack.
    fn compile_class(&mut self, node: NodeId, class: &'a ClassDef, span: &Span) -> StaticResult<()> {
        for d in &class.decorators {
            self.compile_expr(d)?;
        }
        match class.bases.as_slice() {
            [] => {
                self.emit(I::None);
            }
            [base] => self.compile_expr(base)?,
            _ => {
                return Err(StaticError::declaration(
                    format!("class '{}' has more than one base", class.name),
                    span.clone(),
                ));
            }
        }

        let prefix = self.qual_prefix();
        let code = match self.types.and_then(|t| t.class(node)) {
            Some(layout) => ClassCode {
                name: class.name.clone(),
                qualname: layout.qualname.clone(),
                fields: layout.fields.clone(),
                vtable: layout.vtable.clone(),
            },
            None => ClassCode {
                name: class.name.clone(),
                qualname: format!("{}.{}{}", self.module.name, prefix, class.name),
                fields: Vec::new(),
                vtable: Vec::new(),
            },
        };
        let index = self.narrow(self.module.classes.len(), "classes");
        self.module.classes.push(code);
        self.emit(I::BuildClass(index));

        self.builder_mut()
            .prefix
            .push(format!("{}{}.", prefix, class.name));
        let result = self.compile_class_body(&class.body);
        self.builder_mut().prefix.pop();
        result?;

        for _ in &class.decorators {
            self.emit(I::Call(1));
        }
        Ok(())
    }

    /// Class body statements run with the class on the stack and store their
    /// results as class attributes.
    fn compile_class_body(&mut self, body: &'a [StmtS]) -> StaticResult<()> {
        for stmt in body {
            match &stmt.node {
                Stmt::Pass => {}
                Stmt::Expr(e) => {
                    self.compile_expr(e)?;
                    self.emit(I::Pop);
                }
                Stmt::Def(def) => {
                    self.emit(I::Dup);
                    self.compile_def(stmt.id, def, &stmt.span)?;
                    let name = self.sym(&def.name);
                    self.emit(I::StoreAttr(name));
                }
                Stmt::Class(inner) => {
                    self.emit(I::Dup);
                    self.compile_class(stmt.id, inner, &stmt.span)?;
                    let name = self.sym(&inner.name);
                    self.emit(I::StoreAttr(name));
                }
                Stmt::AnnAssign {
                    target,
                    value: Some(value),
                    ..
                } => {
                    let name = class_attr_name(target)?;
                    self.emit(I::Dup);
                    self.compile_expr(value)?;
                    let name = self.sym(name);
                    self.emit(I::StoreAttr(name));
                }
                Stmt::AnnAssign { value: None, .. } => {}
                Stmt::Assign { targets, value } => {
                    self.compile_expr(value)?;
                    let tmp = self.temp();
                    self.emit(I::StoreLocal(tmp));
                    for t in targets {
                        let name = class_attr_name(t)?;
                        let name = self.sym(name);
                        self.emit(I::Dup);
                        self.emit(I::LoadLocal(tmp));
                        self.emit(I::StoreAttr(name));
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
        Ok(())
    }
}

fn class_attr_name(target: &ExprS) -> StaticResult<&str> {
    match &target.node {
        Expr::Name(n) => Ok(n),
        _ => Err(StaticError::type_error(
            "unsupported assignment target in class body",
            target.span.clone(),
        )),
    }
}
