use std::rc::Rc;

use super::{Handler, ReturnAction, ReturnCheck, Vm, VmErrorKind, VmResult, err, operators};
use crate::runtime_io::RuntimeIo;
use crate::vm::builtins::{dict_methods, iter, static_module};
use crate::vm::bytecode::{Instruction as I, Module};
use crate::vm::prim;
use crate::vm::utils::{
    dict_key, display_value, make_class, make_dict, make_exception, make_list, make_string,
    make_tuple, repr_value, truthy, type_name,
};
use crate::vm::value::{Class, ClassKind, Dict, Function, Object, ObjectData, Value};

/// 명령어 실행 결과
#[derive(Debug)]
pub enum ExecutionFlow {
    /// 다음 명령어 계속 실행
    Continue,
    /// The outermost frame of a run returned.
    Return(Value),
}

use ExecutionFlow::Continue;

impl Vm {
    /// 단일 명령어 실행 (디스패처)
    pub(super) fn execute_instruction<IO: RuntimeIo>(
        &mut self,
        ins: &I,
        module: &Module,
        io: &mut IO,
    ) -> VmResult<ExecutionFlow> {
        match ins {
            // ===== constants =====
            I::ConstI64(i) => self.push(Value::Int(*i))?,
            I::ConstF64(f) => self.push(Value::Float(*f))?,
            I::ConstStr(i) => {
                let s = module.string_pool.get(*i as usize).cloned().unwrap_or_default();
                self.push(make_string(s))?
            }
            I::True => self.push(Value::Bool(true))?,
            I::False => self.push(Value::Bool(false))?,
            I::None => self.push(Value::None)?,

            // ===== stack =====
            I::Pop => {
                self.pop()?;
            }
            I::Dup => {
                let v = self.peek(0)?.clone();
                self.push(v)?
            }
            I::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(a)?
            }

            // ===== names =====
            I::LoadLocal(ix) => self.handle_load_local(*ix, module)?,
            I::StoreLocal(ix) | I::StoreLocalTyped(ix, _) => {
                let v = self.pop()?;
                self.set_local(*ix, Some(v))?
            }
            I::DeleteLocal(ix) => {
                self.handle_load_local(*ix, module)?;
                self.pop()?;
                self.set_local(*ix, None)?
            }
            I::LoadLocalTyped(ix, p) => {
                let v = self
                    .frame()?
                    .locals
                    .get(*ix as usize)
                    .cloned()
                    .flatten()
                    .unwrap_or_else(|| prim::zero(*p));
                self.push(v)?
            }
            I::LoadGlobal(sym) => self.handle_load_global(*sym, module)?,
            I::StoreGlobal(sym) => {
                let v = self.pop()?;
                let idx = self.frame()?.module;
                self.modules[idx]
                    .globals
                    .insert(module.symbol(*sym).to_string(), v);
            }
            I::DeleteGlobal(sym) => {
                let idx = self.frame()?.module;
                let name = module.symbol(*sym);
                if self.modules[idx].globals.remove(name).is_none() {
                    return Err(err(
                        VmErrorKind::NameError,
                        format!("name '{}' is not defined", name),
                    ));
                }
            }
            I::LoadDeref(ix) => self.handle_load_deref(*ix, module)?,
            I::StoreDeref(ix) => {
                let v = self.pop()?;
                let cell = self.cell(*ix)?;
                *cell.borrow_mut() = Some(v);
            }
            I::LoadClosure(ix) => {
                let cell = self.cell(*ix)?;
                self.push(Value::Object(Rc::new(Object::new(ObjectData::Cell(cell)))))?
            }

            // ===== operators =====
            I::Binary(op) => {
                let b = self.pop()?;
                let a = self.pop()?;
                let r = operators::binary(*op, &a, &b)?;
                self.push(r)?
            }
            I::Unary(op) => {
                let v = self.pop()?;
                let r = operators::unary(*op, &v)?;
                self.push(r)?
            }
            I::Compare(op) => {
                let b = self.pop()?;
                let a = self.pop()?;
                let r = operators::compare(*op, &a, &b)?;
                self.push(Value::Bool(r))?
            }

            // ===== control flow =====
            I::Jump(off) => self.add_ip_rel(*off)?,
            I::JumpIfFalse(off) => {
                if !truthy(&self.pop()?) {
                    self.add_ip_rel(*off)?
                }
            }
            I::JumpIfTrue(off) => {
                if truthy(&self.pop()?) {
                    self.add_ip_rel(*off)?
                }
            }
            I::JumpIfFalseOrPop(off) => {
                if truthy(self.peek(0)?) {
                    self.pop()?;
                } else {
                    self.add_ip_rel(*off)?
                }
            }
            I::JumpIfTrueOrPop(off) => {
                if truthy(self.peek(0)?) {
                    self.add_ip_rel(*off)?
                } else {
                    self.pop()?;
                }
            }
            I::GetIter => {
                let v = self.pop()?;
                self.push(iter::get_iter(&v)?)?
            }
            I::ForIter(off) => {
                let it = self.peek(0)?.clone();
                match iter::next(&it)? {
                    Some(v) => self.push(v)?,
                    None => {
                        self.pop()?;
                        self.add_ip_rel(*off)?
                    }
                }
            }

            // ===== calls =====
            I::Call(argc) => {
                let args = self.pop_n(*argc as usize)?;
                let callee = self.pop()?;
                self.call_value(callee, args, Vec::new(), None, io)?
            }
            I::CallKw(argc, names) => {
                let mut args = self.pop_n(*argc as usize)?;
                let callee = self.pop()?;
                let split = args.len().saturating_sub(names.len());
                let kw_values = args.split_off(split);
                let kwargs = names
                    .iter()
                    .map(|s| module.symbol(*s).to_string())
                    .zip(kw_values)
                    .collect();
                self.call_value(callee, args, kwargs, None, io)?
            }
            I::CallEx => {
                let kwargs = self.pop()?;
                let args = self.pop()?;
                let callee = self.pop()?;
                let args = iter::collect(&args)?;
                let kwargs = keyword_pairs(&kwargs)?;
                self.call_value(callee, args, kwargs, None, io)?
            }
            I::Return => {
                let v = self.pop()?;
                return self.do_return(v);
            }
            I::MakeFunction {
                func_id,
                defaults,
                captures,
            } => self.handle_make_function(*func_id, *defaults, *captures, module)?,
            I::BuildClass(idx) => self.handle_build_class(*idx, module)?,

            // ===== attributes and items =====
            I::LoadAttr(sym) => {
                let obj = self.pop()?;
                let v = self.get_attr(&obj, module.symbol(*sym))?;
                self.push(v)?
            }
            I::StoreAttr(sym) => {
                let v = self.pop()?;
                let obj = self.pop()?;
                self.set_attr(&obj, module.symbol(*sym), v)?
            }
            I::DeleteAttr(sym) => {
                let obj = self.pop()?;
                self.del_attr(&obj, module.symbol(*sym))?
            }
            I::LoadIndex => {
                let idx = self.pop()?;
                let obj = self.pop()?;
                let v = operators::load_index(&obj, &idx)?;
                self.push(v)?
            }
            I::StoreIndex => {
                let v = self.pop()?;
                let idx = self.pop()?;
                let obj = self.pop()?;
                operators::store_index(&obj, &idx, v)?
            }
            I::DeleteIndex => {
                let idx = self.pop()?;
                let obj = self.pop()?;
                operators::delete_index(&obj, &idx)?
            }

            // ===== displays =====
            I::BuildList(n) => {
                let items = self.pop_n(*n as usize)?;
                self.push(make_list(items))?
            }
            I::BuildTuple(n) => {
                let items = self.pop_n(*n as usize)?;
                self.push(make_tuple(items))?
            }
            I::BuildDict(n) => {
                let flat = self.pop_n(*n as usize * 2)?;
                let mut dict = Dict::default();
                for pair in flat.chunks(2) {
                    let key = dict_key(&pair[0])?;
                    dict.insert(key, pair[0].clone(), pair[1].clone());
                }
                self.push(make_dict(dict))?
            }
            I::UnpackSequence(n) => {
                let v = self.pop()?;
                let items = iter::collect(&v)?;
                let n = *n as usize;
                if items.len() != n {
                    let message = if items.len() < n {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            n,
                            items.len()
                        )
                    } else {
                        format!("too many values to unpack (expected {})", n)
                    };
                    return Err(err(VmErrorKind::ValueError, message));
                }
                for item in items.into_iter().rev() {
                    self.push(item)?;
                }
            }
            I::ListAppend => {
                let v = self.pop()?;
                match self.peek(0)?.as_object().map(|o| &o.data) {
                    Some(ObjectData::List { items }) => items.borrow_mut().push(v),
                    _ => return Err(err(VmErrorKind::RuntimeError, "ListAppend without list".into())),
                }
            }
            I::ListExtend => {
                let v = self.pop()?;
                let more = iter::collect(&v)?;
                match self.peek(0)?.as_object().map(|o| &o.data) {
                    Some(ObjectData::List { items }) => items.borrow_mut().extend(more),
                    _ => return Err(err(VmErrorKind::RuntimeError, "ListExtend without list".into())),
                }
            }
            I::DictInsert(sym) => {
                let v = self.pop()?;
                let key = make_string(module.symbol(*sym));
                match self.peek(0)?.as_object().map(|o| &o.data) {
                    Some(ObjectData::Dict { map }) => {
                        let k = dict_key(&key)?;
                        map.borrow_mut().insert(k, key, v)
                    }
                    _ => return Err(err(VmErrorKind::RuntimeError, "DictInsert without dict".into())),
                }
            }
            I::DictMerge => {
                let source = self.pop()?;
                match self.peek(0)?.as_object().map(|o| &o.data) {
                    Some(ObjectData::Dict { map }) => {
                        dict_methods::merge_into(&mut map.borrow_mut(), &source)?
                    }
                    _ => return Err(err(VmErrorKind::RuntimeError, "DictMerge without dict".into())),
                }
            }

            // ===== modules =====
            I::ImportName(sym) => self.handle_import_name(module.symbol(*sym))?,
            I::ImportFrom(sym) => {
                let name = module.symbol(*sym);
                let m = self.peek(0)?.clone();
                let v = self.get_attr(&m, name).map_err(|_| {
                    let from = match m.as_object().map(|o| &o.data) {
                        Some(ObjectData::Module { name, .. }) => name.clone(),
                        _ => type_name(&m),
                    };
                    err(
                        VmErrorKind::ImportError,
                        format!("cannot import name '{}' from '{}'", name, from),
                    )
                })?;
                self.push(v)?
            }
            I::ImportStar => {
                let m = self.pop()?;
                let Some(ObjectData::Module { index, .. }) = m.as_object().map(|o| &o.data) else {
                    return Err(err(VmErrorKind::TypeError, "import * from non-module".into()));
                };
                let exported: Vec<(String, Value)> = self.modules[*index]
                    .globals
                    .iter()
                    .filter(|(k, _)| !k.starts_with('_'))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let here = self.frame()?.module;
                self.modules[here].globals.extend(exported);
            }

            // ===== exceptions =====
            I::SetupExcept(off) => {
                let stack_len = self.stack.len();
                let f = self.frame_mut()?;
                let mut target = f.ip;
                super::jump_rel(&mut target, *off);
                f.handlers.push(Handler { target, stack_len });
            }
            I::PopExcept => {
                self.frame_mut()?.handlers.pop();
            }
            I::Raise(n) => {
                if *n == 0 {
                    return Err(err(
                        VmErrorKind::RuntimeError,
                        "No active exception to reraise".into(),
                    ));
                }
                let v = self.pop()?;
                return Err(self.raise_value(v));
            }
            I::ExceptionMatches => {
                let class = self.pop()?;
                let exc = self.pop()?;
                let matched = self.exception_matches(&exc, &class)?;
                self.push(Value::Bool(matched))?
            }
            I::AssertFail(n) => {
                let message = if *n > 0 {
                    display_value(&self.pop()?)
                } else {
                    String::new()
                };
                return Err(err(VmErrorKind::AssertionError, message));
            }

            // ===== primitives =====
            I::LoadPrimConst(_, c) => self.push(prim::from_const(*c))?,
            I::PrimBinary(op, p) => {
                let b = self.pop()?;
                let a = self.pop()?;
                let r = prim::binary(*op, *p, &a, &b)?;
                self.push(r)?
            }
            I::PrimUnary(op, p) => {
                let v = self.pop()?;
                let r = prim::unary(*op, *p, &v)?;
                self.push(r)?
            }
            I::PrimCompare(op, p) => {
                let b = self.pop()?;
                let a = self.pop()?;
                let r = prim::compare(*op, *p, &a, &b)?;
                self.push(r)?
            }
            I::PrimConvert { from, to } => {
                let v = self.pop()?;
                let r = prim::convert(*from, *to, &v)?;
                self.push(r)?
            }
            I::PrimBox(p) => {
                let v = self.pop()?;
                let r = prim::box_value(*p, &v)?;
                self.push(r)?
            }
            I::PrimUnbox(p) => {
                let v = self.pop()?;
                let r = prim::unbox(*p, &v)?;
                self.push(r)?
            }

            // ===== fields and calls =====
            I::LoadField { offset, name } => {
                let obj = self.pop()?;
                let v = self.load_field(&obj, *offset as usize, module.symbol(*name))?;
                self.push(v)?
            }
            I::StoreField { offset, name } => {
                let v = self.pop()?;
                let obj = self.pop()?;
                self.store_field(&obj, *offset as usize, module.symbol(*name), v)?
            }
            I::RaiseIfNone(sym) => {
                if self.peek(0)?.is_none() {
                    return Err(err(
                        VmErrorKind::AttributeError,
                        format!(
                            "'NoneType' object has no attribute '{}'",
                            module.symbol(*sym)
                        ),
                    ));
                }
            }
            I::InvokeMethod {
                name, argc, ret, ..
            } => self.invoke_method(module.symbol(*name), *argc as usize, ret.as_ref(), io)?,
            I::InvokeFunction { name, argc, ret } => {
                let args = self.pop_n(*argc as usize)?;
                let callee = self.pop()?;
                let check = ret.clone().map(|expected| ReturnCheck {
                    expected,
                    target: module.symbol(*name).to_string(),
                });
                self.call_value(callee, args, Vec::new(), check, io)?
            }
            I::CheckArgs(checks) => self.check_args(checks)?,
            I::Cast(descr) => static_module::check_cast(descr, self.peek(0)?)?,
            I::LoadIterableArg { index, total } => {
                let v = self.pop()?;
                let items = iter::collect(&v)?;
                let (index, total) = (*index as usize, *total as usize);
                if items.len() > total {
                    return Err(err(
                        VmErrorKind::TypeError,
                        format!(
                            "too many values in * argument (expected {}, got {})",
                            total,
                            items.len()
                        ),
                    ));
                }
                let Some(item) = items.get(index) else {
                    return Err(err(
                        VmErrorKind::IndexError,
                        "tuple index out of range".into(),
                    ));
                };
                self.push(item.clone())?
            }
            I::CheckMapping(names) => {
                let mapping = self.peek(0)?.clone();
                let map = dict_methods::expect_dict(&mapping)?;
                for (key, _) in map.borrow().entries() {
                    let admissible = key
                        .as_str()
                        .is_some_and(|k| names.iter().any(|n| module.symbol(*n) == k));
                    if !admissible {
                        return Err(err(
                            VmErrorKind::TypeError,
                            format!(
                                "got an unexpected keyword argument {}",
                                repr_value(key)
                            ),
                        ));
                    }
                }
            }
            I::LoadMappingArg { name, skip } => {
                let mapping = self.pop()?;
                let key = make_string(module.symbol(*name));
                let found = dict_methods::expect_dict(&mapping)?
                    .borrow()
                    .get(&dict_key(&key)?)
                    .cloned();
                match found {
                    Some(v) => {
                        self.push(v)?;
                        self.add_ip_rel(*skip as i32)?
                    }
                    None if *skip == 0 => {
                        return Err(err(
                            VmErrorKind::TypeError,
                            format!("missing required argument: '{}'", module.symbol(*name)),
                        ));
                    }
                    None => {}
                }
            }
            I::ArrayNew(p) => {
                let len = self.pop()?;
                let arr = static_module::new_array(*p, &len)?;
                self.push(arr)?
            }
            I::ArrayLoad(_) => {
                let idx = self.pop()?;
                let arr = self.pop()?;
                let v = operators::array_load(&arr, &idx)?;
                self.push(v)?
            }
            I::ArrayStore(_) => {
                let v = self.pop()?;
                let idx = self.pop()?;
                let arr = self.pop()?;
                operators::array_store(&arr, &idx, v)?
            }
        }
        Ok(Continue)
    }

    // ==================== handlers ====================

    fn set_local(&mut self, ix: u16, v: Option<Value>) -> VmResult<()> {
        let f = self.frame_mut()?;
        let slot = f.locals.get_mut(ix as usize).ok_or_else(|| {
            err(
                VmErrorKind::RuntimeError,
                format!("invalid local index {}", ix),
            )
        })?;
        *slot = v;
        Ok(())
    }

    fn handle_load_local(&mut self, ix: u16, module: &Module) -> VmResult<()> {
        let f = self.frame()?;
        match f.locals.get(ix as usize).cloned().flatten() {
            Some(v) => self.push(v),
            None => {
                let name = module
                    .functions
                    .get(f.func_id)
                    .and_then(|code| code.varnames.get(ix as usize))
                    .map(String::as_str)
                    .unwrap_or("?");
                Err(err(
                    VmErrorKind::UnboundLocalError,
                    format!("local variable '{}' referenced before assignment", name),
                ))
            }
        }
    }

    fn handle_load_global(&mut self, sym: u16, module: &Module) -> VmResult<()> {
        let name = module.symbol(sym);
        let idx = self.frame()?.module;
        let v = self.modules[idx]
            .globals
            .get(name)
            .or_else(|| self.builtin_names.get(name))
            .cloned()
            .ok_or_else(|| {
                err(
                    VmErrorKind::NameError,
                    format!("name '{}' is not defined", name),
                )
            })?;
        self.push(v)
    }

    fn cell(&self, ix: u16) -> VmResult<Rc<crate::vm::value::Cell>> {
        self.frame()?
            .cells
            .get(ix as usize)
            .cloned()
            .ok_or_else(|| err(VmErrorKind::RuntimeError, format!("invalid cell index {}", ix)))
    }

    fn handle_load_deref(&mut self, ix: u16, module: &Module) -> VmResult<()> {
        let cell = self.cell(ix)?;
        let value = cell.borrow().clone();
        match value {
            Some(v) => self.push(v),
            None => {
                let f = self.frame()?;
                let code = module.functions.get(f.func_id);
                let own = code.map_or(0, |c| c.cells.len());
                let name = code
                    .and_then(|c| c.cells.iter().chain(&c.freevars).nth(ix as usize))
                    .map(String::as_str)
                    .unwrap_or("?");
                Err(if (ix as usize) < own {
                    err(
                        VmErrorKind::UnboundLocalError,
                        format!("local variable '{}' referenced before assignment", name),
                    )
                } else {
                    err(
                        VmErrorKind::NameError,
                        format!(
                            "free variable '{}' referenced before assignment in enclosing scope",
                            name
                        ),
                    )
                })
            }
        }
    }

    fn handle_make_function(
        &mut self,
        func_id: u16,
        defaults: u8,
        captures: u8,
        module: &Module,
    ) -> VmResult<()> {
        let cells = self.pop_n(captures as usize)?;
        let defaults = self.pop_n(defaults as usize)?;
        let mut captured = Vec::with_capacity(cells.len());
        for c in cells {
            match c.as_object().map(|o| &o.data) {
                Some(ObjectData::Cell(cell)) => captured.push(Rc::clone(cell)),
                _ => return Err(err(VmErrorKind::RuntimeError, "expected a cell".into())),
            }
        }
        let qualname = module
            .functions
            .get(func_id as usize)
            .map(|c| c.qualname.clone())
            .unwrap_or_default();
        let f = Function {
            module: self.frame()?.module,
            func_id: func_id as usize,
            qualname,
            defaults,
            captures: captured,
        };
        self.push(Value::Object(Rc::new(Object::new(ObjectData::Function(f)))))
    }

    fn handle_build_class(&mut self, idx: u16, module: &Module) -> VmResult<()> {
        let base = self.pop()?;
        let def = module.classes.get(idx as usize).ok_or_else(|| {
            err(VmErrorKind::RuntimeError, format!("invalid class index {}", idx))
        })?;
        let base = match &base {
            Value::None => Rc::clone(&self.builtins.object),
            v => match v.as_class() {
                Some(c) if matches!(
                    c.kind,
                    ClassKind::Object | ClassKind::Exception | ClassKind::User
                ) =>
                {
                    Rc::clone(c)
                }
                Some(c) => {
                    return Err(err(
                        VmErrorKind::TypeError,
                        format!("subclassing builtin type '{}' is not supported", c.name),
                    ));
                }
                None => {
                    return Err(err(
                        VmErrorKind::TypeError,
                        format!("bases must be types, not {}", type_name(v)),
                    ));
                }
            },
        };
        let mut class = Class::new(
            def.name.clone(),
            def.qualname.clone(),
            Some(Rc::clone(&base)),
            ClassKind::User,
        );
        class.fields = if def.fields.is_empty() {
            base.fields.clone()
        } else {
            def.fields.clone()
        };
        self.push(make_class(Rc::new(class)))
    }

    fn handle_import_name(&mut self, name: &str) -> VmResult<()> {
        let idx = self.module_index(name).ok_or_else(|| {
            err(
                VmErrorKind::ImportError,
                format!("No module named '{}'", name),
            )
        })?;
        if self.modules[idx].initialized {
            let object = self.modules[idx].object.clone();
            return self.push(object);
        }
        self.enter_module(idx, ReturnAction::ModuleInit(idx))
    }

    /// The error for `raise v`.
    fn raise_value(&self, v: Value) -> super::VmError {
        let exc = match v.as_class() {
            Some(c) if c.is_exception() => make_exception(c, Vec::new()),
            _ => v,
        };
        let is_exception = match exc.as_object().map(|o| &o.data) {
            Some(ObjectData::Instance(inst)) => inst.class.is_exception(),
            _ => false,
        };
        if !is_exception {
            return err(
                VmErrorKind::TypeError,
                "exceptions must derive from BaseException".into(),
            );
        }
        self.error_from_exception(exc)
    }

    fn exception_matches(&self, exc: &Value, class: &Value) -> VmResult<bool> {
        let exc_class = self.builtins.class_of(exc);
        if let Some(c) = class.as_class() {
            return Ok(exc_class.is_subclass_of(c));
        }
        if let Some(ObjectData::Tuple(items)) = class.as_object().map(|o| &o.data) {
            for item in items {
                if self.exception_matches(exc, item)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        Err(err(
            VmErrorKind::TypeError,
            "catching classes that do not inherit from BaseException is not allowed".into(),
        ))
    }
}

/// Keyword arguments from a `**` dict.
fn keyword_pairs(v: &Value) -> VmResult<Vec<(String, Value)>> {
    let map = dict_methods::expect_dict(v)?;
    let map = map.borrow();
    map.entries()
        .iter()
        .map(|(k, v)| match k.as_str() {
            Some(s) => Ok((s.to_string(), v.clone())),
            None => Err(err(VmErrorKind::TypeError, "keywords must be strings".into())),
        })
        .collect()
}
