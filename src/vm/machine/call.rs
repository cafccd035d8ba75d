//! Calling functions, classes and natives.

use std::cell::RefCell;
use std::rc::Rc;

use super::{Frame, ReturnAction, ReturnCheck, Vm, VmErrorKind, VmResult, err};
use crate::runtime_io::RuntimeIo;
use crate::types::TypeDescr;
use crate::vm::builtins::{self, static_module};
use crate::vm::bytecode::FunctionFlags;
use crate::vm::utils::{dict_key, make_dict, make_exception, make_instance, make_tuple, type_name};
use crate::vm::value::{Class, ClassKind, Dict, Function, ObjectData, Value};

/// Short name for error messages (`f` for `C.f` or `g.<locals>.f`).
fn short_name(qualname: &str) -> &str {
    qualname.rsplit('.').next().unwrap_or(qualname)
}

impl Vm {
    /// Calls any callable. Natives and constructors push their result
    /// immediately; Python functions push a frame whose return value lands
    /// on the stack when it finishes. `check` is verified against the result
    /// unless the callee's declared return type already guarantees it.
    pub(super) fn call_value<IO: RuntimeIo>(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        check: Option<ReturnCheck>,
        io: &mut IO,
    ) -> VmResult<()> {
        let Some(obj) = callee.as_object() else {
            return Err(not_callable(&callee));
        };
        match &obj.data {
            ObjectData::Function(f) => {
                let action = self.return_action(f, check);
                self.enter_function(f, args, kwargs, action)
            }
            ObjectData::BoundMethod { receiver, func } => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver.clone());
                full.extend(args);
                self.call_value(func.clone(), full, kwargs, check, io)
            }
            ObjectData::Native { func, receiver } => {
                let result =
                    builtins::call_native(self, *func, receiver.as_ref(), args, kwargs, io)?;
                if let Some(c) = &check {
                    self.check_return(&c.expected, &c.target, &result)?;
                }
                self.push(result)
            }
            ObjectData::Class(class) => {
                let class = Rc::clone(class);
                self.instantiate(&class, args, kwargs)
            }
            ObjectData::PrimType(p) => {
                no_kwargs(&p.to_string(), &kwargs)?;
                let v = static_module::call_prim_type(*p, args)?;
                self.push(v)
            }
            ObjectData::ArrayType(p) => {
                no_kwargs("Array", &kwargs)?;
                builtins::expect_args("Array", &args, 1, 1)?;
                let v = static_module::new_array(*p, &args[0])?;
                self.push(v)
            }
            _ => Err(not_callable(&callee)),
        }
    }

    fn return_action(&self, f: &Function, check: Option<ReturnCheck>) -> ReturnAction {
        match check {
            Some(c) if !c.expected.is_dynamic() => {
                let declared = self.modules[f.module]
                    .code
                    .functions
                    .get(f.func_id)
                    .map(|code| &code.ret_type);
                if declared == Some(&c.expected) {
                    ReturnAction::Push
                } else {
                    ReturnAction::Check {
                        expected: c.expected,
                        callee: c.target,
                    }
                }
            }
            _ => ReturnAction::Push,
        }
    }

    /// Binds arguments to parameters and pushes the callee's frame.
    pub(super) fn enter_function(
        &mut self,
        f: &Function,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        on_return: ReturnAction,
    ) -> VmResult<()> {
        let module = Rc::clone(&self.modules[f.module].code);
        let Some(code) = module.functions.get(f.func_id) else {
            return Err(err(
                VmErrorKind::RuntimeError,
                format!("invalid function id {}", f.func_id),
            ));
        };
        let name = short_name(&code.qualname);
        let arity = code.arity as usize;
        let mut locals: Vec<Option<Value>> = vec![None; (code.num_locals as usize).max(code.params.len())];

        // positional
        let given = args.len();
        let mut extra = Vec::new();
        for (i, v) in args.into_iter().enumerate() {
            if i < arity {
                locals[i] = Some(v);
            } else {
                extra.push(v);
            }
        }
        let mut slot = arity;
        if code.flags.contains(FunctionFlags::VARARGS) {
            locals[slot] = Some(make_tuple(extra));
            slot += 1;
        } else if !extra.is_empty() {
            return Err(err(
                VmErrorKind::TypeError,
                format!(
                    "{}() takes {} positional argument{} but {} were given",
                    name,
                    arity,
                    if arity == 1 { "" } else { "s" },
                    given
                ),
            ));
        }

        // keywords
        let mut extra_kw = Dict::default();
        for (key, v) in kwargs {
            match code.params[..arity].iter().position(|p| *p == key) {
                Some(i) if locals[i].is_some() => {
                    return Err(err(
                        VmErrorKind::TypeError,
                        format!("{}() got multiple values for argument '{}'", name, key),
                    ));
                }
                Some(i) => locals[i] = Some(v),
                None if code.flags.contains(FunctionFlags::KWARGS) => {
                    let k = crate::vm::utils::make_string(key);
                    extra_kw.insert(dict_key(&k)?, k, v);
                }
                None => {
                    return Err(err(
                        VmErrorKind::TypeError,
                        format!("{}() got an unexpected keyword argument '{}'", name, key),
                    ));
                }
            }
        }
        if code.flags.contains(FunctionFlags::KWARGS) {
            locals[slot] = Some(make_dict(extra_kw));
        }

        // defaults fill the trailing positional parameters
        let first_default = arity.saturating_sub(f.defaults.len());
        for i in 0..arity {
            if locals[i].is_none() {
                match i.checked_sub(first_default).and_then(|d| f.defaults.get(d)) {
                    Some(d) => locals[i] = Some(d.clone()),
                    None => {
                        return Err(err(
                            VmErrorKind::TypeError,
                            format!(
                                "{}() missing required argument: '{}'",
                                name, code.params[i]
                            ),
                        ));
                    }
                }
            }
        }

        // own cells start from same-named parameters; captured cells follow
        let mut cells = Vec::with_capacity(code.cells.len() + f.captures.len());
        for cell_name in &code.cells {
            let init = code
                .params
                .iter()
                .position(|p| p == cell_name)
                .and_then(|i| locals.get(i).cloned().flatten());
            cells.push(Rc::new(RefCell::new(init)));
        }
        cells.extend(f.captures.iter().cloned());

        let ret_stack_size = self.stack.len();
        self.push_frame(Frame {
            ip: 0,
            module: f.module,
            func_id: f.func_id,
            ret_stack_size,
            locals,
            cells,
            handlers: Vec::new(),
            on_return,
        })
    }

    fn instantiate(
        &mut self,
        class: &Rc<Class>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> VmResult<()> {
        match class.kind {
            ClassKind::User => {}
            ClassKind::Exception => {
                no_kwargs(&class.name, &kwargs)?;
                let exc = make_exception(class, args);
                return self.push(exc);
            }
            _ => {
                no_kwargs(&class.name, &kwargs)?;
                let v = builtins::construct(self, class, args)?;
                return self.push(v);
            }
        }

        let instance = if class.is_exception() {
            make_exception(class, args.clone())
        } else {
            make_instance(class)
        };
        match class.lookup("__init__") {
            Some(init) => match init.as_object().map(|o| &o.data) {
                Some(ObjectData::Function(f)) => {
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(instance.clone());
                    full.extend(args);
                    self.enter_function(f, full, kwargs, ReturnAction::PushInstance(instance))
                }
                _ => Err(err(
                    VmErrorKind::TypeError,
                    format!("{}.__init__ is not a function", class.name),
                )),
            },
            None => {
                if !class.is_exception() && (!args.is_empty() || !kwargs.is_empty()) {
                    return Err(err(
                        VmErrorKind::TypeError,
                        format!("{}() takes no arguments", class.name),
                    ));
                }
                self.push(instance)
            }
        }
    }

    /// The argument-checking prologue of a static function.
    pub(super) fn check_args(&mut self, checks: &[(u16, TypeDescr)]) -> VmResult<()> {
        let (module, func_id) = {
            let f = self.frame()?;
            (f.module, f.func_id)
        };
        let code = Rc::clone(&self.modules[module].code);
        let Some(func) = code.functions.get(func_id) else {
            return Ok(());
        };
        for (slot, descr) in checks {
            let slot = *slot as usize;
            let value = self.frame()?.locals.get(slot).cloned().flatten();
            let Some(value) = value else {
                continue;
            };
            if crate::vm::utils::matches_descr(&value, descr) {
                if let TypeDescr::Prim(p) = descr {
                    let stored = crate::vm::prim::unbox(*p, &value)?;
                    self.frame_mut()?.locals[slot] = Some(stored);
                }
                continue;
            }
            return Err(err(
                VmErrorKind::TypeError,
                format!(
                    "{}() expected '{}' for argument '{}', got '{}'",
                    short_name(&func.qualname),
                    descr,
                    func.params.get(slot).map(String::as_str).unwrap_or("?"),
                    type_name(&value)
                ),
            ));
        }
        Ok(())
    }
}

fn not_callable(v: &Value) -> super::VmError {
    err(
        VmErrorKind::TypeError,
        format!("'{}' object is not callable", type_name(v)),
    )
}

fn no_kwargs(name: &str, kwargs: &[(String, Value)]) -> VmResult<()> {
    match kwargs.first() {
        Some((key, _)) => Err(err(
            VmErrorKind::TypeError,
            format!("{}() got an unexpected keyword argument '{}'", name, key),
        )),
        None => Ok(()),
    }
}
