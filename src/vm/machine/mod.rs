//! The bytecode interpreter.
//!
//! Frames share one operand stack. Each loaded module keeps its globals by
//! name, so static and dynamic modules can read and patch each other's
//! definitions. Exceptions unwind through per-frame handler stacks.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::debug;

use crate::runtime_io::{RuntimeIo, StdIo};
use crate::types::TypeDescr;
use crate::vm::builtins::{BuiltinClasses, static_module};
use crate::vm::bytecode::Module;
use crate::vm::utils::{exception_message, make_exception, make_string};
use crate::vm::value::{Cell, Object, ObjectData, Value};

mod call;
mod instruction;
mod method_dispatch;
mod operators;

#[cfg(test)]
mod tests;

pub use method_dispatch::VtableSlot;

// ========== errors ==========

/// Python exception classes the VM raises itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum VmErrorKind {
    BaseException,
    Exception,
    TypeError,
    ValueError,
    AttributeError,
    IndexError,
    KeyError,
    NameError,
    UnboundLocalError,
    OverflowError,
    ZeroDivisionError,
    RuntimeError,
    RecursionError,
    AssertionError,
    StopIteration,
    NotImplementedError,
    ImportError,
}

#[derive(Debug, Error)]
#[error("{kind}{}", message_suffix(.message))]
pub struct VmError {
    pub kind: VmErrorKind,
    pub message: String,
    /// The raised exception object, once one exists.
    pub exception: Option<Value>,
}

fn message_suffix(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {}", message)
    }
}

pub type VmResult<T> = Result<T, VmError>;

/// VmError 생성 헬퍼 함수
pub fn err(kind: VmErrorKind, message: String) -> VmError {
    VmError {
        kind,
        message,
        exception: None,
    }
}

// ========== frames ==========

/// Return type a de-virtualized call site expects, with the call target it
/// names when the check fails.
#[derive(Debug, Clone)]
pub struct ReturnCheck {
    pub expected: TypeDescr,
    pub target: String,
}

/// What happens to a frame's return value.
#[derive(Debug, Clone)]
pub enum ReturnAction {
    Push,
    /// `__init__` returned; push the new instance instead.
    PushInstance(Value),
    /// A module body finished; push the module object.
    ModuleInit(usize),
    /// Check the value against the caller's expectation.
    Check { expected: TypeDescr, callee: String },
    /// Leave the run loop with the value.
    Stop,
}

#[derive(Debug, Clone, Copy)]
pub struct Handler {
    pub target: usize,
    pub stack_len: usize,
}

#[derive(Debug)]
pub struct Frame {
    pub ip: usize,
    pub module: usize,
    pub func_id: usize,
    pub ret_stack_size: usize,
    /// `None` marks an unbound local.
    pub locals: Vec<Option<Value>>,
    /// Own cells, then the captured free variables.
    pub cells: Vec<Rc<Cell>>,
    pub handlers: Vec<Handler>,
    pub on_return: ReturnAction,
}

pub struct LoadedModule {
    pub code: Rc<Module>,
    pub globals: FxHashMap<String, Value>,
    pub initialized: bool,
    pub object: Value,
    /// Unknown attributes resolve to `None` (the `typing` shim).
    pub lenient: bool,
}

pub struct Vm {
    pub stack: Vec<Value>,
    pub frames: Vec<Frame>,
    pub max_stack: usize,
    pub max_frames: usize,
    pub(crate) builtins: BuiltinClasses,
    builtin_names: FxHashMap<String, Value>,
    modules: Vec<LoadedModule>,
    module_index: FxHashMap<String, usize>,
    method_cache: method_dispatch::MethodCache,
}

/// IP를 상대적으로 점프
fn jump_rel(ip: &mut usize, off: i32) {
    if off >= 0 {
        *ip = ip.wrapping_add(off as usize);
    } else {
        *ip = ip.wrapping_sub(off.unsigned_abs() as usize);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let builtins = BuiltinClasses::new();
        let builtin_names = builtins.globals();
        let mut vm = Self {
            stack: Vec::with_capacity(128),
            frames: Vec::with_capacity(32),
            max_stack: 10_000,
            max_frames: 1_000,
            builtins,
            builtin_names,
            modules: Vec::new(),
            module_index: FxHashMap::default(),
            method_cache: method_dispatch::MethodCache::default(),
        };
        vm.load_native(static_module::MODULE_NAME, static_module::exports(), false);
        vm.load_native("typing", Vec::new(), true);
        vm
    }

    pub fn with_limits(max_stack: usize, max_frames: usize) -> Self {
        Self {
            max_stack,
            max_frames,
            ..Self::new()
        }
    }

    fn load_native(&mut self, name: &str, exports: Vec<(String, Value)>, lenient: bool) {
        let idx = self.load(Module::new(name));
        let m = &mut self.modules[idx];
        m.globals.extend(exports);
        m.initialized = true;
        m.lenient = lenient;
    }

    /// Registers a compiled module; it runs on first import. Loading a module
    /// under an existing name replaces it.
    pub fn load(&mut self, module: Module) -> usize {
        let name = module.name.clone();
        let idx = match self.module_index.get(&name) {
            Some(&idx) => idx,
            None => {
                self.modules.push(LoadedModule {
                    code: Rc::new(Module::default()),
                    globals: FxHashMap::default(),
                    initialized: false,
                    object: Value::None,
                    lenient: false,
                });
                self.modules.len() - 1
            }
        };
        let object = Value::Object(Rc::new(Object::new(ObjectData::Module {
            index: idx,
            name: name.clone(),
        })));
        let mut globals = FxHashMap::default();
        globals.insert("__name__".to_string(), make_string(name.clone()));
        self.modules[idx] = LoadedModule {
            code: Rc::new(module),
            globals,
            initialized: false,
            object,
            lenient: false,
        };
        self.module_index.insert(name, idx);
        idx
    }

    pub fn module_index(&self, name: &str) -> Option<usize> {
        self.module_index.get(name).copied()
    }

    /// A module-level name after the module has run.
    pub fn global(&self, module: &str, name: &str) -> Option<Value> {
        let idx = self.module_index(module)?;
        self.modules[idx].globals.get(name).cloned()
    }

    pub fn run(&mut self, name: &str) -> VmResult<Value> {
        let mut stdio = StdIo;
        self.run_with_io(name, &mut stdio)
    }

    /// Imports (and so runs) the named module, returning its module object.
    pub fn run_with_io<IO: RuntimeIo>(&mut self, name: &str, io: &mut IO) -> VmResult<Value> {
        let idx = self
            .module_index(name)
            .ok_or_else(|| err(VmErrorKind::ImportError, format!("No module named '{}'", name)))?;
        if self.modules[idx].initialized {
            return Ok(self.modules[idx].object.clone());
        }
        let depth = self.frames.len();
        self.enter_module(idx, ReturnAction::Stop)?;
        let result = self.execute(depth, io);
        if result.is_err() {
            self.frames.truncate(depth);
        }
        result.map(|_| self.modules[idx].object.clone())
    }

    fn enter_module(&mut self, idx: usize, on_return: ReturnAction) -> VmResult<()> {
        debug!(module = %self.modules[idx].code.name, "initializing module");
        self.modules[idx].initialized = true;
        let code = Rc::clone(&self.modules[idx].code);
        let Some(body) = code.functions.first() else {
            return self.finish_return(Value::None, on_return);
        };
        self.push_frame(Frame {
            ip: 0,
            module: idx,
            func_id: 0,
            ret_stack_size: self.stack.len(),
            locals: vec![None; body.num_locals as usize],
            cells: Vec::new(),
            handlers: Vec::new(),
            on_return,
        })
    }

    /// Runs until the frame at `depth` returns through `ReturnAction::Stop`.
    fn execute<IO: RuntimeIo>(&mut self, depth: usize, io: &mut IO) -> VmResult<Value> {
        loop {
            match self.step(io) {
                Ok(instruction::ExecutionFlow::Continue) => {}
                Ok(instruction::ExecutionFlow::Return(v)) => return Ok(v),
                Err(e) => self.unwind(e, depth)?,
            }
        }
    }

    fn step<IO: RuntimeIo>(&mut self, io: &mut IO) -> VmResult<instruction::ExecutionFlow> {
        let (module, func_id, ip) = match self.frames.last() {
            Some(f) => (f.module, f.func_id, f.ip),
            None => return Ok(instruction::ExecutionFlow::Return(Value::None)),
        };
        let code = Rc::clone(&self.modules[module].code);
        let Some(func) = code.functions.get(func_id) else {
            return Err(err(
                VmErrorKind::RuntimeError,
                format!("invalid function id {}", func_id),
            ));
        };
        let Some(ins) = func.code.get(ip) else {
            return self.do_return(Value::None);
        };
        if let Some(f) = self.frames.last_mut() {
            f.ip = ip + 1;
        }
        self.execute_instruction(ins, &code, io)
    }

    // ========== exceptions ==========

    /// The exception object for an error, creating it on first sight.
    fn exception_value(&self, e: &VmError) -> Value {
        match &e.exception {
            Some(v) => v.clone(),
            None => {
                let class = self.builtins.exception(e.kind);
                let args = if e.message.is_empty() {
                    Vec::new()
                } else {
                    vec![make_string(e.message.clone())]
                };
                make_exception(&class, args)
            }
        }
    }

    /// Converts a raised exception object back into an error.
    pub(crate) fn error_from_exception(&self, exc: Value) -> VmError {
        let (kind, message) = match exc.as_object().map(|o| (o, &o.data)) {
            Some((obj, ObjectData::Instance(inst))) => {
                let kind = inst
                    .class
                    .mro()
                    .iter()
                    .find_map(|c| c.name.parse::<VmErrorKind>().ok())
                    .unwrap_or(VmErrorKind::Exception);
                let name = inst.class.name.clone();
                let message = exception_message(obj);
                let message = if name == kind.to_string() {
                    message
                } else if message.is_empty() {
                    name
                } else {
                    format!("{}: {}", name, message)
                };
                (kind, message)
            }
            _ => (
                VmErrorKind::TypeError,
                "exceptions must derive from BaseException".to_string(),
            ),
        };
        VmError {
            kind,
            message,
            exception: Some(exc),
        }
    }

    /// Transfers control to the innermost handler above `depth`, or returns
    /// the error when there is none.
    fn unwind(&mut self, e: VmError, depth: usize) -> VmResult<()> {
        let exc = self.exception_value(&e);
        while self.frames.len() > depth {
            let Some(frame) = self.frames.last_mut() else {
                break;
            };
            if let Some(h) = frame.handlers.pop() {
                frame.ip = h.target;
                self.stack.truncate(h.stack_len);
                self.stack.push(exc);
                return Ok(());
            }
            let size = frame.ret_stack_size;
            self.frames.pop();
            self.stack.truncate(size);
        }
        debug!(kind = %e.kind, "uncaught exception");
        Err(VmError {
            exception: Some(exc),
            ..e
        })
    }

    // ========== 스택 연산 ==========

    fn push(&mut self, v: Value) -> VmResult<()> {
        if self.stack.len() >= self.max_stack {
            return Err(err(
                VmErrorKind::RecursionError,
                "stack overflow".into(),
            ));
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| err(VmErrorKind::RuntimeError, "stack underflow".into()))
    }

    fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        if self.stack.len() < n {
            return Err(err(VmErrorKind::RuntimeError, "stack underflow".into()));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn peek(&self, depth: usize) -> VmResult<&Value> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.stack.get(i))
            .ok_or_else(|| err(VmErrorKind::RuntimeError, "stack underflow".into()))
    }

    // ========== 프레임 관리 ==========

    fn push_frame(&mut self, frame: Frame) -> VmResult<()> {
        if self.frames.len() >= self.max_frames {
            return Err(err(
                VmErrorKind::RecursionError,
                "maximum recursion depth exceeded".into(),
            ));
        }
        self.frames.push(frame);
        Ok(())
    }

    fn frame(&self) -> VmResult<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| err(VmErrorKind::RuntimeError, "no frame".into()))
    }

    fn frame_mut(&mut self) -> VmResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| err(VmErrorKind::RuntimeError, "no frame".into()))
    }

    /// Pops the current frame and delivers `value` per its return action.
    fn do_return(&mut self, value: Value) -> VmResult<instruction::ExecutionFlow> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| err(VmErrorKind::RuntimeError, "return outside frame".into()))?;
        self.stack.truncate(frame.ret_stack_size);
        if let ReturnAction::Stop = frame.on_return {
            return Ok(instruction::ExecutionFlow::Return(value));
        }
        self.finish_return(value, frame.on_return)?;
        Ok(instruction::ExecutionFlow::Continue)
    }

    fn finish_return(&mut self, value: Value, action: ReturnAction) -> VmResult<()> {
        match action {
            ReturnAction::Push | ReturnAction::Stop => self.push(value),
            ReturnAction::PushInstance(instance) => self.push(instance),
            ReturnAction::ModuleInit(idx) => {
                let object = self.modules[idx].object.clone();
                self.push(object)
            }
            ReturnAction::Check { expected, callee } => {
                self.check_return(&expected, &callee, &value)?;
                self.push(value)
            }
        }
    }

    fn check_return(&self, expected: &TypeDescr, callee: &str, value: &Value) -> VmResult<()> {
        if crate::vm::utils::matches_descr(value, expected) {
            return Ok(());
        }
        Err(err(
            VmErrorKind::TypeError,
            format!(
                "unexpected return type from {}, expected {}, got {}",
                callee,
                expected,
                crate::vm::utils::type_name(value)
            ),
        ))
    }

    fn add_ip_rel(&mut self, off: i32) -> VmResult<()> {
        let f = self.frame_mut()?;
        jump_rel(&mut f.ip, off);
        Ok(())
    }
}
