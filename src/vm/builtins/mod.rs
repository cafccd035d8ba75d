pub mod dict_methods;
pub mod iter;
pub mod len;
pub mod list_methods;
pub mod numbers;
pub mod print;
pub mod range;
pub mod reflect;
pub mod static_module;
pub mod str_methods;

#[cfg(test)]
mod tests;

use std::rc::Rc;

use rustc_hash::FxHashMap;
use strum::Display;

use super::utils::{make_class, make_instance, type_name};
use super::value::{Class, ClassKind, Object, ObjectData, Value};
use super::{Vm, VmErrorKind, VmResult, err};
use crate::runtime_io::RuntimeIo;
use crate::semantic::symbols::EXCEPTION_NAMES;

/// Natively implemented functions and methods. The display form is the
/// Python-level name used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Native {
    // builtins
    Print,
    Len,
    Isinstance,
    Issubclass,
    Range,
    Abs,
    Repr,

    // __static__
    Cast,
    Box,
    Unbox,

    // str
    Upper,
    Lower,
    Strip,
    Split,
    Join,
    Replace,
    Startswith,
    Endswith,
    Find,
    #[strum(serialize = "count")]
    StrCount,

    // list
    Append,
    Extend,
    Insert,
    #[strum(serialize = "pop")]
    ListPop,
    Index,
    Reverse,

    // dict
    Get,
    Keys,
    Values,
    Items,
    #[strum(serialize = "pop")]
    DictPop,
    Update,
}

impl Native {
    pub const GLOBALS: [Native; 7] = [
        Native::Print,
        Native::Len,
        Native::Isinstance,
        Native::Issubclass,
        Native::Range,
        Native::Abs,
        Native::Repr,
    ];

    pub fn value(self) -> Value {
        make_native(self, None)
    }
}

pub fn make_native(func: Native, receiver: Option<Value>) -> Value {
    Value::Object(Rc::new(Object::new(ObjectData::Native { func, receiver })))
}

/// The builtin method `name` of a builtin object, if it has one.
pub fn method_for(data: &ObjectData, name: &str) -> Option<Native> {
    match data {
        ObjectData::String(_) => str_methods::lookup(name),
        ObjectData::List { .. } => list_methods::lookup(name),
        ObjectData::Dict { .. } => dict_methods::lookup(name),
        _ => None,
    }
}

/// Classes every module can see without importing.
pub struct BuiltinClasses {
    pub object: Rc<Class>,
    pub type_: Rc<Class>,
    pub int: Rc<Class>,
    pub float: Rc<Class>,
    pub str: Rc<Class>,
    pub bool: Rc<Class>,
    pub list: Rc<Class>,
    pub dict: Rc<Class>,
    pub tuple: Rc<Class>,
    pub none: Rc<Class>,
    pub function: Rc<Class>,
    pub exceptions: FxHashMap<String, Rc<Class>>,
}

impl BuiltinClasses {
    pub fn new() -> Self {
        let object = Rc::new(Class::new("object", "builtins.object", None, ClassKind::Object));
        let simple = |name: &str, kind: ClassKind, base: &Rc<Class>| {
            Rc::new(Class::new(
                name,
                format!("builtins.{}", name),
                Some(Rc::clone(base)),
                kind,
            ))
        };
        let int = simple("int", ClassKind::Int, &object);
        let bool = simple("bool", ClassKind::Bool, &int);

        let mut exceptions: FxHashMap<String, Rc<Class>> = FxHashMap::default();
        for name in EXCEPTION_NAMES {
            let base = match name {
                "BaseException" => Rc::clone(&object),
                "Exception" => Rc::clone(&exceptions["BaseException"]),
                "UnboundLocalError" => Rc::clone(&exceptions["NameError"]),
                "RecursionError" | "NotImplementedError" => Rc::clone(&exceptions["RuntimeError"]),
                _ => Rc::clone(&exceptions["Exception"]),
            };
            exceptions.insert(name.to_string(), simple(name, ClassKind::Exception, &base));
        }

        Self {
            type_: simple("type", ClassKind::Type, &object),
            float: simple("float", ClassKind::Float, &object),
            str: simple("str", ClassKind::Str, &object),
            list: simple("list", ClassKind::List, &object),
            dict: simple("dict", ClassKind::Dict, &object),
            tuple: simple("tuple", ClassKind::Tuple, &object),
            none: simple("NoneType", ClassKind::NoneType, &object),
            function: simple("function", ClassKind::Function, &object),
            int,
            bool,
            object,
            exceptions,
        }
    }

    /// Builtin names visible to `LoadGlobal` after module globals.
    pub fn globals(&self) -> FxHashMap<String, Value> {
        let mut out = FxHashMap::default();
        for class in [
            &self.object,
            &self.type_,
            &self.int,
            &self.float,
            &self.str,
            &self.bool,
            &self.list,
            &self.dict,
            &self.tuple,
        ] {
            out.insert(class.name.clone(), make_class(Rc::clone(class)));
        }
        for (name, class) in &self.exceptions {
            out.insert(name.clone(), make_class(Rc::clone(class)));
        }
        for f in Native::GLOBALS {
            out.insert(f.to_string(), f.value());
        }
        out
    }

    pub fn exception(&self, kind: VmErrorKind) -> Rc<Class> {
        self.exceptions
            .get(&kind.to_string())
            .cloned()
            .unwrap_or_else(|| Rc::clone(&self.exceptions["Exception"]))
    }

    /// `type(v)`.
    pub fn class_of(&self, v: &Value) -> Rc<Class> {
        let class = match v {
            Value::Int(_) => &self.int,
            Value::Float(_) => &self.float,
            Value::Bool(_) => &self.bool,
            Value::None => &self.none,
            Value::Object(obj) => match &obj.data {
                ObjectData::String(_) => &self.str,
                ObjectData::List { .. } => &self.list,
                ObjectData::Dict { .. } => &self.dict,
                ObjectData::Tuple(_) => &self.tuple,
                ObjectData::Instance(inst) => return Rc::clone(&inst.class),
                ObjectData::Class(_) | ObjectData::PrimType(_) | ObjectData::ArrayType(_) => {
                    &self.type_
                }
                ObjectData::Function(_)
                | ObjectData::BoundMethod { .. }
                | ObjectData::Native { .. } => &self.function,
                _ => &self.object,
            },
        };
        Rc::clone(class)
    }
}

impl Default for BuiltinClasses {
    fn default() -> Self {
        Self::new()
    }
}

// ========== dispatch ==========

/// Calls a native function or bound native method.
pub fn call_native<IO: RuntimeIo>(
    vm: &mut Vm,
    func: Native,
    receiver: Option<&Value>,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    io: &mut IO,
) -> VmResult<Value> {
    if func == Native::Print {
        return print::call(args, kwargs, io);
    }
    if let Some((name, _)) = kwargs.first() {
        return Err(err(
            VmErrorKind::TypeError,
            format!("{}() got an unexpected keyword argument '{}'", func, name),
        ));
    }
    match (func, receiver) {
        (Native::Len, _) => len::call(args),
        (Native::Isinstance, _) => reflect::isinstance(&vm.builtins, args),
        (Native::Issubclass, _) => reflect::issubclass(args),
        (Native::Range, _) => range::create_range(args),
        (Native::Abs, _) => numbers::abs(args),
        (Native::Repr, _) => reflect::repr(args),
        (Native::Cast, _) => static_module::cast(&vm.builtins, args),
        (Native::Box | Native::Unbox, _) => static_module::identity(func, args),
        (_, Some(recv)) => match &recv.as_object().map(|o| &o.data) {
            Some(ObjectData::String(s)) => str_methods::call(func, s, args),
            Some(ObjectData::List { items }) => list_methods::call(func, items, args),
            Some(ObjectData::Dict { map }) => dict_methods::call(func, map, args),
            _ => Err(err(
                VmErrorKind::TypeError,
                format!("{}() is not a method of '{}'", func, type_name(recv)),
            )),
        },
        (_, None) => Err(err(
            VmErrorKind::TypeError,
            format!("{}() needs a receiver", func),
        )),
    }
}

/// Calls a builtin class as a constructor (`int("3")`, `list(xs)`, ...).
pub fn construct(vm: &Vm, class: &Rc<Class>, args: Vec<Value>) -> VmResult<Value> {
    match class.kind {
        ClassKind::Int => numbers::int(args),
        ClassKind::Float => numbers::float(args),
        ClassKind::Bool => numbers::bool(args),
        ClassKind::Str => str_methods::str_new(args),
        ClassKind::List => list_methods::list_new(args),
        ClassKind::Tuple => list_methods::tuple_new(args),
        ClassKind::Dict => dict_methods::dict_new(args),
        ClassKind::Type => match args.as_slice() {
            [v] => Ok(make_class(vm.builtins.class_of(v))),
            _ => Err(err(
                VmErrorKind::TypeError,
                "type() takes 1 argument".to_string(),
            )),
        },
        ClassKind::Object => {
            expect_args("object", &args, 0, 0)?;
            Ok(make_instance(class))
        }
        _ => Err(err(
            VmErrorKind::TypeError,
            format!("cannot create '{}' instances", class.name),
        )),
    }
}

/// Checks that a native received between `min` and `max` positional arguments.
pub(crate) fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> VmResult<()> {
    let n = args.len();
    if n >= min && n <= max {
        return Ok(());
    }
    let message = if min == max {
        match min {
            0 => format!("{}() takes no arguments ({} given)", name, n),
            1 => format!("{}() takes exactly one argument ({} given)", name, n),
            _ => format!("{}() takes exactly {} arguments ({} given)", name, min, n),
        }
    } else if n < min {
        format!("{}() takes at least {} arguments ({} given)", name, min, n)
    } else {
        format!("{}() takes at most {} arguments ({} given)", name, max, n)
    };
    Err(err(VmErrorKind::TypeError, message))
}
