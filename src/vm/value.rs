//! Runtime values.
//!
//! Scalars (`int`, `float`, `bool`, `None`) are stored inline; everything
//! else lives behind an `Rc<Object>`. Primitive (unboxed) values share the
//! scalar representation: integer primitives are stored in an `i64` in their
//! wrapped form, `cbool` as `Bool`, `single`/`double` as `Float`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::builtins::Native;
use crate::types::{Prim, TypeDescr};

#[derive(Clone)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Float(f64),
    None,
    Object(Rc<Object>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::None => write!(f, "None"),
            Value::Object(obj) => write!(f, "Object({})", obj.data.kind_name()),
        }
    }
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_object(&self) -> Option<&Rc<Object>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Object(obj) => match &obj.data {
                ObjectData::String(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&Rc<Class>> {
        match self {
            Value::Object(obj) => match &obj.data {
                ObjectData::Class(c) => Some(c),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            _ => false,
        }
    }
}

/// A heap object with an optional instance dictionary.
pub struct Object {
    pub data: ObjectData,
    pub attributes: Option<RefCell<FxHashMap<String, Value>>>,
}

impl Object {
    pub fn new(data: ObjectData) -> Self {
        Self {
            data,
            attributes: None,
        }
    }

    pub fn new_with_attrs(data: ObjectData) -> Self {
        Self {
            data,
            attributes: Some(RefCell::new(FxHashMap::default())),
        }
    }

    pub fn get_attr(&self, name: &str) -> Option<Value> {
        self.attributes
            .as_ref()
            .and_then(|attrs| attrs.borrow().get(name).cloned())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes
            .as_ref()
            .is_some_and(|attrs| attrs.borrow().contains_key(name))
    }

    /// Stores into the instance dictionary; `false` when the object has none.
    pub fn set_attr(&self, name: &str, value: Value) -> bool {
        match &self.attributes {
            Some(attrs) => {
                attrs.borrow_mut().insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub fn del_attr(&self, name: &str) -> bool {
        self.attributes
            .as_ref()
            .is_some_and(|attrs| attrs.borrow_mut().remove(name).is_some())
    }
}

pub type Cell = RefCell<Option<Value>>;

pub enum ObjectData {
    String(String),
    List {
        items: RefCell<Vec<Value>>,
    },
    Tuple(Vec<Value>),
    Dict {
        map: RefCell<Dict>,
    },
    Range {
        start: i64,
        stop: i64,
        step: i64,
    },
    Iterator(RefCell<IterState>),
    Function(Function),
    BoundMethod {
        receiver: Value,
        func: Value,
    },
    /// A builtin function, or a builtin method bound to `receiver`.
    Native {
        func: Native,
        receiver: Option<Value>,
    },
    Class(Rc<Class>),
    Instance(Instance),
    Module {
        index: usize,
        name: String,
    },
    Cell(Rc<Cell>),
    /// A primitive type name (`int8`, ...) used as a value by dynamic code.
    PrimType(Prim),
    /// `Array[prim]`, callable with a length.
    ArrayType(Prim),
    Array {
        prim: Prim,
        items: RefCell<Vec<Value>>,
    },
}

impl ObjectData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ObjectData::String(_) => "str",
            ObjectData::List { .. } => "list",
            ObjectData::Tuple(_) => "tuple",
            ObjectData::Dict { .. } => "dict",
            ObjectData::Range { .. } => "range",
            ObjectData::Iterator(_) => "iterator",
            ObjectData::Function(_) => "function",
            ObjectData::BoundMethod { .. } => "method",
            ObjectData::Native { .. } => "builtin_function_or_method",
            ObjectData::Class(_) => "type",
            ObjectData::Instance(_) => "instance",
            ObjectData::Module { .. } => "module",
            ObjectData::Cell(_) => "cell",
            ObjectData::PrimType(_) | ObjectData::ArrayType(_) => "type",
            ObjectData::Array { .. } => "Array",
        }
    }
}

pub struct Function {
    /// Index of the defining module in the VM.
    pub module: usize,
    pub func_id: usize,
    pub qualname: String,
    pub defaults: Vec<Value>,
    pub captures: Vec<Rc<Cell>>,
}

pub struct Instance {
    pub class: Rc<Class>,
    /// Typed slots, `None` until assigned.
    pub fields: RefCell<Vec<Option<Value>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Object,
    Type,
    Int,
    Float,
    Str,
    Bool,
    List,
    Dict,
    Tuple,
    NoneType,
    Function,
    /// `BaseException` and every builtin exception.
    Exception,
    User,
}

pub struct Class {
    pub name: String,
    /// Module-qualified name, compared against `TypeDescr::Class`.
    pub qualname: String,
    pub base: Option<Rc<Class>>,
    pub kind: ClassKind,
    /// Slot layout, inherited slots first.
    pub fields: Vec<(String, TypeDescr)>,
    pub attrs: RefCell<FxHashMap<String, Value>>,
}

impl Class {
    pub fn new(
        name: impl Into<String>,
        qualname: impl Into<String>,
        base: Option<Rc<Class>>,
        kind: ClassKind,
    ) -> Self {
        Self {
            name: name.into(),
            qualname: qualname.into(),
            base,
            kind,
            fields: Vec::new(),
            attrs: RefCell::new(FxHashMap::default()),
        }
    }

    /// The class and its bases, most derived first.
    pub fn mro(self: &Rc<Self>) -> Vec<Rc<Class>> {
        let mut out = vec![Rc::clone(self)];
        let mut cur = self.base.clone();
        while let Some(c) = cur {
            cur = c.base.clone();
            out.push(c);
        }
        out
    }

    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<Value> {
        let mut cur = Some(Rc::clone(self));
        while let Some(c) = cur {
            if let Some(v) = c.attrs.borrow().get(name) {
                return Some(v.clone());
            }
            cur = c.base.clone();
        }
        None
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<Class>) -> bool {
        let mut cur = Some(Rc::clone(self));
        while let Some(c) = cur {
            if Rc::ptr_eq(&c, other) {
                return true;
            }
            cur = c.base.clone();
        }
        other.kind == ClassKind::Object
    }

    pub fn has_qualname_in_mro(self: &Rc<Self>, qualname: &str) -> bool {
        let mut cur = Some(Rc::clone(self));
        while let Some(c) = cur {
            if c.qualname == qualname {
                return true;
            }
            cur = c.base.clone();
        }
        false
    }

    pub fn field_offset(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    pub fn is_exception(self: &Rc<Self>) -> bool {
        self.mro().iter().any(|c| c.kind == ClassKind::Exception)
    }
}

/// Hashable projection of a value used as a dictionary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Int(i64),
    /// Bit pattern of a non-integral float.
    Float(u64),
    Str(String),
    None,
    Tuple(Vec<DictKey>),
    /// Identity of any other object.
    Ptr(usize),
}

/// Insertion-ordered dictionary.
#[derive(Default)]
pub struct Dict {
    index: FxHashMap<DictKey, usize>,
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn get(&self, key: &DictKey) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, key: &DictKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn insert(&mut self, key: DictKey, key_value: Value, value: Value) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((key_value, value));
            }
        }
    }

    pub fn remove(&mut self, key: &DictKey) -> Option<Value> {
        let i = self.index.remove(key)?;
        let (_, value) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }
}

pub enum IterState {
    /// Indexes into a list, tuple or string.
    Seq { source: Value, pos: usize },
    Range { next: i64, stop: i64, step: i64 },
    /// A snapshot (dict keys, items).
    Items { items: Vec<Value>, pos: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_dictionary_is_allocated_on_request() {
        let plain = Object::new(ObjectData::String("s".into()));
        assert!(!plain.set_attr("x", Value::Int(1)));
        assert!(plain.get_attr("x").is_none());

        let obj = Object::new_with_attrs(ObjectData::Tuple(vec![]));
        assert!(obj.set_attr("x", Value::Int(1)));
        assert!(obj.has_attr("x"));
        assert!(obj.del_attr("x"));
        assert!(!obj.has_attr("x"));
    }

    #[test]
    fn dict_keeps_insertion_order_after_removal() {
        let mut d = Dict::default();
        for (i, k) in ["a", "b", "c"].iter().enumerate() {
            d.insert(DictKey::Str(k.to_string()), Value::Int(i as i64), Value::Int(i as i64));
        }
        assert_eq!(d.remove(&DictKey::Str("a".into())).map(|v| v.is(&Value::Int(0))), Some(true));
        d.insert(DictKey::Str("a".into()), Value::Int(9), Value::Int(9));
        let order: Vec<i64> = d
            .entries()
            .iter()
            .filter_map(|(k, _)| match k {
                Value::Int(i) => Some(*i),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![1, 2, 9]);
        assert!(d.get(&DictKey::Str("c".into())).is_some());
    }

    #[test]
    fn class_lookup_walks_bases() {
        let base = Rc::new(Class::new("B", "m.B", None, ClassKind::User));
        base.attrs.borrow_mut().insert("f".into(), Value::Int(1));
        let derived = Rc::new(Class::new("D", "m.D", Some(Rc::clone(&base)), ClassKind::User));
        assert!(derived.lookup("f").is_some());
        assert!(derived.is_subclass_of(&base));
        assert!(!base.is_subclass_of(&derived));
        assert!(derived.has_qualname_in_mro("m.B"));
        assert_eq!(derived.mro().len(), 2);
    }
}
