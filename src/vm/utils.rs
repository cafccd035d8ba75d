//! Value display, type names, equality and the other helpers shared by the
//! machine and the builtins.

use std::cell::RefCell;
use std::rc::Rc;

use super::value::{Class, ClassKind, Dict, DictKey, Instance, IterState, Object, ObjectData, Value};
use super::{VmErrorKind, VmResult, err};
use crate::types::{Prim, TypeDescr};

/// `str(v)`.
pub fn display_value(v: &Value) -> String {
    match v {
        Value::Object(obj) => match &obj.data {
            ObjectData::String(s) => s.clone(),
            ObjectData::Instance(inst) if inst.class.is_exception() => exception_message(obj),
            _ => repr_value(v),
        },
        _ => repr_value(v),
    }
}

/// `repr(v)`.
pub fn repr_value(v: &Value) -> String {
    match v {
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        Value::None => "None".to_string(),
        Value::Object(obj) => match &obj.data {
            ObjectData::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            ObjectData::List { items } => {
                let contents: Vec<String> = items.borrow().iter().map(repr_value).collect();
                format!("[{}]", contents.join(", "))
            }
            ObjectData::Tuple(items) => {
                let contents: Vec<String> = items.iter().map(repr_value).collect();
                if contents.len() == 1 {
                    format!("({},)", contents[0])
                } else {
                    format!("({})", contents.join(", "))
                }
            }
            ObjectData::Dict { map } => {
                let contents: Vec<String> = map
                    .borrow()
                    .entries()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", repr_value(k), repr_value(v)))
                    .collect();
                format!("{{{}}}", contents.join(", "))
            }
            ObjectData::Range { start, stop, step } => {
                if *step == 1 {
                    format!("range({}, {})", start, stop)
                } else {
                    format!("range({}, {}, {})", start, stop, step)
                }
            }
            ObjectData::Iterator(_) => "<iterator>".to_string(),
            ObjectData::Function(f) => format!("<function {}>", f.qualname),
            ObjectData::BoundMethod { func, .. } => match func.as_object().map(|o| &o.data) {
                Some(ObjectData::Function(f)) => format!("<bound method {}>", f.qualname),
                _ => "<bound method>".to_string(),
            },
            ObjectData::Native { func, receiver } => match receiver {
                Some(r) => format!("<built-in method {} of {} object>", func, type_name(r)),
                None => format!("<built-in function {}>", func),
            },
            ObjectData::Class(c) => format!("<class '{}'>", c.name),
            ObjectData::Instance(inst) => {
                if inst.class.is_exception() {
                    let msg = exception_message(obj);
                    format!("{}({})", inst.class.name, if msg.is_empty() { msg } else { format!("'{}'", msg) })
                } else {
                    format!("<{} object>", inst.class.name)
                }
            }
            ObjectData::Module { name, .. } => format!("<module '{}'>", name),
            ObjectData::Cell(_) => "<cell>".to_string(),
            ObjectData::PrimType(p) => format!("<class '{}'>", p),
            ObjectData::ArrayType(p) => format!("<class 'Array[{}]'>", p),
            ObjectData::Array { prim, items } => {
                let contents: Vec<String> = items.borrow().iter().map(repr_value).collect();
                format!("Array[{}]([{}])", prim, contents.join(", "))
            }
        },
    }
}

/// Python's float repr for the common cases: integral values keep a `.0`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

/// First argument of an exception instance, as text.
pub fn exception_message(obj: &Object) -> String {
    match obj.get_attr("args") {
        Some(Value::Object(args)) => match &args.data {
            ObjectData::Tuple(items) => match items.as_slice() {
                [] => String::new(),
                [one] => display_value(one),
                many => repr_value(&Value::Object(Rc::new(Object::new(ObjectData::Tuple(
                    many.to_vec(),
                ))))),
            },
            _ => String::new(),
        },
        _ => String::new(),
    }
}

/// `type(v).__name__`.
pub fn type_name(v: &Value) -> String {
    match v {
        Value::Int(_) => "int".to_string(),
        Value::Float(_) => "float".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::None => "NoneType".to_string(),
        Value::Object(obj) => match &obj.data {
            ObjectData::Instance(inst) => inst.class.name.clone(),
            other => other.kind_name().to_string(),
        },
    }
}

/// `a == b`.
pub fn eq_vals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Bool(x), Value::Int(y)) | (Value::Int(y), Value::Bool(x)) => (*x as i64) == *y,
        (Value::None, Value::None) => true,
        (Value::Object(x), Value::Object(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            match (&x.data, &y.data) {
                (ObjectData::String(s1), ObjectData::String(s2)) => s1 == s2,
                (ObjectData::List { items: a }, ObjectData::List { items: b }) => {
                    seq_eq(&a.borrow(), &b.borrow())
                }
                (ObjectData::Tuple(a), ObjectData::Tuple(b)) => seq_eq(a, b),
                (ObjectData::Dict { map: a }, ObjectData::Dict { map: b }) => {
                    let (a, b) = (a.borrow(), b.borrow());
                    a.len() == b.len()
                        && a.entries().iter().all(|(k, v)| {
                            dict_key(k)
                                .ok()
                                .and_then(|key| b.get(&key))
                                .is_some_and(|other| eq_vals(v, other))
                        })
                }
                (ObjectData::Class(a), ObjectData::Class(b)) => Rc::ptr_eq(a, b),
                (ObjectData::PrimType(a), ObjectData::PrimType(b)) => a == b,
                _ => false,
            }
        }
        _ => false,
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| eq_vals(x, y))
}

pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Bool(b) => *b,
        Value::None => false,
        Value::Object(obj) => match &obj.data {
            ObjectData::String(s) => !s.is_empty(),
            ObjectData::List { items } => !items.borrow().is_empty(),
            ObjectData::Tuple(items) => !items.is_empty(),
            ObjectData::Dict { map } => !map.borrow().is_empty(),
            ObjectData::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            ObjectData::Array { items, .. } => !items.borrow().is_empty(),
            _ => true,
        },
    }
}

pub fn range_len(start: i64, stop: i64, step: i64) -> i64 {
    if step > 0 && start < stop {
        (stop - start - 1) / step + 1
    } else if step < 0 && start > stop {
        (start - stop - 1) / (-step) + 1
    } else {
        0
    }
}

pub fn dict_key(v: &Value) -> VmResult<DictKey> {
    Ok(match v {
        Value::Int(i) => DictKey::Int(*i),
        Value::Bool(b) => DictKey::Int(*b as i64),
        Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => DictKey::Int(*f as i64),
        Value::Float(f) => DictKey::Float(f.to_bits()),
        Value::None => DictKey::None,
        Value::Object(obj) => match &obj.data {
            ObjectData::String(s) => DictKey::Str(s.clone()),
            ObjectData::Tuple(items) => {
                DictKey::Tuple(items.iter().map(dict_key).collect::<VmResult<_>>()?)
            }
            ObjectData::List { .. } | ObjectData::Dict { .. } | ObjectData::Array { .. } => {
                return Err(err(
                    VmErrorKind::TypeError,
                    format!("unhashable type: '{}'", type_name(v)),
                ));
            }
            _ => DictKey::Ptr(Rc::as_ptr(obj) as usize),
        },
    })
}

/// Does `v` satisfy the runtime type description `d`?
pub fn matches_descr(v: &Value, d: &TypeDescr) -> bool {
    match d {
        TypeDescr::Dynamic | TypeDescr::Object => true,
        TypeDescr::Int => matches!(v, Value::Int(_) | Value::Bool(_)),
        TypeDescr::Float => matches!(v, Value::Float(_)),
        TypeDescr::Bool => matches!(v, Value::Bool(_)),
        TypeDescr::NoneType => v.is_none(),
        TypeDescr::Str => v.as_str().is_some(),
        TypeDescr::List => object_is(v, |d| matches!(d, ObjectData::List { .. })),
        TypeDescr::Dict => object_is(v, |d| matches!(d, ObjectData::Dict { .. })),
        TypeDescr::Tuple => object_is(v, |d| matches!(d, ObjectData::Tuple(_))),
        TypeDescr::Prim(p) => prim_accepts(*p, v),
        TypeDescr::Class(qualname) => object_is(v, |d| match d {
            ObjectData::Instance(inst) => inst.class.has_qualname_in_mro(qualname),
            _ => false,
        }),
        TypeDescr::Optional(inner) => v.is_none() || matches_descr(v, inner),
    }
}

fn object_is(v: &Value, pred: impl Fn(&ObjectData) -> bool) -> bool {
    v.as_object().is_some_and(|o| pred(&o.data))
}

/// A boxed value that can be stored unboxed as `p` without loss.
pub fn prim_accepts(p: Prim, v: &Value) -> bool {
    match (p, v) {
        (Prim::CBool, Value::Bool(_)) => true,
        (p, Value::Int(i)) if p.is_int() => p.contains(*i as i128),
        (p, Value::Float(_)) if p.is_float() => true,
        _ => false,
    }
}

// ========== constructors ==========

pub fn make_string(s: impl Into<String>) -> Value {
    Value::Object(Rc::new(Object::new(ObjectData::String(s.into()))))
}

pub fn make_list(items: Vec<Value>) -> Value {
    Value::Object(Rc::new(Object::new(ObjectData::List {
        items: RefCell::new(items),
    })))
}

pub fn make_tuple(items: Vec<Value>) -> Value {
    Value::Object(Rc::new(Object::new(ObjectData::Tuple(items))))
}

pub fn make_dict(dict: Dict) -> Value {
    Value::Object(Rc::new(Object::new(ObjectData::Dict {
        map: RefCell::new(dict),
    })))
}

pub fn make_range(start: i64, stop: i64, step: i64) -> Value {
    Value::Object(Rc::new(Object::new(ObjectData::Range { start, stop, step })))
}

pub fn make_iterator(state: IterState) -> Value {
    Value::Object(Rc::new(Object::new(ObjectData::Iterator(RefCell::new(state)))))
}

pub fn make_class(class: Rc<Class>) -> Value {
    Value::Object(Rc::new(Object::new(ObjectData::Class(class))))
}

pub fn make_instance(class: &Rc<Class>) -> Value {
    let fields = vec![None; class.fields.len()];
    Value::Object(Rc::new(Object::new_with_attrs(ObjectData::Instance(Instance {
        class: Rc::clone(class),
        fields: RefCell::new(fields),
    }))))
}

/// An instance of an exception class carrying `args`.
pub fn make_exception(class: &Rc<Class>, args: Vec<Value>) -> Value {
    let exc = make_instance(class);
    if let Value::Object(obj) = &exc {
        obj.set_attr("args", make_tuple(args));
    }
    exc
}

pub fn is_builtin_kind(class: &Class, kind: ClassKind) -> bool {
    class.kind == kind
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_repr_keeps_point() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn display_and_repr_differ_for_strings() {
        let s = make_string("hi");
        assert_eq!(display_value(&s), "hi");
        assert_eq!(repr_value(&s), "'hi'");
        let l = make_list(vec![s, Value::Int(1), Value::None]);
        assert_eq!(display_value(&l), "['hi', 1, None]");
        assert_eq!(repr_value(&make_tuple(vec![Value::Int(1)])), "(1,)");
    }

    #[test]
    fn equality_is_structural_for_containers() {
        let a = make_list(vec![Value::Int(1), make_string("x")]);
        let b = make_list(vec![Value::Int(1), make_string("x")]);
        assert!(eq_vals(&a, &b));
        assert!(eq_vals(&Value::Bool(true), &Value::Int(1)));
        assert!(!eq_vals(&Value::None, &Value::Int(0)));
    }

    #[test]
    fn unhashable_keys_are_rejected() {
        let e = dict_key(&make_list(vec![])).unwrap_err();
        assert_eq!(e.kind, VmErrorKind::TypeError);
        assert_eq!(dict_key(&Value::Bool(true)).unwrap(), DictKey::Int(1));
    }

    #[test]
    fn descriptors() {
        assert!(matches_descr(&Value::Bool(true), &TypeDescr::Int));
        assert!(!matches_descr(&Value::Int(1), &TypeDescr::Str));
        assert!(matches_descr(
            &Value::None,
            &TypeDescr::Optional(Box::new(TypeDescr::Str))
        ));
        assert!(matches_descr(&Value::Int(255), &TypeDescr::Prim(Prim::UInt8)));
        assert!(!matches_descr(&Value::Int(256), &TypeDescr::Prim(Prim::UInt8)));
        assert!(!matches_descr(&Value::Int(1), &TypeDescr::Prim(Prim::Double)));
    }

    #[test]
    fn range_lengths() {
        assert_eq!(range_len(0, 10, 3), 4);
        assert_eq!(range_len(10, 0, -2), 5);
        assert_eq!(range_len(5, 5, 1), 0);
    }
}
