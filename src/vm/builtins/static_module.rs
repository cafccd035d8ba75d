//! The `__static__` runtime module as seen by dynamic code: primitive type
//! names, `cast`, `box`, `unbox` and `Array`.

use std::cell::RefCell;
use std::rc::Rc;

use strum::IntoEnumIterator;

use super::super::prim;
use super::super::utils::{matches_descr, type_name};
use super::super::value::{ClassKind, Object, ObjectData, Value};
use super::super::{VmErrorKind, VmResult, err};
use super::{BuiltinClasses, Native, expect_args};
use crate::types::{Prim, TypeDescr};

pub const MODULE_NAME: &str = "__static__";

/// Names exported by `__static__`.
pub fn exports() -> Vec<(String, Value)> {
    let mut out: Vec<(String, Value)> = Prim::iter()
        .map(|p| (p.to_string(), prim_type(p)))
        .collect();
    out.push(("ssize_t".into(), prim_type(Prim::Int64)));
    out.push(("size_t".into(), prim_type(Prim::UInt64)));
    out.push(("cast".into(), Native::Cast.value()));
    out.push(("box".into(), Native::Box.value()));
    out.push(("unbox".into(), Native::Unbox.value()));
    out.push((
        "Array".into(),
        Value::Object(Rc::new(Object::new(ObjectData::ArrayType(Prim::Int64)))),
    ));
    out
}

fn prim_type(p: Prim) -> Value {
    Value::Object(Rc::new(Object::new(ObjectData::PrimType(p))))
}

/// `Array[T]`: the element type of a subscripted `Array`.
pub fn array_of(index: &Value) -> VmResult<Value> {
    match index.as_object().map(|o| &o.data) {
        Some(ObjectData::PrimType(p)) => Ok(Value::Object(Rc::new(Object::new(
            ObjectData::ArrayType(*p),
        )))),
        _ => Err(err(
            VmErrorKind::TypeError,
            format!("Array element type must be a primitive, not {}", type_name(index)),
        )),
    }
}

/// `Array[T](n)`: a zero-filled array.
pub fn new_array(p: Prim, len: &Value) -> VmResult<Value> {
    let n = match len {
        Value::Int(n) if *n >= 0 => *n as usize,
        Value::Int(n) => {
            return Err(err(
                VmErrorKind::ValueError,
                format!("negative array length {}", n),
            ));
        }
        other => {
            return Err(err(
                VmErrorKind::TypeError,
                format!("array length must be int, not {}", type_name(other)),
            ));
        }
    };
    Ok(Value::Object(Rc::new(Object::new(ObjectData::Array {
        prim: p,
        items: RefCell::new(vec![prim::zero(p); n]),
    }))))
}

/// Calling a primitive type from dynamic code converts with range checks.
pub fn call_prim_type(p: Prim, args: Vec<Value>) -> VmResult<Value> {
    expect_args(&p.to_string(), &args, 1, 1)?;
    let v = &args[0];
    match (p, v) {
        (p, Value::Float(f)) if p.is_int() => prim::unbox(p, &Value::Int(f.trunc() as i64)),
        (p, Value::Int(i)) if p.is_float() => Ok(Value::Float(*i as f64)),
        (Prim::CBool, _) => Ok(Value::Bool(super::super::utils::truthy(v))),
        _ => prim::unbox(p, v),
    }
}

/// The runtime type description named by a type object.
pub fn descr_of(builtins: &BuiltinClasses, ty: &Value) -> VmResult<TypeDescr> {
    match ty.as_object().map(|o| &o.data) {
        Some(ObjectData::PrimType(p)) => Ok(TypeDescr::Prim(*p)),
        Some(ObjectData::Class(c)) => Ok(match c.kind {
            ClassKind::Object => TypeDescr::Object,
            ClassKind::Int => TypeDescr::Int,
            ClassKind::Float => TypeDescr::Float,
            ClassKind::Str => TypeDescr::Str,
            ClassKind::Bool => TypeDescr::Bool,
            ClassKind::List => TypeDescr::List,
            ClassKind::Dict => TypeDescr::Dict,
            ClassKind::Tuple => TypeDescr::Tuple,
            ClassKind::NoneType => TypeDescr::NoneType,
            _ if Rc::ptr_eq(c, &builtins.type_) => TypeDescr::Dynamic,
            _ => TypeDescr::Class(c.qualname.clone()),
        }),
        _ if ty.is_none() => Ok(TypeDescr::NoneType),
        _ => Err(err(
            VmErrorKind::TypeError,
            format!("cast() arg 1 must be a type, not {}", type_name(ty)),
        )),
    }
}

/// `cast(T, v)` called dynamically.
pub fn cast(builtins: &BuiltinClasses, args: Vec<Value>) -> VmResult<Value> {
    expect_args("cast", &args, 2, 2)?;
    let descr = descr_of(builtins, &args[0])?;
    check_cast(&descr, &args[1])?;
    Ok(args[1].clone())
}

/// Shared by `cast()` and the `Cast` instruction.
pub fn check_cast(descr: &TypeDescr, v: &Value) -> VmResult<()> {
    if matches_descr(v, descr) {
        Ok(())
    } else {
        Err(err(
            VmErrorKind::TypeError,
            format!("expected {}, got {}", descr, type_name(v)),
        ))
    }
}

/// `box(x)` and `unbox(x)` are identities once values reach dynamic code.
pub fn identity(func: Native, args: Vec<Value>) -> VmResult<Value> {
    expect_args(&func.to_string(), &args, 1, 1)?;
    Ok(args[0].clone())
}
