//! `isinstance`, `issubclass` and `repr`.

use std::rc::Rc;

use super::super::utils::{make_string, repr_value, type_name};
use super::super::value::{Class, ObjectData, Value};
use super::super::{VmErrorKind, VmResult, err};
use super::{BuiltinClasses, expect_args};

pub fn isinstance(builtins: &BuiltinClasses, args: Vec<Value>) -> VmResult<Value> {
    expect_args("isinstance", &args, 2, 2)?;
    let class = builtins.class_of(&args[0]);
    let targets = class_targets("isinstance", &args[1])?;
    Ok(Value::Bool(targets.iter().any(|t| class.is_subclass_of(t))))
}

pub fn issubclass(args: Vec<Value>) -> VmResult<Value> {
    expect_args("issubclass", &args, 2, 2)?;
    let Some(class) = args[0].as_class() else {
        return Err(err(
            VmErrorKind::TypeError,
            "issubclass() arg 1 must be a class".into(),
        ));
    };
    let targets = class_targets("issubclass", &args[1])?;
    Ok(Value::Bool(targets.iter().any(|t| class.is_subclass_of(t))))
}

pub fn repr(args: Vec<Value>) -> VmResult<Value> {
    expect_args("repr", &args, 1, 1)?;
    Ok(make_string(repr_value(&args[0])))
}

/// A class or a tuple of classes.
fn class_targets(name: &str, v: &Value) -> VmResult<Vec<Rc<Class>>> {
    if let Some(c) = v.as_class() {
        return Ok(vec![Rc::clone(c)]);
    }
    if let Some(ObjectData::Tuple(items)) = v.as_object().map(|o| &o.data) {
        return items
            .iter()
            .map(|item| class_targets(name, item))
            .collect::<VmResult<Vec<_>>>()
            .map(|nested| nested.into_iter().flatten().collect());
    }
    Err(err(
        VmErrorKind::TypeError,
        format!(
            "{}() arg 2 must be a type or tuple of types, not {}",
            name,
            type_name(v)
        ),
    ))
}
