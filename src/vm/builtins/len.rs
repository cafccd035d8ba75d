use super::super::utils::{range_len, type_name};
use super::super::value::{ObjectData, Value};
use super::super::{VmErrorKind, VmResult, err};
use super::expect_args;

pub fn call(args: Vec<Value>) -> VmResult<Value> {
    expect_args("len", &args, 1, 1)?;
    let v = &args[0];
    let n = match v {
        Value::Object(obj) => match &obj.data {
            ObjectData::String(s) => s.chars().count() as i64,
            ObjectData::List { items } => items.borrow().len() as i64,
            ObjectData::Tuple(items) => items.len() as i64,
            ObjectData::Dict { map } => map.borrow().len() as i64,
            ObjectData::Range { start, stop, step } => range_len(*start, *stop, *step),
            ObjectData::Array { items, .. } => items.borrow().len() as i64,
            _ => return Err(no_len(v)),
        },
        _ => return Err(no_len(v)),
    };
    Ok(Value::Int(n))
}

fn no_len(v: &Value) -> super::super::VmError {
    err(
        VmErrorKind::TypeError,
        format!("object of type '{}' has no len()", type_name(v)),
    )
}
