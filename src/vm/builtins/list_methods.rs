//! `list()`, `tuple()` and the list methods.

use std::cell::RefCell;

use super::super::utils::{eq_vals, make_list, make_tuple, repr_value, type_name};
use super::super::value::Value;
use super::super::{VmErrorKind, VmResult, err};
use super::{Native, expect_args, iter};

pub fn lookup(name: &str) -> Option<Native> {
    Some(match name {
        "append" => Native::Append,
        "extend" => Native::Extend,
        "insert" => Native::Insert,
        "pop" => Native::ListPop,
        "index" => Native::Index,
        "reverse" => Native::Reverse,
        _ => return None,
    })
}

/// list() builtin
pub fn list_new(args: Vec<Value>) -> VmResult<Value> {
    expect_args("list", &args, 0, 1)?;
    match args.first() {
        Some(it) => Ok(make_list(iter::collect(it)?)),
        None => Ok(make_list(Vec::new())),
    }
}

/// tuple() builtin
pub fn tuple_new(args: Vec<Value>) -> VmResult<Value> {
    expect_args("tuple", &args, 0, 1)?;
    match args.first() {
        Some(it) => Ok(make_tuple(iter::collect(it)?)),
        None => Ok(make_tuple(Vec::new())),
    }
}

pub fn call(func: Native, items: &RefCell<Vec<Value>>, args: Vec<Value>) -> VmResult<Value> {
    let name = func.to_string();
    match func {
        Native::Append => {
            expect_args(&name, &args, 1, 1)?;
            items.borrow_mut().push(args[0].clone());
            Ok(Value::None)
        }
        Native::Extend => {
            expect_args(&name, &args, 1, 1)?;
            let more = iter::collect(&args[0])?;
            items.borrow_mut().extend(more);
            Ok(Value::None)
        }
        Native::Insert => {
            expect_args(&name, &args, 2, 2)?;
            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            let mut at = expect_index(&args[0])?;
            if at < 0 {
                at = (at + len).max(0);
            }
            let at = at.min(len) as usize;
            items.insert(at, args[1].clone());
            Ok(Value::None)
        }
        Native::ListPop => {
            expect_args(&name, &args, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(err(VmErrorKind::IndexError, "pop from empty list".into()));
            }
            let len = items.len() as i64;
            let idx = match args.first() {
                Some(v) => expect_index(v)?,
                None => len - 1,
            };
            let actual = if idx < 0 { idx + len } else { idx };
            if actual < 0 || actual >= len {
                return Err(err(VmErrorKind::IndexError, "pop index out of range".into()));
            }
            Ok(items.remove(actual as usize))
        }
        Native::Index => {
            expect_args(&name, &args, 1, 1)?;
            items
                .borrow()
                .iter()
                .position(|v| eq_vals(v, &args[0]))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| {
                    err(
                        VmErrorKind::ValueError,
                        format!("{} is not in list", repr_value(&args[0])),
                    )
                })
        }
        Native::Reverse => {
            expect_args(&name, &args, 0, 0)?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        _ => Err(err(
            VmErrorKind::AttributeError,
            format!("'list' object has no attribute '{}'", name),
        )),
    }
}

fn expect_index(v: &Value) -> VmResult<i64> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i64),
        _ => Err(err(
            VmErrorKind::TypeError,
            format!(
                "'{}' object cannot be interpreted as an integer",
                type_name(v)
            ),
        )),
    }
}
