//! `dict()` and the dict methods.

use std::cell::RefCell;

use super::super::utils::{dict_key, make_dict, make_list, repr_value, type_name};
use super::super::value::{Dict, ObjectData, Value};
use super::super::{VmErrorKind, VmResult, err};
use super::{Native, expect_args, iter};

pub fn lookup(name: &str) -> Option<Native> {
    Some(match name {
        "get" => Native::Get,
        "keys" => Native::Keys,
        "values" => Native::Values,
        "items" => Native::Items,
        "pop" => Native::DictPop,
        "update" => Native::Update,
        _ => return None,
    })
}

/// dict() builtin: empty, a copy of a mapping, or from `(key, value)` pairs.
pub fn dict_new(args: Vec<Value>) -> VmResult<Value> {
    expect_args("dict", &args, 0, 1)?;
    let mut dict = Dict::default();
    if let Some(source) = args.first() {
        merge_into(&mut dict, source)?;
    }
    Ok(make_dict(dict))
}

/// Copies a mapping or a sequence of pairs into `dict`.
pub fn merge_into(dict: &mut Dict, source: &Value) -> VmResult<()> {
    if let Some(ObjectData::Dict { map }) = source.as_object().map(|o| &o.data) {
        for (k, v) in map.borrow().entries() {
            dict.insert(dict_key(k)?, k.clone(), v.clone());
        }
        return Ok(());
    }
    for (i, pair) in iter::collect(source)?.into_iter().enumerate() {
        match iter::collect(&pair)?.as_slice() {
            [k, v] => dict.insert(dict_key(k)?, k.clone(), v.clone()),
            other => {
                return Err(err(
                    VmErrorKind::ValueError,
                    format!(
                        "dictionary update sequence element #{} has length {}; 2 is required",
                        i,
                        other.len()
                    ),
                ));
            }
        }
    }
    Ok(())
}

pub fn call(func: Native, map: &RefCell<Dict>, args: Vec<Value>) -> VmResult<Value> {
    let name = func.to_string();
    match func {
        Native::Get => {
            expect_args(&name, &args, 1, 2)?;
            let key = dict_key(&args[0])?;
            Ok(map
                .borrow()
                .get(&key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        Native::Keys => {
            expect_args(&name, &args, 0, 0)?;
            Ok(make_list(map.borrow().keys()))
        }
        Native::Values => {
            expect_args(&name, &args, 0, 0)?;
            Ok(make_list(
                map.borrow().entries().iter().map(|(_, v)| v.clone()).collect(),
            ))
        }
        Native::Items => {
            expect_args(&name, &args, 0, 0)?;
            Ok(make_list(iter::pairs(map.borrow().entries())))
        }
        Native::DictPop => {
            expect_args(&name, &args, 1, 2)?;
            let key = dict_key(&args[0])?;
            let removed = map.borrow_mut().remove(&key);
            match (removed, args.get(1)) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(err(VmErrorKind::KeyError, repr_value(&args[0]))),
            }
        }
        Native::Update => {
            expect_args(&name, &args, 1, 1)?;
            if args[0].as_object().is_some_and(|o| match &o.data {
                ObjectData::Dict { map: other } => std::ptr::eq(other, map),
                _ => false,
            }) {
                return Ok(Value::None);
            }
            merge_into(&mut map.borrow_mut(), &args[0])?;
            Ok(Value::None)
        }
        _ => Err(err(
            VmErrorKind::AttributeError,
            format!("'dict' object has no attribute '{}'", name),
        )),
    }
}

/// Requires `v` to be a dict; used for `**` arguments.
pub fn expect_dict(v: &Value) -> VmResult<&RefCell<Dict>> {
    match v.as_object().map(|o| &o.data) {
        Some(ObjectData::Dict { map }) => Ok(map),
        _ => Err(err(
            VmErrorKind::TypeError,
            format!("argument after ** must be a mapping, not {}", type_name(v)),
        )),
    }
}
