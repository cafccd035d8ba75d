//! `str()` and the string methods.

use super::super::utils::{display_value, make_list, make_string, type_name};
use super::super::value::Value;
use super::super::{VmErrorKind, VmResult, err};
use super::{Native, expect_args, iter};

pub fn lookup(name: &str) -> Option<Native> {
    Some(match name {
        "upper" => Native::Upper,
        "lower" => Native::Lower,
        "strip" => Native::Strip,
        "split" => Native::Split,
        "join" => Native::Join,
        "replace" => Native::Replace,
        "startswith" => Native::Startswith,
        "endswith" => Native::Endswith,
        "find" => Native::Find,
        "count" => Native::StrCount,
        _ => return None,
    })
}

/// str() builtin
pub fn str_new(args: Vec<Value>) -> VmResult<Value> {
    expect_args("str", &args, 0, 1)?;
    Ok(make_string(args.first().map(display_value).unwrap_or_default()))
}

pub fn call(func: Native, s: &str, args: Vec<Value>) -> VmResult<Value> {
    let name = func.to_string();
    match func {
        Native::Upper => {
            expect_args(&name, &args, 0, 0)?;
            Ok(make_string(s.to_uppercase()))
        }
        Native::Lower => {
            expect_args(&name, &args, 0, 0)?;
            Ok(make_string(s.to_lowercase()))
        }
        Native::Strip => {
            expect_args(&name, &args, 0, 0)?;
            Ok(make_string(s.trim()))
        }
        Native::Split => {
            expect_args(&name, &args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().map(make_string).collect(),
                Some(sep) => {
                    let sep = expect_str(sep, &name)?;
                    if sep.is_empty() {
                        return Err(err(VmErrorKind::ValueError, "empty separator".into()));
                    }
                    s.split(sep).map(make_string).collect()
                }
            };
            Ok(make_list(parts))
        }
        Native::Join => {
            expect_args(&name, &args, 1, 1)?;
            let items = iter::collect(&args[0])?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(p) => parts.push(p.to_string()),
                    None => {
                        return Err(err(
                            VmErrorKind::TypeError,
                            format!(
                                "sequence item {}: expected str instance, {} found",
                                i,
                                type_name(item)
                            ),
                        ));
                    }
                }
            }
            Ok(make_string(parts.join(s)))
        }
        Native::Replace => {
            expect_args(&name, &args, 2, 2)?;
            let from = expect_str(&args[0], &name)?;
            let to = expect_str(&args[1], &name)?;
            Ok(make_string(s.replace(from, to)))
        }
        Native::Startswith => {
            expect_args(&name, &args, 1, 1)?;
            Ok(Value::Bool(s.starts_with(expect_str(&args[0], &name)?)))
        }
        Native::Endswith => {
            expect_args(&name, &args, 1, 1)?;
            Ok(Value::Bool(s.ends_with(expect_str(&args[0], &name)?)))
        }
        Native::Find => {
            expect_args(&name, &args, 1, 1)?;
            let needle = expect_str(&args[0], &name)?;
            Ok(Value::Int(match s.find(needle) {
                Some(byte) => s[..byte].chars().count() as i64,
                None => -1,
            }))
        }
        Native::StrCount => {
            expect_args(&name, &args, 1, 1)?;
            let needle = expect_str(&args[0], &name)?;
            let n = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::Int(n as i64))
        }
        _ => Err(err(
            VmErrorKind::AttributeError,
            format!("'str' object has no attribute '{}'", name),
        )),
    }
}

fn expect_str<'v>(v: &'v Value, method: &str) -> VmResult<&'v str> {
    v.as_str().ok_or_else(|| {
        err(
            VmErrorKind::TypeError,
            format!("{}() argument must be str, not {}", method, type_name(v)),
        )
    })
}
