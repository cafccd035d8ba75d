//! `int`, `float` and `bool` constructors and `abs`.

use super::super::utils::{truthy, type_name};
use super::super::value::{ObjectData, Value};
use super::super::{VmErrorKind, VmResult, err};
use super::expect_args;

/// int() builtin
pub fn int(args: Vec<Value>) -> VmResult<Value> {
    expect_args("int", &args, 0, 1)?;
    let Some(v) = args.first() else {
        return Ok(Value::Int(0));
    };
    match v {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(err(
                    VmErrorKind::OverflowError,
                    "cannot convert float infinity or NaN to integer".into(),
                ));
            }
            let t = f.trunc();
            if t < i64::MIN as f64 || t >= i64::MAX as f64 {
                return Err(err(
                    VmErrorKind::OverflowError,
                    "int too large to convert".into(),
                ));
            }
            Ok(Value::Int(t as i64))
        }
        Value::Object(obj) => match &obj.data {
            ObjectData::String(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                err(
                    VmErrorKind::ValueError,
                    format!("invalid literal for int() with base 10: '{}'", s),
                )
            }),
            _ => Err(not_a_number("int", v)),
        },
        Value::None => Err(not_a_number("int", v)),
    }
}

/// float() builtin
pub fn float(args: Vec<Value>) -> VmResult<Value> {
    expect_args("float", &args, 0, 1)?;
    let Some(v) = args.first() else {
        return Ok(Value::Float(0.0));
    };
    match v {
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::Object(obj) => match &obj.data {
            ObjectData::String(s) => {
                let t = s.trim();
                let parsed = match t.to_ascii_lowercase().as_str() {
                    "inf" | "+inf" | "infinity" => Ok(f64::INFINITY),
                    "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
                    "nan" => Ok(f64::NAN),
                    _ => t.parse::<f64>(),
                };
                parsed.map(Value::Float).map_err(|_| {
                    err(
                        VmErrorKind::ValueError,
                        format!("could not convert string to float: '{}'", s),
                    )
                })
            }
            _ => Err(not_a_number("float", v)),
        },
        Value::None => Err(not_a_number("float", v)),
    }
}

/// bool() builtin
pub fn bool(args: Vec<Value>) -> VmResult<Value> {
    expect_args("bool", &args, 0, 1)?;
    Ok(Value::Bool(args.first().is_some_and(truthy)))
}

pub fn abs(args: Vec<Value>) -> VmResult<Value> {
    expect_args("abs", &args, 1, 1)?;
    match &args[0] {
        Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(|| {
            err(
                VmErrorKind::OverflowError,
                "integer overflow in abs()".into(),
            )
        }),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(err(
            VmErrorKind::TypeError,
            format!("bad operand type for abs(): '{}'", type_name(other)),
        )),
    }
}

fn not_a_number(name: &str, v: &Value) -> super::super::VmError {
    err(
        VmErrorKind::TypeError,
        format!(
            "{}() argument must be a string or a number, not '{}'",
            name,
            type_name(v)
        ),
    )
}
