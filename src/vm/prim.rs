//! Arithmetic on unboxed primitive values, plus boxing and unboxing.
//!
//! Integer primitives are computed in `i128` from their widened value and
//! wrapped back to their width, so overflow wraps instead of raising.
//! Division truncates toward zero and `%` is the truncated remainder.

use super::bytecode::PrimConst;
use super::utils::type_name;
use super::value::Value;
use super::{VmError, VmErrorKind, VmResult, err};
use crate::parser::ast::{BinaryOp, CompareOp, UnaryOp};
use crate::types::Prim;

pub fn from_const(c: PrimConst) -> Value {
    match c {
        PrimConst::Int(i) => Value::Int(i),
        PrimConst::Float(f) => Value::Float(f),
        PrimConst::Bool(b) => Value::Bool(b),
    }
}

/// The zero value locals of type `p` start with.
pub fn zero(p: Prim) -> Value {
    if p.is_float() {
        Value::Float(0.0)
    } else if p == Prim::CBool {
        Value::Bool(false)
    } else {
        Value::Int(0)
    }
}

fn round(p: Prim, f: f64) -> f64 {
    if p == Prim::Single { f as f32 as f64 } else { f }
}

fn int_of(p: Prim, v: &Value) -> VmResult<i128> {
    match v {
        Value::Int(i) => Ok(p.widen(*i)),
        Value::Bool(b) => Ok(*b as i128),
        other => Err(internal(p, other)),
    }
}

fn float_of(p: Prim, v: &Value) -> VmResult<f64> {
    match v {
        Value::Float(f) => Ok(*f),
        other => Err(internal(p, other)),
    }
}

fn internal(p: Prim, v: &Value) -> VmError {
    err(
        VmErrorKind::TypeError,
        format!("expected {}, got {}", p, type_name(v)),
    )
}

fn zero_division() -> VmError {
    err(
        VmErrorKind::ZeroDivisionError,
        "integer division or modulo by zero".into(),
    )
}

pub fn binary(op: BinaryOp, p: Prim, a: &Value, b: &Value) -> VmResult<Value> {
    if p.is_float() {
        let (x, y) = (float_of(p, a)?, float_of(p, b)?);
        let r = match op {
            BinaryOp::Add => x + y,
            BinaryOp::Subtract => x - y,
            BinaryOp::Multiply => x * y,
            BinaryOp::Divide | BinaryOp::FloorDivide | BinaryOp::Modulo if y == 0.0 => {
                return Err(err(
                    VmErrorKind::ZeroDivisionError,
                    "float division by zero".into(),
                ));
            }
            BinaryOp::Divide => x / y,
            BinaryOp::FloorDivide => (x / y).floor(),
            BinaryOp::Modulo => x % y,
            BinaryOp::Power => x.powf(y),
            _ => return Err(unsupported(op, p)),
        };
        return Ok(Value::Float(round(p, r)));
    }
    if p == Prim::CBool {
        let (x, y) = (matches!(a, Value::Bool(true)), matches!(b, Value::Bool(true)));
        return match op {
            BinaryOp::BitAnd => Ok(Value::Bool(x & y)),
            BinaryOp::BitOr => Ok(Value::Bool(x | y)),
            BinaryOp::BitXor => Ok(Value::Bool(x ^ y)),
            _ => Err(unsupported(op, p)),
        };
    }

    let (x, y) = (int_of(p, a)?, int_of(p, b)?);
    let r = match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Subtract => x.wrapping_sub(y),
        BinaryOp::Multiply => x.wrapping_mul(y),
        BinaryOp::Divide | BinaryOp::FloorDivide => {
            if y == 0 {
                return Err(zero_division());
            }
            x / y
        }
        BinaryOp::Modulo => {
            if y == 0 {
                return Err(zero_division());
            }
            x % y
        }
        BinaryOp::Power => {
            if y < 0 {
                return Err(err(
                    VmErrorKind::ValueError,
                    format!("negative exponent for {}", p),
                ));
            }
            pow_wrapping(x, y)
        }
        BinaryOp::LShift | BinaryOp::RShift if y < 0 => {
            return Err(err(VmErrorKind::ValueError, "negative shift count".into()));
        }
        BinaryOp::LShift => {
            if y >= p.bits() as i128 {
                0
            } else {
                x.wrapping_shl(y as u32)
            }
        }
        BinaryOp::RShift => x >> (y.min(127) as u32),
        BinaryOp::BitAnd => x & y,
        BinaryOp::BitOr => x | y,
        BinaryOp::BitXor => x ^ y,
    };
    Ok(Value::Int(p.wrap(r)))
}

fn pow_wrapping(mut base: i128, mut exp: i128) -> i128 {
    let mut acc: i128 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    acc
}

fn unsupported(op: BinaryOp, p: Prim) -> VmError {
    err(
        VmErrorKind::TypeError,
        format!("unsupported operand type(s) for {}: '{}'", op.symbol(), p),
    )
}

pub fn unary(op: UnaryOp, p: Prim, v: &Value) -> VmResult<Value> {
    if p.is_float() {
        let x = float_of(p, v)?;
        return match op {
            UnaryOp::Negate => Ok(Value::Float(-x)),
            UnaryOp::Pos => Ok(Value::Float(x)),
            UnaryOp::Not => Ok(Value::Bool(x == 0.0)),
            UnaryOp::Invert => Err(err(
                VmErrorKind::TypeError,
                format!("bad operand type for unary ~: '{}'", p),
            )),
        };
    }
    if p == Prim::CBool {
        return Ok(Value::Bool(match op {
            UnaryOp::Not => !matches!(v, Value::Bool(true)),
            _ => matches!(v, Value::Bool(true)),
        }));
    }
    let x = int_of(p, v)?;
    Ok(match op {
        UnaryOp::Negate => Value::Int(p.wrap(x.wrapping_neg())),
        UnaryOp::Pos => Value::Int(p.wrap(x)),
        UnaryOp::Invert => Value::Int(p.wrap(!x)),
        UnaryOp::Not => Value::Bool(x == 0),
    })
}

/// Leaves a `cbool`.
pub fn compare(op: CompareOp, p: Prim, a: &Value, b: &Value) -> VmResult<Value> {
    use std::cmp::Ordering;
    let ord = if p.is_float() {
        float_of(p, a)?.partial_cmp(&float_of(p, b)?)
    } else {
        Some(int_of(p, a)?.cmp(&int_of(p, b)?))
    };
    let r = match (op, ord) {
        (CompareOp::NotEqual, None) => true,
        (_, None) => false,
        (CompareOp::Equal | CompareOp::Is, Some(o)) => o == Ordering::Equal,
        (CompareOp::NotEqual | CompareOp::IsNot, Some(o)) => o != Ordering::Equal,
        (CompareOp::Less, Some(o)) => o == Ordering::Less,
        (CompareOp::LessEqual, Some(o)) => o != Ordering::Greater,
        (CompareOp::Greater, Some(o)) => o == Ordering::Greater,
        (CompareOp::GreaterEqual, Some(o)) => o != Ordering::Less,
        (CompareOp::In | CompareOp::NotIn, _) => {
            return Err(err(
                VmErrorKind::TypeError,
                format!("'{}' is not a container", p),
            ));
        }
    };
    Ok(Value::Bool(r))
}

/// Converts between primitive types with C semantics: integers wrap,
/// floats truncate toward zero.
pub fn convert(from: Prim, to: Prim, v: &Value) -> VmResult<Value> {
    if to == Prim::CBool {
        return Ok(Value::Bool(match v {
            Value::Float(f) => *f != 0.0,
            Value::Bool(b) => *b,
            _ => int_of(from, v)? != 0,
        }));
    }
    let as_float = |v: &Value| -> VmResult<f64> {
        Ok(match v {
            Value::Float(f) => *f,
            Value::Bool(b) => *b as i64 as f64,
            _ => int_of(from, v)? as f64,
        })
    };
    if to.is_float() {
        return Ok(Value::Float(round(to, as_float(v)?)));
    }
    let wide = match v {
        Value::Float(f) => {
            if f.is_nan() {
                0
            } else {
                f.trunc() as i128
            }
        }
        Value::Bool(b) => *b as i128,
        _ => int_of(from, v)?,
    };
    Ok(Value::Int(to.wrap(wide)))
}

/// Converts a boxed value to the storage form of `p`, checking its type
/// and range.
pub fn unbox(p: Prim, v: &Value) -> VmResult<Value> {
    match (p, v) {
        (Prim::CBool, Value::Bool(b)) => Ok(Value::Bool(*b)),
        (p, Value::Float(f)) if p.is_float() => Ok(Value::Float(round(p, *f))),
        (p, Value::Int(_) | Value::Bool(_)) if p.is_int() => {
            let wide = match v {
                Value::Int(i) => *i as i128,
                _ => matches!(v, Value::Bool(true)) as i128,
            };
            if !p.contains(wide) {
                return Err(err(
                    VmErrorKind::OverflowError,
                    format!("int {} out of range for {}", wide, p),
                ));
            }
            Ok(Value::Int(p.wrap(wide)))
        }
        _ => Err(err(
            VmErrorKind::TypeError,
            format!("expected {}, got {}", p, type_name(v)),
        )),
    }
}

/// Converts a primitive to its boxed counterpart. Boxed ints are `i64`, so
/// a `uint64` above `i64::MAX` cannot be boxed.
pub fn box_value(p: Prim, v: &Value) -> VmResult<Value> {
    match (p, v) {
        (Prim::UInt64, Value::Int(i)) if *i < 0 => Err(err(
            VmErrorKind::OverflowError,
            format!("uint64 value {} does not fit in int", *i as u64),
        )),
        _ => Ok(v.clone()),
    }
}
