//! Operators on boxed values: arithmetic, comparison and subscripts.

use std::cmp::Ordering;

use crate::parser::ast::{BinaryOp, CompareOp, UnaryOp};
use crate::vm::builtins::static_module;
use crate::vm::prim;
use crate::vm::utils::{
    dict_key, eq_vals, make_list, make_string, make_tuple, range_len, repr_value, truthy,
    type_name,
};
use crate::vm::value::{ObjectData, Value};
use crate::vm::{VmError, VmErrorKind, VmResult, err};

fn overflow() -> VmError {
    err(VmErrorKind::OverflowError, "integer overflow".into())
}

fn unsupported(op: BinaryOp, a: &Value, b: &Value) -> VmError {
    err(
        VmErrorKind::TypeError,
        format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            type_name(a),
            type_name(b)
        ),
    )
}

fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Float(f) => Some(*f),
        _ => as_int(v).map(|i| i as f64),
    }
}

pub(super) fn binary(op: BinaryOp, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
        match op {
            BinaryOp::BitAnd => return Ok(Value::Bool(x & y)),
            BinaryOp::BitOr => return Ok(Value::Bool(x | y)),
            BinaryOp::BitXor => return Ok(Value::Bool(x ^ y)),
            _ => {}
        }
    }
    if let (Some(x), Some(y)) = (as_int(a), as_int(b)) {
        return int_binary(op, x, y);
    }
    if (matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)))
        && let (Some(x), Some(y)) = (as_float(a), as_float(b))
    {
        return match float_binary(op, x, y) {
            Some(result) => result,
            None => Err(unsupported(op, a, b)),
        };
    }
    sequence_binary(op, a, b)
}

fn int_binary(op: BinaryOp, x: i64, y: i64) -> VmResult<Value> {
    let zero_div = || {
        err(
            VmErrorKind::ZeroDivisionError,
            "integer division or modulo by zero".into(),
        )
    };
    let r = match op {
        BinaryOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        BinaryOp::Subtract => x.checked_sub(y).ok_or_else(overflow)?,
        BinaryOp::Multiply => x.checked_mul(y).ok_or_else(overflow)?,
        BinaryOp::Divide => {
            if y == 0 {
                return Err(err(VmErrorKind::ZeroDivisionError, "division by zero".into()));
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinaryOp::FloorDivide => {
            if y == 0 {
                return Err(zero_div());
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) { q - 1 } else { q }
        }
        BinaryOp::Modulo => {
            if y == 0 {
                return Err(zero_div());
            }
            let r = x.checked_rem(y).unwrap_or(0);
            if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }
        }
        BinaryOp::Power => {
            if y < 0 {
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            let exp = u32::try_from(y).map_err(|_| overflow())?;
            x.checked_pow(exp).ok_or_else(overflow)?
        }
        BinaryOp::LShift | BinaryOp::RShift if y < 0 => {
            return Err(err(VmErrorKind::ValueError, "negative shift count".into()));
        }
        BinaryOp::LShift => {
            if x == 0 {
                0
            } else {
                let shifted = x.checked_shl(y.min(64) as u32).ok_or_else(overflow)?;
                if shifted >> y != x {
                    return Err(overflow());
                }
                shifted
            }
        }
        BinaryOp::RShift => x >> y.min(63),
        BinaryOp::BitAnd => x & y,
        BinaryOp::BitOr => x | y,
        BinaryOp::BitXor => x ^ y,
    };
    Ok(Value::Int(r))
}

fn float_binary(op: BinaryOp, x: f64, y: f64) -> Option<VmResult<Value>> {
    let zero = || {
        Some(Err(err(
            VmErrorKind::ZeroDivisionError,
            "float division by zero".into(),
        )))
    };
    let r = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Subtract => x - y,
        BinaryOp::Multiply => x * y,
        BinaryOp::Divide | BinaryOp::FloorDivide | BinaryOp::Modulo if y == 0.0 => return zero(),
        BinaryOp::Divide => x / y,
        BinaryOp::FloorDivide => (x / y).floor(),
        BinaryOp::Modulo => {
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r }
        }
        BinaryOp::Power => x.powf(y),
        _ => return None,
    };
    Some(Ok(Value::Float(r)))
}

fn sequence_binary(op: BinaryOp, a: &Value, b: &Value) -> VmResult<Value> {
    let (Some(x), Some(y)) = (a.as_object(), b.as_object()) else {
        return repeat(op, a, b);
    };
    match (op, &x.data, &y.data) {
        (BinaryOp::Add, ObjectData::String(s1), ObjectData::String(s2)) => {
            Ok(make_string(format!("{}{}", s1, s2)))
        }
        (BinaryOp::Add, ObjectData::List { items: l1 }, ObjectData::List { items: l2 }) => {
            let mut out = l1.borrow().clone();
            out.extend(l2.borrow().iter().cloned());
            Ok(make_list(out))
        }
        (BinaryOp::Add, ObjectData::Tuple(t1), ObjectData::Tuple(t2)) => {
            Ok(make_tuple(t1.iter().chain(t2).cloned().collect()))
        }
        _ => Err(unsupported(op, a, b)),
    }
}

/// `seq * n` and `n * seq`.
fn repeat(op: BinaryOp, a: &Value, b: &Value) -> VmResult<Value> {
    let (seq, n) = match (as_int(a), as_int(b)) {
        (None, Some(n)) => (a, n),
        (Some(n), None) => (b, n),
        _ => return Err(unsupported(op, a, b)),
    };
    if op != BinaryOp::Multiply {
        return Err(unsupported(op, a, b));
    }
    let n = n.max(0) as usize;
    match seq.as_object().map(|o| &o.data) {
        Some(ObjectData::String(s)) => Ok(make_string(s.repeat(n))),
        Some(ObjectData::List { items }) => {
            let items = items.borrow();
            Ok(make_list(
                std::iter::repeat_n(items.iter(), n).flatten().cloned().collect(),
            ))
        }
        Some(ObjectData::Tuple(items)) => Ok(make_tuple(
            std::iter::repeat_n(items.iter(), n).flatten().cloned().collect(),
        )),
        _ => Err(unsupported(op, a, b)),
    }
}

pub(super) fn unary(op: UnaryOp, v: &Value) -> VmResult<Value> {
    match (op, v) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!truthy(v))),
        (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Negate, _) if as_int(v).is_some() => as_int(v)
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(overflow),
        (UnaryOp::Pos, _) if as_int(v).is_some() => Ok(Value::Int(as_int(v).unwrap_or(0))),
        (UnaryOp::Invert, _) if as_int(v).is_some() => Ok(Value::Int(!as_int(v).unwrap_or(0))),
        _ => {
            let symbol = match op {
                UnaryOp::Negate => "-",
                UnaryOp::Pos => "+",
                UnaryOp::Invert => "~",
                UnaryOp::Not => "not",
            };
            Err(err(
                VmErrorKind::TypeError,
                format!("bad operand type for unary {}: '{}'", symbol, type_name(v)),
            ))
        }
    }
}

pub(super) fn compare(op: CompareOp, a: &Value, b: &Value) -> VmResult<bool> {
    Ok(match op {
        CompareOp::Equal => eq_vals(a, b),
        CompareOp::NotEqual => !eq_vals(a, b),
        CompareOp::Is => a.is(b),
        CompareOp::IsNot => !a.is(b),
        CompareOp::In => contains(b, a)?,
        CompareOp::NotIn => !contains(b, a)?,
        CompareOp::Less => order(op, a, b)? == Some(Ordering::Less),
        CompareOp::LessEqual => matches!(order(op, a, b)?, Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Greater => order(op, a, b)? == Some(Ordering::Greater),
        CompareOp::GreaterEqual => {
            matches!(order(op, a, b)?, Some(Ordering::Greater | Ordering::Equal))
        }
    })
}

/// `None` for unordered floats (NaN).
fn order(op: CompareOp, a: &Value, b: &Value) -> VmResult<Option<Ordering>> {
    if let (Some(x), Some(y)) = (as_int(a), as_int(b)) {
        return Ok(Some(x.cmp(&y)));
    }
    if let (Some(x), Some(y)) = (as_float(a), as_float(b)) {
        return Ok(x.partial_cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_object(), b.as_object()) {
        match (&x.data, &y.data) {
            (ObjectData::String(s1), ObjectData::String(s2)) => return Ok(Some(s1.cmp(s2))),
            (ObjectData::List { items: l1 }, ObjectData::List { items: l2 }) => {
                return seq_order(op, &l1.borrow(), &l2.borrow());
            }
            (ObjectData::Tuple(t1), ObjectData::Tuple(t2)) => return seq_order(op, t1, t2),
            _ => {}
        }
    }
    let symbol = match op {
        CompareOp::Less => "<",
        CompareOp::LessEqual => "<=",
        CompareOp::Greater => ">",
        _ => ">=",
    };
    Err(err(
        VmErrorKind::TypeError,
        format!(
            "'{}' not supported between instances of '{}' and '{}'",
            symbol,
            type_name(a),
            type_name(b)
        ),
    ))
}

fn seq_order(op: CompareOp, a: &[Value], b: &[Value]) -> VmResult<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !eq_vals(x, y) {
            return order(op, x, y);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

/// `item in container`.
pub(super) fn contains(container: &Value, item: &Value) -> VmResult<bool> {
    let data = container.as_object().map(|o| &o.data);
    Ok(match data {
        Some(ObjectData::String(s)) => match item.as_str() {
            Some(sub) => s.contains(sub),
            None => {
                return Err(err(
                    VmErrorKind::TypeError,
                    format!(
                        "'in <string>' requires string as left operand, not {}",
                        type_name(item)
                    ),
                ));
            }
        },
        Some(ObjectData::List { items }) => items.borrow().iter().any(|v| eq_vals(v, item)),
        Some(ObjectData::Tuple(items)) => items.iter().any(|v| eq_vals(v, item)),
        Some(ObjectData::Dict { map }) => map.borrow().contains(&dict_key(item)?),
        Some(ObjectData::Range { start, stop, step }) => match as_int(item) {
            Some(i) => {
                let in_bounds = if *step > 0 {
                    i >= *start && i < *stop
                } else {
                    i <= *start && i > *stop
                };
                in_bounds && (i - start) % step == 0
            }
            None => false,
        },
        _ => {
            return Err(err(
                VmErrorKind::TypeError,
                format!(
                    "argument of type '{}' is not iterable",
                    type_name(container)
                ),
            ));
        }
    })
}

/// Resolves a possibly negative index against `len`.
fn normalize(kind: &str, index: &Value, len: usize) -> VmResult<usize> {
    let Some(i) = as_int(index) else {
        return Err(err(
            VmErrorKind::TypeError,
            format!("{} indices must be integers, not {}", kind, type_name(index)),
        ));
    };
    let len = len as i64;
    let actual = if i < 0 { i + len } else { i };
    if actual < 0 || actual >= len {
        return Err(err(
            VmErrorKind::IndexError,
            format!("{} index out of range", kind),
        ));
    }
    Ok(actual as usize)
}

pub(super) fn load_index(obj: &Value, index: &Value) -> VmResult<Value> {
    match obj.as_object().map(|o| &o.data) {
        Some(ObjectData::List { items }) => {
            let items = items.borrow();
            Ok(items[normalize("list", index, items.len())?].clone())
        }
        Some(ObjectData::Tuple(items)) => Ok(items[normalize("tuple", index, items.len())?].clone()),
        Some(ObjectData::String(s)) => {
            let i = normalize("string", index, s.chars().count())?;
            Ok(make_string(s.chars().nth(i).map(String::from).unwrap_or_default()))
        }
        Some(ObjectData::Range { start, stop, step }) => {
            let i = normalize("range object", index, range_len(*start, *stop, *step) as usize)?;
            Ok(Value::Int(start + step * i as i64))
        }
        Some(ObjectData::Dict { map }) => map
            .borrow()
            .get(&dict_key(index)?)
            .cloned()
            .ok_or_else(|| err(VmErrorKind::KeyError, repr_value(index))),
        Some(ObjectData::Array { prim: p, items }) => {
            let items = items.borrow();
            let raw = &items[normalize("array", index, items.len())?];
            prim::box_value(*p, raw)
        }
        Some(ObjectData::ArrayType(_)) => static_module::array_of(index),
        // `list[int]` and friends evaluate to the class itself.
        Some(ObjectData::Class(_)) => Ok(obj.clone()),
        _ => Err(err(
            VmErrorKind::TypeError,
            format!("'{}' object is not subscriptable", type_name(obj)),
        )),
    }
}

pub(super) fn store_index(obj: &Value, index: &Value, value: Value) -> VmResult<()> {
    match obj.as_object().map(|o| &o.data) {
        Some(ObjectData::List { items }) => {
            let mut items = items.borrow_mut();
            let i = normalize("list assignment", index, items.len())?;
            items[i] = value;
            Ok(())
        }
        Some(ObjectData::Dict { map }) => {
            let key = dict_key(index)?;
            map.borrow_mut().insert(key, index.clone(), value);
            Ok(())
        }
        Some(ObjectData::Array { prim: p, items }) => {
            let stored = prim::unbox(*p, &value)?;
            let mut items = items.borrow_mut();
            let i = normalize("array assignment", index, items.len())?;
            items[i] = stored;
            Ok(())
        }
        _ => Err(err(
            VmErrorKind::TypeError,
            format!(
                "'{}' object does not support item assignment",
                type_name(obj)
            ),
        )),
    }
}

pub(super) fn delete_index(obj: &Value, index: &Value) -> VmResult<()> {
    match obj.as_object().map(|o| &o.data) {
        Some(ObjectData::List { items }) => {
            let mut items = items.borrow_mut();
            let i = normalize("list assignment", index, items.len())?;
            items.remove(i);
            Ok(())
        }
        Some(ObjectData::Dict { map }) => map
            .borrow_mut()
            .remove(&dict_key(index)?)
            .map(|_| ())
            .ok_or_else(|| err(VmErrorKind::KeyError, repr_value(index))),
        _ => Err(err(
            VmErrorKind::TypeError,
            format!("'{}' object does not support item deletion", type_name(obj)),
        )),
    }
}

/// Element access on a primitive array, leaving the stored form.
pub(super) fn array_load(obj: &Value, index: &Value) -> VmResult<Value> {
    match obj.as_object().map(|o| &o.data) {
        Some(ObjectData::Array { items, .. }) => {
            let items = items.borrow();
            Ok(items[normalize("array", index, items.len())?].clone())
        }
        _ => Err(not_array(obj)),
    }
}

pub(super) fn array_store(obj: &Value, index: &Value, value: Value) -> VmResult<()> {
    match obj.as_object().map(|o| &o.data) {
        Some(ObjectData::Array { items, .. }) => {
            let mut items = items.borrow_mut();
            let i = normalize("array assignment", index, items.len())?;
            items[i] = value;
            Ok(())
        }
        _ => Err(not_array(obj)),
    }
}

fn not_array(obj: &Value) -> VmError {
    err(
        VmErrorKind::TypeError,
        format!("expected Array, got {}", type_name(obj)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_and_modulo_round_toward_negative_infinity() {
        assert!(matches!(
            binary(BinaryOp::FloorDivide, &Value::Int(-7), &Value::Int(2)),
            Ok(Value::Int(-4))
        ));
        assert!(matches!(
            binary(BinaryOp::Modulo, &Value::Int(-7), &Value::Int(2)),
            Ok(Value::Int(1))
        ));
        assert!(matches!(
            binary(BinaryOp::Divide, &Value::Int(7), &Value::Int(2)),
            Ok(Value::Float(f)) if f == 3.5
        ));
    }

    #[test]
    fn boxed_overflow_raises() {
        let e = binary(BinaryOp::Add, &Value::Int(i64::MAX), &Value::Int(1)).unwrap_err();
        assert_eq!(e.kind, VmErrorKind::OverflowError);
        let e = binary(BinaryOp::LShift, &Value::Int(1), &Value::Int(64)).unwrap_err();
        assert_eq!(e.kind, VmErrorKind::OverflowError);
    }

    #[test]
    fn mixed_operands() {
        assert!(matches!(
            binary(BinaryOp::Add, &Value::Int(1), &Value::Float(0.5)),
            Ok(Value::Float(f)) if f == 1.5
        ));
        let s = binary(BinaryOp::Multiply, &make_string("ab"), &Value::Int(2)).unwrap();
        assert_eq!(s.as_str(), Some("abab"));
        let e = binary(BinaryOp::Add, &Value::Int(1), &make_string("a")).unwrap_err();
        assert_eq!(
            e.message,
            "unsupported operand type(s) for +: 'int' and 'str'"
        );
    }

    #[test]
    fn comparisons() {
        assert!(compare(CompareOp::Less, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CompareOp::In, &make_string("b"), &make_string("abc")).unwrap());
        let l = make_list(vec![Value::Int(1), Value::Int(2)]);
        assert!(compare(CompareOp::NotIn, &Value::Int(3), &l).unwrap());
        assert!(compare(CompareOp::Less, &make_tuple(vec![Value::Int(1)]), &make_tuple(vec![Value::Int(1), Value::Int(0)])).unwrap());
        assert!(compare(CompareOp::Less, &Value::None, &Value::Int(1)).is_err());
    }

    #[test]
    fn indexing() {
        let l = make_list(vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(load_index(&l, &Value::Int(-1)), Ok(Value::Int(2))));
        let e = load_index(&l, &Value::Int(2)).unwrap_err();
        assert_eq!(e.kind, VmErrorKind::IndexError);
        assert_eq!(e.message, "list index out of range");
        store_index(&l, &Value::Int(0), Value::Int(9)).unwrap();
        assert!(matches!(load_index(&l, &Value::Int(0)), Ok(Value::Int(9))));
    }
}
