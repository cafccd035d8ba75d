//! Iteration over builtin containers, shared by `GetIter`/`ForIter`, star
//! arguments and the natives that consume iterables.

use super::super::utils::{make_iterator, make_string, make_tuple, type_name};
use super::super::value::{IterState, ObjectData, Value};
use super::super::{VmErrorKind, VmResult, err};

/// `iter(v)`.
pub fn get_iter(v: &Value) -> VmResult<Value> {
    let state = match v {
        Value::Object(obj) => match &obj.data {
            ObjectData::Iterator(_) => return Ok(v.clone()),
            ObjectData::List { .. }
            | ObjectData::Tuple(_)
            | ObjectData::String(_)
            | ObjectData::Array { .. } => IterState::Seq {
                source: v.clone(),
                pos: 0,
            },
            ObjectData::Range { start, stop, step } => IterState::Range {
                next: *start,
                stop: *stop,
                step: *step,
            },
            ObjectData::Dict { map } => IterState::Items {
                items: map.borrow().keys(),
                pos: 0,
            },
            _ => return Err(not_iterable(v)),
        },
        _ => return Err(not_iterable(v)),
    };
    Ok(make_iterator(state))
}

/// Advances an iterator; `None` once it is exhausted.
pub fn next(it: &Value) -> VmResult<Option<Value>> {
    let Some(ObjectData::Iterator(state)) = it.as_object().map(|o| &o.data) else {
        return Err(err(
            VmErrorKind::TypeError,
            format!("'{}' object is not an iterator", type_name(it)),
        ));
    };
    let mut state = state.borrow_mut();
    Ok(match &mut *state {
        IterState::Seq { source, pos } => {
            let item = match source.as_object().map(|o| &o.data) {
                Some(ObjectData::List { items }) => items.borrow().get(*pos).cloned(),
                Some(ObjectData::Array { items, .. }) => items.borrow().get(*pos).cloned(),
                Some(ObjectData::Tuple(items)) => items.get(*pos).cloned(),
                Some(ObjectData::String(s)) => s.chars().nth(*pos).map(|c| make_string(c)),
                _ => None,
            };
            if item.is_some() {
                *pos += 1;
            }
            item
        }
        IterState::Range { next, stop, step } => {
            let more = if *step > 0 { *next < *stop } else { *next > *stop };
            if more {
                let v = *next;
                *next = next.saturating_add(*step);
                Some(Value::Int(v))
            } else {
                None
            }
        }
        IterState::Items { items, pos } => {
            let item = items.get(*pos).cloned();
            if item.is_some() {
                *pos += 1;
            }
            item
        }
    })
}

/// Drains an iterable into a vector.
pub fn collect(v: &Value) -> VmResult<Vec<Value>> {
    if let Some(obj) = v.as_object() {
        match &obj.data {
            ObjectData::List { items } => return Ok(items.borrow().clone()),
            ObjectData::Tuple(items) => return Ok(items.clone()),
            _ => {}
        }
    }
    let it = get_iter(v)?;
    let mut out = Vec::new();
    while let Some(item) = next(&it)? {
        out.push(item);
    }
    Ok(out)
}

/// `(key, value)` tuples of a dictionary, for `dict.items()`.
pub fn pairs(entries: &[(Value, Value)]) -> Vec<Value> {
    entries
        .iter()
        .map(|(k, v)| make_tuple(vec![k.clone(), v.clone()]))
        .collect()
}

fn not_iterable(v: &Value) -> super::super::VmError {
    err(
        VmErrorKind::TypeError,
        format!("'{}' object is not iterable", type_name(v)),
    )
}
