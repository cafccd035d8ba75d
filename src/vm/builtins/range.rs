use super::super::utils::{make_range, type_name};
use super::super::value::Value;
use super::super::{VmErrorKind, VmResult, err};
use super::expect_args;

/// range(stop)
/// range(start, stop)
/// range(start, stop, step)
pub fn create_range(args: Vec<Value>) -> VmResult<Value> {
    expect_args("range", &args, 1, 3)?;
    let (start, stop, step) = match args.as_slice() {
        [stop] => (0, extract_int(stop)?, 1),
        [start, stop] => (extract_int(start)?, extract_int(stop)?, 1),
        [start, stop, step] => {
            let step = extract_int(step)?;
            if step == 0 {
                return Err(err(
                    VmErrorKind::ValueError,
                    "range() arg 3 must not be zero".into(),
                ));
            }
            (extract_int(start)?, extract_int(stop)?, step)
        }
        _ => return Err(err(VmErrorKind::TypeError, "range expected at most 3 arguments".into())),
    };
    Ok(make_range(start, stop, step))
}

fn extract_int(v: &Value) -> VmResult<i64> {
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
