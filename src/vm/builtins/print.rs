use super::super::utils::display_value;
use super::super::value::Value;
use super::super::{VmErrorKind, VmResult, err};
use crate::runtime_io::RuntimeIo;

/// print(*args, sep=' ', end='\n')
pub fn call<IO: RuntimeIo>(
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    io: &mut IO,
) -> VmResult<Value> {
    let mut sep = " ".to_string();
    let mut end = "\n".to_string();
    for (name, value) in kwargs {
        let slot = match name.as_str() {
            "sep" => &mut sep,
            "end" => &mut end,
            _ => {
                return Err(err(
                    VmErrorKind::TypeError,
                    format!("'{}' is an invalid keyword argument for print()", name),
                ));
            }
        };
        match value {
            Value::None => {}
            other => match other.as_str() {
                Some(s) => *slot = s.to_string(),
                None => {
                    return Err(err(
                        VmErrorKind::TypeError,
                        format!("{} must be None or a string", name),
                    ));
                }
            },
        }
    }

    let parts: Vec<String> = args.iter().map(display_value).collect();
    let line = parts.join(&sep);
    match end.strip_suffix('\n') {
        Some(rest) => {
            io.write(&line);
            io.write_line(rest);
        }
        None => {
            io.write(&line);
            io.write(&end);
        }
    }
    Ok(Value::None)
}
