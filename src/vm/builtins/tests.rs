//! Builtin 함수들의 유닛 테스트
//!
//! 각 builtin 함수의 성공/실패 케이스를 테스트합니다.

use std::cell::RefCell;

use super::*;
use crate::runtime_io::BufferIo;
use crate::types::{Prim, TypeDescr};
use crate::vm::utils::{display_value, make_list, make_string, make_tuple};

fn int_of(v: &Value) -> i64 {
    match v {
        Value::Int(i) => *i,
        other => panic!("expected int, got {:?}", other),
    }
}

// ========== int() / float() / abs() 테스트 ==========

#[test]
fn test_int_from_bool_and_float() {
    assert_eq!(int_of(&numbers::int(vec![Value::Bool(true)]).unwrap()), 1);
    assert_eq!(int_of(&numbers::int(vec![Value::Float(-2.9)]).unwrap()), -2);
    assert_eq!(int_of(&numbers::int(vec![]).unwrap()), 0);
}

#[test]
fn test_int_from_string() {
    let v = numbers::int(vec![make_string(" -100 ")]).unwrap();
    assert_eq!(int_of(&v), -100);
    let e = numbers::int(vec![make_string("abc")]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::ValueError);
    assert!(e.message.contains("invalid literal for int()"));
}

#[test]
fn test_int_from_infinity_overflows() {
    let e = numbers::int(vec![Value::Float(f64::INFINITY)]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::OverflowError);
}

#[test]
fn test_int_arity() {
    let e = numbers::int(vec![Value::Int(1), Value::Int(2)]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::TypeError);
}

#[test]
fn test_float_from_int() {
    assert!(matches!(
        numbers::float(vec![Value::Int(3)]).unwrap(),
        Value::Float(f) if f == 3.0
    ));
}

#[test]
fn test_abs() {
    assert_eq!(int_of(&numbers::abs(vec![Value::Int(-5)]).unwrap()), 5);
    assert!(matches!(
        numbers::abs(vec![Value::Float(-1.5)]).unwrap(),
        Value::Float(f) if f == 1.5
    ));
    assert!(numbers::abs(vec![make_string("x")]).is_err());
}

// ========== len() / range() 테스트 ==========

#[test]
fn test_len() {
    assert_eq!(int_of(&len::call(vec![make_string("héllo")]).unwrap()), 5);
    let list = make_list(vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(int_of(&len::call(vec![list]).unwrap()), 2);
    let e = len::call(vec![Value::Int(1)]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::TypeError);
}

#[test]
fn test_range_len() {
    let r = range::create_range(vec![Value::Int(0), Value::Int(10), Value::Int(3)]).unwrap();
    assert_eq!(int_of(&len::call(vec![r]).unwrap()), 4);
}

#[test]
fn test_range_zero_step() {
    let e = range::create_range(vec![Value::Int(0), Value::Int(10), Value::Int(0)]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::ValueError);
}

#[test]
fn test_range_iterates() {
    let r = range::create_range(vec![Value::Int(3)]).unwrap();
    let items: Vec<i64> = iter::collect(&r).unwrap().iter().map(int_of).collect();
    assert_eq!(items, vec![0, 1, 2]);
}

// ========== print() 테스트 ==========

#[test]
fn test_print_sep_end() {
    let mut io = BufferIo::new();
    print::call(
        vec![Value::Int(1), make_string("a"), Value::None],
        vec![
            ("sep".to_string(), make_string(", ")),
            ("end".to_string(), make_string("!\n")),
        ],
        &mut io,
    )
    .unwrap();
    assert_eq!(io.take_output(), "1, a, None!\n");
}

#[test]
fn test_print_bad_keyword() {
    let mut io = BufferIo::new();
    let e = print::call(vec![], vec![("file".to_string(), Value::None)], &mut io).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::TypeError);
}

// ========== str / list / dict 메서드 테스트 ==========

#[test]
fn test_str_methods() {
    let v = str_methods::call(Native::Upper, "abc", vec![]).unwrap();
    assert_eq!(v.as_str(), Some("ABC"));
    let parts = str_methods::call(Native::Split, "a,b,c", vec![make_string(",")]).unwrap();
    assert_eq!(display_value(&parts), "['a', 'b', 'c']");
    let joined = str_methods::call(
        Native::Join,
        "-",
        vec![make_list(vec![make_string("x"), make_string("y")])],
    )
    .unwrap();
    assert_eq!(joined.as_str(), Some("x-y"));
}

#[test]
fn test_list_methods() {
    let items = RefCell::new(vec![Value::Int(1)]);
    list_methods::call(Native::Append, &items, vec![Value::Int(2)]).unwrap();
    list_methods::call(
        Native::Extend,
        &items,
        vec![make_tuple(vec![Value::Int(3), Value::Int(4)])],
    )
    .unwrap();
    assert_eq!(items.borrow().len(), 4);
    let popped = list_methods::call(Native::ListPop, &items, vec![]).unwrap();
    assert_eq!(int_of(&popped), 4);
    let e = list_methods::call(Native::Index, &items, vec![Value::Int(9)]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::ValueError);
}

#[test]
fn test_list_pop_empty() {
    let items = RefCell::new(Vec::new());
    let e = list_methods::call(Native::ListPop, &items, vec![]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::IndexError);
}

#[test]
fn test_dict_get_and_pop() {
    let d = dict_methods::dict_new(vec![]).unwrap();
    let map = dict_methods::expect_dict(&d).unwrap();
    let key = make_string("k");
    map.borrow_mut()
        .insert(crate::vm::utils::dict_key(&key).unwrap(), key.clone(), Value::Int(7));
    let got = dict_methods::call(Native::Get, map, vec![key.clone()]).unwrap();
    assert_eq!(int_of(&got), 7);
    let missing =
        dict_methods::call(Native::Get, map, vec![make_string("z"), Value::Int(0)]).unwrap();
    assert_eq!(int_of(&missing), 0);
    let popped = dict_methods::call(Native::DictPop, map, vec![key.clone()]).unwrap();
    assert_eq!(int_of(&popped), 7);
    let e = dict_methods::call(Native::DictPop, map, vec![key]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::KeyError);
}

#[test]
fn test_method_lookup_by_receiver() {
    let s = make_string("x");
    let data = &s.as_object().unwrap().data;
    assert_eq!(method_for(data, "upper"), Some(Native::Upper));
    assert_eq!(method_for(data, "append"), None);
}

// ========== __static__ 테스트 ==========

#[test]
fn test_prim_type_call_checks_range() {
    let v = static_module::call_prim_type(Prim::Int8, vec![Value::Int(127)]).unwrap();
    assert_eq!(int_of(&v), 127);
    let e = static_module::call_prim_type(Prim::Int8, vec![Value::Int(128)]).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::OverflowError);
    let t = static_module::call_prim_type(Prim::Int32, vec![Value::Float(3.9)]).unwrap();
    assert_eq!(int_of(&t), 3);
}

#[test]
fn test_new_array_is_zero_filled() {
    let a = static_module::new_array(Prim::Int16, &Value::Int(3)).unwrap();
    assert_eq!(display_value(&a), "Array[int16]([0, 0, 0])");
    let e = static_module::new_array(Prim::Int16, &Value::Int(-1)).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::ValueError);
}

#[test]
fn test_check_cast() {
    assert!(static_module::check_cast(&TypeDescr::Str, &make_string("s")).is_ok());
    let e = static_module::check_cast(&TypeDescr::Int, &make_string("s")).unwrap_err();
    assert_eq!(e.message, "expected int, got str");
}

#[test]
fn test_box_is_identity_for_dynamic_callers() {
    let v = static_module::identity(Native::Box, vec![Value::Int(5)]).unwrap();
    assert_eq!(int_of(&v), 5);
    assert!(static_module::identity(Native::Unbox, vec![]).is_err());
}

#[test]
fn test_static_exports() {
    let names: Vec<String> = static_module::exports().into_iter().map(|(n, _)| n).collect();
    for expected in ["int8", "uint64", "double", "cbool", "size_t", "cast", "box", "Array"] {
        assert!(names.iter().any(|n| n == expected), "missing {}", expected);
    }
}
