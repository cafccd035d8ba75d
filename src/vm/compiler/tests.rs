use std::rc::Rc;

use super::Compiler;
use crate::parse_source;
use crate::semantic::bind_module;
use crate::semantic::scope::analyze_scopes;
use crate::semantic::symbols::SymbolTable;
use crate::types::{Prim, TypeDescr};
use crate::vm::bytecode::{FunctionCode, FunctionFlags, Instruction as I, Module, PrimConst};

fn compile_static(src: &str) -> Module {
    let program = Rc::new(parse_source(src).unwrap());
    let mut symbols = SymbolTable::new();
    symbols.add_module("m", "m.py", program.clone());
    symbols.declare_module("m").unwrap();
    let scopes = analyze_scopes(&program);
    let types = bind_module(&symbols, "m", &program, &scopes).unwrap();
    Compiler::with_types("m", &scopes, &types)
        .compile(&program)
        .unwrap()
}

fn compile_dynamic(src: &str) -> Module {
    let program = parse_source(src).unwrap();
    let scopes = analyze_scopes(&program);
    Compiler::new("m", &scopes).compile(&program).unwrap()
}

fn function<'m>(module: &'m Module, qualname: &str) -> &'m FunctionCode {
    module
        .functions
        .iter()
        .find(|f| f.qualname == qualname)
        .unwrap_or_else(|| panic!("no function {}", qualname))
}

#[test]
fn module_body_is_function_zero() {
    let m = compile_dynamic("x = 1\n");
    assert_eq!(m.functions[0].qualname, "<module>");
    assert!(m.functions[0].flags.contains(FunctionFlags::MODULE));
    assert!(!m.is_static);
    assert_eq!(m.functions[0].code.last(), Some(&I::Return));
}

#[test]
fn dynamic_functions_have_no_prologue() {
    let m = compile_dynamic("def f(x: str) -> int:\n    return 1\n");
    let f = function(&m, "f");
    assert!(!f.flags.contains(FunctionFlags::STATIC));
    assert!(!f.code.iter().any(|i| matches!(i, I::CheckArgs(_))));
}

#[test]
fn static_functions_start_with_check_args() {
    let m = compile_static("def f(x: str, y) -> int:\n    return 1\n");
    let f = function(&m, "f");
    assert!(f.flags.contains(FunctionFlags::STATIC));
    assert_eq!(f.code[0], I::CheckArgs(vec![(0, TypeDescr::Str)]));
    assert_eq!(f.ret_type, TypeDescr::Int);
}

#[test]
fn primitive_arithmetic_is_specialized() {
    let src = "\
from __static__ import box, int8, uint8

def f() -> int:
    x: uint8 = 42
    y: int8 = 2
    return box(x / y)
";
    let m = compile_static(src);
    let f = function(&m, "f");
    assert!(f.code.contains(&I::LoadPrimConst(Prim::UInt8, PrimConst::Int(42))));
    assert!(f.code.iter().any(|i| matches!(i, I::PrimBinary(_, Prim::Int16))));
    assert!(f.code.iter().any(|i| matches!(i, I::PrimBox(Prim::Int16))));
}

#[test]
fn negative_constants_are_folded() {
    let m = compile_static(
        "from __static__ import int8\n\ndef f() -> None:\n    x: int8 = -128\n",
    );
    let f = function(&m, "f");
    assert!(f.code.contains(&I::LoadPrimConst(Prim::Int8, PrimConst::Int(-128))));
    assert!(!f.code.iter().any(|i| matches!(i, I::PrimUnary(..) | I::Unary(_))));
}

#[test]
fn method_calls_on_static_classes_are_devirtualized() {
    let src = "\
class B:
    def f(self) -> int:
        return 1

def call(b: B) -> int:
    return b.f()
";
    let m = compile_static(src);
    let call = function(&m, "call");
    assert!(call.code.iter().any(|i| matches!(
        i,
        I::InvokeMethod { slot: 0, argc: 0, ret: Some(TypeDescr::Int), .. }
    )));
    let class = &m.classes[0];
    assert_eq!(class.qualname, "m.B");
    assert_eq!(class.vtable, vec!["f".to_string()]);
}

#[test]
fn star_arguments_are_unpacked_per_parameter() {
    let src = "\
def x(a: int, b: int, c: str, d: float, e: float) -> int:
    return 7

def g(p):
    return x(1, 3, *p)
";
    let m = compile_static(src);
    let g = function(&m, "g");
    let loads: Vec<_> = g
        .code
        .iter()
        .filter_map(|i| match i {
            I::LoadIterableArg { index, total } => Some((*index, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(loads, vec![(0, 3), (1, 3), (2, 3)]);
    assert!(g.code.iter().any(|i| matches!(i, I::InvokeFunction { argc: 5, .. })));
}

#[test]
fn dynamic_star_calls_use_call_ex() {
    let m = compile_dynamic("def g(f, p, k):\n    return f(1, *p, **k)\n");
    let g = function(&m, "g");
    assert!(g.code.contains(&I::CallEx));
    assert!(g.code.contains(&I::ListExtend));
    assert!(g.code.contains(&I::DictMerge));
}

#[test]
fn closures_capture_cells() {
    let src = "\
def outer():
    n = 1
    def inner():
        return n
    return inner
";
    let m = compile_dynamic(src);
    let outer = function(&m, "outer");
    assert_eq!(outer.cells, vec!["n".to_string()]);
    assert!(outer.code.contains(&I::LoadClosure(0)));
    let inner = function(&m, "outer.<locals>.inner");
    assert_eq!(inner.freevars, vec!["n".to_string()]);
    assert!(inner.code.contains(&I::LoadDeref(0)));
}

#[test]
fn jumps_land_inside_the_function() {
    let src = "\
def f(n):
    total = 0
    for i in range(n):
        if i == 3:
            continue
        if i > 5:
            break
        total += i
    while total > 100:
        total -= 1
    try:
        total = total // 0
    except ZeroDivisionError as e:
        total = -1
    finally:
        total += 1
    return total
";
    let m = compile_dynamic(src);
    let f = function(&m, "f");
    for (pos, ins) in f.code.iter().enumerate() {
        let rel = match ins {
            I::Jump(r)
            | I::JumpIfFalse(r)
            | I::JumpIfTrue(r)
            | I::JumpIfFalseOrPop(r)
            | I::JumpIfTrueOrPop(r)
            | I::ForIter(r)
            | I::SetupExcept(r) => *r,
            _ => continue,
        };
        let target = pos as i32 + 1 + rel;
        assert!(
            target >= 0 && (target as usize) <= f.code.len(),
            "{} at {} jumps to {}",
            ins,
            pos,
            target
        );
    }
}

#[test]
fn class_bodies_store_attributes() {
    let m = compile_dynamic("class C:\n    x = 1\n    def f(self):\n        return self.x\n");
    let body = &m.functions[0].code;
    assert!(body.contains(&I::BuildClass(0)));
    assert_eq!(m.classes[0].qualname, "m.C");
    assert_eq!(function(&m, "C.f").params, vec!["self".to_string()]);
    assert!(body.iter().filter(|i| matches!(i, I::StoreAttr(_))).count() >= 2);
}

#[test]
fn typed_fields_use_slots() {
    let src = "\
class P:
    x: int
    def __init__(self, x: int) -> None:
        self.x = x

def get(p: P) -> int:
    return p.x
";
    let m = compile_static(src);
    assert_eq!(m.classes[0].fields, vec![("x".to_string(), TypeDescr::Int)]);
    let get = function(&m, "get");
    assert!(get.code.iter().any(|i| matches!(i, I::LoadField { offset: 0, .. })));
    let init = function(&m, "P.__init__");
    assert!(init.code.iter().any(|i| matches!(i, I::StoreField { offset: 0, .. })));
}

#[test]
fn oversized_operands_are_errors() {
    let args = vec!["0"; 300].join(", ");
    let src = format!("def g(*a):\n    pass\n\ng({})\n", args);
    let program = parse_source(&src).unwrap();
    let scopes = analyze_scopes(&program);
    let e = Compiler::new("m", &scopes).compile(&program).unwrap_err();
    assert!(e.message.contains("too many call arguments (300)"), "{}", e.message);
    assert_eq!(Some(e.span.start), src.find("g(0"));

    let m = compile_dynamic(&format!("g({})\n", vec!["0"; 255].join(", ")));
    assert!(m.functions[0].code.contains(&I::Call(255)));
}
