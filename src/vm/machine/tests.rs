//! VM 테스트 모듈

use super::*;
use crate::parse_source;
use crate::runtime_io::BufferIo;
use crate::semantic::scope::analyze_scopes;
use crate::types::Prim;
use crate::vm::bytecode::{FunctionCode, Instruction as I, PrimConst};
use crate::vm::compiler::Compiler;
use crate::vm::utils::display_value;

fn compile(name: &str, src: &str) -> Module {
    let program = parse_source(src).unwrap();
    let scopes = analyze_scopes(&program);
    Compiler::new(name, &scopes).compile(&program).unwrap()
}

fn run(src: &str) -> (VmResult<Value>, String) {
    let mut vm = Vm::new();
    vm.load(compile("main", src));
    let mut io = BufferIo::new();
    let result = vm.run_with_io("main", &mut io);
    (result, io.take_output())
}

fn output(src: &str) -> String {
    let (result, out) = run(src);
    if let Err(e) = result {
        panic!("unexpected error {}; output so far:\n{}", e, out);
    }
    out
}

fn error(src: &str) -> VmError {
    match run(src).0 {
        Ok(_) => panic!("expected an error"),
        Err(e) => e,
    }
}

/// A module whose body is `code`; function 0 is the body.
fn body_module(code: Vec<I>) -> Module {
    let mut module = Module::new("main");
    module.symbols = vec!["<module>".into(), "f".into()];
    let mut body = FunctionCode::new(0, "<module>");
    body.code = code;
    module.functions.push(body);
    module
}

// ========== 스택 연산 테스트 ==========

#[test]
fn test_stack_push_pop() {
    let mut vm = Vm::new();
    assert!(vm.push(Value::Int(42)).is_ok());
    assert!(matches!(vm.pop().unwrap(), Value::Int(42)));
    let e = vm.pop().unwrap_err();
    assert_eq!(e.kind, VmErrorKind::RuntimeError);
}

#[test]
fn test_stack_limit() {
    let mut vm = Vm::with_limits(2, 10);
    vm.push(Value::Int(1)).unwrap();
    vm.push(Value::Int(2)).unwrap();
    assert_eq!(vm.push(Value::Int(3)).unwrap_err().kind, VmErrorKind::RecursionError);
}

// ========== 프로그램 실행 테스트 ==========

#[test]
fn test_arithmetic_and_print() {
    assert_eq!(output("print(1 + 2 * 3, 7 // 2, 7 % 3, 2 ** 10)\n"), "7 3 1 1024\n");
    assert_eq!(output("print(7 / 2, -7 // 2)\n"), "3.5 -4\n");
}

#[test]
fn test_loops_break_continue() {
    let src = "\
total = 0
for i in range(10):
    if i == 2:
        continue
    if i == 6:
        break
    total += i
n = 0
while True:
    n += 1
    if n > 3:
        break
print(total, n)
";
    assert_eq!(output(src), "13 4\n");
}

#[test]
fn test_functions_defaults_and_keywords() {
    let src = "\
def f(a, b=10, *rest, **kw):
    return a + b + len(rest) + len(kw)
print(f(1), f(1, 2), f(1, 2, 3, 4), f(a=1, b=1, c=5))
";
    assert_eq!(output(src), "11 3 5 3\n");
}

#[test]
fn test_star_call() {
    let src = "\
def f(a, b, c):
    return a * 100 + b * 10 + c
args = [1, 2]
opts = {'c': 3}
print(f(*args, **opts))
";
    assert_eq!(output(src), "123\n");
}

#[test]
fn test_closures_and_nonlocal() {
    let src = "\
def counter():
    n = 0
    def inc():
        nonlocal n
        n += 1
        return n
    return inc
c = counter()
c()
c()
print(c())
";
    assert_eq!(output(src), "3\n");
}

#[test]
fn test_try_except_finally_order() {
    let src = "\
def f():
    try:
        print('body')
        raise ValueError('bad')
    except TypeError:
        print('wrong handler')
    except ValueError as e:
        print('caught', e)
    finally:
        print('finally')
    return 1
print(f())
";
    assert_eq!(output(src), "body\ncaught bad\nfinally\n1\n");
}

#[test]
fn test_finally_runs_on_return_and_reraise() {
    let src = "\
def f():
    try:
        return 'ret'
    finally:
        print('cleanup')
print(f())
def g():
    try:
        try:
            raise KeyError('k')
        finally:
            print('inner')
    except KeyError:
        print('outer')
g()
";
    assert_eq!(output(src), "cleanup\nret\ninner\nouter\n");
}

#[test]
fn test_uncaught_exception_kind() {
    let e = error("x = [1, 2]\nprint(x[5])\n");
    assert_eq!(e.kind, VmErrorKind::IndexError);
    let e = error("def f():\n    y = y + 1\nf()\n");
    assert_eq!(e.kind, VmErrorKind::UnboundLocalError);
    let e = error("print(undefined_name)\n");
    assert_eq!(e.kind, VmErrorKind::NameError);
}

#[test]
fn test_assert() {
    let e = error("assert 1 == 2, 'nope'\n");
    assert_eq!(e.kind, VmErrorKind::AssertionError);
    assert_eq!(e.message, "nope");
}

#[test]
fn test_recursion_limit() {
    let mut vm = Vm::with_limits(10_000, 50);
    vm.load(compile("main", "def f(n):\n    return f(n + 1)\nf(0)\n"));
    let mut io = BufferIo::new();
    let e = vm.run_with_io("main", &mut io).unwrap_err();
    assert_eq!(e.kind, VmErrorKind::RecursionError);
}

// ========== 클래스 / 메서드 디스패치 테스트 ==========

#[test]
fn test_classes_and_inheritance() {
    let src = "\
class A:
    def __init__(self, x):
        self.x = x
    def get(self):
        return self.x
class B(A):
    def get(self):
        return self.x * 2
print(A(3).get(), B(3).get(), isinstance(B(1), A))
";
    assert_eq!(output(src), "3 6 True\n");
}

#[test]
fn test_vtable_cache_follows_class_patching() {
    let src = "\
class A:
    def f(self):
        return 1
a = A()
";
    let mut vm = Vm::new();
    vm.load(compile("main", src));
    let mut io = BufferIo::new();
    vm.run_with_io("main", &mut io).unwrap();
    let a = vm.global("main", "a").unwrap();
    let class = vm.global("main", "A").unwrap();

    let first = vm.resolve_method(&a, "f").unwrap();
    assert!(matches!(first, VtableSlot::Direct(_)));

    // a non-function in the slot forces dynamic lookup
    vm.set_attr(&class, "f", Value::Int(5)).unwrap();
    assert!(matches!(vm.resolve_method(&a, "f").unwrap(), VtableSlot::NeedsDynamic));
}

#[test]
fn test_instance_attribute_shadows_method() {
    let src = "\
class A:
    def f(self):
        return 1
a = A()
a.f = lambda: 2
print(a.f())
";
    assert_eq!(output(src), "2\n");
    let mut vm = Vm::new();
    vm.load(compile("main", src));
    let mut io = BufferIo::new();
    vm.run_with_io("main", &mut io).unwrap();
    let a = vm.global("main", "a").unwrap();
    assert!(matches!(vm.resolve_method(&a, "f").unwrap(), VtableSlot::NeedsDynamic));
}

// ========== 정적 명령어 테스트 ==========

#[test]
fn test_check_args_message() {
    let mut module = body_module(vec![
        I::MakeFunction {
            func_id: 1,
            defaults: 0,
            captures: 0,
        },
        I::ConstI64(1),
        I::Call(1),
        I::Return,
    ]);
    let mut f = FunctionCode::new(1, "f");
    f.arity = 1;
    f.params = vec!["x".into()];
    f.varnames = vec!["x".into()];
    f.num_locals = 1;
    f.code = vec![
        I::CheckArgs(vec![(0, crate::types::TypeDescr::Str)]),
        I::None,
        I::Return,
    ];
    module.functions.push(f);

    let mut vm = Vm::new();
    vm.load(module);
    let e = vm.run("main").unwrap_err();
    assert_eq!(e.kind, VmErrorKind::TypeError);
    assert_eq!(e.message, "f() expected 'str' for argument 'x', got 'int'");
}

#[test]
fn test_boxing_large_uint64_overflows() {
    let module = body_module(vec![
        I::LoadPrimConst(Prim::UInt64, PrimConst::Int(-1)),
        I::PrimBox(Prim::UInt64),
        I::Return,
    ]);
    let mut vm = Vm::new();
    vm.load(module);
    assert_eq!(vm.run("main").unwrap_err().kind, VmErrorKind::OverflowError);
}

#[test]
fn test_prim_arithmetic_wraps() {
    let module = body_module(vec![
        I::LoadPrimConst(Prim::Int8, PrimConst::Int(127)),
        I::LoadPrimConst(Prim::Int8, PrimConst::Int(1)),
        I::PrimBinary(crate::parser::ast::BinaryOp::Add, Prim::Int8),
        I::PrimBox(Prim::Int8),
        I::StoreGlobal(1),
        I::None,
        I::Return,
    ]);
    let mut vm = Vm::new();
    vm.load(module);
    vm.run("main").unwrap();
    let v = vm.global("main", "f").unwrap();
    assert_eq!(display_value(&v), "-128");
}
