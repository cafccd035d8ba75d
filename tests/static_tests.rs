//! Static compilation scenarios, run end to end through the VM.

use proptest::prelude::*;
use pystatic::config::CompilerConfig;
use pystatic::runtime_io::BufferIo;
use pystatic::vm::{Instruction, Vm, VmError, VmErrorKind};
use pystatic::{CompileError, CompileSession, StaticErrorKind};

fn session(src: &str) -> CompileSession {
    let mut s = CompileSession::new(CompilerConfig::default());
    s.add_source("main", "main.py", src.to_string())
        .unwrap_or_else(|e| panic!("syntax error: {}", e));
    s
}

fn compile_error(src: &str) -> CompileError {
    match session(src).compile("main") {
        Ok(_) => panic!("expected a compile error"),
        Err(e) => e,
    }
}

fn static_message(src: &str) -> String {
    match compile_error(src) {
        CompileError::Static(e) => e.message,
        other => panic!("expected a static error, got {}", other),
    }
}

/// Compiles statically and runs, returning the outcome and printed output.
fn run(src: &str) -> (Result<(), VmError>, String) {
    let module = session(src)
        .compile("main")
        .unwrap_or_else(|e| panic!("compile error: {}", e));
    assert!(module.is_static);
    let mut vm = Vm::new();
    vm.load(module);
    let mut io = BufferIo::new();
    let result = vm.run_with_io("main", &mut io).map(|_| ());
    (result, io.take_output())
}

fn output(src: &str) -> String {
    let (result, out) = run(src);
    if let Err(e) = result {
        panic!("runtime error {}\noutput so far:\n{}", e, out);
    }
    out
}

fn runtime_error(src: &str) -> (VmError, String) {
    let (result, out) = run(src);
    match result {
        Ok(()) => panic!("expected a runtime error, output:\n{}", out),
        Err(e) => (e, out),
    }
}

#[test]
fn scenario_a_constant_out_of_range() {
    let src = "\
from __static__ import int8

def f(x: int8) -> None:
    x: int8 = 128
";
    let e = compile_error(src);
    let CompileError::Static(ref inner) = e else {
        panic!("expected a static error, got {}", e);
    };
    assert_eq!(inner.kind, StaticErrorKind::Type);
    assert!(inner.message.contains("-128 to 127"), "{}", inner.message);
}

#[test]
fn unsigned_bounds() {
    let accepted = "from __static__ import uint8\n\ndef f() -> None:\n    x: uint8 = 255\n";
    assert!(session(accepted).compile("main").is_ok());
    for bad in ["256", "-1"] {
        let src = format!(
            "from __static__ import uint8\n\ndef f() -> None:\n    x: uint8 = {}\n",
            bad
        );
        assert!(static_message(&src).contains("0 to 255"));
    }
}

#[test]
fn scenario_b_return_type_checked_at_runtime() {
    let src = "\
class B:
    def f(self) -> B:
        return self

class D(B):
    def f(self):
        return 42

def call(b: B) -> B:
    return b.f()

print('ok', isinstance(call(B()), B))
call(D())
";
    let (e, out) = runtime_error(src);
    assert_eq!(out, "ok True\n");
    assert_eq!(e.kind, VmErrorKind::TypeError);
    assert_eq!(e.message, "unexpected return type from D.f, expected B, got int");
}

#[test]
fn scenario_c_mixed_signedness_division() {
    let src = "\
from __static__ import int8, uint8

def t():
    x: uint8 = 42
    y: int8 = 2
    return x / y

print(t())
";
    assert_eq!(output(src), "21\n");
}

#[test]
fn sixty_four_bit_mixed_signedness_does_not_compile() {
    let src = "\
from __static__ import int64, uint64

def t():
    x: uint64 = 1
    y: int64 = 2
    return x + y
";
    let msg = static_message(src);
    assert!(msg.contains("uint64") && msg.contains("int64"), "{}", msg);
}

#[test]
fn scenario_d_star_argument_unpacking() {
    let src = "\
def x(a: int, b: int, c: str, d: float, e: float) -> int:
    return 7

def t(p):
    return x(1, 3, *p)

print(t(('hi', 0.1, 0.2)))
t(('hi', 0.1))
";
    let module = session(src).compile("main").unwrap();
    let t = module.functions.iter().find(|f| f.qualname == "t").unwrap();
    assert!(
        t.code
            .iter()
            .any(|i| matches!(i, Instruction::LoadIterableArg { index: 2, total: 3 }))
    );

    let (e, out) = runtime_error(src);
    assert_eq!(out, "7\n");
    assert_eq!(e.kind, VmErrorKind::IndexError);
}

#[test]
fn short_literal_star_tuple_raises_index_error() {
    let src = "\
def x(a: int, b: int, c: str, d: float, e: float) -> int:
    return 7

def t():
    p = ('hi', 0.1)
    return x(1, 3, *p)

t()
";
    let (e, out) = runtime_error(src);
    assert_eq!(out, "");
    assert_eq!(e.kind, VmErrorKind::IndexError);
}

#[test]
fn dynamic_argument_is_reported_by_the_prologue() {
    let src = "\
def f(x: str) -> int:
    return len(x)

def g(v):
    return f(v)

print(g('abc'))
g(5)
";
    let (e, out) = runtime_error(src);
    assert_eq!(out, "3\n");
    assert_eq!(e.kind, VmErrorKind::TypeError);
    assert_eq!(e.message, "f() expected 'str' for argument 'x', got 'int'");
}

#[test]
fn vtable_follows_monkeypatching() {
    let src = "\
class B:
    def f(self) -> int:
        return 1

class D(B):
    def f(self) -> int:
        return 2

def call(b: B) -> int:
    return b.f()

def g(self):
    return 3

print(call(B()), call(D()))
D.f = g
print(call(D()))
del D.f
print(call(D()))
d = D()
d.f = lambda: 4
print(call(d))
del B.f
call(D())
";
    let (e, out) = runtime_error(src);
    assert_eq!(out, "1 2\n3\n1\n4\n");
    assert_eq!(e.kind, VmErrorKind::AttributeError);
}

#[test]
fn return_check_names_the_call_target_after_patching() {
    let src = "\
class B:
    def f(self) -> int:
        return 1

class D(B):
    pass

def call(b: B) -> int:
    return b.f()

def g(self):
    return 'text'

print(call(D()))
D.f = g
call(D())
";
    let (e, out) = runtime_error(src);
    assert_eq!(out, "1\n");
    assert_eq!(e.kind, VmErrorKind::TypeError);
    assert_eq!(e.message, "unexpected return type from D.f, expected int, got str");
}

#[test]
fn prologue_is_stable_across_many_calls() {
    let src = "\
def f(x: str) -> int:
    return len(x)

def probe(v):
    try:
        f(v)
        return None
    except TypeError as e:
        return e

good = 0
bad = 0
last = None
for i in range(100):
    if probe('abc') is None:
        good += 1
    err = probe(i)
    if err is not None:
        bad += 1
        last = err
print(good, bad)
print(last)
";
    assert_eq!(
        output(src),
        "100 100\nf() expected 'str' for argument 'x', got 'int'\n"
    );
}

#[test]
fn optional_field_null_check() {
    let src = "\
from typing import Optional

class Node:
    def __init__(self, value: int) -> None:
        self.value: int = value
        self.next: Optional[Node] = None

def second(n: Node) -> int:
    return n.next.value

a = Node(1)
a.next = Node(2)
print(second(a))
second(Node(3))
";
    let (e, out) = runtime_error(src);
    assert_eq!(out, "2\n");
    assert_eq!(e.kind, VmErrorKind::AttributeError);
    assert!(e.message.contains("'value'"), "{}", e.message);
}

#[test]
fn cast_is_checked_at_runtime() {
    let src = "\
from __static__ import cast

def as_str(x) -> str:
    return cast(str, x)

print(as_str('fine'))
as_str(5)
";
    let (e, out) = runtime_error(src);
    assert_eq!(out, "fine\n");
    assert_eq!(e.kind, VmErrorKind::TypeError);
}

#[test]
fn boxing_large_uint64_overflows() {
    let src = "\
from __static__ import box, uint64

def big():
    x: uint64 = 9223372036854775807
    x = x + x
    return box(x)

big()
";
    let (e, _) = runtime_error(src);
    assert_eq!(e.kind, VmErrorKind::OverflowError);
}

#[test]
fn primitive_arrays() {
    let src = "\
from __static__ import Array, int64, box

def squares(n: int) -> int:
    a = Array[int64](n)
    for i in range(n):
        a[i] = int64(i * i)
    total: int64 = 0
    for i in range(n):
        total += a[i]
    return box(total)

print(squares(5))
";
    assert_eq!(output(src), "30\n");
}

#[test]
fn decorated_functions_stay_dynamic() {
    let src = "\
def twice(fn):
    return lambda x: fn(fn(x))

@twice
def inc(x: int) -> int:
    return x + 1

print(inc(1))
";
    assert_eq!(output(src), "3\n");
}

#[test]
fn static_and_dynamic_modules_interoperate() {
    let mut s = CompileSession::new(CompilerConfig {
        dynamic_modules: vec!["helpers".into()],
    });
    s.add_source(
        "helpers",
        "helpers.py",
        "def label(x):\n    return 'n=' + repr(x)\n".into(),
    )
    .unwrap();
    s.add_source(
        "main",
        "main.py",
        "from __static__ import int32, box\nfrom helpers import label\n\ndef f() -> str:\n    n: int32 = 41\n    return label(box(n + 1))\n\nprint(f())\n"
            .into(),
    )
    .unwrap();
    let modules = s.compile_all(false).unwrap();
    assert!(!modules[0].is_static);
    assert!(modules[1].is_static);

    let mut vm = Vm::new();
    for m in modules {
        vm.load(m);
    }
    let mut io = BufferIo::new();
    vm.run_with_io("main", &mut io).unwrap();
    assert_eq!(io.take_output(), "n=42\n");
}

proptest! {
    #[test]
    fn int8_constants_accepted_exactly_in_range(c in -300i64..300) {
        let src = format!(
            "from __static__ import int8\n\ndef f() -> None:\n    x: int8 = {}\n",
            c
        );
        let compiled = session(&src).compile("main");
        prop_assert_eq!(compiled.is_ok(), (-128..=127).contains(&c));
    }

    #[test]
    fn uint16_constants_accepted_exactly_in_range(c in -1000i64..70000) {
        let src = format!(
            "from __static__ import uint16\n\ndef f() -> None:\n    x: uint16 = {}\n",
            c
        );
        let compiled = session(&src).compile("main");
        prop_assert_eq!(compiled.is_ok(), (0..=65535).contains(&c));
    }
}
