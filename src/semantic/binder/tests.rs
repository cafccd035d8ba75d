use std::rc::Rc;

use super::bind_module;
use crate::parse_source;
use crate::parser::ast::{Arg, Expr, ExprS, Stmt, StmtS};
use crate::semantic::lattice::{Type, builtin};
use crate::semantic::scope::analyze_scopes;
use crate::semantic::symbols::{ConstValue, SymbolTable};
use crate::semantic::type_map::{ArgSource, CallTarget, Coercion, SpecialCall, TypeMap};
use crate::semantic::{StaticError, StaticErrorKind};
use crate::types::{Prim, TypeDescr};

struct Bound {
    program: Rc<Vec<StmtS>>,
    symbols: SymbolTable,
    map: TypeMap,
}

fn bind(src: &str) -> Result<Bound, StaticError> {
    let program = Rc::new(parse_source(src).unwrap());
    let mut symbols = SymbolTable::new();
    symbols.add_module("m", "m.py", program.clone());
    symbols.declare_module("m")?;
    let scopes = analyze_scopes(&program);
    let map = bind_module(&symbols, "m", &program, &scopes)?;
    Ok(Bound {
        program,
        symbols,
        map,
    })
}

fn bind_err(src: &str) -> String {
    match bind(src) {
        Ok(_) => panic!("expected a static error"),
        Err(e) => e.message,
    }
}

fn walk_expr<'a>(e: &'a ExprS, out: &mut Vec<&'a ExprS>) {
    out.push(e);
    match &e.node {
        Expr::Literal(_) | Expr::Name(_) => {}
        Expr::Unary { operand, .. } => walk_expr(operand, out),
        Expr::Binary { left, right, .. }
        | Expr::Compare { left, right, .. }
        | Expr::BoolOp { left, right, .. } => {
            walk_expr(left, out);
            walk_expr(right, out);
        }
        Expr::IfExp { test, body, orelse } => {
            walk_expr(test, out);
            walk_expr(body, out);
            walk_expr(orelse, out);
        }
        Expr::Call { func, args } => {
            walk_expr(func, out);
            for a in args {
                walk_expr(a.value(), out);
            }
        }
        Expr::Attribute { object, .. } => walk_expr(object, out),
        Expr::Subscript { object, index } => {
            walk_expr(object, out);
            walk_expr(index, out);
        }
        Expr::Tuple(items) | Expr::List(items) => items.iter().for_each(|i| walk_expr(i, out)),
        Expr::Dict(pairs) => {
            for (k, v) in pairs {
                walk_expr(k, out);
                walk_expr(v, out);
            }
        }
        Expr::Lambda { body, .. } => walk_expr(body, out),
    }
}

fn walk_block<'a>(block: &'a [StmtS], out: &mut Vec<&'a ExprS>) {
    for s in block {
        match &s.node {
            Stmt::Expr(e) | Stmt::Return(Some(e)) => walk_expr(e, out),
            Stmt::Assign { targets, value } => {
                targets.iter().for_each(|t| walk_expr(t, out));
                walk_expr(value, out);
            }
            Stmt::AnnAssign { target, value, .. } => {
                walk_expr(target, out);
                if let Some(v) = value {
                    walk_expr(v, out);
                }
            }
            Stmt::AugAssign { target, value, .. } => {
                walk_expr(target, out);
                walk_expr(value, out);
            }
            Stmt::If {
                condition,
                then_block,
                elif_blocks,
                else_block,
            } => {
                walk_expr(condition, out);
                walk_block(then_block, out);
                for (c, b) in elif_blocks {
                    walk_expr(c, out);
                    walk_block(b, out);
                }
                if let Some(b) = else_block {
                    walk_block(b, out);
                }
            }
            Stmt::While { condition, body } => {
                walk_expr(condition, out);
                walk_block(body, out);
            }
            Stmt::For {
                target,
                iterable,
                body,
            } => {
                walk_expr(target, out);
                walk_expr(iterable, out);
                walk_block(body, out);
            }
            Stmt::Def(def) => walk_block(&def.body, out),
            Stmt::Class(class) => walk_block(&class.body, out),
            _ => {}
        }
    }
}

impl Bound {
    fn exprs(&self) -> Vec<&ExprS> {
        let mut out = Vec::new();
        walk_block(&self.program, &mut out);
        out
    }

    /// The first call whose callee is `name` or `<expr>.name`.
    fn call(&self, name: &str) -> &ExprS {
        self.exprs()
            .into_iter()
            .find(|e| match &e.node {
                Expr::Call { func, .. } => match &func.node {
                    Expr::Name(n) => n == name,
                    Expr::Attribute { attr, .. } => attr == name,
                    _ => false,
                },
                _ => false,
            })
            .unwrap_or_else(|| panic!("no call to {}", name))
    }

    fn last_name(&self, name: &str) -> &ExprS {
        self.exprs()
            .into_iter()
            .filter(|e| matches!(&e.node, Expr::Name(n) if n == name))
            .last()
            .unwrap_or_else(|| panic!("no use of {}", name))
    }

    fn first(&self, pred: impl Fn(&Expr) -> bool) -> &ExprS {
        self.exprs()
            .into_iter()
            .find(|e| pred(&e.node))
            .expect("no matching expression")
    }
}

#[test]
fn constant_out_of_range() {
    let msg = bind_err(
        "from __static__ import int8
def f():
    x: int8 = 128
",
    );
    assert!(msg.contains("-128 to 127"), "{}", msg);

    let msg = bind_err(
        "from __static__ import uint8
def f():
    x: uint8 = -1
",
    );
    assert!(msg.contains("0 to 255"), "{}", msg);
}

#[test]
fn mixed_signedness_promotes() {
    let b = bind(
        "from __static__ import int8, uint8
def t():
    x: uint8 = 42
    y: int8 = 2
    return x / y
",
    )
    .unwrap();
    let div = b.first(|e| matches!(e, Expr::Binary { .. }));
    assert_eq!(b.map.prim_op(div.id), Some(Prim::Int16));
    assert_eq!(b.map.expr_type(div.id), Some(&Type::Prim(Prim::Int16)));
    let Expr::Binary { left, right, .. } = &div.node else {
        unreachable!()
    };
    assert_eq!(
        b.map.coercion(left.id),
        Some(&Coercion::Convert {
            from: Prim::UInt8,
            to: Prim::Int16
        })
    );
    assert_eq!(
        b.map.coercion(right.id),
        Some(&Coercion::Convert {
            from: Prim::Int8,
            to: Prim::Int16
        })
    );
    // the result leaves through an unannotated return
    assert_eq!(b.map.coercion(div.id), Some(&Coercion::Box(Prim::Int16)));
}

#[test]
fn sixty_four_bit_mixed_signedness_rejected() {
    let msg = bind_err(
        "from __static__ import int64, uint64
def t():
    x: uint64 = 1
    y: int64 = 2
    return x + y
",
    );
    assert!(msg.contains("uint64") && msg.contains("int64"), "{}", msg);
}

#[test]
fn boxed_and_primitive_do_not_mix() {
    let msg = bind_err(
        "from __static__ import int64
def t(a: int):
    x: int64 = 1
    return x + a
",
    );
    assert!(msg.contains("cannot apply '+'"), "{}", msg);
}

#[test]
fn optional_primitive_is_rejected() {
    let msg = bind_err(
        "from __static__ import int8
from typing import Optional
def f():
    x: Optional[int8] = None
",
    );
    assert!(msg.contains("Optional"), "{}", msg);
}

#[test]
fn primitive_scope_bans() {
    let msg = bind_err(
        "from __static__ import int64
x: int64 = 1
",
    );
    assert!(msg.contains("at module level"), "{}", msg);

    let msg = bind_err(
        "from __static__ import int64
def f():
    x: int64 = 1
    def g():
        return x
    return g
",
    );
    assert!(msg.contains("captured by a closure"), "{}", msg);
}

#[test]
fn redefinition_with_other_type() {
    let msg = bind_err(
        "def f():
    x: int = 1
    x: str = 'a'
",
    );
    assert!(msg.contains("cannot redefine local variable x"), "{}", msg);
}

#[test]
fn chained_assignment_checks_each_target() {
    let b = bind(
        "from __static__ import int8, int16
def f():
    x: int16
    y: int8
    x = y = 42
",
    )
    .unwrap();
    let Stmt::Def(def) = &b.program[1].node else {
        unreachable!()
    };
    let Stmt::Assign { targets, .. } = &def.body[2].node else {
        unreachable!()
    };
    assert_eq!(
        b.map.target_coercion(targets[0].id),
        Some(&Coercion::Convert {
            from: Prim::Int8,
            to: Prim::Int16
        })
    );
    assert_eq!(b.map.target_coercion(targets[1].id), None);

    let msg = bind_err(
        "from __static__ import int8, int16
def f():
    x: int16
    y: int8
    x = y = 42
    y = 128
",
    );
    assert!(msg.contains("constant 128"), "{}", msg);
}

#[test]
fn narrowing_unwraps_optional() {
    let b = bind(
        "from typing import Optional
class C:
    def f(self) -> int:
        return 1
def g(c: Optional[C]) -> int:
    if c is not None:
        return c.f()
    return 0
",
    )
    .unwrap();
    let call = b.call("f");
    let plan = b.map.call(call.id).expect("planned");
    assert!(matches!(&plan.target, CallTarget::Method { name, .. } if name == "f"));
    let Expr::Call { func, .. } = &call.node else {
        unreachable!()
    };
    assert!(!b.map.needs_null_check(func.id));
}

#[test]
fn optional_receiver_gets_null_check() {
    let b = bind(
        "from typing import Optional
class C:
    def f(self) -> int:
        return 1
def g(c: Optional[C]) -> int:
    return c.f()
",
    )
    .unwrap();
    let call = b.call("f");
    let Expr::Call { func, .. } = &call.node else {
        unreachable!()
    };
    assert!(b.map.needs_null_check(func.id));
}

#[test]
fn reassignment_widens_narrowed_name() {
    let b = bind(
        "from typing import Optional
class C:
    pass
def make() -> Optional[C]:
    return None
def g(x: Optional[C]):
    if x is not None:
        x = make()
    return x
",
    )
    .unwrap();
    let c = match b.symbols.lookup("m", "C") {
        Type::Class(c) => c,
        other => panic!("{:?}", other),
    };
    let x = b.last_name("x");
    assert_eq!(
        b.map.expr_type(x.id),
        Some(&Type::Optional(Box::new(Type::Instance(c))))
    );
}

#[test]
fn isinstance_narrows_dynamic() {
    let b = bind(
        "class C:
    def f(self) -> int:
        return 1
def g(x):
    if isinstance(x, C):
        return x.f()
    return 0
",
    )
    .unwrap();
    let isinstance = b.call("isinstance");
    assert_eq!(
        b.map.expr_type(isinstance.id),
        Some(&Type::Instance(builtin::BOOL))
    );
    assert!(b.map.call(b.call("f").id).is_some());
}

#[test]
fn cast_box_and_unbox() {
    let msg = bind_err(
        "from __static__ import cast
def f(x):
    return cast(int)
",
    );
    assert!(msg.contains("exactly two arguments"), "{}", msg);

    let msg = bind_err(
        "from __static__ import cast
def f(x):
    return cast(Missing, x)
",
    );
    assert!(msg.contains("cast to unknown type"), "{}", msg);

    let msg = bind_err(
        "from __static__ import box
def f():
    return box(1)
",
    );
    assert!(msg.contains("box() requires a primitive"), "{}", msg);

    let msg = bind_err(
        "from __static__ import unbox
def f(x):
    y = unbox(x)
",
    );
    assert!(msg.contains("primitive destination"), "{}", msg);

    let b = bind(
        "from __static__ import unbox, int64, cast
def f(x) -> None:
    y: int64 = unbox(x)
    s = cast(str, x)
",
    )
    .unwrap();
    assert_eq!(
        b.map.special(b.call("unbox").id),
        Some(&SpecialCall::Unbox(Prim::Int64))
    );
    let cast = b.call("cast");
    assert_eq!(b.map.special(cast.id), Some(&SpecialCall::Cast(TypeDescr::Str)));
    assert_eq!(b.map.expr_type(cast.id), Some(&Type::Instance(builtin::STR)));
}

#[test]
fn argument_errors_name_the_parameter() {
    let msg = bind_err(
        "def f(x: str) -> None:
    pass
def g():
    f(1)
",
    );
    assert_eq!(
        msg,
        "type mismatch: int received for positional arg 'x', expected str"
    );

    let msg = bind_err(
        "def f(x: str) -> None:
    pass
def g():
    f(y='a')
",
    );
    assert!(msg.contains("unexpected keyword argument 'y'"), "{}", msg);

    let msg = bind_err(
        "def f(x: str) -> None:
    pass
def g():
    f()
",
    );
    assert!(msg.contains("missing required argument 'x'"), "{}", msg);
}

#[test]
fn star_argument_plans_per_element_loads() {
    let b = bind(
        "def x(a: int, b: int, c: str, d: float, e: float) -> int:
    return 7
def t():
    p = ('hi', 0.1, 0.2)
    return x(1, 3, *p)
",
    )
    .unwrap();
    let plan = b.map.call(b.call("x").id).expect("planned");
    assert_eq!(plan.args[0].source, ArgSource::Positional(0));
    assert_eq!(plan.args[1].source, ArgSource::Positional(1));
    for (i, a) in plan.args[2..].iter().enumerate() {
        assert_eq!(
            a.source,
            ArgSource::IterableElem {
                arg: 2,
                index: i,
                total: 3
            }
        );
    }
    assert_eq!(plan.ret_check, Some(TypeDescr::Int));
}

#[test]
fn two_star_sources_fall_back() {
    let b = bind(
        "def x(a: int, b: int) -> int:
    return 7
def t(p, q):
    return x(*p, *q)
",
    )
    .unwrap();
    assert!(b.map.call(b.call("x").id).is_none());
}

#[test]
fn short_star_tuple_still_plans_every_element() {
    let b = bind(
        "def x(a: int, b: int, c: str, d: float, e: float) -> int:
    return 7
def t():
    p = ('hi', 0.1)
    return x(1, 3, *p)
",
    )
    .unwrap();
    let plan = b.map.call(b.call("x").id).expect("planned");
    assert_eq!(
        plan.args[4].source,
        ArgSource::IterableElem {
            arg: 2,
            index: 2,
            total: 3
        }
    );
}

#[test]
fn long_star_tuple_falls_back() {
    let b = bind(
        "def x(a: int, b: int) -> int:
    return 7
def t():
    p = (1, 2, 3)
    return x(*p)
",
    )
    .unwrap();
    assert!(b.map.call(b.call("x").id).is_none());
}

#[test]
fn dynamic_arguments_are_left_to_the_prologue() {
    let b = bind(
        "def f(x: str) -> int:
    return 1
def g(v):
    return f(v)
",
    )
    .unwrap();
    let plan = b.map.call(b.call("f").id).expect("planned");
    assert_eq!(plan.args[0].source, ArgSource::Positional(0));
    assert!(b.map.coercion(b.last_name("v").id).is_none());
}

#[test]
fn mapping_argument_plan() {
    let b = bind(
        "def f(a: int, b: str = 'x') -> int:
    return a
def g(m):
    return f(**m)
",
    )
    .unwrap();
    let plan = b.map.call(b.call("f").id).expect("planned");
    assert_eq!(plan.mapping_names, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
        plan.args[1].source,
        ArgSource::Mapping {
            arg: 0,
            name: "b".to_string(),
            default: Some(ConstValue::Str("x".to_string())),
        }
    );
}

#[test]
fn keyword_arguments_plan_in_parameter_order() {
    let b = bind(
        "def f(a: int, b: str) -> int:
    return a
def g():
    return f(b='s', a=1)
",
    )
    .unwrap();
    let call = b.call("f");
    let plan = b.map.call(call.id).expect("planned");
    assert_eq!(plan.args[0].source, ArgSource::Keyword(1));
    assert_eq!(plan.args[1].source, ArgSource::Keyword(0));
    assert!(!plan.is_direct());
    let Expr::Call { args, .. } = &call.node else {
        unreachable!()
    };
    assert!(matches!(&args[0], Arg::Keyword(n, _) if n == "b"));
}

#[test]
fn possibly_unbound_local() {
    let msg = bind_err(
        "def f(c):
    if c:
        x = 1
    return x
",
    );
    assert!(msg.contains("referenced before assignment"), "{}", msg);
}

#[test]
fn primitive_return_on_every_path() {
    let msg = bind_err(
        "from __static__ import int32
def f(c) -> int32:
    if c:
        return 1
",
    );
    assert!(msg.contains("must return a value of type int32"), "{}", msg);

    assert!(
        bind(
            "from __static__ import int32
def f(c) -> int32:
    while True:
        if c:
            return 1
",
        )
        .is_ok()
    );
}

#[test]
fn field_access_is_devirtualized() {
    let b = bind(
        "from __static__ import int32
class P:
    def __init__(self, x: int32) -> None:
        self.x: int32 = x
    def get(self) -> int32:
        return self.x
",
    )
    .unwrap();
    let field = b
        .exprs()
        .into_iter()
        .filter(|e| matches!(&e.node, Expr::Attribute { attr, .. } if attr == "x"))
        .filter_map(|e| b.map.field(e.id))
        .next()
        .expect("field reference");
    assert_eq!(field.offset, 0);
    assert_eq!(field.prim, Some(Prim::Int32));
}

#[test]
fn undefined_name() {
    let err = bind("def f():\n    return z\n").err().unwrap();
    assert_eq!(err.kind, StaticErrorKind::Type);
    assert_eq!(err.message, "name 'z' is not defined");
    assert_eq!(err.module, "m");
}

#[test]
fn function_signatures_recorded() {
    let b = bind(
        "from __static__ import int64
def f(x: str, n: int64, y) -> int:
    t: int64 = n + 1
    return len(x)
",
    )
    .unwrap();
    let Stmt::Def(_) = &b.program[1].node else {
        unreachable!()
    };
    let sig = b.map.function(b.program[1].id).expect("signature");
    assert_eq!(sig.qualname, "f");
    assert_eq!(
        sig.checks,
        vec![(0, TypeDescr::Str), (1, TypeDescr::Prim(Prim::Int64))]
    );
    assert_eq!(
        sig.prim_locals,
        vec![("n".to_string(), Prim::Int64), ("t".to_string(), Prim::Int64)]
    );
    assert_eq!(sig.ret, TypeDescr::Int);
}
