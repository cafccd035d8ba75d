use crate::types::Span;
use serde::{Deserialize, Serialize};

/// Stable identity of an AST node; every side table produced by the
/// semantic passes is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
    pub id: NodeId,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self {
            node,
            span,
            id: NodeId::default(),
        }
    }
}

pub type ExprS = Spanned<Expr>;
pub type StmtS = Spanned<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    Pos,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::FloorDivide => "//",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "**",
            BinaryOp::LShift => "<<",
            BinaryOp::RShift => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Equal => "==",
            CompareOp::NotEqual => "!=",
            CompareOp::Less => "<",
            CompareOp::LessEqual => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterEqual => ">=",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Positional(ExprS),
    Keyword(String, ExprS),
    Star(ExprS),
    DoubleStar(ExprS),
}

impl Arg {
    pub fn value(&self) -> &ExprS {
        match self {
            Arg::Positional(e) | Arg::Keyword(_, e) | Arg::Star(e) | Arg::DoubleStar(e) => e,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Normal,
    VarArgs,
    KwArgs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub annotation: Option<ExprS>,
    pub default: Option<ExprS>,
    pub kind: ParamKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    Unary {
        op: UnaryOp,
        operand: Box<ExprS>,
    },
    Binary {
        op: BinaryOp,
        left: Box<ExprS>,
        right: Box<ExprS>,
    },
    Compare {
        op: CompareOp,
        left: Box<ExprS>,
        right: Box<ExprS>,
    },
    BoolOp {
        op: BoolOp,
        left: Box<ExprS>,
        right: Box<ExprS>,
    },
    IfExp {
        test: Box<ExprS>,
        body: Box<ExprS>,
        orelse: Box<ExprS>,
    },
    Call {
        func: Box<ExprS>,
        args: Vec<Arg>,
    },
    Attribute {
        object: Box<ExprS>,
        attr: String,
    },
    Subscript {
        object: Box<ExprS>,
        index: Box<ExprS>,
    },
    Tuple(Vec<ExprS>),
    List(Vec<ExprS>),
    Dict(Vec<(ExprS, ExprS)>),
    Lambda {
        params: Vec<Param>,
        body: Box<ExprS>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

impl Alias {
    /// The name bound in the importing scope.
    pub fn bound_name(&self) -> &str {
        match &self.asname {
            Some(a) => a,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub exc_type: Option<ExprS>,
    pub name: Option<String>,
    pub body: Vec<StmtS>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Option<ExprS>,
    pub body: Vec<StmtS>,
    pub decorators: Vec<ExprS>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<ExprS>,
    pub body: Vec<StmtS>,
    pub decorators: Vec<ExprS>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(ExprS),
    /// `a = b = value`; targets in source order.
    Assign {
        targets: Vec<ExprS>,
        value: ExprS,
    },
    AnnAssign {
        target: ExprS,
        annotation: ExprS,
        value: Option<ExprS>,
    },
    AugAssign {
        target: ExprS,
        op: BinaryOp,
        value: ExprS,
    },
    Return(Option<ExprS>),
    Pass,
    Break,
    Continue,
    Del(Vec<ExprS>),
    Raise(Option<ExprS>),
    Assert {
        test: ExprS,
        msg: Option<ExprS>,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Import(Vec<Alias>),
    /// `from module import names`; a star import has a single `*` alias.
    ImportFrom {
        module: String,
        names: Vec<Alias>,
    },
    If {
        condition: ExprS,
        then_block: Vec<StmtS>,
        elif_blocks: Vec<(ExprS, Vec<StmtS>)>,
        else_block: Option<Vec<StmtS>>,
    },
    While {
        condition: ExprS,
        body: Vec<StmtS>,
    },
    For {
        target: ExprS,
        iterable: ExprS,
        body: Vec<StmtS>,
    },
    Try {
        body: Vec<StmtS>,
        handlers: Vec<ExceptHandler>,
        finally: Option<Vec<StmtS>>,
    },
    Def(FunctionDef),
    Class(ClassDef),
}

/// Numbers every statement and expression in pre-order, starting at 1.
/// Returns the number of ids handed out.
pub fn assign_node_ids(program: &mut [StmtS]) -> u32 {
    let mut numbering = Numbering { next: 1 };
    for stmt in program.iter_mut() {
        numbering.stmt(stmt);
    }
    numbering.next - 1
}

struct Numbering {
    next: u32,
}

impl Numbering {
    fn fresh(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    fn block(&mut self, block: &mut [StmtS]) {
        for s in block {
            self.stmt(s);
        }
    }

    fn params(&mut self, params: &mut [Param]) {
        for p in params {
            if let Some(a) = &mut p.annotation {
                self.expr(a);
            }
            if let Some(d) = &mut p.default {
                self.expr(d);
            }
        }
    }

    fn stmt(&mut self, stmt: &mut StmtS) {
        stmt.id = self.fresh();
        match &mut stmt.node {
            Stmt::Expr(e) => self.expr(e),
            Stmt::Assign { targets, value } => {
                for t in targets {
                    self.expr(t);
                }
                self.expr(value);
            }
            Stmt::AnnAssign {
                target,
                annotation,
                value,
            } => {
                self.expr(target);
                self.expr(annotation);
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            Stmt::AugAssign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            Stmt::Return(e) | Stmt::Raise(e) => {
                if let Some(e) = e {
                    self.expr(e);
                }
            }
            Stmt::Del(targets) => {
                for t in targets {
                    self.expr(t);
                }
            }
            Stmt::Assert { test, msg } => {
                self.expr(test);
                if let Some(m) = msg {
                    self.expr(m);
                }
            }
            Stmt::Pass
            | Stmt::Break
            | Stmt::Continue
            | Stmt::Global(_)
            | Stmt::Nonlocal(_)
            | Stmt::Import(_)
            | Stmt::ImportFrom { .. } => {}
            Stmt::If {
                condition,
                then_block,
                elif_blocks,
                else_block,
            } => {
                self.expr(condition);
                self.block(then_block);
                for (cond, block) in elif_blocks {
                    self.expr(cond);
                    self.block(block);
                }
                if let Some(block) = else_block {
                    self.block(block);
                }
            }
            Stmt::While { condition, body } => {
                self.expr(condition);
                self.block(body);
            }
            Stmt::For {
                target,
                iterable,
                body,
            } => {
                self.expr(target);
                self.expr(iterable);
                self.block(body);
            }
            Stmt::Try {
                body,
                handlers,
                finally,
            } => {
                self.block(body);
                for h in handlers {
                    if let Some(t) = &mut h.exc_type {
                        self.expr(t);
                    }
                    self.block(&mut h.body);
                }
                if let Some(f) = finally {
                    self.block(f);
                }
            }
            Stmt::Def(def) => {
                for d in &mut def.decorators {
                    self.expr(d);
                }
                self.params(&mut def.params);
                if let Some(r) = &mut def.returns {
                    self.expr(r);
                }
                self.block(&mut def.body);
            }
            Stmt::Class(class) => {
                for d in &mut class.decorators {
                    self.expr(d);
                }
                for b in &mut class.bases {
                    self.expr(b);
                }
                self.block(&mut class.body);
            }
        }
    }

    fn expr(&mut self, expr: &mut ExprS) {
        expr.id = self.fresh();
        match &mut expr.node {
            Expr::Literal(_) | Expr::Name(_) => {}
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::BoolOp { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::IfExp { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            Expr::Call { func, args } => {
                self.expr(func);
                for a in args {
                    match a {
                        Arg::Positional(e) | Arg::Keyword(_, e) | Arg::Star(e) | Arg::DoubleStar(e) => {
                            self.expr(e)
                        }
                    }
                }
            }
            Expr::Attribute { object, .. } => self.expr(object),
            Expr::Subscript { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Tuple(items) | Expr::List(items) => {
                for i in items {
                    self.expr(i);
                }
            }
            Expr::Dict(pairs) => {
                for (k, v) in pairs {
                    self.expr(k);
                    self.expr(v);
                }
            }
            Expr::Lambda { params, body } => {
                self.params(params);
                self.expr(body);
            }
        }
    }
}
