//! Abstract syntax tree for control-thread programs.
//!
//! The tree is deliberately small: the language is restricted to what
//! statically flattens onto a finite state space. Everything here is
//! produced by the [parser](crate::parser) and consumed by the compiler.

use coramc_utils::Id;

/// A whole control-thread program: the statements of the module body.
/// Function definitions may appear anywhere at any nesting level; they
/// are registered before the body is compiled.
#[derive(Debug, Clone)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

/// A function definition. Functions are always inlined at their call
/// sites, so a definition generates no states by itself.
#[derive(Debug, Clone)]
pub struct FuncDef {
    pub name: Id,
    pub params: Vec<Id>,
    pub body: Vec<Stmt>,
}

/// A call to a named function or resource constructor.
#[derive(Debug, Clone)]
pub struct Call {
    pub func: Id,
    pub args: Vec<Expr>,
    pub kwargs: Vec<(Id, Expr)>,
}

/// A method call on a named object, e.g. `mem.read(a, b, s)`.
#[derive(Debug, Clone)]
pub struct MethodCall {
    pub object: Id,
    pub method: Id,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    /// `x = e;`
    Assign { target: Id, value: Expr },
    /// `x op= e;`
    AugAssign { target: Id, op: BinOp, value: Expr },
    /// `if (c) { .. } elif (c2) { .. } else { .. }`. The `elif` chain is
    /// desugared into a nested `If` in the `orelse` position.
    If {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    /// `while (c) { .. }`
    While { cond: Expr, body: Vec<Stmt> },
    /// `for v in <iter> { .. }`. Only `range(..)` iterators are
    /// supported; the compiler rejects anything else.
    For {
        var: Id,
        iter: Expr,
        body: Vec<Stmt>,
    },
    /// `def f(a, b) { .. }`
    Def(FuncDef),
    /// An expression evaluated for its effect, e.g. `mem.wait();`.
    Expr(Expr),
    /// `print(..);`, a simulation-only diagnostic.
    Print(Vec<Expr>),
    Break,
    Continue,
    Return(Option<Expr>),
    /// `global a, b;`
    Global(Vec<Id>),
    /// `nonlocal a, b;`
    Nonlocal(Vec<Id>),
    Pass,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Num(i64),
    Str(String),
    Var(Id),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `c ? t : f`
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call(Call),
    MethodCall(MethodCall),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-e`
    Neg,
    /// `!e`
    Not,
    /// `~e`
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Neq,
    Lt,
    Gt,
    Leq,
    Geq,
    LogAnd,
    LogOr,
}

impl BinOp {
    /// The Verilog spelling of this operator.
    pub fn as_verilog(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Leq => "<=",
            BinOp::Geq => ">=",
            BinOp::LogAnd => "&&",
            BinOp::LogOr => "||",
        }
    }
}
