//! Expression trees attached to state bindings, transitions, and guards.

use coramc_frontend::ast::{BinOp, UnaryOp};
use coramc_utils::Id;

/// A hardware-side expression. Unlike the frontend AST, symbols here are
/// already resolved signal names, and calls are gone: everything that
/// needed states was expanded by the compiler before an `Expr` is built.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Str(String),
    /// A signal or register reference.
    Sym(Id),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `cond ? then : orelse`
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    /// A system task or a lowering marker, e.g. `$display(fmt, args...)`.
    SysCall(Id, Vec<Expr>),
}

impl Expr {
    pub fn sym<S: Into<Id>>(name: S) -> Self {
        Expr::Sym(name.into())
    }

    pub fn unary(op: UnaryOp, e: Expr) -> Self {
        Expr::Unary(op, Box::new(e))
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn cond(c: Expr, t: Expr, f: Expr) -> Self {
        Expr::Cond(Box::new(c), Box::new(t), Box::new(f))
    }

    /// `sym == n`, the shape of every handshake condition.
    pub fn sym_eq<S: Into<Id>>(name: S, n: i64) -> Self {
        Expr::binary(BinOp::Eq, Expr::sym(name), Expr::Int(n))
    }

    /// The literal value of this expression, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Constant-fold this expression bottom-up. Sub-trees that reference
    /// signals, or whose folding is not well-defined (division by zero,
    /// out-of-range shifts), are left in place.
    pub fn fold(self) -> Expr {
        match self {
            Expr::Unary(op, e) => {
                let e = e.fold();
                match (op, e.as_int()) {
                    (UnaryOp::Neg, Some(v)) => Expr::Int(v.wrapping_neg()),
                    (UnaryOp::Not, Some(v)) => Expr::Int((v == 0) as i64),
                    (UnaryOp::BitNot, Some(v)) => Expr::Int(!v),
                    _ => Expr::unary(op, e),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = lhs.fold();
                let rhs = rhs.fold();
                match (lhs.as_int(), rhs.as_int()) {
                    (Some(l), Some(r)) => fold_binop(op, l, r)
                        .map(Expr::Int)
                        .unwrap_or_else(|| Expr::binary(op, lhs, rhs)),
                    _ => Expr::binary(op, lhs, rhs),
                }
            }
            Expr::Cond(c, t, f) => {
                let c = c.fold();
                match c.as_int() {
                    Some(0) => f.fold(),
                    Some(_) => t.fold(),
                    None => Expr::cond(c, t.fold(), f.fold()),
                }
            }
            Expr::SysCall(name, args) => {
                Expr::SysCall(name, args.into_iter().map(Expr::fold).collect())
            }
            e => e,
        }
    }
}

fn fold_binop(op: BinOp, l: i64, r: i64) -> Option<i64> {
    let v = match op {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Mul => l.wrapping_mul(r),
        BinOp::Div => l.checked_div(r)?,
        BinOp::Rem => l.checked_rem(r)?,
        BinOp::BitAnd => l & r,
        BinOp::BitOr => l | r,
        BinOp::BitXor => l ^ r,
        BinOp::Shl => l.checked_shl(u32::try_from(r).ok()?)?,
        BinOp::Shr => l.checked_shr(u32::try_from(r).ok()?)?,
        BinOp::Eq => (l == r) as i64,
        BinOp::Neq => (l != r) as i64,
        BinOp::Lt => (l < r) as i64,
        BinOp::Gt => (l > r) as i64,
        BinOp::Leq => (l <= r) as i64,
        BinOp::Geq => (l >= r) as i64,
        BinOp::LogAnd => (l != 0 && r != 0) as i64,
        BinOp::LogOr => (l != 0 || r != 0) as i64,
    };
    Some(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_arithmetic() {
        let e = Expr::binary(
            BinOp::Add,
            Expr::Int(1),
            Expr::binary(BinOp::Mul, Expr::Int(2), Expr::Int(3)),
        );
        assert_eq!(e.fold(), Expr::Int(7));
    }

    #[test]
    fn folds_comparisons_to_bits() {
        let e = Expr::binary(BinOp::Lt, Expr::Int(3), Expr::Int(5));
        assert_eq!(e.fold(), Expr::Int(1));
        let e = Expr::binary(BinOp::Eq, Expr::Int(3), Expr::Int(5));
        assert_eq!(e.fold(), Expr::Int(0));
    }

    #[test]
    fn leaves_symbols_alone() {
        let e = Expr::binary(
            BinOp::Add,
            Expr::sym("x"),
            Expr::binary(BinOp::Sub, Expr::Int(4), Expr::Int(4)),
        );
        assert_eq!(
            e.fold(),
            Expr::binary(BinOp::Add, Expr::sym("x"), Expr::Int(0))
        );
    }

    #[test]
    fn leaves_division_by_zero() {
        let e = Expr::binary(BinOp::Div, Expr::Int(1), Expr::Int(0));
        assert_eq!(
            e.fold(),
            Expr::binary(BinOp::Div, Expr::Int(1), Expr::Int(0))
        );
    }

    #[test]
    fn folds_ternary_on_constant_condition() {
        let e = Expr::cond(Expr::Int(1), Expr::sym("a"), Expr::sym("b"));
        assert_eq!(e.fold(), Expr::sym("a"));
        let e = Expr::cond(Expr::Int(0), Expr::sym("a"), Expr::sym("b"));
        assert_eq!(e.fold(), Expr::sym("b"));
    }
}
