#![allow(clippy::upper_case_acronyms)]

//! Parser for control-thread programs.
use crate::ast::{self, BinOp, Expr, Stmt, UnaryOp};
use coramc_utils::{self, CoramResult, Id};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest_consume::{match_nodes, Error, Parser};
use std::fs;
use std::io::Read;
use std::path::Path;

type ParseResult<T> = Result<T, Error<Rule>>;

type Node<'i> = pest_consume::Node<'i, Rule, ()>;

// include the grammar file so that Cargo knows to rebuild this file on grammar changes
const _GRAMMAR: &str = include_str!("syntax.pest");

// Define the precedence of binary operations. We use `lazy_static` so that
// this is only ever constructed once.
lazy_static::lazy_static! {
    static ref PRATT: PrattParser<Rule> =
    PrattParser::new()
        .op(Op::infix(Rule::logor, Assoc::Left))
        .op(Op::infix(Rule::logand, Assoc::Left))
        .op(Op::infix(Rule::bor, Assoc::Left))
        .op(Op::infix(Rule::bxor, Assoc::Left))
        .op(Op::infix(Rule::band, Assoc::Left))
        .op(Op::infix(Rule::eq, Assoc::Left) | Op::infix(Rule::neq, Assoc::Left))
        .op(Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::leq, Assoc::Left)
            | Op::infix(Rule::geq, Assoc::Left))
        .op(Op::infix(Rule::shl, Assoc::Left) | Op::infix(Rule::shr, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left));
}

fn binop_of_rule(rule: Rule) -> BinOp {
    match rule {
        Rule::add => BinOp::Add,
        Rule::sub => BinOp::Sub,
        Rule::mul => BinOp::Mul,
        Rule::div => BinOp::Div,
        Rule::rem => BinOp::Rem,
        Rule::band => BinOp::BitAnd,
        Rule::bor => BinOp::BitOr,
        Rule::bxor => BinOp::BitXor,
        Rule::shl => BinOp::Shl,
        Rule::shr => BinOp::Shr,
        Rule::eq => BinOp::Eq,
        Rule::neq => BinOp::Neq,
        Rule::lt => BinOp::Lt,
        Rule::gt => BinOp::Gt,
        Rule::leq => BinOp::Leq,
        Rule::geq => BinOp::Geq,
        Rule::logand => BinOp::LogAnd,
        Rule::logor => BinOp::LogOr,
        x => unreachable!("Unexpected rule {:?} for binary operator", x),
    }
}

/// An argument in a call position: either positional or `name=value`.
enum Arg {
    Pos(Expr),
    Kw(Id, Expr),
}

#[derive(Parser)]
#[grammar = "syntax.pest"]
pub struct ThreadParser;

impl ThreadParser {
    /// Parse a control-thread program into an AST representation.
    pub fn parse_file(path: &Path) -> CoramResult<ast::Program> {
        let time = std::time::Instant::now();
        let content = fs::read(path).map_err(|err| {
            coramc_utils::Error::invalid_file(format!(
                "Failed to read {}: {err}",
                path.to_string_lossy(),
            ))
        })?;
        let string_content = std::str::from_utf8(&content)?;
        let out = Self::parse_source(string_content).map_err(|e| {
            coramc_utils::Error::parse_error(format!(
                "Failed to parse `{}`: {err}",
                path.to_string_lossy(),
                err = e
            ))
        })?;
        log::info!(
            "Parsed `{}` in {}ms",
            path.to_string_lossy(),
            time.elapsed().as_millis()
        );
        Ok(out)
    }

    pub fn parse<R: Read>(mut r: R) -> CoramResult<ast::Program> {
        let mut buf = String::new();
        r.read_to_string(&mut buf).map_err(|err| {
            coramc_utils::Error::invalid_file(format!(
                "Failed to read buffer: {err}",
            ))
        })?;
        Self::parse_source(&buf).map_err(|e| {
            coramc_utils::Error::parse_error(format!(
                "Failed to parse buffer: {e}"
            ))
        })
    }

    fn parse_source(content: &str) -> ParseResult<ast::Program> {
        let inputs =
            ThreadParser::parse_with_userdata(Rule::program, content, ())?;
        let input = inputs.single()?;
        ThreadParser::program(input)
    }

    #[allow(clippy::result_large_err)]
    fn binary_expr_helper(
        pairs: pest::iterators::Pairs<Rule>,
    ) -> ParseResult<Expr> {
        PRATT
            .map_primary(|primary| match primary.as_rule() {
                Rule::term => {
                    Self::term(Node::new_with_user_data(primary, ()))
                }
                x => unreachable!("Unexpected rule {:?} for binary_expr", x),
            })
            .map_infix(|lhs, op, rhs| {
                Ok(Expr::Binary(
                    binop_of_rule(op.as_rule()),
                    Box::new(lhs?),
                    Box::new(rhs?),
                ))
            })
            .parse(pairs)
    }
}

#[pest_consume::parser]
impl ThreadParser {
    fn EOI(_input: Node) -> ParseResult<()> {
        Ok(())
    }

    // ================ Literals =====================
    fn identifier(input: Node) -> ParseResult<Id> {
        Ok(Id::new(input.as_str()))
    }

    fn num_lit(input: Node) -> ParseResult<i64> {
        let raw = input.as_str().replace('_', "");
        let parsed = if let Some(hex) = raw.strip_prefix("0x") {
            i64::from_str_radix(hex, 16)
        } else if let Some(bin) = raw.strip_prefix("0b") {
            i64::from_str_radix(bin, 2)
        } else {
            raw.parse::<i64>()
        };
        parsed.map_err(|_| input.error("Expected valid 64-bit literal"))
    }

    fn string_lit(input: Node) -> ParseResult<String> {
        let raw = input.as_str();
        Ok(raw[1..raw.len() - 1].to_string())
    }

    // ================ Expressions =====================
    fn kwarg(input: Node) -> ParseResult<(Id, Expr)> {
        Ok(match_nodes!(
            input.into_children();
            [identifier(name), expr(value)] => (name, value),
        ))
    }

    fn arg_list(input: Node) -> ParseResult<Vec<Arg>> {
        input
            .into_children()
            .map(|node| match node.as_rule() {
                Rule::kwarg => {
                    let (name, value) = Self::kwarg(node)?;
                    Ok(Arg::Kw(name, value))
                }
                Rule::expr => Ok(Arg::Pos(Self::expr(node)?)),
                x => unreachable!("Unexpected rule {:?} in arg_list", x),
            })
            .collect()
    }

    fn call(input: Node) -> ParseResult<ast::Call> {
        let (func, raw_args) = match_nodes!(
            input.clone().into_children();
            [identifier(func)] => (func, vec![]),
            [identifier(func), arg_list(args)] => (func, args),
        );
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        for arg in raw_args {
            match arg {
                Arg::Pos(e) => {
                    if !kwargs.is_empty() {
                        return Err(input.error(
                            "positional argument after keyword argument",
                        ));
                    }
                    args.push(e)
                }
                Arg::Kw(name, e) => kwargs.push((name, e)),
            }
        }
        Ok(ast::Call { func, args, kwargs })
    }

    fn method_call(input: Node) -> ParseResult<ast::MethodCall> {
        let (object, method, raw_args) = match_nodes!(
            input.clone().into_children();
            [identifier(object), identifier(method)] => (object, method, vec![]),
            [identifier(object), identifier(method), arg_list(args)] =>
                (object, method, args),
        );
        let mut args = Vec::new();
        for arg in raw_args {
            match arg {
                Arg::Pos(e) => args.push(e),
                Arg::Kw(..) => {
                    return Err(input
                        .error("keyword arguments are not allowed on methods"))
                }
            }
        }
        Ok(ast::MethodCall {
            object,
            method,
            args,
        })
    }

    fn paren_expr(input: Node) -> ParseResult<Expr> {
        Ok(match_nodes!(
            input.into_children();
            [expr(e)] => e,
        ))
    }

    fn neg(_input: Node) -> ParseResult<UnaryOp> {
        Ok(UnaryOp::Neg)
    }
    fn lognot(_input: Node) -> ParseResult<UnaryOp> {
        Ok(UnaryOp::Not)
    }
    fn bitnot(_input: Node) -> ParseResult<UnaryOp> {
        Ok(UnaryOp::BitNot)
    }

    fn unary_expr(input: Node) -> ParseResult<Expr> {
        Ok(match_nodes!(
            input.into_children();
            [neg(op), term(e)] => Expr::Unary(op, Box::new(e)),
            [lognot(op), term(e)] => Expr::Unary(op, Box::new(e)),
            [bitnot(op), term(e)] => Expr::Unary(op, Box::new(e)),
        ))
    }

    fn term(input: Node) -> ParseResult<Expr> {
        Ok(match_nodes!(
            input.into_children();
            [method_call(mc)] => Expr::MethodCall(mc),
            [call(c)] => Expr::Call(c),
            [num_lit(n)] => Expr::Num(n),
            [string_lit(s)] => Expr::Str(s),
            [identifier(name)] => Expr::Var(name),
            [paren_expr(e)] => e,
            [unary_expr(e)] => e,
        ))
    }

    fn binary_expr(input: Node) -> ParseResult<Expr> {
        Self::binary_expr_helper(input.into_pair().into_inner())
    }

    fn expr(input: Node) -> ParseResult<Expr> {
        Ok(match_nodes!(
            input.into_children();
            [binary_expr(e)] => e,
            [binary_expr(cond), expr(then), expr(orelse)] => Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                orelse: Box::new(orelse),
            },
        ))
    }

    // ================ Statements =====================
    fn aug_op(input: Node) -> ParseResult<BinOp> {
        Ok(match input.as_str() {
            "+=" => BinOp::Add,
            "-=" => BinOp::Sub,
            "*=" => BinOp::Mul,
            "/=" => BinOp::Div,
            "%=" => BinOp::Rem,
            "<<=" => BinOp::Shl,
            ">>=" => BinOp::Shr,
            "&=" => BinOp::BitAnd,
            "|=" => BinOp::BitOr,
            "^=" => BinOp::BitXor,
            x => unreachable!("Unexpected augmented assignment `{}`", x),
        })
    }

    fn assign(input: Node) -> ParseResult<Stmt> {
        Ok(match_nodes!(
            input.into_children();
            [identifier(target), expr(value)] => Stmt::Assign { target, value },
        ))
    }

    fn aug_assign(input: Node) -> ParseResult<Stmt> {
        Ok(match_nodes!(
            input.into_children();
            [identifier(target), aug_op(op), expr(value)] =>
                Stmt::AugAssign { target, op, value },
        ))
    }

    fn block(input: Node) -> ParseResult<Vec<Stmt>> {
        input.into_children().map(Self::stmt).collect()
    }

    fn elif_clause(input: Node) -> ParseResult<(Expr, Vec<Stmt>)> {
        Ok(match_nodes!(
            input.into_children();
            [expr(cond), block(body)] => (cond, body),
        ))
    }

    fn else_clause(input: Node) -> ParseResult<Vec<Stmt>> {
        Ok(match_nodes!(
            input.into_children();
            [block(body)] => body,
        ))
    }

    fn if_stmt(input: Node) -> ParseResult<Stmt> {
        let mut cond = None;
        let mut body = None;
        let mut elifs = Vec::new();
        let mut orelse = Vec::new();
        for node in input.into_children() {
            match node.as_rule() {
                Rule::expr => cond = Some(Self::expr(node)?),
                Rule::block => body = Some(Self::block(node)?),
                Rule::elif_clause => elifs.push(Self::elif_clause(node)?),
                Rule::else_clause => orelse = Self::else_clause(node)?,
                x => unreachable!("Unexpected rule {:?} in if_stmt", x),
            }
        }
        // Fold the elif chain into nested `If`s in the else position.
        for (c, b) in elifs.into_iter().rev() {
            orelse = vec![Stmt::If {
                cond: c,
                body: b,
                orelse,
            }];
        }
        Ok(Stmt::If {
            cond: cond.unwrap(),
            body: body.unwrap(),
            orelse,
        })
    }

    fn while_stmt(input: Node) -> ParseResult<Stmt> {
        Ok(match_nodes!(
            input.into_children();
            [expr(cond), block(body)] => Stmt::While { cond, body },
        ))
    }

    fn for_stmt(input: Node) -> ParseResult<Stmt> {
        Ok(match_nodes!(
            input.into_children();
            [identifier(var), expr(iter), block(body)] =>
                Stmt::For { var, iter, body },
        ))
    }

    fn param_list(input: Node) -> ParseResult<Vec<Id>> {
        input.into_children().map(Self::identifier).collect()
    }

    fn def_stmt(input: Node) -> ParseResult<Stmt> {
        Ok(match_nodes!(
            input.into_children();
            [identifier(name), block(body)] => Stmt::Def(ast::FuncDef {
                name,
                params: vec![],
                body,
            }),
            [identifier(name), param_list(params), block(body)] =>
                Stmt::Def(ast::FuncDef { name, params, body }),
        ))
    }

    fn print_stmt(input: Node) -> ParseResult<Stmt> {
        let args = match_nodes!(
            input.clone().into_children();
            [] => vec![],
            [arg_list(args)] => args,
        );
        let mut exprs = Vec::new();
        for arg in args {
            match arg {
                Arg::Pos(e) => exprs.push(e),
                Arg::Kw(..) => {
                    return Err(input
                        .error("keyword arguments are not allowed in print"))
                }
            }
        }
        Ok(Stmt::Print(exprs))
    }

    fn break_stmt(_input: Node) -> ParseResult<Stmt> {
        Ok(Stmt::Break)
    }

    fn continue_stmt(_input: Node) -> ParseResult<Stmt> {
        Ok(Stmt::Continue)
    }

    fn return_stmt(input: Node) -> ParseResult<Stmt> {
        Ok(match_nodes!(
            input.into_children();
            [] => Stmt::Return(None),
            [expr(e)] => Stmt::Return(Some(e)),
        ))
    }

    fn name_list(input: Node) -> ParseResult<Vec<Id>> {
        input.into_children().map(Self::identifier).collect()
    }

    fn global_stmt(input: Node) -> ParseResult<Stmt> {
        Ok(match_nodes!(
            input.into_children();
            [name_list(names)] => Stmt::Global(names),
        ))
    }

    fn nonlocal_stmt(input: Node) -> ParseResult<Stmt> {
        Ok(match_nodes!(
            input.into_children();
            [name_list(names)] => Stmt::Nonlocal(names),
        ))
    }

    fn pass_stmt(_input: Node) -> ParseResult<Stmt> {
        Ok(Stmt::Pass)
    }

    fn expr_stmt(input: Node) -> ParseResult<Stmt> {
        Ok(match_nodes!(
            input.into_children();
            [expr(e)] => Stmt::Expr(e),
        ))
    }

    fn stmt(input: Node) -> ParseResult<Stmt> {
        Ok(match_nodes!(
            input.into_children();
            [if_stmt(s)] => s,
            [while_stmt(s)] => s,
            [for_stmt(s)] => s,
            [def_stmt(s)] => s,
            [print_stmt(s)] => s,
            [break_stmt(s)] => s,
            [continue_stmt(s)] => s,
            [return_stmt(s)] => s,
            [global_stmt(s)] => s,
            [nonlocal_stmt(s)] => s,
            [pass_stmt(s)] => s,
            [aug_assign(s)] => s,
            [assign(s)] => s,
            [expr_stmt(s)] => s,
        ))
    }

    fn program(input: Node) -> ParseResult<ast::Program> {
        Ok(match_nodes!(
            input.into_children();
            [stmt(stmts).., EOI(_)] => ast::Program {
                stmts: stmts.collect(),
            },
        ))
    }
}
