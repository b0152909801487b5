//! Verilog backend for compiled control threads.
//!
//! Emits one module per thread: a port group for every declared
//! resource, a register per thread variable, and two clocked processes
//! over the same state register. The first process walks the state
//! graph, the second applies the bindings of the active state.

use std::io;
use std::time::Instant;

use coramc_frontend::ast::UnaryOp;
use coramc_ir::{Binding, Expr, Fsm, Resource, ResourceKind, ThreadContext, Transition};
use coramc_utils::{clog2, CoramResult, Error, Id, OutputFile};
use itertools::Itertools;
use linked_hash_map::LinkedHashMap;

use crate::lower::lower;
use crate::traits::Backend;

/// Width of every thread variable register, in bits.
pub const SIGNAL_WIDTH: u64 = 64;
/// Width of external bus addresses, in bits.
pub const EXT_ADDR_WIDTH: u64 = 64;

/// Port groups are emitted kind by kind, in this order.
const KIND_ORDER: [ResourceKind; 7] = [
    ResourceKind::Memory,
    ResourceKind::InStream,
    ResourceKind::OutStream,
    ResourceKind::Channel,
    ResourceKind::Register,
    ResourceKind::IoChannel,
    ResourceKind::IoRegister,
];

#[derive(Default)]
pub struct VerilogBackend;

impl Backend for VerilogBackend {
    fn name(&self) -> &'static str {
        "verilog"
    }

    /// Every state below the terminal one must have an explicit way out;
    /// a missing transition is an unpatched jump and would hang the
    /// machine.
    fn validate(ctx: &ThreadContext) -> CoramResult<()> {
        let last = ctx.fsm.current();
        for id in 0..last {
            let transition = ctx.fsm.state(id).and_then(|st| st.transition.as_ref());
            let targets: &[u64] = match transition {
                None => {
                    return Err(Error::misc(format!(
                        "state {id} of thread `{}` has no transition out of it",
                        ctx.name
                    )));
                }
                Some(Transition::Unconditional(dst)) => &[*dst],
                Some(Transition::Conditional { t, f, .. }) => &[*t, *f],
            };
            for dst in targets {
                if *dst > last {
                    return Err(Error::misc(format!(
                        "state {id} of thread `{}` jumps to nonexistent state {dst}",
                        ctx.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn emit(ctx: &ThreadContext, file: &mut OutputFile) -> CoramResult<()> {
        let out = &mut file.get_write();
        let time = Instant::now();
        emit_thread(ctx, out).map_err(|_| {
            Error::write_error(format!("unable to write to {}", file.as_path_string()))
        })?;
        log::info!("Generated `{}` in {:?}", ctx.name, time.elapsed());
        Ok(())
    }
}

fn emit_thread<F: io::Write>(ctx: &ThreadContext, f: &mut F) -> io::Result<()> {
    let fsm = lower(ctx);
    let consts = ctx.scope.constants();

    writeln!(f, "module {}(", ctx.name)?;
    write!(f, "  input CLK,\n  input RST,\n  output reg finish")?;
    for kind in KIND_ORDER {
        for res in ctx.registry.of_kind(kind) {
            for port in port_decls(res) {
                write!(f, ",\n  {port}")?;
            }
        }
    }
    writeln!(f, "\n);")?;
    writeln!(f)?;

    emit_variables(ctx, &consts, f)?;
    writeln!(f, "  reg [{}:0] state;", clog2(ctx.fsm.current()))?;
    writeln!(f)?;

    emit_transitions(&fsm, f)?;
    writeln!(f)?;
    emit_bindings(&fsm, &consts, f)?;

    writeln!(f)?;
    writeln!(f, "endmodule")?;
    Ok(())
}

/// The wires of one resource, in declaration order within its group.
fn port_decls(res: &Resource) -> Vec<String> {
    let addr_msb = EXT_ADDR_WIDTH - 1;
    let data_msb = res.datawidth - 1;
    match res.kind {
        ResourceKind::Memory => vec![
            format!("output reg [{addr_msb}:0] {}", res.signal("ext_addr")),
            format!("output reg [{addr_msb}:0] {}", res.signal("core_addr")),
            format!("output reg {}", res.signal("read_enable")),
            format!("output reg {}", res.signal("write_enable")),
            // one extra bit so a full-capacity request is expressible
            format!(
                "output reg [{EXT_ADDR_WIDTH}:0] {}",
                res.signal("word_size")
            ),
            format!("input {}", res.signal("ready")),
            format!("input {}", res.signal("busy")),
        ],
        ResourceKind::InStream => vec![
            format!("output reg [{addr_msb}:0] {}", res.signal("ext_addr")),
            format!("output reg {}", res.signal("write_enable")),
            format!(
                "output reg [{EXT_ADDR_WIDTH}:0] {}",
                res.signal("word_size")
            ),
            format!("input {}", res.signal("ready")),
            format!("input {}", res.signal("busy")),
        ],
        ResourceKind::OutStream => vec![
            format!("output reg [{addr_msb}:0] {}", res.signal("ext_addr")),
            format!("output reg {}", res.signal("read_enable")),
            format!(
                "output reg [{EXT_ADDR_WIDTH}:0] {}",
                res.signal("word_size")
            ),
            format!("input {}", res.signal("ready")),
            format!("input {}", res.signal("busy")),
        ],
        ResourceKind::Channel | ResourceKind::IoChannel => vec![
            format!("input [{data_msb}:0] {}", res.signal("q")),
            format!("output reg {}", res.signal("deq")),
            format!("input {}", res.signal("empty")),
            format!("output reg [{data_msb}:0] {}", res.signal("d")),
            format!("output reg {}", res.signal("enq")),
            format!("input {}", res.signal("almost_full")),
        ],
        ResourceKind::Register | ResourceKind::IoRegister => vec![
            format!("input [{data_msb}:0] {}", res.signal("q")),
            format!("output reg {}", res.signal("we")),
            format!("output reg [{data_msb}:0] {}", res.signal("d")),
        ],
    }
}

/// Thread variables, in declaration order. A variable written exactly
/// once with a literal surfaces as a parameter; the rest are registers.
/// Resource handles bind no storage at all.
fn emit_variables<F: io::Write>(
    ctx: &ThreadContext,
    consts: &LinkedHashMap<Id, i64>,
    f: &mut F,
) -> io::Result<()> {
    for var in ctx.scope.variables() {
        if ctx.registry.is_resource_var(*var) {
            continue;
        }
        match consts.get(var) {
            Some(value) => writeln!(f, "  parameter {var} = {value};")?,
            None => writeln!(f, "  reg [{}:0] {var};", SIGNAL_WIDTH - 1)?,
        }
    }
    Ok(())
}

fn emit_transitions<F: io::Write>(fsm: &Fsm, f: &mut F) -> io::Result<()> {
    writeln!(f, "  always @(posedge CLK) begin")?;
    writeln!(f, "    if(RST == 1) begin")?;
    writeln!(f, "      state <= 0;")?;
    writeln!(f, "    end else begin")?;
    writeln!(f, "      case(state)")?;
    for (id, st) in fsm.states() {
        let Some(transition) = &st.transition else {
            continue;
        };
        writeln!(f, "        {id}: begin")?;
        match transition {
            Transition::Unconditional(dst) => {
                writeln!(f, "          state <= {dst};")?;
            }
            Transition::Conditional { cond, t, f: orelse } => {
                writeln!(f, "          if({}) begin", expr_str(cond))?;
                writeln!(f, "            state <= {t};")?;
                writeln!(f, "          end else begin")?;
                writeln!(f, "            state <= {orelse};")?;
                writeln!(f, "          end")?;
            }
        }
        writeln!(f, "        end")?;
    }
    writeln!(f, "      endcase")?;
    writeln!(f, "    end")?;
    writeln!(f, "  end")?;
    Ok(())
}

fn emit_bindings<F: io::Write>(
    fsm: &Fsm,
    consts: &LinkedHashMap<Id, i64>,
    f: &mut F,
) -> io::Result<()> {
    writeln!(f, "  always @(posedge CLK) begin")?;
    writeln!(f, "    case(state)")?;
    for (id, st) in fsm.states() {
        let stmts: Vec<String> = st
            .bindings
            .iter()
            .filter_map(|b| bind_stmt(b, consts))
            .collect();
        if stmts.is_empty() {
            continue;
        }
        writeln!(f, "      {id}: begin")?;
        for stmt in &stmts {
            writeln!(f, "        {stmt}")?;
        }
        writeln!(f, "      end")?;
    }
    writeln!(f, "    endcase")?;
    writeln!(f, "  end")?;
    Ok(())
}

/// One binding as a Verilog statement, or `None` for bindings with no
/// textual form: writes to parameters and the raw handshake markers.
fn bind_stmt(bind: &Binding, consts: &LinkedHashMap<Id, i64>) -> Option<String> {
    let body = match &bind.dst {
        Some(dst) => {
            if consts.contains_key(dst) {
                return None;
            }
            format!("{dst} <= {};", expr_str(&bind.value))
        }
        None => {
            if let Expr::SysCall(name, _) = &bind.value {
                if name.as_str().starts_with("coram_") {
                    return None;
                }
            }
            format!("{};", expr_str(&bind.value))
        }
    };
    Some(match &bind.guard {
        Some(guard) => format!("if({}) {body}", expr_str(guard)),
        None => body,
    })
}

fn expr_str(expr: &Expr) -> String {
    match expr {
        Expr::Int(v) => v.to_string(),
        Expr::Str(s) => format!("\"{s}\""),
        Expr::Sym(id) => id.to_string(),
        Expr::Unary(op, e) => format!("{}{}", unary_str(*op), atom_str(e)),
        Expr::Binary(op, lhs, rhs) => {
            format!("({} {} {})", expr_str(lhs), op.as_verilog(), expr_str(rhs))
        }
        Expr::Cond(c, t, e) => {
            format!("({} ? {} : {})", expr_str(c), expr_str(t), expr_str(e))
        }
        Expr::SysCall(name, args) if args.is_empty() => format!("${name}"),
        Expr::SysCall(name, args) => {
            format!("${name}({})", args.iter().map(expr_str).join(", "))
        }
    }
}

/// Operands of a unary operator get parenthesized unless atomic.
fn atom_str(expr: &Expr) -> String {
    match expr {
        Expr::Sym(_) => expr_str(expr),
        Expr::Int(v) if *v >= 0 => expr_str(expr),
        _ => format!("({})", expr_str(expr)),
    }
}

fn unary_str(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "-",
        UnaryOp::Not => "!",
        UnaryOp::BitNot => "~",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coramc_frontend::ast::BinOp;
    use coramc_frontend::ThreadParser;
    use coramc_ir::compile;

    fn emit_src(src: &str) -> String {
        let program = ThreadParser::parse(src.as_bytes()).unwrap();
        let ctx = compile(&program, "test_thread").unwrap();
        VerilogBackend::validate(&ctx).unwrap();
        let mut out = Vec::new();
        emit_thread(&ctx, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn emits_the_module_skeleton() {
        let code = emit_src("a = 0; a = a + 1;");
        assert!(code.starts_with("module test_thread(\n"));
        assert!(code.contains("  output reg finish"));
        assert!(code.contains("  reg [63:0] a;"));
        assert!(code.contains("endmodule"));
    }

    #[test]
    fn constants_become_parameters() {
        let code = emit_src("w = 64; a = w; a = a + 1;");
        assert!(code.contains("  parameter w = 64;"));
        // no register update targets a parameter
        assert!(!code.contains("w <= "));
    }

    #[test]
    fn memory_ports_carry_the_bus_widths() {
        let code = emit_src("mem = memory(0, 32, 1024);\nmem.read(0, 0, 4);");
        assert!(code.contains("output reg [63:0] memory_0_ext_addr"));
        assert!(code.contains("output reg [63:0] memory_0_core_addr"));
        assert!(code.contains("output reg [64:0] memory_0_word_size"));
        assert!(code.contains("input memory_0_ready"));
        assert!(code.contains("input memory_0_busy"));
    }

    #[test]
    fn channel_data_ports_use_the_declared_width() {
        let code = emit_src("ch = channel(0, 16);\nch.write(1);");
        assert!(code.contains("input [15:0] channel_0_q"));
        assert!(code.contains("output reg [15:0] channel_0_d"));
    }

    #[test]
    fn guarded_bindings_emit_as_conditionals() {
        let code = emit_src("mem = memory(0);\nmem.read(0, 0, 4);");
        assert!(code.contains(
            "if((memory_0_ready == 1)) memory_0_read_enable <= 1;"
        ));
    }

    #[test]
    fn markers_never_reach_the_output() {
        let code = emit_src("mem = memory(0);\nmem.read(0, 0, 4);");
        assert!(!code.contains("coram_memory_read"));
        assert!(code.contains("$display"));
        assert!(code.contains("$stime"));
    }

    #[test]
    fn state_register_is_wide_enough() {
        let code = emit_src("for i in range(100) { a = i; }");
        // init, check, body, update and exit fit in three bits, with
        // headroom left for the finish tail
        assert!(code.contains("  reg [2:0] state;"));
    }

    #[test]
    fn validate_rejects_an_unpatched_jump() {
        let mut fsm = Fsm::new();
        fsm.bind(0, Some("a".into()), Expr::Int(1), None);
        fsm.set_transition(0, 1);
        fsm.advance();
        fsm.advance();
        let ctx = ThreadContext {
            name: "broken".to_string(),
            fsm,
            registry: Default::default(),
            scope: Default::default(),
        };
        assert!(VerilogBackend::validate(&ctx).is_err());
    }

    #[test]
    fn expressions_render_with_explicit_grouping() {
        let e = Expr::binary(
            BinOp::Add,
            Expr::sym("a"),
            Expr::binary(BinOp::Mul, Expr::sym("b"), Expr::Int(2)),
        );
        assert_eq!(expr_str(&e), "(a + (b * 2))");
        let e = Expr::unary(UnaryOp::Not, Expr::sym_eq("x", 0));
        assert_eq!(expr_str(&e), "!((x == 0))");
    }
}
