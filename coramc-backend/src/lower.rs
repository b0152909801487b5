//! Finishing passes that run between compilation and emission.
//!
//! Three passes, applied in order:
//! 1. idle values: state 0 parks `finish` and every request strobe low,
//! 2. trace expansion: each handshake marker becomes the `$display`
//!    statements that narrate the transaction in simulation,
//! 3. finish tail: two states that announce completion and raise
//!    `finish` forever.

use coramc_frontend::ast::BinOp;
use coramc_ir::{
    Binding, Expr, Fsm, Resource, ResourceKind, ResourceRegistry, StateId, ThreadContext,
};

/// Apply the finishing passes and return the final state graph.
pub fn lower(ctx: &ThreadContext) -> Fsm {
    let mut fsm = ctx.fsm.clone();
    insert_idle(&mut fsm, &ctx.registry);
    expand_markers(&mut fsm, ctx);
    insert_finish(&mut fsm, &ctx.name);
    fsm
}

/// Reset-like values bound in state 0: `finish` low and every request
/// strobe of every port group deasserted.
fn insert_idle(fsm: &mut Fsm, registry: &ResourceRegistry) {
    fsm.bind(0, Some("finish".into()), Expr::Int(0), None);
    for res in registry.iter() {
        match res.kind {
            ResourceKind::Memory => {
                fsm.bind(0, Some(res.signal("read_enable")), Expr::Int(0), None);
                fsm.bind(0, Some(res.signal("write_enable")), Expr::Int(0), None);
            }
            ResourceKind::InStream => {
                fsm.bind(0, Some(res.signal("write_enable")), Expr::Int(0), None);
            }
            ResourceKind::OutStream => {
                fsm.bind(0, Some(res.signal("read_enable")), Expr::Int(0), None);
            }
            ResourceKind::Channel | ResourceKind::IoChannel => {
                fsm.bind(0, Some(res.signal("enq")), Expr::Int(0), None);
                fsm.bind(0, Some(res.signal("deq")), Expr::Int(0), None);
            }
            ResourceKind::Register | ResourceKind::IoRegister => {
                fsm.bind(0, Some(res.signal("we")), Expr::Int(0), None);
            }
        }
    }
}

/// Replace the effect of every handshake marker with guarded `$display`
/// bindings. The markers themselves stay in the graph; emission drops
/// them.
fn expand_markers(fsm: &mut Fsm, ctx: &ThreadContext) {
    let mut traces: Vec<(StateId, Expr, Option<Expr>)> = Vec::new();
    for (state, st) in fsm.states() {
        for bind in &st.bindings {
            let (name, args) = match bind {
                Binding {
                    dst: None,
                    value: Expr::SysCall(name, args),
                    ..
                } => (name, args),
                _ => continue,
            };
            let Some(rest) = name.as_str().strip_prefix("coram_") else {
                continue;
            };
            let Some(Expr::Sym(prefix)) = args.first() else {
                continue;
            };
            let Some(res) = ctx.registry.by_prefix(*prefix) else {
                continue;
            };
            let method = rest
                .strip_prefix(res.kind.as_str())
                .and_then(|m| m.strip_prefix('_'))
                .unwrap_or(rest);
            traces.extend(marker_traces(&ctx.name, res, method, args, state));
        }
    }
    for (state, value, guard) in traces {
        fsm.bind(state, None, value, guard);
    }
}

fn marker_traces(
    thread: &str,
    res: &Resource,
    method: &str,
    args: &[Expr],
    state: StateId,
) -> Vec<(StateId, Expr, Option<Expr>)> {
    let kind = res.kind.as_str();
    let label = if res.scattergather {
        format!("{}(SG)", res.prefix())
    } else {
        res.prefix().to_string()
    };
    let ready = Expr::sym_eq(res.signal("ready"), 1);
    let idle = Expr::sym_eq(res.signal("busy"), 0);
    let mut out = Vec::new();

    match (res.kind, method) {
        (ResourceKind::Memory, "read" | "write" | "read_nonblocking" | "write_nonblocking") => {
            let core = args[1].clone();
            let ext = args[2].clone();
            let size = args[3].clone();
            let arrow = if method.starts_with("read") {
                "B[%d]->D[%d]"
            } else {
                "B[%d]<-D[%d]"
            };
            let verb = match method {
                "read" => "read issue",
                "write" => "write issue",
                "read_nonblocking" => "read nonblk",
                _ => "write nonblk",
            };
            out.push((
                state,
                display(
                    format!("[CoRAM] time:%d thread:{thread} {kind}:{label} {verb} size:%d {arrow}"),
                    vec![size.clone(), core.clone(), ext.clone()],
                ),
                Some(ready.clone()),
            ));
            if !method.ends_with("nonblocking") {
                // the blocking tail sits two states after the issue
                out.push((
                    state + 2,
                    display(
                        format!(
                            "[CoRAM] time:%d thread:{thread} {kind}:{label} {method} done size:%d {arrow}",
                        ),
                        vec![size.clone(), core.clone(), ext],
                    ),
                    Some(idle),
                ));
            }

            let capacity = res.capacity() as i64;
            out.push((
                state,
                display(
                    format!(
                        "[CoRAM] time:%d thread:{thread} {kind}:{label} too large request size:%d > capacity:%d",
                    ),
                    vec![size.clone(), Expr::Int(capacity)],
                ),
                Some(Expr::binary(
                    BinOp::LogAnd,
                    ready.clone(),
                    Expr::binary(BinOp::Gt, size.clone(), Expr::Int(capacity)),
                )),
            ));

            // scatter/gather requests address whole ranks, so the local
            // address and span scale by the bank count
            let length = res.length.unwrap_or(1) as i64;
            let phy_core = if res.scattergather {
                Expr::binary(BinOp::Mul, core.clone(), Expr::Int(length))
            } else {
                core.clone()
            };
            let span = if res.scattergather {
                Expr::binary(BinOp::Div, size.clone(), Expr::Int(length))
            } else {
                size.clone()
            };
            let last = Expr::binary(
                BinOp::Sub,
                Expr::binary(BinOp::Add, core.clone(), span),
                Expr::Int(1),
            );
            out.push((
                state,
                display(
                    format!(
                        "[CoRAM] time:%d thread:{thread} {kind}:{label} illegal local address capacity:%d B[%d:%d]",
                    ),
                    vec![Expr::Int(capacity), core, last],
                ),
                Some(Expr::binary(
                    BinOp::LogAnd,
                    ready,
                    Expr::binary(
                        BinOp::Gt,
                        Expr::binary(BinOp::Add, phy_core, size),
                        Expr::Int(capacity),
                    ),
                )),
            ));
        }
        (
            ResourceKind::InStream | ResourceKind::OutStream,
            "read" | "write" | "read_nonblocking" | "write_nonblocking",
        ) => {
            let ext = args[1].clone();
            let size = args[2].clone();
            let arrow = if res.kind == ResourceKind::InStream {
                "<-D[%d]"
            } else {
                "->D[%d]"
            };
            let verb = match method {
                "read" => "read issue",
                "write" => "write issue",
                "read_nonblocking" => "read nonblk",
                _ => "write nonblk",
            };
            out.push((
                state,
                display(
                    format!("[CoRAM] time:%d thread:{thread} {kind}:{label} {verb} size:%d {arrow}"),
                    vec![size.clone(), ext.clone()],
                ),
                Some(ready),
            ));
            if !method.ends_with("nonblocking") {
                out.push((
                    state + 2,
                    display(
                        format!(
                            "[CoRAM] time:%d thread:{thread} {kind}:{label} {method} done size:%d {arrow}",
                        ),
                        vec![size, ext],
                    ),
                    Some(idle),
                ));
            }
        }
        (k, "wait") if k.is_bus() => {
            out.push((
                state,
                display(
                    format!("[CoRAM] time:%d thread:{thread} {kind}:{label} wait"),
                    vec![],
                ),
                Some(idle),
            ));
        }
        (k, "test") if k.is_bus() => {
            out.push((
                state,
                display(
                    format!("[CoRAM] time:%d thread:{thread} {kind}:{label} test"),
                    vec![],
                ),
                None,
            ));
        }
        (k, "read") if k.is_queue() => {
            // the dequeued word is visible one state after the marker
            out.push((
                state + 1,
                display(
                    format!("[CoRAM] time:%d thread:{thread} {kind}:{label} read data:%d"),
                    vec![Expr::Sym(res.signal("q"))],
                ),
                None,
            ));
        }
        (k, "write") if k.is_queue() => {
            out.push((
                state,
                display(
                    format!("[CoRAM] time:%d thread:{thread} {kind}:{label} write data:%d"),
                    vec![args[1].clone()],
                ),
                Some(Expr::sym_eq(res.signal("almost_full"), 0)),
            ));
        }
        (k, "read") if k.is_reg() => {
            out.push((
                state,
                display(
                    format!("[CoRAM] time:%d thread:{thread} {kind}:{label} read data:%d"),
                    vec![Expr::Sym(res.signal("q"))],
                ),
                None,
            ));
        }
        (k, "write") if k.is_reg() => {
            out.push((
                state,
                display(
                    format!("[CoRAM] time:%d thread:{thread} {kind}:{label} write data:%d"),
                    vec![args[1].clone()],
                ),
                Some(Expr::sym_eq(res.signal("we"), 1)),
            ));
        }
        _ => {}
    }
    out
}

/// Append the two-state completion tail. The final state is terminal:
/// no transition leaves it.
fn insert_finish(fsm: &mut Fsm, thread: &str) {
    let here = fsm.current();
    fsm.set_transition(here, here + 1);
    fsm.advance();

    let announce = fsm.current();
    fsm.bind(
        announce,
        None,
        display(format!("[CoRAM] time:%d thread:{thread} finished"), vec![]),
        None,
    );
    fsm.bind(announce, Some("finish".into()), Expr::Int(1), None);
    fsm.set_transition(announce, announce + 1);
    fsm.advance();
}

/// A `$display` with the simulation timestamp spliced in after the
/// format string.
fn display(format: String, args: Vec<Expr>) -> Expr {
    let mut call = Vec::with_capacity(args.len() + 2);
    call.push(Expr::Str(format));
    call.push(Expr::SysCall("stime".into(), Vec::new()));
    call.extend(args);
    Expr::SysCall("display".into(), call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coramc_frontend::ThreadParser;
    use coramc_ir::Transition;

    fn lower_src(src: &str) -> (ThreadContext, Fsm) {
        let program = ThreadParser::parse(src.as_bytes()).unwrap();
        let ctx = coramc_ir::compile(&program, "t").unwrap();
        let fsm = lower(&ctx);
        (ctx, fsm)
    }

    fn displays_at(fsm: &Fsm, state: StateId) -> Vec<String> {
        fsm.state(state)
            .map(|st| {
                st.bindings
                    .iter()
                    .filter_map(|b| match (&b.dst, &b.value) {
                        (None, Expr::SysCall(name, args)) if *name == "display" => {
                            match &args[0] {
                                Expr::Str(s) => Some(s.clone()),
                                _ => None,
                            }
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn state_zero_parks_the_strobes() {
        let (_, fsm) = lower_src(
            "mem = memory(0);\n\
             ch = channel(1);\n\
             r = register(2);\n\
             mem.read(0, 0, 4);",
        );
        let zero = fsm.state(0).unwrap();
        let parked: Vec<_> = zero
            .bindings
            .iter()
            .filter(|b| b.value == Expr::Int(0))
            .filter_map(|b| b.dst)
            .collect();
        assert!(parked.contains(&"finish".into()));
        assert!(parked.contains(&"memory_0_read_enable".into()));
        assert!(parked.contains(&"memory_0_write_enable".into()));
        assert!(parked.contains(&"channel_1_enq".into()));
        assert!(parked.contains(&"channel_1_deq".into()));
        assert!(parked.contains(&"register_2_we".into()));
    }

    #[test]
    fn memory_read_markers_expand_to_four_traces() {
        let (_, fsm) = lower_src(
            "mem = memory(0, 32, 1024);\n\
             mem.read(0, 0, 16);",
        );
        let issue = displays_at(&fsm, 0);
        assert!(issue.iter().any(|s| s.contains("read issue")));
        assert!(issue.iter().any(|s| s.contains("too large request")));
        assert!(issue.iter().any(|s| s.contains("illegal local address")));
        let done = displays_at(&fsm, 2);
        assert!(done.iter().any(|s| s.contains("read done")));
    }

    #[test]
    fn oversize_trace_is_guarded_on_ready_and_capacity() {
        let (_, fsm) = lower_src(
            "mem = memory(0, 32, 64, 2);\n\
             mem.read(0, 0, 256);",
        );
        let oversize = fsm
            .state(0)
            .unwrap()
            .bindings
            .iter()
            .find(|b| match &b.value {
                Expr::SysCall(name, args) if *name == "display" => {
                    matches!(&args[0], Expr::Str(s) if s.contains("too large request"))
                }
                _ => false,
            })
            .unwrap()
            .clone();
        // capacity is size * bank count
        assert_eq!(
            oversize.guard,
            Some(Expr::binary(
                BinOp::LogAnd,
                Expr::sym_eq("memory_0_ready", 1),
                Expr::binary(BinOp::Gt, Expr::Int(256), Expr::Int(128)),
            ))
        );
    }

    #[test]
    fn nonblocking_reads_have_no_done_trace() {
        let (_, fsm) = lower_src(
            "mem = memory(0);\n\
             mem.read_nonblocking(0, 0, 4);\n\
             a = 1;",
        );
        assert!(displays_at(&fsm, 0).iter().any(|s| s.contains("read nonblk")));
        assert!(!displays_at(&fsm, 2).iter().any(|s| s.contains("done")));
    }

    #[test]
    fn queue_reads_trace_the_sampled_word() {
        let (_, fsm) = lower_src(
            "ch = iochannel(0);\n\
             v = ch.read();",
        );
        let traces = displays_at(&fsm, 1);
        assert!(traces.iter().any(|s| s.contains("iochannel:iochannel_0 read data:%d")));
    }

    #[test]
    fn finish_tail_claims_two_more_states() {
        let (ctx, fsm) = lower_src("a = 1;");
        let body_end = ctx.fsm.current();
        assert_eq!(
            fsm.state(body_end).unwrap().transition,
            Some(Transition::Unconditional(body_end + 1))
        );
        let announce = fsm.state(body_end + 1).unwrap();
        assert!(announce
            .bindings
            .iter()
            .any(|b| b.dst == Some("finish".into()) && b.value == Expr::Int(1)));
        assert!(displays_at(&fsm, body_end + 1)
            .iter()
            .any(|s| s.contains("finished")));
        // the terminal state has no way out
        assert_eq!(fsm.current(), body_end + 2);
        assert!(fsm
            .state(body_end + 2)
            .map(|st| st.transition.is_none())
            .unwrap_or(true));
    }
}
