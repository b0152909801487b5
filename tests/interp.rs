//! Register-machine interpretation of lowered threads.
//!
//! Walks the state graph one clock per step: binding values, guards and
//! the transition condition are all evaluated against the register file
//! as it stood at the start of the cycle, then the updates land at the
//! edge. Queue resources are modelled the way a synchronous FIFO
//! behaves: `deq` and `enq` take effect on the edge after they were
//! asserted, with `q` and `d` sampled before the pointer moves.

use std::collections::{HashMap, VecDeque};

use coramc_backend::lower;
use coramc_frontend::ast::{BinOp, UnaryOp};
use coramc_frontend::ThreadParser;
use coramc_ir::{compile, Expr, Fsm, Transition};
use coramc_utils::Id;

struct HostQueue {
    inputs: VecDeque<i64>,
    outputs: Vec<i64>,
    q: Id,
    empty: Id,
    deq: Id,
    d: Id,
    enq: Id,
}

impl HostQueue {
    fn new(prefix: &str, inputs: &[i64]) -> Self {
        HostQueue {
            inputs: inputs.iter().copied().collect(),
            outputs: Vec::new(),
            q: Id::new(format!("{prefix}_q")),
            empty: Id::new(format!("{prefix}_empty")),
            deq: Id::new(format!("{prefix}_deq")),
            d: Id::new(format!("{prefix}_d")),
            enq: Id::new(format!("{prefix}_enq")),
        }
    }

    fn read_signal(&self, id: Id) -> Option<i64> {
        if id == self.q {
            Some(self.inputs.front().copied().unwrap_or(0))
        } else if id == self.empty {
            Some(i64::from(self.inputs.is_empty()))
        } else {
            None
        }
    }

    /// Clock edge: act on the strobe values that were driven during the
    /// cycle now ending.
    fn tick(&mut self, env: &HashMap<Id, i64>) {
        if env.get(&self.deq).copied().unwrap_or(0) == 1 {
            self.inputs.pop_front();
        }
        if env.get(&self.enq).copied().unwrap_or(0) == 1 {
            self.outputs.push(env.get(&self.d).copied().unwrap_or(0));
        }
    }
}

fn eval(expr: &Expr, env: &HashMap<Id, i64>, queue: &HostQueue) -> i64 {
    match expr {
        Expr::Int(v) => *v,
        Expr::Str(_) => 0,
        Expr::Sym(id) => queue
            .read_signal(*id)
            .unwrap_or_else(|| env.get(id).copied().unwrap_or(0)),
        Expr::Unary(op, e) => {
            let v = eval(e, env, queue);
            match op {
                UnaryOp::Neg => v.wrapping_neg(),
                UnaryOp::Not => i64::from(v == 0),
                UnaryOp::BitNot => !v,
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, env, queue);
            let r = eval(rhs, env, queue);
            match op {
                BinOp::Add => l.wrapping_add(r),
                BinOp::Sub => l.wrapping_sub(r),
                BinOp::Mul => l.wrapping_mul(r),
                BinOp::Div => l.checked_div(r).unwrap_or(0),
                BinOp::Rem => l.checked_rem(r).unwrap_or(0),
                BinOp::BitAnd => l & r,
                BinOp::BitOr => l | r,
                BinOp::BitXor => l ^ r,
                BinOp::Shl => l.checked_shl(r.try_into().unwrap_or(u32::MAX)).unwrap_or(0),
                BinOp::Shr => l.checked_shr(r.try_into().unwrap_or(u32::MAX)).unwrap_or(0),
                BinOp::Eq => i64::from(l == r),
                BinOp::Neq => i64::from(l != r),
                BinOp::Lt => i64::from(l < r),
                BinOp::Gt => i64::from(l > r),
                BinOp::Leq => i64::from(l <= r),
                BinOp::Geq => i64::from(l >= r),
                BinOp::LogAnd => i64::from(l != 0 && r != 0),
                BinOp::LogOr => i64::from(l != 0 || r != 0),
            }
        }
        Expr::Cond(c, t, e) => {
            if eval(c, env, queue) != 0 {
                eval(t, env, queue)
            } else {
                eval(e, env, queue)
            }
        }
        // trace statements have no value
        Expr::SysCall(..) => 0,
    }
}

/// Run the machine until it parks in a terminal state, `want` words have
/// been written back, or the cycle budget runs out.
fn run(fsm: &Fsm, queue: &mut HostQueue, want: usize) -> HashMap<Id, i64> {
    let mut env: HashMap<Id, i64> = HashMap::new();
    let mut state: u64 = 0;
    for _ in 0..200_000 {
        if queue.outputs.len() >= want {
            return env;
        }
        let st = fsm.state(state);
        let mut updates = Vec::new();
        if let Some(st) = st {
            for bind in &st.bindings {
                let Some(dst) = bind.dst else {
                    continue;
                };
                let fire = bind
                    .guard
                    .as_ref()
                    .map_or(true, |g| eval(g, &env, queue) != 0);
                if fire {
                    updates.push((dst, eval(&bind.value, &env, queue)));
                }
            }
        }
        let next = match st.and_then(|s| s.transition.as_ref()) {
            Some(Transition::Unconditional(dst)) => *dst,
            Some(Transition::Conditional { cond, t, f }) => {
                if eval(cond, &env, queue) != 0 {
                    *t
                } else {
                    *f
                }
            }
            None => return env,
        };
        queue.tick(&env);
        for (dst, value) in updates {
            env.insert(dst, value);
        }
        state = next;
    }
    panic!("machine did not settle within the cycle budget");
}

fn lower_src(src: &str) -> Fsm {
    let program = ThreadParser::parse(src.as_bytes()).unwrap();
    let ctx = compile(&program, "test_thread").unwrap();
    lower(&ctx)
}

#[test]
fn fib_server_answers_over_the_host_queue() {
    let fsm = lower_src(
        "
        ch = iochannel(0, 32);

        def fib(v) {
            a = 0;
            b = 1;
            for i in range(v) {
                t = a + b;
                a = b;
                b = t;
            }
            return a;
        }

        while (1) {
            n = ch.read();
            r = fib(n);
            ch.write(r);
        }
        ",
    );
    let mut queue = HostQueue::new("iochannel_0", &[0, 1, 2, 10]);
    run(&fsm, &mut queue, 4);
    assert_eq!(queue.outputs, vec![0, 1, 1, 55]);
}

#[test]
fn straight_line_threads_raise_finish_and_park() {
    let fsm = lower_src("a = 1; a = a + 1;");
    let mut queue = HostQueue::new("iochannel_0", &[]);
    let env = run(&fsm, &mut queue, usize::MAX);
    assert_eq!(env.get(&Id::new("finish")).copied(), Some(1));
    assert_eq!(env.get(&Id::new("a")).copied(), Some(2));
}

#[test]
fn queue_backpressure_stalls_the_reader() {
    // no host words at all: the thread must sit in the read state
    let fsm = lower_src(
        "
        ch = iochannel(0, 32);
        n = ch.read();
        ch.write(n + 1);
        ",
    );
    let mut queue = HostQueue::new("iochannel_0", &[]);
    let mut env: HashMap<Id, i64> = HashMap::new();
    let mut state: u64 = 0;
    for _ in 0..64 {
        let st = fsm.state(state).unwrap();
        let mut updates = Vec::new();
        for bind in &st.bindings {
            let Some(dst) = bind.dst else { continue };
            if bind
                .guard
                .as_ref()
                .map_or(true, |g| eval(g, &env, &queue) != 0)
            {
                updates.push((dst, eval(&bind.value, &env, &queue)));
            }
        }
        let next = match st.transition.as_ref().unwrap() {
            Transition::Unconditional(dst) => *dst,
            Transition::Conditional { cond, t, f } => {
                if eval(cond, &env, &queue) != 0 {
                    *t
                } else {
                    *f
                }
            }
        };
        for (dst, value) in updates {
            env.insert(dst, value);
        }
        state = next;
    }
    assert_eq!(state, 0);
    assert!(queue.outputs.is_empty());
}
