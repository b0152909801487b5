//! Flattening compiler: control-thread AST to a finite state machine.
//!
//! One pass over the program. Every statement claims states as it is
//! visited, so state ids follow source order; loops and calls leave
//! their exit transitions dangling and patch them when they close.
//! Resource method calls expand into fixed handshake sequences and leave
//! a trace marker behind for the diagnostic lowering pass.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use coramc_frontend::ast::{self, BinOp};
use coramc_utils::{CoramResult, Error, Id};

use crate::fsm::Fsm;
use crate::resource::{Resource, ResourceKind, ResourceRegistry};
use crate::scope::{FrameKind, ScopeTracker};
use crate::Expr;

/// Everything the compiler produced for one thread: the state graph, the
/// resolved resources, and the scope bookkeeping the backend needs for
/// register declarations and constant detection.
#[derive(Debug)]
pub struct ThreadContext {
    pub name: String,
    pub fsm: Fsm,
    pub registry: ResourceRegistry,
    pub scope: ScopeTracker,
}

/// Compile `program` into a [`ThreadContext`] named `thread_name`.
pub fn compile(program: &ast::Program, thread_name: &str) -> CoramResult<ThreadContext> {
    let now = Instant::now();
    let mut functions = HashMap::new();
    collect_functions(&program.stmts, &mut functions);

    let mut compiler = Compiler {
        thread: thread_name,
        fsm: Fsm::new(),
        registry: ResourceRegistry::new(),
        scope: ScopeTracker::new(),
        functions,
        in_progress: HashSet::new(),
    };
    compiler.compile_stmts(&program.stmts)?;

    log::info!(
        "compiled thread `{}`: {} states. Took {}ms",
        thread_name,
        compiler.fsm.num_states(),
        now.elapsed().as_millis()
    );

    Ok(ThreadContext {
        name: thread_name.to_string(),
        fsm: compiler.fsm,
        registry: compiler.registry,
        scope: compiler.scope,
    })
}

fn collect_functions<'a>(stmts: &'a [ast::Stmt], out: &mut HashMap<Id, &'a ast::FuncDef>) {
    for stmt in stmts {
        match stmt {
            ast::Stmt::Def(f) => {
                out.insert(f.name, f);
                collect_functions(&f.body, out);
            }
            ast::Stmt::If { body, orelse, .. } => {
                collect_functions(body, out);
                collect_functions(orelse, out);
            }
            ast::Stmt::While { body, .. } | ast::Stmt::For { body, .. } => {
                collect_functions(body, out);
            }
            _ => {}
        }
    }
}

struct Compiler<'a> {
    thread: &'a str,
    fsm: Fsm,
    registry: ResourceRegistry,
    scope: ScopeTracker,
    functions: HashMap<Id, &'a ast::FuncDef>,
    /// Functions currently being inlined; a name showing up twice is a
    /// recursive call, which cannot flatten.
    in_progress: HashSet<Id>,
}

impl<'a> Compiler<'a> {
    fn compile_stmts(&mut self, stmts: &'a [ast::Stmt]) -> CoramResult<()> {
        for stmt in stmts {
            // everything after a break/continue/return in this block is
            // unreachable
            if self.scope.has_pending_jump() {
                break;
            }
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &'a ast::Stmt) -> CoramResult<()> {
        match stmt {
            ast::Stmt::Assign { target, value } => self.compile_assign(*target, value),
            ast::Stmt::AugAssign { target, op, value } => {
                let rhs = self.compile_expr(value)?;
                // the target must already hold a value
                let dst = self.scope.resolve(*target, false)?;
                if self.registry.is_resource_var(dst) {
                    return Err(Error::unsupported(format!(
                        "`{target}` is a resource handle and cannot be reassigned",
                    )));
                }
                let value = Expr::binary(*op, Expr::Sym(dst), rhs);
                self.bind_var(dst, value, None);
                self.step();
                Ok(())
            }
            ast::Stmt::If { cond, body, orelse } => self.compile_if(cond, body, orelse),
            ast::Stmt::While { cond, body } => self.compile_while(cond, body),
            ast::Stmt::For { var, iter, body } => self.compile_for(*var, iter, body),
            // registered up front; generates no states
            ast::Stmt::Def(_) => Ok(()),
            ast::Stmt::Expr(e) => {
                self.compile_expr(e)?;
                Ok(())
            }
            ast::Stmt::Print(args) => {
                self.compile_print(args)?;
                Ok(())
            }
            ast::Stmt::Break => {
                self.scope.record_break(self.fsm.current())?;
                self.fsm.advance();
                Ok(())
            }
            ast::Stmt::Continue => {
                self.scope.record_continue(self.fsm.current())?;
                self.fsm.advance();
                Ok(())
            }
            ast::Stmt::Return(value) => self.compile_return(value.as_ref()),
            ast::Stmt::Global(names) => {
                for name in names {
                    self.scope.add_global(*name);
                }
                Ok(())
            }
            ast::Stmt::Nonlocal(names) => {
                for name in names {
                    self.scope.add_nonlocal(*name);
                }
                Ok(())
            }
            ast::Stmt::Pass => Ok(()),
        }
    }

    fn compile_assign(&mut self, target: Id, value: &'a ast::Expr) -> CoramResult<()> {
        // a constructor call on the right-hand side declares a resource
        // handle instead of binding a register
        if let ast::Expr::Call(call) = value {
            if let Some(kind) = ResourceKind::from_constructor(call.func.as_str()) {
                let var = self.scope.resolve(target, true)?;
                let resource = self.build_resource(kind, call)?;
                self.registry.register(var, resource)?;
                return Ok(());
            }
        }
        let rhs = self.compile_expr(value)?;
        let dst = self.scope.resolve(target, true)?;
        if self.registry.is_resource_var(dst) {
            return Err(Error::unsupported(format!(
                "`{target}` is a resource handle and cannot be reassigned",
            )));
        }
        self.bind_var(dst, rhs, None);
        self.step();
        Ok(())
    }

    fn compile_if(
        &mut self,
        cond: &'a ast::Expr,
        body: &'a [ast::Stmt],
        orelse: &'a [ast::Stmt],
    ) -> CoramResult<()> {
        // side effects of the condition run before the branch state
        let cond = self.compile_expr(cond)?;

        let branch = self.fsm.current();
        self.fsm.advance();
        let true_start = self.fsm.current();

        self.scope.push_frame(FrameKind::Branch);
        self.compile_stmts(body)?;
        self.scope.pop_frame();

        let mid = self.fsm.current();
        if orelse.is_empty() {
            self.fsm.set_branch(branch, cond, true_start, mid);
            return Ok(());
        }

        // dedicated skip state so the true arm can jump over the else arm
        self.fsm.advance();
        let false_start = self.fsm.current();

        self.scope.push_frame(FrameKind::Branch);
        self.compile_stmts(orelse)?;
        self.scope.pop_frame();

        let end = self.fsm.current();
        self.fsm.set_branch(branch, cond, true_start, false_start);
        self.fsm.set_transition(mid, end);
        Ok(())
    }

    fn compile_while(&mut self, cond: &'a ast::Expr, body: &'a [ast::Stmt]) -> CoramResult<()> {
        let cond = self.compile_expr(cond)?;

        let begin = self.fsm.current();
        self.fsm.advance();
        let body_begin = self.fsm.current();

        self.scope.push_frame(FrameKind::Loop);
        self.compile_stmts(body)?;

        let body_end = self.fsm.current();
        self.fsm.advance();
        let exit = self.fsm.current();

        self.fsm.set_branch(begin, cond, body_begin, exit);
        self.fsm.set_transition(body_end, begin);

        for b in self.scope.drain_breaks() {
            self.fsm.set_transition(b, exit);
        }
        for c in self.scope.drain_continues() {
            self.fsm.set_transition(c, begin);
        }
        self.scope.pop_frame();
        Ok(())
    }

    fn compile_for(
        &mut self,
        var: Id,
        iter: &'a ast::Expr,
        body: &'a [ast::Stmt],
    ) -> CoramResult<()> {
        let ast::Expr::Call(call) = iter else {
            return Err(Error::unsupported("`for` iterates over `range(..)` only"));
        };
        if call.func != "range" || !call.kwargs.is_empty() {
            return Err(Error::unsupported("`for` iterates over `range(..)` only"));
        }
        let (begin_v, end_v, step_v) = match call.args.len() {
            1 => (Expr::Int(0), self.compile_expr(&call.args[0])?, Expr::Int(1)),
            2 => (
                self.compile_expr(&call.args[0])?,
                self.compile_expr(&call.args[1])?,
                Expr::Int(1),
            ),
            3 => (
                self.compile_expr(&call.args[0])?,
                self.compile_expr(&call.args[1])?,
                self.compile_expr(&call.args[2])?,
            ),
            n => {
                return Err(Error::unsupported(format!(
                    "`range` takes 1 to 3 arguments, got {n}",
                )));
            }
        };

        // the loop variable outlives the loop body
        let var = self.scope.resolve(var, true)?;

        self.scope.push_frame(FrameKind::Loop);

        // initialize
        self.bind_var(var, begin_v, None);
        self.step();

        let check = self.fsm.current();
        self.fsm.advance();
        let body_begin = self.fsm.current();

        self.compile_stmts(body)?;

        // the update state doubles as the continue target
        let body_end = self.fsm.current();
        let update = Expr::binary(BinOp::Add, Expr::Sym(var), step_v);
        self.bind_var(var, update, None);
        self.fsm.advance();
        let exit = self.fsm.current();

        self.fsm.set_transition(body_end, check);
        let cond = Expr::binary(BinOp::Lt, Expr::Sym(var), end_v);
        self.fsm.set_branch(check, cond, body_begin, exit);

        for b in self.scope.drain_breaks() {
            self.fsm.set_transition(b, exit);
        }
        for c in self.scope.drain_continues() {
            self.fsm.set_transition(c, body_end);
        }
        self.scope.pop_frame();
        Ok(())
    }

    fn compile_return(&mut self, value: Option<&'a ast::Expr>) -> CoramResult<()> {
        match value {
            None => {
                self.scope.record_return(self.fsm.current())?;
                self.fsm.advance();
            }
            Some(e) => {
                let value = self.compile_expr(e)?;
                let retvar = match self.scope.return_var() {
                    Some(v) => v,
                    None => {
                        let v = self.scope.new_tmp();
                        self.scope.set_return_var(v);
                        v
                    }
                };
                self.bind_var(retvar, value, None);
                self.scope.record_return(self.fsm.current())?;
                self.fsm.advance();
            }
        }
        Ok(())
    }

    //--------------------------------------------------------------------
    // expressions
    //--------------------------------------------------------------------

    fn compile_expr(&mut self, expr: &'a ast::Expr) -> CoramResult<Expr> {
        match expr {
            ast::Expr::Num(n) => Ok(Expr::Int(*n)),
            ast::Expr::Str(s) => Ok(Expr::Str(s.clone())),
            ast::Expr::Var(name) => {
                let resolved = self.scope.resolve(*name, false)?;
                if self.registry.is_resource_var(resolved) {
                    return Err(Error::unsupported(format!(
                        "resource handle `{name}` cannot be used as a value",
                    )));
                }
                Ok(Expr::Sym(resolved))
            }
            ast::Expr::Unary(op, e) => {
                let e = self.compile_expr(e)?;
                Ok(Expr::unary(*op, e).fold())
            }
            ast::Expr::Binary(op, lhs, rhs) => {
                let lhs = self.compile_expr(lhs)?;
                let rhs = self.compile_expr(rhs)?;
                Ok(Expr::binary(*op, lhs, rhs).fold())
            }
            ast::Expr::Ternary { cond, then, orelse } => {
                let cond = self.compile_expr(cond)?;
                let then = self.compile_expr(then)?;
                let orelse = self.compile_expr(orelse)?;
                Ok(Expr::cond(cond, then, orelse).fold())
            }
            ast::Expr::Call(call) => self.compile_call(call),
            ast::Expr::MethodCall(mc) => self.compile_method_call(mc),
        }
    }

    fn compile_call(&mut self, call: &'a ast::Call) -> CoramResult<Expr> {
        let name = call.func;
        if ResourceKind::from_constructor(name.as_str()).is_some() {
            return Err(Error::unsupported(format!(
                "`{name}(..)` declares a resource and only appears on the \
                 right-hand side of an assignment",
            )));
        }
        if name == "print" {
            return self.compile_print(&call.args);
        }
        if name == "int" {
            if call.args.len() != 1 {
                return Err(Error::unsupported("`int()` takes exactly one argument"));
            }
            return self.compile_expr(&call.args[0]);
        }
        if name == "range" {
            return Err(Error::unsupported(
                "`range(..)` only appears as a `for` iterator",
            ));
        }
        self.inline_call(call)
    }

    /// Inline a user function at the call site. One state binds the
    /// arguments, then the body is compiled in a fresh call frame;
    /// `return` transitions are patched to the state after the body.
    fn inline_call(&mut self, call: &'a ast::Call) -> CoramResult<Expr> {
        let name = call.func;
        let Some(func) = self.functions.get(&name).copied() else {
            return Err(Error::undefined(format!(
                "function `{name}` is not defined",
            )));
        };
        if self.in_progress.contains(&name) {
            return Err(Error::unsupported(format!(
                "recursive call to `{name}` cannot be flattened",
            )));
        }
        if call.args.len() > func.params.len() {
            return Err(Error::unsupported(format!(
                "`{name}` takes {} arguments, got {}",
                func.params.len(),
                call.args.len()
            )));
        }

        // argument values are evaluated in the caller's frame
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.compile_expr(arg)?);
        }
        let mut kwargs = Vec::with_capacity(call.kwargs.len());
        for (key, value) in &call.kwargs {
            if !func.params.contains(key) {
                return Err(Error::undefined(format!(
                    "`{name}` has no parameter `{key}`",
                )));
            }
            kwargs.push((*key, self.compile_expr(value)?));
        }

        self.scope.push_frame(FrameKind::Call);
        for (param, value) in func.params.iter().zip(args) {
            let dst = self.scope.resolve(*param, true)?;
            self.bind_var(dst, value, None);
        }
        for (key, value) in kwargs {
            let dst = self.scope.resolve(key, true)?;
            self.bind_var(dst, value, None);
        }
        self.step();

        self.in_progress.insert(name);
        let body_result = self.compile_stmts(&func.body);
        self.in_progress.remove(&name);
        body_result?;

        let end = self.fsm.current();
        for r in self.scope.drain_returns() {
            self.fsm.set_transition(r, end);
        }
        let result = match self.scope.return_var() {
            Some(v) => Expr::Sym(v),
            None => Expr::Int(0),
        };
        self.scope.pop_frame();
        Ok(result)
    }

    /// `print(..)` binds a `$display` onto the current state and claims
    /// no state of its own. String arguments fold into the format string;
    /// everything else prints as a decimal field.
    fn compile_print(&mut self, args: &'a [ast::Expr]) -> CoramResult<Expr> {
        let mut format = Vec::new();
        let mut values = Vec::new();
        for arg in args {
            match self.compile_expr(arg)? {
                Expr::Str(s) => format.push(s),
                value => {
                    format.push("%d".to_string());
                    values.push(value);
                }
            }
        }
        let mut call_args = vec![Expr::Str(format.join(" "))];
        call_args.extend(values);
        let call = Expr::SysCall("display".into(), call_args);
        let cur = self.fsm.current();
        self.fsm.bind(cur, None, call.clone(), None);
        Ok(call)
    }

    //--------------------------------------------------------------------
    // resource methods
    //--------------------------------------------------------------------

    fn compile_method_call(&mut self, mc: &'a ast::MethodCall) -> CoramResult<Expr> {
        let var = self.scope.resolve(mc.object, false)?;
        let Some(resource) = self.registry.lookup(var).cloned() else {
            return Err(Error::undefined(format!(
                "`{}` is not a resource handle",
                mc.object
            )));
        };
        let method = mc.method;
        let args = self.method_args(&resource, method, &mc.args)?;

        match (resource.kind, method.as_str()) {
            (k, "read") if k.is_bus() && k != ResourceKind::InStream => {
                self.bus_transfer(&resource, method, args, "read_enable", true);
                Ok(Expr::Int(0))
            }
            (k, "write") if k.is_bus() && k != ResourceKind::OutStream => {
                self.bus_transfer(&resource, method, args, "write_enable", true);
                Ok(Expr::Int(0))
            }
            (k, "read_nonblocking") if k.is_bus() && k != ResourceKind::InStream => {
                self.bus_transfer(&resource, method, args, "read_enable", false);
                Ok(Expr::Int(0))
            }
            (k, "write_nonblocking") if k.is_bus() && k != ResourceKind::OutStream => {
                self.bus_transfer(&resource, method, args, "write_enable", false);
                Ok(Expr::Int(0))
            }
            (k, "wait") if k.is_bus() => {
                self.marker(&resource, method, &args);
                self.loop_until(Expr::sym_eq(resource.signal("busy"), 0));
                Ok(Expr::Int(0))
            }
            (k, "test") if k.is_bus() => {
                self.marker(&resource, method, &args);
                let tmp = self.scope.new_tmp();
                self.bind_var(tmp, Expr::sym_eq(resource.signal("busy"), 0), None);
                self.step();
                Ok(Expr::Sym(tmp))
            }
            (k, "read") if k.is_queue() => Ok(self.queue_read(&resource, method)),
            (k, "write") if k.is_queue() => {
                self.queue_write(&resource, method, args);
                Ok(Expr::Int(0))
            }
            (k, "read") if k.is_reg() => Ok(self.reg_read(&resource, method)),
            (k, "write") if k.is_reg() => {
                self.reg_write(&resource, method, args);
                Ok(Expr::Int(0))
            }
            (kind, _) => Err(Error::undefined(format!(
                "{kind} has no method `{method}`",
            ))),
        }
    }

    /// Evaluate and arity-check the arguments of a resource method.
    fn method_args(
        &mut self,
        resource: &Resource,
        method: Id,
        args: &'a [ast::Expr],
    ) -> CoramResult<Vec<Expr>> {
        let expected = match (resource.kind, method.as_str()) {
            // (core_addr, ext_addr, word_size)
            (ResourceKind::Memory, "read" | "write" | "read_nonblocking" | "write_nonblocking") => 3,
            // (ext_addr, word_size)
            (ResourceKind::InStream, "write" | "write_nonblocking") => 2,
            (ResourceKind::OutStream, "read" | "read_nonblocking") => 2,
            (k, "wait" | "test") if k.is_bus() => 0,
            (k, "read") if k.is_queue() || k.is_reg() => 0,
            (k, "write") if k.is_queue() || k.is_reg() => 1,
            _ => {
                return Err(Error::undefined(format!(
                    "{} has no method `{}`",
                    resource.kind, method
                )));
            }
        };
        if args.len() != expected {
            return Err(Error::unsupported(format!(
                "`{}.{}` takes {} argument(s), got {}",
                resource.kind,
                method,
                expected,
                args.len()
            )));
        }
        args.iter().map(|a| self.compile_expr(a)).collect()
    }

    /// A DMA transfer on a memory or stream: issue the request while
    /// `ready`, drop the strobe once `busy` asserts, and (blocking only)
    /// hold until `busy` clears again.
    fn bus_transfer(
        &mut self,
        resource: &Resource,
        method: Id,
        args: Vec<Expr>,
        enable: &str,
        blocking: bool,
    ) {
        self.marker(resource, method, &args);

        if resource.kind.is_banked() {
            // (core_addr, ext_addr, word_size)
            self.bind_signal(resource.signal("ext_addr"), args[1].clone(), None);
            self.bind_signal(resource.signal("core_addr"), args[0].clone(), None);
            self.bind_signal(resource.signal("word_size"), args[2].clone(), None);
        } else {
            // (ext_addr, word_size)
            self.bind_signal(resource.signal("ext_addr"), args[0].clone(), None);
            self.bind_signal(resource.signal("word_size"), args[1].clone(), None);
        }

        let ready = Expr::sym_eq(resource.signal("ready"), 1);
        self.bind_signal(resource.signal(enable), Expr::Int(1), Some(ready.clone()));
        self.loop_until(ready);

        self.bind_signal(resource.signal(enable), Expr::Int(0), None);
        self.loop_until(Expr::sym_eq(resource.signal("busy"), 1));

        if blocking {
            self.loop_until(Expr::sym_eq(resource.signal("busy"), 0));
        }
    }

    fn queue_read(&mut self, resource: &Resource, method: Id) -> Expr {
        self.marker(resource, method, &[]);

        let not_empty = Expr::sym_eq(resource.signal("empty"), 0);
        self.bind_signal(resource.signal("deq"), not_empty.clone(), None);
        self.loop_until(not_empty.clone());

        let tmp = self.scope.new_tmp();
        self.bind_var(tmp, Expr::Sym(resource.signal("q")), None);
        self.bind_signal(resource.signal("deq"), Expr::Int(0), None);
        self.loop_until(not_empty);

        Expr::Sym(tmp)
    }

    fn queue_write(&mut self, resource: &Resource, method: Id, args: Vec<Expr>) {
        self.marker(resource, method, &args);

        self.bind_signal(resource.signal("d"), args[0].clone(), None);
        let not_full = Expr::sym_eq(resource.signal("almost_full"), 0);
        self.bind_signal(resource.signal("enq"), not_full.clone(), None);
        self.loop_until(not_full);

        // the deassert rides whatever state comes next
        self.bind_signal(resource.signal("enq"), Expr::Int(0), None);
    }

    fn reg_read(&mut self, resource: &Resource, method: Id) -> Expr {
        let tmp = self.scope.new_tmp();
        self.bind_var(tmp, Expr::Sym(resource.signal("q")), None);
        // the sampled value is part of the trace
        self.marker(resource, method, &[Expr::Sym(tmp)]);
        self.step();
        Expr::Sym(tmp)
    }

    fn reg_write(&mut self, resource: &Resource, method: Id, args: Vec<Expr>) {
        self.marker(resource, method, &args);
        self.bind_signal(resource.signal("d"), args[0].clone(), None);
        self.bind_signal(resource.signal("we"), Expr::Int(1), None);
        self.step();
        self.bind_signal(resource.signal("we"), Expr::Int(0), None);
        self.step();
    }

    //--------------------------------------------------------------------
    // constructors
    //--------------------------------------------------------------------

    /// Resolve a constructor call into a [`Resource`]. Geometry arguments
    /// take the positional order (idx, datawidth, size, length,
    /// scattergather) and must be compile-time constants.
    fn build_resource(&mut self, kind: ResourceKind, call: &'a ast::Call) -> CoramResult<Resource> {
        const KEYS: [&str; 5] = ["idx", "datawidth", "size", "length", "scattergather"];
        let mut values: [Option<i64>; 5] = [None; 5];

        if call.args.len() > KEYS.len() {
            return Err(Error::geometry(format!(
                "`{kind}(..)` takes at most {} arguments, got {}",
                KEYS.len(),
                call.args.len()
            )));
        }
        for (slot, arg) in values.iter_mut().zip(&call.args) {
            *slot = Some(self.resolve_const(arg)?);
        }
        for (key, value) in &call.kwargs {
            let Some(pos) = KEYS.iter().position(|k| key == *k) else {
                return Err(Error::geometry(format!(
                    "unknown geometry argument `{key}` for `{kind}(..)`",
                )));
            };
            values[pos] = Some(self.resolve_const(value)?);
        }

        let [idx, datawidth, size, length, scattergather] = values;
        let Some(idx) = idx else {
            return Err(Error::geometry(format!(
                "`{kind}(..)` requires a resource id",
            )));
        };
        Resource::resolve(kind, idx, datawidth, size, length, scattergather)
    }

    /// Evaluate a geometry argument down to an integer. Named values are
    /// chased through single-assignment variables; anything that needs a
    /// state to evaluate is rejected.
    fn resolve_const(&mut self, expr: &'a ast::Expr) -> CoramResult<i64> {
        self.const_expr(expr)?.as_int().ok_or_else(|| {
            Error::geometry("geometry arguments must be compile-time constants")
        })
    }

    fn const_expr(&mut self, expr: &'a ast::Expr) -> CoramResult<Expr> {
        let folded = match expr {
            ast::Expr::Num(n) => Expr::Int(*n),
            ast::Expr::Var(name) => {
                let resolved = self.scope.resolve(*name, false)?;
                let single = self
                    .scope
                    .binds()
                    .get(&resolved)
                    .filter(|records| records.len() == 1)
                    .and_then(|records| records[0].value.clone().fold().as_int());
                match single {
                    Some(v) => Expr::Int(v),
                    None => {
                        return Err(Error::geometry(format!(
                            "`{name}` does not hold a compile-time constant",
                        )));
                    }
                }
            }
            ast::Expr::Unary(op, e) => Expr::unary(*op, self.const_expr(e)?).fold(),
            ast::Expr::Binary(op, lhs, rhs) => {
                Expr::binary(*op, self.const_expr(lhs)?, self.const_expr(rhs)?).fold()
            }
            ast::Expr::Ternary { cond, then, orelse } => Expr::cond(
                self.const_expr(cond)?,
                self.const_expr(then)?,
                self.const_expr(orelse)?,
            )
            .fold(),
            _ => {
                return Err(Error::geometry(
                    "geometry arguments must be compile-time constants",
                ));
            }
        };
        Ok(folded)
    }

    //--------------------------------------------------------------------
    // helpers
    //--------------------------------------------------------------------

    /// Bind a thread variable and record the write for constant detection.
    fn bind_var(&mut self, dst: Id, value: Expr, guard: Option<Expr>) {
        let cur = self.fsm.current();
        self.fsm.bind(cur, Some(dst), value.clone(), guard.clone());
        self.scope.add_bind(cur, dst, value, guard);
    }

    /// Bind a resource port signal. Signals are not thread variables, so
    /// no write record is kept.
    fn bind_signal(&mut self, dst: Id, value: Expr, guard: Option<Expr>) {
        let cur = self.fsm.current();
        self.fsm.bind(cur, Some(dst), value, guard);
    }

    /// Close the current state with a fall-through transition.
    fn step(&mut self) {
        let cur = self.fsm.current();
        self.fsm.set_transition(cur, cur + 1);
        self.fsm.advance();
    }

    /// Close the current state with a self-loop until `cond` holds.
    fn loop_until(&mut self, cond: Expr) {
        let cur = self.fsm.current();
        self.fsm.set_branch(cur, cond, cur + 1, cur);
        self.fsm.advance();
    }

    /// Leave a trace marker for the diagnostic lowering pass. Markers are
    /// destination-less bindings named `coram_<kind>_<method>` whose first
    /// argument is the signal prefix of the resource.
    fn marker(&mut self, resource: &Resource, method: Id, args: &[Expr]) {
        let mut call_args = vec![Expr::Sym(resource.prefix())];
        call_args.extend(args.iter().cloned());
        let name = Id::new(format!("coram_{}_{}", resource.kind, method));
        let cur = self.fsm.current();
        self.fsm.bind(cur, None, Expr::SysCall(name, call_args), None);
        log::debug!(
            "{}: state {} {} coram_{}_{}",
            self.thread,
            cur,
            resource.prefix(),
            resource.kind,
            method
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::Transition;
    use coramc_frontend::ThreadParser;

    fn compile_src(src: &str) -> ThreadContext {
        let program = ThreadParser::parse(src.as_bytes()).unwrap();
        compile(&program, "test_thread").unwrap()
    }

    fn compile_err(src: &str) -> Error {
        let program = ThreadParser::parse(src.as_bytes()).unwrap();
        compile(&program, "test_thread").unwrap_err()
    }

    #[test]
    fn straight_line_assignments_take_one_state_each() {
        let ctx = compile_src("a = 1; b = a + 2; c = b * b;");
        // three bind states plus the open terminal state
        assert_eq!(ctx.fsm.current(), 3);
        assert_eq!(
            ctx.fsm.state(0).unwrap().transition,
            Some(Transition::Unconditional(1))
        );
        assert_eq!(ctx.scope.constants().get(&Id::from("a")), Some(&1));
    }

    #[test]
    fn memory_read_claims_three_states() {
        let ctx = compile_src(
            "mem = memory(0, 32, 1024);\n\
             mem.read(0, 1024, 256);",
        );
        assert_eq!(ctx.fsm.current(), 3);
        // issue state: strobe guarded on ready, loop until ready
        let issue = ctx.fsm.state(0).unwrap();
        let strobe = issue
            .bindings
            .iter()
            .find(|b| b.dst == Some("memory_0_read_enable".into()))
            .unwrap();
        assert_eq!(strobe.value, Expr::Int(1));
        assert_eq!(
            strobe.guard,
            Some(Expr::sym_eq("memory_0_ready", 1))
        );
        assert_eq!(
            issue.transition,
            Some(Transition::Conditional {
                cond: Expr::sym_eq("memory_0_ready", 1),
                t: 1,
                f: 0,
            })
        );
        // deassert state waits for busy to assert
        assert_eq!(
            ctx.fsm.state(1).unwrap().transition,
            Some(Transition::Conditional {
                cond: Expr::sym_eq("memory_0_busy", 1),
                t: 2,
                f: 1,
            })
        );
        // blocking tail waits for busy to clear
        assert_eq!(
            ctx.fsm.state(2).unwrap().transition,
            Some(Transition::Conditional {
                cond: Expr::sym_eq("memory_0_busy", 0),
                t: 3,
                f: 2,
            })
        );
    }

    #[test]
    fn nonblocking_write_skips_the_busy_wait() {
        let ctx = compile_src(
            "mem = memory(0);\n\
             mem.write_nonblocking(0, 0, 16);",
        );
        assert_eq!(ctx.fsm.current(), 2);
    }

    #[test]
    fn channel_read_returns_the_sampled_word() {
        let ctx = compile_src(
            "ch = channel(0);\n\
             v = ch.read();",
        );
        // two handshake states plus the assignment state
        assert_eq!(ctx.fsm.current(), 3);
        let sample = ctx.fsm.state(1).unwrap();
        assert!(sample
            .bindings
            .iter()
            .any(|b| b.dst == Some("_tmp".into())
                && b.value == Expr::sym("channel_0_q")));
        // the assignment copies the temporary
        let copy = ctx.fsm.state(2).unwrap();
        assert!(copy
            .bindings
            .iter()
            .any(|b| b.dst == Some("v".into()) && b.value == Expr::sym("_tmp")));
    }

    #[test]
    fn channel_write_deasserts_on_the_next_state() {
        let ctx = compile_src(
            "ch = channel(0);\n\
             ch.write(7);\n\
             a = 1;",
        );
        let enq: Vec<_> = ctx
            .fsm
            .state(1)
            .unwrap()
            .bindings
            .iter()
            .filter(|b| b.dst == Some("channel_0_enq".into()))
            .collect();
        assert_eq!(enq.len(), 1);
        assert_eq!(enq[0].value, Expr::Int(0));
    }

    #[test]
    fn register_write_takes_two_states() {
        let ctx = compile_src(
            "r = register(0);\n\
             r.write(5);",
        );
        assert_eq!(ctx.fsm.current(), 2);
        let deassert = ctx.fsm.state(1).unwrap();
        assert!(deassert
            .bindings
            .iter()
            .any(|b| b.dst == Some("register_0_we".into()) && b.value == Expr::Int(0)));
    }

    #[test]
    fn if_without_else_falls_through() {
        let ctx = compile_src(
            "a = 0;\n\
             if (a < 10) { a = 1; }\n\
             b = 2;",
        );
        // 0: a=0, 1: branch, 2: a=1, 3: b=2
        assert_eq!(
            ctx.fsm.state(1).unwrap().transition,
            Some(Transition::Conditional {
                cond: Expr::binary(BinOp::Lt, Expr::sym("a"), Expr::Int(10)),
                t: 2,
                f: 3,
            })
        );
    }

    #[test]
    fn if_else_joins_through_a_skip_state() {
        let ctx = compile_src(
            "a = 0;\n\
             if (a == 0) { b = 1; } else { b = 2; }\n\
             c = 3;",
        );
        // 0: a=0, 1: branch, 2: b=1, 3: skip, 4: b=2, 5: c=3
        assert_eq!(
            ctx.fsm.state(1).unwrap().transition,
            Some(Transition::Conditional {
                cond: Expr::sym_eq("a", 0),
                t: 2,
                f: 4,
            })
        );
        assert_eq!(
            ctx.fsm.state(3).unwrap().transition,
            Some(Transition::Unconditional(5))
        );
    }

    #[test]
    fn while_loop_patches_break_to_the_exit() {
        let ctx = compile_src(
            "a = 0;\n\
             while (1) { a = a + 1; if (a > 3) { break; } }\n\
             b = 0;",
        );
        // 0: a=0, 1: loop head, 2: a=a+1, 3: inner branch, 4: break,
        // 5: loop back, 6: exit (b=0)
        assert_eq!(
            ctx.fsm.state(4).unwrap().transition,
            Some(Transition::Unconditional(6))
        );
        assert_eq!(
            ctx.fsm.state(5).unwrap().transition,
            Some(Transition::Unconditional(1))
        );
    }

    #[test]
    fn for_loop_updates_on_the_continue_target() {
        let ctx = compile_src(
            "s = 0;\n\
             for i in range(4) { s = s + i; }\n\
             t = s;",
        );
        // 0: s=0, 1: i=0, 2: check, 3: body, 4: update, 5: exit
        assert_eq!(
            ctx.fsm.state(2).unwrap().transition,
            Some(Transition::Conditional {
                cond: Expr::binary(BinOp::Lt, Expr::sym("i"), Expr::Int(4)),
                t: 3,
                f: 5,
            })
        );
        let update = ctx.fsm.state(4).unwrap();
        assert!(update.bindings.iter().any(|b| {
            b.dst == Some("i".into())
                && b.value == Expr::binary(BinOp::Add, Expr::sym("i"), Expr::Int(1))
        }));
        assert_eq!(
            update.transition,
            Some(Transition::Unconditional(2))
        );
    }

    #[test]
    fn function_calls_inline_their_body() {
        let ctx = compile_src(
            "def double(x) { return x * 2; }\n\
             a = double(21);",
        );
        // 0: arg bind, 1: return bind, 2: a=_tmp
        assert_eq!(ctx.fsm.current(), 3);
        let ret = ctx.fsm.state(1).unwrap();
        assert!(ret.bindings.iter().any(|b| {
            b.dst == Some("_tmp".into())
                && b.value == Expr::binary(BinOp::Mul, Expr::sym("x"), Expr::Int(2))
        }));
        // the return jump lands on the state after the body
        assert_eq!(
            ret.transition,
            Some(Transition::Unconditional(2))
        );
    }

    #[test]
    fn recursion_is_rejected() {
        let err = compile_err(
            "def f(x) { return f(x); }\n\
             a = f(1);",
        );
        assert!(err.is_unsupported());
    }

    #[test]
    fn print_claims_no_state() {
        let ctx = compile_src(
            "a = 1;\n\
             print(\"value:\", a);\n\
             b = 2;",
        );
        assert_eq!(ctx.fsm.current(), 2);
        let display = &ctx.fsm.state(1).unwrap().bindings[0];
        assert_eq!(display.dst, None);
        assert_eq!(
            display.value,
            Expr::SysCall(
                "display".into(),
                vec![Expr::Str("value: %d".to_string()), Expr::sym("a")]
            )
        );
    }

    #[test]
    fn constructor_arguments_chase_named_constants() {
        let ctx = compile_src(
            "w = 64;\n\
             mem = memory(0, w, 2 * 256);",
        );
        let mem = ctx.registry.lookup("mem".into()).unwrap();
        assert_eq!(mem.datawidth, 64);
        assert_eq!(mem.size, 512);
    }

    #[test]
    fn non_constant_geometry_is_rejected() {
        let err = compile_err(
            "ch = channel(0);\n\
             w = ch.read();\n\
             mem = memory(0, w);",
        );
        assert!(err.is_geometry());
    }

    #[test]
    fn resource_handles_are_not_values() {
        let err = compile_err(
            "mem = memory(0);\n\
             a = mem + 1;",
        );
        assert!(err.is_unsupported());
    }

    #[test]
    fn resource_handles_cannot_be_reassigned() {
        let err = compile_err(
            "mem = memory(0);\n\
             mem = 5;\n\
             mem.read(0, 0, 4);",
        );
        assert!(err.is_unsupported());
        let err = compile_err(
            "mem = memory(0);\n\
             mem += 1;",
        );
        assert!(err.is_unsupported());
    }

    #[test]
    fn inlined_parameters_never_alias_a_user_register() {
        let ctx = compile_src(
            "x0 = 100;\n\
             def g(x) { return x + 1; }\n\
             def h(x) { return x + 2; }\n\
             a = g(5);\n\
             b = h(7);\n\
             c = x0;",
        );
        let mut seen = HashSet::new();
        for v in ctx.scope.variables() {
            assert!(seen.insert(*v), "register `{v}` declared twice");
        }
    }

    #[test]
    fn augmented_assignment_requires_a_defined_target() {
        let err = compile_err("a += 1;");
        assert!(err.is_undefined());
    }

    #[test]
    fn module_level_return_is_rejected() {
        let err = compile_err("return 1;");
        assert!(err.is_unsupported());
    }

    #[test]
    fn aliased_resources_share_a_port_group() {
        let ctx = compile_src(
            "a = memory(0, 32, 1024);\n\
             b = memory(0, 32, 1024);\n\
             a.read(0, 0, 16);\n\
             b.write(0, 0, 16);",
        );
        assert_eq!(ctx.registry.iter().count(), 1);
        assert_eq!(ctx.fsm.current(), 6);
    }
}
