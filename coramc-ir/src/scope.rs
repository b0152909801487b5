//! Lexical frames for the flattening compiler.
//!
//! Flattening erases the call stack, so scoping has to be resolved at
//! compile time: every source-level variable maps to one hardware
//! register with a globally unique name, and the pending jump targets of
//! `break`/`continue`/`return` accumulate on the frame that will patch
//! them when it closes.

use crate::fsm::StateId;
use crate::Expr;
use coramc_utils::{CoramResult, Error, Id, NameGenerator};
use linked_hash_map::LinkedHashMap;
use std::collections::{HashMap, HashSet};

/// What kind of construct opened a frame. Break/continue targets land on
/// the nearest `Loop` frame, return targets and the return-value
/// temporary on the nearest `Call` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Module,
    Call,
    Loop,
    Branch,
}

#[derive(Debug, Clone)]
struct Frame {
    kind: FrameKind,
    names: HashMap<Id, Id>,
    globals: HashSet<Id>,
    nonlocals: HashSet<Id>,
    /// Set once a break/continue/return was compiled in this block; the
    /// rest of the block is unreachable and must not emit states.
    jumped: bool,
    breaks: Vec<StateId>,
    continues: Vec<StateId>,
    returns: Vec<StateId>,
    return_var: Option<Id>,
}

impl Frame {
    fn new(kind: FrameKind) -> Self {
        Frame {
            kind,
            names: HashMap::new(),
            globals: HashSet::new(),
            nonlocals: HashSet::new(),
            jumped: false,
            breaks: Vec::new(),
            continues: Vec::new(),
            returns: Vec::new(),
            return_var: None,
        }
    }
}

/// A recorded register update, kept for constant detection: a variable
/// written exactly once with a literal value becomes a named constant.
#[derive(Debug, Clone)]
pub struct BindRecord {
    pub state: StateId,
    pub value: Expr,
    pub guard: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ScopeTracker {
    frames: Vec<Frame>,
    namegen: NameGenerator,
    /// Resolved names in declaration order; drives signal declarations.
    variables: Vec<Id>,
    binds: LinkedHashMap<Id, Vec<BindRecord>>,
}

impl Default for ScopeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTracker {
    pub fn new() -> Self {
        ScopeTracker {
            frames: vec![Frame::new(FrameKind::Module)],
            namegen: NameGenerator::default(),
            variables: Vec::new(),
            binds: LinkedHashMap::new(),
        }
    }

    pub fn push_frame(&mut self, kind: FrameKind) {
        self.frames.push(Frame::new(kind));
    }

    pub fn pop_frame(&mut self) {
        debug_assert!(self.frames.len() > 1, "cannot pop the module frame");
        self.frames.pop();
    }

    fn current(&mut self) -> &mut Frame {
        self.frames.last_mut().unwrap()
    }

    /// Declare `name` in the frame at `at` and give it a globally unique
    /// resolved name.
    fn declare_at(&mut self, at: usize, name: Id) -> Id {
        let resolved = self.namegen.gen_name(name);
        self.frames[at].names.insert(name, resolved);
        self.variables.push(resolved);
        resolved
    }

    /// Map a source name to its hardware register. A write to an unknown
    /// name declares it in the current frame; a read of one is a name
    /// resolution error. `global`/`nonlocal` redirects are honored from
    /// the innermost frame that declared them.
    pub fn resolve(&mut self, name: Id, for_write: bool) -> CoramResult<Id> {
        for i in (0..self.frames.len()).rev() {
            let frame = &self.frames[i];
            if frame.globals.contains(&name) {
                if let Some(resolved) = self.frames[0].names.get(&name) {
                    return Ok(*resolved);
                }
                return if for_write {
                    Ok(self.declare_at(0, name))
                } else {
                    Err(Error::undefined(format!(
                        "global name `{name}` is not defined",
                    )))
                };
            }
            if frame.nonlocals.contains(&name) {
                for j in (0..i).rev() {
                    if let Some(resolved) = self.frames[j].names.get(&name) {
                        return Ok(*resolved);
                    }
                }
                return Err(Error::undefined(format!(
                    "nonlocal name `{name}` is not defined in an outer frame",
                )));
            }
            if let Some(resolved) = frame.names.get(&name) {
                return Ok(*resolved);
            }
        }
        if for_write {
            let at = self.frames.len() - 1;
            Ok(self.declare_at(at, name))
        } else {
            Err(Error::undefined(format!("name `{name}` is not defined")))
        }
    }

    /// A fresh compiler temporary, declared in the current frame.
    pub fn new_tmp(&mut self) -> Id {
        let resolved = self.namegen.gen_name("_tmp");
        self.current().names.insert(resolved, resolved);
        self.variables.push(resolved);
        resolved
    }

    pub fn add_global(&mut self, name: Id) {
        self.current().globals.insert(name);
    }

    pub fn add_nonlocal(&mut self, name: Id) {
        self.current().nonlocals.insert(name);
    }

    /// True once the current block compiled a break/continue/return; the
    /// compiler skips the statements that follow it.
    pub fn has_pending_jump(&self) -> bool {
        self.frames.last().unwrap().jumped
    }

    fn nearest_mut(&mut self, kind: FrameKind) -> Option<&mut Frame> {
        self.frames.iter_mut().rev().find(|f| f.kind == kind)
    }

    pub fn record_break(&mut self, state: StateId) -> CoramResult<()> {
        self.current().jumped = true;
        match self.nearest_mut(FrameKind::Loop) {
            Some(frame) => {
                frame.breaks.push(state);
                Ok(())
            }
            None => Err(Error::unsupported("`break` outside of a loop")),
        }
    }

    pub fn record_continue(&mut self, state: StateId) -> CoramResult<()> {
        self.current().jumped = true;
        match self.nearest_mut(FrameKind::Loop) {
            Some(frame) => {
                frame.continues.push(state);
                Ok(())
            }
            None => Err(Error::unsupported("`continue` outside of a loop")),
        }
    }

    pub fn record_return(&mut self, state: StateId) -> CoramResult<()> {
        self.current().jumped = true;
        match self.nearest_mut(FrameKind::Call) {
            Some(frame) => {
                frame.returns.push(state);
                Ok(())
            }
            None => Err(Error::unsupported(
                "`return` outside of a function body",
            )),
        }
    }

    /// Take the pending break targets of the innermost loop frame. The
    /// closing loop consumes them exactly once.
    pub fn drain_breaks(&mut self) -> Vec<StateId> {
        self.nearest_mut(FrameKind::Loop)
            .map(|f| std::mem::take(&mut f.breaks))
            .unwrap_or_default()
    }

    pub fn drain_continues(&mut self) -> Vec<StateId> {
        self.nearest_mut(FrameKind::Loop)
            .map(|f| std::mem::take(&mut f.continues))
            .unwrap_or_default()
    }

    pub fn drain_returns(&mut self) -> Vec<StateId> {
        self.nearest_mut(FrameKind::Call)
            .map(|f| std::mem::take(&mut f.returns))
            .unwrap_or_default()
    }

    /// The return-value temporary of the innermost call frame, allocated
    /// on the first `return <expr>` compiled inside it.
    pub fn return_var(&mut self) -> Option<Id> {
        self.nearest_mut(FrameKind::Call)
            .and_then(|f| f.return_var)
    }

    pub fn set_return_var(&mut self, var: Id) {
        if let Some(frame) = self.nearest_mut(FrameKind::Call) {
            frame.return_var = Some(var);
        }
    }

    /// Record a register update for constant detection.
    pub fn add_bind(
        &mut self,
        state: StateId,
        dst: Id,
        value: Expr,
        guard: Option<Expr>,
    ) {
        self.binds
            .entry(dst)
            .or_insert_with(Vec::new)
            .push(BindRecord {
                state,
                value,
                guard,
            });
    }

    /// Declared hardware registers, in declaration order.
    pub fn variables(&self) -> &[Id] {
        &self.variables
    }

    pub fn binds(&self) -> &LinkedHashMap<Id, Vec<BindRecord>> {
        &self.binds
    }

    /// Variables written exactly once with a literal value. These surface
    /// as named constants instead of registers.
    pub fn constants(&self) -> LinkedHashMap<Id, i64> {
        let mut consts = LinkedHashMap::new();
        for name in &self.variables {
            let Some(records) = self.binds.get(name) else {
                continue;
            };
            if records.len() != 1 {
                continue;
            }
            if let Some(v) = records[0].value.clone().fold().as_int() {
                consts.insert(*name, v);
            }
        }
        consts
    }
}
