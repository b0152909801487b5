//! The flattened state graph a control thread compiles into.

use crate::Expr;
use coramc_utils::Id;
use smallvec::SmallVec;

pub type StateId = u64;

/// A register update (or trace statement) executed while the machine sits
/// in a particular state. A `None` destination marks a trace statement:
/// the value is a system call evaluated for its side effect only.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub dst: Option<Id>,
    pub value: Expr,
    pub guard: Option<Expr>,
}

/// Where the machine goes on the next clock edge.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Unconditional(StateId),
    Conditional {
        cond: Expr,
        t: StateId,
        f: StateId,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    pub bindings: SmallVec<[Binding; 4]>,
    /// `None` on the terminal state only; the compiler makes every
    /// fall-through explicit before it finishes a state.
    pub transition: Option<Transition>,
}

/// A growing collection of numbered states plus the allocation counter.
/// State ids increase monotonically and are never reused; a transition may
/// point at a state that does not exist yet (it is patched in when the
/// enclosing loop or call closes).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fsm {
    states: Vec<State>,
    count: StateId,
}

impl Fsm {
    pub fn new() -> Self {
        Self::default()
    }

    /// The state currently being filled in.
    pub fn current(&self) -> StateId {
        self.count
    }

    /// Move on to the next state id.
    pub fn advance(&mut self) {
        self.count += 1;
    }

    fn state_mut(&mut self, id: StateId) -> &mut State {
        let idx = usize::try_from(id).unwrap();
        if idx >= self.states.len() {
            self.states.resize_with(idx + 1, State::default);
        }
        &mut self.states[idx]
    }

    /// Add a binding to `state`. Values and guards of real register
    /// updates are folded before storage; trace statements are kept
    /// verbatim so the lowering passes can still recognize them.
    pub fn bind(
        &mut self,
        state: StateId,
        dst: Option<Id>,
        value: Expr,
        guard: Option<Expr>,
    ) {
        let (value, guard) = if dst.is_some() {
            (value.fold(), guard.map(Expr::fold))
        } else {
            (value, guard)
        };
        self.state_mut(state).bindings.push(Binding {
            dst,
            value,
            guard,
        });
    }

    /// Set an unconditional transition out of `src`, overwriting any
    /// previous one (patching works by overwrite).
    pub fn set_transition(&mut self, src: StateId, dst: StateId) {
        self.state_mut(src).transition = Some(Transition::Unconditional(dst));
    }

    /// Set a two-way conditional transition out of `src`.
    pub fn set_branch(&mut self, src: StateId, cond: Expr, t: StateId, f: StateId) {
        self.state_mut(src).transition = Some(Transition::Conditional {
            cond: cond.fold(),
            t,
            f,
        });
    }

    /// Number of allocated states, including the terminal one.
    pub fn num_states(&self) -> u64 {
        (self.states.len() as u64).max(self.count + 1)
    }

    pub fn state(&self, id: StateId) -> Option<&State> {
        self.states.get(usize::try_from(id).unwrap())
    }

    /// States in id order. Ids past the end of the allocated vector are
    /// empty states (no bindings, fall-through never made explicit).
    pub fn states(&self) -> impl Iterator<Item = (StateId, &State)> {
        self.states.iter().enumerate().map(|(i, s)| (i as u64, s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_monotonically() {
        let mut fsm = Fsm::new();
        assert_eq!(fsm.current(), 0);
        fsm.advance();
        fsm.advance();
        assert_eq!(fsm.current(), 2);
    }

    #[test]
    fn binding_values_fold_on_insert() {
        let mut fsm = Fsm::new();
        let v = Expr::binary(
            coramc_frontend::ast::BinOp::Add,
            Expr::Int(2),
            Expr::Int(3),
        );
        fsm.bind(0, Some("x".into()), v, None);
        assert_eq!(fsm.state(0).unwrap().bindings[0].value, Expr::Int(5));
    }

    #[test]
    fn trace_bindings_are_kept_verbatim() {
        let mut fsm = Fsm::new();
        let call = Expr::SysCall(
            "display".into(),
            vec![Expr::binary(
                coramc_frontend::ast::BinOp::Add,
                Expr::Int(2),
                Expr::Int(3),
            )],
        );
        fsm.bind(0, None, call.clone(), None);
        assert_eq!(fsm.state(0).unwrap().bindings[0].value, call);
    }

    #[test]
    fn patching_overwrites_a_transition() {
        let mut fsm = Fsm::new();
        fsm.set_transition(3, 4);
        fsm.set_transition(3, 9);
        assert_eq!(
            fsm.state(3).unwrap().transition,
            Some(Transition::Unconditional(9))
        );
    }

    #[test]
    fn forward_references_grow_the_graph() {
        let mut fsm = Fsm::new();
        fsm.set_branch(0, Expr::sym_eq("c", 1), 5, 0);
        assert!(fsm.state(5).is_none());
        assert_eq!(fsm.num_states(), 1);
        fsm.set_transition(5, 6);
        assert_eq!(fsm.states().count(), 6);
    }
}
