//! Intermediate representation for compiled control threads.
//!
//! A thread program flattens into a finite state machine: numbered
//! states carrying guarded register updates, with one transition out of
//! each state. [`compile`] drives the flattening; the other modules hold
//! the pieces it produces.

mod expr;
mod from_ast;
mod fsm;
mod resource;
mod scope;

pub use expr::Expr;
pub use from_ast::{compile, ThreadContext};
pub use fsm::{Binding, Fsm, State, StateId, Transition};
pub use resource::{Resource, ResourceKind, ResourceRegistry, EXT_MAX_DATAWIDTH};
pub use scope::{BindRecord, FrameKind, ScopeTracker};
