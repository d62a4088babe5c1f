//! Declarative finite-state transducer models over a sequence pair.
//!
//! A model is assembled open (as a [`ModelBuilder`]): states, transitions
//! with per-position score calculators, shadows (lookback annotations),
//! spans (bounded self-loops) and portals. Closing the builder checks the
//! graph, orders silent transitions, packs shadow slots and freezes the
//! model; closed models are immutable and shared by `Arc` into the DP
//! engines.

mod alignment;
mod builder;
mod derived;
mod model;
mod subopt;

#[cfg(test)]
mod tests;

pub use alignment::{Alignment, AlignmentOp};
pub use builder::ModelBuilder;
pub use derived::DerivedModel;
pub use model::{
    Calc, CalcDef, CalcFn, CalcId, CellEndFn, CellStartFn, EndState, Label, Model, ModelError,
    Portal, PortalId, PrepFn, Scope, Shadow, ShadowEndFn, ShadowId, ShadowStartFn, Span, SpanId,
    StartState, State, StateId, Transition, TransitionId, END, START,
};
pub use subopt::{SubOpt, SubOptIndex};
