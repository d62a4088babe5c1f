//! A declarative finite-state transducer DP engine for pairwise sequence
//! alignment.
//!
//! Assemble a model (states, transitions with per-position score
//! calculators, shadows, spans, portals), close it, and drive one of the
//! DP engines over it: the exhaustive [`Viterbi`] lattice sweep with
//! reduced-space path reconstruction, or the sparse, seed-driven [`Sdp`]
//! with X-drop pruning and span memoization.

pub use tdp_model::{
    Alignment, AlignmentOp, Calc, CalcDef, CalcFn, CalcId, DerivedModel, Label, Model,
    ModelBuilder, ModelError, Portal, PortalId, Scope, Shadow, ShadowId, Span, SpanId, State,
    StateId, SubOpt, SubOptIndex, Transition, TransitionId, END, START,
};
pub use tdp_sdp::{
    build_seed_list, Boundary, Hsp, STraceback, Scheduler, SchedulerPair, Sdp, SdpPair, SeedSource,
};
pub use tdp_types::{
    DpParams, Region, Score, Seq, I, IMPOSSIBLY_HIGH, IMPOSSIBLY_LOW, Protect,
};
pub use tdp_viterbi::{Layout, Mode, PathFinder, SubAlignment, Viterbi, ViterbiData};

#[cfg(test)]
mod tests;
