//! Exhaustive Viterbi DP over a transducer model, with boundary-mask
//! pre-analysis and reduced-space (checkpointed) path reconstruction.

mod checkpoint;
mod layout;
mod viterbi;

pub use checkpoint::{PathFinder, SubAlignment};
pub use layout::{scope_check, Layout};
pub use viterbi::{Mode, Viterbi, ViterbiData};
