//! Seeded dynamic programming: a sparse, priority-limited DP that grows
//! alignments from HSP anchors under an X-drop, with span memoization,
//! bidirectional start/end discovery and subopt-blocked enumeration.

mod boundary;
mod cache;
mod lookahead;
mod pair;
mod scheduler;
mod seeds;
mod straceback;

pub use boundary::{Boundary, BoundaryRow, BoundaryRun};
pub use cache::SparseCache;
pub use lookahead::Lookahead;
pub use pair::{Sdp, SdpPair};
pub use scheduler::{Scheduler, SchedulerCell, SchedulerPair, SchedulerRow};
pub use seeds::{build_seed_list, Hsp, SchedulerSeed, SdpSeed, SeedListSource, SeedSource, Terminal};
pub use straceback::{CellRef, STraceback};
