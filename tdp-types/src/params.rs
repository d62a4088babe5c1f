use serde::{Deserialize, Serialize};

use crate::Score;

/// Tuning knobs shared by the DP engines.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpParams {
    /// Maximum memory to use for DP tracebacks, in MiB.
    #[serde(default = "default_traceback_memory_limit")]
    pub traceback_memory_limit: usize,

    /// X-drop threshold for seeded extension.
    #[serde(default = "default_dropoff")]
    pub dropoff: Score,

    /// Enumerate suboptimal alignments from a single pre-computed boundary
    /// instead of re-running start/end discovery per alignment.
    #[serde(default = "default_single_pass_subopt")]
    pub single_pass_subopt: bool,
}

fn default_traceback_memory_limit() -> usize {
    32
}

fn default_dropoff() -> Score {
    50
}

fn default_single_pass_subopt() -> bool {
    true
}

impl Default for DpParams {
    fn default() -> DpParams {
        DpParams {
            traceback_memory_limit: default_traceback_memory_limit(),
            dropoff: default_dropoff(),
            single_pass_subopt: default_single_pass_subopt(),
        }
    }
}

impl DpParams {
    /// Traceback memory budget in bytes.
    pub fn traceback_memory_bytes(&self) -> usize {
        self.traceback_memory_limit << 20
    }
}
