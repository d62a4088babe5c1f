//! Reduced-space path reconstruction.
//!
//! A FindCheckpoints run leaves one snapshot of the rolling window per
//! section boundary, with SRP codes threaded through the remaining sweep.
//! Decoding them back yields one [`SubAlignment`] per section; each section
//! is then re-run as a continuation DP (recursing into checkpoints again
//! when a section still exceeds the memory budget).

use std::sync::Arc;

use log::debug;

use tdp_model::{Alignment, Model, StateId, SubOpt, SubOptIndex, TransitionId, END, START};
use tdp_types::{DpParams, Region, Score, I};

use crate::viterbi::{srp_decode, Mode, Viterbi, ViterbiData};

/// One section of a checkpointed traceback: where it starts, in which
/// state, and the cell contents at its end point.
#[derive(Debug, Clone)]
pub struct SubAlignment {
    pub region: Region,
    pub first_state: StateId,
    pub final_cell: Vec<Score>,
}

impl<U> Viterbi<U> {
    /// Decode the snapshots of a finished FindCheckpoints run into
    /// per-section sub-alignments, in forward target order.
    pub fn checkpoint_subalignments(
        &self,
        data: &ViterbiData,
        first_state: StateId,
    ) -> Vec<SubAlignment> {
        let model = self.model();
        let states = model.states.len();
        let mta = model.max_target_advance as usize;
        let cs = self.cell_size();
        let region = data.region;
        let checkpoint = data.checkpoint.as_ref().expect("needs a FindCheckpoints run");
        let snapshots = checkpoint.counter;
        let columns = region.query_length as usize + 1;
        let cell_of = |matrix: &Vec<Score>, row: usize, col: I, state: StateId| -> Vec<Score> {
            let base = ((row * columns + col as usize) * states + state.0) * cs;
            matrix[base..base + cs].to_vec()
        };

        let (mut state, mut row, mut pos) = srp_decode(states, mta, checkpoint.last_srp);
        let mut query_start = region.query_start + pos as I;
        let mut target_start =
            region.target_start + checkpoint.section_length * snapshots as I - row as I;
        let mut sections = vec![SubAlignment {
            region: Region::new(
                query_start,
                target_start,
                region.query_end() - query_start,
                region.target_end() - target_start,
            ),
            first_state: StateId(state),
            final_cell: data.final_cell().to_vec(),
        }];
        for index in (1..snapshots).rev() {
            let matrix = &checkpoint.matrices[index];
            let prev_row = row;
            let later = sections.last().unwrap();
            let later_query_start = later.region.query_start;
            let later_target_start = later.region.target_start;
            let later_state = later.first_state;
            let cell = cell_of(matrix, prev_row, later_query_start - region.query_start, later_state);
            let srp = cell[cs - 1];
            (state, row, pos) = srp_decode(states, mta, srp);
            query_start = region.query_start + pos as I;
            target_start =
                later_target_start - checkpoint.section_length - row as I + prev_row as I;
            let section = SubAlignment {
                region: Region::new(
                    query_start,
                    target_start,
                    later_query_start - query_start,
                    later_target_start - target_start,
                ),
                first_state: StateId(state),
                final_cell: cell,
            };
            debug_assert!(region.contains(&section.region));
            sections.push(section);
        }
        // Section zero runs from the region corner to the last decoded
        // crossing, ending on the cell stored in the first snapshot.
        let matrix = &checkpoint.matrices[0];
        let later = sections.last().unwrap();
        let cell = cell_of(matrix, row, later.region.query_start - region.query_start, later.first_state);
        sections.push(SubAlignment {
            region: Region::new(
                region.query_start,
                region.target_start,
                query_start - region.query_start,
                target_start - region.target_start,
            ),
            first_state,
            final_cell: cell,
        });
        sections.reverse();
        sections
    }
}

/// Full-path reconstruction with the direct/reduced-space policy applied
/// per region, recursively.
pub struct PathFinder<U> {
    direct: Viterbi<U>,
    reduced: Viterbi<U>,
}

impl<U> PathFinder<U> {
    pub fn new(model: &Arc<Model<U>>, params: DpParams) -> PathFinder<U> {
        PathFinder {
            direct: Viterbi::new(model, Mode::FindPath, true, params),
            reduced: Viterbi::new(model, Mode::FindCheckpoints, true, params),
        }
    }

    pub fn model(&self) -> &Arc<Model<U>> {
        self.direct.model()
    }

    /// Corner-to-corner path over `region`. The alignment's ops span the
    /// whole region; its score is the continuation DP's end score.
    pub fn find_path(&self, region: &Region, user: &mut U, subopt: Option<&SubOpt>) -> (Score, Alignment) {
        let model = self.direct.model();
        let mut first_cell = vec![0 as Score; self.direct.cell_size().max(self.reduced.cell_size())];
        if let Some(cell_start) = model.start.cell_start {
            let width = self.direct.cell_size();
            cell_start(region.query_start, region.target_start, user, &mut first_cell[..width]);
        }
        let mut ops: Vec<(TransitionId, I)> = Vec::new();
        let score = self.solve(region, START, &first_cell, END, user, subopt, &mut ops);
        let mut alignment = Alignment::new(*region, score);
        for (transition, length) in ops {
            alignment.add(transition, length);
        }
        debug_assert!(alignment.is_valid(model));
        (score, alignment)
    }

    /// Force one of the two routes; the policy test in `find_path` uses
    /// [`Viterbi::use_reduced_space`] instead.
    pub fn find_path_forced(
        &self,
        region: &Region,
        user: &mut U,
        subopt: Option<&SubOpt>,
        reduced: bool,
    ) -> (Score, Alignment) {
        let model = self.direct.model();
        let mut first_cell = vec![0 as Score; self.direct.cell_size().max(self.reduced.cell_size())];
        if let Some(cell_start) = model.start.cell_start {
            let width = self.direct.cell_size();
            cell_start(region.query_start, region.target_start, user, &mut first_cell[..width]);
        }
        let mut ops: Vec<(TransitionId, I)> = Vec::new();
        let score = if reduced {
            self.solve_reduced(region, START, &first_cell, END, user, subopt, &mut ops)
        } else {
            self.solve_direct(region, START, &first_cell, END, user, subopt, &mut ops)
        };
        let mut alignment = Alignment::new(*region, score);
        for (transition, length) in ops {
            alignment.add(transition, length);
        }
        (score, alignment)
    }

    #[allow(clippy::too_many_arguments)]
    fn solve(
        &self,
        region: &Region,
        first_state: StateId,
        first_cell: &[Score],
        final_state: StateId,
        user: &mut U,
        subopt: Option<&SubOpt>,
        ops: &mut Vec<(TransitionId, I)>,
    ) -> Score {
        if self.direct.use_reduced_space(region) {
            self.solve_reduced(region, first_state, first_cell, final_state, user, subopt, ops)
        } else {
            self.solve_direct(region, first_state, first_cell, final_state, user, subopt, ops)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn solve_direct(
        &self,
        region: &Region,
        first_state: StateId,
        first_cell: &[Score],
        final_state: StateId,
        user: &mut U,
        subopt: Option<&SubOpt>,
        ops: &mut Vec<(TransitionId, I)>,
    ) -> Score {
        let mut data = ViterbiData::new(&self.direct, region);
        data.set_continuation(first_state, first_cell, final_state);
        let mut index = subopt.map(|s| SubOptIndex::new(s, region));
        let score = self.direct.calculate(&mut data, user, index.as_mut());
        let alignment = self.direct.extract_alignment(&data);
        for op in alignment.ops {
            ops.push((op.transition, op.length));
        }
        score
    }

    #[allow(clippy::too_many_arguments)]
    fn solve_reduced(
        &self,
        region: &Region,
        first_state: StateId,
        first_cell: &[Score],
        final_state: StateId,
        user: &mut U,
        subopt: Option<&SubOpt>,
        ops: &mut Vec<(TransitionId, I)>,
    ) -> Score {
        debug!(
            "reduced-space traceback over {}x{}",
            region.query_length, region.target_length
        );
        let mut data = ViterbiData::new(&self.reduced, region);
        data.set_continuation(first_state, first_cell, final_state);
        let mut index = subopt.map(|s| SubOptIndex::new(s, region));
        let score = self.reduced.calculate(&mut data, user, index.as_mut());
        let sections = self.reduced.checkpoint_subalignments(&data, first_state);
        let mut cell = first_cell.to_vec();
        for (k, section) in sections.iter().enumerate() {
            let next_state = match sections.get(k + 1) {
                Some(next) => next.first_state,
                None => final_state,
            };
            self.solve(&section.region, section.first_state, &cell, next_state, user, subopt, ops);
            cell = section.final_cell.clone();
        }
        score
    }
}
