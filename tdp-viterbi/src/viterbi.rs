//! The exhaustive lattice DP.
//!
//! Interpreted sweep over the full `(Q+1) x (T+1)` lattice: rows in target
//! order, columns in query order, transitions in model order, with a
//! rolling window of `max_target_advance + 1` rows. Mode selects what is
//! recorded besides the score.

use std::sync::Arc;

use log::debug;

use tdp_model::{Alignment, Model, Scope, StateId, SubOptIndex, TransitionId, END, START};
use tdp_types::{matrix3_size, matrix4_size, DpParams, Matrix3, Region, Score, I, IMPOSSIBLY_LOW};

use crate::layout::Layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ScoreOnly,
    FindRegion,
    FindPath,
    FindCheckpoints,
}

/// Sentinel in the traceback matrix for "no transition recorded".
const NO_TRANSITION: u32 = u32::MAX;

/// An exhaustive DP engine for one closed model.
pub struct Viterbi<U> {
    model: Arc<Model<U>>,
    layout: Layout,
    mode: Mode,
    use_continuation: bool,
    cell_size: usize,
    region_start_query_slot: Option<usize>,
    region_start_target_slot: Option<usize>,
    params: DpParams,
}

/// Caller-supplied boundary cell pair for a resumed DP.
struct Continuation {
    first_state: StateId,
    first_cell: Vec<Score>,
    final_state: StateId,
    final_cell: Vec<Score>,
}

pub(crate) struct Checkpoint {
    /// One snapshot matrix per checkpoint row:
    /// `max_target_advance x (Q+1) x states x cell_size`.
    pub matrices: Vec<Vec<Score>>,
    pub section_length: I,
    pub counter: usize,
    pub last_srp: Score,
}

/// Per-call DP state: the rolling window plus mode-dependent recordings.
pub struct ViterbiData {
    pub region: Region,
    cell_size: usize,
    window: Vec<Vec<Score>>,
    traceback: Option<Matrix3<u32>>,
    pub(crate) checkpoint: Option<Checkpoint>,
    continuation: Option<Continuation>,
    pub curr_query_start: I,
    pub curr_target_start: I,
    pub curr_query_end: I,
    pub curr_target_end: I,
    best: Score,
    end_seen: bool,
}

impl<U> Viterbi<U> {
    /// Build an engine. With `use_continuation` the model is copied and its
    /// terminal scopes forced to CORNER, so a resumed DP spans its region
    /// corner to corner.
    pub fn new(model: &Arc<Model<U>>, mode: Mode, use_continuation: bool, params: DpParams) -> Viterbi<U> {
        let model = if use_continuation {
            let mut builder = model.reopen();
            builder.configure_start_state(Scope::Corner, model.start.cell_start);
            builder.configure_end_state(Scope::Corner, model.end.cell_end);
            Arc::new(builder.close().expect("reopened model closes"))
        } else {
            Arc::clone(model)
        };
        let mut cell_size = 1 + model.total_shadow_designations;
        let mut region_start_query_slot = None;
        let mut region_start_target_slot = None;
        if mode == Mode::FindRegion && model.start.scope != Scope::Corner {
            if model.start.scope != Scope::Query {
                region_start_query_slot = Some(cell_size);
                cell_size += 1;
            }
            if model.start.scope != Scope::Target {
                region_start_target_slot = Some(cell_size);
                cell_size += 1;
            }
        }
        if mode == Mode::FindCheckpoints {
            assert!(model.max_target_advance > 0);
            cell_size += 1; // SRP slot, always last
        }
        let layout = Layout::new(&model);
        Viterbi {
            layout,
            mode,
            use_continuation,
            cell_size,
            region_start_query_slot,
            region_start_target_slot,
            params,
            model,
        }
    }

    pub fn model(&self) -> &Arc<Model<U>> {
        &self.model
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    /// Rolling-window size in bytes, `None` on overflow.
    fn row_bytes(&self, region: &Region) -> Option<usize> {
        matrix4_size(
            self.model.max_target_advance as usize + 1,
            region.query_length as usize + 1,
            self.model.states.len(),
            self.cell_size,
            std::mem::size_of::<Score>(),
        )
    }

    fn traceback_bytes(&self, region: &Region) -> Option<usize> {
        matrix3_size(
            region.query_length as usize + 1,
            region.target_length as usize + 1,
            self.model.states.len(),
            std::mem::size_of::<u32>(),
        )
    }

    /// Policy: checkpointed traceback instead of a full traceback matrix.
    /// Small regions always go direct; size-computation overflow always
    /// goes reduced; otherwise compare against the memory budget.
    pub fn use_reduced_space(&self, region: &Region) -> bool {
        if region.query_length <= self.model.max_query_advance * 6 {
            return false;
        }
        if region.target_length <= self.model.max_target_advance * 6 {
            return false;
        }
        match (self.row_bytes(region), self.traceback_bytes(region)) {
            (Some(row), Some(traceback)) => {
                row + traceback > self.params.traceback_memory_bytes()
            }
            _ => true,
        }
    }

    fn checkpoint_rows(&self, region: &Region) -> usize {
        let row = self.row_bytes(region).expect("window size overflows the address space");
        let avail = (self.params.traceback_memory_bytes() / row).saturating_sub(1);
        let max_rows = (region.target_length / (self.model.max_target_advance * 2)) as usize;
        let max_rows = max_rows.saturating_sub(2);
        assert!(max_rows > 0);
        avail.clamp(1, max_rows)
    }

    #[inline]
    fn cell_base(&self, col: I, state: usize) -> usize {
        (col as usize * self.model.states.len() + state) * self.cell_size
    }

    /// Run the DP over `data`'s region. Returns the best score,
    /// `IMPOSSIBLY_LOW` when no path fits the scopes.
    pub fn calculate(
        &self,
        data: &mut ViterbiData,
        user: &mut U,
        mut subopt: Option<&mut SubOptIndex>,
    ) -> Score {
        let model = &*self.model;
        let region = data.region;
        let query_length = region.query_length;
        let target_length = region.target_length;
        let states = model.states.len();
        let cs = self.cell_size;
        assert_eq!(data.cell_size, cs, "data built for another engine");
        assert_eq!(
            self.use_continuation,
            data.continuation.is_some(),
            "continuation engines take continuation data"
        );
        model.run_init_hooks(&region, user);

        let final_state = data.continuation.as_ref().map_or(END, |c| c.final_state);
        let mut state_is_set = vec![false; states];
        let mut src_buf = vec![0 as Score; cs];
        let mut start_buf = vec![0 as Score; cs];

        for j in 0..=target_length {
            if let Some(soi) = subopt.as_mut() {
                soi.set_row(j);
            }
            for i in 0..=query_length {
                for (k, set) in state_is_set.iter_mut().enumerate() {
                    *set = false;
                    data.window[0][self.cell_base(i, k)] = IMPOSSIBLY_LOW;
                }
                if i == 0 && j == 0 {
                    if let Some(continuation) = &data.continuation {
                        let base = self.cell_base(0, continuation.first_state.0);
                        let cell = &mut data.window[0][base..base + cs];
                        let shared = continuation.first_cell.len().min(cs);
                        cell[..shared].copy_from_slice(&continuation.first_cell[..shared]);
                        state_is_set[continuation.first_state.0] = true;
                    }
                }
                for t_index in 0..model.transitions.len() {
                    let transition = &model.transitions[t_index];
                    if !self.layout.is_transition_valid(
                        model,
                        TransitionId(t_index),
                        i,
                        j,
                        query_length,
                        target_length,
                    ) {
                        continue;
                    }
                    if transition.is_match() {
                        if let Some(soi) = subopt.as_deref() {
                            if soi.is_blocked(i) {
                                continue;
                            }
                        }
                    }
                    let src_query = region.query_start + i - transition.advance_query;
                    let src_target = region.target_start + j - transition.advance_target;
                    let from_start = transition.input == START;
                    // Gather the src cell; fresh starts score 0 (or via
                    // `cell_start`) unless a continuation disables them.
                    let mut score;
                    if from_start && data.continuation.is_none() {
                        if let Some(cell_start) = model.start.cell_start {
                            start_buf.fill(0);
                            cell_start(src_query, src_target, user, &mut start_buf);
                            src_buf.copy_from_slice(&start_buf);
                            score = src_buf[0];
                        } else {
                            let base = self.cell_base(i - transition.advance_query, START.0);
                            let row = &data.window[transition.advance_target as usize];
                            src_buf.copy_from_slice(&row[base..base + cs]);
                            score = 0;
                        }
                    } else {
                        let base =
                            self.cell_base(i - transition.advance_query, transition.input.0);
                        let row = &data.window[transition.advance_target as usize];
                        src_buf.copy_from_slice(&row[base..base + cs]);
                        score = src_buf[0];
                    }
                    // Shadow pops fire per candidate evaluation.
                    for &sh in &transition.dst_shadows {
                        let shadow = model.shadow(sh);
                        (shadow.end)(src_buf[1 + shadow.designation], src_query, src_target, user);
                    }
                    score += model.calc_score(transition.calc, src_query, src_target, user);
                    if let Some(calc) = transition.calc {
                        score = model.calcs[calc.0].protect.apply(score);
                    }
                    let dst_base = self.cell_base(i, transition.output.0);
                    let accept = if state_is_set[transition.output.0] {
                        data.window[0][dst_base] < score
                    } else {
                        true
                    };
                    if !accept {
                        continue;
                    }
                    state_is_set[transition.output.0] = true;
                    if from_start {
                        if let Some(slot) = self.region_start_query_slot {
                            src_buf[slot] = i - transition.advance_query;
                        }
                        if let Some(slot) = self.region_start_target_slot {
                            src_buf[slot] = j - transition.advance_target;
                        }
                    }
                    for &sh in &model.state(transition.input).src_shadows {
                        let shadow = model.shadow(sh);
                        src_buf[1 + shadow.designation] =
                            (shadow.start)(src_query, src_target, user);
                    }
                    let dst = &mut data.window[0][dst_base..dst_base + cs];
                    dst[0] = score;
                    dst[1..].copy_from_slice(&src_buf[1..]);
                    if let Some(traceback) = &mut data.traceback {
                        *traceback.at_mut(i as usize, j as usize, transition.output.0) =
                            t_index as u32;
                    }
                }
                // End registration.
                if state_is_set[END.0] {
                    if data.continuation.is_none() {
                        let base = self.cell_base(i, final_state.0);
                        let candidate = data.window[0][base];
                        if !data.end_seen || data.best < candidate {
                            data.best = candidate;
                            data.end_seen = true;
                            self.register_end(data, i, j);
                        }
                    }
                    if let Some(cell_end) = model.end.cell_end {
                        let base = self.cell_base(i, END.0);
                        let cell = &data.window[0][base..base + cs];
                        cell_end(cell, region.query_start + i, region.target_start + j, user);
                    }
                }
                if data.continuation.is_some() && i == query_length && j == target_length {
                    let base = self.cell_base(i, final_state.0);
                    data.best = data.window[0][base];
                    data.end_seen = true;
                    self.register_end(data, i, j);
                    let cell: Vec<Score> = data.window[0][base..base + cs].to_vec();
                    data.continuation.as_mut().unwrap().final_cell = cell;
                }
            }
            if self.mode == Mode::FindCheckpoints && j == target_length {
                let base = self.cell_base(query_length, final_state.0);
                data.checkpoint.as_mut().unwrap().last_srp = data.window[0][base + cs - 1];
            }
            self.checkpoint_process(data, j);
            if j < target_length {
                data.window.rotate_right(1);
            }
        }
        model.run_exit_hooks(&region, user);
        // When no path fits the scopes the fence value comes back.
        data.best
    }

    fn register_end(&self, data: &mut ViterbiData, i: I, j: I) {
        data.curr_query_end = i;
        data.curr_target_end = j;
        let base = self.cell_base(i, data.continuation.as_ref().map_or(END, |c| c.final_state).0);
        if let Some(slot) = self.region_start_query_slot {
            data.curr_query_start = data.window[0][base + slot];
        }
        if let Some(slot) = self.region_start_target_slot {
            data.curr_target_start = data.window[0][base + slot];
        }
    }

    /// At section boundaries, snapshot the window's most recent rows and
    /// re-stamp their SRP slots so the codes propagate onward.
    fn checkpoint_process(&self, data: &mut ViterbiData, target_pos: I) {
        if self.mode != Mode::FindCheckpoints || target_pos == 0 {
            return;
        }
        let states = self.model.states.len();
        let mta = self.model.max_target_advance as usize;
        let cs = self.cell_size;
        let columns = data.region.query_length as usize + 1;
        let Some(checkpoint) = &mut data.checkpoint else { return };
        if target_pos % checkpoint.section_length != 0 || checkpoint.counter >= checkpoint.matrices.len()
        {
            return;
        }
        let matrix = &mut checkpoint.matrices[checkpoint.counter];
        checkpoint.counter += 1;
        for row in 0..mta {
            let window_row = &mut data.window[row];
            let row_base = row * columns * states * cs;
            matrix[row_base..row_base + columns * states * cs]
                .copy_from_slice(&window_row[..columns * states * cs]);
            for col in 0..columns {
                for state in 0..states {
                    let base = (col * states + state) * cs;
                    window_row[base + cs - 1] =
                        srp_encode(states, mta, state, row, col);
                }
            }
        }
    }

    /// Walk the FindPath traceback into a run-length encoded alignment.
    pub fn extract_alignment(&self, data: &ViterbiData) -> Alignment {
        let traceback = data.traceback.as_ref().expect("alignment needs FindPath mode");
        let mut i = data.curr_query_end;
        let mut j = data.curr_target_end;
        let mut state = data.continuation.as_ref().map_or(END, |c| c.final_state);
        let mut path: Vec<TransitionId> = Vec::new();
        loop {
            let raw = *traceback.at(i as usize, j as usize, state.0);
            if raw == NO_TRANSITION {
                break;
            }
            let id = TransitionId(raw as usize);
            path.push(id);
            let transition = self.model.transition(id);
            i -= transition.advance_query;
            j -= transition.advance_target;
            state = transition.input;
            if state == START {
                break;
            }
            if let Some(continuation) = &data.continuation {
                if i == 0 && j == 0 && state == continuation.first_state {
                    break;
                }
            }
        }
        let region = Region::new(
            data.region.query_start + i,
            data.region.target_start + j,
            data.curr_query_end - i,
            data.curr_target_end - j,
        );
        let mut alignment = Alignment::new(region, data.best);
        for &t in path.iter().rev() {
            alignment.add(t, 1);
        }
        alignment
    }

    /// The alignment region found by a FindRegion run, in absolute
    /// coordinates.
    pub fn region_result(&self, data: &ViterbiData) -> Region {
        let mut query_start = data.region.query_start;
        let mut target_start = data.region.target_start;
        if self.region_start_query_slot.is_some() {
            query_start = data.region.query_start + data.curr_query_start;
        }
        if self.region_start_target_slot.is_some() {
            target_start = data.region.target_start + data.curr_target_start;
        }
        Region::new(
            query_start,
            target_start,
            data.curr_query_end - data.curr_query_start,
            data.curr_target_end - data.curr_target_start,
        )
    }
}

impl ViterbiData {
    pub fn new<U>(viterbi: &Viterbi<U>, region: &Region) -> ViterbiData {
        let states = viterbi.model.states.len();
        let cs = viterbi.cell_size;
        let columns = region.query_length as usize + 1;
        let row_len = columns * states * cs;
        let window_rows = viterbi.model.max_target_advance as usize + 1;
        let mut window = vec![vec![0 as Score; row_len]; window_rows];
        for row in &mut window {
            for state in 0..columns * states {
                row[state * cs] = IMPOSSIBLY_LOW;
            }
        }
        let traceback = (viterbi.mode == Mode::FindPath).then(|| {
            Matrix3::new(columns, region.target_length as usize + 1, states, NO_TRANSITION)
        });
        let checkpoint = (viterbi.mode == Mode::FindCheckpoints).then(|| {
            let count = viterbi.checkpoint_rows(region);
            let mta = viterbi.model.max_target_advance as usize;
            debug!(
                "checkpointed traceback: {} snapshots over target length {}",
                count, region.target_length
            );
            Checkpoint {
                matrices: vec![vec![0 as Score; mta * row_len]; count],
                section_length: region.target_length / (count as I + 1),
                counter: 0,
                last_srp: 0,
            }
        });
        ViterbiData {
            region: *region,
            cell_size: cs,
            window,
            traceback,
            checkpoint,
            continuation: None,
            curr_query_start: 0,
            curr_target_start: 0,
            curr_query_end: 0,
            curr_target_end: 0,
            best: IMPOSSIBLY_LOW,
            end_seen: false,
        }
    }

    /// Resume from a caller-supplied boundary cell: `first_cell` seeds
    /// lattice cell `(0, 0, first_state)`, fresh starts are disabled, and
    /// the end is read at `(Q, T, final_state)`.
    pub fn set_continuation(&mut self, first_state: StateId, first_cell: &[Score], final_state: StateId) {
        assert!(self.continuation.is_none());
        self.continuation = Some(Continuation {
            first_state,
            first_cell: first_cell.to_vec(),
            final_state,
            final_cell: vec![0; self.cell_size],
        });
    }

    pub fn clear_continuation(&mut self) {
        self.continuation = None;
    }

    /// The `(Q, T, final_state)` cell captured by a continuation run.
    pub fn final_cell(&self) -> &[Score] {
        &self.continuation.as_ref().expect("not a continuation run").final_cell
    }
}

/// Pack `(state, window_row, query_pos)` into one score-typed code.
#[inline]
pub(crate) fn srp_encode(states: usize, mta: usize, state: usize, row: usize, pos: usize) -> Score {
    let code = ((pos * states + state) * mta + row) as Score;
    debug_assert_eq!(srp_decode(states, mta, code), (state, row, pos));
    code
}

#[inline]
pub(crate) fn srp_decode(states: usize, mta: usize, srp: Score) -> (usize, usize, usize) {
    let srp = srp as usize;
    let row = srp % mta;
    let rest = srp / mta;
    (rest % states, row, rest / states)
}
