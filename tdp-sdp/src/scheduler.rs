//! The sparse, seed-driven counterpart of the exhaustive DP.
//!
//! Cells exist only where a seed grew under the X-drop. Rows keyed by
//! target position live in a ring window of height `max_target_advance`;
//! each row windows its cells over `max_query_advance` columns and queues
//! pending seeds (`unused`) and finished cells (`used`, recycled).

use std::collections::VecDeque;
use std::sync::Arc;

use log::trace;

use tdp_model::{Model, Span, SubOpt, SubOptIndex, TransitionId, END, START};
use tdp_types::{Region, Score, I, IMPOSSIBLY_LOW};

use crate::boundary::Boundary;
use crate::cache::SparseCache;
use crate::lookahead::{Lookahead, MASK_WIDTH};
use crate::seeds::{SchedulerSeed, SeedSource};
use crate::straceback::{CellRef, STraceback};

/// Stripe slots before the shadow slots: current, max-seen, seed id.
const SHADOW_START: usize = 3;

/// One direction of a seeded DP over a model.
pub struct Scheduler<U> {
    pub model: Arc<Model<U>>,
    pub is_forward: bool,
    pub has_traceback: bool,
    pub use_boundary: bool,
    /// Report best starts per seed (reverse, non-boundary passes only).
    pub record_starts: bool,
    /// Report best ends per seed (forward passes only).
    pub record_ends: bool,
    dropoff: Score,
    span_of_state: Vec<Option<usize>>,
    is_span_loop: Vec<bool>,
    stripe: usize,
}

impl<U> Scheduler<U> {
    pub fn new(
        model: &Arc<Model<U>>,
        is_forward: bool,
        has_traceback: bool,
        use_boundary: bool,
        record_starts: bool,
        record_ends: bool,
        dropoff: Score,
    ) -> Scheduler<U> {
        assert!(!(is_forward && record_starts));
        assert!(!(use_boundary && record_starts));
        assert!(is_forward || !record_ends);
        assert!(!record_starts || has_traceback);
        assert!(!record_ends || has_traceback);
        let mut span_of_state = vec![None; model.states.len()];
        for (index, span) in model.spans.iter().enumerate() {
            span_of_state[span.span_state.0] = Some(index);
        }
        let mut is_span_loop = vec![false; model.transitions.len()];
        for span in &model.spans {
            for t in [span.query_loop, span.target_loop].into_iter().flatten() {
                is_span_loop[t.0] = true;
            }
        }
        Scheduler {
            model: Arc::clone(model),
            is_forward,
            has_traceback,
            use_boundary,
            record_starts,
            record_ends,
            dropoff,
            span_of_state,
            is_span_loop,
            stripe: SHADOW_START + model.total_shadow_designations,
        }
    }
}

/// A sparse DP cell: per-state stripes `[current, max_seen, seed_id,
/// shadow slots...]` and per-state traceback refs.
pub struct SchedulerCell {
    pub query_pos: I,
    permit_span_thaw: bool,
    scores: Vec<Score>,
    traceback: Vec<Option<CellRef>>,
}

impl SchedulerCell {
    #[inline]
    fn stripe(&self, state: usize, stripe: usize) -> &[Score] {
        &self.scores[state * stripe..(state + 1) * stripe]
    }
}

pub struct SchedulerRow {
    pub target_pos: I,
    cells: Lookahead<SchedulerCell>,
    unused: VecDeque<SchedulerCell>,
    used: Vec<SchedulerCell>,
}

/// A frozen span-state stripe, keyed in the cache by its entry column.
struct SpanSeed {
    score: Score,
    max: Score,
    seed_id: Score,
    query_entry: I,
    target_entry: I,
    cell: Option<CellRef>,
    shadows: Vec<Score>,
}

impl SpanSeed {
    fn clone_shared(&self, straceback: &mut STraceback) -> SpanSeed {
        SpanSeed {
            score: self.score,
            max: self.max,
            seed_id: self.seed_id,
            query_entry: self.query_entry,
            target_entry: self.target_entry,
            cell: self.cell.map(|c| straceback.share(c)),
            shadows: self.shadows.clone(),
        }
    }

    fn release(self, straceback: &mut STraceback) {
        if let Some(cell) = self.cell {
            straceback.unref(cell);
        }
    }
}

/// One seeded DP run over a sequence pair.
pub struct SchedulerPair<'a, U> {
    scheduler: &'a Scheduler<U>,
    region: Region,
    rows: Lookahead<SchedulerRow>,
    straceback: Option<&'a mut STraceback>,
    boundary: Option<&'a mut Boundary>,
    span_cache: Option<SparseCache<SpanSeed>>,
    span_curr: Vec<Option<SpanSeed>>,
    subopt: Option<SubOptIndex>,
    pool: Vec<SchedulerCell>,
    buf: Vec<Score>,
}

impl<'a, U> SchedulerPair<'a, U> {
    pub fn new(
        scheduler: &'a Scheduler<U>,
        query_length: I,
        target_length: I,
        subopt: Option<&SubOpt>,
        boundary: Option<&'a mut Boundary>,
        straceback: Option<&'a mut STraceback>,
    ) -> SchedulerPair<'a, U> {
        assert_eq!(scheduler.has_traceback, straceback.is_some());
        assert!(boundary.is_none() || (scheduler.use_boundary && !scheduler.is_forward));
        let model = &scheduler.model;
        assert!((model.max_query_advance as usize) < MASK_WIDTH - 1);
        assert!((model.max_target_advance as usize) < MASK_WIDTH - 1);
        let region = Region::new(0, 0, query_length, target_length);
        let rows = Lookahead::new(
            if scheduler.is_forward { 0 } else { -target_length },
            model.max_target_advance as usize,
        );
        let span_cache = (scheduler.use_boundary && scheduler.is_forward && !model.spans.is_empty())
            .then(|| SparseCache::new(query_length as usize + 1, model.spans.len()));
        let subopt = subopt.map(|s| SubOptIndex::new(s, &region));
        SchedulerPair {
            scheduler,
            region,
            rows,
            straceback,
            boundary,
            span_cache,
            span_curr: (0..model.spans.len()).map(|_| None).collect(),
            subopt,
            pool: Vec::new(),
            buf: vec![0; scheduler.stripe],
        }
    }

    /// Run the pass to exhaustion of seeds and live rows.
    pub fn calculate(&mut self, source: &mut dyn SeedSource, user: &mut U) {
        let scheduler = self.scheduler;
        let model = &*scheduler.model;
        let max_target_advance = model.max_target_advance;
        model.run_init_hooks(&self.region, user);
        source.init();
        loop {
            if self.rows.is_empty() {
                let Some(seed) = source.peek() else { break };
                let mut row = self.new_row(seed.target_pos);
                self.row_add_seed(&mut row, &seed);
                self.rows.move_to(seed.target_pos, |_| unreachable!());
                self.rows.set(0, row);
                source.advance();
            }
            // Admit pending seeds within the row window.
            let first_target = self.rows.pos();
            while let Some(seed) = source.peek() {
                if seed.target_pos - first_target > max_target_advance {
                    break;
                }
                self.pair_add_seed(&seed);
                source.advance();
            }
            self.reset_rows();
            let mut row = self.rows.take(0).expect("origin row occupied");
            trace!("processing row at target {}", row.target_pos);
            self.process_row(&mut row, source, user);
            self.rows.set(0, row);
            let mut evicted = Vec::new();
            self.rows.next(|row| evicted.push(row));
            for row in evicted {
                self.destroy_row(row);
            }
        }
        let mut leftover = Vec::new();
        self.rows.reset(|row| leftover.push(row));
        for row in leftover {
            self.destroy_row(row);
        }
        // Release whatever the span machinery still holds.
        if let Some(mut cache) = self.span_cache.take() {
            let straceback = self.straceback.as_deref_mut().unwrap();
            cache.drain(|seed| seed.release(straceback));
        }
        for index in 0..self.span_curr.len() {
            if let Some(seed) = self.span_curr[index].take() {
                seed.release(self.straceback.as_deref_mut().unwrap());
            }
        }
        model.run_exit_hooks(&self.region, user);
    }

    fn new_row(&self, target_pos: I) -> SchedulerRow {
        let scheduler = self.scheduler;
        if scheduler.is_forward {
            debug_assert!(target_pos >= 0);
        } else {
            debug_assert!(target_pos <= 0);
        }
        SchedulerRow {
            target_pos,
            cells: Lookahead::new(
                if scheduler.is_forward { 0 } else { -self.region.query_end() },
                scheduler.model.max_query_advance as usize,
            ),
            unused: VecDeque::new(),
            used: Vec::new(),
        }
    }

    fn alloc_cell(&mut self, query_pos: I, permit_span_thaw: bool) -> SchedulerCell {
        let scheduler = self.scheduler;
        let states = scheduler.model.states.len();
        let stripe = scheduler.stripe;
        let mut cell = self.pool.pop().unwrap_or_else(|| SchedulerCell {
            query_pos: 0,
            permit_span_thaw: false,
            scores: vec![0; states * stripe],
            traceback: vec![None; if scheduler.has_traceback { states } else { 0 }],
        });
        cell.query_pos = query_pos;
        cell.permit_span_thaw = permit_span_thaw;
        cell.scores.fill(0);
        for state in 0..states {
            cell.scores[state * stripe] = IMPOSSIBLY_LOW;
        }
        debug_assert!(cell.traceback.iter().all(|t| t.is_none()));
        cell
    }

    /// Place a cell into a column window, merging stripes state-by-state
    /// when a cell already occupies the slot.
    fn merge_or_set(&mut self, window: &mut Lookahead<SchedulerCell>, offset: usize, mut cell: SchedulerCell) {
        let scheduler = self.scheduler;
        let stripe = scheduler.stripe;
        let Some(existing) = window.get_mut(offset) else {
            window.set(offset, cell);
            return;
        };
        debug_assert_eq!(existing.query_pos, cell.query_pos);
        for state in 0..scheduler.model.states.len() {
            let base = state * stripe;
            if cell.scores[base] > existing.scores[base] {
                existing.scores[base..base + stripe].copy_from_slice(&cell.scores[base..base + stripe]);
                if scheduler.has_traceback {
                    let straceback = self.straceback.as_deref_mut().unwrap();
                    if let Some(old) = existing.traceback[state].take() {
                        straceback.unref(old);
                    }
                    existing.traceback[state] = cell.traceback[state].take();
                }
            } else if scheduler.has_traceback {
                if let Some(loser) = cell.traceback[state].take() {
                    self.straceback.as_deref_mut().unwrap().unref(loser);
                }
            }
        }
        existing.permit_span_thaw |= cell.permit_span_thaw;
        self.pool.push(cell);
    }

    fn row_add_seed(&mut self, row: &mut SchedulerRow, seed: &SchedulerSeed) {
        let scheduler = self.scheduler;
        let stripe = scheduler.stripe;
        let permit = scheduler.is_forward && scheduler.use_boundary;
        let mut cell = self.alloc_cell(seed.query_pos, permit);
        let state = if scheduler.is_forward { START.0 } else { END.0 };
        cell.scores[state * stripe] = seed.start_score;
        cell.scores[state * stripe + 1] = seed.start_score;
        cell.scores[state * stripe + 2] = seed.seed_id as Score;
        if row.cells.is_empty() && row.unused.is_empty() && row.used.is_empty() {
            row.cells.move_to(seed.query_pos, |_| unreachable!());
            row.cells.set(0, cell);
            return;
        }
        if row.cells.is_empty() {
            debug_assert!(row.unused.back().map_or(true, |c| c.query_pos <= seed.query_pos));
            row.unused.push_back(cell);
            return;
        }
        let advance = seed.query_pos - row.cells.pos();
        assert!(advance >= 0);
        if (advance as usize) < row.cells.max_advance() {
            self.merge_or_set(&mut row.cells, advance as usize, cell);
        } else {
            debug_assert!(row.unused.back().map_or(true, |c| c.query_pos <= seed.query_pos));
            row.unused.push_back(cell);
        }
    }

    fn pair_add_seed(&mut self, seed: &SchedulerSeed) {
        let advance = seed.target_pos - self.rows.pos();
        assert!(advance >= 0);
        assert!(advance as usize <= self.rows.max_advance());
        let mut row = match self.rows.take(advance as usize) {
            Some(row) => row,
            None => self.new_row(seed.target_pos),
        };
        debug_assert_eq!(row.target_pos, seed.target_pos);
        self.row_add_seed(&mut row, seed);
        self.rows.set(advance as usize, row);
    }

    /// Rewind every live row's column window onto its queued cells.
    fn reset_rows(&mut self) {
        for offset in 0..=self.rows.max_advance() {
            if let Some(row) = self.rows.get_mut(offset) {
                let used = &mut row.used;
                row.cells.reset(|cell| used.push(cell));
                for cell in row.used.drain(..).rev() {
                    row.unused.push_front(cell);
                }
            }
        }
    }

    /// Align rows ahead of the current one onto the current column.
    fn align_rows(&mut self, query_pos: I) {
        for offset in 1..=self.rows.max_advance() {
            if let Some(mut row) = self.rows.take(offset) {
                {
                    let used = &mut row.used;
                    row.cells.move_to(query_pos, |cell| used.push(cell));
                }
                while let Some(front) = row.unused.front() {
                    if front.query_pos >= query_pos {
                        break;
                    }
                    let cell = row.unused.pop_front().unwrap();
                    row.used.push(cell);
                }
                self.admit_unused(&mut row);
                self.rows.set(offset, row);
            }
        }
    }

    /// Pull queued cells that fit the row's column window.
    fn admit_unused(&mut self, row: &mut SchedulerRow) {
        loop {
            let Some(front) = row.unused.front() else { break };
            let advance = front.query_pos - row.cells.pos();
            debug_assert!(advance >= 0);
            if advance > row.cells.max_advance() as I {
                break;
            }
            let cell = row.unused.pop_front().unwrap();
            self.merge_or_set(&mut row.cells, advance as usize, cell);
        }
    }

    fn process_row(&mut self, row: &mut SchedulerRow, source: &mut dyn SeedSource, user: &mut U) {
        let scheduler = self.scheduler;
        if let Some(soi) = &mut self.subopt {
            let relative = if scheduler.is_forward {
                row.target_pos - self.region.target_start
            } else {
                (-row.target_pos) - self.region.target_start
            };
            soi.set_row(relative);
        }
        loop {
            if row.cells.is_empty() {
                let Some(cell) = row.unused.pop_front() else { break };
                row.cells.move_to(cell.query_pos, |_| unreachable!());
                row.cells.set(0, cell);
            }
            self.admit_unused(row);
            let origin = row.cells.pos();
            self.align_rows(origin);
            let mut cell = row.cells.take(0).expect("origin cell occupied");
            self.process_cell(&mut cell, row, source, user);
            row.used.push(cell);
            let used = &mut row.used;
            row.cells.next(|cell| used.push(cell));
        }
    }

    /// The per-cell update: transitions in reverse model order, span
    /// freeze/thaw, shadow hooks, X-drop, subopt gate, strict challenge.
    fn process_cell(
        &mut self,
        cell: &mut SchedulerCell,
        row: &mut SchedulerRow,
        source: &mut dyn SeedSource,
        user: &mut U,
    ) {
        let scheduler = self.scheduler;
        let model = &*scheduler.model;
        let stripe = scheduler.stripe;
        let (src_query, src_target) = if scheduler.is_forward {
            (cell.query_pos, row.target_pos)
        } else {
            (-cell.query_pos, -row.target_pos)
        };
        for t_index in (0..model.transitions.len()).rev() {
            let transition = &model.transitions[t_index];
            if scheduler.is_span_loop[t_index] {
                // Loop transitions never extend directly; forward boundary
                // passes freeze the entered stripe instead.
                if scheduler.is_forward && scheduler.use_boundary {
                    if let Some(span) = scheduler.span_of_state[transition.output.0] {
                        self.freeze_span(cell, span, transition.input.0, src_query, src_target);
                    }
                }
                continue;
            }
            let (dst_query, dst_target, input_state, output_state) = if scheduler.is_forward {
                let dst_query = src_query + transition.advance_query;
                let dst_target = src_target + transition.advance_target;
                if dst_query > self.region.query_end() || dst_target > self.region.target_end() {
                    continue;
                }
                (dst_query, dst_target, transition.input.0, transition.output.0)
            } else {
                let dst_query = src_query - transition.advance_query;
                let dst_target = src_target - transition.advance_target;
                if dst_query < self.region.query_start || dst_target < self.region.target_start {
                    continue;
                }
                (dst_query, dst_target, transition.output.0, transition.input.0)
            };
            if scheduler.is_forward && cell.permit_span_thaw {
                if let Some(span) = scheduler.span_of_state[transition.input.0] {
                    self.thaw_span(cell, span, input_state, src_query, src_target);
                }
            }
            // Snapshot the (possibly thawed) src stripe.
            self.buf.clear();
            self.buf.extend_from_slice(cell.stripe(input_state, stripe));
            let src_traceback =
                if scheduler.has_traceback { cell.traceback[input_state] } else { None };
            if scheduler.is_forward {
                for &sh in &transition.dst_shadows {
                    let shadow = model.shadow(sh);
                    (shadow.end)(
                        self.buf[SHADOW_START + shadow.designation],
                        dst_query,
                        dst_target,
                        user,
                    );
                }
            }
            let transition_score = if scheduler.is_forward {
                model.calc_score(transition.calc, src_query, src_target, user)
            } else if !transition.dst_shadows.is_empty() {
                // Shadow scoring is a forward-pass concern.
                0
            } else {
                model.calc_score(transition.calc, dst_query, dst_target, user)
            };
            let src_score = self.buf[0];
            let max_score = self.buf[1];
            let seed_id = self.buf[2];
            let dst_score = src_score + transition_score;
            if scheduler.is_forward && dst_score < 0 {
                continue;
            }
            if max_score - dst_score > scheduler.dropoff {
                continue;
            }
            if transition.is_match() {
                if let Some(soi) = &self.subopt {
                    if soi.is_blocked(src_query - self.region.query_start) {
                        continue;
                    }
                }
            }
            let relative_dst_query = if scheduler.is_forward { dst_query } else { -dst_query };
            let relative_dst_target = if scheduler.is_forward { dst_target } else { -dst_target };
            if transition.is_silent() {
                // Destination is this very cell, on the output stripe.
                if dst_score > cell.scores[output_state * stripe] {
                    self.assign(
                        cell,
                        output_state,
                        dst_score,
                        max_score,
                        seed_id,
                        TransitionId(t_index),
                        src_traceback,
                        dst_query,
                        dst_target,
                        source,
                        user,
                    );
                }
            } else if transition.advance_target == 0 {
                let advance = transition.advance_query as usize;
                let mut dst_cell = match row.cells.take(advance) {
                    Some(dst_cell) => dst_cell,
                    None => self.alloc_cell(relative_dst_query, false),
                };
                debug_assert_eq!(dst_cell.query_pos, relative_dst_query);
                if dst_score > dst_cell.scores[output_state * stripe] {
                    self.assign(
                        &mut dst_cell,
                        output_state,
                        dst_score,
                        max_score,
                        seed_id,
                        TransitionId(t_index),
                        src_traceback,
                        dst_query,
                        dst_target,
                        source,
                        user,
                    );
                }
                row.cells.set(advance, dst_cell);
            } else {
                let row_advance = transition.advance_target as usize;
                let mut dst_row = match self.rows.take(row_advance) {
                    Some(dst_row) => dst_row,
                    None => {
                        let mut fresh = self.new_row(relative_dst_target);
                        fresh.cells.move_to(cell.query_pos, |_| unreachable!());
                        fresh
                    }
                };
                debug_assert_eq!(dst_row.target_pos, relative_dst_target);
                debug_assert_eq!(dst_row.cells.pos(), cell.query_pos);
                let advance = transition.advance_query as usize;
                let mut dst_cell = match dst_row.cells.take(advance) {
                    Some(dst_cell) => dst_cell,
                    None => self.alloc_cell(relative_dst_query, false),
                };
                debug_assert_eq!(dst_cell.query_pos, relative_dst_query);
                if dst_score > dst_cell.scores[output_state * stripe] {
                    self.assign(
                        &mut dst_cell,
                        output_state,
                        dst_score,
                        max_score,
                        seed_id,
                        TransitionId(t_index),
                        src_traceback,
                        dst_query,
                        dst_target,
                        source,
                        user,
                    );
                }
                dst_row.cells.set(advance, dst_cell);
                self.rows.set(row_advance, dst_row);
            }
        }
    }

    /// Write an accepted extension into the destination stripe.
    #[allow(clippy::too_many_arguments)]
    fn assign(
        &mut self,
        dst_cell: &mut SchedulerCell,
        output_state: usize,
        dst_score: Score,
        max_score: Score,
        seed_id: Score,
        transition: TransitionId,
        src_traceback: Option<CellRef>,
        dst_query: I,
        dst_target: I,
        source: &mut dyn SeedSource,
        user: &mut U,
    ) {
        let scheduler = self.scheduler;
        let model = &*scheduler.model;
        let stripe = scheduler.stripe;
        let base = output_state * stripe;
        dst_cell.scores[base] = dst_score;
        dst_cell.scores[base + 2] = seed_id;
        if let Some(straceback) = self.straceback.as_deref_mut() {
            if let Some(old) = dst_cell.traceback[output_state].take() {
                straceback.unref(old);
            }
            dst_cell.traceback[output_state] = Some(straceback.add(transition, 1, src_traceback));
        }
        let t = model.transition(transition);
        if scheduler.is_forward {
            for &sh in &model.state(t.input).src_shadows {
                let shadow = model.shadow(sh);
                self.buf[SHADOW_START + shadow.designation] =
                    (shadow.start)(dst_query - t.advance_query, dst_target - t.advance_target, user);
            }
            dst_cell.scores[base + SHADOW_START..base + stripe]
                .copy_from_slice(&self.buf[SHADOW_START..]);
        }
        if dst_score < max_score {
            dst_cell.scores[base + 1] = max_score;
        } else {
            // A fresh path maximum; terminal reports fire here.
            dst_cell.scores[base + 1] = dst_score;
            if scheduler.record_starts && t.input == START {
                let cell = dst_cell.traceback[output_state];
                source.record_start(
                    seed_id as usize,
                    dst_score,
                    dst_query,
                    dst_target,
                    cell,
                    self.straceback.as_deref_mut().expect("start reports need a traceback"),
                );
            }
            if scheduler.record_ends && t.output == END {
                let cell = dst_cell.traceback[output_state];
                assert!(cell.is_some());
                source.record_end(
                    seed_id as usize,
                    dst_score,
                    dst_query,
                    dst_target,
                    cell,
                    self.straceback.as_deref_mut().expect("end reports need a traceback"),
                );
            }
        }
    }

    /// Freeze the entered span-state stripe into the per-column cache.
    fn freeze_span(
        &mut self,
        cell: &SchedulerCell,
        span_index: usize,
        state: usize,
        src_query: I,
        src_target: I,
    ) {
        let scheduler = self.scheduler;
        let span = &scheduler.model.spans[span_index];
        let stripe = scheduler.stripe;
        let base = state * stripe;
        let score = cell.scores[base];
        if score < 0 {
            return;
        }
        if span.max_target == 0 {
            // Only target-windowed spans are cached by column.
            return;
        }
        let cache = self.span_cache.as_mut().expect("span cache present");
        let straceback = self.straceback.as_deref_mut().expect("span freeze needs a traceback");
        match cache.get_mut(src_query as usize, span_index) {
            Some(stored) => {
                debug_assert_eq!(stored.query_entry, src_query);
                if stored.score <= score {
                    if let Some(old) = stored.cell.take() {
                        straceback.unref(old);
                    }
                    stored.score = score;
                    stored.max = cell.scores[base + 1];
                    stored.seed_id = cell.scores[base + 2];
                    stored.query_entry = src_query;
                    stored.target_entry = src_target;
                    stored.cell = cell.traceback[state].map(|c| straceback.share(c));
                    stored.shadows.clear();
                    stored
                        .shadows
                        .extend_from_slice(&cell.scores[base + SHADOW_START..base + stripe]);
                }
            }
            None => {
                let seed = SpanSeed {
                    score,
                    max: cell.scores[base + 1],
                    seed_id: cell.scores[base + 2],
                    query_entry: src_query,
                    target_entry: src_target,
                    cell: cell.traceback[state].map(|c| straceback.share(c)),
                    shadows: cell.scores[base + SHADOW_START..base + stripe].to_vec(),
                };
                cache.set(src_query as usize, span_index, seed);
            }
        }
    }

    /// Pull the best in-window span seed into the current cell's span
    /// stripe, appending the memoized loop runs to its traceback.
    fn thaw_span(
        &mut self,
        cell: &mut SchedulerCell,
        span_index: usize,
        input_state: usize,
        src_query: I,
        src_target: I,
    ) {
        let scheduler = self.scheduler;
        let span = &scheduler.model.spans[span_index];
        let stripe = scheduler.stripe;
        // Expire the carried seed once the windows pass it by.
        let carried_expired = self.span_curr[span_index].as_ref().is_some_and(|curr| {
            curr.query_entry > src_query
                || curr.query_entry + span.max_query < src_query
                || curr.target_entry + span.max_target < src_target
        });
        if carried_expired {
            let curr = self.span_curr[span_index].take().unwrap();
            curr.release(self.straceback.as_deref_mut().unwrap());
        }
        // Challenge it with whatever is cached at this column.
        if let Some(cache) = self.span_cache.as_mut() {
            let stored_state = cache
                .get(src_query as usize, span_index)
                .map(|stored| (stored.target_entry, stored.score));
            if let Some((stored_target_entry, stored_score)) = stored_state {
                if stored_target_entry + span.max_target >= src_target {
                    let better = self.span_curr[span_index]
                        .as_ref()
                        .map_or(true, |curr| curr.score < stored_score);
                    if better {
                        let straceback = self.straceback.as_deref_mut().unwrap();
                        let clone =
                            cache.get(src_query as usize, span_index).unwrap().clone_shared(straceback);
                        if let Some(old) = self.span_curr[span_index].replace(clone) {
                            old.release(straceback);
                        }
                    }
                } else {
                    let expired = cache.take(src_query as usize, span_index).unwrap();
                    expired.release(self.straceback.as_deref_mut().unwrap());
                }
            }
        }
        let Some(curr) = &self.span_curr[span_index] else { return };
        let base = input_state * stripe;
        if cell.scores[base] >= curr.score {
            return;
        }
        cell.scores[base] = curr.score;
        cell.scores[base + 1] = curr.max;
        cell.scores[base + 2] = curr.seed_id;
        cell.scores[base + SHADOW_START..base + stripe].copy_from_slice(&curr.shadows);
        let straceback = self.straceback.as_deref_mut().expect("span thaw needs a traceback");
        if let Some(old) = cell.traceback[input_state].take() {
            straceback.unref(old);
        }
        let query_run = src_query - curr.query_entry;
        let target_run = src_target - curr.target_entry;
        cell.traceback[input_state] =
            Some(add_span_runs(straceback, span, curr.cell, query_run, target_run));
    }

    /// Tear a row down: coalesce and release its traceback refs, record the
    /// boundary (reverse passes), recycle the cells.
    fn destroy_row(&mut self, mut row: SchedulerRow) {
        let scheduler = self.scheduler;
        let model = &*scheduler.model;
        let stripe = scheduler.stripe;
        let record_boundary = !scheduler.is_forward && self.boundary.is_some();
        if record_boundary {
            self.boundary.as_mut().unwrap().add_row(-row.target_pos);
        }
        {
            let used = &mut row.used;
            row.cells.reset(|cell| used.push(cell));
        }
        let mut cells: Vec<SchedulerCell> = row.used.drain(..).collect();
        cells.extend(row.unused.drain(..));
        for mut cell in cells {
            if let Some(straceback) = self.straceback.as_deref_mut() {
                for slot in &mut cell.traceback {
                    if let Some(tb) = slot.take() {
                        straceback.coalesce_unref(tb);
                    }
                }
            }
            if record_boundary {
                let boundary_row = self.boundary.as_mut().unwrap().rows.last_mut().unwrap();
                let start_stripe = cell.stripe(START.0, stripe);
                if start_stripe[0] >= 0 {
                    boundary_row.prepend(-cell.query_pos, start_stripe[2] as usize);
                } else {
                    for span in &model.spans {
                        let span_stripe = cell.stripe(span.span_state.0, stripe);
                        if span_stripe[0] > 0 {
                            boundary_row.prepend(-cell.query_pos, span_stripe[2] as usize);
                            break;
                        }
                    }
                }
            }
            self.pool.push(cell);
        }
        if record_boundary {
            self.boundary.as_mut().unwrap().remove_empty_last_row();
        }
    }
}

/// Append the memoized span loop runs onto a frozen traceback chain,
/// returning a single owned reference.
fn add_span_runs(
    straceback: &mut STraceback,
    span: &Span,
    prev: Option<CellRef>,
    query_run: I,
    target_run: I,
) -> CellRef {
    assert!(query_run >= 0 && target_run >= 0);
    assert!(query_run > 0 || target_run > 0);
    let mut owned: Option<CellRef> = None;
    let mut chain = prev;
    if query_run > 0 {
        let cell = straceback.add(span.query_loop.expect("query loop present"), query_run, chain);
        chain = Some(cell);
        owned = Some(cell);
    }
    if target_run > 0 {
        let cell = straceback.add(span.target_loop.expect("target loop present"), target_run, chain);
        if let Some(intermediate) = owned {
            straceback.unref(intermediate);
        }
        owned = Some(cell);
    }
    owned.unwrap()
}
