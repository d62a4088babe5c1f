//! The seeded-DP driver.
//!
//! Orchestrates reverse start-discovery, forward end-discovery and
//! traceback reconstruction, yielding successive alignments above a score
//! threshold with subopt blocking.

use std::sync::Arc;

use itertools::Itertools;
use log::debug;

use tdp_model::{Alignment, Model, SubOpt, START};
use tdp_types::{DpParams, Region, Score, I, IMPOSSIBLY_LOW};

use crate::boundary::Boundary;
use crate::scheduler::{Scheduler, SchedulerPair};
use crate::seeds::{build_seed_list, BoundarySource, Hsp, SdpSeed, SeedListSource, SeedSource};
use crate::straceback::STraceback;

/// Seeded DP over one model: the pass configurations plus the
/// direct-versus-bidirectional decision.
pub struct Sdp<U> {
    pub model: Arc<Model<U>>,
    pub use_boundary: bool,
    params: DpParams,
    find_starts: Scheduler<U>,
    find_ends: Scheduler<U>,
}

impl<U> Sdp<U> {
    pub fn new(model: &Arc<Model<U>>, params: DpParams) -> Sdp<U> {
        // Direct mode only when a single match transition drives the model:
        // no shadows, no spans, one portal with one transition.
        let mut use_boundary = true;
        if model.shadows.is_empty() && model.spans.is_empty() && model.portals.len() == 1 {
            if model.portals[0].transitions.len() == 1 {
                use_boundary = false;
            }
        }
        let (find_starts, find_ends) = if use_boundary {
            (
                Scheduler::new(model, false, false, true, false, false, params.dropoff),
                Scheduler::new(model, true, true, true, false, true, params.dropoff),
            )
        } else {
            (
                Scheduler::new(model, false, true, false, true, false, params.dropoff),
                Scheduler::new(model, true, true, false, false, true, params.dropoff),
            )
        };
        Sdp { model: Arc::clone(model), use_boundary, params, find_starts, find_ends }
    }
}

/// One comparison: seeds from HSPs, both shared tracebacks, and the
/// enumeration state for successive alignments.
pub struct SdpPair<'a, U> {
    sdp: &'a Sdp<U>,
    query_length: I,
    target_length: I,
    seeds: Vec<SdpSeed>,
    boundary: Option<Boundary>,
    fwd_straceback: STraceback,
    rev_straceback: STraceback,
    alignment_count: usize,
    last_score: Score,
    by_score: Vec<usize>,
    single_pass_pos: usize,
}

impl<'a, U> SdpPair<'a, U> {
    pub fn new(sdp: &'a Sdp<U>, query_length: I, target_length: I, hsps: &[Hsp]) -> SdpPair<'a, U> {
        SdpPair {
            sdp,
            query_length,
            target_length,
            seeds: build_seed_list(hsps),
            boundary: None,
            fwd_straceback: STraceback::new(),
            rev_straceback: STraceback::new(),
            alignment_count: 0,
            last_score: IMPOSSIBLY_LOW,
            by_score: Vec::new(),
            single_pass_pos: 0,
        }
    }

    /// The next alignment scoring at least `threshold`, or `None`.
    ///
    /// Scores are non-increasing over successive calls; candidates whose
    /// match cells hit `subopt` are skipped, so feeding every returned
    /// alignment back into `subopt` yields non-overlapping results.
    pub fn next_path(&mut self, user: &mut U, subopt: &SubOpt, threshold: Score) -> Option<Alignment> {
        if self.alignment_count == 0 {
            self.boundary = self.find_start_points(user, subopt);
            self.find_end_points(user, subopt);
            if self.sdp.params.single_pass_subopt {
                self.by_score = (0..self.seeds.len())
                    .sorted_by_key(|&i| std::cmp::Reverse(self.seeds[i].max_end.score))
                    .collect();
                self.single_pass_pos = 0;
            }
        } else if !self.sdp.params.single_pass_subopt {
            self.update_starts(user, subopt);
            self.update_ends(user, subopt);
        }
        let best = if self.sdp.params.single_pass_subopt {
            let mut found = None;
            while self.single_pass_pos < self.by_score.len() {
                let candidate = self.by_score[self.single_pass_pos];
                self.single_pass_pos += 1;
                if self.seeds[candidate].max_end.score < threshold {
                    return None;
                }
                let alignment = self.find_path(candidate);
                if subopt.overlaps(&self.sdp.model, &alignment) {
                    continue;
                }
                found = Some((candidate, alignment));
                break;
            }
            found
        } else {
            // First-best on ties, matching the deterministic ordering.
            let candidate = (0..self.seeds.len())
                .max_by_key(|&i| (self.seeds[i].max_end.score, std::cmp::Reverse(i)))?;
            if self.seeds[candidate].max_end.score < threshold {
                None
            } else {
                Some((candidate, self.find_path(candidate)))
            }
        };
        let (candidate, alignment) = best?;
        debug_assert!(
            self.last_score < 0 || self.seeds[candidate].max_end.score <= self.last_score
        );
        self.alignment_count += 1;
        self.last_score = self.seeds[candidate].max_end.score;
        self.seeds[candidate].max_end.score = IMPOSSIBLY_LOW;
        Some(alignment)
    }

    /// Reverse pass: start discovery (and, in boundary mode, the boundary).
    fn find_start_points(&mut self, user: &mut U, subopt: &SubOpt) -> Option<Boundary> {
        let sdp = self.sdp;
        let mut boundary = sdp.use_boundary.then(Boundary::new);
        {
            let straceback =
                sdp.find_starts.has_traceback.then_some(&mut self.rev_straceback);
            let mut pair = SchedulerPair::new(
                &sdp.find_starts,
                self.query_length,
                self.target_length,
                Some(subopt),
                boundary.as_mut(),
                straceback,
            );
            let mut source = SeedListSource::reverse(&mut self.seeds);
            pair.calculate(&mut source, user);
        }
        if let Some(boundary) = &mut boundary {
            boundary.reverse();
            debug!("boundary holds {} forward seeds", boundary.seed_count());
        }
        boundary
    }

    /// Forward pass: end discovery from the boundary (or the HSP list).
    fn find_end_points(&mut self, user: &mut U, subopt: &SubOpt) {
        let sdp = self.sdp;
        let mut pair = SchedulerPair::new(
            &sdp.find_ends,
            self.query_length,
            self.target_length,
            Some(subopt),
            None,
            Some(&mut self.fwd_straceback),
        );
        match &self.boundary {
            Some(boundary) => {
                assert!(!boundary.is_empty());
                let mut source = BoundarySource::new(boundary, &mut self.seeds);
                pair.calculate(&mut source, user);
            }
            None => {
                let mut source = SeedListSource::forward(&mut self.seeds);
                pair.calculate(&mut source, user);
            }
        }
    }

    fn update_starts(&mut self, user: &mut U, subopt: &SubOpt) {
        for seed in &mut self.seeds {
            seed.max_start.reset(&mut self.rev_straceback);
        }
        self.boundary = self.find_start_points(user, subopt);
    }

    fn update_ends(&mut self, user: &mut U, subopt: &SubOpt) {
        for seed in &mut self.seeds {
            seed.max_end.reset(&mut self.fwd_straceback);
        }
        self.find_end_points(user, subopt);
    }

    /// Reconstruct the alignment for one seed from the recorded terminals
    /// and traceback chains.
    fn find_path(&mut self, seed_index: usize) -> Alignment {
        let model = &self.sdp.model;
        if self.sdp.use_boundary {
            self.derive_start_from_end(seed_index);
        }
        let seed = &self.seeds[seed_index];
        let region = Region::new(
            seed.max_start.query_pos,
            seed.max_start.target_pos,
            seed.max_end.query_pos - seed.max_start.query_pos,
            seed.max_end.target_pos - seed.max_start.target_pos,
        );
        let mut alignment = Alignment::new(region, seed.max_end.score);
        if self.sdp.use_boundary {
            let ops = self.fwd_straceback.path(seed.max_end.cell.expect("end traceback"));
            for &(transition, length) in &ops {
                alignment.add(transition, length);
            }
        } else {
            // Stitch the reverse and forward halves at the seed point.
            let rev_ops =
                self.rev_straceback.path(seed.max_start.cell.expect("start traceback"));
            // The reverse list runs end-to-start; skip its first operation
            // (into the seeded END state) and emit the rest start-first.
            for index in (1..rev_ops.len()).rev() {
                let (transition, length) = rev_ops[index];
                alignment.add(transition, length);
            }
            let fwd_ops = self.fwd_straceback.path(seed.max_end.cell.expect("end traceback"));
            debug_assert!(
                alignment.ops.is_empty()
                    || model.transition(alignment.ops.last().unwrap().transition).output
                        == model.transition(fwd_ops[0].0).output
            );
            // The forward half re-emits the stitch operation; drop it.
            for &(transition, length) in &fwd_ops[1..] {
                alignment.add(transition, length);
            }
        }
        debug_assert!(alignment.is_valid(model), "emissions must span the region");
        alignment
    }

    /// Boundary mode discovers only ends; walk the forward chain back to
    /// the START transition to recover the start point.
    fn derive_start_from_end(&mut self, seed_index: usize) {
        let model = &self.sdp.model;
        let seed = &mut self.seeds[seed_index];
        let mut query_pos = seed.max_end.query_pos;
        let mut target_pos = seed.max_end.target_pos;
        let mut cursor = seed.max_end.cell.expect("end traceback");
        loop {
            let (transition, length, prev) = self.fwd_straceback.cell(cursor);
            let t = model.transition(transition);
            query_pos -= t.advance_query * length;
            target_pos -= t.advance_target * length;
            if t.input == START {
                break;
            }
            cursor = prev.expect("forward chain reaches a START transition");
        }
        seed.max_start.query_pos = query_pos;
        seed.max_start.target_pos = target_pos;
    }
}
