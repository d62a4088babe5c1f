//! Seed plumbing between the SDP driver and the scheduler.

use itertools::Itertools;
use tdp_types::{Score, I, IMPOSSIBLY_LOW};

use crate::boundary::Boundary;
use crate::straceback::{CellRef, STraceback};

/// The narrow HSP interface the driver consumes: a center-of-best-segment
/// anchor plus the HSP score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsp {
    pub query_cobs: I,
    pub target_cobs: I,
    pub score: Score,
}

/// Best start or end observed for one seed.
#[derive(Debug, Clone)]
pub struct Terminal {
    pub query_pos: I,
    pub target_pos: I,
    pub score: Score,
    pub cell: Option<CellRef>,
}

impl Terminal {
    fn new() -> Terminal {
        Terminal { query_pos: 0, target_pos: 0, score: IMPOSSIBLY_LOW, cell: None }
    }

    pub(crate) fn reset(&mut self, straceback: &mut STraceback) {
        self.score = IMPOSSIBLY_LOW;
        if let Some(cell) = self.cell.take() {
            straceback.unref(cell);
        }
    }

    fn challenge(
        &mut self,
        score: Score,
        query_pos: I,
        target_pos: I,
        cell: Option<CellRef>,
        straceback: &mut STraceback,
    ) {
        if self.score >= score {
            return;
        }
        self.score = score;
        self.query_pos = query_pos;
        self.target_pos = target_pos;
        if let Some(old) = self.cell.take() {
            straceback.unref(old);
        }
        self.cell = cell.map(|c| straceback.share(c));
    }
}

/// One HSP anchor with its discovered terminals.
#[derive(Debug, Clone)]
pub struct SdpSeed {
    pub seed_id: usize,
    pub hsp: Hsp,
    pub max_start: Terminal,
    pub max_end: Terminal,
}

/// A point admitted into the scheduler, in pass-relative coordinates
/// (reverse passes negate them so ordering stays ascending).
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSeed {
    pub query_pos: I,
    pub target_pos: I,
    pub seed_id: usize,
    pub start_score: Score,
}

/// Seed enumeration plus terminal reporting, implemented by the HSP list
/// (either direction) and by the boundary walker.
pub trait SeedSource {
    fn init(&mut self);
    /// Current seed without consuming it.
    fn peek(&self) -> Option<SchedulerSeed>;
    fn advance(&mut self);
    fn record_start(
        &mut self,
        _seed_id: usize,
        _score: Score,
        _query_pos: I,
        _target_pos: I,
        _cell: Option<CellRef>,
        _straceback: &mut STraceback,
    ) {
    }
    fn record_end(
        &mut self,
        _seed_id: usize,
        _score: Score,
        _query_pos: I,
        _target_pos: I,
        _cell: Option<CellRef>,
        _straceback: &mut STraceback,
    ) {
    }
}

/// Build one seed per unique HSP anchor, in forward DP order.
pub fn build_seed_list(hsps: &[Hsp]) -> Vec<SdpSeed> {
    assert!(!hsps.is_empty());
    hsps.iter()
        .sorted_by_key(|hsp| (hsp.target_cobs, hsp.query_cobs))
        .dedup_by(|a, b| a.query_cobs == b.query_cobs && a.target_cobs == b.target_cobs)
        .enumerate()
        .map(|(seed_id, hsp)| SdpSeed {
            seed_id,
            hsp: *hsp,
            max_start: Terminal::new(),
            max_end: Terminal::new(),
        })
        .collect()
}

/// HSP-list enumeration for either pass direction.
pub struct SeedListSource<'a> {
    seeds: &'a mut Vec<SdpSeed>,
    position: isize,
    forward: bool,
}

impl<'a> SeedListSource<'a> {
    pub fn forward(seeds: &'a mut Vec<SdpSeed>) -> SeedListSource<'a> {
        SeedListSource { seeds, position: 0, forward: true }
    }

    pub fn reverse(seeds: &'a mut Vec<SdpSeed>) -> SeedListSource<'a> {
        let position = seeds.len() as isize - 1;
        SeedListSource { seeds, position, forward: false }
    }
}

impl SeedSource for SeedListSource<'_> {
    fn init(&mut self) {
        self.position = if self.forward { 0 } else { self.seeds.len() as isize - 1 };
    }

    fn peek(&self) -> Option<SchedulerSeed> {
        if self.position < 0 || self.position >= self.seeds.len() as isize {
            return None;
        }
        let seed = &self.seeds[self.position as usize];
        Some(if self.forward {
            SchedulerSeed {
                query_pos: seed.hsp.query_cobs,
                target_pos: seed.hsp.target_cobs,
                seed_id: seed.seed_id,
                // Rebase so the discovered start comes out at score zero.
                start_score: seed.max_start.score - (seed.hsp.score >> 1),
            }
        } else {
            SchedulerSeed {
                query_pos: -seed.hsp.query_cobs,
                target_pos: -seed.hsp.target_cobs,
                seed_id: seed.seed_id,
                start_score: seed.hsp.score >> 1,
            }
        })
    }

    fn advance(&mut self) {
        self.position += if self.forward { 1 } else { -1 };
    }

    fn record_start(
        &mut self,
        seed_id: usize,
        score: Score,
        query_pos: I,
        target_pos: I,
        cell: Option<CellRef>,
        straceback: &mut STraceback,
    ) {
        self.seeds[seed_id].max_start.challenge(score, query_pos, target_pos, cell, straceback);
    }

    fn record_end(
        &mut self,
        seed_id: usize,
        score: Score,
        query_pos: I,
        target_pos: I,
        cell: Option<CellRef>,
        straceback: &mut STraceback,
    ) {
        assert!(cell.is_some());
        self.seeds[seed_id].max_end.challenge(score, query_pos, target_pos, cell, straceback);
    }
}

/// Forward enumeration of the reverse pass's boundary runs.
pub struct BoundarySource<'a> {
    boundary: &'a Boundary,
    seeds: &'a mut Vec<SdpSeed>,
    row: usize,
    run: usize,
    offset: I,
    finished: bool,
}

impl<'a> BoundarySource<'a> {
    pub fn new(boundary: &'a Boundary, seeds: &'a mut Vec<SdpSeed>) -> BoundarySource<'a> {
        assert!(!boundary.is_empty());
        BoundarySource { boundary, seeds, row: 0, run: 0, offset: 0, finished: false }
    }
}

impl SeedSource for BoundarySource<'_> {
    fn init(&mut self) {
        self.row = 0;
        self.run = 0;
        self.offset = 0;
        self.finished = false;
    }

    fn peek(&self) -> Option<SchedulerSeed> {
        if self.finished {
            return None;
        }
        let row = &self.boundary.rows[self.row];
        let run = &row.runs[self.run];
        Some(SchedulerSeed {
            query_pos: run.query_pos + self.offset,
            target_pos: row.target_pos,
            seed_id: run.seed_id,
            start_score: 0,
        })
    }

    fn advance(&mut self) {
        let row = &self.boundary.rows[self.row];
        if self.offset < row.runs[self.run].length - 1 {
            self.offset += 1;
        } else if self.run < row.runs.len() - 1 {
            self.run += 1;
            self.offset = 0;
        } else if self.row < self.boundary.rows.len() - 1 {
            self.row += 1;
            self.run = 0;
            self.offset = 0;
        } else {
            self.finished = true;
        }
    }

    fn record_end(
        &mut self,
        seed_id: usize,
        score: Score,
        query_pos: I,
        target_pos: I,
        cell: Option<CellRef>,
        straceback: &mut STraceback,
    ) {
        assert!(cell.is_some());
        self.seeds[seed_id].max_end.challenge(score, query_pos, target_pos, cell, straceback);
    }
}
