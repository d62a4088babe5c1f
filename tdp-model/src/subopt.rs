//! Blocking of previously reported alignments.
//!
//! Every firing of a match transition lands on one lattice cell; recording
//! an alignment blocks those cells so later DP runs (and the SDP driver's
//! overlap test) steer around it.

use std::collections::BTreeMap;

use itertools::Itertools;
use tdp_types::{Region, I};

use crate::alignment::Alignment;
use crate::model::Model;

/// Record of match cells covered by reported alignments, in absolute
/// coordinates.
#[derive(Debug, Default, Clone)]
pub struct SubOpt {
    /// target row -> sorted, deduped blocked query columns.
    rows: BTreeMap<I, Vec<I>>,
}

impl SubOpt {
    pub fn new() -> SubOpt {
        SubOpt::default()
    }

    /// Block every match landing cell of the alignment.
    pub fn add_alignment<U>(&mut self, model: &Model<U>, alignment: &Alignment) {
        self.visit_match_cells(model, alignment, |rows, q, t| {
            let row = rows.entry(t).or_default();
            match row.binary_search(&q) {
                Ok(_) => {}
                Err(at) => row.insert(at, q),
            }
        });
    }

    /// True when any match landing cell of the alignment is blocked.
    pub fn overlaps<U>(&self, model: &Model<U>, alignment: &Alignment) -> bool {
        let mut hit = false;
        let mut query = alignment.region.query_start;
        let mut target = alignment.region.target_start;
        for op in &alignment.ops {
            let transition = model.transition(op.transition);
            for _ in 0..op.length {
                query += transition.advance_query;
                target += transition.advance_target;
                if transition.is_match() && self.is_blocked(query, target) {
                    hit = true;
                }
            }
        }
        hit
    }

    pub fn is_blocked(&self, query_pos: I, target_pos: I) -> bool {
        match self.rows.get(&target_pos) {
            Some(row) => row.binary_search(&query_pos).is_ok(),
            None => false,
        }
    }

    fn visit_match_cells<U>(
        &mut self,
        model: &Model<U>,
        alignment: &Alignment,
        mut visit: impl FnMut(&mut BTreeMap<I, Vec<I>>, I, I),
    ) {
        let mut query = alignment.region.query_start;
        let mut target = alignment.region.target_start;
        for op in &alignment.ops {
            let transition = model.transition(op.transition);
            for _ in 0..op.length {
                query += transition.advance_query;
                target += transition.advance_target;
                if transition.is_match() {
                    visit(&mut self.rows, query, target);
                }
            }
        }
    }
}

/// A [`SubOpt`] pre-clipped to one region, in region-relative coordinates,
/// for O(log n) lookups inside a DP sweep.
#[derive(Debug)]
pub struct SubOptIndex {
    /// Per region-relative target row, merged `[start, end)` column ranges.
    rows: Vec<Vec<(I, I)>>,
    curr_row: usize,
}

impl SubOptIndex {
    pub fn new(subopt: &SubOpt, region: &Region) -> SubOptIndex {
        let mut rows = vec![Vec::new(); region.target_length as usize + 1];
        for (&target, columns) in &subopt.rows {
            if target < region.target_start || target > region.target_end() {
                continue;
            }
            let row = &mut rows[(target - region.target_start) as usize];
            // Coalesce adjacent columns into ranges.
            let in_range = columns
                .iter()
                .map(|&q| q - region.query_start)
                .filter(|&q| q >= 0 && q <= region.query_length);
            for (start, end) in collapse_runs(in_range) {
                row.push((start, end));
            }
        }
        SubOptIndex { rows, curr_row: 0 }
    }

    /// Select the region-relative target row for subsequent lookups.
    #[inline]
    pub fn set_row(&mut self, target_pos: I) {
        debug_assert!(target_pos >= 0 && (target_pos as usize) < self.rows.len());
        self.curr_row = target_pos as usize;
    }

    /// Is the region-relative query column blocked in the selected row?
    #[inline]
    pub fn is_blocked(&self, query_pos: I) -> bool {
        let row = &self.rows[self.curr_row];
        match row.binary_search_by(|&(start, _)| start.cmp(&query_pos)) {
            Ok(_) => true,
            Err(0) => false,
            Err(at) => query_pos < row[at - 1].1,
        }
    }
}

/// Collapse an ascending column iterator into `[start, end)` runs.
fn collapse_runs(columns: impl Iterator<Item = I>) -> Vec<(I, I)> {
    let mut runs: Vec<(I, I)> = Vec::new();
    for (_, mut chunk) in &columns.enumerate().group_by(|&(i, q)| q - i as I) {
        let (_, first) = chunk.next().unwrap();
        let last = chunk.last().map_or(first, |(_, q)| q);
        runs.push((first, last + 1));
    }
    runs
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn collapse_runs_merges_adjacent_columns() {
        assert_eq!(collapse_runs([1, 2, 3, 7, 9, 10].into_iter()), vec![(1, 4), (7, 8), (9, 11)]);
        assert_eq!(collapse_runs(std::iter::empty()), vec![]);
    }

    #[test]
    fn index_answers_region_relative_lookups() {
        let mut subopt = SubOpt::new();
        subopt.rows.insert(12, vec![5, 6, 7, 20]);
        let mut index = SubOptIndex::new(&subopt, &Region::new(4, 10, 30, 10));
        index.set_row(2);
        assert!(index.is_blocked(1)); // absolute (5, 12)
        assert!(index.is_blocked(3));
        assert!(!index.is_blocked(4));
        assert!(index.is_blocked(16)); // absolute (20, 12)
        index.set_row(3);
        assert!(!index.is_blocked(1));
    }
}
