//! Boundary-mask pre-analysis.
//!
//! For each edge-coordinate cell of the lattice, which transitions have
//! both endpoints in scope? The pattern repeats beyond the advance
//! horizon, so a small grid of masks answers the question for any lattice
//! at least as large as the pattern.

use tdp_model::{Model, Scope, StateId, Transition, TransitionId, END, START};
use tdp_types::I;

/// Probe lengths used while building the repeating pattern; any real
/// lattice dimension beyond the pattern extent behaves identically.
const PROBE: I = 1024;

/// Hard cap on pattern growth; hitting it means a model advance is absurd.
const MAX_PATTERN: usize = 1024;

type Mask = Vec<bool>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct LayoutCell {
    normal: Mask,
    end_query: Option<Mask>,
    end_target: Option<Mask>,
    corner: Option<Mask>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LayoutRow {
    cells: Vec<LayoutCell>,
}

/// Precomputed transition-validity masks for a closed model.
#[derive(Debug, Clone)]
pub struct Layout {
    rows: Vec<LayoutRow>,
}

/// Is `state` allowed at `(query_pos, target_pos)` in a `(Q, T)` lattice?
fn state_active<U>(
    model: &Model<U>,
    state: StateId,
    query_pos: I,
    target_pos: I,
    query_length: I,
    target_length: I,
) -> bool {
    if query_pos < 0 || target_pos < 0 || query_pos > query_length || target_pos > target_length {
        return false;
    }
    if state == START {
        match model.start.scope {
            Scope::Anywhere => {}
            Scope::Edge => {
                if query_pos != 0 && target_pos != 0 {
                    return false;
                }
            }
            Scope::Query => {
                if query_pos != 0 {
                    return false;
                }
            }
            Scope::Target => {
                if target_pos != 0 {
                    return false;
                }
            }
            Scope::Corner => {
                if query_pos != 0 || target_pos != 0 {
                    return false;
                }
            }
        }
    }
    if state == END {
        match model.end.scope {
            Scope::Anywhere => {}
            Scope::Edge => {
                if query_pos != query_length && target_pos != target_length {
                    return false;
                }
            }
            Scope::Query => {
                if query_pos != query_length {
                    return false;
                }
            }
            Scope::Target => {
                if target_pos != target_length {
                    return false;
                }
            }
            Scope::Corner => {
                if query_pos != query_length || target_pos != target_length {
                    return false;
                }
            }
        }
    }
    true
}

/// The direct scope computation the masks cache: both endpoints in scope
/// at the transition's destination cell.
pub fn scope_check<U>(
    model: &Model<U>,
    transition: &Transition,
    dst_query_pos: I,
    dst_target_pos: I,
    query_length: I,
    target_length: I,
) -> bool {
    state_active(
        model,
        transition.input,
        dst_query_pos - transition.advance_query,
        dst_target_pos - transition.advance_target,
        query_length,
        target_length,
    ) && state_active(model, transition.output, dst_query_pos, dst_target_pos, query_length, target_length)
}

fn build_mask<U>(model: &Model<U>, query_pos: I, target_pos: I, query_length: I, target_length: I) -> Mask {
    model
        .transitions
        .iter()
        .map(|t| scope_check(model, t, query_pos, target_pos, query_length, target_length))
        .collect()
}

fn build_cell<U>(model: &Model<U>, query_pos: I, target_pos: I) -> LayoutCell {
    let normal = build_mask(model, query_pos, target_pos, PROBE, PROBE);
    let end_query = build_mask(model, query_pos, target_pos, query_pos, PROBE);
    let end_target = build_mask(model, query_pos, target_pos, PROBE, target_pos);
    let corner = build_mask(model, query_pos, target_pos, query_pos, target_pos);
    // Elide redundant masks.
    let end_query = if end_query == normal { None } else { Some(end_query) };
    let (corner, end_target) = if corner == end_target {
        (None, if end_target == normal { None } else { Some(end_target) })
    } else {
        (Some(corner), Some(end_target))
    };
    LayoutCell { normal, end_query, end_target, corner }
}

fn build_row<U>(model: &Model<U>, row_number: usize) -> LayoutRow {
    let mut cells: Vec<LayoutCell> = Vec::new();
    loop {
        let cell = build_cell(model, cells.len() as I, row_number as I);
        if cells.len() >= model.max_query_advance as usize && Some(&cell) == cells.last() {
            break;
        }
        cells.push(cell);
        assert!(cells.len() < MAX_PATTERN);
    }
    LayoutRow { cells }
}

impl Layout {
    pub fn new<U>(model: &Model<U>) -> Layout {
        let mut rows: Vec<LayoutRow> = Vec::new();
        loop {
            let row = build_row(model, rows.len());
            if rows.len() >= model.max_target_advance as usize && Some(&row) == rows.last() {
                break;
            }
            rows.push(row);
            assert!(rows.len() < MAX_PATTERN);
        }
        Layout { rows }
    }

    /// O(1) validity lookup for a transition at dst cell
    /// `(dst_query_pos, dst_target_pos)` in a `(Q, T)` lattice.
    #[inline]
    pub fn is_transition_valid<U>(
        &self,
        model: &Model<U>,
        transition: TransitionId,
        dst_query_pos: I,
        dst_target_pos: I,
        query_length: I,
        target_length: I,
    ) -> bool {
        let row = &self.rows[(dst_target_pos as usize).min(self.rows.len() - 1)];
        let cell = &row.cells[(dst_query_pos as usize).min(row.cells.len() - 1)];
        let mask = if dst_query_pos == query_length {
            if dst_target_pos == target_length {
                cell.corner.as_ref().or(cell.end_target.as_ref()).unwrap_or(&cell.normal)
            } else {
                cell.end_query.as_ref().unwrap_or(&cell.normal)
            }
        } else if dst_target_pos == target_length {
            cell.end_target.as_ref().unwrap_or(&cell.normal)
        } else {
            &cell.normal
        };
        let valid = mask[transition.0];
        debug_assert_eq!(
            valid,
            scope_check(
                model,
                model.transition(transition),
                dst_query_pos,
                dst_target_pos,
                query_length,
                target_length
            ),
            "layout mask disagrees at ({dst_query_pos},{dst_target_pos})"
        );
        valid
    }

    /// Pattern extent, for diagnostics.
    pub fn extent(&self) -> (usize, usize) {
        (self.rows.len(), self.rows.iter().map(|r| r.cells.len()).max().unwrap_or(0))
    }
}
