use tdp_types::{Region, Score, I};

use crate::model::{Model, TransitionId};

/// One run-length-encoded traceback step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentOp {
    pub transition: TransitionId,
    pub length: I,
}

/// A scored path through a model: a region plus the ordered run-length
/// encoded transition list whose emissions sum to the region's dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    pub region: Region,
    pub score: Score,
    pub ops: Vec<AlignmentOp>,
}

impl Alignment {
    pub fn new(region: Region, score: Score) -> Alignment {
        Alignment { region, score, ops: Vec::new() }
    }

    /// Append a run, coalescing onto an identical trailing transition.
    pub fn add(&mut self, transition: TransitionId, length: I) {
        assert!(length > 0);
        if let Some(last) = self.ops.last_mut() {
            if last.transition == transition {
                last.length += length;
                return;
            }
        }
        self.ops.push(AlignmentOp { transition, length });
    }

    /// Emitted advances must sum exactly to the region dimensions.
    pub fn is_valid<U>(&self, model: &Model<U>) -> bool {
        let mut query = 0;
        let mut target = 0;
        for op in &self.ops {
            let t = model.transition(op.transition);
            query += t.advance_query * op.length;
            target += t.advance_target * op.length;
        }
        query == self.region.query_length && target == self.region.target_length
    }

    /// Total emitted length over both sequences.
    pub fn emitted_length<U>(&self, model: &Model<U>) -> I {
        self.ops
            .iter()
            .map(|op| {
                let t = model.transition(op.transition);
                (t.advance_query + t.advance_target) * op.length
            })
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Label;
    use crate::ModelBuilder;

    #[test]
    fn add_coalesces_runs() {
        let mut builder: ModelBuilder<()> = ModelBuilder::new("pair");
        let m = builder.add_state("M");
        builder.add_transition("open", None, Some(m), 1, 1, None, Label::Match, 0);
        builder.add_transition("extend", Some(m), Some(m), 1, 1, None, Label::Match, 0);
        builder.add_transition("close", Some(m), None, 0, 0, None, Label::None, 0);
        let model = builder.close().unwrap();

        let mut alignment = Alignment::new(Region::new(0, 0, 4, 4), 0);
        // Ids were re-assigned at close; look the two matches up again.
        let open = model.transitions.iter().position(|t| t.name == "open").unwrap();
        let extend = model.transitions.iter().position(|t| t.name == "extend").unwrap();
        alignment.add(TransitionId(open), 1);
        alignment.add(TransitionId(extend), 1);
        alignment.add(TransitionId(extend), 2);
        assert_eq!(alignment.ops.len(), 2);
        assert_eq!(alignment.ops[1].length, 3);
        assert!(alignment.is_valid(&model));
    }
}
