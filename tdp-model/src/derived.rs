use std::sync::Arc;

use crate::builder::ModelBuilder;
use crate::model::{
    CellEndFn, CellStartFn, Model, ModelError, Scope, StateId, TransitionId, END, START,
};

/// The sub-transducer of every state and transition lying on some
/// `src..dst` path of an original model, closed with fresh terminal
/// scopes. `transition_map` lifts DP results back onto the original.
///
/// `src` is identified with the new START and `dst` with the new END.
/// When a kept edge re-enters `src` (or leaves `dst` again), that terminal
/// also gets an interior copy, so loops through the splice points survive;
/// a single original transition may then map from several derived ones.
pub struct DerivedModel<U> {
    pub original: Arc<Model<U>>,
    pub derived: Model<U>,
    /// `transition_map[derived_id.0]` is the original transition.
    pub transition_map: Vec<TransitionId>,
}

impl<U> DerivedModel<U> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        original: Arc<Model<U>>,
        src: StateId,
        dst: StateId,
        start_scope: Scope,
        cell_start: Option<CellStartFn<U>>,
        end_scope: Scope,
        cell_end: Option<CellEndFn<U>>,
    ) -> Result<DerivedModel<U>, ModelError> {
        assert!(src != dst, "derived segment needs distinct terminals");
        let name = format!(
            "Segment(\"{}\"->\"{}\"):[{}]",
            original.state(src).name,
            original.state(dst).name,
            original.name
        );
        let mut builder: ModelBuilder<U> = ModelBuilder::new(&name);
        builder.configure_prep(original.init, original.exit);
        for calc in &original.calcs {
            // The whole calc table carries over with stable ids.
            builder.push_calc(calc.clone());
        }

        // An edge u -> v lies on a src..dst path iff u is src or reachable
        // from src, and v is dst or reaches dst.
        let from_src = reachable(&original, src, false);
        let to_dst = reachable(&original, dst, true);
        let edge_kept = |t: &crate::model::Transition| {
            (t.input == src || from_src[t.input.0]) && (t.output == dst || to_dst[t.output.0])
        };
        let kept: Vec<usize> = (0..original.transitions.len())
            .filter(|&i| edge_kept(&original.transitions[i]))
            .collect();
        let src_reentered = kept.iter().any(|&i| original.transitions[i].output == src);
        let dst_departed = kept.iter().any(|&i| original.transitions[i].input == dst);

        // Interior copies for every non-terminal on-path state, plus the
        // re-entered terminals.
        let mut state_map: Vec<Option<StateId>> = vec![None; original.states.len()];
        for i in 0..original.states.len() {
            let id = StateId(i);
            let on_path = (id == src && src_reentered)
                || (id == dst && dst_departed)
                || (id != src
                    && id != dst
                    && id != START
                    && id != END
                    && from_src[i]
                    && to_dst[i]);
            if on_path {
                state_map[i] = Some(builder.add_state(&original.states[i].name));
            }
        }

        let mut proto_src: Vec<Vec<StateId>> = vec![Vec::new(); original.shadows.len()];
        let mut proto_dst: Vec<Vec<TransitionId>> = vec![Vec::new(); original.shadows.len()];
        for (i, state) in original.states.iter().enumerate() {
            for &shadow in &state.src_shadows {
                if StateId(i) == src {
                    proto_src[shadow.0].push(START);
                }
                if let Some(copy) = state_map[i] {
                    proto_src[shadow.0].push(copy);
                }
            }
        }

        // Emit every (entry identity x exit identity) copy of a kept edge.
        let mut insertion_to_original: Vec<TransitionId> = Vec::new();
        for &i in &kept {
            let transition = &original.transitions[i];
            let mut froms: Vec<Option<StateId>> = Vec::new();
            if transition.input == src {
                froms.push(None); // new START
            }
            if let Some(copy) = state_map[transition.input.0] {
                froms.push(Some(copy));
            }
            let mut tos: Vec<Option<StateId>> = Vec::new();
            if transition.output == dst {
                tos.push(None); // new END
            }
            if let Some(copy) = state_map[transition.output.0] {
                tos.push(Some(copy));
            }
            for &input in &froms {
                for &output in &tos {
                    let new_id = builder.add_transition(
                        &transition.name,
                        input,
                        output,
                        transition.advance_query,
                        transition.advance_target,
                        transition.calc,
                        transition.label,
                        transition.label_data,
                    );
                    debug_assert_eq!(new_id.0, insertion_to_original.len());
                    insertion_to_original.push(TransitionId(i));
                    for &shadow in &transition.dst_shadows {
                        proto_dst[shadow.0].push(new_id);
                    }
                }
            }
        }

        // Shadows regenerate from whatever survives in the segment; the
        // original's src-to-dst reachability assertion stays relaxed for
        // derived models, so a shadow missing either side is dropped.
        for i in 0..original.shadows.len() {
            if !proto_src[i].is_empty() && !proto_dst[i].is_empty() {
                let shadow = &original.shadows[i];
                let id = builder.add_shadow(
                    &shadow.name,
                    Some(proto_src[i][0]),
                    Some(proto_dst[i][0]),
                    shadow.start,
                    shadow.end,
                );
                for &state in &proto_src[i][1..] {
                    builder.shadow_add_src_state(id, state);
                }
                for &transition in &proto_dst[i][1..] {
                    builder.shadow_add_dst_transition(id, transition);
                }
            }
        }

        builder.configure_start_state(start_scope, cell_start);
        builder.configure_end_state(end_scope, cell_end);

        let (derived, permutation) = builder.close_internal()?;
        let transition_map = permutation.iter().map(|&old| insertion_to_original[old]).collect();
        Ok(DerivedModel { original, derived, transition_map })
    }

    /// Lift a derived transition onto the original model.
    #[inline]
    pub fn original_transition(&self, derived: TransitionId) -> TransitionId {
        self.transition_map[derived.0]
    }
}

/// States reachable from `from` over output transitions (or input
/// transitions when `backward`), excluding `from` itself unless cyclic.
fn reachable<U>(model: &Model<U>, from: StateId, backward: bool) -> Vec<bool> {
    let mut visited = vec![false; model.states.len()];
    let mut stack = vec![from];
    while let Some(state) = stack.pop() {
        let edges = if backward {
            &model.state(state).input_transitions
        } else {
            &model.state(state).output_transitions
        };
        for &t in edges {
            let next = if backward { model.transition(t).input } else { model.transition(t).output };
            if !visited[next.0] {
                visited[next.0] = true;
                stack.push(next);
            }
        }
    }
    visited
}
