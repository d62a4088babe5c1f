use log::debug;

use crate::model::{
    Calc, CalcDef, CalcId, CellEndFn, CellStartFn, EndState, Label, Model, ModelError, Portal,
    PortalId, PrepFn, Scope, Shadow, ShadowEndFn, ShadowId, ShadowStartFn, Span, SpanId,
    StartState, State, StateId, Transition, TransitionId, END, START,
};
use tdp_types::I;

/// The mutable, open form of a [`Model`].
///
/// Graph-shape contract violations in the `add_*` methods are programmer
/// errors and fail loudly; whole-graph problems are reported by
/// [`ModelBuilder::close`].
pub struct ModelBuilder<U> {
    pub name: String,
    states: Vec<State>,
    transitions: Vec<Transition>,
    calcs: Vec<Calc<U>>,
    shadows: Vec<Shadow<U>>,
    portals: Vec<Portal>,
    spans: Vec<Span>,
    start: StartState<U>,
    end: EndState<U>,
    init: Option<PrepFn<U>>,
    exit: Option<PrepFn<U>>,
}

impl<U> ModelBuilder<U> {
    pub fn new(name: &str) -> ModelBuilder<U> {
        ModelBuilder {
            name: name.to_owned(),
            states: vec![State::new("START"), State::new("END")],
            transitions: Vec::new(),
            calcs: Vec::new(),
            shadows: Vec::new(),
            portals: Vec::new(),
            spans: Vec::new(),
            start: StartState { state: START, scope: Scope::Anywhere, cell_start: None },
            end: EndState { state: END, scope: Scope::Anywhere, cell_end: None },
            init: None,
            exit: None,
        }
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    pub fn add_state(&mut self, name: &str) -> StateId {
        let id = StateId(self.states.len());
        self.states.push(State::new(name));
        id
    }

    pub fn add_calc(&mut self, def: CalcDef<U>) -> CalcId {
        let id = CalcId(self.calcs.len());
        self.calcs.push(Calc {
            name: def.name.to_owned(),
            max_score: def.max_score,
            calc: def.calc,
            init: def.init,
            exit: def.exit,
            protect: def.protect,
        });
        id
    }

    pub(crate) fn push_calc(&mut self, calc: Calc<U>) -> CalcId {
        let id = CalcId(self.calcs.len());
        self.calcs.push(calc);
        id
    }

    /// Add a transition; `input`/`output` default to START/END.
    #[allow(clippy::too_many_arguments)]
    pub fn add_transition(
        &mut self,
        name: &str,
        input: Option<StateId>,
        output: Option<StateId>,
        advance_query: I,
        advance_target: I,
        calc: Option<CalcId>,
        label: Label,
        label_data: u64,
    ) -> TransitionId {
        assert!(advance_query >= 0);
        assert!(advance_target >= 0);
        assert!(
            label == Label::None || advance_query > 0 || advance_target > 0,
            "labelled transition [{name}] must emit"
        );
        assert!(
            label != Label::Match || (advance_query > 0 && advance_target > 0),
            "match transition [{name}] must advance both sequences"
        );
        let input = input.unwrap_or(START);
        let output = output.unwrap_or(END);
        assert!(input.0 < self.states.len());
        assert!(output.0 < self.states.len());
        if let Some(calc) = calc {
            assert!(calc.0 < self.calcs.len());
        }
        let id = TransitionId(self.transitions.len());
        self.transitions.push(Transition {
            name: name.to_owned(),
            input,
            output,
            advance_query,
            advance_target,
            calc,
            label,
            label_data,
            dst_shadows: Vec::new(),
        });
        self.states[input.0].output_transitions.push(id);
        self.states[output.0].input_transitions.push(id);
        id
    }

    /// Add a shadow; `src` defaults to START and a missing `dst` covers
    /// every current inbound-to-END transition.
    pub fn add_shadow(
        &mut self,
        name: &str,
        src: Option<StateId>,
        dst: Option<TransitionId>,
        start: ShadowStartFn<U>,
        end: ShadowEndFn<U>,
    ) -> ShadowId {
        let src = src.unwrap_or(START);
        let dst_transitions = match dst {
            Some(dst) => vec![dst],
            None => {
                let inbound = self.states[END.0].input_transitions.clone();
                assert!(!inbound.is_empty(), "shadow [{name}] with no END transitions");
                inbound
            }
        };
        self.push_shadow(name, vec![src], dst_transitions, start, end)
    }

    fn push_shadow(
        &mut self,
        name: &str,
        src_states: Vec<StateId>,
        dst_transitions: Vec<TransitionId>,
        start: ShadowStartFn<U>,
        end: ShadowEndFn<U>,
    ) -> ShadowId {
        let id = ShadowId(self.shadows.len());
        for &state in &src_states {
            self.states[state.0].src_shadows.push(id);
        }
        for &transition in &dst_transitions {
            self.transitions[transition.0].dst_shadows.push(id);
        }
        self.shadows.push(Shadow { name: name.to_owned(), src_states, dst_transitions, start, end, designation: 0 });
        id
    }

    pub fn shadow_add_src_state(&mut self, shadow: ShadowId, src: StateId) {
        self.states[src.0].src_shadows.push(shadow);
        self.shadows[shadow.0].src_states.push(src);
    }

    pub fn shadow_add_dst_transition(&mut self, shadow: ShadowId, dst: TransitionId) {
        self.transitions[dst.0].dst_shadows.push(shadow);
        self.shadows[shadow.0].dst_transitions.push(dst);
    }

    pub fn add_portal(&mut self, name: &str, calc: CalcId, advance_query: I, advance_target: I) -> PortalId {
        assert!(self.calcs[calc.0].calc.is_some(), "portal [{name}] needs a position-dependent calc");
        let id = PortalId(self.portals.len());
        self.portals.push(Portal {
            name: name.to_owned(),
            calc,
            advance_query,
            advance_target,
            transitions: Vec::new(),
        });
        id
    }

    /// Add a span; the silent-cost self-loops of `span_state` must already
    /// be present.
    pub fn add_span(
        &mut self,
        name: &str,
        span_state: StateId,
        min_query: I,
        max_query: I,
        min_target: I,
        max_target: I,
    ) -> SpanId {
        assert!(min_query >= 0 && min_query <= max_query);
        assert!(min_target >= 0 && min_target <= max_target);
        let (query_loop, target_loop) = self.find_loop_transitions(span_state);
        assert!(
            query_loop.is_some() || target_loop.is_some(),
            "span [{name}] state has no silent-cost self-loop"
        );
        let id = SpanId(self.spans.len());
        self.spans.push(Span {
            name: name.to_owned(),
            span_state,
            min_query,
            max_query,
            min_target,
            max_target,
            query_loop,
            target_loop,
        });
        id
    }

    fn find_loop_transitions(&self, span_state: StateId) -> (Option<TransitionId>, Option<TransitionId>) {
        let mut query_loop = None;
        let mut target_loop = None;
        for &t in &self.states[span_state.0].output_transitions {
            let transition = &self.transitions[t.0];
            if transition.output != span_state {
                continue;
            }
            // Only sequence-position-independent, zero-cost loops qualify.
            let silent_cost = match transition.calc {
                None => true,
                Some(c) => {
                    let calc = &self.calcs[c.0];
                    if calc.calc.is_none() {
                        assert_eq!(calc.max_score, 0, "span loop calc must be free");
                        true
                    } else {
                        false
                    }
                }
            };
            if !silent_cost {
                continue;
            }
            assert!(transition.advance_query > 0 || transition.advance_target > 0);
            assert!(
                transition.advance_query == 0 || transition.advance_target == 0,
                "span loop must advance a single sequence"
            );
            if transition.advance_query > 0 {
                assert!(query_loop.is_none());
                query_loop = Some(t);
            } else {
                assert!(target_loop.is_none());
                target_loop = Some(t);
            }
        }
        (query_loop, target_loop)
    }

    pub fn configure_start_state(&mut self, scope: Scope, cell_start: Option<CellStartFn<U>>) {
        self.start.scope = scope;
        self.start.cell_start = cell_start;
    }

    pub fn configure_end_state(&mut self, scope: Scope, cell_end: Option<CellEndFn<U>>) {
        self.end.scope = scope;
        self.end.cell_end = cell_end;
    }

    /// Replace the model-level prep hooks. Replacement is unconditional.
    pub fn configure_prep(&mut self, init: Option<PrepFn<U>>, exit: Option<PrepFn<U>>) {
        self.init = init;
        self.exit = exit;
    }

    /// Splice a closed model between `src` and `dst` (defaults START/END),
    /// identifying the insert's terminals with them. Calcs dedupe by
    /// equivalence; portals with identical advances and calc merge.
    pub fn insert(&mut self, insert: &Model<U>, src: Option<StateId>, dst: Option<StateId>) {
        let src = src.unwrap_or(START);
        let dst = dst.unwrap_or(END);
        // Calcs, deduped by equivalence.
        let calc_map: Vec<CalcId> = insert
            .calcs
            .iter()
            .map(|calc| {
                match self.calcs.iter().position(|mine| mine.equivalent(calc)) {
                    Some(found) => CalcId(found),
                    None => {
                        let id = CalcId(self.calcs.len());
                        self.calcs.push(calc.clone());
                        id
                    }
                }
            })
            .collect();
        // States; terminals identify with the splice points.
        let state_map: Vec<StateId> = insert
            .states
            .iter()
            .enumerate()
            .map(|(i, state)| {
                if StateId(i) == START {
                    src
                } else if StateId(i) == END {
                    dst
                } else {
                    self.add_state(&state.name)
                }
            })
            .collect();
        // Transitions.
        let transition_map: Vec<TransitionId> = insert
            .transitions
            .iter()
            .map(|t| {
                self.add_transition(
                    &t.name,
                    Some(state_map[t.input.0]),
                    Some(state_map[t.output.0]),
                    t.advance_query,
                    t.advance_target,
                    t.calc.map(|c| calc_map[c.0]),
                    t.label,
                    t.label_data,
                )
            })
            .collect();
        // Shadows.
        for shadow in &insert.shadows {
            let src_states = shadow.src_states.iter().map(|s| state_map[s.0]).collect();
            let dst_transitions = shadow.dst_transitions.iter().map(|t| transition_map[t.0]).collect();
            self.push_shadow(&shadow.name, src_states, dst_transitions, shadow.start, shadow.end);
        }
        // Portals, merged on (advances, calc-equivalence); transition lists
        // are recomputed at close.
        for portal in &insert.portals {
            let calc = calc_map[portal.calc.0];
            let merged = self.portals.iter().any(|mine| {
                mine.advance_query == portal.advance_query
                    && mine.advance_target == portal.advance_target
                    && self.calcs[mine.calc.0].equivalent(&self.calcs[calc.0])
            });
            if !merged {
                self.add_portal(&portal.name, calc, portal.advance_query, portal.advance_target);
            }
        }
        // Spans.
        for span in &insert.spans {
            self.add_span(
                &span.name,
                state_map[span.span_state.0],
                span.min_query,
                span.max_query,
                span.min_target,
                span.max_target,
            );
        }
        self.configure_prep(insert.init, insert.exit);
    }

    /// Duplicate every non-terminal state, transition and shadow, naming the
    /// copies with `suffix_b` and renaming the originals with `suffix_a`.
    /// No edges cross the two halves.
    pub fn make_stereo(&mut self, suffix_a: &str, suffix_b: &str) {
        let prev_states = self.states.len();
        let prev_transitions = self.transitions.len();
        let prev_shadows = self.shadows.len();
        // Copy states.
        let state_map: Vec<Option<StateId>> = (0..prev_states)
            .map(|i| {
                if StateId(i) == START || StateId(i) == END {
                    None
                } else {
                    let name = format!("{} {}", self.states[i].name, suffix_b);
                    Some(self.add_state(&name))
                }
            })
            .collect();
        let map_state = |id: StateId, map: &[Option<StateId>]| map[id.0].unwrap_or(id);
        // Copy transitions.
        let mut transition_map = Vec::with_capacity(prev_transitions);
        for i in 0..prev_transitions {
            let t = self.transitions[i].clone();
            let name = format!("{} {}", t.name, suffix_b);
            transition_map.push(self.add_transition(
                &name,
                Some(map_state(t.input, &state_map)),
                Some(map_state(t.output, &state_map)),
                t.advance_query,
                t.advance_target,
                t.calc,
                t.label,
                t.label_data,
            ));
        }
        // Copy shadows.
        for i in 0..prev_shadows {
            let shadow = self.shadows[i].clone();
            let name = format!("{} {}", shadow.name, suffix_b);
            let src_states = shadow.src_states.iter().map(|&s| map_state(s, &state_map)).collect();
            let dst_transitions = shadow.dst_transitions.iter().map(|t| transition_map[t.0]).collect();
            self.push_shadow(&name, src_states, dst_transitions, shadow.start, shadow.end);
        }
        // Rename the originals.
        for i in 0..prev_states {
            if StateId(i) != START && StateId(i) != END {
                let name = format!("{} {}", self.states[i].name, suffix_a);
                self.states[i].name = name;
            }
        }
        for i in 0..prev_transitions {
            let name = format!("{} {}", self.transitions[i].name, suffix_a);
            self.transitions[i].name = name;
        }
        for i in 0..prev_shadows {
            let name = format!("{} {}", self.shadows[i].name, suffix_a);
            self.shadows[i].name = name;
        }
    }

    /// Drop every shadow, clearing all back-references.
    pub fn remove_all_shadows(&mut self) {
        for state in &mut self.states {
            state.src_shadows.clear();
        }
        for transition in &mut self.transitions {
            transition.dst_shadows.clear();
        }
        self.shadows.clear();
    }

    /// Remove a non-terminal state together with both its input and output
    /// transitions, shadows left without a src, and calcs, portals and
    /// spans that nothing references afterwards.
    pub fn remove_state(&mut self, state: StateId) {
        assert!(state != START && state != END, "cannot remove a terminal state");
        assert!(state.0 < self.states.len());
        let keep_state: Vec<bool> = (0..self.states.len()).map(|i| i != state.0).collect();
        let keep_transition: Vec<bool> = self
            .transitions
            .iter()
            .map(|t| t.input != state && t.output != state)
            .collect();
        // Shadows: drop the state from src sets, then drop shadows left
        // with no src or whose dst transitions all went away.
        for shadow in &mut self.shadows {
            shadow.src_states.retain(|&s| s != state);
            shadow.dst_transitions.retain(|t| keep_transition[t.0]);
        }
        let keep_shadow: Vec<bool> = self
            .shadows
            .iter()
            .map(|s| !s.src_states.is_empty() && !s.dst_transitions.is_empty())
            .collect();
        // Calcs referenced by a surviving transition stay.
        let mut keep_calc = vec![false; self.calcs.len()];
        for (i, t) in self.transitions.iter().enumerate() {
            if keep_transition[i] {
                if let Some(c) = t.calc {
                    keep_calc[c.0] = true;
                }
            }
        }
        let keep_portal: Vec<bool> = self.portals.iter().map(|p| keep_calc[p.calc.0]).collect();
        let keep_span: Vec<bool> = self.spans.iter().map(|s| s.span_state != state).collect();
        self.compact(&keep_state, &keep_transition, &keep_calc, &keep_shadow, &keep_portal, &keep_span);
    }

    fn compact(
        &mut self,
        keep_state: &[bool],
        keep_transition: &[bool],
        keep_calc: &[bool],
        keep_shadow: &[bool],
        keep_portal: &[bool],
        keep_span: &[bool],
    ) {
        fn remap(keep: &[bool]) -> Vec<Option<usize>> {
            let mut next = 0;
            keep.iter()
                .map(|&k| {
                    if k {
                        next += 1;
                        Some(next - 1)
                    } else {
                        None
                    }
                })
                .collect()
        }
        let state_map = remap(keep_state);
        let transition_map = remap(keep_transition);
        let calc_map = remap(keep_calc);
        let shadow_map = remap(keep_shadow);
        fn retain_kept<T>(kept: &mut Vec<T>, keep: &[bool]) {
            let mut i = 0;
            kept.retain(|_| {
                i += 1;
                keep[i - 1]
            });
        }
        retain_kept(&mut self.states, keep_state);
        retain_kept(&mut self.transitions, keep_transition);
        retain_kept(&mut self.calcs, keep_calc);
        retain_kept(&mut self.shadows, keep_shadow);
        retain_kept(&mut self.portals, keep_portal);
        retain_kept(&mut self.spans, keep_span);
        for s in &mut self.states {
            s.input_transitions.retain(|t| keep_transition[t.0]);
            s.output_transitions.retain(|t| keep_transition[t.0]);
            s.src_shadows.retain(|sh| keep_shadow[sh.0]);
            for t in &mut s.input_transitions {
                *t = TransitionId(transition_map[t.0].unwrap());
            }
            for t in &mut s.output_transitions {
                *t = TransitionId(transition_map[t.0].unwrap());
            }
            for sh in &mut s.src_shadows {
                *sh = ShadowId(shadow_map[sh.0].unwrap());
            }
        }
        for t in &mut self.transitions {
            t.input = StateId(state_map[t.input.0].unwrap());
            t.output = StateId(state_map[t.output.0].unwrap());
            t.calc = t.calc.map(|c| CalcId(calc_map[c.0].unwrap()));
            t.dst_shadows.retain(|sh| keep_shadow[sh.0]);
            for sh in &mut t.dst_shadows {
                *sh = ShadowId(shadow_map[sh.0].unwrap());
            }
        }
        for sh in &mut self.shadows {
            for s in &mut sh.src_states {
                *s = StateId(state_map[s.0].unwrap());
            }
            for t in &mut sh.dst_transitions {
                *t = TransitionId(transition_map[t.0].unwrap());
            }
        }
        for p in &mut self.portals {
            p.calc = CalcId(calc_map[p.calc.0].unwrap());
            p.transitions.clear();
        }
        for sp in &mut self.spans {
            sp.span_state = StateId(state_map[sp.span_state.0].unwrap());
            sp.query_loop = sp.query_loop.map(|t| TransitionId(transition_map[t.0].unwrap()));
            sp.target_loop = sp.target_loop.map(|t| TransitionId(transition_map[t.0].unwrap()));
        }
    }

    /// Close the model: validity, reachability, silent-transition ordering,
    /// shadow designation packing and finalization.
    pub fn close(self) -> Result<Model<U>, ModelError> {
        self.close_internal().map(|(model, _)| model)
    }

    /// Close, also returning the permutation mapping each final transition
    /// id to its builder insertion index.
    pub(crate) fn close_internal(mut self) -> Result<(Model<U>, Vec<usize>), ModelError> {
        self.check_valid()?;
        if !dfs_path(&self.states, &self.transitions, START, END) {
            return Err(ModelError::NoStartToEndPath);
        }
        let permutation = self.topological_sort()?;
        let total_shadow_designations = self.designate_shadows();
        self.finalise_portals();
        let mut max_query_advance = 0;
        let mut max_target_advance = 0;
        for t in &self.transitions {
            max_query_advance = max_query_advance.max(t.advance_query);
            max_target_advance = max_target_advance.max(t.advance_target);
        }
        assert!(max_query_advance > 0 || max_target_advance > 0);
        debug!(
            "closed model [{}]: {} states, {} transitions, {} shadow slots",
            self.name,
            self.states.len(),
            self.transitions.len(),
            total_shadow_designations
        );
        let model = Model {
            name: self.name,
            states: self.states,
            transitions: self.transitions,
            calcs: self.calcs,
            shadows: self.shadows,
            portals: self.portals,
            spans: self.spans,
            start: self.start,
            end: self.end,
            init: self.init,
            exit: self.exit,
            total_shadow_designations,
            max_query_advance,
            max_target_advance,
        };
        Ok((model, permutation))
    }

    fn check_valid(&self) -> Result<(), ModelError> {
        assert!(self.states[START.0].input_transitions.is_empty(), "START has an input transition");
        assert!(self.states[END.0].output_transitions.is_empty(), "END has an output transition");
        for (i, state) in self.states.iter().enumerate() {
            if StateId(i) != START && state.input_transitions.is_empty() {
                return Err(ModelError::MissingInput(state.name.clone()));
            }
            if StateId(i) != END && state.output_transitions.is_empty() {
                return Err(ModelError::MissingOutput(state.name.clone()));
            }
        }
        for shadow in &self.shadows {
            if shadow.src_states.is_empty() || shadow.dst_transitions.is_empty() {
                return Err(ModelError::EmptyShadow(shadow.name.clone()));
            }
        }
        Ok(())
    }

    /// Reorder transitions into the canonical per-cell update order:
    /// emitting transitions in insertion order, then silent transitions
    /// with every producer before its consumers. The ordering is a fixpoint
    /// of itself, so closing a reopened model reproduces it exactly.
    fn topological_sort(&mut self) -> Result<Vec<usize>, ModelError> {
        let n = self.transitions.len();
        let silent: Vec<bool> = self.transitions.iter().map(|t| t.is_silent()).collect();
        // deps[t] = silent producers of t's input state not yet placed.
        let mut deps = vec![0usize; n];
        for (t, transition) in self.transitions.iter().enumerate() {
            if !silent[t] {
                continue;
            }
            for &b in &self.states[transition.input.0].input_transitions {
                if silent[b.0] {
                    deps[t] += 1;
                }
            }
        }
        let mut order: Vec<usize> = (0..n).filter(|&t| !silent[t]).collect();
        let mut placed = vec![false; n];
        let silent_total = n - order.len();
        let mut placed_count = 0;
        while placed_count < silent_total {
            let mut progressed = false;
            for t in 0..n {
                if !silent[t] || placed[t] || deps[t] != 0 {
                    continue;
                }
                placed[t] = true;
                placed_count += 1;
                progressed = true;
                order.push(t);
                let output = self.transitions[t].output;
                for &consumer in &self.states[output.0].output_transitions {
                    if silent[consumer.0] {
                        deps[consumer.0] -= 1;
                    }
                }
            }
            if !progressed {
                return Err(ModelError::SilentCycle);
            }
        }
        assert_eq!(order.len(), n);
        // Reorder and remap every transition reference.
        let mut old_to_new = vec![0usize; n];
        for (new, &old) in order.iter().enumerate() {
            old_to_new[old] = new;
        }
        let mut reordered = Vec::with_capacity(n);
        let mut old = std::mem::take(&mut self.transitions);
        for &i in &order {
            reordered.push(std::mem::replace(
                &mut old[i],
                Transition {
                    name: String::new(),
                    input: START,
                    output: END,
                    advance_query: 0,
                    advance_target: 0,
                    calc: None,
                    label: Label::None,
                    label_data: 0,
                    dst_shadows: Vec::new(),
                },
            ));
        }
        self.transitions = reordered;
        for state in &mut self.states {
            for t in &mut state.input_transitions {
                *t = TransitionId(old_to_new[t.0]);
            }
            for t in &mut state.output_transitions {
                *t = TransitionId(old_to_new[t.0]);
            }
        }
        for shadow in &mut self.shadows {
            for t in &mut shadow.dst_transitions {
                *t = TransitionId(old_to_new[t.0]);
            }
        }
        for span in &mut self.spans {
            span.query_loop = span.query_loop.map(|t| TransitionId(old_to_new[t.0]));
            span.target_loop = span.target_loop.map(|t| TransitionId(old_to_new[t.0]));
        }
        Ok(order)
    }

    /// Pack shadows into cell slots: shadows whose designation sets fit
    /// together share a slot. Returns the slot count.
    fn designate_shadows(&mut self) -> usize {
        let mut slots: Vec<Vec<bool>> = Vec::new();
        for i in 0..self.shadows.len() {
            let designation = self.shadow_designation(i);
            let mut assigned = None;
            for (slot, accumulated) in slots.iter_mut().enumerate() {
                if self.designation_fits(accumulated, &designation) {
                    for (master, &d) in accumulated.iter_mut().zip(&designation) {
                        if d {
                            assert!(!*master);
                            *master = true;
                        }
                    }
                    assigned = Some(slot);
                    break;
                }
            }
            self.shadows[i].designation = match assigned {
                Some(slot) => slot,
                None => {
                    slots.push(designation);
                    slots.len() - 1
                }
            };
        }
        slots.len()
    }

    /// Every transition reachable backward from the shadow's dst
    /// transitions, pruned at states in its src set.
    fn shadow_designation(&self, shadow: usize) -> Vec<bool> {
        let shadow = &self.shadows[shadow];
        let mut designated = vec![false; self.transitions.len()];
        let mut visited = vec![false; self.states.len()];
        let mut stack: Vec<TransitionId> = Vec::new();
        for &t in &shadow.dst_transitions {
            designated[t.0] = true;
            stack.push(t);
        }
        while let Some(t) = stack.pop() {
            let state = self.transitions[t.0].input;
            if visited[state.0] {
                continue;
            }
            visited[state.0] = true;
            if shadow.src_states.contains(&state) {
                continue;
            }
            for &u in &self.states[state.0].input_transitions {
                if !designated[u.0] {
                    designated[u.0] = true;
                    stack.push(u);
                }
            }
        }
        designated
    }

    /// Two designations fit iff they are transition-disjoint and neither's
    /// output states intersect the other's input states.
    fn designation_fits(&self, a: &[bool], b: &[bool]) -> bool {
        if a.iter().zip(b).any(|(&x, &y)| x && y) {
            return false;
        }
        let crosses = |from: &[bool], into: &[bool]| {
            let mut used = vec![false; self.states.len()];
            for (i, &set) in from.iter().enumerate() {
                if set {
                    used[self.transitions[i].output.0] = true;
                }
            }
            (0..self.transitions.len()).any(|i| into[i] && used[self.transitions[i].input.0])
        };
        !crosses(a, b) && !crosses(b, a)
    }

    fn finalise_portals(&mut self) {
        for p in 0..self.portals.len() {
            let calc = self.portals[p].calc;
            let transitions: Vec<TransitionId> = self
                .transitions
                .iter()
                .enumerate()
                .filter(|(_, t)| t.calc == Some(calc) && t.input == t.output)
                .map(|(i, _)| TransitionId(i))
                .collect();
            for &t in &transitions {
                assert_eq!(self.transitions[t.0].advance_query, self.portals[p].advance_query);
                assert_eq!(self.transitions[t.0].advance_target, self.portals[p].advance_target);
            }
            assert!(!transitions.is_empty(), "portal [{}] matches no transition", self.portals[p].name);
            self.portals[p].transitions = transitions;
        }
    }
}

impl<U> Model<U> {
    /// The open transition: a builder whose unmutated close reproduces this
    /// model exactly.
    pub fn reopen(&self) -> ModelBuilder<U> {
        ModelBuilder {
            name: self.name.clone(),
            states: self.states.clone(),
            transitions: self.transitions.clone(),
            calcs: self.calcs.clone(),
            shadows: self.shadows.clone(),
            portals: self.portals.clone(),
            spans: self.spans.clone(),
            start: self.start.clone(),
            end: self.end.clone(),
            init: self.init,
            exit: self.exit,
        }
    }
}

pub(crate) fn dfs_path(states: &[State], transitions: &[Transition], src: StateId, dst: StateId) -> bool {
    let mut visited = vec![false; states.len()];
    let mut stack = vec![src];
    visited[src.0] = true;
    while let Some(state) = stack.pop() {
        for &t in &states[state.0].output_transitions {
            let next = transitions[t.0].output;
            if next == dst {
                return true;
            }
            if !visited[next.0] {
                visited[next.0] = true;
                stack.push(next);
            }
        }
    }
    false
}
