use tdp_types::{Protect, Region, Score, I};

/// Index of a state in [`Model::states`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub usize);

/// Index of a transition in [`Model::transitions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalcId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShadowId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortalId(pub usize);

/// The first two states of every model, by construction.
pub const START: StateId = StateId(0);
pub const END: StateId = StateId(1);

/// Where a terminal state may sit in the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Anywhere,
    Edge,
    Query,
    Target,
    Corner,
}

/// Semantic tag on a transition, used for reporting and subopt blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    None,
    Match,
    Gap,
    Ner,
    FiveSs,
    ThreeSs,
    Intron,
    SplitCodon,
    Frameshift,
}

/// Position-dependent score callback: `(query_pos, target_pos, user)`.
pub type CalcFn<U> = fn(I, I, &U) -> Score;

/// Side-effecting hook run once around a DP call.
pub type PrepFn<U> = fn(&Region, &mut U);

/// Shadow push: computes the value stored when a DP path leaves a src state.
pub type ShadowStartFn<U> = fn(I, I, &mut U) -> Score;

/// Shadow pop: consumes the transported value when a dst transition fires.
pub type ShadowEndFn<U> = fn(Score, I, I, &mut U);

/// Synthesizes a START cell in place; the slice is the full cell.
pub type CellStartFn<U> = fn(I, I, &mut U, &mut [Score]);

/// Observes an END cell.
pub type CellEndFn<U> = fn(&[Score], I, I, &mut U);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub name: String,
    pub input_transitions: Vec<TransitionId>,
    pub output_transitions: Vec<TransitionId>,
    pub src_shadows: Vec<ShadowId>,
}

impl State {
    pub(crate) fn new(name: &str) -> State {
        State {
            name: name.to_owned(),
            input_transitions: Vec::new(),
            output_transitions: Vec::new(),
            src_shadows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub name: String,
    pub input: StateId,
    pub output: StateId,
    pub advance_query: I,
    pub advance_target: I,
    pub calc: Option<CalcId>,
    pub label: Label,
    /// Opaque tag carried through composition, unused by the engines.
    pub label_data: u64,
    pub dst_shadows: Vec<ShadowId>,
}

impl Transition {
    /// Both advances zero: computed within a single lattice cell.
    #[inline]
    pub fn is_silent(&self) -> bool {
        self.advance_query == 0 && self.advance_target == 0
    }

    #[inline]
    pub fn is_match(&self) -> bool {
        self.label == Label::Match
    }
}

/// A scoring function bundled with its upper bound and prep hooks.
pub struct Calc<U> {
    pub name: String,
    pub max_score: Score,
    pub calc: Option<CalcFn<U>>,
    pub init: Option<PrepFn<U>>,
    pub exit: Option<PrepFn<U>>,
    pub protect: Protect,
}

impl<U> Clone for Calc<U> {
    fn clone(&self) -> Calc<U> {
        Calc {
            name: self.name.clone(),
            max_score: self.max_score,
            calc: self.calc,
            init: self.init,
            exit: self.exit,
            protect: self.protect,
        }
    }
}

impl<U> Calc<U> {
    /// Field-wise equality (callbacks by address); drives dedupe on insert.
    pub fn equivalent(&self, other: &Calc<U>) -> bool {
        self.max_score == other.max_score
            && self.calc == other.calc
            && self.init == other.init
            && self.exit == other.exit
            && self.protect == other.protect
    }
}

/// Open-form calc description passed to [`crate::ModelBuilder::add_calc`].
pub struct CalcDef<U> {
    pub name: &'static str,
    pub max_score: Score,
    pub calc: Option<CalcFn<U>>,
    pub init: Option<PrepFn<U>>,
    pub exit: Option<PrepFn<U>>,
    pub protect: Protect,
}

impl<U> CalcDef<U> {
    /// A plain position-dependent calc with no hooks or clamping.
    pub fn positional(name: &'static str, max_score: Score, calc: CalcFn<U>) -> CalcDef<U> {
        CalcDef { name, max_score, calc: Some(calc), init: None, exit: None, protect: Protect::NONE }
    }

    /// A constant-score calc.
    pub fn constant(name: &'static str, score: Score) -> CalcDef<U> {
        CalcDef { name, max_score: score, calc: None, init: None, exit: None, protect: Protect::NONE }
    }
}

/// A push/pop callback pair threaded along DP paths from any src state
/// until a dst transition pops it.
pub struct Shadow<U> {
    pub name: String,
    pub src_states: Vec<StateId>,
    pub dst_transitions: Vec<TransitionId>,
    pub start: ShadowStartFn<U>,
    pub end: ShadowEndFn<U>,
    /// Cell slot assigned at close; shadows that cannot coexist share one.
    pub designation: usize,
}

impl<U> Clone for Shadow<U> {
    fn clone(&self) -> Shadow<U> {
        Shadow {
            name: self.name.clone(),
            src_states: self.src_states.clone(),
            dst_transitions: self.dst_transitions.clone(),
            start: self.start,
            end: self.end,
            designation: self.designation,
        }
    }
}

/// A bounded self-loop whose contribution the seeded DP memoizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub name: String,
    pub span_state: StateId,
    pub min_query: I,
    pub max_query: I,
    pub min_target: I,
    pub max_target: I,
    /// Silent-cost query-advancing self-loop, when present.
    pub query_loop: Option<TransitionId>,
    /// Silent-cost target-advancing self-loop, when present.
    pub target_loop: Option<TransitionId>,
}

/// Self-loop transitions sharing one position-dependent calc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Portal {
    pub name: String,
    pub calc: CalcId,
    pub advance_query: I,
    pub advance_target: I,
    /// Recomputed at close.
    pub transitions: Vec<TransitionId>,
}

pub struct StartState<U> {
    pub state: StateId,
    pub scope: Scope,
    pub cell_start: Option<CellStartFn<U>>,
}

impl<U> Clone for StartState<U> {
    fn clone(&self) -> StartState<U> {
        StartState { state: self.state, scope: self.scope, cell_start: self.cell_start }
    }
}

pub struct EndState<U> {
    pub state: StateId,
    pub scope: Scope,
    pub cell_end: Option<CellEndFn<U>>,
}

impl<U> Clone for EndState<U> {
    fn clone(&self) -> EndState<U> {
        EndState { state: self.state, scope: self.scope, cell_end: self.cell_end }
    }
}

/// Graph-level precondition failures reported by
/// [`crate::ModelBuilder::close`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("state [{0}] has no input transition")]
    MissingInput(String),
    #[error("state [{0}] has no output transition")]
    MissingOutput(String),
    #[error("no path from START to END")]
    NoStartToEndPath,
    #[error("cycle of silent transitions")]
    SilentCycle,
    #[error("shadow [{0}] has an empty src or dst set")]
    EmptyShadow(String),
}

/// A closed, immutable transducer.
///
/// Produced by [`crate::ModelBuilder::close`]; share with `Arc` and reopen
/// with [`Model::reopen`]. Iterating [`Model::transitions`] in index order
/// is a valid per-cell update order: emitting transitions first, then
/// silent transitions with producers before consumers.
pub struct Model<U> {
    pub name: String,
    pub states: Vec<State>,
    pub transitions: Vec<Transition>,
    pub calcs: Vec<Calc<U>>,
    pub shadows: Vec<Shadow<U>>,
    pub portals: Vec<Portal>,
    pub spans: Vec<Span>,
    pub start: StartState<U>,
    pub end: EndState<U>,
    pub init: Option<PrepFn<U>>,
    pub exit: Option<PrepFn<U>>,
    pub total_shadow_designations: usize,
    pub max_query_advance: I,
    pub max_target_advance: I,
}

impl<U> Clone for Model<U> {
    fn clone(&self) -> Model<U> {
        Model {
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
            total_shadow_designations: self.total_shadow_designations,
            max_query_advance: self.max_query_advance,
            max_target_advance: self.max_target_advance,
        }
    }
}

impl<U> std::fmt::Debug for Model<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("states", &self.states.len())
            .field("transitions", &self.transitions.len())
            .finish()
    }
}

impl<U> Model<U> {
    #[inline]
    pub fn state(&self, id: StateId) -> &State {
        &self.states[id.0]
    }

    #[inline]
    pub fn transition(&self, id: TransitionId) -> &Transition {
        &self.transitions[id.0]
    }

    #[inline]
    pub fn shadow(&self, id: ShadowId) -> &Shadow<U> {
        &self.shadows[id.0]
    }

    #[inline]
    pub fn span(&self, id: SpanId) -> &Span {
        &self.spans[id.0]
    }

    pub fn is_global(&self) -> bool {
        self.start.scope == Scope::Corner && self.end.scope == Scope::Corner
    }

    pub fn is_local(&self) -> bool {
        self.start.scope == Scope::Anywhere && self.end.scope == Scope::Anywhere
    }

    /// Transitions carrying the given label, in model order.
    pub fn select_transitions(&self, label: Label) -> Vec<TransitionId> {
        (0..self.transitions.len())
            .map(TransitionId)
            .filter(|&t| self.transition(t).label == label)
            .collect()
    }

    /// The unique transition with the given label.
    pub fn select_single_transition(&self, label: Label) -> TransitionId {
        let list = self.select_transitions(label);
        assert_eq!(list.len(), 1, "expected exactly one [{label:?}] transition");
        list[0]
    }

    /// Depth-first reachability over output transitions.
    pub fn path_is_possible(&self, src: StateId, dst: StateId) -> bool {
        let mut visited = vec![false; self.states.len()];
        let mut stack = vec![src];
        visited[src.0] = true;
        while let Some(state) = stack.pop() {
            for &t in &self.state(state).output_transitions {
                let next = self.transition(t).output;
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

    /// Score of an optional calc at an absolute position.
    #[inline]
    pub fn calc_score(&self, calc: Option<CalcId>, query_pos: I, target_pos: I, user: &U) -> Score {
        match calc {
            None => 0,
            Some(id) => {
                let calc = &self.calcs[id.0];
                match calc.calc {
                    Some(f) => {
                        let score = f(query_pos, target_pos, user);
                        debug_assert!(score <= calc.max_score, "calc [{}] above max", calc.name);
                        score
                    }
                    None => calc.max_score,
                }
            }
        }
    }

    /// Run the model-level and per-calc init hooks, in that order.
    pub fn run_init_hooks(&self, region: &Region, user: &mut U) {
        if let Some(f) = self.init {
            f(region, user);
        }
        for calc in &self.calcs {
            if let Some(f) = calc.init {
                f(region, user);
            }
        }
    }

    /// Run the per-calc and model-level exit hooks, in that order.
    pub fn run_exit_hooks(&self, region: &Region, user: &mut U) {
        for calc in &self.calcs {
            if let Some(f) = calc.exit {
                f(region, user);
            }
        }
        if let Some(f) = self.exit {
            f(region, user);
        }
    }

    /// Structural equality: same graph, same ids, same callbacks.
    pub fn structure_eq(&self, other: &Model<U>) -> bool {
        self.states == other.states
            && self.transitions == other.transitions
            && self.calcs.len() == other.calcs.len()
            && self
                .calcs
                .iter()
                .zip(&other.calcs)
                .all(|(a, b)| a.name == b.name && a.equivalent(b))
            && self.shadows.len() == other.shadows.len()
            && self.shadows.iter().zip(&other.shadows).all(|(a, b)| {
                a.name == b.name
                    && a.src_states == b.src_states
                    && a.dst_transitions == b.dst_transitions
                    && a.start == b.start
                    && a.end == b.end
                    && a.designation == b.designation
            })
            && self.portals == other.portals
            && self.spans == other.spans
            && self.start.scope == other.start.scope
            && self.start.cell_start == other.start.cell_start
            && self.end.scope == other.end.scope
            && self.end.cell_end == other.end.cell_end
            && self.init == other.init
            && self.exit == other.exit
            && self.total_shadow_designations == other.total_shadow_designations
            && self.max_query_advance == other.max_query_advance
            && self.max_target_advance == other.max_target_advance
    }
}
