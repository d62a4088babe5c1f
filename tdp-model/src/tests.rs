use std::sync::Arc;

use tdp_types::{Score, I};

use crate::*;

fn match_score(q: I, t: I, _user: &()) -> Score {
    // Position parity stand-in; tests here only exercise the graph.
    ((q + t) % 2) * 5 - 4
}

fn shadow_start(_q: I, _t: I, _user: &mut ()) -> Score {
    0
}

fn shadow_end(_value: Score, _q: I, _t: I, _user: &mut ()) {}

/// START -> M -> {M, I, D} -> END affine model.
fn affine() -> Model<()> {
    let mut b: ModelBuilder<()> = ModelBuilder::new("affine");
    let m = b.add_state("match");
    let i = b.add_state("query insert");
    let d = b.add_state("target insert");
    let sub = b.add_calc(CalcDef::positional("substitute", 5, match_score));
    let open = b.add_calc(CalcDef::constant("gap open", -12));
    let extend = b.add_calc(CalcDef::constant("gap extend", -2));
    b.add_transition("start match", None, Some(m), 1, 1, Some(sub), Label::Match, 0);
    b.add_transition("match", Some(m), Some(m), 1, 1, Some(sub), Label::Match, 0);
    b.add_transition("open query gap", Some(m), Some(i), 1, 0, Some(open), Label::Gap, 0);
    b.add_transition("extend query gap", Some(i), Some(i), 1, 0, Some(extend), Label::Gap, 0);
    b.add_transition("close query gap", Some(i), Some(m), 1, 1, Some(sub), Label::Match, 0);
    b.add_transition("open target gap", Some(m), Some(d), 0, 1, Some(open), Label::Gap, 0);
    b.add_transition("extend target gap", Some(d), Some(d), 0, 1, Some(extend), Label::Gap, 0);
    b.add_transition("close target gap", Some(d), Some(m), 1, 1, Some(sub), Label::Match, 0);
    b.add_transition("end match", Some(m), None, 0, 0, None, Label::None, 0);
    b.close().unwrap()
}

#[test]
fn silent_producers_precede_consumers() {
    let mut b: ModelBuilder<()> = ModelBuilder::new("chain");
    let a = b.add_state("a");
    let c = b.add_state("b");
    let e = b.add_state("c");
    b.add_transition("emit", None, Some(a), 1, 1, None, Label::None, 0);
    b.add_transition("loop", Some(a), Some(a), 1, 1, None, Label::None, 0);
    b.add_transition("ab", Some(a), Some(c), 0, 0, None, Label::None, 0);
    b.add_transition("bc", Some(c), Some(e), 0, 0, None, Label::None, 0);
    b.add_transition("ce", Some(e), None, 0, 0, None, Label::None, 0);
    let model = b.close().unwrap();
    // Emitting transitions first, then one contiguous silent block.
    let first_silent = model.transitions.iter().position(|t| t.is_silent()).unwrap();
    assert_eq!(first_silent, 2);
    assert!(model.transitions[first_silent..].iter().all(|t| t.is_silent()));
    // Every silent producer of a silent transition's input sits earlier.
    for (i, t) in model.transitions.iter().enumerate() {
        if !t.is_silent() {
            continue;
        }
        for &p in &model.state(t.input).input_transitions {
            if model.transition(p).is_silent() {
                assert!(p.0 < i, "producer {} after consumer {}", model.transition(p).name, t.name);
            }
        }
    }
}

#[test]
fn silent_cycle_is_rejected() {
    let mut b: ModelBuilder<()> = ModelBuilder::new("cycle");
    let x = b.add_state("x");
    let y = b.add_state("y");
    b.add_transition("in", None, Some(x), 1, 1, None, Label::None, 0);
    b.add_transition("xy", Some(x), Some(y), 0, 0, None, Label::None, 0);
    b.add_transition("yx", Some(y), Some(x), 0, 0, None, Label::None, 0);
    b.add_transition("out", Some(y), None, 0, 0, None, Label::None, 0);
    assert_eq!(b.close().unwrap_err(), ModelError::SilentCycle);
}

#[test]
fn close_reopen_close_is_identity() {
    let model = affine();
    let again = model.reopen().close().unwrap();
    assert!(model.structure_eq(&again));
    // And a copy is indistinguishable as well.
    assert!(model.structure_eq(&model.clone()));
}

#[test]
fn validity_reports_dangling_states() {
    let mut b: ModelBuilder<()> = ModelBuilder::new("dangling");
    let m = b.add_state("m");
    b.add_state("orphan");
    b.add_transition("in", None, Some(m), 1, 1, None, Label::None, 0);
    b.add_transition("out", Some(m), None, 0, 0, None, Label::None, 0);
    assert_eq!(b.close().unwrap_err(), ModelError::MissingInput("orphan".to_owned()));
}

#[test]
fn unreachable_end_is_rejected() {
    let mut b: ModelBuilder<()> = ModelBuilder::new("split");
    let m = b.add_state("m");
    let n = b.add_state("n");
    b.add_transition("in", None, Some(m), 1, 1, None, Label::None, 0);
    b.add_transition("mm", Some(m), Some(m), 1, 1, None, Label::None, 0);
    // END fed only from a state that START never reaches.
    b.add_transition("nn", Some(n), Some(n), 1, 1, None, Label::None, 0);
    b.add_transition("out", Some(n), None, 0, 0, None, Label::None, 0);
    b.add_transition("loopback", Some(m), Some(m), 1, 0, None, Label::None, 0);
    let err = b.close().unwrap_err();
    assert!(matches!(err, ModelError::MissingOutput(_) | ModelError::NoStartToEndPath));
}

#[test]
fn stereo_duplicates_everything_but_terminals() {
    let model = affine();
    let states = model.states.len();
    let transitions = model.transitions.len();
    let mut b = model.reopen();
    b.make_stereo("+", "-");
    let stereo = b.close().unwrap();
    assert_eq!(stereo.states.len(), states * 2 - 2);
    assert_eq!(stereo.transitions.len(), transitions * 2);
    assert!(stereo.states.iter().skip(2).all(|s| s.name.ends_with('+') || s.name.ends_with('-')));
    // No edge crosses the halves.
    for t in &stereo.transitions {
        let side = |s: StateId| {
            let name = &stereo.state(s).name;
            if s == START || s == END {
                None
            } else if name.ends_with('+') {
                Some('+')
            } else {
                Some('-')
            }
        };
        let (a, z) = (side(t.input), side(t.output));
        if let (Some(a), Some(z)) = (a, z) {
            assert_eq!(a, z, "transition [{}] crosses strands", t.name);
        }
    }
}

#[test]
fn overlapping_shadows_get_distinct_slots() {
    let mut b: ModelBuilder<()> = ModelBuilder::new("chain shadows");
    let a = b.add_state("a");
    let c = b.add_state("b");
    let s1 = b.add_transition("sa", None, Some(a), 1, 1, None, Label::None, 0);
    let t1 = b.add_transition("ab", Some(a), Some(c), 1, 1, None, Label::None, 0);
    let t2 = b.add_transition("be", Some(c), None, 0, 0, None, Label::None, 0);
    b.add_shadow("x", Some(a), Some(t2), shadow_start, shadow_end);
    b.add_shadow("y", None, Some(t1), shadow_start, shadow_end);
    let _ = s1;
    let model = b.close().unwrap();
    assert_eq!(model.total_shadow_designations, 2);
    assert_ne!(model.shadows[0].designation, model.shadows[1].designation);
}

#[test]
fn parallel_shadows_share_a_slot() {
    let mut b: ModelBuilder<()> = ModelBuilder::new("parallel shadows");
    let a1 = b.add_state("a1");
    let a2 = b.add_state("a2");
    b.add_transition("s1", None, Some(a1), 1, 1, None, Label::None, 0);
    let ta = b.add_transition("ta", Some(a1), None, 0, 0, None, Label::None, 0);
    b.add_transition("s2", None, Some(a2), 1, 1, None, Label::None, 0);
    let tb = b.add_transition("tb", Some(a2), None, 0, 0, None, Label::None, 0);
    b.add_shadow("p", None, Some(ta), shadow_start, shadow_end);
    b.add_shadow("q", None, Some(tb), shadow_start, shadow_end);
    let model = b.close().unwrap();
    assert_eq!(model.total_shadow_designations, 1);
    assert_eq!(model.shadows[0].designation, model.shadows[1].designation);
}

#[test]
fn remove_all_shadows_clears_back_references() {
    let mut b: ModelBuilder<()> = ModelBuilder::new("shadowed");
    let a = b.add_state("a");
    b.add_transition("in", None, Some(a), 1, 1, None, Label::None, 0);
    let out = b.add_transition("out", Some(a), None, 0, 0, None, Label::None, 0);
    b.add_shadow("x", Some(a), Some(out), shadow_start, shadow_end);
    b.add_shadow("y", None, None, shadow_start, shadow_end);
    b.remove_all_shadows();
    let model = b.close().unwrap();
    assert!(model.shadows.is_empty());
    assert_eq!(model.total_shadow_designations, 0);
    assert!(model.states.iter().all(|s| s.src_shadows.is_empty()));
    assert!(model.transitions.iter().all(|t| t.dst_shadows.is_empty()));
}

#[test]
fn remove_state_prunes_both_transition_lists() {
    let model = affine();
    let insert_state = model
        .states
        .iter()
        .position(|s| s.name == "query insert")
        .map(StateId)
        .unwrap();
    let mut b = model.reopen();
    b.remove_state(insert_state);
    let trimmed = b.close().unwrap();
    assert_eq!(trimmed.states.len(), model.states.len() - 1);
    assert!(trimmed.transitions.iter().all(|t| !t.name.contains("query gap")));
    for (i, state) in trimmed.states.iter().enumerate() {
        for &t in state.input_transitions.iter().chain(&state.output_transitions) {
            let t = trimmed.transition(t);
            assert!(t.input.0 == i || t.output.0 == i);
        }
    }
}

#[test]
fn insert_dedupes_equivalent_calcs() {
    let insert = affine();
    let mut b: ModelBuilder<()> = ModelBuilder::new("outer");
    let hook = b.add_state("hook");
    b.add_calc(CalcDef::positional("substitute", 5, match_score));
    b.add_transition("enter", None, Some(hook), 1, 1, None, Label::None, 0);
    b.add_transition("leave", Some(hook), None, 0, 0, None, Label::None, 0);
    b.insert(&insert, Some(hook), None);
    let merged = b.close().unwrap();
    // The equivalent substitution calc merged; the two gap calcs arrived.
    assert_eq!(merged.calcs.len(), 3);
    assert_eq!(merged.states.len(), 3 + insert.states.len() - 2);
    assert_eq!(merged.transitions.len(), 2 + insert.transitions.len());
}

#[test]
fn derived_segment_agrees_with_original() {
    let model = Arc::new(affine());
    let m = model.states.iter().position(|s| s.name == "match").map(StateId).unwrap();
    let derived =
        DerivedModel::new(model.clone(), m, END, Scope::Corner, None, Scope::Corner, None).unwrap();
    assert_eq!(derived.derived.transitions.len(), derived.transition_map.len());
    for (i, t) in derived.derived.transitions.iter().enumerate() {
        let original = model.transition(derived.original_transition(TransitionId(i)));
        assert_eq!(t.advance_query, original.advance_query);
        assert_eq!(t.advance_target, original.advance_target);
        assert_eq!(t.label, original.label);
        match (t.calc, original.calc) {
            (None, None) => {}
            (Some(a), Some(b)) => {
                assert!(derived.derived.calcs[a.0].equivalent(&model.calcs[b.0]));
            }
            _ => panic!("calc mismatch on [{}]", t.name),
        }
    }
    // The query-gap island survives; the derived graph still closes, so
    // every interior state lies on a match..END path.
    assert!(derived.derived.path_is_possible(START, END));
}

#[test]
fn path_possible_respects_direction() {
    let model = affine();
    let m = model.states.iter().position(|s| s.name == "match").map(StateId).unwrap();
    assert!(model.path_is_possible(START, END));
    assert!(model.path_is_possible(m, END));
    assert!(!model.path_is_possible(END, START));
}
