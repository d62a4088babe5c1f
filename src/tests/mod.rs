//! End-to-end scenarios across the whole engine stack.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{
    AlignmentOp, CalcDef, DpParams, Hsp, Label, Mode, Model, ModelBuilder, PathFinder, Region,
    Scope, Score, Sdp, SdpPair, SubOpt, Viterbi, ViterbiData, I,
};

struct Seqs {
    query: Vec<u8>,
    target: Vec<u8>,
}

impl Seqs {
    fn new(query: &str, target: &str) -> Seqs {
        Seqs { query: query.as_bytes().to_vec(), target: target.as_bytes().to_vec() }
    }
}

fn substitution(q: I, t: I, user: &Seqs) -> Score {
    if user.query[q as usize] == user.target[t as usize] {
        5
    } else {
        -4
    }
}

/// Slightly position-jittered scores keep DP optima unique, so traceback
/// comparisons cannot drift apart on tie-breaks.
fn substitution_jitter(q: I, t: I, user: &Seqs) -> Score {
    if user.query[q as usize] == user.target[t as usize] {
        5 + (q * 2 + t) % 3
    } else {
        -4 - (q + t) % 2
    }
}

fn local_match_model() -> Arc<Model<Seqs>> {
    let mut b: ModelBuilder<Seqs> = ModelBuilder::new("local match");
    let m = b.add_state("match");
    let sub = b.add_calc(CalcDef::positional("substitute", 5, substitution));
    b.add_transition("seed match", None, Some(m), 1, 1, Some(sub), Label::Match, 0);
    b.add_transition("extend match", Some(m), Some(m), 1, 1, Some(sub), Label::Match, 0);
    b.add_transition("finish", Some(m), None, 0, 0, None, Label::None, 0);
    Arc::new(b.close().unwrap())
}

fn global_affine_model(jitter: bool) -> Arc<Model<Seqs>> {
    let mut b: ModelBuilder<Seqs> = ModelBuilder::new("global affine");
    let m = b.add_state("match");
    let i = b.add_state("query insert");
    let d = b.add_state("target insert");
    let sub = if jitter {
        b.add_calc(CalcDef::positional("substitute", 7, substitution_jitter))
    } else {
        b.add_calc(CalcDef::positional("substitute", 5, substitution))
    };
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
    b.add_transition("finish", Some(m), None, 0, 0, None, Label::None, 0);
    b.configure_start_state(Scope::Corner, None);
    b.configure_end_state(Scope::Corner, None);
    Arc::new(b.close().unwrap())
}

fn score_only(model: &Arc<Model<Seqs>>, user: &mut Seqs) -> Score {
    let region = Region::new(0, 0, user.query.len() as I, user.target.len() as I);
    let viterbi = Viterbi::new(model, Mode::ScoreOnly, false, DpParams::default());
    let mut data = ViterbiData::new(&viterbi, &region);
    viterbi.calculate(&mut data, user, None)
}

/// Scenario: the trivial one-state match model on identical sequences.
#[test]
fn trivial_match_model_scores_perfectly() {
    let mut user = Seqs::new("ACGT", "ACGT");
    assert_eq!(score_only(&local_match_model(), &mut user), 20);
}

/// Scenario: one single-column target gap under affine scoring.
#[test]
fn affine_gap_path() {
    let model = global_affine_model(false);
    let mut user = Seqs::new("ACGT", "ACCGT");
    let region = Region::new(0, 0, 4, 5);
    let viterbi = Viterbi::new(&model, Mode::FindPath, false, DpParams::default());
    let mut data = ViterbiData::new(&viterbi, &region);
    let score = viterbi.calculate(&mut data, &mut user, None);
    // Four matches and a single-column gap open.
    assert_eq!(score, 4 * 5 - 12);
    let alignment = viterbi.extract_alignment(&data);
    assert!(alignment.is_valid(&model));
    assert_eq!(alignment.region, region);
    let name = |op: &AlignmentOp| model.transition(op.transition).name.clone();
    let names: Vec<String> = alignment.ops.iter().map(name).collect();
    assert_eq!(names.iter().filter(|n| *n == "open target gap").count(), 1);
    assert!(names.iter().all(|n| !n.contains("extend")));
}

fn mutate(rng: &mut StdRng, base: &[u8]) -> Vec<u8> {
    let alphabet = b"ACGT";
    base.iter()
        .flat_map(|&c| {
            let roll: f64 = rng.gen();
            if roll < 0.04 {
                vec![alphabet[rng.gen_range(0..4)]] // substitution
            } else if roll < 0.06 {
                vec![] // deletion
            } else if roll < 0.08 {
                vec![c, alphabet[rng.gen_range(0..4)]] // insertion
            } else {
                vec![c]
            }
        })
        .collect()
}

/// Scenario: checkpointed and direct traceback agree on a large lattice.
#[test]
fn checkpoint_reconstruction_matches_direct_path() {
    let mut rng = StdRng::seed_from_u64(31415);
    let alphabet = b"ACGT";
    let query: Vec<u8> = (0..2000).map(|_| alphabet[rng.gen_range(0..4)]).collect();
    let mut target = mutate(&mut rng, &query);
    target.resize(2000, b'A');
    let mut user = Seqs { query, target };
    let region = Region::new(0, 0, 2000, 2000);
    let model = global_affine_model(true);

    // A generous budget takes the direct route, a tight one the
    // checkpointed route; the default policy would pick reduced here.
    let roomy =
        PathFinder::new(&model, DpParams { traceback_memory_limit: 1024, ..DpParams::default() });
    let tight =
        PathFinder::new(&model, DpParams { traceback_memory_limit: 8, ..DpParams::default() });
    let (direct_score, direct) = roomy.find_path_forced(&region, &mut user, None, false);
    let (reduced_score, reduced) = tight.find_path_forced(&region, &mut user, None, true);
    assert_eq!(direct_score, reduced_score);
    assert_eq!(direct.ops, reduced.ops);
    assert!(direct.is_valid(&model));
}

/// Scenario: the X-drop keeps two islands apart.
#[test]
fn sdp_enumerates_two_non_bridging_islands() {
    let alphabet = b"ACGT";
    let mut query: Vec<u8> = (0..700).map(|i| alphabet[(i * 13 + 7) % 4]).collect();
    let mut target = query.clone();
    for i in 340..365 {
        query[i] = b'A';
        target[i] = b'C';
    }
    let mut user = Seqs { query, target };
    let model = {
        let mut b: ModelBuilder<Seqs> = ModelBuilder::new("seeded match");
        let m = b.add_state("match");
        let sub = b.add_calc(CalcDef::positional("substitute", 5, substitution));
        b.add_transition("begin", None, Some(m), 0, 0, None, Label::None, 0);
        b.add_transition("match", Some(m), Some(m), 1, 1, Some(sub), Label::Match, 0);
        b.add_transition("finish", Some(m), None, 0, 0, None, Label::None, 0);
        b.add_portal("match portal", sub, 1, 1);
        Arc::new(b.close().unwrap())
    };
    let sdp = Sdp::new(&model, DpParams { dropoff: 20, ..DpParams::default() });
    assert!(!sdp.use_boundary);
    let hsps = [
        Hsp { query_cobs: 10, target_cobs: 10, score: 100 },
        Hsp { query_cobs: 500, target_cobs: 500, score: 100 },
    ];
    let mut pair = SdpPair::new(&sdp, 700, 700, &hsps);
    let mut subopt = SubOpt::new();

    let first = pair.next_path(&mut user, &subopt, 100).expect("first island");
    assert_eq!(first.score, 340 * 5);
    assert_eq!(first.region, Region::new(0, 0, 340, 340));
    subopt.add_alignment(&model, &first);

    let second = pair.next_path(&mut user, &subopt, 100).expect("second island");
    assert_eq!(second.score, 335 * 5);
    assert_eq!(second.region, Region::new(365, 365, 335, 335));
    assert!(second.score <= first.score);
    // Neither island bridges the mismatch wall.
    assert!(first.region.query_end() <= 340);
    assert!(second.region.query_start >= 365);
    subopt.add_alignment(&model, &second);

    assert!(pair.next_path(&mut user, &subopt, 100).is_none());
}

/// Scenario: a memoized intron span carries the path across 5000 target
/// columns and the forward pass lands exactly on the best terminal.
#[test]
fn span_thaw_reaches_the_far_terminal() {
    let alphabet = b"ACGT";
    let query: Vec<u8> = (0..300).map(|i| alphabet[(i * 11 + 3) % 4]).collect();
    let mut target = Vec::with_capacity(5300);
    target.extend_from_slice(&query[..100]);
    target.extend(std::iter::repeat(b'A').take(5000));
    target.extend_from_slice(&query[100..]);
    let mut user = Seqs { query, target };
    let model = {
        let mut b: ModelBuilder<Seqs> = ModelBuilder::new("seeded intron");
        let m = b.add_state("match");
        let s = b.add_state("intron");
        let sub = b.add_calc(CalcDef::positional("substitute", 5, substitution));
        let open = b.add_calc(CalcDef::constant("intron open", -30));
        let close = b.add_calc(CalcDef::constant("intron close", -10));
        b.add_transition("begin", None, Some(m), 0, 0, None, Label::None, 0);
        b.add_transition("match", Some(m), Some(m), 1, 1, Some(sub), Label::Match, 0);
        b.add_transition("five prime", Some(m), Some(s), 0, 1, Some(open), Label::FiveSs, 0);
        b.add_transition("intron loop", Some(s), Some(s), 0, 1, None, Label::Intron, 0);
        b.add_transition("three prime", Some(s), Some(m), 0, 1, Some(close), Label::ThreeSs, 0);
        b.add_transition("finish", Some(m), None, 0, 0, None, Label::None, 0);
        b.add_span("intron span", s, 0, 0, 20, 10_000);
        Arc::new(b.close().unwrap())
    };
    let sdp = Sdp::new(&model, DpParams { dropoff: 20, ..DpParams::default() });
    assert!(sdp.use_boundary);
    let hsps = [
        Hsp { query_cobs: 100, target_cobs: 100, score: 100 },
        Hsp { query_cobs: 200, target_cobs: 5200, score: 100 },
    ];
    let mut pair = SdpPair::new(&sdp, 300, 5300, &hsps);
    let subopt = SubOpt::new();
    let alignment = pair.next_path(&mut user, &subopt, 100).expect("spliced alignment");
    assert_eq!(alignment.region.query_end(), 300);
    assert_eq!(alignment.region.target_end(), 5300);
    assert_eq!(alignment.score, 300 * 5 - 30 - 10);
    assert!(alignment.is_valid(&model));
}

/// Scenario: stereo duplication doubles the graph and neither strand
/// disturbs the other.
#[test]
fn stereo_duplication_is_deterministic() {
    let single = global_affine_model(false);
    let states = single.states.len();
    let transitions = single.transitions.len();
    let mut b = single.reopen();
    b.make_stereo("+", "-");
    let stereo = Arc::new(b.close().unwrap());
    assert_eq!(stereo.states.len(), states * 2 - 2);
    assert_eq!(stereo.transitions.len(), transitions * 2);

    let mut user = Seqs::new("GATTACA", "GATCACA");
    let single_score = score_only(&single, &mut user);
    let stereo_score = score_only(&stereo, &mut user);
    // Both strands see the same scores, so the doubled model agrees with
    // the single-strand result.
    assert_eq!(single_score, stereo_score);
}
