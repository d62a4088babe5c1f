use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use tdp::{CalcDef, DpParams, Label, Mode, Model, ModelBuilder, Region, Scope, Score, Viterbi, ViterbiData, I};

struct Seqs {
    query: Vec<u8>,
    target: Vec<u8>,
}

fn substitution(q: I, t: I, user: &Seqs) -> Score {
    if user.query[q as usize] == user.target[t as usize] {
        5
    } else {
        -4
    }
}

fn affine() -> Arc<Model<Seqs>> {
    let mut b: ModelBuilder<Seqs> = ModelBuilder::new("bench affine");
    let m = b.add_state("match");
    let i = b.add_state("query insert");
    let d = b.add_state("target insert");
    let sub = b.add_calc(CalcDef::positional("substitute", 5, substitution));
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

fn bench_viterbi(c: &mut Criterion) {
    let model = affine();
    let alphabet = b"ACGT";
    let mut user = Seqs {
        query: (0..500).map(|i| alphabet[(i * 13 + 7) % 4]).collect(),
        target: (0..500).map(|i| alphabet[(i * 11 + 3) % 4]).collect(),
    };
    let region = Region::new(0, 0, 500, 500);
    let viterbi = Viterbi::new(&model, Mode::ScoreOnly, false, DpParams::default());
    c.bench_function("viterbi score 500x500", |b| {
        b.iter(|| {
            let mut data = ViterbiData::new(&viterbi, &region);
            viterbi.calculate(&mut data, &mut user, None)
        })
    });
}

criterion_group!(benches, bench_viterbi);
criterion_main!(benches);
