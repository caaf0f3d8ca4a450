//! Criterion benchmarks for structure construction and stutter reduction.
//!
//! Run with: cargo bench -p bpmc-kripke

use bpmc_kripke::{ConvertConfig, Converter, Preprocessing, StutterConfig, StutterOptimizer};
use bpmc_net::{ArcDecl, NetDescription, PetriNet, PlaceDecl, TransitionDecl};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::collections::BTreeSet;

fn arc(place: String) -> ArcDecl {
    ArcDecl { place, weight: 1 }
}

fn transition(name: String, silent: bool, inputs: Vec<ArcDecl>, outputs: Vec<ArcDecl>) -> TransitionDecl {
    TransitionDecl {
        name,
        silent,
        inputs,
        outputs,
        guard: Vec::new(),
        effects: Vec::new(),
    }
}

/// `width` parallel branches of `depth` steps each, every other step silent.
fn fork_join(width: usize, depth: usize) -> PetriNet {
    let mut places = vec![
        PlaceDecl {
            name: "start".into(),
            tokens: 1,
        },
        PlaceDecl {
            name: "end".into(),
            tokens: 0,
        },
    ];
    let mut transitions = Vec::new();
    for i in 0..width {
        for j in 0..=depth {
            places.push(PlaceDecl {
                name: format!("b{i}_{j}"),
                tokens: 0,
            });
        }
        for j in 0..depth {
            transitions.push(transition(
                format!("t{i}_{j}"),
                j % 2 == 1,
                vec![arc(format!("b{i}_{j}"))],
                vec![arc(format!("b{i}_{}", j + 1))],
            ));
        }
    }
    transitions.push(transition(
        "fork".into(),
        false,
        vec![arc("start".into())],
        (0..width).map(|i| arc(format!("b{i}_0"))).collect(),
    ));
    transitions.push(transition(
        "join".into(),
        false,
        (0..width).map(|i| arc(format!("b{i}_{depth}"))).collect(),
        vec![arc("end".into())],
    ));
    let desc = NetDescription {
        name: format!("fork-join-{width}x{depth}"),
        places,
        transitions,
        variables: Vec::new(),
    };
    PetriNet::from_description(&desc).unwrap()
}

fn bench_convert(c: &mut Criterion) {
    let net = fork_join(4, 4);
    c.bench_function("convert_fork_join_4x4", |b| {
        b.iter(|| Converter::new(&net, ConvertConfig::default()).convert().unwrap())
    });
}

fn bench_reduce(c: &mut Criterion) {
    let net = fork_join(4, 4);
    let base = Converter::new(&net, ConvertConfig::default())
        .convert()
        .unwrap();
    let visible: BTreeSet<String> = ["fork", "join", "t0_0", "t1_0"]
        .into_iter()
        .map(String::from)
        .collect();

    for (name, preprocessing) in [
        ("reduce_flat_4x4", Preprocessing::Flat),
        ("reduce_tree_4x4", Preprocessing::ReachabilityTree),
    ] {
        let optimizer = StutterOptimizer::new(StutterConfig { preprocessing });
        c.bench_function(name, |b| {
            b.iter_batched(
                || {
                    let mut s = base.clone();
                    s.restrict_propositions(&visible);
                    s
                },
                |mut s| optimizer.optimize(&mut s).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, bench_convert, bench_reduce);
criterion_main!(benches);
