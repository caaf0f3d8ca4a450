//! End-to-end checks on the demo nets shipped with the repository.

use bpmc_kripke::{
    verify_sets, ConvertConfig, Converter, Preprocessing, Signature, SpecificationSet, Structure,
    StutterConfig, StutterOptimizer,
};
use bpmc_net::PetriNet;
use std::collections::BTreeSet;

const EXCLUSIVE_CHOICE: &str = include_str!("../../../demos/exclusive-choice.json");
const EXCLUSIVE_CHOICE_SETS: &str = include_str!("../../../demos/exclusive-choice.sets.json");
const ORDER_HANDLING: &str = include_str!("../../../demos/order-handling.json");
const SHARED_SIGNATURE: &str = include_str!("../../../demos/shared-signature.json");

fn build(json: &str, config: ConvertConfig) -> Structure {
    let net = PetriNet::from_json(json).unwrap();
    Converter::new(&net, config).convert().unwrap()
}

fn keep(props: &[&str]) -> BTreeSet<String> {
    props.iter().map(|p| p.to_string()).collect()
}

#[test]
fn exclusive_choice_builds_seven_states() {
    let s = build(EXCLUSIVE_CHOICE, ConvertConfig::default());
    assert_eq!(s.len(), 7);
    assert_eq!(s.edge_count(), 9);
    assert_eq!(s.propositions().len(), 6);
}

#[test]
fn exclusive_choice_reduces_to_four_states() {
    for preprocessing in [Preprocessing::Flat, Preprocessing::ReachabilityTree] {
        let mut s = build(EXCLUSIVE_CHOICE, ConvertConfig::default());
        s.restrict_propositions(&keep(&["t0", "t5"]));
        let report = StutterOptimizer::new(StutterConfig { preprocessing })
            .optimize(&mut s)
            .unwrap();
        assert_eq!(s.len(), 4, "{preprocessing:?}");
        assert_eq!(s.edge_count(), 4, "{preprocessing:?}");
        assert_eq!(report.removed(), 3);

        let initial: Vec<_> = s.initial_states().iter().collect();
        assert_eq!(initial.len(), 1);
        assert_eq!(s[*initial[0]].signature(), &Signature::new(["t0"]));

        // The three guarded branches and t4 collapse onto t4.
        let t4 = s.find(&Signature::new(["t4"])).unwrap();
        assert!(s[*initial[0]].successors().contains(&t4));
        assert!(s[t4].labels().is_empty());

        let again = StutterOptimizer::default().optimize(&mut s).unwrap();
        assert_eq!(again.removed(), 0);
    }
}

#[test]
fn builds_agree_across_thread_counts() {
    for json in [EXCLUSIVE_CHOICE, ORDER_HANDLING, SHARED_SIGNATURE] {
        for tag_markings in [false, true] {
            let single = build(
                json,
                ConvertConfig {
                    num_threads: 1,
                    tag_markings,
                    ..ConvertConfig::default()
                },
            );
            for _ in 0..4 {
                let many = build(
                    json,
                    ConvertConfig {
                        num_threads: 8,
                        tag_markings,
                        ..ConvertConfig::default()
                    },
                );
                assert_eq!(single.signatures(), many.signatures());
                assert_eq!(single.signature_edges(), many.signature_edges());
            }
        }
    }
}

#[test]
fn folded_configurations_keep_both_futures() {
    let s = build(SHARED_SIGNATURE, ConvertConfig::default());
    assert_eq!(s.len(), 6);
    assert_eq!(s.edge_count(), 7);
    assert_eq!(s.propositions(), &keep(&["a", "b", "c", "d", "e"]));

    // Only d and e stay visible: c's state must still offer both.
    let mut reduced = s.clone();
    reduced.restrict_propositions(&keep(&["d", "e"]));
    StutterOptimizer::default().optimize(&mut reduced).unwrap();
    let c = reduced.find(&Signature::new(["c"])).unwrap();
    assert_eq!(reduced[c].successors().len(), 2);
}

#[test]
fn silent_audit_step_disappears_from_projection() {
    let net = PetriNet::from_json(ORDER_HANDLING).unwrap();
    let mut s = Converter::new(&net, ConvertConfig::default())
        .convert()
        .unwrap();
    let before = s.len();
    let visible: BTreeSet<String> = s
        .propositions()
        .difference(&net.silent_propositions())
        .cloned()
        .collect();
    s.restrict_propositions(&visible);
    let report = StutterOptimizer::default().optimize(&mut s).unwrap();
    assert_eq!(report.states_before, before);
    assert!(!s.propositions().contains("log"));
    assert!(s.states().iter().all(|st| !st.labels().contains("log")));
    assert!(s.ids().all(|id| !s[id].successors().is_empty()));
}

#[test]
fn demo_sets_run_through_the_pipeline() {
    let net = PetriNet::from_json(EXCLUSIVE_CHOICE).unwrap();
    let sets: Vec<SpecificationSet> = serde_json::from_str(EXCLUSIVE_CHOICE_SETS).unwrap();
    let results = verify_sets(
        net.name(),
        &net,
        &ConvertConfig::default(),
        Some(&StutterConfig::default()),
        &sets,
    );
    assert_eq!(results.len(), 2);

    let ends = results[0].as_ref().unwrap();
    assert_eq!(ends.set.name, "start-and-end");
    assert_eq!(ends.structure.len(), 4);

    let branches = results[1].as_ref().unwrap();
    assert!(branches.structure.propositions().contains("x=1"));
    assert!(branches.report.is_some());
}
