//! Build, restrict and reduce one structure per specification set.

use crate::converter::{ConvertConfig, Converter};
use crate::structure::Structure;
use crate::stutter::{StutterConfig, StutterOptimizer, StutterReport};
use crate::KripkeError;
use bpmc_net::Semantics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{info, warn};

/// A group of temporal formulas checked against one structure.
///
/// `propositions` lists the atomic propositions the formulas mention; the
/// structure is restricted to them before reduction. An empty list keeps
/// every proposition. `observe` names data variables whose bindings become
/// propositions in this set's build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecificationSet {
    pub name: String,
    #[serde(default)]
    pub propositions: BTreeSet<String>,
    #[serde(default)]
    pub observe: Vec<String>,
    #[serde(default)]
    pub ltl: Vec<String>,
    #[serde(default)]
    pub ctl: Vec<String>,
}

/// A structure ready for a model checker.
#[derive(Debug)]
pub struct VerifiedModel {
    pub set: SpecificationSet,
    pub structure: Structure,
    /// Present when the structure was reduced.
    pub report: Option<StutterReport>,
}

#[derive(Debug, Error)]
#[error("net '{net}', specification set '{set}': {source}")]
pub struct PipelineError {
    pub net: String,
    pub set: String,
    #[source]
    pub source: KripkeError,
}

/// Run every set independently. A set that fails does not stop the others;
/// results come back in input order.
pub fn verify_sets<N: Semantics>(
    net_name: &str,
    net: &N,
    convert: &ConvertConfig,
    stutter: Option<&StutterConfig>,
    sets: &[SpecificationSet],
) -> Vec<Result<VerifiedModel, PipelineError>> {
    sets.iter()
        .map(|set| {
            let result = verify_one(net, convert, stutter, set).map_err(|source| PipelineError {
                net: net_name.to_string(),
                set: set.name.clone(),
                source,
            });
            if let Err(err) = &result {
                warn!(net = net_name, set = %set.name, %err, "specification set failed");
            }
            result
        })
        .collect()
}

fn verify_one<N: Semantics>(
    net: &N,
    convert: &ConvertConfig,
    stutter: Option<&StutterConfig>,
    set: &SpecificationSet,
) -> Result<VerifiedModel, KripkeError> {
    let mut config = convert.clone();
    for var in &set.observe {
        if !config.observed_variables.contains(var) {
            config.observed_variables.push(var.clone());
        }
    }

    let mut structure = Converter::new(net, config).convert()?;
    if !set.propositions.is_empty() {
        structure.restrict_propositions(&set.propositions);
    }
    let report = match stutter {
        Some(cfg) => Some(StutterOptimizer::new(cfg.clone()).optimize(&mut structure)?),
        None => None,
    };
    info!(set = %set.name, stats = %structure.stats(), "specification set ready");
    Ok(VerifiedModel {
        set: set.clone(),
        structure,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Limit;
    use bpmc_net::PetriNet;

    const FORK_JOIN: &str = r#"{
        "name": "fork-join",
        "places": [
            {"name": "start", "tokens": 1}, {"name": "l"}, {"name": "r"},
            {"name": "l_done"}, {"name": "r_done"}, {"name": "end"}
        ],
        "variables": [{"name": "mode"}],
        "transitions": [
            {"name": "split", "inputs": [{"place": "start"}],
             "outputs": [{"place": "l"}, {"place": "r"}],
             "effects": [{"variable": "mode", "values": ["fast"]}]},
            {"name": "left", "inputs": [{"place": "l"}], "outputs": [{"place": "l_done"}]},
            {"name": "right", "inputs": [{"place": "r"}], "outputs": [{"place": "r_done"}]},
            {"name": "join", "inputs": [{"place": "l_done"}, {"place": "r_done"}],
             "outputs": [{"place": "end"}]}
        ]
    }"#;

    fn set(name: &str, props: &[&str]) -> SpecificationSet {
        SpecificationSet {
            name: name.to_string(),
            propositions: props.iter().map(|p| p.to_string()).collect(),
            ..SpecificationSet::default()
        }
    }

    #[test]
    fn test_sets_are_restricted_and_reduced_independently() {
        let net = PetriNet::from_json(FORK_JOIN).unwrap();
        let sets = [set("all", &[]), set("ends", &["split", "join"])];
        let results = verify_sets(
            "fork-join",
            &net,
            &ConvertConfig::default(),
            Some(&StutterConfig::default()),
            &sets,
        );
        assert_eq!(results.len(), 2);

        let all = results[0].as_ref().unwrap();
        assert_eq!(all.report.unwrap().removed(), 0);
        let ends = results[1].as_ref().unwrap();
        assert!(ends.structure.len() < all.structure.len());
        assert!(ends
            .structure
            .propositions()
            .iter()
            .all(|p| p == "split" || p == "join"));
    }

    #[test]
    fn test_failing_set_does_not_stop_the_others() {
        let net = PetriNet::from_json(FORK_JOIN).unwrap();
        // Four transition propositions fit; observing `mode` adds a fifth.
        let tight = ConvertConfig {
            max_propositions: 4,
            ..ConvertConfig::default()
        };
        let mut observing = set("observing", &[]);
        observing.observe.push("mode".to_string());
        let sets = [set("plain", &[]), observing, set("last", &["join"])];
        let results = verify_sets("fork-join", &net, &tight, None, &sets);
        assert_eq!(results.len(), 3);

        assert!(results[0].as_ref().unwrap().report.is_none());
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.net, "fork-join");
        assert_eq!(err.set, "observing");
        assert!(matches!(
            err.source,
            KripkeError::LimitExceeded {
                what: Limit::Propositions,
                limit: 4
            }
        ));
        assert_eq!(results[2].as_ref().unwrap().set.name, "last");
    }

    #[test]
    fn test_observed_bindings_are_per_set() {
        let net = PetriNet::from_json(FORK_JOIN).unwrap();
        let mut observing = set("observing", &[]);
        observing.observe.push("mode".to_string());
        let results = verify_sets(
            "fork-join",
            &net,
            &ConvertConfig::default(),
            None,
            &[observing, set("plain", &[])],
        );
        let with = &results[0].as_ref().unwrap().structure;
        let without = &results[1].as_ref().unwrap().structure;
        assert!(with.propositions().contains("mode=fast"));
        assert!(!without.propositions().contains("mode=fast"));
    }

    #[test]
    fn test_set_parses_with_defaults() {
        let set: SpecificationSet =
            serde_json::from_str(r#"{"name": "s", "ltl": ["G F join"]}"#).unwrap();
        assert!(set.propositions.is_empty());
        assert!(set.observe.is_empty());
        assert_eq!(set.ltl, vec!["G F join"]);
    }
}
