//! Compiled Petri net and its concurrent step semantics.

use crate::types::NetDescription;
use crate::{NetError, NetResult};
use smallvec::SmallVec;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use tracing::debug;

/// Index of a transition in declaration order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransitionId(pub usize);

impl fmt::Debug for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t#{}", self.0)
    }
}

/// A sorted set of pairwise concurrent transitions.
pub type TransitionSet = SmallVec<[TransitionId; 4]>;

/// What the structure builder needs from a net.
///
/// Implementations must be cheap to share across worker threads: every method
/// takes `&self` and configurations are plain values.
pub trait Semantics: Sync {
    type Config: Clone + Eq + Hash + Send + Sync + fmt::Debug;

    /// The configuration exploration starts from.
    fn initial_configuration(&self) -> Self::Config;

    /// True if the configuration holds no token at all.
    fn is_empty(&self, config: &Self::Config) -> bool;

    fn is_enabled(&self, transition: TransitionId, config: &Self::Config) -> bool;

    /// All maximal sets of pairwise concurrently enabled transitions, each
    /// sorted, the list itself sorted. Empty when nothing is enabled.
    fn parallel_enabled_sets(&self, config: &Self::Config) -> Vec<TransitionSet>;

    /// Every configuration that can result from firing `transition`.
    fn fire(&self, transition: TransitionId, config: &Self::Config) -> NetResult<Vec<Self::Config>>;

    /// Atomic proposition contributed by a transition.
    fn proposition(&self, transition: TransitionId) -> &str;

    /// `var=value` propositions for the observed variables that are set.
    fn binding_propositions(&self, config: &Self::Config, observed: &[String]) -> Vec<String>;

    /// Human-readable rendering of a configuration, used as a marking tag.
    fn tag(&self, config: &Self::Config) -> String;
}

/// Token distribution plus data valuation.
///
/// Data values are interned per variable; `None` means unset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Configuration {
    pub marking: Vec<u32>,
    pub data: Vec<Option<u32>>,
}

#[derive(Debug, Clone)]
struct Transition {
    name: String,
    silent: bool,
    inputs: Vec<(usize, u32)>,
    outputs: Vec<(usize, u32)>,
    guard: Vec<(usize, u32)>,
    effects: Vec<(usize, Vec<u32>)>,
}

#[derive(Debug, Clone)]
struct Variable {
    name: String,
    values: Vec<String>,
}

/// A validated net with dense indices and a precomputed conflict relation.
#[derive(Debug, Clone)]
pub struct PetriNet {
    name: String,
    places: Vec<String>,
    transitions: Vec<Transition>,
    variables: Vec<Variable>,
    initial: Configuration,
    /// conflicts[a][b]: a and b may not fire in the same step.
    conflicts: Vec<Vec<bool>>,
}

impl PetriNet {
    /// Validate and compile a description.
    pub fn from_description(desc: &NetDescription) -> NetResult<Self> {
        let mut place_index: HashMap<&str, usize> = HashMap::new();
        for (i, p) in desc.places.iter().enumerate() {
            if place_index.insert(p.name.as_str(), i).is_some() {
                return Err(NetError::Duplicate {
                    kind: "place",
                    name: p.name.clone(),
                });
            }
        }

        let mut var_index: HashMap<&str, usize> = HashMap::new();
        let mut variables = Vec::with_capacity(desc.variables.len());
        for (i, v) in desc.variables.iter().enumerate() {
            if var_index.insert(v.name.as_str(), i).is_some() {
                return Err(NetError::Duplicate {
                    kind: "variable",
                    name: v.name.clone(),
                });
            }
            variables.push(Variable {
                name: v.name.clone(),
                values: Vec::new(),
            });
        }

        let lookup_place = |name: &str, transition: &str| {
            place_index
                .get(name)
                .copied()
                .ok_or_else(|| NetError::UnknownPlace {
                    place: name.to_string(),
                    transition: transition.to_string(),
                })
        };
        let lookup_var = |name: &str, context: &str| {
            var_index
                .get(name)
                .copied()
                .ok_or_else(|| NetError::UnknownVariable {
                    variable: name.to_string(),
                    context: context.to_string(),
                })
        };

        let mut seen_transitions = BTreeSet::new();
        let mut transitions = Vec::with_capacity(desc.transitions.len());
        for t in &desc.transitions {
            if !seen_transitions.insert(t.name.as_str()) {
                return Err(NetError::Duplicate {
                    kind: "transition",
                    name: t.name.clone(),
                });
            }
            let inputs = t
                .inputs
                .iter()
                .map(|a| Ok((lookup_place(&a.place, &t.name)?, a.weight)))
                .collect::<NetResult<Vec<_>>>()?;
            let outputs = t
                .outputs
                .iter()
                .map(|a| Ok((lookup_place(&a.place, &t.name)?, a.weight)))
                .collect::<NetResult<Vec<_>>>()?;
            let mut guard = Vec::with_capacity(t.guard.len());
            for g in &t.guard {
                let var = lookup_var(&g.variable, &t.name)?;
                guard.push((var, intern(&mut variables[var], &g.equals)));
            }
            let mut effects: Vec<(usize, Vec<u32>)> = Vec::with_capacity(t.effects.len());
            for e in &t.effects {
                let var = lookup_var(&e.variable, &t.name)?;
                if e.values.is_empty() || effects.iter().any(|(v, _)| *v == var) {
                    return Err(NetError::InvalidEffect {
                        variable: e.variable.clone(),
                        transition: t.name.clone(),
                    });
                }
                let values = e
                    .values
                    .iter()
                    .map(|v| intern(&mut variables[var], v))
                    .collect();
                effects.push((var, values));
            }
            transitions.push(Transition {
                name: t.name.clone(),
                silent: t.silent,
                inputs,
                outputs,
                guard,
                effects,
            });
        }

        let mut data = Vec::with_capacity(desc.variables.len());
        for (i, v) in desc.variables.iter().enumerate() {
            data.push(v.initial.as_deref().map(|val| intern(&mut variables[i], val)));
        }
        let initial = Configuration {
            marking: desc.places.iter().map(|p| p.tokens).collect(),
            data,
        };

        let conflicts = compute_conflicts(&transitions);
        debug!(
            net = %desc.name,
            places = desc.places.len(),
            transitions = transitions.len(),
            variables = variables.len(),
            "compiled net"
        );

        Ok(Self {
            name: desc.name.clone(),
            places: desc.places.iter().map(|p| p.name.clone()).collect(),
            transitions,
            variables,
            initial,
            conflicts,
        })
    }

    /// Parse a JSON description and compile it.
    pub fn from_json(json: &str) -> NetResult<Self> {
        let desc: NetDescription = serde_json::from_str(json)?;
        Self::from_description(&desc)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_places(&self) -> usize {
        self.places.len()
    }

    pub fn num_transitions(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_silent(&self, t: TransitionId) -> bool {
        self.transitions[t.0].silent
    }

    /// Names of all silent transitions.
    pub fn silent_propositions(&self) -> BTreeSet<String> {
        self.transitions
            .iter()
            .filter(|t| t.silent)
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn transition_id(&self, name: &str) -> Option<TransitionId> {
        self.transitions
            .iter()
            .position(|t| t.name == name)
            .map(TransitionId)
    }

    /// Fail if any observed variable is not declared.
    pub fn check_observed(&self, observed: &[String]) -> NetResult<()> {
        for name in observed {
            if !self.variables.iter().any(|v| &v.name == name) {
                return Err(NetError::UnknownVariable {
                    variable: name.clone(),
                    context: "observed variables".to_string(),
                });
            }
        }
        Ok(())
    }

    /// True if a and b can never share a step.
    pub fn in_conflict(&self, a: TransitionId, b: TransitionId) -> bool {
        self.conflicts[a.0][b.0]
    }

    fn enabled_transitions(&self, config: &Configuration) -> Vec<usize> {
        (0..self.transitions.len())
            .filter(|&i| self.is_enabled(TransitionId(i), config))
            .collect()
    }
}

impl Semantics for PetriNet {
    type Config = Configuration;

    fn initial_configuration(&self) -> Configuration {
        self.initial.clone()
    }

    fn is_empty(&self, config: &Configuration) -> bool {
        config.marking.iter().all(|&n| n == 0)
    }

    fn is_enabled(&self, transition: TransitionId, config: &Configuration) -> bool {
        let t = &self.transitions[transition.0];
        t.inputs.iter().all(|&(p, w)| config.marking[p] >= w)
            && t.guard.iter().all(|&(v, val)| config.data[v] == Some(val))
    }

    fn parallel_enabled_sets(&self, config: &Configuration) -> Vec<TransitionSet> {
        let enabled = self.enabled_transitions(config);
        if enabled.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        bron_kerbosch(
            &self.conflicts,
            &mut Vec::new(),
            enabled,
            Vec::new(),
            &mut out,
        );
        let mut sets: Vec<TransitionSet> = out
            .into_iter()
            .map(|mut clique| {
                clique.sort_unstable();
                clique.into_iter().map(TransitionId).collect()
            })
            .collect();
        sets.sort();
        sets
    }

    fn fire(
        &self,
        transition: TransitionId,
        config: &Configuration,
    ) -> NetResult<Vec<Configuration>> {
        let t = &self.transitions[transition.0];
        debug_assert!(self.is_enabled(transition, config));
        let mut base = config.clone();
        for &(p, w) in &t.inputs {
            base.marking[p] = base.marking[p].saturating_sub(w);
        }
        for &(p, w) in &t.outputs {
            base.marking[p] = base.marking[p]
                .checked_add(w)
                .ok_or_else(|| NetError::TokenOverflow {
                    place: self.places[p].clone(),
                    transition: t.name.clone(),
                })?;
        }

        let mut results = vec![base];
        for (var, values) in &t.effects {
            let mut next = Vec::with_capacity(results.len() * values.len());
            for cfg in &results {
                for &val in values {
                    let mut c = cfg.clone();
                    c.data[*var] = Some(val);
                    next.push(c);
                }
            }
            results = next;
        }
        results.sort();
        results.dedup();
        Ok(results)
    }

    fn proposition(&self, transition: TransitionId) -> &str {
        &self.transitions[transition.0].name
    }

    fn binding_propositions(&self, config: &Configuration, observed: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        for name in observed {
            let Some(i) = self.variables.iter().position(|v| &v.name == name) else {
                continue;
            };
            if let Some(val) = config.data[i] {
                out.push(format!("{}={}", name, self.variables[i].values[val as usize]));
            }
        }
        out
    }

    fn tag(&self, config: &Configuration) -> String {
        let mut s = String::from("{");
        let mut first = true;
        for (i, &n) in config.marking.iter().enumerate() {
            if n == 0 {
                continue;
            }
            if !first {
                s.push(',');
            }
            first = false;
            s.push_str(&format!("{}:{}", self.places[i], n));
        }
        s.push('}');
        for (i, val) in config.data.iter().enumerate() {
            if let Some(val) = val {
                let var = &self.variables[i];
                s.push_str(&format!("[{}={}]", var.name, var.values[*val as usize]));
            }
        }
        s
    }
}

fn intern(var: &mut Variable, value: &str) -> u32 {
    match var.values.iter().position(|v| v == value) {
        Some(i) => i as u32,
        None => {
            var.values.push(value.to_string());
            (var.values.len() - 1) as u32
        }
    }
}

/// Structural conflict: a shared input place, or a write that overlaps the
/// other transition's reads or writes.
fn compute_conflicts(transitions: &[Transition]) -> Vec<Vec<bool>> {
    let n = transitions.len();
    let reads: Vec<BTreeSet<usize>> = transitions
        .iter()
        .map(|t| t.guard.iter().map(|&(v, _)| v).collect())
        .collect();
    let writes: Vec<BTreeSet<usize>> = transitions
        .iter()
        .map(|t| t.effects.iter().map(|(v, _)| *v).collect())
        .collect();

    let mut conflicts = vec![vec![false; n]; n];
    for a in 0..n {
        for b in (a + 1)..n {
            let shared_input = transitions[a]
                .inputs
                .iter()
                .any(|(pa, _)| transitions[b].inputs.iter().any(|(pb, _)| pa == pb));
            let data = !writes[a].is_disjoint(&reads[b])
                || !writes[a].is_disjoint(&writes[b])
                || !writes[b].is_disjoint(&reads[a]);
            if shared_input || data {
                conflicts[a][b] = true;
                conflicts[b][a] = true;
            }
        }
    }
    conflicts
}

/// Enumerate maximal cliques of the compatibility graph (Bron–Kerbosch with
/// pivoting). Two transitions are adjacent when they do not conflict.
fn bron_kerbosch(
    conflicts: &[Vec<bool>],
    clique: &mut Vec<usize>,
    mut candidates: Vec<usize>,
    mut excluded: Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    if candidates.is_empty() {
        if excluded.is_empty() {
            out.push(clique.clone());
        }
        return;
    }
    let compatible = |a: usize, b: usize| a != b && !conflicts[a][b];
    let pivot = candidates
        .iter()
        .chain(excluded.iter())
        .copied()
        .max_by_key(|&u| candidates.iter().filter(|&&v| compatible(u, v)).count())
        .unwrap_or(candidates[0]);

    let branch: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&v| !compatible(pivot, v))
        .collect();
    for v in branch {
        clique.push(v);
        let next_candidates = candidates
            .iter()
            .copied()
            .filter(|&u| compatible(u, v))
            .collect();
        let next_excluded = excluded
            .iter()
            .copied()
            .filter(|&u| compatible(u, v))
            .collect();
        bron_kerbosch(conflicts, clique, next_candidates, next_excluded, out);
        clique.pop();
        candidates.retain(|&u| u != v);
        excluded.push(v);
    }
}
