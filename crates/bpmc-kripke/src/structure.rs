//! Owning container for the states of a Kripke structure.

use crate::state::{Signature, State, StateId};
use crate::{KripkeError, KripkeResult, Limit};
use ahash::AHashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Index, IndexMut};

/// Default ceiling for both the state count and the proposition universe.
pub const DEFAULT_MAX_SIZE: usize = 5_000_000;

/// Arena of states with a signature index.
///
/// States live in a slot vector addressed by [`StateId`]; adjacency is stored
/// as id sets so the cyclic graph has no owning cycles. Removed states leave
/// an empty slot behind and their id is never reused.
#[derive(Debug, Clone)]
pub struct Structure {
    slots: Vec<Option<State>>,
    index: AHashMap<Signature, StateId>,
    initial: BTreeSet<StateId>,
    propositions: BTreeSet<String>,
    live: usize,
    max_states: usize,
    max_propositions: usize,
}

/// Size summary, mostly for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureStats {
    pub states: usize,
    pub edges: usize,
    pub initial: usize,
    pub propositions: usize,
}

impl fmt::Display for StructureStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} states, {} edges, {} initial, {} propositions",
            self.states, self.edges, self.initial, self.propositions
        )
    }
}

impl Structure {
    /// Create an empty structure with the default ceilings.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_SIZE, DEFAULT_MAX_SIZE)
    }

    /// Create an empty structure with explicit ceilings.
    pub fn with_limits(max_states: usize, max_propositions: usize) -> Self {
        Self {
            slots: Vec::new(),
            index: AHashMap::new(),
            initial: BTreeSet::new(),
            propositions: BTreeSet::new(),
            live: 0,
            max_states,
            max_propositions,
        }
    }

    /// Insert-or-get. Returns the canonical id and whether it was created.
    pub fn add_state(&mut self, signature: Signature) -> KripkeResult<(StateId, bool)> {
        if let Some(&id) = self.index.get(&signature) {
            return Ok((id, false));
        }
        if self.live >= self.max_states {
            return Err(KripkeError::LimitExceeded {
                what: Limit::States,
                limit: self.max_states,
            });
        }
        let fresh = signature
            .propositions()
            .iter()
            .filter(|p| !self.propositions.contains(*p))
            .count();
        if self.propositions.len() + fresh > self.max_propositions {
            return Err(KripkeError::LimitExceeded {
                what: Limit::Propositions,
                limit: self.max_propositions,
            });
        }
        let id = next_id(self.slots.len())?;
        self.propositions
            .extend(signature.propositions().iter().cloned());
        self.index.insert(signature.clone(), id);
        self.slots.push(Some(State::new(id, signature)));
        self.live += 1;
        Ok((id, true))
    }

    /// Insert-or-get a state and mark it initial.
    pub fn add_initial(&mut self, signature: Signature) -> KripkeResult<(StateId, bool)> {
        let (id, is_new) = self.add_state(signature)?;
        self.initial.insert(id);
        Ok((id, is_new))
    }

    /// Insert-or-get `next` and link `current -> next` in both directions.
    pub fn add_next(
        &mut self,
        current: StateId,
        next: Signature,
    ) -> KripkeResult<(StateId, bool)> {
        let (id, is_new) = self.add_state(next)?;
        self.add_edge(current, id);
        Ok((id, is_new))
    }

    /// Link two existing states. Returns false if the edge was already there.
    pub fn add_edge(&mut self, from: StateId, to: StateId) -> bool {
        if !self[from].successors.insert(to) {
            return false;
        }
        self[to].predecessors.insert(from);
        true
    }

    /// Mark an existing state initial.
    pub fn mark_initial(&mut self, id: StateId) {
        debug_assert!(self.state(id).is_some());
        self.initial.insert(id);
    }

    /// Detach and drop a state. The returned value keeps its own adjacency so
    /// callers can reroute the edges it had.
    pub fn remove_state(&mut self, id: StateId) -> Option<State> {
        let state = self.slots.get_mut(id.index())?.take()?;
        for &s in &state.successors {
            if s != id {
                self[s].predecessors.remove(&id);
            }
        }
        for &p in &state.predecessors {
            if p != id {
                self[p].successors.remove(&id);
            }
        }
        if self.index.get(state.signature()) == Some(&id) {
            self.index.remove(state.signature());
        }
        self.initial.remove(&id);
        self.live -= 1;
        Some(state)
    }

    /// Project every state's labels, and the proposition universe, onto
    /// `keep`. Signatures are untouched, so no two states merge here.
    pub fn restrict_propositions(&mut self, keep: &BTreeSet<String>) {
        for state in self.slots.iter_mut().flatten() {
            let labels = state.labels().intersection(keep).cloned().collect();
            state.set_labels(labels);
        }
        self.propositions.retain(|p| keep.contains(p));
    }

    pub fn state(&self, id: StateId) -> Option<&State> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn find(&self, signature: &Signature) -> Option<StateId> {
        self.index.get(signature).copied()
    }

    /// Live state ids in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = StateId> + '_ {
        self.slots.iter().flatten().map(State::id)
    }

    /// Live states ordered by signature.
    pub fn states(&self) -> Vec<&State> {
        let mut states: Vec<&State> = self.slots.iter().flatten().collect();
        states.sort();
        states
    }

    pub(crate) fn states_mut(&mut self) -> impl Iterator<Item = &mut State> + '_ {
        self.slots.iter_mut().flatten()
    }

    pub fn initial_states(&self) -> &BTreeSet<StateId> {
        &self.initial
    }

    pub fn is_initial(&self, id: StateId) -> bool {
        self.initial.contains(&id)
    }

    /// The proposition universe.
    pub fn propositions(&self) -> &BTreeSet<String> {
        &self.propositions
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn edge_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|s| s.successors.len())
            .sum()
    }

    pub fn stats(&self) -> StructureStats {
        StructureStats {
            states: self.live,
            edges: self.edge_count(),
            initial: self.initial.len(),
            propositions: self.propositions.len(),
        }
    }

    /// Every signature in the structure.
    pub fn signatures(&self) -> BTreeSet<Signature> {
        self.slots
            .iter()
            .flatten()
            .map(|s| s.signature().clone())
            .collect()
    }

    /// Every edge, named by the signatures of its endpoints.
    pub fn signature_edges(&self) -> BTreeSet<(Signature, Signature)> {
        let mut edges = BTreeSet::new();
        for state in self.slots.iter().flatten() {
            for &succ in &state.successors {
                edges.insert((state.signature().clone(), self[succ].signature().clone()));
            }
        }
        edges
    }
}

/// Id for the slot at `len`; ids are `u32`, whatever the configured ceiling.
fn next_id(len: usize) -> KripkeResult<StateId> {
    u32::try_from(len)
        .map(StateId)
        .map_err(|_| KripkeError::LimitExceeded {
            what: Limit::States,
            limit: u32::MAX as usize,
        })
}

impl Default for Structure {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<StateId> for Structure {
    type Output = State;

    /// Panics if the state was removed.
    fn index(&self, id: StateId) -> &State {
        match self.slots.get(id.index()) {
            Some(Some(state)) => state,
            _ => panic!("no live state {id}"),
        }
    }
}

impl IndexMut<StateId> for Structure {
    fn index_mut(&mut self, id: StateId) -> &mut State {
        match self.slots.get_mut(id.index()) {
            Some(Some(state)) => state,
            _ => panic!("no live state {id}"),
        }
    }
}
