//! States of a Kripke structure and their canonical signatures.

use crate::block::BlockId;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Allocator id of a state. Carries no meaning beyond its structure: two
/// builds of the same net may number the same state differently.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub(crate) u32);

impl StateId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Canonical identity of a state: its atomic propositions, optionally
/// qualified by the marking it was discovered in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signature {
    marking: Option<String>,
    propositions: BTreeSet<String>,
}

impl Signature {
    pub fn new<I, S>(propositions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            marking: None,
            propositions: propositions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_marking(mut self, marking: impl Into<String>) -> Self {
        self.marking = Some(marking.into());
        self
    }

    pub fn marking(&self) -> Option<&str> {
        self.marking.as_deref()
    }

    pub fn propositions(&self) -> &BTreeSet<String> {
        &self.propositions
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(m) = &self.marking {
            write!(f, "{}", m)?;
        }
        write!(f, "{{")?;
        for (i, p) in self.propositions.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, "}}")
    }
}

/// A node of the structure.
///
/// Equality, ordering and hashing go through the signature only; the id and
/// the adjacency never take part.
#[derive(Debug, Clone)]
pub struct State {
    id: StateId,
    signature: Signature,
    /// Observable propositions. Starts equal to the signature's set and only
    /// shrinks when the structure is restricted.
    labels: BTreeSet<String>,
    pub(crate) successors: BTreeSet<StateId>,
    pub(crate) predecessors: BTreeSet<StateId>,
    /// Refinement scratch: owning block.
    pub(crate) block: Option<BlockId>,
    /// Refinement scratch: marked by the current splitter.
    pub(crate) flag: bool,
}

impl State {
    pub(crate) fn new(id: StateId, signature: Signature) -> Self {
        Self {
            id,
            labels: signature.propositions.clone(),
            signature,
            successors: BTreeSet::new(),
            predecessors: BTreeSet::new(),
            block: None,
            flag: false,
        }
    }

    #[inline]
    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    pub(crate) fn set_labels(&mut self, labels: BTreeSet<String>) {
        self.labels = labels;
    }

    pub fn successors(&self) -> &BTreeSet<StateId> {
        &self.successors
    }

    pub fn predecessors(&self) -> &BTreeSet<StateId> {
        &self.predecessors
    }

    /// True if the state is its own successor.
    pub fn has_self_loop(&self) -> bool {
        self.successors.contains(&self.id)
    }

    pub(crate) fn scratch_in_use(&self) -> bool {
        self.block.is_some() || self.flag
    }

    pub(crate) fn clear_scratch(&mut self) {
        self.block = None;
        self.flag = false;
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
    }
}

impl Eq for State {}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        self.signature.cmp(&other.signature)
    }
}

impl Hash for State {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature.hash(state);
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature)
    }
}
