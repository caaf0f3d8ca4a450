//! Kripke structures for business-process verification.
//!
//! [`Converter`] builds a [`Structure`] from a net's concurrent step
//! semantics; [`StutterOptimizer`] shrinks it to its stutter-equivalence
//! quotient so that stutter-invariant formulas keep their truth value.

mod block;
pub mod converter;
pub mod pipeline;
pub mod state;
pub mod structure;
pub mod stutter;

pub use converter::{is_consistent_successor, ConvertConfig, Converter, ProgressCounters};
pub use pipeline::{verify_sets, PipelineError, SpecificationSet, VerifiedModel};
pub use state::{Signature, State, StateId};
pub use structure::{Structure, StructureStats, DEFAULT_MAX_SIZE};
pub use stutter::{Preprocessing, StutterConfig, StutterOptimizer, StutterReport};

use std::fmt;
use thiserror::Error;

/// Which ceiling a construction ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    States,
    Propositions,
    /// Distinct (configuration, parallel set) pairs explored.
    Configurations,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::States => write!(f, "state"),
            Limit::Propositions => write!(f, "proposition"),
            Limit::Configurations => write!(f, "configuration"),
        }
    }
}

/// Structure construction or reduction error.
#[derive(Debug, Error)]
pub enum KripkeError {
    #[error("{what} limit of {limit} exceeded")]
    LimitExceeded { what: Limit, limit: usize },

    #[error("malformed initial configuration: {reason}")]
    MalformedInitialConfiguration { reason: String },

    #[error("internal consistency violation: {0}")]
    InternalConsistency(String),

    #[error(transparent)]
    Net(#[from] bpmc_net::NetError),

    #[error("construction cancelled")]
    Cancelled,

    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type KripkeResult<T> = Result<T, KripkeError>;
