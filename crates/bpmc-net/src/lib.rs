//! Petri-net models for bpmc.
//!
//! `types` holds the JSON description produced by external frontends, `net`
//! compiles it into a [`PetriNet`] and implements the concurrent step
//! semantics ([`Semantics`]) that the structure builder explores.

mod net;
mod types;

pub use net::{Configuration, PetriNet, Semantics, TransitionId, TransitionSet};
pub use types::*;

use thiserror::Error;

/// Net loading error.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid net JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("transition '{transition}' refers to unknown place '{place}'")]
    UnknownPlace { place: String, transition: String },

    #[error("unknown variable '{variable}' in {context}")]
    UnknownVariable { variable: String, context: String },

    #[error("firing '{transition}' overflows the token count of place '{place}'")]
    TokenOverflow { place: String, transition: String },

    #[error("transition '{transition}' has an invalid effect on '{variable}'")]
    InvalidEffect {
        variable: String,
        transition: String,
    },
}

pub type NetResult<T> = Result<T, NetError>;
