//! Partition cells used by stutter refinement.

use crate::state::StateId;
use crate::structure::Structure;
use crate::{KripkeError, KripkeResult};
use std::collections::BTreeSet;
use std::mem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) usize);

/// A candidate equivalence class.
///
/// Members are split into bottom states (every successor leaves the block or
/// is the state itself) and non-bottom states. `entry` lists the states
/// outside the block with an edge into it. Membership is mirrored in each
/// state's `block` scratch field, which must be set before `init`.
#[derive(Debug, Default)]
pub(crate) struct Block {
    pub(crate) bottom: Vec<StateId>,
    pub(crate) non_bottom: Vec<StateId>,
    pub(crate) entry: Vec<StateId>,
    pub(crate) flag: bool,
}

impl Block {
    pub(crate) fn new(members: Vec<StateId>) -> Self {
        Self {
            non_bottom: members,
            ..Self::default()
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.bottom.len() + self.non_bottom.len()
    }

    pub(crate) fn members(&self) -> impl Iterator<Item = StateId> + '_ {
        self.bottom.iter().chain(self.non_bottom.iter()).copied()
    }

    /// Classify every member and collect entry states.
    pub(crate) fn init(&mut self, id: BlockId, structure: &Structure) {
        let mut members = mem::take(&mut self.bottom);
        members.append(&mut self.non_bottom);
        self.non_bottom = members;
        self.reinit(id, structure);
    }

    /// Promote non-bottom members that no longer have an in-block successor
    /// and rebuild the entry list. Returns the number of promoted states.
    pub(crate) fn reinit(&mut self, id: BlockId, structure: &Structure) -> usize {
        let mut promoted = 0;
        let mut remaining = Vec::with_capacity(self.non_bottom.len());
        for s in mem::take(&mut self.non_bottom) {
            if is_bottom(structure, id, s) {
                self.bottom.push(s);
                promoted += 1;
            } else {
                remaining.push(s);
            }
        }
        self.non_bottom = remaining;

        let mut entry = BTreeSet::new();
        for s in self.members() {
            for &p in structure[s].predecessors() {
                if structure[p].block != Some(id) {
                    entry.insert(p);
                }
            }
        }
        self.entry = entry.into_iter().collect();
        promoted
    }

    pub(crate) fn has_unflagged_bottom(&self, structure: &Structure) -> bool {
        self.bottom.iter().any(|&s| !structure[s].flag)
    }

    /// Split off every member that cannot reach a flagged member without
    /// leaving the block. Flagged states and their in-block ancestors stay;
    /// the rest form the returned block, registered as `new_id`. Flags of all
    /// members are lowered. Both halves still need `reinit`.
    pub(crate) fn split(
        &mut self,
        id: BlockId,
        new_id: BlockId,
        structure: &mut Structure,
    ) -> KripkeResult<Block> {
        if self.bottom.is_empty() {
            return Err(KripkeError::InternalConsistency(format!(
                "block {} reached split without bottom states",
                id.0
            )));
        }

        let mut stack: Vec<StateId> = self.members().filter(|&s| structure[s].flag).collect();
        while let Some(s) = stack.pop() {
            let preds: Vec<StateId> = structure[s].predecessors().iter().copied().collect();
            for p in preds {
                let state = &mut structure[p];
                if state.block == Some(id) && !state.flag {
                    state.flag = true;
                    stack.push(p);
                }
            }
        }

        let (bottom_keep, bottom_move): (Vec<_>, Vec<_>) =
            self.bottom.iter().copied().partition(|&s| structure[s].flag);
        let (non_bottom_keep, non_bottom_move): (Vec<_>, Vec<_>) =
            self.non_bottom.iter().copied().partition(|&s| structure[s].flag);

        for &s in bottom_move.iter().chain(non_bottom_move.iter()) {
            structure[s].block = Some(new_id);
        }
        for s in self.members() {
            structure[s].flag = false;
        }

        self.bottom = bottom_keep;
        self.non_bottom = non_bottom_keep;
        self.entry.clear();
        Ok(Block {
            bottom: bottom_move,
            non_bottom: non_bottom_move,
            entry: Vec::new(),
            flag: false,
        })
    }
}

fn is_bottom(structure: &Structure, id: BlockId, s: StateId) -> bool {
    structure[s]
        .successors()
        .iter()
        .all(|&t| t == s || structure[t].block != Some(id))
}
