//! Stutter-equivalence reduction.
//!
//! Two states are stutter equivalent when every path from one can be matched
//! by a path from the other that differs only in how often each observable
//! label repeats. [`StutterOptimizer`] computes the coarsest such partition by
//! signature refinement and collapses every class onto one representative.
//! Labels are what the reduction compares; signatures only pick
//! representatives, which keeps the result independent of discovery order.

use crate::block::{Block, BlockId};
use crate::state::StateId;
use crate::structure::Structure;
use crate::{KripkeError, KripkeResult};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info};

/// How the initial partition is formed before refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocessing {
    /// One block per distinct label set.
    #[default]
    Flat,
    /// Blocks grow along label-equal edges from the initial states.
    ReachabilityTree,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StutterConfig {
    #[serde(default)]
    pub preprocessing: Preprocessing,
}

/// What a reduction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StutterReport {
    pub states_before: usize,
    pub states_after: usize,
    /// States absorbed while contracting label-equal cycles.
    pub cycle_states: usize,
    /// Blocks in the final partition.
    pub blocks: usize,
    pub splits: usize,
}

impl StutterReport {
    pub fn removed(&self) -> usize {
        self.states_before - self.states_after
    }
}

impl fmt::Display for StutterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} states ({} absorbed, {} in cycles), {} blocks after {} splits",
            self.states_before,
            self.states_after,
            self.removed(),
            self.cycle_states,
            self.blocks,
            self.splits
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct StutterOptimizer {
    config: StutterConfig,
}

impl StutterOptimizer {
    pub fn new(config: StutterConfig) -> Self {
        Self { config }
    }

    /// Replace `structure` by its stutter-equivalence quotient.
    ///
    /// Runs single threaded and leaves every scratch field cleared, also on
    /// failure. Fails without touching the structure if some scratch field is
    /// already in use.
    pub fn optimize(&self, structure: &mut Structure) -> KripkeResult<StutterReport> {
        if let Some(state) = structure.states().into_iter().find(|s| s.scratch_in_use()) {
            let err = KripkeError::InternalConsistency(format!(
                "refinement scratch of {} already in use",
                state.id()
            ));
            error!(%err, "stutter reduction refused");
            return Err(err);
        }

        let start = Instant::now();
        let states_before = structure.len();
        let cycle_states = contract_inert_cycles(structure);
        debug!(absorbed = cycle_states, "contracted label-equal cycles");

        let result = self.refine_and_collapse(structure);
        for state in structure.states_mut() {
            state.clear_scratch();
        }
        let (blocks, splits) = match result {
            Ok(counts) => counts,
            Err(err) => {
                error!(%err, "stutter reduction aborted");
                return Err(err);
            }
        };

        let report = StutterReport {
            states_before,
            states_after: structure.len(),
            cycle_states,
            blocks,
            splits,
        };
        info!(
            before = report.states_before,
            after = report.states_after,
            blocks = report.blocks,
            splits = report.splits,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "stutter reduction done"
        );
        Ok(report)
    }

    fn refine_and_collapse(&self, structure: &mut Structure) -> KripkeResult<(usize, usize)> {
        let groups = match self.config.preprocessing {
            Preprocessing::Flat => flat_groups(structure, structure.ids().collect()),
            Preprocessing::ReachabilityTree => tree_groups(structure),
        };
        debug!(
            strategy = ?self.config.preprocessing,
            blocks = groups.len(),
            "initial partition"
        );

        let mut partition = Partition::new(structure, groups)?;
        partition.refine(structure)?;
        debug!(
            blocks = partition.blocks.len(),
            splits = partition.splits,
            "partition stable"
        );
        partition.collapse(structure)?;
        Ok((partition.blocks.len(), partition.splits))
    }
}

/// Collapse every strongly connected component of label-equal edges into its
/// smallest-signature member. The survivor gets a self-loop since the run may
/// stay in the component forever. Returns the number of removed states.
fn contract_inert_cycles(structure: &mut Structure) -> usize {
    let mut removed = 0;
    for component in inert_components(structure) {
        let Some(&rep) = component.iter().min_by(|&&a, &&b| structure[a].cmp(&structure[b]))
        else {
            continue;
        };
        let members: BTreeSet<StateId> = component.iter().copied().collect();
        for &m in &component {
            if m == rep {
                continue;
            }
            let initial = structure.is_initial(m);
            let Some(state) = structure.remove_state(m) else {
                continue;
            };
            for &p in state.predecessors() {
                if !members.contains(&p) {
                    structure.add_edge(p, rep);
                }
            }
            for &s in state.successors() {
                if !members.contains(&s) {
                    structure.add_edge(rep, s);
                }
            }
            if initial {
                structure.mark_initial(rep);
            }
            removed += 1;
        }
        structure.add_edge(rep, rep);
    }
    removed
}

/// Non-trivial SCCs of the subgraph of label-equal, non-loop edges
/// (iterative Tarjan).
fn inert_components(structure: &Structure) -> Vec<Vec<StateId>> {
    const UNVISITED: usize = usize::MAX;

    let ids: Vec<StateId> = structure.ids().collect();
    let cap = ids.iter().map(|id| id.index() + 1).max().unwrap_or(0);
    let mut index = vec![UNVISITED; cap];
    let mut lowlink = vec![0; cap];
    let mut on_stack = vec![false; cap];
    let mut stack: Vec<StateId> = Vec::new();
    let mut next_index = 0;
    let mut components = Vec::new();

    let inert_successors = |v: StateId| -> Vec<StateId> {
        let state = &structure[v];
        state
            .successors()
            .iter()
            .copied()
            .filter(|&w| w != v && structure[w].labels() == state.labels())
            .collect()
    };

    for &root in &ids {
        if index[root.index()] != UNVISITED {
            continue;
        }
        let mut frames: Vec<(StateId, Vec<StateId>, usize)> = Vec::new();
        index[root.index()] = next_index;
        lowlink[root.index()] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root.index()] = true;
        frames.push((root, inert_successors(root), 0));

        while let Some((v, succs, pos)) = frames.last_mut() {
            let v = *v;
            if let Some(&w) = succs.get(*pos) {
                *pos += 1;
                if index[w.index()] == UNVISITED {
                    index[w.index()] = next_index;
                    lowlink[w.index()] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w.index()] = true;
                    frames.push((w, inert_successors(w), 0));
                } else if on_stack[w.index()] {
                    lowlink[v.index()] = lowlink[v.index()].min(index[w.index()]);
                }
                continue;
            }

            frames.pop();
            if lowlink[v.index()] == index[v.index()] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w.index()] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                if component.len() > 1 {
                    components.push(component);
                }
            }
            if let Some((parent, ..)) = frames.last() {
                let low = lowlink[v.index()];
                let parent = parent.index();
                lowlink[parent] = lowlink[parent].min(low);
            }
        }
    }
    components
}

/// Group `ids` by label set. Self-looping states always start alone.
fn flat_groups(structure: &Structure, ids: Vec<StateId>) -> Vec<Vec<StateId>> {
    let mut singles = Vec::new();
    let mut by_labels: BTreeMap<&BTreeSet<String>, Vec<StateId>> = BTreeMap::new();
    for id in ids {
        let state = &structure[id];
        if state.has_self_loop() {
            singles.push(vec![id]);
        } else {
            by_labels.entry(state.labels()).or_default().push(id);
        }
    }
    by_labels.into_values().chain(singles).collect()
}

/// Depth-first from each initial state: a label-equal successor joins the
/// current group, a label change opens a new one, and groups that meet again
/// along a label-equal edge are merged. Unreached states are grouped flat.
fn tree_groups(structure: &Structure) -> Vec<Vec<StateId>> {
    let mut sets = DisjointSets::default();
    let mut group_of: AHashMap<StateId, usize> = AHashMap::new();

    let inert = |u: StateId, v: StateId| {
        let (a, b) = (&structure[u], &structure[v]);
        !a.has_self_loop() && !b.has_self_loop() && a.labels() == b.labels()
    };

    for &root in structure.initial_states() {
        if group_of.contains_key(&root) {
            continue;
        }
        group_of.insert(root, sets.make());
        let mut stack = vec![root];
        while let Some(u) = stack.pop() {
            let gu = group_of[&u];
            for &v in structure[u].successors() {
                if v == u {
                    continue;
                }
                let same = inert(u, v);
                match group_of.get(&v) {
                    Some(&gv) => {
                        if same {
                            sets.union(gu, gv);
                        }
                    }
                    None => {
                        let g = if same { gu } else { sets.make() };
                        group_of.insert(v, g);
                        stack.push(v);
                    }
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<StateId>> = BTreeMap::new();
    let mut unreached = Vec::new();
    for id in structure.ids() {
        match group_of.get(&id) {
            Some(&g) => groups.entry(sets.find(g)).or_default().push(id),
            None => unreached.push(id),
        }
    }
    let mut result: Vec<Vec<StateId>> = groups.into_values().collect();
    result.extend(flat_groups(structure, unreached));
    result
}

#[derive(Debug, Default)]
struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn make(&mut self) -> usize {
        self.parent.push(self.parent.len());
        self.parent.len() - 1
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// Refinement state: every block lives in exactly one of the two lists.
struct Partition {
    blocks: Vec<Block>,
    to_process: BTreeSet<BlockId>,
    stable: BTreeSet<BlockId>,
    splits: usize,
}

impl Partition {
    fn new(structure: &mut Structure, groups: Vec<Vec<StateId>>) -> KripkeResult<Self> {
        for (i, members) in groups.iter().enumerate() {
            for &s in members {
                structure[s].block = Some(BlockId(i));
            }
        }
        let mut blocks: Vec<Block> = groups.into_iter().map(Block::new).collect();
        for (i, block) in blocks.iter_mut().enumerate() {
            block.init(BlockId(i), structure);
            if block.bottom.is_empty() {
                return Err(KripkeError::InternalConsistency(format!(
                    "initial block {i} of {} states has no bottom state",
                    block.len()
                )));
            }
        }
        Ok(Self {
            to_process: (0..blocks.len()).map(BlockId).collect(),
            stable: BTreeSet::new(),
            blocks,
            splits: 0,
        })
    }

    fn refine(&mut self, structure: &mut Structure) -> KripkeResult<()> {
        while let Some(splitter) = self.to_process.pop_first() {
            let entries = self.blocks[splitter.0].entry.clone();
            let mut marked = Vec::new();
            for &e in &entries {
                let state = &mut structure[e];
                state.flag = true;
                let Some(b) = state.block else {
                    return Err(KripkeError::InternalConsistency(format!(
                        "entry state {e} belongs to no block"
                    )));
                };
                if !self.blocks[b.0].flag {
                    self.blocks[b.0].flag = true;
                    marked.push(b);
                }
            }

            for &b in &marked {
                if self.blocks[b.0].has_unflagged_bottom(structure) {
                    self.split(b, structure)?;
                }
            }

            for b in marked {
                self.blocks[b.0].flag = false;
            }
            for e in entries {
                structure[e].flag = false;
            }
            self.stable.insert(splitter);
        }
        Ok(())
    }

    fn split(&mut self, id: BlockId, structure: &mut Structure) -> KripkeResult<()> {
        self.to_process.remove(&id);
        self.stable.remove(&id);

        let new_id = BlockId(self.blocks.len());
        let mut fresh = self.blocks[id.0].split(id, new_id, structure)?;
        let kept = &mut self.blocks[id.0];
        let promoted = kept.reinit(id, structure) + fresh.reinit(new_id, structure);
        if kept.bottom.is_empty() || fresh.bottom.is_empty() {
            return Err(KripkeError::InternalConsistency(format!(
                "splitting block {} left a half without bottom states",
                id.0
            )));
        }
        self.blocks.push(fresh);
        self.splits += 1;

        self.to_process.insert(id);
        self.to_process.insert(new_id);
        if promoted > 0 {
            self.to_process.append(&mut self.stable);
        }
        Ok(())
    }

    /// Merge every block onto its smallest-signature bottom state.
    fn collapse(&self, structure: &mut Structure) -> KripkeResult<()> {
        for (i, block) in self.blocks.iter().enumerate() {
            if block.len() < 2 {
                continue;
            }
            let id = BlockId(i);
            let rep = block
                .bottom
                .iter()
                .copied()
                .min_by(|&a, &b| structure[a].cmp(&structure[b]))
                .ok_or_else(|| {
                    KripkeError::InternalConsistency(format!("stable block {i} has no bottom state"))
                })?;

            for m in block.members().filter(|&m| m != rep) {
                let initial = structure.is_initial(m);
                let Some(state) = structure.remove_state(m) else {
                    continue;
                };
                for &p in state.predecessors() {
                    if p != m && structure[p].block != Some(id) {
                        structure.add_edge(p, rep);
                    }
                }
                for &s in state.successors() {
                    if s != m && structure[s].block != Some(id) {
                        structure.add_edge(rep, s);
                    }
                }
                if initial {
                    structure.mark_initial(rep);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Signature;

    fn sig(name: &str) -> Signature {
        Signature::new([name])
    }

    /// Build from named edges; every name not in `observable` ends up with
    /// an empty label set.
    fn build(edges: &[(&str, &str)], initial: &[&str], observable: &[&str]) -> Structure {
        let mut s = Structure::new();
        for &(from, to) in edges {
            let (f, _) = s.add_state(sig(from)).unwrap();
            s.add_next(f, sig(to)).unwrap();
        }
        for &i in initial {
            s.add_initial(sig(i)).unwrap();
        }
        s.restrict_propositions(&observable.iter().map(|p| p.to_string()).collect());
        s
    }

    fn id(s: &Structure, name: &str) -> StateId {
        s.find(&sig(name)).unwrap()
    }

    fn optimize(s: &mut Structure, preprocessing: Preprocessing) -> StutterReport {
        StutterOptimizer::new(StutterConfig { preprocessing })
            .optimize(s)
            .unwrap()
    }

    /// a -> s1 -> s2 -> s3 -> {b | c}, with b and c absorbing.
    fn silent_chain() -> Structure {
        build(
            &[
                ("a", "s1"),
                ("s1", "s2"),
                ("s2", "s3"),
                ("s3", "b"),
                ("s3", "c"),
                ("b", "b"),
                ("c", "c"),
            ],
            &["a"],
            &["a", "b", "c"],
        )
    }

    #[test]
    fn test_silent_chain_collapses_onto_branch_state() {
        let mut s = silent_chain();
        let report = optimize(&mut s, Preprocessing::Flat);
        assert_eq!(report.removed(), 2);
        assert_eq!(s.len(), 4);
        assert!(s.find(&sig("s1")).is_none());
        assert!(s.find(&sig("s2")).is_none());

        let (a, s3) = (id(&s, "a"), id(&s, "s3"));
        assert!(s[a].successors().contains(&s3));
        assert!(s[s3].successors().contains(&id(&s, "b")));
        assert!(s[s3].successors().contains(&id(&s, "c")));
        assert_eq!(s.edge_count(), 5);
        assert!(s.states().iter().all(|st| !st.scratch_in_use()));
    }

    #[test]
    fn test_second_pass_removes_nothing() {
        let mut s = silent_chain();
        optimize(&mut s, Preprocessing::Flat);
        let edges = s.signature_edges();
        let report = optimize(&mut s, Preprocessing::Flat);
        assert_eq!(report.removed(), 0);
        assert_eq!(report.splits, 0);
        assert_eq!(s.signature_edges(), edges);
    }

    #[test]
    fn test_removed_initial_member_is_replaced_by_representative() {
        let mut s = silent_chain();
        s.mark_initial(id(&s, "s1"));
        optimize(&mut s, Preprocessing::Flat);
        let initial: BTreeSet<StateId> = [id(&s, "a"), id(&s, "s3")].into_iter().collect();
        assert_eq!(s.initial_states(), &initial);
    }

    #[test]
    fn test_diverging_futures_split_a_block() {
        // u can still choose x, v is committed to y.
        let mut s = build(
            &[
                ("a", "u"),
                ("u", "v"),
                ("u", "x"),
                ("v", "y"),
                ("x", "x"),
                ("y", "y"),
            ],
            &["a"],
            &["a", "x", "y"],
        );
        let report = optimize(&mut s, Preprocessing::Flat);
        assert_eq!(report.removed(), 0);
        assert_eq!(report.splits, 1);
        assert_eq!(s.len(), 6);
    }

    #[test]
    fn test_label_equal_cycle_becomes_self_loop() {
        let mut s = build(
            &[("a", "u"), ("u", "v"), ("v", "u"), ("v", "b"), ("b", "b")],
            &["a"],
            &["a", "b"],
        );
        let report = optimize(&mut s, Preprocessing::Flat);
        assert_eq!(report.cycle_states, 1);
        assert_eq!(s.len(), 3);
        let u = id(&s, "u");
        assert!(s[u].has_self_loop());
        assert!(s[u].successors().contains(&id(&s, "b")));
        assert!(s[id(&s, "a")].successors().contains(&u));
    }

    #[test]
    fn test_tree_preprocessing_is_never_coarser() {
        // p and q are equivalent but unrelated in the search tree.
        let edges = [
            ("a", "p"),
            ("a", "q"),
            ("p", "b"),
            ("q", "b"),
            ("b", "b"),
        ];
        let mut flat = build(&edges, &["a"], &["a", "b"]);
        let mut tree = flat.clone();
        optimize(&mut flat, Preprocessing::Flat);
        optimize(&mut tree, Preprocessing::ReachabilityTree);
        assert_eq!(flat.len(), 3);
        assert!(tree.len() >= flat.len());

        let mut chain = silent_chain();
        assert_eq!(optimize(&mut chain, Preprocessing::ReachabilityTree).removed(), 2);
    }

    #[test]
    fn test_scratch_in_use_is_refused() {
        let mut s = silent_chain();
        let a = id(&s, "a");
        s[a].block = Some(BlockId(0));
        let err = StutterOptimizer::default().optimize(&mut s).unwrap_err();
        assert!(matches!(err, KripkeError::InternalConsistency(_)));
        assert_eq!(s.len(), 6);
    }

    #[test]
    fn test_report_display() {
        let report = StutterReport {
            states_before: 7,
            states_after: 4,
            cycle_states: 0,
            blocks: 4,
            splits: 0,
        };
        assert_eq!(
            report.to_string(),
            "7 -> 4 states (3 absorbed, 0 in cycles), 4 blocks after 0 splits"
        );
    }
}
