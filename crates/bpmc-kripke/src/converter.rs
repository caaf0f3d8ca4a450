//! Parallel construction of a Kripke structure from a net.
//!
//! Every state stands for a maximal set of concurrently enabled transitions.
//! Firing one transition of that set leads to one or more configurations;
//! each configuration's maximal sets become the successor candidates. The
//! exploration is a rayon fork-join: one task per (transition, resulting
//! configuration) continuation, all sharing one mutex-guarded [`Structure`].

use crate::state::{Signature, StateId};
use crate::structure::{Structure, DEFAULT_MAX_SIZE};
use crate::{KripkeError, KripkeResult, Limit};
use ahash::AHashSet;
use bpmc_net::{Semantics, TransitionId, TransitionSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, trace};

/// Lock-free progress counters, readable from another thread while a build
/// is running.
pub struct ProgressCounters {
    pub states: AtomicUsize,
    /// Continuations spawned so far.
    pub tasks: AtomicUsize,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self {
            states: AtomicUsize::new(0),
            tasks: AtomicUsize::new(0),
        }
    }
}

/// Configuration for structure construction.
#[derive(Clone)]
pub struct ConvertConfig {
    /// Hard ceiling on the number of states, and on the number of distinct
    /// configurations explored behind them.
    pub max_states: usize,
    /// Hard ceiling on the size of the proposition universe.
    pub max_propositions: usize,
    /// Worker threads (0 = rayon default).
    pub num_threads: usize,
    /// Qualify every signature with the configuration it was found in.
    /// Without tags, states with equal propositions fold together even when
    /// their markings differ; every folded configuration is still explored.
    pub tag_markings: bool,
    /// Data variables whose `var=value` bindings become propositions.
    pub observed_variables: Vec<String>,
    pub progress: Option<Arc<ProgressCounters>>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            max_states: DEFAULT_MAX_SIZE,
            max_propositions: DEFAULT_MAX_SIZE,
            num_threads: 0,
            tag_markings: false,
            observed_variables: Vec::new(),
            progress: None,
        }
    }
}

impl fmt::Debug for ConvertConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertConfig")
            .field("max_states", &self.max_states)
            .field("max_propositions", &self.max_propositions)
            .field("num_threads", &self.num_threads)
            .field("tag_markings", &self.tag_markings)
            .field("observed_variables", &self.observed_variables)
            .field("progress", &self.progress.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Decides whether `candidate` may follow a state whose set was `previous`
/// after `fired` fired: the candidate must keep every other transition of
/// `previous`.
///
/// Without this a transition that was committed to the current step could be
/// preempted by one that a silent transition enabled in between. For a
/// [`bpmc_net::PetriNet`] the rest of `previous` is always still enabled and
/// pairwise concurrent, so some maximal set passes; other [`Semantics`]
/// implementations may reject every candidate, in which case the converter
/// links all of them.
pub fn is_consistent_successor(
    previous: &[TransitionId],
    fired: TransitionId,
    candidate: &[TransitionId],
) -> bool {
    previous
        .iter()
        .filter(|&&t| t != fired)
        .all(|t| candidate.contains(t))
}

/// Builds structures for one net.
pub struct Converter<'n, N: Semantics> {
    net: &'n N,
    config: ConvertConfig,
    /// External stop flag (cancels a running build).
    stop_flag: Option<Arc<AtomicBool>>,
}

impl<'n, N: Semantics> Converter<'n, N> {
    pub fn new(net: &'n N, config: ConvertConfig) -> Self {
        Self {
            net,
            config,
            stop_flag: None,
        }
    }

    /// Set an external stop flag; raising it cancels the build.
    pub fn set_stop_flag(&mut self, flag: Arc<AtomicBool>) {
        self.stop_flag = Some(flag);
    }

    /// Explore the net and return the finished structure.
    pub fn convert(&self) -> KripkeResult<Structure> {
        let initial = self.net.initial_configuration();
        if self.net.is_empty(&initial) {
            return Err(KripkeError::MalformedInitialConfiguration {
                reason: "initial marking holds no token".to_string(),
            });
        }

        let mut builder = rayon::ThreadPoolBuilder::new();
        if self.config.num_threads > 0 {
            builder = builder.num_threads(self.config.num_threads);
        }
        let pool = builder.build()?;

        info!(
            threads = pool.current_num_threads(),
            max_states = self.config.max_states,
            tag_markings = self.config.tag_markings,
            "building structure"
        );
        let start = Instant::now();

        let build = Build {
            converter: self,
            shared: Mutex::new(Shared {
                structure: Structure::with_limits(
                    self.config.max_states,
                    self.config.max_propositions,
                ),
                visited: AHashSet::new(),
            }),
            abort: AtomicBool::new(false),
            failure: Mutex::new(None),
        };
        pool.install(|| rayon::scope(|scope| build.seed(scope, initial)));

        let Build {
            shared, failure, ..
        } = build;
        if let Some(err) = failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
            return Err(err);
        }
        if self.stopped_externally() {
            return Err(KripkeError::Cancelled);
        }
        let Shared {
            structure, visited, ..
        } = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
        info!(
            states = structure.len(),
            configurations = visited.len(),
            edges = structure.edge_count(),
            propositions = structure.propositions().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "structure built"
        );
        Ok(structure)
    }

    fn stopped_externally(&self) -> bool {
        self.stop_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }

    fn signature(&self, set: &[TransitionId], config: &N::Config) -> Signature {
        let mut props: Vec<String> = set
            .iter()
            .map(|&t| self.net.proposition(t).to_string())
            .collect();
        props.extend(
            self.net
                .binding_propositions(config, &self.config.observed_variables),
        );
        let sig = Signature::new(props);
        if self.config.tag_markings {
            sig.with_marking(self.net.tag(config))
        } else {
            sig
        }
    }
}

/// One pending continuation: `fired` (a member of `previous`) has fired out
/// of state `from`, producing `config`.
struct Step<C> {
    from: StateId,
    fired: TransitionId,
    previous: TransitionSet,
    config: C,
}

/// Everything the insert-or-get region guards.
///
/// States merge by signature, so one state can stand for several
/// configurations. Exploration is keyed on the (configuration, set) pair
/// instead, which makes the result independent of which configuration
/// reaches a signature first.
struct Shared<C> {
    structure: Structure,
    visited: AHashSet<(C, TransitionSet)>,
}

/// Shared state of a single build.
struct Build<'c, 'n, N: Semantics> {
    converter: &'c Converter<'n, N>,
    shared: Mutex<Shared<N::Config>>,
    /// Raised by the first failing task; checked before every fork.
    abort: AtomicBool,
    failure: Mutex<Option<KripkeError>>,
}

impl<'c, 'n, N: Semantics> Build<'c, 'n, N> {
    fn net(&self) -> &'n N {
        self.converter.net
    }

    fn should_stop(&self) -> bool {
        self.abort.load(Ordering::Relaxed) || self.converter.stopped_externally()
    }

    fn lock(&self) -> MutexGuard<'_, Shared<N::Config>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count_state(&self, is_new: bool) {
        if is_new {
            if let Some(p) = &self.converter.config.progress {
                p.states.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Insert-or-get the state for `set` in `config` (initial when `from` is
    /// `None`) and claim the pair for exploration. Returns the state and
    /// whether this caller has to explore it; `None` after a failure.
    fn visit(
        &self,
        from: Option<StateId>,
        set: &TransitionSet,
        config: &N::Config,
    ) -> Option<(StateId, bool)> {
        let sig = self.converter.signature(set, config);
        if let Some(from) = from {
            trace!(%from, to = %sig, "successor");
        }
        let mut shared = self.lock();
        let inserted = match from {
            Some(from) => shared.structure.add_next(from, sig),
            None => shared.structure.add_initial(sig),
        };
        let (id, is_new) = match inserted {
            Ok(r) => r,
            Err(err) => {
                drop(shared);
                self.fail(err);
                return None;
            }
        };
        self.count_state(is_new);

        let key = (config.clone(), set.clone());
        if shared.visited.contains(&key) {
            return Some((id, false));
        }
        let limit = self.converter.config.max_states;
        if shared.visited.len() >= limit {
            drop(shared);
            self.fail(KripkeError::LimitExceeded {
                what: Limit::Configurations,
                limit,
            });
            return None;
        }
        shared.visited.insert(key);
        Some((id, true))
    }

    /// Insert-or-get the self-looping sink for a dead configuration.
    fn visit_sink(&self, from: Option<StateId>, config: &N::Config) {
        let sig = self.converter.signature(&[], config);
        let mut shared = self.lock();
        let inserted = match from {
            Some(from) => shared.structure.add_next(from, sig),
            None => shared.structure.add_initial(sig),
        };
        match inserted {
            Ok((id, is_new)) => {
                shared.structure.add_edge(id, id);
                self.count_state(is_new);
            }
            Err(err) => {
                drop(shared);
                self.fail(err);
            }
        }
    }

    fn fail(&self, err: KripkeError) {
        self.abort.store(true, Ordering::Relaxed);
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            info!(error = %err, "aborting construction");
            *slot = Some(err);
        }
    }

    fn seed<'s>(&'s self, scope: &rayon::Scope<'s>, initial: N::Config) {
        let sets = self.net().parallel_enabled_sets(&initial);
        if sets.is_empty() {
            self.visit_sink(None, &initial);
            return;
        }
        debug!(count = sets.len(), "initial parallel sets");
        for set in &sets {
            let Some((id, explore)) = self.visit(None, set, &initial) else {
                return;
            };
            if explore {
                self.fork(scope, id, set, &initial);
            }
        }
    }

    fn fork<'s>(
        &'s self,
        scope: &rayon::Scope<'s>,
        from: StateId,
        set: &TransitionSet,
        config: &N::Config,
    ) {
        for &fired in set {
            let results = match self.net().fire(fired, config) {
                Ok(results) => results,
                Err(err) => {
                    self.fail(err.into());
                    return;
                }
            };
            for next in results {
                if self.should_stop() {
                    return;
                }
                if let Some(p) = &self.converter.config.progress {
                    p.tasks.fetch_add(1, Ordering::Relaxed);
                }
                let step = Step {
                    from,
                    fired,
                    previous: set.clone(),
                    config: next,
                };
                scope.spawn(move |s| self.explore(s, step));
            }
        }
    }

    fn explore<'s>(&'s self, scope: &rayon::Scope<'s>, step: Step<N::Config>) {
        if self.should_stop() {
            return;
        }
        let sets = self.net().parallel_enabled_sets(&step.config);

        if sets.is_empty() {
            self.visit_sink(Some(step.from), &step.config);
            return;
        }

        let consistent: Vec<&TransitionSet> = sets
            .iter()
            .filter(|candidate| is_consistent_successor(&step.previous, step.fired, candidate))
            .collect();
        let chosen = if consistent.is_empty() {
            debug!(
                from = %step.from,
                candidates = sets.len(),
                "no candidate keeps the pending transitions, linking all"
            );
            sets.iter().collect()
        } else {
            consistent
        };

        for set in chosen {
            let Some((id, explore)) = self.visit(Some(step.from), set, &step.config) else {
                return;
            };
            if explore {
                self.fork(scope, id, set, &step.config);
            }
        }
    }
}
