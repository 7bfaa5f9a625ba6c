//! Backtracking matcher over one event list
//!
//! Matching an expectation list against a path event list produces a
//! [`MatchSet`]: every distinct way the list can match, each recorded as
//! how many events were consumed, whether every limit held along the way,
//! and which futures are still outstanding. Nothing is pruned on resource
//! failure, so a caller can tell "structurally matched but over budget"
//! apart from "did not match".
//!
//! The list is walked left to right over a frontier of states. When an
//! expectation cannot match from some state, each outstanding future is
//! tried at that same offset before the state is abandoned.

use super::{ExpEvent, FutureId, RecognizerRegistry};
use crate::aggregate::{evaluate, truthy, PathEnv};
use crate::limit::{all_hold, Limit};
use crate::path::{Path, PathEvent};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

/// Nested sub-matches allowed before a search is abandoned
pub const MAX_NESTING: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("search budget exhausted after {explored} steps")]
    BudgetExhausted { explored: u64 },
    #[error("expectations nest deeper than {limit} levels")]
    TooDeep { limit: usize },
}

/// Outstanding instances of each future
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FutureCounts(BTreeMap<FutureId, u32>);

impl FutureCounts {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, id: FutureId) -> u32 {
        self.0.get(&id).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, id: FutureId) {
        *self.0.entry(id).or_default() += 1;
    }

    /// Consume one instance; false when none was outstanding
    pub fn decrement(&mut self, id: FutureId) -> bool {
        match self.0.get_mut(&id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.0.remove(&id);
                true
            }
            None => false,
        }
    }

    pub fn outstanding(&self) -> impl Iterator<Item = FutureId> + '_ {
        self.0.keys().copied()
    }
}

/// One way a list can match
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchState {
    /// Events consumed at this level
    pub offset: usize,
    pub resources_ok: bool,
    pub futures: FutureCounts,
}

impl MatchState {
    pub fn start() -> Self {
        Self::at(0)
    }

    pub fn at(offset: usize) -> Self {
        MatchState {
            offset,
            resources_ok: true,
            futures: FutureCounts::default(),
        }
    }

    fn advance(&self, ok: bool) -> Self {
        MatchState {
            offset: self.offset + 1,
            resources_ok: self.resources_ok && ok,
            futures: self.futures.clone(),
        }
    }
}

pub type MatchSet = BTreeSet<MatchState>;

fn single(state: MatchState) -> MatchSet {
    MatchSet::from([state])
}

/// Acceptance rules of one matching attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchFlags {
    /// Every event at this level must be consumed
    pub match_all: bool,
    /// No future may remain outstanding
    pub match_all_futures: bool,
    /// Stop at the first accepted state
    pub find_one: bool,
    pub allow_futures: bool,
}

impl MatchFlags {
    /// A whole thread pool against a thread body
    pub const THREAD: MatchFlags = MatchFlags {
        match_all: true,
        match_all_futures: true,
        find_one: false,
        allow_futures: true,
    };

    /// A fragment body against any window of a list
    pub const FRAGMENT: MatchFlags = MatchFlags {
        match_all: false,
        match_all_futures: true,
        find_one: false,
        allow_futures: true,
    };

    pub fn first_only(self) -> Self {
        MatchFlags {
            find_one: true,
            ..self
        }
    }

    /// Bodies of structural operators: partial consumption, futures carried out
    fn nested(self) -> Self {
        MatchFlags {
            match_all: false,
            match_all_futures: false,
            find_one: false,
            ..self
        }
    }

    /// Children of a matched task must all be consumed
    fn children(self) -> Self {
        MatchFlags {
            match_all: true,
            ..self.nested()
        }
    }
}

/// Search state shared by every sub-match of one recognizer check
pub struct MatchContext<'a> {
    registry: &'a RecognizerRegistry,
    path: &'a Path,
    budget: Option<u64>,
    explored: u64,
    depth: usize,
}

impl<'a> MatchContext<'a> {
    /// # Arguments
    ///
    /// * `budget` - Steps allowed before [`MatchError::BudgetExhausted`]
    pub fn new(registry: &'a RecognizerRegistry, path: &'a Path, budget: Option<u64>) -> Self {
        MatchContext {
            registry,
            path,
            budget,
            explored: 0,
            depth: 0,
        }
    }

    pub fn path(&self) -> &'a Path {
        self.path
    }

    pub fn registry(&self) -> &'a RecognizerRegistry {
        self.registry
    }

    /// Search steps taken so far
    pub fn explored(&self) -> u64 {
        self.explored
    }

    fn tick(&mut self) -> Result<(), MatchError> {
        self.explored += 1;
        match self.budget {
            Some(budget) if self.explored > budget => Err(MatchError::BudgetExhausted {
                explored: self.explored,
            }),
            _ => Ok(()),
        }
    }

    /// Match `exps` against `events` from offset zero
    pub fn match_list(
        &mut self,
        exps: &[ExpEvent],
        events: &[PathEvent],
        flags: MatchFlags,
    ) -> Result<MatchSet, MatchError> {
        self.match_from(exps, events, MatchState::start(), flags)
    }

    /// Match `exps` against `events` starting from `state`
    pub fn match_from(
        &mut self,
        exps: &[ExpEvent],
        events: &[PathEvent],
        state: MatchState,
        flags: MatchFlags,
    ) -> Result<MatchSet, MatchError> {
        self.seq(exps, events, single(state), flags)
    }

    fn seq(
        &mut self,
        exps: &[ExpEvent],
        events: &[PathEvent],
        initial: MatchSet,
        flags: MatchFlags,
    ) -> Result<MatchSet, MatchError> {
        if self.depth >= MAX_NESTING {
            return Err(MatchError::TooDeep { limit: MAX_NESTING });
        }
        self.depth += 1;
        let result = self.seq_inner(exps, events, initial, flags);
        self.depth -= 1;
        result
    }

    fn seq_inner(
        &mut self,
        exps: &[ExpEvent],
        events: &[PathEvent],
        initial: MatchSet,
        flags: MatchFlags,
    ) -> Result<MatchSet, MatchError> {
        let mut frontier = initial;
        for exp in exps {
            let mut next = MatchSet::new();
            let mut seen = MatchSet::new();
            let mut work: Vec<MatchState> = frontier.into_iter().collect();
            while let Some(state) = work.pop() {
                if !seen.insert(state.clone()) {
                    continue;
                }
                self.tick()?;
                let stepped = self.step(exp, events, &state, flags)?;
                if !stepped.is_empty() {
                    next.extend(stepped);
                } else if flags.allow_futures {
                    work.extend(self.probe_futures(events, &state, flags)?);
                }
            }
            if next.is_empty() {
                return Ok(next);
            }
            frontier = next;
        }

        let mut accepted = MatchSet::new();
        let mut seen = MatchSet::new();
        let mut work: Vec<MatchState> = frontier.into_iter().collect();
        while let Some(state) = work.pop() {
            if !seen.insert(state.clone()) {
                continue;
            }
            self.tick()?;
            let consumed = !flags.match_all || state.offset == events.len();
            let discharged = !flags.match_all_futures || state.futures.is_empty();
            if consumed && discharged {
                accepted.insert(state);
                if flags.find_one {
                    break;
                }
            } else if flags.allow_futures {
                work.extend(self.probe_futures(events, &state, flags)?);
            }
        }
        Ok(accepted)
    }

    /// States reached by discharging one outstanding future at `state`
    fn probe_futures(
        &mut self,
        events: &[PathEvent],
        state: &MatchState,
        flags: MatchFlags,
    ) -> Result<Vec<MatchState>, MatchError> {
        let registry = self.registry;
        let mut reached = Vec::new();
        let outstanding: Vec<FutureId> = state.futures.outstanding().collect();
        for id in outstanding {
            let mut reduced = state.clone();
            reduced.futures.decrement(id);
            let body = registry.future_body(id);
            reached.extend(self.seq(body, events, single(reduced), flags.nested())?);
        }
        Ok(reached)
    }

    fn message_ok(&self, index: usize, limits: &[Limit]) -> bool {
        self.path
            .message(index)
            .is_some_and(|message| all_hold(limits, message))
    }

    fn step(
        &mut self,
        exp: &ExpEvent,
        events: &[PathEvent],
        state: &MatchState,
        flags: MatchFlags,
    ) -> Result<MatchSet, MatchError> {
        let next = events.get(state.offset);
        let mut out = MatchSet::new();
        match exp {
            ExpEvent::Task {
                name,
                limits,
                children,
            } => {
                let Some(PathEvent::Task(task)) = next else {
                    return Ok(out);
                };
                if !name.matches(&task.name) {
                    return Ok(out);
                }
                let inner = MatchState {
                    offset: 0,
                    resources_ok: state.resources_ok && all_hold(limits, task),
                    futures: state.futures.clone(),
                };
                let matched = self.seq(children, &task.children, single(inner), flags.children())?;
                for child in matched {
                    out.insert(MatchState {
                        offset: state.offset + 1,
                        resources_ok: child.resources_ok,
                        futures: child.futures,
                    });
                }
            }
            ExpEvent::Notice { name } => {
                if let Some(PathEvent::Notice(notice)) = next {
                    if name.matches(&notice.name) {
                        out.insert(state.advance(true));
                    }
                }
            }
            ExpEvent::Send { limits } => {
                if let Some(PathEvent::Send(endpoint)) = next {
                    out.insert(state.advance(self.message_ok(endpoint.message, limits)));
                }
            }
            ExpEvent::Recv { limits } => {
                if let Some(PathEvent::Recv(endpoint)) = next {
                    out.insert(state.advance(self.message_ok(endpoint.message, limits)));
                }
            }
            ExpEvent::Any => {
                if next.is_some() {
                    out.insert(state.advance(true));
                }
            }
            ExpEvent::Repeat { min, max, body } => {
                out = self.repeat(*min, *max, body, events, state, flags)?;
            }
            ExpEvent::Xor { branches } => {
                for branch in branches {
                    out.extend(self.seq(branch, events, single(state.clone()), flags.nested())?);
                }
            }
            ExpEvent::Call { target } => {
                let registry = self.registry;
                let body = registry
                    .path_recognizer(*target)
                    .map(|rec| rec.root_body())
                    .unwrap_or(&[]);
                out = self.seq(body, events, single(state.clone()), flags.nested())?;
            }
            ExpEvent::Future { id } => {
                let mut pending = state.clone();
                pending.futures.increment(*id);
                out.insert(pending);
            }
            ExpEvent::Done { .. } => {
                out.insert(state.clone());
            }
            ExpEvent::Assign { body, .. } => {
                out = self.seq(body, events, single(state.clone()), flags.nested())?;
            }
            ExpEvent::Eval { expr } => match evaluate(expr, &PathEnv(&self.path.tally)) {
                Ok(value) if truthy(value) => {
                    out.insert(state.clone());
                }
                Ok(_) => {}
                Err(err) => debug!(path = %self.path.id, "eval failed: {}", err),
            },
        }
        Ok(out)
    }

    /// Expand `body` repeatedly, collecting every state reached with a count in bounds
    fn repeat(
        &mut self,
        min: u32,
        max: Option<u32>,
        body: &[ExpEvent],
        events: &[PathEvent],
        state: &MatchState,
        flags: MatchFlags,
    ) -> Result<MatchSet, MatchError> {
        let mut results = MatchSet::new();
        let mut frontier = single(state.clone());
        let mut count: u32 = 0;
        loop {
            if count >= min {
                results.extend(frontier.iter().cloned());
            }
            if frontier.is_empty() || max.is_some_and(|max| count >= max) {
                break;
            }
            let floor = frontier.iter().map(|s| s.offset).min().unwrap_or(0);
            let required = count >= min;
            let reached = self.seq(body, events, frontier, flags.nested())?;
            // States already collected were already expanded. Past the
            // minimum, an expansion must consume events or it never ends.
            frontier = reached
                .into_iter()
                .filter(|s| !results.contains(s) && (!required || s.offset > floor))
                .collect();
            count += 1;
        }
        Ok(results)
    }
}
