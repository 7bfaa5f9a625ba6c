//! Compiled recognizers and the registry that checks paths against them
//!
//! [`RecognizerRegistry::build`] validates an [`ExpectationFile`] and
//! compiles every declaration:
//!
//! - name patterns become [`NameMatch`] (regexes are compiled once)
//! - `call` targets and set references are resolved to registry indices
//! - futures get a [`FutureId`] slot in their recognizer's [`FutureTable`]
//!
//! Checking a path runs every recognizer in declaration order, so a set
//! recognizer can read the verdicts of the recognizers declared before it.
//!
//! [`ExpectationFile`]: crate::expectation_types::ExpectationFile

mod matcher;
mod registry;
mod threads;

#[cfg(test)]
mod tests;

pub use matcher::{FutureCounts, MatchContext, MatchError, MatchFlags, MatchSet, MatchState};
pub use registry::SpecError;

use crate::expectation_types::{Expr, RecognizerKind};
use crate::limit::Limit;
use crate::path::Path;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Compiled name predicate
#[derive(Debug, Clone)]
pub enum NameMatch {
    Any,
    Exact(String),
    Regex(Regex),
    Not(Box<NameMatch>),
}

impl NameMatch {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameMatch::Any => true,
            NameMatch::Exact(expected) => expected == name,
            NameMatch::Regex(regex) => regex.is_match(name),
            NameMatch::Not(inner) => !inner.matches(name),
        }
    }
}

/// Future slot: which recognizer declared it, and its index there
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FutureId {
    pub recognizer: usize,
    pub slot: usize,
}

#[derive(Debug, Clone)]
pub struct FutureEntry {
    pub name: Option<String>,
    pub body: Vec<ExpEvent>,
}

/// Bodies of the futures declared in one recognizer
#[derive(Debug, Clone, Default)]
pub struct FutureTable {
    entries: Vec<FutureEntry>,
}

impl FutureTable {
    pub fn push(&mut self, name: Option<String>, body: Vec<ExpEvent>) -> usize {
        self.entries.push(FutureEntry { name, body });
        self.entries.len() - 1
    }

    pub fn get(&self, slot: usize) -> Option<&FutureEntry> {
        self.entries.get(slot)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One compiled expectation
#[derive(Debug, Clone)]
pub enum ExpEvent {
    Task {
        name: NameMatch,
        limits: Vec<Limit>,
        children: Vec<ExpEvent>,
    },
    Notice {
        name: NameMatch,
    },
    Send {
        limits: Vec<Limit>,
    },
    Recv {
        limits: Vec<Limit>,
    },
    /// `max` of `None` repeats without bound
    Repeat {
        min: u32,
        max: Option<u32>,
        body: Vec<ExpEvent>,
    },
    Xor {
        branches: Vec<Vec<ExpEvent>>,
    },
    /// Inline the root thread body of a fragment recognizer
    Call {
        target: usize,
    },
    Any,
    Future {
        id: FutureId,
    },
    /// Zero-consumption marker naming a future
    Done {
        name: String,
    },
    Assign {
        variable: String,
        body: Vec<ExpEvent>,
    },
    Eval {
        expr: Expr,
    },
}

/// Compiled thread pool expectation
#[derive(Debug, Clone)]
pub struct ExpThread {
    pub name: String,
    pub min: u32,
    pub max: Option<u32>,
    pub limits: Vec<Limit>,
    pub body: Vec<ExpEvent>,
}

/// Structural recognizer over a path's thread pools
#[derive(Debug, Clone)]
pub struct PathRecognizer {
    pub name: String,
    pub kind: RecognizerKind,
    pub complete: bool,
    pub limits: Vec<Limit>,
    /// `threads[0]` is the root thread
    pub threads: Vec<ExpThread>,
    pub futures: FutureTable,
}

impl PathRecognizer {
    /// Body inlined by `call`
    pub fn root_body(&self) -> &[ExpEvent] {
        self.threads
            .first()
            .map(|thread| thread.body.as_slice())
            .unwrap_or(&[])
    }
}

/// Compiled set expression; `Ref` holds an earlier registry index
#[derive(Debug, Clone, PartialEq)]
pub enum SetTerm {
    Ref(usize),
    Not(Box<SetTerm>),
    And(Vec<SetTerm>),
    Or(Vec<SetTerm>),
    Implies(Box<SetTerm>, Box<SetTerm>),
}

/// Boolean combination of earlier verdicts
#[derive(Debug, Clone)]
pub struct SetRecognizer {
    pub name: String,
    pub kind: RecognizerKind,
    pub term: SetTerm,
}

#[derive(Debug, Clone)]
pub enum Recognizer {
    Path(PathRecognizer),
    Set(SetRecognizer),
}

impl Recognizer {
    pub fn name(&self) -> &str {
        match self {
            Recognizer::Path(rec) => &rec.name,
            Recognizer::Set(rec) => &rec.name,
        }
    }

    pub fn kind(&self) -> RecognizerKind {
        match self {
            Recognizer::Path(rec) => rec.kind,
            Recognizer::Set(rec) => rec.kind,
        }
    }
}

/// Result of one recognizer on one path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub matched: bool,
    pub resources_ok: bool,
}

impl Verdict {
    pub const NO_MATCH: Verdict = Verdict {
        matched: false,
        resources_ok: false,
    };
}

/// Outcome of checking one path with one recognizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    Checked(Verdict),
    /// The search budget ran out before a verdict was reached
    BudgetExhausted { explored: u64 },
}

impl CheckOutcome {
    /// Verdict as seen by sets; an exhausted search counts as no match
    pub fn verdict(&self) -> Verdict {
        match self {
            CheckOutcome::Checked(verdict) => *verdict,
            CheckOutcome::BudgetExhausted { .. } => Verdict::NO_MATCH,
        }
    }
}

/// Validated aggregate declaration
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub name: String,
    pub expr: Expr,
}

/// Every compiled recognizer of an expectation file, in declaration order
///
/// Path recognizers come first (in file order), then sets (in file order).
#[derive(Debug, Clone, Default)]
pub struct RecognizerRegistry {
    recognizers: Vec<Recognizer>,
    by_name: HashMap<String, usize>,
    aggregates: Vec<Aggregate>,
}

impl RecognizerRegistry {
    pub fn len(&self) -> usize {
        self.recognizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recognizers.is_empty()
    }

    pub fn recognizers(&self) -> &[Recognizer] {
        &self.recognizers
    }

    pub fn get(&self, index: usize) -> Option<&Recognizer> {
        self.recognizers.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn names(&self) -> Vec<String> {
        self.recognizers
            .iter()
            .map(|rec| rec.name().to_string())
            .collect()
    }

    pub fn aggregates(&self) -> &[Aggregate] {
        &self.aggregates
    }

    /// Path recognizer at `index`; `None` for sets
    pub fn path_recognizer(&self, index: usize) -> Option<&PathRecognizer> {
        match self.recognizers.get(index) {
            Some(Recognizer::Path(rec)) => Some(rec),
            _ => None,
        }
    }

    /// Body of a future slot
    pub fn future_body(&self, id: FutureId) -> &[ExpEvent] {
        self.path_recognizer(id.recognizer)
            .and_then(|rec| rec.futures.get(id.slot))
            .map(|entry| entry.body.as_slice())
            .unwrap_or(&[])
    }

    /// Check one path with every recognizer, in registry order
    ///
    /// # Arguments
    ///
    /// * `path` - A valid path; malformed paths are skipped by the caller
    /// * `budget` - Search steps allowed per recognizer, `None` for no limit
    pub fn check_path(&self, path: &Path, budget: Option<u64>) -> Vec<CheckOutcome> {
        let mut outcomes: Vec<CheckOutcome> = Vec::with_capacity(self.recognizers.len());
        for (index, recognizer) in self.recognizers.iter().enumerate() {
            let outcome = match recognizer {
                Recognizer::Path(rec) => {
                    let mut ctx = MatchContext::new(self, path, budget);
                    match rec.check(&mut ctx) {
                        Ok(verdict) => CheckOutcome::Checked(verdict),
                        Err(err) => {
                            debug!(
                                recognizer = %rec.name,
                                path = %path.id,
                                "Search abandoned: {}",
                                err
                            );
                            CheckOutcome::BudgetExhausted {
                                explored: ctx.explored(),
                            }
                        }
                    }
                }
                Recognizer::Set(rec) => CheckOutcome::Checked(rec.check(&outcomes)),
            };
            debug!(recognizer = index, ?outcome, "Checked path {}", path.id);
            outcomes.push(outcome);
        }
        outcomes
    }
}
