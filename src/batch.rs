//! Matching a batch of reconciled paths against a registry
//!
//! Paths are independent, so matching fans out over a fixed set of worker
//! threads. Each worker owns its statistics and results; nothing is shared
//! except the read-only registry and the paths themselves. Results are
//! merged after every worker has finished, so the outcome does not depend on
//! the number of workers.

use crate::aggregate::{evaluate, AggregateOutcome, StatsEnv};
use crate::config::MatchConfig;
use crate::event::PathId;
use crate::expectation_types::RecognizerKind;
use crate::path::{Malformed, Path};
use crate::recognizer::{CheckOutcome, RecognizerRegistry};
use crate::shape::PathShape;
use crate::stats::BatchStats;
use crossbeam::channel;
use serde::Serialize;
use std::thread;
use tracing::{debug, info};

/// Verdict for one path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathOutcome {
    pub path_id: PathId,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub malformed: Option<Malformed>,
    pub matched_validators: Vec<String>,
    pub matched_invalidators: Vec<String>,
    pub matched_recognizers: Vec<String>,
    /// Every structurally matched recognizer with whether its limits held
    pub resource_violations: Vec<(String, bool)>,
    /// Recognizers whose search ran out of budget on this path
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub budget_exhausted: Vec<String>,
    /// Some validator matched within limits and no invalidator matched
    pub accepted: bool,
}

impl PathOutcome {
    fn malformed(path: &Path) -> Self {
        PathOutcome {
            path_id: path.id.clone(),
            valid: false,
            malformed: path.malformed.clone(),
            matched_validators: Vec::new(),
            matched_invalidators: Vec::new(),
            matched_recognizers: Vec::new(),
            resource_violations: Vec::new(),
            budget_exhausted: Vec::new(),
            accepted: false,
        }
    }
}

/// Everything a batch run produces
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// In path-id order
    pub outcomes: Vec<PathOutcome>,
    pub stats: BatchStats,
    pub aggregates: Vec<AggregateOutcome>,
}

impl BatchResult {
    pub fn accepted(&self) -> impl Iterator<Item = &PathOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.accepted)
    }

    pub fn failed_aggregates(&self) -> usize {
        self.aggregates.iter().filter(|agg| !agg.passed).count()
    }
}

/// Per-worker accumulator
struct WorkerState {
    stats: BatchStats,
    outcomes: Vec<PathOutcome>,
}

/// Matches paths against one registry
pub struct BatchRunner<'a> {
    registry: &'a RecognizerRegistry,
    budget: Option<u64>,
    jobs: usize,
}

impl<'a> BatchRunner<'a> {
    /// # Arguments
    ///
    /// * `jobs` - Worker threads; 0 and 1 both run on the calling thread
    pub fn new(registry: &'a RecognizerRegistry, matching: &MatchConfig, jobs: usize) -> Self {
        BatchRunner {
            registry,
            budget: matching.budget(),
            jobs: jobs.max(1),
        }
    }

    /// Match every path and evaluate the registry's aggregates
    pub fn run(&self, paths: &[Path]) -> BatchResult {
        let workers = self.jobs.min(paths.len()).max(1);
        info!(paths = paths.len(), workers, "Matching batch");

        let states = if workers == 1 {
            let mut state = self.worker_state();
            for path in paths {
                self.check_one(path, &mut state);
            }
            vec![state]
        } else {
            self.run_parallel(paths, workers)
        };

        let mut stats = BatchStats::new(self.registry.len());
        let mut outcomes = Vec::with_capacity(paths.len());
        for state in states {
            stats.merge(state.stats);
            outcomes.extend(state.outcomes);
        }
        outcomes.sort_by(|a, b| a.path_id.cmp(&b.path_id));

        let names = self.registry.names();
        let env = StatsEnv {
            names: &names,
            stats: &stats,
        };
        let aggregates = self
            .registry
            .aggregates()
            .iter()
            .map(|agg| AggregateOutcome::from_result(&agg.name, evaluate(&agg.expr, &env)))
            .collect();

        BatchResult {
            outcomes,
            stats,
            aggregates,
        }
    }

    fn worker_state(&self) -> WorkerState {
        WorkerState {
            stats: BatchStats::new(self.registry.len()),
            outcomes: Vec::new(),
        }
    }

    fn run_parallel(&self, paths: &[Path], workers: usize) -> Vec<WorkerState> {
        let (sender, receiver) = channel::bounded::<&Path>(workers * 4);
        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let receiver = receiver.clone();
                    scope.spawn(move || {
                        let mut state = self.worker_state();
                        for path in receiver.iter() {
                            self.check_one(path, &mut state);
                        }
                        debug!(worker, checked = state.outcomes.len(), "Worker finished");
                        state
                    })
                })
                .collect();
            drop(receiver);

            for path in paths {
                // Every receiver is gone only if all workers panicked
                if sender.send(path).is_err() {
                    break;
                }
            }
            drop(sender);

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(state) => state,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }

    fn check_one(&self, path: &Path, state: &mut WorkerState) {
        if !path.valid() {
            state.stats.malformed += 1;
            state.outcomes.push(PathOutcome::malformed(path));
            return;
        }

        let checks = self.registry.check_path(path, self.budget);
        let shape = PathShape::of(path).fingerprint();
        let mut outcome = PathOutcome {
            valid: true,
            malformed: None,
            ..PathOutcome::malformed(path)
        };
        let mut validated = 0;
        let mut invalidated = false;

        for ((recognizer, check), rec_stats) in self
            .registry
            .recognizers()
            .iter()
            .zip(&checks)
            .zip(state.stats.recognizers.iter_mut())
        {
            rec_stats.record(check, &path.tally, shape);
            let name = recognizer.name().to_string();
            let verdict = match check {
                CheckOutcome::Checked(verdict) => *verdict,
                CheckOutcome::BudgetExhausted { .. } => {
                    outcome.budget_exhausted.push(name);
                    continue;
                }
            };
            if !verdict.matched {
                continue;
            }
            outcome
                .resource_violations
                .push((name.clone(), verdict.resources_ok));
            match recognizer.kind() {
                RecognizerKind::Validator => {
                    validated += usize::from(verdict.resources_ok);
                    outcome.matched_validators.push(name);
                }
                RecognizerKind::Invalidator => {
                    invalidated |= verdict.resources_ok;
                    outcome.matched_invalidators.push(name);
                }
                RecognizerKind::Recognizer => outcome.matched_recognizers.push(name),
            }
        }

        // Matches over their limits are listed but never decide the verdict
        outcome.accepted = validated > 0 && !invalidated;
        let bucket = if invalidated { 0 } else { validated };
        *state.stats.validator_histogram.entry(bucket).or_default() += 1;
        state.stats.paths_checked += 1;
        if outcome.accepted {
            state.stats.accepted += 1;
        } else {
            state.stats.rejected += 1;
        }
        debug!(path = %path.id, accepted = outcome.accepted, "Matched path");
        state.outcomes.push(outcome);
    }
}
