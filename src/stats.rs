//! Per-recognizer and per-batch tallies
//!
//! Workers each fill a [`BatchStats`] for the paths they check; the runner
//! merges them in worker order once the batch is done. Aggregates and the
//! report both read from the merged value.

use crate::limit::{Metric, MetricSource};
use crate::path::PathTally;
use crate::recognizer::CheckOutcome;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Tally for one recognizer over every path it checked
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecognizerStats {
    pub checked: u64,
    /// Paths matched with every resource limit satisfied
    pub instances: u64,
    /// Paths matched structurally but failing a resource limit
    pub resource_violations: u64,
    pub budget_exhausted: u64,
    /// Tallies of the matched instances
    #[serde(skip)]
    pub samples: Vec<PathTally>,
    /// Shape fingerprints of the matched instances
    #[serde(skip)]
    pub shapes: BTreeSet<u64>,
}

/// Distribution of one metric over a recognizer's instances
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub p95: f64,
}

impl RecognizerStats {
    /// Record the outcome of checking one path
    pub fn record(&mut self, outcome: &CheckOutcome, tally: &PathTally, shape: u64) {
        self.checked += 1;
        match outcome {
            CheckOutcome::Checked(verdict) if verdict.matched && verdict.resources_ok => {
                self.instances += 1;
                self.samples.push(*tally);
                self.shapes.insert(shape);
            }
            CheckOutcome::Checked(verdict) if verdict.matched => {
                self.resource_violations += 1;
            }
            CheckOutcome::Checked(_) => {}
            CheckOutcome::BudgetExhausted { .. } => self.budget_exhausted += 1,
        }
    }

    pub fn merge(&mut self, other: RecognizerStats) {
        self.checked += other.checked;
        self.instances += other.instances;
        self.resource_violations += other.resource_violations;
        self.budget_exhausted += other.budget_exhausted;
        self.samples.extend(other.samples);
        self.shapes.extend(other.shapes);
    }

    pub fn pass_rate(&self) -> Option<f64> {
        (self.checked > 0).then(|| self.instances as f64 / self.checked as f64)
    }

    /// Summary of `metric` over the matched instances
    pub fn summary(&self, metric: Metric) -> Option<MetricSummary> {
        let mut values: Vec<f64> = self
            .samples
            .iter()
            .filter_map(|tally| tally.metric(metric))
            .collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(MetricSummary {
            mean,
            stddev: variance.sqrt(),
            min: values[0],
            max: values[values.len() - 1],
            median: percentile(&values, 50.0),
            p95: percentile(&values, 95.0),
        })
    }
}

/// Linear-interpolated percentile of sorted data
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let index = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let weight = index - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

/// Tallies for a whole batch; `recognizers` is in registry order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub recognizers: Vec<RecognizerStats>,
    pub paths_checked: u64,
    pub accepted: u64,
    pub rejected: u64,
    /// Paths skipped because reconciliation marked them malformed
    pub malformed: u64,
    /// Number of paths by how many validators they matched
    pub validator_histogram: BTreeMap<usize, u64>,
}

impl BatchStats {
    pub fn new(recognizers: usize) -> Self {
        BatchStats {
            recognizers: vec![RecognizerStats::default(); recognizers],
            ..BatchStats::default()
        }
    }

    pub fn merge(&mut self, other: BatchStats) {
        if self.recognizers.len() < other.recognizers.len() {
            self.recognizers
                .resize(other.recognizers.len(), RecognizerStats::default());
        }
        for (mine, theirs) in self.recognizers.iter_mut().zip(other.recognizers) {
            mine.merge(theirs);
        }
        self.paths_checked += other.paths_checked;
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.malformed += other.malformed;
        for (bucket, count) in other.validator_histogram {
            *self.validator_histogram.entry(bucket).or_default() += count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::Verdict;

    fn checked(matched: bool, resources_ok: bool) -> CheckOutcome {
        CheckOutcome::Checked(Verdict {
            matched,
            resources_ok,
        })
    }

    fn tally(size: u64) -> PathTally {
        PathTally {
            size,
            ..PathTally::default()
        }
    }

    #[test]
    fn test_record_outcomes() {
        let mut stats = RecognizerStats::default();
        stats.record(&checked(true, true), &tally(1), 7);
        stats.record(&checked(true, false), &tally(2), 8);
        stats.record(&checked(false, true), &tally(3), 9);
        stats.record(&CheckOutcome::BudgetExhausted { explored: 10 }, &tally(4), 9);
        assert_eq!(stats.checked, 4);
        assert_eq!(stats.instances, 1);
        assert_eq!(stats.resource_violations, 1);
        assert_eq!(stats.budget_exhausted, 1);
        assert_eq!(stats.shapes.len(), 1);
        assert_eq!(stats.pass_rate(), Some(0.25));
    }

    #[test]
    fn test_summary() {
        let mut stats = RecognizerStats::default();
        for size in [1, 2, 3, 4, 5] {
            stats.record(&checked(true, true), &tally(size), size);
        }
        let summary = stats.summary(Metric::Size).unwrap();
        assert_eq!(summary.mean, 3.0);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 5.0);
        assert_eq!(summary.median, 3.0);
        assert!((summary.p95 - 4.8).abs() < 1e-9);
        assert!(RecognizerStats::default().summary(Metric::Size).is_none());
    }

    #[test]
    fn test_batch_merge() {
        let mut a = BatchStats::new(1);
        a.paths_checked = 2;
        a.validator_histogram.insert(1, 2);
        a.recognizers[0].record(&checked(true, true), &tally(1), 1);

        let mut b = BatchStats::new(1);
        b.paths_checked = 3;
        b.validator_histogram.insert(1, 1);
        b.validator_histogram.insert(0, 2);
        b.recognizers[0].record(&checked(true, true), &tally(1), 1);

        a.merge(b);
        assert_eq!(a.paths_checked, 5);
        assert_eq!(a.validator_histogram[&1], 3);
        assert_eq!(a.validator_histogram[&0], 2);
        assert_eq!(a.recognizers[0].instances, 2);
        assert_eq!(a.recognizers[0].shapes.len(), 1);
    }
}
