//! Text and JSON reports of a reconciliation plus matching run

use crate::aggregate::AggregateOutcome;
use crate::batch::{BatchResult, PathOutcome};
use crate::expectation_types::RecognizerKind;
use crate::limit::Metric;
use crate::reconcile::{Reconciliation, ReconcileError, UnmatchedMessage};
use crate::recognizer::RecognizerRegistry;
use crate::shape::{PathShape, ShapeGroup};
use crate::stats::MetricSummary;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Batch-wide counts
#[derive(Debug, Clone, Serialize)]
pub struct JsonSummary {
    pub logs: usize,
    pub paths: usize,
    pub valid_paths: usize,
    pub malformed_paths: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub reconcile_errors: usize,
    pub failed_aggregates: usize,
    /// Paths by number of validators matched within their limits
    pub validator_histogram: BTreeMap<usize, u64>,
}

/// Totals for one recognizer
#[derive(Debug, Clone, Serialize)]
pub struct JsonRecognizer {
    pub name: String,
    pub kind: RecognizerKind,
    pub checked: u64,
    pub instances: u64,
    pub resource_violations: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub budget_exhausted: u64,
    pub unique_shapes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_rate: Option<f64>,
    /// Wall-clock seconds over matched instances
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_time: Option<MetricSummary>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

fn is_empty_slice<T>(items: &&[T]) -> bool {
    items.is_empty()
}

/// One unique path shape
#[derive(Debug, Clone, Serialize)]
pub struct JsonShapeGroup {
    pub fingerprint: String,
    pub count: usize,
    pub paths: Vec<String>,
    pub shape: PathShape,
}

impl From<&ShapeGroup> for JsonShapeGroup {
    fn from(group: &ShapeGroup) -> Self {
        JsonShapeGroup {
            fingerprint: format!("{:016x}", group.fingerprint),
            count: group.paths.len(),
            paths: group.paths.iter().map(|id| id.to_string()).collect(),
            shape: group.shape.clone(),
        }
    }
}

/// Complete JSON report
#[derive(Debug, Clone, Serialize)]
pub struct JsonReport<'a> {
    /// Format version identifier
    pub version: String,
    pub format: String,
    pub summary: JsonSummary,
    pub recognizers: Vec<JsonRecognizer>,
    pub aggregates: &'a [AggregateOutcome],
    pub paths: &'a [PathOutcome],
    #[serde(skip_serializing_if = "is_empty_slice")]
    pub errors: &'a [ReconcileError],
    #[serde(skip_serializing_if = "is_empty_slice")]
    pub unmatched_sends: &'a [UnmatchedMessage],
    #[serde(skip_serializing_if = "is_empty_slice")]
    pub unmatched_recvs: &'a [UnmatchedMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique: Option<Vec<JsonShapeGroup>>,
}

/// Inputs of one report
pub struct Report<'a> {
    pub logs: usize,
    pub reconciliation: &'a Reconciliation,
    pub registry: &'a RecognizerRegistry,
    pub result: &'a BatchResult,
    pub unique: Option<&'a [ShapeGroup]>,
    /// Print the event tree of every path, not only the failing ones
    pub trees: bool,
}

impl<'a> Report<'a> {
    fn summary(&self) -> JsonSummary {
        let stats = &self.result.stats;
        JsonSummary {
            logs: self.logs,
            paths: self.reconciliation.paths.len(),
            valid_paths: self.reconciliation.valid_paths().count(),
            malformed_paths: stats.malformed,
            accepted: stats.accepted,
            rejected: stats.rejected,
            reconcile_errors: self.reconciliation.error_count(),
            failed_aggregates: self.result.failed_aggregates(),
            validator_histogram: stats.validator_histogram.clone(),
        }
    }

    fn recognizers(&self) -> Vec<JsonRecognizer> {
        self.registry
            .recognizers()
            .iter()
            .zip(&self.result.stats.recognizers)
            .map(|(rec, stats)| JsonRecognizer {
                name: rec.name().to_string(),
                kind: rec.kind(),
                checked: stats.checked,
                instances: stats.instances,
                resource_violations: stats.resource_violations,
                budget_exhausted: stats.budget_exhausted,
                unique_shapes: stats.shapes.len(),
                pass_rate: stats.pass_rate(),
                real_time: stats.summary(Metric::RealTime),
            })
            .collect()
    }

    pub fn to_json_report(&self) -> JsonReport<'a> {
        JsonReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "causeway-json-v1".to_string(),
            summary: self.summary(),
            recognizers: self.recognizers(),
            aggregates: &self.result.aggregates,
            paths: &self.result.outcomes,
            errors: &self.reconciliation.errors,
            unmatched_sends: &self.reconciliation.unmatched_sends,
            unmatched_recvs: &self.reconciliation.unmatched_recvs,
            unique: self
                .unique
                .map(|groups| groups.iter().map(JsonShapeGroup::from).collect()),
        }
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json_report())?)
    }

    /// Human-readable report
    ///
    /// `verbose` adds one line per path, followed by the event tree of any
    /// path that was rejected or matched over its limits.
    pub fn write_text(&self, out: &mut dyn Write, verbose: bool) -> io::Result<()> {
        let summary = self.summary();
        writeln!(
            out,
            "Reconciled {} paths from {} logs: {} valid, {} malformed, {} errors",
            summary.paths,
            summary.logs,
            summary.valid_paths,
            summary.malformed_paths,
            summary.reconcile_errors
        )?;

        let recognizers = self.recognizers();
        if !recognizers.is_empty() {
            writeln!(out)?;
            writeln!(
                out,
                "{:<24} {:<12} {:>8} {:>10} {:>10} {:>8} {:>12}",
                "recognizer", "kind", "checked", "instances", "violations", "unique", "mean real(s)"
            )?;
            writeln!(out, "{}", "-".repeat(90))?;
            for rec in &recognizers {
                let mean = rec
                    .real_time
                    .as_ref()
                    .map(|s| format!("{:.6}", s.mean))
                    .unwrap_or_else(|| "-".to_string());
                let kind = match rec.kind {
                    RecognizerKind::Validator => "validator",
                    RecognizerKind::Invalidator => "invalidator",
                    RecognizerKind::Recognizer => "recognizer",
                };
                writeln!(
                    out,
                    "{:<24} {:<12} {:>8} {:>10} {:>10} {:>8} {:>12}",
                    rec.name,
                    kind,
                    rec.checked,
                    rec.instances,
                    rec.resource_violations,
                    rec.unique_shapes,
                    mean
                )?;
                if rec.budget_exhausted > 0 {
                    writeln!(
                        out,
                        "  {} checks ran out of search budget",
                        rec.budget_exhausted
                    )?;
                }
            }
        }

        writeln!(out)?;
        writeln!(
            out,
            "Paths: {} accepted, {} rejected",
            summary.accepted, summary.rejected
        )?;
        if !summary.validator_histogram.is_empty() {
            let buckets: Vec<String> = summary
                .validator_histogram
                .iter()
                .map(|(validators, paths)| format!("{}: {}", validators, paths))
                .collect();
            writeln!(out, "Validators matched per path: {}", buckets.join(", "))?;
        }

        if !self.result.aggregates.is_empty() {
            writeln!(out)?;
            writeln!(out, "Aggregates:")?;
            for agg in &self.result.aggregates {
                let status = if agg.passed { "PASS" } else { "FAIL" };
                match (&agg.value, &agg.error) {
                    (_, Some(err)) => writeln!(out, "  {:<24} {} ({})", agg.name, status, err)?,
                    (Some(value), None) => {
                        writeln!(out, "  {:<24} {} ({})", agg.name, status, value)?
                    }
                    (None, None) => writeln!(out, "  {:<24} {}", agg.name, status)?,
                }
            }
        }

        if verbose || self.trees {
            writeln!(out)?;
            for outcome in &self.result.outcomes {
                if verbose {
                    write_path_line(out, outcome)?;
                }
                if self.trees || (verbose && needs_tree(outcome)) {
                    if let Some(path) = self.reconciliation.path(&outcome.path_id) {
                        path.write_tree(out)?;
                    }
                }
            }
        }

        if let Some(groups) = self.unique {
            writeln!(out)?;
            writeln!(out, "{} unique path shapes:", groups.len())?;
            for group in groups {
                let first = group
                    .paths
                    .first()
                    .map(|id| id.to_string())
                    .unwrap_or_default();
                writeln!(
                    out,
                    "  {:016x}  {:>6} paths  (e.g. {})",
                    group.fingerprint,
                    group.paths.len(),
                    first
                )?;
            }
        }

        if !self.reconciliation.errors.is_empty() {
            writeln!(out)?;
            writeln!(out, "Errors:")?;
            for err in &self.reconciliation.errors {
                writeln!(out, "  {}", err)?;
            }
        }
        if !self.reconciliation.unmatched_sends.is_empty() {
            writeln!(out)?;
            writeln!(out, "Unmatched sends:")?;
            for send in &self.reconciliation.unmatched_sends {
                writeln!(
                    out,
                    "  message {} in path {} at {} ({} bytes)",
                    send.id, send.path, send.ts, send.size
                )?;
            }
        }
        Ok(())
    }
}

/// Rejected, or some match held only structurally
fn needs_tree(outcome: &PathOutcome) -> bool {
    outcome.valid
        && (!outcome.accepted || outcome.resource_violations.iter().any(|(_, ok)| !ok))
}

fn write_path_line(out: &mut dyn Write, outcome: &PathOutcome) -> io::Result<()> {
    if let Some(reason) = &outcome.malformed {
        return writeln!(out, "{}: malformed ({})", outcome.path_id, reason);
    }
    let verdict = if outcome.accepted { "accepted" } else { "rejected" };
    write!(out, "{}: {}", outcome.path_id, verdict)?;
    if !outcome.matched_validators.is_empty() {
        write!(out, " validators=[{}]", outcome.matched_validators.join(","))?;
    }
    if !outcome.matched_invalidators.is_empty() {
        write!(out, " invalidators=[{}]", outcome.matched_invalidators.join(","))?;
    }
    let over: Vec<&str> = outcome
        .resource_violations
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name.as_str())
        .collect();
    if !over.is_empty() {
        write!(out, " over_limits=[{}]", over.join(","))?;
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchRunner;
    use crate::config::{MatchConfig, ReconcileConfig};
    use crate::expectation_types::ExpectationFile;
    use crate::reconcile::reconcile;
    use crate::shape::group_unique;
    use crate::trace_log::TraceLog;

    const LOG: &str = r#"{"type":"header","hostname":"h","processname":"svc","pid":1}
{"type":"set_path_id","ts":0,"path_id":"p1"}
{"type":"task_start","ts":0,"name":"x"}
{"type":"message_send","ts":1,"id":"lost","size":3}
{"type":"task_end","ts":2,"name":"x"}
"#;

    const EXPECTATIONS: &str = r#"{"recognizer": [{"name": "x", "kind": "validator",
        "thread": [{"body": [{"op": "task", "name": "x"}]}]}]}"#;

    fn fixture() -> (Reconciliation, RecognizerRegistry) {
        let logs = vec![TraceLog::from_jsonl_str("a.jsonl", LOG).unwrap()];
        let reconciliation = reconcile(&logs, &ReconcileConfig::default()).unwrap();
        let registry =
            RecognizerRegistry::build(&ExpectationFile::from_json_str(EXPECTATIONS).unwrap())
                .unwrap();
        (reconciliation, registry)
    }

    #[test]
    fn test_json_report_format() {
        let (reconciliation, registry) = fixture();
        let result = BatchRunner::new(&registry, &MatchConfig::default(), 1)
            .run(&reconciliation.paths);
        let groups = group_unique(reconciliation.valid_paths());
        let report = Report {
            logs: 1,
            reconciliation: &reconciliation,
            registry: &registry,
            result: &result,
            unique: Some(&groups),
            trees: false,
        };
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["format"], "causeway-json-v1");
        assert_eq!(json["summary"]["accepted"], 1);
        assert_eq!(json["summary"]["reconcile_errors"], 1);
        assert_eq!(json["recognizers"][0]["instances"], 1);
        assert_eq!(json["unmatched_sends"][0]["id"], "lost");
        assert_eq!(json["unique"][0]["count"], 1);
        assert!(json.get("unmatched_recvs").is_none());
    }

    #[test]
    fn test_text_report() {
        let (reconciliation, registry) = fixture();
        let result = BatchRunner::new(&registry, &MatchConfig::default(), 1)
            .run(&reconciliation.paths);
        let report = Report {
            logs: 1,
            reconciliation: &reconciliation,
            registry: &registry,
            result: &result,
            unique: None,
            trees: false,
        };
        let mut out = Vec::new();
        report.write_text(&mut out, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Reconciled 1 paths from 1 logs: 1 valid"));
        assert!(text.contains("Paths: 1 accepted, 0 rejected"));
        assert!(text.contains("p1: accepted validators=[x]"));
        assert!(text.contains("Unmatched sends:"));
        assert!(!text.contains("path p1\n"));
    }

    #[test]
    fn test_rejected_path_tree_under_verbose() {
        let (reconciliation, _) = fixture();
        let registry = RecognizerRegistry::build(
            &ExpectationFile::from_json_str(
                r#"{"recognizer": [{"name": "y", "kind": "validator",
                    "thread": [{"body": [{"op": "task", "name": "y"}]}]}]}"#,
            )
            .unwrap(),
        )
        .unwrap();
        let result = BatchRunner::new(&registry, &MatchConfig::default(), 1)
            .run(&reconciliation.paths);
        let mut report = Report {
            logs: 1,
            reconciliation: &reconciliation,
            registry: &registry,
            result: &result,
            unique: None,
            trees: false,
        };

        let mut out = Vec::new();
        report.write_text(&mut out, false).unwrap();
        assert!(!String::from_utf8(out).unwrap().contains("path p1\n"));

        let mut out = Vec::new();
        report.write_text(&mut out, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("p1: rejected\npath p1\n"));
        assert!(text.contains("    task \"x\" [0.000000, 0.000002]\n"));

        report.trees = true;
        let mut out = Vec::new();
        report.write_text(&mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("path p1\n"));
        assert!(!text.contains("p1: rejected"));
    }
}
