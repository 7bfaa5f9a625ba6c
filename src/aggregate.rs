//! Expression evaluation over batch statistics
//!
//! Aggregates are named expressions evaluated once the whole batch has been
//! matched, e.g. "validator `fast_get` matched at least 95% of the paths it
//! checked". The same evaluator serves `eval` nodes inside expectations,
//! where the environment is the tally of the path being matched.
//!
//! Values are `f64`; a result is true when it is non-zero.

use crate::expectation_types::{Expr, ExprOp, MetricOf};
use crate::limit::{Metric, MetricSource};
use crate::path::PathTally;
use crate::stats::BatchStats;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("recognizer {0:?} has no matched paths to summarize")]
    NoSamples(String),
    #[error("unknown recognizer {0:?}")]
    UnknownRecognizer(String),
    #[error("{0} is not available here")]
    NotAvailable(String),
}

/// Per-recognizer statistic an expression can read
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stat {
    Instances,
    Checked,
    PassRate,
    Violations,
    Unique,
    Average(Metric),
    Stddev(Metric),
    Max(Metric),
    Min(Metric),
}

/// Value lookups used by [`evaluate`]
pub trait ExprEnv {
    fn stat(&self, recognizer: &str, stat: Stat) -> Result<f64, EvalError>;
    fn path_metric(&self, metric: Metric) -> Result<f64, EvalError>;
}

fn bool_value(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

pub fn truthy(value: f64) -> bool {
    value != 0.0
}

/// Evaluate an expression against an environment
pub fn evaluate(expr: &Expr, env: &dyn ExprEnv) -> Result<f64, EvalError> {
    let op = match expr {
        Expr::Number(value) => return Ok(*value),
        Expr::Op(op) => op.as_ref(),
    };
    let binary = |a: &Expr, b: &Expr| -> Result<(f64, f64), EvalError> {
        Ok((evaluate(a, env)?, evaluate(b, env)?))
    };
    let of = |m: &MetricOf, stat: fn(Metric) -> Stat| env.stat(&m.recognizer, stat(m.metric));
    match op {
        ExprOp::Eq(a, b) => binary(a, b).map(|(x, y)| bool_value(x == y)),
        ExprOp::Ne(a, b) => binary(a, b).map(|(x, y)| bool_value(x != y)),
        ExprOp::Lt(a, b) => binary(a, b).map(|(x, y)| bool_value(x < y)),
        ExprOp::Gt(a, b) => binary(a, b).map(|(x, y)| bool_value(x > y)),
        ExprOp::Le(a, b) => binary(a, b).map(|(x, y)| bool_value(x <= y)),
        ExprOp::Ge(a, b) => binary(a, b).map(|(x, y)| bool_value(x >= y)),
        ExprOp::And(a, b) => {
            if !truthy(evaluate(a, env)?) {
                return Ok(0.0);
            }
            Ok(bool_value(truthy(evaluate(b, env)?)))
        }
        ExprOp::Or(a, b) => {
            if truthy(evaluate(a, env)?) {
                return Ok(1.0);
            }
            Ok(bool_value(truthy(evaluate(b, env)?)))
        }
        ExprOp::Not(a) => Ok(bool_value(!truthy(evaluate(a, env)?))),
        ExprOp::Add(a, b) => binary(a, b).map(|(x, y)| x + y),
        ExprOp::Sub(a, b) => binary(a, b).map(|(x, y)| x - y),
        ExprOp::Mul(a, b) => binary(a, b).map(|(x, y)| x * y),
        ExprOp::Div(a, b) => {
            let (x, y) = binary(a, b)?;
            if y == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(x / y)
            }
        }
        ExprOp::In(range) => {
            let value = evaluate(&range.value, env)?;
            let lo = evaluate(&range.lo, env)?;
            let hi = evaluate(&range.hi, env)?;
            Ok(bool_value(lo <= value && value <= hi))
        }
        ExprOp::Instances(name) => env.stat(name, Stat::Instances),
        ExprOp::Checked(name) => env.stat(name, Stat::Checked),
        ExprOp::PassRate(name) => env.stat(name, Stat::PassRate),
        ExprOp::Violations(name) => env.stat(name, Stat::Violations),
        ExprOp::Unique(name) => env.stat(name, Stat::Unique),
        ExprOp::Average(m) => of(m, Stat::Average),
        ExprOp::Stddev(m) => of(m, Stat::Stddev),
        ExprOp::Max(m) => of(m, Stat::Max),
        ExprOp::Min(m) => of(m, Stat::Min),
        ExprOp::Metric(metric) => env.path_metric(*metric),
    }
}

/// Environment of an `eval` node: the tally of the path being matched
pub struct PathEnv<'a>(pub &'a PathTally);

impl ExprEnv for PathEnv<'_> {
    fn stat(&self, recognizer: &str, _stat: Stat) -> Result<f64, EvalError> {
        Err(EvalError::NotAvailable(format!(
            "statistics of recognizer {:?}",
            recognizer
        )))
    }

    fn path_metric(&self, metric: Metric) -> Result<f64, EvalError> {
        self.0
            .metric(metric)
            .ok_or_else(|| EvalError::NotAvailable(metric.to_string()))
    }
}

/// Environment of an aggregate: the merged statistics of the batch
pub struct StatsEnv<'a> {
    pub names: &'a [String],
    pub stats: &'a BatchStats,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

impl ExprEnv for StatsEnv<'_> {
    fn stat(&self, recognizer: &str, stat: Stat) -> Result<f64, EvalError> {
        let index = self
            .names
            .iter()
            .position(|name| name == recognizer)
            .ok_or_else(|| EvalError::UnknownRecognizer(recognizer.to_string()))?;
        let rec = self
            .stats
            .recognizers
            .get(index)
            .ok_or_else(|| EvalError::UnknownRecognizer(recognizer.to_string()))?;

        let samples = |metric: Metric| -> Result<Vec<f64>, EvalError> {
            let values: Vec<f64> = rec
                .samples
                .iter()
                .filter_map(|tally| tally.metric(metric))
                .collect();
            if values.is_empty() {
                Err(EvalError::NoSamples(recognizer.to_string()))
            } else {
                Ok(values)
            }
        };

        match stat {
            Stat::Instances => Ok(rec.instances as f64),
            Stat::Checked => Ok(rec.checked as f64),
            Stat::Violations => Ok(rec.resource_violations as f64),
            Stat::Unique => Ok(rec.shapes.len() as f64),
            Stat::PassRate => {
                if rec.checked == 0 {
                    Err(EvalError::NoSamples(recognizer.to_string()))
                } else {
                    Ok(rec.instances as f64 / rec.checked as f64)
                }
            }
            Stat::Average(metric) => samples(metric).map(|v| mean(&v)),
            Stat::Stddev(metric) => samples(metric).map(|v| {
                let m = mean(&v);
                let variance = v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / v.len() as f64;
                variance.sqrt()
            }),
            Stat::Max(metric) => {
                samples(metric).map(|v| v.into_iter().fold(f64::NEG_INFINITY, f64::max))
            }
            Stat::Min(metric) => {
                samples(metric).map(|v| v.into_iter().fold(f64::INFINITY, f64::min))
            }
        }
    }

    fn path_metric(&self, metric: Metric) -> Result<f64, EvalError> {
        Err(EvalError::NotAvailable(format!(
            "path metric {} outside eval",
            metric
        )))
    }
}

/// Result of one named aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateOutcome {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AggregateOutcome {
    pub fn from_result(name: &str, result: Result<f64, EvalError>) -> Self {
        match result {
            Ok(value) => AggregateOutcome {
                name: name.to_string(),
                value: Some(value),
                passed: truthy(value),
                error: None,
            },
            Err(err) => AggregateOutcome {
                name: name.to_string(),
                value: None,
                passed: false,
                error: Some(err.to_string()),
            },
        }
    }
}
