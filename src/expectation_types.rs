//! Expectation AST
//!
//! The parsed form of an expectation file. It is what the expectation
//! language front end emits, and what `--synthesize` writes. The AST is
//! data only: [`crate::recognizer::RecognizerRegistry::build`] validates it
//! and compiles it for matching.

use crate::limit::{Limit, Metric};
use serde::{Deserialize, Serialize};

/// Role a recognizer plays in the per-path verdict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerKind {
    /// Matching paths are correct behavior
    Validator,
    /// Matching paths are known-bad behavior
    Invalidator,
    /// Neutral; tallied and available to sets and aggregates
    #[default]
    Recognizer,
}

/// Name predicate on tasks and notices
///
/// Written as a bare string (`"*"` is the wildcard), `{regex = "..."}`, or
/// `{not = <pattern>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NamePattern {
    Text(String),
    Regex { regex: String },
    Not { not: Box<NamePattern> },
}

impl NamePattern {
    pub fn exact(name: &str) -> Self {
        NamePattern::Text(name.to_string())
    }

    pub fn any() -> Self {
        NamePattern::Text("*".to_string())
    }
}

fn one() -> u32 {
    1
}

fn one_bound() -> i64 {
    1
}

fn unbounded() -> i64 {
    -1
}

fn is_true(value: &bool) -> bool {
    *value
}

fn default_true() -> bool {
    true
}

/// One expected event or structural operator, tagged by `op`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ExpNode {
    Task {
        name: NamePattern,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        limits: Vec<Limit>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        body: Vec<ExpNode>,
    },
    Notice {
        name: NamePattern,
    },
    Send {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        limits: Vec<Limit>,
    },
    Recv {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        limits: Vec<Limit>,
    },
    /// `max` of -1 repeats without bound
    Repeat {
        #[serde(default)]
        min: u32,
        #[serde(default = "unbounded")]
        max: i64,
        body: Vec<ExpNode>,
    },
    Xor {
        branches: Vec<Vec<ExpNode>>,
    },
    Call {
        target: String,
    },
    Any,
    Future {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        body: Vec<ExpNode>,
    },
    Done {
        name: String,
    },
    Assign {
        variable: String,
        body: Vec<ExpNode>,
    },
    Eval {
        expr: Expr,
    },
}

/// Expected thread pool shape with an instance-count bound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadDecl {
    #[serde(default)]
    pub name: String,
    #[serde(default = "one")]
    pub min: u32,
    /// -1 allows any number of instances
    #[serde(default = "one_bound")]
    pub max: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub limits: Vec<Limit>,
    #[serde(default)]
    pub body: Vec<ExpNode>,
}

/// Structural recognizer; the first thread is the root thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizerDecl {
    pub name: String,
    #[serde(default)]
    pub kind: RecognizerKind,
    /// Complete recognizers describe every pool; fragments match anywhere
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub limits: Vec<Limit>,
    #[serde(rename = "thread", alias = "threads")]
    pub threads: Vec<ThreadDecl>,
}

/// Boolean combination of other recognizers' verdicts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetExpr {
    Ref(String),
    Not(Box<SetExpr>),
    And(Vec<SetExpr>),
    Or(Vec<SetExpr>),
    Implies(Box<SetExpr>, Box<SetExpr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetDecl {
    pub name: String,
    #[serde(default)]
    pub kind: RecognizerKind,
    pub expr: SetExpr,
}

/// Numeric expression; a bare number or an operator object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expr {
    Number(f64),
    Op(Box<ExprOp>),
}

/// Statistic of one recognizer over the whole batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricOf {
    pub metric: Metric,
    pub recognizer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub value: Expr,
    pub lo: Expr,
    pub hi: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprOp {
    Eq(Expr, Expr),
    Ne(Expr, Expr),
    Lt(Expr, Expr),
    Gt(Expr, Expr),
    Le(Expr, Expr),
    Ge(Expr, Expr),
    And(Expr, Expr),
    Or(Expr, Expr),
    Not(Expr),
    Add(Expr, Expr),
    Sub(Expr, Expr),
    Mul(Expr, Expr),
    Div(Expr, Expr),
    /// `lo <= value <= hi`
    In(Range),
    Instances(String),
    Checked(String),
    PassRate(String),
    Violations(String),
    Unique(String),
    Average(MetricOf),
    Stddev(MetricOf),
    Max(MetricOf),
    Min(MetricOf),
    /// Metric of the path being matched (only inside `eval`)
    Metric(Metric),
}

impl Expr {
    pub fn num(value: f64) -> Self {
        Expr::Number(value)
    }

    pub fn op(op: ExprOp) -> Self {
        Expr::Op(Box::new(op))
    }

    /// Visit every operator node, depth first
    pub fn visit(&self, f: &mut dyn FnMut(&ExprOp)) {
        let Expr::Op(op) = self else {
            return;
        };
        f(op);
        match op.as_ref() {
            ExprOp::Eq(a, b)
            | ExprOp::Ne(a, b)
            | ExprOp::Lt(a, b)
            | ExprOp::Gt(a, b)
            | ExprOp::Le(a, b)
            | ExprOp::Ge(a, b)
            | ExprOp::And(a, b)
            | ExprOp::Or(a, b)
            | ExprOp::Add(a, b)
            | ExprOp::Sub(a, b)
            | ExprOp::Mul(a, b)
            | ExprOp::Div(a, b) => {
                a.visit(f);
                b.visit(f);
            }
            ExprOp::Not(a) => a.visit(f),
            ExprOp::In(range) => {
                range.value.visit(f);
                range.lo.visit(f);
                range.hi.visit(f);
            }
            ExprOp::Instances(_)
            | ExprOp::Checked(_)
            | ExprOp::PassRate(_)
            | ExprOp::Violations(_)
            | ExprOp::Unique(_)
            | ExprOp::Average(_)
            | ExprOp::Stddev(_)
            | ExprOp::Max(_)
            | ExprOp::Min(_)
            | ExprOp::Metric(_) => {}
        }
    }
}

/// Named assertion over batch statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDecl {
    pub name: String,
    pub expr: Expr,
}

/// Top level of an expectation file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectationFile {
    #[serde(default, rename = "recognizer", alias = "recognizers")]
    pub recognizers: Vec<RecognizerDecl>,
    #[serde(default, rename = "set", alias = "sets", skip_serializing_if = "Vec::is_empty")]
    pub sets: Vec<SetDecl>,
    #[serde(
        default,
        rename = "aggregate",
        alias = "aggregates",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub aggregates: Vec<AggregateDecl>,
}
