//! Validation and compilation of expectation files

use super::{
    Aggregate, ExpEvent, ExpThread, FutureId, FutureTable, NameMatch, PathRecognizer, Recognizer,
    RecognizerRegistry, SetRecognizer, SetTerm,
};
use crate::expectation_types::{
    ExpNode, ExpectationFile, Expr, ExprOp, NamePattern, RecognizerDecl, SetDecl, ThreadDecl,
};
use crate::limit::{Limit, Metric, Scope};
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

/// An expectation file that cannot be executed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecError {
    #[error("recognizer {0:?} is declared more than once")]
    DuplicateName(String),
    #[error("recognizer {0:?} declares no threads")]
    NoThreads(String),
    #[error("{context}: bound [{min}, {max}] is invalid")]
    BadBound { context: String, min: i64, max: i64 },
    #[error("{context}: metric {metric} is not available on a {scope}")]
    UnsupportedMetric {
        context: String,
        metric: Metric,
        scope: Scope,
    },
    #[error("{context}: {limit} has its minimum above its maximum")]
    InvertedLimit { context: String, limit: String },
    #[error("{context}: invalid regex {pattern:?}: {message}")]
    BadRegex {
        context: String,
        pattern: String,
        message: String,
    },
    #[error("{context}: call target {target:?} is not a declared recognizer")]
    UnknownCall { context: String, target: String },
    #[error("{context}: call target {target:?} is a complete recognizer, not a fragment")]
    NotFragment { context: String, target: String },
    #[error("recognizer {0:?} reaches itself through call")]
    RecursiveCall(String),
    #[error("set {set:?} references {target:?}, which is not declared before it")]
    UnknownReference { set: String, target: String },
    #[error("aggregate {aggregate:?} references unknown recognizer {target:?}")]
    UnknownAggregateReference { aggregate: String, target: String },
    #[error("{context}: {detail}")]
    MisplacedExpr { context: String, detail: String },
}

fn bound(context: &str, min: u32, max: i64) -> Result<Option<u32>, SpecError> {
    let invalid = || SpecError::BadBound {
        context: context.to_string(),
        min: i64::from(min),
        max,
    };
    match max {
        -1 => Ok(None),
        m if m < -1 || m < i64::from(min) => Err(invalid()),
        m => u32::try_from(m).map(Some).map_err(|_| invalid()),
    }
}

fn check_limits(context: &str, limits: &[Limit], scope: Scope) -> Result<(), SpecError> {
    for limit in limits {
        if !limit.metric.supported_by(scope) {
            return Err(SpecError::UnsupportedMetric {
                context: context.to_string(),
                metric: limit.metric,
                scope,
            });
        }
        if limit.min != Limit::UNBOUNDED && limit.max != Limit::UNBOUNDED && limit.min > limit.max
        {
            return Err(SpecError::InvertedLimit {
                context: context.to_string(),
                limit: limit.to_string(),
            });
        }
    }
    Ok(())
}

fn compile_name(context: &str, pattern: &NamePattern) -> Result<NameMatch, SpecError> {
    match pattern {
        NamePattern::Text(text) if text == "*" => Ok(NameMatch::Any),
        NamePattern::Text(text) => Ok(NameMatch::Exact(text.clone())),
        NamePattern::Regex { regex } => Regex::new(regex)
            .map(NameMatch::Regex)
            .map_err(|err| SpecError::BadRegex {
                context: context.to_string(),
                pattern: regex.clone(),
                message: err.to_string(),
            }),
        NamePattern::Not { not } => Ok(NameMatch::Not(Box::new(compile_name(context, not)?))),
    }
}

/// Reject recognizer statistics inside `eval`; path metrics are all valid there
fn check_eval_expr(context: &str, expr: &Expr) -> Result<(), SpecError> {
    let mut misplaced = None;
    expr.visit(&mut |op| {
        if misplaced.is_some() {
            return;
        }
        match op {
            ExprOp::Instances(name)
            | ExprOp::Checked(name)
            | ExprOp::PassRate(name)
            | ExprOp::Violations(name)
            | ExprOp::Unique(name) => misplaced = Some(name.clone()),
            ExprOp::Average(of) | ExprOp::Stddev(of) | ExprOp::Max(of) | ExprOp::Min(of) => {
                misplaced = Some(of.recognizer.clone())
            }
            _ => {}
        }
    });
    match misplaced {
        Some(name) => Err(SpecError::MisplacedExpr {
            context: context.to_string(),
            detail: format!("statistics of {:?} cannot be read inside eval", name),
        }),
        None => Ok(()),
    }
}

/// Compiles the declarations of one path recognizer
struct Compiler<'a> {
    context: String,
    index: usize,
    /// Path recognizer names to (index, complete)
    targets: &'a HashMap<String, (usize, bool)>,
    futures: FutureTable,
    calls: Vec<usize>,
}

impl Compiler<'_> {
    fn nodes(&mut self, nodes: &[ExpNode]) -> Result<Vec<ExpEvent>, SpecError> {
        nodes.iter().map(|node| self.node(node)).collect()
    }

    fn node(&mut self, node: &ExpNode) -> Result<ExpEvent, SpecError> {
        let event = match node {
            ExpNode::Task { name, limits, body } => {
                check_limits(&self.context, limits, Scope::Task)?;
                ExpEvent::Task {
                    name: compile_name(&self.context, name)?,
                    limits: limits.clone(),
                    children: self.nodes(body)?,
                }
            }
            ExpNode::Notice { name } => ExpEvent::Notice {
                name: compile_name(&self.context, name)?,
            },
            ExpNode::Send { limits } => {
                check_limits(&self.context, limits, Scope::Message)?;
                ExpEvent::Send {
                    limits: limits.clone(),
                }
            }
            ExpNode::Recv { limits } => {
                check_limits(&self.context, limits, Scope::Message)?;
                ExpEvent::Recv {
                    limits: limits.clone(),
                }
            }
            ExpNode::Repeat { min, max, body } => ExpEvent::Repeat {
                min: *min,
                max: bound(&format!("{}: repeat", self.context), *min, *max)?,
                body: self.nodes(body)?,
            },
            ExpNode::Xor { branches } => ExpEvent::Xor {
                branches: branches
                    .iter()
                    .map(|branch| self.nodes(branch))
                    .collect::<Result<_, _>>()?,
            },
            ExpNode::Call { target } => {
                let &(index, complete) =
                    self.targets
                        .get(target)
                        .ok_or_else(|| SpecError::UnknownCall {
                            context: self.context.clone(),
                            target: target.clone(),
                        })?;
                if complete {
                    return Err(SpecError::NotFragment {
                        context: self.context.clone(),
                        target: target.clone(),
                    });
                }
                self.calls.push(index);
                ExpEvent::Call { target: index }
            }
            ExpNode::Any => ExpEvent::Any,
            ExpNode::Future { name, body } => {
                let body = self.nodes(body)?;
                let slot = self.futures.push(name.clone(), body);
                ExpEvent::Future {
                    id: FutureId {
                        recognizer: self.index,
                        slot,
                    },
                }
            }
            ExpNode::Done { name } => ExpEvent::Done { name: name.clone() },
            ExpNode::Assign { variable, body } => ExpEvent::Assign {
                variable: variable.clone(),
                body: self.nodes(body)?,
            },
            ExpNode::Eval { expr } => {
                check_eval_expr(&self.context, expr)?;
                ExpEvent::Eval { expr: expr.clone() }
            }
        };
        Ok(event)
    }

    fn thread(&mut self, decl: &ThreadDecl) -> Result<ExpThread, SpecError> {
        let context = format!("{}: thread {:?}", self.context, decl.name);
        check_limits(&context, &decl.limits, Scope::Thread)?;
        Ok(ExpThread {
            name: decl.name.clone(),
            min: decl.min,
            max: bound(&context, decl.min, decl.max)?,
            limits: decl.limits.clone(),
            body: self.nodes(&decl.body)?,
        })
    }
}

fn compile_set(
    decl: &SetDecl,
    expr: &crate::expectation_types::SetExpr,
    by_name: &HashMap<String, usize>,
) -> Result<SetTerm, SpecError> {
    use crate::expectation_types::SetExpr;
    let term = match expr {
        SetExpr::Ref(target) => {
            let index = by_name
                .get(target)
                .ok_or_else(|| SpecError::UnknownReference {
                    set: decl.name.clone(),
                    target: target.clone(),
                })?;
            SetTerm::Ref(*index)
        }
        SetExpr::Not(inner) => SetTerm::Not(Box::new(compile_set(decl, inner, by_name)?)),
        SetExpr::And(items) => SetTerm::And(
            items
                .iter()
                .map(|item| compile_set(decl, item, by_name))
                .collect::<Result<_, _>>()?,
        ),
        SetExpr::Or(items) => SetTerm::Or(
            items
                .iter()
                .map(|item| compile_set(decl, item, by_name))
                .collect::<Result<_, _>>()?,
        ),
        SetExpr::Implies(a, b) => SetTerm::Implies(
            Box::new(compile_set(decl, a, by_name)?),
            Box::new(compile_set(decl, b, by_name)?),
        ),
    };
    Ok(term)
}

/// Depth-first search for a `call` cycle starting at `start`
fn reaches_itself(start: usize, calls: &[Vec<usize>]) -> bool {
    let mut stack: Vec<usize> = calls[start].clone();
    let mut seen = vec![false; calls.len()];
    while let Some(next) = stack.pop() {
        if next == start {
            return true;
        }
        if !std::mem::replace(&mut seen[next], true) {
            stack.extend(calls[next].iter().copied());
        }
    }
    false
}

impl RecognizerRegistry {
    /// Validate and compile every declaration of an expectation file
    ///
    /// # Returns
    ///
    /// The registry, or the first [`SpecError`] found; a registry is never
    /// partially built.
    pub fn build(file: &ExpectationFile) -> Result<Self, SpecError> {
        let mut targets: HashMap<String, (usize, bool)> = HashMap::new();
        for (index, decl) in file.recognizers.iter().enumerate() {
            if targets.insert(decl.name.clone(), (index, decl.complete)).is_some() {
                return Err(SpecError::DuplicateName(decl.name.clone()));
            }
        }

        let mut registry = RecognizerRegistry::default();
        let mut calls = Vec::with_capacity(file.recognizers.len());
        for (index, decl) in file.recognizers.iter().enumerate() {
            let (recognizer, called) = compile_recognizer(index, decl, &targets)?;
            calls.push(called);
            registry.by_name.insert(decl.name.clone(), index);
            registry.recognizers.push(Recognizer::Path(recognizer));
        }
        for (index, decl) in file.recognizers.iter().enumerate() {
            if reaches_itself(index, &calls) {
                return Err(SpecError::RecursiveCall(decl.name.clone()));
            }
        }

        for decl in &file.sets {
            if registry.by_name.contains_key(&decl.name) {
                return Err(SpecError::DuplicateName(decl.name.clone()));
            }
            let term = compile_set(decl, &decl.expr, &registry.by_name)?;
            registry
                .by_name
                .insert(decl.name.clone(), registry.recognizers.len());
            registry.recognizers.push(Recognizer::Set(SetRecognizer {
                name: decl.name.clone(),
                kind: decl.kind,
                term,
            }));
        }

        for decl in &file.aggregates {
            registry.aggregates.push(compile_aggregate(decl, &registry.by_name)?);
        }

        info!(
            recognizers = registry.recognizers.len(),
            aggregates = registry.aggregates.len(),
            "Built recognizer registry"
        );
        Ok(registry)
    }
}

fn compile_recognizer(
    index: usize,
    decl: &RecognizerDecl,
    targets: &HashMap<String, (usize, bool)>,
) -> Result<(PathRecognizer, Vec<usize>), SpecError> {
    let context = format!("recognizer {:?}", decl.name);
    if decl.threads.is_empty() {
        return Err(SpecError::NoThreads(decl.name.clone()));
    }
    check_limits(&context, &decl.limits, Scope::Path)?;

    let mut compiler = Compiler {
        context,
        index,
        targets,
        futures: FutureTable::default(),
        calls: Vec::new(),
    };
    let threads = decl
        .threads
        .iter()
        .map(|thread| compiler.thread(thread))
        .collect::<Result<Vec<_>, _>>()?;

    let recognizer = PathRecognizer {
        name: decl.name.clone(),
        kind: decl.kind,
        complete: decl.complete,
        limits: decl.limits.clone(),
        threads,
        futures: compiler.futures,
    };
    Ok((recognizer, compiler.calls))
}

fn compile_aggregate(
    decl: &crate::expectation_types::AggregateDecl,
    by_name: &HashMap<String, usize>,
) -> Result<Aggregate, SpecError> {
    let mut problem = None;
    decl.expr.visit(&mut |op| {
        if problem.is_some() {
            return;
        }
        let target = match op {
            ExprOp::Instances(name)
            | ExprOp::Checked(name)
            | ExprOp::PassRate(name)
            | ExprOp::Violations(name)
            | ExprOp::Unique(name) => name,
            ExprOp::Average(of) | ExprOp::Stddev(of) | ExprOp::Max(of) | ExprOp::Min(of) => {
                &of.recognizer
            }
            ExprOp::Metric(metric) => {
                problem = Some(SpecError::MisplacedExpr {
                    context: format!("aggregate {:?}", decl.name),
                    detail: format!("path metric {} is only available inside eval", metric),
                });
                return;
            }
            _ => return,
        };
        if !by_name.contains_key(target) {
            problem = Some(SpecError::UnknownAggregateReference {
                aggregate: decl.name.clone(),
                target: target.clone(),
            });
        }
    });
    match problem {
        Some(err) => Err(err),
        None => Ok(Aggregate {
            name: decl.name.clone(),
            expr: decl.expr.clone(),
        }),
    }
}
