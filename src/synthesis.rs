//! Recognizer synthesis from observed path shapes
//!
//! Each unique shape becomes one complete recognizer that matches exactly
//! that shape. The output is an ordinary expectation file, meant to be
//! edited by hand (loosening repeats, adding limits) and fed back in.

use crate::expectation_types::{
    ExpNode, ExpectationFile, NamePattern, RecognizerDecl, RecognizerKind, ThreadDecl,
};
use crate::shape::{EventShape, ShapeGroup};

fn name_pattern(name: &str) -> NamePattern {
    if name == "*" {
        // A literal "*" would read back as the wildcard
        NamePattern::Regex {
            regex: r"^\*$".to_string(),
        }
    } else {
        NamePattern::exact(name)
    }
}

fn node(shape: &EventShape) -> ExpNode {
    match shape {
        EventShape::Task { name, children } => ExpNode::Task {
            name: name_pattern(name),
            limits: Vec::new(),
            body: body(children),
        },
        EventShape::Notice { name } => ExpNode::Notice {
            name: name_pattern(name),
        },
        EventShape::Send => ExpNode::Send { limits: Vec::new() },
        EventShape::Recv => ExpNode::Recv { limits: Vec::new() },
    }
}

/// Expectation list for a sibling list; runs of identical events collapse to a repeat
fn body(events: &[EventShape]) -> Vec<ExpNode> {
    let mut nodes = Vec::new();
    let mut rest = events;
    while let Some(first) = rest.first() {
        let run = rest.iter().take_while(|event| *event == first).count();
        if run == 1 {
            nodes.push(node(first));
        } else {
            nodes.push(ExpNode::Repeat {
                min: run as u32,
                max: run as i64,
                body: vec![node(first)],
            });
        }
        rest = &rest[run..];
    }
    nodes
}

/// One validator per shape group, named `<prefix><n>` in group order
pub fn synthesize(groups: &[ShapeGroup], prefix: &str) -> ExpectationFile {
    let recognizers = groups
        .iter()
        .enumerate()
        .map(|(index, group)| {
            let mut threads = vec![ThreadDecl {
                name: "root".to_string(),
                min: 1,
                max: 1,
                limits: Vec::new(),
                body: body(&group.shape.root),
            }];
            for (n, (shape, count)) in group.shape.grouped_others().into_iter().enumerate() {
                threads.push(ThreadDecl {
                    name: format!("thread{}", n + 1),
                    min: count,
                    max: i64::from(count),
                    limits: Vec::new(),
                    body: body(shape),
                });
            }
            RecognizerDecl {
                name: format!("{}{}", prefix, index + 1),
                kind: RecognizerKind::Validator,
                complete: true,
                limits: Vec::new(),
                threads,
            }
        })
        .collect();
    ExpectationFile {
        recognizers,
        ..ExpectationFile::default()
    }
}
