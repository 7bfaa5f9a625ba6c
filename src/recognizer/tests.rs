use super::*;
use crate::event::{MessageId, PathId, ResourceUsage, Stamp, Timestamp};
use crate::expectation_types::ExpectationFile;
use crate::path::{Endpoint, Message, PathBuilder, PathNotice, PathTask, PoolInfo};

fn pool(id: usize) -> PoolInfo {
    PoolInfo {
        id,
        host: format!("h{}", id),
        program: "svc".to_string(),
        pid: 100 + id as u32,
    }
}

fn task(name: &str, start: i64, end: i64) -> PathTask {
    PathTask {
        name: name.to_string(),
        start: Stamp::at(start),
        end: Timestamp(end),
        resources: ResourceUsage::default(),
        children: Vec::new(),
    }
}

fn notice(name: &str, ts: i64) -> PathNotice {
    PathNotice {
        name: name.to_string(),
        at: Stamp::at(ts),
    }
}

fn message(id: &str, send: (usize, i64), recv: (usize, i64)) -> Message {
    let endpoint = |(pool, ts): (usize, i64)| Endpoint {
        pool,
        at: Stamp::at(ts),
        resources: ResourceUsage::default(),
    };
    Message {
        id: MessageId::from(id),
        size: 10,
        send: endpoint(send),
        recv: Some(endpoint(recv)),
        predecessor: None,
    }
}

/// One pool: task x [0, 3) holding task y [1, 2)
fn nested_path(x_utime: i64) -> Path {
    let mut builder = PathBuilder::new(PathId::from("nested"));
    builder.add_task(&pool(0), task("y", 1, 2));
    let mut x = task("x", 0, 3);
    x.resources.utime = x_utime;
    builder.add_task(&pool(0), x);
    builder.done_inserting().unwrap()
}

fn notice_path(names: &[&str]) -> Path {
    let mut builder = PathBuilder::new(PathId::from("notices"));
    for (ts, name) in names.iter().enumerate() {
        builder.add_notice(&pool(0), notice(name, ts as i64));
    }
    builder.done_inserting().unwrap()
}

/// Root pool 0 sends to pools 1 and 2
fn fan_out_path() -> Path {
    let mut builder = PathBuilder::new(PathId::from("fan"));
    builder.add_message(&pool(0), Some(&pool(1)), message("m1", (0, 1), (1, 3)));
    builder.add_message(&pool(0), Some(&pool(2)), message("m2", (0, 2), (2, 4)));
    let path = builder.done_inserting().unwrap();
    assert!(path.valid());
    path
}

fn registry(json: &str) -> RecognizerRegistry {
    let file = ExpectationFile::from_json_str(json).unwrap();
    RecognizerRegistry::build(&file).unwrap()
}

fn build_err(json: &str) -> SpecError {
    let file = ExpectationFile::from_json_str(json).unwrap();
    RecognizerRegistry::build(&file).unwrap_err()
}

fn verdict(registry: &RecognizerRegistry, path: &Path, name: &str) -> CheckOutcome {
    let index = registry.index_of(name).unwrap();
    registry.check_path(path, None)[index]
}

fn matched(resources_ok: bool) -> CheckOutcome {
    CheckOutcome::Checked(Verdict {
        matched: true,
        resources_ok,
    })
}

const NO_MATCH: CheckOutcome = CheckOutcome::Checked(Verdict::NO_MATCH);

const NESTED: &str = r#"{"recognizer": [{
    "name": "nested",
    "kind": "validator",
    "thread": [{"name": "*", "body": [
        {"op": "task", "name": "x", "body": [{"op": "task", "name": "y"}]}
    ]}]
}]}"#;

#[test]
fn test_nested_task_scenario() {
    let reg = registry(NESTED);
    assert_eq!(verdict(&reg, &nested_path(0), "nested"), matched(true));
}

#[test]
fn test_task_without_body_requires_no_children() {
    let reg = registry(
        r#"{"recognizer": [{"name": "flat", "thread": [{"body": [{"op": "task", "name": "x"}]}]}]}"#,
    );
    assert_eq!(verdict(&reg, &nested_path(0), "flat"), NO_MATCH);
}

#[test]
fn test_name_patterns() {
    let reg = registry(
        r#"{"recognizer": [
            {"name": "wild", "thread": [{"body": [{"op": "task", "name": "*", "body": [{"op": "any"}]}]}]},
            {"name": "regex", "thread": [{"body": [{"op": "task", "name": {"regex": "^[xz]$"}, "body": [{"op": "task", "name": {"not": "x"}}]}]}]},
            {"name": "wrong", "thread": [{"body": [{"op": "task", "name": {"not": "x"}, "body": [{"op": "any"}]}]}]}
        ]}"#,
    );
    let path = nested_path(0);
    assert_eq!(verdict(&reg, &path, "wild"), matched(true));
    assert_eq!(verdict(&reg, &path, "regex"), matched(true));
    assert_eq!(verdict(&reg, &path, "wrong"), NO_MATCH);
}

#[test]
fn test_task_limit_violation_still_matches() {
    let reg = registry(
        r#"{"recognizer": [{"name": "cheap", "thread": [{"body": [
            {"op": "task", "name": "x", "limits": [{"metric": "user_time", "max": 0.00001}],
             "body": [{"op": "task", "name": "y"}]}
        ]}]}]}"#,
    );
    assert_eq!(verdict(&reg, &nested_path(5), "cheap"), matched(true));
    assert_eq!(verdict(&reg, &nested_path(40), "cheap"), matched(false));
}

#[test]
fn test_empty_lists_match_with_zero_consumption() {
    let reg = RecognizerRegistry::default();
    let path = notice_path(&[]);
    let mut ctx = MatchContext::new(&reg, &path, None);
    let result = ctx.match_list(&[], &[], MatchFlags::THREAD).unwrap();
    assert_eq!(result, MatchSet::from([MatchState::start()]));
}

#[test]
fn test_zero_repeat_equals_empty_list() {
    let reg = RecognizerRegistry::default();
    let path = notice_path(&["a", "b"]);
    let events = &path.pools[&0].events;
    let flags = MatchFlags::FRAGMENT;
    let mut ctx = MatchContext::new(&reg, &path, None);
    let repeat = [ExpEvent::Repeat {
        min: 0,
        max: Some(0),
        body: vec![ExpEvent::Any],
    }];
    let with_repeat = ctx.match_list(&repeat, events, flags).unwrap();
    let empty = ctx.match_list(&[], events, flags).unwrap();
    assert_eq!(with_repeat, empty);
}

#[test]
fn test_xor_with_one_viable_branch_equals_that_branch() {
    let reg = RecognizerRegistry::default();
    let path = notice_path(&["b"]);
    let events = &path.pools[&0].events;
    let a = vec![ExpEvent::Notice {
        name: NameMatch::Exact("a".to_string()),
    }];
    let b = vec![ExpEvent::Notice {
        name: NameMatch::Exact("b".to_string()),
    }];
    let mut ctx = MatchContext::new(&reg, &path, None);
    let xor = [ExpEvent::Xor {
        branches: vec![a, b.clone()],
    }];
    let via_xor = ctx.match_list(&xor, events, MatchFlags::THREAD).unwrap();
    let direct = ctx.match_list(&b, events, MatchFlags::THREAD).unwrap();
    assert!(!direct.is_empty());
    assert_eq!(via_xor, direct);
}

#[test]
fn test_repeat_bounds() {
    let path = notice_path(&["a", "a", "a"]);
    let check = |min: u32, max: i64| {
        let json = format!(
            r#"{{"recognizer": [{{"name": "r", "thread": [{{"body": [
                {{"op": "repeat", "min": {}, "max": {}, "body": [{{"op": "notice", "name": "a"}}]}}
            ]}}]}}]}}"#,
            min, max
        );
        verdict(&registry(&json), &path, "r")
    };
    assert_eq!(check(2, 3), matched(true));
    assert_eq!(check(0, -1), matched(true));
    assert_eq!(check(3, 3), matched(true));
    assert_eq!(check(4, -1), NO_MATCH);
    assert_eq!(check(0, 2), NO_MATCH);
}

#[test]
fn test_repeat_collects_every_count() {
    let reg = RecognizerRegistry::default();
    let path = notice_path(&["a", "a", "a"]);
    let events = &path.pools[&0].events;
    let mut ctx = MatchContext::new(&reg, &path, None);
    let repeat = [ExpEvent::Repeat {
        min: 1,
        max: None,
        body: vec![ExpEvent::Any],
    }];
    let result = ctx.match_list(&repeat, events, MatchFlags::FRAGMENT).unwrap();
    let offsets: Vec<usize> = result.iter().map(|s| s.offset).collect();
    assert_eq!(offsets, vec![1, 2, 3]);
}

#[test]
fn test_future_matches_out_of_order() {
    let reg = registry(
        r#"{"recognizer": [
            {"name": "lax", "thread": [{"body": [
                {"op": "future", "name": "late_a", "body": [{"op": "notice", "name": "a"}]},
                {"op": "notice", "name": "b"},
                {"op": "done", "name": "late_a"}
            ]}]},
            {"name": "strict", "thread": [{"body": [
                {"op": "notice", "name": "a"},
                {"op": "notice", "name": "b"}
            ]}]}
        ]}"#,
    );
    let path = notice_path(&["b", "a"]);
    assert_eq!(verdict(&reg, &path, "lax"), matched(true));
    assert_eq!(verdict(&reg, &path, "strict"), NO_MATCH);
}

#[test]
fn test_undischarged_future_fails_thread() {
    let reg = registry(
        r#"{"recognizer": [{"name": "lax", "thread": [{"body": [
            {"op": "future", "body": [{"op": "notice", "name": "a"}]},
            {"op": "notice", "name": "b"}
        ]}]}]}"#,
    );
    assert_eq!(verdict(&reg, &notice_path(&["b"]), "lax"), NO_MATCH);
}

#[test]
fn test_future_counts_are_a_multiset() {
    let id = FutureId {
        recognizer: 0,
        slot: 0,
    };
    let mut counts = FutureCounts::default();
    counts.increment(id);
    counts.increment(id);
    assert_eq!(counts.get(id), 2);
    assert!(counts.decrement(id));
    assert!(counts.decrement(id));
    assert!(counts.is_empty());
    assert!(!counts.decrement(id));
}

#[test]
fn test_call_inlines_fragment() {
    let reg = registry(
        r#"{"recognizer": [
            {"name": "pair", "complete": false, "thread": [{"body": [
                {"op": "notice", "name": "a"}, {"op": "notice", "name": "b"}
            ]}]},
            {"name": "caller", "thread": [{"body": [
                {"op": "call", "target": "pair"}, {"op": "notice", "name": "c"}
            ]}]}
        ]}"#,
    );
    assert_eq!(verdict(&reg, &notice_path(&["a", "b", "c"]), "caller"), matched(true));
    assert_eq!(verdict(&reg, &notice_path(&["a", "c"]), "caller"), NO_MATCH);
}

#[test]
fn test_fragment_matches_at_any_level() {
    let reg = registry(
        r#"{"recognizer": [
            {"name": "inner", "complete": false, "thread": [{"body": [{"op": "task", "name": "y"}]}]},
            {"name": "missing", "complete": false, "thread": [{"body": [{"op": "task", "name": "z"}]}]}
        ]}"#,
    );
    let path = nested_path(0);
    assert_eq!(verdict(&reg, &path, "inner"), matched(true));
    assert_eq!(verdict(&reg, &path, "missing"), NO_MATCH);
}

#[test]
fn test_thread_multiplicity() {
    let reg = registry(
        r#"{"recognizer": [
            {"name": "both", "thread": [
                {"name": "client", "body": [{"op": "send"}, {"op": "send"}]},
                {"name": "server", "min": 2, "max": 2, "body": [{"op": "recv"}]}
            ]},
            {"name": "one_server", "thread": [
                {"name": "client", "body": [{"op": "send"}, {"op": "send"}]},
                {"name": "server", "min": 1, "max": 1, "body": [{"op": "recv"}]}
            ]}
        ]}"#,
    );
    let path = fan_out_path();
    assert_eq!(verdict(&reg, &path, "both"), matched(true));
    assert_eq!(verdict(&reg, &path, "one_server"), NO_MATCH);
}

#[test]
fn test_first_fit_assignment_is_greedy() {
    // Assigning one pool to each thread would satisfy both bounds, but the
    // first expectation that fits takes both pools.
    let reg = registry(
        r#"{"recognizer": [{"name": "greedy", "thread": [
            {"body": [{"op": "send"}, {"op": "send"}]},
            {"name": "anything", "min": 0, "max": 2, "body": [{"op": "repeat", "body": [{"op": "any"}]}]},
            {"name": "server", "min": 1, "max": 1, "body": [{"op": "recv"}]}
        ]}]}"#,
    );
    assert_eq!(verdict(&reg, &fan_out_path(), "greedy"), NO_MATCH);
}

#[test]
fn test_thread_and_path_limits() {
    let reg = registry(
        r#"{"recognizer": [
            {"name": "quiet_client", "thread": [
                {"body": [{"op": "send"}, {"op": "send"}], "limits": [{"metric": "messages", "max": 1}]},
                {"min": 2, "max": 2, "body": [{"op": "recv"}]}
            ]},
            {"name": "shallow", "limits": [{"metric": "depth", "max": 0}], "thread": [
                {"body": [{"op": "send"}, {"op": "send"}]},
                {"min": 2, "max": 2, "body": [{"op": "recv", "limits": [{"metric": "size", "max": 10}]}]}
            ]}
        ]}"#,
    );
    let path = fan_out_path();
    assert_eq!(verdict(&reg, &path, "quiet_client"), matched(false));
    assert_eq!(verdict(&reg, &path, "shallow"), matched(false));
}

#[test]
fn test_eval_reads_path_metrics() {
    let reg = registry(
        r#"{"recognizer": [
            {"name": "local", "thread": [{"body": [
                {"op": "eval", "expr": {"eq": [{"metric": "messages"}, 0]}},
                {"op": "repeat", "body": [{"op": "any"}]}
            ]}]},
            {"name": "busy", "thread": [{"body": [
                {"op": "eval", "expr": {"gt": [{"metric": "messages"}, 0]}},
                {"op": "repeat", "body": [{"op": "any"}]}
            ]}]}
        ]}"#,
    );
    let path = notice_path(&["a"]);
    assert_eq!(verdict(&reg, &path, "local"), matched(true));
    assert_eq!(verdict(&reg, &path, "busy"), NO_MATCH);
}

#[test]
fn test_set_recognizers() {
    let reg = registry(
        r#"{
            "recognizer": [
                {"name": "has_x", "complete": false, "thread": [{"body": [{"op": "task", "name": "x", "body": [{"op": "any"}]}]}]},
                {"name": "has_z", "complete": false, "thread": [{"body": [{"op": "task", "name": "z"}]}]}
            ],
            "set": [
                {"name": "x_not_z", "expr": {"and": [{"ref": "has_x"}, {"not": {"ref": "has_z"}}]}},
                {"name": "z_implies_x", "expr": {"implies": [{"ref": "has_z"}, {"ref": "has_x"}]}},
                {"name": "either", "kind": "invalidator", "expr": {"or": [{"ref": "has_z"}, {"ref": "x_not_z"}]}}
            ]
        }"#,
    );
    let path = nested_path(0);
    assert_eq!(verdict(&reg, &path, "x_not_z"), matched(true));
    assert_eq!(verdict(&reg, &path, "z_implies_x"), matched(true));
    assert_eq!(verdict(&reg, &path, "either"), matched(true));
    assert_eq!(
        reg.get(reg.index_of("either").unwrap()).unwrap().kind(),
        RecognizerKind::Invalidator
    );
}

#[test]
fn test_budget_exhaustion_is_reported() {
    let reg = registry(NESTED);
    let outcomes = reg.check_path(&nested_path(0), Some(1));
    assert!(matches!(outcomes[0], CheckOutcome::BudgetExhausted { .. }));
    assert_eq!(outcomes[0].verdict(), Verdict::NO_MATCH);
}

#[test]
fn test_assign_matches_body_in_place() {
    let reg = registry(
        r#"{"recognizer": [
            {"name": "split", "thread": [{"body": [
                {"op": "assign", "variable": "first", "body": [{"op": "notice", "name": "a"}]},
                {"op": "notice", "name": "b"}
            ]}]},
            {"name": "greedy", "thread": [{"body": [
                {"op": "assign", "variable": "both", "body": [
                    {"op": "notice", "name": "a"}, {"op": "notice", "name": "b"}
                ]},
                {"op": "notice", "name": "b"}
            ]}]},
            {"name": "wrong", "thread": [{"body": [
                {"op": "assign", "variable": "first", "body": [{"op": "notice", "name": "b"}]},
                {"op": "notice", "name": "b"}
            ]}]}
        ]}"#,
    );
    let path = notice_path(&["a", "b"]);
    assert_eq!(verdict(&reg, &path, "split"), matched(true));
    assert_eq!(verdict(&reg, &path, "greedy"), NO_MATCH);
    assert_eq!(verdict(&reg, &path, "wrong"), NO_MATCH);
}

fn nested_assigns(levels: usize) -> Vec<ExpEvent> {
    let mut exps = Vec::new();
    for _ in 0..levels {
        exps = vec![ExpEvent::Assign {
            variable: "v".to_string(),
            body: exps,
        }];
    }
    exps
}

#[test]
fn test_nesting_limit() {
    let reg = RecognizerRegistry::default();
    let path = notice_path(&[]);
    let mut ctx = MatchContext::new(&reg, &path, None);

    let shallow = ctx.match_list(&nested_assigns(100), &[], MatchFlags::THREAD);
    assert_eq!(shallow, Ok(MatchSet::from([MatchState::start()])));

    let deep = ctx.match_list(&nested_assigns(matcher::MAX_NESTING + 10), &[], MatchFlags::THREAD);
    assert_eq!(
        deep,
        Err(MatchError::TooDeep {
            limit: matcher::MAX_NESTING
        })
    );

    // Depth is unwound after the failure
    let again = ctx.match_list(&nested_assigns(100), &[], MatchFlags::THREAD);
    assert!(again.is_ok());
}

#[test]
fn test_matching_is_idempotent() {
    let reg = registry(NESTED);
    let path = nested_path(0);
    assert_eq!(reg.check_path(&path, None), reg.check_path(&path, None));
}

#[test]
fn test_spec_errors() {
    let cases = [
        (
            r#"{"recognizer": [{"name": "r", "thread": [{"body": [{"op": "call", "target": "nope"}]}]}]}"#,
            "UnknownCall",
        ),
        (
            r#"{"recognizer": [
                {"name": "full", "thread": [{"body": []}]},
                {"name": "r", "thread": [{"body": [{"op": "call", "target": "full"}]}]}
            ]}"#,
            "NotFragment",
        ),
        (
            r#"{"recognizer": [{"name": "r", "thread": [{"body": [
                {"op": "task", "name": "x", "limits": [{"metric": "size", "max": 1}]}
            ]}]}]}"#,
            "UnsupportedMetric",
        ),
        (
            r#"{"recognizer": [{"name": "r", "thread": [{"body": [{"op": "task", "name": {"regex": "("}}]}]}]}"#,
            "BadRegex",
        ),
        (
            r#"{"recognizer": [{"name": "r", "thread": []}]}"#,
            "NoThreads",
        ),
        (
            r#"{"recognizer": [{"name": "r", "thread": [{"min": 2, "max": 1, "body": []}]}]}"#,
            "BadBound",
        ),
        (
            r#"{"recognizer": [{"name": "r", "thread": [{"body": []}]}, {"name": "r", "thread": [{"body": []}]}]}"#,
            "DuplicateName",
        ),
        (
            r#"{"recognizer": [{"name": "f", "complete": false, "thread": [{"body": [{"op": "call", "target": "f"}]}]}]}"#,
            "RecursiveCall",
        ),
        (
            r#"{"recognizer": [{"name": "r", "thread": [{"body": [{"op": "eval", "expr": {"instances": "r"}}]}]}]}"#,
            "MisplacedExpr",
        ),
        (
            r#"{"recognizer": [{"name": "r", "thread": [{"body": []}]}],
                "set": [{"name": "s", "expr": {"ref": "later"}}, {"name": "later", "expr": {"ref": "r"}}]}"#,
            "UnknownReference",
        ),
        (
            r#"{"recognizer": [{"name": "r", "thread": [{"body": []}]}],
                "aggregate": [{"name": "a", "expr": {"instances": "ghost"}}]}"#,
            "UnknownAggregateReference",
        ),
        (
            r#"{"recognizer": [{"name": "r", "thread": [{"body": []}]}],
                "aggregate": [{"name": "a", "expr": {"metric": "depth"}}]}"#,
            "MisplacedExpr",
        ),
    ];
    for (json, expected) in cases {
        let err = build_err(json);
        let variant = format!("{:?}", err);
        assert!(
            variant.starts_with(expected),
            "expected {} for {}, got {}",
            expected,
            json,
            variant
        );
    }
}

#[test]
fn test_registry_order_and_lookup() {
    let reg = registry(
        r#"{"recognizer": [{"name": "a", "thread": [{"body": []}]}, {"name": "b", "thread": [{"body": []}]}],
            "set": [{"name": "s", "expr": {"ref": "a"}}]}"#,
    );
    assert_eq!(reg.names(), vec!["a", "b", "s"]);
    assert!(reg.path_recognizer(2).is_none());
    assert_eq!(reg.index_of("b"), Some(1));
}
