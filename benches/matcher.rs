//! Structural matcher benchmark
//!
//! Measures recognizer checks on one reconciled path, from a plain nested
//! expectation up to repeat/xor combinations that force backtracking.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench matcher
//! ```

use causeway::batch::BatchRunner;
use causeway::config::{MatchConfig, ReconcileConfig};
use causeway::expectation_types::ExpectationFile;
use causeway::path::Path;
use causeway::recognizer::RecognizerRegistry;
use causeway::reconcile::reconcile;
use causeway::trace_log::TraceLog;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Single-thread path: `outer { step * n }`
fn wide_path(id: &str, n: usize) -> Path {
    let mut content = format!(
        "{{\"type\":\"header\",\"hostname\":\"h\",\"pid\":1}}\n\
         {{\"type\":\"set_path_id\",\"ts\":0,\"path_id\":\"{id}\"}}\n\
         {{\"type\":\"task_start\",\"ts\":0,\"name\":\"outer\"}}\n"
    );
    for i in 0..n {
        let t = 1 + 2 * i as i64;
        content.push_str(&format!(
            "{{\"type\":\"task_start\",\"ts\":{t},\"name\":\"step\"}}\n\
             {{\"type\":\"task_end\",\"ts\":{},\"name\":\"step\"}}\n",
            t + 1
        ));
    }
    content.push_str(&format!(
        "{{\"type\":\"task_end\",\"ts\":{},\"name\":\"outer\"}}\n",
        2 * n as i64 + 2
    ));
    let log = TraceLog::from_jsonl_str(id, &content).unwrap();
    reconcile(&[log], &ReconcileConfig::default())
        .unwrap()
        .paths
        .remove(0)
}

fn registry(body: &str) -> RecognizerRegistry {
    let json = format!(
        r#"{{"recognizer": [{{"name": "r", "kind": "validator", "thread": [{{"body": [
            {{"op": "task", "name": "outer", "body": {body}}}
        ]}}]}}]}}"#
    );
    RecognizerRegistry::build(&ExpectationFile::from_json_str(&json).unwrap()).unwrap()
}

/// Benchmark: unbounded repeat over a growing child list
fn bench_repeat(c: &mut Criterion) {
    let mut group = c.benchmark_group("repeat_children");
    let registry = registry(r#"[{"op": "repeat", "body": [{"op": "task", "name": "step"}]}]"#);

    for n in [4, 16, 64] {
        let path = wide_path("p", n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &path, |b, path| {
            b.iter(|| registry.check_path(black_box(path), None));
        });
    }

    group.finish();
}

/// Benchmark: nested repeat/xor that explores many split points
fn bench_backtracking(c: &mut Criterion) {
    let mut group = c.benchmark_group("backtracking");
    let registry = registry(
        r#"[{"op": "repeat", "body": [{"op": "xor", "branches": [
            [{"op": "any"}],
            [{"op": "repeat", "min": 1, "max": 2, "body": [{"op": "task", "name": "step"}]}]
        ]}]}]"#,
    );

    for n in [4, 8, 16] {
        let path = wide_path("p", n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &path, |b, path| {
            b.iter(|| registry.check_path(black_box(path), Some(1_000_000)));
        });
    }

    group.finish();
}

/// Benchmark: batch runner serial vs parallel
fn bench_batch_jobs(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_jobs");
    let registry = registry(r#"[{"op": "repeat", "body": [{"op": "task", "name": "step"}]}]"#);
    let paths: Vec<Path> = (0..256).map(|i| wide_path(&format!("p{i}"), 16)).collect();

    for jobs in [1, 4] {
        let runner = BatchRunner::new(&registry, &MatchConfig::default(), jobs);
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &paths, |b, paths| {
            b.iter(|| runner.run(black_box(paths)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_repeat, bench_backtracking, bench_batch_jobs);
criterion_main!(benches);
