#![no_main]

use causeway::config::ReconcileConfig;
use causeway::reconcile::reconcile;
use causeway::trace_log::TraceLog;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(log) = TraceLog::from_jsonl_str("fuzz", input) {
            let _ = reconcile(&[log], &ReconcileConfig::default());
        }
    }
});
