// Shared fixtures for integration tests
//
// Trace logs are written as JSON lines into a temporary directory so the
// binary and the library read exactly what a traced service would emit.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub const CLIENT_HEADER: &str =
    r#"{"type":"header","hostname":"alpha","processname":"client","pid":10,"tid":10}"#;
pub const SERVER_HEADER: &str =
    r#"{"type":"header","hostname":"beta","processname":"server","pid":20,"tid":20}"#;

/// Client side of one request: `request { send m1, recv m2 }` on host alpha
///
/// With `retry`, a `retry` notice is logged between send and receive.
pub fn client_events(path: &str, retry: bool) -> String {
    let notice = if retry {
        "{\"type\":\"notice\",\"ts\":5,\"name\":\"retry\"}\n".to_string()
    } else {
        String::new()
    };
    format!(
        r#"{{"type":"set_path_id","ts":0,"path_id":"{path}"}}
{{"type":"task_start","ts":0,"name":"request"}}
{{"type":"message_send","ts":1,"id":"{path}-m1","size":100}}
{notice}{{"type":"message_recv","ts":8,"id":"{path}-m2","size":50}}
{{"type":"task_end","ts":10,"name":"request","resources":{{"utime":4}}}}
{{"type":"end_path_id","ts":10,"path_id":"{path}"}}
"#
    )
}

/// Server side of one request: `recv m1, handle, send m2` on host beta
pub fn server_events(path: &str) -> String {
    format!(
        r#"{{"type":"set_path_id","ts":2,"path_id":"{path}"}}
{{"type":"message_recv","ts":2,"id":"{path}-m1","size":100}}
{{"type":"task_start","ts":3,"name":"handle"}}
{{"type":"task_end","ts":6,"name":"handle"}}
{{"type":"message_send","ts":7,"id":"{path}-m2","size":50}}
{{"type":"end_path_id","ts":7,"path_id":"{path}"}}
"#
    )
}

/// One path on a single thread: x { y }
pub const NESTED_LOG: &str = r#"{"type":"header","hostname":"alpha","processname":"svc","pid":1,"tid":1}
{"type":"set_path_id","ts":0,"path_id":"n1"}
{"type":"task_start","ts":0,"name":"x"}
{"type":"task_start","ts":1,"name":"y"}
{"type":"task_end","ts":2,"name":"y"}
{"type":"task_end","ts":3,"name":"x"}
{"type":"end_path_id","ts":3,"path_id":"n1"}
"#;

/// One path whose only send is never received
pub const UNMATCHED_SEND_LOG: &str = r#"{"type":"header","hostname":"alpha","processname":"svc","pid":1,"tid":1}
{"type":"set_path_id","ts":0,"path_id":"lost"}
{"type":"task_start","ts":0,"name":"x"}
{"type":"message_send","ts":1,"id":"orphan","size":64}
{"type":"task_end","ts":3,"name":"x"}
{"type":"end_path_id","ts":3,"path_id":"lost"}
"#;

pub const NESTED_EXPECTATIONS: &str = r#"
[[recognizer]]
name = "nested"
kind = "validator"

[[recognizer.thread]]
body = [ { op = "task", name = "x", body = [ { op = "task", name = "y" } ] } ]
"#;

pub const RPC_EXPECTATIONS: &str = r#"
[[recognizer]]
name = "rpc"
kind = "validator"
limits = [ { metric = "depth", max = 2 } ]

[[recognizer.thread]]
name = "client"
body = [
  { op = "task", name = "request", body = [ { op = "send" }, { op = "repeat", body = [ { op = "any" } ] }, { op = "recv" } ] },
]

[[recognizer.thread]]
name = "server"
body = [
  { op = "recv" },
  { op = "task", name = "handle" },
  { op = "send" },
]

[[recognizer]]
name = "retried"
kind = "invalidator"
complete = false

[[recognizer.thread]]
body = [ { op = "notice", name = "retry" } ]

[[aggregate]]
name = "no_retries"
expr = { eq = [ { instances = "retried" }, 0 ] }
"#;

pub fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Client and server logs for several requests, one log per side
///
/// Each entry is a path id and whether the client retried.
pub fn write_rpc_logs(dir: &Path, paths: &[(&str, bool)]) -> Vec<PathBuf> {
    let mut client = format!("{}\n", CLIENT_HEADER);
    let mut server = format!("{}\n", SERVER_HEADER);
    for (path, retry) in paths {
        client.push_str(&client_events(path, *retry));
        server.push_str(&server_events(path));
    }
    vec![
        write(dir, "client.jsonl", &client),
        write(dir, "server.jsonl", &server),
    ]
}
