//! Stream reconciliation
//!
//! Turns per-thread event streams into finalized [`Path`]s. Each stream is
//! read once, in order. Task starts and ends are paired per (path, name)
//! inside the stream. Message sends and receives are paired across streams
//! by message id, in whichever order they show up. Anything left unpaired
//! is resolved or reported by [`Reconciler::finish`].
//!
//! # Example
//!
//! ```
//! use causeway::config::ReconcileConfig;
//! use causeway::reconcile::Reconciler;
//! use causeway::trace_log::TraceLog;
//!
//! let log = TraceLog::from_jsonl_str("a", r#"
//! {"type":"header","hostname":"alpha","pid":1}
//! {"type":"set_path_id","ts":0,"path_id":"p1"}
//! {"type":"task_start","ts":0,"name":"x"}
//! {"type":"task_end","ts":3,"name":"x"}
//! "#).unwrap();
//!
//! let mut reconciler = Reconciler::new(ReconcileConfig::default());
//! reconciler.add_log(&log);
//! let result = reconciler.finish().unwrap();
//! assert_eq!(result.paths.len(), 1);
//! assert!(result.paths[0].valid());
//! ```

mod messages;
mod tasks;


pub use messages::Side;

use crate::config::ReconcileConfig;
use crate::event::{Event, MessageId, PathId, TaskMark, ThreadHeader, Timestamp};
use crate::path::{
    Endpoint, InvariantViolation, Malformed, Message, Path, PathBuilder, PathNotice, PoolId, PoolInfo,
};
use crate::trace_log::TraceLog;
use fnv::FnvHashMap;
use messages::{Arrival, MessageTable, PendingEndpoint};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tasks::{TaskSide, UnpairedMark};
use thiserror::Error;
use tracing::{debug, warn};

/// A reportable problem found while reconciling streams
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ReconcileError {
    #[error("{log}: stream has no header")]
    MissingHeader { log: String, paths: Vec<PathId> },
    #[error("{log}: redundant header")]
    RedundantHeader { log: String, path: Option<PathId> },
    #[error("{log}: {kind} outside any path")]
    OutsidePath { log: String, kind: String },
    #[error("path {path}: task start {name:?} at {ts} never ended")]
    UnpairedStart {
        path: PathId,
        name: String,
        ts: Timestamp,
    },
    #[error("path {path}: task end {name:?} at {ts} has no start")]
    UnpairedEnd {
        path: PathId,
        name: String,
        ts: Timestamp,
    },
    #[error("message {id}: sent on path {send_path} but received on path {recv_path}")]
    PathMismatch {
        id: MessageId,
        send_path: PathId,
        recv_path: PathId,
    },
    #[error("message {id} on path {path}: sent {send_size} bytes, received {recv_size}")]
    SizeMismatch {
        id: MessageId,
        path: PathId,
        send_size: u64,
        recv_size: u64,
    },
    #[error("path {path}: reused message id {id} ({side:?}), first seen on path {previous_path}")]
    ReusedMessageId {
        id: MessageId,
        path: PathId,
        previous_path: PathId,
        side: Side,
    },
    #[error("path {path}: send of message {id} was never received")]
    UnmatchedSend { id: MessageId, path: PathId },
    #[error("path {path}: receive of message {id} was never sent")]
    UnmatchedRecv { id: MessageId, path: PathId },
    #[error("path {path}: {reason}")]
    Malformed { path: PathId, reason: Malformed },
}

impl ReconcileError {
    /// Paths this error excludes from matching
    pub fn tainted_paths(&self) -> Vec<&PathId> {
        match self {
            ReconcileError::MissingHeader { paths, .. } => paths.iter().collect(),
            ReconcileError::RedundantHeader { path, .. } => path.iter().collect(),
            ReconcileError::UnpairedStart { path, .. }
            | ReconcileError::UnpairedEnd { path, .. }
            | ReconcileError::SizeMismatch { path, .. } => vec![path],
            ReconcileError::ReusedMessageId {
                path,
                previous_path,
                ..
            } => {
                if path == previous_path {
                    vec![path]
                } else {
                    vec![path, previous_path]
                }
            }
            ReconcileError::PathMismatch {
                send_path,
                recv_path,
                ..
            } => vec![send_path, recv_path],
            // Counted but not disqualifying; malformed paths are already marked
            ReconcileError::OutsidePath { .. }
            | ReconcileError::UnmatchedSend { .. }
            | ReconcileError::UnmatchedRecv { .. }
            | ReconcileError::Malformed { .. } => Vec::new(),
        }
    }
}

/// A message side still unpaired at the end of the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedMessage {
    pub id: MessageId,
    pub path: PathId,
    pub pool: PoolId,
    pub ts: Timestamp,
    pub size: u64,
}

/// Everything produced by one reconciliation batch
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Finalized paths in path-id order, malformed ones included
    pub paths: Vec<Path>,
    pub errors: Vec<ReconcileError>,
    pub unmatched_sends: Vec<UnmatchedMessage>,
    pub unmatched_recvs: Vec<UnmatchedMessage>,
    pub pools: Vec<PoolInfo>,
}

impl Reconciliation {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn path(&self, id: &PathId) -> Option<&Path> {
        self.paths.iter().find(|path| &path.id == id)
    }

    pub fn valid_paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().filter(|path| path.valid())
    }
}

/// Per-stream state while one log is being read
#[derive(Default)]
struct StreamState {
    pool: Option<PoolId>,
    current: Option<PathId>,
    open: BTreeMap<(PathId, String), Vec<TaskMark>>,
    headerless_paths: BTreeSet<PathId>,
}

/// Incremental reconciliation context for one batch of streams
pub struct Reconciler {
    config: ReconcileConfig,
    pools: Vec<PoolInfo>,
    pool_index: FnvHashMap<(String, u32), PoolId>,
    builders: BTreeMap<PathId, PathBuilder>,
    messages: MessageTable,
    unpaired: BTreeMap<String, Vec<UnpairedMark>>,
    errors: Vec<ReconcileError>,
}

fn builder_for<'a>(
    builders: &'a mut BTreeMap<PathId, PathBuilder>,
    id: &PathId,
) -> &'a mut PathBuilder {
    builders
        .entry(id.clone())
        .or_insert_with(|| PathBuilder::new(id.clone()))
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Reconciler {
            config,
            pools: Vec::new(),
            pool_index: FnvHashMap::default(),
            builders: BTreeMap::new(),
            messages: MessageTable::default(),
            unpaired: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// Errors recorded so far
    pub fn errors(&self) -> &[ReconcileError] {
        &self.errors
    }

    fn record(&mut self, error: ReconcileError) {
        warn!("{}", error);
        for path in error.tainted_paths() {
            builder_for(&mut self.builders, path).taint(Malformed::Reconcile {
                detail: error.to_string(),
            });
        }
        self.errors.push(error);
    }

    /// Pools are merged by (host, pid) across every stream in the batch
    fn pool_for(&mut self, header: &ThreadHeader) -> PoolId {
        let key = (header.hostname.clone(), header.pid);
        if let Some(&id) = self.pool_index.get(&key) {
            return id;
        }
        let id = self.pools.len();
        self.pools.push(PoolInfo {
            id,
            host: header.hostname.clone(),
            program: header.processname.clone(),
            pid: header.pid,
        });
        self.pool_index.insert(key, id);
        debug!("pool {} is {}:{}", id, header.hostname, header.pid);
        id
    }

    /// Consume one thread's event stream
    pub fn add_log(&mut self, log: &TraceLog) {
        let mut stream = StreamState::default();
        for event in &log.events {
            self.apply(&log.source, &mut stream, event);
        }
        self.end_stream(&log.source, stream);
    }

    fn apply(&mut self, log: &str, stream: &mut StreamState, event: &Event) {
        match event {
            Event::Header(header) => {
                if stream.pool.is_some() {
                    self.record(ReconcileError::RedundantHeader {
                        log: log.to_string(),
                        path: stream.current.clone(),
                    });
                } else {
                    stream.pool = Some(self.pool_for(header));
                }
                return;
            }
            Event::BeliefFirst(mark) | Event::Belief(mark) => {
                debug!("{}: ignoring belief record {:?}", log, mark.name);
                return;
            }
            _ => {}
        }

        let Some(pool) = stream.pool else {
            if let Event::SetPathId(mark) = event {
                stream.headerless_paths.insert(mark.path_id.clone());
            }
            return;
        };

        match event {
            Event::SetPathId(mark) => {
                builder_for(&mut self.builders, &mark.path_id);
                stream.current = Some(mark.path_id.clone());
            }
            Event::EndPathId(_) => stream.current = None,
            _ => match stream.current.clone() {
                Some(path) => self.apply_in_path(stream, pool, path, event),
                None => self.record(ReconcileError::OutsidePath {
                    log: log.to_string(),
                    kind: event.kind().to_string(),
                }),
            },
        }
    }

    fn apply_in_path(&mut self, stream: &mut StreamState, pool: PoolId, path: PathId, event: &Event) {
        match event {
            Event::TaskStart(mark) => {
                stream
                    .open
                    .entry((path, mark.name.clone()))
                    .or_default()
                    .push(mark.clone());
            }
            Event::TaskEnd(mark) => {
                let start = stream
                    .open
                    .get_mut(&(path.clone(), mark.name.clone()))
                    .and_then(Vec::pop);
                match start {
                    Some(start) => {
                        let task = tasks::paired_task(&start, mark);
                        builder_for(&mut self.builders, &path).add_task(&self.pools[pool], task);
                    }
                    None => self.defer(pool, path, TaskSide::End, mark.clone()),
                }
            }
            Event::Notice(mark) => {
                let notice = PathNotice {
                    name: mark.name.clone(),
                    at: mark.at.clone(),
                };
                builder_for(&mut self.builders, &path).add_notice(&self.pools[pool], notice);
            }
            Event::MessageSend(mark) | Event::MessageRecv(mark) => {
                let side = if matches!(event, Event::MessageSend(_)) {
                    Side::Send
                } else {
                    Side::Recv
                };
                let endpoint = PendingEndpoint {
                    path,
                    pool,
                    mark: mark.clone(),
                };
                self.arrive(side, endpoint);
            }
            // Stream control records are handled by `apply`
            Event::Header(_)
            | Event::SetPathId(_)
            | Event::EndPathId(_)
            | Event::BeliefFirst(_)
            | Event::Belief(_) => {}
        }
    }

    fn defer(&mut self, pool: PoolId, path: PathId, side: TaskSide, mark: TaskMark) {
        let host = self.pools[pool].host.clone();
        self.unpaired.entry(host).or_default().push(UnpairedMark {
            path,
            pool,
            side,
            mark,
        });
    }

    fn end_stream(&mut self, log: &str, stream: StreamState) {
        let Some(pool) = stream.pool else {
            self.record(ReconcileError::MissingHeader {
                log: log.to_string(),
                paths: stream.headerless_paths.into_iter().collect(),
            });
            return;
        };
        for ((path, _), marks) in stream.open {
            for mark in marks {
                self.defer(pool, path.clone(), TaskSide::Start, mark);
            }
        }
    }

    fn arrive(&mut self, side: Side, endpoint: PendingEndpoint) {
        let path = endpoint.path.clone();
        match self.messages.arrive(side, endpoint) {
            Arrival::Paired { send, recv } => self.settle(send, recv),
            Arrival::Pending { replaced: None } => {}
            Arrival::Pending {
                replaced: Some(old),
            } => self.record(ReconcileError::ReusedMessageId {
                id: old.mark.id,
                path,
                previous_path: old.path,
                side,
            }),
        }
    }

    /// Validate a send/recv pair and hand the message to its path
    fn settle(&mut self, send: PendingEndpoint, recv: PendingEndpoint) {
        if send.path != recv.path {
            self.record(ReconcileError::PathMismatch {
                id: send.mark.id,
                send_path: send.path,
                recv_path: recv.path,
            });
            return;
        }
        if send.mark.size != recv.mark.size {
            self.record(ReconcileError::SizeMismatch {
                id: send.mark.id,
                path: send.path,
                send_size: send.mark.size,
                recv_size: recv.mark.size,
            });
            return;
        }
        let message = Message {
            id: send.mark.id.clone(),
            size: send.mark.size,
            send: Endpoint {
                pool: send.pool,
                at: send.mark.at.clone(),
                resources: send.mark.resources,
            },
            recv: Some(Endpoint {
                pool: recv.pool,
                at: recv.mark.at.clone(),
                resources: recv.mark.resources,
            }),
            predecessor: None,
        };
        builder_for(&mut self.builders, &send.path).add_message(
            &self.pools[send.pool],
            Some(&self.pools[recv.pool]),
            message,
        );
    }

    /// Resolve deferred starts/ends across streams, settle leftovers, finalize
    pub fn finish(mut self) -> Result<Reconciliation, InvariantViolation> {
        let unpaired = std::mem::take(&mut self.unpaired);
        for (host, marks) in unpaired {
            let resolution = tasks::resolve(marks);
            debug!(
                "host {}: {} cross-stream tasks, {} leftovers",
                host,
                resolution.tasks.len(),
                resolution.leftovers.len()
            );
            for (path, pool, task) in resolution.tasks {
                builder_for(&mut self.builders, &path).add_task(&self.pools[pool], task);
            }
            for left in resolution.leftovers {
                let UnpairedMark {
                    path, side, mark, ..
                } = left;
                let error = match side {
                    TaskSide::Start => ReconcileError::UnpairedStart {
                        path,
                        name: mark.name,
                        ts: mark.at.ts,
                    },
                    TaskSide::End => ReconcileError::UnpairedEnd {
                        path,
                        name: mark.name,
                        ts: mark.at.ts,
                    },
                };
                self.record(error);
            }
        }

        let (sends, recvs) = std::mem::take(&mut self.messages).drain();
        let mut unmatched_sends = Vec::new();
        for send in sends {
            unmatched_sends.push(unmatched(&send));
            if self.config.save_unmatched_sends {
                let message = Message {
                    id: send.mark.id.clone(),
                    size: send.mark.size,
                    send: Endpoint {
                        pool: send.pool,
                        at: send.mark.at.clone(),
                        resources: send.mark.resources,
                    },
                    recv: None,
                    predecessor: None,
                };
                builder_for(&mut self.builders, &send.path).add_message(
                    &self.pools[send.pool],
                    None,
                    message,
                );
            } else {
                self.record(ReconcileError::UnmatchedSend {
                    id: send.mark.id,
                    path: send.path,
                });
            }
        }
        let mut unmatched_recvs = Vec::new();
        for recv in recvs {
            unmatched_recvs.push(unmatched(&recv));
            self.record(ReconcileError::UnmatchedRecv {
                id: recv.mark.id,
                path: recv.path,
            });
        }

        let builders = std::mem::take(&mut self.builders);
        let mut paths = Vec::with_capacity(builders.len());
        for builder in builders.into_values() {
            let tainted = builder.is_tainted();
            let path = builder.done_inserting()?;
            if !tainted {
                if let Some(reason) = &path.malformed {
                    self.record(ReconcileError::Malformed {
                        path: path.id.clone(),
                        reason: reason.clone(),
                    });
                }
            }
            paths.push(path);
        }

        Ok(Reconciliation {
            paths,
            errors: self.errors,
            unmatched_sends,
            unmatched_recvs,
            pools: self.pools,
        })
    }
}

fn unmatched(endpoint: &PendingEndpoint) -> UnmatchedMessage {
    UnmatchedMessage {
        id: endpoint.mark.id.clone(),
        path: endpoint.path.clone(),
        pool: endpoint.pool,
        ts: endpoint.mark.at.ts,
        size: endpoint.mark.size,
    }
}

/// Reconcile a batch of logs in order
pub fn reconcile(
    logs: &[TraceLog],
    config: &ReconcileConfig,
) -> Result<Reconciliation, InvariantViolation> {
    let mut reconciler = Reconciler::new(config.clone());
    for log in logs {
        reconciler.add_log(log);
    }
    reconciler.finish()
}
