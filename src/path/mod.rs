//! Reconstructed execution paths
//!
//! A [`Path`] is the finalized, immutable result of reconciliation: one
//! ordered event tree per thread pool, the message table linking sends to
//! receives, the causal root, and the summed tallies used by path-level
//! limits.
//!
//! Paths are assembled by a [`PathBuilder`], which collects completed tasks,
//! notices and messages in any order. [`PathBuilder::done_inserting`] then
//! nests them into interval trees, checks ordering, and discovers the root.

mod finalize;
mod insert;


pub use insert::{classify, Overlap};

use crate::event::{PathId, ResourceUsage, Stamp, Timestamp};
use crate::limit::{Metric, MetricSource};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use thiserror::Error;

/// Index of a thread pool within one reconciliation batch
pub type PoolId = usize;

/// Identity of a thread pool: every OS thread sharing (host, pid)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolInfo {
    pub id: PoolId,
    pub host: String,
    pub program: String,
    pub pid: u32,
}

/// A paired task start and end with its nested children
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathTask {
    pub name: String,
    pub start: Stamp,
    pub end: Timestamp,
    /// `end - start` of the cumulative counters
    pub resources: ResourceUsage,
    pub children: Vec<PathEvent>,
}

impl PathTask {
    pub fn real_time(&self) -> i64 {
        self.end - self.start.ts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathNotice {
    pub name: String,
    pub at: Stamp,
}

/// A send or receive point in a thread's tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEndpoint {
    /// Index into [`Path::messages`]
    pub message: usize,
    pub at: Stamp,
}

/// Node of a thread pool's event tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathEvent {
    Task(PathTask),
    Notice(PathNotice),
    Send(MessageEndpoint),
    Recv(MessageEndpoint),
}

impl PathEvent {
    pub fn start(&self) -> Timestamp {
        match self {
            PathEvent::Task(task) => task.start.ts,
            PathEvent::Notice(notice) => notice.at.ts,
            PathEvent::Send(ep) | PathEvent::Recv(ep) => ep.at.ts,
        }
    }

    pub fn end(&self) -> Timestamp {
        match self {
            PathEvent::Task(task) => task.end,
            other => other.start(),
        }
    }

    pub fn is_task(&self) -> bool {
        matches!(self, PathEvent::Task(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PathEvent::Task(_) => "task",
            PathEvent::Notice(_) => "notice",
            PathEvent::Send(_) => "send",
            PathEvent::Recv(_) => "recv",
        }
    }

    /// Short human label used in diagnostics
    pub fn label(&self) -> String {
        match self {
            PathEvent::Task(task) => format!("task {:?} [{}, {}]", task.name, task.start.ts, task.end),
            PathEvent::Notice(notice) => format!("notice {:?} @{}", notice.name, notice.at.ts),
            PathEvent::Send(ep) => format!("send #{} @{}", ep.message, ep.at.ts),
            PathEvent::Recv(ep) => format!("recv #{} @{}", ep.message, ep.at.ts),
        }
    }
}

/// One side of a reconciled message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub pool: PoolId,
    pub at: Stamp,
    pub resources: ResourceUsage,
}

/// A reconciled message; `recv` is `None` for persisted one-sided sends
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: crate::event::MessageId,
    pub size: u64,
    pub send: Endpoint,
    pub recv: Option<Endpoint>,
    /// Message whose receive most recently preceded this send on the same pool
    pub predecessor: Option<usize>,
}

impl Message {
    /// Receive time minus send time, when both sides were observed
    pub fn latency(&self) -> Option<i64> {
        self.recv.as_ref().map(|recv| recv.at.ts - self.send.at.ts)
    }
}

/// Events of every OS thread sharing one (host, pid)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadPool {
    pub info: PoolInfo,
    pub events: Vec<PathEvent>,
}

impl ThreadPool {
    pub fn id(&self) -> PoolId {
        self.info.id
    }

    /// Depth-first walk of the tree in timestamp order
    pub fn walk(&self) -> impl Iterator<Item = &PathEvent> {
        Walk {
            stack: vec![self.events.iter()],
        }
    }

    pub fn has_message(&self) -> bool {
        self.walk()
            .any(|event| matches!(event, PathEvent::Send(_) | PathEvent::Recv(_)))
    }

    /// Tally restricted to this pool, for thread-level limits
    pub fn tally(&self, messages: &[Message]) -> PathTally {
        let mut tally = PathTally {
            threads: 1,
            hosts: 1,
            ..PathTally::default()
        };
        if let (Some(first), Some(last)) = (self.events.first(), self.events.last()) {
            tally.real_time = last.end() - first.start();
        }
        for event in &self.events {
            if let PathEvent::Task(task) = event {
                tally.resources += task.resources;
            }
        }
        for event in self.walk() {
            if let PathEvent::Send(ep) = event {
                if let Some(message) = messages.get(ep.message) {
                    tally.size = tally.size.saturating_add(message.size);
                    tally.messages += 1;
                }
            }
        }
        tally
    }
}

struct Walk<'a> {
    stack: Vec<std::slice::Iter<'a, PathEvent>>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a PathEvent;

    fn next(&mut self) -> Option<&'a PathEvent> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(event) => {
                    if let PathEvent::Task(task) = event {
                        self.stack.push(task.children.iter());
                    }
                    return Some(event);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// Summed quantities over a path (or a single pool)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PathTally {
    /// Microseconds between first and last event of the root pool
    pub real_time: i64,
    /// Sum over top-level tasks only, so nested work is not counted twice
    pub resources: ResourceUsage,
    pub size: u64,
    pub messages: u64,
    /// Summed receive minus send time, microseconds
    pub latency: i64,
    pub depth: u64,
    pub threads: u64,
    pub hosts: u64,
}

fn secs(micros: i64) -> f64 {
    micros as f64 / 1_000_000.0
}

fn busy_fraction(resources: &ResourceUsage, real_time: i64) -> f64 {
    if real_time <= 0 {
        0.0
    } else {
        resources.utime.saturating_add(resources.stime) as f64 / real_time as f64
    }
}

fn cpu_metric(metric: Metric, resources: &ResourceUsage, real_time: i64) -> Option<f64> {
    let value = match metric {
        Metric::RealTime => secs(real_time),
        Metric::UserTime => secs(resources.utime),
        Metric::SystemTime => secs(resources.stime),
        Metric::CpuTime => secs(resources.utime.saturating_add(resources.stime)),
        Metric::BusyFraction => busy_fraction(resources, real_time),
        Metric::MajorFaults => resources.major_faults as f64,
        Metric::MinorFaults => resources.minor_faults as f64,
        Metric::VoluntaryCs => resources.vol_cs as f64,
        Metric::InvoluntaryCs => resources.invol_cs as f64,
        _ => return None,
    };
    Some(value)
}

impl MetricSource for PathTask {
    fn metric(&self, metric: Metric) -> Option<f64> {
        cpu_metric(metric, &self.resources, self.real_time())
    }
}

impl MetricSource for Message {
    fn metric(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Size => Some(self.size as f64),
            Metric::Latency => self.latency().map(secs),
            _ => None,
        }
    }
}

impl MetricSource for PathTally {
    fn metric(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Latency => Some(secs(self.latency)),
            Metric::Size => Some(self.size as f64),
            Metric::Messages => Some(self.messages as f64),
            Metric::Depth => Some(self.depth as f64),
            Metric::Threads => Some(self.threads as f64),
            Metric::Hosts => Some(self.hosts as f64),
            other => cpu_metric(other, &self.resources, self.real_time),
        }
    }
}

/// Why a path cannot be matched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Malformed {
    #[error("path has no events")]
    Empty,
    #[error("thread pool {pool} has no message events; causal graph is disconnected")]
    Disconnected { pool: PoolId },
    #[error("no thread pool begins with an unpreceded send")]
    NoRoot,
    #[error("ambiguous causal root: pools {candidates:?} each begin with a send")]
    AmbiguousRoot { candidates: Vec<PoolId> },
    #[error("message predecessors form a cycle")]
    CausalCycle,
    #[error("reconciliation error: {detail}")]
    Reconcile { detail: String },
}

/// Ordering failure inside one pool's tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderViolation {
    #[error("{incoming} overlaps {existing} ({relation:?})")]
    Overlap {
        existing: String,
        incoming: String,
        relation: Overlap,
    },
    #[error("{incoming} falls within non-task {existing}")]
    WithinNonTask { existing: String, incoming: String },
    #[error("{event} ends before it starts")]
    Reversed { event: String },
    #[error("{event} starts before previous sibling {previous} ends")]
    OutOfOrder { previous: String, event: String },
    #[error("{event} escapes its parent task {parent}")]
    Escapes { parent: String, event: String },
}

/// Structural corruption that cannot be recovered from
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("path {path}, pool {pool}: {violation}")]
pub struct InvariantViolation {
    pub path: PathId,
    pub pool: PoolId,
    pub violation: OrderViolation,
}

/// A finalized execution path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Path {
    pub id: PathId,
    pub pools: BTreeMap<PoolId, ThreadPool>,
    pub messages: Vec<Message>,
    pub root: Option<PoolId>,
    pub ts_start: Timestamp,
    pub ts_end: Timestamp,
    pub tally: PathTally,
    pub malformed: Option<Malformed>,
}

impl Path {
    /// A unique root exists and nothing marked the path malformed
    pub fn valid(&self) -> bool {
        self.root.is_some() && self.malformed.is_none()
    }

    pub fn root_pool(&self) -> Option<&ThreadPool> {
        self.root.and_then(|id| self.pools.get(&id))
    }

    /// Message referenced by an endpoint
    pub fn message(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn event_count(&self) -> usize {
        self.pools.values().map(|pool| pool.walk().count()).sum()
    }

    /// Indented dump of every pool's event tree, then the message table
    pub fn write_tree(&self, out: &mut dyn Write) -> io::Result<()> {
        match &self.malformed {
            Some(reason) => writeln!(out, "path {} (malformed: {})", self.id, reason)?,
            None => writeln!(out, "path {}", self.id)?,
        }
        for pool in self.pools.values() {
            let root = if self.root == Some(pool.id()) { " [root]" } else { "" };
            writeln!(
                out,
                "  pool {} {}/{} pid {}{}",
                pool.id(),
                pool.info.host,
                pool.info.program,
                pool.info.pid,
                root
            )?;
            write_events(out, &pool.events, 2)?;
        }
        for (index, message) in self.messages.iter().enumerate() {
            let recv = message
                .recv
                .as_ref()
                .map(|recv| format!("pool {}", recv.pool))
                .unwrap_or_else(|| "(unreceived)".to_string());
            writeln!(
                out,
                "  message #{} {} ({} bytes): pool {} -> {}",
                index, message.id, message.size, message.send.pool, recv
            )?;
        }
        Ok(())
    }
}

fn write_events(out: &mut dyn Write, events: &[PathEvent], depth: usize) -> io::Result<()> {
    for event in events {
        writeln!(out, "{:indent$}{}", "", event.label(), indent = depth * 2)?;
        if let PathEvent::Task(task) = event {
            write_events(out, &task.children, depth + 1)?;
        }
    }
    Ok(())
}

/// Collects reconciled pieces of one path before finalization
#[derive(Debug, Clone)]
pub struct PathBuilder {
    id: PathId,
    pools: BTreeMap<PoolId, PoolInfo>,
    tasks: Vec<(PoolId, PathTask)>,
    notices: Vec<(PoolId, PathNotice)>,
    messages: Vec<Message>,
    tainted: Option<Malformed>,
}

impl PathBuilder {
    pub fn new(id: PathId) -> Self {
        PathBuilder {
            id,
            pools: BTreeMap::new(),
            tasks: Vec::new(),
            notices: Vec::new(),
            messages: Vec::new(),
            tainted: None,
        }
    }

    pub fn id(&self) -> &PathId {
        &self.id
    }

    fn touch_pool(&mut self, pool: &PoolInfo) {
        self.pools
            .entry(pool.id)
            .or_insert_with(|| pool.clone());
    }

    /// Add a completed task; children are attached during finalization
    pub fn add_task(&mut self, pool: &PoolInfo, task: PathTask) {
        self.touch_pool(pool);
        self.tasks.push((pool.id, task));
    }

    pub fn add_notice(&mut self, pool: &PoolInfo, notice: PathNotice) {
        self.touch_pool(pool);
        self.notices.push((pool.id, notice));
    }

    /// Add a message and register the pools of both endpoints
    pub fn add_message(&mut self, send_pool: &PoolInfo, recv_pool: Option<&PoolInfo>, message: Message) {
        self.touch_pool(send_pool);
        if let Some(pool) = recv_pool {
            self.touch_pool(pool);
        }
        self.messages.push(message);
    }

    /// Record a reconciliation error against this path; the first reason is kept
    pub fn taint(&mut self, reason: Malformed) {
        if self.tainted.is_none() {
            self.tainted = Some(reason);
        }
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted.is_some()
    }

    /// Nest everything into per-pool trees and discover the causal root
    ///
    /// # Returns
    ///
    /// The finalized path. Malformed paths are returned with
    /// [`Path::malformed`] set; only ordering corruption is an error.
    pub fn done_inserting(self) -> Result<Path, InvariantViolation> {
        finalize::finish(self)
    }
}
