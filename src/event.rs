//! Decoded trace records
//!
//! Every instrumented thread produces one ordered stream of [`Event`]s. The
//! stream opens with a [`ThreadHeader`] naming the host and process, then
//! brackets related work with `set_path_id`/`end_path_id` records.
//!
//! Path and message identifiers are opaque byte blobs. They render for
//! diagnostics with printable runs shown literally and everything else hex
//! encoded inside braces, e.g. `req-{00ff}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Microsecond timestamp as recorded by the emitting host
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_micros(micros: i64) -> Self {
        Timestamp(micros)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    /// Seconds as a float, used for limit checks
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl Sub for Timestamp {
    type Output = i64;

    fn sub(self, rhs: Timestamp) -> i64 {
        self.0.saturating_sub(rhs.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:06}", sign, abs / 1_000_000, abs % 1_000_000)
    }
}

/// Opaque identifier bytes
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "BlobRepr", into = "BlobRepr")]
pub struct Blob(Vec<u8>);

/// Wire form of a blob: plain text when it is valid UTF-8, hex otherwise
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BlobRepr {
    Text(String),
    Hex { hex: String },
}

impl TryFrom<BlobRepr> for Blob {
    type Error = hex::FromHexError;

    fn try_from(repr: BlobRepr) -> Result<Self, Self::Error> {
        match repr {
            BlobRepr::Text(text) => Ok(Blob(text.into_bytes())),
            BlobRepr::Hex { hex } => hex::decode(hex).map(Blob),
        }
    }
}

impl From<Blob> for BlobRepr {
    fn from(blob: Blob) -> Self {
        match String::from_utf8(blob.0) {
            Ok(text) => BlobRepr::Text(text),
            Err(err) => BlobRepr::Hex {
                hex: hex::encode(err.into_bytes()),
            },
        }
    }
}

impl Blob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Blob(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Bytes that are printed literally inside a rendered blob
fn is_display_safe(byte: u8) -> bool {
    (32..127).contains(&byte) && !matches!(byte, b'"' | b'&' | b'\'' | b'<' | b'>' | b'\\')
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.0.as_slice();
        while let Some(&first) = rest.first() {
            let safe = is_display_safe(first);
            let run = rest
                .iter()
                .position(|&b| is_display_safe(b) != safe)
                .unwrap_or(rest.len());
            let (head, tail) = rest.split_at(run);
            if safe {
                // Safe bytes are all ASCII
                f.write_str(&String::from_utf8_lossy(head))?;
            } else {
                write!(f, "{{{}}}", hex::encode(head))?;
            }
            rest = tail;
        }
        Ok(())
    }
}

impl From<&str> for Blob {
    fn from(s: &str) -> Self {
        Blob(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob(bytes)
    }
}

/// Identifies one logical causal flow across processes
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathId(pub Blob);

/// Pairs a message send with its receive
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Blob);

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for PathId {
    fn from(s: &str) -> Self {
        PathId(Blob::from(s))
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(Blob::from(s))
    }
}

/// Cumulative resource counters sampled at an event
///
/// Times are microseconds. Deltas between two samples are computed with `-`,
/// which saturates rather than overflowing on corrupt counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceUsage {
    pub utime: i64,
    pub stime: i64,
    pub minor_faults: i64,
    pub major_faults: i64,
    pub vol_cs: i64,
    pub invol_cs: i64,
}

impl Sub for ResourceUsage {
    type Output = ResourceUsage;

    fn sub(self, rhs: ResourceUsage) -> ResourceUsage {
        ResourceUsage {
            utime: self.utime.saturating_sub(rhs.utime),
            stime: self.stime.saturating_sub(rhs.stime),
            minor_faults: self.minor_faults.saturating_sub(rhs.minor_faults),
            major_faults: self.major_faults.saturating_sub(rhs.major_faults),
            vol_cs: self.vol_cs.saturating_sub(rhs.vol_cs),
            invol_cs: self.invol_cs.saturating_sub(rhs.invol_cs),
        }
    }
}

impl Add for ResourceUsage {
    type Output = ResourceUsage;

    fn add(self, rhs: ResourceUsage) -> ResourceUsage {
        ResourceUsage {
            utime: self.utime.saturating_add(rhs.utime),
            stime: self.stime.saturating_add(rhs.stime),
            minor_faults: self.minor_faults.saturating_add(rhs.minor_faults),
            major_faults: self.major_faults.saturating_add(rhs.major_faults),
            vol_cs: self.vol_cs.saturating_add(rhs.vol_cs),
            invol_cs: self.invol_cs.saturating_add(rhs.invol_cs),
        }
    }
}

impl AddAssign for ResourceUsage {
    fn add_assign(&mut self, rhs: ResourceUsage) {
        *self = *self + rhs;
    }
}

/// Timestamp plus the reporting-only role and level every record carries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub ts: Timestamp,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default)]
    pub level: i32,
}

impl Stamp {
    pub fn at(micros: i64) -> Self {
        Stamp {
            ts: Timestamp(micros),
            ..Stamp::default()
        }
    }
}

/// First record of every thread stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadHeader {
    pub hostname: String,
    #[serde(default)]
    pub processname: String,
    pub pid: u32,
    #[serde(default)]
    pub tid: u32,
    #[serde(default)]
    pub ppid: u32,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub start: Timestamp,
    #[serde(default)]
    pub tz: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMark {
    #[serde(flatten)]
    pub at: Stamp,
    pub name: String,
    #[serde(default)]
    pub resources: ResourceUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMark {
    #[serde(flatten)]
    pub at: Stamp,
    pub path_id: PathId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeMark {
    #[serde(flatten)]
    pub at: Stamp,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMark {
    #[serde(flatten)]
    pub at: Stamp,
    pub id: MessageId,
    pub size: u64,
    #[serde(default)]
    pub resources: ResourceUsage,
}

/// Belief records are carried through decoding but never reconciled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefMark {
    #[serde(flatten)]
    pub at: Stamp,
    pub name: String,
    #[serde(default)]
    pub max_fail_rate: f64,
    #[serde(default)]
    pub succeeded: bool,
}

/// One decoded trace record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Header(ThreadHeader),
    TaskStart(TaskMark),
    TaskEnd(TaskMark),
    SetPathId(PathMark),
    EndPathId(PathMark),
    Notice(NoticeMark),
    MessageSend(MessageMark),
    MessageRecv(MessageMark),
    BeliefFirst(BeliefMark),
    Belief(BeliefMark),
}

impl Event {
    /// Record type name as it appears in trace logs
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Header(_) => "header",
            Event::TaskStart(_) => "task_start",
            Event::TaskEnd(_) => "task_end",
            Event::SetPathId(_) => "set_path_id",
            Event::EndPathId(_) => "end_path_id",
            Event::Notice(_) => "notice",
            Event::MessageSend(_) => "message_send",
            Event::MessageRecv(_) => "message_recv",
            Event::BeliefFirst(_) => "belief_first",
            Event::Belief(_) => "belief",
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Event::Header(h) => h.start,
            Event::TaskStart(m) | Event::TaskEnd(m) => m.at.ts,
            Event::SetPathId(m) | Event::EndPathId(m) => m.at.ts,
            Event::Notice(m) => m.at.ts,
            Event::MessageSend(m) | Event::MessageRecv(m) => m.at.ts,
            Event::BeliefFirst(m) | Event::Belief(m) => m.at.ts,
        }
    }
}
