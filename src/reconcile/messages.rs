//! Cross-stream message pairing

use crate::event::{MessageId, MessageMark, PathId};
use crate::path::PoolId;
use fnv::FnvHashMap;
use serde::Serialize;

/// Which side of a message an endpoint is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Send,
    Recv,
}

/// A send or receive waiting for its counterpart
#[derive(Debug, Clone)]
pub(super) struct PendingEndpoint {
    pub path: PathId,
    pub pool: PoolId,
    pub mark: MessageMark,
}

pub(super) enum Arrival {
    /// Counterpart was already waiting
    Paired {
        send: PendingEndpoint,
        recv: PendingEndpoint,
    },
    /// Stored; `replaced` is an earlier endpoint with the same id and side
    Pending { replaced: Option<PendingEndpoint> },
}

/// Unmatched sends and receives, keyed by message id
#[derive(Default)]
pub(super) struct MessageTable {
    sends: FnvHashMap<MessageId, PendingEndpoint>,
    recvs: FnvHashMap<MessageId, PendingEndpoint>,
}

impl MessageTable {
    pub fn arrive(&mut self, side: Side, endpoint: PendingEndpoint) -> Arrival {
        let (waiting, opposite) = match side {
            Side::Send => (&mut self.sends, &mut self.recvs),
            Side::Recv => (&mut self.recvs, &mut self.sends),
        };
        if let Some(other) = opposite.remove(&endpoint.mark.id) {
            return match side {
                Side::Send => Arrival::Paired {
                    send: endpoint,
                    recv: other,
                },
                Side::Recv => Arrival::Paired {
                    send: other,
                    recv: endpoint,
                },
            };
        }
        let replaced = waiting.insert(endpoint.mark.id.clone(), endpoint);
        Arrival::Pending { replaced }
    }

    /// Everything still unpaired, sends then receives, each in id order
    pub fn drain(self) -> (Vec<PendingEndpoint>, Vec<PendingEndpoint>) {
        let sorted = |map: FnvHashMap<MessageId, PendingEndpoint>| {
            let mut list: Vec<_> = map.into_values().collect();
            list.sort_by(|a, b| a.mark.id.cmp(&b.mark.id));
            list
        };
        (sorted(self.sends), sorted(self.recvs))
    }

    #[cfg(test)]
    pub fn pending(&self) -> (usize, usize) {
        (self.sends.len(), self.recvs.len())
    }
}
