//! Path finalization: tree building, root discovery and tallies

use super::insert::{check_order, insert_point, insert_task};
use super::{
    InvariantViolation, Malformed, MessageEndpoint, Path, PathBuilder, PathEvent, PathTally, PoolId,
    ThreadPool,
};
use crate::event::Timestamp;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub(super) fn finish(builder: PathBuilder) -> Result<Path, InvariantViolation> {
    let PathBuilder {
        id,
        pools: infos,
        mut tasks,
        notices,
        mut messages,
        tainted,
    } = builder;

    let mut pools: BTreeMap<PoolId, ThreadPool> = infos
        .into_iter()
        .map(|(pool_id, info)| {
            (
                pool_id,
                ThreadPool {
                    info,
                    events: Vec::new(),
                },
            )
        })
        .collect();

    let violation = |pool: PoolId, kind| InvariantViolation {
        path: id.clone(),
        pool,
        violation: kind,
    };

    // Parents first: earlier start, then longer interval
    tasks.sort_by(|(pa, a), (pb, b)| {
        pa.cmp(pb)
            .then(a.start.ts.cmp(&b.start.ts))
            .then(b.end.cmp(&a.end))
    });
    for (pool_id, task) in tasks {
        if let Some(pool) = pools.get_mut(&pool_id) {
            insert_task(&mut pool.events, task).map_err(|v| violation(pool_id, v))?;
        }
    }

    for (pool_id, notice) in notices {
        if let Some(pool) = pools.get_mut(&pool_id) {
            insert_point(&mut pool.events, PathEvent::Notice(notice));
        }
    }

    messages.sort_by(|a, b| a.send.at.ts.cmp(&b.send.at.ts).then(a.id.cmp(&b.id)));
    for (index, message) in messages.iter().enumerate() {
        if let Some(pool) = pools.get_mut(&message.send.pool) {
            insert_point(
                &mut pool.events,
                PathEvent::Send(MessageEndpoint {
                    message: index,
                    at: message.send.at.clone(),
                }),
            );
        }
        if let Some(recv) = &message.recv {
            if let Some(pool) = pools.get_mut(&recv.pool) {
                insert_point(
                    &mut pool.events,
                    PathEvent::Recv(MessageEndpoint {
                        message: index,
                        at: recv.at.clone(),
                    }),
                );
            }
        }
    }

    for (pool_id, pool) in &pools {
        check_order(&pool.events, None).map_err(|v| violation(*pool_id, v))?;
    }

    let mut path = Path {
        id,
        pools,
        messages,
        root: None,
        ts_start: Timestamp::default(),
        ts_end: Timestamp::default(),
        tally: PathTally::default(),
        malformed: None,
    };

    let discovered = discover_root(&mut path);
    let depth = causal_depth(&path);
    path.tally = tally(&path, depth.as_ref().copied().unwrap_or(0));
    path.malformed = tainted.or(discovered.err()).or(depth.err());
    if let Some(reason) = &path.malformed {
        debug!("path {} is malformed: {}", path.id, reason);
    }
    Ok(path)
}

/// Link predecessors and choose the root pool
fn discover_root(path: &mut Path) -> Result<(), Malformed> {
    if path.pools.is_empty() || path.pools.values().all(|pool| pool.events.is_empty()) {
        return Err(Malformed::Empty);
    }

    let mut predecessors: Vec<(usize, usize)> = Vec::new();
    let mut candidates = Vec::new();
    for pool in path.pools.values() {
        let mut last_recv: Option<usize> = None;
        let mut first_message: Option<&PathEvent> = None;
        for event in pool.walk() {
            match event {
                PathEvent::Send(ep) => {
                    first_message.get_or_insert(event);
                    if let Some(recv) = last_recv {
                        predecessors.push((ep.message, recv));
                    }
                }
                PathEvent::Recv(ep) => {
                    first_message.get_or_insert(event);
                    last_recv = Some(ep.message);
                }
                _ => {}
            }
        }
        if matches!(first_message, Some(PathEvent::Send(_))) {
            candidates.push(pool.id());
        }
    }
    for (send, recv) in predecessors {
        if let Some(message) = path.messages.get_mut(send) {
            message.predecessor = Some(recv);
        }
    }

    if path.pools.len() > 1 {
        if let Some(pool) = path.pools.values().find(|pool| !pool.has_message()) {
            return Err(Malformed::Disconnected { pool: pool.id() });
        }
    }

    let root = if path.pools.len() == 1 {
        path.pools.keys().next().copied()
    } else {
        match candidates.as_slice() {
            [] => return Err(Malformed::NoRoot),
            [only] => Some(*only),
            _ => return Err(Malformed::AmbiguousRoot { candidates }),
        }
    };
    path.root = root;
    let span = path
        .root_pool()
        .and_then(|pool| Some((pool.events.first()?.start(), pool.events.last()?.end())));
    if let Some((start, end)) = span {
        path.ts_start = start;
        path.ts_end = end;
    }
    Ok(())
}

/// Longest recv → send → predecessor-recv chain, counted in messages
fn causal_depth(path: &Path) -> Result<u64, Malformed> {
    let messages = &path.messages;
    let mut depth: Vec<Option<u64>> = vec![None; messages.len()];
    let mut max = 0;
    for start in 0..messages.len() {
        if messages[start].recv.is_none() {
            continue;
        }
        let mut chain = Vec::new();
        let mut cursor = Some(start);
        let mut base = 0;
        while let Some(index) = cursor {
            if let Some(known) = depth[index] {
                base = known;
                break;
            }
            if chain.len() == messages.len() {
                return Err(Malformed::CausalCycle);
            }
            chain.push(index);
            cursor = messages[index].predecessor;
        }
        for &index in chain.iter().rev() {
            base += 1;
            depth[index] = Some(base);
        }
        max = max.max(base);
    }
    Ok(max)
}

fn tally(path: &Path, depth: u64) -> PathTally {
    let mut tally = PathTally {
        real_time: path.ts_end - path.ts_start,
        depth,
        threads: path.pools.len() as u64,
        ..PathTally::default()
    };
    let hosts: BTreeSet<&str> = path
        .pools
        .values()
        .map(|pool| pool.info.host.as_str())
        .collect();
    tally.hosts = hosts.len() as u64;
    for pool in path.pools.values() {
        for event in &pool.events {
            if let PathEvent::Task(task) = event {
                tally.resources += task.resources;
            }
        }
    }
    for message in &path.messages {
        tally.size = tally.size.saturating_add(message.size);
        tally.messages += 1;
        if let Some(latency) = message.latency() {
            tally.latency = tally.latency.saturating_add(latency);
        }
    }
    tally
}
