//! Task pairing helpers and cross-stream resolution of unpaired marks

use crate::event::{PathId, TaskMark};
use crate::path::{PathTask, PoolId};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum TaskSide {
    Start,
    End,
}

/// A start or end that found no partner inside its own stream
#[derive(Debug, Clone)]
pub(super) struct UnpairedMark {
    pub path: PathId,
    pub pool: PoolId,
    pub side: TaskSide,
    pub mark: TaskMark,
}

pub(super) struct Resolution {
    /// Tasks paired across streams, owned by the start's pool
    pub tasks: Vec<(PathId, PoolId, PathTask)>,
    pub leftovers: Vec<UnpairedMark>,
}

pub(super) fn paired_task(start: &TaskMark, end: &TaskMark) -> PathTask {
    PathTask {
        name: start.name.clone(),
        start: start.at.clone(),
        end: end.at.ts,
        resources: end.resources - start.resources,
        children: Vec::new(),
    }
}

/// Replay one host's unpaired marks in time order
pub(super) fn resolve(mut marks: Vec<UnpairedMark>) -> Resolution {
    marks.sort_by(|a, b| a.mark.at.ts.cmp(&b.mark.at.ts).then(a.side.cmp(&b.side)));

    let mut open: BTreeMap<(PathId, String), Vec<UnpairedMark>> = BTreeMap::new();
    let mut tasks = Vec::new();
    let mut leftovers = Vec::new();
    for mark in marks {
        let key = (mark.path.clone(), mark.mark.name.clone());
        match mark.side {
            TaskSide::Start => open.entry(key).or_default().push(mark),
            TaskSide::End => match open.get_mut(&key).and_then(Vec::pop) {
                Some(start) => {
                    let task = paired_task(&start.mark, &mark.mark);
                    tasks.push((start.path, start.pool, task));
                }
                None => leftovers.push(mark),
            },
        }
    }
    leftovers.extend(open.into_values().flatten());
    leftovers.sort_by(|a, b| a.mark.at.ts.cmp(&b.mark.at.ts));
    Resolution { tasks, leftovers }
}
