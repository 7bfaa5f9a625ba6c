//! Structural shape of a path, ignoring timing and resources
//!
//! Two paths have the same shape when their root pools hold the same event
//! trees and their other pools hold the same multiset of trees. Shapes give
//! `--unique` its grouping and are the input of recognizer synthesis.

use crate::event::PathId;
use crate::path::{Path, PathEvent, ThreadPool};
use fnv::{FnvHashMap, FnvHasher};
use serde::Serialize;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventShape {
    Task {
        name: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        children: Vec<EventShape>,
    },
    Notice {
        name: String,
    },
    Send,
    Recv,
}

impl EventShape {
    pub fn of(event: &PathEvent) -> Self {
        match event {
            PathEvent::Task(task) => EventShape::Task {
                name: task.name.clone(),
                children: task.children.iter().map(EventShape::of).collect(),
            },
            PathEvent::Notice(notice) => EventShape::Notice {
                name: notice.name.clone(),
            },
            PathEvent::Send(_) => EventShape::Send,
            PathEvent::Recv(_) => EventShape::Recv,
        }
    }
}

pub type PoolShape = Vec<EventShape>;

fn pool_shape(pool: &ThreadPool) -> PoolShape {
    pool.events.iter().map(EventShape::of).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PathShape {
    pub root: PoolShape,
    /// Non-root pools, sorted so pool numbering does not matter
    pub others: Vec<PoolShape>,
}

impl PathShape {
    pub fn of(path: &Path) -> Self {
        let root = path.root_pool().map(pool_shape).unwrap_or_default();
        let mut others: Vec<PoolShape> = path
            .pools
            .values()
            .filter(|pool| Some(pool.id()) != path.root)
            .map(pool_shape)
            .collect();
        others.sort();
        PathShape { root, others }
    }

    /// Stable 64-bit FNV-1a digest
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Non-root pools grouped by identical shape, in sorted order
    pub fn grouped_others(&self) -> Vec<(&PoolShape, u32)> {
        let mut groups: Vec<(&PoolShape, u32)> = Vec::new();
        for shape in &self.others {
            match groups.last_mut() {
                Some((last, count)) if *last == shape => *count += 1,
                _ => groups.push((shape, 1)),
            }
        }
        groups
    }
}

/// Paths sharing one shape
#[derive(Debug, Clone, Serialize)]
pub struct ShapeGroup {
    pub fingerprint: u64,
    pub shape: PathShape,
    pub paths: Vec<PathId>,
}

/// Group paths by shape, keeping first-seen order
pub fn group_unique<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Vec<ShapeGroup> {
    let mut groups: Vec<ShapeGroup> = Vec::new();
    let mut index: FnvHashMap<u64, Vec<usize>> = FnvHashMap::default();
    for path in paths {
        let shape = PathShape::of(path);
        let fingerprint = shape.fingerprint();
        let slots = index.entry(fingerprint).or_default();
        match slots.iter().find(|&&slot| groups[slot].shape == shape) {
            Some(&slot) => groups[slot].paths.push(path.id.clone()),
            None => {
                slots.push(groups.len());
                groups.push(ShapeGroup {
                    fingerprint,
                    shape,
                    paths: vec![path.id.clone()],
                });
            }
        }
    }
    groups
}
