//! Interval-tree insertion for one thread pool
//!
//! Tasks are placed by comparing their interval with the rightmost sibling at
//! each level; point events (notices, message endpoints) are placed by binary
//! search on their timestamp and sink into any task that covers them.

use super::{OrderViolation, PathEvent, PathTask};
use crate::event::Timestamp;
use tracing::warn;

/// Position of an incoming interval relative to an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// Entirely before the existing interval
    Before,
    /// Starts before and ends inside
    Start,
    /// Contained in the existing interval
    Within,
    /// Starts inside and ends after
    End,
    /// Entirely after the existing interval
    After,
    /// Strictly contains the existing interval
    Span,
}

/// Classify `incoming` against `existing`, both `(start, end)` pairs
pub fn classify(existing: (Timestamp, Timestamp), incoming: (Timestamp, Timestamp)) -> Overlap {
    let (a_start, a_end) = existing;
    let (b_start, b_end) = incoming;
    if b_end <= a_start {
        Overlap::Before
    } else if b_start >= a_end {
        Overlap::After
    } else if b_start >= a_start && b_end <= a_end {
        Overlap::Within
    } else if b_start <= a_start && b_end >= a_end {
        Overlap::Span
    } else if b_start < a_start {
        Overlap::Start
    } else {
        Overlap::End
    }
}

/// Insert a task; callers insert parents before their children
pub(crate) fn insert_task(siblings: &mut Vec<PathEvent>, task: PathTask) -> Result<(), OrderViolation> {
    let Some(last) = siblings.last_mut() else {
        siblings.push(PathEvent::Task(task));
        return Ok(());
    };
    match classify((last.start(), last.end()), (task.start.ts, task.end)) {
        Overlap::After => {
            siblings.push(PathEvent::Task(task));
            Ok(())
        }
        Overlap::Before => {
            let idx = siblings.len() - 1;
            siblings.insert(idx, PathEvent::Task(task));
            Ok(())
        }
        Overlap::Within => match last {
            PathEvent::Task(parent) => insert_task(&mut parent.children, task),
            other => Err(OrderViolation::WithinNonTask {
                existing: other.label(),
                incoming: PathEvent::Task(task).label(),
            }),
        },
        relation => Err(OrderViolation::Overlap {
            existing: last.label(),
            incoming: PathEvent::Task(task).label(),
            relation,
        }),
    }
}

/// Insert a notice or message endpoint by timestamp
pub(crate) fn insert_point(siblings: &mut Vec<PathEvent>, event: PathEvent) {
    let ts = event.start();
    let idx = siblings.partition_point(|existing| existing.start() <= ts);
    if idx > 0 {
        match &mut siblings[idx - 1] {
            PathEvent::Task(task) if ts < task.end => {
                insert_point(&mut task.children, event);
                return;
            }
            prev if !prev.is_task() && prev.start() == ts => {
                warn!(
                    "duplicate timestamp {}: {} placed after {}",
                    ts,
                    event.label(),
                    prev.label()
                );
            }
            _ => {}
        }
    }
    siblings.insert(idx, event);
}

/// Verify start <= end, sibling order, and containment, recursively
pub(crate) fn check_order(
    events: &[PathEvent],
    parent: Option<&PathTask>,
) -> Result<(), OrderViolation> {
    let mut previous: Option<&PathEvent> = None;
    for event in events {
        if event.end() < event.start() {
            return Err(OrderViolation::Reversed {
                event: event.label(),
            });
        }
        if let Some(prev) = previous {
            if prev.end() > event.start() {
                return Err(OrderViolation::OutOfOrder {
                    previous: prev.label(),
                    event: event.label(),
                });
            }
        }
        if let Some(task) = parent {
            if event.start() < task.start.ts || event.end() > task.end {
                return Err(OrderViolation::Escapes {
                    parent: PathEvent::Task(task.clone()).label(),
                    event: event.label(),
                });
            }
        }
        if let PathEvent::Task(task) = event {
            check_order(&task.children, Some(task))?;
        }
        previous = Some(event);
    }
    Ok(())
}
