//! Whole-path checks: thread assignment, fragment search, set evaluation

use super::matcher::{MatchContext, MatchError, MatchFlags, MatchState};
use super::{CheckOutcome, ExpThread, PathRecognizer, SetRecognizer, SetTerm, Verdict};
use crate::limit::all_hold;
use crate::path::{PathEvent, ThreadPool};
use tracing::trace;

/// Match one thread expectation against a whole pool
///
/// # Returns
///
/// `None` when the pool does not match structurally, otherwise whether
/// some matching also satisfied every limit.
fn check_thread(
    ctx: &mut MatchContext<'_>,
    thread: &ExpThread,
    pool: &ThreadPool,
) -> Result<Option<bool>, MatchError> {
    let first = ctx.match_list(&thread.body, &pool.events, MatchFlags::THREAD.first_only())?;
    let Some(found) = first.first() else {
        return Ok(None);
    };
    let limits_ok = all_hold(&thread.limits, &pool.tally(&ctx.path().messages));
    if found.resources_ok || !limits_ok {
        return Ok(Some(found.resources_ok && limits_ok));
    }
    // The first match broke a limit; another matching may not
    let all = ctx.match_list(&thread.body, &pool.events, MatchFlags::THREAD)?;
    Ok(Some(all.iter().any(|state| state.resources_ok)))
}

/// Every list of sibling events in a pool: the top level, then each task's children
fn levels(pool: &ThreadPool) -> impl Iterator<Item = &[PathEvent]> {
    std::iter::once(pool.events.as_slice()).chain(pool.walk().filter_map(|event| match event {
        PathEvent::Task(task) => Some(task.children.as_slice()),
        _ => None,
    }))
}

/// Search every offset of every level of every pool for a thread body
fn find_anywhere(
    ctx: &mut MatchContext<'_>,
    thread: &ExpThread,
) -> Result<Option<bool>, MatchError> {
    let path = ctx.path();
    let mut found = None;
    for pool in path.pools.values() {
        let limits_ok = all_hold(&thread.limits, &pool.tally(&path.messages));
        for list in levels(pool) {
            for offset in 0..=list.len() {
                let matched = ctx.match_from(
                    &thread.body,
                    list,
                    MatchState::at(offset),
                    MatchFlags::FRAGMENT,
                )?;
                if matched.is_empty() {
                    continue;
                }
                let ok = limits_ok && matched.iter().any(|state| state.resources_ok);
                if ok {
                    return Ok(Some(true));
                }
                found = Some(false);
            }
        }
    }
    Ok(found)
}

impl PathRecognizer {
    /// Check the path held by `ctx`
    pub fn check(&self, ctx: &mut MatchContext<'_>) -> Result<Verdict, MatchError> {
        let structural = if self.complete {
            self.check_complete(ctx)?
        } else {
            self.check_fragment(ctx)?
        };
        let Some(resources_ok) = structural else {
            return Ok(Verdict::NO_MATCH);
        };
        Ok(Verdict {
            matched: true,
            resources_ok: resources_ok && all_hold(&self.limits, &ctx.path().tally),
        })
    }

    /// Root thread against the root pool, then first-fit for every other pool
    fn check_complete(&self, ctx: &mut MatchContext<'_>) -> Result<Option<bool>, MatchError> {
        let path = ctx.path();
        let (Some(root_pool), Some((root_thread, others))) =
            (path.root_pool(), self.threads.split_first())
        else {
            return Ok(None);
        };
        let Some(mut resources_ok) = check_thread(ctx, root_thread, root_pool)? else {
            trace!(recognizer = %self.name, "Root pool did not match");
            return Ok(None);
        };

        let mut counts = vec![0u32; others.len()];
        for pool in path.pools.values() {
            if Some(pool.id()) == path.root {
                continue;
            }
            let mut assigned = false;
            for (index, thread) in others.iter().enumerate() {
                if thread.max.is_some_and(|max| counts[index] >= max) {
                    continue;
                }
                if let Some(ok) = check_thread(ctx, thread, pool)? {
                    counts[index] += 1;
                    resources_ok &= ok;
                    assigned = true;
                    break;
                }
            }
            if !assigned {
                trace!(recognizer = %self.name, pool = pool.id(), "No thread expectation fits");
                return Ok(None);
            }
        }

        let in_bounds = others
            .iter()
            .zip(&counts)
            .all(|(thread, &count)| count >= thread.min && thread.max.map_or(true, |max| count <= max));
        if !in_bounds {
            trace!(recognizer = %self.name, ?counts, "Thread counts out of bounds");
            return Ok(None);
        }
        Ok(Some(resources_ok))
    }

    /// Every thread body must occur somewhere in the path
    fn check_fragment(&self, ctx: &mut MatchContext<'_>) -> Result<Option<bool>, MatchError> {
        let mut resources_ok = true;
        for thread in &self.threads {
            match find_anywhere(ctx, thread)? {
                Some(ok) => resources_ok &= ok,
                None => return Ok(None),
            }
        }
        Ok(Some(resources_ok))
    }
}

impl SetTerm {
    /// Whether the term holds over structural matches
    pub fn holds(&self, outcomes: &[CheckOutcome]) -> bool {
        match self {
            SetTerm::Ref(index) => outcomes
                .get(*index)
                .is_some_and(|outcome| outcome.verdict().matched),
            SetTerm::Not(inner) => !inner.holds(outcomes),
            SetTerm::And(items) => items.iter().all(|item| item.holds(outcomes)),
            SetTerm::Or(items) => items.iter().any(|item| item.holds(outcomes)),
            SetTerm::Implies(a, b) => !a.holds(outcomes) || b.holds(outcomes),
        }
    }

    fn references(&self, into: &mut Vec<usize>) {
        match self {
            SetTerm::Ref(index) => into.push(*index),
            SetTerm::Not(inner) => inner.references(into),
            SetTerm::And(items) | SetTerm::Or(items) => {
                for item in items {
                    item.references(into);
                }
            }
            SetTerm::Implies(a, b) => {
                a.references(into);
                b.references(into);
            }
        }
    }
}

impl SetRecognizer {
    /// Evaluate over the outcomes of every recognizer declared before this one
    pub fn check(&self, outcomes: &[CheckOutcome]) -> Verdict {
        if !self.term.holds(outcomes) {
            return Verdict::NO_MATCH;
        }
        let mut refs = Vec::new();
        self.term.references(&mut refs);
        let resources_ok = refs
            .iter()
            .filter_map(|index| outcomes.get(*index))
            .map(CheckOutcome::verdict)
            .filter(|verdict| verdict.matched)
            .all(|verdict| verdict.resources_ok);
        Verdict {
            matched: true,
            resources_ok,
        }
    }
}
