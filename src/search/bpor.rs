//! Dependence, preemption counting, and backtrack-point insertion.
//! `SPEC_FULL.md` §4.8.

use std::collections::HashSet;

use crate::config::Bound;
use crate::id::ThreadId;
use crate::trace::{Decision, ScheduledId, ThreadAction, Trace};

/// Which cell (if any) an action touches, for the "same cell" half of dependence.
fn cell_of(action: &ThreadAction) -> Option<(&'static str, u64)> {
    match action {
        ThreadAction::NewMVar(id)
        | ThreadAction::PutMVar(id, _)
        | ThreadAction::BlockedPutMVar(id)
        | ThreadAction::TryPutMVar(id, _, _)
        | ThreadAction::ReadMVar(id)
        | ThreadAction::BlockedReadMVar(id)
        | ThreadAction::TryReadMVar(id, _)
        | ThreadAction::TakeMVar(id, _)
        | ThreadAction::BlockedTakeMVar(id)
        | ThreadAction::TryTakeMVar(id, _, _) => Some(("mvar", id.index())),

        ThreadAction::NewIORef(id)
        | ThreadAction::ReadIORef(id)
        | ThreadAction::ReadForCAS(id)
        | ThreadAction::WriteIORef(id)
        | ThreadAction::ModIORef(id)
        | ThreadAction::CasIORef(id, _)
        | ThreadAction::CommitIORef(_, id) => Some(("ioref", id.index())),

        _ => None,
    }
}

fn mutates(action: &ThreadAction) -> bool {
    matches!(
        action,
        ThreadAction::NewMVar(_)
            | ThreadAction::NewIORef(_)
            | ThreadAction::PutMVar(..)
            | ThreadAction::TryPutMVar(_, true, _)
            | ThreadAction::TakeMVar(..)
            | ThreadAction::TryTakeMVar(_, true, _)
            | ThreadAction::WriteIORef(_)
            | ThreadAction::ModIORef(_)
            | ThreadAction::CasIORef(_, true)
            | ThreadAction::CommitIORef(..)
    )
}

/// Actions that impose ordering beyond plain reads — a synchronisation in §4.8's sense.
fn is_sync(action: &ThreadAction) -> bool {
    matches!(
        action,
        ThreadAction::STM(..)
            | ThreadAction::BlockedSTM(_)
            | ThreadAction::CasIORef(..)
            | ThreadAction::PutMVar(..)
            | ThreadAction::TakeMVar(..)
            | ThreadAction::ReadMVar(_)
            | ThreadAction::TryPutMVar(..)
            | ThreadAction::TryTakeMVar(..)
            | ThreadAction::TryReadMVar(..)
            | ThreadAction::CommitIORef(..)
            | ThreadAction::ReadForCAS(_)
    )
}

/// "Two actions depend iff they operate on the same cell and at least one mutates it, or
/// one is a synchronisation that orders relative to the other" (§4.8), plus a `throwTo`
/// is dependent with any action run by its target thread.
fn dependent(a_action: &ThreadAction, a_owner: ThreadId, b_action: &ThreadAction, b_owner: ThreadId) -> bool {
    if let ThreadAction::ThrowTo(target, _) = a_action {
        if *target == b_owner {
            return true;
        }
    }
    if let ThreadAction::ThrowTo(target, _) = b_action {
        if *target == a_owner {
            return true;
        }
    }
    match (cell_of(a_action), cell_of(b_action)) {
        (Some(ca), Some(cb)) if ca == cb => mutates(a_action) || mutates(b_action) || (is_sync(a_action) && is_sync(b_action)),
        _ => false,
    }
}

/// A candidate prefix to explore next: replay `decisions[..]`, then let the scheduler's
/// own fallback (lowest-id) take over from there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backtrack {
    pub prefix: Vec<ScheduledId>,
    #[allow(dead_code)] // carried for diagnostics; the search loop doesn't currently branch on it
    pub conservative: bool,
}

/// Whether `trace[i]`'s decision constitutes a pre-emption: a switch not immediately
/// preceded by a `Yield` and not onto a synthetic commit thread (§4.8 "Bound").
fn is_preemption_at(trace: &Trace, i: usize) -> bool {
    let Decision::SwitchTo(target) = trace[i].decision else { return false };
    if target.is_commit() {
        return false;
    }
    i > 0 && !matches!(trace[i - 1].action, ThreadAction::Yield)
}

fn preemption_count(trace: &Trace, upto: usize) -> usize {
    (0..upto.min(trace.len())).filter(|&i| is_preemption_at(trace, i)).count()
}

/// The chosen `ScheduledId` at every step of `trace`, reconstructed from `Decision`.
fn chosen_ids(trace: &Trace) -> Vec<ScheduledId> {
    let mut out = Vec::with_capacity(trace.len());
    let mut current = None;
    for entry in trace {
        current = Some(match entry.decision {
            Decision::Start(id) | Decision::SwitchTo(id) => id,
            Decision::Continue => current.expect("Continue cannot be the first decision"),
        });
        out.push(current.unwrap());
    }
    out
}

/// Every enabled `ScheduledId` at step `i`: the chosen one plus its recorded
/// alternatives.
fn runnable_at(trace: &Trace, i: usize, chosen: ScheduledId) -> Vec<ScheduledId> {
    let mut ids: Vec<ScheduledId> = trace[i].alternatives.iter().map(|(id, _)| *id).collect();
    ids.push(chosen);
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Computes every new prefix worth exploring from one completed execution, per §4.8:
/// for each dependent pair of steps, a backtrack at the earlier step targeting the later
/// step's thread; plus a conservative backtrack at the nearest preceding context switch.
/// Candidates that would exceed `bound` are discarded.
#[must_use]
pub fn compute_backtracks(trace: &Trace, bound: Bound) -> Vec<Backtrack> {
    let chosen = chosen_ids(trace);
    let mut candidates: Vec<(usize, ScheduledId, bool)> = Vec::new(); // (step, target, conservative)
    let mut precise_hits: HashSet<usize> = HashSet::new();

    for j in 1..trace.len() {
        for i in 0..j {
            if !dependent(&trace[i].action, chosen[i].owning_thread(), &trace[j].action, chosen[j].owning_thread()) {
                continue;
            }
            if chosen[i].owning_thread() == chosen[j].owning_thread() {
                continue;
            }
            let runnable = runnable_at(trace, i, chosen[i]);
            let Some(target) = runnable.iter().find(|id| id.owning_thread() == chosen[j].owning_thread()).copied() else {
                continue; // not enabled at i — outside this simplified rule's reach
            };
            if target == chosen[i] {
                continue;
            }
            candidates.push((i, target, false));
            precise_hits.insert(i);
        }
    }

    for &i in &precise_hits {
        let mut switch = i;
        while switch > 0 && !matches!(trace[switch].decision, Decision::SwitchTo(_) | Decision::Start(_)) {
            switch -= 1;
        }
        let runnable = runnable_at(trace, switch, chosen[switch]);
        for id in runnable {
            if id != chosen[switch] {
                candidates.push((switch, id, true));
            }
        }
    }

    let mut out = Vec::new();
    let mut seen: HashSet<(usize, ScheduledId)> = HashSet::new();
    for (step, target, conservative) in candidates {
        if !seen.insert((step, target)) {
            continue;
        }
        let base_count = preemption_count(trace, step);
        let is_switch = step > 0 && target.owning_thread() != chosen[step - 1].owning_thread();
        let prev_is_yield = step > 0 && matches!(trace[step - 1].action, ThreadAction::Yield);
        let introduces_preemption = is_switch && !target.is_commit() && !prev_is_yield;
        let total = base_count + usize::from(introduces_preemption);
        if !bound.allows(total) {
            continue;
        }
        // `pruneCommits` (§4.8): a commit thread is confluent with itself — reordering
        // *which* buffered write flushes first is never observable — so backtracking
        // into one adds no schedule a real thread's reordering wouldn't already cover.
        if target.is_commit() {
            continue;
        }
        let mut prefix: Vec<ScheduledId> = chosen[..step].to_vec();
        prefix.push(target);
        out.push(Backtrack { prefix, conservative });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{IORefId, MVarId};

    fn tid(n: u64) -> ThreadId { ThreadId(n) }

    #[test]
    fn dependent_writes_to_same_ioref_are_dependent() {
        let a = ThreadAction::WriteIORef(IORefId(0));
        let b = ThreadAction::WriteIORef(IORefId(0));
        assert!(dependent(&a, tid(0), &b, tid(1)));
    }

    #[test]
    fn independent_writes_to_different_refs_are_not_dependent() {
        let a = ThreadAction::WriteIORef(IORefId(0));
        let b = ThreadAction::WriteIORef(IORefId(1));
        assert!(!dependent(&a, tid(0), &b, tid(1)));
    }

    #[test]
    fn two_reads_of_the_same_mvar_are_not_dependent() {
        let a = ThreadAction::ReadIORef(IORefId(0));
        let b = ThreadAction::ReadIORef(IORefId(0));
        assert!(!dependent(&a, tid(0), &b, tid(1)));
    }

    #[test]
    fn throw_to_is_dependent_with_any_action_of_its_target() {
        let a = ThreadAction::ThrowTo(tid(2), true);
        let b = ThreadAction::Yield;
        assert!(dependent(&a, tid(0), &b, tid(2)));
    }

    #[test]
    fn mvar_put_and_take_on_same_cell_are_dependent() {
        let a = ThreadAction::PutMVar(MVarId(0), vec![]);
        let b = ThreadAction::TakeMVar(MVarId(0), vec![]);
        assert!(dependent(&a, tid(0), &b, tid(1)));
    }
}
