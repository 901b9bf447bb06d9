//! Pluggable choice of which runnable to advance next. `SPEC_FULL.md` §6.
//!
//! Scheduler state is threaded via `&mut self` rather than functionally (the spec's
//! `(prior, runnable, state) -> (choice, state')` shape) for the same reason `IdSource`
//! is: the context is never aliased, so `&mut` mutation and value-threading are
//! observationally identical, and it avoids a generic type parameter leaking through
//! every driver/stepper signature. The trait stays object-safe (`&mut dyn Scheduler`) so
//! `subconcurrency` can hand the very same scheduler instance to a nested run.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::trace::{Lookahead, ScheduledId, ThreadAction};

pub trait Scheduler: Send {
    /// Picks the next runnable to advance, given what ran last (and how) and the current
    /// set of runnables with a lookahead at their next action. `None` aborts the
    /// execution (`Failure::Abort`).
    fn choose(
        &mut self,
        prior: Option<(ScheduledId, &ThreadAction)>,
        runnable: &[(ScheduledId, Lookahead)],
    ) -> Option<ScheduledId>;
}

/// Deterministically replays a fixed prefix of prior decisions, then falls back to
/// always picking the lowest `ScheduledId` available. Used by the search driver to
/// reproduce a recorded trace up to a chosen backtrack point.
#[derive(Debug, Clone, Default)]
pub struct ReplayScheduler {
    prefix: VecDeque<ScheduledId>,
}

impl ReplayScheduler {
    #[must_use]
    pub fn new(prefix: Vec<ScheduledId>) -> Self {
        ReplayScheduler { prefix: prefix.into() }
    }
}

impl Scheduler for ReplayScheduler {
    fn choose(
        &mut self,
        _prior: Option<(ScheduledId, &ThreadAction)>,
        runnable: &[(ScheduledId, Lookahead)],
    ) -> Option<ScheduledId> {
        if let Some(next) = self.prefix.pop_front() {
            if runnable.iter().any(|(id, _)| *id == next) {
                return Some(next);
            }
            // The recorded prefix no longer matches what's runnable (the program or an
            // upstream choice changed) — nothing sound to replay.
            return None;
        }
        runnable.iter().map(|(id, _)| *id).min()
    }
}

/// Non-preemptive: keeps advancing the previously-chosen runnable as long as it's still
/// runnable, otherwise picks the lowest-id runnable. Used by `dontCheck`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinScheduler;

impl Scheduler for RoundRobinScheduler {
    fn choose(
        &mut self,
        prior: Option<(ScheduledId, &ThreadAction)>,
        runnable: &[(ScheduledId, Lookahead)],
    ) -> Option<ScheduledId> {
        if let Some((prev, _)) = prior {
            if runnable.iter().any(|(id, _)| *id == prev) {
                return Some(prev);
            }
        }
        runnable.iter().map(|(id, _)| *id).min()
    }
}

/// Picks uniformly at random among runnables. For quick smoke exploration outside the
/// exhaustive BPOR path (`SPEC_FULL.md` §6).
pub struct RandomScheduler {
    rng: StdRng,
}

impl RandomScheduler {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        RandomScheduler { rng: StdRng::seed_from_u64(seed) }
    }
}

impl Scheduler for RandomScheduler {
    fn choose(
        &mut self,
        _prior: Option<(ScheduledId, &ThreadAction)>,
        runnable: &[(ScheduledId, Lookahead)],
    ) -> Option<ScheduledId> {
        runnable.choose(&mut self.rng).map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ThreadId;

    fn runnable(ids: &[u64]) -> Vec<(ScheduledId, Lookahead)> {
        ids.iter().map(|n| (ScheduledId::Real(ThreadId(*n)), Lookahead::WillYield)).collect()
    }

    #[test]
    fn replay_consumes_prefix_then_picks_lowest() {
        let mut s = ReplayScheduler::new(vec![ScheduledId::Real(ThreadId(1))]);
        let r = runnable(&[0, 1]);
        assert_eq!(s.choose(None, &r), Some(ScheduledId::Real(ThreadId(1))));
        assert_eq!(s.choose(None, &r), Some(ScheduledId::Real(ThreadId(0))));
    }

    #[test]
    fn replay_fails_closed_on_mismatch() {
        let mut s = ReplayScheduler::new(vec![ScheduledId::Real(ThreadId(9))]);
        assert_eq!(s.choose(None, &runnable(&[0, 1])), None);
    }

    #[test]
    fn round_robin_sticks_to_prior_while_runnable() {
        let mut s = RoundRobinScheduler;
        let prior = (ScheduledId::Real(ThreadId(1)), ThreadAction::Yield);
        let r = runnable(&[0, 1]);
        assert_eq!(s.choose(Some((prior.0, &prior.1)), &r), Some(ScheduledId::Real(ThreadId(1))));
    }

    #[test]
    fn round_robin_falls_back_when_prior_not_runnable() {
        let mut s = RoundRobinScheduler;
        let prior = (ScheduledId::Real(ThreadId(5)), ThreadAction::Yield);
        let r = runnable(&[0, 1]);
        assert_eq!(s.choose(Some((prior.0, &prior.1)), &r), Some(ScheduledId::Real(ThreadId(0))));
    }

    #[test]
    fn random_scheduler_always_picks_a_runnable_one() {
        let mut s = RandomScheduler::new(42);
        let r = runnable(&[3, 7, 9]);
        let chosen = s.choose(None, &r).unwrap();
        assert!(r.iter().any(|(id, _)| *id == chosen));
    }
}
