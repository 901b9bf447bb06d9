//! The execution driver: the outer loop that repeatedly asks a [`Scheduler`] which
//! runnable to advance next, hands it to [`crate::stepper::step`], and assembles the
//! resulting [`Trace`]. `SPEC_FULL.md` §4.6 "Deadlock detection", §4.7, §6.

use crate::config::{MemType, RunConfig};
use crate::context::ExecutionContext;
use crate::error::Failure;
use crate::id::IdSource;
use crate::program::Program;
use crate::scheduler::Scheduler;
use crate::thread_table::BlockedOn;
use crate::trace::{Decision, Lookahead, ScheduledId, ThreadAction, Trace, TraceEntry};
use crate::value::Value;
use crate::write_buffer::WriteKey;

/// The result of running one program to completion (or failure) under one scheduler.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub result: Result<Value, Failure>,
    pub trace: Trace,
}

/// Runs `program` to completion under `scheduler`, starting from a fresh [`IdSource`].
pub fn run(program: Program, config: RunConfig, scheduler: &mut dyn Scheduler) -> RunOutcome {
    let mut ids = IdSource::new();
    run_nested(program, config, scheduler, &mut ids)
}

/// Like [`run`], but threads an externally-owned `IdSource` through so ids stay globally
/// unique across a `subconcurrency` boundary (`SPEC_FULL.md` §4.6: subconcurrency shares
/// "the current scheduler, memory model, id source, and capability count").
pub fn run_nested(
    program: Program,
    config: RunConfig,
    scheduler: &mut dyn Scheduler,
    ids: &mut IdSource,
) -> RunOutcome {
    let taken_ids = std::mem::take(ids);
    let mut ctx = ExecutionContext::with_ids(program, config, taken_ids);
    tracing::debug!(mem_type = %ctx.mem_type, capabilities = ctx.capabilities, "starting execution");
    let mut trace = Trace::new();
    let mut prior: Option<(ScheduledId, ThreadAction)> = None;

    let result = loop {
        let runnable = collect_runnable(&ctx);
        if runnable.is_empty() {
            if ctx.threads.is_empty() {
                break Ok(());
            }
            match deadlock_kind(&ctx) {
                Some(failure) => break Err(failure),
                None => break Ok(()), // only non-initial (orphan) threads remain blocked
            }
        }

        let is_first_step = trace.is_empty();
        let Some(chosen) = scheduler.choose(prior.as_ref().map(|(id, a)| (*id, a)), &runnable) else {
            break Err(Failure::Abort);
        };

        // A `SwitchTo` is only a genuine pre-emption when the prior thread was forced
        // out while still runnable. If it blocked or terminated, this choice is the
        // only one available and dejafu's `decisionOf` records `Start`, not `SwitchTo`
        // (`SPEC_FULL.md` §4.7) — otherwise `bpor::is_preemption_at` would count a
        // forced switch as a pre-emption and mis-enforce the bound.
        let decision = match &prior {
            None => Decision::Start(chosen),
            Some((p, _)) if *p == chosen => Decision::Continue,
            Some((p, _)) if runnable.iter().any(|(id, _)| id == p) => Decision::SwitchTo(chosen),
            _ => Decision::Start(chosen),
        };
        let alternatives: Vec<(ScheduledId, Lookahead)> =
            runnable.iter().filter(|(id, _)| *id != chosen).copied().collect();

        match crate::stepper::step(&mut ctx, chosen, scheduler, is_first_step) {
            Ok(action) => {
                trace.push(TraceEntry { decision, alternatives, action: action.clone() });
                prior = Some((chosen, action));
            }
            Err(failure) => {
                trace.push(TraceEntry { decision, alternatives, action: ThreadAction::Stop });
                break Err(failure);
            }
        }
    };

    let main_thread = ctx.main_thread;
    let result = result.map(|()| match ctx.last_return.take() {
        Some((tid, v)) if tid == main_thread => v,
        _ => Value::new(()),
    });

    // "at the end of each execution the driver kills every remaining thread, running its
    // stop action; this is not observable in the trace" (§5) — no stop action to run
    // since Stop is a no-op terminal state for the modeled language; dropping suffices.
    let leftover_ids = std::mem::take(&mut ctx.ids);
    *ids = leftover_ids;

    RunOutcome { result, trace }
}

fn deadlock_kind(ctx: &ExecutionContext) -> Option<Failure> {
    match ctx.threads.get(ctx.main_thread)?.blocking.as_ref()? {
        BlockedOn::MVarFull(_) | BlockedOn::MVarEmpty(_) | BlockedOn::OnMask(_) => Some(Failure::Deadlock),
        BlockedOn::OnTVar(_) => Some(Failure::STMDeadlock),
    }
}

/// Every currently-schedulable runnable with a cheap summary of its next action, sorted
/// by `ScheduledId` for a stable, replay-independent ordering (`SPEC_FULL.md` §4.4, §4.7).
pub(crate) fn collect_runnable(ctx: &ExecutionContext) -> Vec<(ScheduledId, Lookahead)> {
    let mut out: Vec<(ScheduledId, Lookahead)> = ctx
        .threads
        .iter()
        .filter(|(_, rec)| rec.is_runnable())
        .map(|(tid, rec)| (ScheduledId::Real(*tid), lookahead_for(&rec.continuation)))
        .collect();

    if ctx.mem_type != MemType::SequentialConsistency {
        for key in ctx.write_buffer.commit_candidates() {
            let WriteKey(tid, _) = key;
            if let Some(ioref) = ctx.write_buffer.peek(key) {
                out.push((ScheduledId::Commit(tid, ioref), Lookahead::WillCommitIORef(ioref)));
            }
        }
    }

    out.sort_unstable_by_key(|(id, _)| *id);
    out
}

fn lookahead_for(prog: &Program) -> Lookahead {
    match prog {
        Program::Done(_) => Lookahead::WillStop,
        Program::Fork(..) => Lookahead::WillFork,
        Program::ForkOS(..) => Lookahead::WillForkOS,
        Program::MyThreadId(_) => Lookahead::WillMyThreadId,
        Program::IsCurrentThreadBound(_) => Lookahead::WillIsCurrentThreadBound,
        Program::GetNumCapabilities(_) => Lookahead::WillGetNumCapabilities,
        Program::SetNumCapabilities(..) => Lookahead::WillSetNumCapabilities,
        Program::Yield(_) => Lookahead::WillYield,
        Program::ThreadDelay(..) => Lookahead::WillThreadDelay,
        Program::NewMVar(..) => Lookahead::WillNewMVar,
        Program::PutMVar(id, ..) => Lookahead::WillPutMVar(*id),
        Program::TryPutMVar(id, ..) => Lookahead::WillTryPutMVar(*id),
        Program::ReadMVar(id, _) => Lookahead::WillReadMVar(*id),
        Program::TryReadMVar(id, _) => Lookahead::WillTryReadMVar(*id),
        Program::TakeMVar(id, _) => Lookahead::WillTakeMVar(*id),
        Program::TryTakeMVar(id, _) => Lookahead::WillTryTakeMVar(*id),
        Program::NewIORef(..) => Lookahead::WillNewIORef,
        Program::ReadIORef(id, _) => Lookahead::WillReadIORef(*id),
        Program::ReadForCAS(id, _) => Lookahead::WillReadForCAS(*id),
        Program::WriteIORef(id, ..) => Lookahead::WillWriteIORef(*id),
        Program::ModifyIORef(id, ..) => Lookahead::WillModifyIORef(*id),
        Program::CasIORef(id, ..) => Lookahead::WillCasIORef(*id),
        Program::Atomically(..) => Lookahead::WillAtomically,
        Program::Catching(..) => Lookahead::WillCatching,
        Program::PopCatching(_) => Lookahead::WillPopCatching,
        Program::Masking(..) => Lookahead::WillMasking,
        Program::PopMasking(_) => Lookahead::WillPopMasking,
        Program::Throw(_) => Lookahead::WillThrow,
        Program::ThrowTo(tid, ..) => Lookahead::WillThrowTo(*tid),
        Program::Lift(..) => Lookahead::WillLift,
        Program::Subconcurrency(..) => Lookahead::WillSubconcurrency,
        Program::DontCheck(..) => Lookahead::WillDontCheck,
        Program::Stop => Lookahead::WillStop,
    }
}

