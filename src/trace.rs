//! Everything a collaborator (pretty-printer, property wrapper, CI artifact store)
//! observes about an execution, without re-running it. See `SPEC_FULL.md` §4.7 and §6.

use serde::{Deserialize, Serialize};

use crate::id::{IORefId, MVarId, TVarId, ThreadId};

/// Identifies *something schedulable*: a real modeled thread, or a synthetic commit
/// thread that flushes one write-buffer entry.
///
/// The distilled spec asks for commit-thread ids to be "synthetic" numeric ids sharing
/// `ThreadId`'s namespace. We instead use a tagged sum — see `SPEC_FULL.md` §4.4 for why
/// this resolves the same "stable sort" requirement without risking collision with a
/// real `ThreadId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScheduledId {
    Real(ThreadId),
    Commit(ThreadId, IORefId),
}

impl ScheduledId {
    /// The real thread this runnable acts on behalf of, for dependence/preemption
    /// bookkeeping.
    #[must_use]
    pub fn owning_thread(self) -> ThreadId {
        match self {
            ScheduledId::Real(t) | ScheduledId::Commit(t, _) => t,
        }
    }

    #[must_use]
    pub fn is_commit(self) -> bool { matches!(self, ScheduledId::Commit(..)) }
}

/// How the chosen runnable relates to the previously-scheduled one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// The very first scheduling choice of the execution.
    Start(ScheduledId),
    /// The same runnable continued (no context switch).
    Continue,
    /// A different runnable than the prior step was chosen while the prior one was
    /// still runnable — a genuine context switch.
    SwitchTo(ScheduledId),
}

/// A cheap summary of a runnable's next primitive action, sufficient for the search
/// driver to decide dependence without executing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lookahead {
    WillFork,
    WillForkOS,
    WillMyThreadId,
    WillIsCurrentThreadBound,
    WillGetNumCapabilities,
    WillSetNumCapabilities,
    WillYield,
    WillThreadDelay,
    WillNewMVar,
    WillPutMVar(MVarId),
    WillTryPutMVar(MVarId),
    WillReadMVar(MVarId),
    WillTryReadMVar(MVarId),
    WillTakeMVar(MVarId),
    WillTryTakeMVar(MVarId),
    WillNewIORef,
    WillReadIORef(IORefId),
    WillReadForCAS(IORefId),
    WillWriteIORef(IORefId),
    WillModifyIORef(IORefId),
    WillCasIORef(IORefId),
    WillCommitIORef(IORefId),
    WillAtomically,
    WillCatching,
    WillPopCatching,
    WillMasking,
    WillPopMasking,
    WillThrow,
    WillThrowTo(ThreadId),
    WillLift,
    WillSubconcurrency,
    WillDontCheck,
    WillStop,
}

/// A single transactional step inside an `atomically` block, embedded in the outer
/// `ThreadAction::STM`/`BlockedSTM` entries. See `SPEC_FULL.md` §4.5.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TAction {
    TNew(TVarId),
    TRead(TVarId),
    TWrite(TVarId),
    TCatch,
    TOrElse,
    TRetry,
    TThrow,
    TStop,
}

/// Masking mode of a thread, controlling whether asynchronous `throwTo` exceptions are
/// delivered immediately, deferred until an interruptible blocking point, or fully
/// deferred. See `SPEC_FULL.md` §3, §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskMode {
    Unmasked,
    MaskedInterruptible,
    MaskedUninterruptible,
}

/// Every primitive step the stepper can record. One `ThreadAction` per trace entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadAction {
    Fork(ThreadId),
    ForkOS(ThreadId),
    MyThreadId,
    IsCurrentThreadBound(bool),
    GetNumCapabilities(usize),
    SetNumCapabilities(usize),
    Yield,
    ThreadDelay(u64),
    NewMVar(MVarId),
    PutMVar(MVarId, Vec<ThreadId>),
    BlockedPutMVar(MVarId),
    TryPutMVar(MVarId, bool, Vec<ThreadId>),
    ReadMVar(MVarId),
    BlockedReadMVar(MVarId),
    TryReadMVar(MVarId, bool),
    TakeMVar(MVarId, Vec<ThreadId>),
    BlockedTakeMVar(MVarId),
    TryTakeMVar(MVarId, bool, Vec<ThreadId>),
    NewIORef(IORefId),
    ReadIORef(IORefId),
    ReadForCAS(IORefId),
    WriteIORef(IORefId),
    ModIORef(IORefId),
    CasIORef(IORefId, bool),
    CommitIORef(ThreadId, IORefId),
    STM(Vec<TAction>, Vec<ThreadId>),
    BlockedSTM(Vec<TAction>),
    Throw,
    ThrowTo(ThreadId, bool),
    BlockedThrowTo(ThreadId),
    Catching,
    PopCatching,
    SetMasking(MaskMode, MaskMode),
    ResetMasking(MaskMode, MaskMode),
    LiftIO,
    Subconcurrency,
    StopSubconcurrency,
    DontCheck(Vec<TraceEntry>),
    Return,
    Stop,
}

/// One row of a [`Trace`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub decision: Decision,
    pub alternatives: Vec<(ScheduledId, Lookahead)>,
    pub action: ThreadAction,
}

/// The full observed history of one execution: a linear extension of the program's
/// happens-before order (`SPEC_FULL.md` §5, §8 invariant 1).
pub type Trace = Vec<TraceEntry>;
