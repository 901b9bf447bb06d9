//! Diagnostic taxonomy for the engine.
//!
//! Two orthogonal error types, per `SPEC_FULL.md` §7:
//!
//! - [`Failure`] is an *outcome* of a modeled execution — a regular `Result::Err` that
//!   callers match on, not a bug.
//! - [`EngineError`] is API misuse against *this crate* (bad config, re-running a
//!   consumed context) — grounded on the teacher's `SubscribeError` (see
//!   `tui/src/core/resilient_reactor_thread/rrt_types.rs`): `thiserror` for the
//!   `Display`/`Error` impls, `miette::Diagnostic` for codes and actionable help text.

use crate::id::ThreadId;

/// Why an execution terminated without the initial thread producing a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, miette::Diagnostic, serde::Serialize, serde::Deserialize)]
pub enum Failure {
    /// The scheduler, or the engine's own bookkeeping, violated an invariant. Always a
    /// bug in the scheduler or the engine, never in the program under test.
    #[error("internal invariant violated: {0}")]
    #[diagnostic(
        code(detconc::internal_error),
        help("this indicates a bug in the scheduler or the engine itself, not the program under test")
    )]
    InternalError(String),

    /// No thread is runnable and the initial thread is blocked on an `MVar` or on
    /// `throwTo` delivery.
    #[error("deadlock: initial thread blocked with no runnable threads remaining")]
    #[diagnostic(
        code(detconc::deadlock),
        help("check for an MVar that is never filled/emptied, or a throwTo to a thread that never unmasks")
    )]
    Deadlock,

    /// No thread is runnable and the initial thread is blocked in `atomically` with an
    /// empty read set (`retry` with nothing to wait on).
    #[error("STM deadlock: initial thread retried with an empty read set")]
    #[diagnostic(
        code(detconc::stm_deadlock),
        help("a `retry` with no TVar reads beforehand can never be woken")
    )]
    STMDeadlock,

    /// The scheduler returned `None` while runnable threads were still available.
    #[error("scheduler aborted the execution with runnable threads still available")]
    #[diagnostic(code(detconc::abort))]
    Abort,

    /// An exception propagated past every handler on the initial thread.
    #[error("uncaught exception propagated out of the initial thread")]
    #[diagnostic(code(detconc::uncaught_exception))]
    UncaughtException,

    /// `subconcurrency` was called while other threads existed, or while replaying a
    /// snapshot.
    #[error("subconcurrency is only legal with no other live threads and outside snapshot replay")]
    #[diagnostic(
        code(detconc::illegal_subconcurrency),
        help("drain or join every other thread before calling subconcurrency")
    )]
    IllegalSubconcurrency,

    /// `dontCheck` appeared somewhere other than the very first action of the program.
    #[error("dontCheck is only legal as the first action of a program")]
    #[diagnostic(
        code(detconc::illegal_dont_check),
        help("move the dontCheck block to the very start of the program, or drop it")
    )]
    IllegalDontCheck,
}

/// Misuse of this crate's API, detected before (or independent of) any modeled
/// execution. Never produced by a user program; always a caller bug.
#[derive(Debug, Clone, thiserror::Error, miette::Diagnostic)]
pub enum EngineError {
    #[error("capability count must be at least 1, got {0}")]
    #[diagnostic(
        code(detconc::config::zero_capabilities),
        help("RunConfig::capabilities(n) requires n >= 1")
    )]
    ZeroCapabilities(usize),

    #[error("thread {0} is not present in the thread table")]
    #[diagnostic(code(detconc::unknown_thread))]
    UnknownThread(ThreadId),

    #[error("subconcurrency was invoked during snapshot replay, where it is always illegal")]
    #[diagnostic(code(detconc::subconcurrency_during_replay))]
    SubconcurrencyDuringReplay,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_variants_have_stable_display_text() {
        assert_eq!(Failure::Deadlock.to_string(), "deadlock: initial thread blocked with no runnable threads remaining");
    }
}
