//! The `Program`/`StmProgram` continuation ADTs: a tagged-variant encoding of "the next
//! primitive action, plus what to do with its result" (`SPEC_FULL.md` §9 "Continuations").
//!
//! This is the boundary the distilled spec calls out as an external collaborator's
//! concern ("the abstract concurrency interface into which real-world programs are
//! lifted"): a nicer `do`-notation-style builder belongs one layer up. What lives here
//! is the minimal continuation-passing core that layer would compile down to, plus a
//! handful of combinators (`prelude`) for constructing programs directly in tests.

use crate::id::{IORefId, MVarId, ThreadId, TVarId};
use crate::trace::MaskMode;
use crate::value::{ModeledException, Value};

/// A continuation: what to run next, given the result of the primitive action it's
/// attached to.
pub type Cont<R> = Box<dyn FnOnce(R) -> Program + Send>;

/// One modeled thread's program, as a chain of primitive actions.
///
/// Each non-terminal variant carries its payload plus a [`Cont`] to resume with.
/// `Program::Done` is the pure/return case — the thread has nothing left to do and
/// should be stepped toward [`Program::Stop`] (or simply dropped; `stop` is for
/// explicit teardown actions, not implied by reaching `Done`).
pub enum Program {
    Done(Value),

    Fork(Box<Program>, Cont<ThreadId>),
    ForkOS(Box<Program>, Cont<ThreadId>),
    MyThreadId(Cont<ThreadId>),
    IsCurrentThreadBound(Cont<bool>),
    GetNumCapabilities(Cont<usize>),
    SetNumCapabilities(usize, Cont<()>),
    Yield(Cont<()>),
    ThreadDelay(u64, Cont<()>),

    NewMVar(Option<Value>, Cont<MVarId>),
    PutMVar(MVarId, Value, Cont<()>),
    TryPutMVar(MVarId, Value, Cont<bool>),
    ReadMVar(MVarId, Cont<Value>),
    TryReadMVar(MVarId, Cont<Option<Value>>),
    TakeMVar(MVarId, Cont<Value>),
    TryTakeMVar(MVarId, Cont<Option<Value>>),

    NewIORef(Value, Cont<IORefId>),
    ReadIORef(IORefId, Cont<Value>),
    ReadForCAS(IORefId, Cont<crate::cells::Ticket>),
    WriteIORef(IORefId, Value, Cont<()>),
    ModifyIORef(IORefId, Box<dyn FnOnce(&Value) -> Value + Send>, Cont<()>),
    CasIORef(IORefId, crate::cells::Ticket, Value, Cont<(bool, crate::cells::Ticket)>),

    /// A transaction builder rather than a one-shot `StmProgram`: `StmProgram` nodes own
    /// `FnOnce` continuations, so a transaction can't be replayed from a stashed value —
    /// `retry` re-runs the whole transaction from scratch once woken, which needs a
    /// fresh `StmProgram` each attempt.
    Atomically(Box<dyn Fn() -> StmProgram + Send>, Cont<Value>),

    /// Pushes a handler frame matching exceptions of the kind `handler` recognises.
    Catching(Handler, Cont<()>),
    /// Pops the innermost handler frame.
    PopCatching(Cont<()>),

    /// Pushes masking state `m`; the continuation receives nothing but runs with `m` in
    /// effect until it pops it with `PopMasking` or the thread stops.
    Masking(MaskMode, Cont<()>),
    PopMasking(Cont<()>),

    Throw(ModeledException),
    ThrowTo(ThreadId, ModeledException, Cont<()>),

    Lift(Box<dyn FnOnce() -> Value + Send>, Cont<Value>),

    Subconcurrency(Box<Program>, Cont<crate::driver::RunOutcome>),
    DontCheck(u64, Box<Program>, Cont<Value>),

    Stop,
}

/// A registered exception handler: matches by dynamic kind (`TypeId`, via
/// [`ModeledException::is`]) and, on a match, builds the replacement continuation.
pub struct Handler {
    pub matches: Box<dyn Fn(&ModeledException) -> bool + Send>,
    pub run: Box<dyn FnOnce(ModeledException) -> Program + Send>,
}

/// The STM sub-language. Mirrors [`Program`]'s continuation shape; see `SPEC_FULL.md`
/// §4.5.
pub enum StmProgram {
    Return(Value),
    New(Value, Box<dyn FnOnce(TVarId) -> StmProgram + Send>),
    Read(TVarId, Box<dyn FnOnce(Value) -> StmProgram + Send>),
    Write(TVarId, Value, Box<dyn FnOnce(()) -> StmProgram + Send>),
    Retry,
    OrElse(Box<StmProgram>, Box<StmProgram>),
    Catch(Box<StmProgram>, Box<dyn Fn(&ModeledException) -> bool + Send>, Box<dyn FnOnce(ModeledException) -> StmProgram + Send>),
    Throw(ModeledException),
}

/// Small combinators for building programs/transactions directly (used by this crate's
/// own tests; a real DSL layer would compile user code down to these same nodes).
pub mod prelude {
    use super::{Cont, Handler, Program, StmProgram};
    use crate::value::{ModeledException, Value};

    pub fn done(v: Value) -> Program { Program::Done(v) }

    pub fn fork(child: Program, k: impl FnOnce(crate::id::ThreadId) -> Program + Send + 'static) -> Program {
        Program::Fork(Box::new(child), Box::new(k) as Cont<crate::id::ThreadId>)
    }

    pub fn new_mvar_empty(k: impl FnOnce(crate::id::MVarId) -> Program + Send + 'static) -> Program {
        Program::NewMVar(None, Box::new(k))
    }

    pub fn put_mvar(id: crate::id::MVarId, v: Value, k: impl FnOnce(()) -> Program + Send + 'static) -> Program {
        Program::PutMVar(id, v, Box::new(k))
    }

    pub fn take_mvar(id: crate::id::MVarId, k: impl FnOnce(Value) -> Program + Send + 'static) -> Program {
        Program::TakeMVar(id, Box::new(k))
    }

    pub fn stm_return(v: Value) -> StmProgram { StmProgram::Return(v) }

    pub fn stm_read(id: crate::id::TVarId, k: impl FnOnce(Value) -> StmProgram + Send + 'static) -> StmProgram {
        StmProgram::Read(id, Box::new(k))
    }

    pub fn stm_write(id: crate::id::TVarId, v: Value, k: impl FnOnce(()) -> StmProgram + Send + 'static) -> StmProgram {
        StmProgram::Write(id, v, Box::new(k))
    }

    pub fn stm_retry() -> StmProgram { StmProgram::Retry }

    pub fn atomically(
        build: impl Fn() -> StmProgram + Send + 'static,
        k: impl FnOnce(Value) -> Program + Send + 'static,
    ) -> Program {
        Program::Atomically(Box::new(build), Box::new(k))
    }

    /// Builds a handler matching exceptions of kind `T`, giving the handler body the
    /// concrete (cloned-out) exception value. `T` must be `Clone` since the engine only
    /// ever holds exceptions behind a shared, type-erased handle (`ModeledException`).
    pub fn handler_for<T: std::any::Any + Send + Sync + Clone>(
        run: impl FnOnce(T) -> Program + Send + 'static,
    ) -> Handler {
        Handler {
            matches: Box::new(|e: &ModeledException| e.is::<T>()),
            run: Box::new(move |e: ModeledException| {
                let inner = e.downcast_ref::<T>().cloned().expect("matches() already checked the kind");
                run(inner)
            }),
        }
    }
}
