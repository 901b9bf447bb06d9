//! The aggregate of everything one execution attempt needs. `SPEC_FULL.md` §3, §9.
//!
//! `ExecutionContext` is not `Clone` — a thread's continuation closes over an arbitrary
//! `Box<dyn FnOnce>`, which can't be duplicated. Re-exploring an alternative schedule
//! means building a fresh context from the caller's program factory and replaying a
//! recorded decision prefix (`crate::scheduler::ReplayScheduler`), not snapshotting a
//! live one.

use crate::cells::CellStore;
use crate::config::{MemType, RunConfig};
use crate::id::{IdSource, ThreadId, INITIAL_THREAD};
use crate::program::Program;
use crate::thread_table::{ThreadRecord, ThreadTable};
use crate::trace::MaskMode;
use crate::write_buffer::WriteBuffer;

pub struct ExecutionContext {
    pub ids: IdSource,
    pub threads: ThreadTable,
    pub cells: CellStore,
    pub write_buffer: WriteBuffer,
    pub capabilities: usize,
    pub mem_type: MemType,
    /// This context's own initial thread. Equal to [`INITIAL_THREAD`] only for the
    /// outermost run — a `subconcurrency`-nested context shares its `IdSource` with the
    /// enclosing one, so its "main" gets whatever id is next in that shared sequence.
    pub main_thread: ThreadId,
    /// The `(thread, value)` of the most recent thread to resolve its continuation to
    /// `Program::Done`, so the driver can recover the overall result once the initial
    /// thread is the one that finished.
    pub last_return: Option<(ThreadId, crate::value::Value)>,
    /// Threads blocked sending a `throwTo` to a currently-non-interruptible target,
    /// keyed by sender. See `crate::stepper`'s throwTo handling.
    pub pending_throw_to:
        std::collections::BTreeMap<ThreadId, (ThreadId, crate::value::ModeledException, crate::program::Cont<()>)>,
}

impl ExecutionContext {
    /// Builds a fresh context (fresh `IdSource`) and launches `root` as [`INITIAL_THREAD`].
    #[must_use]
    pub fn new(root: Program, config: RunConfig) -> Self {
        Self::with_ids(root, config, IdSource::new())
    }

    /// Builds a context from an externally-owned `IdSource`, so ids stay globally unique
    /// across a `subconcurrency` boundary (`SPEC_FULL.md` §4.6).
    #[must_use]
    pub fn with_ids(root: Program, config: RunConfig, mut ids: IdSource) -> Self {
        let main = ids.next_thread(Some("main"));
        let mut threads = ThreadTable::new();
        threads.launch(ThreadRecord::new(main, Some("main"), root, MaskMode::Unmasked, true));
        ExecutionContext {
            ids,
            threads,
            cells: CellStore::new(),
            write_buffer: WriteBuffer::new(),
            capabilities: config.capabilities,
            mem_type: config.mem_type,
            main_thread: main,
            last_return: None,
            pending_throw_to: std::collections::BTreeMap::new(),
        }
    }

    /// Whether there is nothing left to schedule: no runnable thread and no pending
    /// buffered write to commit.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.threads.runnable_ids().is_empty() && self.write_buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn new_context_launches_main_as_runnable() {
        let ctx = ExecutionContext::new(Program::Done(Value::new(())), RunConfig::new());
        assert_eq!(ctx.threads.runnable_ids(), vec![INITIAL_THREAD]);
        assert!(ctx.threads.get(INITIAL_THREAD).unwrap().bound);
    }

    #[test]
    fn quiescent_when_no_threads_and_no_buffered_writes() {
        let mut ctx = ExecutionContext::new(Program::Done(Value::new(())), RunConfig::new());
        assert!(!ctx.is_quiescent());
        ctx.threads.kill(INITIAL_THREAD);
        assert!(ctx.is_quiescent());
    }
}
