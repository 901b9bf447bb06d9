//! Mapping from `ThreadId` to thread record. `SPEC_FULL.md` §3, §4.2.

use std::collections::BTreeMap;

use crate::id::{ThreadId, TVarId};
use crate::program::{Handler, Program};
use crate::trace::MaskMode;

/// Why a thread is currently not runnable.
pub enum BlockedOn {
    MVarFull(crate::id::MVarId),
    MVarEmpty(crate::id::MVarId),
    OnTVar(Vec<TVarId>),
    OnMask(ThreadId),
}

pub struct ThreadRecord {
    pub id: ThreadId,
    pub label: crate::id::Label,
    pub continuation: Program,
    pub blocking: Option<BlockedOn>,
    /// Masking stack; the top (last element) is the thread's current mode. Always
    /// non-empty — a thread starts `Unmasked`.
    pub masking: Vec<MaskMode>,
    pub handlers: Vec<Handler>,
    pub bound: bool,
}

impl ThreadRecord {
    #[must_use]
    pub fn new(id: ThreadId, label: crate::id::Label, continuation: Program, masking: MaskMode, bound: bool) -> Self {
        ThreadRecord { id, label, continuation, blocking: None, masking: vec![masking], handlers: Vec::new(), bound }
    }

    #[must_use]
    pub fn is_runnable(&self) -> bool { self.blocking.is_none() }

    #[must_use]
    pub fn current_mask(&self) -> MaskMode {
        *self.masking.last().expect("masking stack is never empty")
    }
}

/// `BTreeMap` gives ascending-`ThreadId` iteration for free, which is the determinism
/// requirement §4.2 asks for ("iteration order is sorted by ThreadId").
#[derive(Default)]
pub struct ThreadTable {
    threads: BTreeMap<ThreadId, ThreadRecord>,
}

impl ThreadTable {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn launch(&mut self, record: ThreadRecord) { self.threads.insert(record.id, record); }

    #[must_use]
    pub fn get(&self, tid: ThreadId) -> Option<&ThreadRecord> { self.threads.get(&tid) }

    pub fn get_mut(&mut self, tid: ThreadId) -> Option<&mut ThreadRecord> { self.threads.get_mut(&tid) }

    pub fn goto(&mut self, tid: ThreadId, continuation: Program) {
        if let Some(t) = self.threads.get_mut(&tid) {
            t.continuation = continuation;
        }
    }

    pub fn block(&mut self, tid: ThreadId, reason: BlockedOn) {
        if let Some(t) = self.threads.get_mut(&tid) {
            t.blocking = Some(reason);
        }
    }

    pub fn kill(&mut self, tid: ThreadId) -> Option<ThreadRecord> { self.threads.remove(&tid) }

    /// Unblocks every thread for which `predicate` holds on its current `BlockedOn`,
    /// returning their ids in ascending `ThreadId` order (table iteration order).
    pub fn unblock_where(&mut self, predicate: impl Fn(&BlockedOn) -> bool) -> Vec<ThreadId> {
        let mut woken = Vec::new();
        for (tid, t) in &mut self.threads {
            if let Some(reason) = &t.blocking {
                if predicate(reason) {
                    t.blocking = None;
                    woken.push(*tid);
                }
            }
        }
        woken
    }

    /// Unblocks a specific thread unconditionally (used for MVar FIFO wakeups and
    /// `throwTo` sender release, where the waking party already knows exactly which
    /// thread to wake rather than matching by predicate).
    pub fn unblock(&mut self, tid: ThreadId) {
        if let Some(t) = self.threads.get_mut(&tid) {
            t.blocking = None;
        }
    }

    #[must_use]
    pub fn runnable_ids(&self) -> Vec<ThreadId> {
        self.threads.iter().filter(|(_, t)| t.is_runnable()).map(|(id, _)| *id).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.threads.is_empty() }

    #[must_use]
    pub fn contains(&self, tid: ThreadId) -> bool { self.threads.contains_key(&tid) }

    pub fn iter(&self) -> impl Iterator<Item = (&ThreadId, &ThreadRecord)> { self.threads.iter() }

    pub fn ids(&self) -> impl Iterator<Item = ThreadId> + '_ { self.threads.keys().copied() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn stub_record(id: ThreadId) -> ThreadRecord {
        ThreadRecord::new(id, None, Program::Done(Value::new(())), MaskMode::Unmasked, false)
    }

    #[test]
    fn fresh_thread_is_runnable() {
        let mut t = ThreadTable::new();
        t.launch(stub_record(ThreadId(0)));
        assert!(t.get(ThreadId(0)).unwrap().is_runnable());
    }

    #[test]
    fn block_then_unblock_where_respects_predicate() {
        let mut t = ThreadTable::new();
        t.launch(stub_record(ThreadId(0)));
        t.launch(stub_record(ThreadId(1)));
        t.block(ThreadId(0), BlockedOn::MVarFull(crate::id::MVarId(0)));
        t.block(ThreadId(1), BlockedOn::MVarFull(crate::id::MVarId(1)));

        let woken = t.unblock_where(|r| matches!(r, BlockedOn::MVarFull(id) if *id == crate::id::MVarId(0)));
        assert_eq!(woken, vec![ThreadId(0)]);
        assert!(t.get(ThreadId(0)).unwrap().is_runnable());
        assert!(!t.get(ThreadId(1)).unwrap().is_runnable());
    }

    #[test]
    fn runnable_ids_are_sorted_ascending() {
        let mut t = ThreadTable::new();
        for n in [3u64, 1, 2] {
            t.launch(stub_record(ThreadId(n)));
        }
        assert_eq!(t.runnable_ids(), vec![ThreadId(1), ThreadId(2), ThreadId(3)]);
    }
}
