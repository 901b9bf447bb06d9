//! Per-thread (TSO) or per-(thread, cell) (PSO) ordered buffer of pending `IORef`
//! writes, plus the commit-thread protocol that flushes one entry at a time.
//! `SPEC_FULL.md` §4.4.

use std::collections::BTreeMap;

use crate::cells::CellStore;
use crate::config::MemType;
use crate::id::{IORefId, ThreadId};

/// The key a pending write is filed under. Under [`MemType::TotalStoreOrder`] the
/// second component is always `None` (one FIFO queue per thread, covering every ref it
/// has written); under [`MemType::PartialStoreOrder`] it is always `Some` (one queue per
/// thread *and* ref).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WriteKey(pub ThreadId, pub Option<IORefId>);

#[derive(Debug, Clone, Default)]
pub struct WriteBuffer {
    entries: BTreeMap<WriteKey, Vec<IORefId>>,
}

impl WriteBuffer {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.values().all(std::vec::Vec::is_empty) }

    /// Records that `tid` has a pending write to `ioref` (the value itself already sits
    /// in `CellStore::iorefs[ioref].per_thread_buffer`, appended by the caller before
    /// this is invoked). Returns the key the write was filed under.
    pub fn note_pending(&mut self, mem_type: MemType, tid: ThreadId, ioref: IORefId) -> WriteKey {
        let key = match mem_type {
            MemType::SequentialConsistency => unreachable!("SC never buffers writes"),
            MemType::TotalStoreOrder => WriteKey(tid, None),
            MemType::PartialStoreOrder => WriteKey(tid, Some(ioref)),
        };
        self.entries.entry(key).or_default().push(ioref);
        key
    }

    /// Every non-empty key, i.e. every synthetic commit-thread runnable currently
    /// available, sorted by `WriteKey`'s derived `Ord` for a stable, bit-identical
    /// runnable set across replays of the same prefix.
    #[must_use]
    pub fn commit_candidates(&self) -> Vec<WriteKey> {
        self.entries.iter().filter(|(_, q)| !q.is_empty()).map(|(k, _)| *k).collect()
    }

    /// The `IORefId` that would be committed next for `key` (the oldest pending write),
    /// without mutating anything.
    #[must_use]
    pub fn peek(&self, key: WriteKey) -> Option<IORefId> {
        self.entries.get(&key).and_then(|q| q.first()).copied()
    }

    /// Atomically applies and removes the oldest pending write filed under `key`.
    /// Returns the `IORefId` committed, for the `CommitIORef` trace entry.
    pub fn commit(&mut self, key: WriteKey, cells: &mut CellStore) -> Option<IORefId> {
        let q = self.entries.get_mut(&key)?;
        if q.is_empty() {
            return None;
        }
        let ioref = q.remove(0);
        if let Some(cell) = cells.iorefs.get_mut(&ioref) {
            cell.commit_oldest(key.0);
        }
        Some(ioref)
    }

    /// Flushes every buffered entry for every key, in ascending `WriteKey` order, as one
    /// atomic step (a barrier never appears piecemeal in the trace). `SPEC_FULL.md`
    /// §4.3/§4.4.
    pub fn flush_all(&mut self, cells: &mut CellStore) {
        cells.flush_all_buffers();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn tso_keys_on_thread_only() {
        let mut wb = WriteBuffer::new();
        let k1 = wb.note_pending(MemType::TotalStoreOrder, ThreadId(1), IORefId(0));
        let k2 = wb.note_pending(MemType::TotalStoreOrder, ThreadId(1), IORefId(1));
        assert_eq!(k1, k2);
    }

    #[test]
    fn pso_keys_on_thread_and_ref() {
        let mut wb = WriteBuffer::new();
        let k1 = wb.note_pending(MemType::PartialStoreOrder, ThreadId(1), IORefId(0));
        let k2 = wb.note_pending(MemType::PartialStoreOrder, ThreadId(1), IORefId(1));
        assert_ne!(k1, k2);
    }

    #[test]
    fn commit_removes_oldest_and_applies_to_cell() {
        let mut cells = CellStore::new();
        cells.insert_ioref(IORefId(0), Value::new(0i32));
        cells.iorefs.get_mut(&IORefId(0)).unwrap().buffer_write(ThreadId(1), Value::new(5i32));

        let mut wb = WriteBuffer::new();
        let key = wb.note_pending(MemType::TotalStoreOrder, ThreadId(1), IORefId(0));
        assert_eq!(wb.commit(key, &mut cells), Some(IORefId(0)));
        assert_eq!(cells.iorefs[&IORefId(0)].committed_value.downcast::<i32>(), Some(5));
        assert!(wb.is_empty());
    }
}
