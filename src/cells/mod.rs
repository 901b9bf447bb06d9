//! Storage for every kind of shared cell the modeled language exposes. `SPEC_FULL.md`
//! §4.3.

pub mod ioref;
pub mod mvar;
pub mod tvar;

use std::collections::BTreeMap;

pub use ioref::{IORefCell, Ticket};
pub use mvar::MVarCell;
pub use tvar::TVarCell;

use crate::id::{IORefId, MVarId, TVarId};
use crate::value::Value;

/// All live cells, keyed by id so iteration (e.g. the write-buffer's full-barrier flush,
/// §4.3/§4.4) is deterministic by construction.
#[derive(Debug, Clone, Default)]
pub struct CellStore {
    pub mvars: BTreeMap<MVarId, MVarCell>,
    pub iorefs: BTreeMap<IORefId, IORefCell>,
    pub tvars: BTreeMap<TVarId, TVarCell>,
}

impl CellStore {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn insert_mvar(&mut self, id: MVarId, initial: Option<Value>) {
        self.mvars.insert(id, MVarCell::new(id, initial));
    }

    pub fn insert_ioref(&mut self, id: IORefId, initial: Value) {
        self.iorefs.insert(id, IORefCell::new(id, initial));
    }

    pub fn insert_tvar(&mut self, id: TVarId, initial: Value) {
        self.tvars.insert(id, TVarCell::new(id, initial));
    }

    /// Flushes every buffered write on every `IORef`, in ascending `IORefId` order, for
    /// every thread's buffer therein. Used by the full barrier before a synchronised
    /// action (§4.3).
    pub fn flush_all_buffers(&mut self) {
        for cell in self.iorefs.values_mut() {
            cell.flush_all();
        }
    }
}
