//! Transactional cell. Mutable only through the STM interpreter (`crate::stm`), which
//! keeps its own overlay (tentative writes, undo log) and commits here only on
//! `Success`. `SPEC_FULL.md` §3, §4.5.

use crate::id::TVarId;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct TVarCell {
    pub id: TVarId,
    pub current_value: Value,
}

impl TVarCell {
    #[must_use]
    pub fn new(id: TVarId, initial: Value) -> Self { TVarCell { id, current_value: initial } }
}
