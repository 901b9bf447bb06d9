//! Steps a transaction to completion with full read/write tracking and rollback.
//! `SPEC_FULL.md` §4.5.
//!
//! Implementation choice: rather than mutating [`crate::cells::TVarCell`] in place and
//! reverse-applying an undo log on failure, the interpreter keeps a transaction-local
//! overlay (`TxState::overlay`) and only writes it into the real [`CellStore`] on
//! `Success`. Both designs satisfy "STM intermediate state is invisible outside the
//! transaction" (`SPEC_FULL.md` §3); the overlay makes that invariant true by
//! construction instead of by careful reverse-order undo, at the cost of one clone per
//! `orElse`/`catch` branch point (acceptable — transactions are small and short-lived by
//! design, never crossing a blocking point).

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::cells::CellStore;
use crate::id::{IdSource, TVarId};
use crate::program::StmProgram;
use crate::trace::TAction;
use crate::value::{ModeledException, Value};

#[derive(Clone, Default)]
struct TxState {
    overlay: HashMap<TVarId, Value>,
    new_tvars: HashSet<TVarId>,
    reads: BTreeSet<TVarId>,
    writes: BTreeSet<TVarId>,
    trace: Vec<TAction>,
}

enum StmSignal {
    Retry,
    Exception(ModeledException),
}

/// Outcome of running a transaction to completion.
pub enum StmOutcome {
    Success {
        reads: BTreeSet<TVarId>,
        writes: BTreeSet<TVarId>,
        value: Value,
        trace: Vec<TAction>,
        /// Tentative writes (including newly-created TVars) to install into the real
        /// `CellStore` now that the transaction committed.
        overlay: HashMap<TVarId, Value>,
        new_tvars: HashSet<TVarId>,
    },
    Retry { reads: BTreeSet<TVarId>, trace: Vec<TAction> },
    Exception { exc: ModeledException, trace: Vec<TAction> },
}

/// Runs `prog` to completion against `cells` (read-only — nothing is installed until a
/// caller applies `StmOutcome::Success`'s overlay).
pub fn run_stm(prog: StmProgram, ids: &mut IdSource, cells: &CellStore) -> StmOutcome {
    let mut st = TxState::default();
    match step(prog, ids, cells, &mut st) {
        Ok(value) => StmOutcome::Success {
            reads: st.reads,
            writes: st.writes,
            value,
            trace: st.trace,
            overlay: st.overlay,
            new_tvars: st.new_tvars,
        },
        Err(StmSignal::Retry) => StmOutcome::Retry { reads: st.reads, trace: st.trace },
        Err(StmSignal::Exception(exc)) => StmOutcome::Exception { exc, trace: st.trace },
    }
}

/// Installs a committed overlay into the real cell store: creates every new TVar, then
/// overwrites `current_value` for everything written. Call only on `StmOutcome::Success`.
pub fn commit_overlay(
    cells: &mut CellStore,
    overlay: HashMap<TVarId, Value>,
    new_tvars: &HashSet<TVarId>,
) {
    for (id, value) in overlay {
        if new_tvars.contains(&id) {
            cells.insert_tvar(id, value);
        } else if let Some(cell) = cells.tvars.get_mut(&id) {
            cell.current_value = value;
        }
    }
}

fn read_value(id: TVarId, cells: &CellStore, st: &TxState) -> Value {
    st.overlay
        .get(&id)
        .cloned()
        .or_else(|| cells.tvars.get(&id).map(|c| c.current_value.clone()))
        .expect("read of a TVarId that was never created")
}

fn step(prog: StmProgram, ids: &mut IdSource, cells: &CellStore, st: &mut TxState) -> Result<Value, StmSignal> {
    match prog {
        StmProgram::Return(v) => Ok(v),
        StmProgram::New(v, k) => {
            let id = ids.next_tvar(None);
            st.overlay.insert(id, v);
            st.new_tvars.insert(id);
            st.trace.push(TAction::TNew(id));
            step(k(id), ids, cells, st)
        }
        StmProgram::Read(id, k) => {
            st.reads.insert(id);
            st.trace.push(TAction::TRead(id));
            let v = read_value(id, cells, st);
            step(k(v), ids, cells, st)
        }
        StmProgram::Write(id, v, k) => {
            st.writes.insert(id);
            st.overlay.insert(id, v);
            st.trace.push(TAction::TWrite(id));
            step(k(()), ids, cells, st)
        }
        StmProgram::Retry => {
            st.trace.push(TAction::TRetry);
            Err(StmSignal::Retry)
        }
        StmProgram::Throw(e) => {
            st.trace.push(TAction::TThrow);
            Err(StmSignal::Exception(e))
        }
        StmProgram::OrElse(a, b) => {
            st.trace.push(TAction::TOrElse);
            let snapshot = st.clone();
            match step(*a, ids, cells, st) {
                Ok(v) => Ok(v),
                Err(StmSignal::Exception(e)) => Err(StmSignal::Exception(e)),
                Err(StmSignal::Retry) => {
                    // Discard `a`'s tentative writes but keep its reads — they're
                    // already unioned in since `reads` only ever grows.
                    st.overlay = snapshot.overlay;
                    st.writes = snapshot.writes;
                    st.new_tvars = snapshot.new_tvars;
                    step(*b, ids, cells, st)
                }
            }
        }
        StmProgram::Catch(a, matches, handler) => {
            st.trace.push(TAction::TCatch);
            let snapshot = st.clone();
            match step(*a, ids, cells, st) {
                Ok(v) => Ok(v),
                Err(StmSignal::Retry) => Err(StmSignal::Retry),
                Err(StmSignal::Exception(exc)) => {
                    if matches(&exc) {
                        st.overlay = snapshot.overlay;
                        st.writes = snapshot.writes;
                        st.new_tvars = snapshot.new_tvars;
                        step(handler(exc), ids, cells, st)
                    } else {
                        Err(StmSignal::Exception(exc))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::prelude::*;

    #[test]
    fn read_then_write_tracks_both_sets() {
        let mut ids = IdSource::new();
        let mut cells = CellStore::new();
        let t = ids.next_tvar(None);
        cells.insert_tvar(t, Value::new(1i32));

        let prog = stm_read(t, move |v| {
            let n = v.downcast::<i32>().unwrap();
            stm_write(t, Value::new(n + 1), move |()| stm_return(Value::new(n)))
        });

        match run_stm(prog, &mut ids, &cells) {
            StmOutcome::Success { reads, writes, value, overlay, new_tvars, .. } => {
                assert_eq!(reads, BTreeSet::from([t]));
                assert_eq!(writes, BTreeSet::from([t]));
                assert_eq!(value.downcast::<i32>(), Some(1));
                commit_overlay(&mut cells, overlay, &new_tvars);
                assert_eq!(cells.tvars[&t].current_value.downcast::<i32>(), Some(2));
            }
            _ => panic!("expected Success"),
        }
    }

    #[test]
    fn retry_reports_its_read_set_and_touches_no_cell() {
        let mut ids = IdSource::new();
        let mut cells = CellStore::new();
        let t = ids.next_tvar(None);
        cells.insert_tvar(t, Value::new(false));

        let prog = stm_read(t, move |v| {
            if v.downcast::<bool>() == Some(true) {
                stm_return(v)
            } else {
                stm_retry()
            }
        });

        match run_stm(prog, &mut ids, &cells) {
            StmOutcome::Retry { reads, .. } => assert_eq!(reads, BTreeSet::from([t])),
            _ => panic!("expected Retry"),
        }
        assert_eq!(cells.tvars[&t].current_value.downcast::<bool>(), Some(false));
    }

    #[test]
    fn or_else_falls_through_on_retry_and_discards_first_branch_writes() {
        let mut ids = IdSource::new();
        let cells = CellStore::new();
        let t = ids.next_tvar(None);

        let prog = StmProgram::OrElse(
            Box::new(stm_write(t, Value::new(1i32), |()| stm_retry())),
            Box::new(stm_return(Value::new(99i32))),
        );

        match run_stm(prog, &mut ids, &cells) {
            StmOutcome::Success { value, overlay, .. } => {
                assert_eq!(value.downcast::<i32>(), Some(99));
                assert!(!overlay.contains_key(&t), "orElse's first-branch write must be discarded");
            }
            _ => panic!("expected Success"),
        }
    }

    #[test]
    fn catch_matches_by_dynamic_kind() {
        #[derive(Clone)]
        struct MyExc;

        let mut ids = IdSource::new();
        let cells = CellStore::new();

        let prog = StmProgram::Catch(
            Box::new(StmProgram::Throw(ModeledException::new(MyExc))),
            Box::new(|e: &ModeledException| e.is::<MyExc>()),
            Box::new(|_e| stm_return(Value::new(1i32))),
        );

        match run_stm(prog, &mut ids, &cells) {
            StmOutcome::Success { value, .. } => assert_eq!(value.downcast::<i32>(), Some(1)),
            _ => panic!("expected Success"),
        }
    }

    #[test]
    fn catch_does_not_intercept_retry() {
        let mut ids = IdSource::new();
        let cells = CellStore::new();

        let prog = StmProgram::Catch(
            Box::new(stm_retry()),
            Box::new(|_e: &ModeledException| true),
            Box::new(|_e| stm_return(Value::new(0i32))),
        );

        match run_stm(prog, &mut ids, &cells) {
            StmOutcome::Retry { .. } => {}
            _ => panic!("expected Retry to pass through catch untouched"),
        }
    }
}
