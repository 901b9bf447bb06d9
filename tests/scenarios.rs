//! End-to-end scenarios against the public API, one per concrete example in
//! `SPEC_FULL.md` §8. Placed under `tests/` per the teacher's convention
//! (`r3bl-open-core`'s crates each carry a top-level `tests/` directory
//! alongside their `#[cfg(test)]` unit tests).

use std::collections::BTreeSet;

use detconc::config::{Bound, MemType, RunConfig, SearchConfig};
use detconc::id::{MVarId, TVarId};
use detconc::program::prelude::*;
use detconc::program::{Handler, Program, StmProgram};
use detconc::trace::{MaskMode, ThreadAction};
use detconc::value::{ModeledException, Value};
use detconc::{run, search, Failure};
use pretty_assertions::assert_eq;
use test_case::test_case;

/// (a) `fork (put m 1); take m` under SC: exactly one result, `1`, on every schedule.
#[test]
fn fork_put_then_take_always_yields_the_put_value() {
    fn program() -> Program {
        new_mvar_empty(|m| {
            fork(put_mvar(m, Value::new(1i32), |()| done(Value::new(()))), move |_child| {
                take_mvar(m, |v| done(v))
            })
        })
    }

    let config = SearchConfig::new().bound(Bound::PreEmptions(2));
    let results = search(program, config);

    assert!(!results.is_empty());
    for outcome in &results {
        let v = outcome.result.as_ref().unwrap_or_else(|e| panic!("unexpected failure: {e}"));
        assert_eq!(v.downcast::<i32>(), Some(1));
    }
}

/// (b) Two forked puts racing a single take: every explored schedule resolves to
/// either `1` or `2`, and the bound-2 sweep sees both outcomes across its schedules.
#[test]
fn racing_puts_each_possible_value_is_observed_somewhere_in_the_sweep() {
    fn program() -> Program {
        new_mvar_empty(|m| {
            fork(put_mvar(m, Value::new(1i32), |()| done(Value::new(()))), move |_c1| {
                fork(put_mvar(m, Value::new(2i32), |()| done(Value::new(()))), move |_c2| {
                    take_mvar(m, |v| done(v))
                })
            })
        })
    }

    let config = SearchConfig::new().bound(Bound::PreEmptions(2));
    let results = search(program, config);

    let mut seen: BTreeSet<i32> = BTreeSet::new();
    for outcome in &results {
        let v = outcome.result.as_ref().unwrap_or_else(|e| panic!("unexpected failure: {e}"));
        seen.insert(v.downcast::<i32>().unwrap());
    }
    assert_eq!(seen, BTreeSet::from([1, 2]));
}

/// (c) `take` on a fresh, empty `MVar` with nothing else runnable deadlocks.
#[test_case(MemType::SequentialConsistency; "under sequential consistency")]
#[test_case(MemType::TotalStoreOrder; "under total store order")]
fn take_on_an_empty_mvar_with_no_other_thread_deadlocks(mem_type: MemType) {
    fn program() -> Program {
        new_mvar_empty(|m: MVarId| take_mvar(m, |v| done(v)))
    }

    let mut scheduler = detconc::scheduler::RoundRobinScheduler;
    let config = RunConfig::new().mem_type(mem_type);
    let outcome = run(program(), config, &mut scheduler);

    assert!(matches!(outcome.result, Err(Failure::Deadlock)));
}

/// (d) A reader blocks on `retry` until a writer commits the `TVar` it read, then the
/// retry is woken: the trace shows a `BlockedSTM` step followed by a successful `STM`
/// step naming the woken thread.
#[test]
fn stm_retry_is_woken_by_a_later_commit_to_the_same_tvar() {
    // new_tvar(0); fork(atomically(write t 1)); atomically(read t >>= \v -> if v == 0 then retry else return v)
    fn program() -> Program {
        Program::Atomically(
            Box::new(|| StmProgram::New(Value::new(0i32), Box::new(|t| StmProgram::Return(Value::new(t))))),
            Box::new(|v| {
                let t = v.downcast::<TVarId>().expect("TVar id");
                fork(
                    Program::Atomically(
                        Box::new(move || stm_write(t, Value::new(1i32), |()| StmProgram::Return(Value::new(())))),
                        Box::new(|()| Program::Done(Value::new(()))),
                    ),
                    move |_writer| {
                        Program::Atomically(
                            Box::new(move || {
                                stm_read(t, move |v| {
                                    if v.downcast::<i32>() == Some(0) {
                                        stm_retry()
                                    } else {
                                        StmProgram::Return(v)
                                    }
                                })
                            }),
                            Box::new(|v| done(v)),
                        )
                    },
                )
            }),
        )
    }

    let config = SearchConfig::new().bound(Bound::PreEmptions(2));
    let results = search(program, config);

    assert!(!results.is_empty());
    assert!(results.iter().all(|o| o.result.is_ok()));
    assert!(
        results.iter().any(|o| o.trace.iter().any(|e| matches!(e.action, ThreadAction::BlockedSTM(_)))),
        "expected at least one explored schedule to observe the reader retry before the writer commits"
    );
}

/// (e) `throwTo` aimed at a thread masked `MaskedUninterruptible` is deferred until
/// that thread unmasks; the trace records a `BlockedThrowTo` step, and the exception
/// only lands once the target has popped its mask.
#[test]
fn throw_to_a_masked_thread_is_deferred_until_it_unmasks() {
    #[derive(Clone)]
    struct Bonk;

    fn program() -> Program {
        fork(
            Program::Masking(
                MaskMode::MaskedUninterruptible,
                Box::new(|()| {
                    Program::Catching(
                        Handler {
                            matches: Box::new(|e: &ModeledException| e.is::<Bonk>()),
                            run: Box::new(|_e| Program::Done(Value::new("caught"))),
                        },
                        Box::new(|()| {
                            Program::Yield(Box::new(|()| {
                                Program::PopMasking(Box::new(|()| Program::Yield(Box::new(|()| Program::Done(Value::new("unreachable"))))))
                            }))
                        }),
                    )
                }),
            ),
            move |child| {
                Program::ThrowTo(child, ModeledException::new(Bonk), Box::new(|()| done(Value::new(()))))
            },
        )
    }

    let mut scheduler = detconc::scheduler::RoundRobinScheduler;
    let outcome = run(program(), RunConfig::new(), &mut scheduler);

    assert!(outcome.result.is_ok(), "unexpected failure: {:?}", outcome.result);
    assert!(
        outcome.trace.iter().any(|e| matches!(e.action, ThreadAction::BlockedThrowTo(_))),
        "expected the throwTo to be deferred while the target is uninterruptibly masked"
    );
}
