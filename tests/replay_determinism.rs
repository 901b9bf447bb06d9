//! Property: replaying the exact scheduling prefix a run recorded reproduces that run's
//! trace byte-for-byte (`SPEC_FULL.md` §8 invariant 6). Styled after the pack's
//! `proptest!`-block test files (e.g. `aptos-core`'s `transaction_shuffler` test suites).

use detconc::config::RunConfig;
use detconc::id::IORefId;
use detconc::program::prelude::*;
use detconc::program::Program;
use detconc::scheduler::{RoundRobinScheduler, ReplayScheduler};
use detconc::trace::{Decision, ScheduledId, Trace};
use detconc::value::Value;
use proptest::prelude::*;

fn chosen_ids(trace: &Trace) -> Vec<ScheduledId> {
    let mut out = Vec::with_capacity(trace.len());
    let mut current = None;
    for entry in trace {
        current = Some(match entry.decision {
            Decision::Start(id) | Decision::SwitchTo(id) => id,
            Decision::Continue => current.expect("Continue cannot be the first decision"),
        });
        out.push(current.unwrap());
    }
    out
}

/// `n` threads each write their own index into a shared `IORef`, then the first thread
/// reads it back — racy enough that the round-robin scheduler's choices actually matter,
/// small enough to keep the property test fast.
fn racing_writers(n: u32) -> Program {
    fn new_io_ref(v: Value, k: impl FnOnce(IORefId) -> Program + Send + 'static) -> Program {
        Program::NewIORef(v, Box::new(k))
    }
    fn write_io_ref(id: IORefId, v: Value, k: impl FnOnce(()) -> Program + Send + 'static) -> Program {
        Program::WriteIORef(id, v, Box::new(k))
    }
    fn read_io_ref(id: IORefId, k: impl FnOnce(Value) -> Program + Send + 'static) -> Program {
        Program::ReadIORef(id, Box::new(k))
    }

    fn spawn_chain(id: IORefId, remaining: u32) -> Program {
        if remaining == 0 {
            read_io_ref(id, done)
        } else {
            fork(write_io_ref(id, Value::new(remaining), |()| done(Value::new(()))), move |_child| {
                spawn_chain(id, remaining - 1)
            })
        }
    }

    new_io_ref(Value::new(0i32), move |id| spawn_chain(id, n))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn replaying_the_recorded_prefix_reproduces_the_same_trace(n in 1u32..5) {
        let mut live = RoundRobinScheduler;
        let first = detconc::run(racing_writers(n), RunConfig::new(), &mut live);

        let prefix = chosen_ids(&first.trace);
        let mut replay = ReplayScheduler::new(prefix);
        let second = detconc::run(racing_writers(n), RunConfig::new(), &mut replay);

        prop_assert_eq!(first.trace, second.trace);
        prop_assert_eq!(
            first.result.map(|v| v.downcast::<i32>()),
            second.result.map(|v| v.downcast::<i32>())
        );
    }
}
