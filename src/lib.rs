//! `detconc`: a deterministic, single-threaded-cooperative execution engine for modeled
//! concurrent programs, plus a bounded partial-order-reduction (BPOR) search driver that
//! exhaustively explores schedules within a pre-emption bound.
//!
//! A user program is built from [`program::Program`] nodes (continuation-passing style —
//! see [`program::prelude`] for the combinators this crate's own tests use) and handed to
//! either [`run`] for one deterministic execution, or [`search`] to sweep every schedule
//! the bound permits.
//!
//! ```
//! use detconc::config::RunConfig;
//! use detconc::program::prelude::*;
//! use detconc::scheduler::RoundRobinScheduler;
//! use detconc::value::Value;
//!
//! let program = new_mvar_empty(|m| {
//!     fork(put_mvar(m, Value::new(1i32), |()| done(Value::new(()))), move |_child| {
//!         take_mvar(m, |v| done(v))
//!     })
//! });
//!
//! let mut scheduler = RoundRobinScheduler;
//! let outcome = detconc::run(program, RunConfig::new(), &mut scheduler);
//! assert_eq!(outcome.result.unwrap().downcast::<i32>(), Some(1));
//! ```

pub mod cells;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod id;
pub mod program;
pub mod scheduler;
pub mod search;
pub mod stepper;
pub mod stm;
pub mod thread_table;
pub mod trace;
pub mod value;
pub mod write_buffer;

pub use config::{Bound, MemType, RunConfig, SearchConfig};
pub use driver::{run, RunOutcome};
pub use error::{EngineError, Failure};
pub use search::search;
