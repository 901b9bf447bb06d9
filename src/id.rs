//! Monotonic identifier allocation for every kind of handle the engine hands out.
//!
//! See `SPEC_FULL.md` §4.1. The allocator lives inside [`crate::context::ExecutionContext`]
//! and is mutated through `&mut self`; because the context is never aliased (§5 of the
//! spec), this is observationally the same as threading an immutable `IdSource` through
//! every step by value, which is how the original design describes it.

use std::fmt;

macro_rules! def_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub(crate) u64);

        impl $name {
            #[must_use]
            pub fn index(self) -> u64 { self.0 }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "#{}"), self.0)
            }
        }
    };
}

def_id!(ThreadId, "Identifies a modeled thread of control.");
def_id!(MVarId, "Identifies a blocking one-place cell.");
def_id!(IORefId, "Identifies a non-blocking, optionally-buffered cell.");
def_id!(TVarId, "Identifies a transactional cell.");

/// The thread id the driver always starts an execution with.
pub const INITIAL_THREAD: ThreadId = ThreadId(0);

/// A label attached at creation time, carried purely for diagnostics/tracing — it plays
/// no role in equality or ordering.
pub type Label = Option<&'static str>;

/// Monotonic allocator for every identifier kind.
#[derive(Debug, Clone, Default)]
pub struct IdSource {
    next_thread: u64,
    next_mvar: u64,
    next_ioref: u64,
    next_tvar: u64,
}

impl IdSource {
    /// A fresh source whose first-allocated thread id is [`INITIAL_THREAD`].
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn next_thread(&mut self, label: Label) -> ThreadId {
        let id = ThreadId(self.next_thread);
        self.next_thread += 1;
        tracing::trace!(id = id.0, label, "allocated ThreadId");
        id
    }

    pub fn next_mvar(&mut self, label: Label) -> MVarId {
        let id = MVarId(self.next_mvar);
        self.next_mvar += 1;
        tracing::trace!(id = id.0, label, "allocated MVarId");
        id
    }

    pub fn next_ioref(&mut self, label: Label) -> IORefId {
        let id = IORefId(self.next_ioref);
        self.next_ioref += 1;
        tracing::trace!(id = id.0, label, "allocated IORefId");
        id
    }

    pub fn next_tvar(&mut self, label: Label) -> TVarId {
        let id = TVarId(self.next_tvar);
        self.next_tvar += 1;
        tracing::trace!(id = id.0, label, "allocated TVarId");
        id
    }
}
