//! Run/search configuration. Builder-style rather than positional arguments or bare
//! struct literals at call sites, matching the teacher's `TracingConfig` convention
//! (`core/src/tracing_logging/tracing_config.rs`).

use crate::error::EngineError;

/// Relaxed-memory model the write buffer (`crate::write_buffer`) simulates.
/// `SPEC_FULL.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display, strum_macros::EnumIter, serde::Serialize, serde::Deserialize)]
pub enum MemType {
    #[default]
    SequentialConsistency,
    TotalStoreOrder,
    PartialStoreOrder,
}

/// Ceiling the BPOR search enforces on some schedule statistic. Only pre-emption
/// counting is implemented, matching `SPEC_FULL.md` §4.8; `Unbounded` is provided for
/// exhaustively searching small programs where no artificial cutoff is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    PreEmptions(usize),
    Unbounded,
}

impl Bound {
    #[must_use]
    pub fn allows(self, preemptions: usize) -> bool {
        match self {
            Bound::PreEmptions(limit) => preemptions <= limit,
            Bound::Unbounded => true,
        }
    }
}

/// Configuration for a single `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub mem_type: MemType,
    pub capabilities: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig { mem_type: MemType::default(), capabilities: 2 }
    }
}

impl RunConfig {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn mem_type(mut self, mem_type: MemType) -> Self {
        self.mem_type = mem_type;
        self
    }

    /// # Errors
    /// Returns [`EngineError::ZeroCapabilities`] if `n == 0`.
    pub fn capabilities(mut self, n: usize) -> Result<Self, EngineError> {
        if n == 0 {
            return Err(EngineError::ZeroCapabilities(n));
        }
        self.capabilities = n;
        Ok(self)
    }
}

/// Configuration for a `search` sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    pub run: RunConfig,
    pub bound: Bound,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig { run: RunConfig::default(), bound: Bound::PreEmptions(2) }
    }
}

impl SearchConfig {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn run(mut self, run: RunConfig) -> Self {
        self.run = run;
        self
    }

    #[must_use]
    pub fn bound(mut self, bound: Bound) -> Self {
        self.bound = bound;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capabilities_is_rejected() {
        assert!(matches!(RunConfig::new().capabilities(0), Err(EngineError::ZeroCapabilities(0))));
    }

    #[test]
    fn bound_allows_within_limit_only() {
        let b = Bound::PreEmptions(1);
        assert!(b.allows(0));
        assert!(b.allows(1));
        assert!(!b.allows(2));
        assert!(Bound::Unbounded.allows(1_000_000));
    }

    #[test]
    fn every_mem_type_round_trips_through_display() {
        use strum::IntoEnumIterator;
        for mem_type in MemType::iter() {
            assert!(!mem_type.to_string().is_empty());
        }
    }
}
