//! Hybrid logical clock.
//!
//! A monotonic, causality-preserving timestamp generator tolerant of bounded
//! clock skew. Shaped after `aura-core::time`'s explicit timestamp structs
//! (total order via derived `Ord`), but carrying only the single
//! `(physical, logical)` pair the spec calls for rather than the teacher's
//! multi-domain `TimeStamp` enum.

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// A hybrid logical clock timestamp: `(physicalMs, logical)`, totally ordered
/// lexicographically by the derived `Ord` impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hlc {
    pub physical_ms: u64,
    pub logical: u32,
}

impl Hlc {
    /// The identity timestamp.
    pub const fn zero() -> Self {
        Self {
            physical_ms: 0,
            logical: 0,
        }
    }
}

impl Default for Hlc {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Hlc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.physical_ms, self.logical)
    }
}

/// Persisted state behind a [`HybridLogicalClock`]: the last timestamp it
/// emitted. Saved by a `LocalNodeRepository` so the clock survives restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClockState {
    pub last_physical_ms: u64,
    pub last_logical: u32,
}

/// Default bound on tolerated clock skew between nodes, in milliseconds.
pub const DEFAULT_MAX_SKEW_MS: u64 = 60_000;

/// Stateful hybrid logical clock. See spec §4.1.
#[derive(Debug, Clone)]
pub struct HybridLogicalClock {
    last_physical_ms: u64,
    last_logical: u32,
    max_skew_ms: u64,
}

impl HybridLogicalClock {
    /// Construct a clock from persisted state.
    pub fn new(state: ClockState, max_skew_ms: u64) -> Self {
        Self {
            last_physical_ms: state.last_physical_ms,
            last_logical: state.last_logical,
            max_skew_ms,
        }
    }

    /// Construct a fresh clock at the identity timestamp.
    pub fn fresh(max_skew_ms: u64) -> Self {
        Self::new(ClockState::default(), max_skew_ms)
    }

    /// Snapshot the clock's persistable state.
    pub fn state(&self) -> ClockState {
        ClockState {
            last_physical_ms: self.last_physical_ms,
            last_logical: self.last_logical,
        }
    }

    /// Generate the next timestamp given the current wall-clock reading.
    ///
    /// `p = max(wall, lastPhysical)`. If `p == lastPhysical`, the logical
    /// counter advances; otherwise it resets to zero.
    pub fn now(&mut self, wall_ms: u64) -> Hlc {
        let p = wall_ms.max(self.last_physical_ms);
        let logical = if p == self.last_physical_ms {
            self.last_logical + 1
        } else {
            0
        };
        self.last_physical_ms = p;
        self.last_logical = logical;
        Hlc {
            physical_ms: p,
            logical,
        }
    }

    /// Merge a remote timestamp into the clock, producing a timestamp that
    /// causally follows both the local clock and `remote`.
    ///
    /// Rejects the merge with [`SyncError`] if `remote`'s physical time is
    /// further ahead of the local wall clock than `max_skew_ms` tolerates;
    /// in that case the clock is left unchanged.
    pub fn merge(&mut self, remote: Hlc, wall_ms: u64) -> Result<Hlc, SyncError> {
        if remote.physical_ms.saturating_sub(wall_ms) > self.max_skew_ms {
            return Err(SyncError::protocol_error(format!(
                "remote clock {} exceeds max skew {}ms over local wall clock {}ms",
                remote, self.max_skew_ms, wall_ms
            ))
            .with_type(crate::errors::SyncErrorType::ClockSkewExceeded));
        }

        let p = wall_ms.max(self.last_physical_ms).max(remote.physical_ms);
        let logical = match (
            p == self.last_physical_ms,
            p == remote.physical_ms,
        ) {
            (true, true) => self.last_logical.max(remote.logical) + 1,
            (true, false) => self.last_logical + 1,
            (false, true) => remote.logical + 1,
            (false, false) => 0,
        };

        self.last_physical_ms = p;
        self.last_logical = logical;
        Ok(Hlc {
            physical_ms: p,
            logical,
        })
    }
}
