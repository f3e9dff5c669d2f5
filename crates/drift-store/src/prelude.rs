//! Convenience re-exports, matching `drift_core::prelude`'s convention.

pub use crate::compaction::{CompactionPolicy, CompactionResult};
pub use crate::entry::{materialized_order, LogEntry};
pub use crate::entry_store::{AppendOutcome, EntryStore, InMemoryEntryStore};
pub use crate::out_of_order::{Admission, Eviction, OutOfOrderBuffer};
pub use crate::version_vector::VersionVector;
