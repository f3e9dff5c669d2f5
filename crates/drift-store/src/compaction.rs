//! Stream retention policies (spec §4.9).
//!
//! Compaction never regresses a stream's version vector: an author whose
//! entries are removed gets a tombstone raised to their pre-compaction
//! high-water mark instead, so a peer that is still behind keeps being told
//! "you're missing up to N from them" even though the entries themselves are
//! gone. The actual tombstone bookkeeping lives in [`crate::EntryStore`]; this
//! module only decides which entries survive.

use crate::entry::LogEntry;

/// A retention rule evaluated against a stream's full, materialized-order
/// entry list.
#[derive(Debug, Clone)]
pub enum CompactionPolicy {
    /// Keep only the newest `n` entries (materialized order); drop the rest.
    KeepNewest(usize),
    /// Drop entries older than `max_age_ms` relative to the newest entry's
    /// physical timestamp.
    MaxAge { max_age_ms: u64 },
    /// Drop the oldest entries until the remaining payload bytes are at or
    /// under `max_bytes`.
    ByteBudget { max_bytes: usize },
}

impl CompactionPolicy {
    /// Split `entries` (assumed already in materialized order) into
    /// `(kept, removed)`.
    pub fn partition(&self, entries: &[LogEntry]) -> (Vec<LogEntry>, Vec<LogEntry>) {
        match self {
            Self::KeepNewest(n) => {
                if entries.len() <= *n {
                    return (entries.to_vec(), Vec::new());
                }
                let split_at = entries.len() - n;
                (entries[split_at..].to_vec(), entries[..split_at].to_vec())
            }
            Self::MaxAge { max_age_ms } => {
                let Some(newest) = entries.last().map(|e| e.timestamp.physical_ms) else {
                    return (Vec::new(), Vec::new());
                };
                let cutoff = newest.saturating_sub(*max_age_ms);
                let (removed, kept): (Vec<_>, Vec<_>) = entries
                    .iter()
                    .cloned()
                    .partition(|e| e.timestamp.physical_ms < cutoff);
                (kept, removed)
            }
            Self::ByteBudget { max_bytes } => {
                let total: usize = entries.iter().map(LogEntry::size_bytes).sum();
                if total <= *max_bytes {
                    return (entries.to_vec(), Vec::new());
                }
                let mut running = total;
                let mut split_at = 0;
                for entry in entries {
                    if running <= *max_bytes {
                        break;
                    }
                    running -= entry.size_bytes();
                    split_at += 1;
                }
                (entries[split_at..].to_vec(), entries[..split_at].to_vec())
            }
        }
    }
}

/// Result of applying a [`CompactionPolicy`] to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionResult {
    pub removed_count: usize,
    pub kept_count: usize,
    pub freed_bytes: usize,
}
