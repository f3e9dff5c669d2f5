//! The append-only entry store (spec §4.2).
//!
//! Grounded on the teacher's repository-trait convention — an `async_trait`
//! returning `Result<_, SyncError>`, the same shape as
//! `aura_core::effects::storage::StorageEffects` /
//! `aura_core::effects::journal::JournalEffects`. `InMemoryEntryStore` is the
//! reference implementation used by tests, examples, and as a ready-to-embed
//! default; a `Repository`-backed implementation can suspend on I/O behind
//! the same trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use drift_core::{ChannelId, LogEntryId, NodeId, StreamId, SyncError, SyncErrorType};

use crate::compaction::{CompactionPolicy, CompactionResult};
use crate::entry::{materialized_order, LogEntry};
use crate::version_vector::VersionVector;

/// Outcome of a single [`EntryStore::append`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The entry was newly inserted.
    Inserted,
    /// The `(author, sequence)` pair was already present; `append` is
    /// idempotent, so this is not an error.
    AlreadyPresent,
}

/// Per-(channel, stream) entry storage and version-vector tracking.
///
/// Implementors must uphold spec §3's density invariant for entries that
/// arrive through the normal commit path (the [`crate::OutOfOrderBuffer`]
/// is responsible for withholding gap-straddling entries before they ever
/// reach `append`); [`EntryStore::version_vector`] is nonetheless specified
/// gap-aware so the store degrades gracefully if that invariant is ever
/// violated directly.
#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn append(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        entry: LogEntry,
    ) -> Result<AppendOutcome, SyncError>;

    async fn append_all(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        entries: Vec<LogEntry>,
    ) -> Result<Vec<AppendOutcome>, SyncError> {
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            outcomes.push(self.append(channel, stream, entry).await?);
        }
        Ok(outcomes)
    }

    /// All entries with `sequence > version_vector[author]`, ordered by the
    /// stream's materialized order.
    async fn entries_since(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        version_vector: &VersionVector,
    ) -> Result<Vec<LogEntry>, SyncError>;

    /// The ordered subsequence of `author`'s entries with `sequence >
    /// after`.
    async fn entries_for_author_after(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        author: &NodeId,
        after: u64,
    ) -> Result<Vec<LogEntry>, SyncError>;

    /// `O(1)` lookup of the highest sequence number ever stored for
    /// `author` (not necessarily contiguous).
    async fn latest_sequence(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        author: &NodeId,
    ) -> Result<u64, SyncError>;

    /// A snapshot of the per-author contiguous-prefix version vector.
    async fn version_vector(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
    ) -> Result<VersionVector, SyncError>;

    async fn remove_entries(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        ids: &[LogEntryId],
    ) -> Result<(), SyncError>;

    async fn clear_stream(&self, channel: &ChannelId, stream: &StreamId) -> Result<(), SyncError>;

    async fn clear_channel(&self, channel: &ChannelId) -> Result<(), SyncError>;

    /// Every entry currently stored for `(channel, stream)`, in materialized
    /// order. Used by compaction's re-scan (spec §4.9).
    async fn all_entries(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
    ) -> Result<Vec<LogEntry>, SyncError>;

    /// Raise `author`'s tombstone floor: `version_vector` never reports a
    /// value below `floor` for this author again, even after their entries
    /// are compacted away (spec §4.9).
    async fn raise_tombstone_floor(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        author: &NodeId,
        floor: u64,
    ) -> Result<(), SyncError>;

    /// Apply a retention policy to a stream: remove selected entries, raise
    /// tombstones for any author whose live high-water mark would otherwise
    /// regress, and report what was freed. Default implementation built
    /// purely from the methods above.
    async fn compact(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        policy: &CompactionPolicy,
    ) -> Result<CompactionResult, SyncError> {
        let entries = self.all_entries(channel, stream).await?;
        let before_vv = self.version_vector(channel, stream).await?;

        let (kept, removed) = policy.partition(&entries);
        let freed_bytes = removed.iter().map(LogEntry::size_bytes).sum();
        let removed_ids: Vec<LogEntryId> = removed.iter().map(LogEntry::id).collect();

        if !removed_ids.is_empty() {
            self.remove_entries(channel, stream, &removed_ids).await?;
        }

        // Tombstone any author whose contiguous high-water mark would
        // otherwise regress because we removed part of their prefix.
        let mut floors: BTreeMap<NodeId, u64> = BTreeMap::new();
        for author in removed.iter().map(|e| &e.author) {
            floors.entry(author.clone()).or_insert_with(|| before_vv.get(author));
        }
        for (author, floor) in floors {
            self.raise_tombstone_floor(channel, stream, &author, floor)
                .await?;
        }

        Ok(CompactionResult {
            removed_count: removed.len(),
            kept_count: kept.len(),
            freed_bytes,
        })
    }
}

#[derive(Debug, Default)]
struct StreamData {
    materialized: Vec<LogEntry>,
    by_author: BTreeMap<NodeId, BTreeMap<u64, LogEntry>>,
    latest_sequence: BTreeMap<NodeId, u64>,
    tombstones: BTreeMap<NodeId, u64>,
}

impl StreamData {
    fn insert(&mut self, entry: LogEntry) -> AppendOutcome {
        let author_map = self.by_author.entry(entry.author.clone()).or_default();
        if author_map.contains_key(&entry.sequence) {
            return AppendOutcome::AlreadyPresent;
        }

        let pos = self
            .materialized
            .binary_search_by(|existing| materialized_order(existing, &entry))
            .unwrap_or_else(|insert_at| insert_at);
        self.materialized.insert(pos, entry.clone());

        let max_for_author = self.latest_sequence.entry(entry.author.clone()).or_insert(0);
        *max_for_author = (*max_for_author).max(entry.sequence);

        author_map.insert(entry.sequence, entry);
        AppendOutcome::Inserted
    }

    fn contiguous_prefix(&self, author: &NodeId) -> u64 {
        let Some(sequences) = self.by_author.get(author) else {
            return 0;
        };
        let mut expected = 1u64;
        while sequences.contains_key(&expected) {
            expected += 1;
        }
        expected - 1
    }

    fn version_vector(&self) -> VersionVector {
        let authors: std::collections::BTreeSet<&NodeId> = self
            .by_author
            .keys()
            .chain(self.tombstones.keys())
            .collect();
        authors
            .into_iter()
            .map(|author| {
                let value = self.contiguous_prefix(author).max(
                    self.tombstones.get(author).copied().unwrap_or(0),
                );
                (author.clone(), value)
            })
            .collect()
    }

    fn remove(&mut self, ids: &[LogEntryId]) {
        let ids: std::collections::HashSet<&LogEntryId> = ids.iter().collect();
        self.materialized.retain(|e| !ids.contains(&e.id()));
        for (author, sequences) in self.by_author.iter_mut() {
            sequences.retain(|&seq, _| !ids.contains(&LogEntryId::new(author.clone(), seq)));
        }
        self.by_author.retain(|_, seqs| !seqs.is_empty());

        self.latest_sequence = self
            .by_author
            .iter()
            .map(|(author, seqs)| (author.clone(), *seqs.keys().next_back().unwrap_or(&0)))
            .collect();
    }
}

/// In-memory reference implementation of [`EntryStore`].
#[derive(Debug, Default)]
pub struct InMemoryEntryStore {
    streams: RwLock<BTreeMap<(ChannelId, StreamId), StreamData>>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn append(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        entry: LogEntry,
    ) -> Result<AppendOutcome, SyncError> {
        let mut streams = self.streams.write();
        let data = streams.entry((channel.clone(), stream.clone())).or_default();
        let outcome = data.insert(entry);
        if outcome == AppendOutcome::Inserted {
            tracing::debug!(%channel, %stream, "entry appended to store");
        }
        Ok(outcome)
    }

    async fn entries_since(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        version_vector: &VersionVector,
    ) -> Result<Vec<LogEntry>, SyncError> {
        let streams = self.streams.read();
        let Some(data) = streams.get(&(channel.clone(), stream.clone())) else {
            return Ok(Vec::new());
        };
        let mut result: Vec<LogEntry> = data
            .by_author
            .iter()
            .flat_map(|(author, sequences)| {
                let since = version_vector.get(author);
                sequences
                    .range(since + 1..)
                    .map(|(_, entry)| entry.clone())
            })
            .collect();
        result.sort_by(materialized_order);
        Ok(result)
    }

    async fn entries_for_author_after(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        author: &NodeId,
        after: u64,
    ) -> Result<Vec<LogEntry>, SyncError> {
        let streams = self.streams.read();
        let Some(data) = streams.get(&(channel.clone(), stream.clone())) else {
            return Ok(Vec::new());
        };
        Ok(data
            .by_author
            .get(author)
            .map(|sequences| sequences.range(after + 1..).map(|(_, e)| e.clone()).collect())
            .unwrap_or_default())
    }

    async fn latest_sequence(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        author: &NodeId,
    ) -> Result<u64, SyncError> {
        let streams = self.streams.read();
        Ok(streams
            .get(&(channel.clone(), stream.clone()))
            .and_then(|data| data.latest_sequence.get(author).copied())
            .unwrap_or(0))
    }

    async fn version_vector(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
    ) -> Result<VersionVector, SyncError> {
        let streams = self.streams.read();
        Ok(streams
            .get(&(channel.clone(), stream.clone()))
            .map(StreamData::version_vector)
            .unwrap_or_default())
    }

    async fn remove_entries(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        ids: &[LogEntryId],
    ) -> Result<(), SyncError> {
        let mut streams = self.streams.write();
        if let Some(data) = streams.get_mut(&(channel.clone(), stream.clone())) {
            data.remove(ids);
        }
        Ok(())
    }

    async fn clear_stream(&self, channel: &ChannelId, stream: &StreamId) -> Result<(), SyncError> {
        self.streams.write().remove(&(channel.clone(), stream.clone()));
        Ok(())
    }

    async fn clear_channel(&self, channel: &ChannelId) -> Result<(), SyncError> {
        self.streams.write().retain(|(c, _), _| c != channel);
        Ok(())
    }

    async fn all_entries(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
    ) -> Result<Vec<LogEntry>, SyncError> {
        let streams = self.streams.read();
        Ok(streams
            .get(&(channel.clone(), stream.clone()))
            .map(|data| data.materialized.clone())
            .unwrap_or_default())
    }

    async fn raise_tombstone_floor(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        author: &NodeId,
        floor: u64,
    ) -> Result<(), SyncError> {
        let mut streams = self.streams.write();
        let data = streams.entry((channel.clone(), stream.clone())).or_default();
        let entry = data.tombstones.entry(author.clone()).or_insert(0);
        *entry = (*entry).max(floor);
        Ok(())
    }
}

/// Convert a storage-layer I/O failure into the spec's `StorageSyncError`.
pub fn storage_failure(cause: impl std::fmt::Display) -> SyncError {
    SyncError::StorageSyncError {
        kind: SyncErrorType::StorageFailure,
        cause: cause.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::Hlc;

    fn node(name: &str) -> NodeId {
        NodeId::new(name).unwrap()
    }
    fn channel() -> ChannelId {
        ChannelId::new("c").unwrap()
    }
    fn stream() -> StreamId {
        StreamId::new("s").unwrap()
    }
    fn entry(author: &str, seq: u64, ms: u64) -> LogEntry {
        LogEntry::new(node(author), seq, Hlc { physical_ms: ms, logical: 0 }, vec![1, 2, 3])
    }

    #[tokio::test]
    async fn append_is_idempotent() {
        let store = InMemoryEntryStore::new();
        let e = entry("alice", 1, 10);
        assert_eq!(
            store.append(&channel(), &stream(), e.clone()).await.unwrap(),
            AppendOutcome::Inserted
        );
        assert_eq!(
            store.append(&channel(), &stream(), e).await.unwrap(),
            AppendOutcome::AlreadyPresent
        );
        assert_eq!(store.all_entries(&channel(), &stream()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn version_vector_is_gap_aware() {
        let store = InMemoryEntryStore::new();
        for seq in [1, 2, 4] {
            store.append(&channel(), &stream(), entry("alice", seq, seq * 10)).await.unwrap();
        }
        let vv = store.version_vector(&channel(), &stream()).await.unwrap();
        assert_eq!(vv.get(&node("alice")), 2);
    }

    #[tokio::test]
    async fn latest_sequence_is_the_raw_maximum_not_the_contiguous_prefix() {
        let store = InMemoryEntryStore::new();
        for seq in [1, 2, 4] {
            store.append(&channel(), &stream(), entry("alice", seq, seq * 10)).await.unwrap();
        }
        assert_eq!(store.latest_sequence(&channel(), &stream(), &node("alice")).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn entries_since_respects_per_author_threshold() {
        let store = InMemoryEntryStore::new();
        for seq in 1..=3 {
            store.append(&channel(), &stream(), entry("alice", seq, seq * 10)).await.unwrap();
        }
        let mut vv = VersionVector::new();
        vv.update_if_greater(node("alice"), 1);
        let since = store.entries_since(&channel(), &stream(), &vv).await.unwrap();
        assert_eq!(since.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn compaction_tombstones_instead_of_regressing_version_vector() {
        let store = InMemoryEntryStore::new();
        for seq in 1..=5 {
            store.append(&channel(), &stream(), entry("alice", seq, seq * 10)).await.unwrap();
        }
        let policy = CompactionPolicy::KeepNewest(2);
        let result = store.compact(&channel(), &stream(), &policy).await.unwrap();
        assert_eq!(result.removed_count, 3);
        assert_eq!(result.kept_count, 2);

        let vv = store.version_vector(&channel(), &stream()).await.unwrap();
        assert_eq!(vv.get(&node("alice")), 5, "tombstone preserves pre-compaction high-water mark");
    }

    #[tokio::test]
    async fn clear_channel_removes_all_of_its_streams() {
        let store = InMemoryEntryStore::new();
        store.append(&channel(), &stream(), entry("alice", 1, 10)).await.unwrap();
        store.clear_channel(&channel()).await.unwrap();
        assert!(store.all_entries(&channel(), &stream()).await.unwrap().is_empty());
    }
}
