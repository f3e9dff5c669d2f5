//! The out-of-order buffer: holds entries that arrive ahead of a gap in
//! their author's contiguous sequence, until the gap fills or caps force an
//! eviction (spec §4.3).

use std::collections::HashMap;

use parking_lot::RwLock;

use drift_core::config::EngineConfig;
use drift_core::{ChannelId, LogEntryId, NodeId, StreamId};

use crate::entry::LogEntry;

/// What the caller should do with an entry just presented to the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// `sequence` is exactly the author's next expected sequence: commit it
    /// to the [`crate::EntryStore`] directly, bypassing the buffer.
    CommitDirect(LogEntry),
    /// `sequence` is at or below what is already committed: a duplicate,
    /// dropped silently.
    AlreadyCommitted,
    /// `sequence` is ahead of a gap; the entry now lives in the buffer.
    Buffered,
}

/// One eviction batch, reported so the caller can raise a
/// `BufferOverflowOccurred` event (spec §4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub channel: ChannelId,
    pub stream: StreamId,
    pub author: NodeId,
    pub count: usize,
}

type BufferKey = (ChannelId, StreamId, NodeId);

/// Per-author, per-(channel, stream) holding area for gapped entries.
///
/// Caps are enforced as a single node-wide budget: `max_per_author` bounds
/// each `(channel, stream, author)` bucket independently; `max_total` bounds
/// the sum across every bucket this instance holds.
#[derive(Debug)]
pub struct OutOfOrderBuffer {
    max_per_author: usize,
    max_total: usize,
    buckets: RwLock<HashMap<BufferKey, std::collections::BTreeMap<u64, LogEntry>>>,
    total: RwLock<usize>,
}

impl OutOfOrderBuffer {
    pub fn new(max_per_author: usize, max_total: usize) -> Self {
        Self {
            max_per_author,
            max_total,
            buckets: RwLock::new(HashMap::new()),
            total: RwLock::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_buffer_per_author, config.max_total_buffer)
    }

    /// Present `entry` to the buffer given `contiguous_next`, the author's
    /// current contiguous-prefix-plus-one (i.e. `version_vector.get(author)
    /// + 1`). Returns the admission decision plus any evictions the insert
    /// triggered.
    pub fn admit(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        entry: LogEntry,
        contiguous_next: u64,
    ) -> (Admission, Vec<Eviction>) {
        if entry.sequence < contiguous_next {
            return (Admission::AlreadyCommitted, Vec::new());
        }
        if entry.sequence == contiguous_next {
            return (Admission::CommitDirect(entry), Vec::new());
        }

        let key = (channel.clone(), stream.clone(), entry.author.clone());
        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(key.clone()).or_default();
        let is_new = bucket.insert(entry.sequence, entry).is_none();

        if !is_new {
            return (Admission::Buffered, Vec::new());
        }
        *self.total.write() += 1;

        let mut evictions = Vec::new();

        if bucket.len() > self.max_per_author {
            if let Some((_, _)) = bucket.pop_last() {
                *self.total.write() -= 1;
                evictions.push(Eviction {
                    channel: channel.clone(),
                    stream: stream.clone(),
                    author: key.2.clone(),
                    count: 1,
                });
            }
        }
        if bucket.is_empty() {
            buckets.remove(&key);
        }
        drop(buckets);

        evictions.extend(self.evict_to_total_cap());
        (Admission::Buffered, evictions)
    }

    fn evict_to_total_cap(&self) -> Vec<Eviction> {
        let mut evictions: HashMap<BufferKey, usize> = HashMap::new();
        loop {
            if *self.total.read() <= self.max_total {
                break;
            }
            let mut buckets = self.buckets.write();
            let Some((key, _)) = buckets.iter().max_by_key(|(_, b)| b.len()) else {
                break;
            };
            let key = key.clone();
            let bucket = buckets.get_mut(&key).expect("key just observed");
            bucket.pop_first();
            let now_empty = bucket.is_empty();
            if now_empty {
                buckets.remove(&key);
            }
            drop(buckets);
            *self.total.write() -= 1;
            *evictions.entry(key).or_insert(0) += 1;
        }
        evictions
            .into_iter()
            .map(|((channel, stream, author), count)| Eviction { channel, stream, author, count })
            .collect()
    }

    /// Drain `author`'s contiguous run starting at `contiguous_next`,
    /// removing it from the buffer and returning it in ascending sequence
    /// order for the caller to append to the store.
    pub fn promote(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        author: &NodeId,
        mut contiguous_next: u64,
    ) -> Vec<LogEntry> {
        let key = (channel.clone(), stream.clone(), author.clone());
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.get_mut(&key) else {
            return Vec::new();
        };

        let mut drained = Vec::new();
        while let Some(entry) = bucket.remove(&contiguous_next) {
            drained.push(entry);
            contiguous_next += 1;
        }
        if bucket.is_empty() {
            buckets.remove(&key);
        }
        drop(buckets);
        if !drained.is_empty() {
            *self.total.write() -= drained.len();
        }
        drained
    }

    /// Number of entries currently buffered for `(channel, stream, author)`.
    pub fn buffered_count(&self, channel: &ChannelId, stream: &StreamId, author: &NodeId) -> usize {
        let key = (channel.clone(), stream.clone(), author.clone());
        self.buckets.read().get(&key).map(|b| b.len()).unwrap_or(0)
    }

    /// Total entries buffered across every stream and author.
    pub fn total_buffered(&self) -> usize {
        *self.total.read()
    }

    pub fn pending_ids(&self, channel: &ChannelId, stream: &StreamId, author: &NodeId) -> Vec<LogEntryId> {
        let key = (channel.clone(), stream.clone(), author.clone());
        self.buckets
            .read()
            .get(&key)
            .map(|b| b.values().map(LogEntry::id).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::Hlc;

    fn node(n: &str) -> NodeId {
        NodeId::new(n).unwrap()
    }
    fn channel() -> ChannelId {
        ChannelId::new("c").unwrap()
    }
    fn stream() -> StreamId {
        StreamId::new("s").unwrap()
    }
    fn entry(author: &str, seq: u64) -> LogEntry {
        LogEntry::new(node(author), seq, Hlc { physical_ms: seq * 10, logical: 0 }, vec![1])
    }

    #[test]
    fn contiguous_sequence_commits_directly() {
        let buf = OutOfOrderBuffer::new(10, 100);
        let (admission, evictions) = buf.admit(&channel(), &stream(), entry("alice", 1), 1);
        assert_eq!(admission, Admission::CommitDirect(entry("alice", 1)));
        assert!(evictions.is_empty());
    }

    #[test]
    fn stale_duplicate_is_dropped() {
        let buf = OutOfOrderBuffer::new(10, 100);
        let (admission, _) = buf.admit(&channel(), &stream(), entry("alice", 1), 3);
        assert_eq!(admission, Admission::AlreadyCommitted);
    }

    #[test]
    fn gap_is_buffered_then_promoted() {
        let buf = OutOfOrderBuffer::new(10, 100);
        let (admission, _) = buf.admit(&channel(), &stream(), entry("alice", 3), 1);
        assert_eq!(admission, Admission::Buffered);
        assert_eq!(buf.buffered_count(&channel(), &stream(), &node("alice")), 1);

        assert!(buf.promote(&channel(), &stream(), &node("alice"), 1).is_empty());

        let (admission, _) = buf.admit(&channel(), &stream(), entry("alice", 2), 2);
        assert_eq!(admission, Admission::CommitDirect(entry("alice", 2)));

        let drained = buf.promote(&channel(), &stream(), &node("alice"), 2);
        assert_eq!(drained.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(buf.total_buffered(), 0);
    }

    #[test]
    fn per_author_cap_evicts_largest_sequence() {
        let buf = OutOfOrderBuffer::new(2, 100);
        buf.admit(&channel(), &stream(), entry("alice", 5), 1);
        buf.admit(&channel(), &stream(), entry("alice", 4), 1);
        let (_, evictions) = buf.admit(&channel(), &stream(), entry("alice", 3), 1);
        assert_eq!(evictions.len(), 1);
        assert_eq!(evictions[0].count, 1);
        assert_eq!(buf.buffered_count(&channel(), &stream(), &node("alice")), 2);
        // The largest sequence (5) should have been evicted, keeping 3 and 4.
        let remaining = buf.promote(&channel(), &stream(), &node("alice"), 3);
        assert_eq!(remaining.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn total_cap_evicts_from_the_largest_bucket() {
        let buf = OutOfOrderBuffer::new(10, 3);
        buf.admit(&channel(), &stream(), entry("alice", 2), 1);
        buf.admit(&channel(), &stream(), entry("alice", 3), 1);
        buf.admit(&channel(), &stream(), entry("bob", 2), 1);
        assert_eq!(buf.total_buffered(), 3);
        let (_, evictions) = buf.admit(&channel(), &stream(), entry("alice", 4), 1);
        assert_eq!(buf.total_buffered(), 3);
        assert_eq!(evictions.iter().map(|e| e.author.clone()).collect::<Vec<_>>(), vec![node("alice")]);
    }
}
