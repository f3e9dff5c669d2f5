//! Log entries: the immutable unit of replication.

use serde::{Deserialize, Serialize};

use drift_core::{Hlc, LogEntryId, NodeId};

/// An immutable, opaque-payload log entry. See spec §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub author: NodeId,
    pub sequence: u64,
    pub timestamp: Hlc,
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn new(author: NodeId, sequence: u64, timestamp: Hlc, payload: Vec<u8>) -> Self {
        debug_assert!(sequence >= 1, "sequence numbers are 1-based");
        Self {
            author,
            sequence,
            timestamp,
            payload,
        }
    }

    pub fn id(&self) -> LogEntryId {
        LogEntryId::new(self.author.clone(), self.sequence)
    }

    /// Size used for byte-budget compaction (spec §9 Open Question): payload
    /// bytes only, not header/timestamp metadata. See DESIGN.md.
    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

/// Ordering used for a stream's materialized view: by timestamp, then
/// `(author, sequence)` as a tie-break (spec §3).
pub fn materialized_order(a: &LogEntry, b: &LogEntry) -> std::cmp::Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.author.cmp(&b.author))
        .then_with(|| a.sequence.cmp(&b.sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(author: &str, seq: u64, physical: u64) -> LogEntry {
        LogEntry::new(
            NodeId::new(author).unwrap(),
            seq,
            Hlc { physical_ms: physical, logical: 0 },
            b"payload".to_vec(),
        )
    }

    #[test]
    fn size_bytes_counts_payload_only() {
        let e = entry("alice", 1, 100);
        assert_eq!(e.size_bytes(), "payload".len());
    }

    #[test]
    fn materialized_order_breaks_ties_by_author_then_sequence() {
        let e1 = entry("alice", 2, 100);
        let e2 = entry("bob", 1, 100);
        assert_eq!(materialized_order(&e1, &e2), std::cmp::Ordering::Less);
    }
}
