//! Domain events published by the Coordinator.
//!
//! See spec §4.8. `DomainEvent` is a flat value-record enum (no back-reference
//! to the Coordinator) per the design note in spec §9: components never hold
//! a reference back to their owner, they only ever produce values.

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;
use crate::hlc::Hlc;
use crate::identifiers::{ChannelId, LogEntryId, NodeId, StreamId};

/// Peer liveness states tracked by the SWIM failure detector. Re-exported
/// here (rather than only in `drift-failure`) because `PeerStatusChanged`
/// needs to name it without creating a dependency cycle between
/// `drift-core` and `drift-failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Reachable,
    Suspected,
    Unreachable,
}

/// Events published on the Coordinator's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    PeerAdded { peer: NodeId },
    PeerRemoved { peer: NodeId },
    PeerStatusChanged {
        peer: NodeId,
        old: PeerStatus,
        new: PeerStatus,
        at_ms: u64,
    },
    PeerOperationSkipped { peer: NodeId, reason: String },

    ChannelCreated { channel: ChannelId },
    ChannelRemoved { channel: ChannelId },
    MemberAdded { channel: ChannelId, member: NodeId },
    MemberRemoved { channel: ChannelId, member: NodeId },
    StreamCreated { channel: ChannelId, stream: StreamId },

    EntryAppended {
        channel: ChannelId,
        stream: StreamId,
        entry: LogEntryId,
        timestamp: Hlc,
    },
    EntriesMerged {
        channel: ChannelId,
        stream: StreamId,
        entries: Vec<LogEntryId>,
        new_version: Vec<(NodeId, u64)>,
    },
    StreamCompacted {
        channel: ChannelId,
        stream: StreamId,
        removed_count: usize,
        kept_count: usize,
        freed_bytes: usize,
    },
    BufferOverflowOccurred {
        channel: ChannelId,
        stream: StreamId,
        author: NodeId,
        dropped_count: usize,
    },
    NonMemberEntriesRejected {
        channel: ChannelId,
        stream: StreamId,
        author: NodeId,
        count: usize,
    },

    SyncErrorOccurred { error: SyncError },
}
