//! Error families for the Drift engine.
//!
//! Spec §7 calls for two families: [`DomainError`] for programming-invariant
//! violations that propagate to the caller of the operational API, and
//! [`SyncError`] for expected, recoverable failures surfaced as
//! `SyncErrorOccurred` events. Both follow the flat, message-carrying
//! `thiserror` style of `aura_core::errors::AuraError`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifiers::{ChannelId, NodeId, StreamId};

/// Programming-invariant violations: not recoverable, propagated directly to
/// the caller of the Coordinator's operational API.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DomainError {
    #[error("cannot add local node {0} as a peer of itself")]
    CannotAddSelfAsPeer(NodeId),

    #[error("peer {0} does not exist")]
    PeerNotFound(NodeId),

    #[error("channel {0} already has member {1}")]
    DuplicateMember(ChannelId, NodeId),

    #[error("channel {0} does not exist")]
    ChannelNotFound(ChannelId),

    #[error("channel {0} has no member {1}")]
    MemberNotFound(ChannelId, NodeId),

    #[error("stream {1} does not exist in channel {0}")]
    StreamNotFound(ChannelId, StreamId),
}

/// The kind of an expected, recoverable synchronization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncErrorType {
    PeerUnreachable,
    PeerTimeout,
    MessageCorrupted,
    MessageTooLarge,
    VersionMismatch,
    StorageFailure,
    StorageFull,
    TransformFailure,
    ProtocolError,
    BufferOverflow,
    NotAMember,
    ClockSkewExceeded,
}

impl std::fmt::Display for SyncErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PeerUnreachable => "peer_unreachable",
            Self::PeerTimeout => "peer_timeout",
            Self::MessageCorrupted => "message_corrupted",
            Self::MessageTooLarge => "message_too_large",
            Self::VersionMismatch => "version_mismatch",
            Self::StorageFailure => "storage_failure",
            Self::StorageFull => "storage_full",
            Self::TransformFailure => "transform_failure",
            Self::ProtocolError => "protocol_error",
            Self::BufferOverflow => "buffer_overflow",
            Self::NotAMember => "not_a_member",
            Self::ClockSkewExceeded => "clock_skew_exceeded",
        };
        f.write_str(s)
    }
}

/// Expected, recoverable synchronization failure. Surfaced to applications as
/// a `SyncErrorOccurred` domain event rather than returned from the
/// operational API (see spec §7).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum SyncError {
    #[error("peer sync error ({kind}) with {peer}: {cause}")]
    PeerSyncError {
        peer: NodeId,
        kind: SyncErrorType,
        cause: String,
    },

    #[error("channel sync error ({kind}) in {channel}: {cause}")]
    ChannelSyncError {
        channel: ChannelId,
        kind: SyncErrorType,
        cause: String,
    },

    #[error("storage sync error ({kind}): {cause}")]
    StorageSyncError { kind: SyncErrorType, cause: String },

    #[error("transform sync error ({kind}){}: {cause}", channel.as_ref().map(|c| format!(" in {c}")).unwrap_or_default())]
    TransformSyncError {
        channel: Option<ChannelId>,
        kind: SyncErrorType,
        cause: String,
    },

    #[error("buffer overflow in {channel}/{stream} for author {author}: {size} buffered")]
    BufferOverflowError {
        channel: ChannelId,
        stream: StreamId,
        author: NodeId,
        size: usize,
    },
}

impl SyncError {
    /// Construct a channel-less `TransformSyncError` carrying only a message
    /// and defaulting to [`SyncErrorType::ProtocolError`]; used by pure-logic
    /// call sites (e.g. HLC merge) with no channel/peer context of their own.
    /// Call [`Self::with_type`] to sharpen the kind.
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::TransformSyncError {
            channel: None,
            kind: SyncErrorType::ProtocolError,
            cause: message.into(),
        }
    }

    /// Re-tag this error's [`SyncErrorType`] without touching its message or
    /// channel/peer context.
    pub fn with_type(mut self, kind: SyncErrorType) -> Self {
        match &mut self {
            Self::PeerSyncError { kind: k, .. }
            | Self::ChannelSyncError { kind: k, .. }
            | Self::StorageSyncError { kind: k, .. }
            | Self::TransformSyncError { kind: k, .. } => *k = kind,
            Self::BufferOverflowError { .. } => {}
        }
        self
    }

    /// The [`SyncErrorType`] this error carries.
    pub fn error_type(&self) -> SyncErrorType {
        match self {
            Self::PeerSyncError { kind, .. } => *kind,
            Self::ChannelSyncError { kind, .. } => *kind,
            Self::StorageSyncError { kind, .. } => *kind,
            Self::TransformSyncError { kind, .. } => *kind,
            Self::BufferOverflowError { .. } => SyncErrorType::BufferOverflow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_defaults_and_retags() {
        let err = SyncError::protocol_error("boom");
        assert_eq!(err.error_type(), SyncErrorType::ProtocolError);
        let retagged = err.with_type(SyncErrorType::ClockSkewExceeded);
        assert_eq!(retagged.error_type(), SyncErrorType::ClockSkewExceeded);
    }

    #[test]
    fn buffer_overflow_error_always_reports_its_kind() {
        let err = SyncError::BufferOverflowError {
            channel: ChannelId::new("c").unwrap(),
            stream: StreamId::new("s").unwrap(),
            author: NodeId::new("a").unwrap(),
            size: 42,
        };
        assert_eq!(err.error_type(), SyncErrorType::BufferOverflow);
    }
}
