//! The `MessagePort` transport capability (spec §5).
//!
//! Grounded on `aura-core/src/effects/transport.rs::TransportEffects`
//! (`send`/`recv` async trait over an opaque byte payload); `connect`/
//! `disconnect` collapse into a single `close`, since this spec's transport
//! is presumed already connected once constructed.

use async_trait::async_trait;

use drift_core::{NodeId, SyncError, SyncErrorType};

/// A bidirectional byte-message channel to the rest of the cluster.
///
/// Implementations must preserve FIFO order of messages from any single
/// sender, though messages from different senders may interleave in
/// `recv`'s delivery order.
#[async_trait]
pub trait MessagePort: Send + Sync {
    async fn send(&self, target: &NodeId, message: Vec<u8>) -> Result<(), SyncError>;

    /// Await the next inbound message from any peer.
    async fn recv(&self) -> Result<(NodeId, Vec<u8>), SyncError>;

    async fn close(&self) -> Result<(), SyncError>;
}

#[async_trait]
impl<T: MessagePort + ?Sized> MessagePort for std::sync::Arc<T> {
    async fn send(&self, target: &NodeId, message: Vec<u8>) -> Result<(), SyncError> {
        (**self).send(target, message).await
    }

    async fn recv(&self) -> Result<(NodeId, Vec<u8>), SyncError> {
        (**self).recv().await
    }

    async fn close(&self) -> Result<(), SyncError> {
        (**self).close().await
    }
}

pub(crate) fn peer_unreachable(peer: &NodeId, cause: impl Into<String>) -> SyncError {
    SyncError::PeerSyncError {
        peer: peer.clone(),
        kind: SyncErrorType::PeerUnreachable,
        cause: cause.into(),
    }
}
