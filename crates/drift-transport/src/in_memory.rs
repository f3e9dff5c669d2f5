//! An in-process reference transport: every registered node shares one
//! `InMemoryNetwork`, and messages are delivered over unbounded `tokio`
//! channels. A test/example double, not a production transport — out of
//! scope per the spec's non-goals around real network plumbing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};

use drift_core::NodeId;
use drift_core::{SyncError, SyncErrorType};

use crate::message_port::{peer_unreachable, MessagePort};

type Envelope = (NodeId, Vec<u8>);

/// Shared registry of every node currently attached to this in-memory
/// network. Cloning an `InMemoryNetwork` handle shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNetwork {
    senders: Arc<RwLock<HashMap<NodeId, mpsc::UnboundedSender<Envelope>>>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `node` to the network, returning its `MessagePort`. Attaching
    /// the same id twice replaces the previous port's inbox.
    pub fn register(&self, node: NodeId) -> InMemoryMessagePort {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.write().insert(node.clone(), tx);
        InMemoryMessagePort {
            local: node,
            network: self.senders.clone(),
            receiver: Mutex::new(rx),
        }
    }
}

/// [`MessagePort`] backed by an [`InMemoryNetwork`].
#[derive(Debug)]
pub struct InMemoryMessagePort {
    local: NodeId,
    network: Arc<RwLock<HashMap<NodeId, mpsc::UnboundedSender<Envelope>>>>,
    receiver: Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

#[async_trait]
impl MessagePort for InMemoryMessagePort {
    async fn send(&self, target: &NodeId, message: Vec<u8>) -> Result<(), SyncError> {
        let sender = self
            .network
            .read()
            .get(target)
            .cloned()
            .ok_or_else(|| peer_unreachable(target, "peer not attached to this network"))?;
        sender
            .send((self.local.clone(), message))
            .map_err(|_| peer_unreachable(target, "peer's inbox was dropped"))
    }

    async fn recv(&self) -> Result<(NodeId, Vec<u8>), SyncError> {
        self.receiver
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| SyncError::protocol_error("message port closed").with_type(SyncErrorType::PeerUnreachable))
    }

    async fn close(&self) -> Result<(), SyncError> {
        self.network.write().remove(&self.local);
        Ok(())
    }
}
