//! In-memory reference implementations of the repository traits.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use drift_core::hlc::ClockState;
use drift_core::{ChannelId, DomainError, NodeId, StreamId};

use crate::repository::{ChannelRepository, LocalNodeRepository, PeerRepository};

/// Holds the local node's id, persisted clock state, and persisted
/// incarnation number in memory.
#[derive(Debug)]
pub struct InMemoryLocalNodeRepository {
    node_id: NodeId,
    clock_state: RwLock<ClockState>,
    incarnation: AtomicU64,
}

impl InMemoryLocalNodeRepository {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            clock_state: RwLock::new(ClockState::default()),
            incarnation: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl LocalNodeRepository for InMemoryLocalNodeRepository {
    async fn local_node_id(&self) -> Result<NodeId, DomainError> {
        Ok(self.node_id.clone())
    }

    async fn load_clock_state(&self) -> Result<ClockState, DomainError> {
        Ok(*self.clock_state.read())
    }

    async fn save_clock_state(&self, state: ClockState) -> Result<(), DomainError> {
        *self.clock_state.write() = state;
        Ok(())
    }

    async fn load_incarnation(&self) -> Result<u64, DomainError> {
        Ok(self.incarnation.load(Ordering::SeqCst))
    }

    async fn save_incarnation(&self, incarnation: u64) -> Result<(), DomainError> {
        self.incarnation.store(incarnation, Ordering::SeqCst);
        Ok(())
    }
}

/// Tracks peers in a `BTreeSet`, rejecting the local node as its own peer.
#[derive(Debug)]
pub struct InMemoryPeerRepository {
    local: NodeId,
    peers: RwLock<BTreeSet<NodeId>>,
}

impl InMemoryPeerRepository {
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            peers: RwLock::new(BTreeSet::new()),
        }
    }
}

#[async_trait]
impl PeerRepository for InMemoryPeerRepository {
    async fn add_peer(&self, peer: NodeId) -> Result<(), DomainError> {
        if peer == self.local {
            return Err(DomainError::CannotAddSelfAsPeer(peer));
        }
        self.peers.write().insert(peer);
        Ok(())
    }

    async fn remove_peer(&self, peer: &NodeId) -> Result<(), DomainError> {
        if self.peers.write().remove(peer) {
            Ok(())
        } else {
            Err(DomainError::PeerNotFound(peer.clone()))
        }
    }

    async fn peers(&self) -> Result<Vec<NodeId>, DomainError> {
        Ok(self.peers.read().iter().cloned().collect())
    }

    async fn contains(&self, peer: &NodeId) -> Result<bool, DomainError> {
        Ok(self.peers.read().contains(peer))
    }
}

#[derive(Debug, Default)]
struct ChannelData {
    members: BTreeSet<NodeId>,
    streams: BTreeSet<StreamId>,
}

/// Tracks channels, membership, and streams in memory.
#[derive(Debug, Default)]
pub struct InMemoryChannelRepository {
    channels: RwLock<HashMap<ChannelId, ChannelData>>,
}

impl InMemoryChannelRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelRepository for InMemoryChannelRepository {
    async fn create_channel(&self, channel: ChannelId) -> Result<(), DomainError> {
        self.channels.write().entry(channel).or_default();
        Ok(())
    }

    async fn delete_channel(&self, channel: &ChannelId) -> Result<(), DomainError> {
        self.channels
            .write()
            .remove(channel)
            .map(|_| ())
            .ok_or_else(|| DomainError::ChannelNotFound(channel.clone()))
    }

    async fn channels(&self) -> Result<Vec<ChannelId>, DomainError> {
        Ok(self.channels.read().keys().cloned().collect())
    }

    async fn add_member(&self, channel: &ChannelId, member: NodeId) -> Result<(), DomainError> {
        let mut channels = self.channels.write();
        let data = channels
            .get_mut(channel)
            .ok_or_else(|| DomainError::ChannelNotFound(channel.clone()))?;
        if !data.members.insert(member.clone()) {
            return Err(DomainError::DuplicateMember(channel.clone(), member));
        }
        Ok(())
    }

    async fn remove_member(&self, channel: &ChannelId, member: &NodeId) -> Result<(), DomainError> {
        let mut channels = self.channels.write();
        let data = channels
            .get_mut(channel)
            .ok_or_else(|| DomainError::ChannelNotFound(channel.clone()))?;
        if data.members.remove(member) {
            Ok(())
        } else {
            Err(DomainError::MemberNotFound(channel.clone(), member.clone()))
        }
    }

    async fn members(&self, channel: &ChannelId) -> Result<Vec<NodeId>, DomainError> {
        self.channels
            .read()
            .get(channel)
            .map(|data| data.members.iter().cloned().collect())
            .ok_or_else(|| DomainError::ChannelNotFound(channel.clone()))
    }

    async fn is_member(&self, channel: &ChannelId, node: &NodeId) -> Result<bool, DomainError> {
        self.channels
            .read()
            .get(channel)
            .map(|data| data.members.contains(node))
            .ok_or_else(|| DomainError::ChannelNotFound(channel.clone()))
    }

    async fn create_stream(&self, channel: &ChannelId, stream: StreamId) -> Result<(), DomainError> {
        let mut channels = self.channels.write();
        let data = channels
            .get_mut(channel)
            .ok_or_else(|| DomainError::ChannelNotFound(channel.clone()))?;
        data.streams.insert(stream);
        Ok(())
    }

    async fn streams(&self, channel: &ChannelId) -> Result<Vec<StreamId>, DomainError> {
        self.channels
            .read()
            .get(channel)
            .map(|data| data.streams.iter().cloned().collect())
            .ok_or_else(|| DomainError::ChannelNotFound(channel.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: &str) -> NodeId {
        NodeId::new(n).unwrap()
    }
    fn channel(n: &str) -> ChannelId {
        ChannelId::new(n).unwrap()
    }

    #[tokio::test]
    async fn peer_repository_rejects_self_as_peer() {
        let repo = InMemoryPeerRepository::new(node("local"));
        assert!(matches!(
            repo.add_peer(node("local")).await,
            Err(DomainError::CannotAddSelfAsPeer(_))
        ));
    }

    #[tokio::test]
    async fn removing_an_unknown_peer_errors() {
        let repo = InMemoryPeerRepository::new(node("local"));
        assert!(matches!(repo.remove_peer(&node("ghost")).await, Err(DomainError::PeerNotFound(_))));
    }

    #[tokio::test]
    async fn channel_repository_rejects_duplicate_members_and_unknown_channels() {
        let repo = InMemoryChannelRepository::new();
        repo.create_channel(channel("c")).await.unwrap();
        repo.add_member(&channel("c"), node("alice")).await.unwrap();
        assert!(matches!(
            repo.add_member(&channel("c"), node("alice")).await,
            Err(DomainError::DuplicateMember(_, _))
        ));
        assert!(matches!(
            repo.add_member(&channel("ghost"), node("bob")).await,
            Err(DomainError::ChannelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn streams_are_scoped_to_their_channel() {
        let repo = InMemoryChannelRepository::new();
        repo.create_channel(channel("c")).await.unwrap();
        repo.create_stream(&channel("c"), StreamId::new("s").unwrap()).await.unwrap();
        assert_eq!(repo.streams(&channel("c")).await.unwrap(), vec![StreamId::new("s").unwrap()]);
    }
}
