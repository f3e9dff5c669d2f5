//! Identity-map cache for [`ChannelRepository`] (spec §9): wraps any backing
//! implementation so repeated reads of the same channel return a single
//! shared, mutable handle instead of a fresh copy deserialized on every call.
//!
//! Grounded on the teacher's `AntiEntropyHandler` shared-state pattern
//! (`oplog: Arc<RwLock<Vec<AttestedOp>>>`, `peers: Arc<RwLock<BTreeSet<Uuid>>>`):
//! the same "one `Arc<RwLock<_>>` per live aggregate" idea, here keyed by
//! channel id rather than held as a single flat field. `InMemoryChannelRepository`
//! doesn't need this (its `RwLock<HashMap<...>>` already gives every caller a
//! consistent view), but a repository backed by a database or file store that
//! deserializes a fresh `ChannelData` on every `members`/`streams` call would
//! otherwise let concurrent mutations silently clobber each other.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use drift_core::{ChannelId, DomainError, NodeId, StreamId};

use crate::repository::ChannelRepository;

#[derive(Debug, Default)]
struct ChannelSnapshot {
    members: BTreeSet<NodeId>,
    streams: BTreeSet<StreamId>,
}

/// Decorates an inner [`ChannelRepository`] with a per-channel identity map.
/// The first read or write of a channel hydrates (or creates) its cached
/// handle; every later call against that channel shares the same
/// `Arc<RwLock<ChannelSnapshot>>`, so mutations made through this wrapper are
/// always visible to the next read through it without round-tripping the
/// inner store.
pub struct IdentityCachedChannelRepository<R: ChannelRepository> {
    inner: R,
    cache: RwLock<HashMap<ChannelId, Arc<RwLock<ChannelSnapshot>>>>,
}

impl<R: ChannelRepository> IdentityCachedChannelRepository<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn handle_or_insert(&self, channel: &ChannelId) -> Arc<RwLock<ChannelSnapshot>> {
        self.cache
            .write()
            .entry(channel.clone())
            .or_insert_with(|| Arc::new(RwLock::new(ChannelSnapshot::default())))
            .clone()
    }

    fn evict(&self, channel: &ChannelId) {
        self.cache.write().remove(channel);
    }

    /// Return `channel`'s cached handle, hydrating it from `inner` on first
    /// touch. Propagates `ChannelNotFound` if the channel doesn't exist.
    async fn handle(&self, channel: &ChannelId) -> Result<Arc<RwLock<ChannelSnapshot>>, DomainError> {
        if let Some(handle) = self.cache.read().get(channel).cloned() {
            return Ok(handle);
        }
        let members = self.inner.members(channel).await?;
        let streams = self.inner.streams(channel).await?;
        let snapshot = ChannelSnapshot {
            members: members.into_iter().collect(),
            streams: streams.into_iter().collect(),
        };
        Ok(self
            .cache
            .write()
            .entry(channel.clone())
            .or_insert_with(|| Arc::new(RwLock::new(snapshot)))
            .clone())
    }
}

#[async_trait]
impl<R: ChannelRepository> ChannelRepository for IdentityCachedChannelRepository<R> {
    async fn create_channel(&self, channel: ChannelId) -> Result<(), DomainError> {
        self.inner.create_channel(channel.clone()).await?;
        self.handle_or_insert(&channel);
        Ok(())
    }

    async fn delete_channel(&self, channel: &ChannelId) -> Result<(), DomainError> {
        self.inner.delete_channel(channel).await?;
        self.evict(channel);
        Ok(())
    }

    async fn channels(&self) -> Result<Vec<ChannelId>, DomainError> {
        self.inner.channels().await
    }

    async fn add_member(&self, channel: &ChannelId, member: NodeId) -> Result<(), DomainError> {
        self.inner.add_member(channel, member.clone()).await?;
        self.handle_or_insert(channel).write().members.insert(member);
        Ok(())
    }

    async fn remove_member(&self, channel: &ChannelId, member: &NodeId) -> Result<(), DomainError> {
        self.inner.remove_member(channel, member).await?;
        if let Some(handle) = self.cache.read().get(channel).cloned() {
            handle.write().members.remove(member);
        }
        Ok(())
    }

    async fn members(&self, channel: &ChannelId) -> Result<Vec<NodeId>, DomainError> {
        let handle = self.handle(channel).await?;
        let members = handle.read().members.iter().cloned().collect();
        Ok(members)
    }

    async fn is_member(&self, channel: &ChannelId, node: &NodeId) -> Result<bool, DomainError> {
        let handle = self.handle(channel).await?;
        let is_member = handle.read().members.contains(node);
        Ok(is_member)
    }

    async fn create_stream(&self, channel: &ChannelId, stream: StreamId) -> Result<(), DomainError> {
        self.inner.create_stream(channel, stream.clone()).await?;
        self.handle_or_insert(channel).write().streams.insert(stream);
        Ok(())
    }

    async fn streams(&self, channel: &ChannelId) -> Result<Vec<StreamId>, DomainError> {
        let handle = self.handle(channel).await?;
        let streams = handle.read().streams.iter().cloned().collect();
        Ok(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory_repository::InMemoryChannelRepository;

    fn node(n: &str) -> NodeId {
        NodeId::new(n).unwrap()
    }
    fn channel(n: &str) -> ChannelId {
        ChannelId::new(n).unwrap()
    }

    #[tokio::test]
    async fn hydrates_from_the_inner_store_on_first_touch() {
        let inner = InMemoryChannelRepository::new();
        inner.create_channel(channel("c")).await.unwrap();
        inner.add_member(&channel("c"), node("alice")).await.unwrap();

        let cached = IdentityCachedChannelRepository::new(inner);
        assert_eq!(cached.members(&channel("c")).await.unwrap(), vec![node("alice")]);
    }

    #[tokio::test]
    async fn writes_through_this_wrapper_are_visible_without_touching_the_inner_store_again() {
        let cached = IdentityCachedChannelRepository::new(InMemoryChannelRepository::new());
        cached.create_channel(channel("c")).await.unwrap();
        cached.add_member(&channel("c"), node("bob")).await.unwrap();
        assert!(cached.is_member(&channel("c"), &node("bob")).await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_channel_evicts_its_cached_handle() {
        let cached = IdentityCachedChannelRepository::new(InMemoryChannelRepository::new());
        cached.create_channel(channel("c")).await.unwrap();
        cached.delete_channel(&channel("c")).await.unwrap();
        assert!(matches!(
            cached.members(&channel("c")).await,
            Err(DomainError::ChannelNotFound(_))
        ));
    }
}
