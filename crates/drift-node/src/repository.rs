//! Repository capability traits: the externally-supplied persistence
//! surfaces the Coordinator is built on (spec §5). Grounded on the teacher's
//! `*Effects` capability-trait convention
//! (`aura-core/src/effects/{storage,journal}.rs`) — narrow async traits
//! returning `Result<_, DomainError>`, since a repository failure (a missing
//! channel, a duplicate member) is a programming-invariant violation, not a
//! recoverable sync error.
//!
//! Entry storage itself reuses [`drift_store::EntryStore`] directly rather
//! than redeclaring an `EntryRepository` trait with the same shape — see
//! DESIGN.md.

use async_trait::async_trait;

use drift_core::hlc::ClockState;
use drift_core::{ChannelId, DomainError, NodeId, StreamId};

/// Persists the local node's identity, hybrid-logical-clock state, and SWIM
/// incarnation number across restarts.
#[async_trait]
pub trait LocalNodeRepository: Send + Sync {
    async fn local_node_id(&self) -> Result<NodeId, DomainError>;
    async fn load_clock_state(&self) -> Result<ClockState, DomainError>;
    async fn save_clock_state(&self, state: ClockState) -> Result<(), DomainError>;

    /// The local node's last-persisted SWIM incarnation number, `0` if never
    /// saved. Loaded once at `Coordinator` construction so a restart doesn't
    /// forget a refutation peers have already observed.
    async fn load_incarnation(&self) -> Result<u64, DomainError>;
    async fn save_incarnation(&self, incarnation: u64) -> Result<(), DomainError>;
}

/// Tracks the set of peers this node gossips and probes with.
#[async_trait]
pub trait PeerRepository: Send + Sync {
    /// Add `peer`. Idempotent: adding an already-known peer is a no-op.
    /// Errors if `peer` is the local node itself.
    async fn add_peer(&self, peer: NodeId) -> Result<(), DomainError>;

    async fn remove_peer(&self, peer: &NodeId) -> Result<(), DomainError>;

    async fn peers(&self) -> Result<Vec<NodeId>, DomainError>;

    async fn contains(&self, peer: &NodeId) -> Result<bool, DomainError>;
}

/// Tracks channels, their membership, and their streams.
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn create_channel(&self, channel: ChannelId) -> Result<(), DomainError>;

    async fn delete_channel(&self, channel: &ChannelId) -> Result<(), DomainError>;

    async fn channels(&self) -> Result<Vec<ChannelId>, DomainError>;

    async fn add_member(&self, channel: &ChannelId, member: NodeId) -> Result<(), DomainError>;

    async fn remove_member(&self, channel: &ChannelId, member: &NodeId) -> Result<(), DomainError>;

    async fn members(&self, channel: &ChannelId) -> Result<Vec<NodeId>, DomainError>;

    async fn is_member(&self, channel: &ChannelId, node: &NodeId) -> Result<bool, DomainError>;

    async fn create_stream(&self, channel: &ChannelId, stream: StreamId) -> Result<(), DomainError>;

    async fn streams(&self, channel: &ChannelId) -> Result<Vec<StreamId>, DomainError>;
}
