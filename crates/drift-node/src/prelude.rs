//! Convenience re-exports, matching `drift_core::prelude`'s convention.

pub use crate::cache::IdentityCachedChannelRepository;
pub use crate::coordinator::{AppendError, Coordinator, RunningTasks};
pub use crate::in_memory_repository::{InMemoryChannelRepository, InMemoryLocalNodeRepository, InMemoryPeerRepository};
pub use crate::repository::{ChannelRepository, LocalNodeRepository, PeerRepository};
