//! # Drift Node - Layer 5: repositories, the Coordinator, the operational API
//!
//! Composes every other crate in the workspace into the Coordinator: the
//! single-threaded cooperative owner of all components, exposing the
//! engine's public operational API (spec §4.8) and publishing a domain-event
//! stream.

#![forbid(unsafe_code)]

pub mod cache;
pub mod coordinator;
pub mod in_memory_repository;
pub mod prelude;
pub mod repository;

pub use cache::IdentityCachedChannelRepository;
pub use coordinator::{AppendError, Coordinator, RunningTasks};
pub use in_memory_repository::{InMemoryChannelRepository, InMemoryLocalNodeRepository, InMemoryPeerRepository};
pub use repository::{ChannelRepository, LocalNodeRepository, PeerRepository};
