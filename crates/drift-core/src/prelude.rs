//! Convenience re-exports for downstream crates, mirroring the
//! `prelude.rs` convention used throughout the teacher workspace
//! (e.g. `aura-anti-entropy::prelude`).

pub use crate::clock::{Clock, SystemClock};
pub use crate::config::{ConfigError, EngineConfig};
pub use crate::errors::{DomainError, SyncError, SyncErrorType};
pub use crate::events::{DomainEvent, PeerStatus};
pub use crate::hlc::{ClockState, Hlc, HybridLogicalClock, DEFAULT_MAX_SKEW_MS};
pub use crate::identifiers::{ChannelId, EmptyIdentifier, LogEntryId, NodeId, StreamId};
