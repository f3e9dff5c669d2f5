//! # Drift Core - Layer 1: Foundation
//!
//! Foundation types shared by every other crate in the workspace: the
//! identifier newtypes, the hybrid logical clock, the two error families
//! (`DomainError`/`SyncError`), engine configuration, and the domain event
//! vocabulary the Coordinator publishes.
//!
//! This crate has zero dependencies on other `drift-*` crates.

#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod hlc;
pub mod identifiers;
pub mod prelude;

pub use clock::{Clock, SystemClock};
pub use errors::{DomainError, SyncError, SyncErrorType};
pub use events::DomainEvent;
pub use hlc::Hlc;
pub use identifiers::{ChannelId, LogEntryId, NodeId, StreamId};
