//! SWIM-style failure detection and RTT estimation.
//!
//! The teacher workspace has no failure detector; this crate is grounded
//! directly on the gossip engine's spec rather than on a teacher analogue
//! (see DESIGN.md), kept in the same narrow-trait-plus-plain-struct style as
//! the rest of the workspace.

#![forbid(unsafe_code)]

pub mod detector;
pub mod peer_registry;
pub mod prelude;
pub mod rtt;

pub use detector::{FailureDetector, ProbeEscalation, StatusChange};
pub use peer_registry::{PeerMetrics, PeerRegistry};
pub use rtt::RttTracker;
