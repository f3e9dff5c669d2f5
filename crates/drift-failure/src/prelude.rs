//! Convenience re-exports, matching `drift_core::prelude`'s convention.

pub use crate::detector::{FailureDetector, ProbeEscalation, StatusChange};
pub use crate::peer_registry::{PeerMetrics, PeerRegistry};
pub use crate::rtt::RttTracker;
