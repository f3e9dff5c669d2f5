//! SWIM-style failure detection: direct probe, indirect probe via relays,
//! suspicion with a timeout, and incarnation-number refutation (spec §4.7).
//!
//! The teacher repo has no failure detector of its own; this module is
//! grounded directly on spec §4.7, borrowing only the state-enum/event
//! vocabulary of a cluster-membership reference file and recasting it in the
//! teacher's idiom (`tracing`, plain structs with narrow `impl` blocks, no
//! guard-chain authorization layer, since no capability system is in scope
//! here).

use std::sync::atomic::{AtomicU64, Ordering};

use rand::seq::SliceRandom;

use drift_core::config::EngineConfig;
use drift_core::events::PeerStatus;
use drift_core::NodeId;

use crate::peer_registry::PeerRegistry;

/// Outcome of a direct probe timing out: what the caller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEscalation {
    /// Peer is already suspected or unreachable; nothing to escalate.
    None,
    /// Send `PingReq` to each of these relays, asking them to probe `peer`
    /// on our behalf.
    IndirectProbe { relays: Vec<NodeId> },
}

/// A status transition the caller should turn into a `PeerStatusChanged`
/// domain event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub peer: NodeId,
    pub old: PeerStatus,
    pub new: PeerStatus,
    pub at_ms: u64,
}

/// Drives the SWIM state machine for every known peer. Pure decision logic;
/// actual message sends happen in `drift-node`'s Coordinator, which calls
/// into this type and acts on its return values.
pub struct FailureDetector {
    local: NodeId,
    config: EngineConfig,
    registry: PeerRegistry,
    self_incarnation: AtomicU64,
}

impl FailureDetector {
    pub fn new(local: NodeId, config: EngineConfig) -> Self {
        Self {
            registry: PeerRegistry::new(config.clone()),
            local,
            config,
            self_incarnation: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn add_peer(&self, peer: NodeId) {
        self.registry.add_peer(peer);
    }

    pub fn remove_peer(&self, peer: &NodeId) {
        self.registry.remove_peer(peer);
    }

    /// The local node's current incarnation number, carried on outgoing
    /// `Ping`/`Ack` messages so peers can tell a refutation from a stale
    /// suspicion.
    pub fn self_incarnation(&self) -> u64 {
        self.self_incarnation.load(Ordering::SeqCst)
    }

    /// Restore a persisted incarnation at startup, so a restart doesn't
    /// forget a refutation peers have already observed. Only raises the
    /// value, never lowers it below what this instance has already bumped to.
    pub fn restore_incarnation(&self, persisted: u64) {
        self.self_incarnation.fetch_max(persisted, Ordering::SeqCst);
    }

    /// A peer's message claims we (the local node) are suspected at
    /// `claimed_incarnation`. If that is not older than our current
    /// incarnation, bump it and return the new value so the caller can
    /// broadcast a refuting `Ack`. Returns `None` if the claim is stale and
    /// needs no response.
    pub fn refute_self(&self, claimed_incarnation: u64) -> Option<u64> {
        let current = self.self_incarnation.load(Ordering::SeqCst);
        if claimed_incarnation < current {
            return None;
        }
        let bumped = claimed_incarnation + 1;
        self.self_incarnation.store(bumped, Ordering::SeqCst);
        Some(bumped)
    }

    pub fn record_ping_sent(&self, peer: &NodeId) {
        self.registry.record_ping_sent(peer);
    }

    /// An `Ack` arrived from `peer`, carrying its incarnation and measured
    /// round-trip time. Clears any suspicion and restores `Reachable`.
    pub fn record_ack(&self, peer: &NodeId, remote_incarnation: u64, rtt_sample_ms: u64, now_ms: u64) -> Option<StatusChange> {
        self.registry.observe_incarnation(peer, remote_incarnation);
        self.registry.record_ack(peer, rtt_sample_ms);
        self.registry
            .set_status(peer, PeerStatus::Reachable, None)
            .map(|old| StatusChange { peer: peer.clone(), old, new: PeerStatus::Reachable, at_ms: now_ms })
    }

    /// A direct probe of `peer` timed out. Returns whether to escalate to an
    /// indirect probe via relays, per `indirect_probe_count` and
    /// `direct_probe_threshold`.
    pub fn on_direct_probe_timeout(&self, peer: &NodeId) -> ProbeEscalation {
        let consecutive_failures = self.registry.record_timeout(peer);
        if matches!(self.registry.status(peer), Some(PeerStatus::Suspected) | Some(PeerStatus::Unreachable)) {
            return ProbeEscalation::None;
        }
        if consecutive_failures < self.config.direct_probe_threshold {
            return ProbeEscalation::None;
        }

        let mut candidates = self.registry.reachable_peers_excluding(peer);
        candidates.retain(|id| id != &self.local);
        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);
        candidates.truncate(self.config.indirect_probe_count);

        if candidates.is_empty() {
            return ProbeEscalation::None;
        }
        for relay in &candidates {
            self.registry.record_indirect_probe_sent(relay);
        }
        ProbeEscalation::IndirectProbe { relays: candidates }
    }

    /// Every relay we asked to indirectly probe `peer` also failed (or the
    /// round's indirect-probe window elapsed with no relay success): mark
    /// `peer` `Suspected` with a deadline `suspect_timeout_ms` out.
    pub fn on_indirect_probe_exhausted(&self, peer: &NodeId, now_ms: u64) -> Option<StatusChange> {
        let deadline = now_ms + self.config.suspect_timeout_ms;
        self.registry
            .set_status(peer, PeerStatus::Suspected, Some(deadline))
            .map(|old| StatusChange { peer: peer.clone(), old, new: PeerStatus::Suspected, at_ms: now_ms })
    }

    /// Scan for peers whose suspicion deadline has passed and escalate them
    /// to `Unreachable`. Call this on every probe-scheduler tick.
    pub fn tick(&self, now_ms: u64) -> Vec<StatusChange> {
        self.registry
            .expired_suspicions(now_ms)
            .into_iter()
            .filter_map(|peer| {
                self.registry
                    .set_status(&peer, PeerStatus::Unreachable, None)
                    .map(|old| StatusChange { peer, old, new: PeerStatus::Unreachable, at_ms: now_ms })
            })
            .collect()
    }

    /// Current RTT-derived probe timeout for `peer`, falling back to
    /// `probe_interval_ms` if the peer is unknown.
    pub fn probe_timeout_ms(&self, peer: &NodeId) -> u64 {
        self.registry
            .suggested_timeout_ms(peer)
            .unwrap_or(self.config.probe_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: &str) -> NodeId {
        NodeId::new(n).unwrap()
    }

    fn detector() -> FailureDetector {
        FailureDetector::new(node("local"), EngineConfig::default())
    }

    #[test]
    fn direct_timeout_escalates_to_indirect_probe_via_other_peers() {
        let fd = detector();
        fd.add_peer(node("alice"));
        fd.add_peer(node("bob"));
        fd.add_peer(node("carol"));
        match fd.on_direct_probe_timeout(&node("alice")) {
            ProbeEscalation::IndirectProbe { relays } => {
                assert!(!relays.is_empty());
                assert!(!relays.contains(&node("alice")));
            }
            ProbeEscalation::None => panic!("expected relays to be available"),
        }
    }

    #[test]
    fn no_relays_available_means_no_escalation() {
        let fd = detector();
        fd.add_peer(node("alice"));
        assert_eq!(fd.on_direct_probe_timeout(&node("alice")), ProbeEscalation::None);
    }

    #[test]
    fn escalation_waits_for_the_configured_threshold_and_an_ack_resets_the_count() {
        let fd = FailureDetector::new(
            node("local"),
            EngineConfig { direct_probe_threshold: 3, ..EngineConfig::default() },
        );
        fd.add_peer(node("alice"));
        fd.add_peer(node("bob"));

        assert_eq!(fd.on_direct_probe_timeout(&node("alice")), ProbeEscalation::None);
        assert_eq!(fd.on_direct_probe_timeout(&node("alice")), ProbeEscalation::None);
        match fd.on_direct_probe_timeout(&node("alice")) {
            ProbeEscalation::IndirectProbe { .. } => {}
            ProbeEscalation::None => panic!("expected escalation on the 3rd consecutive timeout"),
        }

        fd.record_ack(&node("alice"), 0, 50, 1_000);
        assert_eq!(fd.on_direct_probe_timeout(&node("alice")), ProbeEscalation::None);
    }

    #[test]
    fn indirect_exhaustion_marks_suspected_then_tick_marks_unreachable() {
        let fd = detector();
        fd.add_peer(node("alice"));
        let change = fd.on_indirect_probe_exhausted(&node("alice"), 1_000).unwrap();
        assert_eq!(change.new, PeerStatus::Suspected);

        assert!(fd.tick(1_000).is_empty());
        let expired = fd.tick(1_000 + fd.config.suspect_timeout_ms);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].new, PeerStatus::Unreachable);
    }

    #[test]
    fn ack_clears_suspicion_and_advances_incarnation() {
        let fd = detector();
        fd.add_peer(node("alice"));
        fd.on_indirect_probe_exhausted(&node("alice"), 1_000);
        let change = fd.record_ack(&node("alice"), 3, 120, 2_000).unwrap();
        assert_eq!(change.new, PeerStatus::Reachable);
        assert_eq!(fd.registry().incarnation(&node("alice")), Some(3));
    }

    #[test]
    fn self_refutation_bumps_incarnation_only_when_claim_is_current_or_newer() {
        let fd = detector();
        assert_eq!(fd.refute_self(0), Some(1));
        assert_eq!(fd.self_incarnation(), 1);
        // A stale claim referencing our old incarnation needs no refutation.
        assert_eq!(fd.refute_self(0), None);
        assert_eq!(fd.refute_self(1), Some(2));
    }
}
