//! Per-peer failure-detection state: reachability, incarnation number, RTT
//! estimate, and lifetime probe counters.

use std::collections::HashMap;

use parking_lot::RwLock;

use drift_core::config::EngineConfig;
use drift_core::events::PeerStatus;
use drift_core::NodeId;

use crate::rtt::RttTracker;

/// Lifetime probe counters for a single peer, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerMetrics {
    pub pings_sent: u64,
    pub acks_received: u64,
    pub indirect_probes_sent: u64,
    pub timeouts: u64,
}

#[derive(Debug, Clone)]
struct PeerEntry {
    status: PeerStatus,
    incarnation: u64,
    rtt: RttTracker,
    metrics: PeerMetrics,
    /// Consecutive direct-probe timeouts since the last ack, reset on ack.
    /// Distinct from `metrics.timeouts`, which never resets; this is what
    /// `direct_probe_threshold` is compared against (spec §4.7 step 4).
    consecutive_failed_probes: u32,
    /// Wall-clock deadline (ms) at which a `Suspected` peer becomes
    /// `Unreachable` if it hasn't refuted by then.
    suspicion_deadline_ms: Option<u64>,
}

impl PeerEntry {
    fn new(config: &EngineConfig) -> Self {
        Self {
            status: PeerStatus::Reachable,
            incarnation: 0,
            rtt: RttTracker::from_config(config),
            metrics: PeerMetrics::default(),
            consecutive_failed_probes: 0,
            suspicion_deadline_ms: None,
        }
    }
}

/// Tracks every known peer's SWIM state. Pure bookkeeping; the probe
/// schedule and message I/O live in [`crate::FailureDetector`].
#[derive(Debug)]
pub struct PeerRegistry {
    config: EngineConfig,
    peers: RwLock<HashMap<NodeId, PeerEntry>>,
}

impl PeerRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_peer(&self, peer: NodeId) {
        self.peers
            .write()
            .entry(peer)
            .or_insert_with(|| PeerEntry::new(&self.config));
    }

    pub fn remove_peer(&self, peer: &NodeId) {
        self.peers.write().remove(peer);
    }

    pub fn contains(&self, peer: &NodeId) -> bool {
        self.peers.read().contains_key(peer)
    }

    pub fn status(&self, peer: &NodeId) -> Option<PeerStatus> {
        self.peers.read().get(peer).map(|e| e.status)
    }

    pub fn incarnation(&self, peer: &NodeId) -> Option<u64> {
        self.peers.read().get(peer).map(|e| e.incarnation)
    }

    pub fn metrics(&self, peer: &NodeId) -> Option<PeerMetrics> {
        self.peers.read().get(peer).map(|e| e.metrics)
    }

    pub fn suggested_timeout_ms(&self, peer: &NodeId) -> Option<u64> {
        self.peers.read().get(peer).map(|e| e.rtt.suggested_timeout_ms())
    }

    /// Every peer currently known, in arbitrary order. Used for relay
    /// selection.
    pub fn known_peers(&self) -> Vec<NodeId> {
        self.peers.read().keys().cloned().collect()
    }

    /// Peers currently believed reachable, excluding `exclude`. Used to pick
    /// indirect-probe relays.
    pub fn reachable_peers_excluding(&self, exclude: &NodeId) -> Vec<NodeId> {
        self.peers
            .read()
            .iter()
            .filter(|(id, e)| *id != exclude && e.status == PeerStatus::Reachable)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every peer currently believed reachable, sorted by id for a stable
    /// round-robin order across ticks. Used to pick the direct-probe target
    /// (spec §4.7 step 1).
    pub fn reachable_peers(&self) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self
            .peers
            .read()
            .iter()
            .filter(|(_, e)| e.status == PeerStatus::Reachable)
            .map(|(id, _)| id.clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn record_ping_sent(&self, peer: &NodeId) {
        if let Some(entry) = self.peers.write().get_mut(peer) {
            entry.metrics.pings_sent += 1;
        }
    }

    pub fn record_indirect_probe_sent(&self, peer: &NodeId) {
        if let Some(entry) = self.peers.write().get_mut(peer) {
            entry.metrics.indirect_probes_sent += 1;
        }
    }

    /// Record a direct-probe timeout for `peer`, returning its consecutive
    /// failure count after this one (`0` if `peer` is unknown).
    pub fn record_timeout(&self, peer: &NodeId) -> u32 {
        let mut peers = self.peers.write();
        let Some(entry) = peers.get_mut(peer) else { return 0 };
        entry.metrics.timeouts += 1;
        entry.consecutive_failed_probes += 1;
        entry.consecutive_failed_probes
    }

    pub fn record_ack(&self, peer: &NodeId, rtt_sample_ms: u64) {
        if let Some(entry) = self.peers.write().get_mut(peer) {
            entry.metrics.acks_received += 1;
            entry.rtt.record(rtt_sample_ms);
            entry.consecutive_failed_probes = 0;
        }
    }

    /// Transition `peer` to `new` status, returning the previous status if
    /// this was an actual change. Clears the suspicion deadline unless `new`
    /// is `Suspected`.
    pub fn set_status(&self, peer: &NodeId, new: PeerStatus, suspicion_deadline_ms: Option<u64>) -> Option<PeerStatus> {
        let mut peers = self.peers.write();
        let entry = peers.get_mut(peer)?;
        let old = entry.status;
        if old == new {
            return None;
        }
        entry.status = new;
        entry.suspicion_deadline_ms = if new == PeerStatus::Suspected { suspicion_deadline_ms } else { None };
        Some(old)
    }

    /// Peers currently `Suspected` whose deadline has passed as of `now_ms`.
    pub fn expired_suspicions(&self, now_ms: u64) -> Vec<NodeId> {
        self.peers
            .read()
            .iter()
            .filter(|(_, e)| {
                e.status == PeerStatus::Suspected
                    && e.suspicion_deadline_ms.map(|deadline| now_ms >= deadline).unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Record an incarnation number observed for `peer`, taking the larger
    /// of the stored and observed values (incarnations never regress).
    pub fn observe_incarnation(&self, peer: &NodeId, observed: u64) {
        if let Some(entry) = self.peers.write().get_mut(peer) {
            entry.incarnation = entry.incarnation.max(observed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: &str) -> NodeId {
        NodeId::new(n).unwrap()
    }

    #[test]
    fn new_peers_start_reachable() {
        let reg = PeerRegistry::new(EngineConfig::default());
        reg.add_peer(node("alice"));
        assert_eq!(reg.status(&node("alice")), Some(PeerStatus::Reachable));
    }

    #[test]
    fn set_status_reports_the_previous_value_once() {
        let reg = PeerRegistry::new(EngineConfig::default());
        reg.add_peer(node("alice"));
        assert_eq!(
            reg.set_status(&node("alice"), PeerStatus::Suspected, Some(1000)),
            Some(PeerStatus::Reachable)
        );
        assert_eq!(reg.set_status(&node("alice"), PeerStatus::Suspected, Some(1000)), None);
    }

    #[test]
    fn incarnation_never_regresses() {
        let reg = PeerRegistry::new(EngineConfig::default());
        reg.add_peer(node("alice"));
        reg.observe_incarnation(&node("alice"), 5);
        reg.observe_incarnation(&node("alice"), 2);
        assert_eq!(reg.incarnation(&node("alice")), Some(5));
    }

    #[test]
    fn expired_suspicions_only_fire_after_the_deadline() {
        let reg = PeerRegistry::new(EngineConfig::default());
        reg.add_peer(node("alice"));
        reg.set_status(&node("alice"), PeerStatus::Suspected, Some(5_000));
        assert!(reg.expired_suspicions(4_999).is_empty());
        assert_eq!(reg.expired_suspicions(5_000), vec![node("alice")]);
    }

    #[test]
    fn record_timeout_accumulates_and_record_ack_resets_it() {
        let reg = PeerRegistry::new(EngineConfig::default());
        reg.add_peer(node("alice"));
        assert_eq!(reg.record_timeout(&node("alice")), 1);
        assert_eq!(reg.record_timeout(&node("alice")), 2);
        reg.record_ack(&node("alice"), 50);
        assert_eq!(reg.record_timeout(&node("alice")), 1);
    }

    #[test]
    fn reachable_peers_excluding_skips_the_named_peer_and_unreachable_ones() {
        let reg = PeerRegistry::new(EngineConfig::default());
        reg.add_peer(node("alice"));
        reg.add_peer(node("bob"));
        reg.add_peer(node("carol"));
        reg.set_status(&node("bob"), PeerStatus::Unreachable, None);
        let mut relays = reg.reachable_peers_excluding(&node("alice"));
        relays.sort();
        assert_eq!(relays, vec![node("carol")]);
    }
}
