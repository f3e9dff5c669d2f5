//! The Coordinator: single-threaded cooperative owner of every component,
//! exposing the operational API and a domain-event stream (spec §4.8).
//!
//! Grounded on the teacher's `AntiEntropyHandler` (`aura-anti-entropy/src/sync/
//! anti_entropy.rs`): a handler struct wrapping `Arc<RwLock<_>>` shared state,
//! cloneable and `Send + Sync` so it can be driven from a `tokio::spawn`ed
//! loop as well as called directly, with the guard-chain authorization layer
//! stripped (no capability system in scope here). The round/probe scheduler
//! tasks and `Notify`-based graceful shutdown are grounded on the teacher's
//! `aura-daemon` service-loop shape.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use drift_core::config::EngineConfig;
use drift_core::hlc::HybridLogicalClock;
use drift_core::{ChannelId, Clock, DomainError, DomainEvent, Hlc, NodeId, StreamId, SyncError, SyncErrorType};
use drift_failure::{FailureDetector, ProbeEscalation};
use drift_store::{EntryStore, LogEntry, OutOfOrderBuffer};
use drift_sync::{
    decode_frame, encode_frame, AntiEntropyEngine, ChannelSource, MergeOutcome, Message,
};
use drift_transport::MessagePort;

use crate::repository::{ChannelRepository, LocalNodeRepository, PeerRepository};

/// Errors `Coordinator::append` can return: either a repository-invariant
/// violation (unknown channel) or a storage failure mid-append. Both are
/// surfaced to the caller directly, in addition to a `SyncErrorOccurred`
/// event for the latter — append is a synchronous, caller-initiated
/// operation, so the caller gets the failure back rather than only learning
/// of it on the event stream.
#[derive(Debug, Error)]
pub enum AppendError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Bridges a [`ChannelRepository`] to [`drift_sync::ChannelSource`],
/// implementing the spec's "shared-when-known" membership scope: a peer we
/// have no recorded membership for in any channel is treated as unknown
/// rather than excluded, so digests still flow before the first explicit
/// membership fact is learned.
struct ChannelRepoSource<C: ChannelRepository> {
    channels: Arc<C>,
}

#[async_trait]
impl<C: ChannelRepository> ChannelSource for ChannelRepoSource<C> {
    async fn channels(&self) -> Result<Vec<ChannelId>, SyncError> {
        self.channels.channels().await.map_err(domain_to_sync)
    }

    async fn streams(&self, channel: &ChannelId) -> Result<Vec<StreamId>, SyncError> {
        self.channels.streams(channel).await.map_err(domain_to_sync)
    }

    async fn is_member(&self, channel: &ChannelId, peer: &NodeId) -> Result<bool, SyncError> {
        let peer_known_anywhere = {
            let mut known = false;
            for candidate in self.channels.channels().await.map_err(domain_to_sync)? {
                if self
                    .channels
                    .is_member(&candidate, peer)
                    .await
                    .map_err(domain_to_sync)?
                {
                    known = true;
                    break;
                }
            }
            known
        };
        if !peer_known_anywhere {
            return Ok(true);
        }
        self.channels.is_member(channel, peer).await.map_err(domain_to_sync)
    }
}

fn domain_to_sync(err: DomainError) -> SyncError {
    SyncError::protocol_error(err.to_string()).with_type(SyncErrorType::ProtocolError)
}

struct Inner<C, P, L> {
    local: NodeId,
    config: EngineConfig,
    clock: RwLock<HybridLogicalClock>,
    store: Arc<dyn EntryStore>,
    buffer: Arc<OutOfOrderBuffer>,
    anti_entropy: AntiEntropyEngine,
    failure: FailureDetector,
    transport: Arc<dyn MessagePort>,
    channels: Arc<C>,
    peers: Arc<P>,
    local_repo: Arc<L>,
    wall_clock: Arc<dyn Clock>,
    events: broadcast::Sender<DomainEvent>,
    probe_sent_at: RwLock<HashMap<NodeId, u64>>,
    relay_requests: RwLock<HashMap<NodeId, Vec<NodeId>>>,
    /// Round-robin cursor over the reachable-peer list for direct-probe
    /// target selection (spec §4.7 step 1).
    probe_cursor: AtomicUsize,
    shutdown: Notify,
}

/// Single-threaded cooperative owner of all components (spec §4.8, §5). Cheap
/// to clone: every clone shares the same `Arc<Inner>`, which is what lets
/// `start()` hand two independent scheduler tasks a handle each without
/// requiring an `Arc<Self>` receiver.
pub struct Coordinator<C: ChannelRepository, P: PeerRepository, L: LocalNodeRepository> {
    inner: Arc<Inner<C, P, L>>,
}

impl<C: ChannelRepository, P: PeerRepository, L: LocalNodeRepository> Clone for Coordinator<C, P, L> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

/// Running scheduler tasks; dropping this without calling [`Coordinator::stop`]
/// detaches them (they keep running in the background).
pub struct RunningTasks {
    round_scheduler: JoinHandle<()>,
    probe_scheduler: JoinHandle<()>,
    inbound_pump: JoinHandle<()>,
}

impl<C, P, L> Coordinator<C, P, L>
where
    C: ChannelRepository + 'static,
    P: PeerRepository + 'static,
    L: LocalNodeRepository + 'static,
{
    /// Construct a Coordinator. Loads persisted clock and incarnation state
    /// from `local_repo` before the round/probe schedulers ever run.
    pub async fn new(
        config: EngineConfig,
        store: Arc<dyn EntryStore>,
        transport: Arc<dyn MessagePort>,
        channels: Arc<C>,
        peers: Arc<P>,
        local_repo: Arc<L>,
        wall_clock: Arc<dyn Clock>,
    ) -> Result<Self, DomainError> {
        let local = local_repo.local_node_id().await?;
        let clock_state = local_repo.load_clock_state().await?;
        let clock = HybridLogicalClock::new(clock_state, config.max_clock_skew_ms);

        let buffer = Arc::new(OutOfOrderBuffer::from_config(&config));
        let source: Arc<dyn ChannelSource> = Arc::new(ChannelRepoSource { channels: channels.clone() });
        let anti_entropy = AntiEntropyEngine::new(local.clone(), config.clone(), store.clone(), source, buffer.clone());

        let failure = FailureDetector::new(local.clone(), config.clone());
        failure.restore_incarnation(local_repo.load_incarnation().await?);

        let (events, _) = broadcast::channel(1024);

        Ok(Self {
            inner: Arc::new(Inner {
                local,
                config,
                clock: RwLock::new(clock),
                store,
                buffer,
                anti_entropy,
                failure,
                transport,
                channels,
                peers,
                local_repo,
                wall_clock,
                events,
                probe_sent_at: RwLock::new(HashMap::new()),
                relay_requests: RwLock::new(HashMap::new()),
                probe_cursor: AtomicUsize::new(0),
                shutdown: Notify::new(),
            }),
        })
    }

    /// Subscribe to the domain-event stream. Lagging subscribers drop the
    /// oldest unread events (the `broadcast` channel's native policy); the
    /// scheduler loops log a warning when they observe `RecvError::Lagged` on
    /// their own internal bookkeeping subscriptions, if any are added later.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: DomainEvent) {
        // `send` only errors when there are no receivers; that is a normal,
        // silent no-op for an event bus with no subscriber yet.
        let _ = self.inner.events.send(event);
    }

    fn now_ms(&self) -> u64 {
        self.inner.wall_clock.wall_millis()
    }

    // ---- Operational API (spec §4.8) ----------------------------------

    pub async fn add_peer(&self, peer: NodeId) -> Result<(), DomainError> {
        self.inner.peers.add_peer(peer.clone()).await?;
        self.inner.failure.add_peer(peer.clone());
        self.emit(DomainEvent::PeerAdded { peer });
        Ok(())
    }

    pub async fn remove_peer(&self, peer: NodeId) -> Result<(), DomainError> {
        self.inner.peers.remove_peer(&peer).await?;
        self.inner.failure.remove_peer(&peer);
        self.inner.anti_entropy.abandon_round(&peer);
        self.emit(DomainEvent::PeerRemoved { peer });
        Ok(())
    }

    pub async fn create_channel(&self, channel: ChannelId) -> Result<(), DomainError> {
        self.inner.channels.create_channel(channel.clone()).await?;
        self.emit(DomainEvent::ChannelCreated { channel });
        Ok(())
    }

    pub async fn delete_channel(&self, channel: ChannelId) -> Result<(), DomainError> {
        self.inner.channels.delete_channel(&channel).await?;
        self.emit(DomainEvent::ChannelRemoved { channel });
        Ok(())
    }

    pub async fn add_member(&self, channel: ChannelId, member: NodeId) -> Result<(), DomainError> {
        self.inner.channels.add_member(&channel, member.clone()).await?;
        self.emit(DomainEvent::MemberAdded { channel, member });
        Ok(())
    }

    pub async fn remove_member(&self, channel: ChannelId, member: NodeId) -> Result<(), DomainError> {
        self.inner.channels.remove_member(&channel, &member).await?;
        self.emit(DomainEvent::MemberRemoved { channel, member });
        Ok(())
    }

    /// Append a locally authored entry to `(channel, stream)`, creating the
    /// stream on first use. Assigns the next sequence and a fresh HLC
    /// timestamp, then writes through to the store.
    pub async fn append(&self, channel: ChannelId, stream: StreamId, payload: Vec<u8>) -> Result<LogEntry, AppendError> {
        if !self.inner.channels.streams(&channel).await?.contains(&stream) {
            self.inner.channels.create_stream(&channel, stream.clone()).await?;
            self.emit(DomainEvent::StreamCreated { channel: channel.clone(), stream: stream.clone() });
        }

        let sequence = self.inner.store.latest_sequence(&channel, &stream, &self.inner.local).await? + 1;
        let timestamp = self.timestamp_now();
        let entry = LogEntry::new(self.inner.local.clone(), sequence, timestamp, payload);

        self.inner.store.append(&channel, &stream, entry.clone()).await?;
        self.emit(DomainEvent::EntryAppended {
            channel,
            stream,
            entry: entry.id(),
            timestamp,
        });
        Ok(entry)
    }

    fn timestamp_now(&self) -> Hlc {
        let wall = self.now_ms();
        self.inner.clock.write().now(wall)
    }

    fn save_clock_state(&self) {
        let state = self.inner.clock.read().state();
        let repo = self.inner.local_repo.clone();
        tokio::spawn(async move {
            if let Err(err) = repo.save_clock_state(state).await {
                tracing::warn!(?err, "failed to persist clock state");
            }
        });
    }

    // ---- Inbound message dispatch --------------------------------------

    /// Decode and dispatch one inbound frame from `sender`.
    pub async fn handle_inbound(&self, sender: NodeId, bytes: Vec<u8>) {
        if bytes.len() > self.inner.config.max_message_bytes {
            tracing::warn!(
                peer = %sender,
                size = bytes.len(),
                limit = self.inner.config.max_message_bytes,
                "dropping oversized inbound frame"
            );
            let error = SyncError::protocol_error(format!(
                "inbound frame of {} bytes exceeds max_message_bytes ({})",
                bytes.len(),
                self.inner.config.max_message_bytes
            ))
            .with_type(SyncErrorType::MessageTooLarge);
            self.emit(DomainEvent::SyncErrorOccurred { error });
            return;
        }
        match decode_frame(&bytes) {
            Ok(msg) => self.dispatch_message(sender, msg).await,
            Err(err) => {
                tracing::warn!(peer = %sender, %err, "dropping undecodable frame");
                self.emit(DomainEvent::SyncErrorOccurred { error: err });
            }
        }
    }

    async fn dispatch_message(&self, sender: NodeId, msg: Message) {
        let result = match msg {
            Message::Ping { incarnation } => self.handle_ping(sender, incarnation).await,
            Message::Ack { target, incarnation, rtt_echo_ms } => {
                self.handle_ack(sender, target, incarnation, rtt_echo_ms).await
            }
            Message::PingReq { target, incarnation } => self.handle_ping_req(sender, target, incarnation).await,
            Message::DigestRequest { digest } => self.handle_digest_request(sender, digest).await,
            Message::DigestResponse { digest } => self.handle_digest_response(sender, digest).await,
            Message::DeltaRequest { asks } => self.handle_delta_request(sender, asks).await,
            Message::DeltaResponse { streams } => self.handle_delta_response(sender, streams).await,
        };
        if let Err(err) = result {
            tracing::warn!(peer = %sender, %err, "error handling inbound message");
            self.emit(DomainEvent::SyncErrorOccurred { error: err });
        }
    }

    /// Direct probe from `sender`, claiming our incarnation is `incarnation`.
    /// Refutes if that claim is current or newer, then always acks.
    async fn handle_ping(&self, sender: NodeId, incarnation: u64) -> Result<(), SyncError> {
        if let Some(bumped) = self.inner.failure.refute_self(incarnation) {
            let repo = self.inner.local_repo.clone();
            tokio::spawn(async move {
                if let Err(err) = repo.save_incarnation(bumped).await {
                    tracing::warn!(?err, "failed to persist refuted incarnation");
                }
            });
        }
        self.send_ack(&sender, self.inner.local.clone()).await
    }

    /// An indirect-probe request: ping `target` ourselves on `requester`'s
    /// behalf and remember to relay whatever `Ack` comes back.
    async fn handle_ping_req(&self, requester: NodeId, target: NodeId, incarnation: u64) -> Result<(), SyncError> {
        self.inner
            .relay_requests
            .write()
            .entry(target.clone())
            .or_default()
            .push(requester);
        self.send_ping(&target, incarnation).await
    }

    /// An `Ack` arrived: record it against whichever peer we were actually
    /// probing (`target`, not necessarily `sender` — a relay's wire identity
    /// differs from the logical peer it vouches for), then forward it to any
    /// requester waiting on an indirect probe of that same target.
    async fn handle_ack(&self, _sender: NodeId, target: NodeId, incarnation: u64, _rtt_echo_ms: u64) -> Result<(), SyncError> {
        let now = self.now_ms();
        let sent_at = self.inner.probe_sent_at.write().remove(&target);
        if let Some(sent_at) = sent_at {
            let rtt = now.saturating_sub(sent_at);
            if let Some(change) = self.inner.failure.record_ack(&target, incarnation, rtt, now) {
                self.emit(DomainEvent::PeerStatusChanged {
                    peer: change.peer,
                    old: change.old,
                    new: change.new,
                    at_ms: change.at_ms,
                });
            }
        }

        let requesters = self.inner.relay_requests.write().remove(&target).unwrap_or_default();
        for requester in requesters {
            if requester == self.inner.local {
                continue;
            }
            let frame = encode_frame(&Message::Ack { target: target.clone(), incarnation, rtt_echo_ms: 0 })?;
            if let Err(err) = self.inner.transport.send(&requester, frame).await {
                tracing::warn!(peer = %requester, %err, "failed to relay ack");
            }
        }
        Ok(())
    }

    async fn send_ping(&self, target: &NodeId, claimed_incarnation: u64) -> Result<(), SyncError> {
        self.inner.probe_sent_at.write().insert(target.clone(), self.now_ms());
        self.inner.failure.record_ping_sent(target);
        let frame = encode_frame(&Message::Ping { incarnation: claimed_incarnation })?;
        self.inner.transport.send(target, frame).await
    }

    async fn send_ack(&self, to: &NodeId, target: NodeId) -> Result<(), SyncError> {
        let frame = encode_frame(&Message::Ack {
            target,
            incarnation: self.inner.failure.self_incarnation(),
            rtt_echo_ms: 0,
        })?;
        self.inner.transport.send(to, frame).await
    }

    async fn handle_digest_request(&self, sender: NodeId, digest: drift_sync::BatchedDigest) -> Result<(), SyncError> {
        let response = self.inner.anti_entropy.respond_to_digest_request(&sender).await?;
        let frame = encode_frame(&response)?;
        self.inner.transport.send(&sender, frame).await?;

        // Also fold their digest in for our own push-on-pull, same as a
        // `DigestResponse` would, since a bare `DigestRequest` still carries
        // the sender's full digest.
        self.handle_digest_response(sender, digest).await
    }

    async fn handle_digest_response(&self, sender: NodeId, digest: drift_sync::BatchedDigest) -> Result<(), SyncError> {
        let now = self.now_ms();
        let output = self.inner.anti_entropy.process_digest(&sender, &digest, now).await?;

        if let Some(request) = output.delta_request {
            let frame = encode_frame(&request)?;
            self.inner.transport.send(&sender, frame).await?;
        }
        for response in output.delta_responses {
            let frame = encode_frame(&response)?;
            self.inner.transport.send(&sender, frame).await?;
        }
        Ok(())
    }

    async fn handle_delta_request(&self, sender: NodeId, asks: Vec<drift_sync::DeltaAsk>) -> Result<(), SyncError> {
        let response = self.inner.anti_entropy.handle_delta_request(&asks).await?;
        let frame = encode_frame(&response)?;
        self.inner.transport.send(&sender, frame).await
    }

    /// Merge a peer's `DeltaResponse` into the store. The clock is merged
    /// against the latest timestamp across every entry in the message before
    /// anything is committed: if that merge rejects the message for
    /// exceeding the tolerated clock skew, the whole message is dropped (no
    /// partial commit) and a `SyncErrorOccurred` is emitted.
    async fn handle_delta_response(&self, sender: NodeId, streams: Vec<drift_sync::StreamEntries>) -> Result<(), SyncError> {
        let latest_remote = streams
            .iter()
            .flat_map(|s| s.entries.iter())
            .map(|e| e.timestamp)
            .max();

        if let Some(remote_ts) = latest_remote {
            let now = self.now_ms();
            self.inner.clock.write().merge(remote_ts, now)?;
            self.save_clock_state();
        }

        let outcomes = self.inner.anti_entropy.handle_delta_response(&sender, streams).await?;
        self.apply_merge_outcomes(&sender, outcomes).await?;
        Ok(())
    }

    /// Turn merge outcomes into domain events: one `EntriesMerged` per
    /// `(channel, stream)` group of newly committed entries, one
    /// `BufferOverflowOccurred` per dropped eviction, and, for entries
    /// authored by a non-member of the channel, an observability-only
    /// `NonMemberEntriesRejected` — the entries are still committed (the
    /// engine has no access-control enforcement, per spec non-goals), the
    /// event only flags that this happened.
    async fn apply_merge_outcomes(&self, _peer: &NodeId, outcomes: Vec<MergeOutcome>) -> Result<(), SyncError> {
        let mut committed: HashMap<(ChannelId, StreamId), Vec<drift_core::LogEntryId>> = HashMap::new();
        let mut non_member_counts: HashMap<(ChannelId, StreamId, NodeId), usize> = HashMap::new();

        for outcome in outcomes {
            match outcome {
                MergeOutcome::Committed { channel, stream, entry } => {
                    let author = entry.author.clone();
                    if !self.inner.channels.is_member(&channel, &author).await.unwrap_or(true) {
                        *non_member_counts.entry((channel.clone(), stream.clone(), author)).or_insert(0) += 1;
                    }
                    committed.entry((channel, stream)).or_default().push(entry);
                }
                MergeOutcome::BufferOverflow { channel, stream, author, dropped_count } => {
                    self.emit(DomainEvent::BufferOverflowOccurred { channel, stream, author, dropped_count });
                }
            }
        }

        for ((channel, stream), entries) in committed {
            let new_version = self.inner.store.version_vector(&channel, &stream).await?.into();
            self.emit(DomainEvent::EntriesMerged { channel, stream, entries, new_version });
        }
        for ((channel, stream, author), count) in non_member_counts {
            self.emit(DomainEvent::NonMemberEntriesRejected { channel, stream, author, count });
        }

        Ok(())
    }

    // ---- Scheduler loops -------------------------------------------------

    /// Start the round scheduler, probe scheduler, and inbound-message pump
    /// as background tasks. The pump is what actually realizes spec §2/§4.8's
    /// data flow: it drains `MessagePort::recv` and routes every frame
    /// through `handle_inbound`, so `DigestResponse`/`DeltaResponse`/`Ack`
    /// get processed rather than only ever being sent.
    pub fn start(&self) -> RunningTasks {
        let round_handle = {
            let coordinator = self.clone();
            tokio::spawn(async move { coordinator.run_round_scheduler().await })
        };
        let probe_handle = {
            let coordinator = self.clone();
            tokio::spawn(async move { coordinator.run_probe_scheduler().await })
        };
        let inbound_handle = {
            let coordinator = self.clone();
            tokio::spawn(async move { coordinator.run_inbound_pump().await })
        };
        RunningTasks {
            round_scheduler: round_handle,
            probe_scheduler: probe_handle,
            inbound_pump: inbound_handle,
        }
    }

    /// Signal shutdown and wait (up to `2 * gossip_interval_ms`, per spec
    /// §5) for all scheduler tasks to drain their in-flight work, aborting
    /// whatever remains past the grace period.
    pub async fn stop(&self, tasks: RunningTasks) {
        self.inner.shutdown.notify_waiters();
        let grace = std::time::Duration::from_millis(2 * self.inner.config.gossip_interval_ms);

        if tokio::time::timeout(grace, tasks.round_scheduler).await.is_err() {
            tracing::warn!("round scheduler did not stop within the grace period; aborting");
        }
        if tokio::time::timeout(grace, tasks.probe_scheduler).await.is_err() {
            tracing::warn!("probe scheduler did not stop within the grace period; aborting");
        }
        if tokio::time::timeout(grace, tasks.inbound_pump).await.is_err() {
            tracing::warn!("inbound pump did not stop within the grace period; aborting");
        }
    }

    async fn run_round_scheduler(&self) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(self.inner.config.gossip_interval_ms));
        loop {
            tokio::select! {
                _ = self.inner.shutdown.notified() => return,
                _ = ticker.tick() => self.run_one_gossip_tick().await,
            }
        }
    }

    async fn run_one_gossip_tick(&self) {
        let peers = match self.inner.peers.peers().await {
            Ok(peers) => peers,
            Err(err) => {
                tracing::warn!(?err, "failed to list peers for gossip round");
                return;
            }
        };

        let now = self.now_ms();
        let mut candidates: Vec<NodeId> = peers
            .into_iter()
            .filter(|peer| self.inner.anti_entropy.is_idle(peer) || self.inner.anti_entropy.round_timed_out(peer, now))
            .collect();

        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);
        candidates.truncate(self.inner.config.fanout);

        for peer in candidates {
            if self.inner.anti_entropy.round_timed_out(&peer, now) {
                self.inner.anti_entropy.abandon_round(&peer);
            }
            match self.inner.anti_entropy.start_round(&peer, now).await {
                Ok(msg) => match encode_frame(&msg) {
                    Ok(frame) => {
                        if let Err(err) = self.inner.transport.send(&peer, frame).await {
                            tracing::warn!(peer = %peer, %err, "failed to send digest request");
                            self.emit(DomainEvent::SyncErrorOccurred { error: err });
                        }
                    }
                    Err(err) => self.emit(DomainEvent::SyncErrorOccurred { error: err }),
                },
                Err(err) => {
                    tracing::warn!(peer = %peer, %err, "failed to start anti-entropy round");
                    self.emit(DomainEvent::SyncErrorOccurred { error: err });
                }
            }
        }
    }

    /// Drain inbound frames from the transport until shutdown or the port
    /// itself gives up (e.g. it was closed).
    async fn run_inbound_pump(&self) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.notified() => return,
                received = self.inner.transport.recv() => match received {
                    Ok((from, bytes)) => self.handle_inbound(from, bytes).await,
                    Err(err) => {
                        tracing::warn!(%err, "message port recv failed; stopping inbound pump");
                        return;
                    }
                },
            }
        }
    }

    async fn run_probe_scheduler(&self) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(self.inner.config.probe_interval_ms));
        loop {
            tokio::select! {
                _ = self.inner.shutdown.notified() => return,
                _ = ticker.tick() => self.run_one_probe_tick().await,
            }
        }
    }

    async fn run_one_probe_tick(&self) {
        let now = self.now_ms();
        for change in self.inner.failure.tick(now) {
            self.emit(DomainEvent::PeerStatusChanged {
                peer: change.peer,
                old: change.old,
                new: change.new,
                at_ms: change.at_ms,
            });
        }

        // Spec §4.7 step 1: pick one Reachable peer round-robin, not a
        // uniform-random pick over every known peer.
        let reachable = self.inner.failure.registry().reachable_peers();
        let Some(target) = pick_round_robin(&reachable, &self.inner.probe_cursor) else {
            return;
        };

        let claimed = self.inner.failure.registry().incarnation(&target).unwrap_or(0);
        if let Err(err) = self.send_ping(&target, claimed).await {
            tracing::warn!(peer = %target, %err, "direct probe send failed");
            self.on_direct_probe_timeout(target).await;
            return;
        }

        let timeout_ms = self.inner.failure.probe_timeout_ms(&target);
        tokio::time::sleep(std::time::Duration::from_millis(timeout_ms)).await;

        if self.inner.probe_sent_at.read().contains_key(&target) {
            self.on_direct_probe_timeout(target).await;
        }
    }

    async fn on_direct_probe_timeout(&self, target: NodeId) {
        self.inner.probe_sent_at.write().remove(&target);
        match self.inner.failure.on_direct_probe_timeout(&target) {
            ProbeEscalation::None => {
                let now = self.now_ms();
                if let Some(change) = self.inner.failure.on_indirect_probe_exhausted(&target, now) {
                    self.emit(DomainEvent::PeerStatusChanged {
                        peer: change.peer,
                        old: change.old,
                        new: change.new,
                        at_ms: change.at_ms,
                    });
                }
            }
            ProbeEscalation::IndirectProbe { relays } => {
                let claimed = self.inner.failure.registry().incarnation(&target).unwrap_or(0);
                for relay in relays {
                    let frame = match encode_frame(&Message::PingReq { target: target.clone(), incarnation: claimed }) {
                        Ok(frame) => frame,
                        Err(err) => {
                            self.emit(DomainEvent::SyncErrorOccurred { error: err });
                            continue;
                        }
                    };
                    if let Err(err) = self.inner.transport.send(&relay, frame).await {
                        tracing::warn!(peer = %relay, %err, "failed to send indirect probe request");
                    }
                }
            }
        }
    }
}

/// Advance `cursor` and return the next peer in `peers`, wrapping around.
/// `peers` is expected pre-sorted so the rotation is stable across ticks.
fn pick_round_robin(peers: &[NodeId], cursor: &AtomicUsize) -> Option<NodeId> {
    if peers.is_empty() {
        return None;
    }
    let index = cursor.fetch_add(1, Ordering::Relaxed) % peers.len();
    Some(peers[index].clone())
}
