//! The anti-entropy round state machine (spec §4.6).
//!
//! Grounded on `aura-anti-entropy/src/sync/anti_entropy.rs::AntiEntropyHandler`'s
//! `sync_with_peer` round shape (digest → diff → push/pull → merge), with the
//! guard-chain authorization steps removed — there is no capability system in
//! scope here — and an explicit per-peer state machine added, since the
//! teacher's handler runs one round at a time rather than tracking
//! concurrent in-flight rounds per peer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use drift_core::config::EngineConfig;
use drift_core::{ChannelId, LogEntryId, NodeId, StreamId, SyncError};
use drift_store::entry::materialized_order;
use drift_store::{Admission, EntryStore, LogEntry, OutOfOrderBuffer};

use crate::digest::{self, ChannelSource};
use crate::wire::{BatchedDigest, DeltaAsk, Message, StreamEntries};

/// Per-peer round progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundState {
    Idle,
    AwaitingDigestResponse { started_at_ms: u64 },
    AwaitingDeltas { started_at_ms: u64, outstanding: usize },
}

/// What the caller should send after processing a peer's digest.
#[derive(Debug, Clone, Default)]
pub struct RoundOutput {
    pub delta_request: Option<Message>,
    pub delta_responses: Vec<Message>,
}

/// An entry that was merged into the store, or buffered pending a gap fill,
/// reported so the caller can raise the matching domain events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Committed { channel: ChannelId, stream: StreamId, entry: LogEntryId },
    BufferOverflow { channel: ChannelId, stream: StreamId, author: NodeId, dropped_count: usize },
}

/// Drives digest exchange, delta exchange, and buffer admission for every
/// peer this node gossips with.
pub struct AntiEntropyEngine {
    local: NodeId,
    config: EngineConfig,
    store: Arc<dyn EntryStore>,
    source: Arc<dyn ChannelSource>,
    buffer: Arc<OutOfOrderBuffer>,
    states: RwLock<HashMap<NodeId, RoundState>>,
}

impl AntiEntropyEngine {
    pub fn new(
        local: NodeId,
        config: EngineConfig,
        store: Arc<dyn EntryStore>,
        source: Arc<dyn ChannelSource>,
        buffer: Arc<OutOfOrderBuffer>,
    ) -> Self {
        Self {
            local,
            config,
            store,
            source,
            buffer,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn round_state(&self, peer: &NodeId) -> RoundState {
        self.states.read().get(peer).cloned().unwrap_or(RoundState::Idle)
    }

    pub fn is_idle(&self, peer: &NodeId) -> bool {
        matches!(self.round_state(peer), RoundState::Idle)
    }

    /// Begin a round with `peer`: compute our digest and send it as a
    /// `DigestRequest`.
    pub async fn start_round(&self, peer: &NodeId, now_ms: u64) -> Result<Message, SyncError> {
        let local_digest = digest::compute_local_digest(
            self.source.as_ref(),
            self.store.as_ref(),
            self.local.clone(),
            peer,
        )
        .await?;
        self.states
            .write()
            .insert(peer.clone(), RoundState::AwaitingDigestResponse { started_at_ms: now_ms });
        Ok(Message::DigestRequest { digest: local_digest })
    }

    /// A peer asked us to digest: answer with our own `DigestResponse`,
    /// without disturbing any round of our own we have in flight with them.
    pub async fn respond_to_digest_request(&self, requester: &NodeId) -> Result<Message, SyncError> {
        let local_digest = digest::compute_local_digest(
            self.source.as_ref(),
            self.store.as_ref(),
            self.local.clone(),
            requester,
        )
        .await?;
        Ok(Message::DigestResponse { digest: local_digest })
    }

    /// Process a peer's digest (received either as their response to our
    /// `DigestRequest`, or as an incoming `DigestRequest`/`DigestResponse` of
    /// their own): diff it against ours, push what they're missing directly
    /// (push-on-pull — no extra round trip for what we can already see they
    /// need), and ask for what we're missing.
    pub async fn process_digest(
        &self,
        peer: &NodeId,
        remote_digest: &BatchedDigest,
        now_ms: u64,
    ) -> Result<RoundOutput, SyncError> {
        let local_digest = digest::compute_local_digest(
            self.source.as_ref(),
            self.store.as_ref(),
            self.local.clone(),
            peer,
        )
        .await?;
        let diffs = digest::diff(&local_digest, remote_digest);

        let mut asks = Vec::new();
        let mut push_streams = Vec::new();

        for d in &diffs {
            if !d.pull_authors.is_empty() {
                let local_version = self.store.version_vector(&d.channel, &d.stream).await?;
                for author in &d.pull_authors {
                    asks.push(DeltaAsk {
                        channel: d.channel.clone(),
                        stream: d.stream.clone(),
                        author: author.clone(),
                        since: local_version.get(author),
                    });
                }
            }
            if !d.push_authors.is_empty() {
                let remote_version = remote_digest
                    .version_of(&d.channel, &d.stream)
                    .cloned()
                    .unwrap_or_default();
                let entries = self.store.entries_since(&d.channel, &d.stream, &remote_version).await?;
                if !entries.is_empty() {
                    push_streams.push((d.channel.clone(), d.stream.clone(), entries));
                }
            }
        }

        let delta_responses = chunk_into_messages(push_streams, &self.config);
        let delta_request = if asks.is_empty() {
            None
        } else {
            Some(Message::DeltaRequest { asks })
        };

        let mut states = self.states.write();
        states.insert(
            peer.clone(),
            if delta_request.is_some() {
                RoundState::AwaitingDeltas { started_at_ms: now_ms, outstanding: 1 }
            } else {
                RoundState::Idle
            },
        );

        Ok(RoundOutput { delta_request, delta_responses })
    }

    /// Answer a peer's `DeltaRequest` with whatever we hold for the asked
    /// `(channel, stream, author, since)` tuples.
    pub async fn handle_delta_request(&self, asks: &[DeltaAsk]) -> Result<Message, SyncError> {
        let mut by_stream: HashMap<(ChannelId, StreamId), Vec<LogEntry>> = HashMap::new();
        for ask in asks {
            let entries = self
                .store
                .entries_for_author_after(&ask.channel, &ask.stream, &ask.author, ask.since)
                .await?;
            by_stream
                .entry((ask.channel.clone(), ask.stream.clone()))
                .or_default()
                .extend(entries);
        }
        let streams = by_stream
            .into_iter()
            .map(|((channel, stream), mut entries)| {
                entries.sort_by(materialized_order);
                StreamEntries { channel, stream, entries }
            })
            .collect();
        Ok(Message::DeltaResponse { streams })
    }

    /// Merge entries delivered by a peer's `DeltaResponse` into the store,
    /// routing gapped entries through the out-of-order buffer and draining
    /// any run the new entry completes.
    pub async fn handle_delta_response(
        &self,
        peer: &NodeId,
        streams: Vec<StreamEntries>,
    ) -> Result<Vec<MergeOutcome>, SyncError> {
        let mut outcomes = Vec::new();

        for batch in streams {
            for entry in batch.entries {
                self.admit_and_commit(&batch.channel, &batch.stream, entry, &mut outcomes).await?;
            }
        }

        self.states.write().insert(peer.clone(), RoundState::Idle);
        Ok(outcomes)
    }

    async fn admit_and_commit(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        entry: LogEntry,
        outcomes: &mut Vec<MergeOutcome>,
    ) -> Result<(), SyncError> {
        let author = entry.author.clone();
        let contiguous_next = self.store.version_vector(channel, stream).await?.get(&author) + 1;
        let (admission, evictions) = self.buffer.admit(channel, stream, entry, contiguous_next);

        for eviction in evictions {
            outcomes.push(MergeOutcome::BufferOverflow {
                channel: eviction.channel,
                stream: eviction.stream,
                author: eviction.author,
                dropped_count: eviction.count,
            });
        }

        if let Admission::CommitDirect(entry) = admission {
            self.commit_and_promote(channel, stream, entry, outcomes).await?;
        }
        Ok(())
    }

    async fn commit_and_promote(
        &self,
        channel: &ChannelId,
        stream: &StreamId,
        entry: LogEntry,
        outcomes: &mut Vec<MergeOutcome>,
    ) -> Result<(), SyncError> {
        let author = entry.author.clone();
        let id = entry.id();
        self.store.append(channel, stream, entry).await?;
        outcomes.push(MergeOutcome::Committed { channel: channel.clone(), stream: stream.clone(), entry: id });

        let next = self.store.version_vector(channel, stream).await?.get(&author) + 1;
        let promoted = self.buffer.promote(channel, stream, &author, next);
        for entry in promoted {
            let id = entry.id();
            self.store.append(channel, stream, entry).await?;
            outcomes.push(MergeOutcome::Committed { channel: channel.clone(), stream: stream.clone(), entry: id });
        }
        Ok(())
    }

    /// Whether `peer`'s in-flight round has exceeded the gossip interval
    /// without completing, in which case it should be abandoned and retried
    /// on the next scheduled tick.
    pub fn round_timed_out(&self, peer: &NodeId, now_ms: u64) -> bool {
        match self.round_state(peer) {
            RoundState::Idle => false,
            RoundState::AwaitingDigestResponse { started_at_ms }
            | RoundState::AwaitingDeltas { started_at_ms, .. } => {
                now_ms.saturating_sub(started_at_ms) > self.config.gossip_interval_ms
            }
        }
    }

    pub fn abandon_round(&self, peer: &NodeId) {
        self.states.write().insert(peer.clone(), RoundState::Idle);
    }
}

/// Chunk push entries into `DeltaResponse` messages honoring
/// `max_push_entries` (entry count) and `max_message_bytes` (payload-size
/// approximation via summed `LogEntry::size_bytes`, which undercounts
/// per-entry wire overhead but keeps chunking cheap to compute).
fn chunk_into_messages(
    streams: Vec<(ChannelId, StreamId, Vec<LogEntry>)>,
    config: &EngineConfig,
) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut current_batch: Vec<StreamEntries> = Vec::new();
    let mut current_count = 0usize;
    let mut current_bytes = 0usize;

    for (channel, stream, entries) in streams {
        let mut remaining = entries;
        while !remaining.is_empty() {
            let take = remaining
                .len()
                .min(config.max_push_entries.saturating_sub(current_count).max(1));
            let chunk: Vec<LogEntry> = remaining.drain(..take).collect();
            let chunk_bytes: usize = chunk.iter().map(LogEntry::size_bytes).sum();

            if current_count > 0
                && (current_count + chunk.len() > config.max_push_entries
                    || current_bytes + chunk_bytes > config.max_message_bytes)
            {
                messages.push(Message::DeltaResponse { streams: std::mem::take(&mut current_batch) });
                current_count = 0;
                current_bytes = 0;
            }

            current_count += chunk.len();
            current_bytes += chunk_bytes;
            current_batch.push(StreamEntries { channel: channel.clone(), stream: stream.clone(), entries: chunk });
        }
    }

    if !current_batch.is_empty() {
        messages.push(Message::DeltaResponse { streams: current_batch });
    }
    messages
}
