//! Digest computation and diffing (spec §4.4, §4.6).
//!
//! Grounded on `aura-anti-entropy/src/pure.rs`'s `compute_ops_to_push` /
//! `compute_cids_to_pull` split: pure, digest-diffing functions with
//! colocated unit tests, generalized here from a flat CID set to a
//! per-channel/per-stream version vector.

use async_trait::async_trait;

use drift_core::{ChannelId, NodeId, StreamId, SyncError};
use drift_store::EntryStore;

use crate::wire::{BatchedDigest, ChannelDigest, StreamDigest};

/// What a digest-computing node needs to know about its own channel
/// topology. Implemented by `drift-node`'s channel repository; kept narrow
/// here so `drift-sync` never depends on `drift-node` (the dependency runs
/// the other way).
#[async_trait]
pub trait ChannelSource: Send + Sync {
    async fn channels(&self) -> Result<Vec<ChannelId>, SyncError>;
    async fn streams(&self, channel: &ChannelId) -> Result<Vec<StreamId>, SyncError>;
    async fn is_member(&self, channel: &ChannelId, peer: &NodeId) -> Result<bool, SyncError>;
}

/// Build the local digest to exchange with `peer`: every stream of every
/// channel `peer` is a member of (spec's "shared-when-known" scope — a
/// channel the peer isn't known to belong to is never digested to them).
pub async fn compute_local_digest(
    source: &(dyn ChannelSource),
    store: &(dyn EntryStore),
    local: NodeId,
    peer: &NodeId,
) -> Result<BatchedDigest, SyncError> {
    let mut channels = Vec::new();
    for channel in source.channels().await? {
        if !source.is_member(&channel, peer).await? {
            continue;
        }
        let mut streams = Vec::new();
        for stream in source.streams(&channel).await? {
            let version = store.version_vector(&channel, &stream).await?;
            streams.push(StreamDigest { stream, version });
        }
        if !streams.is_empty() {
            channels.push(ChannelDigest { channel, streams });
        }
    }
    Ok(BatchedDigest { from: local, channels })
}

/// What a stream's digest comparison implies for the round: which authors'
/// entries we should push to the peer, and which we should pull from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDiff {
    pub channel: ChannelId,
    pub stream: StreamId,
    pub push_authors: Vec<NodeId>,
    pub pull_authors: Vec<NodeId>,
}

/// Compare our own digest against a peer's, stream by stream.
///
/// A stream present only in `remote` (we don't yet know of it) is treated as
/// entirely ahead on the remote side: every author in it becomes a pull
/// candidate.
pub fn diff(local: &BatchedDigest, remote: &BatchedDigest) -> Vec<StreamDiff> {
    let mut diffs = Vec::new();

    for channel_digest in &local.channels {
        for stream_digest in &channel_digest.streams {
            let remote_version = remote.version_of(&channel_digest.channel, &stream_digest.stream);
            let (push_authors, pull_authors) = match remote_version {
                Some(remote_version) => (
                    stream_digest.version.authors_ahead_of(remote_version),
                    remote_version.authors_ahead_of(&stream_digest.version),
                ),
                None => (stream_digest.version.iter().map(|(a, _)| a.clone()).collect(), Vec::new()),
            };
            if !push_authors.is_empty() || !pull_authors.is_empty() {
                diffs.push(StreamDiff {
                    channel: channel_digest.channel.clone(),
                    stream: stream_digest.stream.clone(),
                    push_authors,
                    pull_authors,
                });
            }
        }
    }

    for channel_digest in &remote.channels {
        for stream_digest in &channel_digest.streams {
            let known_locally = local
                .version_of(&channel_digest.channel, &stream_digest.stream)
                .is_some();
            if known_locally {
                continue;
            }
            let pull_authors: Vec<NodeId> = stream_digest.version.iter().map(|(a, _)| a.clone()).collect();
            if !pull_authors.is_empty() {
                diffs.push(StreamDiff {
                    channel: channel_digest.channel.clone(),
                    stream: stream_digest.stream.clone(),
                    push_authors: Vec::new(),
                    pull_authors,
                });
            }
        }
    }

    diffs
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_store::VersionVector;

    fn node(n: &str) -> NodeId {
        NodeId::new(n).unwrap()
    }
    fn channel(n: &str) -> ChannelId {
        ChannelId::new(n).unwrap()
    }
    fn stream(n: &str) -> StreamId {
        StreamId::new(n).unwrap()
    }
    fn vv(pairs: &[(&str, u64)]) -> VersionVector {
        pairs.iter().map(|(a, s)| (node(a), *s)).collect()
    }

    fn digest(from: &str, channel_name: &str, stream_name: &str, version: VersionVector) -> BatchedDigest {
        BatchedDigest {
            from: node(from),
            channels: vec![ChannelDigest {
                channel: channel(channel_name),
                streams: vec![StreamDigest { stream: stream(stream_name), version }],
            }],
        }
    }

    #[test]
    fn symmetric_gap_produces_both_push_and_pull() {
        let local = digest("local", "c", "s", vv(&[("alice", 5), ("bob", 1)]));
        let remote = digest("remote", "c", "s", vv(&[("alice", 2), ("bob", 3)]));
        let diffs = diff(&local, &remote);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].push_authors, vec![node("alice")]);
        assert_eq!(diffs[0].pull_authors, vec![node("bob")]);
    }

    #[test]
    fn identical_digests_produce_no_diff() {
        let local = digest("local", "c", "s", vv(&[("alice", 5)]));
        let remote = digest("remote", "c", "s", vv(&[("alice", 5)]));
        assert!(diff(&local, &remote).is_empty());
    }

    #[test]
    fn stream_unknown_locally_is_pulled_in_full() {
        let local = BatchedDigest { from: node("local"), channels: vec![] };
        let remote = digest("remote", "c", "s", vv(&[("alice", 3)]));
        let diffs = diff(&local, &remote);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].pull_authors, vec![node("alice")]);
        assert!(diffs[0].push_authors.is_empty());
    }
}
