//! Wire protocol: message types and `[u32 length_be][u8 type][payload]`
//! framing (spec §6.1).
//!
//! Grounded on `aura-anti-entropy/src/wire.rs`'s envelope/`serialize_message`/
//! `deserialize_message` shape, generalized from a single CRDT-op payload to
//! the gossip engine's seven message kinds. Payloads are `bincode`-encoded
//! rather than the teacher's `serde_ipld_dagcbor`: this spec has no IPLD
//! content-addressing consumer, so DAG-CBOR buys nothing here (see
//! DESIGN.md).

use serde::{Deserialize, Serialize};

use drift_core::{ChannelId, NodeId, StreamId, SyncError, SyncErrorType};
use drift_store::{LogEntry, VersionVector};

pub const WIRE_SCHEMA_VERSION: u16 = 1;

/// One stream's version vector, as exchanged during digest rounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamDigest {
    pub stream: StreamId,
    pub version: VersionVector,
}

/// A channel's per-stream digests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelDigest {
    pub channel: ChannelId,
    pub streams: Vec<StreamDigest>,
}

/// A node's view of every channel/stream it shares with the peer it is
/// digesting with (spec's "shared-when-known" scope).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchedDigest {
    pub from: NodeId,
    pub channels: Vec<ChannelDigest>,
}

impl BatchedDigest {
    pub fn version_of(&self, channel: &ChannelId, stream: &StreamId) -> Option<&VersionVector> {
        self.channels
            .iter()
            .find(|c| &c.channel == channel)
            .and_then(|c| c.streams.iter().find(|s| &s.stream == stream))
            .map(|s| &s.version)
    }
}

/// A request for everything a given author has produced after `since` in
/// one stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeltaAsk {
    pub channel: ChannelId,
    pub stream: StreamId,
    pub author: NodeId,
    pub since: u64,
}

/// Entries delivered for one stream in a `DeltaResponse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntries {
    pub channel: ChannelId,
    pub stream: StreamId,
    pub entries: Vec<LogEntry>,
}

/// The seven message kinds exchanged by the gossip and SWIM protocols.
///
/// `Ping.incarnation` and `PingReq.incarnation` carry the *sender's belief of
/// the probe target's* incarnation (the value `FailureDetector::refute_self`
/// compares against), not the sender's own — this is what lets a probed node
/// tell a stale suspicion claim from a live one. `Ack.target` names who this
/// acknowledgement vouches for, and `Ack.incarnation` is that node's own,
/// current incarnation; a relay forwards a target's `Ack` to the original
/// requester unchanged, since `target` already says whom it is about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Ping { incarnation: u64 },
    Ack { target: NodeId, incarnation: u64, rtt_echo_ms: u64 },
    PingReq { target: NodeId, incarnation: u64 },
    DigestRequest { digest: BatchedDigest },
    DigestResponse { digest: BatchedDigest },
    DeltaRequest { asks: Vec<DeltaAsk> },
    DeltaResponse { streams: Vec<StreamEntries> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Ping = 0,
    Ack = 1,
    PingReq = 2,
    DigestRequest = 3,
    DigestResponse = 4,
    DeltaRequest = 5,
    DeltaResponse = 6,
}

impl TryFrom<u8> for MessageKind {
    type Error = SyncError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ping),
            1 => Ok(Self::Ack),
            2 => Ok(Self::PingReq),
            3 => Ok(Self::DigestRequest),
            4 => Ok(Self::DigestResponse),
            5 => Ok(Self::DeltaRequest),
            6 => Ok(Self::DeltaResponse),
            other => Err(corrupted(format!("unknown message type byte {other}"))),
        }
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Ping { .. } => MessageKind::Ping,
            Self::Ack { .. } => MessageKind::Ack,
            Self::PingReq { .. } => MessageKind::PingReq,
            Self::DigestRequest { .. } => MessageKind::DigestRequest,
            Self::DigestResponse { .. } => MessageKind::DigestResponse,
            Self::DeltaRequest { .. } => MessageKind::DeltaRequest,
            Self::DeltaResponse { .. } => MessageKind::DeltaResponse,
        }
    }
}

fn corrupted(message: impl Into<String>) -> SyncError {
    SyncError::protocol_error(message).with_type(SyncErrorType::MessageCorrupted)
}

/// Encode `msg` as a complete `[u32 length_be][u8 type][payload]` frame.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, SyncError> {
    let payload = bincode::serialize(msg).map_err(|e| corrupted(e.to_string()))?;
    let body_len = 1 + payload.len();
    let mut frame = Vec::with_capacity(4 + body_len);
    frame.extend_from_slice(&(body_len as u32).to_be_bytes());
    frame.push(msg.kind() as u8);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a single `[u32 length_be][u8 type][payload]` frame, requiring the
/// buffer to contain exactly one complete frame (header + body).
pub fn decode_frame(bytes: &[u8]) -> Result<Message, SyncError> {
    if bytes.len() < 5 {
        return Err(corrupted("frame shorter than the 5-byte header"));
    }
    let body_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() != 4 + body_len {
        return Err(corrupted("frame length header does not match buffer size"));
    }
    let kind = MessageKind::try_from(bytes[4])?;
    let payload = &bytes[5..];
    let msg: Message = bincode::deserialize(payload).map_err(|e| corrupted(e.to_string()))?;
    if msg.kind() != kind {
        return Err(corrupted("frame type byte does not match decoded payload"));
    }
    Ok(msg)
}

/// Incremental frame decoder for transports that do not preserve message
/// boundaries: feed it arbitrary byte chunks, drain complete frames as they
/// accumulate.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete frame out of the buffer, if one has fully
    /// arrived.
    pub fn poll(&mut self) -> Result<Option<Message>, SyncError> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let body_len =
            u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]]) as usize;
        let total_len = 4 + body_len;
        if self.buffer.len() < total_len {
            return Ok(None);
        }
        let frame: Vec<u8> = self.buffer.drain(..total_len).collect();
        decode_frame(&frame).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_ping() {
        let msg = Message::Ping { incarnation: 7 };
        let frame = encode_frame(&msg).unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.kind(), MessageKind::Ping);
    }

    #[test]
    fn rejects_a_truncated_frame() {
        let msg = Message::Ack { target: NodeId::new("p").unwrap(), incarnation: 1, rtt_echo_ms: 5 };
        let mut frame = encode_frame(&msg).unwrap();
        frame.truncate(frame.len() - 2);
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn frame_decoder_handles_split_and_coalesced_chunks() {
        let a = encode_frame(&Message::Ping { incarnation: 1 }).unwrap();
        let b = encode_frame(&Message::Ack { target: NodeId::new("p").unwrap(), incarnation: 1, rtt_echo_ms: 3 }).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.feed(&a[..2]);
        assert!(decoder.poll().unwrap().is_none());
        decoder.feed(&a[2..]);
        decoder.feed(&b);

        let first = decoder.poll().unwrap().unwrap();
        assert_eq!(first.kind(), MessageKind::Ping);
        let second = decoder.poll().unwrap().unwrap();
        assert_eq!(second.kind(), MessageKind::Ack);
        assert!(decoder.poll().unwrap().is_none());
    }

    #[test]
    fn mismatched_type_byte_is_rejected() {
        let mut frame = encode_frame(&Message::Ping { incarnation: 1 }).unwrap();
        frame[4] = MessageKind::Ack as u8;
        assert!(decode_frame(&frame).is_err());
    }
}
