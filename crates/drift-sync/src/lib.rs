//! Digest/delta anti-entropy protocol, wire framing, and round scheduling.
//!
//! Grounded on the teacher's `aura-anti-entropy` crate: the same
//! wire-envelope, pure-diff-function, and round-handler layering, stripped
//! of the guard-chain authorization system this spec has no use for.

#![forbid(unsafe_code)]

pub mod anti_entropy;
pub mod digest;
pub mod prelude;
pub mod wire;

pub use anti_entropy::{AntiEntropyEngine, MergeOutcome, RoundOutput, RoundState};
pub use digest::{diff, compute_local_digest, ChannelSource, StreamDiff};
pub use wire::{
    decode_frame, encode_frame, BatchedDigest, ChannelDigest, DeltaAsk, FrameDecoder, Message, MessageKind,
    StreamDigest, StreamEntries, WIRE_SCHEMA_VERSION,
};
