//! Convenience re-exports, matching `drift_core::prelude`'s convention.

pub use crate::anti_entropy::{AntiEntropyEngine, MergeOutcome, RoundOutput, RoundState};
pub use crate::digest::{compute_local_digest, diff, ChannelSource, StreamDiff};
pub use crate::wire::{
    decode_frame, encode_frame, BatchedDigest, ChannelDigest, DeltaAsk, FrameDecoder, Message, MessageKind,
    StreamDigest, StreamEntries,
};
