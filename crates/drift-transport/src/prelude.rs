//! Convenience re-exports, matching `drift_core::prelude`'s convention.

pub use crate::in_memory::{InMemoryMessagePort, InMemoryNetwork};
pub use crate::message_port::MessagePort;
