//! Identifier newtypes used across the Drift workspace.
//!
//! All identifiers wrap a non-empty UTF-8 string and compare by value, the
//! same convention `aura-core`'s `SessionId`/`EventId` newtypes follow.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when constructing an identifier from an empty string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identifier must not be empty")]
pub struct EmptyIdentifier;

macro_rules! string_identifier {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Construct a new identifier, rejecting the empty string.
            pub fn new(value: impl Into<String>) -> Result<Self, EmptyIdentifier> {
                let value = value.into();
                if value.is_empty() {
                    return Err(EmptyIdentifier);
                }
                Ok(Self(value))
            }

            /// Borrow the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = EmptyIdentifier;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_identifier!(NodeId, "node:");
string_identifier!(ChannelId, "channel:");
string_identifier!(StreamId, "stream:");

/// Derived identity of a single log entry: its author and sequence number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogEntryId {
    pub author: NodeId,
    pub sequence: u64,
}

impl LogEntryId {
    pub fn new(author: NodeId, sequence: u64) -> Self {
        Self { author, sequence }
    }
}

impl fmt::Display for LogEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.author, self.sequence)
    }
}
