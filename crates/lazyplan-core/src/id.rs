//! Strongly-typed identifiers used across the engine.
//!
//! Downstream crates (planner, exec, operators) should *not* use raw integers for IDs.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(NodeId);
new_id!(RequestId);

impl NodeId {
    /// Position of the node in its arena.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn from_index(idx: usize) -> Self {
        Self(idx as u64)
    }
}

static NEXT_REQUEST: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

impl RequestId {
    /// Process-unique id for an execution request (log correlation only).
    pub fn next() -> Self {
        Self(NEXT_REQUEST.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }
}
