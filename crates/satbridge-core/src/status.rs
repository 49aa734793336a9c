//! Process-wide readiness state.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Where the bridge is in its startup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Initializing,
    NodeDisconnected,
    Syncing,
    Scanning,
    Ready,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::NodeDisconnected => "node_disconnected",
            Self::Syncing => "syncing",
            Self::Scanning => "scanning",
            Self::Ready => "ready",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::NodeDisconnected => 1,
            Self::Syncing => 2,
            Self::Scanning => 3,
            Self::Ready => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::NodeDisconnected,
            2 => Self::Syncing,
            3 => Self::Scanning,
            4 => Self::Ready,
            _ => Self::Initializing,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free cell holding the current [`Status`]. Readers may observe a
/// value that is immediately superseded.
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: Status) -> Self {
        Self(AtomicU8::new(status.to_u8()))
    }

    pub fn get(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store `status`, returning the previous value.
    pub fn set(&self, status: Status) -> Status {
        let previous = Status::from_u8(self.0.swap(status.to_u8(), Ordering::AcqRel));
        if previous != status {
            tracing::info!(from = %previous, to = %status, "status changed");
        }
        previous
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(Status::Initializing)
    }
}
