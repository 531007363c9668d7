//! Inputs — hardware-like events fed into a device by its host.

use serde::{Deserialize, Serialize};

use crate::id::DeviceId;

/// Classification of a user click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickKind {
    Single,
    Double,
    Triple,
    Long,
    /// Four or more quick clicks.
    Multi,
}

/// A classified click together with how many presses produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Click {
    pub kind: ClickKind,
    pub count: u32,
}

impl Click {
    /// Classify `count` quick presses.
    ///
    /// Returns `None` for zero presses.
    #[must_use]
    pub fn from_count(count: u32) -> Option<Self> {
        let kind = match count {
            0 => return None,
            1 => ClickKind::Single,
            2 => ClickKind::Double,
            3 => ClickKind::Triple,
            _ => ClickKind::Multi,
        };
        Some(Self { kind, count })
    }

    /// A single long press.
    #[must_use]
    pub fn long() -> Self {
        Self {
            kind: ClickKind::Long,
            count: 1,
        }
    }
}

impl From<ClickKind> for Click {
    fn from(kind: ClickKind) -> Self {
        let count = match kind {
            ClickKind::Single | ClickKind::Long => 1,
            ClickKind::Double => 2,
            ClickKind::Triple => 3,
            ClickKind::Multi => 4,
        };
        Self { kind, count }
    }
}

/// An event delivered to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Input {
    /// A raw button press lasting `duration` milliseconds; classified by the
    /// device into a [`Click`].
    Press { duration: u64 },
    /// An already-classified click.
    Click {
        kind: ClickKind,
        #[serde(default)]
        count: Option<u32>,
    },
    /// A neighbor appeared next to this device; `state` is its public state
    /// at that moment.
    NeighborAdded {
        neighbor: DeviceId,
        #[serde(default)]
        state: Option<String>,
    },
    /// A neighbor disappeared.
    NeighborRemoved { neighbor: DeviceId },
    /// A neighbor's own state changed.
    NeighborStateChanged {
        neighbor: DeviceId,
        from: Option<String>,
        to: String,
    },
}

impl Input {
    /// Build a classified click input.
    #[must_use]
    pub fn click(kind: ClickKind) -> Self {
        Self::Click { kind, count: None }
    }
}

impl std::fmt::Display for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Press { duration } => write!(f, "press({duration}ms)"),
            Self::Click { kind, .. } => write!(f, "click({kind:?})"),
            Self::NeighborAdded { neighbor, .. } => write!(f, "neighbor_added({neighbor})"),
            Self::NeighborRemoved { neighbor } => write!(f, "neighbor_removed({neighbor})"),
            Self::NeighborStateChanged { neighbor, to, .. } => {
                write!(f, "neighbor_state_changed({neighbor} -> {to})")
            }
        }
    }
}
