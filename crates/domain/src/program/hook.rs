//! Hook — the device events a program may subscribe to.

use serde::{Deserialize, Serialize};

use crate::input::ClickKind;

/// Device event a handler can be attached to.
///
/// Unlike signals, any number of handlers may subscribe to one hook; they
/// run in registration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hook {
    /// The device was powered on (or restarted).
    Boot,
    /// A click of the given classification.
    Click { kind: ClickKind },
    /// One or more neighbors joined after the debounce window settled.
    NeighborsJoined,
    /// One or more neighbors left after the debounce window settled.
    NeighborsLeft,
    /// The last remaining neighbor left.
    Isolated,
    /// A neighbor's own state moved from `from` to `to`.
    NeighborStateTransition { from: String, to: String },
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boot => f.write_str("boot"),
            Self::Click { kind } => write!(f, "click({kind:?})"),
            Self::NeighborsJoined => f.write_str("neighbors_joined"),
            Self::NeighborsLeft => f.write_str("neighbors_left"),
            Self::Isolated => f.write_str("isolated"),
            Self::NeighborStateTransition { from, to } => {
                write!(f, "neighbor_state_transition({from} -> {to})")
            }
        }
    }
}
