//! Device events — immutable records of what a device did.
//!
//! Events are appended to the device's event log, handed to the device's
//! observers and published on the host's event bus.

use serde::{Deserialize, Serialize};

use crate::id::DeviceId;
use crate::state::StateChange;
use crate::time::Timestamp;

/// Something that happened on one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    PoweredOn,
    PoweredOff,
    ProgramLoaded {
        name: String,
    },
    /// A program failed to load; the previous one is still installed.
    ProgramRejected {
        reason: String,
    },
    StateChanged {
        previous: Option<String>,
        current: String,
    },
    SignalDispatched {
        signal: String,
    },
    NeighborsJoined {
        neighbors: Vec<DeviceId>,
    },
    NeighborsLeft {
        neighbors: Vec<DeviceId>,
    },
    Isolated,
    /// A line written by the program's `log` action.
    Log {
        message: String,
    },
    /// A handler or threshold callback aborted with an error.
    CallbackFailed {
        callback: String,
        error: String,
    },
}

/// Discriminant of [`DeviceEvent`], used to subscribe to one kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PoweredOn,
    PoweredOff,
    ProgramLoaded,
    ProgramRejected,
    StateChanged,
    SignalDispatched,
    NeighborsJoined,
    NeighborsLeft,
    Isolated,
    Log,
    CallbackFailed,
}

impl DeviceEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PoweredOn => EventKind::PoweredOn,
            Self::PoweredOff => EventKind::PoweredOff,
            Self::ProgramLoaded { .. } => EventKind::ProgramLoaded,
            Self::ProgramRejected { .. } => EventKind::ProgramRejected,
            Self::StateChanged { .. } => EventKind::StateChanged,
            Self::SignalDispatched { .. } => EventKind::SignalDispatched,
            Self::NeighborsJoined { .. } => EventKind::NeighborsJoined,
            Self::NeighborsLeft { .. } => EventKind::NeighborsLeft,
            Self::Isolated => EventKind::Isolated,
            Self::Log { .. } => EventKind::Log,
            Self::CallbackFailed { .. } => EventKind::CallbackFailed,
        }
    }
}

impl From<StateChange> for DeviceEvent {
    fn from(change: StateChange) -> Self {
        Self::StateChanged {
            previous: change.previous,
            current: change.current,
        }
    }
}

impl std::fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PoweredOn => f.write_str("powered_on"),
            Self::PoweredOff => f.write_str("powered_off"),
            Self::ProgramLoaded { name } => write!(f, "program_loaded({name})"),
            Self::ProgramRejected { reason } => write!(f, "program_rejected({reason})"),
            Self::StateChanged { previous, current } => write!(
                f,
                "state_changed({} -> {current})",
                previous.as_deref().unwrap_or("<uninitialized>")
            ),
            Self::SignalDispatched { signal } => write!(f, "signal({signal})"),
            Self::NeighborsJoined { neighbors } => write!(f, "neighbors_joined({})", neighbors.len()),
            Self::NeighborsLeft { neighbors } => write!(f, "neighbors_left({})", neighbors.len()),
            Self::Isolated => f.write_str("isolated"),
            Self::Log { message } => write!(f, "log({message})"),
            Self::CallbackFailed { callback, error } => {
                write!(f, "callback_failed({callback}: {error})")
            }
        }
    }
}

/// A device event stamped with its origin and wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device: DeviceId,
    pub at: Timestamp,
    pub event: DeviceEvent,
}

impl DeviceRecord {
    /// Stamp `event` with the current time.
    #[must_use]
    pub fn new(device: DeviceId, event: DeviceEvent) -> Self {
        Self {
            device,
            at: crate::time::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_map_events_to_their_kind() {
        assert_eq!(DeviceEvent::Isolated.kind(), EventKind::Isolated);
        let event = DeviceEvent::StateChanged {
            previous: None,
            current: "dead".to_string(),
        };
        assert_eq!(event.kind(), EventKind::StateChanged);
    }

    #[test]
    fn should_convert_state_change_into_event() {
        let event: DeviceEvent = StateChange {
            previous: Some("dead".to_string()),
            current: "inactive".to_string(),
        }
        .into();
        assert_eq!(event.to_string(), "state_changed(dead -> inactive)");
    }

    #[test]
    fn should_serialize_with_type_tag() {
        let event = DeviceEvent::SignalDispatched {
            signal: "begin play".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "signal_dispatched");
        assert_eq!(json["signal"], "begin play");
    }

    #[test]
    fn should_stamp_record_with_device() {
        let id = DeviceId::next();
        let record = DeviceRecord::new(id, DeviceEvent::PoweredOn);
        assert_eq!(record.device, id);
        assert_eq!(record.event, DeviceEvent::PoweredOn);
    }
}
