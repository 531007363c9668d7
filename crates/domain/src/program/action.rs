//! Action — one statement of a handler body.

use serde::{Deserialize, Serialize};

use super::condition::Condition;
use super::expr::Expr;
use crate::light::{Color, Interpolation, LightMode};

/// A statement executed by a handler, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Assign the device state (validated against the declared set).
    SetState { state: String },
    /// Synchronously dispatch a declared signal.
    Emit { signal: String },
    /// Write a timer or ranged property.
    Set { property: String, value: Expr },
    /// Partially update the light directive.
    Light(LightAction),
    /// Request a one-off flash.
    Pulse { color: Color, duration: i64 },
    /// Write a line to the device log; `{state}` and `{<property>}` are
    /// replaced by their current values.
    Log { message: String },
    If {
        condition: Condition,
        #[serde(default)]
        then: Vec<Action>,
        #[serde(default, rename = "else")]
        otherwise: Vec<Action>,
    },
}

/// Light fields set by an [`Action::Light`]; absent fields are left
/// unchanged. The color is evaluated each time the action runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightAction {
    pub color: Option<Expr>,
    pub mode: Option<LightMode>,
    pub interpolation: Option<Interpolation>,
    pub frequency: Option<i64>,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetState { state } => write!(f, "set_state({state})"),
            Self::Emit { signal } => write!(f, "emit({signal})"),
            Self::Set { property, .. } => write!(f, "set({property})"),
            Self::Light(_) => f.write_str("light"),
            Self::Pulse { color, duration } => write!(f, "pulse({color}, {duration}ms)"),
            Self::Log { message } => write!(f, "log({message})"),
            Self::If { condition, .. } => write!(f, "if({condition})"),
        }
    }
}
