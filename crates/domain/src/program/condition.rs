//! Condition — a guard evaluated by `if` actions.

use serde::{Deserialize, Serialize};

use super::expr::Expr;

/// Integer comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    #[must_use]
    pub fn holds(self, left: i64, right: i64) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
        }
    }
}

/// A predicate over the device and the triggering event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// The device's own state equals `state`.
    StateIs { state: String },
    Compare {
        left: Expr,
        op: Comparison,
        right: Expr,
    },
    /// At least one neighbor carried by the triggering event was last seen
    /// in `state`.
    AnyEventNeighbor { state: String },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateIs { state } => write!(f, "state_is({state})"),
            Self::Compare { op, .. } => write!(f, "compare({op:?})"),
            Self::AnyEventNeighbor { state } => write!(f, "any_event_neighbor({state})"),
            Self::All { conditions } => write!(f, "all({})", conditions.len()),
            Self::Any { conditions } => write!(f, "any({})", conditions.len()),
            Self::Not { condition } => write!(f, "not({condition})"),
        }
    }
}
