//! Program — a declarative behavior description for one device.
//!
//! A program is an ordered list of [`Declaration`]s. Each declaration maps
//! onto exactly one capability primitive (declare states, declare signals,
//! declare a timer, bind a handler, …) and handler bodies are lists of
//! [`Action`]s. Programs are plain data: they are parsed from JSON or TOML
//! and compiled by the runtime's registry, never evaluated as code.
//!
//! ```toml
//! name = "random colors"
//!
//! [[declarations]]
//! type = "states"
//! names = ["colorful"]
//!
//! [[declarations]]
//! type = "on"
//! hook = { type = "boot" }
//! actions = [
//!     { type = "set_state", state = "colorful" },
//!     { type = "light", color = { op = "random", min = 0, max = 0xffffff } },
//! ]
//! ```

mod action;
mod condition;
mod expr;
mod hook;

pub use action::{Action, LightAction};
pub use condition::{Comparison, Condition};
pub use expr::{Compound, Expr};
pub use hook::Hook;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// How a timer reacts to writes that jump over its thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerPolicy {
    /// Run callbacks of pending thresholds that a write jumped past.
    pub run_bypassed: bool,
    /// Run a newly registered threshold immediately if the timer is
    /// already past it.
    pub run_new_expired: bool,
}

impl Default for TimerPolicy {
    fn default() -> Self {
        Self {
            run_bypassed: true,
            run_new_expired: false,
        }
    }
}

/// One capability call of a program, applied in order at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Declaration {
    /// Replace the set of states the program may assign.
    States { names: Vec<String> },
    /// Pre-register signal names (idempotent).
    Signals { names: Vec<String> },
    /// Create a countdown timer starting at 0.
    Timer {
        name: String,
        /// `None` uses the runtime's default policy.
        #[serde(default)]
        policy: Option<TimerPolicy>,
    },
    /// Create a wrapping integer property.
    Ranged {
        name: String,
        min: i64,
        max: i64,
        #[serde(default)]
        initial: Option<i64>,
    },
    /// Bind the single handler of a declared signal.
    OnSignal { signal: String, actions: Vec<Action> },
    /// Subscribe to a device event.
    On { hook: Hook, actions: Vec<Action> },
    /// Run `actions` when `timer` crosses `time`.
    Threshold {
        timer: String,
        time: i64,
        actions: Vec<Action>,
    },
    /// Shorthand for a threshold at time 0.
    Expires { timer: String, actions: Vec<Action> },
}

/// A complete behavior program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    #[serde(default)]
    pub declarations: Vec<Declaration>,
}

impl Program {
    /// Create an empty program.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declarations: Vec::new(),
        }
    }

    /// Append a declaration.
    #[must_use]
    pub fn declare(mut self, declaration: Declaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    /// Parse a program from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Json`] on malformed input.
    pub fn from_json(text: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a program from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Toml`] on malformed input.
    pub fn from_toml(text: &str) -> Result<Self, LoadError> {
        Ok(toml::from_str(text)?)
    }
}

/// Text encodings a program may be supplied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramFormat {
    Json,
    #[default]
    Toml,
}

impl ProgramFormat {
    /// Guess the format from a file extension; anything but `.json` is TOML.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }

    /// Parse `text` in this format.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] when the text is malformed.
    pub fn parse(self, text: &str) -> Result<Program, LoadError> {
        match self {
            Self::Json => Program::from_json(text),
            Self::Toml => Program::from_toml(text),
        }
    }
}
