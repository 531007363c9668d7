//! Common error types used across the workspace.
//!
//! Each failure class has its own typed enum and converts into
//! [`BlinkError`] via `#[from]`:
//!
//! - [`DeclarationError`] — a defect in a program's wiring (unknown signal,
//!   duplicate handler, undeclared state, …). Always fatal to the operation.
//! - [`LoadError`] — a program could not be installed.
//! - [`DispatchError`] — a signal dispatch or handler run failed.
//! - [`NotFoundError`] — a device id that does not exist.

/// A program wiring defect.
///
/// These never describe a recoverable runtime condition: they are reported
/// and the responsible operation is aborted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclarationError {
    /// A signal was dispatched (or referenced) without being declared.
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),

    /// A handler was registered for a signal that was never declared.
    #[error("signal name not declared: '{0}'")]
    SignalNotDeclared(String),

    /// A second handler was registered for the same signal.
    #[error("signal handler already defined: '{0}'")]
    DuplicateHandler(String),

    /// A declared signal is emitted but no handler was ever bound to it.
    #[error("signal '{0}' has no handler")]
    UnhandledSignal(String),

    /// A state assignment targeted a value outside the declared set.
    #[error("state '{0}' is not one of the declared states")]
    UndeclaredState(String),

    /// The same state name appears twice in one declaration.
    #[error("state '{0}' declared twice")]
    DuplicateState(String),

    /// A state name is empty.
    #[error("state names must not be empty")]
    EmptyStateName,

    /// A threshold or write referenced a timer that does not exist.
    #[error("no such timer: '{0}'")]
    UnknownTimer(String),

    /// An expression or write referenced a property that does not exist.
    #[error("no such property: '{0}'")]
    UnknownProperty(String),

    /// Two timers/properties share one name.
    #[error("property '{0}' declared twice")]
    DuplicateProperty(String),

    /// A property uses a name reserved by the runtime.
    #[error("property name '{0}' is reserved")]
    ReservedName(String),

    /// A ranged property was declared with `min > max`.
    #[error("invalid range for '{name}': {min} > {max}")]
    InvalidRange { name: String, min: i64, max: i64 },
}

/// Failure to install a program on a device.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The JSON program text is malformed.
    #[error("failed to parse JSON program")]
    Json(#[from] serde_json::Error),

    /// The TOML program text is malformed.
    #[error("failed to parse TOML program")]
    Toml(#[from] toml::de::Error),

    /// The program parsed but its declarations are inconsistent.
    #[error("invalid program")]
    Declaration(#[from] DeclarationError),
}

/// Failure while dispatching a signal or running a callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// A wiring defect surfaced at run time.
    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    /// Nested signal emission went deeper than the configured limit.
    #[error("signal dispatch exceeded maximum depth of {limit}")]
    DepthExceeded { limit: usize },
}

/// A lookup for a non-existent resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} not found: {id}")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// Top-level error for the workspace.
#[derive(Debug, thiserror::Error)]
pub enum BlinkError {
    #[error("declaration error")]
    Declaration(#[from] DeclarationError),

    #[error("program load error")]
    Load(#[from] LoadError),

    #[error("dispatch error")]
    Dispatch(#[from] DispatchError),

    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// The simulation task is gone; no more commands can be served.
    #[error("simulation is not running")]
    Stopped,
}
