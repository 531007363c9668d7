//! Device state — a named mode constrained to a declared set.

use serde::{Deserialize, Serialize};

use crate::error::DeclarationError;

/// Ordered set of distinct state names declared by a program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct StateSet(Vec<String>);

impl StateSet {
    /// Build a state set, rejecting empty or repeated names.
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError::EmptyStateName`] or
    /// [`DeclarationError::DuplicateState`].
    pub fn new<I, S>(names: I) -> Result<Self, DeclarationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Vec::new();
        for name in names {
            let name = name.into();
            if name.is_empty() {
                return Err(DeclarationError::EmptyStateName);
            }
            if set.contains(&name) {
                return Err(DeclarationError::DuplicateState(name));
            }
            set.push(name);
        }
        Ok(Self(set))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|s| s == name)
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check membership, returning the declaration error on failure.
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError::UndeclaredState`] when `name` is not a member.
    pub fn check(&self, name: &str) -> Result<(), DeclarationError> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(DeclarationError::UndeclaredState(name.to_string()))
        }
    }
}

impl TryFrom<Vec<String>> for StateSet {
    type Error = DeclarationError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StateSet> for Vec<String> {
    fn from(value: StateSet) -> Self {
        value.0
    }
}

/// An actual transition between two states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// `None` when the device leaves the uninitialized sentinel.
    pub previous: Option<String>,
    pub current: String,
}

/// The current state of a device together with its declared set.
///
/// `current` is `None` (the uninitialized sentinel) until the program
/// assigns a state; afterwards it is always a member of `declared`.
#[derive(Debug, Clone, Default)]
pub struct StateCell {
    declared: StateSet,
    current: Option<String>,
}

impl StateCell {
    #[must_use]
    pub fn new(declared: StateSet) -> Self {
        Self {
            declared,
            current: None,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    #[must_use]
    pub fn declared(&self) -> &StateSet {
        &self.declared
    }

    /// Assign a new state.
    ///
    /// The value is validated even when it equals the current state.
    /// Returns the transition only when the state actually changed.
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError::UndeclaredState`] and leaves the current
    /// state untouched when `value` is not declared.
    pub fn assign(&mut self, value: &str) -> Result<Option<StateChange>, DeclarationError> {
        self.declared.check(value)?;
        if self.current.as_deref() == Some(value) {
            return Ok(None);
        }
        let previous = self.current.replace(value.to_string());
        Ok(Some(StateChange {
            previous,
            current: value.to_string(),
        }))
    }
}

impl std::fmt::Display for StateChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.previous {
            Some(previous) => write!(f, "{previous} -> {}", self.current),
            None => write!(f, "<uninitialized> -> {}", self.current),
        }
    }
}
