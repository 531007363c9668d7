//! Ranged property — a bounded integer with wraparound writes.

use serde::{Deserialize, Serialize};

use crate::error::DeclarationError;

/// Integer confined to `[min, max]`.
///
/// Every write wraps the value back into the range, however far outside
/// it lies. Writes emit no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangedInt {
    min: i64,
    max: i64,
    value: i64,
}

impl RangedInt {
    /// Create a ranged integer holding `initial` (wrapped into range).
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError::InvalidRange`] when `min > max`.
    pub fn new(name: &str, min: i64, max: i64, initial: i64) -> Result<Self, DeclarationError> {
        if min > max {
            return Err(DeclarationError::InvalidRange {
                name: name.to_string(),
                min,
                max,
            });
        }
        let mut ranged = Self {
            min,
            max,
            value: min,
        };
        ranged.set(initial);
        Ok(ranged)
    }

    #[must_use]
    pub fn get(&self) -> i64 {
        self.value
    }

    #[must_use]
    pub fn bounds(&self) -> (i64, i64) {
        (self.min, self.max)
    }

    /// Store `((value - min) mod (max - min + 1)) + min` and return it.
    pub fn set(&mut self, value: i64) -> i64 {
        let span = i128::from(self.max) - i128::from(self.min) + 1;
        let offset = (i128::from(value) - i128::from(self.min)).rem_euclid(span);
        // offset < span, so min + offset lies in [min, max]
        self.value = i64::try_from(i128::from(self.min) + offset).unwrap_or(self.min);
        self.value
    }
}
