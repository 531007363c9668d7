//! Light directive — the abstract description of a device's light output.
//!
//! The runtime only stores and mutates the directive; turning it into
//! pixels (color interpolation, pulsing) is the renderer's concern.

use serde::{Deserialize, Serialize};

/// 24-bit RGB color, e.g. `0x00ff00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u32);

impl Color {
    pub const WHITE: Self = Self(0x00ff_ffff);
    pub const BLACK: Self = Self(0x0000_0000);

    /// Color from a computed value, clamped into the 24-bit range.
    #[must_use]
    pub fn saturating_from(value: i64) -> Self {
        Self(u32::try_from(value.clamp(0, 0x00ff_ffff)).unwrap_or_default())
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:06x}", self.0 & 0x00ff_ffff)
    }
}

/// How the light is driven over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightMode {
    #[default]
    Constant,
    Pulsing,
}

/// Interpolation curve used while pulsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Linear,
    Sinusoidal,
}

/// A one-off flash requested on top of the steady directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pulse {
    pub color: Color,
    /// Duration in milliseconds.
    pub duration: i64,
}

/// Desired visual output of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightDirective {
    pub color: Color,
    pub mode: LightMode,
    pub interpolation: Interpolation,
    /// Pulse period in milliseconds (meaningful in [`LightMode::Pulsing`]).
    pub frequency: i64,
    /// Most recent flash request, if any.
    pub pulse: Option<Pulse>,
}

impl Default for LightDirective {
    fn default() -> Self {
        Self {
            color: Color::WHITE,
            mode: LightMode::Constant,
            interpolation: Interpolation::Linear,
            frequency: 1000,
            pulse: None,
        }
    }
}

/// Partial update of a [`LightDirective`]; absent fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightUpdate {
    pub color: Option<Color>,
    pub mode: Option<LightMode>,
    pub interpolation: Option<Interpolation>,
    pub frequency: Option<i64>,
}

impl LightDirective {
    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &LightUpdate) {
        if let Some(color) = update.color {
            self.color = color;
        }
        if let Some(mode) = update.mode {
            self.mode = mode;
        }
        if let Some(interpolation) = update.interpolation {
            self.interpolation = interpolation;
        }
        if let Some(frequency) = update.frequency {
            self.frequency = frequency;
        }
    }
}
