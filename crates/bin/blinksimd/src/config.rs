//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `blinksim.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::path::PathBuf;

use blinksim_app::settings::RuntimeSettings;
use serde::Deserialize;

/// Upper bound for `max_dispatch_depth`; handler recursion deeper than this
/// risks overflowing the stack.
pub const MAX_DISPATCH_DEPTH: usize = 1024;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device runtime tunables.
    pub runtime: RuntimeSettings,
    /// Scenario to play.
    pub scenario: ScenarioConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Scenario selection.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Path of the scenario file; program paths inside it are relative to it.
    pub path: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Config {
    /// Load configuration from `blinksim.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, if an
    /// override cannot be parsed, or if the resulting settings are invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("blinksim.toml")?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = var("BLINKSIM_SCENARIO") {
            self.scenario.path = PathBuf::from(val);
        }
        if let Some(val) = var("BLINKSIM_DEBOUNCE_MS") {
            self.runtime.debounce_ms = val.parse().map_err(|err| {
                ConfigError::Validation(format!(
                    "BLINKSIM_DEBOUNCE_MS={val:?} is not a number: {err}"
                ))
            })?;
        }
        if let Some(val) = var("BLINKSIM_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let runtime = &self.runtime;
        let windows = [
            ("debounce_ms", runtime.debounce_ms),
            ("multi_click_window_ms", runtime.multi_click_window_ms),
            ("long_press_ms", runtime.long_press_ms),
        ];
        for (name, value) in windows {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} must be non-zero")));
            }
        }
        let limits = [
            ("max_dispatch_depth", runtime.max_dispatch_depth),
            ("max_cascade", runtime.max_cascade),
            ("event_log_capacity", runtime.event_log_capacity),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} must be non-zero")));
            }
        }
        if runtime.max_dispatch_depth > MAX_DISPATCH_DEPTH {
            return Err(ConfigError::Validation(format!(
                "max_dispatch_depth must be at most {MAX_DISPATCH_DEPTH}"
            )));
        }
        if self.scenario.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "scenario path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scenarios/demo.toml"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "blinksimd=info,blinksim_app=info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
