//! Scenario files — which devices exist, how they touch, and what the
//! operator does to them over time.
//!
//! ```toml
//! duration_ms = 20000
//! edges = [["a", "b"]]
//!
//! [[devices]]
//! label = "a"
//! program = "../programs/mortals.toml"
//!
//! [[devices]]
//! label = "b"
//! program = "../programs/mortals.toml"
//!
//! [[timeline]]
//! at_ms = 1000
//! device = "a"
//! action = { type = "click", kind = "triple" }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use blinksim_domain::error::LoadError;
use blinksim_domain::input::{ClickKind, Input};
use blinksim_domain::program::{Program, ProgramFormat};
use serde::Deserialize;

/// On-disk shape of a scenario.
#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    devices: Vec<DeviceEntry>,
    #[serde(default)]
    edges: Vec<[String; 2]>,
    #[serde(default)]
    timeline: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    label: String,
    #[serde(default)]
    program: Option<PathBuf>,
    #[serde(default = "powered_by_default")]
    powered: bool,
}

fn powered_by_default() -> bool {
    true
}

/// One scripted operator action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Step {
    /// Offset from the start of the run, in milliseconds.
    pub at_ms: u64,
    /// Label of the device acted upon.
    pub device: String,
    pub action: StepAction,
}

impl Step {
    #[must_use]
    pub fn at(&self) -> Duration {
        Duration::from_millis(self.at_ms)
    }
}

/// What a [`Step`] does.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    PowerOn,
    PowerOff,
    Restart,
    /// Raw button press, classified by the device.
    Press { duration: u64 },
    /// Already-classified click.
    Click { kind: ClickKind },
    Emit { signal: String },
    /// Place the device next to `other`.
    Attach { other: String },
    /// Pull the device away from `other`.
    Detach { other: String },
}

impl StepAction {
    /// The device input this action delivers, if it is an input.
    #[must_use]
    pub fn input(&self) -> Option<Input> {
        match self {
            Self::Press { duration } => Some(Input::Press {
                duration: *duration,
            }),
            Self::Click { kind } => Some(Input::click(*kind)),
            _ => None,
        }
    }
}

/// A device declared by a scenario, with its program already parsed.
#[derive(Debug, Clone)]
pub struct ScenarioDevice {
    pub label: String,
    pub program: Option<Program>,
    pub powered: bool,
}

/// A validated scenario, ready to play.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub duration: Duration,
    pub devices: Vec<ScenarioDevice>,
    pub edges: Vec<(String, String)>,
    /// Steps ordered by time; steps sharing a time keep file order.
    pub timeline: Vec<Step>,
}

impl Scenario {
    /// Read a scenario file and the programs it references.
    ///
    /// # Errors
    ///
    /// Returns a [`ScenarioError`] if a file cannot be read or parsed, or
    /// if the scenario refers to devices it does not declare.
    #[tracing::instrument]
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let text = read(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::parse(&text, base)
    }

    /// Parse scenario text; program paths are resolved against `base`.
    ///
    /// # Errors
    ///
    /// See [`Scenario::load`].
    pub fn parse(text: &str, base: &Path) -> Result<Self, ScenarioError> {
        let file: ScenarioFile = toml::from_str(text)?;

        let mut labels = HashSet::new();
        let mut devices = Vec::with_capacity(file.devices.len());
        for entry in file.devices {
            if !labels.insert(entry.label.clone()) {
                return Err(ScenarioError::DuplicateDevice(entry.label));
            }
            let program = entry
                .program
                .map(|relative| load_program(&base.join(relative)))
                .transpose()?;
            devices.push(ScenarioDevice {
                label: entry.label,
                program,
                powered: entry.powered,
            });
        }

        let known = |label: &str| {
            if labels.contains(label) {
                Ok(())
            } else {
                Err(ScenarioError::UnknownDevice(label.to_string()))
            }
        };
        let mut edges = Vec::with_capacity(file.edges.len());
        for [a, b] in file.edges {
            known(&a)?;
            known(&b)?;
            edges.push((a, b));
        }
        for step in &file.timeline {
            known(&step.device)?;
            if let StepAction::Attach { other } | StepAction::Detach { other } = &step.action {
                known(other)?;
            }
        }

        let mut timeline = file.timeline;
        timeline.sort_by_key(|step| step.at_ms);

        Ok(Self {
            duration: Duration::from_millis(file.duration_ms),
            devices,
            edges,
            timeline,
        })
    }
}

fn read(path: &Path) -> Result<String, ScenarioError> {
    std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn load_program(path: &Path) -> Result<Program, ScenarioError> {
    let text = read(path)?;
    ProgramFormat::from_path(path)
        .parse(&text)
        .map_err(|source| ScenarioError::Program {
            path: path.to_path_buf(),
            source,
        })
}

/// Scenario loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scenario")]
    Parse(#[from] toml::de::Error),
    #[error("invalid program {}", path.display())]
    Program {
        path: PathBuf,
        #[source]
        source: LoadError,
    },
    #[error("device '{0}' is declared twice")]
    DuplicateDevice(String),
    #[error("unknown device '{0}'")]
    UnknownDevice(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn programs_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../programs")
    }

    #[test]
    fn should_parse_devices_edges_and_timeline() {
        let text = r#"
            duration_ms = 5000
            edges = [["a", "b"]]

            [[devices]]
            label = "a"

            [[devices]]
            label = "b"
            powered = false

            [[timeline]]
            at_ms = 2000
            device = "b"
            action = { type = "power_on" }

            [[timeline]]
            at_ms = 500
            device = "a"
            action = { type = "press", duration = 1500 }
        "#;
        let scenario = Scenario::parse(text, Path::new(".")).unwrap();

        assert_eq!(scenario.duration, Duration::from_secs(5));
        assert_eq!(scenario.devices.len(), 2);
        assert!(scenario.devices[0].powered);
        assert!(!scenario.devices[1].powered);
        assert_eq!(scenario.edges, vec![("a".to_string(), "b".to_string())]);
        assert_eq!(scenario.timeline[0].at_ms, 500);
        assert_eq!(
            scenario.timeline[0].action.input(),
            Some(Input::Press { duration: 1500 })
        );
        assert_eq!(scenario.timeline[1].action, StepAction::PowerOn);
    }

    #[test]
    fn should_keep_file_order_when_steps_share_a_time() {
        let text = r#"
            [[devices]]
            label = "a"

            [[timeline]]
            at_ms = 100
            device = "a"
            action = { type = "emit", signal = "first" }

            [[timeline]]
            at_ms = 100
            device = "a"
            action = { type = "emit", signal = "second" }
        "#;
        let scenario = Scenario::parse(text, Path::new(".")).unwrap();
        let signals: Vec<_> = scenario
            .timeline
            .iter()
            .map(|step| match &step.action {
                StepAction::Emit { signal } => signal.as_str(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(signals, ["first", "second"]);
    }

    #[test]
    fn should_resolve_program_paths_against_base() {
        let text = r#"
            [[devices]]
            label = "a"
            program = "mortals.toml"
        "#;
        let scenario = Scenario::parse(text, &programs_dir()).unwrap();
        let program = scenario.devices[0].program.as_ref().unwrap();
        assert_eq!(program.name, "mortals");
    }

    #[test]
    fn should_reject_unknown_device_in_edges() {
        let text = r#"
            edges = [["a", "ghost"]]

            [[devices]]
            label = "a"
        "#;
        let result = Scenario::parse(text, Path::new("."));
        assert!(matches!(result, Err(ScenarioError::UnknownDevice(label)) if label == "ghost"));
    }

    #[test]
    fn should_reject_unknown_attach_target_in_timeline() {
        let text = r#"
            [[devices]]
            label = "a"

            [[timeline]]
            at_ms = 0
            device = "a"
            action = { type = "attach", other = "b" }
        "#;
        let result = Scenario::parse(text, Path::new("."));
        assert!(matches!(result, Err(ScenarioError::UnknownDevice(_))));
    }

    #[test]
    fn should_reject_duplicate_labels() {
        let text = r#"
            [[devices]]
            label = "a"

            [[devices]]
            label = "a"
        "#;
        let result = Scenario::parse(text, Path::new("."));
        assert!(matches!(result, Err(ScenarioError::DuplicateDevice(_))));
    }

    #[test]
    fn should_report_missing_program_file() {
        let text = r#"
            [[devices]]
            label = "a"
            program = "does-not-exist.toml"
        "#;
        let result = Scenario::parse(text, Path::new("."));
        assert!(matches!(result, Err(ScenarioError::Io { .. })));
    }

    #[test]
    fn should_load_bundled_programs() {
        for name in ["mortals.toml", "infect.toml", "random_colors.toml"] {
            let path = programs_dir().join(name);
            assert!(load_program(&path).is_ok(), "{name} should parse");
        }
    }
}
