//! Plays a [`Scenario`] against a running simulation driver.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use blinksim_app::driver::SimulationHandle;
use blinksim_app::simulation::DeviceSnapshot;
use blinksim_domain::error::{BlinkError, NotFoundError};
use blinksim_domain::id::DeviceId;
use tokio::time::Instant;

use crate::scenario::{Scenario, Step, StepAction};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The scenario ran for its full duration.
    Completed,
    /// The interrupt future resolved first.
    Interrupted,
}

/// Final state of a run.
#[derive(Debug, Clone)]
pub struct Report {
    pub outcome: Outcome,
    pub devices: Vec<DeviceSnapshot>,
}

/// Create the scenario's devices, wire them, then play the timeline until
/// `duration` has elapsed or `interrupt` resolves.
///
/// Failures while setting devices up abort the run. A failing timeline step
/// is logged and the run goes on.
///
/// # Errors
///
/// Returns [`BlinkError`] if setup fails or the driver stops mid-run.
pub async fn play<F>(
    handle: &SimulationHandle,
    scenario: &Scenario,
    interrupt: F,
) -> Result<Report, BlinkError>
where
    F: Future<Output = ()>,
{
    let labels = setup(handle, scenario).await?;
    let mut interrupt = std::pin::pin!(interrupt);
    let start = Instant::now();

    let mut outcome = Outcome::Completed;
    for step in &scenario.timeline {
        if !wait_until(start + step.at(), interrupt.as_mut()).await {
            outcome = Outcome::Interrupted;
            break;
        }
        match perform(handle, &labels, step).await {
            Ok(()) => tracing::debug!(device = %step.device, action = ?step.action, "step played"),
            Err(BlinkError::Stopped) => return Err(BlinkError::Stopped),
            Err(err) => {
                tracing::warn!(%err, device = %step.device, action = ?step.action, "step failed");
            }
        }
    }
    if outcome == Outcome::Completed && !wait_until(start + scenario.duration, interrupt).await {
        outcome = Outcome::Interrupted;
    }

    let devices = handle.snapshot().await?;
    Ok(Report { outcome, devices })
}

/// Resolves to `false` if `interrupt` won the race.
async fn wait_until<F>(deadline: Instant, interrupt: Pin<&mut F>) -> bool
where
    F: Future<Output = ()>,
{
    tokio::select! {
        () = interrupt => false,
        () = tokio::time::sleep_until(deadline) => true,
    }
}

struct Labels(HashMap<String, DeviceId>);

impl Labels {
    fn get(&self, label: &str) -> Result<DeviceId, BlinkError> {
        self.0.get(label).copied().ok_or_else(|| {
            BlinkError::from(NotFoundError {
                entity: "Device",
                id: label.to_string(),
            })
        })
    }
}

async fn setup(handle: &SimulationHandle, scenario: &Scenario) -> Result<Labels, BlinkError> {
    let mut labels = HashMap::with_capacity(scenario.devices.len());
    for device in &scenario.devices {
        let id = handle.add_device(device.label.clone()).await?;
        if let Some(program) = &device.program {
            handle.load_program(id, program.clone()).await?;
        }
        labels.insert(device.label.clone(), id);
    }
    let labels = Labels(labels);

    for (a, b) in &scenario.edges {
        handle.attach(labels.get(a)?, labels.get(b)?).await?;
    }
    for device in scenario.devices.iter().filter(|device| device.powered) {
        handle.power_on(labels.get(&device.label)?).await?;
    }
    tracing::info!(
        devices = scenario.devices.len(),
        edges = scenario.edges.len(),
        steps = scenario.timeline.len(),
        "scenario ready"
    );
    Ok(labels)
}

async fn perform(handle: &SimulationHandle, labels: &Labels, step: &Step) -> Result<(), BlinkError> {
    let device = labels.get(&step.device)?;
    if let Some(input) = step.action.input() {
        return handle.input(device, input).await;
    }
    match &step.action {
        StepAction::PowerOn => handle.power_on(device).await,
        StepAction::PowerOff => handle.power_off(device).await,
        StepAction::Restart => handle.restart(device).await,
        StepAction::Emit { signal } => handle.emit(device, signal.clone()).await,
        StepAction::Attach { other } => handle.attach(device, labels.get(other)?).await,
        StepAction::Detach { other } => handle.detach(device, labels.get(other)?).await,
        StepAction::Press { .. } | StepAction::Click { .. } => Ok(()),
    }
}
