//! Async driver — owns a [`Simulation`] on one task.
//!
//! The driver waits on two things at once: the next command from a
//! [`SimulationHandle`], and the earliest deadline of any device. Every
//! device alarm is data inside the simulation, so a single `sleep_until`
//! covers all timers, debounce windows and click windows of the run.
//! After each step the new device records are published through an
//! [`EventPublisher`].

use blinksim_domain::error::BlinkError;
use blinksim_domain::id::DeviceId;
use blinksim_domain::input::Input;
use blinksim_domain::program::Program;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::ports::EventPublisher;
use crate::simulation::{DeviceSnapshot, Simulation};

type Reply<T = ()> = oneshot::Sender<Result<T, BlinkError>>;

/// Host operations, one variant per [`Simulation`] entry point.
#[derive(Debug)]
pub enum Command {
    AddDevice {
        label: String,
        reply: Reply<DeviceId>,
    },
    RemoveDevice {
        device: DeviceId,
        reply: Reply,
    },
    Attach {
        a: DeviceId,
        b: DeviceId,
        reply: Reply,
    },
    Detach {
        a: DeviceId,
        b: DeviceId,
        reply: Reply,
    },
    PowerOn {
        device: DeviceId,
        reply: Reply,
    },
    PowerOff {
        device: DeviceId,
        reply: Reply,
    },
    Restart {
        device: DeviceId,
        reply: Reply,
    },
    LoadProgram {
        device: DeviceId,
        program: Box<Program>,
        reply: Reply,
    },
    Input {
        device: DeviceId,
        input: Input,
        reply: Reply,
    },
    Emit {
        device: DeviceId,
        signal: String,
        reply: Reply,
    },
    Snapshot {
        reply: Reply<Vec<DeviceSnapshot>>,
    },
    Shutdown,
}

/// Spawn [`run`] on the current runtime.
///
/// Returns the handle used to send commands and the task, which resolves to
/// the simulation once the driver stops.
pub fn spawn<P>(
    simulation: Simulation,
    publisher: P,
    capacity: usize,
) -> (SimulationHandle, JoinHandle<Simulation>)
where
    P: EventPublisher + Send + Sync + 'static,
{
    let (sender, receiver) = mpsc::channel(capacity);
    let task = tokio::spawn(run(simulation, receiver, publisher));
    (SimulationHandle { sender }, task)
}

/// Drive the simulation until [`Command::Shutdown`] arrives or every handle
/// is dropped.
pub async fn run<P: EventPublisher>(
    mut simulation: Simulation,
    mut commands: mpsc::Receiver<Command>,
    publisher: P,
) -> Simulation {
    tracing::info!(devices = simulation.device_ids().len(), "simulation started");
    loop {
        let deadline = simulation.next_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => apply(&mut simulation, command, Instant::now()),
            },
            () = sleep_until(deadline) => simulation.advance(Instant::now()),
        }
        publish(&mut simulation, &publisher).await;
    }
    publish(&mut simulation, &publisher).await;
    tracing::info!("simulation stopped");
    simulation
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn publish<P: EventPublisher>(simulation: &mut Simulation, publisher: &P) {
    for record in simulation.take_records() {
        if let Err(err) = publisher.publish(record).await {
            tracing::warn!(%err, "failed to publish device record");
        }
    }
}

fn apply(simulation: &mut Simulation, command: Command, now: Instant) {
    // a dropped reply only means the caller stopped waiting
    match command {
        Command::AddDevice { label, reply } => {
            let _ = reply.send(Ok(simulation.add_device(label)));
        }
        Command::RemoveDevice { device, reply } => {
            let result = simulation.remove_device(device, now).map(|_| ());
            let _ = reply.send(result.map_err(BlinkError::from));
        }
        Command::Attach { a, b, reply } => {
            let _ = reply.send(simulation.attach(a, b, now).map_err(BlinkError::from));
        }
        Command::Detach { a, b, reply } => {
            let _ = reply.send(simulation.detach(a, b, now).map_err(BlinkError::from));
        }
        Command::PowerOn { device, reply } => {
            let _ = reply.send(simulation.power_on(device, now).map_err(BlinkError::from));
        }
        Command::PowerOff { device, reply } => {
            let _ = reply.send(simulation.power_off(device, now).map_err(BlinkError::from));
        }
        Command::Restart { device, reply } => {
            let _ = reply.send(simulation.restart(device, now).map_err(BlinkError::from));
        }
        Command::LoadProgram {
            device,
            program,
            reply,
        } => {
            let _ = reply.send(simulation.load_program(device, &program, now));
        }
        Command::Input {
            device,
            input,
            reply,
        } => {
            let _ = reply.send(
                simulation
                    .dispatch_input(device, input, now)
                    .map_err(BlinkError::from),
            );
        }
        Command::Emit {
            device,
            signal,
            reply,
        } => {
            let _ = reply.send(simulation.emit(device, &signal, now));
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(Ok(simulation.snapshot()));
        }
        Command::Shutdown => {}
    }
}

/// Cloneable client of a running driver.
#[derive(Debug, Clone)]
pub struct SimulationHandle {
    sender: mpsc::Sender<Command>,
}

impl SimulationHandle {
    #[must_use]
    pub fn new(sender: mpsc::Sender<Command>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, BlinkError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| BlinkError::Stopped)?;
        response.await.map_err(|_| BlinkError::Stopped)?
    }

    /// # Errors
    ///
    /// Returns [`BlinkError::Stopped`] if the driver is gone.
    pub async fn add_device(&self, label: impl Into<String>) -> Result<DeviceId, BlinkError> {
        let label = label.into();
        self.request(|reply| Command::AddDevice { label, reply })
            .await
    }

    /// # Errors
    ///
    /// Returns an error for an unknown device or a stopped driver.
    pub async fn remove_device(&self, device: DeviceId) -> Result<(), BlinkError> {
        self.request(|reply| Command::RemoveDevice { device, reply })
            .await
    }

    /// # Errors
    ///
    /// Returns an error for an unknown device or a stopped driver.
    pub async fn attach(&self, a: DeviceId, b: DeviceId) -> Result<(), BlinkError> {
        self.request(|reply| Command::Attach { a, b, reply }).await
    }

    /// # Errors
    ///
    /// Returns an error for an unknown device or a stopped driver.
    pub async fn detach(&self, a: DeviceId, b: DeviceId) -> Result<(), BlinkError> {
        self.request(|reply| Command::Detach { a, b, reply }).await
    }

    /// # Errors
    ///
    /// Returns an error for an unknown device or a stopped driver.
    pub async fn power_on(&self, device: DeviceId) -> Result<(), BlinkError> {
        self.request(|reply| Command::PowerOn { device, reply })
            .await
    }

    /// # Errors
    ///
    /// Returns an error for an unknown device or a stopped driver.
    pub async fn power_off(&self, device: DeviceId) -> Result<(), BlinkError> {
        self.request(|reply| Command::PowerOff { device, reply })
            .await
    }

    /// # Errors
    ///
    /// Returns an error for an unknown device or a stopped driver.
    pub async fn restart(&self, device: DeviceId) -> Result<(), BlinkError> {
        self.request(|reply| Command::Restart { device, reply })
            .await
    }

    /// # Errors
    ///
    /// Returns an error for an unknown device, a rejected program or a
    /// stopped driver.
    pub async fn load_program(&self, device: DeviceId, program: Program) -> Result<(), BlinkError> {
        let program = Box::new(program);
        self.request(|reply| Command::LoadProgram {
            device,
            program,
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// Returns an error for an unknown device or a stopped driver.
    pub async fn input(&self, device: DeviceId, input: Input) -> Result<(), BlinkError> {
        self.request(|reply| Command::Input {
            device,
            input,
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// Returns an error for an unknown device, a failed dispatch or a
    /// stopped driver.
    pub async fn emit(&self, device: DeviceId, signal: impl Into<String>) -> Result<(), BlinkError> {
        let signal = signal.into();
        self.request(|reply| Command::Emit {
            device,
            signal,
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// Returns [`BlinkError::Stopped`] if the driver is gone.
    pub async fn snapshot(&self) -> Result<Vec<DeviceSnapshot>, BlinkError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Ask the driver to stop. Succeeds if it is already gone.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use blinksim_domain::event::DeviceEvent;
    use blinksim_domain::input::ClickKind;
    use blinksim_domain::program::{Action, Declaration, Hook};

    use super::*;
    use crate::event_bus::InProcessEventBus;
    use crate::settings::RuntimeSettings;

    fn blinker() -> Program {
        Program::new("blinker")
            .declare(Declaration::States {
                names: vec!["waiting".to_string(), "done".to_string()],
            })
            .declare(Declaration::Timer {
                name: "fuse".to_string(),
                policy: None,
            })
            .declare(Declaration::Expires {
                timer: "fuse".to_string(),
                actions: vec![Action::SetState {
                    state: "done".to_string(),
                }],
            })
            .declare(Declaration::On {
                hook: Hook::Boot,
                actions: vec![
                    Action::SetState {
                        state: "waiting".to_string(),
                    },
                    Action::Set {
                        property: "fuse".to_string(),
                        value: 5000.into(),
                    },
                ],
            })
    }

    #[tokio::test(start_paused = true)]
    async fn should_fire_alarms_without_any_command() {
        let bus = std::sync::Arc::new(InProcessEventBus::new(64));
        let mut records = bus.subscribe();
        let (handle, task) = spawn(Simulation::new(RuntimeSettings::default()), bus, 8);

        let device = handle.add_device("tile").await.unwrap();
        handle.load_program(device, blinker()).await.unwrap();
        handle.power_on(device).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot[0].state.as_deref(), Some("waiting"));

        tokio::time::sleep(Duration::from_millis(5001)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot[0].state.as_deref(), Some("done"));

        handle.shutdown().await;
        let simulation = task.await.unwrap();
        assert_eq!(simulation.device_ids(), vec![device]);

        let mut changes = Vec::new();
        while let Ok(record) = records.try_recv() {
            if let DeviceEvent::StateChanged { current, .. } = record.event {
                changes.push(current);
            }
        }
        assert_eq!(changes, vec!["waiting".to_string(), "done".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_classify_presses_on_driver_clock() {
        let program = Program::new("counter")
            .declare(Declaration::States {
                names: vec!["single".to_string(), "double".to_string()],
            })
            .declare(Declaration::On {
                hook: Hook::Click {
                    kind: ClickKind::Double,
                },
                actions: vec![Action::SetState {
                    state: "double".to_string(),
                }],
            });
        let (handle, task) = spawn(
            Simulation::new(RuntimeSettings::default()),
            InProcessEventBus::new(16),
            8,
        );
        let device = handle.add_device("tile").await.unwrap();
        handle.load_program(device, program).await.unwrap();
        handle.power_on(device).await.unwrap();
        handle.input(device, Input::Press { duration: 40 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.input(device, Input::Press { duration: 40 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot[0].state.as_deref(), Some("double"));
        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn should_report_errors_through_handle() {
        let (handle, task) = spawn(
            Simulation::new(RuntimeSettings::default()),
            InProcessEventBus::new(16),
            8,
        );
        let ghost = DeviceId::from_raw(u64::MAX);
        assert!(matches!(
            handle.power_on(ghost).await,
            Err(BlinkError::NotFound(_))
        ));
        handle.shutdown().await;
        task.await.unwrap();
        assert!(matches!(
            handle.snapshot().await,
            Err(BlinkError::Stopped)
        ));
    }
}
