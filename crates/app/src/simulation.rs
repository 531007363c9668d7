//! Host simulation — a population of devices and their physical adjacency.
//!
//! Devices never call into each other. Adjacency changes and state changes
//! are turned into [`Input`]s and queued in a FIFO mailbox; the mailbox is
//! pumped after every host operation, bounded by `max_cascade` deliveries
//! per pump so two programs that keep reacting to each other cannot stall
//! the host.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use blinksim_domain::error::{BlinkError, DispatchError, LoadError, NotFoundError};
use blinksim_domain::event::DeviceRecord;
use blinksim_domain::id::DeviceId;
use blinksim_domain::input::Input;
use blinksim_domain::light::LightDirective;
use blinksim_domain::program::Program;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::device::Device;
use crate::settings::RuntimeSettings;

/// Read-only view of a device, for renderers and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub label: String,
    pub powered: bool,
    pub program: Option<String>,
    pub state: Option<String>,
    pub light: LightDirective,
    pub neighbors: Vec<DeviceId>,
}

impl From<&Device> for DeviceSnapshot {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id(),
            label: device.label().to_string(),
            powered: device.is_powered(),
            program: device.program_name().map(ToString::to_string),
            state: device.current_state().map(ToString::to_string),
            light: device.light_directive(),
            neighbors: device.neighbors(),
        }
    }
}

/// All devices of one run.
#[derive(Debug)]
pub struct Simulation {
    settings: RuntimeSettings,
    devices: BTreeMap<DeviceId, Device>,
    edges: BTreeMap<DeviceId, BTreeSet<DeviceId>>,
    mailbox: VecDeque<(DeviceId, Input)>,
    /// When the mailbox was last left non-empty by the cascade limit.
    deferred_at: Option<Instant>,
}

impl Simulation {
    #[must_use]
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            settings,
            devices: BTreeMap::new(),
            edges: BTreeMap::new(),
            mailbox: VecDeque::new(),
            deferred_at: None,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Create a powered-off device without a program.
    pub fn add_device(&mut self, label: impl Into<String>) -> DeviceId {
        let device = Device::new(label, self.settings.clone());
        let id = device.id();
        tracing::info!(device = %id, label = device.label(), "device added");
        self.devices.insert(id, device);
        id
    }

    /// Remove a device, detaching it from every neighbor first.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] if the device does not exist.
    pub fn remove_device(&mut self, id: DeviceId, now: Instant) -> Result<Device, NotFoundError> {
        self.device(id)?;
        let neighbors = self.edges.remove(&id).unwrap_or_default();
        for neighbor in neighbors {
            if let Some(edges) = self.edges.get_mut(&neighbor) {
                edges.remove(&id);
            }
            self.mailbox
                .push_back((neighbor, Input::NeighborRemoved { neighbor: id }));
        }
        self.mailbox.retain(|(target, _)| *target != id);
        let device = self.devices.remove(&id).ok_or_else(|| not_found(id))?;
        tracing::info!(device = %id, "device removed");
        self.pump(now);
        Ok(device)
    }

    #[must_use]
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    /// # Errors
    ///
    /// Returns [`NotFoundError`] if the device does not exist.
    pub fn device(&self, id: DeviceId) -> Result<&Device, NotFoundError> {
        self.devices.get(&id).ok_or_else(|| not_found(id))
    }

    /// # Errors
    ///
    /// Returns [`NotFoundError`] if the device does not exist.
    pub fn device_mut(&mut self, id: DeviceId) -> Result<&mut Device, NotFoundError> {
        self.devices.get_mut(&id).ok_or_else(|| not_found(id))
    }

    /// Physical neighbors of `id`, as placed by the host.
    #[must_use]
    pub fn adjacent(&self, id: DeviceId) -> Vec<DeviceId> {
        self.edges
            .get(&id)
            .map(|edges| edges.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Place two devices next to each other. Each side is notified with the
    /// other's current public state. Attaching an existing edge is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] if either device does not exist.
    pub fn attach(&mut self, a: DeviceId, b: DeviceId, now: Instant) -> Result<(), NotFoundError> {
        let state_a = self.device(a)?.current_state().map(ToString::to_string);
        let state_b = self.device(b)?.current_state().map(ToString::to_string);
        if a == b || !self.edges.entry(a).or_default().insert(b) {
            return Ok(());
        }
        self.edges.entry(b).or_default().insert(a);
        tracing::debug!(%a, %b, "devices attached");
        self.mailbox.push_back((
            a,
            Input::NeighborAdded {
                neighbor: b,
                state: state_b,
            },
        ));
        self.mailbox.push_back((
            b,
            Input::NeighborAdded {
                neighbor: a,
                state: state_a,
            },
        ));
        self.pump(now);
        Ok(())
    }

    /// Separate two devices. Detaching a missing edge is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] if either device does not exist.
    pub fn detach(&mut self, a: DeviceId, b: DeviceId, now: Instant) -> Result<(), NotFoundError> {
        self.device(a)?;
        self.device(b)?;
        let removed = self
            .edges
            .get_mut(&a)
            .is_some_and(|edges| edges.remove(&b));
        if !removed {
            return Ok(());
        }
        if let Some(edges) = self.edges.get_mut(&b) {
            edges.remove(&a);
        }
        tracing::debug!(%a, %b, "devices detached");
        self.mailbox
            .push_back((a, Input::NeighborRemoved { neighbor: b }));
        self.mailbox
            .push_back((b, Input::NeighborRemoved { neighbor: a }));
        self.pump(now);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`NotFoundError`] if the device does not exist.
    pub fn power_on(&mut self, id: DeviceId, now: Instant) -> Result<(), NotFoundError> {
        self.device_mut(id)?.power_on(now);
        self.settle(id, now);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`NotFoundError`] if the device does not exist.
    pub fn power_off(&mut self, id: DeviceId, now: Instant) -> Result<(), NotFoundError> {
        self.device_mut(id)?.power_off();
        self.settle(id, now);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`NotFoundError`] if the device does not exist.
    pub fn restart(&mut self, id: DeviceId, now: Instant) -> Result<(), NotFoundError> {
        self.device_mut(id)?.restart(now);
        self.settle(id, now);
        Ok(())
    }

    /// Install a program on one device.
    ///
    /// # Errors
    ///
    /// Returns [`BlinkError::NotFound`] for an unknown device and
    /// [`BlinkError::Load`] when the program is rejected (the device keeps
    /// its previous program).
    pub fn load_program(
        &mut self,
        id: DeviceId,
        program: &Program,
        now: Instant,
    ) -> Result<(), BlinkError> {
        let result: Result<(), LoadError> = self.device_mut(id)?.load_program(program, now);
        self.settle(id, now);
        Ok(result?)
    }

    /// Feed a raw input to one device.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] if the device does not exist.
    pub fn dispatch_input(
        &mut self,
        id: DeviceId,
        input: Input,
        now: Instant,
    ) -> Result<(), NotFoundError> {
        self.device_mut(id)?.dispatch_input(input, now);
        self.settle(id, now);
        Ok(())
    }

    /// Dispatch a signal on one device.
    ///
    /// # Errors
    ///
    /// Returns [`BlinkError::NotFound`] for an unknown device and
    /// [`BlinkError::Dispatch`] when the dispatch fails.
    pub fn emit(&mut self, id: DeviceId, signal: &str, now: Instant) -> Result<(), BlinkError> {
        let result: Result<(), DispatchError> = self.device_mut(id)?.emit(signal, now);
        self.settle(id, now);
        Ok(result?)
    }

    /// Earliest instant at which any device has work, or at which deferred
    /// notifications are waiting for delivery.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let deferred = self.deferred_at.filter(|_| !self.mailbox.is_empty());
        self.devices
            .values()
            .filter_map(Device::next_deadline)
            .chain(deferred)
            .min()
    }

    /// Run every device up to `now` and deliver the notifications this
    /// produces.
    pub fn advance(&mut self, now: Instant) {
        let ids: Vec<DeviceId> = self.devices.keys().copied().collect();
        for id in ids {
            if let Some(device) = self.devices.get_mut(&id) {
                device.advance(now);
            }
            self.collect(id);
        }
        self.pump(now);
    }

    /// Snapshots of every device, in identifier order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.devices.values().map(DeviceSnapshot::from).collect()
    }

    /// Records produced by every device since the last call.
    pub fn take_records(&mut self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self
            .devices
            .values_mut()
            .flat_map(Device::take_records)
            .collect();
        records.sort_by_key(|record| record.at);
        records
    }

    /// Notifications still waiting for delivery.
    #[must_use]
    pub fn pending_notifications(&self) -> usize {
        self.mailbox.len()
    }

    fn settle(&mut self, id: DeviceId, now: Instant) {
        self.collect(id);
        self.pump(now);
    }

    /// Turn a device's state transitions into notifications for its
    /// physical neighbors.
    fn collect(&mut self, id: DeviceId) {
        let Some(device) = self.devices.get_mut(&id) else {
            return;
        };
        let changes = device.take_state_changes();
        if changes.is_empty() {
            return;
        }
        let neighbors = self.adjacent(id);
        for change in changes {
            for neighbor in &neighbors {
                self.mailbox.push_back((
                    *neighbor,
                    Input::NeighborStateChanged {
                        neighbor: id,
                        from: change.previous.clone(),
                        to: change.current.clone(),
                    },
                ));
            }
        }
    }

    fn pump(&mut self, now: Instant) {
        let mut delivered = 0;
        while let Some((target, input)) = self.mailbox.pop_front() {
            if delivered == self.settings.max_cascade {
                self.mailbox.push_front((target, input));
                self.deferred_at = Some(now);
                tracing::warn!(
                    limit = self.settings.max_cascade,
                    pending = self.mailbox.len(),
                    "notification cascade limit reached, deferring delivery"
                );
                return;
            }
            delivered += 1;
            if let Some(device) = self.devices.get_mut(&target) {
                device.dispatch_input(input, now);
                self.collect(target);
            }
        }
        self.deferred_at = None;
    }
}

fn not_found(id: DeviceId) -> NotFoundError {
    NotFoundError {
        entity: "Device",
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use blinksim_domain::event::{DeviceEvent, EventKind};
    use blinksim_domain::input::ClickKind;
    use blinksim_domain::program::{Action, Condition, Declaration, Hook};

    use super::*;

    fn ms(amount: u64) -> Duration {
        Duration::from_millis(amount)
    }

    fn set_state(state: &str) -> Action {
        Action::SetState {
            state: state.to_string(),
        }
    }

    fn log(message: &str) -> Action {
        Action::Log {
            message: message.to_string(),
        }
    }

    /// Goes dark on a single click, lights up on double; copies "dark"
    /// from its neighbors.
    fn relay() -> Program {
        Program::new("relay")
            .declare(Declaration::States {
                names: vec!["lit".to_string(), "dark".to_string()],
            })
            .declare(Declaration::On {
                hook: Hook::Boot,
                actions: vec![set_state("lit")],
            })
            .declare(Declaration::On {
                hook: Hook::Click {
                    kind: ClickKind::Single,
                },
                actions: vec![set_state("dark")],
            })
            .declare(Declaration::On {
                hook: Hook::NeighborStateTransition {
                    from: "lit".to_string(),
                    to: "dark".to_string(),
                },
                actions: vec![Action::If {
                    condition: Condition::StateIs {
                        state: "lit".to_string(),
                    },
                    then: vec![log("going dark"), set_state("dark")],
                    otherwise: vec![],
                }],
            })
    }

    fn run_deadlines(simulation: &mut Simulation) {
        let mut steps = 0;
        while let Some(at) = simulation.next_deadline() {
            simulation.advance(at);
            steps += 1;
            assert!(steps < 100, "deadlines never settled");
        }
    }

    fn running(settings: RuntimeSettings, count: usize, now: Instant) -> (Simulation, Vec<DeviceId>) {
        let mut simulation = Simulation::new(settings);
        let ids: Vec<DeviceId> = (0..count)
            .map(|index| simulation.add_device(format!("tile {index}")))
            .collect();
        for id in &ids {
            simulation.load_program(*id, &relay(), now).unwrap();
            simulation.power_on(*id, now).unwrap();
        }
        (simulation, ids)
    }

    #[test]
    fn should_confirm_neighbors_on_both_sides_after_debounce() {
        let now = Instant::now();
        let (mut simulation, ids) = running(RuntimeSettings::default(), 2, now);
        simulation.attach(ids[0], ids[1], now).unwrap();
        assert!(simulation.device(ids[0]).unwrap().neighbors().is_empty());
        assert_eq!(simulation.next_deadline(), Some(now + ms(100)));

        simulation.advance(now + ms(100));
        assert_eq!(simulation.device(ids[0]).unwrap().neighbors(), vec![ids[1]]);
        assert_eq!(simulation.device(ids[1]).unwrap().neighbors(), vec![ids[0]]);
    }

    #[test]
    fn should_propagate_state_changes_along_a_chain() {
        let now = Instant::now();
        let (mut simulation, ids) = running(RuntimeSettings::default(), 3, now);
        simulation.attach(ids[0], ids[1], now).unwrap();
        simulation.attach(ids[1], ids[2], now).unwrap();
        simulation.advance(now + ms(100));

        let later = now + ms(200);
        simulation
            .dispatch_input(ids[0], Input::click(ClickKind::Single), later)
            .unwrap();
        for id in &ids {
            assert_eq!(simulation.device(*id).unwrap().current_state(), Some("dark"));
        }
        assert_eq!(simulation.pending_notifications(), 0);
    }

    #[test]
    fn should_not_propagate_to_detached_device() {
        let now = Instant::now();
        let (mut simulation, ids) = running(RuntimeSettings::default(), 2, now);
        simulation.attach(ids[0], ids[1], now).unwrap();
        simulation.advance(now + ms(100));
        simulation.detach(ids[0], ids[1], now + ms(150)).unwrap();

        simulation
            .dispatch_input(ids[0], Input::click(ClickKind::Single), now + ms(160))
            .unwrap();
        assert_eq!(simulation.device(ids[1]).unwrap().current_state(), Some("lit"));
    }

    #[test]
    fn should_defer_notifications_beyond_cascade_limit() {
        let now = Instant::now();
        let settings = RuntimeSettings {
            max_cascade: 1,
            ..RuntimeSettings::default()
        };
        let (mut simulation, ids) = running(settings, 2, now);
        simulation.attach(ids[0], ids[1], now).unwrap();
        assert_eq!(simulation.pending_notifications(), 1);
        simulation.advance(now);
        assert_eq!(simulation.pending_notifications(), 0);
    }

    #[test]
    fn should_deliver_deferred_notifications_when_running_every_deadline() {
        let now = Instant::now();
        let settings = RuntimeSettings {
            max_cascade: 1,
            ..RuntimeSettings::default()
        };
        let (mut simulation, ids) = running(settings, 3, now);
        simulation.attach(ids[0], ids[1], now).unwrap();
        simulation.attach(ids[1], ids[2], now).unwrap();
        run_deadlines(&mut simulation);
        assert_eq!(simulation.device(ids[1]).unwrap().neighbors().len(), 2);

        simulation
            .dispatch_input(ids[0], Input::click(ClickKind::Single), now + ms(1000))
            .unwrap();
        run_deadlines(&mut simulation);
        assert_eq!(simulation.pending_notifications(), 0);
        for id in &ids {
            assert_eq!(simulation.device(*id).unwrap().current_state(), Some("dark"));
        }
    }

    #[test]
    fn should_report_deferred_delivery_as_immediate_deadline() {
        let now = Instant::now();
        let settings = RuntimeSettings {
            max_cascade: 1,
            ..RuntimeSettings::default()
        };
        let (mut simulation, ids) = running(settings, 2, now);
        simulation.attach(ids[0], ids[1], now).unwrap();
        assert_eq!(simulation.pending_notifications(), 1);
        assert_eq!(simulation.next_deadline(), Some(now));
    }

    #[test]
    fn should_notify_neighbors_when_device_is_removed() {
        let now = Instant::now();
        let (mut simulation, ids) = running(RuntimeSettings::default(), 2, now);
        simulation.attach(ids[0], ids[1], now).unwrap();
        simulation.advance(now + ms(100));

        let removed = simulation.remove_device(ids[1], now + ms(200)).unwrap();
        assert_eq!(removed.id(), ids[1]);
        simulation.advance(now + ms(300));
        assert!(simulation.device(ids[0]).unwrap().neighbors().is_empty());
        assert!(simulation.device(ids[1]).is_err());
        let kinds: Vec<EventKind> = simulation
            .device(ids[0])
            .unwrap()
            .log()
            .map(|record| record.event.kind())
            .collect();
        assert!(kinds.ends_with(&[EventKind::NeighborsLeft, EventKind::Isolated]));
    }

    #[test]
    fn should_report_unknown_device() {
        let now = Instant::now();
        let mut simulation = Simulation::new(RuntimeSettings::default());
        let ghost = DeviceId::from_raw(u64::MAX);
        assert!(simulation.power_on(ghost, now).is_err());
        assert!(matches!(
            simulation.emit(ghost, "x", now),
            Err(BlinkError::NotFound(_))
        ));
    }

    #[test]
    fn should_surface_rejected_program_as_load_error() {
        let now = Instant::now();
        let mut simulation = Simulation::new(RuntimeSettings::default());
        let id = simulation.add_device("tile");
        let broken = Program::new("broken").declare(Declaration::On {
            hook: Hook::Boot,
            actions: vec![Action::Emit {
                signal: "missing".to_string(),
            }],
        });
        assert!(matches!(
            simulation.load_program(id, &broken, now),
            Err(BlinkError::Load(_))
        ));
    }

    #[test]
    fn should_snapshot_devices_for_renderers() {
        let now = Instant::now();
        let (simulation, ids) = running(RuntimeSettings::default(), 1, now);
        let snapshot = simulation.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, ids[0]);
        assert_eq!(snapshot[0].state.as_deref(), Some("lit"));
        assert_eq!(snapshot[0].program.as_deref(), Some("relay"));
        assert!(snapshot[0].powered);
        let json = serde_json::to_value(&snapshot[0]).unwrap();
        assert_eq!(json["state"], "lit");
    }

    #[test]
    fn should_collect_records_from_all_devices() {
        let now = Instant::now();
        let (mut simulation, _) = running(RuntimeSettings::default(), 2, now);
        let records = simulation.take_records();
        assert_eq!(
            records
                .iter()
                .filter(|record| record.event == DeviceEvent::PoweredOn)
                .count(),
            2
        );
        assert!(simulation.take_records().is_empty());
    }
}
