//! Device shell — one addressable tile.
//!
//! A [`Device`] composes the engine of its current program, the neighbor
//! debouncer and the click classifier behind an on/off lifecycle. It is a
//! pure state machine over [`Instant`]s: the host calls its entry points
//! with the current time and asks it for [`Device::next_deadline`] to know
//! when to call [`Device::advance`] again.
//!
//! While the device is off, clicks and signals are dropped and due alarms
//! are consumed without running their callbacks. Topology bookkeeping keeps
//! going so the neighbor set is accurate when the device comes back on.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use blinksim_domain::error::{DeclarationError, DispatchError, LoadError};
use blinksim_domain::event::{DeviceEvent, DeviceRecord, EventKind};
use blinksim_domain::id::DeviceId;
use blinksim_domain::input::{Click, Input};
use blinksim_domain::light::LightDirective;
use blinksim_domain::program::{Hook, Program, ProgramFormat};
use blinksim_domain::state::StateChange;
use tokio::time::Instant;

use crate::click::ClickClassifier;
use crate::debounce::{Debouncer, TopologyEvent};
use crate::engine::{Engine, EventContext, NeighborView};
use crate::observer::EventEmitter;
use crate::registry::CompiledProgram;
use crate::settings::RuntimeSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Due {
    Alarm,
    Topology,
    Click,
}

/// A simulated tile running one behavior program.
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    label: String,
    powered: bool,
    settings: RuntimeSettings,
    engine: Option<Engine>,
    topology: Debouncer,
    neighbor_states: HashMap<DeviceId, Option<String>>,
    clicks: ClickClassifier,
    log: VecDeque<DeviceRecord>,
    unpublished: Vec<DeviceRecord>,
    observers: EventEmitter,
    outbox: Vec<StateChange>,
}

impl Device {
    /// Create a powered-off device with no program and a fresh identifier.
    #[must_use]
    pub fn new(label: impl Into<String>, settings: RuntimeSettings) -> Self {
        Self::with_id(DeviceId::next(), label, settings)
    }

    #[must_use]
    pub fn with_id(id: DeviceId, label: impl Into<String>, settings: RuntimeSettings) -> Self {
        Self {
            id,
            label: label.into(),
            powered: false,
            topology: Debouncer::new(settings.debounce()),
            clicks: ClickClassifier::new(settings.multi_click_window(), settings.long_press()),
            settings,
            engine: None,
            neighbor_states: HashMap::new(),
            log: VecDeque::new(),
            unpublished: Vec::new(),
            observers: EventEmitter::new(),
            outbox: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Name of the installed program, if any.
    #[must_use]
    pub fn program_name(&self) -> Option<&str> {
        self.engine.as_ref().map(Engine::program_name)
    }

    /// Current state; `None` until the program assigns one.
    #[must_use]
    pub fn current_state(&self) -> Option<&str> {
        self.engine.as_ref().and_then(Engine::state)
    }

    #[must_use]
    pub fn light_directive(&self) -> LightDirective {
        self.engine
            .as_ref()
            .map(|engine| *engine.light())
            .unwrap_or_default()
    }

    /// Read a timer or ranged property of the installed program.
    #[must_use]
    pub fn property(&self, name: &str, now: Instant) -> Option<i64> {
        self.engine.as_ref()?.property(name, now)
    }

    /// Confirmed neighbors, in identifier order.
    #[must_use]
    pub fn neighbors(&self) -> Vec<DeviceId> {
        self.topology.confirmed().iter().copied().collect()
    }

    /// The event log, oldest first.
    pub fn log(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.log.iter()
    }

    /// Register an observer for one kind of device event.
    pub fn subscribe(
        &mut self,
        kind: EventKind,
        observer: impl FnMut(&DeviceRecord) + Send + 'static,
    ) {
        self.observers.subscribe(kind, observer);
    }

    /// Records produced since the last call.
    pub fn take_records(&mut self) -> Vec<DeviceRecord> {
        std::mem::take(&mut self.unpublished)
    }

    /// State transitions produced since the last call, for delivery to
    /// neighbors.
    pub fn take_state_changes(&mut self) -> Vec<StateChange> {
        std::mem::take(&mut self.outbox)
    }

    /// Turn the device on and boot the program. Does nothing but log when
    /// the device is already on.
    pub fn power_on(&mut self, now: Instant) {
        let span = tracing::info_span!("device", id = %self.id);
        let _guard = span.enter();
        if self.powered {
            tracing::info!("already on");
            return;
        }
        self.powered = true;
        tracing::info!("powered on");
        self.record(DeviceEvent::PoweredOn);
        self.boot(now);
    }

    /// Turn the device off. Pending alarms stay scheduled but their
    /// callbacks will not run.
    pub fn power_off(&mut self) {
        let span = tracing::info_span!("device", id = %self.id);
        let _guard = span.enter();
        if !self.powered {
            return;
        }
        self.powered = false;
        self.clicks.reset();
        tracing::info!("powered off");
        self.record(DeviceEvent::PoweredOff);
    }

    /// Boot the program again, powering on first if needed.
    pub fn restart(&mut self, now: Instant) {
        if !self.powered {
            self.power_on(now);
            return;
        }
        let span = tracing::info_span!("device", id = %self.id);
        let _guard = span.enter();
        tracing::info!("restarting");
        self.boot(now);
    }

    /// Install a program.
    ///
    /// Loading is atomic: on failure the previous program keeps running and
    /// the rejection is logged. On success every alarm of the previous
    /// program is cancelled and, if the device is on, the new program boots.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Declaration`] when the program is inconsistent.
    pub fn load_program(&mut self, program: &Program, now: Instant) -> Result<(), LoadError> {
        let span = tracing::info_span!("device", id = %self.id);
        let _guard = span.enter();
        match CompiledProgram::compile(program) {
            Ok(compiled) => {
                self.install(compiled, now);
                Ok(())
            }
            Err(err) => Err(self.reject(&program.name, err.into())),
        }
    }

    /// Parse and install a program from text.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] when the text is malformed or the program is
    /// inconsistent; the previous program is kept.
    pub fn load_program_source(
        &mut self,
        source: &str,
        format: ProgramFormat,
        now: Instant,
    ) -> Result<(), LoadError> {
        match format.parse(source) {
            Ok(program) => self.load_program(&program, now),
            Err(err) => {
                let span = tracing::info_span!("device", id = %self.id);
                let _guard = span.enter();
                Err(self.reject("<unparsed>", err))
            }
        }
    }

    /// Feed one hardware-like input.
    pub fn dispatch_input(&mut self, input: Input, now: Instant) {
        let span = tracing::info_span!("device", id = %self.id);
        let _guard = span.enter();
        match input {
            Input::Press { duration } => {
                if !self.accepts("press") {
                    return;
                }
                if let Some(click) = self.clicks.press(Duration::from_millis(duration), now) {
                    self.fire_click(click, now);
                }
            }
            Input::Click { kind, count } => {
                if !self.accepts("click") {
                    return;
                }
                let click = match count {
                    Some(count) => Click { kind, count },
                    None => Click::from(kind),
                };
                self.fire_click(click, now);
            }
            Input::NeighborAdded { neighbor, state } => {
                self.neighbor_states.insert(neighbor, state);
                self.topology.neighbor_added(neighbor, now);
            }
            Input::NeighborRemoved { neighbor } => {
                self.topology.neighbor_removed(neighbor, now);
            }
            Input::NeighborStateChanged { neighbor, from, to } => {
                self.neighbor_state_changed(neighbor, from, to, now);
            }
        }
    }

    /// Dispatch a signal from the host. Dropped while the device is off.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when the signal is unknown (or no program
    /// is installed) or its handler chain fails.
    pub fn emit(&mut self, signal: &str, now: Instant) -> Result<(), DispatchError> {
        let span = tracing::info_span!("device", id = %self.id);
        let _guard = span.enter();
        if !self.powered {
            tracing::debug!(signal, "device is off, dropping signal");
            return Ok(());
        }
        let Some(engine) = self.engine.as_mut() else {
            return Err(DeclarationError::UnknownSignal(signal.to_string()).into());
        };
        let mut journal = Vec::new();
        let result = engine.emit(signal, now, &mut journal);
        self.absorb(journal);
        if let Err(err) = &result {
            tracing::warn!(%err, signal, "signal dispatch failed");
        }
        result
    }

    /// Earliest instant at which [`Device::advance`] has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.engine.as_ref().and_then(Engine::next_alarm),
            self.topology.next_flush(),
            self.clicks.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Process everything due at `now`, earliest first. Work scheduled by
    /// the callbacks themselves is processed too if it is already due.
    pub fn advance(&mut self, now: Instant) {
        let span = tracing::info_span!("device", id = %self.id);
        let _guard = span.enter();
        for _ in 0..self.settings.max_cascade {
            let Some(due) = self.next_due(now) else {
                return;
            };
            match due {
                Due::Alarm => self.run_alarm(now),
                Due::Topology => {
                    if let Some((at, events)) = self.topology.flush_due(now) {
                        self.settle_topology(events, at);
                    }
                }
                Due::Click => {
                    if let Some((at, click)) = self.clicks.take_due(now) {
                        self.fire_click(click, at);
                    }
                }
            }
        }
        tracing::warn!(limit = self.settings.max_cascade, "too much work due at once, deferring the rest");
    }

    fn next_due(&self, now: Instant) -> Option<Due> {
        [
            (self.engine.as_ref().and_then(Engine::next_alarm), Due::Alarm),
            (self.topology.next_flush(), Due::Topology),
            (self.clicks.next_deadline(), Due::Click),
        ]
        .into_iter()
        .filter_map(|(at, due)| at.filter(|at| *at <= now).map(|at| (at, due)))
        .min_by_key(|(at, _)| *at)
        .map(|(_, due)| due)
    }

    fn run_alarm(&mut self, now: Instant) {
        let powered = self.powered;
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let Some((at, handler)) = engine.pop_due(now) else {
            return;
        };
        if !powered {
            tracing::debug!(handler, "device is off, dropping threshold callback");
            return;
        }
        let mut journal = Vec::new();
        engine.run_threshold(handler, at, &mut journal);
        self.absorb(journal);
    }

    fn boot(&mut self, now: Instant) {
        self.clicks.reset();
        self.fire(&Hook::Boot, &EventContext::default(), now);
    }

    fn install(&mut self, compiled: CompiledProgram, now: Instant) {
        let name = compiled.name().to_string();
        let mut engine = Engine::new(Arc::new(compiled), &self.settings, now);
        engine.set_neighbor_count(self.topology.confirmed().len());
        self.engine = Some(engine);
        self.clicks.reset();
        tracing::info!(program = %name, "program loaded");
        self.record(DeviceEvent::ProgramLoaded { name });
        if self.powered {
            self.boot(now);
        }
    }

    fn reject(&mut self, name: &str, err: LoadError) -> LoadError {
        let reason = describe(&err);
        tracing::error!(program = name, %reason, "program rejected, keeping previous program");
        self.record(DeviceEvent::ProgramRejected { reason });
        err
    }

    fn accepts(&self, what: &str) -> bool {
        if !self.powered {
            tracing::debug!(input = what, "device is off, dropping input");
        }
        self.powered
    }

    fn fire_click(&mut self, click: Click, now: Instant) {
        tracing::debug!(kind = ?click.kind, count = click.count, "click");
        self.fire(
            &Hook::Click { kind: click.kind },
            &EventContext::with_clicks(click.count),
            now,
        );
    }

    fn neighbor_state_changed(
        &mut self,
        neighbor: DeviceId,
        from: Option<String>,
        to: String,
        now: Instant,
    ) {
        if let Some(known) = self.neighbor_states.get_mut(&neighbor) {
            *known = Some(to.clone());
        }
        if !self.powered || !self.topology.confirmed().contains(&neighbor) {
            return;
        }
        let Some(from) = from else {
            return;
        };
        let context = EventContext::with_neighbors(vec![NeighborView {
            id: neighbor,
            state: Some(to.clone()),
        }]);
        self.fire(&Hook::NeighborStateTransition { from, to }, &context, now);
    }

    fn settle_topology(&mut self, events: Vec<TopologyEvent>, at: Instant) {
        let mut departed = Vec::new();
        for event in events {
            let count = self.topology.confirmed().len();
            if let Some(engine) = self.engine.as_mut() {
                engine.set_neighbor_count(count);
            }
            let (record, hook, neighbors) = match event {
                TopologyEvent::Joined(neighbors) => (
                    DeviceEvent::NeighborsJoined {
                        neighbors: neighbors.clone(),
                    },
                    Hook::NeighborsJoined,
                    neighbors,
                ),
                TopologyEvent::Left(neighbors) => {
                    departed.extend(neighbors.iter().copied());
                    (
                        DeviceEvent::NeighborsLeft {
                            neighbors: neighbors.clone(),
                        },
                        Hook::NeighborsLeft,
                        neighbors,
                    )
                }
                TopologyEvent::Isolated(neighbors) => (DeviceEvent::Isolated, Hook::Isolated, neighbors),
            };
            tracing::info!(event = %record, neighbors = count, "topology settled");
            self.record(record);
            let context = EventContext::with_neighbors(self.views(&neighbors));
            self.fire(&hook, &context, at);
        }
        for neighbor in departed {
            if !self.topology.is_joining(neighbor) {
                self.neighbor_states.remove(&neighbor);
            }
        }
    }

    fn views(&self, neighbors: &[DeviceId]) -> Vec<NeighborView> {
        neighbors
            .iter()
            .map(|id| NeighborView {
                id: *id,
                state: self.neighbor_states.get(id).cloned().flatten(),
            })
            .collect()
    }

    fn fire(&mut self, hook: &Hook, context: &EventContext, now: Instant) {
        if !self.powered {
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let mut journal = Vec::new();
        engine.fire_hook(hook, context, now, &mut journal);
        self.absorb(journal);
    }

    fn absorb(&mut self, journal: Vec<DeviceEvent>) {
        for event in journal {
            self.record(event);
        }
    }

    fn record(&mut self, event: DeviceEvent) {
        if let DeviceEvent::StateChanged { previous, current } = &event {
            self.outbox.push(StateChange {
                previous: previous.clone(),
                current: current.clone(),
            });
        }
        let record = DeviceRecord::new(self.id, event);
        self.observers.emit(&record);
        if self.settings.event_log_capacity > 0 {
            if self.log.len() == self.settings.event_log_capacity {
                self.log.pop_front();
            }
            self.log.push_back(record.clone());
        }
        self.unpublished.push(record);
    }
}

/// Flatten an error and its sources into one line.
fn describe(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
