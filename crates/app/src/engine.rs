//! Signal & state engine — runs one compiled program for one device.
//!
//! The engine owns everything a program load creates: the state cell, the
//! timers with their thresholds, the ranged properties and the light
//! directive. Replacing the engine is how a reload cancels every alarm.
//!
//! Dispatch is synchronous and re-entrant: an `emit` action runs the target
//! handler to completion before the next action of the emitting handler.
//! Nesting is bounded by the configured maximum depth.
//!
//! Everything observable a handler does is appended to a caller-supplied
//! journal of [`DeviceEvent`]s; the device shell turns those into log
//! records and cross-device notifications.

use std::collections::BTreeMap;
use std::sync::Arc;

use blinksim_domain::error::{DeclarationError, DispatchError};
use blinksim_domain::event::DeviceEvent;
use blinksim_domain::id::DeviceId;
use blinksim_domain::light::{Color, LightDirective, LightUpdate, Pulse};
use blinksim_domain::program::{Action, Compound, Condition, Expr, Hook};
use blinksim_domain::ranged::RangedInt;
use blinksim_domain::state::StateCell;
use rand::Rng;
use tokio::time::Instant;

use crate::registry::{CompiledProgram, HandlerId};
use crate::scheduler::Timer;
use crate::settings::RuntimeSettings;

/// A neighbor as seen by the event that triggered a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborView {
    pub id: DeviceId,
    /// Last public state the neighbor reported.
    pub state: Option<String>,
}

/// Data carried by the event that triggered a handler.
///
/// Signals carry no payload, so nested dispatches always see an empty
/// context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventContext {
    pub neighbors: Vec<NeighborView>,
    pub click_count: u32,
}

impl EventContext {
    #[must_use]
    pub fn with_neighbors(neighbors: Vec<NeighborView>) -> Self {
        Self {
            neighbors,
            click_count: 0,
        }
    }

    #[must_use]
    pub fn with_clicks(click_count: u32) -> Self {
        Self {
            neighbors: Vec::new(),
            click_count,
        }
    }
}

/// Runtime of one loaded program.
#[derive(Debug)]
pub struct Engine {
    program: Arc<CompiledProgram>,
    state: StateCell,
    timers: BTreeMap<String, Timer<HandlerId>>,
    properties: BTreeMap<String, RangedInt>,
    light: LightDirective,
    neighbor_count: usize,
    depth: usize,
    max_depth: usize,
}

impl Engine {
    /// Instantiate `program`: fresh state, timers at 0 with their
    /// thresholds registered, ranged properties at their initial values.
    #[must_use]
    pub fn new(program: Arc<CompiledProgram>, settings: &RuntimeSettings, now: Instant) -> Self {
        let mut timers: BTreeMap<String, Timer<HandlerId>> = program
            .timers()
            .iter()
            .map(|spec| {
                let policy = spec.policy.unwrap_or(settings.timer_policy);
                (spec.name.clone(), Timer::new(policy, now))
            })
            .collect();
        for threshold in program.thresholds() {
            if let Some(timer) = timers.get_mut(&threshold.timer) {
                // a timer that was never written cannot be past any threshold
                let _ = timer.at(threshold.time, threshold.handler, now);
            }
        }
        let properties = program
            .ranged()
            .iter()
            .map(|spec| (spec.name.clone(), spec.prototype))
            .collect();

        Self {
            state: StateCell::new(program.states().clone()),
            program,
            timers,
            properties,
            light: LightDirective::default(),
            neighbor_count: 0,
            depth: 0,
            max_depth: settings.max_dispatch_depth,
        }
    }

    #[must_use]
    pub fn program_name(&self) -> &str {
        self.program.name()
    }

    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.state.current()
    }

    #[must_use]
    pub fn light(&self) -> &LightDirective {
        &self.light
    }

    /// Current value of a timer or ranged property.
    #[must_use]
    pub fn property(&self, name: &str, now: Instant) -> Option<i64> {
        self.timers
            .get(name)
            .map(|timer| timer.value(now))
            .or_else(|| self.properties.get(name).map(RangedInt::get))
    }

    pub fn set_neighbor_count(&mut self, count: usize) {
        self.neighbor_count = count;
    }

    /// Earliest pending threshold alarm across all timers.
    #[must_use]
    pub fn next_alarm(&self) -> Option<Instant> {
        self.timers.values().filter_map(Timer::next_alarm).min()
    }

    /// Remove the earliest alarm due at `now` and return its instant and
    /// callback without running it.
    pub fn pop_due(&mut self, now: Instant) -> Option<(Instant, HandlerId)> {
        let (name, at) = self
            .timers
            .iter()
            .filter_map(|(name, timer)| timer.next_alarm().map(|at| (name, at)))
            .filter(|(_, at)| *at <= now)
            .min_by_key(|(_, at)| *at)?;
        let name = name.clone();
        let handler = self.timers.get_mut(&name)?.take_due(now)?;
        Some((at, handler))
    }

    /// Run a threshold callback at the callback boundary.
    pub fn run_threshold(&mut self, handler: HandlerId, now: Instant, journal: &mut Vec<DeviceEvent>) {
        self.run_callback(handler, &EventContext::default(), now, journal);
    }

    /// Run every handler subscribed to `hook`, in registration order. A
    /// failing handler is reported and the next one still runs.
    pub fn fire_hook(
        &mut self,
        hook: &Hook,
        context: &EventContext,
        now: Instant,
        journal: &mut Vec<DeviceEvent>,
    ) {
        let program = Arc::clone(&self.program);
        for handler in program.hooks_for(hook) {
            tracing::debug!(%hook, callback = %program.handler(handler).label, "running hook handler");
            self.run_callback(handler, context, now, journal);
        }
    }

    /// Dispatch a signal from outside the program.
    ///
    /// # Errors
    ///
    /// Returns an error when the signal is unknown or unhandled, or when
    /// its handler chain fails.
    pub fn emit(
        &mut self,
        signal: &str,
        now: Instant,
        journal: &mut Vec<DeviceEvent>,
    ) -> Result<(), DispatchError> {
        self.dispatch(signal, now, journal)
    }

    fn dispatch(
        &mut self,
        signal: &str,
        now: Instant,
        journal: &mut Vec<DeviceEvent>,
    ) -> Result<(), DispatchError> {
        let handler = self.program.signal_handler(signal)?;
        tracing::debug!(signal, depth = self.depth, "dispatching signal");
        journal.push(DeviceEvent::SignalDispatched {
            signal: signal.to_string(),
        });
        self.run_handler(handler, &EventContext::default(), now, journal)
    }

    fn run_callback(
        &mut self,
        handler: HandlerId,
        context: &EventContext,
        now: Instant,
        journal: &mut Vec<DeviceEvent>,
    ) {
        if let Err(err) = self.run_handler(handler, context, now, journal) {
            let callback = self.program.handler(handler).label.clone();
            tracing::error!(%err, %callback, "callback failed");
            journal.push(DeviceEvent::CallbackFailed {
                callback,
                error: err.to_string(),
            });
        }
    }

    fn run_handler(
        &mut self,
        handler: HandlerId,
        context: &EventContext,
        now: Instant,
        journal: &mut Vec<DeviceEvent>,
    ) -> Result<(), DispatchError> {
        if self.depth >= self.max_depth {
            return Err(DispatchError::DepthExceeded {
                limit: self.max_depth,
            });
        }
        self.depth += 1;
        let program = Arc::clone(&self.program);
        let result = self.execute(&program.handler(handler).actions, context, now, journal);
        self.depth -= 1;
        result
    }

    fn execute(
        &mut self,
        actions: &[Action],
        context: &EventContext,
        now: Instant,
        journal: &mut Vec<DeviceEvent>,
    ) -> Result<(), DispatchError> {
        for action in actions {
            match action {
                Action::SetState { state } => {
                    if let Some(change) = self.state.assign(state)? {
                        tracing::info!(%change, "state changed");
                        journal.push(change.into());
                    }
                }
                Action::Emit { signal } => self.dispatch(signal, now, journal)?,
                Action::Set { property, value } => {
                    let value = self.eval(value, context, now)?;
                    self.write(property, value, now, journal)?;
                }
                Action::Light(light) => {
                    let color = match &light.color {
                        Some(expr) => Some(Color::saturating_from(self.eval(expr, context, now)?)),
                        None => None,
                    };
                    self.light.apply(&LightUpdate {
                        color,
                        mode: light.mode,
                        interpolation: light.interpolation,
                        frequency: light.frequency,
                    });
                }
                Action::Pulse { color, duration } => {
                    self.light.pulse = Some(Pulse {
                        color: *color,
                        duration: *duration,
                    });
                }
                Action::Log { message } => {
                    let message = self.interpolate(message, now);
                    tracing::info!(%message, "program log");
                    journal.push(DeviceEvent::Log { message });
                }
                Action::If {
                    condition,
                    then,
                    otherwise,
                } => {
                    let branch = if self.test(condition, context, now)? {
                        then
                    } else {
                        otherwise
                    };
                    self.execute(branch, context, now, journal)?;
                }
            }
        }
        Ok(())
    }

    /// Write a property. Timer writes run the callbacks of thresholds the
    /// write jumped past, each at its own callback boundary.
    fn write(
        &mut self,
        property: &str,
        value: i64,
        now: Instant,
        journal: &mut Vec<DeviceEvent>,
    ) -> Result<(), DispatchError> {
        if let Some(timer) = self.timers.get_mut(property) {
            tracing::debug!(timer = property, value, "timer written");
            let bypassed = timer.set(value, now);
            for handler in bypassed {
                tracing::debug!(timer = property, callback = %self.program.handler(handler).label, "running bypassed threshold");
                self.run_callback(handler, &EventContext::default(), now, journal);
            }
            return Ok(());
        }
        if let Some(ranged) = self.properties.get_mut(property) {
            let stored = ranged.set(value);
            tracing::debug!(property, value, stored, "ranged property written");
            return Ok(());
        }
        Err(DeclarationError::UnknownProperty(property.to_string()).into())
    }

    fn eval(&self, expr: &Expr, context: &EventContext, now: Instant) -> Result<i64, DispatchError> {
        match expr {
            Expr::Number(value) => Ok(*value),
            Expr::Property(name) => self
                .property(name, now)
                .ok_or_else(|| DeclarationError::UnknownProperty(name.clone()).into()),
            Expr::Compound(compound) => match compound.as_ref() {
                Compound::Add { left, right } => Ok(self
                    .eval(left, context, now)?
                    .saturating_add(self.eval(right, context, now)?)),
                Compound::Sub { left, right } => Ok(self
                    .eval(left, context, now)?
                    .saturating_sub(self.eval(right, context, now)?)),
                Compound::Mul { left, right } => Ok(self
                    .eval(left, context, now)?
                    .saturating_mul(self.eval(right, context, now)?)),
                Compound::NeighborCount => Ok(to_i64(self.neighbor_count)),
                Compound::EventNeighbors { state } => Ok(to_i64(
                    context
                        .neighbors
                        .iter()
                        .filter(|neighbor| {
                            state.is_none() || neighbor.state.as_deref() == state.as_deref()
                        })
                        .count(),
                )),
                Compound::ClickCount => Ok(i64::from(context.click_count)),
                Compound::Random { min, max } => {
                    let min = self.eval(min, context, now)?;
                    let max = self.eval(max, context, now)?;
                    Ok(rand::thread_rng().gen_range(min.min(max)..=min.max(max)))
                }
            },
        }
    }

    fn test(
        &self,
        condition: &Condition,
        context: &EventContext,
        now: Instant,
    ) -> Result<bool, DispatchError> {
        match condition {
            Condition::StateIs { state } => Ok(self.state.current() == Some(state.as_str())),
            Condition::Compare { left, op, right } => Ok(op.holds(
                self.eval(left, context, now)?,
                self.eval(right, context, now)?,
            )),
            Condition::AnyEventNeighbor { state } => Ok(context
                .neighbors
                .iter()
                .any(|neighbor| neighbor.state.as_deref() == Some(state.as_str()))),
            Condition::All { conditions } => {
                for inner in conditions {
                    if !self.test(inner, context, now)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any { conditions } => {
                for inner in conditions {
                    if self.test(inner, context, now)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not { condition } => Ok(!self.test(condition, context, now)?),
        }
    }

    /// Replace `{state}` and `{<property>}` placeholders. Unknown
    /// placeholders are kept verbatim.
    fn interpolate(&self, message: &str, now: Instant) -> String {
        let mut out = String::with_capacity(message.len());
        let mut rest = message;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let Some(close) = tail.find('}') else {
                break;
            };
            let key = &tail[1..close];
            if key == "state" {
                out.push_str(self.state.current().unwrap_or("<uninitialized>"));
            } else if let Some(value) = self.property(key, now) {
                out.push_str(&value.to_string());
            } else {
                out.push_str(&tail[..=close]);
            }
            rest = &tail[close + 1..];
        }
        // either no more placeholders or an unterminated one
        if let Some(open) = rest.find('{') {
            out.push_str(&rest[open..]);
        } else {
            out.push_str(rest);
        }
        out
    }
}

fn to_i64(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}
