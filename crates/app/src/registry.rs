//! Capability registry — compiles a [`Program`] into wired handlers.
//!
//! Every [`Declaration`] is applied through one registry primitive, in
//! program order. Once all declarations are applied, [`Registry::finish`]
//! runs the validation pass over every handler body, so a program whose
//! wiring is inconsistent is rejected before any of it runs.

use std::collections::{BTreeMap, BTreeSet};

use blinksim_domain::error::DeclarationError;
use blinksim_domain::program::{Action, Condition, Declaration, Expr, Hook, Program, TimerPolicy};
use blinksim_domain::ranged::RangedInt;
use blinksim_domain::state::StateSet;

/// Index of a handler inside a [`CompiledProgram`].
pub type HandlerId = usize;

/// Property name reserved for the device state.
const RESERVED: &[&str] = &["state"];

/// A handler body together with a label used in diagnostics.
#[derive(Debug, Clone)]
pub struct Handler {
    pub label: String,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone)]
pub struct TimerSpec {
    pub name: String,
    /// `None` defers to the runtime's default policy.
    pub policy: Option<TimerPolicy>,
}

#[derive(Debug, Clone)]
pub struct RangedSpec {
    pub name: String,
    /// Initial value and bounds, already validated.
    pub prototype: RangedInt,
}

#[derive(Debug, Clone)]
pub struct ThresholdSpec {
    pub timer: String,
    pub time: i64,
    pub handler: HandlerId,
}

/// A validated program, ready to be instantiated by an engine.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    name: String,
    states: StateSet,
    signals: BTreeMap<String, Option<HandlerId>>,
    timers: Vec<TimerSpec>,
    ranged: Vec<RangedSpec>,
    hooks: Vec<(Hook, HandlerId)>,
    thresholds: Vec<ThresholdSpec>,
    handlers: Vec<Handler>,
}

impl CompiledProgram {
    /// Apply every declaration of `program` and validate the result.
    ///
    /// # Errors
    ///
    /// Returns the first [`DeclarationError`] found; nothing is partially
    /// installed.
    pub fn compile(program: &Program) -> Result<Self, DeclarationError> {
        let mut registry = Registry::new(&program.name);
        for declaration in &program.declarations {
            registry.apply(declaration)?;
        }
        registry.finish()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn states(&self) -> &StateSet {
        &self.states
    }

    #[must_use]
    pub fn timers(&self) -> &[TimerSpec] {
        &self.timers
    }

    #[must_use]
    pub fn ranged(&self) -> &[RangedSpec] {
        &self.ranged
    }

    #[must_use]
    pub fn thresholds(&self) -> &[ThresholdSpec] {
        &self.thresholds
    }

    /// Resolve the handler of a signal.
    ///
    /// # Errors
    ///
    /// - [`DeclarationError::UnknownSignal`] when the signal was never declared.
    /// - [`DeclarationError::UnhandledSignal`] when it was declared but no
    ///   handler was bound.
    pub fn signal_handler(&self, signal: &str) -> Result<HandlerId, DeclarationError> {
        match self.signals.get(signal) {
            None => Err(DeclarationError::UnknownSignal(signal.to_string())),
            Some(None) => Err(DeclarationError::UnhandledSignal(signal.to_string())),
            Some(Some(handler)) => Ok(*handler),
        }
    }

    /// Handlers subscribed to `hook`, in registration order.
    pub fn hooks_for<'a>(&'a self, hook: &'a Hook) -> impl Iterator<Item = HandlerId> + 'a {
        self.hooks
            .iter()
            .filter(move |(candidate, _)| candidate == hook)
            .map(|(_, handler)| *handler)
    }

    /// # Panics
    ///
    /// Panics if `id` was not produced by this program.
    #[must_use]
    pub fn handler(&self, id: HandlerId) -> &Handler {
        &self.handlers[id]
    }

    fn has_property(&self, name: &str) -> bool {
        self.timers.iter().any(|timer| timer.name == name)
            || self.ranged.iter().any(|ranged| ranged.name == name)
    }
}

/// The capability surface a program is applied through.
#[derive(Debug)]
pub struct Registry {
    program: CompiledProgram,
}

impl Registry {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            program: CompiledProgram {
                name: name.to_string(),
                states: StateSet::default(),
                signals: BTreeMap::new(),
                timers: Vec::new(),
                ranged: Vec::new(),
                hooks: Vec::new(),
                thresholds: Vec::new(),
                handlers: Vec::new(),
            },
        }
    }

    /// Apply one declaration through the matching primitive.
    ///
    /// # Errors
    ///
    /// Propagates the primitive's [`DeclarationError`].
    pub fn apply(&mut self, declaration: &Declaration) -> Result<(), DeclarationError> {
        match declaration {
            Declaration::States { names } => self.declare_states(names),
            Declaration::Signals { names } => {
                self.declare_signals(names);
                Ok(())
            }
            Declaration::Timer { name, policy } => self.declare_timer(name, *policy),
            Declaration::Ranged {
                name,
                min,
                max,
                initial,
            } => self.declare_ranged(name, *min, *max, *initial),
            Declaration::OnSignal { signal, actions } => self.on_signal(signal, actions.clone()),
            Declaration::On { hook, actions } => {
                self.on_hook(hook.clone(), actions.clone());
                Ok(())
            }
            Declaration::Threshold {
                timer,
                time,
                actions,
            } => self.on_threshold(timer, *time, actions.clone()),
            Declaration::Expires { timer, actions } => self.on_threshold(timer, 0, actions.clone()),
        }
    }

    /// Replace the set of assignable states.
    ///
    /// # Errors
    ///
    /// Returns an error for empty or repeated names.
    pub fn declare_states(&mut self, names: &[String]) -> Result<(), DeclarationError> {
        self.program.states = StateSet::new(names.iter().cloned())?;
        Ok(())
    }

    /// Register signal names. Declaring a name twice is allowed.
    pub fn declare_signals(&mut self, names: &[String]) {
        for name in names {
            self.program.signals.entry(name.clone()).or_insert(None);
        }
    }

    /// Create a timer property.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is reserved or already taken.
    pub fn declare_timer(
        &mut self,
        name: &str,
        policy: Option<TimerPolicy>,
    ) -> Result<(), DeclarationError> {
        self.check_property_name(name)?;
        self.program.timers.push(TimerSpec {
            name: name.to_string(),
            policy,
        });
        Ok(())
    }

    /// Create a wrapping integer property; `initial` defaults to `min`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is reserved or taken, or `min > max`.
    pub fn declare_ranged(
        &mut self,
        name: &str,
        min: i64,
        max: i64,
        initial: Option<i64>,
    ) -> Result<(), DeclarationError> {
        self.check_property_name(name)?;
        let prototype = RangedInt::new(name, min, max, initial.unwrap_or(min))?;
        self.program.ranged.push(RangedSpec {
            name: name.to_string(),
            prototype,
        });
        Ok(())
    }

    /// Bind the single handler of a declared signal.
    ///
    /// # Errors
    ///
    /// - [`DeclarationError::SignalNotDeclared`] if the name is unknown.
    /// - [`DeclarationError::DuplicateHandler`] if it already has a handler.
    pub fn on_signal(&mut self, signal: &str, actions: Vec<Action>) -> Result<(), DeclarationError> {
        let next = self.program.handlers.len();
        let slot = self
            .program
            .signals
            .get_mut(signal)
            .ok_or_else(|| DeclarationError::SignalNotDeclared(signal.to_string()))?;
        if slot.is_some() {
            return Err(DeclarationError::DuplicateHandler(signal.to_string()));
        }
        *slot = Some(next);
        self.push_handler(format!("signal '{signal}'"), actions);
        Ok(())
    }

    /// Subscribe a handler to a device event.
    pub fn on_hook(&mut self, hook: Hook, actions: Vec<Action>) {
        let id = self.push_handler(format!("hook {hook}"), actions);
        self.program.hooks.push((hook, id));
    }

    /// Attach a threshold to a previously declared timer.
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError::UnknownTimer`] if the timer is not declared.
    pub fn on_threshold(
        &mut self,
        timer: &str,
        time: i64,
        actions: Vec<Action>,
    ) -> Result<(), DeclarationError> {
        if !self.program.timers.iter().any(|spec| spec.name == timer) {
            return Err(DeclarationError::UnknownTimer(timer.to_string()));
        }
        let handler = self.push_handler(format!("threshold {timer}@{time}"), actions);
        self.program.thresholds.push(ThresholdSpec {
            timer: timer.to_string(),
            time,
            handler,
        });
        Ok(())
    }

    /// Validate every handler body and return the compiled program.
    ///
    /// Signals that are declared but never handled, and timers nothing refers
    /// to, only produce warnings.
    ///
    /// # Errors
    ///
    /// Returns the first wiring defect found in a handler body.
    pub fn finish(self) -> Result<CompiledProgram, DeclarationError> {
        let program = self.program;
        let mut referenced = BTreeSet::new();
        for threshold in &program.thresholds {
            referenced.insert(threshold.timer.clone());
        }

        let validator = Validator {
            program: &program,
        };
        for handler in &program.handlers {
            validator.actions(&handler.actions, &mut referenced)?;
        }

        for (signal, handler) in &program.signals {
            if handler.is_none() {
                tracing::warn!(program = %program.name, %signal, "declared signal has no handler");
            }
        }
        for timer in &program.timers {
            if !referenced.contains(&timer.name) {
                tracing::warn!(program = %program.name, timer = %timer.name, "timer is never referenced");
            }
        }

        Ok(program)
    }

    fn check_property_name(&self, name: &str) -> Result<(), DeclarationError> {
        if RESERVED.contains(&name) {
            return Err(DeclarationError::ReservedName(name.to_string()));
        }
        if self.program.has_property(name) {
            return Err(DeclarationError::DuplicateProperty(name.to_string()));
        }
        Ok(())
    }

    fn push_handler(&mut self, label: String, actions: Vec<Action>) -> HandlerId {
        self.program.handlers.push(Handler { label, actions });
        self.program.handlers.len() - 1
    }
}

struct Validator<'a> {
    program: &'a CompiledProgram,
}

impl Validator<'_> {
    fn actions(
        &self,
        actions: &[Action],
        referenced: &mut BTreeSet<String>,
    ) -> Result<(), DeclarationError> {
        for action in actions {
            match action {
                Action::SetState { state } => self.program.states.check(state)?,
                Action::Emit { signal } => {
                    self.program.signal_handler(signal)?;
                }
                Action::Set { property, value } => {
                    self.property(property, referenced)?;
                    self.expr(value, referenced)?;
                }
                Action::If {
                    condition,
                    then,
                    otherwise,
                } => {
                    self.condition(condition, referenced)?;
                    self.actions(then, referenced)?;
                    self.actions(otherwise, referenced)?;
                }
                Action::Light(light) => {
                    if let Some(color) = &light.color {
                        self.expr(color, referenced)?;
                    }
                }
                Action::Pulse { .. } | Action::Log { .. } => {}
            }
        }
        Ok(())
    }

    fn condition(
        &self,
        condition: &Condition,
        referenced: &mut BTreeSet<String>,
    ) -> Result<(), DeclarationError> {
        match condition {
            Condition::StateIs { state } => self.program.states.check(state),
            Condition::Compare { left, right, .. } => {
                self.expr(left, referenced)?;
                self.expr(right, referenced)
            }
            // neighbor states belong to other programs
            Condition::AnyEventNeighbor { .. } => Ok(()),
            Condition::All { conditions } | Condition::Any { conditions } => conditions
                .iter()
                .try_for_each(|inner| self.condition(inner, referenced)),
            Condition::Not { condition } => self.condition(condition, referenced),
        }
    }

    fn expr(&self, expr: &Expr, referenced: &mut BTreeSet<String>) -> Result<(), DeclarationError> {
        let mut result = Ok(());
        expr.for_each_property(&mut |name| {
            if result.is_ok() {
                result = self.property(name, referenced);
            }
        });
        result
    }

    fn property(
        &self,
        name: &str,
        referenced: &mut BTreeSet<String>,
    ) -> Result<(), DeclarationError> {
        if self.program.has_property(name) {
            referenced.insert(name.to_string());
            Ok(())
        } else {
            Err(DeclarationError::UnknownProperty(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blinksim_domain::input::ClickKind;
    use blinksim_domain::program::{Compound, LightAction};

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn emit(signal: &str) -> Action {
        Action::Emit {
            signal: signal.to_string(),
        }
    }

    fn set_state(state: &str) -> Action {
        Action::SetState {
            state: state.to_string(),
        }
    }

    #[test]
    fn should_bind_handler_to_declared_signal() {
        let program = Program::new("p")
            .declare(Declaration::Signals {
                names: names(&["tick"]),
            })
            .declare(Declaration::OnSignal {
                signal: "tick".to_string(),
                actions: vec![],
            });
        let compiled = CompiledProgram::compile(&program).unwrap();
        let id = compiled.signal_handler("tick").unwrap();
        assert_eq!(compiled.handler(id).label, "signal 'tick'");
    }

    #[test]
    fn should_accept_repeated_signal_declarations() {
        let program = Program::new("p")
            .declare(Declaration::Signals {
                names: names(&["tick", "tick"]),
            })
            .declare(Declaration::Signals {
                names: names(&["tick"]),
            })
            .declare(Declaration::OnSignal {
                signal: "tick".to_string(),
                actions: vec![],
            });
        assert!(CompiledProgram::compile(&program).is_ok());
    }

    #[test]
    fn should_reject_handler_for_undeclared_signal() {
        let program = Program::new("p").declare(Declaration::OnSignal {
            signal: "tick".to_string(),
            actions: vec![],
        });
        assert_eq!(
            CompiledProgram::compile(&program).unwrap_err(),
            DeclarationError::SignalNotDeclared("tick".to_string())
        );
    }

    #[test]
    fn should_reject_second_handler_for_same_signal() {
        let mut registry = Registry::new("p");
        registry.declare_signals(&names(&["tick"]));
        registry.on_signal("tick", vec![]).unwrap();
        assert_eq!(
            registry.on_signal("tick", vec![]).unwrap_err(),
            DeclarationError::DuplicateHandler("tick".to_string())
        );
    }

    #[test]
    fn should_report_unknown_signal_when_resolving_undeclared_name() {
        let compiled = Registry::new("p").finish().unwrap();
        assert_eq!(
            compiled.signal_handler("ghost").unwrap_err(),
            DeclarationError::UnknownSignal("ghost".to_string())
        );
    }

    #[test]
    fn should_reject_emit_of_undeclared_signal() {
        let mut registry = Registry::new("p");
        registry.on_hook(Hook::Boot, vec![emit("begin play")]);
        assert_eq!(
            registry.finish().unwrap_err(),
            DeclarationError::UnknownSignal("begin play".to_string())
        );
    }

    #[test]
    fn should_reject_emit_of_unhandled_signal() {
        let mut registry = Registry::new("p");
        registry.declare_signals(&names(&["begin play"]));
        registry.on_hook(Hook::Boot, vec![emit("begin play")]);
        assert_eq!(
            registry.finish().unwrap_err(),
            DeclarationError::UnhandledSignal("begin play".to_string())
        );
    }

    #[test]
    fn should_allow_emit_of_signal_handled_later_in_program() {
        let mut registry = Registry::new("p");
        registry.declare_signals(&names(&["begin play"]));
        registry.on_hook(Hook::Boot, vec![emit("begin play")]);
        registry.on_signal("begin play", vec![]).unwrap();
        assert!(registry.finish().is_ok());
    }

    #[test]
    fn should_reject_assignment_to_undeclared_state() {
        let mut registry = Registry::new("p");
        registry.declare_states(&names(&["dead", "active"])).unwrap();
        registry.on_hook(
            Hook::Click {
                kind: ClickKind::Single,
            },
            vec![Action::If {
                condition: Condition::StateIs {
                    state: "dead".to_string(),
                },
                then: vec![set_state("zombie")],
                otherwise: vec![],
            }],
        );
        assert_eq!(
            registry.finish().unwrap_err(),
            DeclarationError::UndeclaredState("zombie".to_string())
        );
    }

    #[test]
    fn should_validate_states_against_final_declaration() {
        let mut registry = Registry::new("p");
        registry.declare_states(&names(&["a"])).unwrap();
        registry.on_hook(Hook::Boot, vec![set_state("b")]);
        registry.declare_states(&names(&["b"])).unwrap();
        let compiled = registry.finish().unwrap();
        assert!(compiled.states().contains("b"));
        assert!(!compiled.states().contains("a"));
    }

    #[test]
    fn should_reject_threshold_on_unknown_timer() {
        let mut registry = Registry::new("p");
        assert_eq!(
            registry.on_threshold("lifetime", 0, vec![]).unwrap_err(),
            DeclarationError::UnknownTimer("lifetime".to_string())
        );
    }

    #[test]
    fn should_reject_write_to_unknown_property() {
        let mut registry = Registry::new("p");
        registry.on_hook(
            Hook::Boot,
            vec![Action::Set {
                property: "lifetime".to_string(),
                value: Expr::Number(1),
            }],
        );
        assert_eq!(
            registry.finish().unwrap_err(),
            DeclarationError::UnknownProperty("lifetime".to_string())
        );
    }

    #[test]
    fn should_reject_expression_reading_unknown_property() {
        let mut registry = Registry::new("p");
        registry.declare_timer("lifetime", None).unwrap();
        registry.on_hook(
            Hook::Boot,
            vec![Action::Set {
                property: "lifetime".to_string(),
                value: Expr::from("team"),
            }],
        );
        assert_eq!(
            registry.finish().unwrap_err(),
            DeclarationError::UnknownProperty("team".to_string())
        );
    }

    #[test]
    fn should_reject_light_color_reading_unknown_property() {
        let mut registry = Registry::new("p");
        registry.on_hook(
            Hook::Boot,
            vec![Action::Light(LightAction {
                color: Some(
                    Compound::Random {
                        min: Expr::Number(0),
                        max: Expr::from("hue"),
                    }
                    .into(),
                ),
                ..LightAction::default()
            })],
        );
        assert_eq!(
            registry.finish().unwrap_err(),
            DeclarationError::UnknownProperty("hue".to_string())
        );
    }

    #[test]
    fn should_reject_reserved_and_duplicate_property_names() {
        let mut registry = Registry::new("p");
        assert_eq!(
            registry.declare_timer("state", None).unwrap_err(),
            DeclarationError::ReservedName("state".to_string())
        );
        registry.declare_timer("lifetime", None).unwrap();
        assert_eq!(
            registry.declare_ranged("lifetime", 0, 1, None).unwrap_err(),
            DeclarationError::DuplicateProperty("lifetime".to_string())
        );
    }

    #[test]
    fn should_reject_inverted_range() {
        let mut registry = Registry::new("p");
        assert!(matches!(
            registry.declare_ranged("team", 2, 1, None),
            Err(DeclarationError::InvalidRange { .. })
        ));
    }

    #[test]
    fn should_treat_expires_as_threshold_at_zero() {
        let program = Program::new("p")
            .declare(Declaration::Timer {
                name: "lifetime".to_string(),
                policy: None,
            })
            .declare(Declaration::Expires {
                timer: "lifetime".to_string(),
                actions: vec![],
            });
        let compiled = CompiledProgram::compile(&program).unwrap();
        assert_eq!(compiled.thresholds().len(), 1);
        assert_eq!(compiled.thresholds()[0].time, 0);
        assert_eq!(compiled.handler(compiled.thresholds()[0].handler).label, "threshold lifetime@0");
    }

    #[test]
    fn should_list_hook_handlers_in_registration_order() {
        let mut registry = Registry::new("p");
        registry.on_hook(Hook::Boot, vec![]);
        registry.on_hook(Hook::Isolated, vec![]);
        registry.on_hook(Hook::Boot, vec![]);
        let compiled = registry.finish().unwrap();
        let boot: Vec<_> = compiled.hooks_for(&Hook::Boot).collect();
        assert_eq!(boot, vec![0, 2]);
    }

    #[test]
    fn should_compile_empty_program() {
        let compiled = CompiledProgram::compile(&Program::new("empty")).unwrap();
        assert_eq!(compiled.name(), "empty");
        assert!(compiled.states().is_empty());
    }
}
