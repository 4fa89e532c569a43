//! The state machine (§3, §4.5): interprets states, entry actions, and
//! transitions, and owns the main control loop.

use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, RwLock},
};

use crate::{
    actions::Action,
    marker,
    port::Registry,
    queue::EventReceiver,
    syslog::Syslog,
    timer,
};

/// Reserved sink state name that terminates the event loop.
pub const DONE: &str = "DONE";

/// Errors raised while interpreting the state machine.
#[derive(Debug)]
pub enum Error {
    /// An entry action referenced a state that does not exist (`Call` or
    /// `ClearCounter`), or a transition names an unknown target.
    UnknownState(String),
    /// An entry action failed at runtime — a configuration bug (§7
    /// `ActionEvaluationError`).
    ActionFailed(String),
    /// A port-registry error surfaced while evaluating an action.
    Port(crate::port::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownState(name) => write!(f, "no such state '{name}'"),
            Error::ActionFailed(msg) => write!(f, "entry action failed: {msg}"),
            Error::Port(e) => write!(f, "{e}"),
        }
    }
}

impl From<crate::port::Error> for Error {
    fn from(e: crate::port::Error) -> Self {
        Error::Port(e)
    }
}

/// One state: an ordered list of entry actions and a map from event name
/// (or `None` for the direct transition) to target state name.
pub struct State {
    pub name: String,
    entry_actions: Vec<Action>,
    transitions: HashMap<Option<String>, String>,
    counter: Mutex<u32>,
}

impl State {
    /// Construct an empty state with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> State {
        State {
            name: name.into(),
            entry_actions: Vec::new(),
            transitions: HashMap::new(),
            counter: Mutex::new(0),
        }
    }

    /// Append an entry action, preserving insertion order.
    pub fn push_action(&mut self, action: Action) {
        self.entry_actions.push(action);
    }

    /// Register a transition. `event` of `None` registers the direct
    /// transition.
    pub fn set_transition(&mut self, event: Option<String>, target: String) {
        self.transitions.insert(event, target);
    }

    /// The current value of this state's entry counter.
    #[must_use]
    pub fn counter(&self) -> u32 {
        *self.counter.lock().unwrap()
    }

    fn reset_counter(&self) {
        *self.counter.lock().unwrap() = 0;
    }

    fn increment(&self) -> u32 {
        let mut c = self.counter.lock().unwrap();
        *c += 1;
        *c
    }

    /// This state's entry actions, for the DSL reader's post-parse reference
    /// validation.
    pub(crate) fn entry_actions(&self) -> &[Action] {
        &self.entry_actions
    }

    /// This state's transition map, for the DSL reader's post-parse
    /// reference validation.
    pub(crate) fn transitions(&self) -> &HashMap<Option<String>, String> {
        &self.transitions
    }
}

/// The full set of states plus the wildcard table and the initial state
/// name, as produced by the DSL reader.
pub struct Table {
    states: HashMap<String, State>,
    wildcard: State,
    pub initial: String,
}

impl Table {
    /// Construct a table from its parts. Does not validate transition
    /// targets; call [`Table::validate`] after construction.
    #[must_use]
    pub fn new(states: HashMap<String, State>, wildcard: State, initial: String) -> Table {
        Table { states, wildcard, initial }
    }

    /// Check invariant 1: every transition target names an existing state
    /// or `DONE`, and that the initial state exists.
    ///
    /// # Errors
    ///
    /// Returns the name of the first unknown state found.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.states.contains_key(&self.initial) {
            return Err(Error::UnknownState(self.initial.clone()));
        }
        let all_targets = self
            .states
            .values()
            .flat_map(|s| s.transitions.values())
            .chain(self.wildcard.transitions.values());
        for target in all_targets {
            if target != DONE && !self.states.contains_key(target) {
                return Err(Error::UnknownState(target.clone()));
            }
        }
        Ok(())
    }

    fn get(&self, name: &str) -> Result<&State, Error> {
        self.states.get(name).ok_or_else(|| Error::UnknownState(name.to_string()))
    }

    /// Every defined state, for tests inspecting parsed state contents.
    #[cfg(test)]
    pub(crate) fn states(&self) -> &HashMap<String, State> {
        &self.states
    }

    /// The wildcard state, for the DSL reader's post-parse reference
    /// validation.
    pub(crate) fn wildcard(&self) -> &State {
        &self.wildcard
    }

    /// Resolve an event (or `None` for the direct-transition check) against
    /// the wildcard table first, then `current`'s own table (§4.5, §9
    /// "wildcard state").
    fn resolve(&self, current: &str, event: Option<&str>) -> Option<String> {
        let key = event.map(str::to_string);
        self.wildcard
            .transitions
            .get(&key)
            .or_else(|| self.states.get(current).and_then(|s| s.transitions.get(&key)))
            .cloned()
    }
}

/// Everything an entry action needs in order to run: the port registry, the
/// event queue producer, the syslog sink, and the state table (for `Call`
/// and `ClearCounter`).
pub struct Context<'a> {
    pub registry: &'a Registry,
    pub queue: &'a crate::queue::EventQueue,
    pub sys: &'a dyn Syslog,
    pub table: &'a Table,
    pub emulate: bool,
    pub current: &'a CurrentState,
    pub vmq_dir: &'a std::path::Path,
}

/// The interpreter's current-state pointer, shared with the request
/// front-end (§5: read by `/state`, written only by the interpreter).
pub struct CurrentState(RwLock<String>);

impl CurrentState {
    /// Construct the pointer, initialized to `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> CurrentState {
        CurrentState(RwLock::new(name.into()))
    }

    /// Read the current state name.
    #[must_use]
    pub fn get(&self) -> String {
        self.0.read().unwrap().clone()
    }

    fn set(&self, name: &str) {
        *self.0.write().unwrap() = name.to_string();
    }
}

fn eval_action(action: &Action, counter: u32, ctx: &Context) -> Result<(), Error> {
    match action {
        Action::Guard(cmp, n, inner) => {
            if cmp.holds(counter, *n) {
                eval_action(inner, counter, ctx)?;
            }
            Ok(())
        }
        Action::SetBit(name, value) => Ok(ctx.registry.set_level(name, *value, ctx.emulate, ctx.sys)?),
        Action::SetSensorEvent(name, event) => Ok(ctx.registry.set_sensor_event(name, event.clone())?),
        Action::IncrementSensors => {
            ctx.registry.increment_active_sensors(ctx.sys);
            Ok(())
        }
        Action::ZeroSensors => {
            ctx.registry.zero_all_sensors();
            Ok(())
        }
        Action::Syslog(level, message) => {
            ctx.sys.log(*level, message);
            Ok(())
        }
        Action::RegisterTimer(delay, event) => {
            timer::schedule(*delay, event.clone(), ctx.queue.clone());
            Ok(())
        }
        Action::ClearCounter(state) => {
            ctx.table.get(state)?.reset_counter();
            Ok(())
        }
        Action::Call(state) => enter(ctx.table, state, ctx),
        Action::Unlink(path) => marker::unlink(std::path::Path::new(path))
            .map_err(|e| Error::ActionFailed(format!("unlink('{path}'): {e}"))),
        Action::Touch(path) => marker::touch(std::path::Path::new(path))
            .map_err(|e| Error::ActionFailed(format!("touch('{path}'): {e}"))),
        Action::VmQueue(cmd) => crate::vmqueue::queue(ctx.vmq_dir, cmd)
            .map_err(|e| Error::ActionFailed(format!("vmqueue('{cmd}'): {e}"))),
    }
}

/// Run phases 1-2 of state entry on `name`: increment its counter and
/// evaluate its entry actions in order (§4.5). Does not follow the direct
/// transition; the caller's loop handles that.
fn enter(table: &Table, name: &str, ctx: &Context) -> Result<(), Error> {
    let state = table.get(name)?;
    let counter = state.increment();
    for action in &state.entry_actions {
        eval_action(action, counter, ctx)?;
    }
    Ok(())
}

/// Run the interpreter loop to completion: enter the initial state, then
/// repeatedly follow direct transitions or dequeue and dispatch events,
/// until `DONE` is reached or the event queue is closed.
///
/// # Errors
///
/// Returns an error if an entry action fails — a configuration bug that
/// aborts the daemon (§7).
pub fn run(table: &Table, recv: &EventReceiver, ctx: &Context) -> Result<(), Error> {
    let mut current = table.initial.clone();
    ctx.current.set(&current);
    enter(table, &current, ctx)?;

    loop {
        if current == DONE {
            return Ok(());
        }

        if let Some(target) = table.resolve(&current, None) {
            if target != current {
                current = target;
                ctx.current.set(&current);
                if current != DONE {
                    enter(table, &current, ctx)?;
                }
            }
            continue;
        }

        let Some(event) = recv.blocking_recv() else {
            return Ok(());
        };

        if let Some(target) = table.resolve(&current, Some(&event)) {
            if target != current {
                current = target;
                ctx.current.set(&current);
                if current != DONE {
                    enter(table, &current, ctx)?;
                }
            }
        }
        // else: unknown event, silently dropped (§7 `UnknownEvent`).
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        port::{actuator_identity, Registry},
        queue::channel_pair,
        actions::Cmp,
        syslog::RecordingSyslog,
    };
    use std::path::PathBuf;

    fn fresh_registry() -> Registry {
        let mut r = Registry::new(PathBuf::from("/tmp/alarmd-state-sensor"), PathBuf::from("/tmp/alarmd-state-disable"));
        r.define_actuator(actuator_identity("Siren5", "pcb0", 5, 5, false)).unwrap();
        r.define_actuator(actuator_identity("Siren6", "pcb0", 6, 6, false)).unwrap();
        r
    }

    #[test]
    fn s1_chained_direct_transitions() {
        // initial: | set_bit('Siren5',1) > second
        // second: | set_bit('Siren6',0) > DONE
        let mut initial = State::new("initial");
        initial.push_action(Action::SetBit("Siren5".to_string(), true));
        initial.set_transition(None, "second".to_string());

        let mut second = State::new("second");
        second.push_action(Action::SetBit("Siren6".to_string(), false));
        second.set_transition(None, DONE.to_string());

        let mut states = HashMap::new();
        states.insert("initial".to_string(), initial);
        states.insert("second".to_string(), second);

        let table = Table::new(states, State::new("*"), "initial".to_string());
        table.validate().unwrap();

        let registry = fresh_registry();
        let (tx, rx) = channel_pair();
        let sys = RecordingSyslog::new();
        let current = CurrentState::new(table.initial.clone());
        let ctx = Context {
            registry: &registry,
            queue: &tx,
            sys: &sys,
            table: &table,
            emulate: false,
            current: &current,
            vmq_dir: std::path::Path::new("/tmp/alarmd-state-vmq"),
        };
        run(&table, &rx, &ctx).unwrap();

        let lines = sys.lines();
        let messages: Vec<&str> = lines.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(messages, vec!["set Siren5 on", "set Siren6 off"]);
        assert_eq!(current.get(), DONE);
    }

    #[test]
    fn s2_event_driven_fork_wildcard_preempts() {
        let mut initial = State::new("initial");
        initial.push_action(Action::SetBit("Siren5".to_string(), true));
        initial.set_transition(Some("quit".to_string()), DONE.to_string());

        let mut second = State::new("second");
        second.push_action(Action::SetBit("Siren6".to_string(), false));
        second.set_transition(Some("quit".to_string()), DONE.to_string());

        let mut other = State::new("other");
        other.push_action(Action::SetBit("Siren6".to_string(), true));
        other.set_transition(None, DONE.to_string());

        let mut wildcard = State::new("*");
        wildcard.set_transition(Some("CmdSecond".to_string()), "second".to_string());
        wildcard.set_transition(Some("CmdOther".to_string()), "other".to_string());

        let mut states = HashMap::new();
        states.insert("initial".to_string(), initial);
        states.insert("second".to_string(), second);
        states.insert("other".to_string(), other);
        let table = Table::new(states, wildcard, "initial".to_string());
        table.validate().unwrap();

        let registry = fresh_registry();
        let (tx, rx) = channel_pair();
        tx.push("CmdSecond");
        tx.push("quit");
        let sys = RecordingSyslog::new();
        let current = CurrentState::new(table.initial.clone());
        let ctx = Context {
            registry: &registry,
            queue: &tx,
            sys: &sys,
            table: &table,
            emulate: false,
            current: &current,
            vmq_dir: std::path::Path::new("/tmp/alarmd-state-vmq"),
        };
        run(&table, &rx, &ctx).unwrap();

        let lines = sys.lines();
        let messages: Vec<&str> = lines.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(messages, vec!["set Siren5 on", "set Siren6 off"]);
    }

    #[test]
    fn s3_counter_guard_eq1_fires_once() {
        // initial: |=1 set_bit('Siren5',1); repeat > trampoline; done > DONE
        // trampoline: > initial
        let mut initial = State::new("initial");
        initial.push_action(Action::Guard(Cmp::Eq, 1, Box::new(Action::SetBit("Siren5".to_string(), true))));
        initial.set_transition(Some("repeat".to_string()), "trampoline".to_string());
        initial.set_transition(Some("done".to_string()), DONE.to_string());

        let mut trampoline = State::new("trampoline");
        trampoline.set_transition(None, "initial".to_string());

        let mut states = HashMap::new();
        states.insert("initial".to_string(), initial);
        states.insert("trampoline".to_string(), trampoline);
        let table = Table::new(states, State::new("*"), "initial".to_string());
        table.validate().unwrap();

        let registry = fresh_registry();
        let (tx, rx) = channel_pair();
        tx.push("repeat");
        tx.push("repeat");
        tx.push("repeat");
        tx.push("done");
        let sys = RecordingSyslog::new();
        let current = CurrentState::new(table.initial.clone());
        let ctx = Context {
            registry: &registry,
            queue: &tx,
            sys: &sys,
            table: &table,
            emulate: false,
            current: &current,
            vmq_dir: std::path::Path::new("/tmp/alarmd-state-vmq"),
        };
        run(&table, &rx, &ctx).unwrap();

        let fires = sys.lines().iter().filter(|(_, m)| m == "set Siren5 on").count();
        assert_eq!(fires, 1);
    }

    #[test]
    fn s4_counter_guard_lt3_fires_twice() {
        let mut initial = State::new("initial");
        initial.push_action(Action::Guard(Cmp::Lt, 3, Box::new(Action::SetBit("Siren5".to_string(), true))));
        initial.set_transition(Some("repeat".to_string()), "trampoline".to_string());
        initial.set_transition(Some("done".to_string()), DONE.to_string());

        let mut trampoline = State::new("trampoline");
        trampoline.set_transition(None, "initial".to_string());

        let mut states = HashMap::new();
        states.insert("initial".to_string(), initial);
        states.insert("trampoline".to_string(), trampoline);
        let table = Table::new(states, State::new("*"), "initial".to_string());
        table.validate().unwrap();

        let registry = fresh_registry();
        let (tx, rx) = channel_pair();
        for _ in 0..4 {
            tx.push("repeat");
        }
        tx.push("done");
        let sys = RecordingSyslog::new();
        let current = CurrentState::new(table.initial.clone());
        let ctx = Context {
            registry: &registry,
            queue: &tx,
            sys: &sys,
            table: &table,
            emulate: false,
            current: &current,
            vmq_dir: std::path::Path::new("/tmp/alarmd-state-vmq"),
        };
        run(&table, &rx, &ctx).unwrap();

        let fires = sys.lines().iter().filter(|(_, m)| m == "set Siren5 on").count();
        assert_eq!(fires, 2);
    }

    #[test]
    fn s5_timer_vs_event_race() {
        let mut initial = State::new("initial");
        initial.set_transition(Some("go_second".to_string()), "second".to_string());
        initial.set_transition(Some("TIMER_100".to_string()), "other".to_string());

        let mut second = State::new("second");
        second.set_transition(None, DONE.to_string());
        let other = State::new("other");

        let mut states = HashMap::new();
        states.insert("initial".to_string(), initial);
        states.insert("second".to_string(), second);
        states.insert("other".to_string(), other);
        let table = Table::new(states, State::new("*"), "initial".to_string());
        table.validate().unwrap();

        let registry = fresh_registry();
        let (tx, rx) = channel_pair();
        tx.push("go_second");
        // A stale timer event arriving after termination must not panic or
        // resurrect the loop; it simply has no consumer left.
        tx.push("TIMER_100");
        let sys = RecordingSyslog::new();
        let current = CurrentState::new(table.initial.clone());
        let ctx = Context {
            registry: &registry,
            queue: &tx,
            sys: &sys,
            table: &table,
            emulate: true,
            current: &current,
            vmq_dir: std::path::Path::new("/tmp/alarmd-state-vmq"),
        };
        run(&table, &rx, &ctx).unwrap();

        assert_eq!(current.get(), DONE);
    }

    #[test]
    fn s6_call_runs_callee_actions_in_place() {
        let mut initial = State::new("initial");
        initial.push_action(Action::Call("called".to_string()));
        initial.push_action(Action::SetBit("Siren5".to_string(), true));
        initial.set_transition(None, DONE.to_string());

        let mut called = State::new("called");
        called.push_action(Action::SetBit("Siren6".to_string(), false));

        let mut states = HashMap::new();
        states.insert("initial".to_string(), initial);
        states.insert("called".to_string(), called);
        let table = Table::new(states, State::new("*"), "initial".to_string());
        table.validate().unwrap();

        let registry = fresh_registry();
        let (tx, rx) = channel_pair();
        let sys = RecordingSyslog::new();
        let current = CurrentState::new(table.initial.clone());
        let ctx = Context {
            registry: &registry,
            queue: &tx,
            sys: &sys,
            table: &table,
            emulate: false,
            current: &current,
            vmq_dir: std::path::Path::new("/tmp/alarmd-state-vmq"),
        };
        run(&table, &rx, &ctx).unwrap();

        let lines = sys.lines();
        let messages: Vec<&str> = lines.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(messages, vec!["set Siren6 off", "set Siren5 on"]);
    }

    #[test]
    fn wildcard_preempts_current_state_match() {
        let mut initial = State::new("initial");
        initial.set_transition(Some("go".to_string()), "own_target".to_string());

        let mut wildcard = State::new("*");
        wildcard.set_transition(Some("go".to_string()), "wild_target".to_string());

        let own_target = State::new("own_target");
        let mut wild_target = State::new("wild_target");
        wild_target.set_transition(None, DONE.to_string());

        let mut states = HashMap::new();
        states.insert("initial".to_string(), initial);
        states.insert("own_target".to_string(), own_target);
        states.insert("wild_target".to_string(), wild_target);
        let table = Table::new(states, wildcard, "initial".to_string());
        table.validate().unwrap();

        let registry = fresh_registry();
        let (tx, rx) = channel_pair();
        tx.push("go");
        let sys = RecordingSyslog::new();
        let current = CurrentState::new(table.initial.clone());
        let ctx = Context {
            registry: &registry,
            queue: &tx,
            sys: &sys,
            table: &table,
            emulate: true,
            current: &current,
            vmq_dir: std::path::Path::new("/tmp/alarmd-state-vmq"),
        };
        run(&table, &rx, &ctx).unwrap();

        assert_eq!(current.get(), DONE);
    }

    #[test]
    fn self_transition_does_not_increment_counter() {
        let mut initial = State::new("initial");
        initial.set_transition(Some("noop".to_string()), "initial".to_string());
        initial.set_transition(Some("done".to_string()), DONE.to_string());

        let mut states = HashMap::new();
        states.insert("initial".to_string(), initial);
        let table = Table::new(states, State::new("*"), "initial".to_string());
        table.validate().unwrap();

        let registry = fresh_registry();
        let (tx, rx) = channel_pair();
        tx.push("noop");
        tx.push("noop");
        tx.push("done");
        let sys = RecordingSyslog::new();
        let current = CurrentState::new(table.initial.clone());
        let ctx = Context {
            registry: &registry,
            queue: &tx,
            sys: &sys,
            table: &table,
            emulate: true,
            current: &current,
            vmq_dir: std::path::Path::new("/tmp/alarmd-state-vmq"),
        };
        run(&table, &rx, &ctx).unwrap();

        assert_eq!(table.get("initial").unwrap().counter(), 1);
    }
}
