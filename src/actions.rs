//! The entry-action algebra (§9 design note).
//!
//! The original controller captures entry actions as strings evaluated
//! against a host-language scope. Here every action is instead a tagged
//! value, parsed directly by the DSL reader and executed by the state
//! machine without any embedded evaluator.

/// A single declarative entry action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// `set_bit(name, 0|1)` — write an actuator's output level.
    SetBit(String, bool),
    /// `set_sensor_event(name, event)` — arm or disarm a sensor's event.
    /// `name == "*"` applies to every sensor.
    SetSensorEvent(String, Option<String>),
    /// `increment_sensors()` — touch marker files for every currently-high,
    /// armed sensor and bump its fire count.
    IncrementSensors,
    /// `zero_sensors()` — clear every sensor's marker file and fire count.
    ZeroSensors,
    /// `syslog(level, message)` — emit a literal message to the syslog sink.
    Syslog(Level, String),
    /// `register_timer_event(delay, event)` — schedule a one-shot timer.
    RegisterTimer(f64, String),
    /// `ClearCounter(state)` — reset another state's entry counter to zero.
    ClearCounter(String),
    /// `call state` — re-run another state's entry actions in place.
    Call(String),
    /// `unlink(path)` — remove a file, raising on failure.
    Unlink(String),
    /// `touch(path)` — create an empty file, raising on failure.
    Touch(String),
    /// `vmqueue(command)` — queue a `;`-separated command for the external
    /// voice-message daemon.
    VmQueue(String),
    /// A count-guarded action: only evaluated when the entering state's
    /// counter satisfies `op` against `N`.
    Guard(Cmp, i64, Box<Action>),
}

/// The comparison operators supported by a count guard (`|=N`, `|<N`, `|>N`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    /// `|=N`
    Eq,
    /// `|<N`
    Lt,
    /// `|>N`
    Gt,
}

impl Cmp {
    /// Evaluate this comparison against a counter value.
    #[must_use]
    pub fn holds(self, counter: u32, n: i64) -> bool {
        let counter = i64::from(counter);
        match self {
            Cmp::Eq => counter == n,
            Cmp::Lt => counter < n,
            Cmp::Gt => counter > n,
        }
    }
}

/// Syslog priority levels usable from `syslog(...)` entry actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// `LOG_DEBUG`
    Debug,
    /// `LOG_INFO`
    Info,
    /// `LOG_WARNING`
    Warning,
    /// `LOG_CRIT`
    Critical,
}
