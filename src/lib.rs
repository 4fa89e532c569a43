#![warn(clippy::pedantic)]

//! `alarmd`: a DSL-configurable home security alarm controller.
//!
//! The daemon reads a small domain-specific language describing physical
//! wiring and a finite-state machine, then multiplexes hardware edge events,
//! timer expirations, and user commands into one serialized queue that
//! drives the state machine's entry actions and transitions.

pub mod actions;
pub mod console;
pub mod dsl;
pub mod edge;
pub mod hardware;
pub mod marker;
pub mod port;
pub mod queue;
pub mod server;
pub mod state;
pub mod syslog;
pub mod timer;
pub mod vmqueue;

use std::fmt;

/// The top-level error type for daemon start-up and run-time failures.
#[derive(Debug)]
pub enum AlarmError {
    /// The DSL file could not be read or failed to parse.
    Dsl(dsl::Error),
    /// A port-registry operation failed.
    Port(port::Error),
    /// The state machine aborted because an entry action failed.
    State(state::Error),
    /// GPIO hardware could not be acquired.
    Hardware(gpio_cdev::Error),
    /// The syslog connection could not be established.
    Syslog(String),
    /// An I/O failure outside of the above (opening the config file, binding
    /// the request front-end, etc).
    Io(std::io::Error),
}

impl fmt::Display for AlarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmError::Dsl(e) => write!(f, "configuration error: {e}"),
            AlarmError::Port(e) => write!(f, "port registry error: {e}"),
            AlarmError::State(e) => write!(f, "state machine error: {e}"),
            AlarmError::Hardware(e) => write!(f, "hardware error: {e}"),
            AlarmError::Syslog(e) => write!(f, "syslog error: {e}"),
            AlarmError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for AlarmError {}

impl From<dsl::Error> for AlarmError {
    fn from(e: dsl::Error) -> Self {
        AlarmError::Dsl(e)
    }
}

impl From<port::Error> for AlarmError {
    fn from(e: port::Error) -> Self {
        AlarmError::Port(e)
    }
}

impl From<state::Error> for AlarmError {
    fn from(e: state::Error) -> Self {
        AlarmError::State(e)
    }
}

impl From<gpio_cdev::Error> for AlarmError {
    fn from(e: gpio_cdev::Error) -> Self {
        AlarmError::Hardware(e)
    }
}

impl From<std::io::Error> for AlarmError {
    fn from(e: std::io::Error) -> Self {
        AlarmError::Io(e)
    }
}
