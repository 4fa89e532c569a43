//! Debug tracing to stderr, gated by the daemon's `-d`/`--debug` flag (§6).
//!
//! Persistent, operator-facing logging goes through [`crate::syslog`]; this
//! is strictly a development aid and is silent unless enabled.

use std::time::SystemTime;

/// A debug trace sink. Cheap to construct, cheap to pass around by value.
#[derive(Clone, Copy)]
pub struct Console {
    enabled: bool,
}

impl Console {
    /// Construct a console; `enabled` mirrors the `-d`/`--debug` flag.
    #[must_use]
    pub fn new(enabled: bool) -> Console {
        Console { enabled }
    }

    /// Write a trace line to stderr if debug tracing is enabled.
    pub fn debug(&self, string: &str) {
        if !self.enabled {
            return;
        }
        // we trust that this code was run after January 1st, 1970
        let log_time_nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        eprintln!("\x1b[90m[{log_time_nanos}] [DEBUG] {string}\x1b[0m");
    }
}
