//! The syslog sink (§6/§7). Exposed as a narrow trait so the interpreter and
//! port registry depend on a capability rather than a concrete backend — the
//! same narrowing applied to `Port` elsewhere in this crate.

use std::sync::Mutex;

use syslog::{Facility, Formatter3164, Logger, LoggerBackend};

use crate::actions::Level;

/// The syslog identifier this daemon registers under (§6).
pub const IDENT: &str = "alarm";

/// A sink that can receive leveled log lines.
pub trait Syslog: Send + Sync {
    /// Emit one message at the given level.
    fn log(&self, level: Level, message: &str);

    /// Convenience wrapper for `LOG_INFO`.
    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }
}

/// A `Syslog` backed by a real Unix syslog connection.
pub struct UnixSyslog {
    logger: Mutex<Logger<LoggerBackend, Formatter3164>>,
}

impl UnixSyslog {
    /// Open a connection to the local syslog daemon under the `"alarm"`
    /// identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the syslog socket cannot be reached.
    pub fn connect() -> Result<UnixSyslog, syslog::Error> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: IDENT.to_string(),
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter)?;
        Ok(UnixSyslog {
            logger: Mutex::new(logger),
        })
    }
}

impl Syslog for UnixSyslog {
    fn log(&self, level: Level, message: &str) {
        let mut logger = self.logger.lock().unwrap();
        let result = match level {
            Level::Debug => logger.debug(message),
            Level::Info => logger.info(message),
            Level::Warning => logger.warning(message),
            Level::Critical => logger.crit(message),
        };
        // A syslog write failure has no good recovery; drop it rather than
        // crashing the daemon over a logging hiccup.
        let _ = result;
    }
}

/// A `Syslog` that records every message in memory instead of sending it
/// anywhere, for use in tests.
#[derive(Default)]
pub struct RecordingSyslog {
    lines: Mutex<Vec<(Level, String)>>,
}

impl RecordingSyslog {
    /// Construct an empty recorder.
    #[must_use]
    pub fn new() -> RecordingSyslog {
        RecordingSyslog::default()
    }

    /// Return a snapshot of every message logged so far, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().unwrap().clone()
    }
}

impl Syslog for RecordingSyslog {
    fn log(&self, level: Level, message: &str) {
        self.lines.lock().unwrap().push((level, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_preserves_order() {
        let sink = RecordingSyslog::new();
        sink.info("starting up: pid 1");
        sink.log(Level::Warning, "trigger: Front (auto-disabled)");

        assert_eq!(
            sink.lines(),
            vec![
                (Level::Info, "starting up: pid 1".to_string()),
                (Level::Warning, "trigger: Front (auto-disabled)".to_string()),
            ]
        );
    }
}
