//! The port registry (§3, §4.1): a typed table of sensor and actuator lines
//! keyed by name and by line number.

use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::Mutex,
    thread::Scope,
};

use crate::{
    actions::Level,
    edge, marker,
    hardware::{Backend, GpioPin},
    queue::EventQueue,
    syslog::Syslog,
};

/// Errors raised by port-registry operations.
#[derive(Debug)]
pub enum Error {
    /// Two ports were registered under the same name.
    DuplicateName(String),
    /// Two ports were registered on the same GPIO line.
    DuplicateLine(u32),
    /// No port is registered under this name.
    UnknownPort(String),
    /// The named port exists but is an actuator, not a sensor.
    NotASensor(String),
    /// The named port exists but is a sensor, not an actuator.
    NotAnActuator(String),
    /// The GPIO chip or a line on it could not be acquired.
    Hardware(gpio_cdev::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DuplicateName(name) => write!(f, "duplicate port name '{name}'"),
            Error::DuplicateLine(line) => write!(f, "duplicate GPIO line {line}"),
            Error::UnknownPort(name) => write!(f, "unknown port '{name}'"),
            Error::NotASensor(name) => write!(f, "'{name}' is not a sensor"),
            Error::NotAnActuator(name) => write!(f, "'{name}' is not an actuator"),
            Error::Hardware(e) => write!(f, "hardware error: {e}"),
        }
    }
}

impl From<gpio_cdev::Error> for Error {
    fn from(e: gpio_cdev::Error) -> Self {
        Error::Hardware(e)
    }
}

/// Static identity shared by sensors and actuators.
#[derive(Debug, Clone)]
pub struct Identity {
    /// The port's configured name.
    pub name: String,
    /// The PCB identifier the line is wired to.
    pub pcb: String,
    /// The physical pin number on that PCB.
    pub physical_pin: u32,
    /// The BCM GPIO line number.
    pub line: u32,
    /// Whether a disarmed/disabled trigger should still be logged.
    pub always_log: bool,
}

struct SensorEntry {
    identity: Identity,
    event_name: Mutex<Option<String>>,
    count: Mutex<u32>,
    pin: Mutex<Option<Box<dyn GpioPin + Send>>>,
}

struct ActuatorEntry {
    identity: Identity,
    pin: Mutex<Option<Box<dyn GpioPin + Send>>>,
}

enum Entry {
    Sensor(SensorEntry),
    Actuator(ActuatorEntry),
}

/// Whether a registered port is a sensor or an actuator, for `--list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// An input line.
    Sensor,
    /// An output line.
    Actuator,
}

/// The typed table of every sensor and actuator line, plus the directories
/// backing the marker-file contract.
pub struct Registry {
    entries: HashMap<String, Entry>,
    name_by_line: HashMap<u32, String>,
    order: Vec<String>,
    sensor_dir: PathBuf,
    disable_dir: PathBuf,
}

impl Registry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new(sensor_dir: PathBuf, disable_dir: PathBuf) -> Registry {
        Registry {
            entries: HashMap::new(),
            name_by_line: HashMap::new(),
            order: Vec::new(),
            sensor_dir,
            disable_dir,
        }
    }

    fn check_unique(&self, name: &str, line: u32) -> Result<(), Error> {
        if self.entries.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        if self.name_by_line.contains_key(&line) {
            return Err(Error::DuplicateLine(line));
        }
        Ok(())
    }

    /// Register a sensor port.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or line is already registered.
    pub fn define_sensor(&mut self, identity: Identity) -> Result<(), Error> {
        self.check_unique(&identity.name, identity.line)?;
        self.name_by_line.insert(identity.line, identity.name.clone());
        self.order.push(identity.name.clone());
        self.entries.insert(
            identity.name.clone(),
            Entry::Sensor(SensorEntry {
                identity,
                event_name: Mutex::new(None),
                count: Mutex::new(0),
                pin: Mutex::new(None),
            }),
        );
        Ok(())
    }

    /// Register an actuator port.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or line is already registered.
    pub fn define_actuator(&mut self, identity: Identity) -> Result<(), Error> {
        self.check_unique(&identity.name, identity.line)?;
        self.name_by_line.insert(identity.line, identity.name.clone());
        self.order.push(identity.name.clone());
        self.entries.insert(
            identity.name.clone(),
            Entry::Actuator(ActuatorEntry {
                identity,
                pin: Mutex::new(None),
            }),
        );
        Ok(())
    }

    /// Look up a port's kind and identity by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<(Kind, &Identity)> {
        self.entries.get(name).map(|e| match e {
            Entry::Sensor(s) => (Kind::Sensor, &s.identity),
            Entry::Actuator(a) => (Kind::Actuator, &a.identity),
        })
    }

    /// Look up a port's name by GPIO line number.
    #[must_use]
    pub fn by_line(&self, line: u32) -> Option<&str> {
        self.name_by_line.get(&line).map(String::as_str)
    }

    /// Every registered port name, in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Every sensor's name, in declaration order.
    pub fn sensor_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().filter_map(move |name| match self.entries.get(name) {
            Some(Entry::Sensor(_)) => Some(name.as_str()),
            _ => None,
        })
    }

    fn sensor(&self, name: &str) -> Result<&SensorEntry, Error> {
        match self.entries.get(name) {
            Some(Entry::Sensor(s)) => Ok(s),
            Some(Entry::Actuator(_)) => Err(Error::NotASensor(name.to_string())),
            None => Err(Error::UnknownPort(name.to_string())),
        }
    }

    fn actuator(&self, name: &str) -> Result<&ActuatorEntry, Error> {
        match self.entries.get(name) {
            Some(Entry::Actuator(a)) => Ok(a),
            Some(Entry::Sensor(_)) => Err(Error::NotAnActuator(name.to_string())),
            None => Err(Error::UnknownPort(name.to_string())),
        }
    }

    /// Arm or disarm a single sensor's event name.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered sensor.
    pub fn set_event(&self, name: &str, event: Option<String>) -> Result<(), Error> {
        *self.sensor(name)?.event_name.lock().unwrap() = event;
        Ok(())
    }

    /// Arm or disarm a sensor's event name, where `name == "*"` applies to
    /// every sensor.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not `"*"` and not a registered sensor.
    pub fn set_sensor_event(&self, name: &str, event: Option<String>) -> Result<(), Error> {
        if name == "*" {
            for n in self.order.clone() {
                if let Some(Entry::Sensor(s)) = self.entries.get(&n) {
                    *s.event_name.lock().unwrap() = event.clone();
                }
            }
            Ok(())
        } else {
            self.set_event(name, event)
        }
    }

    /// The event name currently armed for a sensor, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered sensor.
    pub fn event(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self.sensor(name)?.event_name.lock().unwrap().clone())
    }

    /// Reset a sensor's fire count to zero.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered sensor.
    pub fn clear_count(&self, name: &str) -> Result<(), Error> {
        *self.sensor(name)?.count.lock().unwrap() = 0;
        Ok(())
    }

    /// Increment a sensor's fire count by one.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered sensor.
    pub fn increment_count(&self, name: &str) -> Result<(), Error> {
        *self.sensor(name)?.count.lock().unwrap() += 1;
        Ok(())
    }

    /// The current fire count of a sensor.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered sensor.
    pub fn count(&self, name: &str) -> Result<u32, Error> {
        Ok(*self.sensor(name)?.count.lock().unwrap())
    }

    /// Whether a sensor is currently disabled by an external marker file.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered sensor.
    pub fn user_disabled(&self, name: &str) -> Result<bool, Error> {
        self.sensor(name)?;
        Ok(marker::exists(&self.disable_dir.join(name)))
    }

    /// Read a sensor's current logic level.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered sensor, or if the line
    /// has not yet been acquired.
    pub fn read_level(&self, name: &str) -> Result<bool, Error> {
        let sensor = self.sensor(name)?;
        let mut pin = sensor.pin.lock().unwrap();
        match pin.as_mut() {
            Some(pin) => Ok(pin.read()?),
            None => Ok(false),
        }
    }

    /// Write an actuator's output level, logging the change (unless the
    /// caller is running under emulation, in which case the caller skips the
    /// log call).
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered actuator, or if the
    /// line has not yet been acquired.
    pub fn set_level(&self, name: &str, value: bool, emulate: bool, sys: &dyn Syslog) -> Result<(), Error> {
        let actuator = self.actuator(name)?;
        let mut pin = actuator.pin.lock().unwrap();
        if let Some(pin) = pin.as_mut() {
            pin.write(value)?;
        }
        if !emulate {
            sys.info(&format!("set {name} {}", if value { "on" } else { "off" }));
        }
        Ok(())
    }

    /// For every sensor, remove its marker file (missing is not an error) and
    /// clear its fire count (invariant 2).
    pub fn zero_all_sensors(&self) {
        for name in self.sensor_names() {
            let _ = marker::unlink(&self.sensor_dir.join(name));
            self.clear_count(name).ok();
        }
    }

    /// For every armed sensor reading high, touch its marker file and
    /// increment its count. File-create errors are logged, not raised.
    pub fn increment_active_sensors(&self, sys: &dyn Syslog) {
        for name in self.sensor_names().map(str::to_string).collect::<Vec<_>>() {
            let armed = self.event(&name).ok().flatten().is_some();
            let high = self.read_level(&name).unwrap_or(false);
            if armed && high {
                if let Err(e) = marker::touch(&self.sensor_dir.join(&name)) {
                    sys.log(Level::Warning, &format!("marker file error for {name}: {e}"));
                }
                let _ = self.increment_count(&name);
            }
        }
    }

    /// Acquire a single actuator line outside of the full scoped
    /// `request_lines` acquisition, for `-r`/`-s` one-shot CLI use.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered actuator or hardware
    /// acquisition fails.
    pub fn set_single_actuator<B: Backend>(
        &self,
        name: &str,
        value: bool,
        backend: &B,
    ) -> Result<(), Error> {
        let actuator = self.actuator(name)?;
        let mut pin = backend.actuator_line(actuator.identity.line)?;
        pin.write(value)?;
        Ok(())
    }

    /// Read a single sensor line outside of the full scoped acquisition, for
    /// `-v`/`--values` one-shot CLI use.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered sensor or hardware
    /// acquisition fails.
    pub fn read_single_sensor<B: Backend>(&self, name: &str, backend: &B) -> Result<bool, Error> {
        let sensor = self.sensor(name)?;
        let mut pin = backend.sensor_line(sensor.identity.line)?;
        Ok(pin.read()?)
    }

    /// Scoped acquisition of every line (§4.1): configures every actuator as
    /// output low and every sensor as input with pull-up and rising-edge
    /// detection, spawns the edge watcher, and releases every line when the
    /// returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Hardware` if the chip cannot be opened or any line
    /// cannot be acquired.
    pub fn request_lines<'scope, 'env, B: Backend>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        backend: &'env B,
        queue: &'env EventQueue,
        sys: &'env (dyn Syslog + 'env),
    ) -> Result<(), Error> {
        for name in &self.order {
            match self.entries.get(name).unwrap() {
                Entry::Actuator(a) => {
                    let pin = backend.actuator_line(a.identity.line)?;
                    *a.pin.lock().unwrap() = Some(Box::new(pin));
                }
                Entry::Sensor(s) => {
                    let pin = backend.sensor_line(s.identity.line)?;
                    *s.pin.lock().unwrap() = Some(Box::new(pin));

                    if B::HAS_EDGES {
                        let edge_source = backend.sensor_edge(s.identity.line)?;
                        let sensor_name = name.clone();
                        scope.spawn(move || {
                            edge::watch(sensor_name, edge_source, self, queue, sys);
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// For use by the edge watcher: the set of facts it needs to know about a
/// sensor to classify an edge, without exposing the whole registry.
pub trait SensorFacts {
    /// Current fire count.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered sensor.
    fn count(&self, name: &str) -> Result<u32, Error>;
    /// Currently armed event name, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered sensor.
    fn event(&self, name: &str) -> Result<Option<String>, Error>;
    /// Whether `always_log` was set at registration time.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered sensor.
    fn always_log(&self, name: &str) -> Result<bool, Error>;
    /// Whether an external marker disables this sensor.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a registered sensor.
    fn user_disabled(&self, name: &str) -> Result<bool, Error>;
}

impl SensorFacts for Registry {
    fn count(&self, name: &str) -> Result<u32, Error> {
        Registry::count(self, name)
    }

    fn event(&self, name: &str) -> Result<Option<String>, Error> {
        Registry::event(self, name)
    }

    fn always_log(&self, name: &str) -> Result<bool, Error> {
        Ok(self.sensor(name)?.identity.always_log)
    }

    fn user_disabled(&self, name: &str) -> Result<bool, Error> {
        Registry::user_disabled(self, name)
    }
}

fn identity(name: &str, pcb: &str, physical_pin: u32, line: u32, always_log: bool) -> Identity {
    Identity {
        name: name.to_string(),
        pcb: pcb.to_string(),
        physical_pin,
        line,
        always_log,
    }
}

/// Convenience constructor used by the DSL reader.
#[must_use]
pub fn sensor_identity(name: &str, pcb: &str, physical_pin: u32, line: u32, always_log: bool) -> Identity {
    identity(name, pcb, physical_pin, line, always_log)
}

/// Convenience constructor used by the DSL reader.
#[must_use]
pub fn actuator_identity(name: &str, pcb: &str, physical_pin: u32, line: u32, always_log: bool) -> Identity {
    identity(name, pcb, physical_pin, line, always_log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syslog::RecordingSyslog;

    fn registry() -> Registry {
        Registry::new(PathBuf::from("/tmp/does-not-matter-sensor"), PathBuf::from("/tmp/does-not-matter-disable"))
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut r = registry();
        r.define_sensor(sensor_identity("Front", "pcb0", 1, 17, false)).unwrap();
        let err = r.define_sensor(sensor_identity("Front", "pcb0", 2, 18, false)).unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));
    }

    #[test]
    fn duplicate_line_rejected() {
        let mut r = registry();
        r.define_sensor(sensor_identity("Front", "pcb0", 1, 17, false)).unwrap();
        let err = r.define_actuator(actuator_identity("Siren", "pcb0", 2, 17, false)).unwrap_err();
        assert!(matches!(err, Error::DuplicateLine(17)));
    }

    #[test]
    fn wildcard_set_sensor_event_applies_to_all() {
        let mut r = registry();
        r.define_sensor(sensor_identity("Front", "pcb0", 1, 17, false)).unwrap();
        r.define_sensor(sensor_identity("Back", "pcb0", 2, 18, false)).unwrap();

        r.set_sensor_event("*", Some("Intrusion".to_string())).unwrap();

        assert_eq!(r.event("Front").unwrap().as_deref(), Some("Intrusion"));
        assert_eq!(r.event("Back").unwrap().as_deref(), Some("Intrusion"));
    }

    #[test]
    fn zero_all_sensors_clears_counts() {
        let mut r = registry();
        r.define_sensor(sensor_identity("Front", "pcb0", 1, 17, false)).unwrap();
        r.increment_count("Front").unwrap();
        r.increment_count("Front").unwrap();
        assert_eq!(r.count("Front").unwrap(), 2);

        r.zero_all_sensors();
        assert_eq!(r.count("Front").unwrap(), 0);
    }

    #[test]
    fn set_level_logs_unless_emulated() {
        let mut r = registry();
        r.define_actuator(actuator_identity("Siren5", "pcb0", 1, 5, false)).unwrap();
        let sys = RecordingSyslog::new();

        r.set_level("Siren5", true, false, &sys).unwrap();
        assert_eq!(sys.lines().len(), 1);

        r.set_level("Siren5", false, true, &sys).unwrap();
        assert_eq!(sys.lines().len(), 1);
    }
}
