//! Definitions for GPIO hardware lines.
//!
//! The goal of this module is to abstract away exactly how a sensor or
//! actuator line is driven so the rest of the daemon can focus on the DSL
//! and state-machine logic.

use std::time::Duration;

use gpio_cdev::{Chip, EventRequestFlags, EventType, Line, LineEventHandle, LineHandle, LineRequestFlags};

/// Software debounce window applied to sensor rising edges (§4.2).
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// Consumer label attached to every line this daemon requests, so `gpio-cdev`
/// diagnostics can identify who is holding a line.
const CONSUMER: &str = "alarmd";

/// A trait for GPIO pins.
pub trait GpioPin {
    /// Perform a GPIO read on this pin.
    /// Returns `true` if the pin is pulled high, and `false` otherwise.
    ///
    /// # Errors
    ///
    /// This can return an error if the read failed.
    fn read(&mut self) -> Result<bool, gpio_cdev::Error>;

    /// Perform a GPIO write on this pin, setting the pin's logic level to `value`.
    ///
    /// # Errors
    ///
    /// This can return an error if the write failed.
    fn write(&mut self, value: bool) -> Result<(), gpio_cdev::Error>;
}

/// A source of debounced rising edges on a single sensor line.
pub trait EdgeSource {
    /// Block until the next rising edge is observed on this line.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying line was released or the read failed.
    fn next_rising_edge(&mut self) -> Result<(), gpio_cdev::Error>;
}

/// A structure for testing GPIO writes.
///
/// A `ListenerPin` stores the history of all writes to it.
/// When read from, a `ListenerPin` will return the last written value of the pin.
pub struct ListenerPin(Vec<bool>);

impl ListenerPin {
    #[must_use]
    /// Construct a new `ListenerPin` with only one reading in its history.
    pub fn new(last_value: bool) -> ListenerPin {
        ListenerPin(vec![last_value])
    }

    #[must_use]
    /// Get access to the history inside this pin.
    pub fn history(&self) -> &Vec<bool> {
        &self.0
    }
}

impl GpioPin for ListenerPin {
    fn read(&mut self) -> Result<bool, gpio_cdev::Error> {
        Ok(*self.0.last().unwrap())
    }

    fn write(&mut self, value: bool) -> Result<(), gpio_cdev::Error> {
        self.0.push(value);

        Ok(())
    }
}

impl GpioPin for LineHandle {
    fn read(&mut self) -> Result<bool, gpio_cdev::Error> {
        Ok(1 == self.get_value()?)
    }

    fn write(&mut self, value: bool) -> Result<(), gpio_cdev::Error> {
        let int_value = u8::from(value);
        self.set_value(int_value)?;

        Ok(())
    }
}

/// An `EdgeSource` that never fires. Used by the emulation backend, which per
/// §4.1 never opens a chip and never starts the edge watcher.
pub struct NeverEdge;

impl EdgeSource for NeverEdge {
    fn next_rising_edge(&mut self) -> Result<(), gpio_cdev::Error> {
        loop {
            std::thread::park();
        }
    }
}

/// A real rising-edge source backed by a `gpio-cdev` line event handle.
pub struct CdevEdge(LineEventHandle);

impl EdgeSource for CdevEdge {
    fn next_rising_edge(&mut self) -> Result<(), gpio_cdev::Error> {
        loop {
            let event = self.0.get_event()?;
            if event.event_type() == EventType::RisingEdge {
                return Ok(());
            }
        }
    }
}

/// Acquires actuator and sensor lines from some source of GPIO hardware,
/// real or emulated.
///
/// This plays the role `MakeHardware` plays in the original engine
/// controller: a narrow seam for dependency injection between real hardware
/// and an in-memory stand-in used by tests.
pub trait Backend: Send + Sync {
    /// The concrete pin type this backend hands back.
    type Pin: GpioPin + Send + 'static;
    /// The concrete edge source this backend hands back for sensor lines.
    type Edge: EdgeSource + Send + 'static;

    /// Whether this backend's sensor lines ever produce edges. `false` for
    /// backends whose `sensor_edge` never fires (per §4.1, emulation opens
    /// no chip and starts no edge watcher), so callers can skip spawning a
    /// watcher thread that would otherwise never exit.
    const HAS_EDGES: bool;

    /// Acquire an actuator line, configured as output initialized low.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be requested.
    fn actuator_line(&self, bcm: u32) -> Result<Self::Pin, gpio_cdev::Error>;

    /// Acquire a sensor line, configured as input with pull-up.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be requested.
    fn sensor_line(&self, bcm: u32) -> Result<Self::Pin, gpio_cdev::Error>;

    /// Acquire a rising-edge event source for a sensor line.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be requested for events.
    fn sensor_edge(&self, bcm: u32) -> Result<Self::Edge, gpio_cdev::Error>;
}

/// A `Backend` that talks to a real GPIO chip through `gpio-cdev`.
pub struct RealChip {
    chip: std::sync::Mutex<Chip>,
}

impl RealChip {
    /// Open the given chip device node (e.g. `/dev/gpiochip0`).
    ///
    /// # Errors
    ///
    /// Returns an error if the chip cannot be opened.
    pub fn open(path: &str) -> Result<RealChip, gpio_cdev::Error> {
        Ok(RealChip {
            chip: std::sync::Mutex::new(Chip::new(path)?),
        })
    }

    fn line(&self, bcm: u32) -> Result<Line, gpio_cdev::Error> {
        self.chip.lock().unwrap().get_line(bcm)
    }
}

impl Backend for RealChip {
    type Pin = LineHandle;
    type Edge = CdevEdge;
    const HAS_EDGES: bool = true;

    fn actuator_line(&self, bcm: u32) -> Result<LineHandle, gpio_cdev::Error> {
        self.line(bcm)?.request(LineRequestFlags::OUTPUT, 0, CONSUMER)
    }

    fn sensor_line(&self, bcm: u32) -> Result<LineHandle, gpio_cdev::Error> {
        self.line(bcm)?
            .request(LineRequestFlags::INPUT | LineRequestFlags::ACTIVE_LOW, 0, CONSUMER)
    }

    fn sensor_edge(&self, bcm: u32) -> Result<CdevEdge, gpio_cdev::Error> {
        let handle = self.line(bcm)?.events(
            LineRequestFlags::INPUT | LineRequestFlags::ACTIVE_LOW,
            EventRequestFlags::RISING_EDGE,
            CONSUMER,
        )?;
        Ok(CdevEdge(handle))
    }
}

/// A `Backend` that never touches real hardware; every line is a shadow
/// value in memory.
pub struct Emulated;

impl Backend for Emulated {
    type Pin = ListenerPin;
    type Edge = NeverEdge;
    const HAS_EDGES: bool = false;

    fn actuator_line(&self, _bcm: u32) -> Result<ListenerPin, gpio_cdev::Error> {
        Ok(ListenerPin::new(false))
    }

    fn sensor_line(&self, _bcm: u32) -> Result<ListenerPin, gpio_cdev::Error> {
        Ok(ListenerPin::new(false))
    }

    fn sensor_edge(&self, _bcm: u32) -> Result<NeverEdge, gpio_cdev::Error> {
        Ok(NeverEdge)
    }
}
