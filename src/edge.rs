//! The edge watcher (§4.2): translates debounced rising edges on sensor
//! lines into enqueued events, filtering by fire count, arm state, and the
//! external disable marker.

use std::time::Instant;

use crate::{
    hardware::{EdgeSource, DEBOUNCE},
    port::{Error, SensorFacts},
    queue::EventQueue,
    syslog::Syslog,
};

/// What the watcher decided to do about one debounced edge.
#[derive(Debug, PartialEq, Eq)]
pub enum Decision {
    /// Enqueue this event.
    Enqueue(String),
    /// The sensor has fired more than three times; dropped and logged.
    AutoDisabled,
    /// No event is armed for this sensor; dropped, logged only if
    /// `always_log`.
    Disabled,
    /// An external marker file disables this sensor; dropped and logged.
    UserDisabled,
}

/// Pure decision logic for one detected rising edge on `name` (§4.2 steps
/// 1-4), independent of how the edge was detected.
///
/// # Errors
///
/// Returns an error if `name` is not a registered sensor.
pub fn classify(name: &str, facts: &dyn SensorFacts) -> Result<Decision, Error> {
    if facts.count(name)? > 3 {
        return Ok(Decision::AutoDisabled);
    }
    let Some(event) = facts.event(name)? else {
        return Ok(Decision::Disabled);
    };
    if facts.user_disabled(name)? {
        return Ok(Decision::UserDisabled);
    }
    Ok(Decision::Enqueue(event))
}

/// Apply a classification decision: enqueue the event, or emit the matching
/// syslog line.
pub fn apply(name: &str, decision: &Decision, always_log: bool, queue: &EventQueue, sys: &dyn Syslog) {
    match decision {
        Decision::Enqueue(event) => queue.push(event.clone()),
        Decision::AutoDisabled => sys.info(&format!("trigger: {name} (auto-disabled)")),
        Decision::Disabled => {
            if always_log {
                sys.info(&format!("trigger: {name} (disabled)"));
            }
        }
        Decision::UserDisabled => sys.info(&format!("trigger: {name} (user-disabled)")),
    }
}

/// The watcher thread body: blocks on rising edges from `edge_source`,
/// software-debounces them, and classifies/applies each accepted edge.
/// Terminates when `edge_source` returns an error (the line was released).
pub fn watch(
    name: String,
    mut edge_source: impl EdgeSource,
    facts: &dyn SensorFacts,
    queue: &EventQueue,
    sys: &dyn Syslog,
) {
    let always_log = facts.always_log(&name).unwrap_or(false);
    let mut last_accepted: Option<Instant> = None;

    loop {
        if edge_source.next_rising_edge().is_err() {
            return;
        }
        let now = Instant::now();
        if let Some(last) = last_accepted {
            if now.duration_since(last) < DEBOUNCE {
                continue;
            }
        }
        last_accepted = Some(now);

        match classify(&name, facts) {
            Ok(decision) => apply(&name, &decision, always_log, queue, sys),
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{port::Registry, syslog::RecordingSyslog};
    use std::path::PathBuf;

    fn registry_with_sensor(name: &str, always_log: bool) -> Registry {
        let mut r = Registry::new(PathBuf::from("/tmp/alarmd-edge-sensor"), PathBuf::from("/tmp/alarmd-edge-disable"));
        r.define_sensor(crate::port::sensor_identity(name, "pcb0", 1, 17, always_log))
            .unwrap();
        r
    }

    #[test]
    fn auto_disables_after_three_fires() {
        let r = registry_with_sensor("Front", false);
        r.set_event("Front", Some("Intrusion".to_string())).unwrap();
        for _ in 0..4 {
            r.increment_count("Front").unwrap();
        }
        assert_eq!(classify("Front", &r).unwrap(), Decision::AutoDisabled);
    }

    #[test]
    fn disabled_when_no_event_armed() {
        let r = registry_with_sensor("Front", false);
        assert_eq!(classify("Front", &r).unwrap(), Decision::Disabled);
    }

    #[test]
    fn enqueues_when_armed_and_not_disabled() {
        let r = registry_with_sensor("Front", false);
        r.set_event("Front", Some("Intrusion".to_string())).unwrap();
        assert_eq!(
            classify("Front", &r).unwrap(),
            Decision::Enqueue("Intrusion".to_string())
        );
    }

    #[test]
    fn disabled_logs_only_when_always_log() {
        let sys = RecordingSyslog::new();
        apply("Front", &Decision::Disabled, false, &crate::queue::channel_pair().0, &sys);
        assert!(sys.lines().is_empty());

        apply("Front", &Decision::Disabled, true, &crate::queue::channel_pair().0, &sys);
        assert_eq!(sys.lines().len(), 1);
    }
}
