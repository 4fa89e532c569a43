//! The timer scheduler (§4.3): on-demand one-shot delayed enqueues.

use std::{thread, time::Duration};

use crate::queue::EventQueue;

/// Schedule a one-shot timer: spawn a detached thread that sleeps for
/// `delay_seconds` and then enqueues `event_name`.
///
/// Timers are fire-and-forget, matching §4.3: there is no cancel operation,
/// and a state leaving before its timer fires still enqueues the event. The
/// interpreter is responsible for tolerating the resulting stale events.
pub fn schedule(delay_seconds: f64, event_name: String, queue: EventQueue) {
    let delay = Duration::from_secs_f64(delay_seconds.max(0.0));
    thread::spawn(move || {
        thread::sleep(delay);
        queue.push(event_name);
    });
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::queue::channel_pair;

    #[test]
    fn timer_fires_after_delay() {
        let (tx, rx) = channel_pair();
        let start = Instant::now();
        schedule(0.05, "TIMER_0.05".to_string(), tx);

        let event = rx.blocking_recv().unwrap();
        assert_eq!(event, "TIMER_0.05");
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
