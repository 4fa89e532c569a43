//! The event queue (§3, §5): a single-consumer FIFO of event names shared by
//! the edge watcher, the timer scheduler, and the request front-end.

use std::sync::mpsc::{channel, Receiver, Sender};

/// A handle producers use to enqueue events. Cheaply cloned; every clone
/// shares the same underlying queue.
#[derive(Clone)]
pub struct EventQueue {
    tx: Sender<String>,
}

/// The consumer side of the event queue, owned by the interpreter thread.
pub struct EventReceiver {
    rx: Receiver<String>,
}

/// Construct a fresh queue and its matching producer handle.
#[must_use]
pub fn channel_pair() -> (EventQueue, EventReceiver) {
    let (tx, rx) = channel();
    (EventQueue { tx }, EventReceiver { rx })
}

impl EventQueue {
    /// Enqueue an event by name. Silently does nothing if the consumer has
    /// already gone away (the process is shutting down).
    pub fn push(&self, event: impl Into<String>) {
        let _ = self.tx.send(event.into());
    }
}

impl EventReceiver {
    /// Block until the next event is available, or return `None` if every
    /// producer handle has been dropped.
    #[must_use]
    pub fn blocking_recv(&self) -> Option<String> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (tx, rx) = channel_pair();
        tx.push("a");
        tx.push("b");
        tx.push("c");

        assert_eq!(rx.blocking_recv().as_deref(), Some("a"));
        assert_eq!(rx.blocking_recv().as_deref(), Some("b"));
        assert_eq!(rx.blocking_recv().as_deref(), Some("c"));
    }

    #[test]
    fn recv_returns_none_once_senders_dropped() {
        let (tx, rx) = channel_pair();
        drop(tx);
        assert_eq!(rx.blocking_recv(), None);
    }
}
