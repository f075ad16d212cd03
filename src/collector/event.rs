//! Typed lifecycle/data events.
//!
//! Each collector owns one broadcast channel; the manager subscribes at
//! construction, and listener tasks (syslog) hold a sender clone so
//! high-severity traffic can surface without waiting for the drain tick.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::record::SyslogMessage;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum CollectorEvent {
    Started {
        collector: String,
    },
    Stopped {
        collector: String,
    },
    Polled {
        collector: String,
        duration: Duration,
        record_count: usize,
    },
    /// High-severity syslog traffic, emitted from the listener task the
    /// moment it is parsed.
    SecurityEvent {
        collector: String,
        message: Box<SyslogMessage>,
    },
    Error {
        collector: String,
        target_id: Option<String>,
        message: String,
    },
}

/// Sender half of a collector's event channel. Sending never fails;
/// events without subscribers are dropped.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<CollectorEvent>,
}

impl EventSender {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventSender { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectorEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: CollectorEvent) {
        // A closed channel only means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new()
    }
}
