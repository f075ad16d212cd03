//! Per-collector counters and status snapshots.
//!
//! Counters are monotonic for the process lifetime and shared between the
//! scheduler task and listener tasks, so they live in atomics; timestamp
//! and last-error fields sit behind a mutex.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Default)]
pub struct StatusHandle {
    running: AtomicBool,
    poll_count: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
    data_points_collected: AtomicU64,
    times: Mutex<StatusTimes>,
}

#[derive(Debug, Default, Clone)]
struct StatusTimes {
    last_poll_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_error_time: Option<DateTime<Utc>>,
}

impl StatusHandle {
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn begin_poll(&self) {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        self.times.lock().expect("status lock poisoned").last_poll_time = Some(Utc::now());
    }

    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::SeqCst);
        self.times
            .lock()
            .expect("status lock poisoned")
            .last_success_time = Some(Utc::now());
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.error_count.fetch_add(1, Ordering::SeqCst);
        self.set_last_error(message);
    }

    /// Record an error string without counting a failed target
    /// (initialize failures are fatal, not per-target).
    pub fn set_last_error(&self, message: impl Into<String>) {
        let mut times = self.times.lock().expect("status lock poisoned");
        times.last_error = Some(message.into());
        times.last_error_time = Some(Utc::now());
    }

    pub fn add_data_points(&self, count: u64) {
        self.data_points_collected.fetch_add(count, Ordering::SeqCst);
    }

    pub fn snapshot(&self, name: &str) -> CollectorStatus {
        let times = self
            .times
            .lock()
            .expect("status lock poisoned")
            .clone();
        CollectorStatus {
            name: name.to_string(),
            running: self.is_running(),
            poll_count: self.poll_count.load(Ordering::SeqCst),
            success_count: self.success_count.load(Ordering::SeqCst),
            error_count: self.error_count.load(Ordering::SeqCst),
            data_points_collected: self.data_points_collected.load(Ordering::SeqCst),
            last_poll_time: times.last_poll_time,
            last_success_time: times.last_success_time,
            last_error: times.last_error,
            last_error_time: times.last_error_time,
        }
    }
}

/// Point-in-time view of one collector, served by the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatus {
    pub name: String,
    pub running: bool,
    pub poll_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub data_points_collected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<DateTime<Utc>>,
}
