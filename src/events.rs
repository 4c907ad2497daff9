//! The structured, timestamped lifecycle event stream.
//!
//! The kernel never writes events to disk itself — that's the job of an
//! external sink (SPEC_FULL §1 keeps the persistent log file out of core
//! scope). What the core does own is producing a typed [`Event`] for every
//! lifecycle transition, timestamping it, handing it to every registered
//! [`EventSink`], and mirroring it into `tracing` so a consumer can also
//! just subscribe to the process's tracing subscriber.

use crate::policy::SchedulingPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

/// A single lifecycle record, matching the event kinds enumerated in
/// SPEC_FULL §6.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    TaskAdded { name: String },
    TaskRemoved { name: String },
    TaskCrashed { name: String, error: String },
    TaskRestarted { name: String },
    DeadlineMissed { name: String, exec_time_secs: f64 },
    TaskKilled { name: String, reason: String },
    TaskPaused { name: String },
    PolicyChanged { from: SchedulingPolicy, to: SchedulingPolicy },
    MutexBoost { owner: String, from: u32, to: u32 },
    MutexRestore { owner: String, to: u32 },
    InterruptReceived,
    DuplicateRejected { name: String },
    UnknownTask { name: String, operation: String },
    RestartBudgetExhausted { name: String },
}

/// A timestamped [`EventKind`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Consumer of the event stream. Implementors must be thread-safe: the
/// kernel may emit events from the scheduler's own context, any task's
/// execution context, or the mutex boost/restore path.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Emits every event through `tracing`, at a level appropriate to its
/// severity. This is always installed; additional sinks (a ring buffer for
/// tests, a file writer provided by the caller) are layered on top via
/// [`EventBus::add_sink`].
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: Event) {
        let ts = event.timestamp.to_rfc3339();
        match &event.kind {
            EventKind::TaskCrashed { name, error } => {
                warn!(task = %name, %error, timestamp = %ts, "task crashed")
            }
            EventKind::DeadlineMissed { name, exec_time_secs } => {
                warn!(task = %name, exec_time_secs, timestamp = %ts, "deadline missed")
            }
            EventKind::TaskKilled { name, reason } => {
                warn!(task = %name, %reason, timestamp = %ts, "task killed")
            }
            EventKind::RestartBudgetExhausted { name } => {
                warn!(task = %name, timestamp = %ts, "restart budget exhausted")
            }
            EventKind::UnknownTask { name, operation } => {
                warn!(task = %name, %operation, timestamp = %ts, "operation on unknown task")
            }
            EventKind::DuplicateRejected { name } => {
                warn!(task = %name, timestamp = %ts, "duplicate registration rejected")
            }
            other => info!(timestamp = %ts, event = ?other, "scheduler event"),
        }
    }
}

/// A bounded in-memory ring buffer sink, primarily for tests and for
/// callers that want to poll recent history rather than subscribe live.
pub struct RingBufferSink {
    inner: parking_lot::Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl RingBufferSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: parking_lot::Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.inner.lock().iter().cloned().collect()
    }
}

impl EventSink for RingBufferSink {
    fn emit(&self, event: Event) {
        let mut buf = self.inner.lock();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(event);
    }
}

/// Fans a single [`EventKind`] out to every registered sink, timestamping
/// it once so all sinks agree on when it happened.
#[derive(Clone)]
pub struct EventBus {
    sinks: Arc<parking_lot::RwLock<Vec<Arc<dyn EventSink>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let bus = Self {
            sinks: Arc::new(parking_lot::RwLock::new(Vec::new())),
        };
        bus.add_sink(Arc::new(TracingSink));
        bus
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    pub fn emit(&self, kind: EventKind) {
        let event = Event::new(kind);
        for sink in self.sinks.read().iter() {
            sink.emit(event.clone());
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
