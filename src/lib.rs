//! A cooperative, user-space real-time task scheduler — a minimal RTOS
//! runtime for periodic, event-driven, and one-shot tasks.
//!
//! The scheduling kernel covers the task lifecycle engine, a
//! policy-driven preemption loop (Earliest-Deadline-First, Rate-Monotonic,
//! or Fixed-Priority), a priority-inheriting mutex, inter-task mailboxes,
//! and crash-restart supervision. See [`Scheduler`] for the entry point.
//!
//! ```no_run
//! use rtsched::{Scheduler, SchedulerConfig, TaskBuilder};
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//! scheduler.add_task(
//!     TaskBuilder::new("heartbeat", Duration::from_millis(100))
//!         .priority(1)
//!         .build(|| {
//!             println!("tick");
//!             Ok(())
//!         }),
//! )?;
//! scheduler.start()?;
//! # scheduler.stop_all()?;
//! # scheduler.join();
//! # Ok::<(), rtsched::SchedulerError>(())
//! ```

mod clock;
mod config;
mod error;
mod events;
mod mailbox;
mod mutex;
mod policy;
mod scheduler;
mod sync;
mod task;

pub use clock::Metrics;
pub use config::SchedulerConfig;
pub use error::{Result, SchedulerError};
pub use events::{Event, EventBus, EventKind, EventSink, RingBufferSink, TracingSink};
pub use mailbox::{Mailbox, Message};
pub use mutex::PiMutex;
pub use policy::{PreemptionMode, SchedulingPolicy};
pub use scheduler::Scheduler;
pub use task::{OverrunAction, Task, TaskBuilder, TaskHandle, Update};
