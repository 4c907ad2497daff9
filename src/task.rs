//! Task definition, builder, and the per-task execution context (run-loop).

use crate::clock::{now, Metrics};
use crate::config::SchedulerConfig;
use crate::events::{EventBus, EventKind};
use crate::mutex::MutexOwnerOps;
use crate::sync::Signal;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// What to do when a task's `update` takes longer than its declared
/// deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverrunAction {
    /// Terminate the task (same path as `remove_task`, minus the public
    /// `TaskRemoved` event — a `TaskKilled` event is emitted instead).
    Kill,
    /// Suspend the task on its own event signal until externally resumed via
    /// `trigger_task`. Only meaningful for event-driven tasks: a periodic
    /// task with no event to resume on is killed instead, with a reason
    /// noting the fallback.
    Pause,
}

/// The work a task performs on each scheduled run. Implemented for any
/// `FnMut() -> anyhow::Result<()> + Send`, so a task can usually be built
/// from a plain closure; implement the trait directly for update logic that
/// carries its own state machine.
pub trait Update: Send {
    fn call(&mut self) -> anyhow::Result<()>;
}

impl<F> Update for F
where
    F: FnMut() -> anyhow::Result<()> + Send,
{
    fn call(&mut self) -> anyhow::Result<()> {
        self()
    }
}

/// The immutable recipe for a task: everything needed to (re)spawn its
/// execution context. Shared between the live `TaskHandle` and the
/// Supervisor, which keeps the spec around to restart a crashed task with
/// the same `update` callable (SPEC_FULL §4.5).
pub struct TaskSpec {
    pub name: String,
    pub period: Duration,
    pub priority: u32,
    pub deadline: Option<Duration>,
    pub overrun_action: OverrunAction,
    pub event_driven: bool,
    pub max_runs: Option<u64>,
    pub(crate) update: parking_lot::Mutex<Box<dyn Update>>,
}

/// A task ready to be handed to [`crate::Scheduler::add_task`].
pub struct Task {
    pub(crate) spec: Arc<TaskSpec>,
}

/// Builds a [`Task`]. Mirrors the Python original's keyword-argument
/// constructor (`minTasks.Task`) as a fluent builder, the idiom the rest of
/// this crate's configuration surfaces use.
pub struct TaskBuilder {
    name: String,
    period: Duration,
    priority: u32,
    deadline: Option<Duration>,
    overrun_action: OverrunAction,
    event_driven: bool,
    max_runs: Option<u64>,
}

impl TaskBuilder {
    /// Start building a task. `period = Duration::ZERO` marks a one-shot
    /// task (SPEC_FULL §2): it runs once and is not rescheduled.
    pub fn new(name: impl Into<String>, period: Duration) -> Self {
        Self {
            name: name.into(),
            period,
            priority: 0,
            deadline: None,
            overrun_action: OverrunAction::Kill,
            event_driven: false,
            max_runs: None,
        }
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn overrun_action(mut self, action: OverrunAction) -> Self {
        self.overrun_action = action;
        self
    }

    /// Mark the task event-driven: instead of running on a fixed period, it
    /// blocks until `Scheduler::trigger_task` wakes it.
    pub fn event_driven(mut self) -> Self {
        self.event_driven = true;
        self
    }

    pub fn max_runs(mut self, max_runs: u64) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    pub fn build(self, update: impl Update + 'static) -> Task {
        Task {
            spec: Arc::new(TaskSpec {
                name: self.name,
                period: self.period,
                priority: self.priority,
                deadline: self.deadline,
                overrun_action: self.overrun_action,
                event_driven: self.event_driven,
                max_runs: self.max_runs,
                update: parking_lot::Mutex::new(Box::new(update)),
            }),
        }
    }
}

/// The live handle to a task's execution context: what the scheduler, the
/// mutex module, and the task's own run-loop thread all share.
///
/// Holds only [`Weak`] references into mutexes it has acquired, so a task
/// and the mutexes it locks never form a strong reference cycle (SPEC_FULL
/// §4.2's own cycle-avoidance note).
pub struct TaskHandle {
    pub name: String,
    original_priority: u32,
    boosts: parking_lot::Mutex<HashMap<u64, u32>>,
    running: AtomicBool,
    pub(crate) event: Signal,
    pub(crate) metrics: parking_lot::Mutex<Metrics>,
    held_mutexes: parking_lot::Mutex<Vec<Weak<dyn MutexOwnerOps>>>,
    pub(crate) next_run: parking_lot::Mutex<Instant>,
}

impl TaskHandle {
    fn new(name: String, priority: u32) -> Arc<Self> {
        Arc::new(Self {
            name,
            original_priority: priority,
            boosts: parking_lot::Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
            event: Signal::new(),
            metrics: parking_lot::Mutex::new(Metrics::default()),
            held_mutexes: parking_lot::Mutex::new(Vec::new()),
            next_run: parking_lot::Mutex::new(now()),
        })
    }

    /// Build a standalone task identity for use with [`crate::PiMutex`]
    /// outside a scheduler-managed execution context — e.g. a caller
    /// embedding the priority-inheriting mutex in its own thread pool, or a
    /// test that exercises boost/restore directly. A handle built this way
    /// has no run-loop and never transitions through the Supervisor; it
    /// exists purely as the priority/ownership identity the mutex tracks.
    pub fn standalone(name: impl Into<String>, priority: u32) -> Arc<Self> {
        Self::new(name.into(), priority)
    }

    #[cfg(test)]
    pub(crate) fn for_test(name: &str, priority: u32) -> Arc<Self> {
        Self::new(name.to_string(), priority)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current priority including any priority-inheritance boost: the
    /// maximum of the task's own priority and every boost contributed by a
    /// mutex it currently owns while a higher-priority task waits.
    pub fn effective_priority(&self) -> u32 {
        let boosts = self.boosts.lock();
        boosts
            .values()
            .copied()
            .max()
            .unwrap_or(self.original_priority)
            .max(self.original_priority)
    }

    pub(crate) fn apply_boost(&self, mutex_id: u64, level: u32) {
        self.boosts.lock().insert(mutex_id, level);
    }

    /// Remove the boost contributed by one mutex. Returns the resulting
    /// effective priority, but only if that mutex had actually contributed a
    /// boost (so callers don't emit a restore event for a no-op).
    pub(crate) fn clear_boost(&self, mutex_id: u64) -> Option<u32> {
        let had = self.boosts.lock().remove(&mutex_id);
        had.map(|_| self.effective_priority())
    }

    pub(crate) fn register_held_mutex(&self, mutex: Weak<dyn MutexOwnerOps>) {
        self.held_mutexes.lock().push(mutex);
    }

    pub(crate) fn unregister_held_mutex(&self, mutex_id: u64) {
        self.held_mutexes
            .lock()
            .retain(|w| w.upgrade().map(|m| m.mutex_id()) != Some(mutex_id));
    }

    /// Idempotent cooperative stop request: clears `running`, wakes any
    /// blocked event wait, and force-releases every mutex currently held so
    /// a stopped task never leaves a lock orphaned.
    pub fn request_stop(&self, bus: &EventBus) {
        self.running.store(false, Ordering::SeqCst);
        self.event.notify_all();
        let held: Vec<_> = self.held_mutexes.lock().drain(..).collect();
        for weak in held {
            if let Some(mutex) = weak.upgrade() {
                mutex.force_release(&self.name, bus);
            }
        }
    }
}

/// Outcome of one execution context, used by the Supervisor to decide
/// whether a restart is warranted.
pub(crate) enum ExitReason {
    /// `stop()`/`remove_task` requested termination; never restart.
    Stopped,
    /// `max_runs` was reached; ran to completion, never restart.
    MaxRunsReached,
    /// The update panicked or returned `Err`; eligible for restart.
    Crashed(String),
    /// Deadline overrun with `OverrunAction::Kill`; eligible for restart.
    DeadlineKill,
}

/// Spawn a task's execution context on its own OS thread. Returns the live
/// handle and the join handle for the Supervisor/termination path.
pub(crate) fn spawn(
    spec: Arc<TaskSpec>,
    bus: EventBus,
    config: Arc<SchedulerConfig>,
) -> (Arc<TaskHandle>, thread::JoinHandle<ExitReason>) {
    let handle = TaskHandle::new(spec.name.clone(), spec.priority);
    let run_handle = handle.clone();
    let thread = thread::Builder::new()
        .name(format!("task-{}", spec.name))
        .spawn(move || run(spec, run_handle, bus, config))
        .expect("spawning a task execution context should not fail under normal OS limits");
    (handle, thread)
}

fn run(spec: Arc<TaskSpec>, handle: Arc<TaskHandle>, bus: EventBus, config: Arc<SchedulerConfig>) -> ExitReason {
    loop {
        if !handle.is_running() {
            return ExitReason::Stopped;
        }

        if let Some(max) = spec.max_runs {
            if handle.metrics.lock().run_count >= max {
                handle.running.store(false, Ordering::SeqCst);
                bus.emit(EventKind::TaskKilled {
                    name: spec.name.clone(),
                    reason: "max_runs reached".into(),
                });
                return ExitReason::MaxRunsReached;
            }
        }

        if spec.event_driven {
            if !handle.event.wait_timeout(config.event_wait_timeout) {
                continue;
            }
            if !handle.is_running() {
                return ExitReason::Stopped;
            }
        } else {
            let next_run = *handle.next_run.lock();
            if now() < next_run {
                thread::sleep(config.tick_sleep);
                continue;
            }
        }

        let start = now();
        let result = catch_unwind(AssertUnwindSafe(|| spec.update.lock().call()));
        let exec_time = now().saturating_duration_since(start);

        handle.metrics.lock().record_execution(exec_time, spec.period);

        let outcome = match result {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(panic) => Some(describe_panic(panic)),
        };

        if let Some(error) = outcome {
            handle.metrics.lock().record_missed_deadline();
            bus.emit(EventKind::TaskCrashed {
                name: spec.name.clone(),
                error,
            });
            handle.request_stop(&bus);
            return ExitReason::Crashed(spec.name.clone());
        }

        if let Some(deadline) = spec.deadline {
            if exec_time > deadline {
                handle.metrics.lock().record_missed_deadline();
                bus.emit(EventKind::DeadlineMissed {
                    name: spec.name.clone(),
                    exec_time_secs: exec_time.as_secs_f64(),
                });

                match spec.overrun_action {
                    OverrunAction::Kill => {
                        bus.emit(EventKind::TaskKilled {
                            name: spec.name.clone(),
                            reason: "deadline overrun".into(),
                        });
                        handle.request_stop(&bus);
                        return ExitReason::DeadlineKill;
                    }
                    OverrunAction::Pause => {
                        if spec.event_driven {
                            bus.emit(EventKind::TaskPaused {
                                name: spec.name.clone(),
                            });
                            handle.event.wait();
                            if !handle.is_running() {
                                return ExitReason::Stopped;
                            }
                        } else {
                            bus.emit(EventKind::TaskKilled {
                                name: spec.name.clone(),
                                reason: "deadline overrun with no event to pause on".into(),
                            });
                            handle.request_stop(&bus);
                            return ExitReason::DeadlineKill;
                        }
                    }
                }
            }
        }

        let mut next_run = handle.next_run.lock();
        *next_run = if spec.period > Duration::ZERO {
            now() + spec.period
        } else {
            now()
        };
        drop(next_run);

        // Step 9: an iteration only counts once it gets here without
        // crashing or being killed on deadline overrun above.
        handle.metrics.lock().record_run();
    }
}

fn describe_panic(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn builder_defaults_to_kill_and_non_event_driven() {
        let task = TaskBuilder::new("t", Duration::from_millis(10)).build(|| Ok(()));
        assert_eq!(task.spec.overrun_action, OverrunAction::Kill);
        assert!(!task.spec.event_driven);
    }

    #[test]
    fn periodic_task_runs_until_max_runs_then_stops() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let task = TaskBuilder::new("counter", Duration::from_millis(1))
            .max_runs(3)
            .build(move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        let bus = EventBus::new();
        let config = Arc::new(SchedulerConfig::default());
        let (handle, join) = spawn(task.spec, bus, config);
        let reason = join.join().unwrap();
        assert!(matches!(reason, ExitReason::MaxRunsReached));
        assert!(!handle.is_running());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn crashing_update_stops_the_task() {
        let task = TaskBuilder::new("boom", Duration::from_millis(1)).build(|| anyhow::bail!("nope"));
        let bus = EventBus::new();
        let config = Arc::new(SchedulerConfig::default());
        let (handle, join) = spawn(task.spec, bus, config);
        let reason = join.join().unwrap();
        assert!(matches!(reason, ExitReason::Crashed(_)));
        assert!(!handle.is_running());
    }

    #[test]
    fn deadline_overrun_kills_by_default() {
        let task = TaskBuilder::new("slow", Duration::from_millis(5))
            .deadline(Duration::from_millis(1))
            .build(|| {
                thread::sleep(Duration::from_millis(20));
                Ok(())
            });
        let bus = EventBus::new();
        let config = Arc::new(SchedulerConfig::default());
        let (handle, join) = spawn(task.spec, bus, config);
        let reason = join.join().unwrap();
        assert!(matches!(reason, ExitReason::DeadlineKill));
        assert!(!handle.is_running());
    }

    #[test]
    fn request_stop_is_idempotent_and_wakes_event_wait() {
        let task = TaskBuilder::new("waiter", Duration::ZERO)
            .event_driven()
            .build(|| Ok(()));
        let bus = EventBus::new();
        let config = Arc::new(SchedulerConfig::default());
        let (handle, join) = spawn(task.spec, bus.clone(), config);
        thread::sleep(Duration::from_millis(20));
        handle.request_stop(&bus);
        handle.request_stop(&bus);
        let reason = join.join().unwrap();
        assert!(matches!(reason, ExitReason::Stopped));
    }

    #[test]
    fn effective_priority_defaults_to_original() {
        let handle = TaskHandle::for_test("t", 3);
        assert_eq!(handle.effective_priority(), 3);
    }
}
