//! The scheduling kernel: task registry, policy-driven preemption loop, and
//! crash-restart supervision.

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::events::{Event, EventBus, EventKind, EventSink};
use crate::mailbox::{Mailbox, Message};
use crate::policy::{PreemptionMode, SchedulingPolicy};
use crate::sync::Signal;
use crate::task::{self, ExitReason, Task, TaskHandle, TaskSpec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct TaskEntry {
    spec: Arc<TaskSpec>,
    handle: Arc<TaskHandle>,
    thread: Option<thread::JoinHandle<ExitReason>>,
    mailbox: Mailbox,
    restart_count: u32,
    last_restart: Option<Instant>,
    /// Set once this task has reached a state from which it must never run
    /// again under its current registration (`max_runs` exhausted, a
    /// deadline-kill, or a crash that burned through the restart budget).
    /// Distinguishes those terminal exits from a `Strict`-mode preemption
    /// stop, which also clears `handle.is_running()` but is expected to
    /// resume once the task is eligible again.
    terminal: bool,
}

struct SchedulerState {
    tasks: Vec<TaskEntry>,
    policy: SchedulingPolicy,
}

struct SchedulerInner {
    config: SchedulerConfig,
    bus: EventBus,
    state: parking_lot::Mutex<SchedulerState>,
    running: AtomicBool,
    schedule_signal: Signal,
    scheduler_thread: parking_lot::Mutex<Option<thread::JoinHandle<()>>>,
}

/// The scheduling kernel. Cheap to clone (an `Arc` handle) so the same
/// scheduler can be shared with callers on other threads — it is never a
/// process-global singleton (SPEC_FULL §9).
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Construct a scheduler from a validated configuration.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let policy = config.initial_policy;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                bus: EventBus::new(),
                state: parking_lot::Mutex::new(SchedulerState {
                    tasks: Vec::new(),
                    policy,
                }),
                running: AtomicBool::new(true),
                schedule_signal: Signal::new(),
                scheduler_thread: parking_lot::Mutex::new(None),
            }),
        })
    }

    /// Register an additional event sink (a ring buffer for tests, a file
    /// writer) alongside the always-installed `tracing` sink.
    pub fn add_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.bus.add_sink(sink);
    }

    /// Currently active scheduling policy (may differ from the configured
    /// initial policy once the auto-switch in §4.4 has run).
    pub fn current_policy(&self) -> SchedulingPolicy {
        self.inner.state.lock().policy
    }

    /// Register and start a task's execution context. Rejected if the
    /// scheduler is shutting down or a task with the same name is already
    /// registered.
    pub fn add_task(&self, task: Task) -> Result<()> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutdownInProgress(task.spec.name.clone()));
        }

        let mut state = self.inner.state.lock();
        if state.tasks.iter().any(|e| e.spec.name == task.spec.name) {
            self.inner.bus.emit(EventKind::DuplicateRejected {
                name: task.spec.name.clone(),
            });
            return Err(SchedulerError::DuplicateTask(task.spec.name.clone()));
        }

        let spec = task.spec;
        let (handle, thread) = task::spawn(spec.clone(), self.inner.bus.clone(), Arc::new(self.inner.config.clone()));
        let mailbox = Mailbox::new(self.inner.config.default_mailbox_capacity);

        self.inner.bus.emit(EventKind::TaskAdded { name: spec.name.clone() });
        state.tasks.push(TaskEntry {
            spec,
            handle,
            thread: Some(thread),
            mailbox,
            restart_count: 0,
            last_restart: None,
            terminal: false,
        });
        drop(state);
        self.inner.schedule_signal.notify_all();
        Ok(())
    }

    /// Deregister a task, terminating its execution context (graceful, then
    /// forced after the configured grace period).
    pub fn remove_task(&self, name: &str) -> Result<()> {
        let mut state = self.inner.state.lock();
        let Some(idx) = state.tasks.iter().position(|e| e.spec.name == name) else {
            self.inner.bus.emit(EventKind::UnknownTask {
                name: name.to_string(),
                operation: "remove_task".into(),
            });
            return Err(SchedulerError::UnknownTask(name.to_string()));
        };
        let mut entry = state.tasks.remove(idx);
        drop(state);
        terminate_entry(&mut entry, &self.inner.bus, self.inner.config.termination_grace);
        self.inner.bus.emit(EventKind::TaskRemoved { name: name.to_string() });
        self.inner.schedule_signal.notify_all();
        Ok(())
    }

    /// Wake an event-driven task blocked on its signal.
    pub fn trigger_task(&self, name: &str) -> Result<()> {
        let state = self.inner.state.lock();
        let Some(entry) = state.tasks.iter().find(|e| e.spec.name == name) else {
            drop(state);
            self.inner.bus.emit(EventKind::UnknownTask {
                name: name.to_string(),
                operation: "trigger_task".into(),
            });
            return Err(SchedulerError::UnknownTask(name.to_string()));
        };
        entry.handle.event.notify();
        Ok(())
    }

    /// Enqueue a message onto a task's mailbox.
    pub fn send_message(&self, name: &str, msg: Message) -> Result<()> {
        let state = self.inner.state.lock();
        let Some(entry) = state.tasks.iter().find(|e| e.spec.name == name) else {
            drop(state);
            self.inner.bus.emit(EventKind::UnknownTask {
                name: name.to_string(),
                operation: "send_message".into(),
            });
            return Err(SchedulerError::UnknownTask(name.to_string()));
        };
        if entry.mailbox.send(msg) {
            Ok(())
        } else {
            Err(SchedulerError::MailboxFull(name.to_string()))
        }
    }

    /// Dequeue the next message for a task, or `None` if its mailbox is
    /// empty.
    pub fn receive_message(&self, name: &str) -> Result<Option<Message>> {
        let state = self.inner.state.lock();
        let Some(entry) = state.tasks.iter().find(|e| e.spec.name == name) else {
            drop(state);
            self.inner.bus.emit(EventKind::UnknownTask {
                name: name.to_string(),
                operation: "receive_message".into(),
            });
            return Err(SchedulerError::UnknownTask(name.to_string()));
        };
        Ok(entry.mailbox.recv())
    }

    /// Start the preemption/supervision loop on its own execution context.
    /// Idempotent: calling `start` twice is a no-op on the second call.
    pub fn start(&self) -> Result<()> {
        let mut thread_slot = self.inner.scheduler_thread.lock();
        if thread_slot.is_some() {
            return Ok(());
        }
        let inner = self.inner.clone();
        *thread_slot = Some(
            thread::Builder::new()
                .name("scheduler".into())
                .spawn(move || preemption_loop(inner))
                .expect("spawning the scheduler context should not fail under normal OS limits"),
        );
        Ok(())
    }

    /// Stop the preemption loop and terminate every registered task.
    pub fn stop_all(&self) -> Result<()> {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.schedule_signal.notify_all();

        let mut state = self.inner.state.lock();
        for mut entry in state.tasks.drain(..) {
            terminate_entry(&mut entry, &self.inner.bus, self.inner.config.termination_grace);
        }
        Ok(())
    }

    /// Block until the scheduler's own execution context has exited (after
    /// `stop_all`).
    pub fn join(&self) {
        let handle = self.inner.scheduler_thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// External reschedule signal: wakes the preemption loop immediately
    /// instead of waiting for `schedule_wait_timeout` to elapse. Platforms
    /// without a process-level interrupt source can simply never call this.
    pub fn reschedule(&self) {
        self.inner.bus.emit(EventKind::InterruptReceived);
        self.inner.schedule_signal.notify_all();
    }
}

fn terminate_entry(entry: &mut TaskEntry, bus: &EventBus, grace: Duration) {
    entry.handle.request_stop(bus);
    if let Some(thread) = entry.thread.take() {
        if !join_with_grace(thread, grace) {
            bus.emit(EventKind::TaskKilled {
                name: entry.spec.name.clone(),
                reason: "forced termination after grace period elapsed".into(),
            });
        }
    }
}

/// Join a task's execution context, giving up after `grace` elapses.
/// `std::thread::JoinHandle` has no timed join, so a watcher thread performs
/// the blocking join and reports completion over a channel; if the grace
/// period lapses first the watcher keeps running in the background and the
/// original thread's resources are reclaimed whenever it does finish. There
/// is no way to forcibly kill a `std::thread` short of process isolation,
/// which SPEC_FULL §5 leaves as a documented, unimplemented alternative.
fn join_with_grace(thread: thread::JoinHandle<ExitReason>, grace: Duration) -> bool {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let _ = thread.join();
        let _ = tx.send(());
    });
    rx.recv_timeout(grace).is_ok()
}

fn preemption_loop(inner: Arc<SchedulerInner>) {
    let mut idle_ticks: u32 = 0;
    loop {
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }
        inner.schedule_signal.wait_timeout(inner.config.schedule_wait_timeout);
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }

        let mut state = inner.state.lock();
        dynamic_policy_switch(&mut state, &inner.bus);
        supervise(&mut state, &inner.bus, &inner.config);
        enforce_preemption(&mut state, &inner.bus, &inner.config);

        if let Some(after) = inner.config.idle_shutdown_after {
            if state.tasks.is_empty() {
                idle_ticks += 1;
                if idle_ticks >= after {
                    drop(state);
                    inner.running.store(false, Ordering::SeqCst);
                    return;
                }
            } else {
                idle_ticks = 0;
            }
        }
    }
}

fn dynamic_policy_switch(state: &mut SchedulerState, bus: &EventBus) {
    let total_missed: u64 = state
        .tasks
        .iter()
        .map(|e| e.handle.metrics.lock().missed_deadlines)
        .sum();

    let new_policy = if total_missed > 0 {
        SchedulingPolicy::Edf
    } else if !state.tasks.is_empty() && state.tasks.iter().all(|e| e.spec.period > Duration::ZERO) {
        SchedulingPolicy::Rms
    } else {
        SchedulingPolicy::Fixed
    };

    if new_policy != state.policy {
        bus.emit(EventKind::PolicyChanged {
            from: state.policy,
            to: new_policy,
        });
        state.policy = new_policy;
    }
}

/// Pick the currently eligible task under the active policy: the task whose
/// key is smallest among those not yet terminal, first-registered wins ties.
/// Terminal tasks (exhausted `max_runs`, deadline-killed, or out of restart
/// budget) are never eligible again under their current registration; a
/// non-terminal task that isn't running was merely preempted and can be.
fn select_eligible(state: &SchedulerState) -> Option<usize> {
    state
        .tasks
        .iter()
        .enumerate()
        .filter(|(_, e)| !e.terminal)
        .min_by_key(|(_, e)| {
            state
                .policy
                .key(e.spec.period, e.spec.deadline, e.handle.effective_priority())
        })
        .map(|(idx, _)| idx)
}

/// Under `Strict` preemption, only the currently eligible task may run: every
/// other non-terminal task is stopped (graceful-then-forced, as in
/// `remove_task`), and the eligible task is respawned if a prior tick had
/// stopped it for not being eligible. Tasks that reached a terminal state on
/// their own (`max_runs`, deadline-kill, exhausted restart budget) are never
/// resurrected here — that would violate their own completion invariant.
fn enforce_preemption(state: &mut SchedulerState, bus: &EventBus, config: &SchedulerConfig) {
    if config.preemption_mode != PreemptionMode::Strict {
        return;
    }
    let Some(eligible_idx) = select_eligible(state) else {
        return;
    };

    if !state.tasks[eligible_idx].handle.is_running() {
        let entry = &mut state.tasks[eligible_idx];
        let (handle, thread) = task::spawn(entry.spec.clone(), bus.clone(), Arc::new(config.clone()));
        entry.handle = handle;
        entry.thread = Some(thread);
    }

    for (idx, entry) in state.tasks.iter_mut().enumerate() {
        if idx == eligible_idx || entry.terminal || !entry.handle.is_running() {
            continue;
        }
        terminate_entry(entry, bus, config.termination_grace);
    }
}

fn backoff_for(restart_count: u32, config: &SchedulerConfig) -> Duration {
    let factor = 2f64.powi(restart_count as i32);
    let secs = (config.restart_backoff.as_secs_f64() * factor).min(config.max_restart_backoff.as_secs_f64());
    Duration::from_secs_f64(secs)
}

fn supervise(state: &mut SchedulerState, bus: &EventBus, config: &SchedulerConfig) {
    for entry in state.tasks.iter_mut() {
        let finished = entry.thread.as_ref().map(|t| t.is_finished()).unwrap_or(false);
        if !finished {
            continue;
        }
        let Some(thread) = entry.thread.take() else { continue };
        let reason = thread.join().unwrap_or(ExitReason::Crashed("task thread panicked".into()));

        match reason {
            ExitReason::Stopped => {
                // A `remove_task`/`stop_all` caller would have removed this
                // entry from the registry entirely, so an entry surviving
                // with `Stopped` here was preempted under `Strict` mode;
                // `enforce_preemption` respawns it once it is eligible again.
            }
            ExitReason::MaxRunsReached | ExitReason::DeadlineKill => {
                entry.terminal = true;
            }
            ExitReason::Crashed(_) => {
                let now = Instant::now();
                let backoff_elapsed = entry
                    .last_restart
                    .map(|last| now.duration_since(last) >= backoff_for(entry.restart_count, config))
                    .unwrap_or(true);

                if entry.restart_count < config.max_restarts && backoff_elapsed {
                    entry.restart_count += 1;
                    entry.last_restart = Some(now);
                    let (handle, thread) = task::spawn(entry.spec.clone(), bus.clone(), Arc::new(config.clone()));
                    entry.handle = handle;
                    entry.thread = Some(thread);
                    entry.mailbox = Mailbox::new(config.default_mailbox_capacity);
                    bus.emit(EventKind::TaskRestarted {
                        name: entry.spec.name.clone(),
                    });
                } else {
                    entry.terminal = true;
                    bus.emit(EventKind::RestartBudgetExhausted {
                        name: entry.spec.name.clone(),
                    });
                }
            }
        }
    }
}
