//! Monotonic clock source and per-task metrics.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How many past executions' timing we retain per task for the rolling
/// history. Bounded so long-lived tasks don't grow their metrics record
/// without limit.
const EXEC_HISTORY_CAPACITY: usize = 64;

/// Returns the current monotonic instant. A thin wrapper so the rest of the
/// crate has one place to swap in a virtual clock if a deterministic test
/// clock is ever needed.
pub fn now() -> Instant {
    Instant::now()
}

/// Per-task resource and timing counters, updated at the end of every
/// completed `update` invocation (see SPEC_FULL §4.1 run-loop step 5).
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Duration of the most recent `update` invocation.
    pub exec_time: Duration,
    /// Rolling history of recent execution times, oldest first, bounded to
    /// [`EXEC_HISTORY_CAPACITY`] entries.
    pub exec_time_history: VecDeque<Duration>,
    /// `(exec_time / period) * 100` for periodic tasks, `exec_time * 100`
    /// (as a percentage-of-a-second figure) for one-shot tasks — matches
    /// the original scheduler's estimate verbatim.
    pub cpu_usage: f64,
    /// A rough, non-authoritative memory footprint estimate. The original
    /// implementation used `sys.getsizeof(self)` as a placeholder; this
    /// port uses the task bookkeeping's static size plus its history
    /// buffer, which is equally approximate but doesn't require an
    /// allocator hook.
    pub memory_usage_estimate: usize,
    /// Total missed-deadline count across the task's lifetime (including
    /// across Supervisor restarts is *not* retained — restarts reinitialize
    /// this record, per SPEC_FULL §4.5).
    pub missed_deadlines: u64,
    /// Number of completed `update` invocations for the current execution
    /// context.
    pub run_count: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            exec_time: Duration::ZERO,
            exec_time_history: VecDeque::with_capacity(EXEC_HISTORY_CAPACITY),
            cpu_usage: 0.0,
            memory_usage_estimate: std::mem::size_of::<Metrics>(),
            missed_deadlines: 0,
            run_count: 0,
        }
    }
}

impl Metrics {
    /// Record exec-time/cpu/history figures for one `update` invocation.
    /// Called unconditionally right after `update` returns, whether or not
    /// it succeeded — `run_count` is a separate counter, bumped only once
    /// an iteration completes without crashing or overrunning its deadline
    /// (see `Metrics::record_run`).
    pub fn record_execution(&mut self, exec_time: Duration, period: Duration) {
        self.exec_time = exec_time;
        if self.exec_time_history.len() == EXEC_HISTORY_CAPACITY {
            self.exec_time_history.pop_front();
        }
        self.exec_time_history.push_back(exec_time);

        self.cpu_usage = if period > Duration::ZERO {
            (exec_time.as_secs_f64() / period.as_secs_f64()) * 100.0
        } else {
            exec_time.as_secs_f64() * 100.0
        };

        self.memory_usage_estimate = std::mem::size_of::<Metrics>()
            + self.exec_time_history.len() * std::mem::size_of::<Duration>();
    }

    pub fn record_missed_deadline(&mut self) {
        self.missed_deadlines += 1;
    }

    /// Count one completed `update` invocation (SPEC_FULL §4.1 step 9) — not
    /// called for an iteration that crashed or missed its deadline.
    pub fn record_run(&mut self) {
        self.run_count += 1;
    }
}
