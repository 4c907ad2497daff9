//! Scheduler-wide configuration.

use crate::error::SchedulerError;
use crate::policy::{PreemptionMode, SchedulingPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the scheduling kernel.
///
/// Construct with [`SchedulerConfig::default`] and the builder methods, then
/// call [`SchedulerConfig::validate`] before handing it to
/// [`crate::Scheduler::new`] (the scheduler validates on construction
/// regardless, but callers loading configuration from a file want to fail
/// fast with the same diagnostics).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Initial scheduling policy. The dynamic policy switch (§4.4) may move
    /// away from this after the first preemption tick.
    pub initial_policy: SchedulingPolicy,

    /// How the preemption loop treats non-eligible tasks.
    pub preemption_mode: PreemptionMode,

    /// Grace period given to a task's execution context between a
    /// cooperative stop request and a forced termination.
    #[serde(with = "humantime_duration")]
    pub termination_grace: Duration,

    /// Bound on how long an event-driven task blocks on its event signal
    /// before re-checking its `running` flag.
    #[serde(with = "humantime_duration")]
    pub event_wait_timeout: Duration,

    /// Sleep granularity between ticks when a periodic task is waiting for
    /// its `next_run` instant to arrive.
    #[serde(with = "humantime_duration")]
    pub tick_sleep: Duration,

    /// Bound on how long the preemption loop blocks on `schedule_cond`
    /// before re-evaluating policy and supervision.
    #[serde(with = "humantime_duration")]
    pub schedule_wait_timeout: Duration,

    /// Default bounded capacity for a task's mailbox. `None` means
    /// unbounded (back-pressure left to the application, per §4.3).
    pub default_mailbox_capacity: Option<usize>,

    /// Maximum automatic restarts the Supervisor will attempt for a single
    /// task name before giving up and emitting `restart_budget_exhausted`.
    pub max_restarts: u32,

    /// Base back-off between restarts; the actual delay is
    /// `restart_backoff * 2^restart_count`, capped at `max_restart_backoff`.
    #[serde(with = "humantime_duration")]
    pub restart_backoff: Duration,

    /// Ceiling on the exponential restart back-off.
    #[serde(with = "humantime_duration")]
    pub max_restart_backoff: Duration,

    /// If set, the preemption loop exits once it observes this many
    /// consecutive idle ticks (no registered tasks). `None` (the default)
    /// keeps the scheduler alive indefinitely. Mirrors the idle-shutdown
    /// behavior of the original `minRTOS` scheduler loop.
    pub idle_shutdown_after: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_policy: SchedulingPolicy::Fixed,
            preemption_mode: PreemptionMode::Cooperative,
            termination_grace: Duration::from_secs(1),
            event_wait_timeout: Duration::from_millis(100),
            tick_sleep: Duration::from_millis(1),
            schedule_wait_timeout: Duration::from_secs(1),
            default_mailbox_capacity: None,
            max_restarts: 5,
            restart_backoff: Duration::from_millis(100),
            max_restart_backoff: Duration::from_secs(30),
            idle_shutdown_after: None,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_policy(mut self, policy: SchedulingPolicy) -> Self {
        self.initial_policy = policy;
        self
    }

    pub fn with_preemption_mode(mut self, mode: PreemptionMode) -> Self {
        self.preemption_mode = mode;
        self
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    pub fn with_default_mailbox_capacity(mut self, capacity: Option<usize>) -> Self {
        self.default_mailbox_capacity = capacity;
        self
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn with_idle_shutdown_after(mut self, ticks: Option<u32>) -> Self {
        self.idle_shutdown_after = ticks;
        self
    }

    /// Validate the configuration, returning a descriptive error on the
    /// first violation found.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.termination_grace.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "termination_grace must be greater than zero".into(),
            ));
        }
        if self.event_wait_timeout.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "event_wait_timeout must be greater than zero".into(),
            ));
        }
        if self.schedule_wait_timeout.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "schedule_wait_timeout must be greater than zero".into(),
            ));
        }
        if let Some(cap) = self.default_mailbox_capacity {
            if cap == 0 {
                return Err(SchedulerError::InvalidConfig(
                    "default_mailbox_capacity must be greater than zero when set".into(),
                ));
            }
        }
        if self.restart_backoff > self.max_restart_backoff {
            return Err(SchedulerError::InvalidConfig(
                "restart_backoff must not exceed max_restart_backoff".into(),
            ));
        }
        Ok(())
    }
}

/// Minimal `serde(with = ...)` module for `Duration`, since `humantime_serde`
/// is not part of the dependency set this crate pulls in — this keeps
/// configuration round-trippable through the `config`/`serde_json` stack
/// without humanizing the wire format.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
