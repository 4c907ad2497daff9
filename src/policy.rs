//! Scheduling policies and preemption behavior.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which ordering rule the preemption loop uses to pick the eligible task.
///
/// Smaller keys are more urgent; see [`SchedulingPolicy::key`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingPolicy {
    /// Earliest Deadline First — orders by absolute deadline.
    Edf,
    /// Rate-Monotonic Scheduling — orders by period (shorter = more urgent).
    Rms,
    /// Static priority order — orders by negated priority.
    Fixed,
}

impl std::fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SchedulingPolicy::Edf => "EDF",
            SchedulingPolicy::Rms => "RMS",
            SchedulingPolicy::Fixed => "FIXED",
        };
        f.write_str(s)
    }
}

/// A policy key is compared with `PartialOrd`/`Ord` on `(f64, tiebreak)`, but
/// `f64` has no total order, so we carry an explicit rank instead of raw
/// deadlines/periods: `None`/`+inf` sorts last regardless of policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PolicyKey(pub f64);

impl PolicyKey {
    pub fn from_edf(deadline: Option<Duration>) -> Self {
        PolicyKey(deadline.map(|d| d.as_secs_f64()).unwrap_or(f64::INFINITY))
    }

    pub fn from_rms(period: Duration) -> Self {
        let secs = period.as_secs_f64();
        PolicyKey(if secs > 0.0 { secs } else { f64::INFINITY })
    }

    pub fn from_fixed(priority: u32) -> Self {
        PolicyKey(-(priority as f64))
    }
}

impl Eq for PolicyKey {}

impl Ord for PolicyKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

impl PartialOrd for PolicyKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl SchedulingPolicy {
    /// Compute the ordering key for a task under this policy. Smaller is
    /// more urgent; ties are broken by registration order upstream.
    pub(crate) fn key(&self, period: Duration, deadline: Option<Duration>, priority: u32) -> PolicyKey {
        match self {
            SchedulingPolicy::Edf => PolicyKey::from_edf(deadline),
            SchedulingPolicy::Rms => PolicyKey::from_rms(period),
            SchedulingPolicy::Fixed => PolicyKey::from_fixed(priority),
        }
    }
}

/// How the preemption loop treats tasks other than the currently eligible
/// one. See SPEC_FULL §4.4 for the rationale behind defaulting to
/// cooperative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreemptionMode {
    /// Non-eligible tasks keep running to completion of their own ticks;
    /// eligibility only affects metrics/events, not execution.
    Cooperative,
    /// Non-eligible tasks are stopped (graceful-then-forced, as in
    /// `remove_task`) until they become eligible again.
    Strict,
}
