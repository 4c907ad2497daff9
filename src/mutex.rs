//! Priority-inheriting mutex.
//!
//! Ownership hand-off favors the highest-priority waiter (FIFO among equal
//! priorities); while a higher-priority task waits, the current owner is
//! temporarily boosted to that priority so it cannot be starved behind
//! lower-priority work scheduled in between (classic priority-inheritance
//! protocol, bounding inversion to the holder's own critical section).

use crate::events::{EventBus, EventKind};
use crate::task::TaskHandle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

static NEXT_MUTEX_ID: AtomicU64 = AtomicU64::new(1);

/// How long `acquire` sleeps between contention retries. The mutex does not
/// promise fair FIFO hand-off under contention, only that priority
/// inheritance prevents indefinite starvation.
const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Object-safe view of a mutex a [`TaskHandle`] currently holds, used so a
/// task can release everything it holds on `stop()` without the task module
/// depending on the concrete mutex type (and without a strong reference
/// cycle: tasks hold only a [`Weak`] pointer into their held mutexes).
pub(crate) trait MutexOwnerOps: Send + Sync {
    fn mutex_id(&self) -> u64;
    fn force_release(&self, owner_name: &str, bus: &EventBus);
}

struct PiMutexInner {
    owner: Option<Arc<TaskHandle>>,
    waiters: Vec<Arc<TaskHandle>>,
}

/// A priority-inheriting mutual-exclusion lock.
pub struct PiMutex {
    id: u64,
    enable_priority_inheritance: bool,
    self_ref: Weak<PiMutex>,
    inner: parking_lot::Mutex<PiMutexInner>,
}

impl PiMutex {
    /// Construct a mutex. When `enable_priority_inheritance` is false, the
    /// lock behaves as a plain mutual-exclusion lock with FIFO-by-priority
    /// hand-off but no boosting of the owner.
    pub fn new(enable_priority_inheritance: bool) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| PiMutex {
            id: NEXT_MUTEX_ID.fetch_add(1, Ordering::Relaxed),
            enable_priority_inheritance,
            self_ref: self_ref.clone(),
            inner: parking_lot::Mutex::new(PiMutexInner {
                owner: None,
                waiters: Vec::new(),
            }),
        })
    }

    fn as_ownerops_weak(&self) -> Weak<dyn MutexOwnerOps> {
        self.self_ref.clone()
    }

    /// Attempt to become the owner. Blocks (yielding the thread between
    /// retries) until ownership is granted or `timeout` elapses; `None`
    /// blocks indefinitely. Returns `false` on timeout without leaving the
    /// caller on the owner path.
    pub fn acquire(&self, task: &Arc<TaskHandle>, bus: &EventBus, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.owner.is_none() {
                    inner.waiters.retain(|w| !Arc::ptr_eq(w, task));
                    inner.owner = Some(task.clone());
                    task.register_held_mutex(self.as_ownerops_weak());
                    return true;
                }
                if !inner.waiters.iter().any(|w| Arc::ptr_eq(w, task)) {
                    inner.waiters.push(task.clone());
                }
                self.recompute_boost(&mut inner, bus);
            }

            if let Some(dl) = deadline {
                if Instant::now() >= dl {
                    let mut inner = self.inner.lock();
                    inner.waiters.retain(|w| !Arc::ptr_eq(w, task));
                    return false;
                }
            }
            thread::sleep(ACQUIRE_RETRY_INTERVAL);
        }
    }

    /// Release ownership, restoring the boost (if any) this mutex applied
    /// and handing off to the highest-priority waiter. No-op (returns
    /// `false`) if `task` is not the current owner.
    pub fn release(&self, task: &Arc<TaskHandle>, bus: &EventBus) -> bool {
        let mut inner = self.inner.lock();
        match &inner.owner {
            Some(owner) if Arc::ptr_eq(owner, task) => {}
            _ => return false,
        }
        self.restore_owner_boost(task, bus);
        task.unregister_held_mutex(self.id);
        inner.owner = None;
        self.hand_off(&mut inner, bus);
        true
    }

    fn restore_owner_boost(&self, owner: &Arc<TaskHandle>, bus: &EventBus) {
        if let Some(restored_to) = owner.clear_boost(self.id) {
            bus.emit(EventKind::MutexRestore {
                owner: owner.name.clone(),
                to: restored_to,
            });
        }
    }

    fn hand_off(&self, inner: &mut PiMutexInner, bus: &EventBus) {
        if inner.waiters.is_empty() {
            return;
        }
        let mut best = 0;
        for i in 1..inner.waiters.len() {
            if inner.waiters[i].effective_priority() > inner.waiters[best].effective_priority() {
                best = i;
            }
        }
        let new_owner = inner.waiters.remove(best);
        new_owner.register_held_mutex(self.as_ownerops_weak());
        inner.owner = Some(new_owner);
        self.recompute_boost(inner, bus);
    }

    fn recompute_boost(&self, inner: &mut PiMutexInner, bus: &EventBus) {
        if !self.enable_priority_inheritance {
            return;
        }
        let Some(owner) = inner.owner.clone() else {
            return;
        };
        let Some(p_star) = inner.waiters.iter().map(|w| w.effective_priority()).max() else {
            return;
        };
        let current = owner.effective_priority();
        if p_star > current {
            owner.apply_boost(self.id, p_star);
            bus.emit(EventKind::MutexBoost {
                owner: owner.name.clone(),
                from: current,
                to: p_star,
            });
        }
    }
}

impl MutexOwnerOps for PiMutex {
    fn mutex_id(&self) -> u64 {
        self.id
    }

    fn force_release(&self, owner_name: &str, bus: &EventBus) {
        let mut inner = self.inner.lock();
        let is_owner = matches!(&inner.owner, Some(o) if o.name == owner_name);
        if !is_owner {
            return;
        }
        if let Some(owner) = inner.owner.clone() {
            self.restore_owner_boost(&owner, bus);
        }
        inner.owner = None;
        self.hand_off(&mut inner, bus);
    }
}
