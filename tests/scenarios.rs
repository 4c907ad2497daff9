//! End-to-end scenarios against the public `Scheduler` surface, one per
//! concrete scenario enumerated in the scheduling kernel's specification.
//! Real threads, real timers, no mocked clock — matching how the teacher
//! corpus exercises its own long-running control loops in integration
//! tests rather than unit-testing a mock.

use rtsched::{EventKind, OverrunAction, RingBufferSink, Scheduler, SchedulerConfig, TaskBuilder};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn test_scheduler() -> Scheduler {
    let mut config = SchedulerConfig::default().with_termination_grace(Duration::from_millis(200));
    config.schedule_wait_timeout = Duration::from_millis(20);
    Scheduler::new(config).unwrap()
}

#[test]
fn simple_periodic_task_runs_exactly_max_runs_times() {
    let sched = test_scheduler();
    let count = Arc::new(AtomicU32::new(0));
    let c = count.clone();

    sched
        .add_task(
            TaskBuilder::new("heartbeat", Duration::from_millis(100))
                .max_runs(3)
                .build(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        )
        .unwrap();

    sched.start().unwrap();
    thread::sleep(Duration::from_secs(1));
    sched.stop_all().unwrap();
    sched.join();

    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn deadline_overrun_kills_and_is_not_restarted() {
    let sched = test_scheduler();
    let sink = Arc::new(RingBufferSink::new(64));
    sched.add_event_sink(sink.clone());

    sched
        .add_task(
            TaskBuilder::new("slow", Duration::from_millis(100))
                .deadline(Duration::from_millis(100))
                .overrun_action(OverrunAction::Kill)
                .build(|| {
                    thread::sleep(Duration::from_millis(200));
                    Ok(())
                }),
        )
        .unwrap();

    sched.start().unwrap();
    thread::sleep(Duration::from_secs(1));
    sched.stop_all().unwrap();
    sched.join();

    let events = sink.snapshot();
    let missed = events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::DeadlineMissed { .. }))
        .count();
    assert!(missed >= 1, "expected at least one deadline_missed event, saw {events:?}");

    let restarted = events.iter().any(|e| matches!(e.kind, EventKind::TaskRestarted { .. }));
    assert!(!restarted, "a deadline-killed task must not be restarted by the Supervisor");
}

#[test]
fn priority_inheritance_boosts_holder_then_restores_on_release() {
    use rtsched::{EventBus, PiMutex, TaskHandle};

    // PiMutex is a standalone component (spec §4.2): exercised here directly
    // against two task identities built with `TaskHandle::standalone`, the
    // same entry point an embedder would use to put the priority-inheriting
    // mutex in front of work that isn't managed by a `Scheduler` at all.
    let bus = EventBus::new();
    let mutex = PiMutex::new(true);

    let low = TaskHandle::standalone("low", 1);
    let high = TaskHandle::standalone("high", 5);

    assert!(mutex.acquire(&low, &bus, None));

    let mutex2 = mutex.clone();
    let bus2 = bus.clone();
    let high_task = high.clone();
    let waiter = thread::spawn(move || mutex2.acquire(&high_task, &bus2, Some(Duration::from_secs(3))));

    // Give "high" time to register as a waiter and trigger the boost.
    thread::sleep(Duration::from_millis(200));
    assert_eq!(low.effective_priority(), 5, "low must be boosted to high's priority while high waits");

    assert!(mutex.release(&low, &bus));
    assert_eq!(low.effective_priority(), 1, "low must be restored to its original priority after release");
    assert!(waiter.join().unwrap());
    assert_eq!(high.effective_priority(), 5);
}

#[test]
fn edf_and_rms_auto_switch_react_to_missed_deadlines() {
    let sched = test_scheduler();
    let sink = Arc::new(RingBufferSink::new(256));
    sched.add_event_sink(sink.clone());

    // Three periodic tasks that all meet their deadlines -> RMS.
    for (name, period_ms) in [("a", 50), ("b", 70), ("c", 90)] {
        sched
            .add_task(TaskBuilder::new(name, Duration::from_millis(period_ms)).build(|| Ok(())))
            .unwrap();
    }

    sched.start().unwrap();
    thread::sleep(Duration::from_millis(400));
    assert_eq!(sched.current_policy(), rtsched::SchedulingPolicy::Rms);

    // A task that always overruns its deadline -> EDF.
    sched
        .add_task(
            TaskBuilder::new("offender", Duration::from_millis(50))
                .deadline(Duration::from_millis(10))
                .overrun_action(OverrunAction::Kill)
                .build(|| {
                    thread::sleep(Duration::from_millis(40));
                    Ok(())
                }),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(400));
    assert_eq!(sched.current_policy(), rtsched::SchedulingPolicy::Edf);

    sched.stop_all().unwrap();
    sched.join();

    let transitions: Vec<_> = sink
        .snapshot()
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::PolicyChanged { .. }))
        .collect();
    assert!(!transitions.is_empty(), "policy_changed events should be recorded on every transition");
}

#[test]
fn event_driven_task_only_runs_after_trigger() {
    let sched = test_scheduler();
    let count = Arc::new(AtomicU32::new(0));
    let c = count.clone();

    sched
        .add_task(
            TaskBuilder::new("listener", Duration::ZERO)
                .event_driven()
                .build(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        )
        .unwrap();

    sched.start().unwrap();
    thread::sleep(Duration::from_secs(2));
    assert_eq!(count.load(Ordering::SeqCst), 0, "an untriggered event-driven task must never run");

    sched.trigger_task("listener").unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(count.load(Ordering::SeqCst) >= 1, "trigger_task must wake the task at least once");

    sched.stop_all().unwrap();
    sched.join();
}

#[test]
fn mailbox_delivers_fifo_per_destination() {
    let sched = test_scheduler();
    sched
        .add_task(TaskBuilder::new("mailroom", Duration::ZERO).event_driven().build(|| Ok(())))
        .unwrap();

    sched.send_message("mailroom", serde_json::json!("a")).unwrap();
    sched.send_message("mailroom", serde_json::json!("b")).unwrap();
    sched.send_message("mailroom", serde_json::json!("c")).unwrap();

    assert_eq!(sched.receive_message("mailroom").unwrap(), Some(serde_json::json!("a")));
    assert_eq!(sched.receive_message("mailroom").unwrap(), Some(serde_json::json!("b")));
    assert_eq!(sched.receive_message("mailroom").unwrap(), Some(serde_json::json!("c")));
    assert_eq!(sched.receive_message("mailroom").unwrap(), None);
    sched.stop_all().unwrap();
}

#[test]
fn duplicate_task_registration_is_rejected() {
    let sched = test_scheduler();
    let build = || TaskBuilder::new("solo", Duration::from_millis(10)).build(|| Ok(()));
    sched.add_task(build()).unwrap();
    assert!(sched.add_task(build()).is_err());
    sched.stop_all().unwrap();
}

#[test]
fn add_task_is_rejected_once_shutdown_has_started() {
    let sched = test_scheduler();
    sched.start().unwrap();
    sched.stop_all().unwrap();
    sched.join();

    let result = sched.add_task(TaskBuilder::new("late", Duration::from_millis(10)).build(|| Ok(())));
    assert!(result.is_err());
}
